use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bson::{doc, Document};
use tokio::sync::{broadcast, mpsc, watch};

use super::{
    description::topology::server_selection::{attempt_to_select_server, SelectedServer},
    monitor::{Monitor, MIN_HEARTBEAT_FREQUENCY},
    server::Server,
    ServerDescription,
    ServerType,
    TopologyDescription,
    TopologyType,
};
use crate::{
    cursor::{Cursor, CursorFactory, CursorOptions, CursorSpecification, DefaultCursorFactory},
    error::{Error, ErrorKind, Result},
    event::{
        sdam::{
            SdamEvent,
            ServerClosedEvent,
            ServerDescriptionChangedEvent,
            ServerOpeningEvent,
            TopologyClosedEvent,
            TopologyDescriptionChangedEvent,
            TopologyOpeningEvent,
        },
        ConnectEvent,
        ErrorEvent,
        Event,
        EventEmitter,
        EventSubscriber,
    },
    hello::HelloCommandResponse,
    namespace::Namespace,
    options::{ClientMetadata, CommandOptions, ServerAddress, TopologyOptions},
    runtime::{self, AcknowledgedMessage, WorkerHandle, WorkerHandleListener},
    selection_criteria::{ReadPreference, SelectionCriteria},
    session::{ClusterTime, ServerSessionPool, Session, SessionRegistry},
    transport::{CommandRequest, Transport},
};

/// Topology ids are allocated from a process-wide monotonic counter.
static NEXT_TOPOLOGY_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// The view of a deployment a driver operates through: which servers are part of it, what role
/// each currently has, and which of them an operation should go to.
///
/// A `Topology` owns one background worker task that serializes every state change, plus one
/// monitor task per server feeding heartbeat results into it. Handles are cheap to clone; the
/// worker shuts down when the last handle is dropped or when [`Topology::close`] runs.
#[derive(Clone, Debug)]
pub struct Topology {
    pub(crate) id: u64,
    pub(crate) options: TopologyOptions,
    pub(crate) watcher: TopologyWatcher,
    pub(crate) updater: TopologyUpdater,
    pub(crate) check_requester: TopologyCheckRequester,
    emitter: EventEmitter,
    session_pool: Arc<ServerSessionPool>,
    sessions: SessionRegistry,
    _worker_handle: WorkerHandle,
}

impl Topology {
    /// Creates a new topology over the given transport, spawning its worker task. No servers
    /// are contacted until [`Topology::connect`] or the first operation.
    pub fn new(options: TopologyOptions, transport: Arc<dyn Transport>) -> Result<Topology> {
        options.validate()?;

        let id = NEXT_TOPOLOGY_ID.fetch_add(1, Ordering::SeqCst);
        let (update_sender, update_receiver) = mpsc::unbounded_channel();
        let updater = TopologyUpdater {
            sender: update_sender,
        };

        let state = TopologyState {
            connected: false,
            closed: false,
            initial_connect_complete: false,
            description: TopologyDescription::default(),
            servers: HashMap::new(),
        };
        let (publisher, watch_receiver) = watch::channel(state);
        let watcher = TopologyWatcher {
            receiver: watch_receiver,
        };

        let (worker_handle, handle_listener) = WorkerHandleListener::channel();
        let emitter = EventEmitter::new();
        let check_requester = TopologyCheckRequester::new();
        let session_pool = Arc::new(ServerSessionPool::new());
        let sessions = SessionRegistry::default();
        let metadata = options.client_metadata();

        let worker = TopologyWorker {
            id,
            description: TopologyDescription::default(),
            servers: HashMap::new(),
            connected: false,
            closed: false,
            initial_connect_complete: false,
            update_receiver,
            publisher,
            handle_listener,
            options: options.clone(),
            transport,
            metadata,
            emitter: emitter.clone(),
            check_requester: check_requester.clone(),
            updater: updater.clone(),
            watcher: watcher.clone(),
            session_pool: session_pool.clone(),
            sessions: sessions.clone(),
        };
        runtime::execute(worker.run());

        Ok(Topology {
            id,
            options,
            watcher,
            updater,
            check_requester,
            emitter,
            session_pool,
            sessions,
            _worker_handle: worker_handle,
        })
    }

    /// The process-wide unique id of this topology.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Subscribes to the event stream of this topology.
    pub fn subscribe(&self) -> EventSubscriber {
        self.emitter.subscribe()
    }

    /// A snapshot of the current topology description.
    pub fn description(&self) -> TopologyDescription {
        self.watcher.peek_latest().description
    }

    /// The addresses of the servers the topology currently monitors.
    pub fn server_addresses(&self) -> Vec<ServerAddress> {
        self.watcher.peek_latest().servers.keys().cloned().collect()
    }

    /// Whether the topology has been opened and not yet closed. Informational only; operations
    /// trigger a connect themselves when needed.
    pub fn is_connected(&self) -> bool {
        self.watcher.peek_latest().connected
    }

    /// Whether the topology has been closed.
    pub fn is_closed(&self) -> bool {
        self.watcher.peek_latest().closed
    }

    /// Whether the deployment supports sessions, i.e. whether it has reported a logical session
    /// timeout.
    pub fn has_session_support(&self) -> bool {
        self.watcher.peek_latest().description.has_session_support()
    }

    /// The hello response of the first server the topology has heard from, used for feature
    /// detection. Returns an empty response when no server has reported yet; behavior is
    /// unspecified when servers disagree.
    pub fn last_hello(&self) -> HelloCommandResponse {
        self.watcher.peek_latest().description.last_hello()
    }

    /// The highest `$clusterTime` the topology has observed.
    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.watcher.peek_latest().description.cluster_time().cloned()
    }

    /// Opens the topology: emits the opening events, starts a monitor per seed, and waits until
    /// a qualifying server has been contacted (the primary for replica-set deployments, any
    /// server otherwise). Concurrent and repeated calls coalesce onto the same first-connect
    /// notification.
    pub async fn connect(&self) -> Result<()> {
        self.updater.connect().await;
        let mut watcher = self.watcher.clone();
        watcher.wait_until_initial_connect().await
    }

    /// Closes the topology: ends active and pooled sessions, destroys every server handle, and
    /// emits `topologyClosed`. Calls after the first are no-ops.
    pub async fn close(&self) -> Result<()> {
        self.updater.close().await;
        Ok(())
    }

    /// Deprecated alias of [`Topology::close`].
    #[deprecated = "use `close`"]
    pub async fn destroy(&self) -> Result<()> {
        self.close().await
    }

    /// Selects a server matching the given criteria (defaulting to a `primary` read
    /// preference), waiting up to `server_selection_timeout` for one to become available. When
    /// several servers qualify within the latency window, one is chosen uniformly at random.
    pub async fn select_server(
        &self,
        criteria: Option<&SelectionCriteria>,
    ) -> Result<SelectedServer> {
        self.select_server_with(criteria, None).await
    }

    pub(crate) async fn select_server_with(
        &self,
        criteria: Option<&SelectionCriteria>,
        deprioritized: Option<&ServerAddress>,
    ) -> Result<SelectedServer> {
        let default_criteria = SelectionCriteria::ReadPreference(ReadPreference::Primary);
        let criteria = criteria.unwrap_or(&default_criteria);
        let timeout = self
            .options
            .server_selection_timeout
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT);
        let min_wait = self
            .options
            .min_heartbeat_freq
            .unwrap_or(MIN_HEARTBEAT_FREQUENCY);

        let mut watcher = self.watcher.clone();
        let mut start = Instant::now();
        let mut waited_for_monitoring = false;

        loop {
            let state = watcher.peek_latest();
            if state.closed {
                return Err(ErrorKind::Shutdown.into());
            }

            if !state.connected {
                self.updater.connect().await;
                let remaining = match timeout.checked_sub(start.elapsed()) {
                    Some(remaining) => remaining,
                    None => {
                        return Err(Error::server_selection_timeout(
                            "Server selection timed out waiting to connect",
                        ))
                    }
                };
                if !watcher.wait_for_initial_connect(remaining).await {
                    return Err(Error::server_selection_timeout(
                        "Server selection timed out waiting to connect",
                    ));
                }
                // A forced reconnect deliberately resets the selection budget.
                start = Instant::now();
                continue;
            }

            if start.elapsed() >= timeout {
                return Err(self.selection_timeout_error(
                    &state.description,
                    criteria,
                    timeout,
                    waited_for_monitoring,
                ));
            }

            match attempt_to_select_server(criteria, &state.description, &state.servers, deprioritized)?
            {
                Some(server) => return Ok(server),
                None => {
                    // No suitable server; ask every monitor for an immediate check and wait
                    // for the topology to change, against the original deadline.
                    self.check_requester.request_check();
                    waited_for_monitoring = true;
                    let remaining = match timeout.checked_sub(start.elapsed()) {
                        Some(remaining) => remaining,
                        None => continue,
                    };
                    watcher.wait_for_update(remaining.min(min_wait)).await;
                }
            }
        }
    }

    fn selection_timeout_error(
        &self,
        description: &TopologyDescription,
        criteria: &SelectionCriteria,
        timeout: Duration,
        waited_for_monitoring: bool,
    ) -> Error {
        let detail = description.server_selection_timeout_error_message(criteria);
        let message = if waited_for_monitoring {
            format!(
                "Server selection timed out after {} ms due to monitoring: {}",
                timeout.as_millis(),
                detail
            )
        } else {
            format!(
                "Server selection timed out after {} ms: {}",
                timeout.as_millis(),
                detail
            )
        };
        Error::server_selection_timeout(message)
    }

    /// Starts a new session, tracked by this topology until it ends.
    pub fn start_session(&self) -> Session {
        Session::start(
            self.session_pool.clone(),
            self.sessions.clone(),
            self.watcher.clone(),
        )
    }

    /// Sends a best-effort `endSessions` command for the given session ids with a
    /// `primaryPreferred` read preference. Errors are ignored, per the sessions protocol.
    pub async fn end_sessions(&self, session_ids: Vec<Document>) {
        if session_ids.is_empty() {
            return;
        }
        let options = CommandOptions::builder()
            .read_preference(Some(ReadPreference::PrimaryPreferred { tag_sets: None }))
            .build();
        let _ = self
            .command(
                &Namespace::new("admin", "$cmd"),
                doc! { "endSessions": session_ids },
                options,
                None,
            )
            .await;
    }

    /// Constructs a cursor for the given namespace and command through the configured cursor
    /// factory. The topology core never iterates cursors itself.
    pub fn cursor(&self, ns: &Namespace, command: Document, options: CursorOptions) -> Cursor {
        let specification = CursorSpecification {
            namespace: ns.clone(),
            command,
            read_preference: options.read_preference,
            batch_size: options.batch_size,
        };
        match self.options.cursor_factory {
            Some(ref factory) => factory.create(specification),
            None => DefaultCursorFactory.create(specification),
        }
    }
}

/// The state one topology publishes through its watch channel: the current description, the
/// live server handles, and the lifecycle flags. Every published value is internally
/// consistent; the worker never exposes a handle map that disagrees with the description.
#[derive(Clone, Debug)]
pub(crate) struct TopologyState {
    pub(crate) connected: bool,
    pub(crate) closed: bool,
    pub(crate) initial_connect_complete: bool,
    pub(crate) description: TopologyDescription,
    pub(crate) servers: HashMap<ServerAddress, Arc<Server>>,
}

/// Sender half of the topology's update queue, held by monitors and dispatch paths.
#[derive(Clone, Debug)]
pub(crate) struct TopologyUpdater {
    sender: mpsc::UnboundedSender<UpdateMessage>,
}

impl TopologyUpdater {
    /// Feeds a new server description into the topology, returning whether the topology
    /// changed as a result.
    pub(crate) async fn update(&self, server_description: ServerDescription) -> bool {
        let (message, receiver) = AcknowledgedMessage::package(Box::new(server_description));
        let _ = self.sender.send(UpdateMessage::ServerUpdate(message));
        receiver.wait_for_acknowledgment().await.unwrap_or(false)
    }

    pub(crate) async fn handle_monitor_error(&self, address: ServerAddress, error: Error) -> bool {
        self.send_error(address, error, ErrorSource::Monitor).await
    }

    pub(crate) async fn handle_application_error(
        &self,
        address: ServerAddress,
        error: Error,
    ) -> bool {
        self.send_error(address, error, ErrorSource::Application).await
    }

    async fn send_error(&self, address: ServerAddress, error: Error, source: ErrorSource) -> bool {
        let (message, receiver) = AcknowledgedMessage::package((address, error, source));
        let _ = self.sender.send(UpdateMessage::ServerError(message));
        receiver.wait_for_acknowledgment().await.unwrap_or(false)
    }

    pub(crate) async fn connect(&self) {
        let (message, receiver) = AcknowledgedMessage::package(());
        let _ = self.sender.send(UpdateMessage::Connect(message));
        let _ = receiver.wait_for_acknowledgment().await;
    }

    pub(crate) async fn close(&self) -> bool {
        let (message, receiver) = AcknowledgedMessage::package(());
        let _ = self.sender.send(UpdateMessage::Close(message));
        receiver.wait_for_acknowledgment().await.unwrap_or(false)
    }
}

/// Receiver half of the topology's published state. Watchers never observe a partially applied
/// update.
#[derive(Clone, Debug)]
pub(crate) struct TopologyWatcher {
    receiver: watch::Receiver<TopologyState>,
}

impl TopologyWatcher {
    /// Whether the topology worker is still running.
    pub(crate) fn is_alive(&self) -> bool {
        self.receiver.has_changed().is_ok()
    }

    pub(crate) fn peek_latest(&self) -> TopologyState {
        self.receiver.borrow().clone()
    }

    pub(crate) fn server_description(&self, address: &ServerAddress) -> Option<ServerDescription> {
        self.receiver
            .borrow()
            .description
            .get_server_description(address)
            .cloned()
    }

    /// Whether the server at `address` is still part of the topology, i.e. whether its monitor
    /// should keep running.
    pub(crate) fn monitors_address(&self, address: &ServerAddress) -> bool {
        let state = self.receiver.borrow();
        !state.closed && state.servers.contains_key(address)
    }

    pub(crate) fn logical_session_timeout(&self) -> Option<Duration> {
        self.receiver.borrow().description.logical_session_timeout()
    }

    /// Waits up to `timeout` for a new topology state to be published. Returns false on
    /// timeout or when the worker has shut down.
    pub(crate) async fn wait_for_update(&mut self, timeout: Duration) -> bool {
        matches!(
            runtime::timeout(timeout, self.receiver.changed()).await,
            Ok(Ok(()))
        )
    }

    async fn wait_for_initial_connect(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let state = self.receiver.borrow();
                if state.initial_connect_complete {
                    return true;
                }
                if state.closed {
                    return false;
                }
            }
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => return false,
            };
            if !self.wait_for_update(remaining).await {
                return false;
            }
        }
    }

    async fn wait_until_initial_connect(&mut self) -> Result<()> {
        loop {
            {
                let state = self.receiver.borrow();
                if state.initial_connect_complete {
                    return Ok(());
                }
                if state.closed {
                    return Err(ErrorKind::Shutdown.into());
                }
            }
            if self.receiver.changed().await.is_err() {
                return Err(ErrorKind::Shutdown.into());
            }
        }
    }
}

/// Broadcasts requests for an immediate server check to every monitor. Server selection uses
/// this when no suitable server is known.
#[derive(Clone, Debug)]
pub(crate) struct TopologyCheckRequester {
    sender: broadcast::Sender<()>,
}

impl TopologyCheckRequester {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    pub(crate) fn request_check(&self) {
        let _: std::result::Result<_, _> = self.sender.send(());
    }

    pub(crate) fn subscribe(&self) -> TopologyCheckRequestReceiver {
        TopologyCheckRequestReceiver {
            receiver: self.sender.subscribe(),
        }
    }
}

pub(crate) struct TopologyCheckRequestReceiver {
    receiver: broadcast::Receiver<()>,
}

impl TopologyCheckRequestReceiver {
    /// Waits for either `timeout` to elapse or a check request to arrive. Returns true if a
    /// request arrived.
    pub(crate) async fn wait_for_check_request(&mut self, timeout: Duration) -> bool {
        runtime::timeout(timeout, self.receiver.recv()).await.is_ok()
    }

    pub(crate) fn clear_check_requests(&mut self) {
        while self.receiver.try_recv().is_ok() {}
    }
}

#[derive(Clone, Copy, Debug)]
enum ErrorSource {
    Monitor,
    Application,
}

#[derive(Debug)]
enum UpdateMessage {
    Connect(AcknowledgedMessage<()>),
    ServerUpdate(AcknowledgedMessage<Box<ServerDescription>, bool>),
    ServerError(AcknowledgedMessage<(ServerAddress, Error, ErrorSource), bool>),
    Close(AcknowledgedMessage<(), bool>),
}

/// The task that owns the authoritative topology state. All mutation happens here, one message
/// at a time, which is what guarantees the event ordering contracts.
struct TopologyWorker {
    id: u64,
    description: TopologyDescription,
    servers: HashMap<ServerAddress, Arc<Server>>,
    connected: bool,
    closed: bool,
    initial_connect_complete: bool,

    update_receiver: mpsc::UnboundedReceiver<UpdateMessage>,
    publisher: watch::Sender<TopologyState>,
    handle_listener: WorkerHandleListener,

    options: TopologyOptions,
    transport: Arc<dyn Transport>,
    metadata: ClientMetadata,
    emitter: EventEmitter,
    check_requester: TopologyCheckRequester,
    updater: TopologyUpdater,
    watcher: TopologyWatcher,
    session_pool: Arc<ServerSessionPool>,
    sessions: SessionRegistry,
}

impl TopologyWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(message) = self.update_receiver.recv() => match message {
                    UpdateMessage::Connect(message) => {
                        let (_, ack) = message.into_parts();
                        self.process_connect();
                        ack.acknowledge(());
                    }
                    UpdateMessage::ServerUpdate(message) => {
                        let (server_description, ack) = message.into_parts();
                        let changed = self.process_server_update(*server_description).await;
                        ack.acknowledge(changed);
                    }
                    UpdateMessage::ServerError(message) => {
                        let ((address, error, source), ack) = message.into_parts();
                        let changed = self.process_server_error(address, error, source).await;
                        ack.acknowledge(changed);
                    }
                    UpdateMessage::Close(message) => {
                        let (_, ack) = message.into_parts();
                        let closed = self.process_close().await;
                        ack.acknowledge(closed);
                    }
                },
                _ = self.handle_listener.wait_for_all_handle_drops() => break,
            }
        }

        // Last handle dropped without an explicit close.
        if !self.closed {
            self.process_close().await;
        }
    }

    fn process_connect(&mut self) {
        if self.connected || self.closed {
            return;
        }

        self.emit(SdamEvent::TopologyOpening(TopologyOpeningEvent {
            topology_id: self.id,
        }));

        let previous_description = self.description.clone();
        let mut seeded = TopologyDescription::default();
        seeded.initialize(&self.options);
        self.description = seeded;
        self.connected = true;

        let addresses: Vec<ServerAddress> = self.description.servers().keys().cloned().collect();
        for address in &addresses {
            self.add_server(address.clone());
        }

        self.publish_state();

        self.emit(SdamEvent::TopologyDescriptionChanged(Box::new(
            TopologyDescriptionChangedEvent {
                topology_id: self.id,
                previous_description,
                new_description: self.description.clone(),
            },
        )));
        for address in &addresses {
            self.emit(SdamEvent::ServerOpening(ServerOpeningEvent {
                address: address.clone(),
                topology_id: self.id,
            }));
        }
        for address in addresses {
            self.start_monitor(address);
        }
        tracing::debug!(topology_id = self.id, "topology opened");
    }

    /// Applies a freshly reported server description, reconciles the handle set, and emits the
    /// resulting events in their normative order.
    async fn process_server_update(&mut self, server_description: ServerDescription) -> bool {
        if self.closed {
            return false;
        }
        let address = server_description.address().clone();
        let previous_server_description = match self.description.get_server_description(&address) {
            Some(description) => description.clone(),
            // Not a member of this topology; skip the update and its events entirely.
            None => return false,
        };

        let previous_description = self.description.clone();
        let new_description = match previous_description.update(server_description.clone()) {
            Ok(description) => description,
            Err(error) => {
                tracing::warn!(%address, %error, "discarding unusable server description update");
                return false;
            }
        };
        self.description = new_description;

        let mut opened = Vec::new();
        for address in self.description.servers().keys() {
            if !self.servers.contains_key(address) {
                opened.push(address.clone());
            }
        }
        for address in &opened {
            self.add_server(address.clone());
        }

        let stale: Vec<ServerAddress> = self
            .servers
            .keys()
            .filter(|address| !self.description.servers().contains_key(*address))
            .cloned()
            .collect();
        let mut removed = Vec::new();
        for address in stale {
            if let Some(server) = self.servers.remove(&address) {
                removed.push(server);
            }
        }

        let connect_event = self.first_connect_event(&server_description, &address);
        if connect_event.is_some() {
            self.initial_connect_complete = true;
        }

        self.publish_state();

        let new_server_description = self
            .description
            .get_server_description(&address)
            .cloned()
            .unwrap_or(server_description);
        self.emit(SdamEvent::ServerDescriptionChanged(Box::new(
            ServerDescriptionChangedEvent {
                address: address.clone(),
                topology_id: self.id,
                previous_description: previous_server_description,
                new_description: new_server_description,
            },
        )));
        for address in &opened {
            self.emit(SdamEvent::ServerOpening(ServerOpeningEvent {
                address: address.clone(),
                topology_id: self.id,
            }));
        }
        for server in &removed {
            server.close().await;
            self.emit(SdamEvent::ServerClosed(ServerClosedEvent {
                address: server.address.clone(),
                topology_id: self.id,
            }));
        }
        self.emit(SdamEvent::TopologyDescriptionChanged(Box::new(
            TopologyDescriptionChangedEvent {
                topology_id: self.id,
                previous_description: previous_description.clone(),
                new_description: self.description.clone(),
            },
        )));
        if let Some(event) = connect_event {
            self.emit(event);
        }

        for address in opened {
            self.start_monitor(address);
        }

        previous_description != self.description
    }

    /// The topology-level `connect` event for a server's first successful check, if this update
    /// is one. For replica sets only the primary's first check connects the topology; for every
    /// other deployment each server's first check emits `connect` (a historical over-emission
    /// kept for compatibility).
    fn first_connect_event(
        &self,
        server_description: &ServerDescription,
        address: &ServerAddress,
    ) -> Option<ConnectEvent> {
        if !server_description.server_type().is_available() {
            return None;
        }
        let server = self.servers.get(address)?;
        if !server.mark_connected() {
            return None;
        }
        let qualifies = match self.description.topology_type() {
            TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => {
                server_description.server_type() == ServerType::RsPrimary
            }
            _ => true,
        };
        qualifies.then(|| ConnectEvent {
            topology_id: self.id,
            address: address.clone(),
        })
    }

    async fn process_server_error(
        &mut self,
        address: ServerAddress,
        error: Error,
        source: ErrorSource,
    ) -> bool {
        if self.closed || !self.servers.contains_key(&address) {
            return false;
        }

        let reset = match source {
            ErrorSource::Monitor => true,
            ErrorSource::Application => {
                error.is_parse_error()
                    || error.is_state_change_error()
                    || error.is_non_timeout_network_error()
            }
        };
        if !reset {
            return false;
        }

        // Wire decoding failures poison the server's pooled connections; other errors leave
        // the pool intact.
        if error.is_parse_error() {
            if let Some(server) = self.servers.get(&address) {
                server.clear_pool().await;
            }
        }

        tracing::debug!(%address, %error, "resetting server to unknown");
        let description = ServerDescription::new_from_error(address.clone(), error.clone());
        let changed = self.process_server_update(description).await;

        if matches!(source, ErrorSource::Application) {
            self.emit(ErrorEvent {
                topology_id: self.id,
                address,
                error,
            });
        }

        changed
    }

    async fn process_close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;

        // Drain the sessions the caller still holds, then release the pooled ones, and tell
        // the deployment about all of them in one best-effort command.
        let mut session_ids = Vec::new();
        for state in self.sessions.drain() {
            if let Some(server_session) = state.end() {
                session_ids.push(server_session.id);
            }
        }
        session_ids.extend(self.session_pool.extract_all());
        if !session_ids.is_empty() {
            self.end_sessions_best_effort(session_ids).await;
        }

        let addresses: Vec<ServerAddress> = self.servers.keys().cloned().collect();
        for address in addresses {
            if let Some(server) = self.servers.remove(&address) {
                server.close().await;
                self.emit(SdamEvent::ServerClosed(ServerClosedEvent {
                    address,
                    topology_id: self.id,
                }));
            }
        }

        self.connected = false;
        self.publish_state();
        self.emit(SdamEvent::TopologyClosed(TopologyClosedEvent {
            topology_id: self.id,
        }));
        tracing::debug!(topology_id = self.id, "topology closed");
        true
    }

    async fn end_sessions_best_effort(&self, session_ids: Vec<Document>) {
        let target = self
            .description
            .servers_with_type(&[ServerType::RsPrimary])
            .next()
            .or_else(|| {
                self.description
                    .servers()
                    .values()
                    .find(|sd| sd.server_type().is_data_bearing())
            })
            .map(|sd| sd.address().clone());

        let server = match target.and_then(|address| self.servers.get(&address)) {
            Some(server) => server.clone(),
            None => return,
        };

        let request = CommandRequest {
            db: "admin".to_string(),
            command: doc! { "endSessions": session_ids },
            read_preference: Some(ReadPreference::PrimaryPreferred { tag_sets: None }),
            session: None,
        };
        let _ = server.run_command(request).await;
    }

    fn add_server(&mut self, address: ServerAddress) {
        let server = Server::new(
            address.clone(),
            self.id,
            self.transport.clone(),
            self.emitter.clone(),
        );
        self.servers.insert(address, server);
    }

    fn start_monitor(&self, address: ServerAddress) {
        Monitor::start(
            address,
            self.transport.clone(),
            self.updater.clone(),
            self.watcher.clone(),
            self.emitter.clone(),
            self.id,
            self.check_requester.subscribe(),
            self.metadata.clone(),
            self.options.clone(),
        );
    }

    fn publish_state(&self) {
        let state = TopologyState {
            connected: self.connected,
            closed: self.closed,
            initial_connect_complete: self.initial_connect_complete,
            description: self.description.clone(),
            servers: self.servers.clone(),
        };
        let _ = self.publisher.send(state);
    }

    fn emit(&self, event: impl Into<Event>) {
        self.emitter.emit(event);
    }
}
