use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bson::{doc, Document};
use pretty_assertions::assert_eq;

use super::{Topology, TopologyDescription, TopologyType};
use crate::{
    error::{CommandError, Error, ErrorKind, Result},
    event::{sdam::SdamEvent, Event, EventSubscriber},
    hello::{HelloCommandResponse, HelloReply},
    namespace::Namespace,
    options::{ServerAddress, TopologyOptions, WriteOptions},
    selection_criteria::SelectionCriteria,
    transport::{CommandRequest, Transport, WriteRequest},
};

#[derive(Default)]
struct MockTransport {
    hellos: Mutex<HashMap<ServerAddress, VecDeque<Result<HelloCommandResponse>>>>,
    command_results: Mutex<VecDeque<Result<Document>>>,
    write_results: Mutex<VecDeque<Result<Document>>>,
    commands: Mutex<Vec<RecordedCommand>>,
    writes: Mutex<Vec<RecordedWrite>>,
    cleared_pools: Mutex<Vec<ServerAddress>>,
}

#[derive(Clone, Debug)]
struct RecordedCommand {
    command_name: String,
    command: Document,
}

#[derive(Clone, Debug)]
struct RecordedWrite {
    address: ServerAddress,
    txn_number: Option<i64>,
    will_retry_write: bool,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Default::default())
    }

    /// Scripts the hello responses for one address. The last response repeats for every
    /// subsequent heartbeat.
    fn script_hello(&self, address: &str, responses: Vec<Result<HelloCommandResponse>>) {
        self.hellos
            .lock()
            .unwrap()
            .insert(ServerAddress::parse(address).unwrap(), responses.into());
    }

    fn push_write_result(&self, result: Result<Document>) {
        self.write_results.lock().unwrap().push_back(result);
    }

    fn recorded_commands(&self) -> Vec<RecordedCommand> {
        self.commands.lock().unwrap().clone()
    }

    fn recorded_writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    fn cleared_pools(&self) -> Vec<ServerAddress> {
        self.cleared_pools.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn hello(&self, address: &ServerAddress, _command: Document) -> Result<HelloReply> {
        let response = {
            let mut hellos = self.hellos.lock().unwrap();
            match hellos.get_mut(address) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err(network_error())),
                None => Err(network_error()),
            }
        };
        response.map(|command_response| HelloReply {
            command_response,
            cluster_time: None,
        })
    }

    async fn run_command(
        &self,
        _address: &ServerAddress,
        request: CommandRequest,
    ) -> Result<Document> {
        self.commands.lock().unwrap().push(RecordedCommand {
            command_name: request.command_name().to_string(),
            command: request.command.clone(),
        });
        self.command_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(doc! { "ok": 1 }))
    }

    async fn run_write(&self, address: &ServerAddress, request: WriteRequest) -> Result<Document> {
        self.writes.lock().unwrap().push(RecordedWrite {
            address: address.clone(),
            txn_number: request.session.as_ref().and_then(|s| s.txn_number),
            will_retry_write: request
                .session
                .as_ref()
                .map(|s| s.will_retry_write)
                .unwrap_or(false),
        });
        self.write_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(doc! { "n": 1, "ok": 1 }))
    }

    async fn clear_pool(&self, address: &ServerAddress) {
        self.cleared_pools.lock().unwrap().push(address.clone());
    }
}

fn network_error() -> Error {
    ErrorKind::from(std::io::ErrorKind::ConnectionRefused).into()
}

fn not_primary_error() -> Error {
    ErrorKind::Command(CommandError::new(10107, "NotWritablePrimary", "not primary")).into()
}

fn duplicate_key_error() -> Error {
    ErrorKind::Command(CommandError::new(11000, "DuplicateKey", "duplicate key")).into()
}

fn standalone_hello() -> HelloCommandResponse {
    HelloCommandResponse {
        is_writable_primary: Some(true),
        min_wire_version: Some(0),
        max_wire_version: Some(8),
        logical_session_timeout_minutes: Some(30),
        ..Default::default()
    }
}

fn rs_hello(set: &str, hosts: &[&str]) -> HelloCommandResponse {
    HelloCommandResponse {
        set_name: Some(set.to_string()),
        hosts: Some(hosts.iter().map(|h| h.to_string()).collect()),
        min_wire_version: Some(0),
        max_wire_version: Some(8),
        logical_session_timeout_minutes: Some(30),
        ..Default::default()
    }
}

fn primary_hello(set: &str, hosts: &[&str]) -> HelloCommandResponse {
    let mut response = rs_hello(set, hosts);
    response.is_writable_primary = Some(true);
    response
}

fn secondary_hello(set: &str, hosts: &[&str]) -> HelloCommandResponse {
    let mut response = rs_hello(set, hosts);
    response.secondary = Some(true);
    response
}

fn test_options(seedlist: &str, replica_set: Option<&str>) -> TopologyOptions {
    TopologyOptions::builder()
        .hosts(crate::options::parse_seedlist(seedlist).unwrap())
        .replica_set_name(replica_set.map(str::to_string))
        .heartbeat_freq(Duration::from_millis(50))
        .min_heartbeat_freq(Duration::from_millis(5))
        .server_selection_timeout(Duration::from_secs(5))
        .build()
}

async fn next_event(subscriber: &mut EventSubscriber) -> Option<Event> {
    tokio::time::timeout(Duration::from_secs(5), subscriber.next())
        .await
        .ok()
        .flatten()
}

async fn collect_events_until<F>(subscriber: &mut EventSubscriber, mut done: F) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut events = Vec::new();
    while let Some(event) = next_event(subscriber).await {
        let stop = done(&event);
        events.push(event);
        if stop {
            return events;
        }
    }
    panic!("event stream ended before the expected event: {:?}", events);
}

fn assert_description_chain(events: &[Event]) {
    let mut previous: Option<TopologyDescription> = None;
    for event in events {
        if let Event::Sdam(SdamEvent::TopologyDescriptionChanged(event)) = event {
            if let Some(previous) = previous.take() {
                assert_eq!(event.previous_description, previous);
            }
            previous = Some(event.new_description.clone());
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn single_seed_standalone_connect() {
    let transport = MockTransport::new();
    transport.script_hello("h:27017", vec![Ok(standalone_hello())]);
    let topology = Topology::new(test_options("h", None), transport).unwrap();
    let mut subscriber = topology.subscribe();

    topology.connect().await.unwrap();
    assert!(topology.is_connected());
    assert_eq!(topology.description().topology_type(), TopologyType::Single);

    let events =
        collect_events_until(&mut subscriber, |event| matches!(event, Event::Connect(_))).await;

    assert!(matches!(
        events[0],
        Event::Sdam(SdamEvent::TopologyOpening(_))
    ));
    match &events[1] {
        Event::Sdam(SdamEvent::TopologyDescriptionChanged(event)) => {
            assert_eq!(
                event.previous_description.topology_type(),
                TopologyType::Unknown
            );
            assert!(event.previous_description.servers().is_empty());
            assert_eq!(event.new_description.topology_type(), TopologyType::Single);
        }
        other => panic!("expected initial topologyDescriptionChanged, got {:?}", other),
    }
    assert!(matches!(
        events[2],
        Event::Sdam(SdamEvent::ServerOpening(_))
    ));
    let openings = events
        .iter()
        .filter(|event| matches!(event, Event::Sdam(SdamEvent::ServerOpening(_))))
        .count();
    assert_eq!(openings, 1);

    assert_description_chain(&events);

    match events.last().unwrap() {
        Event::Connect(event) => {
            assert_eq!(event.address, ServerAddress::parse("h:27017").unwrap())
        }
        other => panic!("expected connect, got {:?}", other),
    }

    // After things settle, the live handles match the description.
    let mut described: Vec<ServerAddress> =
        topology.description().servers().keys().cloned().collect();
    let mut live = topology.server_addresses();
    described.sort_by_key(|a| a.to_string());
    live.sort_by_key(|a| a.to_string());
    assert_eq!(described, live);

    topology.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_connects_coalesce() {
    let transport = MockTransport::new();
    transport.script_hello("h:27017", vec![Ok(standalone_hello())]);
    let topology = Topology::new(test_options("h", None), transport).unwrap();
    let mut subscriber = topology.subscribe();

    let (first, second) = futures::join!(topology.connect(), topology.connect());
    first.unwrap();
    second.unwrap();

    let events =
        collect_events_until(&mut subscriber, |event| matches!(event, Event::Connect(_))).await;
    let openings = events
        .iter()
        .filter(|event| matches!(event, Event::Sdam(SdamEvent::TopologyOpening(_))))
        .count();
    assert_eq!(openings, 1);

    topology.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn server_selection_timeout() {
    let transport = MockTransport::new();
    transport.script_hello("h:27017", vec![Ok(standalone_hello())]);
    let mut options = test_options("h", None);
    options.server_selection_timeout = Some(Duration::from_millis(50));
    let topology = Topology::new(options, transport).unwrap();
    topology.connect().await.unwrap();

    let criteria = SelectionCriteria::Predicate(Arc::new(|_| false));
    let start = Instant::now();
    let err = topology.select_server(Some(&criteria)).await.unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(err.is_server_selection_error());
    assert!(err.to_string().contains("Server selection timed out"));

    topology.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn retryable_write_retries_once_with_same_txn_number() {
    let transport = MockTransport::new();
    transport.script_hello("a:27017", vec![Ok(primary_hello("rs", &["a:27017"]))]);
    transport.push_write_result(Err(not_primary_error()));

    let topology = Topology::new(test_options("a", Some("rs")), transport.clone()).unwrap();
    topology.connect().await.unwrap();

    let mut session = topology.start_session();
    let ns: Namespace = "db.coll".parse().unwrap();
    let options = WriteOptions::builder().retry_writes(true).build();
    let reply = topology
        .insert(&ns, vec![doc! { "x": 1 }], options, Some(&mut session))
        .await
        .unwrap();
    assert_eq!(reply.get_i32("ok").unwrap(), 1);

    // The transaction number was assigned once, before the first attempt.
    assert_eq!(session.txn_number(), 1);
    let writes = transport.recorded_writes();
    assert_eq!(writes.len(), 2);
    assert!(writes
        .iter()
        .all(|write| write.txn_number == Some(1) && write.will_retry_write));
    assert!(writes
        .iter()
        .all(|write| write.address == ServerAddress::parse("a:27017").unwrap()));

    topology.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn non_retryable_write_is_not_retried() {
    let transport = MockTransport::new();
    transport.script_hello("a:27017", vec![Ok(primary_hello("rs", &["a:27017"]))]);
    transport.push_write_result(Err(duplicate_key_error()));

    let topology = Topology::new(test_options("a", Some("rs")), transport.clone()).unwrap();
    topology.connect().await.unwrap();

    let mut session = topology.start_session();
    let ns: Namespace = "db.coll".parse().unwrap();
    let options = WriteOptions::builder().retry_writes(true).build();
    let err = topology
        .insert(&ns, vec![doc! { "x": 1 }], options, Some(&mut session))
        .await
        .unwrap_err();

    match err.kind.as_ref() {
        ErrorKind::Command(command_error) => assert_eq!(command_error.code, 11000),
        other => panic!("expected the server error, got {:?}", other),
    }
    assert_eq!(transport.recorded_writes().len(), 1);

    topology.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn writes_in_transactions_are_not_retried() {
    let transport = MockTransport::new();
    transport.script_hello("a:27017", vec![Ok(primary_hello("rs", &["a:27017"]))]);
    transport.push_write_result(Err(not_primary_error()));

    let topology = Topology::new(test_options("a", Some("rs")), transport.clone()).unwrap();
    topology.connect().await.unwrap();

    let mut session = topology.start_session();
    session.start_transaction().unwrap();
    let ns: Namespace = "db.coll".parse().unwrap();
    let options = WriteOptions::builder().retry_writes(true).build();
    let err = topology
        .insert(&ns, vec![doc! { "x": 1 }], options, Some(&mut session))
        .await
        .unwrap_err();

    match err.kind.as_ref() {
        ErrorKind::Command(command_error) => assert_eq!(command_error.code, 10107),
        other => panic!("expected the server error, got {:?}", other),
    }
    let writes = transport.recorded_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].txn_number, None);
    assert!(!writes[0].will_retry_write);

    topology.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn replica_set_discovers_primary() {
    let transport = MockTransport::new();
    let hosts = &["a:27017", "b:27017"];
    transport.script_hello("a:27017", vec![Ok(primary_hello("rs", hosts))]);
    transport.script_hello("b:27017", vec![Ok(secondary_hello("rs", hosts))]);

    let topology = Topology::new(test_options("a,b", Some("rs")), transport).unwrap();
    let mut subscriber = topology.subscribe();
    topology.connect().await.unwrap();
    assert_eq!(
        topology.description().topology_type(),
        TopologyType::ReplicaSetWithPrimary
    );

    let events =
        collect_events_until(&mut subscriber, |event| matches!(event, Event::Connect(_))).await;

    match &events[1] {
        Event::Sdam(SdamEvent::TopologyDescriptionChanged(event)) => {
            assert_eq!(
                event.previous_description.topology_type(),
                TopologyType::Unknown
            );
            assert_eq!(
                event.new_description.topology_type(),
                TopologyType::ReplicaSetNoPrimary
            );
        }
        other => panic!("expected initial topologyDescriptionChanged, got {:?}", other),
    }
    assert_description_chain(&events);

    let types: Vec<TopologyType> = events
        .iter()
        .filter_map(|event| match event {
            Event::Sdam(SdamEvent::TopologyDescriptionChanged(event)) => {
                Some(event.new_description.topology_type())
            }
            _ => None,
        })
        .collect();
    assert_eq!(types.first(), Some(&TopologyType::ReplicaSetNoPrimary));
    assert_eq!(types.last(), Some(&TopologyType::ReplicaSetWithPrimary));

    // Only the primary's first successful check connects a replica-set topology.
    let connects: Vec<&ServerAddress> = events
        .iter()
        .filter_map(|event| match event {
            Event::Connect(event) => Some(&event.address),
            _ => None,
        })
        .collect();
    assert_eq!(connects, vec![&ServerAddress::parse("a:27017").unwrap()]);

    topology.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn close_drains_sessions_and_ends_them() {
    let transport = MockTransport::new();
    transport.script_hello("h:27017", vec![Ok(standalone_hello())]);
    let topology = Topology::new(test_options("h", None), transport.clone()).unwrap();
    topology.connect().await.unwrap();
    assert!(topology.has_session_support());

    let session_a = topology.start_session();
    let session_b = topology.start_session();
    assert_ne!(session_a, session_b);

    let mut subscriber = topology.subscribe();
    topology.close().await.unwrap();

    assert!(session_a.is_ended());
    assert!(session_b.is_ended());
    assert!(!topology.is_connected());
    assert!(topology.is_closed());

    // Both sessions were reported to the deployment in one endSessions command.
    let end_sessions = transport
        .recorded_commands()
        .into_iter()
        .find(|command| command.command_name == "endSessions")
        .expect("endSessions should have been sent");
    assert_eq!(
        end_sessions.command.get_array("endSessions").unwrap().len(),
        2
    );

    let events = collect_events_until(&mut subscriber, |event| {
        matches!(event, Event::Sdam(SdamEvent::TopologyClosed(_)))
    })
    .await;
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::Sdam(SdamEvent::ServerClosed(_)))));

    // Closing again must not emit another topologyClosed.
    topology.close().await.unwrap();
    let mut saw_topology_closed_again = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), subscriber.next()).await
    {
        if matches!(event, Event::Sdam(SdamEvent::TopologyClosed(_))) {
            saw_topology_closed_again = true;
        }
    }
    assert!(!saw_topology_closed_again);
}

#[tokio::test(flavor = "multi_thread")]
async fn ended_sessions_return_to_the_pool() {
    let transport = MockTransport::new();
    transport.script_hello("h:27017", vec![Ok(standalone_hello())]);
    let topology = Topology::new(test_options("h", None), transport).unwrap();
    topology.connect().await.unwrap();

    let mut session = topology.start_session();
    let id = session.id().clone();
    session.end();

    let reused = topology.start_session();
    assert_eq!(reused.id(), &id);

    topology.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn command_dispatch_reports_reply() {
    let transport = MockTransport::new();
    transport.script_hello("h:27017", vec![Ok(standalone_hello())]);
    let topology = Topology::new(test_options("h", None), transport.clone()).unwrap();
    topology.connect().await.unwrap();

    assert_eq!(topology.last_hello().max_wire_version, Some(8));

    let ns: Namespace = "admin.$cmd".parse().unwrap();
    let reply = topology
        .command(&ns, doc! { "ping": 1 }, Default::default(), None)
        .await
        .unwrap();
    assert_eq!(reply.get_i32("ok").unwrap(), 1);
    assert_eq!(transport.recorded_commands()[0].command_name, "ping");

    topology.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn parse_errors_clear_the_server_pool() {
    let transport = MockTransport::new();
    transport.script_hello("a:27017", vec![Ok(primary_hello("rs", &["a:27017"]))]);
    transport.push_write_result(Err(ErrorKind::InvalidResponse {
        message: "truncated document".to_string(),
    }
    .into()));

    let topology = Topology::new(test_options("a", Some("rs")), transport.clone()).unwrap();
    topology.connect().await.unwrap();

    let ns: Namespace = "db.coll".parse().unwrap();
    let err = topology
        .insert(&ns, vec![doc! { "x": 1 }], WriteOptions::default(), None)
        .await
        .unwrap_err();
    assert!(err.is_parse_error());

    assert_eq!(
        transport.cleared_pools(),
        vec![ServerAddress::parse("a:27017").unwrap()]
    );

    topology.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn monitor_recovers_after_transient_hello_failure() {
    let transport = MockTransport::new();
    transport.script_hello(
        "h:27017",
        vec![Err(network_error()), Ok(standalone_hello())],
    );
    let topology = Topology::new(test_options("h", None), transport).unwrap();

    // The first check fails; the monitor's next cycle brings the server up and connect
    // resolves anyway.
    topology.connect().await.unwrap();
    assert_eq!(topology.description().topology_type(), TopologyType::Single);

    topology.close().await.unwrap();
}
