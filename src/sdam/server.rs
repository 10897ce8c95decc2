use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
        Arc,
    },
    time::Instant,
};

use bson::Document;

use crate::{
    error::Result,
    event::{
        command::{
            CommandEvent,
            CommandFailedEvent,
            CommandStartedEvent,
            CommandSucceededEvent,
        },
        EventEmitter,
    },
    options::ServerAddress,
    transport::{CommandRequest, Transport, WriteBody, WriteRequest},
};

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(0);

fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// The handle for a single monitored server. Operations are forwarded to the transport layer;
/// the handle tracks the in-flight operation count used to spread load across equally suitable
/// servers and the first-connect latch used for the topology-level `connect` event.
pub struct Server {
    pub(crate) address: ServerAddress,

    transport: Arc<dyn Transport>,

    emitter: EventEmitter,

    topology_id: u64,

    /// Number of operations currently using this server.
    operation_count: AtomicU32,

    /// Whether this server has reported a successful check yet.
    connected: AtomicBool,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("operation_count", &self.operation_count)
            .finish()
    }
}

impl Server {
    pub(crate) fn new(
        address: ServerAddress,
        topology_id: u64,
        transport: Arc<dyn Transport>,
        emitter: EventEmitter,
    ) -> Arc<Server> {
        Arc::new(Self {
            address,
            transport,
            emitter,
            topology_id,
            operation_count: AtomicU32::new(0),
            connected: AtomicBool::new(false),
        })
    }

    pub(crate) fn increment_operation_count(&self) {
        self.operation_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn decrement_operation_count(&self) {
        self.operation_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Latches the first successful check for this server. Returns true exactly once.
    pub(crate) fn mark_connected(&self) -> bool {
        !self.connected.swap(true, Ordering::SeqCst)
    }

    /// Runs a command on this server, emitting command monitoring events around it.
    pub(crate) async fn run_command(&self, request: CommandRequest) -> Result<Document> {
        let request_id = next_request_id();
        let command_name = request.command_name().to_string();
        let db = request.db.clone();
        let command = request.command.clone();
        self.emit_started(command, db, command_name.clone(), request_id);

        let start = Instant::now();
        let result = self.transport.run_command(&self.address, request).await;
        self.emit_outcome(&result, command_name, request_id, start);
        result
    }

    /// Runs a typed write batch on this server, emitting command monitoring events around it.
    pub(crate) async fn run_write(&self, request: WriteRequest) -> Result<Document> {
        let request_id = next_request_id();
        let command_name = request.body.command_name().to_string();
        let db = request.namespace.db.clone();
        let command = write_command_outline(&request);
        self.emit_started(command, db, command_name.clone(), request_id);

        let start = Instant::now();
        let result = self.transport.run_write(&self.address, request).await;
        self.emit_outcome(&result, command_name, request_id, start);
        result
    }

    pub(crate) async fn clear_pool(&self) {
        self.transport.clear_pool(&self.address).await;
    }

    /// Releases per-server transport resources. Invoked when the handle is removed from the
    /// topology.
    pub(crate) async fn close(&self) {
        self.transport.close(&self.address).await;
    }

    fn emit_started(&self, command: Document, db: String, command_name: String, request_id: i32) {
        self.emitter.emit(CommandEvent::Started(CommandStartedEvent {
            topology_id: self.topology_id,
            address: self.address.clone(),
            command,
            db,
            command_name,
            request_id,
        }));
    }

    fn emit_outcome(
        &self,
        result: &Result<Document>,
        command_name: String,
        request_id: i32,
        start: Instant,
    ) {
        let duration = start.elapsed();
        match result {
            Ok(reply) => self
                .emitter
                .emit(CommandEvent::Succeeded(CommandSucceededEvent {
                    topology_id: self.topology_id,
                    address: self.address.clone(),
                    duration,
                    reply: reply.clone(),
                    command_name,
                    request_id,
                })),
            Err(failure) => self.emitter.emit(CommandEvent::Failed(CommandFailedEvent {
                topology_id: self.topology_id,
                address: self.address.clone(),
                duration,
                command_name,
                failure: failure.clone(),
                request_id,
            })),
        }
    }
}

/// The skeleton of the wire command a write request will turn into, used for command monitoring
/// events. The transport layer owns the real encoding.
fn write_command_outline(request: &WriteRequest) -> Document {
    let mut command = Document::new();
    command.insert(request.body.command_name(), request.namespace.coll.clone());
    match &request.body {
        WriteBody::Insert { documents } => {
            command.insert("documents", documents.clone());
        }
        WriteBody::Update { statements } => {
            command.insert("updates", statements.clone());
        }
        WriteBody::Delete { statements } => {
            command.insert("deletes", statements.clone());
        }
    }
    if let Some(ordered) = request.ordered {
        command.insert("ordered", ordered);
    }
    command
}
