//! The seam between the topology core and the wire-protocol layer.
//!
//! The core never serializes messages or owns sockets; a [`Transport`] implementation supplied
//! at construction performs heartbeats, runs commands and writes, and manages per-server
//! connection pools. Tests drive the topology through scripted implementations of this trait.

use async_trait::async_trait;
use bson::Document;

use crate::{
    error::Result,
    hello::HelloReply,
    namespace::Namespace,
    options::ServerAddress,
    selection_criteria::ReadPreference,
};

/// The wire-protocol and connection-pool operations the topology core consumes.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Run the given hello (or legacy hello) command against the server at `address`, as part
    /// of a monitor's heartbeat.
    async fn hello(&self, address: &ServerAddress, command: Document) -> Result<HelloReply>;

    /// Run a database command against the server at `address`.
    async fn run_command(&self, address: &ServerAddress, request: CommandRequest)
        -> Result<Document>;

    /// Run a write batch against the server at `address`.
    async fn run_write(&self, address: &ServerAddress, request: WriteRequest) -> Result<Document>;

    /// Drop all pooled connections for the server at `address`.
    async fn clear_pool(&self, address: &ServerAddress);

    /// Release any per-server resources for `address`. Invoked when the server's handle is
    /// destroyed.
    async fn close(&self, _address: &ServerAddress) {}
}

/// A command forwarded to a [`Transport`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandRequest {
    /// The database the command runs against.
    pub db: String,

    /// The command body.
    pub command: Document,

    /// The read preference resolved for this command, to be attached as `$readPreference`
    /// where the wire protocol calls for it.
    pub read_preference: Option<ReadPreference>,

    /// The session the command runs under, if any.
    pub session: Option<SessionInfo>,
}

impl CommandRequest {
    /// The name of the command, i.e. its first key.
    pub fn command_name(&self) -> &str {
        self.command.keys().next().map(|k| k.as_str()).unwrap_or("")
    }
}

/// A write batch forwarded to a [`Transport`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct WriteRequest {
    /// The namespace the write applies to.
    pub namespace: Namespace,

    /// The write operations themselves.
    pub body: WriteBody,

    /// Whether the server should stop processing the batch at the first failure.
    pub ordered: Option<bool>,

    /// The session the write runs under, if any.
    pub session: Option<SessionInfo>,
}

/// The typed payload of a write batch.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum WriteBody {
    /// An insert of the given documents.
    Insert {
        /// The documents to insert.
        documents: Vec<Document>,
    },

    /// An update applying the given update statements.
    Update {
        /// The update statements.
        statements: Vec<Document>,
    },

    /// A delete applying the given delete statements.
    Delete {
        /// The delete statements.
        statements: Vec<Document>,
    },
}

impl WriteBody {
    /// The wire-level command name for this write.
    pub fn command_name(&self) -> &'static str {
        match self {
            WriteBody::Insert { .. } => "insert",
            WriteBody::Update { .. } => "update",
            WriteBody::Delete { .. } => "delete",
        }
    }
}

/// Session fields the transport includes in a command it sends.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SessionInfo {
    /// The session id document, sent as `lsid`.
    pub id: Document,

    /// The transaction number identifying a retryable write, sent as `txnNumber`.
    pub txn_number: Option<i64>,

    /// Whether the operation may be retried, i.e. whether `txn_number` must be included.
    pub will_retry_write: bool,
}
