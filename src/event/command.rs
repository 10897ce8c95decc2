//! Events describing the commands the topology sends to servers and their outcomes.

use std::time::Duration;

use bson::Document;

use crate::{error::Error, options::ServerAddress};

/// An event that triggers when a database command is initiated.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandStartedEvent {
    /// The unique id of the topology that dispatched the command.
    pub topology_id: u64,

    /// The address of the server the command was run on.
    pub address: ServerAddress,

    /// The command being run.
    pub command: Document,

    /// The name of the database the command is being run against.
    pub db: String,

    /// The type of command being run, e.g. "find" or "isMaster".
    pub command_name: String,

    /// The driver-generated identifier for the request. Applications can use this to identify
    /// the corresponding [`CommandSucceededEvent`] or [`CommandFailedEvent`].
    pub request_id: i32,
}

/// An event that triggers when a database command completes without an error.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandSucceededEvent {
    /// The unique id of the topology that dispatched the command.
    pub topology_id: u64,

    /// The address of the server the command was run on.
    pub address: ServerAddress,

    /// The total execution time of the command (including the network round-trip).
    pub duration: Duration,

    /// The server's reply to the command.
    pub reply: Document,

    /// The type of command that was run, e.g. "find" or "isMaster".
    pub command_name: String,

    /// The driver-generated identifier for the request.
    pub request_id: i32,
}

/// An event that triggers when a command fails to complete successfully.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandFailedEvent {
    /// The unique id of the topology that dispatched the command.
    pub topology_id: u64,

    /// The address of the server the command was run on.
    pub address: ServerAddress,

    /// The total execution time of the command (including the network round-trip).
    pub duration: Duration,

    /// The type of command that was run, e.g. "find" or "isMaster".
    pub command_name: String,

    /// The error the command failed with.
    pub failure: Error,

    /// The driver-generated identifier for the request.
    pub request_id: i32,
}

/// A command monitoring event.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum CommandEvent {
    /// A command was started.
    Started(CommandStartedEvent),

    /// A command succeeded.
    Succeeded(CommandSucceededEvent),

    /// A command failed.
    Failed(CommandFailedEvent),
}
