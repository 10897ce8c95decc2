//! Events describing Server Discovery and Monitoring state changes.

use std::time::Duration;

use serde::Serialize;

use crate::{
    error::Error,
    hello::HelloCommandResponse,
    options::ServerAddress,
    sdam::{ServerDescription, TopologyDescription},
    serde_util,
};

/// Published when a server description changes.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ServerDescriptionChangedEvent {
    /// The address of the server.
    pub address: ServerAddress,

    /// The unique id of the topology.
    pub topology_id: u64,

    /// The server's previous description.
    pub previous_description: ServerDescription,

    /// The server's new description.
    pub new_description: ServerDescription,
}

/// Published when a server is initialized.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ServerOpeningEvent {
    /// The address of the server.
    pub address: ServerAddress,

    /// The unique id of the topology.
    pub topology_id: u64,
}

/// Published when a server is closed.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ServerClosedEvent {
    /// The address of the server.
    pub address: ServerAddress,

    /// The unique id of the topology.
    pub topology_id: u64,
}

/// Published when a topology description changes.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TopologyDescriptionChangedEvent {
    /// The unique id of the topology.
    pub topology_id: u64,

    /// The topology's previous description.
    pub previous_description: TopologyDescription,

    /// The topology's new description.
    pub new_description: TopologyDescription,
}

/// Published when a topology is initialized.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TopologyOpeningEvent {
    /// The unique id of the topology.
    pub topology_id: u64,
}

/// Published when a topology is closed.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TopologyClosedEvent {
    /// The unique id of the topology.
    pub topology_id: u64,
}

/// Published when a server monitor's `hello` or legacy hello command is started.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ServerHeartbeatStartedEvent {
    /// The address of the server.
    pub server_address: ServerAddress,

    /// The unique id of the topology.
    pub topology_id: u64,
}

/// Published when a server monitor's `hello` or legacy hello command succeeds.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ServerHeartbeatSucceededEvent {
    /// The execution time of the heartbeat.
    pub duration: Duration,

    /// The reply to the `hello` or legacy hello command.
    pub reply: HelloCommandResponse,

    /// The address of the server.
    pub server_address: ServerAddress,

    /// The unique id of the topology.
    pub topology_id: u64,
}

/// Published when a server monitor's `hello` or legacy hello command fails.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ServerHeartbeatFailedEvent {
    /// The execution time of the heartbeat.
    pub duration: Duration,

    /// The failure that occurred.
    #[serde(serialize_with = "serde_util::serialize_error_as_string")]
    pub failure: Error,

    /// The address of the server.
    pub server_address: ServerAddress,

    /// The unique id of the topology.
    pub topology_id: u64,
}

/// A Server Discovery and Monitoring event.
#[derive(Clone, Debug, Serialize)]
#[non_exhaustive]
#[serde(untagged)]
pub enum SdamEvent {
    /// A server description changed.
    ServerDescriptionChanged(Box<ServerDescriptionChangedEvent>),

    /// A server was opened.
    ServerOpening(ServerOpeningEvent),

    /// A server was closed.
    ServerClosed(ServerClosedEvent),

    /// The topology description changed.
    TopologyDescriptionChanged(Box<TopologyDescriptionChangedEvent>),

    /// The topology was opened.
    TopologyOpening(TopologyOpeningEvent),

    /// The topology was closed.
    TopologyClosed(TopologyClosedEvent),

    /// A heartbeat was started.
    ServerHeartbeatStarted(ServerHeartbeatStartedEvent),

    /// A heartbeat succeeded.
    ServerHeartbeatSucceeded(ServerHeartbeatSucceededEvent),

    /// A heartbeat failed.
    ServerHeartbeatFailed(ServerHeartbeatFailedEvent),
}
