use bson::Document;
use serde::{Deserialize, Serialize};

use crate::{
    bson::oid::ObjectId,
    options::ClientMetadata,
    sdam::{ServerType, TopologyVersion},
    selection_criteria::TagSet,
    session::ClusterTime,
};

/// The legacy version of the `hello` command which was deprecated in 5.0.
/// To limit usages of the legacy name in the codebase, this constant should be used
/// wherever possible.
pub(crate) const LEGACY_HELLO_COMMAND_NAME: &str = "isMaster";

/// Construct a hello or legacy hello command, depending on the circumstances.
///
/// If the server indicated `helloOk: true`, then `hello` will be used. Otherwise legacy hello
/// will be used, and if it's unknown whether the server supports hello, the command will also
/// contain `helloOk: true`.
pub(crate) fn hello_command(
    hello_ok: Option<bool>,
    metadata: Option<&ClientMetadata>,
    compressors: Option<&[String]>,
) -> Document {
    let mut body = Document::new();
    if matches!(hello_ok, Some(true)) {
        body.insert("hello", 1);
    } else {
        body.insert(LEGACY_HELLO_COMMAND_NAME, 1);
        if hello_ok.is_none() {
            body.insert("helloOk", true);
        }
    }

    if let Some(metadata) = metadata {
        body.insert("client", metadata.to_document());
    }
    if let Some(compressors) = compressors {
        body.insert("compression", compressors.to_vec());
    }

    body
}

/// A hello (or legacy hello) reply delivered by the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct HelloReply {
    /// The deserialized command response.
    pub command_response: HelloCommandResponse,

    /// The `$clusterTime` reported alongside the response, if any.
    pub cluster_time: Option<ClusterTime>,
}

/// The response to a `hello` command.
///
/// See the documentation [here](https://www.mongodb.com/docs/manual/reference/command/hello/) for more details.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct HelloCommandResponse {
    /// Whether the server is writable. If true, this instance is a primary in a replica set, a
    /// mongos instance, or a standalone mongod.
    pub is_writable_primary: Option<bool>,

    #[serde(rename = "ismaster")]
    /// Legacy name for `is_writable_primary`.
    pub is_master: Option<bool>,

    /// Whether the server supports using the `hello` command for monitoring instead of the
    /// legacy hello command.
    pub hello_ok: Option<bool>,

    /// The list of all hosts.
    pub hosts: Option<Vec<String>>,

    /// The list of all passives in a replica set.
    pub passives: Option<Vec<String>>,

    /// The list of all arbiters in a replica set.
    pub arbiters: Option<Vec<String>>,

    /// An optional message. This contains the value "isdbgrid" when returned from a mongos.
    pub msg: Option<String>,

    /// The address of the server that returned this response.
    pub me: Option<String>,

    #[serde(rename = "compression")]
    /// The list of compatible compressors that the server returned.
    pub compressors: Option<Vec<String>>,

    /// The current replica set config version.
    pub set_version: Option<i32>,

    /// The name of the current replica set.
    pub set_name: Option<String>,

    /// Whether the server is hidden.
    pub hidden: Option<bool>,

    /// Whether the server is a secondary.
    pub secondary: Option<bool>,

    /// Whether the server is an arbiter.
    pub arbiter_only: Option<bool>,

    #[serde(rename = "isreplicaset")]
    /// Whether the server is a member of an uninitialized replica set.
    pub is_replica_set: Option<bool>,

    /// The time in minutes that a session remains active after its most recent use.
    pub logical_session_timeout_minutes: Option<i64>,

    /// The minimum wire version that the server supports.
    pub min_wire_version: Option<i32>,

    /// The maximum wire version that the server supports.
    pub max_wire_version: Option<i32>,

    /// User-defined tags for a replica set member.
    pub tags: Option<TagSet>,

    /// A unique identifier for each election.
    pub election_id: Option<ObjectId>,

    /// The address of the current primary member of the replica set.
    pub primary: Option<String>,

    /// For internal use.
    pub topology_version: Option<TopologyVersion>,
}

impl HelloCommandResponse {
    pub(crate) fn server_type(&self) -> ServerType {
        if self.msg.as_deref() == Some("isdbgrid") {
            ServerType::Mongos
        } else if self.set_name.is_some() {
            if self.hidden == Some(true) {
                ServerType::RsOther
            } else if self.is_writable_primary == Some(true) || self.is_master == Some(true) {
                ServerType::RsPrimary
            } else if self.secondary == Some(true) {
                ServerType::RsSecondary
            } else if self.arbiter_only == Some(true) {
                ServerType::RsArbiter
            } else {
                ServerType::RsOther
            }
        } else if self.is_replica_set == Some(true) {
            ServerType::RsGhost
        } else {
            ServerType::Standalone
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn server_type_derivation() {
        let mut response = HelloCommandResponse::default();
        assert_eq!(response.server_type(), ServerType::Standalone);

        response.msg = Some("isdbgrid".to_string());
        assert_eq!(response.server_type(), ServerType::Mongos);

        response.msg = None;
        response.set_name = Some("rs".to_string());
        response.is_writable_primary = Some(true);
        assert_eq!(response.server_type(), ServerType::RsPrimary);

        response.is_writable_primary = None;
        response.secondary = Some(true);
        assert_eq!(response.server_type(), ServerType::RsSecondary);

        response.secondary = None;
        response.arbiter_only = Some(true);
        assert_eq!(response.server_type(), ServerType::RsArbiter);

        response.hidden = Some(true);
        assert_eq!(response.server_type(), ServerType::RsOther);

        let mut ghost = HelloCommandResponse::default();
        ghost.is_replica_set = Some(true);
        assert_eq!(ghost.server_type(), ServerType::RsGhost);
    }

    #[test]
    fn legacy_hello_requests_hello_ok() {
        let command = hello_command(None, None, None);
        assert!(command.contains_key(LEGACY_HELLO_COMMAND_NAME));
        assert_eq!(command.get_bool("helloOk").unwrap(), true);

        let command = hello_command(Some(true), None, None);
        assert!(command.contains_key("hello"));
        assert!(!command.contains_key("helloOk"));
    }
}
