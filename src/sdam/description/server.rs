use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    bson::{oid::ObjectId, DateTime},
    error::{Error, Result},
    hello::{HelloCommandResponse, HelloReply},
    options::ServerAddress,
    selection_criteria::TagSet,
    serde_util,
    session::ClusterTime,
};

const DRIVER_MIN_DB_VERSION: &str = "3.6";
pub(crate) const DRIVER_MIN_WIRE_VERSION: i32 = 6;
pub(crate) const DRIVER_MAX_WIRE_VERSION: i32 = 25;

/// Enum representing the possible types of servers that the driver can connect to.
#[derive(Debug, Deserialize, Clone, Copy, Eq, PartialEq, Serialize, Default)]
#[non_exhaustive]
pub enum ServerType {
    /// A single, non-replica set mongod.
    Standalone,

    /// A router used in sharded deployments.
    Mongos,

    /// The primary node in a replica set.
    #[serde(rename = "RSPrimary")]
    RsPrimary,

    /// A secondary node in a replica set.
    #[serde(rename = "RSSecondary")]
    RsSecondary,

    /// A non-data bearing node in a replica set which can participate in elections.
    #[serde(rename = "RSArbiter")]
    RsArbiter,

    /// Hidden, starting up, or recovering nodes in a replica set.
    #[serde(rename = "RSOther")]
    RsOther,

    /// A member of an uninitialized replica set or a member that has been removed from the
    /// replica set config.
    #[serde(rename = "RSGhost")]
    RsGhost,

    /// A server that the driver hasn't yet communicated with or can't connect to.
    #[default]
    Unknown,
}

impl ServerType {
    pub(crate) fn is_data_bearing(self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::Mongos
        )
    }

    /// Whether a server of this type is "available" as per the server selection specification.
    pub fn is_available(self) -> bool {
        !matches!(self, ServerType::Unknown)
    }
}

/// Struct modeling the `topologyVersion` field included in the server's hello and legacy hello
/// responses.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopologyVersion {
    /// An id unique to the process currently running on the server.
    pub process_id: ObjectId,

    /// A monotonic counter within that process.
    pub counter: i64,
}

/// A description of the most up-to-date information known about a server.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct ServerDescription {
    /// The address of this server.
    pub(crate) address: ServerAddress,

    /// The type of this server.
    pub(crate) server_type: ServerType,

    /// The last time this server was updated.
    pub(crate) last_update_time: Option<DateTime>,

    /// The average duration of this server's hello calls.
    pub(crate) average_round_trip_time: Option<Duration>,

    // A ServerDescription carries an error message when the last heartbeat for the server
    // failed, and needs a distinct state for a server that has been added to the topology but
    // not checked yet. Storing a Result over an Option keeps the invalid combination (an error
    // and a reply at once) unrepresentable while letting the accessors below propagate the
    // heartbeat error with `?`.
    #[serde(serialize_with = "serde_util::serialize_result_error_as_string")]
    pub(crate) reply: Result<Option<HelloReply>>,
}

// Server description equality has a specific notion of what fields in a hello command response
// should be compared (https://specifications.readthedocs.io/en/latest/server-discovery-and-monitoring/server-discovery-and-monitoring/#server-description-equality).
fn hello_command_eq(a: &HelloCommandResponse, b: &HelloCommandResponse) -> bool {
    a.server_type() == b.server_type()
        && a.min_wire_version == b.min_wire_version
        && a.max_wire_version == b.max_wire_version
        && a.me == b.me
        && a.hosts == b.hosts
        && a.passives == b.passives
        && a.arbiters == b.arbiters
        && a.tags == b.tags
        && a.set_name == b.set_name
        && a.set_version == b.set_version
        && a.election_id == b.election_id
        && a.primary == b.primary
        && a.logical_session_timeout_minutes == b.logical_session_timeout_minutes
        && a.topology_version == b.topology_version
}

impl PartialEq for ServerDescription {
    fn eq(&self, other: &Self) -> bool {
        if self.address != other.address || self.server_type != other.server_type {
            return false;
        }

        match (self.reply.as_ref(), other.reply.as_ref()) {
            (Ok(self_reply), Ok(other_reply)) => {
                let self_response = self_reply.as_ref().map(|r| &r.command_response);
                let other_response = other_reply.as_ref().map(|r| &r.command_response);

                match (self_response, other_response) {
                    (Some(a), Some(b)) => hello_command_eq(a, b),
                    (None, None) => true,
                    _ => false,
                }
            }
            (Err(self_err), Err(other_err)) => {
                match (self_err.kind.as_ref(), other_err.kind.as_ref()) {
                    (
                        crate::error::ErrorKind::Command(self_command_err),
                        crate::error::ErrorKind::Command(other_command_err),
                    ) => self_command_err.code == other_command_err.code,
                    _ => self_err.to_string() == other_err.to_string(),
                }
            }
            _ => false,
        }
    }
}

impl ServerDescription {
    pub(crate) fn new(address: ServerAddress) -> Self {
        Self {
            address: ServerAddress {
                host: address.host.to_lowercase(),
                port: address.port,
            },
            server_type: Default::default(),
            last_update_time: None,
            reply: Ok(None),
            average_round_trip_time: None,
        }
    }

    pub(crate) fn new_from_hello_reply(
        address: ServerAddress,
        mut reply: HelloReply,
        average_rtt: Duration,
    ) -> Self {
        let mut description = Self::new(address);
        description.average_round_trip_time = Some(average_rtt);
        description.last_update_time = Some(DateTime::now());

        // Infer the server type from the hello response.
        description.server_type = reply.command_response.server_type();

        // Normalize all instances of hostnames to lowercase.
        for hosts in [
            reply.command_response.hosts.as_mut(),
            reply.command_response.passives.as_mut(),
            reply.command_response.arbiters.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            for hostname in hosts.iter_mut() {
                *hostname = hostname.to_lowercase();
            }
        }

        if let Some(ref mut me) = reply.command_response.me {
            *me = me.to_lowercase();
        }

        description.reply = Ok(Some(reply));

        description
    }

    pub(crate) fn new_from_error(address: ServerAddress, error: Error) -> Self {
        let mut description = Self::new(address);
        description.last_update_time = Some(DateTime::now());
        description.average_round_trip_time = None;
        description.reply = Err(error);
        description
    }

    /// The address of this server.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// The type of this server.
    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// The average round-trip time of this server's heartbeats, if any have succeeded.
    pub fn average_round_trip_time(&self) -> Option<Duration> {
        self.average_round_trip_time
    }

    /// The time of the last successful or failed heartbeat, if any.
    pub fn last_update_time(&self) -> Option<DateTime> {
        self.last_update_time
    }

    /// Whether this server is "available" as per the definition in the server selection spec.
    pub fn is_available(&self) -> bool {
        self.server_type.is_available()
    }

    /// The last hello response this server reported, if its last heartbeat succeeded.
    pub fn hello_response(&self) -> Option<&HelloCommandResponse> {
        self.reply
            .as_ref()
            .ok()
            .and_then(|reply| reply.as_ref().map(|r| &r.command_response))
    }

    /// The error the last heartbeat for this server failed with, if any.
    pub fn error(&self) -> Option<&Error> {
        self.reply.as_ref().err()
    }

    /// The replica set member tags this server reported.
    pub fn tags(&self) -> Option<&TagSet> {
        self.hello_response().and_then(|r| r.tags.as_ref())
    }

    pub(crate) fn compatibility_error_message(&self) -> Option<String> {
        if let Ok(Some(ref reply)) = self.reply {
            let hello_min_wire_version = reply.command_response.min_wire_version.unwrap_or(0);

            if hello_min_wire_version > DRIVER_MAX_WIRE_VERSION {
                return Some(format!(
                    "Server at {} requires wire version {}, but this topology core only \
                     supports up to {}",
                    self.address, hello_min_wire_version, DRIVER_MAX_WIRE_VERSION,
                ));
            }

            let hello_max_wire_version = reply.command_response.max_wire_version.unwrap_or(0);

            if hello_max_wire_version < DRIVER_MIN_WIRE_VERSION {
                return Some(format!(
                    "Server at {} reports wire version {}, but this topology core requires at \
                     least {} (MongoDB {}).",
                    self.address,
                    hello_max_wire_version,
                    DRIVER_MIN_WIRE_VERSION,
                    DRIVER_MIN_DB_VERSION
                ));
            }
        }

        None
    }

    pub(crate) fn set_name(&self) -> Result<Option<String>> {
        let set_name = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.set_name.clone());
        Ok(set_name)
    }

    pub(crate) fn known_hosts(&self) -> Result<Vec<ServerAddress>> {
        let known_hosts = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .map(|reply| {
                let hosts = reply.command_response.hosts.as_ref();
                let passives = reply.command_response.passives.as_ref();
                let arbiters = reply.command_response.arbiters.as_ref();

                hosts
                    .into_iter()
                    .flatten()
                    .chain(passives.into_iter().flatten())
                    .chain(arbiters.into_iter().flatten())
            });

        known_hosts
            .into_iter()
            .flatten()
            .map(ServerAddress::parse)
            .collect()
    }

    pub(crate) fn invalid_me(&self) -> Result<bool> {
        if let Some(ref reply) = self.reply.as_ref().map_err(Clone::clone)? {
            if let Some(ref me) = reply.command_response.me {
                return Ok(&self.address.to_string() != me);
            }
        }

        Ok(false)
    }

    pub(crate) fn set_version(&self) -> Result<Option<i32>> {
        let set_version = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.set_version);
        Ok(set_version)
    }

    pub(crate) fn election_id(&self) -> Result<Option<ObjectId>> {
        let election_id = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.election_id);
        Ok(election_id)
    }

    pub(crate) fn max_wire_version(&self) -> Result<Option<i32>> {
        let max_wire_version = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.max_wire_version);
        Ok(max_wire_version)
    }

    pub(crate) fn logical_session_timeout(&self) -> Result<Option<Duration>> {
        match self.reply {
            Ok(None) => Ok(None),
            Ok(Some(ref reply)) => Ok(reply
                .command_response
                .logical_session_timeout_minutes
                .map(|timeout| Duration::from_secs(timeout as u64 * 60))),
            Err(ref e) => Err(e.clone()),
        }
    }

    pub(crate) fn cluster_time(&self) -> Result<Option<ClusterTime>> {
        match self.reply {
            Ok(None) => Ok(None),
            Ok(Some(ref reply)) => Ok(reply.cluster_time.clone()),
            Err(ref e) => Err(e.clone()),
        }
    }

    pub(crate) fn topology_version(&self) -> Option<TopologyVersion> {
        match self.reply {
            Ok(None) => None,
            Ok(Some(ref reply)) => reply.command_response.topology_version,
            Err(ref e) => e.topology_version(),
        }
    }

    pub(crate) fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        let server_tags = match self.tags() {
            Some(tags) => tags,
            None => return false,
        };

        tag_set
            .iter()
            .all(|(key, val)| server_tags.get(key) == Some(val))
    }
}

impl std::fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{{ Address: {}, Type: {:?}", self.address, self.server_type)?;
        if let Err(ref e) = self.reply {
            write!(f, ", Error: {}", e)?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hello::HelloCommandResponse;

    fn reply_with(command_response: HelloCommandResponse) -> HelloReply {
        HelloReply {
            command_response,
            cluster_time: None,
        }
    }

    fn address() -> ServerAddress {
        ServerAddress::parse("a:27017").unwrap()
    }

    #[test]
    fn new_description_is_unknown() {
        let description = ServerDescription::new(address());
        assert_eq!(description.server_type(), ServerType::Unknown);
        assert!(description.hello_response().is_none());
        assert!(description.error().is_none());
    }

    #[test]
    fn hostnames_are_normalized() {
        let response = HelloCommandResponse {
            hosts: Some(vec!["A:27017".to_string(), "B:27017".to_string()]),
            me: Some("A:27017".to_string()),
            ..Default::default()
        };
        let description = ServerDescription::new_from_hello_reply(
            address(),
            reply_with(response),
            Duration::from_millis(5),
        );
        assert_eq!(
            description.known_hosts().unwrap(),
            vec![
                ServerAddress::parse("a:27017").unwrap(),
                ServerAddress::parse("b:27017").unwrap()
            ]
        );
        assert!(!description.invalid_me().unwrap());
    }

    #[test]
    fn equality_ignores_rtt_and_update_time() {
        let response = HelloCommandResponse {
            set_name: Some("rs".to_string()),
            is_writable_primary: Some(true),
            max_wire_version: Some(8),
            ..Default::default()
        };
        let a = ServerDescription::new_from_hello_reply(
            address(),
            reply_with(response.clone()),
            Duration::from_millis(1),
        );
        let b = ServerDescription::new_from_hello_reply(
            address(),
            reply_with(response),
            Duration::from_millis(100),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn wire_version_window_is_checked() {
        let response = HelloCommandResponse {
            min_wire_version: Some(0),
            max_wire_version: Some(2),
            ..Default::default()
        };
        let description = ServerDescription::new_from_hello_reply(
            address(),
            reply_with(response),
            Duration::from_millis(1),
        );
        assert!(description.compatibility_error_message().is_some());
    }
}
