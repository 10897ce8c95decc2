pub(crate) mod server_selection;

use std::{
    collections::HashMap,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    bson::oid::ObjectId,
    error::{Error, Result},
    hello::HelloCommandResponse,
    options::{ServerAddress, TopologyOptions},
    sdam::description::server::{ServerDescription, ServerType},
    session::ClusterTime,
};

/// The minimum wire version (MongoDB 3.6) at which a deployment can support retryable writes.
const RETRYABLE_WRITE_MIN_WIRE_VERSION: i32 = 6;

/// The possible types for a topology.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize, Default, derive_more::Display,
)]
#[non_exhaustive]
pub enum TopologyType {
    /// A single mongod server.
    Single,

    /// A replica set with no primary.
    ReplicaSetNoPrimary,

    /// A replica set with a primary.
    ReplicaSetWithPrimary,

    /// A sharded topology.
    Sharded,

    /// A topology whose type is not known.
    #[default]
    Unknown,
}

/// A description of the most up-to-date information known about a topology.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct TopologyDescription {
    /// Whether or not the topology was initialized with a single seed.
    #[serde(skip)]
    pub(crate) single_seed: bool,

    /// The current type of the topology.
    pub(crate) topology_type: TopologyType,

    /// The replica set name of the topology.
    pub(crate) set_name: Option<String>,

    /// The highest replica set version the driver has seen by a member of the topology.
    pub(crate) max_set_version: Option<i32>,

    /// The highest replica set election id the driver has seen by a member of the topology.
    pub(crate) max_election_id: Option<ObjectId>,

    /// Describes the compatibility issue between the driver and server with regards to the
    /// respective supported wire versions.
    pub(crate) compatibility_error: Option<String>,

    /// The time that a session remains active after its most recent use.
    pub(crate) logical_session_timeout: Option<Duration>,

    /// The highest reported cluster time by any server in this topology.
    #[serde(skip)]
    pub(crate) cluster_time: Option<ClusterTime>,

    /// The amount of latency beyond that of the suitable server with the minimum latency that
    /// is acceptable for an operation.
    #[serde(skip)]
    pub(crate) local_threshold: Option<Duration>,

    /// The server descriptions of each member of the topology.
    pub(crate) servers: HashMap<ServerAddress, ServerDescription>,
}

impl PartialEq for TopologyDescription {
    fn eq(&self, other: &Self) -> bool {
        // Equality is only used to decide whether server selection operations need to look
        // again, so the fields the selection algorithm reads are the ones compared.
        self.compatibility_error == other.compatibility_error
            && self.servers == other.servers
            && self.topology_type == other.topology_type
    }
}

impl Default for TopologyDescription {
    fn default() -> Self {
        Self {
            single_seed: false,
            topology_type: TopologyType::Unknown,
            set_name: Default::default(),
            max_set_version: Default::default(),
            max_election_id: Default::default(),
            compatibility_error: Default::default(),
            logical_session_timeout: None,
            cluster_time: Default::default(),
            local_threshold: Default::default(),
            servers: Default::default(),
        }
    }
}

impl TopologyDescription {
    pub(crate) fn initialize(&mut self, options: &TopologyOptions) {
        debug_assert!(
            self.servers.is_empty() && self.topology_type == TopologyType::Unknown,
            "new TopologyDescriptions should start empty"
        );

        self.topology_type = if options.replica_set_name.is_some() {
            TopologyType::ReplicaSetNoPrimary
        } else if options.hosts.len() == 1 {
            TopologyType::Single
        } else {
            TopologyType::Unknown
        };

        for address in options.hosts.iter() {
            let description = ServerDescription::new(address.clone());
            self.servers.insert(address.to_owned(), description);
        }

        self.single_seed = self.servers.len() == 1;
        self.set_name.clone_from(&options.replica_set_name);
        self.local_threshold = options.local_threshold;
    }

    /// Gets the topology type of the cluster.
    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    /// The replica set name of the topology, once one has been reported.
    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    /// The server descriptions of each member of the topology, keyed by address.
    pub fn servers(&self) -> &HashMap<ServerAddress, ServerDescription> {
        &self.servers
    }

    /// The addresses of the servers in the topology.
    pub fn server_addresses(&self) -> impl Iterator<Item = &ServerAddress> {
        self.servers.keys()
    }

    /// The minimum logical session timeout among the data-bearing servers, or `None` if any
    /// data-bearing server has not reported one.
    pub fn logical_session_timeout(&self) -> Option<Duration> {
        self.logical_session_timeout
    }

    /// The highest `$clusterTime` reported by any server in the topology.
    pub fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    /// The wire-version incompatibility between this crate and the deployment, if any.
    pub fn compatibility_error(&self) -> Option<&String> {
        self.compatibility_error.as_ref()
    }

    pub(crate) fn get_server_description(
        &self,
        address: &ServerAddress,
    ) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    /// Whether the deployment supports sessions, i.e. whether it has reported a logical session
    /// timeout.
    pub(crate) fn has_session_support(&self) -> bool {
        self.logical_session_timeout.is_some()
    }

    /// Whether the deployment supports retryable writes: sessions must be supported, the
    /// maximum wire version must be at least 6, and the topology must not be a standalone
    /// server.
    pub(crate) fn supports_retryable_writes(&self) -> bool {
        if self.topology_type == TopologyType::Single {
            return false;
        }
        if !self.has_session_support() {
            return false;
        }
        self.servers.values().any(|server| {
            matches!(
                server.max_wire_version(),
                Ok(Some(version)) if version >= RETRYABLE_WRITE_MIN_WIRE_VERSION
            )
        })
    }

    /// The hello response of the first available server description, or an empty response if no
    /// server has been contacted yet.
    pub(crate) fn last_hello(&self) -> HelloCommandResponse {
        self.servers
            .values()
            .find(|server| server.is_available())
            .and_then(|server| server.hello_response().cloned())
            .unwrap_or_default()
    }

    /// Check the cluster for a compatibility error, and record the error message if one is
    /// found.
    fn check_compatibility(&mut self) {
        self.compatibility_error = None;

        for server in self.servers.values() {
            let error_message = server.compatibility_error_message();

            if error_message.is_some() {
                self.compatibility_error = error_message;
                return;
            }
        }
    }

    /// Updates the topology's logical session timeout value based on the server's value for it.
    fn update_logical_session_timeout(&mut self, server_description: &ServerDescription) {
        if !server_description.server_type.is_data_bearing() {
            return;
        }
        match server_description.logical_session_timeout().ok().flatten() {
            Some(new_timeout) => match self.logical_session_timeout {
                Some(current_timeout) => {
                    self.logical_session_timeout =
                        Some(std::cmp::min(current_timeout, new_timeout));
                }
                None => {
                    let min_timeout = self
                        .servers
                        .values()
                        .filter(|s| s.server_type.is_data_bearing())
                        .map(|s| s.logical_session_timeout().ok().flatten())
                        .min()
                        .flatten();
                    self.logical_session_timeout = min_timeout;
                }
            },
            // If any data-bearing server does not have a value for logicalSessionTimeoutMinutes,
            // the topology's value should be None.
            None => self.logical_session_timeout = None,
        }
    }

    /// Sets the topology's cluster time to the provided one if it is higher than the currently
    /// recorded one.
    pub(crate) fn advance_cluster_time(&mut self, cluster_time: &ClusterTime) {
        if self.cluster_time.as_ref() >= Some(cluster_time) {
            return;
        }
        self.cluster_time = Some(cluster_time.clone());
    }

    /// Applies the SDAM transition rules for the provided server description, returning the
    /// updated topology description. The update is pure: `self` is left untouched, and an update
    /// for an address that is not a member of the topology returns an identical description.
    pub fn update(&self, server_description: ServerDescription) -> Result<TopologyDescription> {
        let mut new_description = self.clone();
        new_description.apply_update(server_description)?;
        Ok(new_description)
    }

    fn apply_update(&mut self, mut server_description: ServerDescription) -> Result<()> {
        match self.servers.get(&server_description.address) {
            None => return Ok(()),
            Some(existing_sd) => {
                // Ignore updates from outdated topology versions.
                if let Some(existing_tv) = existing_sd.topology_version() {
                    if let Some(new_tv) = server_description.topology_version() {
                        if existing_tv.process_id == new_tv.process_id
                            && new_tv.counter < existing_tv.counter
                        {
                            return Ok(());
                        }
                    }
                }
            }
        }

        if let Some(expected_name) = &self.set_name {
            if server_description.is_available() {
                let got_name = server_description.set_name();
                if self.topology_type() == TopologyType::Single
                    && !matches!(
                        got_name.as_ref().map(|opt| opt.as_ref()),
                        Ok(Some(name)) if name == expected_name
                    )
                {
                    let got_display = match got_name {
                        Ok(Some(s)) => format!("{:?}", s),
                        Ok(None) => "<none>".to_string(),
                        Err(s) => format!("<error: {}>", s),
                    };
                    // Mark server as unknown.
                    server_description = ServerDescription::new_from_error(
                        server_description.address,
                        Error::invalid_argument(format!(
                            "Connection string replicaSet name {:?} does not match actual name {}",
                            expected_name, got_display,
                        )),
                    );
                }
            }
        }

        // Replace the old info about the server with the new info.
        self.servers.insert(
            server_description.address.clone(),
            server_description.clone(),
        );

        // Update the topology's min logicalSessionTimeout.
        self.update_logical_session_timeout(&server_description);

        // Update the topology's max reported $clusterTime.
        if let Some(ref cluster_time) = server_description.cluster_time().ok().flatten() {
            self.advance_cluster_time(cluster_time);
        }

        // Update the topology description based on the current topology type.
        match self.topology_type {
            TopologyType::Single => {}
            TopologyType::Unknown => self.update_unknown_topology(server_description)?,
            TopologyType::Sharded => self.update_sharded_topology(server_description),
            TopologyType::ReplicaSetNoPrimary => {
                self.update_replica_set_no_primary_topology(server_description)?
            }
            TopologyType::ReplicaSetWithPrimary => {
                self.update_replica_set_with_primary_topology(server_description)?;
            }
        }

        // Record any compatibility error.
        self.check_compatibility();

        Ok(())
    }

    /// Update the Unknown topology description based on the server description.
    fn update_unknown_topology(&mut self, server_description: ServerDescription) -> Result<()> {
        match server_description.server_type {
            ServerType::Unknown | ServerType::RsGhost => {}
            ServerType::Standalone => {
                self.update_unknown_with_standalone_server(server_description)
            }
            ServerType::Mongos => self.topology_type = TopologyType::Sharded,
            ServerType::RsPrimary => {
                self.topology_type = TopologyType::ReplicaSetWithPrimary;
                self.update_rs_from_primary_server(server_description)?;
            }
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.topology_type = TopologyType::ReplicaSetNoPrimary;
                self.update_rs_without_primary_server(server_description)?;
            }
        }

        Ok(())
    }

    /// Update the Sharded topology description based on the server description.
    fn update_sharded_topology(&mut self, server_description: ServerDescription) {
        match server_description.server_type {
            ServerType::Unknown | ServerType::Mongos => {}
            _ => {
                self.servers.remove(&server_description.address);
            }
        }
    }

    /// Update the ReplicaSetNoPrimary topology description based on the server description.
    fn update_replica_set_no_primary_topology(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        match server_description.server_type {
            ServerType::Unknown | ServerType::RsGhost => {}
            ServerType::Standalone | ServerType::Mongos => {
                self.servers.remove(&server_description.address);
            }
            ServerType::RsPrimary => {
                self.topology_type = TopologyType::ReplicaSetWithPrimary;
                self.update_rs_from_primary_server(server_description)?
            }
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_rs_without_primary_server(server_description)?;
            }
        }

        Ok(())
    }

    /// Update the ReplicaSetWithPrimary topology description based on the server description.
    fn update_replica_set_with_primary_topology(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        match server_description.server_type {
            ServerType::Unknown | ServerType::RsGhost => {
                self.record_primary_state();
            }
            ServerType::Standalone | ServerType::Mongos => {
                self.servers.remove(&server_description.address);
                self.record_primary_state();
            }
            ServerType::RsPrimary => self.update_rs_from_primary_server(server_description)?,
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_rs_with_primary_from_member(server_description)?;
            }
        }

        Ok(())
    }

    /// Update the Unknown topology description based on the Standalone server description.
    fn update_unknown_with_standalone_server(&mut self, server_description: ServerDescription) {
        if self.single_seed {
            self.topology_type = TopologyType::Single;
        } else {
            self.servers.remove(&server_description.address);
        }
    }

    /// Update the ReplicaSetNoPrimary topology description based on the non-primary server
    /// description.
    fn update_rs_without_primary_server(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        if self.set_name.is_none() {
            self.set_name = server_description.set_name()?;
        } else if self.set_name != server_description.set_name()? {
            self.servers.remove(&server_description.address);

            return Ok(());
        }

        self.add_new_servers(server_description.known_hosts()?);

        if server_description.invalid_me()? {
            self.servers.remove(&server_description.address);
        }

        Ok(())
    }

    /// Update the ReplicaSetWithPrimary topology description based on the non-primary server
    /// description.
    fn update_rs_with_primary_from_member(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        if self.set_name != server_description.set_name()? {
            self.servers.remove(&server_description.address);
            self.record_primary_state();

            return Ok(());
        }

        if server_description.invalid_me()? {
            self.servers.remove(&server_description.address);
            self.record_primary_state();

            return Ok(());
        }

        Ok(())
    }

    /// Update the replica set topology description based on the RSPrimary server description.
    fn update_rs_from_primary_server(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        if self.set_name.is_none() {
            self.set_name = server_description.set_name()?;
        } else if self.set_name != server_description.set_name()? {
            self.servers.remove(&server_description.address);
            self.record_primary_state();

            return Ok(());
        }

        if let Some(server_set_version) = server_description.set_version()? {
            if let Some(server_election_id) = server_description.election_id()? {
                if let Some(topology_max_set_version) = self.max_set_version {
                    if let Some(ref topology_max_election_id) = self.max_election_id {
                        if topology_max_set_version > server_set_version
                            || (topology_max_set_version == server_set_version
                                && *topology_max_election_id > server_election_id)
                        {
                            // The reporting primary lost the (setVersion, electionId)
                            // tie-break; demote it to Unknown so a new check sorts it out.
                            self.servers.insert(
                                server_description.address.clone(),
                                ServerDescription::new(server_description.address),
                            );
                            self.record_primary_state();
                            return Ok(());
                        }
                    }
                }

                self.max_election_id = Some(server_election_id);
            }
        }

        if let Some(server_set_version) = server_description.set_version()? {
            if self
                .max_set_version
                .map(|topology_max_set_version| server_set_version > topology_max_set_version)
                .unwrap_or(true)
            {
                self.max_set_version = Some(server_set_version);
            }
        }

        let addresses: Vec<_> = self.servers.keys().cloned().collect();

        // If any other servers are RSPrimary, replace them with an unknown server description,
        // which will cause them to be updated by a new server check.
        for address in addresses.clone() {
            if address == server_description.address {
                continue;
            }

            if let Some(ServerType::RsPrimary) =
                self.servers.get(&address).map(|server| server.server_type)
            {
                let description = ServerDescription::new(address.clone());
                self.servers.insert(address, description);
            }
        }

        let known_hosts = server_description.known_hosts()?;
        self.add_new_servers(known_hosts.clone());

        for address in addresses {
            if !known_hosts.contains(&address) {
                self.servers.remove(&address);
            }
        }

        self.record_primary_state();

        Ok(())
    }

    /// Inspect the topology for a primary server, and update the topology type to
    /// ReplicaSetNoPrimary if none is found.
    ///
    /// This should only be called on a replica set topology.
    fn record_primary_state(&mut self) {
        self.topology_type = if self
            .servers
            .values()
            .any(|server| server.server_type == ServerType::RsPrimary)
        {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }

    /// Create a new ServerDescription for each address and add it to the topology.
    fn add_new_servers(&mut self, addresses: impl IntoIterator<Item = ServerAddress>) {
        for address in addresses {
            self.servers
                .entry(address.clone())
                .or_insert_with(|| ServerDescription::new(address));
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::hello::{HelloCommandResponse, HelloReply};

    fn options(seedlist: &str, replica_set_name: Option<&str>) -> TopologyOptions {
        TopologyOptions::builder()
            .hosts(crate::options::parse_seedlist(seedlist).unwrap())
            .replica_set_name(replica_set_name.map(str::to_string))
            .build()
    }

    fn seeded(seedlist: &str, replica_set_name: Option<&str>) -> TopologyDescription {
        let mut description = TopologyDescription::default();
        description.initialize(&options(seedlist, replica_set_name));
        description
    }

    fn address(s: &str) -> ServerAddress {
        ServerAddress::parse(s).unwrap()
    }

    fn description_from(address_str: &str, response: HelloCommandResponse) -> ServerDescription {
        ServerDescription::new_from_hello_reply(
            address(address_str),
            HelloReply {
                command_response: response,
                cluster_time: None,
            },
            Duration::from_millis(5),
        )
    }

    fn standalone(address_str: &str) -> ServerDescription {
        description_from(
            address_str,
            HelloCommandResponse {
                is_writable_primary: Some(true),
                min_wire_version: Some(0),
                max_wire_version: Some(8),
                logical_session_timeout_minutes: Some(30),
                ..Default::default()
            },
        )
    }

    fn rs_member(address_str: &str, set: &str, hosts: &[&str]) -> HelloCommandResponse {
        HelloCommandResponse {
            set_name: Some(set.to_string()),
            hosts: Some(hosts.iter().map(|h| h.to_string()).collect()),
            me: Some(address_str.to_string()),
            min_wire_version: Some(0),
            max_wire_version: Some(8),
            logical_session_timeout_minutes: Some(30),
            ..Default::default()
        }
    }

    fn primary(address_str: &str, set: &str, hosts: &[&str]) -> ServerDescription {
        let mut response = rs_member(address_str, set, hosts);
        response.is_writable_primary = Some(true);
        description_from(address_str, response)
    }

    fn secondary(address_str: &str, set: &str, hosts: &[&str]) -> ServerDescription {
        let mut response = rs_member(address_str, set, hosts);
        response.secondary = Some(true);
        description_from(address_str, response)
    }

    #[test]
    fn initial_type_follows_seedlist_rule() {
        assert_eq!(seeded("a", None).topology_type(), TopologyType::Single);
        assert_eq!(seeded("a,b", None).topology_type(), TopologyType::Unknown);
        assert_eq!(
            seeded("a", Some("rs")).topology_type(),
            TopologyType::ReplicaSetNoPrimary
        );
    }

    #[test]
    fn unknown_address_is_a_no_op() {
        let description = seeded("a,b", None);
        let updated = description.update(standalone("c:27017")).unwrap();
        assert_eq!(updated, description);
    }

    #[test]
    fn update_is_idempotent_for_equal_descriptions() {
        let description = seeded("a", Some("rs"))
            .update(primary("a:27017", "rs", &["a:27017"]))
            .unwrap();
        let updated = description
            .update(primary("a:27017", "rs", &["a:27017"]))
            .unwrap();
        assert_eq!(updated, description);
    }

    #[test]
    fn standalone_is_removed_from_multi_seed_topology() {
        let description = seeded("a,b", None).update(standalone("a:27017")).unwrap();
        assert!(!description.servers().contains_key(&address("a:27017")));
        assert_eq!(description.topology_type(), TopologyType::Unknown);
    }

    #[test]
    fn primary_discovers_new_hosts() {
        let description = seeded("a", Some("rs"))
            .update(primary("a:27017", "rs", &["a:27017", "b:27017", "c:27017"]))
            .unwrap();
        assert_eq!(description.topology_type(), TopologyType::ReplicaSetWithPrimary);
        assert_eq!(description.servers().len(), 3);
        assert!(description.servers().contains_key(&address("c:27017")));
    }

    #[test]
    fn primary_removes_hosts_not_in_its_config() {
        let description = seeded("a,b", Some("rs"))
            .update(primary("a:27017", "rs", &["a:27017"]))
            .unwrap();
        assert_eq!(description.servers().len(), 1);
        assert!(!description.servers().contains_key(&address("b:27017")));
    }

    #[test]
    fn secondary_from_unknown_topology_transitions_to_no_primary() {
        let description = seeded("a,b", None)
            .update(secondary("a:27017", "rs", &["a:27017", "b:27017"]))
            .unwrap();
        assert_eq!(description.topology_type(), TopologyType::ReplicaSetNoPrimary);
        assert_eq!(description.set_name(), Some("rs"));
    }

    #[test]
    fn set_name_mismatch_removes_member() {
        let description = seeded("a,b", Some("rs"))
            .update(secondary("a:27017", "other", &["a:27017"]))
            .unwrap();
        assert!(!description.servers().contains_key(&address("a:27017")));
    }

    #[test]
    fn stale_primary_loses_set_version_election_id_tie_break() {
        let newer = ObjectId::new();
        let older = ObjectId::new();

        let mut first = rs_member("a:27017", "rs", &["a:27017", "b:27017"]);
        first.is_writable_primary = Some(true);
        first.set_version = Some(2);
        first.election_id = Some(newer);

        let mut second = rs_member("b:27017", "rs", &["a:27017", "b:27017"]);
        second.is_writable_primary = Some(true);
        second.set_version = Some(1);
        second.election_id = Some(older);

        let description = seeded("a,b", Some("rs"))
            .update(description_from("a:27017", first))
            .unwrap()
            .update(description_from("b:27017", second))
            .unwrap();

        // The stale primary is demoted to Unknown; the topology retains a primary.
        assert_eq!(
            description
                .get_server_description(&address("b:27017"))
                .unwrap()
                .server_type(),
            ServerType::Unknown
        );
        assert_eq!(description.topology_type(), TopologyType::ReplicaSetWithPrimary);
    }

    #[test]
    fn primary_demotion_without_replacement_loses_primary() {
        let description = seeded("a,b", Some("rs"))
            .update(primary("a:27017", "rs", &["a:27017", "b:27017"]))
            .unwrap()
            .update(ServerDescription::new_from_error(
                address("a:27017"),
                crate::error::ErrorKind::Internal {
                    message: "connection reset".to_string(),
                }
                .into(),
            ))
            .unwrap();
        assert_eq!(description.topology_type(), TopologyType::ReplicaSetNoPrimary);
    }

    #[test]
    fn logical_session_timeout_is_minimum_of_data_bearing_servers() {
        let mut low = rs_member("a:27017", "rs", &["a:27017", "b:27017"]);
        low.is_writable_primary = Some(true);
        low.logical_session_timeout_minutes = Some(10);

        let mut high = rs_member("b:27017", "rs", &["a:27017", "b:27017"]);
        high.secondary = Some(true);
        high.logical_session_timeout_minutes = Some(30);

        let description = seeded("a,b", Some("rs"))
            .update(description_from("a:27017", low))
            .unwrap()
            .update(description_from("b:27017", high))
            .unwrap();
        assert_eq!(
            description.logical_session_timeout(),
            Some(Duration::from_secs(600))
        );

        // A data-bearing server without the field clears the topology value.
        let mut missing = rs_member("b:27017", "rs", &["a:27017", "b:27017"]);
        missing.secondary = Some(true);
        missing.logical_session_timeout_minutes = None;
        let description = description
            .update(description_from("b:27017", missing))
            .unwrap();
        assert_eq!(description.logical_session_timeout(), None);
    }

    #[test]
    fn retryable_write_support_requires_sessions_and_wire_version() {
        let single = seeded("a", None).update(standalone("a:27017")).unwrap();
        assert!(!single.supports_retryable_writes());

        let rs = seeded("a", Some("rs"))
            .update(primary("a:27017", "rs", &["a:27017"]))
            .unwrap();
        assert!(rs.supports_retryable_writes());

        let mut old = rs_member("a:27017", "rs", &["a:27017"]);
        old.is_writable_primary = Some(true);
        old.max_wire_version = Some(5);
        let rs_old = seeded("a", Some("rs"))
            .update(description_from("a:27017", old))
            .unwrap();
        assert!(!rs_old.supports_retryable_writes());
    }

    #[test]
    fn incompatible_server_records_error() {
        let mut ancient = rs_member("a:27017", "rs", &["a:27017"]);
        ancient.is_writable_primary = Some(true);
        ancient.max_wire_version = Some(2);
        let description = seeded("a", Some("rs"))
            .update(description_from("a:27017", ancient))
            .unwrap();
        assert!(description.compatibility_error().is_some());
    }

    #[test]
    fn descriptions_serialize_for_event_consumers() {
        let description = seeded("a", Some("rs"))
            .update(primary("a:27017", "rs", &["a:27017"]))
            .unwrap();
        let json = serde_json::to_value(&description).unwrap();
        assert_eq!(json["topology_type"], "ReplicaSetWithPrimary");
        assert_eq!(json["set_name"], "rs");
        assert!(json["servers"]["a:27017"].is_object());
    }

    #[test]
    fn last_hello_returns_first_available() {
        let description = seeded("a", None);
        assert!(description.last_hello().max_wire_version.is_none());

        let description = description.update(standalone("a:27017")).unwrap();
        assert_eq!(description.last_hello().max_wire_version, Some(8));
    }
}
