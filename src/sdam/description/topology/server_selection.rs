use std::{collections::HashMap, fmt, ops::Deref, sync::Arc, time::Duration};

use super::TopologyDescription;
use crate::{
    error::{ErrorKind, Result},
    options::ServerAddress,
    sdam::{
        description::{
            server::{ServerDescription, ServerType},
            topology::TopologyType,
        },
        Server,
    },
    selection_criteria::{ReadPreference, SelectionCriteria, TagSet},
};

const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);

/// A server chosen by [`Topology::select_server`](crate::Topology::select_server), keeping the
/// server's operation count accurate for the duration of the operation using it.
#[derive(Debug)]
pub struct SelectedServer {
    server: Arc<Server>,
}

impl SelectedServer {
    fn new(server: Arc<Server>) -> Self {
        server.increment_operation_count();
        Self { server }
    }

    /// The address of the selected server.
    pub fn address(&self) -> &ServerAddress {
        &self.server.address
    }
}

impl Deref for SelectedServer {
    type Target = Server;

    fn deref(&self) -> &Server {
        self.server.deref()
    }
}

impl Drop for SelectedServer {
    fn drop(&mut self) {
        self.server.decrement_operation_count();
    }
}

/// Attempt to select a server, returning `None` if no server matched the provided criteria.
pub(crate) fn attempt_to_select_server<'a>(
    criteria: &'a SelectionCriteria,
    topology_description: &'a TopologyDescription,
    servers: &'a HashMap<ServerAddress, Arc<Server>>,
    deprioritized: Option<&ServerAddress>,
) -> Result<Option<SelectedServer>> {
    let mut in_window = topology_description.suitable_servers_in_latency_window(criteria)?;
    if let Some(addr) = deprioritized {
        if in_window.len() > 1 {
            in_window.retain(|d| &d.address != addr);
        }
    }
    let in_window_servers = in_window
        .into_iter()
        .flat_map(|desc| servers.get(&desc.address))
        .collect();
    let selected = select_server_in_latency_window(in_window_servers);
    Ok(selected.map(SelectedServer::new))
}

/// Choose a server from several suitable choices within the latency window, uniformly at
/// random.
fn select_server_in_latency_window(in_window: Vec<&Arc<Server>>) -> Option<Arc<Server>> {
    if in_window.is_empty() {
        return None;
    } else if in_window.len() == 1 {
        return Some(in_window[0].clone());
    }

    choose_n(&in_window, 1).next().map(|server| (*server).clone())
}

pub(crate) fn choose_n<T>(values: &[T], n: usize) -> impl Iterator<Item = &T> {
    use rand::{prelude::SliceRandom, SeedableRng};
    values.choose_multiple(&mut rand::rngs::SmallRng::from_entropy(), n)
}

impl TopologyDescription {
    pub(crate) fn server_selection_timeout_error_message(
        &self,
        criteria: &SelectionCriteria,
    ) -> String {
        if self.has_available_servers() {
            format!(
                "None of the available servers suitable for criteria {:?}. Topology: {}",
                criteria, self
            )
        } else {
            format!("No available servers. Topology: {}", self)
        }
    }

    pub(crate) fn suitable_servers_in_latency_window<'a>(
        &'a self,
        criteria: &'a SelectionCriteria,
    ) -> Result<Vec<&'a ServerDescription>> {
        if let Some(message) = self.compatibility_error() {
            return Err(ErrorKind::ServerSelection {
                message: message.to_string(),
            }
            .into());
        }

        let mut suitable_servers = match criteria {
            SelectionCriteria::ReadPreference(ref read_pref) => self.suitable_servers(read_pref),
            SelectionCriteria::Predicate(ref filter) => self
                .servers
                .values()
                .filter(|s| {
                    // If we're connected to a single server, ignore whether it's data-bearing.
                    (self.topology_type == TopologyType::Single || s.server_type.is_data_bearing())
                        && filter(s)
                })
                .collect(),
        };

        self.retain_servers_within_latency_window(&mut suitable_servers);

        Ok(suitable_servers)
    }

    pub(crate) fn has_available_servers(&self) -> bool {
        self.servers.values().any(|server| server.is_available())
    }

    fn suitable_servers(&self, read_preference: &ReadPreference) -> Vec<&ServerDescription> {
        match self.topology_type {
            TopologyType::Unknown => Vec::new(),
            TopologyType::Single => self.servers.values().collect(),
            TopologyType::Sharded => self.servers_with_type(&[ServerType::Mongos]).collect(),
            TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => {
                self.suitable_servers_in_replica_set(read_preference)
            }
        }
    }

    fn retain_servers_within_latency_window(
        &self,
        suitable_servers: &mut Vec<&ServerDescription>,
    ) {
        let shortest_average_rtt = suitable_servers
            .iter()
            .filter_map(|server_desc| server_desc.average_round_trip_time)
            .fold(Option::<Duration>::None, |min, curr| match min {
                Some(prev) => Some(prev.min(curr)),
                None => Some(curr),
            });

        let local_threshold = self.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD);

        let max_rtt_within_window = shortest_average_rtt
            .map(|rtt| rtt.checked_add(local_threshold).unwrap_or(Duration::MAX));

        suitable_servers.retain(move |server_desc| {
            match (server_desc.average_round_trip_time, max_rtt_within_window) {
                (Some(server_rtt), Some(max_rtt)) => server_rtt <= max_rtt,
                _ => false,
            }
        });
    }

    pub(crate) fn servers_with_type<'a>(
        &'a self,
        types: &'a [ServerType],
    ) -> impl Iterator<Item = &'a ServerDescription> {
        self.servers
            .values()
            .filter(move |server| types.contains(&server.server_type))
    }

    fn suitable_servers_in_replica_set(
        &self,
        read_preference: &ReadPreference,
    ) -> Vec<&ServerDescription> {
        let tag_sets = read_preference.tag_sets();

        match read_preference {
            ReadPreference::Primary => self.servers_with_type(&[ServerType::RsPrimary]).collect(),
            ReadPreference::Secondary { .. } => {
                self.suitable_servers_for_read_preference(&[ServerType::RsSecondary], tag_sets)
            }
            ReadPreference::PrimaryPreferred { .. } => {
                match self.servers_with_type(&[ServerType::RsPrimary]).next() {
                    Some(primary) => vec![primary],
                    None => self
                        .suitable_servers_for_read_preference(&[ServerType::RsSecondary], tag_sets),
                }
            }
            ReadPreference::SecondaryPreferred { .. } => {
                let suitable_servers = self
                    .suitable_servers_for_read_preference(&[ServerType::RsSecondary], tag_sets);

                if suitable_servers.is_empty() {
                    self.servers_with_type(&[ServerType::RsPrimary]).collect()
                } else {
                    suitable_servers
                }
            }
            ReadPreference::Nearest { .. } => self.suitable_servers_for_read_preference(
                &[ServerType::RsPrimary, ServerType::RsSecondary],
                tag_sets,
            ),
        }
    }

    fn suitable_servers_for_read_preference(
        &self,
        types: &'static [ServerType],
        tag_sets: Option<&Vec<TagSet>>,
    ) -> Vec<&ServerDescription> {
        let mut servers = self.servers_with_type(types).collect();

        if let Some(tag_sets) = tag_sets {
            filter_servers_by_tag_sets(&mut servers, tag_sets);
        }

        servers
    }
}

impl fmt::Display for TopologyDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::result::Result<(), fmt::Error> {
        write!(f, "{{ Type: {}", self.topology_type)?;

        if let Some(ref set_name) = self.set_name {
            write!(f, ", Set Name: {}", set_name)?;
        }

        if let Some(max_set_version) = self.max_set_version {
            write!(f, ", Max Set Version: {}", max_set_version)?;
        }

        if let Some(max_election_id) = self.max_election_id {
            write!(f, ", Max Election ID: {}", max_election_id)?;
        }

        if let Some(ref compatibility_error) = self.compatibility_error {
            write!(f, ", Compatibility Error: {}", compatibility_error)?;
        }

        if !self.servers.is_empty() {
            write!(f, ", Servers: [ ")?;
            let mut iter = self.servers.values();
            if let Some(server) = iter.next() {
                write!(f, "{}", server)?;
            }
            for server in iter {
                write!(f, ", {}", server)?;
            }
            write!(f, " ]")?;
        }

        write!(f, " }}")
    }
}

fn filter_servers_by_tag_sets(servers: &mut Vec<&ServerDescription>, tag_sets: &[TagSet]) {
    if tag_sets.is_empty() {
        return;
    }

    for tag_set in tag_sets {
        let matches_tag_set = |server: &&ServerDescription| server.matches_tag_set(tag_set);

        if servers.iter().any(matches_tag_set) {
            servers.retain(matches_tag_set);

            return;
        }
    }

    servers.clear();
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::{
        hello::{HelloCommandResponse, HelloReply},
        options::TopologyOptions,
    };

    fn address(s: &str) -> ServerAddress {
        ServerAddress::parse(s).unwrap()
    }

    fn rs_description(members: &[(&str, ServerType, u64)]) -> TopologyDescription {
        let hosts: Vec<String> = members.iter().map(|(a, _, _)| a.to_string()).collect();
        let seeds: Vec<ServerAddress> = hosts.iter().map(|s| address(s)).collect();
        let mut description = TopologyDescription::default();
        description.initialize(
            &TopologyOptions::builder()
                .hosts(seeds)
                .replica_set_name(Some("rs".to_string()))
                .build(),
        );

        for (addr, server_type, rtt_ms) in members {
            let mut response = HelloCommandResponse {
                set_name: Some("rs".to_string()),
                hosts: Some(hosts.clone()),
                min_wire_version: Some(0),
                max_wire_version: Some(8),
                logical_session_timeout_minutes: Some(30),
                ..Default::default()
            };
            match server_type {
                ServerType::RsPrimary => response.is_writable_primary = Some(true),
                ServerType::RsSecondary => response.secondary = Some(true),
                _ => {}
            }
            let sd = ServerDescription::new_from_hello_reply(
                address(addr),
                HelloReply {
                    command_response: response,
                    cluster_time: None,
                },
                Duration::from_millis(*rtt_ms),
            );
            description = description.update(sd).unwrap();
        }
        description
    }

    fn suitable_addresses(
        description: &TopologyDescription,
        read_preference: ReadPreference,
    ) -> Vec<ServerAddress> {
        let criteria = SelectionCriteria::ReadPreference(read_preference);
        let mut addresses: Vec<ServerAddress> = description
            .suitable_servers_in_latency_window(&criteria)
            .unwrap()
            .into_iter()
            .map(|sd| sd.address.clone())
            .collect();
        addresses.sort_by_key(|a| a.to_string());
        addresses
    }

    #[test]
    fn primary_read_preference_selects_primary() {
        let description = rs_description(&[
            ("a:27017", ServerType::RsPrimary, 5),
            ("b:27017", ServerType::RsSecondary, 5),
        ]);
        assert_eq!(
            suitable_addresses(&description, ReadPreference::Primary),
            vec![address("a:27017")]
        );
    }

    #[test]
    fn secondary_preferred_falls_back_to_primary() {
        let description = rs_description(&[("a:27017", ServerType::RsPrimary, 5)]);
        assert_eq!(
            suitable_addresses(
                &description,
                ReadPreference::SecondaryPreferred { tag_sets: None }
            ),
            vec![address("a:27017")]
        );
    }

    #[test]
    fn latency_window_excludes_slow_servers() {
        let description = rs_description(&[
            ("a:27017", ServerType::RsSecondary, 5),
            ("b:27017", ServerType::RsSecondary, 10),
            ("c:27017", ServerType::RsSecondary, 200),
        ]);
        assert_eq!(
            suitable_addresses(&description, ReadPreference::Secondary { tag_sets: None }),
            vec![address("a:27017"), address("b:27017")]
        );
    }

    #[test]
    fn unknown_topology_has_no_suitable_servers() {
        let mut description = TopologyDescription::default();
        description.initialize(
            &TopologyOptions::builder()
                .hosts(vec![address("a:27017"), address("b:27017")])
                .build(),
        );
        assert!(suitable_addresses(&description, ReadPreference::Primary).is_empty());
    }

    #[test]
    fn compatibility_error_fails_selection() {
        let mut description = rs_description(&[("a:27017", ServerType::RsPrimary, 5)]);
        description.compatibility_error = Some("too old".to_string());
        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Primary);
        assert!(description.suitable_servers_in_latency_window(&criteria).is_err());
    }
}
