//! Server Discovery and Monitoring: the topology actor, its server handles and monitors, and
//! the immutable descriptions they exchange.

pub(crate) mod description;
mod monitor;
mod server;
#[cfg(test)]
mod test;
mod topology;

pub use description::{
    server::{ServerDescription, ServerType, TopologyVersion},
    topology::{server_selection::SelectedServer, TopologyDescription, TopologyType},
};
pub use server::Server;
pub use topology::Topology;

pub(crate) use topology::{TopologyUpdater, TopologyWatcher};
