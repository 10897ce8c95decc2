#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use ::bson;

pub mod cursor;
pub mod error;
pub mod event;
mod executor;
mod hello;
mod namespace;
pub mod options;
mod runtime;
mod sdam;
pub mod selection_criteria;
mod serde_util;
mod session;
pub mod transport;

pub use crate::{
    cursor::{Cursor, CursorFactory, CursorOptions, CursorSpecification},
    error::{Error, ErrorKind, Result},
    event::{Event, EventSubscriber},
    hello::{HelloCommandResponse, HelloReply},
    namespace::Namespace,
    options::{CommandOptions, ServerAddress, TopologyOptions, WriteOptions},
    sdam::{
        SelectedServer,
        Server,
        ServerDescription,
        ServerType,
        Topology,
        TopologyDescription,
        TopologyType,
        TopologyVersion,
    },
    selection_criteria::{ReadPreference, SelectionCriteria},
    session::{ClusterTime, Session},
    transport::{CommandRequest, SessionInfo, Transport, WriteBody, WriteRequest},
};
