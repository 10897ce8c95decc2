//! Types for specifying which servers are suitable for an operation.

use std::{collections::HashMap, sync::Arc};

use bson::{doc, Bson, Document};
use derivative::Derivative;

use crate::{options::ServerAddress, sdam::ServerDescription};

/// Describes which servers are suitable for a given operation.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub enum SelectionCriteria {
    /// A read preference that describes the suitable servers based on the server type and server
    /// tags.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/core/read-preference/) for more details.
    ReadPreference(ReadPreference),

    /// A predicate used to filter servers that are considered suitable. A `server` will be
    /// considered suitable by a `predicate` if `predicate(server)` returns true.
    Predicate(#[derivative(Debug = "ignore")] Predicate),
}

impl PartialEq for SelectionCriteria {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ReadPreference(r1), Self::ReadPreference(r2)) => r1 == r2,
            (Self::Predicate(p1), Self::Predicate(p2)) => Arc::ptr_eq(p1, p2),
            _ => false,
        }
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(read_pref: ReadPreference) -> Self {
        Self::ReadPreference(read_pref)
    }
}

impl SelectionCriteria {
    /// A criteria that matches only the server at the given address.
    pub fn from_address(address: ServerAddress) -> Self {
        SelectionCriteria::Predicate(Arc::new(move |server| server.address() == &address))
    }
}

/// A predicate used to filter servers that are considered suitable.
pub type Predicate = Arc<dyn Send + Sync + Fn(&ServerDescription) -> bool>;

/// Specifies how the driver should route a read operation to members of a replica set.
///
/// If applicable, `tag_sets` can be used to target specific nodes in a replica set.
///
/// See the [MongoDB docs](https://www.mongodb.com/docs/manual/core/read-preference) for more details.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadPreference {
    /// Only route this operation to the primary.
    Primary,

    /// Only route this operation to a secondary.
    Secondary {
        /// Tag sets constraining eligible servers.
        tag_sets: Option<Vec<TagSet>>,
    },

    /// Route this operation to the primary if it's available, but fall back to the secondaries if
    /// not.
    PrimaryPreferred {
        /// Tag sets constraining eligible servers.
        tag_sets: Option<Vec<TagSet>>,
    },

    /// Route this operation to a secondary if one is available, but fall back to the primary if
    /// not.
    SecondaryPreferred {
        /// Tag sets constraining eligible servers.
        tag_sets: Option<Vec<TagSet>>,
    },

    /// Route this operation to the node with the least network latency regardless of whether it's
    /// the primary or a secondary.
    Nearest {
        /// Tag sets constraining eligible servers.
        tag_sets: Option<Vec<TagSet>>,
    },
}

impl ReadPreference {
    pub(crate) fn tag_sets(&self) -> Option<&Vec<TagSet>> {
        match self {
            ReadPreference::Primary => None,
            ReadPreference::Secondary { tag_sets }
            | ReadPreference::PrimaryPreferred { tag_sets }
            | ReadPreference::SecondaryPreferred { tag_sets }
            | ReadPreference::Nearest { tag_sets } => tag_sets.as_ref(),
        }
    }

    /// Adds the given tag sets to this read preference. Tags may not be used with the `Primary`
    /// mode.
    pub fn with_tags(self, tag_sets: Vec<TagSet>) -> crate::error::Result<Self> {
        let tag_sets = Some(tag_sets);

        let read_pref = match self {
            ReadPreference::Primary => {
                return Err(crate::error::Error::invalid_argument(
                    "read preference tags can only be specified when a non-primary mode is \
                     specified",
                ));
            }
            ReadPreference::Secondary { .. } => ReadPreference::Secondary { tag_sets },
            ReadPreference::PrimaryPreferred { .. } => {
                ReadPreference::PrimaryPreferred { tag_sets }
            }
            ReadPreference::SecondaryPreferred { .. } => {
                ReadPreference::SecondaryPreferred { tag_sets }
            }
            ReadPreference::Nearest { .. } => ReadPreference::Nearest { tag_sets },
        };

        Ok(read_pref)
    }

    /// Renders this read preference as the document sent to the server as `$readPreference`.
    pub fn into_document(self) -> Document {
        let (mode, tag_sets) = match self {
            ReadPreference::Primary => ("primary", None),
            ReadPreference::PrimaryPreferred { tag_sets } => ("primaryPreferred", tag_sets),
            ReadPreference::Secondary { tag_sets } => ("secondary", tag_sets),
            ReadPreference::SecondaryPreferred { tag_sets } => ("secondaryPreferred", tag_sets),
            ReadPreference::Nearest { tag_sets } => ("nearest", tag_sets),
        };

        let mut doc = doc! { "mode": mode };

        if let Some(tag_sets) = tag_sets {
            let tags: Vec<Bson> = tag_sets
                .into_iter()
                .map(|tag_set| {
                    Bson::Document(tag_set.into_iter().map(|(k, v)| (k, v.into())).collect())
                })
                .collect();
            doc.insert("tags", tags);
        }

        doc
    }
}

/// A read preference tag set. See the documentation [here](https://www.mongodb.com/docs/manual/tutorial/configure-replica-set-tag-sets/) for more details.
pub type TagSet = HashMap<String, String>;
