//! Construct-only cursors. The topology core builds cursors on request but never iterates
//! them; iteration belongs to the layers driving the wire protocol.

use bson::Document;

use crate::{namespace::Namespace, selection_criteria::ReadPreference};

/// Everything needed to bootstrap cursor iteration against a selected server.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CursorSpecification {
    /// The namespace the originating command applies to.
    pub namespace: Namespace,

    /// The command that opens the cursor, e.g. a `find`.
    pub command: Document,

    /// The read preference used to route the originating command.
    pub read_preference: Option<ReadPreference>,

    /// The number of documents requested per batch.
    pub batch_size: Option<u32>,
}

/// Options for [`Topology::cursor`](crate::Topology::cursor).
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct CursorOptions {
    /// The read preference used to route the originating command.
    pub read_preference: Option<ReadPreference>,

    /// The number of documents requested per batch.
    pub batch_size: Option<u32>,
}

/// A cursor over the results of an operation.
///
/// This type is deliberately inert from the topology core's perspective: it records the
/// specification handed to the configured [`CursorFactory`], and the embedding driver layers
/// iteration on top.
#[derive(Clone, Debug)]
pub struct Cursor {
    specification: CursorSpecification,
}

impl Cursor {
    /// Constructs a cursor from its specification.
    pub fn new(specification: CursorSpecification) -> Self {
        Self { specification }
    }

    /// The specification this cursor was constructed from.
    pub fn specification(&self) -> &CursorSpecification {
        &self.specification
    }
}

/// Builds cursors for [`Topology::cursor`](crate::Topology::cursor). Supply an implementation
/// through [`TopologyOptions::cursor_factory`](crate::options::TopologyOptions::cursor_factory)
/// to construct decorated cursors.
pub trait CursorFactory: Send + Sync {
    /// Constructs a cursor from the given specification.
    fn create(&self, specification: CursorSpecification) -> Cursor;
}

/// The factory used when no custom one is configured.
#[derive(Debug)]
pub(crate) struct DefaultCursorFactory;

impl CursorFactory for DefaultCursorFactory {
    fn create(&self, specification: CursorSpecification) -> Cursor {
        Cursor::new(specification)
    }
}

#[cfg(test)]
mod test {
    use bson::doc;

    use super::*;

    struct BatchSizeCapper;

    impl CursorFactory for BatchSizeCapper {
        fn create(&self, mut specification: CursorSpecification) -> Cursor {
            specification.batch_size = Some(specification.batch_size.unwrap_or(101).min(42));
            Cursor::new(specification)
        }
    }

    fn specification() -> CursorSpecification {
        CursorSpecification {
            namespace: "db.coll".parse().unwrap(),
            command: doc! { "find": "coll" },
            read_preference: None,
            batch_size: None,
        }
    }

    #[test]
    fn default_factory_passes_specification_through() {
        let cursor = DefaultCursorFactory.create(specification());
        assert_eq!(cursor.specification().namespace.to_string(), "db.coll");
        assert_eq!(cursor.specification().batch_size, None);
    }

    #[test]
    fn custom_factories_shape_cursors() {
        let cursor = BatchSizeCapper.create(specification());
        assert_eq!(cursor.specification().batch_size, Some(42));
    }
}
