use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// A struct modeling the canonical name for a collection in MongoDB.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// The name of the database associated with this namespace.
    pub db: String,

    /// The name of the collection this namespace corresponds to.
    pub coll: String,
}

impl Namespace {
    /// Construct a `Namespace` with the given database and collection.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.');

        let db = parts.next();
        let coll = parts.collect::<Vec<_>>().join(".");

        match (db, coll) {
            (Some(db), coll) if !db.is_empty() && !coll.is_empty() => Some(Self {
                db: db.to_string(),
                coll,
            }),
            _ => None,
        }
        .ok_or_else(|| {
            Error::invalid_argument(format!("invalid namespace specification \"{}\"", s))
        })
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

#[cfg(test)]
mod test {
    use super::Namespace;

    #[test]
    fn parses_dotted_collection_names() {
        let ns: Namespace = "db.coll.with.dots".parse().unwrap();
        assert_eq!(ns.db, "db");
        assert_eq!(ns.coll, "coll.with.dots");
    }

    #[test]
    fn rejects_missing_parts() {
        assert!("justadb".parse::<Namespace>().is_err());
        assert!(".coll".parse::<Namespace>().is_err());
    }
}
