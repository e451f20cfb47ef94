//! Change events.
//!
//! A [`Change`] is produced by the backing store whenever the watched table
//! changes, whoever the writer was. Each one is consumed exactly once by the
//! reconciler and never persisted.

use crate::record::Record;
use std::fmt;

/// Tagged notification that a row was inserted, updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change<T: Record> {
    /// A row was inserted; carries the new row
    Inserted(T),

    /// A row was updated; carries the new row
    Updated(T),

    /// A row was deleted; carries its identifier
    Deleted(T::Id),

    /// Anything the feed delivered that could not be decoded into one of the
    /// above (unknown kind, partial row). Reconciling it is a no-op.
    Other {
        /// Raw kind reported by the feed
        kind: String,
    },
}

impl<T: Record> Change<T> {
    /// Identifier of the affected row, when known
    #[must_use]
    pub fn id(&self) -> Option<&T::Id> {
        match self {
            Self::Inserted(record) | Self::Updated(record) => Some(record.id()),
            Self::Deleted(id) => Some(id),
            Self::Other { .. } => None,
        }
    }

    /// Short name of the change kind, as the feed spells it
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Inserted(_) => "INSERT",
            Self::Updated(_) => "UPDATE",
            Self::Deleted(_) => "DELETE",
            Self::Other { kind } => kind,
        }
    }
}

impl<T: Record> fmt::Display for Change<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{} {id}", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Row {
        id: u32,
    }

    impl Record for Row {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }
    }

    #[test]
    fn id_and_kind_follow_the_variant() {
        let inserted = Change::Inserted(Row { id: 1 });
        assert_eq!(inserted.id(), Some(&1));
        assert_eq!(inserted.kind(), "INSERT");

        let deleted: Change<Row> = Change::Deleted(9);
        assert_eq!(deleted.id(), Some(&9));
        assert_eq!(deleted.to_string(), "DELETE 9");

        let other: Change<Row> = Change::Other {
            kind: "TRUNCATE".to_string(),
        };
        assert_eq!(other.id(), None);
        assert_eq!(other.to_string(), "TRUNCATE");
    }
}
