//! The reconciler.
//!
//! Applies one [`Change`] to a locally held list without refetching. It is
//! pure and total: events it cannot use leave the list untouched, so a bad
//! event can never take the view down.
//!
//! Invariant: the list holds at most one entry per identifier. Inserts are
//! idempotent, which absorbs duplicate delivery (an optimistic local insert
//! racing the feed's echo, a replayed event after reconnect).

use crate::change::Change;
use crate::record::Record;

/// Where a list keeps its newest rows.
///
/// Must match the sort order of the initial full fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListOrder {
    /// Newest first; inserts are prepended
    NewestFirst,
    /// Oldest first; inserts are appended
    OldestFirst,
}

impl ListOrder {
    /// Place a new row according to this order
    pub fn place<T>(self, list: &mut Vec<T>, record: T) {
        match self {
            Self::NewestFirst => list.insert(0, record),
            Self::OldestFirst => list.push(record),
        }
    }

    /// Whether a fetch should sort by creation time ascending
    #[must_use]
    pub const fn ascending(self) -> bool {
        matches!(self, Self::OldestFirst)
    }
}

/// What applying a change did to the list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciled {
    /// A new entry was added
    Inserted,
    /// An existing entry was replaced
    Replaced,
    /// An entry was removed
    Removed,
    /// Nothing changed
    Unchanged,
}

impl Reconciled {
    /// Whether the list was modified
    #[must_use]
    pub const fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Fold `change` into `list`.
///
/// - `Inserted`: ignored when the id is already present, otherwise placed per `order`
/// - `Updated`: replaces the entry with the same id; never adds one
/// - `Deleted`: removes the entry with the same id
/// - `Other`: ignored
pub fn reconcile<T: Record>(list: &mut Vec<T>, change: Change<T>, order: ListOrder) -> Reconciled {
    match change {
        Change::Inserted(record) => {
            if list.iter().any(|existing| existing.id() == record.id()) {
                return Reconciled::Unchanged;
            }
            order.place(list, record);
            Reconciled::Inserted
        },
        Change::Updated(record) => {
            match list.iter_mut().find(|existing| existing.id() == record.id()) {
                Some(slot) => {
                    *slot = record;
                    Reconciled::Replaced
                },
                None => Reconciled::Unchanged,
            }
        },
        Change::Deleted(id) => match list.iter().position(|existing| existing.id() == &id) {
            Some(index) => {
                list.remove(index);
                Reconciled::Removed
            },
            None => Reconciled::Unchanged,
        },
        Change::Other { .. } => Reconciled::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Row {
        id: u32,
        value: &'static str,
    }

    impl Record for Row {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }
    }

    const fn row(id: u32, value: &'static str) -> Row {
        Row { id, value }
    }

    #[test]
    fn update_for_unknown_id_leaves_list_alone() {
        let mut list = vec![row(1, "a")];
        let outcome = reconcile(&mut list, Change::Updated(row(2, "b")), ListOrder::NewestFirst);
        assert_eq!(outcome, Reconciled::Unchanged);
        assert_eq!(list, vec![row(1, "a")]);
    }

    #[test]
    fn duplicate_insert_is_absorbed() {
        let mut list = Vec::new();
        let first = reconcile(&mut list, Change::Inserted(row(1, "a")), ListOrder::NewestFirst);
        let second = reconcile(&mut list, Change::Inserted(row(1, "a")), ListOrder::NewestFirst);
        assert_eq!(first, Reconciled::Inserted);
        assert_eq!(second, Reconciled::Unchanged);
        assert_eq!(list, vec![row(1, "a")]);
    }

    #[test]
    fn insert_position_follows_order() {
        let mut newest_first = vec![row(1, "a")];
        reconcile(&mut newest_first, Change::Inserted(row(2, "b")), ListOrder::NewestFirst);
        assert_eq!(newest_first, vec![row(2, "b"), row(1, "a")]);

        let mut oldest_first = vec![row(1, "a")];
        reconcile(&mut oldest_first, Change::Inserted(row(2, "b")), ListOrder::OldestFirst);
        assert_eq!(oldest_first, vec![row(1, "a"), row(2, "b")]);
    }

    #[test]
    fn update_replaces_in_place() {
        let mut list = vec![row(3, "c"), row(2, "b"), row(1, "a")];
        let outcome = reconcile(&mut list, Change::Updated(row(2, "B")), ListOrder::NewestFirst);
        assert_eq!(outcome, Reconciled::Replaced);
        assert_eq!(list, vec![row(3, "c"), row(2, "B"), row(1, "a")]);
    }

    #[test]
    fn delete_removes_only_the_matching_entry() {
        let mut list = vec![row(3, "c"), row(2, "b"), row(1, "a")];
        assert_eq!(
            reconcile(&mut list, Change::Deleted(2), ListOrder::NewestFirst),
            Reconciled::Removed
        );
        assert_eq!(list, vec![row(3, "c"), row(1, "a")]);
        assert_eq!(
            reconcile(&mut list, Change::Deleted(2), ListOrder::NewestFirst),
            Reconciled::Unchanged
        );
    }

    #[test]
    fn unrecognized_change_is_a_no_op() {
        let mut list = vec![row(1, "a")];
        let outcome = reconcile(
            &mut list,
            Change::Other {
                kind: "TRUNCATE".to_string(),
            },
            ListOrder::OldestFirst,
        );
        assert!(!outcome.changed());
        assert_eq!(list, vec![row(1, "a")]);
    }
}
