//! Change detection over polled snapshots.
//!
//! [`decide`] compares the entries of one poll against the snapshot kept from
//! the last published poll. It never mutates its inputs and performs no I/O,
//! so the caller owns the snapshot and decides when to replace it.

use std::collections::HashMap;

use contracts::FieldAccess;
use tracing::{debug, trace, warn};

/// Unique-key value -> last accepted entry
pub type Snapshot<E> = HashMap<String, E>;

/// Outcome of comparing one poll against the previous snapshot
#[derive(Debug, Clone)]
pub struct Decision<E> {
    /// Whether the poll must be republished
    pub need_publish: bool,
    /// Every resolvable entry of the current poll
    pub snapshot: Snapshot<E>,
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    /// Entries whose unique key did not resolve
    pub skipped: usize,
}

impl<E> Decision<E> {
    pub fn is_unchanged(&self) -> bool {
        !self.need_publish
    }
}

/// Compare `current` with `previous`.
///
/// An entry is new when its unique-key value is not in `previous`, and
/// changed when any watched key renders to a different string on both sides.
/// A watched key that resolves on only one side is not a change. A key of
/// `previous` missing from `current` is a deletion. Any of the three requires a publish. With no
/// watched keys only additions and deletions count. Duplicate key values in
/// `current` resolve last-write-wins.
pub fn decide<E>(
    previous: &Snapshot<E>,
    current: &[E],
    unique_key: &str,
    watched_keys: &[String],
) -> Decision<E>
where
    E: FieldAccess + Clone,
{
    let mut snapshot: Snapshot<E> = HashMap::with_capacity(current.len());
    let mut added = 0;
    let mut changed = 0;
    let mut skipped = 0;

    for entry in current {
        let Some(key) = entry.get_str(unique_key) else {
            warn!(unique_key, "entry has no unique key value, skipped");
            skipped += 1;
            continue;
        };

        match previous.get(&key) {
            None => {
                trace!(key = %key, "new entry");
                added += 1;
            }
            Some(prev) => {
                if let Some(field) = first_difference(prev, entry, watched_keys) {
                    trace!(key = %key, field, "watched field changed");
                    changed += 1;
                }
            }
        }
        snapshot.insert(key, entry.clone());
    }

    let removed = previous
        .keys()
        .filter(|key| !snapshot.contains_key(key.as_str()))
        .inspect(|key| debug!(key = %key, "entry deleted"))
        .count();

    Decision {
        need_publish: added > 0 || changed > 0 || removed > 0,
        snapshot,
        added,
        changed,
        removed,
        skipped,
    }
}

fn first_difference<'k, E: FieldAccess>(
    prev: &E,
    curr: &E,
    watched_keys: &'k [String],
) -> Option<&'k str> {
    watched_keys
        .iter()
        .find(|field| match (prev.get_str(field), curr.get_str(field)) {
            (Some(before), Some(after)) => before != after,
            (None, None) => false,
            _ => {
                debug!(field = field.as_str(), "watched field missing on one side, not compared");
                false
            }
        })
        .map(String::as_str)
}
