use crate::replica::{Index, Term};

/// Where an entry landed in the replicated log. Match it against `RaftCommittedEntry::entry_id` to
/// learn when a submitted command committed.
///
/// If leadership changes before the entry commits, a different entry may commit at the same index
/// (with a different term), so compare both fields.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct RaftEntryId {
    pub term: Term,
    pub index: Index,
}
