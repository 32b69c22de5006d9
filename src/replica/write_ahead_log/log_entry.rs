use crate::replica::write_ahead_log::Index;
use crate::replica::Term;
use bytes::Bytes;

/// LogEntry is a single command in the replicated log, stamped with the index it occupies and
/// the term of the leader that created it. Once committed, an entry never changes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEntry {
    pub index: Index,
    pub term: Term,
    pub command: Bytes,
}

impl LogEntry {
    pub fn new(index: Index, term: Term, command: impl Into<Bytes>) -> Self {
        LogEntry {
            index,
            term,
            command: command.into(),
        }
    }
}
