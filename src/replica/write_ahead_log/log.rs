use crate::replica::write_ahead_log::LogEntry;
use crate::replica::Term;
use bytes::Bytes;
use std::convert::TryFrom;
use std::fmt;

/// Index is an index of an entry in the log; i.e. a log entry's index.
///
/// The first entry lives at index 1. Index 0 is the sentinel for "no entry", and it implicitly
/// matches any term in consistency checks.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Index(u64);

impl Index {
    pub const fn new(index: u64) -> Self {
        Index(index)
    }

    pub(crate) fn new_usize(index: usize) -> Self {
        Self::new(index as u64)
    }

    pub const fn start_index() -> Self {
        Self::new(1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_sentinel(&self) -> bool {
        self.0 == 0
    }

    /// Saturates at `u64::MAX`. Use `checked_plus` where wrapping past the end must be noticed.
    pub(crate) fn plus(&self, delta: u64) -> Index {
        Index::new(self.0.saturating_add(delta))
    }

    pub(crate) fn checked_plus(&self, delta: u64) -> Option<Index> {
        self.0.checked_add(delta).map(Index::new)
    }

    pub(crate) fn saturating_minus(&self, delta: u64) -> Index {
        Index::new(self.0.saturating_sub(delta))
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub(crate) enum LogError {
    #[error("entry #{position} has index {actual:?}, expected {expected:?}")]
    NonContiguous {
        position: usize,
        expected: Index,
        actual: Index,
    },
    #[error("entry {index:?} has term {term:?}, lower than the preceding term {preceding:?}")]
    TermRegression { index: Index, term: Term, preceding: Term },
    #[error("entry {index:?} has term {term:?}, newer than the sender's term {sender_term:?}")]
    TermFromFuture { index: Index, term: Term, sender_term: Term },
    #[error("entry #{position} would land past the last representable index")]
    IndexOverflow { position: usize },
}

/// Log is the ordered, gap-free sequence of entries held by one replica.
///
/// It only knows about consistency checks and reshaping itself. Durability is the caller's job:
/// mutations are staged on a copy (see `merged()`) and swapped in after the storage hook succeeds.
#[derive(Clone, Default, PartialEq)]
pub(crate) struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub(crate) fn new() -> Self {
        Log { entries: Vec::new() }
    }

    /// Rebuild a log from entries returned by storage, rejecting anything that isn't a proper
    /// 1-indexed log.
    pub(crate) fn from_entries(entries: Vec<LogEntry>) -> Result<Self, LogError> {
        Self::validate_incoming(Index::new(0), Term::new(0), &entries, None)?;
        Ok(Log { entries })
    }

    pub(crate) fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub(crate) fn last_index(&self) -> Index {
        Index::new_usize(self.entries.len())
    }

    pub(crate) fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or_default()
    }

    /// (term, index) of the last entry, or (0, 0) for an empty log.
    pub(crate) fn latest_entry(&self) -> (Term, Index) {
        (self.last_term(), self.last_index())
    }

    pub(crate) fn read(&self, index: Index) -> Option<&LogEntry> {
        if index.is_sentinel() {
            return None;
        }
        let offset = usize::try_from(index.as_u64() - 1).ok()?;
        self.entries.get(offset)
    }

    /// Term of the entry at `index`. The sentinel index always reports term 0.
    pub(crate) fn term_at(&self, index: Index) -> Option<Term> {
        if index.is_sentinel() {
            return Some(Term::new(0));
        }
        self.read(index).map(|e| e.term)
    }

    /// True if we hold an entry at `index` whose term is `term`. Index 0 matches any term.
    pub(crate) fn contains(&self, term: Term, index: Index) -> bool {
        if index.is_sentinel() {
            return true;
        }
        self.term_at(index) == Some(term)
    }

    /// Where a leader should resume sending from after our log failed to contain
    /// `prev_log_index`. If we are short, that's just past our end. Otherwise it's the first
    /// index of the term we hold at `prev_log_index`, so the leader can skip the whole term.
    pub(crate) fn conflict_hint(&self, prev_log_index: Index) -> Index {
        let conflicting_term = match self.term_at(prev_log_index) {
            None => return self.last_index().plus(1),
            Some(term) => term,
        };

        let mut first = prev_log_index;
        while first > Index::start_index() {
            let earlier = first.saturating_minus(1);
            if self.term_at(earlier) != Some(conflicting_term) {
                break;
            }
            first = earlier;
        }
        first
    }

    /// Up to `max_entries` entries starting at `start`.
    pub(crate) fn entries_from(&self, start: Index, max_entries: usize) -> Vec<LogEntry> {
        if start.is_sentinel() || start > self.last_index() {
            return Vec::new();
        }
        match usize::try_from(start.as_u64() - 1) {
            Ok(offset) => self.entries[offset..].iter().take(max_entries).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub(crate) fn append(&mut self, term: Term, command: Bytes) -> Index {
        let index = self.last_index().plus(1);
        self.entries.push(LogEntry { index, term, command });
        index
    }

    /// Drop the entry at `index` and everything after it.
    pub(crate) fn truncate(&mut self, index: Index) {
        let keep = usize::try_from(index.as_u64().saturating_sub(1)).unwrap_or(usize::MAX);
        self.entries.truncate(keep);
    }

    /// Returns the log that results from merging `incoming` into this one, or None if every
    /// incoming entry is already present (in which case nothing needs persisting).
    ///
    /// Caller must have validated `incoming` with `validate_incoming()` and checked that the
    /// entry preceding it matches.
    pub(crate) fn merged(&self, incoming: &[LogEntry]) -> Option<Log> {
        for (position, entry) in incoming.iter().enumerate() {
            match self.term_at(entry.index) {
                Some(term) if term == entry.term => continue,
                existing => {
                    let mut staged = self.clone();
                    if existing.is_some() {
                        staged.truncate(entry.index);
                    }
                    staged.entries.extend_from_slice(&incoming[position..]);
                    return Some(staged);
                }
            }
        }

        None
    }

    /// Checks that `entries` directly follow `prev_log_index`, have no gaps, never decrease in
    /// term, and (if given) aren't from a term later than the sender's.
    pub(crate) fn validate_incoming(
        prev_log_index: Index,
        prev_log_term: Term,
        entries: &[LogEntry],
        sender_term: Option<Term>,
    ) -> Result<(), LogError> {
        let mut expected = prev_log_index.checked_plus(1);
        // The sentinel matches any term, so whatever term came with it says nothing about what follows.
        let mut preceding = if prev_log_index.is_sentinel() {
            Term::new(0)
        } else {
            prev_log_term
        };
        for (position, entry) in entries.iter().enumerate() {
            let expected_index = expected.ok_or(LogError::IndexOverflow { position })?;
            if entry.index != expected_index {
                return Err(LogError::NonContiguous {
                    position,
                    expected: expected_index,
                    actual: entry.index,
                });
            }
            if entry.term < preceding {
                return Err(LogError::TermRegression {
                    index: entry.index,
                    term: entry.term,
                    preceding,
                });
            }
            if let Some(sender_term) = sender_term {
                if entry.term > sender_term {
                    return Err(LogError::TermFromFuture {
                        index: entry.index,
                        term: entry.term,
                        sender_term,
                    });
                }
            }
            preceding = entry.term;
            expected = expected_index.checked_plus(1);
        }

        Ok(())
    }
}

impl fmt::Debug for Log {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.index, e.term)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u64, term: u64, command: &'static str) -> LogEntry {
        LogEntry::new(Index::new(index), Term::new(term), command)
    }

    fn log_of(terms: &[u64]) -> Log {
        let entries = terms
            .iter()
            .enumerate()
            .map(|(i, t)| entry(i as u64 + 1, *t, "x"))
            .collect();
        Log::from_entries(entries).unwrap()
    }

    #[test]
    fn empty_log_reports_sentinel() {
        let log = Log::new();
        assert_eq!(log.latest_entry(), (Term::new(0), Index::new(0)));
        assert!(log.contains(Term::new(0), Index::new(0)));
        // Index 0 matches regardless of the term it's paired with.
        assert!(log.contains(Term::new(7), Index::new(0)));
        assert!(!log.contains(Term::new(1), Index::new(1)));
        assert_eq!(log.read(Index::new(0)), None);
    }

    #[test]
    fn append_assigns_next_index() {
        let mut log = Log::new();
        assert_eq!(log.append(Term::new(1), Bytes::from("a")), Index::new(1));
        assert_eq!(log.append(Term::new(2), Bytes::from("b")), Index::new(2));
        assert_eq!(log.latest_entry(), (Term::new(2), Index::new(2)));
        assert_eq!(log.read(Index::new(1)), Some(&entry(1, 1, "a")));
    }

    #[test]
    fn merged_appends_new_entries() {
        let log = Log::from_entries(vec![entry(1, 1, "a")]).unwrap();
        let merged = log.merged(&[entry(2, 1, "b"), entry(3, 1, "c")]).unwrap();
        assert_eq!(merged.entries(), &[entry(1, 1, "a"), entry(2, 1, "b"), entry(3, 1, "c")]);
        // Original is untouched until the caller swaps it in.
        assert_eq!(log.last_index(), Index::new(1));
    }

    #[test]
    fn merged_is_none_when_already_present() {
        let log = log_of(&[1, 1, 2]);
        assert_eq!(log.merged(&[entry(2, 1, "x"), entry(3, 2, "x")]), None);
        assert_eq!(log.merged(&[]), None);
    }

    #[test]
    fn merged_keeps_suffix_when_incoming_is_a_matching_prefix() {
        // A delayed AppendEntries carrying fewer entries must not chop off later ones.
        let log = log_of(&[1, 1, 1, 1]);
        assert_eq!(log.merged(&[entry(2, 1, "x")]), None);
    }

    #[test]
    fn merged_truncates_at_first_conflict() {
        let log = log_of(&[1, 1, 2, 2, 2]);
        let merged = log.merged(&[entry(3, 2, "x"), entry(4, 3, "new")]).unwrap();
        assert_eq!(merged.latest_entry(), (Term::new(3), Index::new(4)));
        assert_eq!(merged.read(Index::new(4)), Some(&entry(4, 3, "new")));
        assert_eq!(merged.read(Index::new(5)), None);
    }

    #[test]
    fn conflict_hint_points_past_short_log() {
        let log = log_of(&[1, 1]);
        assert_eq!(log.conflict_hint(Index::new(6)), Index::new(3));
    }

    #[test]
    fn conflict_hint_skips_whole_conflicting_term() {
        let log = log_of(&[1, 2, 2, 2, 3]);
        assert_eq!(log.conflict_hint(Index::new(4)), Index::new(2));
        assert_eq!(log.conflict_hint(Index::new(5)), Index::new(5));
        assert_eq!(log_of(&[4, 4]).conflict_hint(Index::new(2)), Index::new(1));
    }

    #[test]
    fn entries_from_respects_bounds() {
        let log = log_of(&[1, 1, 1, 1]);
        assert_eq!(log.entries_from(Index::new(2), 2).len(), 2);
        assert_eq!(log.entries_from(Index::new(4), 10).len(), 1);
        assert!(log.entries_from(Index::new(5), 10).is_empty());
        assert!(log.entries_from(Index::new(0), 10).is_empty());
    }

    #[test]
    fn validate_incoming_rejects_gaps_and_regressions() {
        let ok = [entry(3, 2, "a"), entry(4, 2, "b")];
        assert_eq!(Log::validate_incoming(Index::new(2), Term::new(1), &ok, Some(Term::new(2))), Ok(()));

        let gap = [entry(3, 2, "a"), entry(5, 2, "b")];
        assert_eq!(
            Log::validate_incoming(Index::new(2), Term::new(1), &gap, None),
            Err(LogError::NonContiguous {
                position: 1,
                expected: Index::new(4),
                actual: Index::new(5),
            })
        );

        let regress = [entry(3, 2, "a"), entry(4, 1, "b")];
        assert!(matches!(
            Log::validate_incoming(Index::new(2), Term::new(1), &regress, None),
            Err(LogError::TermRegression { .. })
        ));

        let future = [entry(1, 9, "a")];
        assert!(matches!(
            Log::validate_incoming(Index::new(0), Term::new(0), &future, Some(Term::new(3))),
            Err(LogError::TermFromFuture { .. })
        ));
    }

    #[test]
    fn validate_incoming_ignores_term_paired_with_sentinel() {
        let first = [entry(1, 1, "a")];
        assert_eq!(Log::validate_incoming(Index::new(0), Term::new(2), &first, Some(Term::new(3))), Ok(()));

        // Still enforced between the entries themselves.
        let regress = [entry(1, 2, "a"), entry(2, 1, "b")];
        assert!(matches!(
            Log::validate_incoming(Index::new(0), Term::new(5), &regress, None),
            Err(LogError::TermRegression { .. })
        ));
    }

    #[test]
    fn validate_incoming_at_end_of_index_space() {
        assert_eq!(Log::validate_incoming(Index::new(u64::MAX), Term::new(1), &[], None), Ok(()));
        assert_eq!(
            Log::validate_incoming(Index::new(u64::MAX), Term::new(1), &[entry(u64::MAX, 1, "a")], None),
            Err(LogError::IndexOverflow { position: 0 })
        );
        assert_eq!(
            Log::validate_incoming(
                Index::new(u64::MAX - 1),
                Term::new(1),
                &[entry(u64::MAX, 1, "a"), entry(u64::MAX, 1, "b")],
                None
            ),
            Err(LogError::IndexOverflow { position: 1 })
        );
    }

    #[test]
    fn far_out_indexes_are_simply_absent() {
        let mut log = log_of(&[1, 1]);
        assert_eq!(log.read(Index::new(u64::MAX)), None);
        assert_eq!(log.term_at(Index::new(u64::MAX)), None);
        assert!(!log.contains(Term::new(1), Index::new(u64::MAX)));
        assert_eq!(log.conflict_hint(Index::new(u64::MAX)), Index::new(3));
        assert!(log.entries_from(Index::new(u64::MAX), 10).is_empty());
        assert_eq!(Index::new(u64::MAX).plus(1), Index::new(u64::MAX));

        log.truncate(Index::new(u64::MAX));
        assert_eq!(log.last_index(), Index::new(2));
    }

    #[test]
    fn from_entries_requires_index_one_start() {
        assert!(Log::from_entries(vec![entry(2, 1, "a")]).is_err());
    }
}
