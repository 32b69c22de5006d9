use crate::replica::peers::ReplicaId;
use crate::replica::storage::Storage;
use crate::replica::write_ahead_log::{Index, Log};
use bytes::Bytes;
use std::fmt;
use std::io;

/// Term is raft's logical clock. Each term has at most one leader.
#[derive(Copy, Clone, Default, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Term(u64);

impl Term {
    pub const fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn next(&self) -> Term {
        Term(self.0 + 1)
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to save persistent state: {0}")]
    Save(io::Error),
    #[error("failed to load persistent state: {0}")]
    Load(io::Error),
    #[error("stored log is corrupt: {0}")]
    CorruptLog(String),
}

/// PersistentLocalState is currentTerm, votedFor and the log: the state the raft paper requires to
/// be durable before we act on it.
///
/// Every mutator is write-ahead: the new values are handed to `Storage::save_state()` first, and
/// only swapped into memory once that succeeds. On failure nothing changes, and the caller must
/// not send whatever reply depended on the change.
pub(crate) struct PersistentLocalState {
    logger: slog::Logger,
    storage: Box<dyn Storage>,
    my_replica_id: ReplicaId,
    current_term: Term,
    voted_for: Option<ReplicaId>,
    log: Log,
}

impl PersistentLocalState {
    pub(crate) fn load(
        logger: slog::Logger,
        my_replica_id: ReplicaId,
        mut storage: Box<dyn Storage>,
    ) -> Result<Self, PersistenceError> {
        let (current_term, voted_for, log) = match storage.load_state().map_err(PersistenceError::Load)? {
            None => (Term::new(0), None, Log::new()),
            Some(durable) => {
                let log = Log::from_entries(durable.log).map_err(|e| PersistenceError::CorruptLog(e.to_string()))?;
                (durable.current_term, durable.voted_for, log)
            }
        };

        slog::info!(
            logger,
            "Loaded local state. Term: {:?}, VotedFor: {:?}, Log: {:?}",
            current_term,
            voted_for,
            log.latest_entry()
        );

        Ok(PersistentLocalState {
            logger,
            storage,
            my_replica_id,
            current_term,
            voted_for,
            log,
        })
    }

    pub(crate) fn current_term(&self) -> Term {
        self.current_term
    }

    pub(crate) fn voted_for(&self) -> Option<&ReplicaId> {
        self.voted_for.as_ref()
    }

    pub(crate) fn log(&self) -> &Log {
        &self.log
    }

    /// Set current term to `new_term` (clearing our vote) iff it is larger than current term.
    ///
    /// Return true if we mutated state.
    pub(crate) fn store_term_if_increased(&mut self, new_term: Term) -> Result<bool, PersistenceError> {
        if new_term <= self.current_term {
            return Ok(false);
        }

        save(self.storage.as_mut(), new_term, None, &self.log)?;
        self.current_term = new_term;
        self.voted_for = None;
        Ok(true)
    }

    /// Return the new term. Used when transitioning to candidate.
    pub(crate) fn increment_term_and_vote_for_self(&mut self) -> Result<Term, PersistenceError> {
        let new_term = self.current_term.next();

        save(self.storage.as_mut(), new_term, Some(&self.my_replica_id), &self.log)?;
        self.current_term = new_term;
        self.voted_for = Some(self.my_replica_id.clone());
        Ok(new_term)
    }

    /// Record a vote for `candidate` in the current term, unless we've already voted for someone
    /// else. Returns true if our vote (new or previously cast) is for `candidate`.
    pub(crate) fn store_vote_if_unvoted(&mut self, candidate: &ReplicaId) -> Result<bool, PersistenceError> {
        match &self.voted_for {
            Some(voted_for) => Ok(voted_for == candidate),
            None => {
                save(self.storage.as_mut(), self.current_term, Some(candidate), &self.log)?;
                self.voted_for = Some(candidate.clone());
                Ok(true)
            }
        }
    }

    /// Replace the log with `new_log`, as produced by `Log::merged()`.
    pub(crate) fn store_log(&mut self, new_log: Log) -> Result<(), PersistenceError> {
        save(
            self.storage.as_mut(),
            self.current_term,
            self.voted_for.as_ref(),
            &new_log,
        )?;
        self.log = new_log;
        Ok(())
    }

    /// Leader path: append `command` stamped with the current term.
    pub(crate) fn append_entry(&mut self, command: Bytes) -> Result<Index, PersistenceError> {
        let mut staged = self.log.clone();
        let index = staged.append(self.current_term, command);
        self.store_log(staged)?;

        slog::debug!(self.logger, "Appended entry {:?} in term {:?}", index, self.current_term);
        Ok(index)
    }
}

fn save(
    storage: &mut dyn Storage,
    current_term: Term,
    voted_for: Option<&ReplicaId>,
    log: &Log,
) -> Result<(), PersistenceError> {
    storage
        .save_state(current_term, voted_for, log.entries())
        .map_err(PersistenceError::Save)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::replica::storage::{DurableState, InMemoryStorage};
    use crate::replica::write_ahead_log::LogEntry;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Storage wrapper whose saves can be made to fail on demand.
    #[derive(Clone, Default)]
    pub(crate) struct FlakyStorage {
        pub(crate) inner: InMemoryStorage,
        pub(crate) fail_saves: Arc<AtomicBool>,
    }

    impl Storage for FlakyStorage {
        fn load_state(&mut self) -> Result<Option<DurableState>, io::Error> {
            self.inner.load_state()
        }

        fn save_state(
            &mut self,
            current_term: Term,
            voted_for: Option<&ReplicaId>,
            log: &[LogEntry],
        ) -> Result<(), io::Error> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "disk on fire"));
            }
            self.inner.save_state(current_term, voted_for, log)
        }
    }

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn load(storage: FlakyStorage) -> PersistentLocalState {
        PersistentLocalState::load(logger(), ReplicaId::new("me"), Box::new(storage)).unwrap()
    }

    #[test]
    fn starts_fresh_at_term_zero() {
        let state = load(FlakyStorage::default());
        assert_eq!(state.current_term(), Term::new(0));
        assert_eq!(state.voted_for(), None);
        assert_eq!(state.log().last_index(), Index::new(0));
    }

    #[test]
    fn term_increase_clears_vote_and_is_saved() {
        let storage = FlakyStorage::default();
        let mut state = load(storage.clone());

        assert_eq!(state.increment_term_and_vote_for_self().unwrap(), Term::new(1));
        assert_eq!(state.voted_for(), Some(&ReplicaId::new("me")));

        assert!(state.store_term_if_increased(Term::new(4)).unwrap());
        assert!(!state.store_term_if_increased(Term::new(4)).unwrap());
        assert!(!state.store_term_if_increased(Term::new(2)).unwrap());
        assert_eq!(state.voted_for(), None);

        let saved = storage.inner.snapshot().unwrap();
        assert_eq!(saved.current_term, Term::new(4));
        assert_eq!(saved.voted_for, None);
    }

    #[test]
    fn only_one_vote_per_term() {
        let mut state = load(FlakyStorage::default());
        state.store_term_if_increased(Term::new(2)).unwrap();

        assert!(state.store_vote_if_unvoted(&ReplicaId::new("a")).unwrap());
        // Same candidate asking again is fine.
        assert!(state.store_vote_if_unvoted(&ReplicaId::new("a")).unwrap());
        assert!(!state.store_vote_if_unvoted(&ReplicaId::new("b")).unwrap());
    }

    #[test]
    fn failed_save_leaves_memory_untouched() {
        let storage = FlakyStorage::default();
        let mut state = load(storage.clone());
        state.append_entry(Bytes::from("a")).unwrap();

        storage.fail_saves.store(true, Ordering::SeqCst);

        assert!(matches!(
            state.store_term_if_increased(Term::new(3)),
            Err(PersistenceError::Save(_))
        ));
        assert!(state.store_vote_if_unvoted(&ReplicaId::new("x")).is_err());
        assert!(state.append_entry(Bytes::from("b")).is_err());

        assert_eq!(state.current_term(), Term::new(0));
        assert_eq!(state.voted_for(), None);
        assert_eq!(state.log().last_index(), Index::new(1));
    }

    #[test]
    fn reload_restores_saved_state() {
        let storage = FlakyStorage::default();
        {
            let mut state = load(storage.clone());
            state.store_term_if_increased(Term::new(5)).unwrap();
            state.store_vote_if_unvoted(&ReplicaId::new("c")).unwrap();
            state.append_entry(Bytes::from("a")).unwrap();
            state.append_entry(Bytes::from("b")).unwrap();
        }

        let reloaded = load(storage);
        assert_eq!(reloaded.current_term(), Term::new(5));
        assert_eq!(reloaded.voted_for(), Some(&ReplicaId::new("c")));
        assert_eq!(reloaded.log().latest_entry(), (Term::new(5), Index::new(2)));
    }
}
