use crate::replica::write_ahead_log::commit_stream::CommitStreamPublisher;
use crate::replica::write_ahead_log::{Index, Log};
use crate::replica::Term;

/// CommitTracker holds the volatile half of a replica's log state: how far the log is known to be
/// committed, and how far committed entries have been handed to the application.
///
/// Note: A log entry has 3 states (not modeled directly in code):
/// 1. Persisted - written to storage, not yet replicated to majority
/// 2. Committed - written to storage, replicated to majority
/// 3. Applied - a committed entry that has also been published on the commit stream
///
/// A log entry's state has no global truth. Each replica will have their own local view of what
/// state the log entry is in.
pub(crate) struct CommitTracker {
    logger: slog::Logger,
    // Index of highest log entry known to be committed. 0 if nothing is committed.
    commit_index: Index,
    // Index of highest log entry published to the commit stream. 0 if nothing is applied.
    last_applied: Index,
    commit_stream: CommitStreamPublisher,
}

impl CommitTracker {
    pub(crate) fn new(logger: slog::Logger, commit_stream: CommitStreamPublisher) -> Self {
        CommitTracker {
            logger,
            commit_index: Index::new(0),
            last_applied: Index::new(0),
            commit_stream,
        }
    }

    pub(crate) fn commit_index(&self) -> Index {
        self.commit_index
    }

    #[cfg(test)]
    pub(crate) fn last_applied(&self) -> Index {
        self.last_applied
    }

    /// Leader path. Moves the commit index to `tentative_new_commit_index` only if that entry was
    /// created in `current_term`. Returns true if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index_if_valid(
        &mut self,
        tentative_new_commit_index: Index,
        current_term: Term,
        log: &Log,
    ) -> bool {
        if tentative_new_commit_index <= self.commit_index {
            return false;
        }

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        // Terms never decrease along the log, so if N's term is stale, so is every entry below it.
        if log.term_at(tentative_new_commit_index) != Some(current_term) {
            slog::debug!(
                self.logger,
                "Not committing {:?}: entry is not from current term {:?}",
                tentative_new_commit_index,
                current_term
            );
            return false;
        }

        self.ratchet_fwd_commit_index(tentative_new_commit_index, log)
    }

    /// Follower path. Moves the commit index forward, never backward. Returns true if it moved.
    pub(crate) fn ratchet_fwd_commit_index(&mut self, new_commit_index: Index, log: &Log) -> bool {
        if new_commit_index <= self.commit_index {
            return false;
        }

        if new_commit_index > log.last_index() {
            slog::error!(
                self.logger,
                "Refusing to move commit index past our local log. [latest log] {:?} < {:?} [input]",
                log.last_index(),
                new_commit_index
            );
            return false;
        }

        slog::debug!(
            self.logger,
            "Commit index {:?} -> {:?}",
            self.commit_index,
            new_commit_index
        );
        self.commit_index = new_commit_index;
        true
    }

    /// Publishes every committed-but-unapplied entry in log order.
    pub(crate) fn apply_all_committed_entries(&mut self, log: &Log) {
        while self.last_applied < self.commit_index {
            let next_index = self.last_applied.plus(1);
            let entry = match log.read(next_index) {
                Some(entry) => entry.clone(),
                None => {
                    slog::error!(self.logger, "Committed entry {:?} is missing from log", next_index);
                    return;
                }
            };

            self.commit_stream.notify_commit(&self.logger, entry);
            self.last_applied = next_index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::write_ahead_log::commit_stream;
    use bytes::Bytes;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn log_with_terms(terms: &[u64]) -> Log {
        let mut log = Log::new();
        for t in terms {
            log.append(Term::new(*t), Bytes::from(format!("cmd-{}", t)));
        }
        log
    }

    #[tokio::test]
    async fn applies_in_order_up_to_commit_index() {
        let (publisher, mut stream) = commit_stream::new();
        let mut tracker = CommitTracker::new(logger(), publisher);
        let log = log_with_terms(&[1, 1, 2]);

        assert!(tracker.ratchet_fwd_commit_index(Index::new(2), &log));
        tracker.apply_all_committed_entries(&log);
        assert_eq!(tracker.last_applied(), Index::new(2));

        assert_eq!(stream.recv().await.unwrap().index, Index::new(1));
        assert_eq!(stream.recv().await.unwrap().index, Index::new(2));

        assert!(tracker.ratchet_fwd_commit_index(Index::new(3), &log));
        tracker.apply_all_committed_entries(&log);
        assert_eq!(stream.recv().await.unwrap().index, Index::new(3));
    }

    #[test]
    fn commit_index_never_decreases() {
        let (publisher, _stream) = commit_stream::new();
        let mut tracker = CommitTracker::new(logger(), publisher);
        let log = log_with_terms(&[1, 1, 1]);

        assert!(tracker.ratchet_fwd_commit_index(Index::new(3), &log));
        assert!(!tracker.ratchet_fwd_commit_index(Index::new(1), &log));
        assert_eq!(tracker.commit_index(), Index::new(3));
    }

    #[test]
    fn leader_only_commits_current_term_entries() {
        let (publisher, _stream) = commit_stream::new();
        let mut tracker = CommitTracker::new(logger(), publisher);
        let log = log_with_terms(&[1, 2, 2, 3]);

        // Majority holds index 3, but it's from term 2 while we lead term 3.
        assert!(!tracker.ratchet_fwd_commit_index_if_valid(Index::new(3), Term::new(3), &log));
        assert_eq!(tracker.commit_index(), Index::new(0));

        // Once the term-3 entry reaches a majority, everything before it commits too.
        assert!(tracker.ratchet_fwd_commit_index_if_valid(Index::new(4), Term::new(3), &log));
        assert_eq!(tracker.commit_index(), Index::new(4));
    }

    #[test]
    fn commit_index_stays_within_local_log() {
        let (publisher, _stream) = commit_stream::new();
        let mut tracker = CommitTracker::new(logger(), publisher);
        let log = log_with_terms(&[1, 1]);

        assert!(!tracker.ratchet_fwd_commit_index(Index::new(3), &log));
        assert!(!tracker.ratchet_fwd_commit_index(Index::new(u64::MAX), &log));
        assert_eq!(tracker.commit_index(), Index::new(0));

        assert!(tracker.ratchet_fwd_commit_index(Index::new(2), &log));
        assert_eq!(tracker.commit_index(), Index::new(2));
    }
}
