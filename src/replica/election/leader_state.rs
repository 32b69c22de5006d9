use crate::replica::election::timers::LeaderTimerHandle;
use crate::replica::peers;
use crate::replica::{Index, ReplicaId};
use std::collections::HashMap;

/// LeaderStateTracker is the leader's view of how far each peer's log agrees with its own.
/// Discarded on stepping down; a new leader starts over.
pub(crate) struct LeaderStateTracker {
    peer_state: HashMap<ReplicaId, PeerState>,
}

impl LeaderStateTracker {
    pub(super) fn new(peer_state: HashMap<ReplicaId, PeerState>) -> Self {
        LeaderStateTracker { peer_state }
    }

    pub(crate) fn peer_state_mut(&mut self, peer_id: &ReplicaId) -> Option<&mut PeerState> {
        self.peer_state.get_mut(peer_id)
    }

    /// Highest index known to be stored on a majority of the cluster, counting the leader's own
    /// log as fully matched.
    pub(crate) fn majority_matched_index(&self, my_last_index: Index) -> Index {
        cluster_commit_index(my_last_index, self.peer_state.values().map(|p| p.matched))
    }
}

/// Sort every replica's match index descending. The entry at position `majority - 1` is the
/// highest index that at least a majority have reached.
fn cluster_commit_index(my_last_index: Index, peers_matched: impl Iterator<Item = Index>) -> Index {
    let mut matched: Vec<Index> = std::iter::once(my_last_index).chain(peers_matched).collect();
    matched.sort_unstable_by(|a, b| b.cmp(a));

    let majority = peers::majority_count(matched.len());
    matched[majority - 1]
}

pub(crate) struct PeerState {
    // Ticks the actor to send this peer heartbeats. Dropped with the rest of leader state.
    leader_timer_handle: LeaderTimerHandle,

    // > index of the next log entry to send to that server
    // > (initialized to leader last log index + 1)
    next: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    matched: Index,

    // Per-peer logical clock for this leadership. Each AppendEntries sent gets the next seq_no;
    // replies with a seq_no at or below the last one received are stale and dropped. We only
    // keep one request in flight, so at most one reply is ever awaited.
    last_sent_seq_no: u64,
    last_received_seq_no: u64,
}

impl PeerState {
    pub(super) fn new(leader_timer_handle: LeaderTimerHandle, my_last_index: Index) -> Self {
        PeerState {
            leader_timer_handle,
            next: my_last_index.plus(1),
            matched: Index::new(0),
            last_sent_seq_no: 0,
            last_received_seq_no: 0,
        }
    }

    /// (nextIndex, prevLogIndex) for the next AppendEntries to this peer.
    pub(crate) fn next_and_previous_log_index(&self) -> (Index, Index) {
        (self.next, self.next.saturating_minus(1))
    }

    #[cfg(test)]
    pub(crate) fn matched(&self) -> Index {
        self.matched
    }

    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.last_received_seq_no < self.last_sent_seq_no
    }

    pub(crate) fn next_seq_no(&mut self) -> u64 {
        self.last_sent_seq_no += 1;
        self.last_sent_seq_no
    }

    pub(crate) fn reset_heartbeat_timer(&self) {
        self.leader_timer_handle.reset_heartbeat_timer();
    }

    /// Apply the outcome of the AppendEntries tagged `received_seq_no`. Returns false if the
    /// reply was stale and ignored.
    pub(crate) fn handle_append_entries_result(
        &mut self,
        logger: &slog::Logger,
        received_seq_no: u64,
        update: PeerStateUpdate,
    ) -> bool {
        if !self.ratchet_fwd_received_seq_no(received_seq_no) {
            slog::debug!(logger, "Dropping stale seq-no {}: {:?}", received_seq_no, update);
            return false;
        }

        match update {
            PeerStateUpdate::Success {
                prev_log_index,
                num_entries,
            } => self.record_success(prev_log_index.plus(num_entries as u64)),
            PeerStateUpdate::PeerLogBehind { conflict_hint } => self.rewind(logger, conflict_hint),
            PeerStateUpdate::OtherError => {}
        }
        true
    }

    fn record_success(&mut self, replicated_through: Index) {
        // A late success can't take progress away.
        if replicated_through > self.matched {
            self.matched = replicated_through;
        }
        self.next = self.matched.plus(1);
    }

    fn rewind(&mut self, logger: &slog::Logger, conflict_hint: Option<Index>) {
        let floor = self.matched.plus(1);
        let ceiling = self.next.saturating_minus(1).max(floor);
        let proposed = conflict_hint.unwrap_or(ceiling);

        // Hint comes from the peer. Never trust it to move us backwards past what it already
        // acknowledged, or forwards.
        let new_next = proposed.max(floor).min(ceiling);
        if new_next == self.next {
            slog::warn!(logger, "Peer rejected AppendEntries but we can't rewind below {:?}", self.next);
        }
        self.next = new_next;
    }

    fn ratchet_fwd_received_seq_no(&mut self, received_seq_no: u64) -> bool {
        if self.last_received_seq_no < received_seq_no && received_seq_no <= self.last_sent_seq_no {
            self.last_received_seq_no = received_seq_no;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub(crate) enum PeerStateUpdate {
    Success { prev_log_index: Index, num_entries: usize },
    PeerLogBehind { conflict_hint: Option<Index> },
    OtherError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::Term;
    use std::time::Duration;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn idx(i: u64) -> Index {
        Index::new(i)
    }

    #[test]
    fn commit_index_is_highest_majority_match() {
        let cases: Vec<(u64, Vec<u64>, u64)> = vec![
            // Single node: the leader alone is a majority.
            (4, vec![], 4),
            // Three nodes
            (5, vec![0, 0], 0),
            (5, vec![3, 0], 3),
            (5, vec![3, 5], 5),
            (5, vec![1, 4], 4),
            // Four nodes need three.
            (5, vec![3, 5, 5], 5),
            (5, vec![3, 3, 5], 3),
            (5, vec![0, 0, 5], 0),
            // Five nodes need three.
            (9, vec![1, 2, 3, 4], 3),
            (9, vec![9, 9, 0, 0], 9),
        ];

        for (mine, peers, expected) in cases {
            let actual = cluster_commit_index(idx(mine), peers.iter().map(|i| idx(*i)));
            assert_eq!(actual, idx(expected), "mine={} peers={:?}", mine, peers);
        }
    }

    async fn new_peer_state(my_last_index: u64) -> (PeerState, ActorClient) {
        let (actor_client, _rx) = ActorClient::new(10);
        let timer = LeaderTimerHandle::spawn_timer_task(
            Duration::from_secs(60),
            actor_client.weak(),
            ReplicaId::new("peer"),
            Term::new(1),
        );
        (PeerState::new(timer, idx(my_last_index)), actor_client)
    }

    #[tokio::test]
    async fn success_advances_next_and_matched() {
        let (mut peer, _client) = new_peer_state(3).await;
        assert_eq!(peer.next_and_previous_log_index(), (idx(4), idx(3)));

        let seq_no = peer.next_seq_no();
        assert!(peer.has_outstanding_request());
        assert!(peer.handle_append_entries_result(
            &logger(),
            seq_no,
            PeerStateUpdate::Success {
                prev_log_index: idx(3),
                num_entries: 2
            }
        ));
        assert!(!peer.has_outstanding_request());
        assert_eq!(peer.matched(), idx(5));
        assert_eq!(peer.next_and_previous_log_index(), (idx(6), idx(5)));
    }

    #[tokio::test]
    async fn stale_seq_no_is_dropped() {
        let (mut peer, _client) = new_peer_state(3).await;
        let first = peer.next_seq_no();
        let second = peer.next_seq_no();

        let success = || PeerStateUpdate::Success {
            prev_log_index: idx(3),
            num_entries: 1,
        };
        assert!(peer.handle_append_entries_result(&logger(), second, success()));
        assert!(!peer.handle_append_entries_result(&logger(), first, success()));
        assert!(!peer.handle_append_entries_result(&logger(), second, success()));
        // Never sent.
        assert!(!peer.handle_append_entries_result(&logger(), 99, success()));
    }

    #[tokio::test]
    async fn rewind_steps_back_by_one_without_hint() {
        let (mut peer, _client) = new_peer_state(5).await;
        let seq_no = peer.next_seq_no();
        peer.handle_append_entries_result(&logger(), seq_no, PeerStateUpdate::PeerLogBehind { conflict_hint: None });
        assert_eq!(peer.next_and_previous_log_index(), (idx(5), idx(4)));
    }

    #[tokio::test]
    async fn rewind_jumps_to_hint_but_stays_in_bounds() {
        let (mut peer, _client) = new_peer_state(10).await;

        let seq_no = peer.next_seq_no();
        peer.handle_append_entries_result(
            &logger(),
            seq_no,
            PeerStateUpdate::PeerLogBehind {
                conflict_hint: Some(idx(4)),
            },
        );
        assert_eq!(peer.next_and_previous_log_index().0, idx(4));

        // A hint past where we already are is ignored in favour of stepping back.
        let seq_no = peer.next_seq_no();
        peer.handle_append_entries_result(
            &logger(),
            seq_no,
            PeerStateUpdate::PeerLogBehind {
                conflict_hint: Some(idx(50)),
            },
        );
        assert_eq!(peer.next_and_previous_log_index().0, idx(3));

        // Never below index 1.
        let seq_no = peer.next_seq_no();
        peer.handle_append_entries_result(
            &logger(),
            seq_no,
            PeerStateUpdate::PeerLogBehind {
                conflict_hint: Some(idx(0)),
            },
        );
        assert_eq!(peer.next_and_previous_log_index(), (idx(1), idx(0)));
    }

    #[tokio::test]
    async fn rewind_never_drops_below_matched() {
        let (mut peer, _client) = new_peer_state(10).await;
        let seq_no = peer.next_seq_no();
        peer.handle_append_entries_result(
            &logger(),
            seq_no,
            PeerStateUpdate::Success {
                prev_log_index: idx(6),
                num_entries: 0,
            },
        );
        assert_eq!(peer.matched(), idx(6));

        let seq_no = peer.next_seq_no();
        peer.handle_append_entries_result(
            &logger(),
            seq_no,
            PeerStateUpdate::PeerLogBehind {
                conflict_hint: Some(idx(2)),
            },
        );
        assert_eq!(peer.next_and_previous_log_index().0, idx(7));
    }
}
