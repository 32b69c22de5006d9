use crate::actor::WeakActorClient;
use crate::replica::election::{ElectionConfig, ElectionState, ElectionStateChangeListener, PeerStateUpdate};
use crate::replica::local_state::{PersistenceError, PersistentLocalState, Term};
use crate::replica::peers::{ClusterTracker, ReplicaId};
use crate::replica::raft_rpcs::{AppendEntriesReply, AppendEntriesRequest, RequestVoteReply, RequestVoteRequest};
use crate::replica::replica_api::{
    AppendEntriesError, AppendEntriesReplyFromPeer, AppendEntriesReplyFromPeerDescriptor, EnqueueForReplicationError,
    EnqueueForReplicationInput, EnqueueForReplicationOutput, FollowerTimeoutTick, LeaderTimerTick, RequestVoteError,
    RequestVoteReplyFromPeer,
};
use crate::replica::write_ahead_log::commit_stream::CommitStreamPublisher;
use crate::replica::write_ahead_log::{CommitTracker, Index, Log};
use crate::transport::{PeerTransport, TransportError};
use std::cmp;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Duration;

pub(crate) struct ReplicaConfig {
    pub(crate) logger: slog::Logger,
    pub(crate) cluster_tracker: ClusterTracker,
    pub(crate) local_state: PersistentLocalState,
    pub(crate) commit_stream_publisher: CommitStreamPublisher,
    pub(crate) transport: Arc<dyn PeerTransport>,
    pub(crate) actor_client: WeakActorClient,
    pub(crate) leader_heartbeat_duration: Duration,
    pub(crate) follower_min_timeout: Duration,
    pub(crate) follower_max_timeout: Duration,
    pub(crate) rpc_timeout: Duration,
    pub(crate) max_entries_per_append: usize,
}

/// Replica is one member of a raft cluster. It is only ever driven by the actor event loop, one
/// event at a time, so none of its handlers need to worry about each other.
///
/// Handlers never block on the network. Outbound RPCs are spawned, and their results come back
/// later as `*_reply_from_peer` events.
pub(crate) struct Replica {
    logger: slog::Logger,
    my_replica_id: ReplicaId,
    cluster_tracker: ClusterTracker,
    local_state: PersistentLocalState,
    election_state: ElectionState,
    commit_tracker: CommitTracker,
    transport: Arc<dyn PeerTransport>,
    actor_client: WeakActorClient,
    // Also used as the backoff before re-asking an unreachable peer for its vote.
    leader_heartbeat_duration: Duration,
    rpc_timeout: Duration,
    max_entries_per_append: usize,
}

impl Replica {
    pub(crate) fn new(config: ReplicaConfig) -> (Self, ElectionStateChangeListener) {
        let my_replica_id = config.cluster_tracker.my_replica_id().clone();
        let (election_state, listener) = ElectionState::new_follower(
            ElectionConfig {
                my_replica_id: my_replica_id.clone(),
                leader_heartbeat_duration: config.leader_heartbeat_duration,
                follower_min_timeout: config.follower_min_timeout,
                follower_max_timeout: config.follower_max_timeout,
            },
            config.actor_client.clone(),
        );
        let commit_tracker = CommitTracker::new(config.logger.clone(), config.commit_stream_publisher);

        let replica = Replica {
            logger: config.logger,
            my_replica_id,
            cluster_tracker: config.cluster_tracker,
            local_state: config.local_state,
            election_state,
            commit_tracker,
            transport: config.transport,
            actor_client: config.actor_client,
            leader_heartbeat_duration: config.leader_heartbeat_duration,
            rpc_timeout: config.rpc_timeout,
            max_entries_per_append: config.max_entries_per_append,
        };

        (replica, listener)
    }

    pub(crate) fn handle_enqueue_for_replication(
        &mut self,
        input: EnqueueForReplicationInput,
    ) -> Result<EnqueueForReplicationOutput, EnqueueForReplicationError> {
        if !self.election_state.is_leader() {
            return Err(EnqueueForReplicationError::NotLeader(
                self.election_state.current_leader(),
            ));
        }

        // > If command received from client: append entry to local log,
        // > respond after entry applied to state machine (§5.3)
        // We respond once the entry is durable. Application finds out about the commit from the
        // commit stream.
        let enqueued_term = self.local_state.current_term();
        let enqueued_index = self
            .local_state
            .append_entry(input.data)
            .map_err(EnqueueForReplicationError::Persistence)?;

        // Don't wait for the next heartbeat. Peers with a request in flight pick this up when
        // it comes back.
        for peer_id in self.cluster_tracker.peer_ids() {
            self.send_append_entries(&peer_id);
        }
        // Single replica clusters commit right away.
        self.advance_leader_commit_index();

        Ok(EnqueueForReplicationOutput {
            enqueued_term,
            enqueued_index,
        })
    }

    pub(crate) fn handle_request_vote(&mut self, input: RequestVoteRequest) -> Result<RequestVoteReply, RequestVoteError> {
        if !self.cluster_tracker.contains_member(&input.candidate_id) {
            return Err(RequestVoteError::CandidateNotInCluster(input.candidate_id));
        }

        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if input.term < current_term {
            slog::info!(
                self.logger,
                "Not granting vote to {:?}. Its term {:?} is behind ours {:?}.",
                input.candidate_id,
                input.term,
                current_term
            );
            return Ok(RequestVoteReply {
                term: current_term,
                vote_granted: false,
            });
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        self.observe_term(input.term, None)?;
        let current_term = self.local_state.current_term();

        // 2. If votedFor is null or candidateId, and candidate’s log is at
        // least as up-to-date as receiver’s log, grant vote (§5.2, §5.4).
        if !self.is_candidate_log_gte_mine(input.last_log_term, input.last_log_index) {
            slog::info!(self.logger, "Not granting vote to {:?}. Its log is behind ours.", input.candidate_id);
            return Ok(RequestVoteReply {
                term: current_term,
                vote_granted: false,
            });
        }

        let vote_granted = self.local_state.store_vote_if_unvoted(&input.candidate_id)?;
        if vote_granted {
            slog::info!(self.logger, "Voted for {:?} in term {:?}", input.candidate_id, current_term);
            // > If election timeout elapses without receiving AppendEntries
            // > RPC from current leader or granting vote to candidate:
            // > convert to candidate
            self.election_state.reset_timeout_if_follower();
        } else {
            slog::info!(
                self.logger,
                "Not granting vote to {:?}. Already voted for {:?}.",
                input.candidate_id,
                self.local_state.voted_for()
            );
        }

        Ok(RequestVoteReply {
            term: current_term,
            vote_granted,
        })
    }

    // > If the logs have last entries with different terms, then
    // > the log with the later term is more up-to-date. If the logs
    // > end with the same term, then whichever log is longer is
    // > more up-to-date.
    fn is_candidate_log_gte_mine(&self, candidate_last_term: Term, candidate_last_index: Index) -> bool {
        (candidate_last_term, candidate_last_index) >= self.local_state.log().latest_entry()
    }

    pub(crate) fn handle_request_vote_reply_from_peer(&mut self, reply: RequestVoteReplyFromPeer) {
        if let Ok(RequestVoteReply { term, .. }) = &reply.result {
            if *term > self.local_state.current_term() {
                self.abdicate_for_term(*term);
                return;
            }
        }

        let current_term = self.local_state.current_term();
        if current_term != reply.term || !self.election_state.is_candidate() {
            slog::debug!(
                self.logger,
                "Ignoring vote reply from {:?} for term {:?}. We're in term {:?} as {:?}.",
                reply.peer_id,
                reply.term,
                current_term,
                self.election_state
            );
            return;
        }

        match reply.result {
            Ok(RequestVoteReply { vote_granted: true, .. }) => {
                let num_votes = match self.election_state.add_vote_if_candidate(reply.peer_id) {
                    Some(num_votes) => num_votes,
                    None => return,
                };
                slog::info!(
                    self.logger,
                    "Received {}/{} votes for term {:?}",
                    num_votes,
                    self.cluster_tracker.num_voting_replicas(),
                    current_term
                );

                if num_votes >= self.cluster_tracker.majority_count() {
                    self.become_leader(current_term);
                }
            }
            Ok(RequestVoteReply { vote_granted: false, .. }) => {
                slog::info!(self.logger, "Vote not granted by {:?} for term {:?}", reply.peer_id, reply.term);
            }
            Err(e) => {
                slog::debug!(self.logger, "RequestVote to {:?} failed: {}. Retrying.", reply.peer_id, e);
                self.spawn_request_vote(reply.peer_id, current_term, Some(self.leader_heartbeat_duration));
            }
        }
    }

    pub(crate) fn handle_append_entries(
        &mut self,
        input: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, AppendEntriesError> {
        if !self.cluster_tracker.contains_member(&input.leader_id) {
            return Err(AppendEntriesError::LeaderNotInCluster(input.leader_id));
        }

        // Nothing in a malformed request can be trusted, including its term.
        Log::validate_incoming(
            input.prev_log_index,
            input.prev_log_term,
            &input.entries,
            Some(input.term),
        )
        .map_err(|e| AppendEntriesError::MalformedEntries(e.to_string()))?;

        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if input.term < current_term {
            return Ok(AppendEntriesReply::rejected(current_term, None));
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        if !self.observe_term(input.term, Some(&input.leader_id))? {
            // Same term. There is only ever one leader per term, so it's them.
            if self.election_state.is_leader() {
                slog::error!(
                    self.logger,
                    "{:?} claims to be leader of term {:?}, but so are we. Rejecting.",
                    input.leader_id,
                    current_term
                );
                return Ok(AppendEntriesReply::rejected(current_term, None));
            }
            if self.election_state.is_candidate() {
                // > If AppendEntries RPC received from new leader: convert to follower
                self.election_state.transition_to_follower(Some(input.leader_id.clone()));
            } else {
                self.election_state.set_leader_if_unknown(&input.leader_id);
            }
        }
        let current_term = self.local_state.current_term();

        self.election_state.reset_timeout_if_follower();

        // 2. Reply false if log doesn’t contain an entry at prevLogIndex
        // whose term matches prevLogTerm (§5.3)
        let log = self.local_state.log();
        if !log.contains(input.prev_log_term, input.prev_log_index) {
            let hint = log.conflict_hint(input.prev_log_index);
            slog::debug!(
                self.logger,
                "Missing ({:?}, {:?}). Asking leader to retry from {:?}.",
                input.prev_log_term,
                input.prev_log_index,
                hint
            );
            return Ok(AppendEntriesReply::rejected(current_term, Some(hint)));
        }

        // 3. If an existing entry conflicts with a new one (same index
        // but different terms), delete the existing entry and all that
        // follow it (§5.3)
        // 4. Append any new entries not already in the log
        if let Some(new_log) = log.merged(&input.entries) {
            self.local_state.store_log(new_log)?;
        }

        // 5. If leaderCommit > commitIndex, set commitIndex =
        // min(leaderCommit, index of last new entry)
        let index_of_last_new_entry = input.prev_log_index.plus(input.entries.len() as u64);
        let new_commit_index = cmp::min(input.leader_commit, index_of_last_new_entry);
        let log = self.local_state.log();
        if self.commit_tracker.ratchet_fwd_commit_index(new_commit_index, log) {
            self.commit_tracker.apply_all_committed_entries(log);
        }

        Ok(AppendEntriesReply::accepted(current_term))
    }

    pub(crate) fn handle_append_entries_reply_from_peer(&mut self, reply: AppendEntriesReplyFromPeer) {
        let logger = self.logger.new(slog::o!(
            "Peer" => reply.descriptor.peer_id.to_string(),
            "SeqNo" => reply.descriptor.seq_no
        ));
        slog::debug!(logger, "AppendEntries result: {:?}", reply.result);

        if let Ok(AppendEntriesReply { term, .. }) = &reply.result {
            if *term > self.local_state.current_term() {
                self.abdicate_for_term(*term);
                return;
            }
        }

        let current_term = self.local_state.current_term();
        if reply.descriptor.term != current_term {
            slog::debug!(logger, "Reply is for old term {:?}", reply.descriptor.term);
            return;
        }

        let update = match reply.result {
            Ok(AppendEntriesReply { success: true, .. }) => PeerStateUpdate::Success {
                prev_log_index: reply.descriptor.prev_log_index,
                num_entries: reply.descriptor.num_entries,
            },
            Ok(AppendEntriesReply {
                success: false,
                conflict_hint,
                ..
            }) => PeerStateUpdate::PeerLogBehind { conflict_hint },
            Err(e) => {
                slog::warn!(logger, "AppendEntries failed: {}", e);
                PeerStateUpdate::OtherError
            }
        };
        let failed = matches!(update, PeerStateUpdate::OtherError);

        let last_log_index = self.local_state.log().last_index();
        let peer_next_index = {
            let leader_state = match self.election_state.leader_state_mut() {
                Some(leader_state) => leader_state,
                None => {
                    slog::debug!(logger, "No longer leader");
                    return;
                }
            };
            let peer_state = match leader_state.peer_state_mut(&reply.descriptor.peer_id) {
                Some(peer_state) => peer_state,
                None => {
                    slog::error!(logger, "Reply from a peer we aren't tracking");
                    return;
                }
            };
            if !peer_state.handle_append_entries_result(&logger, reply.descriptor.seq_no, update) {
                return;
            }
            peer_state.next_and_previous_log_index().0
        };

        self.advance_leader_commit_index();

        // > If last log index ≥ nextIndex for a follower: send
        // > AppendEntries RPC with log entries starting at nextIndex
        // Failures wait for the heartbeat instead, so an unreachable peer isn't retried in a loop.
        if !failed && last_log_index >= peer_next_index {
            self.send_append_entries(&reply.descriptor.peer_id);
        }
    }

    pub(crate) fn handle_leader_timer(&mut self, input: LeaderTimerTick) {
        let current_term = self.local_state.current_term();
        if input.term != current_term {
            slog::debug!(
                self.logger,
                "Leader timer for old term {:?}, we're in {:?}",
                input.term,
                current_term
            );
            return;
        }

        self.send_append_entries(&input.peer_id);
    }

    pub(crate) fn handle_follower_timeout(&mut self, tick: FollowerTimeoutTick) {
        // The timer may have fired just before a heartbeat reset it or a role change replaced it.
        if !self.election_state.is_current_election_timeout(&tick) {
            slog::debug!(
                self.logger,
                "Dropping stale election timeout {:?}. Election state: {:?}",
                tick,
                self.election_state
            );
            return;
        }

        // Write-ahead: the new term and our vote must be durable before we ask anyone for theirs.
        let new_term = match self.local_state.increment_term_and_vote_for_self() {
            Ok(term) => term,
            Err(e) => {
                slog::error!(self.logger, "Can't start election, failed to persist new term: {}", e);
                return;
            }
        };
        let num_votes = self.election_state.transition_to_candidate_and_vote_for_self();
        slog::info!(
            self.logger,
            "Election timeout. Standing for election in term {:?}. Election state: {:?}",
            new_term,
            self.election_state
        );

        if num_votes >= self.cluster_tracker.majority_count() {
            self.become_leader(new_term);
            return;
        }

        for peer_id in self.cluster_tracker.peer_ids() {
            self.spawn_request_vote(peer_id, new_term, None);
        }
    }

    /// Persist `term` if it's newer than ours and fall back to follower. Returns true if it was.
    fn observe_term(&mut self, term: Term, leader: Option<&ReplicaId>) -> Result<bool, PersistenceError> {
        let previous_term = self.local_state.current_term();
        if !self.local_state.store_term_if_increased(term)? {
            return Ok(false);
        }

        self.election_state.transition_to_follower(leader.cloned());
        slog::info!(
            self.logger,
            "Observed term {:?} (was {:?}). Election state: {:?}",
            term,
            previous_term,
            self.election_state
        );
        Ok(true)
    }

    /// A peer's reply carried a newer term. Step down whether or not we manage to persist it:
    /// no reply or vote depends on it, and the new leader's messages will carry it again.
    fn abdicate_for_term(&mut self, term: Term) {
        if let Err(e) = self.observe_term(term, None) {
            slog::error!(self.logger, "Failed to persist newer term {:?}: {}. Stepping down anyway.", term, e);
            self.election_state.transition_to_follower(None);
        }
    }

    fn become_leader(&mut self, term: Term) {
        let my_last_index = self.local_state.log().last_index();
        self.election_state
            .transition_to_leader(term, self.cluster_tracker.peer_ids(), my_last_index);
        slog::info!(self.logger, "Elected leader of term {:?}", term);
    }

    fn advance_leader_commit_index(&mut self) {
        let log = self.local_state.log();
        let majority_matched_index = match self.election_state.leader_state_mut() {
            Some(leader_state) => leader_state.majority_matched_index(log.last_index()),
            None => return,
        };

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        if self.commit_tracker.ratchet_fwd_commit_index_if_valid(
            majority_matched_index,
            self.local_state.current_term(),
            log,
        ) {
            self.commit_tracker.apply_all_committed_entries(log);
        }
    }

    /// Send the peer everything it's missing from its nextIndex onwards (or a heartbeat), unless
    /// there's already a request in flight to it.
    fn send_append_entries(&mut self, peer_id: &ReplicaId) {
        let current_term = self.local_state.current_term();
        let leader_commit = self.commit_tracker.commit_index();
        let log = self.local_state.log();

        let leader_state = match self.election_state.leader_state_mut() {
            Some(leader_state) => leader_state,
            None => return,
        };
        let peer_state = match leader_state.peer_state_mut(peer_id) {
            Some(peer_state) => peer_state,
            None => {
                slog::error!(self.logger, "Not tracking peer {:?}", peer_id);
                return;
            }
        };
        if peer_state.has_outstanding_request() {
            slog::trace!(self.logger, "Request to {:?} still in flight", peer_id);
            return;
        }

        let (next_index, prev_log_index) = peer_state.next_and_previous_log_index();
        let prev_log_term = match log.term_at(prev_log_index) {
            Some(term) => term,
            None => {
                slog::error!(
                    self.logger,
                    "Tracking {:?} at {:?}, past the end of our log {:?}",
                    peer_id,
                    next_index,
                    log.last_index()
                );
                return;
            }
        };
        let entries = log.entries_from(next_index, self.max_entries_per_append);

        let descriptor = AppendEntriesReplyFromPeerDescriptor {
            peer_id: peer_id.clone(),
            term: current_term,
            seq_no: peer_state.next_seq_no(),
            prev_log_index,
            num_entries: entries.len(),
        };
        peer_state.reset_heartbeat_timer();

        let request = AppendEntriesRequest {
            term: current_term,
            leader_id: self.my_replica_id.clone(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        };

        let transport = self.transport.clone();
        let callback = self.actor_client.clone();
        let rpc_timeout = self.rpc_timeout;
        tokio::spawn(async move {
            let result = with_rpc_timeout(rpc_timeout, transport.append_entries(&descriptor.peer_id, request)).await;
            let _ = callback
                .notify_append_entries_reply_from_peer(AppendEntriesReplyFromPeer { descriptor, result })
                .await;
        });
    }

    fn spawn_request_vote(&self, peer_id: ReplicaId, term: Term, delay: Option<Duration>) {
        let (last_log_term, last_log_index) = self.local_state.log().latest_entry();
        let request = RequestVoteRequest {
            term,
            candidate_id: self.my_replica_id.clone(),
            last_log_index,
            last_log_term,
        };

        let transport = self.transport.clone();
        let callback = self.actor_client.clone();
        let rpc_timeout = self.rpc_timeout;
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let result = with_rpc_timeout(rpc_timeout, transport.request_vote(&peer_id, request)).await;
            let _ = callback
                .notify_request_vote_reply_from_peer(RequestVoteReplyFromPeer { peer_id, term, result })
                .await;
        });
    }
}

async fn with_rpc_timeout<T>(
    rpc_timeout: Duration,
    call: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(rpc_timeout, call)
        .await
        .unwrap_or_else(|_elapsed| Err(TransportError::Timeout))
}
