use crate::actor::WeakActorClient;
use crate::replica::election::state_change_listener::{self, ElectionStateChangeNotifier};
use crate::replica::election::timers::{FollowerTimerHandle, LeaderTimerHandle};
use crate::replica::election::{ElectionStateChangeListener, ElectionStateSnapshot, LeaderStateTracker, PeerState};
use crate::replica::{FollowerTimeoutTick, Index, ReplicaId, Term};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

#[derive(Clone, Debug)]
pub(crate) struct ElectionConfig {
    pub(crate) my_replica_id: ReplicaId,
    pub(crate) leader_heartbeat_duration: Duration,
    pub(crate) follower_min_timeout: Duration,
    pub(crate) follower_max_timeout: Duration,
}

/// ElectionState holds what is specific to our current role, including the timers that drive it.
/// Changing role drops the old role's state and timers.
///
/// It decides "what" a role change entails. Knowing "when" to change (terms, logs, votes) is up to
/// the replica.
pub(crate) struct ElectionState {
    state: State,
    config: ElectionConfig,
    actor_client: WeakActorClient,
    notifier: ElectionStateChangeNotifier,
    next_timer_id: u64,
}

enum State {
    Leader(LeaderRole),
    Candidate(CandidateState),
    Follower(FollowerState),
}

struct LeaderRole {
    tracker: LeaderStateTracker,
}

struct CandidateState {
    votes_from: HashSet<ReplicaId>,
    election_timer: FollowerTimerHandle,
}

struct FollowerState {
    leader: Option<ReplicaId>,
    election_timer: FollowerTimerHandle,
}

impl ElectionState {
    /// Every replica starts out as a follower that doesn't know the leader.
    pub(crate) fn new_follower(
        config: ElectionConfig,
        actor_client: WeakActorClient,
    ) -> (Self, ElectionStateChangeListener) {
        let state = State::Follower(FollowerState {
            leader: None,
            election_timer: Self::spawn_election_timer(0, &config, &actor_client),
        });
        let (notifier, listener) = state_change_listener::new(snapshot_of(&state));

        (
            ElectionState {
                state,
                config,
                actor_client,
                notifier,
                next_timer_id: 1,
            },
            listener,
        )
    }

    pub(crate) fn transition_to_follower(&mut self, leader: Option<ReplicaId>) {
        let election_timer = self.new_election_timer();
        self.state = State::Follower(FollowerState { leader, election_timer });
        self.notify_new_state();
    }

    /// Return the number of votes we hold, which is just our own.
    pub(crate) fn transition_to_candidate_and_vote_for_self(&mut self) -> usize {
        let mut votes_from = HashSet::new();
        votes_from.insert(self.config.my_replica_id.clone());

        let election_timer = self.new_election_timer();
        self.state = State::Candidate(CandidateState {
            votes_from,
            election_timer,
        });
        self.notify_new_state();
        1
    }

    pub(crate) fn transition_to_leader(&mut self, term: Term, peer_ids: Vec<ReplicaId>, my_last_index: Index) {
        let peer_state: HashMap<ReplicaId, PeerState> = peer_ids
            .into_iter()
            .map(|peer_id| {
                let timer = LeaderTimerHandle::spawn_timer_task(
                    self.config.leader_heartbeat_duration,
                    self.actor_client.clone(),
                    peer_id.clone(),
                    term,
                );
                (peer_id, PeerState::new(timer, my_last_index))
            })
            .collect();

        self.state = State::Leader(LeaderRole {
            tracker: LeaderStateTracker::new(peer_state),
        });
        self.notify_new_state();
    }

    pub(crate) fn current_state(&self) -> ElectionStateSnapshot {
        snapshot_of(&self.state)
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(self.state, State::Leader(_))
    }

    pub(crate) fn is_candidate(&self) -> bool {
        matches!(self.state, State::Candidate(_))
    }

    /// Who we'd redirect a client to, if anyone.
    pub(crate) fn current_leader(&self) -> Option<ReplicaId> {
        match &self.state {
            State::Leader(_) => Some(self.config.my_replica_id.clone()),
            State::Candidate(_) => None,
            State::Follower(fs) => fs.leader.clone(),
        }
    }

    /// False for ticks from a timer we've since replaced or reset, and always false as leader.
    pub(crate) fn is_current_election_timeout(&self, tick: &FollowerTimeoutTick) -> bool {
        match &self.state {
            State::Leader(_) => false,
            State::Candidate(cs) => cs.election_timer.is_current(tick),
            State::Follower(fs) => fs.election_timer.is_current(tick),
        }
    }

    #[cfg(test)]
    pub(crate) fn election_timeout_tick(&self) -> Option<FollowerTimeoutTick> {
        match &self.state {
            State::Leader(_) => None,
            State::Candidate(cs) => Some(cs.election_timer.current_tick()),
            State::Follower(fs) => Some(fs.election_timer.current_tick()),
        }
    }

    pub(crate) fn reset_timeout_if_follower(&self) {
        if let State::Follower(fs) = &self.state {
            fs.election_timer.reset_timeout();
        }
    }

    pub(crate) fn set_leader_if_unknown(&mut self, leader: &ReplicaId) {
        if let State::Follower(fs) = &mut self.state {
            if fs.leader.is_none() {
                fs.leader = Some(leader.clone());
                self.notify_new_state();
            }
        }
    }

    /// Return number of votes received if candidate, or None if no longer Candidate.
    pub(crate) fn add_vote_if_candidate(&mut self, vote_from: ReplicaId) -> Option<usize> {
        match &mut self.state {
            State::Candidate(cs) => {
                cs.votes_from.insert(vote_from);
                Some(cs.votes_from.len())
            }
            _ => None,
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderStateTracker> {
        match &mut self.state {
            State::Leader(ls) => Some(&mut ls.tracker),
            _ => None,
        }
    }

    fn notify_new_state(&self) {
        self.notifier.notify_new_state(snapshot_of(&self.state));
    }

    fn new_election_timer(&mut self) -> FollowerTimerHandle {
        let timer_id = self.next_timer_id;
        self.next_timer_id += 1;
        Self::spawn_election_timer(timer_id, &self.config, &self.actor_client)
    }

    fn spawn_election_timer(
        timer_id: u64,
        config: &ElectionConfig,
        actor_client: &WeakActorClient,
    ) -> FollowerTimerHandle {
        FollowerTimerHandle::spawn_timer_task(
            timer_id,
            config.follower_min_timeout,
            config.follower_max_timeout,
            actor_client.clone(),
        )
    }
}

fn snapshot_of(state: &State) -> ElectionStateSnapshot {
    match state {
        State::Leader(_) => ElectionStateSnapshot::Leader,
        State::Candidate(_) => ElectionStateSnapshot::Candidate,
        State::Follower(FollowerState { leader: Some(id), .. }) => ElectionStateSnapshot::Follower(id.clone()),
        State::Follower(FollowerState { leader: None, .. }) => ElectionStateSnapshot::FollowerNoLeader,
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader"),
            State::Candidate(cs) => write!(f, "Candidate(votes={})", cs.votes_from.len()),
            State::Follower(FollowerState { leader: Some(id), .. }) => write!(f, "Follower(Leader={:?})", id),
            State::Follower(FollowerState { leader: None, .. }) => write!(f, "Follower(Leader=None)"),
        }
    }
}
