use crate::replica::ReplicaId;
use tokio::sync::watch;

/// What role this replica currently holds, and who it believes is leader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElectionStateSnapshot {
    Leader,
    Candidate,
    Follower(ReplicaId),
    FollowerNoLeader,
}

pub(super) fn new(initial_state: ElectionStateSnapshot) -> (ElectionStateChangeNotifier, ElectionStateChangeListener) {
    let (tx, rx) = watch::channel(initial_state);
    (ElectionStateChangeNotifier { tx }, ElectionStateChangeListener { rx })
}

pub(super) struct ElectionStateChangeNotifier {
    tx: watch::Sender<ElectionStateSnapshot>,
}

impl ElectionStateChangeNotifier {
    pub(super) fn notify_new_state(&self, new_state: ElectionStateSnapshot) {
        // No listeners is fine.
        let _ = self.tx.send(new_state);
    }
}

/// Observes role changes. Only the latest state is kept, so a slow listener sees the most recent
/// role rather than every intermediate one.
#[derive(Clone)]
pub(crate) struct ElectionStateChangeListener {
    rx: watch::Receiver<ElectionStateSnapshot>,
}

impl ElectionStateChangeListener {
    /// Wait for the next change. None once the replica has shut down.
    pub(crate) async fn next(&mut self) -> Option<ElectionStateSnapshot> {
        match self.rx.changed().await {
            Ok(()) => Some(self.rx.borrow().clone()),
            Err(_) => None,
        }
    }

    pub(crate) fn current(&self) -> ElectionStateSnapshot {
        self.rx.borrow().clone()
    }
}
