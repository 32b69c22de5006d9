use crate::actor::WeakActorClient;
use crate::replica::election::timers::clock::{Clock, RealClock};
use crate::replica::election::timers::signal::{self, Cancelled, NextWake, TaskGuard};
use crate::replica::{LeaderTimerTick, ReplicaId, Term};
use tokio::time::Duration;

/// One per peer while we are leader. The task ticks the actor whenever `heartbeat_duration`
/// passes without us having sent that peer anything, and once immediately on spawn so a new
/// leader announces itself straight away.
pub(crate) struct LeaderTimerHandle<C: Clock = RealClock> {
    next_wake: NextWake,
    heartbeat_duration: Duration,
    clock: C,
    _guard: TaskGuard,
}

struct LeaderTimerTask<C: Clock> {
    next_wake: NextWake,
    heartbeat_duration: Duration,
    clock: C,
    cancelled: Cancelled,
    actor_client: WeakActorClient,
    tick: LeaderTimerTick,
}

impl LeaderTimerHandle {
    pub(crate) fn spawn_timer_task(
        heartbeat_duration: Duration,
        actor_client: WeakActorClient,
        peer_id: ReplicaId,
        term: Term,
    ) -> Self {
        let (task, handle) = new_timer(heartbeat_duration, actor_client, peer_id, term, RealClock);
        tokio::spawn(task.run());
        handle
    }
}

impl<C: Clock> LeaderTimerHandle<C> {
    /// We just sent this peer an AppendEntries, so the next heartbeat isn't due for a while.
    pub(crate) fn reset_heartbeat_timer(&self) {
        self.next_wake.push(self.clock.now() + self.heartbeat_duration);
    }
}

fn new_timer<C: Clock>(
    heartbeat_duration: Duration,
    actor_client: WeakActorClient,
    peer_id: ReplicaId,
    term: Term,
    clock: C,
) -> (LeaderTimerTask<C>, LeaderTimerHandle<C>) {
    let next_wake = NextWake::default();
    let (guard, cancelled) = signal::task_guard();

    // Not armed: the task's first take() comes back empty and it ticks at once.
    let handle = LeaderTimerHandle {
        next_wake: next_wake.clone(),
        heartbeat_duration,
        clock: clock.clone(),
        _guard: guard,
    };
    let task = LeaderTimerTask {
        next_wake,
        heartbeat_duration,
        clock,
        cancelled,
        actor_client,
        tick: LeaderTimerTick { peer_id, term },
    };

    (task, handle)
}

impl<C: Clock> LeaderTimerTask<C> {
    async fn run(mut self) {
        loop {
            if self.cancelled.is_set() {
                return;
            }

            match self.next_wake.take() {
                Some(deadline) => self.clock.sleep_until(deadline).await,
                None => {
                    if self.actor_client.leader_timer(self.tick.clone()).await.is_err() {
                        return;
                    }
                    // The actor usually resets us while handling the tick, but don't rely on it.
                    self.next_wake.push(self.clock.now() + self.heartbeat_duration);
                }
            }
        }
    }
}
