use crate::actor::WeakActorClient;
use crate::replica::election::timers::clock::{Clock, RealClock};
use crate::replica::election::timers::signal::{self, Cancelled, NextWake, TaskGuard};
use crate::replica::FollowerTimeoutTick;
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// ElectionTimeout picks a fresh random timeout from the configured range each time it is armed,
/// so that replicas which lost contact with the leader together don't all stand for election
/// together.
#[derive(Clone, Debug)]
struct ElectionTimeout {
    range: RangeInclusive<Duration>,
}

impl ElectionTimeout {
    fn deadline_from(&self, now: Instant) -> Instant {
        now + rand::thread_rng().gen_range(self.range.clone())
    }
}

/// Held by followers and candidates. Dropping it stops the timer task.
///
/// Every reset bumps `epoch`, and each timeout the task sends is stamped with the timer's id and
/// the epoch it saw. A timeout is only genuine if neither has changed by the time the actor
/// handles it; otherwise a heartbeat or a role change got there first.
pub(crate) struct FollowerTimerHandle<C: Clock = RealClock> {
    timer_id: u64,
    epoch: Arc<AtomicU64>,
    next_wake: NextWake,
    timeout: ElectionTimeout,
    clock: C,
    _guard: TaskGuard,
}

struct FollowerTimerTask<C: Clock> {
    timer_id: u64,
    epoch: Arc<AtomicU64>,
    next_wake: NextWake,
    timeout: ElectionTimeout,
    clock: C,
    cancelled: Cancelled,
    actor_client: WeakActorClient,
}

impl FollowerTimerHandle {
    pub(crate) fn spawn_timer_task(
        timer_id: u64,
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: WeakActorClient,
    ) -> Self {
        let (task, handle) = new_timer(timer_id, min_timeout, max_timeout, actor_client, RealClock);
        tokio::spawn(task.run());
        handle
    }
}

impl<C: Clock> FollowerTimerHandle<C> {
    /// Push the election deadline out by a new random timeout. Called whenever we hear from the
    /// leader or grant a vote.
    pub(crate) fn reset_timeout(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.next_wake.push(self.timeout.deadline_from(self.clock.now()));
    }

    /// True if `tick` came from this timer and nothing reset it since.
    pub(crate) fn is_current(&self, tick: &FollowerTimeoutTick) -> bool {
        tick.timer_id == self.timer_id && tick.epoch == self.epoch.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn current_tick(&self) -> FollowerTimeoutTick {
        FollowerTimeoutTick {
            timer_id: self.timer_id,
            epoch: self.epoch.load(Ordering::Acquire),
        }
    }
}

fn new_timer<C: Clock>(
    timer_id: u64,
    min_timeout: Duration,
    max_timeout: Duration,
    actor_client: WeakActorClient,
    clock: C,
) -> (FollowerTimerTask<C>, FollowerTimerHandle<C>) {
    let next_wake = NextWake::default();
    let timeout = ElectionTimeout {
        range: min_timeout..=max_timeout,
    };
    let epoch = Arc::new(AtomicU64::new(0));
    let (guard, cancelled) = signal::task_guard();

    let handle = FollowerTimerHandle {
        timer_id,
        epoch: epoch.clone(),
        next_wake: next_wake.clone(),
        timeout: timeout.clone(),
        clock: clock.clone(),
        _guard: guard,
    };
    // Arm before the task starts, otherwise its first take() would see an expired timer.
    handle.reset_timeout();

    let task = FollowerTimerTask {
        timer_id,
        epoch,
        next_wake,
        timeout,
        clock,
        cancelled,
        actor_client,
    };

    (task, handle)
}

impl<C: Clock> FollowerTimerTask<C> {
    async fn run(mut self) {
        loop {
            // Read before take() so a reset racing with us makes the tick stale.
            let epoch = self.epoch.load(Ordering::Acquire);
            match self.next_wake.take() {
                Some(deadline) => self.clock.sleep_until(deadline).await,
                None => {
                    // Slept through the whole timeout without a reset.
                    if self.cancelled.is_set() {
                        return;
                    }
                    let tick = FollowerTimeoutTick {
                        timer_id: self.timer_id,
                        epoch,
                    };
                    if self.actor_client.follower_timeout(tick).await.is_err() {
                        return;
                    }
                    // Usually the actor replaces this timer right away. If it couldn't start an
                    // election (e.g. storage failure) we fire again after another timeout.
                    self.next_wake.push(self.timeout.deadline_from(self.clock.now()));
                }
            }

            if self.cancelled.is_set() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::election::timers::clock::mock_clock;
    use crate::replica::election::timers::test_utils::TestUtilActor;

    // min == max throughout: jitter isn't what's under test.
    const TIMEOUT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn fires_only_after_a_full_timeout_without_reset() {
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut controller) = mock_clock();

        let (task, handle) = new_timer(7, TIMEOUT, TIMEOUT, actor_client.weak(), clock);
        tokio::spawn(task.run());
        actor.assert_no_event().await;

        for _ in 0..4 {
            controller.advance(TIMEOUT / 2);
            handle.reset_timeout();
        }
        actor.assert_no_event().await;
        assert_eq!(controller.elapsed(), TIMEOUT * 2);

        // Last reset was at T=2.0, so the deadline is T=3.0.
        controller.advance(TIMEOUT - Duration::from_nanos(1));
        actor.assert_no_event().await;

        controller.advance(Duration::from_nanos(1));
        actor.assert_follower_timeout_event().await;
    }

    #[tokio::test]
    async fn keeps_firing_while_nobody_resets() {
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut controller) = mock_clock();

        let (task, _handle) = new_timer(7, TIMEOUT, TIMEOUT, actor_client.weak(), clock);
        tokio::spawn(task.run());

        controller.advance(TIMEOUT);
        actor.assert_follower_timeout_event().await;

        controller.advance(TIMEOUT);
        actor.assert_follower_timeout_event().await;
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn dropping_handle_stops_task() {
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut controller) = mock_clock();

        let (task, handle) = new_timer(7, TIMEOUT, TIMEOUT, actor_client.weak(), clock);
        let join_handle = tokio::spawn(task.run());
        drop(handle);

        controller.advance(TIMEOUT * 2);
        join_handle.await.unwrap();
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn reset_after_timeout_rearms_the_timer() {
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut controller) = mock_clock();

        let (task, handle) = new_timer(7, TIMEOUT, TIMEOUT, actor_client.weak(), clock);
        tokio::spawn(task.run());

        // An AppendEntries can already be queued behind the timeout we just fired.
        controller.advance(TIMEOUT);
        let tick = actor.assert_follower_timeout_event().await;
        assert!(handle.is_current(&tick));
        handle.reset_timeout();
        assert!(!handle.is_current(&tick));

        for _ in 0..5 {
            controller.advance(TIMEOUT / 2);
            handle.reset_timeout();
        }
        actor.assert_no_event().await;
    }

    #[tokio::test]
    async fn ticks_carry_timer_id_and_reset_epoch() {
        let (actor_client, rx) = ActorClient::new(10);
        let mut actor = TestUtilActor::new(rx);
        let (clock, mut controller) = mock_clock();

        let (task, handle) = new_timer(7, TIMEOUT, TIMEOUT, actor_client.weak(), clock.clone());
        tokio::spawn(task.run());
        let (_other_task, other_handle) = new_timer(8, TIMEOUT, TIMEOUT, actor_client.weak(), clock);

        controller.advance(TIMEOUT);
        let first = actor.assert_follower_timeout_event().await;
        assert_eq!(first.timer_id, 7);
        assert!(!other_handle.is_current(&first));

        // Nobody reset in between, so the second firing is just as current as the first.
        controller.advance(TIMEOUT);
        let second = actor.assert_follower_timeout_event().await;
        assert_eq!(first, second);
        assert!(handle.is_current(&second));
    }

    #[tokio::test]
    async fn task_exits_when_actor_is_gone() {
        let (actor_client, rx) = ActorClient::new(10);
        let (clock, mut controller) = mock_clock();

        let (task, _handle) = new_timer(7, TIMEOUT, TIMEOUT, actor_client.weak(), clock);
        let join_handle = tokio::spawn(task.run());
        drop(rx);
        drop(actor_client);

        controller.advance(TIMEOUT);
        join_handle.await.unwrap();
    }
}
