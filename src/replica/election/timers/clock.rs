#[cfg(test)]
use tokio::sync::watch;
#[cfg(test)]
use tokio::time::Duration;
use tokio::time::Instant;

/// Clock is the only way timer tasks observe time, so tests can drive them without sleeping.
#[async_trait::async_trait]
pub(crate) trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;

    async fn sleep_until(&mut self, deadline: Instant);
}

#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// MockClock only moves when its paired `MockClockController` advances it.
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MockClock {
    now: watch::Receiver<Instant>,
}

#[cfg(test)]
pub(crate) struct MockClockController {
    now: watch::Sender<Instant>,
    started_at: Instant,
}

#[cfg(test)]
pub(crate) fn mock_clock() -> (MockClock, MockClockController) {
    let started_at = Instant::now();
    let (tx, rx) = watch::channel(started_at);

    (MockClock { now: rx }, MockClockController { now: tx, started_at })
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.now.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        loop {
            let now = *self.now.borrow();
            if now >= deadline {
                return;
            }
            if self.now.changed().await.is_err() {
                // Controller is gone, time will never move again.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
impl MockClockController {
    pub(crate) fn now(&self) -> Instant {
        *self.now.borrow()
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.now() - self.started_at
    }

    /// Sleepers wake once `now` is at or past their deadline, however far past that is. Advance
    /// in steps no bigger than the granularity the test wants to observe.
    pub(crate) fn advance(&mut self, duration: Duration) {
        let next = self.now() + duration;
        // Ok if nobody is listening.
        let _ = self.now.send(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn mock_clock_wakes_sleepers_only_when_advanced() {
        let tick = Duration::from_millis(200);
        let (mut clock, mut controller) = mock_clock();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let start = controller.now();
        tokio::spawn(async move {
            let mut deadline = start;
            loop {
                deadline += tick;
                clock.sleep_until(deadline).await;
                if tx.send(()).is_err() {
                    return;
                }
            }
        });

        // Half a tick in, nothing is due.
        controller.advance(tick / 2);
        assert!(tokio::time::timeout(tick, rx.recv()).await.is_err());

        controller.advance(tick);
        rx.recv().await.unwrap();
        assert!(tokio::time::timeout(tick, rx.recv()).await.is_err());

        // A big jump releases every deadline it passed, one at a time.
        controller.advance(tick * 2);
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert!(tokio::time::timeout(tick, rx.recv()).await.is_err());

        assert_eq!(controller.elapsed(), tick * 7 / 2);
    }
}
