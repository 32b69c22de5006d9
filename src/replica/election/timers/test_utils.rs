use crate::actor::Event;
use crate::replica::{FollowerTimeoutTick, LeaderTimerTick};
use std::time::Duration;
use tokio::sync::mpsc;

/// Stands in for the replica actor: reads its queue and asserts on what timer tasks sent.
pub(super) struct TestUtilActor {
    rx: mpsc::Receiver<Event>,
    quiet_period: Duration,
}

impl TestUtilActor {
    pub(super) fn new(rx: mpsc::Receiver<Event>) -> Self {
        TestUtilActor {
            rx,
            quiet_period: Duration::from_millis(10),
        }
    }

    async fn recv(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("queue closed")
    }

    pub(super) async fn assert_leader_timer_event(&mut self, expected: LeaderTimerTick) {
        match self.recv().await {
            Event::LeaderTimer(tick) => assert_eq!(tick, expected),
            other => panic!("Expected LeaderTimer, got {:?}", other),
        }
    }

    pub(super) async fn assert_follower_timeout_event(&mut self) -> FollowerTimeoutTick {
        match self.recv().await {
            Event::FollowerTimeout(tick) => tick,
            other => panic!("Expected FollowerTimeout, got {:?}", other),
        }
    }

    pub(super) async fn assert_no_event(&mut self) {
        if let Ok(event) = tokio::time::timeout(self.quiet_period, self.rx.recv()).await {
            panic!("Expected no event, got {:?}", event);
        }
    }
}
