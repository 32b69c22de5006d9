use std::convert::TryFrom;
use tokio::time::Duration;

/// Tuning knobs for a replica. Anything left `None` gets a default that suits a LAN.
#[derive(Clone, Debug, Default)]
pub struct RaftOptions {
    pub leader_heartbeat_duration: Option<Duration>,
    pub follower_min_timeout: Option<Duration>,
    pub follower_max_timeout: Option<Duration>,
    /// Bound on a single outbound RPC. Failed calls are retried regardless.
    pub rpc_timeout: Option<Duration>,
    /// Most entries sent in one AppendEntries.
    pub max_entries_per_append: Option<usize>,
    pub actor_queue_size: Option<usize>,
}

#[derive(Clone, Debug)]
pub(super) struct RaftOptionsValidated {
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
    pub rpc_timeout: Duration,
    pub max_entries_per_append: usize,
    pub actor_queue_size: usize,
}

impl RaftOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.leader_heartbeat_duration >= self.follower_min_timeout {
            return Err("Follower minimum timeout must be greater than leader's heartbeat");
        }
        if self.follower_min_timeout >= self.follower_max_timeout {
            return Err("Follower minimum timeout must be less than maximum timeout");
        }
        if self.rpc_timeout >= self.follower_min_timeout {
            return Err("RPC timeout must be less than the follower's minimum timeout");
        }
        if self.max_entries_per_append == 0 {
            return Err("Must be able to send at least one entry per AppendEntries");
        }
        if self.actor_queue_size == 0 {
            return Err("Actor queue size must be non-zero");
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let values = RaftOptionsValidated {
            leader_heartbeat_duration: options
                .leader_heartbeat_duration
                .unwrap_or(Duration::from_millis(100)),
            follower_min_timeout: options.follower_min_timeout.unwrap_or(Duration::from_millis(500)),
            follower_max_timeout: options.follower_max_timeout.unwrap_or(Duration::from_millis(1500)),
            rpc_timeout: options.rpc_timeout.unwrap_or(Duration::from_millis(300)),
            max_entries_per_append: options.max_entries_per_append.unwrap_or(64),
            actor_queue_size: options.actor_queue_size.unwrap_or(64),
        };

        values.validate()?;
        Ok(values)
    }
}
