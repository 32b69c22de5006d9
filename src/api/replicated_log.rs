use crate::actor::ActorClient;
use crate::api::types::RaftEntryId;
use crate::replica;
use bytes::Bytes;

/// ReplicatedLog is the replicated log for external application to append to.
pub struct ReplicatedLog {
    actor_client: ActorClient,
}

impl ReplicatedLog {
    pub(crate) fn new(actor_client: ActorClient) -> Self {
        ReplicatedLog { actor_client }
    }

    /// Append `command` to the leader's log and start replicating it. Returns once the entry is
    /// durable locally; it has not necessarily committed yet. Watch the commit stream for that.
    pub async fn submit_command(&self, command: impl Into<Bytes>) -> Result<SubmitCommandOutput, SubmitCommandError> {
        let replica_input = replica::EnqueueForReplicationInput { data: command.into() };

        self.actor_client
            .enqueue_for_replication(replica_input)
            .await
            .map(SubmitCommandOutput::from)
            .map_err(SubmitCommandError::from)
    }
}

#[derive(Debug)]
pub struct SubmitCommandOutput {
    pub entry_id: RaftEntryId,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitCommandError {
    /// Only the leader accepts commands. `leader_hint` is who we last heard from as leader, if
    /// anyone. None usually means an election is in progress; retry with backoff.
    #[error("Not leader. Last known leader: {leader_hint:?}")]
    NotLeader { leader_hint: Option<String> },

    #[error("Failed to persist log")]
    Persistence(#[source] replica::PersistenceError),

    // Replica logic runs on a background task. This error is returned if the task has exited.
    #[error("Replica task has exited")]
    ReplicaExited,
}

// ------- Conversions --------

impl From<replica::EnqueueForReplicationOutput> for SubmitCommandOutput {
    fn from(internal_output: replica::EnqueueForReplicationOutput) -> Self {
        SubmitCommandOutput {
            entry_id: RaftEntryId {
                term: internal_output.enqueued_term,
                index: internal_output.enqueued_index,
            },
        }
    }
}

impl From<replica::EnqueueForReplicationError> for SubmitCommandError {
    fn from(internal_error: replica::EnqueueForReplicationError) -> Self {
        match internal_error {
            replica::EnqueueForReplicationError::NotLeader(leader) => SubmitCommandError::NotLeader {
                leader_hint: leader.map(replica::ReplicaId::into_inner),
            },
            replica::EnqueueForReplicationError::Persistence(e) => SubmitCommandError::Persistence(e),
            replica::EnqueueForReplicationError::ActorExited => SubmitCommandError::ReplicaExited,
        }
    }
}
