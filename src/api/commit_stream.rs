use crate::api::types::RaftEntryId;
use crate::replica::CommitStream;
use bytes::Bytes;
use tokio::task::JoinHandle;

/// RaftCommitStream delivers committed entries to the application in log order, each exactly
/// once. Apply them to your state machine as they arrive.
pub struct RaftCommitStream {
    commit_stream: CommitStream,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RaftCommittedEntry {
    pub entry_id: RaftEntryId,
    pub command: Bytes,
}

impl RaftCommitStream {
    pub(crate) fn new(commit_stream: CommitStream) -> Self {
        RaftCommitStream { commit_stream }
    }

    /// `next()` returns the next committed entry. None once the replica has shut down and every
    /// entry committed before that has been handed out.
    pub async fn next(&mut self) -> Option<RaftCommittedEntry> {
        self.commit_stream.recv().await.map(|entry| RaftCommittedEntry {
            entry_id: RaftEntryId {
                term: entry.term,
                index: entry.index,
            },
            command: entry.command,
        })
    }

    /// Hand every committed entry to `on_commit` from a background task, until the replica shuts
    /// down.
    pub fn on_commit<F>(mut self, mut on_commit: F) -> JoinHandle<()>
    where
        F: FnMut(RaftCommittedEntry) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(entry) = self.next().await {
                on_commit(entry);
            }
        })
    }
}
