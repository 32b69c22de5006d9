use crate::api::commit_stream::RaftCommitStream;
use crate::api::event_bus::RaftEventListener;
use crate::api::replicated_log::ReplicatedLog;
use crate::server::RpcServer;

/// RaftClient is everything the application needs to drive one local replica.
///
/// The replica runs on a background task that lives until `replicated_log` is dropped.
pub struct RaftClient {
    pub replicated_log: ReplicatedLog,
    pub commit_stream: RaftCommitStream,
    pub event_listener: RaftEventListener,
    pub(crate) rpc_server: RpcServer,
}

impl RaftClient {
    /// Inbound side of the replica. Hand it to whatever receives RPCs from peers (e.g.
    /// `LocalNetwork::register()`).
    pub fn rpc_server(&self) -> RpcServer {
        self.rpc_server.clone()
    }
}
