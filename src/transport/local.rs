use crate::replica::{AppendEntriesReply, AppendEntriesRequest, ReplicaId, RequestVoteReply, RequestVoteRequest};
use crate::server::RpcServer;
use crate::transport::{PeerTransport, TransportError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// LocalNetwork connects replicas living in the same process. Messages are handed straight to
/// the target's `RpcServer`, no encoding involved.
///
/// Any replica can be cut off with `isolate()`: calls to or from it fail with `Unreachable`
/// until `heal()`. Clones share the same network.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Mutex<Routes>>,
}

#[derive(Default)]
struct Routes {
    servers: HashMap<ReplicaId, RpcServer>,
    isolated: HashSet<ReplicaId>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route calls for `replica_id` to `server`, replacing whatever was registered before (e.g.
    /// across a restart).
    pub fn register(&self, replica_id: ReplicaId, server: RpcServer) {
        self.routes().servers.insert(replica_id, server);
    }

    pub fn deregister(&self, replica_id: &ReplicaId) {
        self.routes().servers.remove(replica_id);
    }

    pub fn isolate(&self, replica_id: &ReplicaId) {
        self.routes().isolated.insert(replica_id.clone());
    }

    pub fn heal(&self, replica_id: &ReplicaId) {
        self.routes().isolated.remove(replica_id);
    }

    /// Outbound transport for `replica_id` to hand to `try_create_raft_client()`.
    pub fn transport_for(&self, replica_id: ReplicaId) -> LocalTransport {
        LocalTransport {
            network: self.clone(),
            my_replica_id: replica_id,
        }
    }

    fn route(&self, from: &ReplicaId, to: &ReplicaId) -> Result<RpcServer, TransportError> {
        let routes = self.routes();
        if routes.isolated.contains(from) || routes.isolated.contains(to) {
            return Err(TransportError::Unreachable(to.clone()));
        }
        routes
            .servers
            .get(to)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(to.clone()))
    }

    fn is_connected(&self, from: &ReplicaId, to: &ReplicaId) -> bool {
        let routes = self.routes();
        !routes.isolated.contains(from) && !routes.isolated.contains(to)
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        // Routing table stays consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// LocalTransport is one replica's outbound view of a `LocalNetwork`.
#[derive(Clone)]
pub struct LocalTransport {
    network: LocalNetwork,
    my_replica_id: ReplicaId,
}

impl LocalTransport {
    // A reply sent back across a partition that formed mid-call is lost too.
    fn deliver_reply<T>(&self, peer: &ReplicaId, reply: T) -> Result<T, TransportError> {
        if self.network.is_connected(&self.my_replica_id, peer) {
            Ok(reply)
        } else {
            Err(TransportError::Unreachable(peer.clone()))
        }
    }
}

#[async_trait::async_trait]
impl PeerTransport for LocalTransport {
    async fn append_entries(
        &self,
        peer: &ReplicaId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesReply, TransportError> {
        let server = self.network.route(&self.my_replica_id, peer)?;
        let reply = server
            .append_entries(request)
            .await
            .map_err(|e| TransportError::Remote(e.to_string()))?;
        self.deliver_reply(peer, reply)
    }

    async fn request_vote(&self, peer: &ReplicaId, request: RequestVoteRequest) -> Result<RequestVoteReply, TransportError> {
        let server = self.network.route(&self.my_replica_id, peer)?;
        let reply = server
            .request_vote(request)
            .await
            .map_err(|e| TransportError::Remote(e.to_string()))?;
        self.deliver_reply(peer, reply)
    }
}
