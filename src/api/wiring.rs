use crate::actor::{ActorClient, ReplicaActor};
use crate::api::client::RaftClient;
use crate::api::commit_stream::RaftCommitStream;
use crate::api::event_bus::RaftEventListener;
use crate::api::options::{RaftOptions, RaftOptionsValidated};
use crate::api::replicated_log::ReplicatedLog;
use crate::replica::{self, ClusterTracker, PersistenceError, PersistentLocalState, Replica, ReplicaConfig, ReplicaId};
use crate::server::RpcServer;
use crate::transport::PeerTransport;
use std::convert::TryFrom;
use std::sync::Arc;

pub struct RaftClientConfig {
    pub my_replica_id: String,
    /// Every voting member, including `my_replica_id`. Must be identical on all replicas.
    pub cluster_members: Vec<String>,
    pub info_logger: slog::Logger,
    pub options: RaftOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum RaftClientCreationError {
    #[error("Invalid cluster info: {0}")]
    InvalidClusterInfo(String),
    #[error("Illegal options for configuring client: {0}")]
    IllegalClientOptions(String),
    #[error("Failed to load persisted state")]
    StateLoad(#[source] PersistenceError),
}

/// Start a replica on a background task and return the client for driving it.
///
/// `transport` carries this replica's outbound RPCs. `storage` is loaded once here, and every
/// later change to term, vote or log is saved through it before it takes effect.
pub async fn try_create_raft_client(
    config: RaftClientConfig,
    transport: Arc<dyn PeerTransport>,
    storage: Box<dyn replica::Storage>,
) -> Result<RaftClient, RaftClientCreationError> {
    let options = RaftOptionsValidated::try_from(config.options)
        .map_err(|e| RaftClientCreationError::IllegalClientOptions(e.to_string()))?;

    let my_replica_id = ReplicaId::new(config.my_replica_id);
    let cluster_members = config.cluster_members.into_iter().map(ReplicaId::new).collect();
    let cluster_tracker = ClusterTracker::create_valid_cluster(my_replica_id.clone(), cluster_members)
        .map_err(|e| RaftClientCreationError::InvalidClusterInfo(e.to_string()))?;

    let root_logger = config
        .info_logger
        .new(slog::o!("ReplicaId" => my_replica_id.to_string()));

    let local_state = PersistentLocalState::load(root_logger.clone(), my_replica_id, storage)
        .map_err(RaftClientCreationError::StateLoad)?;

    let (commit_stream_publisher, commit_stream) = replica::commit_stream::new();
    let (actor_client, actor_queue_rx) = ActorClient::new(options.actor_queue_size);

    let (replica, election_state_change_listener) = Replica::new(ReplicaConfig {
        logger: root_logger.clone(),
        cluster_tracker,
        local_state,
        commit_stream_publisher,
        transport,
        actor_client: actor_client.weak(),
        leader_heartbeat_duration: options.leader_heartbeat_duration,
        follower_min_timeout: options.follower_min_timeout,
        follower_max_timeout: options.follower_max_timeout,
        rpc_timeout: options.rpc_timeout,
        max_entries_per_append: options.max_entries_per_append,
    });

    let replica_actor = ReplicaActor::new(root_logger.clone(), actor_queue_rx, replica);
    tokio::spawn(replica_actor.run_event_loop());

    let rpc_server = RpcServer::new(root_logger, actor_client.weak());

    Ok(RaftClient {
        replicated_log: ReplicatedLog::new(actor_client),
        commit_stream: RaftCommitStream::new(commit_stream),
        event_listener: RaftEventListener::new(election_state_change_listener),
        rpc_server,
    })
}
