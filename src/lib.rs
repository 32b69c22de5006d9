mod actor;
mod api;
mod replica;
mod server;
mod transport;

pub use api::file_logger;
pub use api::terminal_logger;
pub use api::try_create_raft_client;
pub use api::RaftClient;
pub use api::RaftClientConfig;
pub use api::RaftClientCreationError;
pub use api::RaftCommitStream;
pub use api::RaftCommittedEntry;
pub use api::RaftElectionState;
pub use api::RaftEntryId;
pub use api::RaftEvent;
pub use api::RaftEventListener;
pub use api::RaftOptions;
pub use api::ReplicatedLog;
pub use api::SubmitCommandError;
pub use api::SubmitCommandOutput;
pub use replica::AppendEntriesError;
pub use replica::AppendEntriesReply;
pub use replica::AppendEntriesRequest;
pub use replica::DurableState;
pub use replica::InMemoryStorage;
pub use replica::Index;
pub use replica::LogEntry;
pub use replica::PersistenceError;
pub use replica::ReplicaId;
pub use replica::RequestVoteError;
pub use replica::RequestVoteReply;
pub use replica::RequestVoteRequest;
pub use replica::Storage;
pub use replica::Term;
pub use server::RpcServer;
pub use transport::LocalNetwork;
pub use transport::LocalTransport;
pub use transport::PeerTransport;
pub use transport::TransportError;

// `crate::{root_mod}` holds no code, just `mod` and `pub use` statements. No `mod` is `pub`;
// everything exported goes through an individual `pub use`.
