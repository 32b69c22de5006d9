//! This mod is meant to hold most of the code for the library's client-facing API.
mod client;
mod commit_stream;
mod event_bus;
mod logging;
mod options;
mod replicated_log;
mod types;
mod wiring;

pub use client::RaftClient;
pub use commit_stream::RaftCommitStream;
pub use commit_stream::RaftCommittedEntry;
pub use event_bus::RaftElectionState;
pub use event_bus::RaftEvent;
pub use event_bus::RaftEventListener;
pub use logging::file_logger;
pub use logging::terminal_logger;
pub use options::RaftOptions;
pub use replicated_log::ReplicatedLog;
pub use replicated_log::SubmitCommandError;
pub use replicated_log::SubmitCommandOutput;
pub use types::RaftEntryId;
pub use wiring::try_create_raft_client;
pub use wiring::RaftClientConfig;
pub use wiring::RaftClientCreationError;
