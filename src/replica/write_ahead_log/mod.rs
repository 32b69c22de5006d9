pub(crate) mod commit_stream;
mod commit_tracker;
mod log;
mod log_entry;

pub use self::log::Index;
pub(crate) use self::log::Log;
pub(crate) use self::log::LogError;
pub(crate) use commit_stream::CommitStream;
pub(crate) use commit_tracker::CommitTracker;
pub use log_entry::LogEntry;
