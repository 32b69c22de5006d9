use chrono::Utc;
use slog::Drain;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// Root logger that writes to the terminal, tagged with `replica_id`.
pub fn terminal_logger(replica_id: &str) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("ReplicaId" => replica_id.to_string()))
}

/// Root logger that writes to a fresh timestamped file under `{directory}/info_log_{replica_id}/`.
pub fn file_logger(directory: impl AsRef<Path>, replica_id: &str) -> io::Result<slog::Logger> {
    let log_directory = directory.as_ref().join(format!("info_log_{}", replica_id));
    fs::create_dir_all(&log_directory)?;

    let now = Utc::now().format("%Y-%m-%dT%H-%M-%SZ");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_directory.join(format!("{}_info.log", now)))?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Ok(slog::Logger::root(drain, slog::o!("ReplicaId" => replica_id.to_string())))
}
