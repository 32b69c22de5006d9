use crate::replica::write_ahead_log::LogEntry;
use tokio::sync::mpsc;

pub(crate) struct CommitStreamPublisher {
    sender: mpsc::UnboundedSender<LogEntry>,
}

pub(crate) struct CommitStream {
    receiver: mpsc::UnboundedReceiver<LogEntry>,
}

pub(crate) fn new() -> (CommitStreamPublisher, CommitStream) {
    let (tx, rx) = mpsc::unbounded_channel();

    let applier_sender = CommitStreamPublisher { sender: tx };
    let applier_receiver = CommitStream { receiver: rx };

    (applier_sender, applier_receiver)
}

impl CommitStreamPublisher {
    pub(crate) fn notify_commit(&self, logger: &slog::Logger, entry: LogEntry) {
        if self.sender.send(entry).is_err() {
            slog::warn!(logger, "CommitStream has disconnected.");
        }
    }
}

impl CommitStream {
    pub(crate) async fn recv(&mut self) -> Option<LogEntry> {
        self.receiver.recv().await
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<LogEntry> {
        self.receiver.try_recv().ok()
    }
}
