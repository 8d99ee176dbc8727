use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

pub type Sender<T> = mpsc::Sender<T>;
pub type Receiver<T> = mpsc::Receiver<T>;

/// Create a bounded channel with the specified buffer size
pub fn create_channel<T>(buffer_size: usize) -> (Sender<T>, Receiver<T>) {
    mpsc::channel(buffer_size.max(1))
}

/// The process-wide stop flag together with the stop flag of one stream.
#[derive(Debug, Clone, Default)]
pub struct ExitSignal {
    stop: CancellationToken,
    group_stop: CancellationToken,
}

impl ExitSignal {
    pub fn new(stop: CancellationToken, group_stop: CancellationToken) -> Self {
        Self { stop, group_stop }
    }

    /// A signal whose group is never stopped on its own.
    pub fn standalone(stop: CancellationToken) -> Self {
        Self::new(stop, CancellationToken::new())
    }

    pub fn stop(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn group_stop(&self) -> &CancellationToken {
        &self.group_stop
    }

    pub fn exit_needed(&self) -> bool {
        self.stop.is_cancelled() || self.group_stop.is_cancelled()
    }

    /// Sleep for `duration` or until an exit is requested, whichever is first.
    pub async fn wait(&self, duration: Duration) {
        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = self.group_stop.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

/// Put `item` on a bounded queue, retrying every `poll` while the queue is
/// full. Returns `false` if the item was not delivered because an exit was
/// requested or the receiver is gone.
pub async fn send_until_exit<T>(
    tx: &Sender<T>,
    mut item: T,
    poll: Duration,
    signal: &ExitSignal,
) -> bool {
    loop {
        match tx.send_timeout(item, poll).await {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if signal.exit_needed() {
                    return false;
                }
                item = returned;
            }
            Err(SendTimeoutError::Closed(_)) => return false,
        }
    }
}
