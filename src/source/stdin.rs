use crate::pipeline::channel::{send_until_exit, ExitSignal, Sender};
use crate::source::event::{EventContext, LogEvent};
use crate::source::reader::{ReaderError, EVENT_PUT_INTERVAL};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

/// Turns each line of an input stream into one event.
///
/// Lines are never merged and never inherit a timestamp from an earlier line.
/// When the input ends the process-wide stop is raised.
pub struct StdinReader<R> {
    input: R,
    context: EventContext,
    tx: Sender<LogEvent>,
    signal: ExitSignal,
}

impl<R: AsyncBufRead + Unpin + Send> StdinReader<R> {
    pub fn new(input: R, context: EventContext, tx: Sender<LogEvent>, signal: ExitSignal) -> Self {
        Self {
            input,
            context,
            tx,
            signal,
        }
    }

    pub async fn run(mut self) -> Result<(), ReaderError> {
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = tokio::select! {
                _ = self.signal.stop().cancelled() => {
                    info!("Stdin reader is leaving as requested");
                    return Ok(());
                }
                read = self.input.read_until(b'\n', &mut line) => read?,
            };

            if read == 0 {
                info!("Reached end of standard input");
                self.signal.stop().cancel();
                return Ok(());
            }

            while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                debug!("Skipping blank input line");
                continue;
            }

            let mut event = LogEvent::new(self.context.clone());
            event.append_message(&line);
            event.complete();
            if !send_until_exit(&self.tx, event, EVENT_PUT_INTERVAL, &self.signal).await {
                return Ok(());
            }
        }
    }
}
