pub mod encoding;
pub mod event;
pub mod fingerprint;
pub mod reader;
pub mod stdin;
pub mod timestamp;

pub use event::{EventContext, LogEvent, TimestampStatus};
pub use reader::{BatchingFileReader, BatchingSink, FileReader, QueueSink, ReaderConfig, ReaderError};
pub use stdin::StdinReader;
