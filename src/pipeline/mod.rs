pub mod batch;
pub mod channel;
pub mod publisher;
pub mod worker;

pub use batch::{AddOutcome, BatchLimits, EventBatch};
pub use channel::{create_channel, ExitSignal, Receiver, Sender};
pub use publisher::{PublishError, PublishObserver, Publisher};
pub use worker::Worker;
