pub mod duckdb;
pub mod memory;
pub mod state;
pub mod traits;

pub use self::duckdb::{DuckDbStore, DuckDbTable, PUSH_STATE_TABLE, STREAM_STATE_TABLE};
pub use memory::MemoryStore;
pub use state::{PushState, StreamState};
pub use traits::{KeyValueStore, StorageError};
