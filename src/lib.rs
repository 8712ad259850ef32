//! A buffered ("fractal"/Bε) tree node engine: message-propagated writes
//! stamped with a monotone sequence number at the root, lazily pushed
//! toward MVCC leaves by a heaviest-child flush policy, with fuzzy
//! checkpointing and a nonblocking-pin/retry descent protocol.
//!
//! The page cache, block allocator, write-ahead/rollback logger, and
//! transaction manager are consumed as traits (see [`collaborators`]); this
//! crate owns only the node layout, message application, and tree shape
//! operations built on top of them.

pub mod block;
pub mod checksum;
pub mod collaborators;
pub mod config;
pub mod cow_bytes;
pub mod error;
pub mod header;
pub mod leaf_entry;
pub mod message;
pub mod msn;
pub mod mvcc;
pub mod node;
pub mod size;
pub mod tree;

pub use config::EngineConfig;
pub use error::Error;
pub use tree::{CallbackResult, Cursor, Direction, Stat64, Tree};

#[cfg(feature = "init_env_logger")]
pub fn init_env_logger() {
    let _ = env_logger::try_init();
}
