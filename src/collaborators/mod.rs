//! External collaborators consumed by the core (§1, §6): the page cache,
//! block allocator, write-ahead/rollback logger, and transaction manager.
//! None of these are implemented here beyond the minimal in-memory
//! reference versions needed to exercise the node engine in tests — their
//! real implementations (eviction policy, on-disk translation, WAL,
//! snapshot bookkeeping) are explicitly out of scope per spec §1.

pub mod block_allocator;
pub mod logger;
pub mod page_cache;
pub mod txn_manager;

pub use block_allocator::{BlockAllocator, InMemoryBlockAllocator};
pub use logger::{Logger, NoopLogger};
pub use page_cache::{InMemoryPageCache, PageCache, PinMode};
pub use txn_manager::{InMemoryTxnManager, TransactionManager};
