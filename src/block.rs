//! Stable node identity. The on-disk translation from a `BlockNum` to a file
//! offset is owned by the block allocator (§6, consumed collaborator), not
//! by this crate.

use crate::size::StaticSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BlockNum(pub u64);

impl StaticSize for BlockNum {
    fn static_size() -> usize {
        std::mem::size_of::<u64>()
    }
}

impl std::fmt::Display for BlockNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block#{}", self.0)
    }
}
