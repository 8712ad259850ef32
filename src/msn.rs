//! Message Sequence Number: a monotone stamp assigned at the root, used for
//! idempotent replay (§3, §5 invariant 1 and 2).

use crate::size::StaticSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Msn(pub u64);

impl Msn {
    pub const ZERO: Msn = Msn(0);

    pub fn next(self) -> Msn {
        Msn(self.0 + 1)
    }
}

impl StaticSize for Msn {
    fn static_size() -> usize {
        std::mem::size_of::<u64>()
    }
}

impl std::fmt::Display for Msn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msn#{}", self.0)
    }
}
