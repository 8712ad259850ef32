//! Cheaply-cloneable immutable byte buffers used for keys and values.
//!
//! Mirrors the role `CowBytes`/`SlicedCowBytes` play throughout the teacher
//! crate's `tree` module (see `tree/imp/nvmleaf.rs`): an owning, reference
//! counted buffer (`CowBytes`) and a further sliced view into one
//! (`SlicedCowBytes`), both `Clone` in O(1).

use std::{fmt, ops::Deref, sync::Arc};

use crate::size::{Size, StaticSize};

/// An owned, reference-counted, immutable byte buffer.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize)]
pub struct CowBytes(Arc<[u8]>);

impl CowBytes {
    pub fn new() -> Self {
        CowBytes(Arc::from(&[][..]))
    }

    pub fn into_sliced(self) -> SlicedCowBytes {
        let len = self.0.len();
        SlicedCowBytes {
            data: self.0,
            start: 0,
            end: len,
        }
    }
}

impl Default for CowBytes {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&[u8]> for CowBytes {
    fn from(s: &[u8]) -> Self {
        CowBytes(Arc::from(s))
    }
}

impl From<Vec<u8>> for CowBytes {
    fn from(v: Vec<u8>) -> Self {
        CowBytes(Arc::from(v.into_boxed_slice()))
    }
}

impl From<&str> for CowBytes {
    fn from(s: &str) -> Self {
        CowBytes::from(s.as_bytes())
    }
}

impl Deref for CowBytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for CowBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CowBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CowBytes({} bytes)", self.0.len())
    }
}

impl Size for CowBytes {
    fn size(&self) -> usize {
        self.0.len()
    }
}

/// A slice into a [`CowBytes`] buffer, still O(1) to clone.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SlicedCowBytes {
    data: Arc<[u8]>,
    start: usize,
    end: usize,
}

impl SlicedCowBytes {
    pub fn empty() -> Self {
        CowBytes::new().into_sliced()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl From<&[u8]> for SlicedCowBytes {
    fn from(s: &[u8]) -> Self {
        CowBytes::from(s).into_sliced()
    }
}

impl From<CowBytes> for SlicedCowBytes {
    fn from(c: CowBytes) -> Self {
        c.into_sliced()
    }
}

impl Deref for SlicedCowBytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }
}

impl AsRef<[u8]> for SlicedCowBytes {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for SlicedCowBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlicedCowBytes({} bytes)", self.len())
    }
}

impl Size for SlicedCowBytes {
    fn size(&self) -> usize {
        self.len()
    }
}

impl StaticSize for SlicedCowBytes {
    // Used only where a fixed-overhead estimate is wanted (e.g. pointer
    // bookkeeping); the variable payload is accounted for separately via
    // `Size::size`.
    fn static_size() -> usize {
        std::mem::size_of::<usize>()
    }
}
