//! Node checksums, used to validate header shadow copies during fuzzy
//! checkpointing (§4.7). Grounded on the teacher's `checksum::XxHash`
//! (referenced throughout `tree/imp/nvmleaf.rs`'s test module).

use twox_hash::XxHash64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct XxHash(pub u64);

pub trait State {
    fn finish(self) -> XxHash;
}

pub trait Builder {
    type State: State;
    fn build(&self) -> Self::State;
}

pub struct XxHashState(XxHash64);

impl State for XxHashState {
    fn finish(mut self) -> XxHash {
        use std::hash::Hasher;
        XxHash(self.0.finish())
    }
}

impl XxHashState {
    pub fn write(&mut self, bytes: &[u8]) {
        use std::hash::Hasher;
        self.0.write(bytes);
    }
}

pub struct XxHashBuilder;

impl Builder for XxHashBuilder {
    type State = XxHashState;
    fn build(&self) -> XxHashState {
        XxHashState(XxHash64::with_seed(0))
    }
}

pub fn checksum_bytes(data: &[u8]) -> XxHash {
    let mut state = XxHashBuilder.build();
    state.write(data);
    state.finish()
}
