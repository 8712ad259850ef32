//! `Node` (§3, §4.1): one on-disk/in-cache tree page. A leaf node's slots
//! each embed a [`basement::BasementNode`] directly; a nonleaf node's slots
//! each hold a [`message_buffer::MessageBuffer`] draining toward a further
//! child node addressed by [`BlockNum`].

pub mod basement;
pub mod message_buffer;

use crate::{
    block::BlockNum,
    checksum::XxHash,
    cow_bytes::CowBytes,
    error::Error,
    msn::Msn,
    node::basement::{BasementNode, Comparator},
    node::message_buffer::MessageBuffer,
};

/// A node's size/cardinality estimate for its subtree, maintained
/// incrementally rather than recomputed on every read (§4.1 `memory_size`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubtreeEstimate {
    pub nkeys: u64,
    pub dsize: u64,
    /// False once a bulk operation (e.g. a merge) has made the estimate a
    /// conservative bound rather than an exact count.
    pub exact: bool,
}

impl SubtreeEstimate {
    pub fn zero() -> Self {
        SubtreeEstimate {
            nkeys: 0,
            dsize: 0,
            exact: true,
        }
    }

    pub fn combine(&self, other: &SubtreeEstimate) -> SubtreeEstimate {
        SubtreeEstimate {
            nkeys: self.nkeys + other.nkeys,
            dsize: self.dsize + other.dsize,
            exact: self.exact && other.exact,
        }
    }
}

/// A nonleaf child's on-disk identity plus the checksum recorded the last
/// time the parent observed it (§6 block allocator interface).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildPointer {
    pub block: BlockNum,
    pub full_hash: XxHash,
}

/// What a [`ChildSlot`] carries: a leaf slot's data is embedded directly, a
/// nonleaf slot's is an outgoing message queue for a pointed-to child.
#[derive(Debug)]
pub enum ChildPayload {
    Buffer(MessageBuffer),
    Basement(BasementNode),
}

impl ChildPayload {
    pub fn as_buffer(&self) -> Option<&MessageBuffer> {
        match self {
            ChildPayload::Buffer(b) => Some(b),
            ChildPayload::Basement(_) => None,
        }
    }

    pub fn as_buffer_mut(&mut self) -> Option<&mut MessageBuffer> {
        match self {
            ChildPayload::Buffer(b) => Some(b),
            ChildPayload::Basement(_) => None,
        }
    }

    pub fn as_basement(&self) -> Option<&BasementNode> {
        match self {
            ChildPayload::Basement(bn) => Some(bn),
            ChildPayload::Buffer(_) => None,
        }
    }

    pub fn as_basement_mut(&mut self) -> Option<&mut BasementNode> {
        match self {
            ChildPayload::Basement(bn) => Some(bn),
            ChildPayload::Buffer(_) => None,
        }
    }

    fn bytes(&self) -> usize {
        match self {
            ChildPayload::Buffer(b) => b.bytes(),
            ChildPayload::Basement(bn) => bn.bytes(),
        }
    }
}

/// One entry of a node's `pivots`/`children` arrays (§3).
#[derive(Debug)]
pub struct ChildSlot {
    pub estimate: SubtreeEstimate,
    /// Clock-hand eviction bit, maintained by the page cache (§6); carried
    /// here only so a node's on-disk layout matches the teacher's and so
    /// tests can assert on it. Not interpreted by this crate.
    pub clock_bit: bool,
    pub payload: ChildPayload,
    /// `Some` for nonleaf slots; `None` for leaf slots, whose data is the
    /// payload itself.
    pub child: Option<ChildPointer>,
}

impl ChildSlot {
    pub fn new_leaf() -> Self {
        ChildSlot {
            estimate: SubtreeEstimate::zero(),
            clock_bit: false,
            payload: ChildPayload::Basement(BasementNode::new()),
            child: None,
        }
    }

    pub fn new_nonleaf(child: ChildPointer) -> Self {
        ChildSlot {
            estimate: SubtreeEstimate::zero(),
            clock_bit: false,
            payload: ChildPayload::Buffer(MessageBuffer::new()),
            child: Some(child),
        }
    }

    pub fn buffer_bytes(&self) -> usize {
        self.payload.bytes()
    }
}

/// A node's three-way reactivity classification (§4.1), driving split/merge
/// decisions at `RootPut` and flush time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reactivity {
    Stable,
    Fissible,
    Fusible,
}

/// One tree page: either a leaf (`height == 0`, every slot a
/// [`ChildPayload::Basement`]) or a nonleaf (every slot a
/// [`ChildPayload::Buffer`] pointing at a further child).
#[derive(Debug)]
pub struct Node {
    pub block: BlockNum,
    pub height: u32,
    pub nodesize: usize,
    /// `pivots.len() == children.len() - 1`; `pivots[i]` is the smallest key
    /// routed to `children[i + 1]`.
    pub pivots: Vec<CowBytes>,
    pub children: Vec<ChildSlot>,
    pub max_msn_in_memory: Msn,
    pub max_msn_on_disk: Msn,
    pub dirty: bool,
    pub layout_version: u32,
    pub full_hash: XxHash,
}

const NODE_FIXED_OVERHEAD: usize = 64;
const PIVOT_OVERHEAD: usize = 8;
const CHILD_POINTER_SIZE: usize = 16;

impl Node {
    /// `new_empty` (§4.1): a single-slot node ready to receive inserts.
    pub fn new_empty(block: BlockNum, height: u32, nodesize: usize, layout_version: u32) -> Self {
        let children = if height == 0 {
            vec![ChildSlot::new_leaf()]
        } else {
            Vec::new()
        };
        Node {
            block,
            height,
            nodesize,
            pivots: Vec::new(),
            children,
            max_msn_in_memory: Msn::ZERO,
            max_msn_on_disk: Msn::ZERO,
            dirty: true,
            layout_version,
            full_hash: XxHash::default(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.height == 0
    }

    pub fn n_children(&self) -> usize {
        self.children.len()
    }

    /// `which_child(key)`: linear/binary scan over pivots to find the slot a
    /// key routes to (§4.4 step 3).
    pub fn which_child(&self, cmp: &dyn Comparator, key: &[u8]) -> usize {
        for (i, pivot) in self.pivots.iter().enumerate() {
            if cmp.cmp(key, pivot) != std::cmp::Ordering::Greater {
                return i;
            }
        }
        self.pivots.len()
    }

    /// All data for this node is resident in memory; with the on-disk
    /// serialization codec out of scope, `memory_size` and `serialize_size`
    /// coincide (§4.1).
    pub fn memory_size(&self) -> usize {
        let pivots: usize = self.pivots.iter().map(|p| p.len() + PIVOT_OVERHEAD).sum();
        let children: usize = self
            .children
            .iter()
            .map(|c| {
                c.buffer_bytes()
                    + c.child.map(|_| CHILD_POINTER_SIZE).unwrap_or(0)
            })
            .sum();
        NODE_FIXED_OVERHEAD + pivots + children
    }

    pub fn serialize_size(&self) -> usize {
        self.memory_size()
    }

    /// Precondition for whole-node operations (split, merge, flush): every
    /// slot must be resident. With no partial-fetch codec in scope, this is
    /// always true once the node is in memory; kept as an explicit check
    /// because `RootPut`, split, and merge all state it as a precondition.
    pub fn assert_fully_available(&self) -> Result<(), Error> {
        if self.height > 0 && self.children.len() != self.pivots.len() + 1 {
            return Err(Error::Inval(format!(
                "node {} has {} children but {} pivots",
                self.block,
                self.children.len(),
                self.pivots.len()
            )));
        }
        Ok(())
    }

    pub fn total_estimate(&self) -> SubtreeEstimate {
        self.children
            .iter()
            .fold(SubtreeEstimate::zero(), |acc, c| acc.combine(&c.estimate))
    }

    fn total_entries(&self) -> u64 {
        if self.is_leaf() {
            self.children
                .iter()
                .filter_map(|c| c.payload.as_basement())
                .map(|bn| bn.len() as u64)
                .sum()
        } else {
            0
        }
    }

    /// True iff any slot's basement is mid sequential-insert streak (§4.1
    /// leaf FUSIBLE exception). Only the right-most basement can be in a
    /// streak by construction, but all slots are checked defensively.
    fn any_basement_in_seqinsert_streak(&self) -> bool {
        self.children
            .iter()
            .filter_map(|c| c.payload.as_basement())
            .any(basement::MessageApplier::in_sequential_insert_streak)
    }

    /// `N.buffer[i].bytes` is non-empty for at least one slot: a
    /// precondition for `gorged` (§4.1).
    fn any_buffer_nonempty(&self) -> bool {
        self.children.iter().any(|c| c.buffer_bytes() > 0)
    }

    pub fn classify(&self, fanout: usize) -> Reactivity {
        let size = self.serialize_size();
        if self.is_leaf() {
            if size > self.nodesize && self.total_entries() > 1 {
                Reactivity::Fissible
            } else if 4 * size < self.nodesize && !self.any_basement_in_seqinsert_streak() {
                Reactivity::Fusible
            } else {
                Reactivity::Stable
            }
        } else {
            let n = self.n_children();
            if n > fanout {
                Reactivity::Fissible
            } else if 4 * n < fanout {
                Reactivity::Fusible
            } else {
                Reactivity::Stable
            }
        }
    }

    /// A nonleaf is gorged iff oversize AND at least one child buffer still
    /// holds messages (§4.1).
    pub fn gorged(&self) -> bool {
        !self.is_leaf() && self.serialize_size() > self.nodesize && self.any_buffer_nonempty()
    }

    /// `argmax BNC_bytes_in_buf`, ties to the lowest index (§4.5 step 1).
    pub fn heaviest_child(&self) -> Option<usize> {
        self.children
            .iter()
            .enumerate()
            .max_by_key(|(i, c)| (c.buffer_bytes(), std::cmp::Reverse(*i)))
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        leaf_entry::LeafEntry,
        message::{Message, MessageType},
        node::basement::LexicographicComparator,
    };

    fn leaf(nodesize: usize) -> Node {
        Node::new_empty(BlockNum(1), 0, nodesize, 1)
    }

    fn nonleaf(nodesize: usize, n_children: usize) -> Node {
        let mut n = Node::new_empty(BlockNum(1), 1, nodesize, 1);
        for i in 0..n_children {
            n.children.push(ChildSlot::new_nonleaf(ChildPointer {
                block: BlockNum(i as u64 + 2),
                full_hash: XxHash::default(),
            }));
            if i > 0 {
                n.pivots.push(CowBytes::from(vec![i as u8]));
            }
        }
        n
    }

    #[test]
    fn empty_leaf_is_stable() {
        let n = leaf(4096);
        assert_eq!(n.classify(16), Reactivity::Stable);
    }

    #[test]
    fn leaf_with_many_entries_over_nodesize_is_fissible() {
        let mut n = leaf(64);
        let bn = n.children[0].payload.as_basement_mut().unwrap();
        *bn = BasementNode::from_entries(vec![
            LeafEntry::new_committed(b"a"[..].into(), vec![0u8; 128][..].into()),
            LeafEntry::new_committed(b"b"[..].into(), vec![0u8; 128][..].into()),
        ]);
        assert_eq!(n.classify(16), Reactivity::Fissible);
    }

    #[test]
    fn leaf_with_single_entry_over_nodesize_is_not_fissible() {
        // Fissible also requires more than one entry, else there is nothing
        // to split around.
        let mut n = leaf(64);
        let bn = n.children[0].payload.as_basement_mut().unwrap();
        *bn = BasementNode::from_entries(vec![LeafEntry::new_committed(
            b"a"[..].into(),
            vec![0u8; 256][..].into(),
        )]);
        assert_eq!(n.classify(16), Reactivity::Stable);
    }

    #[test]
    fn tiny_leaf_is_fusible() {
        let n = leaf(4096);
        assert_eq!(n.classify(16), Reactivity::Fusible);
    }

    #[test]
    fn tiny_leaf_mid_seqinsert_streak_is_not_fusible() {
        let cmp = LexicographicComparator;
        let update_fn = crate::node::basement::NoopUpdateFn;
        let applier = crate::node::basement::MessageApplier {
            cmp: &cmp,
            update_fn: &update_fn,
            seqinsert_window_cap: 32,
        };
        let mut n = leaf(4096);
        let mut se = SubtreeEstimate::zero();
        let bn = n.children[0].payload.as_basement_mut().unwrap();
        let mut m = Message::new(MessageType::Insert, b"a"[..].into(), b"v"[..].into());
        m.stamp(crate::msn::Msn(1));
        applier.apply_once(bn, &mut se, &m);
        assert_eq!(n.classify(16), Reactivity::Stable);
    }

    #[test]
    fn nonleaf_over_fanout_is_fissible() {
        let n = nonleaf(4096, 17);
        assert_eq!(n.classify(16), Reactivity::Fissible);
    }

    #[test]
    fn nonleaf_within_fanout_is_stable() {
        let n = nonleaf(4096, 8);
        assert_eq!(n.classify(16), Reactivity::Stable);
    }

    #[test]
    fn nonleaf_far_under_fanout_is_fusible() {
        let n = nonleaf(4096, 2);
        assert_eq!(n.classify(16), Reactivity::Fusible);
    }

    #[test]
    fn gorged_requires_both_oversize_and_nonempty_buffer() {
        let mut n = nonleaf(16, 2);
        assert!(!n.gorged(), "empty buffers: not gorged even if tiny nodesize");

        let buf = n.children[0].payload.as_buffer_mut().unwrap();
        let mut m = Message::new(MessageType::Insert, b"a"[..].into(), vec![0u8; 64][..].into());
        m.stamp(crate::msn::Msn(1));
        buf.enqueue(m);
        assert!(n.gorged());
    }

    #[test]
    fn leaf_is_never_gorged() {
        let n = leaf(1);
        assert!(!n.gorged());
    }

    #[test]
    fn heaviest_child_ties_to_lowest_index() {
        let mut n = nonleaf(4096, 3);
        for slot in n.children.iter_mut() {
            let buf = slot.payload.as_buffer_mut().unwrap();
            let mut m = Message::new(MessageType::Insert, b"a"[..].into(), vec![0u8; 8][..].into());
            m.stamp(crate::msn::Msn(1));
            buf.enqueue(m);
        }
        assert_eq!(n.heaviest_child(), Some(0));
    }

    #[test]
    fn heaviest_child_picks_the_larger_buffer() {
        let mut n = nonleaf(4096, 3);
        let buf = n.children[2].payload.as_buffer_mut().unwrap();
        let mut m = Message::new(MessageType::Insert, b"a"[..].into(), vec![0u8; 256][..].into());
        m.stamp(crate::msn::Msn(1));
        buf.enqueue(m);
        assert_eq!(n.heaviest_child(), Some(2));
    }

    #[test]
    fn which_child_routes_to_first_slot_not_exceeded_by_pivot() {
        // pivots = [[1], [2]]; a key routes to the leftmost child whose
        // pivot it does not exceed, falling off the end to the last child.
        let n = nonleaf(4096, 3);
        let cmp = LexicographicComparator;
        assert_eq!(n.which_child(&cmp, b"\x00"), 0);
        assert_eq!(n.which_child(&cmp, &[1]), 0);
        assert_eq!(n.which_child(&cmp, &[2]), 1);
        assert_eq!(n.which_child(&cmp, &[9]), 2);
    }
}
