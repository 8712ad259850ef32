//! Split, merge, and rebalance (§4.6).
//!
//! A leaf node is modeled as holding exactly one basement (`DESIGN.md`
//! Open Question decision), so "move the tail of basement `split_bn`" over
//! a multi-basement leaf degenerates to splitting that single basement at
//! its midpoint.

use crate::{
    checksum::XxHash,
    cow_bytes::CowBytes,
    error::Error,
    header::CURRENT_LAYOUT_VERSION,
    msn::Msn,
    node::{
        basement::BasementNode, message_buffer::MessageBuffer, ChildPayload, ChildPointer,
        ChildSlot, Node, SubtreeEstimate,
    },
};

/// Splits `node`'s contents in place, leaving `node` holding the left half
/// (`A`) and returning the right half's pieces (`B`) plus the separating
/// pivot and both halves' rolled-up estimates.
pub fn split_node_contents(
    node: &mut Node,
) -> (Vec<ChildSlot>, Vec<CowBytes>, CowBytes, SubtreeEstimate, SubtreeEstimate) {
    if node.is_leaf() {
        split_leaf_contents(node)
    } else {
        split_nonleaf_contents(node)
    }
}

fn split_leaf_contents(
    node: &mut Node,
) -> (Vec<ChildSlot>, Vec<CowBytes>, CowBytes, SubtreeEstimate, SubtreeEstimate) {
    let slot = &mut node.children[0];
    let bn = slot
        .payload
        .as_basement_mut()
        .expect("leaf slot holds a basement");
    let split_at = (bn.len() / 2).max(1);
    let tail = bn.split_off_tail(split_at);
    let pivot = bn
        .entries()
        .last()
        .map(|e| e.key().clone())
        .unwrap_or_default();

    let a_estimate = SubtreeEstimate {
        nkeys: bn.len() as u64,
        dsize: bn.entries().iter().map(|e| e.size() as u64).sum(),
        exact: true,
    };
    slot.estimate = a_estimate;

    let b_estimate = SubtreeEstimate {
        nkeys: tail.len() as u64,
        dsize: tail.iter().map(|e| e.size() as u64).sum(),
        exact: true,
    };
    let b_slot = ChildSlot {
        estimate: b_estimate,
        clock_bit: false,
        payload: ChildPayload::Basement(BasementNode::from_entries(tail)),
        child: None,
    };
    (vec![b_slot], Vec::new(), pivot, a_estimate, b_estimate)
}

fn split_nonleaf_contents(
    node: &mut Node,
) -> (Vec<ChildSlot>, Vec<CowBytes>, CowBytes, SubtreeEstimate, SubtreeEstimate) {
    let total = node.children.len();
    let split_at = total / 2;
    let b_children = node.children.split_off(split_at);
    let b_pivots = node.pivots.split_off(split_at);
    let pivot = node.pivots.pop().expect("nonleaf with >1 child has a pivot");

    let a_estimate = node
        .children
        .iter()
        .fold(SubtreeEstimate::zero(), |acc, c| acc.combine(&c.estimate));
    let b_estimate = b_children
        .iter()
        .fold(SubtreeEstimate::zero(), |acc, c| acc.combine(&c.estimate));
    (b_children, b_pivots, pivot, a_estimate, b_estimate)
}

use crate::tree::Tree;
use crate::collaborators::{block_allocator::BlockAllocator, logger::Logger, page_cache::PageCache};
use crate::node::basement::{Comparator, UpdateFn};

/// Splits the child at `parent.children[idx]`, re-linking the new sibling
/// into `parent` right after it (§4.6 split + re-link, used from the
/// flusher when a drained child turns out `FISSIBLE`).
pub fn split_child<PC, BA, LG, CMP, UF>(
    tree: &Tree<PC, BA, LG, CMP, UF>,
    parent_block: crate::block::BlockNum,
    idx: usize,
) -> Result<(), Error>
where
    PC: PageCache<Node>,
    BA: BlockAllocator,
    LG: Logger,
    CMP: Comparator,
    UF: UpdateFn,
{
    let child_ptr = tree
        .cache
        .with_read(parent_block, |p| p.children[idx].child)
        .flatten()
        .ok_or_else(|| Error::Inval("split target has no child pointer".into()))?;

    let (b_children, b_pivots, pivot, a_est, b_est, height, msn) = tree
        .cache
        .with_write(child_ptr.block, |child| {
            let (bc, bp, pv, ae, be) = split_node_contents(child);
            (bc, bp, pv, ae, be, child.height, child.max_msn_in_memory)
        })
        .ok_or_else(|| Error::Inval("split target missing from cache".into()))?;

    let new_block = tree.allocator.allocate_block();
    let node_b = Node {
        block: new_block,
        height,
        nodesize: tree.config.nodesize,
        pivots: b_pivots,
        children: b_children,
        max_msn_in_memory: msn,
        max_msn_on_disk: Msn::ZERO,
        dirty: true,
        layout_version: CURRENT_LAYOUT_VERSION,
        full_hash: XxHash::default(),
    };
    tree.cache.put(new_block, node_b);

    tree.cache.with_write(parent_block, |parent| {
        parent.pivots.insert(idx, pivot.clone());
        parent.children[idx].estimate = a_est;
        parent.children.insert(
            idx + 1,
            ChildSlot {
                estimate: b_est,
                clock_bit: false,
                payload: ChildPayload::Buffer(MessageBuffer::new()),
                child: Some(ChildPointer {
                    block: new_block,
                    full_hash: XxHash::default(),
                }),
            },
        );
        parent.dirty = true;
    });
    Ok(())
}

/// Promotes a new root over the current root when it is itself `FISSIBLE`
/// (§4.4 step 6, §4.6 "Promote new root"). The left half (`A`) keeps the
/// existing root block; a fresh block is allocated for the right half and
/// for the new, taller root.
pub fn split_root<PC, BA, LG, CMP, UF>(
    tree: &Tree<PC, BA, LG, CMP, UF>,
    root_block: crate::block::BlockNum,
) -> Result<(), Error>
where
    PC: PageCache<Node>,
    BA: BlockAllocator,
    LG: Logger,
    CMP: Comparator,
    UF: UpdateFn,
{
    let (b_children, b_pivots, pivot, a_est, b_est, height, msn) = tree
        .cache
        .with_write(root_block, |root| {
            let (bc, bp, pv, ae, be) = split_node_contents(root);
            (bc, bp, pv, ae, be, root.height, root.max_msn_in_memory)
        })
        .ok_or_else(|| Error::Inval("root missing from cache".into()))?;

    let new_block_b = tree.allocator.allocate_block();
    let node_b = Node {
        block: new_block_b,
        height,
        nodesize: tree.config.nodesize,
        pivots: b_pivots,
        children: b_children,
        max_msn_in_memory: msn,
        max_msn_on_disk: Msn::ZERO,
        dirty: true,
        layout_version: CURRENT_LAYOUT_VERSION,
        full_hash: XxHash::default(),
    };
    tree.cache.put(new_block_b, node_b);

    let new_root_block = tree.allocator.allocate_block();
    let new_root = Node {
        block: new_root_block,
        height: height + 1,
        nodesize: tree.config.nodesize,
        pivots: vec![pivot],
        children: vec![
            ChildSlot {
                estimate: a_est,
                clock_bit: false,
                payload: ChildPayload::Buffer(MessageBuffer::new()),
                child: Some(ChildPointer {
                    block: root_block,
                    full_hash: XxHash::default(),
                }),
            },
            ChildSlot {
                estimate: b_est,
                clock_bit: false,
                payload: ChildPayload::Buffer(MessageBuffer::new()),
                child: Some(ChildPointer {
                    block: new_block_b,
                    full_hash: XxHash::default(),
                }),
            },
        ],
        max_msn_in_memory: msn,
        max_msn_on_disk: Msn::ZERO,
        dirty: true,
        layout_version: CURRENT_LAYOUT_VERSION,
        full_hash: XxHash::default(),
    };
    tree.cache.put(new_root_block, new_root);
    tree.header.set_root(new_root_block, XxHash::default());
    Ok(())
}

/// `maybe_merge_pinned_nodes` (§4.6): given a child at `idx` classified
/// `FUSIBLE`, merge (or rebalance) it with its designated sibling. Slot 0
/// merges with slot 1; every other slot merges with its left neighbor.
///
/// If the sibling's incoming buffer at the parent is still non-empty, this
/// is skipped for one round rather than force-flushing it first (a
/// documented simplification, see `DESIGN.md`).
pub fn maybe_merge_sibling<PC, BA, LG, CMP, UF>(
    tree: &Tree<PC, BA, LG, CMP, UF>,
    parent_block: crate::block::BlockNum,
    idx: usize,
) -> Result<(), Error>
where
    PC: PageCache<Node>,
    BA: BlockAllocator,
    LG: Logger,
    CMP: Comparator,
    UF: UpdateFn,
{
    let sibling_idx = if idx == 0 { 1 } else { idx - 1 };
    let (left_idx, right_idx) = if idx < sibling_idx {
        (idx, sibling_idx)
    } else {
        (sibling_idx, idx)
    };

    let Some((left_ptr, right_ptr, buffers_empty, n_children)) =
        tree.cache.with_read(parent_block, |p| {
            if right_idx >= p.children.len() {
                return None;
            }
            let empty = p.children[left_idx].buffer_bytes() == 0
                && p.children[right_idx].buffer_bytes() == 0;
            Some((
                p.children[left_idx].child,
                p.children[right_idx].child,
                empty,
                p.children.len(),
            ))
        }).flatten()
    else {
        return Ok(());
    };
    if !buffers_empty || n_children < 2 {
        return Ok(());
    }
    let (Some(left_ptr), Some(right_ptr)) = (left_ptr, right_ptr) else {
        // Leaf-level parents hold embedded basements directly; nothing to
        // merge at the block level.
        return Ok(());
    };

    let nodesize = tree.config.nodesize;
    let (size_a, size_b) = (
        tree.cache
            .with_read(left_ptr.block, |n| n.serialize_size())
            .unwrap_or(0),
        tree.cache
            .with_read(right_ptr.block, |n| n.serialize_size())
            .unwrap_or(0),
    );

    if 4 * (size_a + size_b) > 3 * nodesize {
        if size_a > nodesize / 4 && size_b > nodesize / 4 {
            return Ok(());
        }
        rebalance(tree, parent_block, left_idx, left_ptr, right_ptr)
    } else {
        merge(tree, parent_block, left_idx, right_idx, left_ptr, right_ptr)
    }
}

fn take_right_contents(
    tree_cache_get: impl FnOnce() -> Option<(Vec<ChildSlot>, Vec<CowBytes>)>,
) -> Option<(Vec<ChildSlot>, Vec<CowBytes>)> {
    tree_cache_get()
}

fn merge<PC, BA, LG, CMP, UF>(
    tree: &Tree<PC, BA, LG, CMP, UF>,
    parent_block: crate::block::BlockNum,
    left_idx: usize,
    right_idx: usize,
    left_ptr: ChildPointer,
    right_ptr: ChildPointer,
) -> Result<(), Error>
where
    PC: PageCache<Node>,
    BA: BlockAllocator,
    LG: Logger,
    CMP: Comparator,
    UF: UpdateFn,
{
    let right_contents = take_right_contents(|| {
        tree.cache
            .with_write(right_ptr.block, |right| {
                (
                    std::mem::take(&mut right.children),
                    std::mem::take(&mut right.pivots),
                )
            })
    })
    .ok_or_else(|| Error::Inval("merge sibling missing".into()))?;

    let dividing_pivot = tree
        .cache
        .with_read(parent_block, |p| p.pivots.get(left_idx).cloned())
        .flatten();

    let new_left_estimate = tree
        .cache
        .with_write(left_ptr.block, |left| {
            let (mut right_children, right_pivots) = right_contents;
            if left.is_leaf() {
                let left_bn = left.children[0]
                    .payload
                    .as_basement_mut()
                    .expect("leaf slot");
                if let Some(mut right_slot) = right_children.pop() {
                    if let ChildPayload::Basement(right_bn) = &mut right_slot.payload {
                        let tail = right_bn.split_off_tail(0);
                        left_bn.append_entries(tail);
                    }
                }
            } else {
                if let Some(p) = dividing_pivot {
                    left.pivots.push(p);
                }
                left.pivots.extend(right_pivots);
                left.children.extend(right_children);
            }
            left.dirty = true;
            left.total_estimate()
        })
        .ok_or_else(|| Error::Inval("merge target missing".into()))?;

    tree.cache.unpin_and_remove(right_ptr.block);
    tree.allocator.free_block(right_ptr.block);

    tree.cache.with_write(parent_block, |parent| {
        parent.children[left_idx].estimate = new_left_estimate;
        parent.pivots.remove(left_idx);
        parent.children.remove(right_idx);
        parent.dirty = true;
    });
    Ok(())
}

/// Concatenate then re-split at the midpoint, producing a fresh pivot
/// without freeing either block (§4.6 "Otherwise rebalance").
fn rebalance<PC, BA, LG, CMP, UF>(
    tree: &Tree<PC, BA, LG, CMP, UF>,
    parent_block: crate::block::BlockNum,
    left_idx: usize,
    left_ptr: ChildPointer,
    right_ptr: ChildPointer,
) -> Result<(), Error>
where
    PC: PageCache<Node>,
    BA: BlockAllocator,
    LG: Logger,
    CMP: Comparator,
    UF: UpdateFn,
{
    let is_leaf = tree
        .cache
        .with_read(left_ptr.block, |n| n.is_leaf())
        .ok_or_else(|| Error::Inval("rebalance target missing".into()))?;

    let (new_pivot, a_est, b_est) = if is_leaf {
        rebalance_leaf(tree, left_ptr, right_ptr)?
    } else {
        rebalance_nonleaf(tree, parent_block, left_idx, left_ptr, right_ptr)?
    };

    let right_idx = left_idx + 1;
    tree.cache.with_write(parent_block, |parent| {
        parent.children[left_idx].estimate = a_est;
        parent.children[right_idx].estimate = b_est;
        parent.pivots[left_idx] = new_pivot.clone();
        parent.dirty = true;
    });
    Ok(())
}

fn rebalance_leaf<PC, BA, LG, CMP, UF>(
    tree: &Tree<PC, BA, LG, CMP, UF>,
    left_ptr: ChildPointer,
    right_ptr: ChildPointer,
) -> Result<(CowBytes, SubtreeEstimate, SubtreeEstimate), Error>
where
    PC: PageCache<Node>,
    BA: BlockAllocator,
    LG: Logger,
    CMP: Comparator,
    UF: UpdateFn,
{
    let right_tail = tree
        .cache
        .with_write(right_ptr.block, |right| {
            right.children[0]
                .payload
                .as_basement_mut()
                .expect("leaf slot")
                .split_off_tail(0)
        })
        .ok_or_else(|| Error::Inval("rebalance sibling missing".into()))?;

    let (pivot, a_est, b_est, tail) = tree
        .cache
        .with_write(left_ptr.block, |left| {
            let left_bn = left.children[0]
                .payload
                .as_basement_mut()
                .expect("leaf slot");
            let mut combined = left_bn.split_off_tail(0);
            combined.extend(right_tail);
            let mid = (combined.len() / 2).max(1).min(combined.len());
            let tail = combined.split_off(mid);
            left_bn.append_entries(combined);
            let pivot = left_bn
                .entries()
                .last()
                .map(|e| e.key().clone())
                .unwrap_or_default();
            let a_est = SubtreeEstimate {
                nkeys: left_bn.len() as u64,
                dsize: left_bn.entries().iter().map(|e| e.size() as u64).sum(),
                exact: true,
            };
            left.children[0].estimate = a_est;
            let b_est = SubtreeEstimate {
                nkeys: tail.len() as u64,
                dsize: tail.iter().map(|e| e.size() as u64).sum(),
                exact: true,
            };
            (pivot, a_est, b_est, tail)
        })
        .ok_or_else(|| Error::Inval("rebalance target missing".into()))?;

    tree.cache.with_write(right_ptr.block, |right| {
        right.children[0] = ChildSlot {
            estimate: b_est,
            clock_bit: false,
            payload: ChildPayload::Basement(BasementNode::from_entries(tail)),
            child: None,
        };
        right.pivots.clear();
        right.dirty = true;
    });

    Ok((pivot, a_est, b_est))
}

fn rebalance_nonleaf<PC, BA, LG, CMP, UF>(
    tree: &Tree<PC, BA, LG, CMP, UF>,
    parent_block: crate::block::BlockNum,
    left_idx: usize,
    left_ptr: ChildPointer,
    right_ptr: ChildPointer,
) -> Result<(CowBytes, SubtreeEstimate, SubtreeEstimate), Error>
where
    PC: PageCache<Node>,
    BA: BlockAllocator,
    LG: Logger,
    CMP: Comparator,
    UF: UpdateFn,
{
    let (right_children, right_pivots) = tree
        .cache
        .with_write(right_ptr.block, |right| {
            (
                std::mem::take(&mut right.children),
                std::mem::take(&mut right.pivots),
            )
        })
        .ok_or_else(|| Error::Inval("rebalance sibling missing".into()))?;

    let dividing_pivot = tree
        .cache
        .with_read(parent_block, |p| p.pivots.get(left_idx).cloned())
        .flatten();

    let (pivot, a_est, b_est, new_right_children, new_right_pivots) = tree
        .cache
        .with_write(left_ptr.block, |left| {
            if let Some(p) = dividing_pivot {
                left.pivots.push(p);
            }
            left.pivots.extend(right_pivots);
            left.children.extend(right_children);
            let (bc, bp, pv, ae, be) = split_node_contents(left);
            (pv, ae, be, bc, bp)
        })
        .ok_or_else(|| Error::Inval("rebalance target missing".into()))?;

    tree.cache.with_write(right_ptr.block, |right| {
        right.children = new_right_children;
        right.pivots = new_right_pivots;
        right.dirty = true;
    });

    Ok((pivot, a_est, b_est))
}
