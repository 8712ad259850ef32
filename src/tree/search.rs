//! Searcher & cursor descent (§4.8): heaviside-driven descent with the
//! nonblocking-pin / `TRY_AGAIN` retry-from-root protocol (§5), running
//! `AncestorReplay` on every leaf pin.

use crate::{
    block::BlockNum,
    collaborators::{
        block_allocator::BlockAllocator,
        logger::Logger,
        page_cache::{PageCache, PinMode},
    },
    error::Error,
    message::Message,
    mvcc::SnapshotContext,
    node::Node,
    node::basement::{Comparator, UpdateFn},
    tree::{replay, Tree},
};

/// The direction a scan moves in past logically-deleted entries and when
/// choosing a child to descend into (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// The user callback's verdict for one candidate record (§4.8, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Accept,
    Rejected,
    NotFound,
}

/// A total order over the heaviside function's three-way result, matching
/// the user comparator's sign convention: negative when `key` is left of
/// the target, zero on match, positive when right of it.
pub type Heaviside<'a> = dyn Fn(&[u8]) -> i32 + 'a;

/// Descends from the root applying `heaviside` at each level, restarting
/// from the root on `TRY_AGAIN` (§5), and invokes `getf` on the first
/// candidate record found scanning in `direction` from the located leaf
/// position.
pub fn search<PC, BA, LG, CMP, UF>(
    tree: &Tree<PC, BA, LG, CMP, UF>,
    heaviside: &Heaviside<'_>,
    direction: Direction,
    ctx: &SnapshotContext,
    mut getf: impl FnMut(&[u8], &[u8]) -> CallbackResult,
) -> Result<(), Error>
where
    PC: PageCache<Node>,
    BA: BlockAllocator,
    LG: Logger,
    CMP: Comparator,
    UF: UpdateFn,
{
    tree.header.check_panic()?;
    'restart: loop {
        let mut ancestor_buffers: Vec<Vec<Message>> = Vec::new();
        let mut pinned: Vec<BlockNum> = Vec::new();
        let mut block = tree.header.root();

        let outcome = loop {
            match tree.cache.get_and_pin(block, PinMode::NonBlocking) {
                Ok(()) => {}
                Err(Error::TryAgain) => {
                    for b in pinned.iter().rev() {
                        tree.cache.unpin(*b, false);
                    }
                    continue 'restart;
                }
                Err(e) => return Err(e),
            }
            pinned.push(block);

            let is_leaf = tree
                .cache
                .with_read(block, |n| n.is_leaf())
                .ok_or_else(|| Error::Inval("missing node during descent".into()))?;

            if is_leaf {
                let result = tree
                    .cache
                    .with_write(block, |leaf| {
                        replay::ancestor_replay(
                            leaf,
                            &ancestor_buffers,
                            &tree.cmp,
                            &tree.update_fn,
                            tree.config.seqinsert_window_cap,
                        );
                        search_leaf(leaf, heaviside, direction, ctx, &mut getf)
                    })
                    .ok_or_else(|| Error::Inval("missing leaf during descent".into()))?;
                break result;
            }

            let (next_idx, buffered) = tree
                .cache
                .with_read(block, |n| {
                    let idx = which_child_heaviside(n, heaviside, direction);
                    let msgs = n.children[idx]
                        .payload
                        .as_buffer()
                        .map(|b| b.iter().cloned().collect())
                        .unwrap_or_default();
                    (idx, msgs)
                })
                .ok_or_else(|| Error::Inval("missing node during descent".into()))?;
            ancestor_buffers.push(buffered);

            block = tree
                .cache
                .with_read(block, |n| n.children[next_idx].child)
                .flatten()
                .ok_or_else(|| Error::Inval("descent reached a childless slot".into()))?
                .block;
        };

        for b in pinned.iter().rev() {
            tree.cache.unpin(*b, false);
        }
        return outcome;
    }
}

fn which_child_heaviside(node: &Node, heaviside: &Heaviside<'_>, direction: Direction) -> usize {
    match direction {
        Direction::Forward => node
            .pivots
            .iter()
            .position(|p| heaviside(p) >= 0)
            .unwrap_or(node.pivots.len()),
        Direction::Backward => node
            .pivots
            .iter()
            .rposition(|p| heaviside(p) <= 0)
            .map(|i| i + 1)
            .unwrap_or(0),
    }
}

fn search_leaf(
    leaf: &Node,
    heaviside: &Heaviside<'_>,
    direction: Direction,
    ctx: &SnapshotContext,
    getf: &mut dyn FnMut(&[u8], &[u8]) -> CallbackResult,
) -> Result<(), Error> {
    let bn = leaf.children[0]
        .payload
        .as_basement()
        .expect("leaf slot holds a basement");
    let entries = bn.entries();

    let start = entries.partition_point(|e| heaviside(e.key()) < 0);
    let indices: Box<dyn Iterator<Item = usize>> = match direction {
        Direction::Forward => Box::new(start..entries.len()),
        Direction::Backward => Box::new((0..start.min(entries.len())).rev()),
    };

    for i in indices {
        let entry = &entries[i];
        if entry.iterate_is_del(ctx) {
            continue;
        }
        let Some(val) = entry.iterate_val(ctx) else {
            continue;
        };
        match getf(entry.key(), &val) {
            CallbackResult::Accept => return Ok(()),
            CallbackResult::Rejected => return Err(Error::FoundButRejected),
            CallbackResult::NotFound => continue,
        }
    }
    Err(Error::NotFound)
}
