//! Heaviest-child flush (§4.5): the engine's only mechanism for moving
//! buffered messages from a nonleaf toward its children.

use crate::{
    block::BlockNum,
    collaborators::{block_allocator::BlockAllocator, logger::Logger, page_cache::PageCache},
    error::Error,
    message::Message,
    node::{
        basement::{Comparator, MessageApplier, UpdateFn},
        ChildPayload, Node, Reactivity,
    },
    tree::{replay, route_into_nonleaf, shape, Tree},
};

/// Drains the heaviest child's buffer at `parent_block` into that child,
/// classifies it, and acts on the result (§4.5 steps 1-5), optionally
/// recursing one chain deeper (step 6).
pub fn flush_heaviest_child<PC, BA, LG, CMP, UF>(
    tree: &Tree<PC, BA, LG, CMP, UF>,
    parent_block: BlockNum,
    is_first_flush: bool,
) -> Result<(), Error>
where
    PC: PageCache<Node>,
    BA: BlockAllocator,
    LG: Logger,
    CMP: Comparator,
    UF: UpdateFn,
{
    let drained = tree
        .cache
        .with_write(parent_block, |parent| {
            let idx = parent.heaviest_child()?;
            let child_ptr = parent.children[idx].child?;
            let messages = parent.children[idx].payload.as_buffer_mut()?.drain_all();
            Some((idx, child_ptr.block, messages))
        })
        .flatten();

    let Some((idx, child_block, messages)) = drained else {
        return Ok(());
    };
    if messages.is_empty() {
        return Ok(());
    }

    let reactivity = apply_drained_messages(tree, child_block, messages)?;
    let child_estimate = tree
        .cache
        .with_read(child_block, |c| c.total_estimate())
        .ok_or_else(|| Error::Inval("flushed child missing".into()))?;
    let child_gorged = tree
        .cache
        .with_read(child_block, |c| c.gorged())
        .unwrap_or(false);

    tree.cache.with_write(parent_block, |parent| {
        parent.children[idx].estimate = child_estimate;
        parent.dirty = true;
    });

    match reactivity {
        Reactivity::Fissible => shape::split_child(tree, parent_block, idx)?,
        Reactivity::Fusible => shape::maybe_merge_sibling(tree, parent_block, idx)?,
        Reactivity::Stable => {}
    }

    if child_gorged && is_first_flush {
        flush_heaviest_child(tree, child_block, false)?;
    }
    Ok(())
}

fn apply_drained_messages<PC, BA, LG, CMP, UF>(
    tree: &Tree<PC, BA, LG, CMP, UF>,
    child_block: BlockNum,
    messages: Vec<Message>,
) -> Result<Reactivity, Error>
where
    PC: PageCache<Node>,
    BA: BlockAllocator,
    LG: Logger,
    CMP: Comparator,
    UF: UpdateFn,
{
    tree.cache
        .get_and_pin(child_block, crate::collaborators::page_cache::PinMode::Blocking)?;
    let reactivity = tree
        .cache
        .with_write(child_block, |child| {
            if child.is_leaf() {
                replay::bump_max_msn_on_disk(
                    child,
                    messages.iter().map(|m| m.msn).max().unwrap_or(crate::msn::Msn::ZERO),
                );
                let slot = &mut child.children[0];
                if let ChildPayload::Basement(bn) = &mut slot.payload {
                    let applier = MessageApplier {
                        cmp: &tree.cmp,
                        update_fn: &tree.update_fn,
                        seqinsert_window_cap: tree.config.seqinsert_window_cap,
                    };
                    for msg in &messages {
                        applier.apply_once(bn, &mut slot.estimate, msg);
                    }
                }
            } else {
                for msg in messages {
                    route_into_nonleaf(child, &tree.cmp, msg);
                }
            }
            child.dirty = true;
            child.classify(tree.config.fanout)
        })
        .ok_or_else(|| Error::Inval("flush target missing from cache".into()))?;
    tree.cache.unpin(child_block, true);
    Ok(reactivity)
}
