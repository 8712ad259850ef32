//! Messages logged at the root and lazily propagated toward the leaves
//! (§3). The 13 message kinds split into three variant groups; the router
//! functions below (`applies_once`, `applies_all`, `does_nothing`) are
//! exhaustive pattern matches, per the teacher's "message as a tagged
//! variant" design note (§9) and the `Message` tagging used throughout
//! `tree/imp/nvmleaf.rs` (`msg_action.apply_to_leaf`).

use crate::{
    cow_bytes::{CowBytes, SlicedCowBytes},
    msn::Msn,
    size::{Size, StaticSize},
};

/// A transaction id, as handed out by the (external) transaction manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Xid(pub u64);

/// A message's type tag. See spec §3 for the exact semantics of each.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MessageType {
    Insert,
    InsertNoOverwrite,
    DeleteAny,
    AbortAny,
    CommitAny,
    CommitBroadcastAll,
    CommitBroadcastTxn,
    AbortBroadcastTxn,
    Optimize,
    OptimizeForUpgrade,
    Update,
    UpdateBroadcastAll,
    None,
}

/// Which of the three dispatch groups a [`MessageType`] belongs to (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Key-directed, apply-once: locate the key(s) and stop.
    ApplyOnce,
    /// Fan out to every leaf entry in the affected subtree.
    Broadcast,
    /// No-op.
    None,
}

impl MessageType {
    pub fn dispatch(&self) -> Dispatch {
        use MessageType::*;
        match self {
            Insert | InsertNoOverwrite | DeleteAny | AbortAny | CommitAny | Update => {
                Dispatch::ApplyOnce
            }
            CommitBroadcastAll
            | CommitBroadcastTxn
            | AbortBroadcastTxn
            | Optimize
            | OptimizeForUpgrade
            | UpdateBroadcastAll => Dispatch::Broadcast,
            MessageType::None => Dispatch::None,
        }
    }

    pub fn applies_once(&self) -> bool {
        self.dispatch() == Dispatch::ApplyOnce
    }

    pub fn applies_all(&self) -> bool {
        self.dispatch() == Dispatch::Broadcast
    }

    pub fn does_nothing(&self) -> bool {
        self.dispatch() == Dispatch::None
    }

    /// True for the txn-scoped broadcast variants, which must compare
    /// against the leaf entry's xid stack rather than fan out unconditionally.
    pub fn is_txn_scoped_broadcast(&self) -> bool {
        matches!(self, MessageType::CommitBroadcastTxn | MessageType::AbortBroadcastTxn)
    }
}

/// The `extra` payload passed to `UPDATE`/`UPDATE_BROADCAST_ALL`'s user
/// function (§6 "User update function"). Opaque to the engine.
pub type UpdateExtra = SlicedCowBytes;

/// One entry in a [`crate::node::message_buffer::MessageBuffer`].
#[derive(Debug, Clone)]
pub struct Message {
    pub ty: MessageType,
    pub msn: Msn,
    /// The transaction-id stack active when this message was stamped. Empty
    /// for messages that don't need txn context (e.g. `Optimize`).
    pub xids: Vec<Xid>,
    pub key: CowBytes,
    /// Payload: the value for `Insert*`, the `extra` blob for `Update*`,
    /// empty for tombstone/broadcast-only messages.
    pub value: SlicedCowBytes,
}

impl Message {
    pub fn new(ty: MessageType, key: CowBytes, value: SlicedCowBytes) -> Self {
        Message {
            ty,
            msn: Msn::ZERO,
            xids: Vec::new(),
            key,
            value,
        }
    }

    pub fn with_xids(mut self, xids: Vec<Xid>) -> Self {
        self.xids = xids;
        self
    }

    pub fn stamp(&mut self, msn: Msn) {
        self.msn = msn;
    }
}

impl Size for Message {
    fn size(&self) -> usize {
        Msn::static_size()
            + self.xids.len() * std::mem::size_of::<Xid>()
            + self.key.len()
            + self.value.len()
            + std::mem::size_of::<MessageType>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [MessageType; 13] = [
        MessageType::Insert,
        MessageType::InsertNoOverwrite,
        MessageType::DeleteAny,
        MessageType::AbortAny,
        MessageType::CommitAny,
        MessageType::CommitBroadcastAll,
        MessageType::CommitBroadcastTxn,
        MessageType::AbortBroadcastTxn,
        MessageType::Optimize,
        MessageType::OptimizeForUpgrade,
        MessageType::Update,
        MessageType::UpdateBroadcastAll,
        MessageType::None,
    ];

    #[test]
    fn dispatch_groups_partition_every_variant() {
        for ty in ALL.iter() {
            let groups = [ty.applies_once(), ty.applies_all(), ty.does_nothing()];
            assert_eq!(
                groups.iter().filter(|b| **b).count(),
                1,
                "{ty:?} must belong to exactly one dispatch group"
            );
        }
    }

    #[test]
    fn apply_once_group_is_the_key_directed_variants() {
        for ty in [
            MessageType::Insert,
            MessageType::InsertNoOverwrite,
            MessageType::DeleteAny,
            MessageType::AbortAny,
            MessageType::CommitAny,
            MessageType::Update,
        ] {
            assert_eq!(ty.dispatch(), Dispatch::ApplyOnce);
        }
    }

    #[test]
    fn broadcast_group_is_the_subtree_fanout_variants() {
        for ty in [
            MessageType::CommitBroadcastAll,
            MessageType::CommitBroadcastTxn,
            MessageType::AbortBroadcastTxn,
            MessageType::Optimize,
            MessageType::OptimizeForUpgrade,
            MessageType::UpdateBroadcastAll,
        ] {
            assert_eq!(ty.dispatch(), Dispatch::Broadcast);
        }
    }

    #[test]
    fn none_is_the_only_no_op_variant() {
        assert_eq!(MessageType::None.dispatch(), Dispatch::None);
        for ty in ALL.iter().filter(|t| **t != MessageType::None) {
            assert_ne!(ty.dispatch(), Dispatch::None);
        }
    }

    #[test]
    fn only_txn_scoped_broadcasts_are_flagged_as_such() {
        for ty in ALL.iter() {
            let expected = matches!(
                ty,
                MessageType::CommitBroadcastTxn | MessageType::AbortBroadcastTxn
            );
            assert_eq!(ty.is_txn_scoped_broadcast(), expected, "{ty:?}");
        }
    }

    #[test]
    fn stamp_sets_the_msn() {
        let mut m = Message::new(MessageType::Insert, b"k"[..].into(), b"v"[..].into());
        assert_eq!(m.msn, Msn::ZERO);
        m.stamp(Msn(7));
        assert_eq!(m.msn, Msn(7));
    }

    #[test]
    fn with_xids_attaches_the_transaction_stack() {
        let m = Message::new(MessageType::DeleteAny, b"k"[..].into(), b""[..].into())
            .with_xids(vec![Xid(1), Xid(2)]);
        assert_eq!(m.xids, vec![Xid(1), Xid(2)]);
    }
}
