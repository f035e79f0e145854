//! Persistent (immutable) B+tree over an opaque element type.
//!
//! This module provides [`PersistentBTree`], the ordered-container
//! engine behind [`PersistentTreeSet`](super::PersistentTreeSet) and
//! [`PersistentTreeMap`](super::PersistentTreeMap), together with its
//! transient counterpart [`TransientBTree`].
//!
//! # Overview
//!
//! The tree stores elements of an opaque type `E`, interpreted only
//! through two caller-supplied closures: a [`Comparator`] defining a
//! total order, and an [`ElementEquality`] that may be strictly finer
//! than the order. An insert whose element is ordered-equal but not
//! fully equal to a stored element *replaces* it, which is what lets a
//! map façade treat "same key, new value" as a value update.
//!
//! - O(log N) lookup, insert, remove
//! - O(1) length
//! - O(1) iterator creation, O(N) full traversal, ascending order
//! - "first element not below a probe" positioning via [`PersistentBTree::iter_from`]
//!
//! All updates return new trees that share unmodified nodes with the
//! input; a tree value is never mutated. Forking a tree into a
//! [`TransientBTree`] allows a batch of edits to run in place on nodes
//! owned by the editing session, producing the same final value as the
//! equivalent persistent calls with far fewer allocations.
//!
//! # Internal Structure
//!
//! Nodes hold up to 64 slots and, except for the root, at least 32.
//! Leaves carry the elements in sorted order; internal nodes carry one
//! separator key per child, the largest element of that child's
//! subtree, so every path decision is a binary search. All leaves sit
//! at the same depth, which bounds the height of any representable
//! tree by 13 levels.
//!
//! Ownership across the persistent/transient boundary hangs on a
//! single shared boolean cell per editing session, stored in every
//! node. While the cell reads `true` the nodes referencing it belong
//! to the live transient and may be edited in place; freezing the
//! transient flips the cell once, instantly demoting every node it
//! owns to immutable.

use std::cmp::Ordering;
use std::fmt;
use std::iter::FusedIterator;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use smallvec::SmallVec;

use super::{Comparator, ElementEquality, ReferenceCounter};

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of element slots in a leaf, and of children in an
/// internal node.
const MAX_LEN: usize = 64;

/// Minimum fill of every node except the root.
const MIN_LEN: usize = MAX_LEN / 2;

/// Extra slack given to leaves allocated under a live transient so the
/// next few inserts land in place.
const EXPAND_LEN: usize = 8;

/// Upper bound on the iterator stack depth. The height satisfies
/// `h <= log_32((n + 1) / 2)` and `n` fits a word, so
/// `log_2(usize::MAX) / log_2(32) = 64 / 5` rounded up covers every
/// representable tree.
const MAX_ITER_DEPTH: usize = (64 + 1) / 5;

/// Panic message raised by any use of a [`TransientBTree`] after
/// [`TransientBTree::persistent`] froze it.
pub const TRANSIENT_AFTER_PERSISTENT: &str = "transient used after persistent call";

// =============================================================================
// Edit Cell
// =============================================================================

/// Shared mutable boolean marking the nodes of one editing session.
///
/// Every node keeps a reference to the cell of the session that
/// created it. A node whose cell currently reads `true` is owned by
/// the live transient and may be mutated in place; a node whose cell
/// reads `false` is immutable forever. The cell is written exactly
/// once, with `Release` ordering when the transient freezes, and read
/// with `Acquire` on every editability check, so no thread that
/// observed the frozen state can observe a later in-place edit.
type EditCell = ReferenceCounter<AtomicBool>;

fn editing_cell() -> EditCell {
    ReferenceCounter::new(AtomicBool::new(true))
}

fn frozen_cell() -> EditCell {
    ReferenceCounter::new(AtomicBool::new(false))
}

fn is_editing(edit: &EditCell) -> bool {
    edit.load(AtomicOrdering::Acquire)
}

// =============================================================================
// Node Definition
// =============================================================================

type NodeRef<E> = ReferenceCounter<Node<E>>;

#[derive(Clone)]
enum Node<E> {
    Leaf(LeafNode<E>),
    Internal(InternalNode<E>),
}

#[derive(Clone)]
struct LeafNode<E> {
    /// Elements in ascending order.
    keys: Vec<E>,
    edit: EditCell,
}

#[derive(Clone)]
struct InternalNode<E> {
    /// `keys[i]` is the largest element of `children[i]`'s subtree.
    keys: Vec<E>,
    children: Vec<NodeRef<E>>,
    edit: EditCell,
}

impl<E> Node<E> {
    fn len(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.keys.len(),
            Self::Internal(internal) => internal.children.len(),
        }
    }

    fn is_editable(&self) -> bool {
        match self {
            Self::Leaf(leaf) => is_editing(&leaf.edit),
            Self::Internal(internal) => is_editing(&internal.edit),
        }
    }

    fn max_key(&self) -> &E {
        let key = match self {
            Self::Leaf(leaf) => leaf.keys.last(),
            Self::Internal(internal) => internal.keys.last(),
        };
        key.expect("a node referenced by a parent is never empty")
    }

    /// Siblings handed to a node during removal always share its
    /// variant: all leaves sit at the same depth.
    fn as_leaf(&self) -> &LeafNode<E> {
        match self {
            Self::Leaf(leaf) => leaf,
            Self::Internal(_) => unreachable!("a leaf's sibling is always a leaf"),
        }
    }

    fn as_internal(&self) -> &InternalNode<E> {
        match self {
            Self::Internal(internal) => internal,
            Self::Leaf(_) => unreachable!("an internal node's sibling is always internal"),
        }
    }
}

/// Allocates the key storage for a new leaf. Under a live transient
/// the buffer gets `EXPAND_LEN` slots of slack, capped at `MAX_LEN`,
/// so the next few in-place inserts need no reallocation.
fn leaf_buffer<E>(expected_len: usize, edit: &EditCell) -> Vec<E> {
    if is_editing(edit) {
        Vec::with_capacity(MAX_LEN.min(expected_len + EXPAND_LEN))
    } else {
        Vec::with_capacity(expected_len)
    }
}

impl<E> LeafNode<E> {
    fn into_ref(keys: Vec<E>, edit: &EditCell) -> NodeRef<E> {
        ReferenceCounter::new(Node::Leaf(Self {
            keys,
            edit: edit.clone(),
        }))
    }
}

impl<E> InternalNode<E> {
    fn into_ref(keys: Vec<E>, children: Vec<NodeRef<E>>, edit: &EditCell) -> NodeRef<E> {
        ReferenceCounter::new(Node::Internal(Self {
            keys,
            children,
            edit: edit.clone(),
        }))
    }
}

// =============================================================================
// Key Probing
// =============================================================================

/// Where a probed element lands in a node's key array.
enum KeySlot {
    /// An ordered-equal, fully equal element is already present.
    Matched,
    /// An ordered-equal element sits at this index but differs under
    /// the equality closure; it must be overwritten.
    Outdated(usize),
    /// No ordered-equal element; inserting keeps order at this index.
    Vacant(usize),
}

/// Index of the first key not below the probe described by `locate`.
///
/// `locate` reports the ordering of a stored element relative to the
/// probe, so `Ordering::Less` means "the stored element sorts before
/// the probe".
fn lower_bound<E, F>(keys: &[E], locate: &F) -> usize
where
    F: Fn(&E) -> Ordering,
{
    keys.partition_point(|key| locate(key) == Ordering::Less)
}

/// Binary search driven by a probe closure, in the style of
/// `slice::binary_search_by`: `Ok` carries the index of an
/// ordered-equal key, `Err` the insertion index.
fn locate_key<E, F>(keys: &[E], locate: &F) -> Result<usize, usize>
where
    F: Fn(&E) -> Ordering,
{
    let index = lower_bound(keys, locate);
    if index < keys.len() && locate(&keys[index]) == Ordering::Equal {
        Ok(index)
    } else {
        Err(index)
    }
}

/// Classifies an insert position against both closures.
fn locate_insert<E>(
    keys: &[E],
    element: &E,
    compare: &Comparator<E>,
    equal: &ElementEquality<E>,
) -> KeySlot {
    let index = keys.partition_point(|key| (**compare)(key, element) == Ordering::Less);
    if index < keys.len() && (**compare)(element, &keys[index]) == Ordering::Equal {
        if (**equal)(element, &keys[index]) {
            KeySlot::Matched
        } else {
            KeySlot::Outdated(index)
        }
    } else {
        KeySlot::Vacant(index)
    }
}

// =============================================================================
// Node Return Protocol
// =============================================================================

/// What a node reports to its parent after an insert descended
/// through it. Payloads of `None` mean the parent's child slot
/// already holds the mutated node and only the separator key needs
/// refreshing.
enum AddResult<E> {
    /// The element was already present in full; keep everything.
    Unchanged,
    /// The node mutated itself in place and its largest key did not
    /// move; the element count grew by one and nothing else changes
    /// upstream.
    MutatedInPlace,
    /// An ordered-equal element was overwritten; the count is
    /// unchanged.
    Replaced(Option<NodeRef<E>>),
    /// The element was inserted; the count grew by one.
    Inserted(Option<NodeRef<E>>),
    /// The node split; the parent must install both halves.
    Split(NodeRef<E>, NodeRef<E>),
}

/// What a node reports to its parent after a removal descended
/// through it.
enum RemoveResult<E> {
    Unchanged,
    /// The node compacted itself in place and its largest key did not
    /// move.
    MutatedInPlace,
    /// The slots of the node and its immediate siblings must be
    /// rewritten as (left, center, right). `None` on a side means
    /// that sibling slot disappeared into a join, or never existed.
    Rebalanced(Option<NodeRef<E>>, NodeRef<E>, Option<NodeRef<E>>),
}

/// How a node short of its minimum fill recovers, decided against its
/// immediate siblings.
enum RebalanceCase {
    /// Still at or above the minimum, or the node is the root: drop
    /// the slot and carry on.
    Compact,
    /// Left sibling and node fit in one: merge leftward.
    JoinLeft,
    /// Right sibling and node fit in one: merge rightward.
    JoinRight,
    /// Take elements from the larger (or session-owned) left sibling.
    BorrowLeft,
    /// Take elements from the right sibling.
    BorrowRight,
}

fn rebalance_case<E>(
    new_len: usize,
    left: Option<&Node<E>>,
    right: Option<&Node<E>>,
    prefer_editable_left: bool,
) -> RebalanceCase {
    let can_join = |sibling: Option<&Node<E>>| {
        sibling.is_some_and(|node| node.len() + new_len < MAX_LEN)
    };
    if new_len >= MIN_LEN || (left.is_none() && right.is_none()) {
        RebalanceCase::Compact
    } else if can_join(left) {
        RebalanceCase::JoinLeft
    } else if can_join(right) {
        RebalanceCase::JoinRight
    } else if left.is_some_and(|left_node| {
        (prefer_editable_left && left_node.is_editable())
            || right.is_none()
            || right.is_some_and(|right_node| left_node.len() >= right_node.len())
    }) {
        RebalanceCase::BorrowLeft
    } else {
        RebalanceCase::BorrowRight
    }
}

/// Read-only view of an optional mutable sibling slot.
fn sibling_node<'a, E>(slot: &'a Option<&mut NodeRef<E>>) -> Option<&'a Node<E>> {
    slot.as_deref().map(|reference| &**reference)
}

/// Pass-through clone of an optional sibling slot.
fn sibling_ref<E>(slot: &Option<&mut NodeRef<E>>) -> Option<NodeRef<E>> {
    slot.as_deref().cloned()
}

/// In-place access to a leaf behind its slot. Only reached for
/// session-owned nodes, which are uniquely referenced, so the
/// copy-on-write fallback inside `make_mut` never fires.
fn leaf_mut<E: Clone>(reference: &mut NodeRef<E>) -> &mut LeafNode<E> {
    match ReferenceCounter::make_mut(reference) {
        Node::Leaf(leaf) => leaf,
        Node::Internal(_) => unreachable!("a leaf's sibling is always a leaf"),
    }
}

// =============================================================================
// Insert
// =============================================================================

impl<E: Clone> Node<E> {
    /// Insert entry point for subtrees that may contain session-owned
    /// nodes. Frozen nodes take the copying path; editable nodes are
    /// mutated through their slot.
    fn add(
        node: &mut NodeRef<E>,
        element: E,
        compare: &Comparator<E>,
        equal: &ElementEquality<E>,
        edit: &EditCell,
    ) -> AddResult<E> {
        if !node.is_editable() {
            Self::add_copied(node, element, compare, equal, edit)
        } else if matches!(&**node, Self::Leaf(_)) {
            let Self::Leaf(leaf) = ReferenceCounter::make_mut(node) else {
                unreachable!("node variant checked above")
            };
            leaf.add_in_place(element, compare, equal, edit)
        } else {
            InternalNode::add_in_place(node, element, compare, equal, edit)
        }
    }

    /// Insert into a frozen subtree. Never mutates; every structural
    /// change builds replacement nodes tagged with `edit`, so a
    /// transient's first touch of shared structure yields nodes it
    /// owns from then on.
    fn add_copied(
        node: &Self,
        element: E,
        compare: &Comparator<E>,
        equal: &ElementEquality<E>,
        edit: &EditCell,
    ) -> AddResult<E> {
        match node {
            Self::Leaf(leaf) => leaf.add_copied(element, compare, equal, edit),
            Self::Internal(internal) => internal.add_copied(element, compare, equal, edit),
        }
    }
}

impl<E: Clone> LeafNode<E> {
    fn add_copied(
        &self,
        element: E,
        compare: &Comparator<E>,
        equal: &ElementEquality<E>,
        edit: &EditCell,
    ) -> AddResult<E> {
        match locate_insert(&self.keys, &element, compare, equal) {
            KeySlot::Matched => AddResult::Unchanged,
            KeySlot::Outdated(index) => {
                AddResult::Replaced(Some(self.copy_and_replace(index, element, edit)))
            }
            KeySlot::Vacant(index) if self.keys.len() < MAX_LEN => {
                AddResult::Inserted(Some(self.copy_and_insert(index, element, edit)))
            }
            KeySlot::Vacant(index) => {
                let (first, second) = self.split_with(index, element, edit);
                AddResult::Split(first, second)
            }
        }
    }

    fn add_in_place(
        &mut self,
        element: E,
        compare: &Comparator<E>,
        equal: &ElementEquality<E>,
        edit: &EditCell,
    ) -> AddResult<E> {
        match locate_insert(&self.keys, &element, compare, equal) {
            KeySlot::Matched => AddResult::Unchanged,
            KeySlot::Outdated(index) => {
                self.keys[index] = element;
                AddResult::Replaced(None)
            }
            KeySlot::Vacant(index) if self.keys.len() < MAX_LEN => {
                if index == self.keys.len() {
                    // Appending moves the largest key; the parent has
                    // to refresh its separator.
                    self.keys.push(element);
                    AddResult::Inserted(None)
                } else {
                    self.keys.insert(index, element);
                    AddResult::MutatedInPlace
                }
            }
            KeySlot::Vacant(index) => {
                let (first, second) = self.split_with(index, element, edit);
                AddResult::Split(first, second)
            }
        }
    }

    fn copy_and_replace(&self, index: usize, element: E, edit: &EditCell) -> NodeRef<E> {
        let mut keys = leaf_buffer(self.keys.len(), edit);
        keys.extend_from_slice(&self.keys);
        keys[index] = element;
        Self::into_ref(keys, edit)
    }

    fn copy_and_insert(&self, index: usize, element: E, edit: &EditCell) -> NodeRef<E> {
        let mut keys = leaf_buffer(self.keys.len() + 1, edit);
        keys.extend_from_slice(&self.keys[..index]);
        keys.push(element);
        keys.extend_from_slice(&self.keys[index..]);
        Self::into_ref(keys, edit)
    }

    /// Splits a full leaf around a fresh element. The element joins
    /// whichever half its position falls into.
    fn split_with(&self, index: usize, element: E, edit: &EditCell) -> (NodeRef<E>, NodeRef<E>) {
        let first_len = (self.keys.len() + 1) / 2;
        let second_len = self.keys.len() + 1 - first_len;
        if index < first_len {
            let mut first = leaf_buffer(first_len, edit);
            first.extend_from_slice(&self.keys[..index]);
            first.push(element);
            first.extend_from_slice(&self.keys[index..first_len - 1]);
            let mut second = leaf_buffer(second_len, edit);
            second.extend_from_slice(&self.keys[first_len - 1..]);
            (Self::into_ref(first, edit), Self::into_ref(second, edit))
        } else {
            let mut first = leaf_buffer(first_len, edit);
            first.extend_from_slice(&self.keys[..first_len]);
            let mut second = leaf_buffer(second_len, edit);
            second.extend_from_slice(&self.keys[first_len..index]);
            second.push(element);
            second.extend_from_slice(&self.keys[index..]);
            (Self::into_ref(first, edit), Self::into_ref(second, edit))
        }
    }
}

impl<E: Clone> InternalNode<E> {
    /// Picks the child to descend into for `element`: the slot of the
    /// first separator not below it, with keys above every separator
    /// absorbed by the rightmost child.
    fn descent_slot(
        &self,
        element: &E,
        compare: &Comparator<E>,
        equal: &ElementEquality<E>,
    ) -> Option<usize> {
        match locate_insert(&self.keys, element, compare, equal) {
            KeySlot::Matched => None,
            KeySlot::Outdated(index) => Some(index),
            KeySlot::Vacant(index) => Some(index.min(self.children.len() - 1)),
        }
    }

    fn add_copied(
        &self,
        element: E,
        compare: &Comparator<E>,
        equal: &ElementEquality<E>,
        edit: &EditCell,
    ) -> AddResult<E> {
        let Some(slot) = self.descent_slot(&element, compare, equal) else {
            return AddResult::Unchanged;
        };
        match Node::add_copied(&self.children[slot], element, compare, equal, edit) {
            AddResult::Unchanged => AddResult::Unchanged,
            AddResult::Replaced(Some(child)) => {
                AddResult::Replaced(Some(self.copy_and_modify(slot, child, edit)))
            }
            AddResult::Inserted(Some(child)) => {
                AddResult::Inserted(Some(self.copy_and_modify(slot, child, edit)))
            }
            AddResult::Split(first, second) => self.absorb_split(slot, first, second, edit),
            AddResult::MutatedInPlace | AddResult::Replaced(None) | AddResult::Inserted(None) => {
                unreachable!("frozen subtrees never mutate in place")
            }
        }
    }

    /// Insert through an editable internal node. The receiving slot
    /// is rewired in place; only splits force fresh nodes.
    fn add_in_place(
        node_ref: &mut NodeRef<E>,
        element: E,
        compare: &Comparator<E>,
        equal: &ElementEquality<E>,
        edit: &EditCell,
    ) -> AddResult<E> {
        let Node::Internal(node) = ReferenceCounter::make_mut(node_ref) else {
            unreachable!("add_in_place dispatched on an internal node")
        };
        let Some(slot) = node.descent_slot(&element, compare, equal) else {
            return AddResult::Unchanged;
        };
        match Node::add(&mut node.children[slot], element, compare, equal, edit) {
            AddResult::Unchanged => AddResult::Unchanged,
            AddResult::MutatedInPlace => AddResult::MutatedInPlace,
            AddResult::Replaced(child) => {
                node.install(slot, child);
                AddResult::Replaced(None)
            }
            AddResult::Inserted(child) => {
                node.install(slot, child);
                if slot + 1 == node.children.len() {
                    // The largest key moved; the parent refreshes its
                    // separator in turn.
                    AddResult::Inserted(None)
                } else {
                    AddResult::MutatedInPlace
                }
            }
            AddResult::Split(first, second) => node.absorb_split(slot, first, second, edit),
        }
    }

    fn install(&mut self, slot: usize, child: Option<NodeRef<E>>) {
        if let Some(child) = child {
            self.children[slot] = child;
        }
        self.keys[slot] = self.children[slot].max_key().clone();
    }

    fn absorb_split(
        &self,
        slot: usize,
        first: NodeRef<E>,
        second: NodeRef<E>,
        edit: &EditCell,
    ) -> AddResult<E> {
        if self.children.len() < MAX_LEN {
            AddResult::Inserted(Some(self.copy_and_graft(slot, first, second, edit)))
        } else {
            let (left, right) = self.split_with(slot, first, second, edit);
            AddResult::Split(left, right)
        }
    }

    /// Copy with one child slot replaced and its separator refreshed.
    fn copy_and_modify(&self, slot: usize, child: NodeRef<E>, edit: &EditCell) -> NodeRef<E> {
        let mut keys = self.keys.clone();
        keys[slot] = child.max_key().clone();
        let mut children = self.children.clone();
        children[slot] = child;
        Self::into_ref(keys, children, edit)
    }

    /// Copy with the split pair stitched in where the old child sat.
    fn copy_and_graft(
        &self,
        slot: usize,
        first: NodeRef<E>,
        second: NodeRef<E>,
        edit: &EditCell,
    ) -> NodeRef<E> {
        let new_len = self.children.len() + 1;
        let mut keys = Vec::with_capacity(new_len);
        let mut children = Vec::with_capacity(new_len);
        keys.extend_from_slice(&self.keys[..slot]);
        children.extend_from_slice(&self.children[..slot]);
        keys.push(first.max_key().clone());
        children.push(first);
        keys.push(second.max_key().clone());
        children.push(second);
        keys.extend_from_slice(&self.keys[slot + 1..]);
        children.extend_from_slice(&self.children[slot + 1..]);
        Self::into_ref(keys, children, edit)
    }

    /// Splits a full internal node while absorbing a split pair from
    /// the child at `slot`. The halves are sized so the pair never
    /// straddles the cut.
    fn split_with(
        &self,
        slot: usize,
        first_child: NodeRef<E>,
        second_child: NodeRef<E>,
        edit: &EditCell,
    ) -> (NodeRef<E>, NodeRef<E>) {
        let len = self.children.len();
        let mut first_len = (len + 1) / 2;
        if slot + 1 == first_len {
            first_len += 1;
        }
        let second_len = len + 1 - first_len;

        let mut first_keys = Vec::with_capacity(first_len);
        let mut first_children = Vec::with_capacity(first_len);
        let mut second_keys = Vec::with_capacity(second_len);
        let mut second_children = Vec::with_capacity(second_len);

        if slot < first_len {
            first_keys.extend_from_slice(&self.keys[..slot]);
            first_children.extend_from_slice(&self.children[..slot]);
            first_keys.push(first_child.max_key().clone());
            first_children.push(first_child);
            first_keys.push(second_child.max_key().clone());
            first_children.push(second_child);
            first_keys.extend_from_slice(&self.keys[slot + 1..first_len - 1]);
            first_children.extend_from_slice(&self.children[slot + 1..first_len - 1]);
            second_keys.extend_from_slice(&self.keys[first_len - 1..]);
            second_children.extend_from_slice(&self.children[first_len - 1..]);
        } else {
            first_keys.extend_from_slice(&self.keys[..first_len]);
            first_children.extend_from_slice(&self.children[..first_len]);
            second_keys.extend_from_slice(&self.keys[first_len..slot]);
            second_children.extend_from_slice(&self.children[first_len..slot]);
            second_keys.push(first_child.max_key().clone());
            second_children.push(first_child);
            second_keys.push(second_child.max_key().clone());
            second_children.push(second_child);
            second_keys.extend_from_slice(&self.keys[slot + 1..]);
            second_children.extend_from_slice(&self.children[slot + 1..]);
        }

        (
            Self::into_ref(first_keys, first_children, edit),
            Self::into_ref(second_keys, second_children, edit),
        )
    }
}

// =============================================================================
// Remove
// =============================================================================

impl<E: Clone> Node<E> {
    /// Removal entry point for subtrees that may contain
    /// session-owned nodes. Sibling slots come along so a node short
    /// of its minimum can join or borrow without re-walking; editable
    /// siblings may be reshaped in place.
    fn remove<F>(
        node: &mut NodeRef<E>,
        left: Option<&mut NodeRef<E>>,
        right: Option<&mut NodeRef<E>>,
        locate: &F,
        edit: &EditCell,
    ) -> RemoveResult<E>
    where
        F: Fn(&E) -> Ordering,
    {
        if !node.is_editable() {
            Self::remove_copied(node, left.as_deref(), right.as_deref(), locate, edit)
        } else if matches!(&**node, Self::Leaf(_)) {
            LeafNode::remove_in_place(node, left, right, locate, edit)
        } else {
            InternalNode::remove_in_place(node, left, right, locate, edit)
        }
    }

    /// Removal from a frozen subtree. Builds replacement nodes; the
    /// inputs, siblings included, are never touched.
    fn remove_copied<F>(
        node: &NodeRef<E>,
        left: Option<&NodeRef<E>>,
        right: Option<&NodeRef<E>>,
        locate: &F,
        edit: &EditCell,
    ) -> RemoveResult<E>
    where
        F: Fn(&E) -> Ordering,
    {
        match &**node {
            Self::Leaf(leaf) => leaf.remove_copied(left, right, locate, edit),
            Self::Internal(internal) => internal.remove_copied(left, right, locate, edit),
        }
    }
}

impl<E: Clone> LeafNode<E> {
    fn remove_copied<F>(
        &self,
        left: Option<&NodeRef<E>>,
        right: Option<&NodeRef<E>>,
        locate: &F,
        edit: &EditCell,
    ) -> RemoveResult<E>
    where
        F: Fn(&E) -> Ordering,
    {
        let Ok(index) = locate_key(&self.keys, locate) else {
            return RemoveResult::Unchanged;
        };
        let new_len = self.keys.len() - 1;
        let left_node = left.map(|reference| &**reference);
        let right_node = right.map(|reference| &**reference);
        match rebalance_case(new_len, left_node, right_node, true) {
            RebalanceCase::Compact => {
                let mut keys = leaf_buffer(new_len, edit);
                keys.extend_from_slice(&self.keys[..index]);
                keys.extend_from_slice(&self.keys[index + 1..]);
                RemoveResult::Rebalanced(
                    left.cloned(),
                    Self::into_ref(keys, edit),
                    right.cloned(),
                )
            }
            RebalanceCase::JoinLeft => {
                let left_leaf = left_node.map(Node::as_leaf).expect("join-left needs a left sibling");
                let mut keys = leaf_buffer(left_leaf.keys.len() + new_len, edit);
                keys.extend_from_slice(&left_leaf.keys);
                keys.extend_from_slice(&self.keys[..index]);
                keys.extend_from_slice(&self.keys[index + 1..]);
                RemoveResult::Rebalanced(None, Self::into_ref(keys, edit), right.cloned())
            }
            RebalanceCase::JoinRight => {
                let right_leaf = right_node.map(Node::as_leaf).expect("join-right needs a right sibling");
                let mut keys = leaf_buffer(new_len + right_leaf.keys.len(), edit);
                keys.extend_from_slice(&self.keys[..index]);
                keys.extend_from_slice(&self.keys[index + 1..]);
                keys.extend_from_slice(&right_leaf.keys);
                RemoveResult::Rebalanced(left.cloned(), Self::into_ref(keys, edit), None)
            }
            RebalanceCase::BorrowLeft => {
                let left_leaf = left_node.map(Node::as_leaf).expect("borrow-left needs a left sibling");
                let total = left_leaf.keys.len() + new_len;
                let new_left_len = total / 2;
                let mut kept = leaf_buffer(new_left_len, edit);
                kept.extend_from_slice(&left_leaf.keys[..new_left_len]);
                let mut center = leaf_buffer(total - new_left_len, edit);
                center.extend_from_slice(&left_leaf.keys[new_left_len..]);
                center.extend_from_slice(&self.keys[..index]);
                center.extend_from_slice(&self.keys[index + 1..]);
                RemoveResult::Rebalanced(
                    Some(Self::into_ref(kept, edit)),
                    Self::into_ref(center, edit),
                    right.cloned(),
                )
            }
            RebalanceCase::BorrowRight => {
                let right_leaf = right_node.map(Node::as_leaf).expect("borrow-right needs a right sibling");
                let total = new_len + right_leaf.keys.len();
                let new_center_len = total / 2;
                let right_head = right_leaf.keys.len() - (total - new_center_len);
                let mut center = leaf_buffer(new_center_len, edit);
                center.extend_from_slice(&self.keys[..index]);
                center.extend_from_slice(&self.keys[index + 1..]);
                center.extend_from_slice(&right_leaf.keys[..right_head]);
                let mut kept = leaf_buffer(total - new_center_len, edit);
                kept.extend_from_slice(&right_leaf.keys[right_head..]);
                RemoveResult::Rebalanced(
                    left.cloned(),
                    Self::into_ref(center, edit),
                    Some(Self::into_ref(kept, edit)),
                )
            }
        }
    }

    /// Removal through an editable leaf. The leaf, and any editable
    /// sibling dragged into a borrow, are reshaped in place.
    fn remove_in_place<F>(
        node_ref: &mut NodeRef<E>,
        left: Option<&mut NodeRef<E>>,
        right: Option<&mut NodeRef<E>>,
        locate: &F,
        edit: &EditCell,
    ) -> RemoveResult<E>
    where
        F: Fn(&E) -> Ordering,
    {
        let (index, new_len, case) = {
            let Node::Leaf(leaf) = &**node_ref else {
                unreachable!("remove_in_place dispatched on a leaf")
            };
            let Ok(index) = locate_key(&leaf.keys, locate) else {
                return RemoveResult::Unchanged;
            };
            let new_len = leaf.keys.len() - 1;
            let case = rebalance_case(new_len, sibling_node(&left), sibling_node(&right), true);
            (index, new_len, case)
        };

        match case {
            RebalanceCase::Compact => {
                leaf_mut(node_ref).keys.remove(index);
                if index == new_len {
                    // The largest key moved; hand the untouched
                    // siblings back so the parent rewrites its
                    // separators.
                    RemoveResult::Rebalanced(
                        sibling_ref(&left),
                        node_ref.clone(),
                        sibling_ref(&right),
                    )
                } else {
                    RemoveResult::MutatedInPlace
                }
            }
            RebalanceCase::JoinLeft => {
                let join = {
                    let left_leaf = sibling_node(&left)
                        .map(Node::as_leaf)
                        .expect("join-left needs a left sibling");
                    let Node::Leaf(leaf) = &**node_ref else {
                        unreachable!("remove_in_place dispatched on a leaf")
                    };
                    let mut keys = leaf_buffer(left_leaf.keys.len() + new_len, edit);
                    keys.extend_from_slice(&left_leaf.keys);
                    keys.extend_from_slice(&leaf.keys[..index]);
                    keys.extend_from_slice(&leaf.keys[index + 1..]);
                    Self::into_ref(keys, edit)
                };
                RemoveResult::Rebalanced(None, join, sibling_ref(&right))
            }
            RebalanceCase::JoinRight => {
                let join = {
                    let right_leaf = sibling_node(&right)
                        .map(Node::as_leaf)
                        .expect("join-right needs a right sibling");
                    let Node::Leaf(leaf) = &**node_ref else {
                        unreachable!("remove_in_place dispatched on a leaf")
                    };
                    let mut keys = leaf_buffer(new_len + right_leaf.keys.len(), edit);
                    keys.extend_from_slice(&leaf.keys[..index]);
                    keys.extend_from_slice(&leaf.keys[index + 1..]);
                    keys.extend_from_slice(&right_leaf.keys);
                    Self::into_ref(keys, edit)
                };
                RemoveResult::Rebalanced(sibling_ref(&left), join, None)
            }
            RebalanceCase::BorrowLeft => {
                let right_pass = sibling_ref(&right);
                let left_ref = left.expect("borrow-left needs a left sibling");
                let left_len = left_ref.len();
                let total = left_len + new_len;
                let new_left_len = total / 2;
                let (new_left, moved_tail) = if left_ref.is_editable() {
                    let tail = leaf_mut(left_ref).keys.split_off(new_left_len);
                    (left_ref.clone(), tail)
                } else {
                    let left_leaf = left_ref.as_leaf();
                    let tail = left_leaf.keys[new_left_len..].to_vec();
                    let mut kept = leaf_buffer(new_left_len, edit);
                    kept.extend_from_slice(&left_leaf.keys[..new_left_len]);
                    (Self::into_ref(kept, edit), tail)
                };
                {
                    let leaf = leaf_mut(node_ref);
                    leaf.keys.remove(index);
                    let mut keys = moved_tail;
                    keys.append(&mut leaf.keys);
                    leaf.keys = keys;
                }
                RemoveResult::Rebalanced(Some(new_left), node_ref.clone(), right_pass)
            }
            RebalanceCase::BorrowRight => {
                let left_pass = sibling_ref(&left);
                let right_ref = right.expect("borrow-right needs a right sibling");
                let right_len = right_ref.len();
                let total = new_len + right_len;
                let new_center_len = total / 2;
                let right_head = right_len - (total - new_center_len);
                let (new_right, moved_head) = if right_ref.is_editable() {
                    let head: Vec<E> = leaf_mut(right_ref).keys.drain(..right_head).collect();
                    (right_ref.clone(), head)
                } else {
                    let right_leaf = right_ref.as_leaf();
                    let head = right_leaf.keys[..right_head].to_vec();
                    let mut kept = leaf_buffer(right_len - right_head, edit);
                    kept.extend_from_slice(&right_leaf.keys[right_head..]);
                    (Self::into_ref(kept, edit), head)
                };
                {
                    let leaf = leaf_mut(node_ref);
                    leaf.keys.remove(index);
                    leaf.keys.extend(moved_head);
                }
                RemoveResult::Rebalanced(left_pass, node_ref.clone(), Some(new_right))
            }
        }
    }
}

impl<E: Clone> InternalNode<E> {
    /// Collects this node's slot list with the slots around `index`
    /// replaced by the child's rebalanced nodes, separators refreshed.
    fn rebuilt_slots(
        &self,
        index: usize,
        new_len: usize,
        replacements: [Option<NodeRef<E>>; 3],
    ) -> (Vec<E>, Vec<NodeRef<E>>) {
        let prefix = index.saturating_sub(1);
        let mut keys = Vec::with_capacity(new_len);
        let mut children = Vec::with_capacity(new_len);
        keys.extend_from_slice(&self.keys[..prefix]);
        children.extend_from_slice(&self.children[..prefix]);
        for node in replacements.into_iter().flatten() {
            keys.push(node.max_key().clone());
            children.push(node);
        }
        if index + 2 <= self.children.len() {
            keys.extend_from_slice(&self.keys[index + 2..]);
            children.extend_from_slice(&self.children[index + 2..]);
        }
        (keys, children)
    }

    fn remove_copied<F>(
        &self,
        left: Option<&NodeRef<E>>,
        right: Option<&NodeRef<E>>,
        locate: &F,
        edit: &EditCell,
    ) -> RemoveResult<E>
    where
        F: Fn(&E) -> Ordering,
    {
        let index = match locate_key(&self.keys, locate) {
            Ok(index) | Err(index) => index,
        };
        if index == self.children.len() {
            return RemoveResult::Unchanged;
        }
        let left_child = (index > 0).then(|| &self.children[index - 1]);
        let right_child = (index + 1 < self.children.len()).then(|| &self.children[index + 1]);
        let had_left_child = left_child.is_some();
        let had_right_child = right_child.is_some();

        let result =
            Node::remove_copied(&self.children[index], left_child, right_child, locate, edit);
        let (new_left, center, new_right) = match result {
            RemoveResult::Unchanged => return RemoveResult::Unchanged,
            RemoveResult::MutatedInPlace => {
                unreachable!("frozen subtrees never mutate in place")
            }
            RemoveResult::Rebalanced(new_left, center, new_right) => (new_left, center, new_right),
        };

        let new_len = self.children.len() - usize::from(had_left_child)
            - usize::from(had_right_child)
            + usize::from(new_left.is_some())
            + usize::from(new_right.is_some());
        let replacements = [new_left, Some(center), new_right];
        self.settle(index, new_len, replacements, left, right, edit)
    }

    /// Applies the child's rebalance outcome to a copy of this node
    /// and resolves this node's own underflow against its siblings.
    fn settle(
        &self,
        index: usize,
        new_len: usize,
        replacements: [Option<NodeRef<E>>; 3],
        left: Option<&NodeRef<E>>,
        right: Option<&NodeRef<E>>,
        edit: &EditCell,
    ) -> RemoveResult<E> {
        let left_node = left.map(|reference| &**reference);
        let right_node = right.map(|reference| &**reference);
        match rebalance_case(new_len, left_node, right_node, false) {
            RebalanceCase::Compact => {
                let (keys, children) = self.rebuilt_slots(index, new_len, replacements);
                RemoveResult::Rebalanced(
                    left.cloned(),
                    Self::into_ref(keys, children, edit),
                    right.cloned(),
                )
            }
            RebalanceCase::JoinLeft => {
                let left_internal = left_node
                    .map(Node::as_internal)
                    .expect("join-left needs a left sibling");
                let (slot_keys, slot_children) = self.rebuilt_slots(index, new_len, replacements);
                let total = left_internal.children.len() + new_len;
                let mut keys = Vec::with_capacity(total);
                let mut children = Vec::with_capacity(total);
                keys.extend_from_slice(&left_internal.keys);
                children.extend_from_slice(&left_internal.children);
                keys.extend(slot_keys);
                children.extend(slot_children);
                RemoveResult::Rebalanced(None, Self::into_ref(keys, children, edit), right.cloned())
            }
            RebalanceCase::JoinRight => {
                let right_internal = right_node
                    .map(Node::as_internal)
                    .expect("join-right needs a right sibling");
                let total = new_len + right_internal.children.len();
                let (mut keys, mut children) = self.rebuilt_slots(index, new_len, replacements);
                keys.reserve(total - new_len);
                children.reserve(total - new_len);
                keys.extend_from_slice(&right_internal.keys);
                children.extend_from_slice(&right_internal.children);
                RemoveResult::Rebalanced(left.cloned(), Self::into_ref(keys, children, edit), None)
            }
            RebalanceCase::BorrowLeft => {
                let left_internal = left_node
                    .map(Node::as_internal)
                    .expect("borrow-left needs a left sibling");
                let total = left_internal.children.len() + new_len;
                let new_left_len = total / 2;
                let mut kept_keys = Vec::with_capacity(new_left_len);
                let mut kept_children = Vec::with_capacity(new_left_len);
                kept_keys.extend_from_slice(&left_internal.keys[..new_left_len]);
                kept_children.extend_from_slice(&left_internal.children[..new_left_len]);

                let (slot_keys, slot_children) = self.rebuilt_slots(index, new_len, replacements);
                let mut center_keys = Vec::with_capacity(total - new_left_len);
                let mut center_children = Vec::with_capacity(total - new_left_len);
                center_keys.extend_from_slice(&left_internal.keys[new_left_len..]);
                center_children.extend_from_slice(&left_internal.children[new_left_len..]);
                center_keys.extend(slot_keys);
                center_children.extend(slot_children);

                RemoveResult::Rebalanced(
                    Some(Self::into_ref(kept_keys, kept_children, edit)),
                    Self::into_ref(center_keys, center_children, edit),
                    right.cloned(),
                )
            }
            RebalanceCase::BorrowRight => {
                let right_internal = right_node
                    .map(Node::as_internal)
                    .expect("borrow-right needs a right sibling");
                let total = new_len + right_internal.children.len();
                let new_center_len = total / 2;
                let right_head = right_internal.children.len() - (total - new_center_len);

                let (mut center_keys, mut center_children) =
                    self.rebuilt_slots(index, new_len, replacements);
                center_keys.extend_from_slice(&right_internal.keys[..right_head]);
                center_children.extend_from_slice(&right_internal.children[..right_head]);

                let mut kept_keys = Vec::with_capacity(total - new_center_len);
                let mut kept_children = Vec::with_capacity(total - new_center_len);
                kept_keys.extend_from_slice(&right_internal.keys[right_head..]);
                kept_children.extend_from_slice(&right_internal.children[right_head..]);

                RemoveResult::Rebalanced(
                    left.cloned(),
                    Self::into_ref(center_keys, center_children, edit),
                    Some(Self::into_ref(kept_keys, kept_children, edit)),
                )
            }
        }
    }

    /// Removal through an editable internal node. The descent borrows
    /// the child slot together with its two neighbors so the child
    /// can join or borrow without re-walking; the outcome is spliced
    /// back into this node's slot arrays.
    fn remove_in_place<F>(
        node_ref: &mut NodeRef<E>,
        left: Option<&mut NodeRef<E>>,
        right: Option<&mut NodeRef<E>>,
        locate: &F,
        edit: &EditCell,
    ) -> RemoveResult<E>
    where
        F: Fn(&E) -> Ordering,
    {
        let (index, len) = {
            let Node::Internal(node) = &**node_ref else {
                unreachable!("remove_in_place dispatched on an internal node")
            };
            let index = match locate_key(&node.keys, locate) {
                Ok(index) | Err(index) => index,
            };
            if index == node.children.len() {
                return RemoveResult::Unchanged;
            }
            (index, node.children.len())
        };
        let had_left_child = index > 0;
        let had_right_child = index + 1 < len;

        let result = {
            let Node::Internal(node) = ReferenceCounter::make_mut(node_ref) else {
                unreachable!("remove_in_place dispatched on an internal node")
            };
            let (before, rest) = node.children.split_at_mut(index);
            let (center, after) = rest.split_at_mut(1);
            Node::remove(&mut center[0], before.last_mut(), after.first_mut(), locate, edit)
        };

        let (new_left, center, new_right) = match result {
            RemoveResult::Unchanged => return RemoveResult::Unchanged,
            RemoveResult::MutatedInPlace => return RemoveResult::MutatedInPlace,
            RemoveResult::Rebalanced(new_left, center, new_right) => (new_left, center, new_right),
        };

        let new_len = len - usize::from(had_left_child) - usize::from(had_right_child)
            + usize::from(new_left.is_some())
            + usize::from(new_right.is_some());
        let replacements = [new_left, Some(center), new_right];

        let case = rebalance_case(new_len, sibling_node(&left), sibling_node(&right), false);
        if matches!(case, RebalanceCase::Compact) && index + 2 < len {
            // The splice stays clear of the last slot, so the largest
            // key cannot move and nothing changes upstream.
            let Node::Internal(node) = ReferenceCounter::make_mut(node_ref) else {
                unreachable!("remove_in_place dispatched on an internal node")
            };
            let start = index.saturating_sub(1);
            let end = index + 2;
            let mut new_keys = Vec::with_capacity(3);
            let mut new_children = Vec::with_capacity(3);
            for child in replacements.into_iter().flatten() {
                new_keys.push(child.max_key().clone());
                new_children.push(child);
            }
            drop(node.keys.splice(start..end, new_keys));
            drop(node.children.splice(start..end, new_children));
            return RemoveResult::MutatedInPlace;
        }

        let Node::Internal(node) = &**node_ref else {
            unreachable!("remove_in_place dispatched on an internal node")
        };
        node.settle(
            index,
            new_len,
            replacements,
            left.as_deref(),
            right.as_deref(),
            edit,
        )
    }
}

// =============================================================================
// Lookup
// =============================================================================

impl<E> Node<E> {
    /// Iterative descent to the element matching the probe, if any.
    /// An exact hit on a separator key short-circuits: the separator
    /// is a copy of the stored element itself.
    fn find<'a, F>(mut node: &'a Self, locate: &F) -> Option<&'a E>
    where
        F: Fn(&E) -> Ordering,
    {
        loop {
            match node {
                Self::Leaf(leaf) => {
                    return locate_key(&leaf.keys, locate)
                        .ok()
                        .map(|index| &leaf.keys[index]);
                }
                Self::Internal(internal) => match locate_key(&internal.keys, locate) {
                    Ok(index) => return Some(&internal.keys[index]),
                    Err(index) => {
                        if index == internal.children.len() {
                            return None;
                        }
                        node = &internal.children[index];
                    }
                },
            }
        }
    }
}

// =============================================================================
// Iterator
// =============================================================================

struct IteratorFrame<'a, E> {
    node: &'a Node<E>,
    cursor: usize,
}

impl<E> Clone for IteratorFrame<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for IteratorFrame<'_, E> {}

/// Ascending in-order iterator over a tree.
///
/// The traversal keeps an explicit stack of at most 13 frames, enough
/// for any representable tree, held inline; iteration never
/// allocates.
pub struct PersistentBTreeIterator<'a, E> {
    stack: SmallVec<[IteratorFrame<'a, E>; MAX_ITER_DEPTH]>,
}

impl<E> Clone for PersistentBTreeIterator<'_, E> {
    fn clone(&self) -> Self {
        Self {
            stack: self.stack.clone(),
        }
    }
}

impl<'a, E> PersistentBTreeIterator<'a, E> {
    fn new(root: &'a Node<E>) -> Self {
        let mut stack = SmallVec::new();
        stack.push(IteratorFrame {
            node: root,
            cursor: 0,
        });
        Self { stack }
    }

    /// Positions the iterator at the first element not below the
    /// probe: descend, at each internal level resuming after the
    /// chosen child, and land the leaf cursor on the lower bound.
    fn seek<F>(&mut self, locate: &F)
    where
        F: Fn(&E) -> Ordering,
    {
        loop {
            let depth = self.stack.len() - 1;
            match self.stack[depth].node {
                Node::Leaf(leaf) => {
                    self.stack[depth].cursor = lower_bound(&leaf.keys, locate);
                    return;
                }
                Node::Internal(internal) => {
                    let first = lower_bound(&internal.keys, locate);
                    if first == internal.children.len() {
                        self.stack[depth].cursor = first;
                        return;
                    }
                    self.stack[depth].cursor = first + 1;
                    self.stack.push(IteratorFrame {
                        node: &internal.children[first],
                        cursor: 0,
                    });
                }
            }
        }
    }
}

impl<'a, E> Iterator for PersistentBTreeIterator<'a, E> {
    type Item = &'a E;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let depth = self.stack.len().checked_sub(1)?;
            let IteratorFrame { node, cursor } = self.stack[depth];
            match node {
                Node::Leaf(leaf) => {
                    if cursor < leaf.keys.len() {
                        self.stack[depth].cursor += 1;
                        return Some(&leaf.keys[cursor]);
                    }
                    self.stack.pop();
                }
                Node::Internal(internal) => {
                    if cursor < internal.children.len() {
                        self.stack[depth].cursor += 1;
                        self.stack.push(IteratorFrame {
                            node: &internal.children[cursor],
                            cursor: 0,
                        });
                    } else {
                        self.stack.pop();
                    }
                }
            }
        }
    }
}

impl<E> FusedIterator for PersistentBTreeIterator<'_, E> {}

// =============================================================================
// PersistentBTree Definition
// =============================================================================

/// A persistent (immutable) ordered container backed by a B+tree.
///
/// The tree holds elements of an opaque type `E` ordered by a
/// caller-supplied comparator; a separate equality closure, allowed to
/// be strictly finer than the order, decides whether an insert of an
/// ordered-equal element is a no-op or a replacement. Choosing the
/// closures turns the same engine into an ordered set (equality is
/// "compares equal") or an ordered map (elements are entries, the
/// comparator reads the key, equality reads key and value).
///
/// A `PersistentBTree` is a value: `Clone` is O(1), every mutator
/// returns a new tree sharing unmodified structure with the input, and
/// a mutator that changes nothing returns the input value itself,
/// observable through [`PersistentBTree::ptr_eq`].
///
/// # Time Complexity
///
/// | Operation   | Complexity   |
/// |-------------|--------------|
/// | `new`       | O(1)         |
/// | `get`       | O(log N)     |
/// | `contains`  | O(log N)     |
/// | `add`       | O(log N)     |
/// | `remove`    | O(log N)     |
/// | `len`       | O(1)         |
/// | `iter`      | O(1) to create, O(N) to drain |
/// | `iter_from` | O(log N) to create |
///
/// # Examples
///
/// ```rust
/// use cambium::persistent::PersistentBTree;
///
/// let tree = PersistentBTree::new(i32::cmp, i32::eq)
///     .add(2)
///     .add(1)
///     .add(3);
///
/// assert_eq!(tree.len(), 3);
/// assert!(tree.contains(&2));
///
/// let elements: Vec<&i32> = tree.iter().collect();
/// assert_eq!(elements, vec![&1, &2, &3]);
///
/// // Structural sharing: the original tree is preserved
/// let smaller = tree.remove(&2);
/// assert!(tree.contains(&2));
/// assert!(!smaller.contains(&2));
/// ```
pub struct PersistentBTree<E> {
    root: NodeRef<E>,
    length: usize,
    version: u64,
    edit: EditCell,
    compare: Comparator<E>,
    equal: ElementEquality<E>,
}

impl<E> Clone for PersistentBTree<E> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            length: self.length,
            version: self.version,
            edit: self.edit.clone(),
            compare: self.compare.clone(),
            equal: self.equal.clone(),
        }
    }
}

impl<E> PersistentBTree<E> {
    /// Creates an empty tree from ordering and equality closures.
    ///
    /// `compare` must be a total order over `E`, deterministic and
    /// side-effect free. `equal(a, b)` must imply
    /// `compare(a, b) == Ordering::Equal` and may be strictly
    /// stronger; an inserted element that compares equal to a stored
    /// one but is not `equal` to it *replaces* the stored element.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentBTree;
    ///
    /// let tree: PersistentBTree<i32> = PersistentBTree::new(i32::cmp, i32::eq);
    /// assert!(tree.is_empty());
    /// ```
    #[cfg(not(feature = "arc"))]
    #[must_use]
    pub fn new<C, Q>(compare: C, equal: Q) -> Self
    where
        E: 'static,
        C: Fn(&E, &E) -> Ordering + 'static,
        Q: Fn(&E, &E) -> bool + 'static,
    {
        Self::with_closures(
            ReferenceCounter::new(compare),
            ReferenceCounter::new(equal),
        )
    }

    /// Creates an empty tree from ordering and equality closures.
    ///
    /// `compare` must be a total order over `E`, deterministic and
    /// side-effect free. `equal(a, b)` must imply
    /// `compare(a, b) == Ordering::Equal` and may be strictly
    /// stronger; an inserted element that compares equal to a stored
    /// one but is not `equal` to it *replaces* the stored element.
    #[cfg(feature = "arc")]
    #[must_use]
    pub fn new<C, Q>(compare: C, equal: Q) -> Self
    where
        E: 'static,
        C: Fn(&E, &E) -> Ordering + Send + Sync + 'static,
        Q: Fn(&E, &E) -> bool + Send + Sync + 'static,
    {
        Self::with_closures(
            ReferenceCounter::new(compare),
            ReferenceCounter::new(equal),
        )
    }

    /// Creates an empty tree from already-shared closures.
    pub(crate) fn with_closures(compare: Comparator<E>, equal: ElementEquality<E>) -> Self {
        let edit = frozen_cell();
        let root = ReferenceCounter::new(Node::Leaf(LeafNode {
            keys: Vec::new(),
            edit: edit.clone(),
        }));
        Self {
            root,
            length: 0,
            version: 0,
            edit,
            compare,
            equal,
        }
    }

    /// Returns the number of elements in the tree.
    ///
    /// # Complexity
    ///
    /// O(1)
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the tree contains no elements.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the tree's version counter.
    ///
    /// The counter increases on every mutation that actually changed
    /// the tree, so a no-op mutator hands back a tree with the same
    /// version.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns `true` if both trees share the same root node.
    ///
    /// Mutators that change nothing return the input value; this is
    /// the cheap way to observe that guarantee.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        ReferenceCounter::ptr_eq(&self.root, &other.root)
    }

    /// Returns the stored element matching the probe closure, if any.
    ///
    /// `locate` reports the ordering of a stored element relative to
    /// the probed key, in the style of `slice::binary_search_by`.
    /// This is the lookup form for façades whose probe is not a full
    /// element, such as a map searching by key alone.
    pub fn get_by<F>(&self, locate: F) -> Option<&E>
    where
        F: Fn(&E) -> Ordering,
    {
        Node::find(&self.root, &locate)
    }

    /// Returns an iterator over all elements in ascending order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentBTree;
    ///
    /// let tree = PersistentBTree::new(i32::cmp, i32::eq).add(1).add(2).add(3);
    /// let elements: Vec<&i32> = tree.iter().collect();
    /// assert_eq!(elements, vec![&1, &2, &3]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentBTreeIterator<'_, E> {
        PersistentBTreeIterator::new(&self.root)
    }

    /// Returns an iterator positioned at the first element for which
    /// the probe closure reports `Ordering::Equal` or
    /// `Ordering::Greater`, yielding that element and everything
    /// after it in ascending order.
    pub fn iter_from_by<F>(&self, locate: F) -> PersistentBTreeIterator<'_, E>
    where
        F: Fn(&E) -> Ordering,
    {
        let mut iterator = PersistentBTreeIterator::new(&self.root);
        iterator.seek(&locate);
        iterator
    }
}

impl<E: Clone> PersistentBTree<E> {
    /// Returns the stored element ordered-equal to `element`, if any.
    pub fn get(&self, element: &E) -> Option<&E> {
        self.get_by(|stored| (*self.compare)(stored, element))
    }

    /// Returns `true` if an element ordered-equal to `element` is
    /// present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentBTree;
    ///
    /// let tree = PersistentBTree::new(i32::cmp, i32::eq).add(7);
    /// assert!(tree.contains(&7));
    /// assert!(!tree.contains(&8));
    /// ```
    pub fn contains(&self, element: &E) -> bool {
        self.get(element).is_some()
    }

    /// Returns an iterator over the elements not below `element`, in
    /// ascending order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentBTree;
    ///
    /// let tree = PersistentBTree::new(i32::cmp, i32::eq).add(1).add(2).add(3);
    /// let tail: Vec<&i32> = tree.iter_from(&2).collect();
    /// assert_eq!(tail, vec![&2, &3]);
    /// ```
    pub fn iter_from(&self, element: &E) -> PersistentBTreeIterator<'_, E> {
        self.iter_from_by(|stored| (*self.compare)(stored, element))
    }

    /// Returns a tree with `element` added.
    ///
    /// If an element that compares equal *and* is equal under the
    /// equality closure is already present, the input tree is
    /// returned unchanged. If a stored element compares equal but is
    /// not equal, it is replaced and the length stays the same.
    /// Otherwise the element is inserted.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentBTree;
    ///
    /// let tree = PersistentBTree::new(i32::cmp, i32::eq).add(1);
    /// let same = tree.add(1);
    /// assert!(tree.ptr_eq(&same));
    /// assert_eq!(same.len(), 1);
    /// ```
    #[must_use]
    pub fn add(&self, element: E) -> Self {
        match Node::add_copied(&self.root, element, &self.compare, &self.equal, &self.edit) {
            AddResult::Unchanged => self.clone(),
            AddResult::Replaced(Some(root)) => Self {
                root,
                length: self.length,
                version: self.version + 1,
                edit: self.edit.clone(),
                compare: self.compare.clone(),
                equal: self.equal.clone(),
            },
            AddResult::Inserted(Some(root)) => self.grown(root),
            AddResult::Split(first, second) => {
                let root = grown_root(first, second, &self.edit);
                self.grown(root)
            }
            AddResult::MutatedInPlace | AddResult::Replaced(None) | AddResult::Inserted(None) => {
                unreachable!("a persistent tree holds no editable nodes")
            }
        }
    }

    /// Returns a tree without the element ordered-equal to `element`.
    ///
    /// Removing an absent element returns the input tree unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentBTree;
    ///
    /// let tree = PersistentBTree::new(i32::cmp, i32::eq).add(1).add(2);
    /// let smaller = tree.remove(&1);
    /// assert!(!smaller.contains(&1));
    /// assert!(tree.contains(&1));
    ///
    /// let same = smaller.remove(&1);
    /// assert!(smaller.ptr_eq(&same));
    /// ```
    #[must_use]
    pub fn remove(&self, element: &E) -> Self {
        self.remove_by(|stored| (*self.compare)(stored, element))
    }

    /// Returns a tree without the element matching the probe closure.
    ///
    /// The removal form for façades whose probe is not a full
    /// element; `locate` follows the `slice::binary_search_by`
    /// convention.
    #[must_use]
    pub fn remove_by<F>(&self, locate: F) -> Self
    where
        F: Fn(&E) -> Ordering,
    {
        match Node::remove_copied(&self.root, None, None, &locate, &self.edit) {
            RemoveResult::Unchanged => self.clone(),
            RemoveResult::Rebalanced(_, center, _) => Self {
                root: collapse_root(center),
                length: self.length - 1,
                version: self.version + 1,
                edit: self.edit.clone(),
                compare: self.compare.clone(),
                equal: self.equal.clone(),
            },
            RemoveResult::MutatedInPlace => {
                unreachable!("a persistent tree holds no editable nodes")
            }
        }
    }

    /// Returns an empty tree carrying the same ordering and equality
    /// closures as this one.
    #[must_use]
    pub fn cleared(&self) -> Self {
        Self::with_closures(self.compare.clone(), self.equal.clone())
    }

    /// Forks the tree into a transient for batch editing.
    ///
    /// The transient starts out sharing every node with this tree;
    /// its first edit to any shared node copies it, so this tree
    /// stays fully readable, and shareable across threads with the
    /// `arc` feature, while the transient is being mutated.
    #[must_use]
    pub fn transient(&self) -> TransientBTree<E> {
        TransientBTree {
            root: self.root.clone(),
            length: self.length,
            version: self.version,
            edit: editing_cell(),
            compare: self.compare.clone(),
            equal: self.equal.clone(),
            origin: self.clone(),
        }
    }

    fn grown(&self, root: NodeRef<E>) -> Self {
        Self {
            root,
            length: self.length + 1,
            version: self.version + 1,
            edit: self.edit.clone(),
            compare: self.compare.clone(),
            equal: self.equal.clone(),
        }
    }
}

/// Wraps a split pair in a fresh two-child root; the tree grows one
/// level.
fn grown_root<E: Clone>(first: NodeRef<E>, second: NodeRef<E>, edit: &EditCell) -> NodeRef<E> {
    let keys = vec![first.max_key().clone(), second.max_key().clone()];
    InternalNode::into_ref(keys, vec![first, second], edit)
}

/// An internal root left with a single child collapses into it; the
/// tree shrinks one level.
fn collapse_root<E>(root: NodeRef<E>) -> NodeRef<E> {
    if let Node::Internal(internal) = &*root {
        if internal.children.len() == 1 {
            return internal.children[0].clone();
        }
    }
    root
}

impl<E: fmt::Debug> fmt::Debug for PersistentBTree<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_set().entries(self.iter()).finish()
    }
}

impl<'a, E> IntoIterator for &'a PersistentBTree<E> {
    type Item = &'a E;
    type IntoIter = PersistentBTreeIterator<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// TransientBTree Definition
// =============================================================================

/// A transient, mutable editing session over a [`PersistentBTree`].
///
/// A transient is a short-lived, single-owner view created with
/// [`PersistentBTree::transient`]. Its mutators edit nodes owned by
/// the session in place and copy shared nodes on first touch, so a
/// batch of edits costs a fraction of the allocations of the
/// equivalent persistent calls while producing the same final value.
/// [`TransientBTree::persistent`] freezes the session back into a
/// persistent tree; if no edit took effect, the originating tree is
/// returned as-is.
///
/// Once frozen, the transient is spent: every further method call
/// panics with [`TRANSIENT_AFTER_PERSISTENT`]. A transient is not
/// `Clone` and must be driven from a single owner.
///
/// # Examples
///
/// ```rust
/// use cambium::persistent::PersistentBTree;
///
/// let mut transient = PersistentBTree::new(i32::cmp, i32::eq).transient();
/// for value in 0..100 {
///     transient.add(value);
/// }
/// let tree = transient.persistent();
/// assert_eq!(tree.len(), 100);
/// ```
pub struct TransientBTree<E> {
    root: NodeRef<E>,
    length: usize,
    version: u64,
    edit: EditCell,
    compare: Comparator<E>,
    equal: ElementEquality<E>,
    origin: PersistentBTree<E>,
}

impl<E> TransientBTree<E> {
    fn ensure_editable(&self) {
        assert!(is_editing(&self.edit), "{TRANSIENT_AFTER_PERSISTENT}");
    }

    /// Returns the number of elements.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ensure_editable();
        self.length
    }

    /// Returns `true` if the tree contains no elements.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the stored element matching the probe closure, if any.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn get_by<F>(&self, locate: F) -> Option<&E>
    where
        F: Fn(&E) -> Ordering,
    {
        self.ensure_editable();
        Node::find(&self.root, &locate)
    }

    /// Returns an iterator over all elements in ascending order.
    ///
    /// The iterator borrows the transient, so no edit can invalidate
    /// it while it lives.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn iter(&self) -> PersistentBTreeIterator<'_, E> {
        self.ensure_editable();
        PersistentBTreeIterator::new(&self.root)
    }

    /// Returns an iterator positioned at the first element the probe
    /// closure does not place below the probed key.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn iter_from_by<F>(&self, locate: F) -> PersistentBTreeIterator<'_, E>
    where
        F: Fn(&E) -> Ordering,
    {
        self.ensure_editable();
        let mut iterator = PersistentBTreeIterator::new(&self.root);
        iterator.seek(&locate);
        iterator
    }
}

impl<E: Clone> TransientBTree<E> {
    /// Returns the stored element ordered-equal to `element`, if any.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn get(&self, element: &E) -> Option<&E> {
        self.get_by(|stored| (*self.compare)(stored, element))
    }

    /// Returns `true` if an element ordered-equal to `element` is
    /// present.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn contains(&self, element: &E) -> bool {
        self.get(element).is_some()
    }

    /// Returns an iterator over the elements not below `element`, in
    /// ascending order.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn iter_from(&self, element: &E) -> PersistentBTreeIterator<'_, E> {
        self.iter_from_by(|stored| (*self.compare)(stored, element))
    }

    /// Adds `element`, editing in place where the session owns the
    /// nodes on the path.
    ///
    /// Replace-versus-insert behaves exactly as
    /// [`PersistentBTree::add`].
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn add(&mut self, element: E) -> &mut Self {
        self.ensure_editable();
        match Node::add(&mut self.root, element, &self.compare, &self.equal, &self.edit) {
            AddResult::Unchanged => {}
            AddResult::MutatedInPlace => {
                self.length += 1;
                self.version += 1;
            }
            AddResult::Replaced(root) => {
                if let Some(root) = root {
                    self.root = root;
                }
                self.version += 1;
            }
            AddResult::Inserted(root) => {
                if let Some(root) = root {
                    self.root = root;
                }
                self.length += 1;
                self.version += 1;
            }
            AddResult::Split(first, second) => {
                self.root = grown_root(first, second, &self.edit);
                self.length += 1;
                self.version += 1;
            }
        }
        self
    }

    /// Removes the element ordered-equal to `element`, editing in
    /// place where the session owns the nodes on the path. Removing
    /// an absent element is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn remove(&mut self, element: &E) -> &mut Self {
        let compare = self.compare.clone();
        self.remove_by(move |stored| (*compare)(stored, element))
    }

    /// Removes the element matching the probe closure, if any.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn remove_by<F>(&mut self, locate: F) -> &mut Self
    where
        F: Fn(&E) -> Ordering,
    {
        self.ensure_editable();
        match Node::remove(&mut self.root, None, None, &locate, &self.edit) {
            RemoveResult::Unchanged => {}
            RemoveResult::MutatedInPlace => {
                self.length -= 1;
                self.version += 1;
            }
            RemoveResult::Rebalanced(_, center, _) => {
                self.root = collapse_root(center);
                self.length -= 1;
                self.version += 1;
            }
        }
        self
    }

    /// Freezes the session and returns the resulting persistent tree.
    ///
    /// Flipping the shared edit cell demotes every node the session
    /// owns to immutable in one store. If no edit replaced the root,
    /// the originating tree is returned by identity. The transient is
    /// spent afterwards; any further call panics.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn persistent(&mut self) -> PersistentBTree<E> {
        self.ensure_editable();
        self.edit.store(false, AtomicOrdering::Release);
        if ReferenceCounter::ptr_eq(&self.root, &self.origin.root) {
            return self.origin.clone();
        }
        PersistentBTree {
            root: self.root.clone(),
            length: self.length,
            version: self.version,
            edit: self.edit.clone(),
            compare: self.compare.clone(),
            equal: self.equal.clone(),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for TransientBTree<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_editing(&self.edit) {
            formatter
                .debug_set()
                .entries(PersistentBTreeIterator::new(&self.root))
                .finish()
        } else {
            formatter.write_str("TransientBTree(frozen)")
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn int_tree() -> PersistentBTree<i32> {
        PersistentBTree::new(i32::cmp, i32::eq)
    }

    /// Walks the tree checking ordering, separator correctness, fill
    /// bounds, and uniform leaf depth; returns the node's depth.
    fn check_node(node: &Node<i32>, is_root: bool) -> usize {
        match node {
            Node::Leaf(leaf) => {
                assert!(leaf.keys.len() <= MAX_LEN);
                if !is_root {
                    assert!(leaf.keys.len() >= MIN_LEN);
                }
                assert!(leaf.keys.windows(2).all(|pair| pair[0] < pair[1]));
                1
            }
            Node::Internal(internal) => {
                assert_eq!(internal.keys.len(), internal.children.len());
                assert!(internal.children.len() <= MAX_LEN);
                assert!(internal.children.len() >= if is_root { 2 } else { MIN_LEN });
                assert!(internal.keys.windows(2).all(|pair| pair[0] < pair[1]));
                let mut depth = None;
                for (key, child) in internal.keys.iter().zip(&internal.children) {
                    assert_eq!(key, child.max_key(), "separator must equal the child max");
                    let child_depth = check_node(child, false);
                    let expected = *depth.get_or_insert(child_depth);
                    assert_eq!(expected, child_depth, "all leaves sit at the same depth");
                }
                depth.expect("internal nodes always have children") + 1
            }
        }
    }

    fn check_tree(tree: &PersistentBTree<i32>) -> usize {
        check_node(&tree.root, true)
    }

    #[rstest]
    fn test_new_creates_empty_tree() {
        let tree = int_tree();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.iter().count(), 0);
    }

    #[rstest]
    fn test_add_and_contains() {
        let tree = int_tree().add(1).add(2).add(3);
        assert_eq!(tree.len(), 3);
        assert!(tree.contains(&1));
        assert!(tree.contains(&2));
        assert!(tree.contains(&3));
        assert!(!tree.contains(&4));
    }

    #[rstest]
    fn test_add_duplicate_returns_same_tree() {
        let tree = int_tree().add(1);
        let same = tree.add(1);
        assert!(tree.ptr_eq(&same));
        assert_eq!(same.len(), 1);
        assert_eq!(same.version(), tree.version());
    }

    #[rstest]
    fn test_remove_absent_returns_same_tree() {
        let tree = int_tree().add(1);
        let same = tree.remove(&2);
        assert!(tree.ptr_eq(&same));

        let empty = int_tree();
        let still_empty = empty.remove(&7);
        assert!(empty.ptr_eq(&still_empty));
    }

    #[rstest]
    fn test_remove_is_idempotent() {
        let tree = int_tree().add(1).add(2);
        let once = tree.remove(&1);
        let twice = once.remove(&1);
        assert!(once.ptr_eq(&twice));
    }

    #[rstest]
    fn test_persistence_across_versions() {
        let base = int_tree().add(5);
        let bigger = base.add(7);
        let smaller = bigger.remove(&5);

        assert!(base.contains(&5));
        assert!(!base.contains(&7));
        assert!(smaller.contains(&7));
        assert!(!smaller.contains(&5));
    }

    #[rstest]
    fn test_invariants_hold_under_growth() {
        let mut tree = int_tree();
        for value in 0..2000 {
            tree = tree.add(value);
        }
        assert_eq!(tree.len(), 2000);
        check_tree(&tree);
    }

    #[rstest]
    fn test_invariants_hold_under_shrinkage() {
        let mut tree = int_tree();
        for value in 0..2000 {
            tree = tree.add(value);
        }
        for value in (0..2000).step_by(2) {
            tree = tree.remove(&value);
        }
        assert_eq!(tree.len(), 1000);
        check_tree(&tree);
        for value in 0..2000 {
            assert_eq!(tree.contains(&value), value % 2 == 1);
        }
    }

    #[rstest]
    fn test_height_stays_within_bound() {
        let mut tree = int_tree();
        for value in 0..50_000 {
            tree = tree.add(value);
        }
        let height = check_tree(&tree);
        // A tree of height h carries at least 2 * MIN_LEN^(h - 1)
        // elements, which is the height bound read the other way.
        if height > 1 {
            let minimum_population = 2 * MIN_LEN.pow(u32::try_from(height).unwrap() - 1);
            assert!(minimum_population <= tree.len());
        }
        assert!(height <= MAX_ITER_DEPTH);
    }

    #[rstest]
    fn test_reverse_and_shuffled_insert_orders_agree() {
        let ascending: Vec<i32> = (0..1000).collect();
        let mut descending = ascending.clone();
        descending.reverse();
        // A fixed interleaving, coprime stride over the range.
        let shuffled: Vec<i32> = (0..1000).map(|index| (index * 37) % 1000).collect();

        let build = |values: &[i32]| {
            let mut tree = int_tree();
            for &value in values {
                tree = tree.add(value);
            }
            tree
        };
        let from_ascending = build(&ascending);
        let from_descending = build(&descending);
        let from_shuffled = build(&shuffled);

        check_tree(&from_descending);
        check_tree(&from_shuffled);
        let expected: Vec<&i32> = from_ascending.iter().collect();
        assert_eq!(from_descending.iter().collect::<Vec<_>>(), expected);
        assert_eq!(from_shuffled.iter().collect::<Vec<_>>(), expected);
    }

    #[rstest]
    fn test_iterator_yields_sorted_elements() {
        let tree = int_tree().add(3).add(1).add(2);
        let elements: Vec<i32> = tree.iter().copied().collect();
        assert_eq!(elements, vec![1, 2, 3]);
    }

    #[rstest]
    fn test_iterator_from_positions() {
        let tree = int_tree().add(1).add(2).add(3);
        assert_eq!(tree.iter_from(&2).copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(
            tree.iter_from(&0).copied().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(tree.iter_from(&4).next().is_none());
    }

    #[rstest]
    fn test_iterator_from_on_large_tree() {
        let mut tree = int_tree();
        for value in 0..100_000 {
            tree = tree.add(value);
        }
        let tail: Vec<i32> = tree.iter_from(&99_997).copied().collect();
        assert_eq!(tail, vec![99_997, 99_998, 99_999]);
        assert!(tree.iter_from(&100_000).next().is_none());
        assert_eq!(tree.iter_from(&-10).count(), 100_000);
    }

    #[rstest]
    fn test_iterator_is_fused() {
        let tree = int_tree().add(1);
        let mut iterator = tree.iter();
        assert_eq!(iterator.next(), Some(&1));
        assert_eq!(iterator.next(), None);
        assert_eq!(iterator.next(), None);
    }

    #[rstest]
    fn test_get_by_probes_with_partial_keys() {
        let tree = PersistentBTree::new(
            |a: &(i32, &str), b: &(i32, &str)| a.0.cmp(&b.0),
            |a: &(i32, &str), b: &(i32, &str)| a == b,
        )
        .add((1, "one"))
        .add((2, "two"));

        let found = tree.get_by(|stored| stored.0.cmp(&2));
        assert_eq!(found, Some(&(2, "two")));
        assert_eq!(tree.get_by(|stored| stored.0.cmp(&3)), None);
    }

    #[rstest]
    fn test_ordered_equal_add_replaces_value() {
        let tree = PersistentBTree::new(
            |a: &(i32, i32), b: &(i32, i32)| a.0.cmp(&b.0),
            |a: &(i32, i32), b: &(i32, i32)| a == b,
        )
        .add((1, 10))
        .add((1, 20));

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get_by(|stored| stored.0.cmp(&1)), Some(&(1, 20)));
    }

    #[rstest]
    fn test_replace_at_internal_boundary_key() {
        // Entry 63 becomes a separator key inside an internal node
        // once 98 ascending entries split the root.
        let mut tree = PersistentBTree::new(
            |a: &(i32, i32), b: &(i32, i32)| a.0.cmp(&b.0),
            |a: &(i32, i32), b: &(i32, i32)| a == b,
        );
        for value in 0..98 {
            tree = tree.add((value, value));
        }
        let replaced = tree.add((63, 64));
        assert_eq!(replaced.len(), 98);
        assert_eq!(replaced.get_by(|stored| stored.0.cmp(&63)), Some(&(63, 64)));
        assert_eq!(tree.get_by(|stored| stored.0.cmp(&63)), Some(&(63, 63)));
        let keys: Vec<i32> = replaced.iter().map(|entry| entry.0).collect();
        assert_eq!(keys, (0..98).collect::<Vec<_>>());
    }

    #[rstest]
    fn test_transient_roundtrip_without_edits_returns_origin() {
        let tree = int_tree().add(1).add(2);
        let roundtrip = tree.transient().persistent();
        assert!(tree.ptr_eq(&roundtrip));
    }

    #[rstest]
    fn test_transient_noop_edits_still_return_origin() {
        let tree = int_tree().add(1).add(2);
        let mut transient = tree.transient();
        transient.add(1);
        transient.remove(&7);
        let roundtrip = transient.persistent();
        assert!(tree.ptr_eq(&roundtrip));
    }

    #[rstest]
    fn test_transient_bulk_build() {
        let mut transient = int_tree().transient();
        for value in 0..10_000 {
            transient.add(value);
        }
        let tree = transient.persistent();
        assert_eq!(tree.len(), 10_000);
        check_tree(&tree);
        for value in 0..10_000 {
            assert!(tree.contains(&value));
        }
    }

    #[rstest]
    fn test_transient_does_not_disturb_origin() {
        let mut base = int_tree();
        for value in 0..5000 {
            base = base.add(value);
        }
        let mut transient = base.transient();
        for value in 0..5000 {
            transient.remove(&value);
        }
        for value in 5000..6000 {
            transient.add(value);
        }
        let edited = transient.persistent();

        assert_eq!(base.len(), 5000);
        for value in 0..5000 {
            assert!(base.contains(&value));
        }
        assert_eq!(edited.len(), 1000);
        for value in 5000..6000 {
            assert!(edited.contains(&value));
        }
        check_tree(&base);
        check_tree(&edited);
    }

    #[rstest]
    fn test_transient_delete_all_leaves_empty_tree() {
        let mut transient = int_tree().transient();
        for value in 0..3000 {
            transient.add(value);
        }
        for value in 0..3000 {
            transient.remove(&value);
        }
        let tree = transient.persistent();
        assert_eq!(tree.len(), 0);
        assert!(tree.iter().next().is_none());
    }

    #[rstest]
    fn test_transient_replace_keeps_length() {
        let mut transient = PersistentBTree::new(
            |a: &(i32, i32), b: &(i32, i32)| a.0.cmp(&b.0),
            |a: &(i32, i32), b: &(i32, i32)| a == b,
        )
        .transient();
        for value in 0..98 {
            transient.add((value, value));
        }
        transient.add((63, 64));
        assert_eq!(transient.len(), 98);
        assert_eq!(
            transient.get_by(|stored| stored.0.cmp(&63)),
            Some(&(63, 64))
        );
    }

    #[rstest]
    fn test_transient_version_tracks_effective_edits() {
        let mut transient = int_tree().transient();
        transient.add(1);
        let tree = transient.persistent();
        let forked = tree.transient();
        let version_before = tree.version();
        drop(forked);
        assert_eq!(tree.version(), version_before);

        let mut editing = tree.transient();
        editing.add(1); // no-op, already present
        editing.add(2);
        let edited = editing.persistent();
        assert!(edited.version() > tree.version());
    }

    #[rstest]
    #[should_panic(expected = "transient used after persistent call")]
    fn test_transient_add_after_persistent_panics() {
        let mut transient = int_tree().transient();
        transient.add(1);
        let _tree = transient.persistent();
        transient.add(2);
    }

    #[rstest]
    #[should_panic(expected = "transient used after persistent call")]
    fn test_transient_read_after_persistent_panics() {
        let mut transient = int_tree().transient();
        transient.add(1);
        let _tree = transient.persistent();
        let _ = transient.contains(&1);
    }

    #[rstest]
    #[should_panic(expected = "transient used after persistent call")]
    fn test_transient_double_freeze_panics() {
        let mut transient = int_tree().transient();
        transient.add(1);
        let _first = transient.persistent();
        let _second = transient.persistent();
    }

    #[rstest]
    fn test_two_transients_from_one_base_are_isolated() {
        let base = int_tree().add(1).add(2).add(3);
        let mut first = base.transient();
        let mut second = base.transient();

        first.add(10);
        second.remove(&1);

        let first_tree = first.persistent();
        let second_tree = second.persistent();

        assert_eq!(first_tree.len(), 4);
        assert!(first_tree.contains(&10));
        assert!(first_tree.contains(&1));
        assert_eq!(second_tree.len(), 2);
        assert!(!second_tree.contains(&1));
        assert!(!second_tree.contains(&10));
        assert_eq!(base.len(), 3);
    }

    #[rstest]
    fn test_frozen_transient_output_is_reusable() {
        let mut transient = int_tree().transient();
        for value in 0..200 {
            transient.add(value);
        }
        let tree = transient.persistent();
        // Nodes created by the session are frozen now; persistent
        // edits on them must copy, not mutate.
        let edited = tree.remove(&0).add(1000);
        assert!(tree.contains(&0));
        assert!(!tree.contains(&1000));
        assert!(edited.contains(&1000));
        assert!(!edited.contains(&0));
        check_tree(&tree);
        check_tree(&edited);
    }

    #[rstest]
    fn test_debug_formats_as_set() {
        let tree = int_tree().add(2).add(1);
        assert_eq!(format!("{tree:?}"), "{1, 2}");
    }
}
