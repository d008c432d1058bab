//! Arena-based node storage with a logical overlay on top of the physical tree.
//!
//! Every node carries two sets of the five tree relations. The physical links
//! are maintained by the physical-tree collaborator. The logical links are
//! optional overrides: while a logical relation is [`Overlay::Inherit`] the
//! physical value is authoritative.

use std::collections::HashSet;
use std::fmt;

use generational_arena::{Arena, Index};
use tracing::instrument;

use crate::domain::error::DomainError;

/// Handle to a node stored in a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Index);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (slot, generation) = self.0.into_raw_parts();
        if generation == 0 {
            write!(f, "#{}", slot)
        } else {
            write!(f, "#{}@{}", slot, generation)
        }
    }
}

/// An attribute on an element node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub namespace: Option<String>,
    pub value: String,
}

/// What a node is. Only the parts the mutation core needs are modelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element {
        name: String,
        attributes: Vec<Attribute>,
    },
    Text(String),
    Comment(String),
    /// Container whose children are moved out when it is inserted
    Fragment,
    /// Root of a shadow tree attached to `host`; `older` is the previously attached root
    ShadowRoot {
        host: NodeId,
        older: Option<NodeId>,
    },
}

impl NodeKind {
    pub fn element(name: impl Into<String>) -> Self {
        NodeKind::Element {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Text and comment nodes carry character data.
    pub fn character_data(&self) -> Option<&str> {
        match self {
            NodeKind::Text(data) | NodeKind::Comment(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, NodeKind::Text(_))
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self, NodeKind::Fragment)
    }

    /// Elements that pull light children into a shadow tree when rendered.
    pub fn is_insertion_point(&self) -> bool {
        matches!(self, NodeKind::Element { name, .. } if name == "content" || name == "slot")
    }

    pub fn can_have_children(&self) -> bool {
        !matches!(self, NodeKind::Text(_) | NodeKind::Comment(_))
    }
}

/// One of the five tree relations kept per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Parent,
    FirstChild,
    LastChild,
    NextSibling,
    PreviousSibling,
}

impl Relation {
    pub const ALL: [Relation; 5] = [
        Relation::Parent,
        Relation::FirstChild,
        Relation::LastChild,
        Relation::NextSibling,
        Relation::PreviousSibling,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

/// Physical tree pointers, owned by the physical-tree collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Links([Option<NodeId>; 5]);

impl Links {
    pub fn get(&self, relation: Relation) -> Option<NodeId> {
        self.0[relation.slot()]
    }

    pub fn set(&mut self, relation: Relation, value: Option<NodeId>) {
        self.0[relation.slot()] = value;
    }
}

/// A logical pointer: either inherit the physical value or override it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overlay {
    #[default]
    Inherit,
    Set(Option<NodeId>),
}

impl Overlay {
    pub fn resolve(self, physical: Option<NodeId>) -> Option<NodeId> {
        match self {
            Overlay::Inherit => physical,
            Overlay::Set(value) => value,
        }
    }
}

/// Logical tree pointers overriding the physical ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogicalLinks([Overlay; 5]);

impl LogicalLinks {
    pub fn get(&self, relation: Relation) -> Overlay {
        self.0[relation.slot()]
    }

    pub fn set(&mut self, relation: Relation, value: Overlay) {
        self.0[relation.slot()] = value;
    }

    pub fn is_overlaid(&self) -> bool {
        self.0.iter().any(|o| *o != Overlay::Inherit)
    }
}

/// Tree node in the arena.
#[derive(Debug)]
pub struct NodeRecord {
    pub kind: NodeKind,
    pub physical: Links,
    pub logical: LogicalLinks,
    /// Shadow root whose tree contains this node; `None` for the document tree and detached nodes
    pub scope: Option<NodeId>,
    /// Youngest shadow root attached to this node
    pub shadow_root: Option<NodeId>,
}

impl NodeRecord {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            physical: Links::default(),
            logical: LogicalLinks::default(),
            scope: None,
            shadow_root: None,
        }
    }
}

/// Arena holding every node of a document, attached or not.
#[derive(Debug, Default)]
pub struct NodeArena {
    arena: Arena<NodeRecord>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
        }
    }

    #[instrument(level = "trace", skip(self))]
    pub fn create(&mut self, kind: NodeKind) -> NodeId {
        NodeId(self.arena.insert(NodeRecord::new(kind)))
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeRecord> {
        self.arena.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeRecord> {
        self.arena.get_mut(id.0)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.contains(id.0)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Destroys a node record. Links pointing at it are not touched.
    pub fn remove(&mut self, id: NodeId) -> Option<NodeRecord> {
        self.arena.remove(id.0)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.get(id).map(|n| &n.kind)
    }

    /// Resolved (logical) relation of a node.
    pub fn related(&self, id: NodeId, relation: Relation) -> Option<NodeId> {
        let node = self.get(id)?;
        node.logical
            .get(relation)
            .resolve(node.physical.get(relation))
    }

    /// Physical relation of a node, ignoring the overlay.
    pub fn physical(&self, id: NodeId, relation: Relation) -> Option<NodeId> {
        self.get(id)?.physical.get(relation)
    }

    pub fn set_physical(&mut self, id: NodeId, relation: Relation, value: Option<NodeId>) {
        if let Some(node) = self.get_mut(id) {
            node.physical.set(relation, value);
        }
    }

    pub fn set_logical(&mut self, id: NodeId, relation: Relation, value: Option<NodeId>) {
        if let Some(node) = self.get_mut(id) {
            node.logical.set(relation, Overlay::Set(value));
        }
    }

    /// Drops the parent and sibling overrides of a detached node.
    ///
    /// The child-list overrides stay: they describe the node's own subtree,
    /// which travels with it.
    pub fn clear_position(&mut self, id: NodeId) {
        if let Some(node) = self.get_mut(id) {
            for relation in [
                Relation::Parent,
                Relation::NextSibling,
                Relation::PreviousSibling,
            ] {
                node.logical.set(relation, Overlay::Inherit);
            }
        }
    }

    pub fn is_overlaid(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|n| n.logical.is_overlaid())
    }

    /// True once the child list of `id` is described by the overlay.
    pub fn children_overlaid(&self, id: NodeId) -> bool {
        self.get(id)
            .is_some_and(|n| n.logical.get(Relation::FirstChild) != Overlay::Inherit)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.related(id, Relation::Parent)
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.related(id, Relation::FirstChild)
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.related(id, Relation::LastChild)
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.related(id, Relation::NextSibling)
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.related(id, Relation::PreviousSibling)
    }

    /// Logical children in document order.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            arena: self,
            next: self.first_child(id),
        }
    }

    /// Physical children in physical order.
    pub fn physical_children(&self, id: NodeId) -> Vec<NodeId> {
        let mut children = Vec::new();
        let mut cursor = self.physical(id, Relation::FirstChild);
        while let Some(child) = cursor {
            children.push(child);
            cursor = self.physical(child, Relation::NextSibling);
        }
        children
    }

    /// Logical ancestors, nearest first, excluding `id`.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            arena: self,
            next: self.parent(id),
        }
    }

    /// Pre-order walk of the logical subtree rooted at `id`, including `id`.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        let mut stack = Vec::new();
        if self.contains(id) {
            stack.push(id);
        }
        Descendants { arena: self, stack }
    }

    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        node == ancestor || self.ancestors(node).any(|a| a == ancestor)
    }

    /// Character data of text nodes and the concatenated text of everything else.
    #[instrument(level = "trace", skip(self))]
    pub fn text_content(&self, id: NodeId) -> String {
        match self.kind(id) {
            Some(kind) => match kind.character_data() {
                Some(data) => data.to_string(),
                None => self
                    .descendants(id)
                    .filter_map(|n| match self.kind(n) {
                        Some(NodeKind::Text(data)) => Some(data.as_str()),
                        _ => None,
                    })
                    .collect(),
            },
            None => String::new(),
        }
    }

    /// Checks that the logical subtree under `root` is a well-formed tree.
    ///
    /// Every child must point back at its parent, sibling links must be
    /// symmetric, first/last child must match the ends of the sibling chain,
    /// and no node may be reachable twice.
    pub fn verify(&self, root: NodeId) -> Result<(), DomainError> {
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                return Err(inconsistent(node, "reachable twice"));
            }
            let mut previous = None;
            let mut cursor = self.first_child(node);
            while let Some(child) = cursor {
                if !self.contains(child) {
                    return Err(inconsistent(child, "dangling child link"));
                }
                if self.parent(child) != Some(node) {
                    return Err(inconsistent(child, "parent link does not match"));
                }
                if self.previous_sibling(child) != previous {
                    return Err(inconsistent(child, "previous sibling is not symmetric"));
                }
                if seen.contains(&child) || stack.contains(&child) {
                    return Err(inconsistent(child, "sibling chain loops"));
                }
                stack.push(child);
                previous = Some(child);
                cursor = self.next_sibling(child);
            }
            if self.last_child(node) != previous {
                return Err(inconsistent(node, "last child does not end the sibling chain"));
            }
        }
        Ok(())
    }
}

fn inconsistent(node: NodeId, reason: &str) -> DomainError {
    DomainError::InconsistentTree {
        node,
        reason: reason.to_string(),
    }
}

pub struct Children<'a> {
    arena: &'a NodeArena,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.arena.next_sibling(current);
        Some(current)
    }
}

pub struct Ancestors<'a> {
    arena: &'a NodeArena,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.arena.parent(current);
        Some(current)
    }
}

pub struct Descendants<'a> {
    arena: &'a NodeArena,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;
        let children: Vec<NodeId> = self.arena.children(current).collect();
        // Push children in reverse order for left-to-right traversal
        self.stack.extend(children.into_iter().rev());
        Some(current)
    }
}
