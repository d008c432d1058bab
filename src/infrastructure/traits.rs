//! Collaborator boundary traits
//!
//! The core calls these to touch the physical tree and to ask where
//! composition boundaries are. Tests swap in their own implementations.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::domain::{NodeArena, NodeId, Relation};
use crate::infrastructure::error::PhysicalError;

/// Physical insert/remove/replace primitives.
///
/// Implementations own the physical links of the arena. They must leave the
/// logical overlay alone.
pub trait PhysicalTree {
    /// Insert `nodes` in order under `parent`, before `before` (or at the end).
    fn insert_before(
        &mut self,
        tree: &mut NodeArena,
        parent: NodeId,
        nodes: &[NodeId],
        before: Option<NodeId>,
    ) -> Result<(), PhysicalError>;

    /// Detach `child` from `parent`.
    fn remove_child(
        &mut self,
        tree: &mut NodeArena,
        parent: NodeId,
        child: NodeId,
    ) -> Result<(), PhysicalError>;

    /// Put `nodes` where `old` is and detach `old`.
    fn replace_child(
        &mut self,
        tree: &mut NodeArena,
        parent: NodeId,
        nodes: &[NodeId],
        old: NodeId,
    ) -> Result<(), PhysicalError>;
}

/// Composition-boundary resolution plus the outbound hooks fired on the
/// shadow root that owns a mutated tree.
pub trait Composition {
    /// True when mutating the children of `node` must go through the overlay.
    fn affects_rendering(&self, tree: &NodeArena, node: NodeId) -> bool;

    fn nodes_were_added(&mut self, root: NodeId, nodes: &[NodeId]);

    fn node_was_removed(&mut self, root: NodeId, node: NodeId);
}

// ============================================================
// REAL IMPLEMENTATIONS
// ============================================================

/// Physical tree kept directly in the arena's physical links.
#[derive(Debug, Default)]
pub struct NativeTree;

impl NativeTree {
    fn ensure(tree: &NodeArena, node: NodeId) -> Result<(), PhysicalError> {
        if tree.contains(node) {
            Ok(())
        } else {
            Err(PhysicalError::UnknownNode(node))
        }
    }

    fn unlink(tree: &mut NodeArena, child: NodeId) {
        let Some(parent) = tree.physical(child, Relation::Parent) else {
            return;
        };
        let prev = tree.physical(child, Relation::PreviousSibling);
        let next = tree.physical(child, Relation::NextSibling);
        match prev {
            Some(p) => tree.set_physical(p, Relation::NextSibling, next),
            None => tree.set_physical(parent, Relation::FirstChild, next),
        }
        match next {
            Some(n) => tree.set_physical(n, Relation::PreviousSibling, prev),
            None => tree.set_physical(parent, Relation::LastChild, prev),
        }
        tree.set_physical(child, Relation::Parent, None);
        tree.set_physical(child, Relation::PreviousSibling, None);
        tree.set_physical(child, Relation::NextSibling, None);
    }

    fn link_before(tree: &mut NodeArena, parent: NodeId, child: NodeId, before: Option<NodeId>) {
        let prev = match before {
            Some(b) => tree.physical(b, Relation::PreviousSibling),
            None => tree.physical(parent, Relation::LastChild),
        };
        tree.set_physical(child, Relation::Parent, Some(parent));
        tree.set_physical(child, Relation::PreviousSibling, prev);
        tree.set_physical(child, Relation::NextSibling, before);
        match prev {
            Some(p) => tree.set_physical(p, Relation::NextSibling, Some(child)),
            None => tree.set_physical(parent, Relation::FirstChild, Some(child)),
        }
        match before {
            Some(b) => tree.set_physical(b, Relation::PreviousSibling, Some(child)),
            None => tree.set_physical(parent, Relation::LastChild, Some(child)),
        }
    }

    fn check_cycle(tree: &NodeArena, parent: NodeId, node: NodeId) -> Result<(), PhysicalError> {
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == node {
                return Err(PhysicalError::HierarchyRequest { parent, node });
            }
            cursor = tree.physical(current, Relation::Parent);
        }
        Ok(())
    }

    /// First physical sibling at or after `start` that is not being moved.
    fn skip_moved(tree: &NodeArena, start: Option<NodeId>, nodes: &[NodeId]) -> Option<NodeId> {
        let mut cursor = start;
        while let Some(current) = cursor {
            if !nodes.contains(&current) {
                return Some(current);
            }
            cursor = tree.physical(current, Relation::NextSibling);
        }
        None
    }
}

impl PhysicalTree for NativeTree {
    fn insert_before(
        &mut self,
        tree: &mut NodeArena,
        parent: NodeId,
        nodes: &[NodeId],
        before: Option<NodeId>,
    ) -> Result<(), PhysicalError> {
        Self::ensure(tree, parent)?;
        if let Some(b) = before {
            if tree.physical(b, Relation::Parent) != Some(parent) {
                return Err(PhysicalError::NotAChild { parent, child: b });
            }
        }
        for &node in nodes {
            Self::ensure(tree, node)?;
            Self::check_cycle(tree, parent, node)?;
        }
        let before = Self::skip_moved(tree, before, nodes);
        for &node in nodes {
            Self::unlink(tree, node);
            Self::link_before(tree, parent, node, before);
        }
        trace!("physical insert: {} node(s) under {}", nodes.len(), parent);
        Ok(())
    }

    fn remove_child(
        &mut self,
        tree: &mut NodeArena,
        parent: NodeId,
        child: NodeId,
    ) -> Result<(), PhysicalError> {
        Self::ensure(tree, child)?;
        if tree.physical(child, Relation::Parent) != Some(parent) {
            return Err(PhysicalError::NotAChild { parent, child });
        }
        Self::unlink(tree, child);
        trace!("physical remove: {} from {}", child, parent);
        Ok(())
    }

    fn replace_child(
        &mut self,
        tree: &mut NodeArena,
        parent: NodeId,
        nodes: &[NodeId],
        old: NodeId,
    ) -> Result<(), PhysicalError> {
        Self::ensure(tree, old)?;
        if tree.physical(old, Relation::Parent) != Some(parent) {
            return Err(PhysicalError::NotAChild { parent, child: old });
        }
        for &node in nodes {
            Self::ensure(tree, node)?;
            Self::check_cycle(tree, parent, node)?;
        }
        let before = Self::skip_moved(tree, tree.physical(old, Relation::NextSibling), nodes);
        Self::unlink(tree, old);
        for &node in nodes {
            Self::unlink(tree, node);
            Self::link_before(tree, parent, node, before);
        }
        trace!("physical replace: {} under {}", old, parent);
        Ok(())
    }
}

/// Hook invocation observed by [`ShadowComposition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionEvent {
    NodesAdded { root: NodeId, nodes: Vec<NodeId> },
    NodeRemoved { root: NodeId, node: NodeId },
}

/// Shared view of the hooks a [`ShadowComposition`] has received.
pub type CompositionLog = Rc<RefCell<Vec<CompositionEvent>>>;

/// Shadow-tree composition rules.
///
/// Shadow hosts, shadow roots and insertion points inside a shadow tree are
/// composition boundaries. Hook calls are logged for the rendering layer.
#[derive(Default)]
pub struct ShadowComposition {
    log: CompositionLog,
}

impl fmt::Debug for ShadowComposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowComposition")
            .field("events", &self.log.borrow().len())
            .finish()
    }
}

impl ShadowComposition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the hook log, valid after the composition is moved into a document.
    pub fn log(&self) -> CompositionLog {
        Rc::clone(&self.log)
    }
}

impl Composition for ShadowComposition {
    fn affects_rendering(&self, tree: &NodeArena, node: NodeId) -> bool {
        match tree.get(node) {
            Some(record) => {
                record.shadow_root.is_some()
                    || matches!(record.kind, crate::domain::NodeKind::ShadowRoot { .. })
                    || (record.scope.is_some() && record.kind.is_insertion_point())
            }
            None => false,
        }
    }

    fn nodes_were_added(&mut self, root: NodeId, nodes: &[NodeId]) {
        debug!("nodes_were_added: root={} count={}", root, nodes.len());
        self.log.borrow_mut().push(CompositionEvent::NodesAdded {
            root,
            nodes: nodes.to_vec(),
        });
    }

    fn node_was_removed(&mut self, root: NodeId, node: NodeId) {
        debug!("node_was_removed: root={} node={}", root, node);
        self.log
            .borrow_mut()
            .push(CompositionEvent::NodeRemoved { root, node });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NodeKind;

    fn physical_children(tree: &NodeArena, parent: NodeId) -> Vec<NodeId> {
        tree.physical_children(parent)
    }

    #[test]
    fn given_nodes_when_inserting_before_reference_then_order_is_kept() {
        let mut tree = NodeArena::new();
        let mut native = NativeTree;
        let parent = tree.create(NodeKind::element("ul"));
        let a = tree.create(NodeKind::element("li"));
        let b = tree.create(NodeKind::element("li"));
        let c = tree.create(NodeKind::element("li"));

        native.insert_before(&mut tree, parent, &[c], None).unwrap();
        native.insert_before(&mut tree, parent, &[a, b], Some(c)).unwrap();

        assert_eq!(physical_children(&tree, parent), vec![a, b, c]);
        assert_eq!(tree.physical(c, Relation::PreviousSibling), Some(b));
    }

    #[test]
    fn given_wrong_parent_when_removing_then_not_a_child() {
        let mut tree = NodeArena::new();
        let mut native = NativeTree;
        let parent = tree.create(NodeKind::element("div"));
        let other = tree.create(NodeKind::element("div"));
        let child = tree.create(NodeKind::Text("x".into()));
        native.insert_before(&mut tree, parent, &[child], None).unwrap();

        let err = native.remove_child(&mut tree, other, child).unwrap_err();

        assert_eq!(err, PhysicalError::NotAChild { parent: other, child });
        assert_eq!(physical_children(&tree, parent), vec![child]);
    }

    #[test]
    fn given_ancestor_when_inserting_below_descendant_then_rejects_cycle() {
        let mut tree = NodeArena::new();
        let mut native = NativeTree;
        let outer = tree.create(NodeKind::element("div"));
        let inner = tree.create(NodeKind::element("div"));
        native.insert_before(&mut tree, outer, &[inner], None).unwrap();

        let err = native
            .insert_before(&mut tree, inner, &[outer], None)
            .unwrap_err();

        assert!(matches!(err, PhysicalError::HierarchyRequest { .. }));
    }

    #[test]
    fn given_sibling_when_replacing_with_next_sibling_then_slot_is_reused() {
        let mut tree = NodeArena::new();
        let mut native = NativeTree;
        let parent = tree.create(NodeKind::element("div"));
        let a = tree.create(NodeKind::element("a"));
        let b = tree.create(NodeKind::element("b"));
        let c = tree.create(NodeKind::element("c"));
        native.insert_before(&mut tree, parent, &[a, b, c], None).unwrap();

        native.replace_child(&mut tree, parent, &[b], a).unwrap();

        assert_eq!(physical_children(&tree, parent), vec![b, c]);
        assert_eq!(tree.physical(a, Relation::Parent), None);
    }

    #[test]
    fn given_host_when_asking_composition_then_host_is_boundary() {
        let mut tree = NodeArena::new();
        let composition = ShadowComposition::new();
        let host = tree.create(NodeKind::element("div"));
        let plain = tree.create(NodeKind::element("div"));
        let root = tree.create(NodeKind::ShadowRoot { host, older: None });
        if let Some(record) = tree.get_mut(host) {
            record.shadow_root = Some(root);
        }

        assert!(composition.affects_rendering(&tree, host));
        assert!(composition.affects_rendering(&tree, root));
        assert!(!composition.affects_rendering(&tree, plain));
    }
}
