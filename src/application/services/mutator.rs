//! Tree mutation: insert, remove, replace, text and attribute changes.
//!
//! Each operation first decides whether the physical primitive can be used
//! as is, or whether a composition boundary is involved and the logical
//! overlay must be maintained by hand. Before a child list is edited through
//! the overlay it is "frozen": its current logical shape is copied into the
//! logical pointers, so later physical moves no longer leak into it.

use tracing::{debug, instrument, trace};

use crate::application::document::Document;
use crate::application::error::ApplicationResult;
use crate::domain::{Attribute, Change, DomainError, NodeId, NodeKind, Relation};

impl Document {
    /// Appends `node` as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, node: NodeId) -> ApplicationResult<NodeId> {
        self.insert_before(parent, node, None)
    }

    /// Inserts `node` (or, for a fragment, its children) before `before`.
    ///
    /// A node that already has a parent is removed from it first, which is
    /// recorded against the old parent. One childList record covering all
    /// inserted nodes is queued against `parent`.
    #[instrument(level = "debug", skip(self))]
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        before: Option<NodeId>,
    ) -> ApplicationResult<NodeId> {
        self.ensure_node(parent)?;
        self.ensure_node(node)?;
        if let Some(reference) = before {
            self.ensure_node(reference)?;
            if self.tree.parent(reference) != Some(parent) {
                return Err(DomainError::NotFound {
                    parent,
                    child: reference,
                }
                .into());
            }
        }
        self.ensure_insertable(parent, node)?;

        let before = if before == Some(node) {
            self.tree.next_sibling(node)
        } else {
            before
        };
        let use_native = self.is_native(parent, node);
        let nodes = self.collect_nodes(node)?;
        if nodes.is_empty() {
            return Ok(node);
        }
        let previous = match before {
            Some(reference) => self.tree.previous_sibling(reference),
            None => self.tree.last_child(parent),
        };

        self.attach(parent, &nodes, before, use_native)?;
        self.adopt(parent, &nodes);
        if let Some(root) = self.composition_root(parent) {
            self.composition.nodes_were_added(root, &nodes);
        }
        self.enqueue(
            parent,
            Change::ChildList {
                added: nodes,
                removed: Vec::new(),
                previous_sibling: previous,
                next_sibling: before,
            },
        );
        Ok(node)
    }

    /// Removes `child` from `parent`.
    ///
    /// Fails with `NotFound` and changes nothing when `child` is not a
    /// logical child of `parent`. Subtree observers above `parent` keep
    /// watching the removed node until their next delivery.
    #[instrument(level = "debug", skip(self))]
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> ApplicationResult<NodeId> {
        self.ensure_node(parent)?;
        self.ensure_node(child)?;
        if self.tree.parent(child) != Some(parent) {
            return Err(DomainError::NotFound { parent, child }.into());
        }
        let previous = self.tree.previous_sibling(child);
        let next = self.tree.next_sibling(child);

        self.detach(parent, child)?;
        if let Some(root) = self.composition_root(parent) {
            self.composition.node_was_removed(root, child);
        }
        self.enqueue(
            parent,
            Change::ChildList {
                added: Vec::new(),
                removed: vec![child],
                previous_sibling: previous,
                next_sibling: next,
            },
        );
        self.registry.add_transient(&self.tree, parent, child);
        self.node_was_removed(child);
        Ok(child)
    }

    /// Puts `new` where `old` is, as a single childList record.
    #[instrument(level = "debug", skip(self))]
    pub fn replace_child(
        &mut self,
        parent: NodeId,
        new: NodeId,
        old: NodeId,
    ) -> ApplicationResult<NodeId> {
        self.ensure_node(parent)?;
        self.ensure_node(new)?;
        self.ensure_node(old)?;
        if self.tree.parent(old) != Some(parent) {
            return Err(DomainError::NotFound { parent, child: old }.into());
        }
        self.ensure_insertable(parent, new)?;
        if new == old {
            return Ok(old);
        }

        let use_native = self.is_native(parent, new);
        let nodes = self.collect_nodes(new)?;
        // Taken after `new` left its old place, so the snapshot never names it
        let previous = self.tree.previous_sibling(old);
        let next = self.tree.next_sibling(old);

        self.swap(parent, &nodes, old, use_native)?;
        self.adopt(parent, &nodes);
        if let Some(root) = self.composition_root(parent) {
            self.composition.node_was_removed(root, old);
            if !nodes.is_empty() {
                self.composition.nodes_were_added(root, &nodes);
            }
        }
        self.enqueue(
            parent,
            Change::ChildList {
                added: nodes,
                removed: vec![old],
                previous_sibling: previous,
                next_sibling: next,
            },
        );
        self.registry.add_transient(&self.tree, parent, old);
        self.node_was_removed(old);
        Ok(old)
    }

    /// Replaces all children of `node` with a single text node holding
    /// `text`, or with nothing when `text` is empty. Text and comment nodes
    /// get their character data set instead.
    #[instrument(level = "debug", skip(self))]
    pub fn set_text_content(&mut self, node: NodeId, text: &str) -> ApplicationResult<()> {
        self.ensure_node(node)?;
        if self
            .tree
            .kind(node)
            .is_some_and(|k| k.character_data().is_some())
        {
            self.set_character_data(node, text)?;
            return Ok(());
        }

        let use_native = !self.affects_rendering(node);
        let removed: Vec<NodeId> = self.tree.children(node).collect();
        for &child in &removed {
            self.detach(node, child)?;
        }
        let added = if text.is_empty() {
            Vec::new()
        } else {
            vec![self.tree.create(NodeKind::Text(text.to_string()))]
        };
        if !added.is_empty() {
            self.attach(node, &added, None, use_native)?;
            self.adopt(node, &added);
        }
        if let Some(root) = self.composition_root(node) {
            for &child in &removed {
                self.composition.node_was_removed(root, child);
            }
            if !added.is_empty() {
                self.composition.nodes_were_added(root, &added);
            }
        }
        self.enqueue(
            node,
            Change::ChildList {
                added,
                removed: removed.clone(),
                previous_sibling: None,
                next_sibling: None,
            },
        );
        for child in removed {
            self.registry.add_transient(&self.tree, node, child);
            self.node_was_removed(child);
        }
        Ok(())
    }

    /// Sets the data of a text or comment node. Returns the previous data.
    #[instrument(level = "debug", skip(self))]
    pub fn set_character_data(&mut self, node: NodeId, data: &str) -> ApplicationResult<String> {
        let old = match self.tree.kind(node) {
            Some(NodeKind::Text(old)) | Some(NodeKind::Comment(old)) => old.clone(),
            Some(_) => {
                return Err(DomainError::InvalidNodeKind {
                    node,
                    expected: "a text or comment node",
                }
                .into())
            }
            None => return Err(DomainError::UnknownNode(node).into()),
        };
        self.enqueue(
            node,
            Change::CharacterData {
                old_value: Some(old.clone()),
            },
        );
        if let Some(record) = self.tree.get_mut(node) {
            match &mut record.kind {
                NodeKind::Text(current) | NodeKind::Comment(current) => *current = data.to_string(),
                _ => {}
            }
        }
        Ok(old)
    }

    /// Sets an attribute on an element. Returns the previous value.
    #[instrument(level = "debug", skip(self))]
    pub fn set_attribute(
        &mut self,
        node: NodeId,
        name: &str,
        namespace: Option<&str>,
        value: &str,
    ) -> ApplicationResult<Option<String>> {
        let old = self.attribute_slot(node, name, namespace)?.map(|a| a.value.clone());
        self.enqueue(
            node,
            Change::Attributes {
                name: name.to_string(),
                namespace: namespace.map(str::to_string),
                old_value: old.clone(),
            },
        );
        if let Some(NodeKind::Element { attributes, .. }) = self.tree.get_mut(node).map(|r| &mut r.kind) {
            match attributes
                .iter_mut()
                .find(|a| a.name == name && a.namespace.as_deref() == namespace)
            {
                Some(existing) => existing.value = value.to_string(),
                None => attributes.push(Attribute {
                    name: name.to_string(),
                    namespace: namespace.map(str::to_string),
                    value: value.to_string(),
                }),
            }
        }
        Ok(old)
    }

    /// Removes an attribute. Nothing is recorded when it was not set.
    #[instrument(level = "debug", skip(self))]
    pub fn remove_attribute(
        &mut self,
        node: NodeId,
        name: &str,
        namespace: Option<&str>,
    ) -> ApplicationResult<Option<String>> {
        let Some(old) = self
            .attribute_slot(node, name, namespace)?
            .map(|a| a.value.clone())
        else {
            return Ok(None);
        };
        self.enqueue(
            node,
            Change::Attributes {
                name: name.to_string(),
                namespace: namespace.map(str::to_string),
                old_value: Some(old.clone()),
            },
        );
        if let Some(NodeKind::Element { attributes, .. }) = self.tree.get_mut(node).map(|r| &mut r.kind) {
            attributes.retain(|a| !(a.name == name && a.namespace.as_deref() == namespace));
        }
        Ok(Some(old))
    }

    /// Merges adjacent text children and drops empty leading text nodes,
    /// recursively. Every step is an ordinary data change or removal.
    #[instrument(level = "debug", skip(self))]
    pub fn normalize(&mut self, node: NodeId) -> ApplicationResult<()> {
        self.ensure_node(node)?;
        let children: Vec<NodeId> = self.tree.children(node).collect();
        let mut head: Option<NodeId> = None;
        let mut merged: Vec<NodeId> = Vec::new();
        let mut text = String::new();

        for child in children {
            let data = match self.tree.kind(child) {
                Some(NodeKind::Text(data)) => Some(data.clone()),
                _ => None,
            };
            match data {
                Some(data) => match head {
                    None if data.is_empty() => {
                        self.remove_child(node, child)?;
                    }
                    None => head = Some(child),
                    Some(_) => {
                        text.push_str(&data);
                        merged.push(child);
                    }
                },
                None => {
                    if let Some(run) = head.take() {
                        self.merge_run(node, run, &text, &merged)?;
                    }
                    merged.clear();
                    text.clear();
                    if self.tree.first_child(child).is_some() {
                        self.normalize(child)?;
                    }
                }
            }
        }
        if let Some(run) = head {
            self.merge_run(node, run, &text, &merged)?;
        }
        Ok(())
    }

    fn merge_run(
        &mut self,
        parent: NodeId,
        head: NodeId,
        text: &str,
        merged: &[NodeId],
    ) -> ApplicationResult<()> {
        if merged.is_empty() {
            return Ok(());
        }
        let data = format!("{}{}", self.tree.text_content(head), text);
        self.set_character_data(head, &data)?;
        for &node in merged {
            self.remove_child(parent, node)?;
        }
        trace!("merged {} text node(s) into {}", merged.len(), head);
        Ok(())
    }

    // ------------------------------------------------------------
    // Overlay maintenance
    // ------------------------------------------------------------

    /// Copies the current logical child list of `parent` into the overlay.
    ///
    /// Only physical children that are still logically owned by `parent`
    /// are kept. Does nothing when the list is already overlaid.
    pub(crate) fn freeze_children(&mut self, parent: NodeId) {
        if self.tree.children_overlaid(parent) {
            return;
        }
        let children: Vec<NodeId> = self
            .tree
            .physical_children(parent)
            .into_iter()
            .filter(|c| self.tree.parent(*c) == Some(parent))
            .collect();
        for (i, &child) in children.iter().enumerate() {
            let previous = if i == 0 { None } else { Some(children[i - 1]) };
            self.tree.set_logical(child, Relation::Parent, Some(parent));
            self.tree
                .set_logical(child, Relation::PreviousSibling, previous);
            self.tree
                .set_logical(child, Relation::NextSibling, children.get(i + 1).copied());
        }
        self.tree
            .set_logical(parent, Relation::FirstChild, children.first().copied());
        self.tree
            .set_logical(parent, Relation::LastChild, children.last().copied());
        debug!("froze {} child(ren) of {}", children.len(), parent);
    }

    fn affects_rendering(&self, node: NodeId) -> bool {
        self.composition.affects_rendering(&self.tree, node)
    }

    /// True when neither the new parent nor the node's current parent is a
    /// composition boundary.
    fn is_native(&self, parent: NodeId, node: NodeId) -> bool {
        !self.affects_rendering(parent)
            && !self
                .tree
                .parent(node)
                .is_some_and(|old| self.affects_rendering(old))
    }

    /// Shadow root to notify about changes below `parent`.
    fn composition_root(&self, parent: NodeId) -> Option<NodeId> {
        let record = self.tree.get(parent)?;
        record.shadow_root.or(record.scope)
    }

    fn ensure_insertable(&self, parent: NodeId, node: NodeId) -> Result<(), DomainError> {
        let parent_ok = self
            .tree
            .kind(parent)
            .is_some_and(NodeKind::can_have_children);
        let node_ok = !matches!(
            self.tree.kind(node),
            Some(NodeKind::Document) | Some(NodeKind::ShadowRoot { .. })
        );
        if !parent_ok || !node_ok || self.tree.is_inclusive_ancestor(node, parent) {
            return Err(DomainError::HierarchyRequest { parent, node });
        }
        Ok(())
    }

    /// Detaches `node` from its current place and returns the nodes to insert.
    fn collect_nodes(&mut self, node: NodeId) -> ApplicationResult<Vec<NodeId>> {
        if self.tree.kind(node).is_some_and(NodeKind::is_fragment) {
            let children: Vec<NodeId> = self.tree.children(node).collect();
            if children.is_empty() {
                return Ok(children);
            }
            for &child in &children {
                self.detach(node, child)?;
            }
            self.enqueue(
                node,
                Change::ChildList {
                    added: Vec::new(),
                    removed: children.clone(),
                    previous_sibling: None,
                    next_sibling: None,
                },
            );
            return Ok(children);
        }
        if let Some(old_parent) = self.tree.parent(node) {
            self.remove_child(old_parent, node)?;
        }
        Ok(vec![node])
    }

    /// Links `nodes` into `parent` before `before`, physically and logically.
    fn attach(
        &mut self,
        parent: NodeId,
        nodes: &[NodeId],
        before: Option<NodeId>,
        use_native: bool,
    ) -> ApplicationResult<()> {
        if use_native && !self.tree.children_overlaid(parent) {
            self.physical
                .insert_before(&mut self.tree, parent, nodes, before)?;
            trace!("physical insert under {}", parent);
            return Ok(());
        }

        debug!("overlay insert under {}", parent);
        self.freeze_children(parent);
        let (target, physical_before) = match before
            .and_then(|b| self.tree.physical(b, Relation::Parent).map(|p| (p, Some(b))))
        {
            Some(placement) => placement,
            None => (parent, None),
        };
        if target != parent {
            self.freeze_children(target);
        }
        self.physical
            .insert_before(&mut self.tree, target, nodes, physical_before)?;

        let mut previous = match before {
            Some(reference) => self.tree.previous_sibling(reference),
            None => self.tree.last_child(parent),
        };
        for &node in nodes {
            self.tree.set_logical(node, Relation::Parent, Some(parent));
            self.tree
                .set_logical(node, Relation::PreviousSibling, previous);
            self.link_next(parent, previous, Some(node));
            previous = Some(node);
        }
        self.link_next(parent, previous, before);
        Ok(())
    }

    /// Makes `next` follow `previous` in the logical child list of `parent`.
    fn link_next(&mut self, parent: NodeId, previous: Option<NodeId>, next: Option<NodeId>) {
        match previous {
            Some(p) => self.tree.set_logical(p, Relation::NextSibling, next),
            None => self.tree.set_logical(parent, Relation::FirstChild, next),
        }
        match next {
            Some(n) => self.tree.set_logical(n, Relation::PreviousSibling, previous),
            None => self.tree.set_logical(parent, Relation::LastChild, previous),
        }
    }

    /// Unlinks `child` from `parent` without recording anything.
    fn detach(&mut self, parent: NodeId, child: NodeId) -> ApplicationResult<()> {
        if self.tree.children_overlaid(parent) || self.affects_rendering(parent) {
            debug!("overlay remove of {} from {}", child, parent);
            let previous = self.tree.previous_sibling(child);
            let next = self.tree.next_sibling(child);
            self.freeze_children(parent);
            if let Some(physical_parent) = self.tree.physical(child, Relation::Parent) {
                if physical_parent != parent {
                    self.freeze_children(physical_parent);
                }
                self.physical
                    .remove_child(&mut self.tree, physical_parent, child)?;
            }
            self.link_next(parent, previous, next);
        } else {
            self.physical.remove_child(&mut self.tree, parent, child)?;
        }
        self.tree.clear_position(child);
        Ok(())
    }

    /// Swaps `old` for `nodes` in the child list of `parent`.
    fn swap(
        &mut self,
        parent: NodeId,
        nodes: &[NodeId],
        old: NodeId,
        use_native: bool,
    ) -> ApplicationResult<()> {
        if use_native && !self.tree.children_overlaid(parent) {
            self.physical
                .replace_child(&mut self.tree, parent, nodes, old)?;
            self.tree.clear_position(old);
            return Ok(());
        }

        debug!("overlay replace of {} under {}", old, parent);
        let previous = self.tree.previous_sibling(old);
        let next = self.tree.next_sibling(old);
        self.freeze_children(parent);
        match self.tree.physical(old, Relation::Parent) {
            Some(physical_parent) => {
                if physical_parent != parent {
                    self.freeze_children(physical_parent);
                }
                self.physical
                    .replace_child(&mut self.tree, physical_parent, nodes, old)?;
            }
            None => {
                self.physical
                    .insert_before(&mut self.tree, parent, nodes, None)?;
            }
        }

        let mut cursor = previous;
        for &node in nodes {
            self.tree.set_logical(node, Relation::Parent, Some(parent));
            self.tree.set_logical(node, Relation::PreviousSibling, cursor);
            self.link_next(parent, cursor, Some(node));
            cursor = Some(node);
        }
        self.link_next(parent, cursor, next);
        self.tree.clear_position(old);
        Ok(())
    }

    /// Moves freshly inserted nodes into the tree scope of `parent`.
    fn adopt(&mut self, parent: NodeId, nodes: &[NodeId]) {
        let scope = match self.tree.get(parent) {
            Some(record) if matches!(record.kind, NodeKind::ShadowRoot { .. }) => Some(parent),
            Some(record) => record.scope,
            None => None,
        };
        for &node in nodes {
            let subtree: Vec<NodeId> = self.tree.descendants(node).collect();
            for n in subtree {
                if let Some(record) = self.tree.get_mut(n) {
                    record.scope = scope;
                }
            }
            // Cached lookups were computed from the old position
            self.registry.invalidate_subtree(&self.tree, node);
        }
    }

    /// Forgets cached lookups and tree-scope membership below a removed node.
    fn node_was_removed(&mut self, node: NodeId) {
        self.registry.invalidate_subtree(&self.tree, node);
        let subtree: Vec<NodeId> = self.tree.descendants(node).collect();
        for n in subtree {
            if let Some(record) = self.tree.get_mut(n) {
                record.scope = None;
            }
        }
    }

    fn attribute_slot(
        &self,
        node: NodeId,
        name: &str,
        namespace: Option<&str>,
    ) -> ApplicationResult<Option<&Attribute>> {
        match self.tree.kind(node) {
            Some(NodeKind::Element { attributes, .. }) => Ok(attributes
                .iter()
                .find(|a| a.name == name && a.namespace.as_deref() == namespace)),
            Some(_) => Err(DomainError::InvalidNodeKind {
                node,
                expected: "an element",
            }
            .into()),
            None => Err(DomainError::UnknownNode(node).into()),
        }
    }
}
