//! Observation registry: registrations per node, transient entries and the
//! ancestor-lookup cache.
//!
//! Registrations live in an arena. A side table maps each node to the
//! registrations it carries: permanent ones (the node is the registration's
//! target) and transient ones (the node was removed from under a subtree
//! registration). The cache memoizes, per node, every entry reachable from
//! the node and its logical ancestors. It is never a source of truth and
//! can be switched off.

use std::collections::HashMap;
use std::rc::Rc;

use generational_arena::{Arena, Index};
use tracing::{debug, instrument, trace};

use crate::application::services::observer::ObserverId;
use crate::domain::{Change, NodeArena, NodeId, ObserverOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(Index);

/// One (observer, target, options) triple.
#[derive(Debug, Clone)]
pub struct Registration {
    pub observer: ObserverId,
    pub target: NodeId,
    pub options: ObserverOptions,
    transient_nodes: Vec<NodeId>,
}

impl Registration {
    /// Detached nodes currently observed through this registration.
    pub fn transient_nodes(&self) -> &[NodeId] {
        &self.transient_nodes
    }
}

/// A registration found on `holder` while walking up from some node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reachable {
    registration: RegistrationId,
    holder: NodeId,
}

/// An observer that wants a given change, and whether it wants the old value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub observer: ObserverId,
    pub old_value: bool,
}

#[derive(Debug)]
pub struct ObservationRegistry {
    registrations: Arena<Registration>,
    table: HashMap<NodeId, Vec<RegistrationId>>,
    cache: HashMap<NodeId, Rc<[Reachable]>>,
    cache_enabled: bool,
}

impl Default for ObservationRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ObservationRegistry {
    pub fn new(cache_enabled: bool) -> Self {
        Self {
            registrations: Arena::new(),
            table: HashMap::new(),
            cache: HashMap::new(),
            cache_enabled,
        }
    }

    pub fn registration(&self, id: RegistrationId) -> Option<&Registration> {
        self.registrations.get(id.0)
    }

    /// Registrations held by `node`, permanent and transient, in insertion order.
    pub fn registrations_on(&self, node: NodeId) -> Vec<&Registration> {
        self.table
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|id| self.registration(*id))
            .collect()
    }

    /// The permanent registration of `observer` on `target`.
    pub fn registration_for(&self, observer: ObserverId, target: NodeId) -> Option<&Registration> {
        self.find(observer, target).and_then(|id| self.registration(id))
    }

    pub fn is_cached(&self, node: NodeId) -> bool {
        self.cache.contains_key(&node)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn find(&self, observer: ObserverId, target: NodeId) -> Option<RegistrationId> {
        self.table.get(&target)?.iter().copied().find(|id| {
            self.registration(*id)
                .is_some_and(|r| r.observer == observer && r.target == target)
        })
    }

    /// Creates or updates the registration of `observer` on `target`.
    ///
    /// Returns true when a new registration was created.
    #[instrument(level = "debug", skip(self, tree, options))]
    pub fn subscribe(
        &mut self,
        tree: &NodeArena,
        observer: ObserverId,
        target: NodeId,
        options: ObserverOptions,
    ) -> bool {
        if let Some(id) = self.find(observer, target) {
            self.clear_transients_of(tree, id);
            if let Some(registration) = self.registrations.get_mut(id.0) {
                registration.options = options;
            }
            debug!("registration updated");
            return false;
        }

        let id = RegistrationId(self.registrations.insert(Registration {
            observer,
            target,
            options,
            transient_nodes: Vec::new(),
        }));
        self.table.entry(target).or_default().push(id);
        self.invalidate_subtree(tree, target);
        debug!("registration created");
        true
    }

    /// Drops every registration owned by `observer`, transients included.
    #[instrument(level = "debug", skip(self, tree))]
    pub fn unsubscribe(&mut self, tree: &NodeArena, observer: ObserverId) -> usize {
        let owned = self.owned_by(observer);
        for id in &owned {
            self.drop_registration(tree, *id);
        }
        owned.len()
    }

    /// Removes the transient entries of every registration owned by `observer`.
    #[instrument(level = "trace", skip(self, tree))]
    pub fn clear_transients(&mut self, tree: &NodeArena, observer: ObserverId) {
        for id in self.owned_by(observer) {
            self.clear_transients_of(tree, id);
        }
    }

    fn owned_by(&self, observer: ObserverId) -> Vec<RegistrationId> {
        self.registrations
            .iter()
            .filter(|(_, r)| r.observer == observer)
            .map(|(index, _)| RegistrationId(index))
            .collect()
    }

    fn clear_transients_of(&mut self, tree: &NodeArena, id: RegistrationId) {
        let nodes = match self.registrations.get_mut(id.0) {
            Some(registration) => std::mem::take(&mut registration.transient_nodes),
            None => return,
        };
        for node in nodes {
            self.detach_entry(node, id);
            self.invalidate_subtree(tree, node);
        }
    }

    fn detach_entry(&mut self, node: NodeId, id: RegistrationId) {
        if let Some(entries) = self.table.get_mut(&node) {
            entries.retain(|e| *e != id);
            if entries.is_empty() {
                self.table.remove(&node);
            }
        }
    }

    fn drop_registration(&mut self, tree: &NodeArena, id: RegistrationId) {
        self.clear_transients_of(tree, id);
        if let Some(registration) = self.registrations.remove(id.0) {
            self.detach_entry(registration.target, id);
            self.invalidate_subtree(tree, registration.target);
        }
    }

    /// Gives `removed` a transient entry for every subtree registration found
    /// on `ancestor` and its ancestors.
    #[instrument(level = "debug", skip(self, tree))]
    pub fn add_transient(&mut self, tree: &NodeArena, ancestor: NodeId, removed: NodeId) {
        let chain: Vec<NodeId> = std::iter::once(ancestor)
            .chain(tree.ancestors(ancestor))
            .collect();
        for node in chain {
            let ids: Vec<RegistrationId> = self.table.get(&node).cloned().unwrap_or_default();
            for id in ids {
                let Some(registration) = self.registrations.get(id.0) else {
                    continue;
                };
                if !registration.options.subtree
                    || registration.target == removed
                    || registration.transient_nodes.contains(&removed)
                {
                    continue;
                }
                if let Some(registration) = self.registrations.get_mut(id.0) {
                    registration.transient_nodes.push(removed);
                }
                self.table.entry(removed).or_default().push(id);
                trace!("transient entry on {} for registration on {}", removed, node);
            }
        }
        self.invalidate_subtree(tree, removed);
    }

    /// Observers interested in `change` at `target`, each listed once.
    ///
    /// Entries found on an ancestor only count for subtree registrations.
    /// An observer reached through several entries wants the old value if
    /// any of those entries asks for it.
    #[instrument(level = "trace", skip(self, tree, change))]
    pub fn collect_interested(
        &mut self,
        tree: &NodeArena,
        target: NodeId,
        change: &Change,
    ) -> Vec<Interest> {
        let kind = change.kind();
        let mut interested: Vec<Interest> = Vec::new();
        for entry in self.reachable(tree, target).iter() {
            let Some(registration) = self.registration(entry.registration) else {
                continue;
            };
            let options = &registration.options;
            if entry.holder != target && !options.subtree {
                continue;
            }
            if !options.matches(change) {
                continue;
            }
            let old_value = options.wants_old_value(kind);
            match interested
                .iter_mut()
                .find(|i| i.observer == registration.observer)
            {
                Some(existing) => existing.old_value |= old_value,
                None => interested.push(Interest {
                    observer: registration.observer,
                    old_value,
                }),
            }
        }
        interested
    }

    fn own_entries(&self, node: NodeId) -> impl Iterator<Item = Reachable> + '_ {
        self.table
            .get(&node)
            .into_iter()
            .flatten()
            .map(move |id| Reachable {
                registration: *id,
                holder: node,
            })
    }

    /// Entries on `node` followed by those on its ancestors, nearest first.
    fn reachable(&mut self, tree: &NodeArena, node: NodeId) -> Rc<[Reachable]> {
        if !self.cache_enabled {
            return std::iter::once(node)
                .chain(tree.ancestors(node))
                .flat_map(|n| self.own_entries(n).collect::<Vec<_>>())
                .collect();
        }
        if let Some(hit) = self.cache.get(&node) {
            return Rc::clone(hit);
        }

        // Walk up to the first cached ancestor, then fill in top-down
        let mut uncached = vec![node];
        let mut base: Rc<[Reachable]> = Rc::from(Vec::new());
        for ancestor in tree.ancestors(node) {
            if let Some(hit) = self.cache.get(&ancestor) {
                base = Rc::clone(hit);
                break;
            }
            uncached.push(ancestor);
        }
        for current in uncached.into_iter().rev() {
            let entries: Rc<[Reachable]> = self
                .own_entries(current)
                .chain(base.iter().copied())
                .collect();
            self.cache.insert(current, Rc::clone(&entries));
            base = entries;
        }
        base
    }

    /// Forgets cached lookups for `node` and its logical descendants.
    pub fn invalidate_subtree(&mut self, tree: &NodeArena, node: NodeId) {
        if self.cache.is_empty() {
            return;
        }
        for descendant in tree.descendants(node) {
            self.cache.remove(&descendant);
        }
        trace!("cache invalidated below {}", node);
    }

    /// Removes everything the registry holds for a node about to be destroyed.
    ///
    /// Returns the observers whose permanent registration targeted `node`.
    #[instrument(level = "debug", skip(self, tree))]
    pub fn prune(&mut self, tree: &NodeArena, node: NodeId) -> Vec<ObserverId> {
        let mut orphaned = Vec::new();
        for id in self.table.get(&node).cloned().unwrap_or_default() {
            let Some(registration) = self.registrations.get_mut(id.0) else {
                continue;
            };
            if registration.target == node {
                orphaned.push(registration.observer);
                self.drop_registration(tree, id);
            } else {
                registration.transient_nodes.retain(|n| *n != node);
                self.detach_entry(node, id);
            }
        }
        self.table.remove(&node);
        self.cache.remove(&node);
        orphaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::observer::{ObserverCallback, ObserverTable};
    use crate::domain::{NodeKind, ObserverInit, Relation};

    fn noop() -> ObserverCallback {
        Box::new(|_, _, _| Ok(()))
    }

    fn options(init: ObserverInit) -> ObserverOptions {
        ObserverOptions::try_from(&init).unwrap()
    }

    fn append(tree: &mut NodeArena, parent: NodeId, child: NodeId) {
        let last = tree.physical(parent, Relation::LastChild);
        tree.set_physical(child, Relation::Parent, Some(parent));
        tree.set_physical(child, Relation::PreviousSibling, last);
        match last {
            Some(l) => tree.set_physical(l, Relation::NextSibling, Some(child)),
            None => tree.set_physical(parent, Relation::FirstChild, Some(child)),
        }
        tree.set_physical(parent, Relation::LastChild, Some(child));
    }

    fn child_list() -> Change {
        Change::ChildList {
            added: vec![],
            removed: vec![],
            previous_sibling: None,
            next_sibling: None,
        }
    }

    #[test]
    fn given_existing_registration_when_subscribing_again_then_options_replaced() {
        let mut tree = NodeArena::new();
        let target = tree.create(NodeKind::element("div"));
        let mut observers = ObserverTable::new();
        let o = observers.create(noop());
        let mut registry = ObservationRegistry::default();

        assert!(registry.subscribe(&tree, o, target, options(ObserverInit::new().child_list(true))));
        assert!(!registry.subscribe(&tree, o, target, options(ObserverInit::new().attributes(true))));

        let registrations = registry.registrations_on(target);
        assert_eq!(registrations.len(), 1);
        assert!(registrations[0].options.attributes);
        assert!(!registrations[0].options.child_list);
    }

    #[test]
    fn given_subtree_registration_when_collecting_for_descendant_then_found_once() {
        let mut tree = NodeArena::new();
        let root = tree.create(NodeKind::element("div"));
        let child = tree.create(NodeKind::element("p"));
        append(&mut tree, root, child);
        let mut observers = ObserverTable::new();
        let deep = observers.create(noop());
        let shallow = observers.create(noop());
        let mut registry = ObservationRegistry::default();
        registry.subscribe(&tree, deep, root, options(ObserverInit::new().child_list(true).subtree(true)));
        registry.subscribe(&tree, shallow, root, options(ObserverInit::new().child_list(true)));

        let at_child = registry.collect_interested(&tree, child, &child_list());
        let at_root = registry.collect_interested(&tree, root, &child_list());

        assert_eq!(at_child.iter().map(|i| i.observer).collect::<Vec<_>>(), vec![deep]);
        assert_eq!(at_root.len(), 2);
        assert!(registry.is_cached(child));
    }

    #[test]
    fn given_removed_node_when_adding_transient_then_target_itself_is_skipped() {
        let mut tree = NodeArena::new();
        let root = tree.create(NodeKind::element("div"));
        let child = tree.create(NodeKind::element("p"));
        append(&mut tree, root, child);
        let mut observers = ObserverTable::new();
        let o = observers.create(noop());
        let mut registry = ObservationRegistry::default();
        registry.subscribe(&tree, o, root, options(ObserverInit::new().child_list(true).subtree(true)));

        registry.add_transient(&tree, root, child);
        registry.add_transient(&tree, root, child);
        registry.add_transient(&tree, root, root);

        assert_eq!(registry.registrations_on(child).len(), 1);
        assert_eq!(registry.registrations_on(root).len(), 1);
        let registration = registry.registration_for(o, root).unwrap();
        assert_eq!(registration.transient_nodes(), &[child]);

        registry.clear_transients(&tree, o);

        assert!(registry.registrations_on(child).is_empty());
    }

    #[test]
    fn given_cached_lookup_when_unsubscribing_then_registration_no_longer_reachable() {
        let mut tree = NodeArena::new();
        let root = tree.create(NodeKind::element("div"));
        let child = tree.create(NodeKind::element("p"));
        append(&mut tree, root, child);
        let mut observers = ObserverTable::new();
        let o = observers.create(noop());
        let mut registry = ObservationRegistry::default();
        registry.subscribe(&tree, o, root, options(ObserverInit::new().child_list(true).subtree(true)));
        assert_eq!(registry.collect_interested(&tree, child, &child_list()).len(), 1);

        assert_eq!(registry.unsubscribe(&tree, o), 1);

        assert!(registry.collect_interested(&tree, child, &child_list()).is_empty());
        assert!(registry.registration_for(o, root).is_none());
    }

    #[test]
    fn given_registered_target_when_pruned_then_observer_is_orphaned() {
        let mut tree = NodeArena::new();
        let node = tree.create(NodeKind::element("div"));
        let mut observers = ObserverTable::new();
        let o = observers.create(noop());
        let mut registry = ObservationRegistry::default();
        registry.subscribe(&tree, o, node, options(ObserverInit::new().child_list(true)));

        assert_eq!(registry.prune(&tree, node), vec![o]);
        assert!(registry.registrations_on(node).is_empty());
        assert!(!registry.is_cached(node));
    }
}
