//! Document: owns the node arena, the collaborators and the observation engine.
//!
//! All mutation goes through a `Document` so that every change reaches the
//! registry, the recorder and the scheduler. Tree-mutating operations live in
//! [`services::mutator`](crate::application::services).

use std::rc::Rc;

use tracing::{debug, instrument, warn};

use crate::application::error::ApplicationResult;
use crate::application::services::{
    CallbackResult, ChangeRecorder, Delivery, DeliveryFailure, FlushReport,
    NotificationScheduler, ObservationRegistry, ObserverCallback, ObserverHandle, ObserverId,
    ObserverTable,
};
use crate::config::Settings;
use crate::domain::{
    Change, ChangeRecord, DomainError, NodeArena, NodeId, NodeKind, ObserverInit, ObserverOptions,
};
use crate::infrastructure::traits::{Composition, NativeTree, PhysicalTree, ShadowComposition};

pub struct Document {
    pub(crate) tree: NodeArena,
    root: NodeId,
    pub(crate) physical: Box<dyn PhysicalTree>,
    pub(crate) composition: Box<dyn Composition>,
    pub(crate) registry: ObservationRegistry,
    recorder: ChangeRecorder,
    pub(crate) observers: ObserverTable,
    scheduler: NotificationScheduler,
    settings: Settings,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("root", &self.root)
            .field("nodes", &self.tree.len())
            .field("observers", &self.observers.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Document {
    /// Create a document with the in-memory physical tree and shadow composition.
    pub fn new(settings: Settings) -> Self {
        Self::with_deps(
            settings,
            Box::new(NativeTree),
            Box::new(ShadowComposition::new()),
        )
    }

    /// Create a document with custom collaborators (for testing).
    pub fn with_deps(
        settings: Settings,
        physical: Box<dyn PhysicalTree>,
        composition: Box<dyn Composition>,
    ) -> Self {
        let mut tree = NodeArena::new();
        let root = tree.create(NodeKind::Document);
        Self {
            tree,
            root,
            physical,
            composition,
            registry: ObservationRegistry::new(settings.registry.cache_enabled),
            recorder: ChangeRecorder::new(settings.records.share_records),
            observers: ObserverTable::new(),
            scheduler: NotificationScheduler::new(settings.scheduler.max_flush_passes),
            settings,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn tree(&self) -> &NodeArena {
        &self.tree
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &ObservationRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    // ------------------------------------------------------------
    // Node creation
    // ------------------------------------------------------------

    pub fn create_element(&mut self, name: impl Into<String>) -> NodeId {
        self.tree.create(NodeKind::element(name))
    }

    pub fn create_text(&mut self, data: impl Into<String>) -> NodeId {
        self.tree.create(NodeKind::Text(data.into()))
    }

    pub fn create_comment(&mut self, data: impl Into<String>) -> NodeId {
        self.tree.create(NodeKind::Comment(data.into()))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.tree.create(NodeKind::Fragment)
    }

    /// Attaches a new shadow root to `host`. A previously attached root is
    /// kept as the new root's older root.
    #[instrument(level = "debug", skip(self))]
    pub fn attach_shadow(&mut self, host: NodeId) -> ApplicationResult<NodeId> {
        let older = match self.tree.get(host) {
            Some(record) if matches!(record.kind, NodeKind::Element { .. }) => record.shadow_root,
            Some(_) => {
                return Err(DomainError::InvalidNodeKind {
                    node: host,
                    expected: "an element",
                }
                .into())
            }
            None => return Err(DomainError::UnknownNode(host).into()),
        };
        // Light children keep their logical place once the host renders a shadow tree
        self.freeze_children(host);
        let shadow = self.tree.create(NodeKind::ShadowRoot { host, older });
        if let Some(record) = self.tree.get_mut(shadow) {
            record.scope = Some(shadow);
        }
        if let Some(record) = self.tree.get_mut(host) {
            record.shadow_root = Some(shadow);
        }
        debug!("shadow root {} attached to {}", shadow, host);
        Ok(shadow)
    }

    // ------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree.children(node).collect()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.parent(node)
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.tree.first_child(node)
    }

    pub fn last_child(&self, node: NodeId) -> Option<NodeId> {
        self.tree.last_child(node)
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.tree.next_sibling(node)
    }

    pub fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.tree.previous_sibling(node)
    }

    pub fn text_content(&self, node: NodeId) -> String {
        self.tree.text_content(node)
    }

    pub fn get_attribute(&self, node: NodeId, name: &str, namespace: Option<&str>) -> Option<&str> {
        match self.tree.kind(node)? {
            NodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|a| a.name == name && a.namespace.as_deref() == namespace)
                .map(|a| a.value.as_str()),
            _ => None,
        }
    }

    /// Shadow root whose tree contains `node`.
    pub fn scope_of(&self, node: NodeId) -> Option<NodeId> {
        self.tree.get(node).and_then(|n| n.scope)
    }

    /// True when `other` is `node` or a logical descendant of it in the same tree scope.
    pub fn contains(&self, node: NodeId, other: NodeId) -> bool {
        self.tree.contains(node)
            && self.tree.contains(other)
            && self.scope_of(node) == self.scope_of(other)
            && self.tree.is_inclusive_ancestor(node, other)
    }

    pub(crate) fn ensure_node(&self, node: NodeId) -> Result<(), DomainError> {
        if self.tree.contains(node) {
            Ok(())
        } else {
            Err(DomainError::UnknownNode(node))
        }
    }

    // ------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------

    pub fn create_observer<F>(&mut self, callback: F) -> ObserverId
    where
        F: FnMut(&[Rc<ChangeRecord>], ObserverId, &mut Document) -> CallbackResult + 'static,
    {
        let callback: ObserverCallback = Box::new(callback);
        let id = self.observers.create(callback);
        debug!("created {}", id);
        id
    }

    pub fn observer(&self, id: ObserverId) -> Option<&ObserverHandle> {
        self.observers.get(id)
    }

    /// Registers `observer` on `target`, or replaces the options of an
    /// existing registration. Invalid options leave everything unchanged.
    #[instrument(level = "debug", skip(self, init))]
    pub fn observe(
        &mut self,
        observer: ObserverId,
        target: NodeId,
        init: &ObserverInit,
    ) -> ApplicationResult<()> {
        let options = ObserverOptions::try_from(init).map_err(DomainError::from)?;
        self.ensure_node(target)?;
        if !self.observers.contains(observer) {
            return Err(DomainError::UnknownObserver.into());
        }
        if self
            .registry
            .subscribe(&self.tree, observer, target, options)
        {
            if let Some(handle) = self.observers.get_mut(observer) {
                handle.add_target(target);
            }
        }
        Ok(())
    }

    /// Drops every registration of `observer` and abandons its queue.
    #[instrument(level = "debug", skip(self))]
    pub fn disconnect(&mut self, observer: ObserverId) -> ApplicationResult<()> {
        let handle = self
            .observers
            .get_mut(observer)
            .ok_or(DomainError::UnknownObserver)?;
        handle.clear_targets();
        let abandoned = handle.take_records();
        let dropped = self.registry.unsubscribe(&self.tree, observer);
        debug!(
            "dropped {} registration(s), abandoned {} record(s)",
            dropped,
            abandoned.len()
        );
        Ok(())
    }

    /// Takes the pending records of `observer` without waiting for a flush.
    pub fn take_records(&mut self, observer: ObserverId) -> ApplicationResult<Vec<Rc<ChangeRecord>>> {
        let handle = self
            .observers
            .get_mut(observer)
            .ok_or(DomainError::UnknownObserver)?;
        Ok(handle.take_records())
    }

    /// Disconnects and forgets `observer`.
    pub fn drop_observer(&mut self, observer: ObserverId) -> ApplicationResult<()> {
        self.disconnect(observer)?;
        self.observers.remove(observer);
        Ok(())
    }

    /// Installs the closure called when a new batch is scheduled.
    pub fn set_arm_hook<F>(&mut self, hook: Option<F>)
    where
        F: FnMut() + 'static,
    {
        self.scheduler
            .set_arm_hook(hook.map(|h| Box::new(h) as Box<dyn FnMut()>));
    }

    pub(crate) fn enqueue(&mut self, target: NodeId, change: Change) -> usize {
        self.recorder.record(
            &mut self.registry,
            &self.tree,
            &mut self.observers,
            &mut self.scheduler,
            target,
            &change,
        )
    }

    // ------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------

    /// Delivers every pending record, observer by observer in creation order,
    /// repeating until no observer has anything left.
    #[instrument(level = "debug", skip(self))]
    pub fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        let mut busy = Vec::new();
        self.scheduler.begin_flush();
        loop {
            let batch = self.scheduler.next_batch(&self.observers);
            if batch.is_empty() {
                break;
            }
            if report.passes == self.scheduler.max_passes() {
                warn!(
                    "flush stopped after {} passes, {} observer(s) left for the next flush",
                    report.passes,
                    batch.len()
                );
                self.scheduler.defer(batch);
                report.deferred = true;
                break;
            }
            report.passes += 1;
            debug!("pass {}: {} observer(s)", report.passes, batch.len());
            for observer in batch {
                self.deliver(observer, &mut report, &mut busy);
            }
        }
        // Observers whose callback is running further up the stack
        self.scheduler.defer(busy);
        self.scheduler.finish_flush();
        report
    }

    fn deliver(&mut self, observer: ObserverId, report: &mut FlushReport, busy: &mut Vec<ObserverId>) {
        let Some(handle) = self.observers.get_mut(observer) else {
            return;
        };
        let records = handle.take_records();
        let Some(mut callback) = handle.take_callback() else {
            handle.restore_records(records);
            busy.push(observer);
            return;
        };
        self.registry.clear_transients(&self.tree, observer);
        if records.is_empty() {
            if let Some(handle) = self.observers.get_mut(observer) {
                handle.restore_callback(callback);
            }
            return;
        }

        debug!("delivering {} record(s) to {}", records.len(), observer);
        let result = callback(&records, observer, self);
        if let Some(handle) = self.observers.get_mut(observer) {
            handle.restore_callback(callback);
        }
        if let Err(e) = result {
            warn!("callback of {} failed: {}", observer, e);
            report.failures.push(DeliveryFailure {
                observer,
                message: e.to_string(),
            });
        }
        report.deliveries.push(Delivery { observer, records });
    }

    // ------------------------------------------------------------
    // Destruction
    // ------------------------------------------------------------

    /// Destroys a detached subtree, shadow trees included, and prunes every
    /// registry entry held for it. Returns the number of nodes destroyed.
    #[instrument(level = "debug", skip(self))]
    pub fn discard(&mut self, node: NodeId) -> ApplicationResult<usize> {
        self.ensure_node(node)?;
        let hosted = match self.tree.kind(node) {
            Some(NodeKind::ShadowRoot { host, .. }) => self.tree.contains(*host),
            _ => false,
        };
        if node == self.root || self.tree.parent(node).is_some() || hosted {
            return Err(DomainError::NodeAttached(node).into());
        }
        if let Some(physical_parent) = self.tree.physical(node, crate::domain::Relation::Parent) {
            self.physical
                .remove_child(&mut self.tree, physical_parent, node)?;
        }

        let doomed = self.subtree_with_shadows(node);
        for &n in &doomed {
            for observer in self.registry.prune(&self.tree, n) {
                if let Some(handle) = self.observers.get_mut(observer) {
                    handle.remove_target(n);
                }
            }
        }
        for &n in &doomed {
            self.tree.remove(n);
        }
        debug!("discarded {} node(s)", doomed.len());
        Ok(doomed.len())
    }

    fn subtree_with_shadows(&self, node: NodeId) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            nodes.push(current);
            let Some(record) = self.tree.get(current) else {
                continue;
            };
            if let Some(shadow) = record.shadow_root {
                stack.push(shadow);
            }
            if let NodeKind::ShadowRoot {
                older: Some(older), ..
            } = record.kind
            {
                stack.push(older);
            }
            let children: Vec<NodeId> = self.tree.children(current).collect();
            stack.extend(children.into_iter().rev());
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_new_document_when_created_then_root_is_document_node() {
        let doc = Document::default();
        assert_eq!(doc.tree().kind(doc.root()), Some(&NodeKind::Document));
        assert!(doc.children(doc.root()).is_empty());
    }

    #[test]
    fn given_text_node_when_attaching_shadow_then_invalid_kind() {
        let mut doc = Document::default();
        let text = doc.create_text("x");
        let err = doc.attach_shadow(text).unwrap_err();
        assert!(err.to_string().contains("is not an element"), "{}", err);
    }

    #[test]
    fn given_two_shadow_roots_when_attached_then_older_is_chained() {
        let mut doc = Document::default();
        let host = doc.create_element("div");
        let first = doc.attach_shadow(host).unwrap();
        let second = doc.attach_shadow(host).unwrap();

        assert_eq!(
            doc.tree().kind(second),
            Some(&NodeKind::ShadowRoot {
                host,
                older: Some(first)
            })
        );
        assert_eq!(doc.tree().get(host).unwrap().shadow_root, Some(second));
        assert_eq!(doc.scope_of(second), Some(second));
    }

    #[test]
    fn given_invalid_options_when_observing_then_no_registration() {
        let mut doc = Document::default();
        let target = doc.create_element("div");
        let o = doc.create_observer(|_, _, _| Ok(()));
        let init = ObserverInit::new().attributes(false).attribute_filter(["id"]);

        let err = doc.observe(o, target, &init).unwrap_err();

        assert!(err.to_string().contains("invalid observer options"), "{}", err);
        assert!(doc.registry().registrations_on(target).is_empty());
        assert!(doc.observer(o).unwrap().targets().is_empty());
    }
}
