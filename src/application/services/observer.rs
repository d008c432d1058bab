//! Observer handles: callback, registered targets and the pending record queue.

use std::fmt;
use std::rc::Rc;

use generational_arena::{Arena, Index};
use tracing::trace;

use crate::application::document::Document;
use crate::domain::{ChangeRecord, NodeId};

/// Handle to an observer created by [`Document::create_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) Index);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (slot, _) = self.0.into_raw_parts();
        write!(f, "observer-{}", slot)
    }
}

/// Outcome of one callback invocation; errors are isolated by the scheduler.
pub type CallbackResult = Result<(), Box<dyn std::error::Error>>;

/// Callback invoked with a delivered batch. The document is lent to the
/// callback so it may read the tree or mutate it again.
pub type ObserverCallback =
    Box<dyn FnMut(&[Rc<ChangeRecord>], ObserverId, &mut Document) -> CallbackResult>;

pub struct ObserverHandle {
    seq: u64,
    callback: Option<ObserverCallback>,
    targets: Vec<NodeId>,
    records: Vec<Rc<ChangeRecord>>,
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("seq", &self.seq)
            .field("targets", &self.targets)
            .field("pending", &self.records.len())
            .field("in_callback", &self.callback.is_none())
            .finish()
    }
}

impl ObserverHandle {
    fn new(seq: u64, callback: ObserverCallback) -> Self {
        Self {
            seq,
            callback: Some(callback),
            targets: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Creation sequence number, the delivery order key.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Nodes this observer holds a permanent registration on.
    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    pub fn pending(&self) -> &[Rc<ChangeRecord>] {
        &self.records
    }

    /// Appends a record; true when the queue was empty before.
    pub(crate) fn enqueue(&mut self, record: Rc<ChangeRecord>) -> bool {
        let was_empty = self.records.is_empty();
        trace!("enqueue seq={} {}", self.seq, record);
        self.records.push(record);
        was_empty
    }

    pub(crate) fn take_records(&mut self) -> Vec<Rc<ChangeRecord>> {
        std::mem::take(&mut self.records)
    }

    /// Puts an undelivered batch back in front of anything queued since.
    pub(crate) fn restore_records(&mut self, mut records: Vec<Rc<ChangeRecord>>) {
        records.append(&mut self.records);
        self.records = records;
    }

    pub(crate) fn add_target(&mut self, target: NodeId) {
        if !self.targets.contains(&target) {
            self.targets.push(target);
        }
    }

    pub(crate) fn remove_target(&mut self, target: NodeId) {
        self.targets.retain(|t| *t != target);
    }

    pub(crate) fn clear_targets(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.targets)
    }

    pub(crate) fn take_callback(&mut self) -> Option<ObserverCallback> {
        self.callback.take()
    }

    pub(crate) fn restore_callback(&mut self, callback: ObserverCallback) {
        self.callback = Some(callback);
    }
}

/// All live observers, keyed by id.
#[derive(Debug, Default)]
pub struct ObserverTable {
    observers: Arena<ObserverHandle>,
    next_seq: u64,
}

impl ObserverTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, callback: ObserverCallback) -> ObserverId {
        let seq = self.next_seq;
        self.next_seq += 1;
        ObserverId(self.observers.insert(ObserverHandle::new(seq, callback)))
    }

    pub fn get(&self, id: ObserverId) -> Option<&ObserverHandle> {
        self.observers.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: ObserverId) -> Option<&mut ObserverHandle> {
        self.observers.get_mut(id.0)
    }

    pub(crate) fn remove(&mut self, id: ObserverId) -> Option<ObserverHandle> {
        self.observers.remove(id.0)
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.observers.contains(id.0)
    }

    pub fn seq(&self, id: ObserverId) -> Option<u64> {
        self.get(id).map(ObserverHandle::seq)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Change, NodeArena, NodeKind};

    fn noop() -> ObserverCallback {
        Box::new(|_, _, _| Ok(()))
    }

    fn record(target: NodeId) -> Rc<ChangeRecord> {
        let change = Change::CharacterData { old_value: None };
        Rc::new(ChangeRecord::new(target, &change, false))
    }

    #[test]
    fn given_new_observers_when_created_then_sequence_increases() {
        let mut table = ObserverTable::new();
        let a = table.create(noop());
        let b = table.create(noop());
        table.remove(a);
        let c = table.create(noop());

        assert_eq!(table.seq(b), Some(1));
        assert_eq!(table.seq(c), Some(2));
        assert_eq!(table.seq(a), None);
    }

    #[test]
    fn given_queue_when_enqueueing_then_reports_first_record_only() {
        let mut arena = NodeArena::new();
        let node = arena.create(NodeKind::Text("x".into()));
        let mut table = ObserverTable::new();
        let id = table.create(noop());
        let handle = table.get_mut(id).unwrap();

        assert!(handle.enqueue(record(node)));
        assert!(!handle.enqueue(record(node)));
        assert_eq!(handle.take_records().len(), 2);
        assert!(handle.pending().is_empty());
    }

    #[test]
    fn given_restored_batch_when_taking_then_batch_comes_first() {
        let mut arena = NodeArena::new();
        let first = arena.create(NodeKind::Text("1".into()));
        let second = arena.create(NodeKind::Text("2".into()));
        let mut table = ObserverTable::new();
        let id = table.create(noop());
        let handle = table.get_mut(id).unwrap();

        handle.enqueue(record(first));
        let batch = handle.take_records();
        handle.enqueue(record(second));
        handle.restore_records(batch);

        let targets: Vec<_> = handle.take_records().iter().map(|r| r.target).collect();
        assert_eq!(targets, vec![first, second]);
    }
}
