//! Turns a change into records and queues them on interested observers.

use std::rc::Rc;

use tracing::{instrument, trace};

use crate::application::services::observer::ObserverTable;
use crate::application::services::registry::ObservationRegistry;
use crate::application::services::scheduler::NotificationScheduler;
use crate::domain::{Change, ChangeRecord, NodeArena, NodeId};

#[derive(Debug, Clone)]
pub struct ChangeRecorder {
    share_records: bool,
}

impl Default for ChangeRecorder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ChangeRecorder {
    pub fn new(share_records: bool) -> Self {
        Self { share_records }
    }

    /// Queues `change` at `target` for every interested observer.
    ///
    /// With sharing on, all observers that do not want the old value get the
    /// same record and all that do get a second one. Each is built only if
    /// some observer needs it. Returns the number of observers reached.
    #[instrument(level = "trace", skip(self, registry, tree, observers, scheduler, change))]
    pub fn record(
        &self,
        registry: &mut ObservationRegistry,
        tree: &NodeArena,
        observers: &mut ObserverTable,
        scheduler: &mut NotificationScheduler,
        target: NodeId,
        change: &Change,
    ) -> usize {
        let interested = registry.collect_interested(tree, target, change);
        if interested.is_empty() {
            return 0;
        }

        let mut plain: Option<Rc<ChangeRecord>> = None;
        let mut with_old: Option<Rc<ChangeRecord>> = None;
        let mut reached = 0;
        for interest in interested {
            let Some(handle) = observers.get_mut(interest.observer) else {
                continue;
            };
            let slot = if interest.old_value {
                &mut with_old
            } else {
                &mut plain
            };
            let record = self.share(slot, || ChangeRecord::new(target, change, interest.old_value));
            if handle.enqueue(record) {
                scheduler.signal(interest.observer);
            }
            reached += 1;
        }
        trace!("{} at {} reached {} observer(s)", change.kind(), target, reached);
        reached
    }

    fn share(
        &self,
        slot: &mut Option<Rc<ChangeRecord>>,
        build: impl FnOnce() -> ChangeRecord,
    ) -> Rc<ChangeRecord> {
        if !self.share_records {
            return Rc::new(build());
        }
        Rc::clone(slot.get_or_insert_with(|| Rc::new(build())))
    }
}
