//! Notification scheduling: Idle/Scheduled state, pending observers and flush reports.
//!
//! The scheduler never runs anything on its own. The embedding event loop
//! learns about a new batch through the arm hook and calls
//! [`Document::flush`](crate::application::Document::flush) at the end of
//! the turn.

use std::fmt;
use std::rc::Rc;

use tracing::{debug, instrument};

use crate::application::services::observer::{ObserverId, ObserverTable};
use crate::domain::ChangeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
}

/// Called once per Idle to Scheduled transition.
pub type ArmHook = Box<dyn FnMut()>;

pub struct NotificationScheduler {
    state: SchedulerState,
    pending: Vec<ObserverId>,
    arm: Option<ArmHook>,
    max_passes: usize,
}

impl fmt::Debug for NotificationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationScheduler")
            .field("state", &self.state)
            .field("pending", &self.pending)
            .field("armed_hook", &self.arm.is_some())
            .field("max_passes", &self.max_passes)
            .finish()
    }
}

impl NotificationScheduler {
    pub fn new(max_passes: usize) -> Self {
        Self {
            state: SchedulerState::Idle,
            pending: Vec::new(),
            arm: None,
            max_passes: max_passes.max(1),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    pub fn set_arm_hook(&mut self, hook: Option<ArmHook>) {
        self.arm = hook;
    }

    /// An observer's queue went from empty to non-empty.
    #[instrument(level = "trace", skip(self))]
    pub fn signal(&mut self, observer: ObserverId) {
        self.pending.push(observer);
        self.arm();
    }

    /// Leaves Scheduled before any delivery so callbacks can arm a fresh batch.
    pub(crate) fn begin_flush(&mut self) {
        self.state = SchedulerState::Idle;
    }

    /// Back to Idle when the flush left nothing behind.
    pub(crate) fn finish_flush(&mut self) {
        if self.pending.is_empty() {
            self.state = SchedulerState::Idle;
        }
    }

    /// Observers to visit in this pass, in creation order.
    ///
    /// Ids of observers dropped since they were signalled are skipped.
    pub(crate) fn next_batch(&mut self, observers: &ObserverTable) -> Vec<ObserverId> {
        let mut batch: Vec<ObserverId> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|id| observers.contains(*id))
            .collect();
        batch.sort_by_key(|id| observers.seq(*id));
        batch.dedup();
        batch
    }

    /// Keeps observers queued for a later flush and re-arms.
    pub(crate) fn defer(&mut self, observers: Vec<ObserverId>) {
        if observers.is_empty() {
            return;
        }
        debug!("deferring {} observer(s) to the next flush", observers.len());
        self.pending.extend(observers);
        self.arm();
    }

    fn arm(&mut self) {
        if self.state == SchedulerState::Idle {
            self.state = SchedulerState::Scheduled;
            debug!("scheduler armed");
            if let Some(hook) = self.arm.as_mut() {
                hook();
            }
        }
    }
}

/// One callback invocation during a flush.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub observer: ObserverId,
    pub records: Vec<Rc<ChangeRecord>>,
}

/// A callback that returned an error. Delivery of the pass continued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub observer: ObserverId,
    pub message: String,
}

/// What a flush did.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Collect/sort/deliver repetitions run
    pub passes: usize,
    pub deliveries: Vec<Delivery>,
    pub failures: Vec<DeliveryFailure>,
    /// True when the pass ceiling was hit and work was left for the next flush
    pub deferred: bool,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.deliveries.iter().map(|d| d.records.len()).sum()
    }
}
