/// Category-aware undo/redo manager over a heterogeneous history.
///
/// Subsystems record reversible actions onto a shared undo stack; any
/// subsystem can then ask for its most recent action (or a grouped or
/// time-coalesced cluster of actions) to be undone or redone, while
/// records of other subsystems interleaved in the same stack stay in
/// place.
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::HistoryConfig;
use crate::record::{
    Category, Direction, HistoryRecord, OwnerContext, Payload, RecordKind, UndoDelegate,
};

/// Notification fired once per undo/redo call, after the history lock
/// has been released, so a downstream view can refresh without ever
/// observing the stacks mid-sweep.
pub type RefreshHook = Arc<dyn Fn() + Send + Sync>;

/// Mutable history state guarded by the manager's lock.
struct HistoryState {
    /// Undo stack, most recently recorded record on top (end of the vec).
    undo_stack: Vec<HistoryRecord>,
    /// Redo stack, most recently undone record on top.
    redo_stack: Vec<HistoryRecord>,
    /// Category and nesting depth of the currently open group.
    group: Option<(Category, u32)>,
}

/// Records reversible actions from independent subsystems and replays
/// them on demand, filtered by category.
///
/// The manager owns every payload it accepts and releases each one
/// exactly once, through its subsystem's [`UndoDelegate::release`], when
/// the record is invalidated by a new action, cleared, or dropped with
/// the manager.
///
/// # Thread safety
///
/// All structural access is serialized by one internal lock. The
/// reentrancy guard that lets a callback running inside a sweep call
/// [`record`](Self::record) without deadlocking is checked *before* the
/// lock is acquired, so under concurrent callers a `record` racing
/// another thread's operation may be skipped rather than queued. Callers
/// that need cross-thread determinism must serialize externally.
pub struct HistoryManager {
    state: Mutex<HistoryState>,
    /// One-shot flag: drop the next record request instead of storing it.
    disable_next: AtomicBool,
    /// Set while an operation holds the lock. A record request arriving
    /// from inside one of its callbacks is skipped instead of
    /// deadlocking on the non-reentrant lock.
    busy: AtomicBool,
    config: HistoryConfig,
    refresh: Option<RefreshHook>,
}

impl HistoryManager {
    /// Creates a manager with the given configuration.
    ///
    /// `refresh` is invoked once per undo/redo call, after the internal
    /// lock has been released; pass `None` when no downstream view needs
    /// notifying.
    pub fn new(config: HistoryConfig, refresh: Option<RefreshHook>) -> Self {
        Self {
            state: Mutex::new(HistoryState {
                undo_stack: Vec::new(),
                redo_stack: Vec::new(),
                group: None,
            }),
            disable_next: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            config,
            refresh,
        }
    }

    /// Records a reversible action produced by a subsystem.
    ///
    /// The payload becomes exclusively owned by the history; it is
    /// handed back to `delegate` for replay and eventually released
    /// through [`UndoDelegate::release`]. Storing a new action
    /// invalidates (and releases) the entire redo stack.
    ///
    /// Returns `Some(payload)` when the request arrives re-entrantly
    /// from a callback running inside another operation: the record is
    /// skipped and the caller keeps responsibility for the payload.
    /// Returns `None` when the record was stored or suppressed.
    pub fn record(
        &self,
        owner: OwnerContext,
        category: Category,
        payload: Payload,
        delegate: Arc<dyn UndoDelegate>,
    ) -> Option<Payload> {
        if self.disable_next.swap(false, Ordering::AcqRel) {
            // One-shot suppression: the payload dies here, stored nowhere.
            delegate.release(payload);
            return None;
        }
        if self.busy.load(Ordering::Acquire) {
            tracing::warn!(?category, "record skipped: history is replaying");
            return Some(payload);
        }
        let mut guard = self.state.lock();
        self.busy.store(true, Ordering::Release);
        guard
            .undo_stack
            .push(HistoryRecord::action(owner, category, payload, delegate));
        // A new action invalidates every pending redo.
        guard.redo_stack.clear();
        self.busy.store(false, Ordering::Release);
        None
    }

    /// Drops the next record request instead of storing it. One-shot and
    /// idempotent: several calls arm a single suppression.
    pub fn disable_next(&self) {
        self.disable_next.store(true, Ordering::Release);
    }

    /// Opens an explicit group: every record stored until the matching
    /// [`end_group`](Self::end_group) undoes and redoes as one step.
    ///
    /// Nested calls only increase a depth counter; a single boundary
    /// pair delimits the outermost group, whatever the nesting depth.
    pub fn start_group(&self, category: Category) {
        if self.busy.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.state.lock();
        self.busy.store(true, Ordering::Release);
        match guard.group.take() {
            Some((open_category, depth)) => {
                guard.group = Some((open_category, depth + 1));
            }
            None => {
                guard.group = Some((category, 1));
                self.push_boundary(&mut guard, category);
            }
        }
        self.busy.store(false, Ordering::Release);
    }

    /// Closes the innermost open group, emitting the closing boundary
    /// when the outermost group ends.
    ///
    /// # Panics
    ///
    /// Panics if no group is open. Unbalanced group calls are a caller
    /// bug, not a runtime condition to recover from.
    pub fn end_group(&self) {
        if self.busy.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.state.lock();
        self.busy.store(true, Ordering::Release);
        let Some((category, depth)) = guard.group.take() else {
            panic!("end_group without a matching start_group");
        };
        if depth > 1 {
            guard.group = Some((category, depth - 1));
        } else {
            self.push_boundary(&mut guard, category);
        }
        self.busy.store(false, Ordering::Release);
    }

    /// Undoes the most recent step whose category intersects `filter`.
    ///
    /// A step is a single concrete record, an explicit group, or a run
    /// of consecutive matching records recorded within the coalescing
    /// window. Records of other categories above the match stay in
    /// place. Fires the refresh hook even when nothing matched.
    pub fn undo(&self, filter: Category) {
        self.execute(filter, Direction::Undo);
    }

    /// Redoes the most recently undone step whose category intersects
    /// `filter`, moving it back onto the undo stack in original order.
    pub fn redo(&self, filter: Category) {
        self.execute(filter, Direction::Redo);
    }

    /// Removes every record matching `filter` from both stacks,
    /// releasing each removed payload. Non-matching records keep their
    /// positions. Also resets the one-shot suppression flag.
    ///
    /// Boundaries are removed like any other record, which can leave a
    /// group unbalanced; later sweeps treat an orphaned boundary as a
    /// transparent delimiter. `clear(Category::all())` empties the
    /// history entirely.
    pub fn clear(&self, filter: Category) {
        let mut guard = self.state.lock();
        self.busy.store(true, Ordering::Release);
        let before = guard.undo_stack.len() + guard.redo_stack.len();
        guard
            .undo_stack
            .retain(|record| !record.category.intersects(filter));
        guard
            .redo_stack
            .retain(|record| !record.category.intersects(filter));
        let removed = before - (guard.undo_stack.len() + guard.redo_stack.len());
        self.disable_next.store(false, Ordering::Release);
        self.busy.store(false, Ordering::Release);
        tracing::debug!(?filter, removed, "cleared history records");
    }

    /// Visits every concrete record matching `filter`: undo stack first,
    /// then redo stack, most recent first. Boundaries are skipped.
    ///
    /// The traversal is read-only; any context the visitor needs should
    /// be captured by the closure. The visitor must not call back into
    /// this manager: a re-entrant `record` is skipped, and a re-entrant
    /// sweep is not guarded.
    pub fn iterate(&self, filter: Category, mut visit: impl FnMut(Category, &dyn Any)) {
        let guard = self.state.lock();
        self.busy.store(true, Ordering::Release);
        for record in guard
            .undo_stack
            .iter()
            .rev()
            .chain(guard.redo_stack.iter().rev())
        {
            if !record.category.intersects(filter) {
                continue;
            }
            if let RecordKind::Action {
                payload: Some(payload),
                ..
            } = &record.kind
            {
                visit(record.category, payload.as_ref());
            }
        }
        self.busy.store(false, Ordering::Release);
    }

    /// Whether an undo sweep with this filter would find a record.
    pub fn can_undo(&self, filter: Category) -> bool {
        self.state
            .lock()
            .undo_stack
            .iter()
            .any(|record| record.category.intersects(filter))
    }

    /// Whether a redo sweep with this filter would find a record.
    pub fn can_redo(&self, filter: Category) -> bool {
        self.state
            .lock()
            .redo_stack
            .iter()
            .any(|record| record.category.intersects(filter))
    }

    /// Number of records on the undo stack, boundaries included.
    pub fn undo_depth(&self) -> usize {
        self.state.lock().undo_stack.len()
    }

    /// Number of records on the redo stack, boundaries included.
    pub fn redo_depth(&self) -> usize {
        self.state.lock().redo_stack.len()
    }

    /// Pushes a group boundary while the lock is held.
    ///
    /// Boundary records go through the same one-shot suppression gate as
    /// concrete records and invalidate the redo stack when stored.
    fn push_boundary(&self, state: &mut HistoryState, category: Category) {
        if self.disable_next.swap(false, Ordering::AcqRel) {
            return;
        }
        state.undo_stack.push(HistoryRecord::boundary(category));
        state.redo_stack.clear();
    }

    /// Shared undo/redo sweep; `direction` selects which stack is the
    /// source and which the destination.
    fn execute(&self, filter: Category, direction: Direction) {
        let mut guard = self.state.lock();
        self.busy.store(true, Ordering::Release);
        let window = Duration::from_millis(self.config.coalesce_window_ms);
        let state = &mut *guard;
        let (from, to) = match direction {
            Direction::Undo => (&mut state.undo_stack, &mut state.redo_stack),
            Direction::Redo => (&mut state.redo_stack, &mut state.undo_stack),
        };

        // Scan from the most recent entry toward the oldest for the
        // first record matching the filter; records of other categories
        // stay untouched in place.
        let mut moved = 0usize;
        let mut idx = from.len();
        while idx > 0 {
            idx -= 1;
            if !from[idx].category.intersects(filter) {
                continue;
            }
            if from[idx].is_boundary() {
                // Group sentinel: the whole group moves atomically,
                // whatever the member categories.
                to.push(from.remove(idx));
                moved += 1;
                while idx > 0 {
                    idx -= 1;
                    let mut record = from.remove(idx);
                    let closing = record.is_boundary();
                    if !closing {
                        record.invoke(direction);
                    }
                    to.push(record);
                    moved += 1;
                    if closing {
                        break;
                    }
                }
            } else {
                // Concrete record: replay it together with consecutive
                // matching records inside the coalescing window. An
                // orphaned boundary toggles group mode instead of ending
                // the run.
                let window_start = from[idx].recorded_at;
                let mut in_group = false;
                loop {
                    let mut record = from.remove(idx);
                    if record.is_boundary() {
                        in_group = !in_group;
                    } else {
                        record.invoke(direction);
                    }
                    to.push(record);
                    moved += 1;
                    if idx == 0 {
                        break;
                    }
                    let next = &from[idx - 1];
                    if !next.category.intersects(filter) {
                        break;
                    }
                    if !in_group && !within_window(window_start, next.recorded_at, window) {
                        break;
                    }
                    idx -= 1;
                }
            }
            break;
        }
        tracing::debug!(?direction, ?filter, moved, "history sweep finished");
        self.busy.store(false, Ordering::Release);
        drop(guard);

        // Downstream observers are notified only once the lock is
        // released, and also when the sweep moved nothing.
        if let Some(refresh) = &self.refresh {
            refresh();
        }
    }
}

impl Default for HistoryManager {
    /// Default configuration and no refresh hook; convenient for tests
    /// and simple embeddings.
    fn default() -> Self {
        Self::new(HistoryConfig::default(), None)
    }
}

impl fmt::Debug for HistoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("HistoryManager");
        dbg.field("disable_next", &self.disable_next.load(Ordering::Relaxed))
            .field("busy", &self.busy.load(Ordering::Relaxed));
        match self.state.try_lock() {
            Some(state) => dbg
                .field("undo_depth", &state.undo_stack.len())
                .field("redo_depth", &state.redo_stack.len())
                .field("group", &state.group)
                .finish(),
            None => dbg.field("state", &"<locked>").finish(),
        }
    }
}

/// Whether two record timestamps fall inside the same coalescing window.
fn within_window(first: Instant, other: Instant, window: Duration) -> bool {
    let delta = if first >= other {
        first - other
    } else {
        other - first
    };
    delta < window
}
