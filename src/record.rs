/// Core types for history records and their replay capabilities.
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bitflags::bitflags;

bitflags! {
    /// Bit-flag identifying which subsystem produced a record.
    ///
    /// Filters are built by OR-ing categories together, so a single mask
    /// can select several subsystems at once. [`Category::all()`] matches
    /// every record and is the filter used at teardown.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Category: u32 {
        /// Text insertions and deletions.
        const EDIT = 1 << 0;
        /// Cursor and scroll position changes.
        const CURSOR = 1 << 1;
        /// Selection changes.
        const SELECTION = 1 << 2;
        /// Line bookmarks.
        const BOOKMARK = 1 << 3;
        /// Formatting and indentation changes.
        const FORMAT = 1 << 4;
        /// Document-level metadata such as encoding or line endings.
        const METADATA = 1 << 5;
    }
}

/// Which way a replay capability should apply a recorded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Roll the action back.
    Undo,
    /// Apply the action again after an undo.
    Redo,
}

/// Opaque caller-supplied handle stored with a record and passed back
/// unchanged on every invocation.
pub type OwnerContext = Arc<dyn Any + Send + Sync>;

/// Type-erased action payload, owned exclusively by its record from the
/// moment the history accepts it.
pub type Payload = Box<dyn Any + Send>;

/// Replay and release capabilities for one subsystem's records.
///
/// Implemented once per subsystem and shared across its records. The
/// history never interprets payload contents; it only hands them back
/// through this interface.
pub trait UndoDelegate: Send + Sync {
    /// Replays the recorded action in the given direction.
    ///
    /// Invoked synchronously while the history lock is held. Must not
    /// panic, and must not call `undo`, `redo`, or `clear` on the manager
    /// that owns the record. A re-entrant `record` call is tolerated and
    /// skipped.
    fn apply(
        &self,
        owner: &OwnerContext,
        category: Category,
        payload: &mut Payload,
        direction: Direction,
    );

    /// Releases the payload when its record is destroyed.
    ///
    /// The default implementation drops the payload, which is enough for
    /// payloads without out-of-band resources.
    fn release(&self, payload: Payload) {
        drop(payload);
    }
}

/// One entry in the undo or redo stack.
///
/// Either a concrete action recorded by a subsystem, or a boundary
/// sentinel marking the edge of an explicit group. Boundaries carry no
/// payload and no capabilities.
pub(crate) struct HistoryRecord {
    pub(crate) category: Category,
    /// Creation time; drives the coalescing window.
    pub(crate) recorded_at: Instant,
    pub(crate) kind: RecordKind,
}

pub(crate) enum RecordKind {
    /// Group-open or group-close sentinel.
    Boundary,
    /// A reversible action owned by a subsystem.
    Action {
        owner: OwnerContext,
        /// `None` only once the payload has been handed to `release`.
        payload: Option<Payload>,
        delegate: Arc<dyn UndoDelegate>,
    },
}

impl HistoryRecord {
    /// Creates a concrete action record stamped with the current time.
    pub(crate) fn action(
        owner: OwnerContext,
        category: Category,
        payload: Payload,
        delegate: Arc<dyn UndoDelegate>,
    ) -> Self {
        Self {
            category,
            recorded_at: Instant::now(),
            kind: RecordKind::Action {
                owner,
                payload: Some(payload),
                delegate,
            },
        }
    }

    /// Creates a group boundary sentinel.
    pub(crate) fn boundary(category: Category) -> Self {
        Self {
            category,
            recorded_at: Instant::now(),
            kind: RecordKind::Boundary,
        }
    }

    pub(crate) fn is_boundary(&self) -> bool {
        matches!(self.kind, RecordKind::Boundary)
    }

    /// Hands the record to its delegate for replay. Boundaries no-op.
    pub(crate) fn invoke(&mut self, direction: Direction) {
        let category = self.category;
        if let RecordKind::Action {
            owner,
            payload,
            delegate,
        } = &mut self.kind
        {
            if let Some(data) = payload {
                delegate.apply(owner, category, data, direction);
            }
        }
    }
}

impl Drop for HistoryRecord {
    fn drop(&mut self) {
        if let RecordKind::Action {
            payload, delegate, ..
        } = &mut self.kind
        {
            if let Some(data) = payload.take() {
                delegate.release(data);
            }
        }
    }
}

impl fmt::Debug for HistoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryRecord")
            .field("category", &self.category)
            .field("boundary", &self.is_boundary())
            .finish()
    }
}
