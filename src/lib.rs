/// Category-aware undo/redo history for interactive editing applications.
///
/// Independent subsystems record reversible actions onto one shared
/// history. Undo and redo requests are filtered by subsystem category,
/// rapid same-category records coalesce into a single step, and records
/// bracketed by an explicit group undo and redo as one. See
/// [`HistoryManager`] for the entry point.
pub mod config;
pub mod manager;
pub mod record;

pub use config::HistoryConfig;
pub use manager::{HistoryManager, RefreshHook};
pub use record::{Category, Direction, OwnerContext, Payload, UndoDelegate};
