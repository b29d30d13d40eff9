/// Configuration for the history manager.

/// Time window in milliseconds within which consecutive same-filter
/// records coalesce into a single undo/redo step.
const DEFAULT_COALESCE_WINDOW_MS: u64 = 500;

/// Tuning knobs for [`HistoryManager`](crate::HistoryManager).
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Coalescing window in milliseconds. Zero disables coalescing, so
    /// every record undoes and redoes as its own step.
    pub coalesce_window_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: DEFAULT_COALESCE_WINDOW_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HistoryConfig::default();
        assert_eq!(config.coalesce_window_ms, 500);
    }
}
