//! Maps tasks onto worker grids

use kernelgrid_nostd_internal::WorkerGrid;
use std::collections::BTreeMap;

/// Associates `"<graph>.<task>"` keys with the worker grid that a task
/// should be launched on.
///
/// A task without an entry falls back to a default grid derived from its
/// first argument (unless the task declared that it needs an explicit grid).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GridScheduler {
    grids: BTreeMap<String, WorkerGrid>,
}

/// Build the canonical scheduler key of a task
pub fn task_key(graph: &str, task: &str) -> String {
    format!("{graph}.{task}")
}

impl GridScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler with a single entry
    pub fn with_grid(key: impl Into<String>, grid: WorkerGrid) -> Self {
        let mut out = Self::new();
        out.add_worker_grid(key, grid);
        out
    }

    /// Associate `grid` with `key`. When `key` already has a grid, the new
    /// one replaces it.
    pub fn add_worker_grid(&mut self, key: impl Into<String>, grid: WorkerGrid) -> &mut Self {
        let key = key.into();
        if let Some(previous) = self.grids.insert(key.clone(), grid) {
            tracing::debug!(key = %key, ?previous, "replaced the worker grid of a scheduler key");
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&WorkerGrid> {
        self.grids.get(key)
    }

    /// Mutable access lets callers adjust a grid between executions (e.g.
    /// to change the local work size)
    pub fn get_mut(&mut self, key: &str) -> Option<&mut WorkerGrid> {
        self.grids.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.grids.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.grids.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut scheduler = GridScheduler::with_grid(task_key("s0", "t0"), WorkerGrid::new_1d(8));
        scheduler.add_worker_grid("s0.t0", WorkerGrid::new_1d(16));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.get("s0.t0").unwrap().global_work(), [16, 1, 1]);
        assert!(scheduler.get("s0.t1").is_none());
    }

    #[test]
    fn grids_can_be_adjusted_in_place() {
        let mut scheduler = GridScheduler::new();
        assert!(scheduler.is_empty());
        scheduler.add_worker_grid("a.b", WorkerGrid::new_2d(4, 4));
        scheduler.get_mut("a.b").unwrap().set_local_work(2, 2, 1);
        assert_eq!(scheduler.get("a.b").unwrap().local_work(), Some([2, 2, 1]));
        assert_eq!(scheduler.keys().collect::<Vec<_>>(), vec!["a.b"]);
    }
}
