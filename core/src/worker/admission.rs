// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Single-slot admission and the job status table.
//!
//! One mutex guards both the occupied slot and every status transition, which
//! is what makes the ordering guarantees hold: a task id is only handed out
//! after its `Running` entry exists, and the slot is cleared in the same
//! critical section that records the terminal status.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::protocol::{JobStatus, TaskId};

#[derive(Debug, Default)]
struct TableInner {
    current: Option<TaskId>,
    statuses: HashMap<TaskId, JobStatus>,
}

/// The worker's job table: at most one non-terminal entry at any time.
#[derive(Debug, Default)]
pub struct JobTable {
    inner: Mutex<TableInner>,
}

impl JobTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the slot for `task_id` and mark it `Running`.
    ///
    /// Returns `false` without any state change when another job is active.
    pub fn try_admit(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.current.is_some() {
            return false;
        }
        inner.current = Some(task_id.to_string());
        inner.statuses.insert(task_id.to_string(), JobStatus::Running);
        true
    }

    /// Record a terminal status and release the slot.
    ///
    /// Only the first terminal transition for a task takes effect; a task
    /// that already reached a terminal state keeps it.
    pub fn finish(&self, task_id: &str, status: JobStatus) {
        debug_assert!(status.is_terminal());
        let mut inner = self.inner.lock();
        match inner.statuses.get_mut(task_id) {
            Some(current @ JobStatus::Running) => *current = status,
            _ => return,
        }
        if inner.current.as_deref() == Some(task_id) {
            inner.current = None;
        }
    }

    /// Status of a task, if the worker has ever seen it.
    pub fn status(&self, task_id: &str) -> Option<JobStatus> {
        self.inner.lock().statuses.get(task_id).copied()
    }

    /// The task currently holding the slot, if any.
    pub fn current(&self) -> Option<TaskId> {
        self.inner.lock().current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::new_task_id;

    #[test]
    fn test_single_slot() {
        let table = JobTable::new();
        let first = new_task_id();
        let second = new_task_id();

        assert!(table.try_admit(&first));
        assert!(!table.try_admit(&second));
        assert_eq!(table.status(&first), Some(JobStatus::Running));
        assert_eq!(table.status(&second), None);

        table.finish(&first, JobStatus::Completed);
        assert_eq!(table.current(), None);
        assert!(table.try_admit(&second));
    }

    #[test]
    fn test_admission_refused_until_terminal() {
        let table = JobTable::new();
        assert!(table.try_admit("a"));

        for _ in 0..3 {
            assert!(!table.try_admit("b"));
        }
        table.finish("a", JobStatus::ExecutionError);
        assert!(table.try_admit("b"));
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let table = JobTable::new();
        assert!(table.try_admit("a"));
        table.finish("a", JobStatus::Completed);
        table.finish("a", JobStatus::ExecutionError);
        assert_eq!(table.status("a"), Some(JobStatus::Completed));
    }

    #[test]
    fn test_history_survives_slot_release() {
        let table = JobTable::new();
        assert!(table.try_admit("a"));
        table.finish("a", JobStatus::ConfigurationError);
        assert!(table.try_admit("b"));

        // Earlier tasks stay queryable for the worker's lifetime.
        assert_eq!(table.status("a"), Some(JobStatus::ConfigurationError));
        assert_eq!(table.status("b"), Some(JobStatus::Running));
    }

    #[test]
    fn test_finish_unknown_task_is_noop() {
        let table = JobTable::new();
        table.finish("ghost", JobStatus::Completed);
        assert_eq!(table.status("ghost"), None);
        assert_eq!(table.current(), None);
    }
}
