//! # Scheduler
//!
//! Fixed-priority, round-robin-within-priority scheduler. Owns the task
//! table and the built-in idle task; makes no I/O and no logging decisions
//! of its own beyond what [`crate::kernel`] asks it to record.
//!
//! ## Algorithm
//!
//! The task table is sorted ascending by priority once, at [`Scheduler::sort_by_priority`]
//! (called from `kernel::init`), so tasks of equal priority form a contiguous
//! run. `schedule()` walks priorities from `OS_MAX_PRIORITY` (0) downward;
//! within a run it resumes from a per-priority cursor so repeated calls visit
//! every ready task at that priority before repeating one (round-robin). A
//! priority whose entire run is BLOCKED is skipped. If every task is
//! BLOCKED, the idle task is selected.

use crate::config::{OS_IDLE_PRIORITY, OS_MAX_PRIORITY, OS_MAX_TASK, OS_N_PRIORITY};
use crate::error::OsError;
use crate::task::{TaskControlBlock, TaskEntry, TaskId, TaskState};

/// Sentinel `TaskId` meaning "the idle task", which lives outside the main
/// task table (mirroring the donor source's separate `idle_task_instance`).
pub const IDLE_TASK_ID: TaskId = TaskId::MAX;

/// Holds the task table, the idle task, and the round-robin cursors. A
/// single instance of this lives inside the kernel-wide controller
/// (`kernel::OsController`); there is exactly one per system.
pub struct Scheduler {
    /// User tasks, compacted `0..number_of_tasks`, sorted ascending by
    /// priority after `sort_by_priority` runs.
    pub tasks: [TaskControlBlock; OS_MAX_TASK],
    /// The always-present, lowest-priority fallback task.
    pub idle_task: TaskControlBlock,
    /// Number of populated entries in `tasks`.
    pub number_of_tasks: usize,
    /// Count of tasks at each priority level, indexed by priority.
    pub tasks_per_priority: [u8; OS_N_PRIORITY],
    /// Id of the task currently RUNNING (or `IDLE_TASK_ID`).
    pub current: TaskId,
    /// Id of the task the last `schedule()` call selected.
    pub next: TaskId,
    /// Per-priority round-robin cursor. Implementation aid only — never
    /// exposed as part of the data model.
    cursor: [usize; OS_N_PRIORITY],
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; OS_MAX_TASK],
            idle_task: TaskControlBlock::empty(),
            number_of_tasks: 0,
            tasks_per_priority: [0; OS_N_PRIORITY],
            current: IDLE_TASK_ID,
            next: IDLE_TASK_ID,
            cursor: [0; OS_N_PRIORITY],
        }
    }

    /// Register a new task. Must only be called before the kernel starts.
    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        param: *mut u8,
        priority: u8,
        return_hook: extern "C" fn() -> !,
    ) -> Result<TaskId, OsError> {
        if priority > crate::config::OS_MIN_PRIORITY {
            return Err(OsError::MaxPriority);
        }
        if self.number_of_tasks >= OS_MAX_TASK {
            return Err(OsError::MaxTask);
        }

        let id = self.number_of_tasks;
        self.tasks[id].init_stack(id, entry, param, priority, return_hook);
        self.tasks_per_priority[priority as usize] += 1;
        self.number_of_tasks += 1;
        Ok(id)
    }

    /// Initialize the idle task's stack frame. Called once from `kernel::init`.
    pub fn init_idle_task(&mut self, entry: TaskEntry, return_hook: extern "C" fn() -> !) {
        self.idle_task
            .init_stack(IDLE_TASK_ID, entry, core::ptr::null_mut(), OS_IDLE_PRIORITY, return_hook);
    }

    /// Stable sort of the task table by ascending priority. Bubble sort is
    /// intentional: task counts are tiny (`OS_MAX_TASK`), and stability is
    /// what makes round-robin order deterministic for testing.
    pub fn sort_by_priority(&mut self) {
        let n = self.number_of_tasks;
        for i in 0..n {
            for j in 0..n.saturating_sub(i + 1) {
                if self.tasks[j].priority > self.tasks[j + 1].priority {
                    self.tasks.swap(j, j + 1);
                }
            }
        }
        // Ids were assigned in creation order; re-stamp them to match the
        // new array positions so `TaskId` stays "index into `tasks`".
        for i in 0..n {
            self.tasks[i].id = i;
        }
        self.cursor = [0; OS_N_PRIORITY];
    }

    /// Borrow the TCB for `id`, dispatching to the idle task for the
    /// sentinel id.
    pub fn task_mut(&mut self, id: TaskId) -> &mut TaskControlBlock {
        if id == IDLE_TASK_ID {
            &mut self.idle_task
        } else {
            &mut self.tasks[id]
        }
    }

    pub fn task(&self, id: TaskId) -> &TaskControlBlock {
        if id == IDLE_TASK_ID {
            &self.idle_task
        } else {
            &self.tasks[id]
        }
    }

    /// Pick the next task to run into `self.next`. Returns `true` if the
    /// selection differs from `self.current` (i.e. a context switch is
    /// warranted).
    pub fn schedule(&mut self) -> bool {
        let mut total_iterated = 0usize;
        let mut index_offset = 0usize;
        let mut priority = OS_MAX_PRIORITY as usize;
        let mut found = false;

        while total_iterated < self.number_of_tasks {
            let run_len = self.tasks_per_priority[priority] as usize;
            let mut scanned_in_run = 0usize;

            while scanned_in_run < run_len {
                let real_index = index_offset + self.cursor[priority];
                self.cursor[priority] = (self.cursor[priority] + 1) % run_len;

                if self.tasks[real_index].is_runnable() {
                    self.next = real_index;
                    found = true;
                    break;
                }
                scanned_in_run += 1;
            }

            if found {
                break;
            }

            index_offset += run_len;
            total_iterated += run_len;
            priority += 1;
        }

        if !found {
            self.next = IDLE_TASK_ID;
        }

        self.next != self.current
    }

    /// First-call special case (`GlobalMode::Reset`): select the
    /// highest-priority task directly, without consulting the cursor.
    pub fn select_first_task(&mut self) {
        self.current = if self.number_of_tasks > 0 {
            0
        } else {
            IDLE_TASK_ID
        };
        self.cursor = [0; OS_N_PRIORITY];
    }

    /// Advance `remaining_blocked_ticks` for every task, promoting expired
    /// waiters back to READY. Called once per tick from `kernel::tick`.
    pub fn advance_ticks(&mut self) {
        for i in 0..self.number_of_tasks {
            let task = &mut self.tasks[i];
            if task.remaining_blocked_ticks > 0 {
                task.remaining_blocked_ticks -= 1;
                if task.remaining_blocked_ticks == 0 && task.state == TaskState::Blocked {
                    task.state = TaskState::Ready;
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn entry_a(_p: *mut u8) -> ! {
        loop {}
    }
    extern "C" fn hook() -> ! {
        loop {}
    }

    fn make_scheduler(priorities: &[u8]) -> Scheduler {
        let mut s = Scheduler::new();
        for &p in priorities {
            s.create_task(entry_a, core::ptr::null_mut(), p, hook).unwrap();
        }
        s.sort_by_priority();
        s.select_first_task();
        s
    }

    #[test]
    fn rejects_priority_out_of_range() {
        let mut s = Scheduler::new();
        let err = s
            .create_task(entry_a, core::ptr::null_mut(), crate::config::OS_MIN_PRIORITY + 1, hook)
            .unwrap_err();
        assert_eq!(err, OsError::MaxPriority);
    }

    #[test]
    fn rejects_when_table_full() {
        let mut s = Scheduler::new();
        for _ in 0..OS_MAX_TASK {
            s.create_task(entry_a, core::ptr::null_mut(), 2, hook).unwrap();
        }
        let err = s.create_task(entry_a, core::ptr::null_mut(), 2, hook).unwrap_err();
        assert_eq!(err, OsError::MaxTask);
    }

    #[test]
    fn sorts_ascending_by_priority() {
        let s = make_scheduler(&[2, 0, 1, 0]);
        for i in 0..s.number_of_tasks - 1 {
            assert!(s.tasks[i].priority <= s.tasks[i + 1].priority);
        }
    }

    #[test]
    fn higher_priority_always_wins_over_lower() {
        let mut s = make_scheduler(&[1, 0]);
        // current = task 0 after select_first_task; both READY.
        s.schedule();
        assert_eq!(s.task(s.next).priority, 0);
    }

    #[test]
    fn round_robins_within_a_priority() {
        let mut s = make_scheduler(&[1, 1, 1]);
        let mut picks = alloc_free_vec();
        for _ in 0..3 {
            s.schedule();
            picks.push(s.next);
            s.current = s.next;
        }
        // three same-priority tasks wrap through all three ids
        assert!(picks.contains(&0));
        assert!(picks.contains(&1));
        assert!(picks.contains(&2));
    }

    #[test]
    fn skips_blocked_tasks_without_losing_cursor_turn() {
        let mut s = make_scheduler(&[1, 1]);
        s.tasks[0].state = TaskState::Blocked;
        s.schedule();
        assert_eq!(s.next, 1);
    }

    #[test]
    fn falls_back_to_idle_when_all_blocked() {
        let mut s = make_scheduler(&[1, 2]);
        for t in s.tasks.iter_mut().take(s.number_of_tasks) {
            t.state = TaskState::Blocked;
        }
        let switched = s.schedule();
        assert_eq!(s.next, IDLE_TASK_ID);
        assert!(switched);
    }

    #[test]
    fn advance_ticks_promotes_expired_waiters() {
        let mut s = make_scheduler(&[1]);
        s.tasks[0].state = TaskState::Blocked;
        s.tasks[0].remaining_blocked_ticks = 2;
        s.advance_ticks();
        assert_eq!(s.tasks[0].state, TaskState::Blocked);
        s.advance_ticks();
        assert_eq!(s.tasks[0].state, TaskState::Ready);
    }

    // A tiny no_std-friendly growable buffer for the round-robin test above,
    // avoiding a dependency on `alloc` for a handful of `TaskId`s.
    struct FixedVec {
        buf: [TaskId; 8],
        len: usize,
    }
    impl FixedVec {
        fn push(&mut self, v: TaskId) {
            self.buf[self.len] = v;
            self.len += 1;
        }
        fn contains(&self, v: &TaskId) -> bool {
            self.buf[..self.len].contains(v)
        }
    }
    fn alloc_free_vec() -> FixedVec {
        FixedVec { buf: [0; 8], len: 0 }
    }
}
