//! # Task Control Block & Stack Frame
//!
//! Defines the task model: the state machine each task moves through, and
//! the layout of the synthetic initial machine-register frame written onto
//! a task's stack so the first context switch onto it resumes execution as
//! if returning from an interrupt at its entry point.
//!
//! ## Stack Layout
//!
//! ```text
//! high address
//!   ┌─────────────┐ <- stack_top (STACK_SIZE bytes from base)
//!   │ xPSR        │  INIT_XPSR (Thumb bit set)
//!   │ PC          │  task entry point
//!   │ LR          │  os_return_hook (tasks must never return)
//!   │ R12         │  0
//!   │ R3          │  0
//!   │ R2          │  0
//!   │ R1          │  0
//!   │ R0          │  task parameter
//!   ├─────────────┤
//!   │ LR (prev)   │  EXEC_RETURN (thread mode, MSP, no FPU)
//!   │ R4..R11     │  0 (callee-saved)
//!   └─────────────┘ <- stack_pointer after init, what PendSV restores from
//! low address
//! ```

use crate::config::STACK_SIZE;

/// Unique small-integer task identifier; an index into the task table.
pub type TaskId = usize;

/// Task entry point: takes the opaque task parameter, never returns.
pub type TaskEntry = extern "C" fn(*mut u8) -> !;

// ---------------------------------------------------------------------------
// Stack frame register offsets
// ---------------------------------------------------------------------------
//
// Offsets are counted in words *down* from the top of the stack buffer,
// matching the register order the Cortex-M exception-return sequence
// expects to pop.

/// Hardware-stacked frame: xPSR, PC, LR, R12, R3, R2, R1, R0.
const STACK_FRAME_WORDS: usize = 8;
/// Full frame: the 8 hardware-stacked words, the 8 callee-saved registers
/// (R4-R11), and one word for the EXEC_RETURN value saved below them.
const FULL_STACKING_WORDS: usize = 17;

const XPSR: usize = 1;
const PC_REG: usize = 2;
const LR: usize = 3;
const R12: usize = 4;
const R3: usize = 5;
const R2: usize = 6;
const R1: usize = 7;
const R0: usize = 8;
const LR_PREV_VALUE: usize = 9;

/// xPSR.T = 1 — the processor must resume in Thumb state.
const INIT_XPSR: u32 = 1 << 24;
/// EXC_RETURN magic: return to thread mode, use MSP, no FPU context.
const EXEC_RETURN: u32 = 0xFFFF_FFF9;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///   READY --[scheduler picks]--> RUNNING --[preempted]--> READY
///                                   |
///                                   +--[delay / sem take / queue wait]--> BLOCKED
///                                                                            |
///                          BLOCKED --[tick expiry / sem give / queue op]-----+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable, waiting for the scheduler to pick it.
    Ready,
    /// Currently executing.
    Running,
    /// Waiting on a delay, a semaphore, or a queue.
    Blocked,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB). Storage is owned by the caller of
/// [`crate::kernel::init_task`] — typically a `static mut`, since the
/// kernel never allocates and tasks are never destroyed.
pub struct TaskControlBlock {
    /// Backing stack memory. The stack grows down from the top of this
    /// array; `stack_pointer` is only ever written by the kernel.
    pub stack: [u32; STACK_SIZE / 4],
    /// Current stack pointer, valid whenever the task is not RUNNING.
    /// Updated by the context-switch handler on every switch away from
    /// this task.
    pub stack_pointer: *mut u32,
    /// Entry point this task was created with.
    pub entry_point: Option<TaskEntry>,
    /// Small integer id, assigned in creation order by `init_task`.
    pub id: TaskId,
    /// Current execution state.
    pub state: TaskState,
    /// Static priority, `0..=OS_MIN_PRIORITY` (0 highest), or
    /// `OS_IDLE_PRIORITY` for the idle task.
    pub priority: u8,
    /// Ticks remaining before an expired delay/timeout promotes this task
    /// back to READY. Zero means "not waiting on a tick".
    pub remaining_blocked_ticks: u32,
}

// Safety: `stack_pointer` always addresses this task's own `stack` array.
// All mutation happens under the kernel's critical-section discipline or
// from already-serialized exception context.
unsafe impl Send for TaskControlBlock {}
unsafe impl Sync for TaskControlBlock {}

impl TaskControlBlock {
    /// Repeat-expression operand for building a fixed-size array of empty
    /// TCBs in a `const` context (array-repeat of a non-`Copy` type needs
    /// a named constant, not a bare function call).
    pub const EMPTY: Self = Self::empty();

    /// An unpopulated TCB suitable for a `static` array slot. Must be
    /// passed through [`TaskControlBlock::init_stack`] before the kernel
    /// ever schedules it.
    pub const fn empty() -> Self {
        Self {
            stack: [0u32; STACK_SIZE / 4],
            stack_pointer: core::ptr::null_mut(),
            entry_point: None,
            id: 0,
            state: TaskState::Ready,
            priority: 0,
            remaining_blocked_ticks: 0,
        }
    }

    /// Write the synthetic initial stack frame and bind the task's
    /// identity. After this call the task is READY and its
    /// `stack_pointer` can be handed to the context-switch handler.
    pub fn init_stack(
        &mut self,
        id: TaskId,
        entry: TaskEntry,
        param: *mut u8,
        priority: u8,
        return_hook: extern "C" fn() -> !,
    ) {
        let top = self.stack.len();

        self.stack[top - XPSR] = INIT_XPSR;
        self.stack[top - PC_REG] = entry as usize as u32;
        self.stack[top - LR] = return_hook as usize as u32;
        self.stack[top - R12] = 0;
        self.stack[top - R3] = 0;
        self.stack[top - R2] = 0;
        self.stack[top - R1] = 0;
        self.stack[top - R0] = param as u32;
        self.stack[top - LR_PREV_VALUE] = EXEC_RETURN;
        for r4_to_r11 in (top - FULL_STACKING_WORDS)..(top - LR_PREV_VALUE) {
            self.stack[r4_to_r11] = 0;
        }

        self.stack_pointer = &mut self.stack[top - FULL_STACKING_WORDS] as *mut u32;
        self.entry_point = Some(entry);
        self.id = id;
        self.state = TaskState::Ready;
        self.priority = priority;
        self.remaining_blocked_ticks = 0;
    }

    /// Whether this task is eligible to be picked by the scheduler.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state != TaskState::Blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn dummy_entry(_param: *mut u8) -> ! {
        loop {}
    }

    extern "C" fn dummy_return_hook() -> ! {
        loop {}
    }

    #[test]
    fn init_stack_places_entry_point_and_param() {
        let mut tcb = TaskControlBlock::empty();
        let param = 0x1234usize as *mut u8;
        tcb.init_stack(3, dummy_entry, param, 1, dummy_return_hook);

        assert_eq!(tcb.id, 3);
        assert_eq!(tcb.priority, 1);
        assert_eq!(tcb.state, TaskState::Ready);
        assert!(tcb.is_runnable());

        let top = tcb.stack.len();
        assert_eq!(tcb.stack[top - XPSR], INIT_XPSR);
        assert_eq!(tcb.stack[top - PC_REG], dummy_entry as usize as u32);
        assert_eq!(tcb.stack[top - LR], dummy_return_hook as usize as u32);
        assert_eq!(tcb.stack[top - R0], param as u32);
        assert_eq!(tcb.stack[top - LR_PREV_VALUE], EXEC_RETURN);

        let expected_sp = &tcb.stack[top - FULL_STACKING_WORDS] as *const u32 as *mut u32;
        assert_eq!(tcb.stack_pointer, expected_sp);
    }

    #[test]
    fn blocked_task_is_not_runnable() {
        let mut tcb = TaskControlBlock::empty();
        tcb.init_stack(0, dummy_entry, core::ptr::null_mut(), 0, dummy_return_hook);
        tcb.state = TaskState::Blocked;
        assert!(!tcb.is_runnable());
    }

    #[test]
    fn stack_frame_fits_in_stack_size() {
        assert!(STACK_FRAME_WORDS < FULL_STACKING_WORDS);
        assert!(FULL_STACKING_WORDS < STACK_SIZE / 4);
    }
}
