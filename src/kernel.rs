//! # Kernel
//!
//! Process-wide kernel state and the public task/control/delay API.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()            ← lower PendSV priority, build idle task
//!         ├─► kernel::init_task() × N   ← register application tasks
//!         └─► kernel::start()           ← configure SysTick, launch first task
//! ```
//!
//! All shared state lives in a single [`OsController`], mirroring the donor
//! repo's `static mut SCHEDULER` + raw-pointer-for-ISR-access pattern: one
//! instance, set up once in `init()`, accessed only from task context inside
//! a critical section or from already-serialized exception context.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::cortex_m4;
use crate::config::{NO_TIMEOUT, OS_MAX_PRIORITY};
use crate::error::OsError;
use crate::scheduler::{Scheduler, IDLE_TASK_ID};
use crate::sync::critical_section;
use crate::task::{TaskEntry, TaskId, TaskState};

// ---------------------------------------------------------------------------
// Global kernel mode
// ---------------------------------------------------------------------------

/// Phase of the kernel's own lifecycle, distinct from any one task's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalMode {
    /// Before the first context switch has completed.
    Reset,
    /// Normal preemptive multitasking.
    Normal,
    /// Currently running inside `isr::isr_dispatch`.
    InsideIsr,
}

// ---------------------------------------------------------------------------
// OS controller
// ---------------------------------------------------------------------------

/// Process-wide kernel singleton.
pub struct OsController {
    pub scheduler: Scheduler,
    pub mode: GlobalMode,
    pub system_time: u64,
    critical_section_depth: i32,
    pub schedule_from_isr: bool,
    pub last_error: Option<OsError>,
}

impl OsController {
    pub const fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            mode: GlobalMode::Reset,
            system_time: 0,
            critical_section_depth: 0,
            schedule_from_isr: false,
            last_error: None,
        }
    }
}

/// The single kernel instance.
///
/// # Safety
/// Accessed only via [`CONTROLLER_PTR`], set once in `init()`. All access
/// is through `enter_critical`/`exit_critical` (task context) or from
/// interrupt context, which is already serialized by NVIC priority.
static mut CONTROLLER: OsController = OsController::new();

/// Raw pointer to the kernel instance, used by the arch layer (PendSV,
/// SysTick) which calls into the portable kernel from a naked/bare
/// exception handler.
#[no_mangle]
pub static mut CONTROLLER_PTR: *mut OsController = core::ptr::null_mut();

#[inline]
unsafe fn controller() -> &'static mut OsController {
    &mut *CONTROLLER_PTR
}

// ---------------------------------------------------------------------------
// Weak hooks
// ---------------------------------------------------------------------------
//
// The original design calls these "weak" symbols a board-support crate may
// override at link time. Stable Rust has no portable equivalent of
// `__attribute__((weak))`, so this crate exposes the same seam as a
// runtime-registered function pointer with a default implementation,
// guarded the same way every other piece of shared kernel state is
// guarded: a critical section, not a `Mutex<RefCell<_>>`.

static ERROR_HOOK: AtomicUsize = AtomicUsize::new(default_error_hook as usize);
static TICK_HOOK: AtomicUsize = AtomicUsize::new(default_tick_hook as usize);
static IDLE_HOOK: AtomicUsize = AtomicUsize::new(default_idle_task as usize);

extern "C" fn default_error_hook(_caller: *const ()) {
    if let Some(err) = get_last_error() {
        log::error!("kernel error recorded: {err}");
    }
}

extern "C" fn default_tick_hook() {}

extern "C" fn default_idle_task(_param: *mut u8) -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Install a custom error hook, called whenever the kernel records an
/// [`OsError`] via `set_error`.
pub fn set_error_hook(hook: extern "C" fn(*const ())) {
    ERROR_HOOK.store(hook as usize, Ordering::SeqCst);
}

/// Install a custom tick hook, called once per SysTick after the scheduler
/// has run. Must be fast: it executes at interrupt priority every
/// `TICK_HZ`th of a second.
pub fn set_tick_hook(hook: extern "C" fn()) {
    TICK_HOOK.store(hook as usize, Ordering::SeqCst);
}

/// Install a custom idle task body, invoked whenever the scheduler falls
/// back to the idle task. Must never return.
pub fn set_idle_task(hook: extern "C" fn(*mut u8) -> !) {
    IDLE_HOOK.store(hook as usize, Ordering::SeqCst);
}

/// Called whenever a task function returns, which it must never do. Logged
/// once, then spins forever.
pub extern "C" fn os_return_hook() -> ! {
    log::error!("a task function returned; tasks must never return");
    loop {}
}

fn set_error(error: OsError) {
    unsafe {
        controller().last_error = Some(error);
    }
    let hook: extern "C" fn(*const ()) =
        unsafe { core::mem::transmute(ERROR_HOOK.load(Ordering::SeqCst)) };
    hook(core::ptr::null());
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel. Must be called exactly once, before any
/// `init_task` call, from the main thread.
pub fn init() {
    unsafe {
        CONTROLLER = OsController::new();
        CONTROLLER_PTR = &mut CONTROLLER as *mut OsController;

        let idle_entry: TaskEntry =
            core::mem::transmute(IDLE_HOOK.load(Ordering::SeqCst) as *const ());
        controller().scheduler.init_idle_task(idle_entry, os_return_hook);
    }
    cortex_m4::set_context_switch_priority_lowest();
    log::debug!("kernel initialized, idle task ready");
}

/// Register a task. Must be called before [`start`]. `param` is an opaque
/// pointer handed back to `entry` as its argument (see `task::TaskEntry`).
pub fn init_task(entry: TaskEntry, param: *mut u8, priority: u8) -> Result<TaskId, OsError> {
    critical_section(|| unsafe {
        let result = controller().scheduler.create_task(entry, param, priority, os_return_hook);
        if let Err(err) = result {
            set_error(err);
            log::warn!("init_task rejected: {err}");
        }
        result
    })
}

/// Sort the task table by priority, preparing for the first scheduling
/// decision. Called once, from [`start`], after every task has been
/// registered.
fn finish_setup() {
    unsafe {
        let ctl = controller();
        ctl.scheduler.sort_by_priority();
        log::debug!(
            "{} task(s) registered, priority-sorted",
            ctl.scheduler.number_of_tasks
        );
    }
}

/// The currently running task's id (or the idle task's sentinel id).
pub fn get_current_task() -> TaskId {
    unsafe { controller().scheduler.current }
}

/// Ticks elapsed since `init()`.
pub fn get_current_time() -> u64 {
    unsafe { controller().system_time }
}

/// The kernel's own lifecycle phase.
pub fn get_global_state() -> GlobalMode {
    unsafe { controller().mode }
}

/// The most recently recorded kernel error, if any.
pub fn get_last_error() -> Option<OsError> {
    unsafe { controller().last_error }
}

/// Suspend the calling task for `ticks` system ticks. A no-op if `ticks ==
/// 0` or the caller is not RUNNING. Returns [`OsError::DelayFromIsr`] if
/// called from interrupt context.
pub fn delay(ticks: u32) -> Result<(), OsError> {
    if get_global_state() == GlobalMode::InsideIsr {
        set_error(OsError::DelayFromIsr);
        return Err(OsError::DelayFromIsr);
    }
    if ticks == NO_TIMEOUT {
        return Ok(());
    }

    let blocked = critical_section(|| unsafe {
        let ctl = controller();
        let current = ctl.scheduler.current;
        let task = ctl.scheduler.task_mut(current);
        if task.state == TaskState::Running {
            task.state = TaskState::Blocked;
            task.remaining_blocked_ticks = ticks;
            true
        } else {
            false
        }
    });

    if blocked {
        yield_now();
    }
    Ok(())
}

/// Force a scheduling decision and, if it changes which task should run,
/// pend the context-switch exception.
pub fn yield_now() {
    let switched = unsafe { controller().scheduler.schedule() };
    if switched {
        cortex_m4::trigger_context_switch();
    }
}

/// Disable interrupts and increment the critical-section nesting depth.
pub fn enter_critical() {
    cortex_m4::disable_interrupts();
    unsafe {
        controller().critical_section_depth += 1;
    }
}

/// Decrement the critical-section nesting depth; re-enable interrupts once
/// it reaches zero. Mismatched `enter`/`exit` pairs are undefined, as in
/// the design this is ported from.
pub fn exit_critical() {
    unsafe {
        let ctl = controller();
        ctl.critical_section_depth -= 1;
        if ctl.critical_section_depth <= 0 {
            cortex_m4::enable_interrupts();
        }
    }
}

/// Called once per SysTick. Advances system time, promotes expired
/// waiters, runs the scheduler, and pends a context switch if warranted.
/// Must not call any other blocking kernel API.
pub fn tick() {
    unsafe {
        let ctl = controller();
        ctl.system_time += 1;
        ctl.scheduler.advance_ticks();

        let switched = ctl.scheduler.schedule();
        if switched {
            cortex_m4::trigger_context_switch();
        }
    }

    let hook: extern "C" fn() = unsafe { core::mem::transmute(TICK_HOOK.load(Ordering::SeqCst)) };
    hook();
}

// ---------------------------------------------------------------------------
// Portable half of the context-switch protocol — the arch layer's naked
// PendSV stub calls these two functions around its register save/restore.
// ---------------------------------------------------------------------------

/// Save the outgoing task's stack pointer. A no-op in `Reset` mode, since
/// that (never-scheduled) context is never restored.
///
/// # Safety
/// Must only be called from the PendSV handler.
pub unsafe fn save_current_context(sp: *mut u32) {
    let ctl = controller();
    if ctl.mode != GlobalMode::Reset {
        ctl.scheduler.task_mut(ctl.scheduler.current).stack_pointer = sp;
    }
}

/// Select the next task's stack pointer, completing the context-switch
/// protocol: the first call resumes `current` directly (set by
/// `select_first_task`); later calls move `current` to `next`, demoting a
/// RUNNING task back to READY (a BLOCKED one is left alone).
///
/// # Safety
/// Must only be called from the PendSV handler.
pub unsafe fn do_context_switch() -> *mut u32 {
    let ctl = controller();

    if ctl.mode == GlobalMode::Reset {
        let current = ctl.scheduler.current;
        ctl.scheduler.task_mut(current).state = TaskState::Running;
        ctl.mode = GlobalMode::Normal;
        log::trace!("first context switch -> task {current}");
        return ctl.scheduler.task(current).stack_pointer;
    }

    let current = ctl.scheduler.current;
    if ctl.scheduler.task(current).state == TaskState::Running {
        ctl.scheduler.task_mut(current).state = TaskState::Ready;
    }

    let next = ctl.scheduler.next;
    if next != current {
        log::trace!("context switch {current} -> {next}");
    }
    ctl.scheduler.current = next;
    ctl.scheduler.task_mut(next).state = TaskState::Running;
    ctl.scheduler.task(next).stack_pointer
}

// ---------------------------------------------------------------------------
// Accessors used by `isr` and `sync` to keep those modules free of direct
// `CONTROLLER` access.
// ---------------------------------------------------------------------------

pub(crate) fn enter_isr_mode() -> GlobalMode {
    unsafe {
        let ctl = controller();
        let previous = ctl.mode;
        ctl.mode = GlobalMode::InsideIsr;
        previous
    }
}

pub(crate) fn leave_isr_mode(previous: GlobalMode) {
    unsafe {
        controller().mode = previous;
    }
}

pub(crate) fn set_schedule_from_isr() {
    unsafe {
        controller().schedule_from_isr = true;
    }
}

pub(crate) fn take_schedule_from_isr() -> bool {
    unsafe {
        let ctl = controller();
        let flag = ctl.schedule_from_isr;
        ctl.schedule_from_isr = false;
        flag
    }
}

pub(crate) fn current_task_id() -> TaskId {
    unsafe { controller().scheduler.current }
}

pub(crate) fn task_state(id: TaskId) -> TaskState {
    unsafe { controller().scheduler.task(id).state }
}

pub(crate) fn set_task_state(id: TaskId, state: TaskState) {
    unsafe {
        controller().scheduler.task_mut(id).state = state;
    }
}

pub(crate) fn set_task_remaining_ticks(id: TaskId, ticks: u32) {
    unsafe {
        controller().scheduler.task_mut(id).remaining_blocked_ticks = ticks;
    }
}

pub(crate) fn task_remaining_ticks(id: TaskId) -> u32 {
    unsafe { controller().scheduler.task(id).remaining_blocked_ticks }
}

/// Start the scheduler. **Does not return.** Sorts the task table,
/// configures SysTick, and launches the first task via the architecture
/// layer's bare exception-return sequence.
///
/// # Safety
/// `init()` must have run. An empty task table falls back to running the
/// idle task forever, which is valid but likely not what was intended.
pub fn start() -> ! {
    finish_setup();
    unsafe {
        controller().scheduler.select_first_task();
    }
    cortex_m4::configure_systick();

    let first_sp = unsafe {
        let ctl = controller();
        ctl.scheduler.task(ctl.scheduler.current).stack_pointer
    };

    unsafe { cortex_m4::start_first_task(first_sp) }
}

#[allow(dead_code)]
const _NO_TIMEOUT_IS_ZERO: () = assert!(NO_TIMEOUT == 0);
#[allow(dead_code)]
const _IDLE_IS_OUTSIDE_USER_RANGE: () = assert!(IDLE_TASK_ID != 0);
#[allow(dead_code)]
const _MAX_PRIORITY_IS_ZERO: () = assert!(OS_MAX_PRIORITY == 0);

// ---------------------------------------------------------------------------
// Test-only bootstrap
// ---------------------------------------------------------------------------
//
// `CONTROLLER` is a single process-wide singleton, so every test that
// touches it (directly, or via `sync`/`isr`) must run under `TEST_LOCK` to
// avoid racing the other threads `cargo test` runs concurrently.

#[cfg(test)]
pub(crate) static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
extern "C" fn test_task_entry(_param: *mut u8) -> ! {
    loop {}
}

/// Initialize the kernel, register one task at `priority`, and place it
/// directly into the RUNNING/current state `do_context_switch` would
/// normally reach only via a real PendSV. Lets `sync`/`isr` tests exercise
/// the non-blocking paths of the public API without a hardware scheduler.
#[cfg(test)]
pub(crate) fn test_bootstrap_running_task(priority: u8) -> TaskId {
    init();
    let id = init_task(test_task_entry, core::ptr::null_mut(), priority)
        .expect("test task registration");
    unsafe {
        let ctl = controller();
        ctl.mode = GlobalMode::Normal;
        ctl.scheduler.current = id;
        ctl.scheduler.task_mut(id).state = TaskState::Running;
    }
    id
}

#[cfg(test)]
pub(crate) fn test_set_global_mode(mode: GlobalMode) {
    unsafe {
        controller().mode = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_controller_starts_in_reset_mode() {
        let ctl = OsController::new();
        assert_eq!(ctl.mode, GlobalMode::Reset);
        assert_eq!(ctl.system_time, 0);
        assert!(ctl.last_error.is_none());
    }
}
