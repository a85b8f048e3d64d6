//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, SysTick timer configuration,
//! and interrupt management.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0-R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4-R11, which completes the full context save/restore.
//!
//! ## Interrupt Priorities
//!
//! PendSV runs at the lowest priority on the board, so a context switch
//! never preempts an in-progress ISR. SysTick sits one priority level
//! above PendSV (not equal to it): a tick that arrives while PendSV is
//! pending must still be able to run and update scheduler state (ticks,
//! timeouts) before the switch it requested takes effect.

use cortex_m::peripheral::syst::SystClkSource;
use core::arch::asm;

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick, at `TICK_HZ`.
/// Takes the peripheral by value since it is only ever configured once,
/// from `kernel::start`.
pub fn configure_systick() {
    let mut syst = unsafe { cortex_m::Peripherals::steal().SYST };
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Pend a context-switch exception. PendSV is the standard Cortex-M
/// mechanism for deferred context switching: it fires at the lowest
/// priority, so it only runs once no other exception handler is active.
#[cfg(not(test))]
#[inline]
pub fn trigger_context_switch() {
    // ICSR address: 0xE000_ED04, PENDSVSET = bit 28
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

// Host unit tests have no PendSV to pend; `kernel::yield_now` still runs
// its scheduling decision, it just never reaches real hardware.
#[cfg(test)]
#[inline]
pub fn trigger_context_switch() {}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV to the lowest interrupt priority and SysTick one priority
/// level above it, per the design note in the module doc comment.
#[cfg(not(test))]
pub fn set_context_switch_priority_lowest() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority, bits [31:24] = SysTick priority.
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        let val = (val & !(0xFFu32 << 16) & !(0xFFu32 << 24)) | (0xF0 << 24) | (0xFF << 16);
        core::ptr::write_volatile(shpr3, val);
    }
}

// Host unit tests never reach real NVIC/SCB registers — see `isr::nvic_write`.
#[cfg(test)]
pub fn set_context_switch_priority_lowest() {}

// ---------------------------------------------------------------------------
// Critical sections
// ---------------------------------------------------------------------------

/// Mask interrupts. Paired with [`enable_interrupts`] by
/// `kernel::enter_critical`/`exit_critical`'s nesting counter.
#[cfg(not(test))]
#[inline]
pub fn disable_interrupts() {
    cortex_m::interrupt::disable();
}

/// Unmask interrupts.
///
/// # Safety
/// Must only be called when the caller holds the outermost critical
/// section, i.e. when `kernel`'s nesting counter has reached zero.
#[cfg(not(test))]
#[inline]
pub fn enable_interrupts() {
    unsafe {
        cortex_m::interrupt::enable();
    }
}

// Host unit tests run single-threaded behind `kernel`'s own test mutex, not
// real masked interrupts.
#[cfg(test)]
#[inline]
pub fn disable_interrupts() {}
#[cfg(test)]
#[inline]
pub fn enable_interrupts() {}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Start the first task by switching to PSP and branching to Thread mode.
/// Called once, from `kernel::start`, and never returns.
///
/// # Safety
/// Must only be called once, with a valid stack pointer to a frame laid
/// out by [`crate::task::TaskControlBlock::init_stack`].
pub unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Set PSP to the task's stack pointer (skip SW-saved R4-R11).
        "adds r0, #32",
        "msr psp, r0",

        // Switch Thread mode to PSP (CONTROL.SPSEL = 1).
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Pop the hardware frame manually; this isn't a real exception return.
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR (discarded, task is noreturn)
        "pop {{r5}}",          // PC (task entry point)
        "pop {{r6}}",          // xPSR (discarded, processor sets it)

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — performs the actual context switch.
///
/// ## Sequence
/// 1. Save R4-R11 onto the current task's stack (PSP).
/// 2. Store the updated PSP into the current task's TCB.
/// 3. Ask the kernel to select the next task.
/// 4. Load the next task's PSP from its TCB.
/// 5. Restore R4-R11 from the new task's stack.
/// 6. Return from exception (hardware restores R0-R3, R12, LR, PC, xPSR).
///
/// # Safety
/// Naked function called directly by the NVIC; must follow the exact
/// Cortex-M4 exception entry/exit convention.
#[no_mangle]
#[naked]
pub unsafe extern "C" fn PendSV() {
    asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        "bl {save_context}",   // save_current_context(r0: *mut u32)
        "bl {do_schedule}",    // do_context_switch() -> new psp in r0

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        "ldr r0, =0xFFFFFFFD", // EXC_RETURN: thread mode, use PSP
        "bx r0",

        save_context = sym save_current_context,
        do_schedule = sym do_context_switch,
        options(noreturn)
    );
}

/// Save the outgoing task's stack pointer. Called from PendSV.
///
/// # Safety
/// Called from assembly context with interrupts effectively disabled
/// (PendSV runs at the lowest NVIC priority).
#[no_mangle]
unsafe extern "C" fn save_current_context(psp: *mut u32) {
    kernel::save_current_context(psp);
}

/// Perform the scheduling decision and return the new task's PSP. Called
/// from PendSV.
///
/// # Safety
/// Called from assembly context.
#[no_mangle]
unsafe extern "C" fn do_context_switch() -> *mut u32 {
    kernel::do_context_switch()
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler — the scheduler's tick entry point, fired at
/// `TICK_HZ`.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    kernel::tick();
}
