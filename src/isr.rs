//! # Interrupt Dispatch
//!
//! User-registered interrupt handlers, routed through a single dispatch
//! trampoline so the kernel can bracket every ISR with a global-mode
//! transition and an implicit yield, rather than trusting every interrupt
//! vector to do that bookkeeping itself.
//!
//! ## Dispatch sequence
//!
//! 1. Record and replace the kernel's [`crate::kernel::GlobalMode`] with
//!    `InsideIsr`.
//! 2. Call the registered handler.
//! 3. Restore the previous mode and clear the pending bit.
//! 4. If the handler asked for a reschedule (via
//!    [`schedule_from_isr`]), yield immediately — the interrupt may have
//!    unblocked a higher-priority task and that task should run before
//!    whatever was interrupted resumes.

use crate::config::NUM_IRQ;
use crate::kernel;

/// A user interrupt handler. Takes no argument and returns nothing —
/// state exchange with tasks happens through shared primitives
/// ([`crate::sync::Semaphore`], [`crate::sync::Queue`]), not a return
/// value.
pub type IsrHandler = extern "C" fn();

static mut USER_ISR: [Option<IsrHandler>; NUM_IRQ] = [None; NUM_IRQ];

const NVIC_ISER_BASE: usize = 0xE000_E100;
const NVIC_ICER_BASE: usize = 0xE000_E180;
const NVIC_ICPR_BASE: usize = 0xE000_E280;

#[cfg(not(test))]
fn nvic_write(base: usize, irq: usize) {
    let reg = (base + 4 * (irq / 32)) as *mut u32;
    unsafe {
        core::ptr::write_volatile(reg, 1 << (irq % 32));
    }
}

// Host unit tests exercise the registration table only; there is no NVIC
// to program when running off-target.
#[cfg(test)]
fn nvic_write(_base: usize, _irq: usize) {}

/// Register `handler` for `irq` and unmask it at the NVIC. Fails if a
/// handler is already registered for that line.
///
/// # Panics
/// Panics if `irq >= NUM_IRQ` — this indicates a programming error
/// (an out-of-range vector number), not a recoverable runtime condition.
pub fn register_isr(irq: usize, handler: IsrHandler) -> bool {
    assert!(irq < NUM_IRQ, "irq out of range");
    kernel::enter_critical();
    let registered = unsafe {
        if USER_ISR[irq].is_some() {
            false
        } else {
            USER_ISR[irq] = Some(handler);
            true
        }
    };
    kernel::exit_critical();

    if registered {
        nvic_write(NVIC_ICPR_BASE, irq);
        nvic_write(NVIC_ISER_BASE, irq);
        log::debug!("isr {irq} registered");
    } else {
        log::warn!("isr {irq} already registered, ignoring");
    }
    registered
}

/// Mask `irq` at the NVIC and remove its handler.
pub fn remove_isr(irq: usize) -> bool {
    assert!(irq < NUM_IRQ, "irq out of range");
    kernel::enter_critical();
    let removed = unsafe {
        if USER_ISR[irq].is_some() {
            USER_ISR[irq] = None;
            true
        } else {
            false
        }
    };
    kernel::exit_critical();

    if removed {
        nvic_write(NVIC_ICPR_BASE, irq);
        nvic_write(NVIC_ICER_BASE, irq);
        log::debug!("isr {irq} removed");
    } else {
        log::warn!("isr {irq} not registered, ignoring");
    }
    removed
}

/// Every interrupt vector routes here instead of calling its user handler
/// directly.
///
/// # Safety
/// Must only be called from actual interrupt context, with `irq` the
/// currently-active exception number minus 16 (the CMSIS convention), and
/// only for an `irq` that has a registered handler.
pub unsafe fn isr_dispatch(irq: usize) {
    let previous_mode = kernel::enter_isr_mode();

    if let Some(handler) = USER_ISR[irq] {
        handler();
    } else {
        log::error!("isr {irq} fired with no handler registered");
    }

    kernel::leave_isr_mode(previous_mode);
    nvic_write(NVIC_ICPR_BASE, irq);

    if kernel::take_schedule_from_isr() {
        kernel::yield_now();
    }
}

/// Ask the kernel to perform a reschedule as soon as the currently
/// executing ISR returns. Call this from inside a handler after giving a
/// semaphore or pushing to a queue a task may be waiting on.
pub fn schedule_from_isr() {
    kernel::set_schedule_from_isr();
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn noop() {}

    #[test]
    fn second_registration_on_same_line_is_rejected() {
        // `register_isr`/`remove_isr` go through `kernel::enter_critical`,
        // which dereferences the one process-wide controller — it must be
        // initialized, and every test touching it serialized, same as `sync`.
        let _guard = kernel::TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        kernel::init();

        let irq = NUM_IRQ - 1;
        assert!(register_isr(irq, noop));
        assert!(!register_isr(irq, noop));
        assert!(remove_isr(irq));
        assert!(register_isr(irq, noop));
        remove_isr(irq);
    }
}
