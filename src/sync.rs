//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections plus the two inter-task primitives the
//! kernel ships: a binary [`Semaphore`] and a bounded byte-array [`Queue`].
//! Both block by parking the calling task (`Blocked` state + yield) rather
//! than spinning, and both are no-ops — not panics — when misused from
//! interrupt context, mirroring the C original these are ported from.

use crate::config::{MAX_QUEUE_BYTES, NO_TIMEOUT};
use crate::error::OsError;
use crate::kernel;
use crate::task::{TaskId, TaskState};

/// Execute a closure within a critical section (interrupts disabled for
/// its duration). Prefer this over manual `enter_critical`/`exit_critical`
/// pairs for short, single-expression sections — it cannot leak an
/// unbalanced critical section on an early return.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|| {
///     // access shared state
/// });
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    kernel::enter_critical();
    let result = f();
    kernel::exit_critical();
    result
}

// ---------------------------------------------------------------------------
// Binary semaphore
// ---------------------------------------------------------------------------

/// A binary semaphore: at most one "give" is outstanding at a time, and at
/// most one task may be parked waiting on it. A second waiter overwrites
/// `associated_task` rather than queuing — callers that need fan-in should
/// pair one semaphore per waiter, matching the single-waiter design this
/// is ported from.
pub struct Semaphore {
    taken: bool,
    associated_task: Option<TaskId>,
}

impl Semaphore {
    /// A semaphore starts taken: the first `take` always blocks until a
    /// matching `give`.
    pub const fn new() -> Self {
        Self { taken: true, associated_task: None }
    }

    /// Block the calling task until the semaphore is given, or until
    /// `ticks_to_wait` elapse. Pass [`NO_TIMEOUT`] to wait forever.
    /// Returns `false` only on timeout; a non-RUNNING caller (e.g. an ISR)
    /// also returns `false` without blocking.
    pub fn take(&mut self, ticks_to_wait: u32) -> bool {
        let current = kernel::current_task_id();
        if kernel::task_state(current) != TaskState::Running {
            return false;
        }

        if ticks_to_wait != NO_TIMEOUT {
            kernel::set_task_remaining_ticks(current, ticks_to_wait);
        }

        enum Outcome {
            Acquired,
            TimedOut,
            Block,
        }

        loop {
            let outcome = critical_section(|| {
                if self.taken {
                    debug_assert!(
                        self.associated_task.is_none() || self.associated_task == Some(current),
                        "semaphore already has a waiter; single-waiter invariant violated"
                    );
                    self.associated_task = Some(current);

                    if ticks_to_wait != NO_TIMEOUT && kernel::task_remaining_ticks(current) == 0 {
                        Outcome::TimedOut
                    } else {
                        kernel::set_task_state(current, TaskState::Blocked);
                        Outcome::Block
                    }
                } else {
                    self.taken = true;
                    kernel::set_task_remaining_ticks(current, 0);
                    Outcome::Acquired
                }
            });

            match outcome {
                Outcome::Acquired => return true,
                Outcome::TimedOut => return false,
                Outcome::Block => kernel::yield_now(),
            }
        }
    }

    /// Release the semaphore. A no-op unless the caller is RUNNING, the
    /// semaphore is currently taken, and a task is parked on it. Called
    /// from an ISR, this sets the kernel's `schedule_from_isr` flag rather
    /// than yielding directly — `isr::isr_dispatch` acts on it once the
    /// handler returns.
    pub fn give(&mut self) {
        let current = kernel::current_task_id();
        if kernel::task_state(current) != TaskState::Running {
            return;
        }

        let in_isr = kernel::get_global_state() == kernel::GlobalMode::InsideIsr;

        critical_section(|| {
            if self.taken {
                if let Some(waiter) = self.associated_task.take() {
                    self.taken = false;
                    kernel::set_task_state(waiter, TaskState::Ready);
                    kernel::set_task_remaining_ticks(waiter, 0);
                    if in_isr {
                        kernel::set_schedule_from_isr();
                    }
                } else {
                    log::debug!("semaphore give with no recorded waiter, dropped");
                }
            }
        });
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Bounded queue
// ---------------------------------------------------------------------------

/// A bounded, byte-addressed circular buffer for fixed-size elements.
/// Like [`Semaphore`], only one task may be parked on it at a time — here
/// that single slot is shared between senders waiting for space and
/// receivers waiting for data, since the two conditions are mutually
/// exclusive (a queue cannot be both full and empty at once, except at
/// zero capacity, which `init` rejects).
pub struct Queue {
    data: [u8; MAX_QUEUE_BYTES],
    element_size: usize,
    front: usize,
    back: usize,
    current_elements: usize,
    associated_task: Option<TaskId>,
}

impl Queue {
    /// An uninitialized queue. Call [`Queue::init`] before use.
    pub const fn empty() -> Self {
        Self {
            data: [0; MAX_QUEUE_BYTES],
            element_size: 0,
            front: 0,
            back: 0,
            current_elements: 0,
            associated_task: None,
        }
    }

    /// Configure the element size, in bytes. Must be called once, before
    /// any `send`/`receive`. Returns [`OsError::InvalidElementSize`] if
    /// `element_size` is zero or larger than `MAX_QUEUE_BYTES`.
    pub fn init(&mut self, element_size: usize) -> Result<(), OsError> {
        if element_size == 0 || element_size > MAX_QUEUE_BYTES {
            return Err(OsError::InvalidElementSize);
        }
        self.element_size = element_size;
        self.associated_task = None;
        self.front = 0;
        self.back = 0;
        self.current_elements = 0;
        Ok(())
    }

    fn capacity(&self) -> usize {
        MAX_QUEUE_BYTES / self.element_size
    }

    /// Copy `element` (exactly `element_size` bytes) into the queue,
    /// blocking the caller while the queue is full. A no-op (`false`) for a
    /// non-RUNNING caller. Called from an ISR while the queue is full,
    /// returns `false` immediately instead of blocking — an ISR cannot
    /// park and wait for a task to drain space — and, like
    /// [`Semaphore::give`], sets `schedule_from_isr` if it wakes a
    /// receiver.
    pub fn send(&mut self, element: &[u8]) -> bool {
        debug_assert_eq!(element.len(), self.element_size);
        let current = kernel::current_task_id();
        if kernel::task_state(current) != TaskState::Running {
            return false;
        }

        let in_isr = kernel::get_global_state() == kernel::GlobalMode::InsideIsr;

        critical_section(|| {
            if self.current_elements == 0 {
                if let Some(waiter) = self.associated_task.take() {
                    if kernel::task_state(waiter) == TaskState::Blocked {
                        kernel::set_task_state(waiter, TaskState::Ready);
                        if in_isr {
                            kernel::set_schedule_from_isr();
                        }
                    }
                }
            }
        });

        if in_isr {
            if !critical_section(|| self.current_elements < self.capacity()) {
                return false;
            }
        } else {
            loop {
                let has_space = critical_section(|| self.current_elements < self.capacity());
                if has_space {
                    break;
                }
                kernel::set_task_state(current, TaskState::Blocked);
                critical_section(|| self.associated_task = Some(current));
                kernel::yield_now();
            }
        }

        critical_section(|| {
            let offset = self.front * self.element_size;
            self.data[offset..offset + self.element_size].copy_from_slice(element);
            self.front = (self.front + 1) % self.capacity();
            self.associated_task = None;
            self.current_elements += 1;
        });
        true
    }

    /// Copy one element out of the queue into `out`, blocking the caller
    /// while the queue is empty. A no-op (`false`) for a non-RUNNING
    /// caller. Called from an ISR while the queue is empty, returns
    /// `false` immediately instead of blocking, and sets
    /// `schedule_from_isr` if it wakes a sender.
    pub fn receive(&mut self, out: &mut [u8]) -> bool {
        debug_assert_eq!(out.len(), self.element_size);
        let current = kernel::current_task_id();
        if kernel::task_state(current) != TaskState::Running {
            return false;
        }

        let in_isr = kernel::get_global_state() == kernel::GlobalMode::InsideIsr;

        critical_section(|| {
            if self.current_elements == self.capacity() {
                if let Some(waiter) = self.associated_task.take() {
                    if kernel::task_state(waiter) == TaskState::Blocked {
                        kernel::set_task_state(waiter, TaskState::Ready);
                        if in_isr {
                            kernel::set_schedule_from_isr();
                        }
                    }
                }
            }
        });

        if in_isr {
            if !critical_section(|| self.current_elements > 0) {
                return false;
            }
        } else {
            loop {
                let has_data = critical_section(|| self.current_elements > 0);
                if has_data {
                    break;
                }
                kernel::set_task_state(current, TaskState::Blocked);
                critical_section(|| self.associated_task = Some(current));
                kernel::yield_now();
            }
        }

        critical_section(|| {
            let offset = self.back * self.element_size;
            out.copy_from_slice(&self.data[offset..offset + self.element_size]);
            self.back = (self.back + 1) % self.capacity();
            self.associated_task = None;
            self.current_elements -= 1;
        });
        true
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::GlobalMode;

    fn lock() -> std::sync::MutexGuard<'static, ()> {
        crate::kernel::TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn queue_init_rejects_zero_and_oversized_element() {
        let mut q = Queue::empty();
        assert_eq!(q.init(0), Err(OsError::InvalidElementSize));
        assert_eq!(q.init(MAX_QUEUE_BYTES + 1), Err(OsError::InvalidElementSize));
        assert!(q.init(4).is_ok());
    }

    #[test]
    fn sem_take_returns_true_immediately_when_already_given() {
        let _guard = lock();
        crate::kernel::test_bootstrap_running_task(1);
        let mut sem = Semaphore::new();
        sem.taken = false;
        assert!(sem.take(NO_TIMEOUT));
    }

    #[test]
    fn sem_take_returns_false_for_non_running_caller() {
        let _guard = lock();
        let task = crate::kernel::test_bootstrap_running_task(1);
        crate::kernel::set_task_state(task, TaskState::Blocked);
        let mut sem = Semaphore::new();
        assert!(!sem.take(NO_TIMEOUT));
    }

    extern "C" fn second_task_entry(_param: *mut u8) -> ! {
        loop {}
    }

    #[test]
    fn sem_give_wakes_recorded_waiter() {
        let _guard = lock();
        let giver = crate::kernel::test_bootstrap_running_task(1);
        let waiter =
            crate::kernel::init_task(second_task_entry, core::ptr::null_mut(), 2).unwrap();
        crate::kernel::set_task_state(waiter, TaskState::Blocked);

        let mut sem = Semaphore::new();
        sem.associated_task = Some(waiter);

        sem.give();

        assert!(!sem.taken);
        assert_eq!(crate::kernel::task_state(waiter), TaskState::Ready);
        let _ = giver;
    }

    #[test]
    fn sem_give_with_no_waiter_is_a_harmless_lost_wakeup() {
        let _guard = lock();
        crate::kernel::test_bootstrap_running_task(1);
        let mut sem = Semaphore::new();
        assert!(sem.taken);
        sem.give();
        assert!(sem.taken, "give with no recorded waiter must not clear `taken`");
    }

    #[test]
    fn sem_give_from_isr_sets_schedule_from_isr() {
        let _guard = lock();
        let waiter = crate::kernel::test_bootstrap_running_task(1);
        crate::kernel::set_task_state(waiter, TaskState::Blocked);
        crate::kernel::test_set_global_mode(GlobalMode::InsideIsr);

        let mut sem = Semaphore::new();
        sem.associated_task = Some(waiter);
        sem.give();

        assert!(crate::kernel::take_schedule_from_isr());
    }

    #[test]
    fn queue_send_then_receive_round_trip() {
        let _guard = lock();
        crate::kernel::test_bootstrap_running_task(1);
        let mut q = Queue::empty();
        q.init(4).unwrap();

        assert!(q.send(&42u32.to_le_bytes()));

        let mut out = [0u8; 4];
        assert!(q.receive(&mut out));
        assert_eq!(u32::from_le_bytes(out), 42);
    }

    #[test]
    fn queue_send_from_isr_returns_false_when_full() {
        let _guard = lock();
        crate::kernel::test_bootstrap_running_task(1);
        let mut q = Queue::empty();
        q.init(4).unwrap();

        let capacity = MAX_QUEUE_BYTES / 4;
        for i in 0..capacity {
            assert!(q.send(&(i as u32).to_le_bytes()));
        }

        crate::kernel::test_set_global_mode(GlobalMode::InsideIsr);
        assert!(!q.send(&0u32.to_le_bytes()));
    }

    #[test]
    fn queue_receive_from_isr_returns_false_when_empty() {
        let _guard = lock();
        crate::kernel::test_bootstrap_running_task(1);
        let mut q = Queue::empty();
        q.init(4).unwrap();

        crate::kernel::test_set_global_mode(GlobalMode::InsideIsr);
        let mut out = [0u8; 4];
        assert!(!q.receive(&mut out));
    }
}
