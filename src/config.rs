//! # Kernel Configuration
//!
//! Compile-time constants governing task capacity, priority levels, the
//! synchronization object sizes, and the system tick. All limits are fixed
//! at compile time — no dynamic allocation, no runtime config file.

/// Per-task stack size in bytes. Must be large enough for the deepest call
/// chain plus the hardware-stacked exception frame and the software-saved
/// callee-saved registers (see [`crate::task::STACK_FRAME_WORDS`]).
pub const STACK_SIZE: usize = 256;

/// Maximum number of tasks the system can manage (idle task included).
/// Bounds the static task table — each task consumes `STACK_SIZE` bytes
/// of RAM regardless of whether it is ever scheduled.
pub const OS_MAX_TASK: usize = 8;

/// Highest (numerically lowest) priority a task may request.
pub const OS_MAX_PRIORITY: u8 = 0;

/// Lowest (numerically highest) priority a user task may request.
pub const OS_MIN_PRIORITY: u8 = 3;

/// Number of distinct user priority levels: `[OS_MAX_PRIORITY..=OS_MIN_PRIORITY]`.
pub const OS_N_PRIORITY: usize = (OS_MIN_PRIORITY - OS_MAX_PRIORITY + 1) as usize;

/// Priority of the built-in idle task — strictly below every user priority.
pub const OS_IDLE_PRIORITY: u8 = OS_MIN_PRIORITY + 1;

/// Capacity, in bytes, of a bounded queue's backing buffer. Implementation
/// choice per board; 16 bytes holds four `u32` elements.
pub const MAX_QUEUE_BYTES: usize = 16;

/// Sentinel meaning "wait forever" when passed as a semaphore timeout.
pub const NO_TIMEOUT: u32 = 0;

/// Number of distinct interrupt lines the ISR dispatch table covers.
/// Chip-dependent; 53 matches the donor platform's NVIC vector count.
pub const NUM_IRQ: usize = 53;

/// SysTick frequency in Hz. Determines the unit of time used by `delay`
/// and semaphore timeouts.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz, used to compute the SysTick reload value
/// for `TICK_HZ`.
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;
