//! # Example firmware
//!
//! Four tasks and one timer ISR exercising every primitive the kernel
//! ships:
//!
//! | Task | Priority | Demonstrates |
//! |------|----------|--------------|
//! | `producer_task` | 1 | `Queue::send`, periodic `delay` |
//! | `consumer_task` | 1 | `Queue::receive`, round-robin with `producer_task` |
//! | `waiter_task` | 0 | `Semaphore::take` (blocks until the ISR gives it) |
//! | `heartbeat_task` | 2 | lowest-priority periodic background work |
//!
//! `TIMER0` fires every 1000 ticks, gives the semaphore `waiter_task` is
//! blocked on, and asks for an immediate reschedule so the waiter runs
//! before the interrupted task resumes.

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use micrortos::isr;
use micrortos::kernel;
use micrortos::sync::{Queue, Semaphore};

static mut TRANSFER_QUEUE: Queue = Queue::empty();
static mut EVENT_SEMAPHORE: Semaphore = Semaphore::new();

const TIMER0_IRQ: usize = 0;

extern "C" fn producer_task(_param: *mut u8) -> ! {
    let mut next: u32 = 0;
    loop {
        let bytes = next.to_le_bytes();
        unsafe {
            (*core::ptr::addr_of_mut!(TRANSFER_QUEUE)).send(&bytes);
        }
        next = next.wrapping_add(1);
        let _ = kernel::delay(50);
    }
}

extern "C" fn consumer_task(_param: *mut u8) -> ! {
    let mut buf = [0u8; 4];
    loop {
        unsafe {
            (*core::ptr::addr_of_mut!(TRANSFER_QUEUE)).receive(&mut buf);
        }
        let _value = u32::from_le_bytes(buf);
        kernel::yield_now();
    }
}

extern "C" fn waiter_task(_param: *mut u8) -> ! {
    loop {
        let acquired = unsafe { (*core::ptr::addr_of_mut!(EVENT_SEMAPHORE)).take(0) };
        if acquired {
            log::info!("waiter_task observed a timer event");
        }
    }
}

extern "C" fn heartbeat_task(_param: *mut u8) -> ! {
    loop {
        let _ = kernel::delay(1000);
        log::trace!("heartbeat at tick {}", kernel::get_current_time());
    }
}

extern "C" fn timer0_isr() {
    unsafe {
        (*core::ptr::addr_of_mut!(EVENT_SEMAPHORE)).give();
    }
}

/// Firmware entry point. Initializes the kernel, creates tasks, registers
/// the timer interrupt, and starts the scheduler. Does not return.
#[entry]
fn main() -> ! {
    unsafe {
        (*core::ptr::addr_of_mut!(TRANSFER_QUEUE))
            .init(4)
            .expect("queue element size fits MAX_QUEUE_BYTES");
    }

    kernel::init();

    kernel::init_task(producer_task, core::ptr::null_mut(), 1)
        .expect("failed to create producer_task");
    kernel::init_task(consumer_task, core::ptr::null_mut(), 1)
        .expect("failed to create consumer_task");
    kernel::init_task(waiter_task, core::ptr::null_mut(), 0)
        .expect("failed to create waiter_task");
    kernel::init_task(heartbeat_task, core::ptr::null_mut(), 2)
        .expect("failed to create heartbeat_task");

    isr::register_isr(TIMER0_IRQ, timer0_isr);

    kernel::start()
}
