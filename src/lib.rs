//! # micrortos
//!
//! A small preemptive, fixed-priority Real-Time Operating System kernel for
//! ARM Cortex-M4 microcontrollers.
//!
//! ## Overview
//!
//! Tasks are created once, up front, each with a static priority. The
//! scheduler always runs the highest-priority READY task, round-robining
//! among tasks tied at the same priority. Preemption happens on every
//! SysTick and on any event (delay expiry, semaphore give, queue send)
//! that might make a higher-priority task runnable.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │     init() · init_task() · start() · delay() · yield() │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   ISR Dispatch     │  Sync Primitives  │
//! │  scheduler.rs│   isr.rs           │  sync.rs          │
//! │  ─ schedule()│   ─ isr_dispatch() │  ─ Semaphore      │
//! │  ─ tick()    │   ─ register_isr() │  ─ Queue          │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │              Task Model (task.rs)                       │
//! │    TaskControlBlock · TaskState · stack frame init      │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch Port (arch/cortex_m4.rs)                │
//! │    PendSV · SysTick · Context Switch · Stack Init      │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 Hardware (Thumb-2)                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **No `alloc`**: pure `core`, plus `cortex-m`/`cortex-m-rt` for the
//!   hardware boundary
//! - **Fixed-size task table**: `[TaskControlBlock; OS_MAX_TASK]`
//! - **Per-task stack**: `[u32; STACK_SIZE / 4]` inline in the TCB
//! - **Critical sections**: `cortex_m::interrupt` masking, with an
//!   explicit nesting counter for the `enter_critical`/`exit_critical` pair

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod error;
pub mod task;
pub mod scheduler;
pub mod arch;
pub mod kernel;
pub mod sync;
pub mod isr;
