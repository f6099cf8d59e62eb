// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host simulation of the RTOS services that protection setup consumes.
//!
//! This provides just enough of a preemptive, priority-based kernel to run
//! restricted tasks end to end on a development machine: a task table, a tick
//! counter, bounded queues, a heap for stacks and queues, a console, a few
//! LEDs, and a port layer that enforces each task's PMP entries on every
//! peripheral access.
//!
//! Each task runs on its own host thread, but only one of them is ever allowed
//! to make progress. The others are parked waiting for their turn, and turns
//! are handed out by the same priority scan the scheduler would use on
//! hardware. Context switches happen only inside syscalls, which makes runs
//! deterministic.
//!
//! # Design principles
//!
//! 1. The simulation is faithful where protection is concerned. A task in user
//!    mode can touch a peripheral only if its loaded entries say so, and
//!    machine-mode operations from user mode fault.
//! 2. Time is virtual. Ticks advance only when no task is runnable, so a demo
//!    that sleeps for seconds runs instantly.
//! 3. Any fault stops the whole system. There is no supervisor to restart a
//!    task.

#![forbid(clippy::wildcard_imports)]

pub mod arch;
pub mod console;
pub mod err;
pub mod queue;
pub mod startup;
pub mod sys;
pub mod task;
pub mod time;

use pmp::ringbuf;

use crate::err::Fault;
use crate::startup::StopReason;
use crate::time::Timestamp;

/// Kernel events, for post-mortem inspection.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Trace {
    None,
    Started { tasks: usize },
    Switch(usize),
    Tick(Timestamp),
    Allocated { base: u32, bytes: usize },
    AllocFailed { bytes: usize },
    Woke { task: usize },
    Raised { task: usize },
    Faulted { task: usize, fault: Fault },
    Stopped(StopReason),
    ConsoleError,
}

ringbuf!(Trace, 64, Trace::None);
