// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Region descriptors for privilege-separated tasks on RISC-V PMP.
//!
//! Before any unprivileged task is allowed to run, the boot code has to turn
//! symbolic memory ranges (the unprivileged data section, and the register
//! apertures of the peripherals a task drives) into PMP address-register
//! encodings. How that's done depends on what the hardware reports about
//! itself at runtime: how many entries it implements and how coarse its
//! address matching is.
//!
//! The pieces, leaf-first:
//!
//! - [`info`] discovers and validates the unit's capabilities. Nothing else in
//!   this crate will accept unvalidated information.
//! - [`encode`] holds the pure address-encoding functions (and their inverses).
//! - [`plan`] assembles an ordered, budget-checked region list per task.
//! - [`provision`] attaches a stack and an entry point and hands the result to
//!   the scheduler.
//! - [`escalate`] is used on fatal paths to get back to machine mode.
//!
//! # Design principles
//!
//! 1. Setup is single-threaded and happens once. Everything produced here is
//!    built before the scheduler starts and moved into it by value.
//! 2. Invariants are checked when a structure is built, not when it is used.
//!    A region list that exists is a region list that is safe to load.
//! 3. Failures are terminal. There's no partial-privilege fallback.

// Allow std-y things to be used in test.
#![cfg_attr(not(test), no_std)]
#![forbid(clippy::wildcard_imports)]

#[macro_use]
pub mod ringbuf;

pub mod check;
pub mod descs;
pub mod encode;
pub mod err;
pub mod escalate;
pub mod info;
pub mod plan;
pub mod provision;

pub use err::SetupError;

/// Events recorded by the setup path, for inspection from a debugger.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Trace {
    None,
    Reported { entries: usize, granularity: u32 },
    InitRequested,
    Rejected(SetupError),
    Validated { entries: usize, granularity: u32 },
    Region { mode: descs::MatchMode, encoded: u32 },
    StackFence { base: u32, words: usize },
    Created { priority: u8 },
    CreateRefused,
    Escalated(escalate::Escalation),
    Fatal(escalate::FatalHook),
}

ringbuf!(Trace, 32, Trace::None);
