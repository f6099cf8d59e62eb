// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Getting back to machine mode on the way down.
//!
//! Fatal hooks (allocation failure, stack overflow, failed assertions) can be
//! reached from an unprivileged task. Masking interrupts and stopping the
//! scheduler are privileged operations, so the first thing such a hook does
//! is ask the port to raise its privilege. Whatever the answer, the hook goes
//! on to terminate; the escalation record just says how it got there.

use crate::Trace;

/// Privilege transitions, as offered by the port.
pub trait Privilege {
    /// Whether the caller is already running in machine mode.
    fn is_privileged(&self) -> bool;

    /// Asks to be raised to machine mode. Returns `true` if the caller is
    /// privileged afterwards.
    fn raise_privilege(&mut self) -> bool;

    /// Masks interrupts. Only meaningful once privileged.
    fn disable_interrupts(&mut self);
}

/// The fatal hooks that escalate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FatalHook {
    MallocFailed,
    StackOverflow,
    AssertFailed,
}

impl FatalHook {
    /// Process exit code for a run that ends in this hook.
    pub fn exit_code(self) -> i32 {
        1
    }
}

/// How an escalation went.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Escalation {
    /// The caller was already in machine mode.
    AlreadyPrivileged,
    /// The caller was raised to machine mode.
    Raised,
    /// The port refused to raise the caller.
    Refused,
}

impl Escalation {
    pub fn is_privileged(self) -> bool {
        !matches!(self, Self::Refused)
    }
}

/// Requests machine mode, if the caller doesn't have it already.
pub fn escalate(p: &mut impl Privilege) -> Escalation {
    let e = if p.is_privileged() {
        Escalation::AlreadyPrivileged
    } else if p.raise_privilege() {
        Escalation::Raised
    } else {
        Escalation::Refused
    };
    ringbuf_entry_root!(Trace::Escalated(e));
    e
}

/// Common prologue for fatal hooks: escalate, then mask interrupts if that
/// worked. The caller terminates whatever this returns.
pub fn enter_fatal(p: &mut impl Privilege, hook: FatalHook) -> Escalation {
    ringbuf_entry_root!(Trace::Fatal(hook));
    let e = escalate(p);
    if e.is_privileged() {
        p.disable_interrupts();
    }
    e
}
