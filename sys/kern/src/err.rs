// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errors and faults.
//!
//! Errors are returned to the caller of a kernel operation, which can decide
//! what to do about them. Faults are taken against the running task and stop
//! the system: a task that touched memory it wasn't granted doesn't get to
//! try again.

use core::fmt;

/// A record describing a fault taken by a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// The task accessed memory its loaded entries don't grant.
    MemoryAccess { address: u32 },
    /// The task attempted a machine-mode operation from user mode.
    PrivilegeRequired,
    /// The task's stack is too small to hold its initial frame, and no
    /// overflow hook was installed.
    StackOverflow { address: u32 },
    /// The task's code panicked.
    Panicked,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryAccess { address } => {
                write!(f, "memory access violation at {address:#010x}")
            }
            Self::PrivilegeRequired => {
                write!(f, "privileged operation attempted from user mode")
            }
            Self::StackOverflow { address } => {
                write!(f, "stack overflow at {address:#010x}")
            }
            Self::Panicked => write!(f, "task panicked"),
        }
    }
}

/// Errors from queue operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QueueError {
    /// The queue was full and the send doesn't block.
    Full,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "queue full"),
        }
    }
}

/// The kernel heap couldn't satisfy an allocation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutOfMemory {
    pub requested: usize,
    pub available: usize,
}

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "heap exhausted: wanted {} bytes, {} left",
            self.requested, self.available
        )
    }
}
