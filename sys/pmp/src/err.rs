// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Setup errors.
//!
//! Every one of these is terminal: the caller reports it and halts before the
//! scheduler starts. There is deliberately no "try again with fewer regions"
//! path.

use core::fmt;

/// Reasons protection setup can refuse to continue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SetupError {
    /// The unit implements fewer entries than we need.
    InsufficientEntries { found: usize, required: usize },
    /// The unit's granularity is unknown, not a power of two, or coarser than
    /// the encoder supports.
    UnsupportedGranularity { bytes: u32 },
    /// Appending a region would exceed the per-task entry budget.
    RegionBudgetExceeded { budget: usize },
    /// A range can't be expressed in the requested match mode: bad alignment,
    /// or a NAPOT size that isn't a power of two.
    MisalignedRegion { base: u32, size: u32 },
    /// A top-of-range entry without a lower fence directly before it, or a
    /// fence whose upper bound doesn't lie above its lower bound.
    FenceOrder,
    /// The scheduler (or its heap) refused to create the task.
    CreationFailed,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientEntries { found, required } => write!(
                f,
                "protection unit has {found} entries, need at least {required}"
            ),
            Self::UnsupportedGranularity { bytes: 0 } => {
                write!(f, "protection unit granularity is unknown")
            }
            Self::UnsupportedGranularity { bytes } => {
                write!(f, "protection unit granularity of {bytes} bytes is not supported")
            }
            Self::RegionBudgetExceeded { budget } => {
                write!(f, "task needs more than {budget} protection regions")
            }
            Self::MisalignedRegion { base, size } => write!(
                f,
                "region {base:#010x}+{size:#x} cannot be encoded as requested"
            ),
            Self::FenceOrder => {
                write!(f, "top-of-range region without a lower fence below it")
            }
            Self::CreationFailed => write!(f, "task creation failed"),
        }
    }
}
