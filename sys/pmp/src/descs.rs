// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Region descriptors and per-task region lists.

use crate::info::{ProtectionInfo, MAX_ENTRIES, RESERVED_ENTRIES};
use crate::{SetupError, Trace};

/// Most regions a task's list can hold, whatever the hardware offers.
pub const TASK_REGION_CAPACITY: usize = MAX_ENTRIES - RESERVED_ENTRIES;

/// How a PMP entry's address register is interpreted.
///
/// Discriminants are the hardware's `A` field encoding. `OFF` (0) is never
/// produced here: an entry we build is an entry we want matched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum MatchMode {
    /// Matches from the previous entry's address up to (not including) this
    /// one.
    TopOfRange = 1,
    /// Matches the four bytes at the address.
    NaturallyAligned4Byte = 2,
    /// Matches a power-of-two region whose size is encoded in the address.
    NaturallyAlignedPowerOfTwo = 3,
}

impl MatchMode {
    /// Whether an entry in this mode can be the lower partner of a
    /// [`MatchMode::TopOfRange`] entry.
    fn is_fence_base(self) -> bool {
        matches!(self, Self::NaturallyAligned4Byte | Self::TopOfRange)
    }
}

bitflags::bitflags! {
    /// Access granted to a task through a region. These are the low three bits
    /// of a `pmpcfg` octet.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct RegionAttributes: u8 {
        /// Region can be read by tasks that include it.
        const READ = 1 << 0;
        /// Region can be written by tasks that include it.
        const WRITE = 1 << 1;
        /// Region can contain executable code for tasks that include it.
        const EXECUTE = 1 << 2;
    }
}

/// Description of one PMP entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegionDesc {
    /// Value for the `pmpaddr` register, in the unit's native scale.
    pub encoded: u32,
    /// Size of the range this entry (with its partner, for TOR) grants, in
    /// bytes. Informational; the hardware only sees `encoded`.
    pub size: u32,
    pub attributes: RegionAttributes,
    pub mode: MatchMode,
}

impl RegionDesc {
    /// The `pmpcfg` octet for this entry: permission bits, then the match
    /// mode in bits `[4:3]`. The lock bit is never set, so machine mode is
    /// not constrained by any region built here.
    pub fn config(&self) -> u8 {
        self.attributes.bits() | ((self.mode as u8) << 3)
    }
}

/// The ordered region list for one task.
///
/// Entries are matched in order by the hardware, so order here is load order.
/// Every `TopOfRange` entry has its lower partner immediately before it, and
/// the list never exceeds the budget it was created with; `push` refuses
/// anything that would break either rule.
#[derive(Clone, Debug)]
pub struct TaskRegions {
    regions: heapless::Vec<RegionDesc, TASK_REGION_CAPACITY>,
    budget: usize,
}

impl TaskRegions {
    pub fn new(info: &ProtectionInfo) -> Self {
        Self {
            regions: heapless::Vec::new(),
            budget: info.region_budget().min(TASK_REGION_CAPACITY),
        }
    }

    /// Appends a region, checking the budget and the TOR pairing rule.
    pub fn push(&mut self, region: RegionDesc) -> Result<(), SetupError> {
        if self.regions.len() >= self.budget {
            return Err(SetupError::RegionBudgetExceeded {
                budget: self.budget,
            });
        }
        if region.mode == MatchMode::TopOfRange {
            match self.regions.last() {
                Some(prev)
                    if prev.mode.is_fence_base()
                        && prev.encoded < region.encoded => {}
                _ => return Err(SetupError::FenceOrder),
            }
        }
        ringbuf_entry_root!(Trace::Region {
            mode: region.mode,
            encoded: region.encoded,
        });
        self.regions
            .push(region)
            .map_err(|_| SetupError::RegionBudgetExceeded {
                budget: self.budget,
            })
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, RegionDesc> {
        self.regions.iter()
    }
}

impl<'a> IntoIterator for &'a TaskRegions {
    type Item = &'a RegionDesc;
    type IntoIter = core::slice::Iter<'a, RegionDesc>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}
