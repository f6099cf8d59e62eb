// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Building a task's region list from symbolic ranges.
//!
//! A task gets, in this order:
//!
//! 1. A fence around the writable data section: an NA4 entry at its start and
//!    a TOR entry at its end. The TOR entry matches from the NA4 entry's
//!    address up, so between them they grant the whole section.
//! 2. One NAPOT entry per peripheral the task drives, covering the
//!    peripheral's register aperture.
//!
//! Everything is checked as it's appended. If any step fails, the partially
//! built list is dropped with the error; a caller never sees a list that's
//! missing an entry.

use crate::descs::{MatchMode, RegionAttributes, RegionDesc, TaskRegions};
use crate::encode::{encode_boundary, encode_napot, is_napot_aperture};
use crate::info::ProtectionInfo;
use crate::SetupError;

/// Read-write, no execute. Every region built here is data or device memory.
const DATA: RegionAttributes =
    RegionAttributes::READ.union(RegionAttributes::WRITE);

/// Bounds of a writable data section, `[start, end)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DataSegment {
    pub start: u32,
    pub end: u32,
}

/// A peripheral's register block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Aperture {
    pub base: u32,
    pub size: u32,
}

/// Builds the NA4 + TOR pair that grants read-write access to
/// `[start, end)`.
///
/// Both bounds have to sit on a granule boundary, and the range must not be
/// empty.
pub fn fence_pair(
    info: &ProtectionInfo,
    start: u32,
    end: u32,
) -> Result<[RegionDesc; 2], SetupError> {
    let g = info.granularity();
    let granule_mask = g.granule() - 1;
    if start & granule_mask != 0 || end & granule_mask != 0 {
        return Err(SetupError::MisalignedRegion {
            base: start,
            size: end.wrapping_sub(start),
        });
    }
    if start >= end {
        return Err(SetupError::FenceOrder);
    }
    Ok([
        RegionDesc {
            encoded: encode_boundary(g, start),
            size: 4,
            attributes: DATA,
            mode: MatchMode::NaturallyAligned4Byte,
        },
        RegionDesc {
            encoded: encode_boundary(g, end),
            size: end - start,
            attributes: DATA,
            mode: MatchMode::TopOfRange,
        },
    ])
}

/// Builds a read-write NAPOT region over a peripheral aperture.
pub fn aperture_region(
    info: &ProtectionInfo,
    aperture: Aperture,
) -> Result<RegionDesc, SetupError> {
    let g = info.granularity();
    if !is_napot_aperture(g, aperture.base, aperture.size) {
        return Err(SetupError::MisalignedRegion {
            base: aperture.base,
            size: aperture.size,
        });
    }
    Ok(RegionDesc {
        encoded: encode_napot(g, aperture.base, aperture.size),
        size: aperture.size,
        attributes: DATA,
        mode: MatchMode::NaturallyAlignedPowerOfTwo,
    })
}

/// A region list under construction.
///
/// Each step consumes the plan and hands it back on success, so a failed step
/// takes the partial list with it.
#[must_use]
pub struct RegionPlan<'a> {
    info: &'a ProtectionInfo,
    regions: TaskRegions,
}

impl<'a> RegionPlan<'a> {
    pub fn new(info: &'a ProtectionInfo) -> Self {
        Self {
            info,
            regions: TaskRegions::new(info),
        }
    }

    /// Fences off `data` for reading and writing.
    pub fn fence(mut self, data: DataSegment) -> Result<Self, SetupError> {
        for r in fence_pair(self.info, data.start, data.end)? {
            self.regions.push(r)?;
        }
        Ok(self)
    }

    /// Grants a peripheral's aperture. `None` means the peripheral isn't
    /// present in this build, and is skipped.
    pub fn aperture(
        mut self,
        aperture: Option<Aperture>,
    ) -> Result<Self, SetupError> {
        if let Some(a) = aperture {
            self.regions.push(aperture_region(self.info, a)?)?;
        }
        Ok(self)
    }

    pub fn finish(self) -> TaskRegions {
        self.regions
    }
}

/// Builds the complete region list for a task that writes `data` and drives
/// the peripherals in `peripherals`, in that order.
pub fn build_task_regions(
    info: &ProtectionInfo,
    data: DataSegment,
    peripherals: &[Option<Aperture>],
) -> Result<TaskRegions, SetupError> {
    let mut plan = RegionPlan::new(info).fence(data)?;
    for &p in peripherals {
        plan = plan.aperture(p)?;
    }
    Ok(plan.finish())
}
