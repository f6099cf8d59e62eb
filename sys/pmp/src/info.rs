// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Protection unit capabilities, and the gate that checks them.
//!
//! The hardware tells us two things about itself: how many PMP entries it
//! implements, and its granularity, the smallest region it can distinguish.
//! Both are only known at runtime. [`discover`] reads them (initializing the
//! unit first if the granularity hasn't been initialized yet), and
//! [`ProtectionInfo::validate`] decides whether we can work with them.
//!
//! Only a validated [`ProtectionInfo`] can be handed to the encoder and region
//! builder, so "we checked the hardware" is something the type system
//! remembers for us.

use static_assertions::const_assert;

use crate::{SetupError, Trace};

/// Fewest entries we'll accept. Each task needs two for its stack fence, two
/// for its data fence, and one per peripheral; this leaves headroom for the
/// demo tasks.
pub const MIN_REQUIRED_ENTRIES: usize = 8;

/// Coarsest granularity the encoder supports, in bytes. At anything coarser,
/// NA4 matching stops being available and fence bounds would need rounding.
pub const MAX_SUPPORTED_GRANULARITY: u32 = 4;

/// Most entries we will use. The privileged architecture allows up to 64.
pub const MAX_ENTRIES: usize = 16;

/// Entries taken by each task's stack fence, and so unavailable to its
/// region list.
pub const RESERVED_ENTRIES: usize = 2;

const_assert!(MIN_REQUIRED_ENTRIES > RESERVED_ENTRIES + 2);
const_assert!(MAX_ENTRIES >= MIN_REQUIRED_ENTRIES);

/// PMP granularity, in bytes. Always a power of two.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Granularity(u32);

impl Granularity {
    /// The granularity of a PMP with `G = 0`: one 32-bit word.
    pub const NATIVE: Self = Self(4);

    pub const fn new(bytes: u32) -> Option<Self> {
        if bytes.is_power_of_two() {
            Some(Self(bytes))
        } else {
            None
        }
    }

    /// Interprets the value read back from `pmpaddr0` after writing all-ones
    /// to it with the entry off. The hardware clears the low `G` bits, and the
    /// granularity is `2^(G + 2)` bytes. Zero means no PMP at all.
    pub fn from_readback(readback: u32) -> Option<Self> {
        if readback == 0 {
            return None;
        }
        let shift = readback.trailing_zeros() + 2;
        if shift >= u32::BITS {
            return None;
        }
        Some(Self(1 << shift))
    }

    pub fn bytes(self) -> u32 {
        self.0
    }

    /// Size of the smallest unit the address registers can express. Reports
    /// of less than a word are treated as a word, since `pmpaddr` always
    /// holds a word address.
    pub fn granule(self) -> u32 {
        self.0.max(Self::NATIVE.0)
    }

    /// log2 of [`Self::granule`].
    pub fn shift(self) -> u32 {
        self.granule().trailing_zeros()
    }
}

/// What the hardware reports, before anyone has judged it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RawInfo {
    pub entry_count: usize,
    /// Granularity in bytes, or 0 if the unit hasn't been initialized yet.
    pub granularity: u32,
}

/// Access to the protection unit's self-description.
pub trait ProtectionUnit {
    /// Returns the unit's current report.
    fn report(&self) -> RawInfo;

    /// Initializes the unit, filling in its granularity. This is done at most
    /// once per boot.
    fn initialize(&mut self);
}

/// Validated protection unit capabilities.
///
/// These are discovered once, before any region is built, and are read-only
/// from then on. Pass them by reference; there's no way to change one.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProtectionInfo {
    entry_count: usize,
    granularity: Granularity,
}

impl ProtectionInfo {
    /// Checks a report against what setup requires.
    ///
    /// The entry count is checked first, so a unit that fails both checks is
    /// reported as short on entries.
    pub fn validate(raw: RawInfo) -> Result<Self, SetupError> {
        if raw.entry_count < MIN_REQUIRED_ENTRIES {
            return Err(SetupError::InsufficientEntries {
                found: raw.entry_count,
                required: MIN_REQUIRED_ENTRIES,
            });
        }
        let granularity = match Granularity::new(raw.granularity) {
            Some(g) if g.bytes() <= MAX_SUPPORTED_GRANULARITY => g,
            _ => {
                return Err(SetupError::UnsupportedGranularity {
                    bytes: raw.granularity,
                })
            }
        };
        Ok(Self {
            entry_count: raw.entry_count,
            granularity,
        })
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Number of entries a single task's region list may use.
    pub fn region_budget(&self) -> usize {
        self.entry_count
            .min(MAX_ENTRIES)
            .saturating_sub(RESERVED_ENTRIES)
    }
}

/// Reads and validates the unit's capabilities.
///
/// If the unit hasn't been initialized yet (granularity reported as 0) it's asked
/// to initialize itself once and the report is re-read. This is the single
/// gate in front of region building: nothing downstream accepts anything but
/// the `ProtectionInfo` this returns.
pub fn discover(
    unit: &mut impl ProtectionUnit,
) -> Result<ProtectionInfo, SetupError> {
    let mut raw = unit.report();
    ringbuf_entry_root!(Trace::Reported {
        entries: raw.entry_count,
        granularity: raw.granularity,
    });

    if raw.entry_count >= MIN_REQUIRED_ENTRIES && raw.granularity == 0 {
        ringbuf_entry_root!(Trace::InitRequested);
        unit.initialize();
        raw = unit.report();
        ringbuf_entry_root!(Trace::Reported {
            entries: raw.entry_count,
            granularity: raw.granularity,
        });
    }

    match ProtectionInfo::validate(raw) {
        Ok(info) => {
            ringbuf_entry_root!(Trace::Validated {
                entries: info.entry_count,
                granularity: info.granularity.bytes(),
            });
            Ok(info)
        }
        Err(e) => {
            ringbuf_entry_root!(Trace::Rejected(e));
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A unit that reports `granularity` only after being initialized.
    struct FakeUnit {
        entries: usize,
        reported: u32,
        measured: u32,
        init_calls: usize,
    }

    impl FakeUnit {
        fn new(entries: usize, reported: u32, measured: u32) -> Self {
            Self {
                entries,
                reported,
                measured,
                init_calls: 0,
            }
        }
    }

    impl ProtectionUnit for FakeUnit {
        fn report(&self) -> RawInfo {
            RawInfo {
                entry_count: self.entries,
                granularity: self.reported,
            }
        }

        fn initialize(&mut self) {
            self.init_calls += 1;
            self.reported = self.measured;
        }
    }

    #[test]
    fn entry_count_boundary() {
        assert_eq!(
            ProtectionInfo::validate(RawInfo {
                entry_count: 7,
                granularity: 4
            }),
            Err(SetupError::InsufficientEntries {
                found: 7,
                required: 8
            })
        );
        assert!(ProtectionInfo::validate(RawInfo {
            entry_count: 8,
            granularity: 4
        })
        .is_ok());
    }

    #[test]
    fn granularity_boundary() {
        for (bytes, ok) in [(4, true), (8, false), (2, true), (3, false)] {
            let r = ProtectionInfo::validate(RawInfo {
                entry_count: 8,
                granularity: bytes,
            });
            assert_eq!(r.is_ok(), ok, "granularity {bytes}");
        }
    }

    #[test]
    fn entry_count_checked_before_granularity() {
        let r = ProtectionInfo::validate(RawInfo {
            entry_count: 4,
            granularity: 64,
        });
        assert!(matches!(r, Err(SetupError::InsufficientEntries { .. })));
    }

    #[test]
    fn unknown_granularity_triggers_init() {
        let mut unit = FakeUnit::new(8, 0, 4);
        let info = discover(&mut unit).unwrap();
        assert_eq!(unit.init_calls, 1);
        assert_eq!(info.granularity(), Granularity::NATIVE);
    }

    #[test]
    fn known_granularity_skips_init() {
        let mut unit = FakeUnit::new(16, 4, 4);
        discover(&mut unit).unwrap();
        assert_eq!(unit.init_calls, 0);
    }

    #[test]
    fn granularity_still_unknown_after_init_is_rejected() {
        let mut unit = FakeUnit::new(8, 0, 0);
        assert_eq!(
            discover(&mut unit),
            Err(SetupError::UnsupportedGranularity { bytes: 0 })
        );
        assert_eq!(unit.init_calls, 1);
    }

    #[test]
    fn coarse_readback_is_rejected() {
        let mut unit = FakeUnit::new(8, 0, 8);
        assert_eq!(
            discover(&mut unit),
            Err(SetupError::UnsupportedGranularity { bytes: 8 })
        );
    }

    #[test]
    fn short_unit_is_not_initialized() {
        let mut unit = FakeUnit::new(7, 0, 4);
        assert!(discover(&mut unit).is_err());
        assert_eq!(unit.init_calls, 0);
    }

    #[test]
    fn readback_decodes() {
        assert_eq!(Granularity::from_readback(u32::MAX), Some(Granularity(4)));
        assert_eq!(Granularity::from_readback(!0b1), Some(Granularity(8)));
        assert_eq!(Granularity::from_readback(!0xFF), Some(Granularity(1024)));
        assert_eq!(Granularity::from_readback(0), None);
        assert_eq!(Granularity::from_readback(1 << 31), None);
    }

    #[test]
    fn budget_excludes_stack_fence() {
        let info = ProtectionInfo::validate(RawInfo {
            entry_count: 8,
            granularity: 4,
        })
        .unwrap();
        assert_eq!(info.region_budget(), 6);

        let big = ProtectionInfo::validate(RawInfo {
            entry_count: 64,
            granularity: 4,
        })
        .unwrap();
        assert_eq!(big.region_budget(), MAX_ENTRIES - RESERVED_ENTRIES);
    }

    #[test]
    fn sub_word_granularity_uses_word_scale() {
        let g = Granularity::new(1).unwrap();
        assert_eq!(g.granule(), 4);
        assert_eq!(g.shift(), 2);
        assert_eq!(Granularity::new(16).unwrap().shift(), 4);
    }
}
