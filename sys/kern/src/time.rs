// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

use core::ops::Add;

/// In-kernel timestamp representation.
///
/// This is measured in scheduler ticks. Simulated time only moves when every
/// task is blocked, so a tick costs nothing in wall-clock terms.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

impl Add<u64> for Timestamp {
    type Output = Self;

    fn add(self, ticks: u64) -> Self {
        Self(self.0.saturating_add(ticks))
    }
}

/// Converts a duration in milliseconds to ticks at `tick_rate_hz`, or `None`
/// if the intermediate product doesn't fit.
pub fn ms_to_ticks(ms: u64, tick_rate_hz: u32) -> Option<u64> {
    ms.checked_mul(u64::from(tick_rate_hz)).map(|t| t / 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_second_at_one_khz() {
        assert_eq!(ms_to_ticks(1000, 1000), Some(1000));
        assert_eq!(ms_to_ticks(1000, 100), Some(100));
        assert_eq!(ms_to_ticks(5, 100), Some(0));
    }

    #[test]
    fn huge_durations_dont_wrap() {
        assert_eq!(ms_to_ticks(u64::MAX, 1000), None);
        assert_eq!(ms_to_ticks(u64::MAX / 1000, 1000), Some(u64::MAX / 1000));
        assert_eq!(ms_to_ticks(u64::MAX, 1), Some(u64::MAX / 1000));
    }

    #[test]
    fn adding_saturates() {
        let t = Timestamp::from(u64::MAX - 1);
        assert_eq!(u64::from(t + 5), u64::MAX);
    }
}
