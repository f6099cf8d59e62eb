// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Evaluating an entry list the way the hardware does.
//!
//! The PMP checks an access against its entries in order. The first entry that
//! matches *any* byte of the access decides: the access succeeds only if that
//! entry covers all of it and grants the requested permissions. If nothing
//! matches, an access from user mode fails.
//!
//! This is used by the simulated port to fault tasks that step outside their
//! regions, and by tests to check that built region lists mean what we think.

use core::ops::Range;

use crate::descs::{MatchMode, RegionAttributes, RegionDesc};
use crate::encode::{decode_boundary, decode_napot};

/// Returns the byte range matched by `region`, given the `pmpaddr` value of the
/// entry before it (0 for entry 0).
pub fn matched_span(prev_encoded: u32, region: &RegionDesc) -> Range<u64> {
    match region.mode {
        MatchMode::TopOfRange => {
            decode_boundary(prev_encoded)..decode_boundary(region.encoded)
        }
        MatchMode::NaturallyAligned4Byte => {
            let base = decode_boundary(region.encoded);
            base..base + 4
        }
        MatchMode::NaturallyAlignedPowerOfTwo => decode_napot(region.encoded),
    }
}

/// Checks whether an access to `access` needing `wanted` would be allowed by
/// `entries`, loaded in order starting at entry 0.
///
/// Empty accesses are always allowed; they touch nothing.
pub fn can_access<'a>(
    entries: impl IntoIterator<Item = &'a RegionDesc>,
    access: Range<u64>,
    wanted: RegionAttributes,
) -> bool {
    if access.is_empty() {
        return true;
    }

    let mut prev_encoded = 0;
    for region in entries {
        let span = matched_span(prev_encoded, region);
        prev_encoded = region.encoded;

        // An inverted TOR span matches nothing.
        let overlaps = span.start < access.end && access.start < span.end;
        if !overlaps {
            continue;
        }
        return span.start <= access.start
            && access.end <= span.end
            && region.attributes.contains(wanted);
    }
    false
}
