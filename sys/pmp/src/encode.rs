// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PMP address-register encodings.
//!
//! A `pmpaddr` register holds bits `[33:2]` of a physical address, so every
//! encoding here starts by dropping the two low bits. What happens after that
//! depends on the match mode:
//!
//! - For NA4 and TOR the register holds a single boundary. If the unit's
//!   granularity `G = 2^k` is coarser than a word, the hardware ignores the low
//!   `k - 2` bits of the register, and so do we.
//! - For NAPOT the register holds both base and size: the trailing ones
//!   encode `log2(size) - 3`, and the bits above them are the base.
//!
//! These are pure functions of the granularity and their arguments. The
//! decoders exist for tests and for [`crate::check`].

use core::ops::Range;

use crate::info::Granularity;

/// Encodes a single address boundary, for NA4 or TOR matching.
///
/// Bits below the granule are dropped, as the hardware would drop them. Callers
/// that care about exactness (the region builder does) should check alignment
/// first.
pub fn encode_boundary(g: Granularity, addr: u32) -> u32 {
    let scaled = addr >> 2;
    let ignored = (1u32 << (g.shift() - 2)) - 1;
    scaled & !ignored
}

/// Decodes a boundary-encoded register back into a byte address.
///
/// The result is 34 bits wide on RV32, hence `u64`.
pub fn decode_boundary(encoded: u32) -> u64 {
    u64::from(encoded) << 2
}

/// Checks whether `base..base+len` can be expressed as a single NAPOT region
/// at granularity `g`.
pub fn is_napot_aperture(g: Granularity, base: u32, len: u32) -> bool {
    len.is_power_of_two()
        && len >= 8
        && len >= g.bytes()
        && base & (len - 1) == 0
}

/// Encodes a naturally aligned power-of-two region.
///
/// `len` must be a power of two no smaller than 8 bytes or the granularity,
/// and `base` must be aligned to it; see [`is_napot_aperture`].
pub fn encode_napot(g: Granularity, base: u32, len: u32) -> u32 {
    debug_assert!(is_napot_aperture(g, base, len));
    (base >> 2) | ((len / 2 - 1) >> 2)
}

/// Decodes a NAPOT register into the byte range it matches.
pub fn decode_napot(encoded: u32) -> Range<u64> {
    let t = encoded.trailing_ones();
    // 31 or more trailing ones leave no base bits: the whole 34-bit space.
    if t >= u32::BITS - 1 {
        return 0..1 << 34;
    }
    // Eight bytes for no trailing ones, doubling for each one after that.
    let size = 8u64 << t;
    let base = u64::from(encoded & !((1u32 << t) - 1)) << 2;
    base..base + size
}
