// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static ring buffers for tracing setup and kernel events.
//!
//! Each buffer holds the last `N` events of some `Copy + PartialEq` type,
//! tagged with the source line that recorded them. Recording the same payload
//! from the same line twice in a row bumps a count instead of using a new
//! slot, so a hot loop doesn't wipe out the interesting history.
//!
//! Declare one with [`ringbuf!`] and record into it with [`ringbuf_entry!`]:
//!
//! ```ignore
//! ringbuf!(Trace, 16, Trace::None);
//!
//! ringbuf_entry!(Trace::Validated { entries, granularity });
//! ```
//!
//! If the name is omitted it defaults to `__RINGBUF`, so there can be one
//! unnamed buffer per module. [`ringbuf_entry_root!`] records into the buffer
//! declared at the root of the calling crate.
//!
//! Buffers are behind a spin lock rather than a borrow flag so that they can be
//! poked from both the boot path and the simulated task threads used in host
//! builds.

/// Declares a ring buffer in the current module.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a static buffer named `NAME` with
/// room for `N` entries of `Type`, all initialized to `expr`.
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::ringbuf::Ringbuf<$t, $n> =
            $crate::ringbuf::Ringbuf::new($init);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Inserts an entry into a ring buffer declared with [`ringbuf!`].
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate both without letting either see the other's binding.
        let (p, buf) = ($payload, &$buf);
        $crate::ringbuf::Ringbuf::entry(buf, line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

/// Inserts an entry into the ring buffer at the root of the calling crate.
#[allow(clippy::crate_in_macro_def)]
#[macro_export]
macro_rules! ringbuf_entry_root {
    ($buf:ident, $payload:expr) => {
        $crate::ringbuf_entry!(crate::$buf, $payload);
    };
    ($payload:expr) => {
        $crate::ringbuf_entry!(crate::__RINGBUF, $payload);
    };
}

/// A single ring buffer slot.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

#[derive(Debug)]
struct Slots<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

/// A ring buffer of `N` entries of `T`. See [`ringbuf!`].
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    slots: spin::Mutex<Slots<T, N>>,
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            slots: spin::Mutex::new(Slots {
                last: None,
                buffer: [RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: init,
                }; N],
            }),
        }
    }

    pub fn entry(&self, line: u16, payload: T) {
        let mut slots = self.slots.lock();
        // None (never written) is treated as out of range, which also deposits
        // the first entry in slot 0 below.
        let last = slots.last.unwrap_or(usize::MAX);

        if let Some(ent) = slots.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= slots.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut slots.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        slots.last = Some(ndx);
    }

    /// Returns the most recently written entry, if any.
    pub fn last(&self) -> Option<RingbufEntry<T>> {
        let slots = self.slots.lock();
        slots.last.and_then(|i| slots.buffer.get(i).copied())
    }

    /// Copies out the whole buffer, in slot order.
    pub fn snapshot(&self) -> [RingbufEntry<T>; N] {
        self.slots.lock().buffer
    }
}
