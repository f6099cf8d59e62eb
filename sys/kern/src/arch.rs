// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated RV32 port: the PMP unit and privilege transitions.

use pmp::escalate::Privilege;
use pmp::info::{Granularity, ProtectionUnit, RawInfo};

use crate::sys;

/// Most `pmpaddr` registers the privileged architecture defines.
pub const PMP_ADDR_REGS: usize = 64;

/// Offset of the transmit data register in a SiFive UART block.
pub const UART_TXDATA: u32 = 0x00;
/// Offset of the output value register in a SiFive GPIO block.
pub const GPIO_OUTPUT_VAL: u32 = 0x0C;

/// A PMP unit with WARL address registers.
///
/// The unit knows its own shape, but like the hardware it only reveals its
/// granularity once it has been initialized.
#[derive(Clone, Debug)]
pub struct SimPmp {
    implemented: usize,
    /// `G`: number of low `pmpaddr` bits that read back as zero.
    g: u32,
    pmpaddr: [u32; PMP_ADDR_REGS],
    granularity: u32,
}

impl SimPmp {
    /// Creates a unit with `entries` entries and the given granularity in
    /// bytes. Granularities of less than a word behave as a word.
    pub fn new(entries: usize, granularity: u32) -> Self {
        Self {
            implemented: entries.min(PMP_ADDR_REGS),
            g: granularity.trailing_zeros().saturating_sub(2),
            pmpaddr: [0; PMP_ADDR_REGS],
            granularity: 0,
        }
    }

    /// Writes `pmpaddr<i>` with its entry off. Unimplemented registers are
    /// hardwired to zero.
    pub fn write_pmpaddr(&mut self, i: usize, value: u32) {
        if i < self.implemented {
            let ignored = 1u32.checked_shl(self.g).map_or(u32::MAX, |b| b - 1);
            self.pmpaddr[i] = value & !ignored;
        }
    }

    pub fn read_pmpaddr(&self, i: usize) -> u32 {
        self.pmpaddr.get(i).copied().unwrap_or(0)
    }

    /// Counts implemented entries by writing each register and seeing whether
    /// the value sticks.
    fn count_entries(&mut self) -> usize {
        let mut n = 0;
        for i in 0..PMP_ADDR_REGS {
            self.write_pmpaddr(i, u32::MAX);
            let held = self.read_pmpaddr(i) != 0;
            self.write_pmpaddr(i, 0);
            if !held {
                break;
            }
            n += 1;
        }
        n
    }
}

impl ProtectionUnit for SimPmp {
    fn report(&self) -> RawInfo {
        RawInfo {
            entry_count: self.implemented,
            granularity: self.granularity,
        }
    }

    fn initialize(&mut self) {
        self.implemented = self.count_entries();
        self.write_pmpaddr(0, u32::MAX);
        let readback = self.read_pmpaddr(0);
        self.write_pmpaddr(0, 0);
        self.granularity = Granularity::from_readback(readback)
            .map(Granularity::bytes)
            .unwrap_or(0);
    }
}

/// Privilege transitions for the calling task, by way of the kernel.
#[derive(Copy, Clone, Debug, Default)]
pub struct Port;

impl Privilege for Port {
    fn is_privileged(&self) -> bool {
        sys::is_privileged()
    }

    fn raise_privilege(&mut self) -> bool {
        sys::raise_privilege()
    }

    fn disable_interrupts(&mut self) {
        sys::disable_interrupts()
    }
}
