// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;

/// Peripheral the kernel drives as its console.
pub const UART_PERIPHERAL: &str = "uart0";
/// Peripheral the kernel drives the LEDs through.
pub const GPIO_PERIPHERAL: &str = "gpio0";

/// A deserialized `app.toml`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub name: String,
    pub board: String,
    /// Whether the board has its RGB LED fitted.
    #[serde(default)]
    pub leds: bool,
    pub pmp: Pmp,
    pub memory: Memory,
    pub kernel: Kernel,
    pub demo: Demo,
    #[serde(default)]
    pub peripherals: IndexMap<String, Peripheral>,
    pub tasks: IndexMap<String, Task>,
}

/// Shape of the simulated protection unit.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Pmp {
    pub entries: usize,
    /// In bytes.
    pub granularity: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Memory {
    /// Bounds of the data and bss that unprivileged tasks share.
    pub data_start: u32,
    pub data_end: u32,
    pub heap_base: u32,
    pub heap_size: usize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Kernel {
    /// Ticks per second.
    pub tick_rate: u32,
    pub queue_length: usize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Demo {
    /// How often the producer sends.
    pub period_ms: u64,
    /// How many sends before the producer ends the scheduler.
    pub iterations: u32,
    /// What the producer sends. The consumer only blinks for 100.
    #[serde(default = "default_value")]
    pub value: u32,
}

fn default_value() -> u32 {
    100
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Peripheral {
    pub address: u32,
    pub size: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Task {
    /// Which body the task runs.
    pub name: Body,
    pub priority: u8,
    /// Stack depth, in words.
    pub stacksize: usize,
    /// Peripherals the task is granted.
    #[serde(default)]
    pub uses: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Body {
    Producer,
    Consumer,
}

impl Config {
    pub fn from_file(cfg: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(cfg)
            .with_context(|| format!("reading {}", cfg.display()))?;
        Self::parse(&text)
            .with_context(|| format!("loading {}", cfg.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Cross-checks settings that can't be expressed in the schema.
    pub fn check(&self) -> Result<()> {
        if !self.pmp.granularity.is_power_of_two() {
            bail!(
                "PMP granularity must be a power of two, not {}",
                self.pmp.granularity
            );
        }
        if self.tasks.is_empty() {
            bail!("no tasks");
        }
        for (name, task) in &self.tasks {
            if task.stacksize == 0 {
                bail!("task {name} has a zero stacksize");
            }
            for p in &task.uses {
                if !self.peripherals.contains_key(p) {
                    bail!("task {name} uses unknown peripheral {p}");
                }
            }
        }
        let producers = self
            .tasks
            .values()
            .filter(|t| t.name == Body::Producer)
            .count();
        if producers != 1 {
            bail!("expected one producer task, found {producers}");
        }
        if self.kernel.tick_rate == 0 {
            bail!("tick-rate must be nonzero");
        }
        self.period_ticks()?;
        Ok(())
    }

    /// The producer's period, in scheduler ticks.
    pub fn period_ticks(&self) -> Result<u64> {
        kern::time::ms_to_ticks(self.demo.period_ms, self.kernel.tick_rate)
            .with_context(|| {
                format!(
                    "period-ms {} is too long at tick-rate {}",
                    self.demo.period_ms, self.kernel.tick_rate
                )
            })
    }

    /// Looks up a peripheral's register block.
    pub fn peripheral(&self, name: &str) -> Option<pmp::plan::Aperture> {
        self.peripherals.get(name).map(|p| pmp::plan::Aperture {
            base: p.address,
            size: p.size,
        })
    }
}
