// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PMP blinky: two unprivileged tasks passing a value through a queue.
//!
//! Boot validates the protection unit, then gives each task a region list
//! holding the shared data section and the one peripheral it drives. The
//! consumer may only touch the UART and the producer may only touch the GPIO
//! block; a task that reaches for anything else faults.

#![forbid(clippy::wildcard_imports)]

pub mod config;
pub mod hooks;
pub mod tasks;

use std::io::Write;

use anyhow::{anyhow, Result};
use kern::arch::SimPmp;
use kern::startup::{Kernel, KernelConfig, Outcome, StopReason};
use kern::sys::{led_present, led_set, uart_write, Led};
use pmp::info::ProtectionInfo;
use pmp::plan::{build_task_regions, DataSegment};
use pmp::provision::{provision, Priority, TaskEntry, TaskParams};
use pmp::{ringbuf, ringbuf_entry, SetupError};

use crate::config::{Body, Config, GPIO_PERIPHERAL, UART_PERIPHERAL};
use crate::tasks::DemoArgs;

const BANNER_START: &str = "PMP Demo start\r\n";
const BANNER_END: &str = "PMP Demo end\r\n";
const NO_ENTRIES: &str = "PMP Demo end - Error no enough PMP entry\r\n";
const BAD_GRANULARITY: &str =
    "PMP Demo end - Error platform granularity no supported\r\n";
const LED_MISSING: &str = "At least one of LEDs is null.\r\n";

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Unsupported(SetupError),
    Provisioned { parameter: usize, priority: u8 },
    Finished(StopReason),
}

ringbuf!(Trace, 16, Trace::None);

/// How a run went.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Report {
    pub exit_code: i32,
    /// `None` if the run ended before the scheduler started.
    pub outcome: Option<Outcome>,
    pub red_lit: bool,
    pub green_lit: bool,
}

/// Boots the demo described by `config`, writing console output to `console`.
///
/// Errors are reserved for configurations that can't describe a working
/// image. Everything the demo itself can run into, including a protection
/// unit it can't use, is reported through the exit code.
pub fn run(config: &Config, console: Box<dyn Write + Send>) -> Result<Report> {
    config.check()?;
    let period = config.period_ticks()?;

    let mut kernel = Kernel::new(
        KernelConfig {
            heap_base: config.memory.heap_base,
            heap_size: config.memory.heap_size,
            uart: config.peripheral(UART_PERIPHERAL),
            gpio: config.peripheral(GPIO_PERIPHERAL),
            leds: config.leds,
            stack_overflow_hook: Some(hooks::stack_overflow),
        },
        console,
    );

    setup_hardware();
    uart_write(BANNER_START.as_bytes());

    let mut unit = SimPmp::new(config.pmp.entries, config.pmp.granularity);
    let info = match pmp::info::discover(&mut unit) {
        Ok(info) => info,
        Err(e) => {
            ringbuf_entry!(Trace::Unsupported(e));
            let message = match e {
                SetupError::InsufficientEntries { .. } => NO_ENTRIES,
                SetupError::UnsupportedGranularity { .. } => BAD_GRANULARITY,
                _ => return Err(anyhow!("reading PMP capabilities: {e}")),
            };
            uart_write(message.as_bytes());
            return Ok(report(&kernel, 0, None));
        }
    };

    let Ok(queue) = kernel.create_queue(config.kernel.queue_length) else {
        let code = hooks::malloc_failed();
        return Ok(report(&kernel, code, None));
    };

    // Task arguments must outlive the scheduler run.
    let mut registrations = Vec::with_capacity(config.tasks.len());
    for (name, task) in &config.tasks {
        let registration = tasks::register(DemoArgs {
            queue,
            period,
            iterations: config.demo.iterations,
            value: config.demo.value,
        });
        let parameter = registration.parameter();
        registrations.push(registration);
        let entry: TaskEntry = match task.name {
            Body::Producer => tasks::producer,
            Body::Consumer => tasks::consumer,
        };
        let created =
            create_task(&mut kernel, config, &info, name, task, entry, parameter);
        match created {
            Ok(()) => (),
            Err(SetupError::CreationFailed) => {
                let code = hooks::malloc_failed();
                return Ok(report(&kernel, code, None));
            }
            Err(e) => return Err(anyhow!("setting up task {name}: {e}")),
        }
    }

    let outcome = kernel.start_scheduler();
    drop(registrations);
    ringbuf_entry!(Trace::Finished(outcome.reason));
    if outcome.reason == StopReason::Ended {
        uart_write(BANNER_END.as_bytes());
    }
    Ok(report(&kernel, outcome.exit_code(), Some(outcome)))
}

/// Turns the LEDs off, or warns if the board doesn't have them all.
fn setup_hardware() {
    let leds = [Led::Red, Led::Green, Led::Blue];
    if leds.iter().all(|&led| led_present(led)) {
        for led in leds {
            led_set(led, false);
        }
    } else {
        uart_write(LED_MISSING.as_bytes());
    }
}

fn create_task(
    kernel: &mut Kernel,
    config: &Config,
    info: &ProtectionInfo,
    name: &str,
    task: &config::Task,
    entry: TaskEntry,
    parameter: usize,
) -> Result<(), SetupError> {
    let data = DataSegment {
        start: config.memory.data_start,
        end: config.memory.data_end,
    };
    let apertures: Vec<_> =
        task.uses.iter().map(|p| config.peripheral(p)).collect();
    let regions = build_task_regions(info, data, &apertures)?;

    provision(
        kernel,
        info,
        TaskParams {
            name,
            entry,
            parameter,
            priority: Priority(task.priority),
            stack_depth: task.stacksize,
        },
        regions,
    )?;
    ringbuf_entry!(Trace::Provisioned {
        parameter,
        priority: task.priority,
    });
    Ok(())
}

fn report(kernel: &Kernel, exit_code: i32, outcome: Option<Outcome>) -> Report {
    Report {
        exit_code,
        outcome,
        red_lit: kernel.led_lit(Led::Red),
        green_lit: kernel.led_lit(Led::Green),
    }
}
