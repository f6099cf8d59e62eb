// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The two demo tasks.
//!
//! The producer wakes once a period, toggles the green LED and sends the
//! configured value. The consumer, which is more important, reports every value it
//! receives on the console. Once the producer has sent enough it raises its
//! privilege and ends the scheduler.

use std::sync::{Mutex, PoisonError};

use kern::arch::Port;
use kern::queue::QueueId;
use kern::sys::{
    self, delay_until, end_scheduler, led_present, led_toggle, queue_receive,
    queue_send, tick_count, uart_write, Led,
};
use pmp::escalate::escalate;

use crate::hooks;

/// The value the consumer blinks for.
pub const EXPECTED_VALUE: u32 = 100;

/// What a task needs to know beyond its entry point.
#[derive(Copy, Clone, Debug)]
pub struct DemoArgs {
    pub queue: QueueId,
    /// Ticks between sends.
    pub period: u64,
    pub iterations: u32,
    /// What the producer sends.
    pub value: u32,
}

/// Arguments for every live task. A task's parameter is its slot here; slots
/// are freed when their [`Registration`] drops and reused after that.
static ARGS: Mutex<Vec<Option<DemoArgs>>> = Mutex::new(Vec::new());

/// Holds a task's slot in the argument registry.
#[derive(Debug)]
pub struct Registration(usize);

impl Registration {
    /// The parameter to start the task with.
    pub fn parameter(&self) -> usize {
        self.0
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut all = ARGS.lock().unwrap_or_else(PoisonError::into_inner);
        all[self.0] = None;
    }
}

/// Stores `args` for a task to find. The slot stays taken until the returned
/// guard drops, which mustn't happen while the task can still run.
pub fn register(args: DemoArgs) -> Registration {
    let mut all = ARGS.lock().unwrap_or_else(PoisonError::into_inner);
    let slot = match all.iter().position(Option::is_none) {
        Some(free) => {
            all[free] = Some(args);
            free
        }
        None => {
            all.push(Some(args));
            all.len() - 1
        }
    };
    Registration(slot)
}

fn args(parameter: usize) -> Option<DemoArgs> {
    ARGS.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(parameter)
        .copied()
        .flatten()
}

pub fn producer(parameter: usize) {
    let Some(args) = args(parameter) else {
        sys::exit(hooks::assert_failed());
    };
    let mut next_wake = tick_count();

    for _ in 0..args.iterations {
        if led_present(Led::Green) {
            led_toggle(Led::Green);
        }

        delay_until(&mut next_wake, args.period);

        // The consumer drains the queue before we get back here, so this
        // never finds it full.
        if queue_send(args.queue, args.value).is_err() {
            sys::exit(hooks::assert_failed());
        }
    }

    // Ending the scheduler needs machine mode.
    escalate(&mut Port);
    end_scheduler();
}

pub fn consumer(parameter: usize) {
    let Some(args) = args(parameter) else {
        sys::exit(hooks::assert_failed());
    };
    loop {
        let value = queue_receive(args.queue);
        if value == EXPECTED_VALUE {
            uart_write(b"Blink\r\n");
        } else {
            uart_write(b"Unexpected value received\r\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_args(value: u32) -> DemoArgs {
        DemoArgs {
            queue: QueueId(0),
            period: 1,
            iterations: 1,
            value,
        }
    }

    #[test]
    fn released_slots_are_reused() {
        let held = register(demo_args(1));
        let released = register(demo_args(2));
        let slot = released.parameter();
        assert_eq!(args(slot).map(|a| a.value), Some(2));

        drop(released);
        assert!(args(slot).is_none());

        let len = ARGS.lock().unwrap_or_else(PoisonError::into_inner).len();
        let again = register(demo_args(3));
        assert_eq!(again.parameter(), slot);
        assert_eq!(
            ARGS.lock().unwrap_or_else(PoisonError::into_inner).len(),
            len
        );
        assert_eq!(args(held.parameter()).map(|a| a.value), Some(1));
    }
}
