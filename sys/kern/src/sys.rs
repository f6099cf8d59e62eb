// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Syscall stubs.
//!
//! These are free functions so that task code reads the way it would against
//! a real kernel. Each call finds the kernel through the calling thread: task
//! threads are bound to their task, and the thread that created the
//! [`Kernel`](crate::startup::Kernel) is bound to it as the boot context,
//! which runs in machine mode.
//!
//! Calls that block or wake a more important task are the only places a
//! context switch can happen.

use std::cell::RefCell;
use std::io::Write;
use std::sync::{Arc, MutexGuard};

use pmp::descs::RegionAttributes;
use pmp::ringbuf_entry_root;

use crate::arch::{GPIO_OUTPUT_VAL, UART_TXDATA};
use crate::err::{Fault, QueueError};
use crate::queue::QueueId;
use crate::startup::{halt, Shared, State, StopReason};
use crate::task::{Mode, SchedState, TaskId, TaskState};
use crate::time::Timestamp;
use crate::Trace;

/// The board's RGB LED.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Led {
    Red = 0,
    Green = 1,
    Blue = 2,
}

/// What the calling thread is to the kernel.
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) shared: Arc<Shared>,
    /// `None` for the boot context.
    pub(crate) task: Option<usize>,
}

thread_local! {
    static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

pub(crate) fn install(ctx: Context) {
    CONTEXT.with(|c| *c.borrow_mut() = Some(ctx));
}

fn context() -> Context {
    match CONTEXT.with(|c| c.borrow().clone()) {
        Some(ctx) => ctx,
        None => panic!("kernel call from a thread with no kernel"),
    }
}

impl Context {
    fn task(&self, call: &str) -> usize {
        match self.task {
            Some(i) => i,
            None => panic!("{call} is only available to tasks"),
        }
    }

    fn is_privileged(&self, st: &State) -> bool {
        self.task
            .map_or(true, |i| st.tasks[i].mode() == Mode::Machine)
    }

    /// Faults the calling task unless it can access `len` bytes at `address`.
    fn check_access<'a>(
        &self,
        st: MutexGuard<'a, State>,
        address: u32,
        len: u32,
        wanted: RegionAttributes,
    ) -> MutexGuard<'a, State> {
        match self.task {
            Some(i) if !st.tasks[i].can_access(address, len, wanted) => {
                self.fault(st, i, Fault::MemoryAccess { address })
            }
            _ => st,
        }
    }

    /// Takes a fault against the calling task and stops the system.
    fn fault(
        &self,
        mut st: MutexGuard<'_, State>,
        me: usize,
        fault: Fault,
    ) -> ! {
        ringbuf_entry_root!(Trace::Faulted { task: me, fault });
        st.tasks[me].force_fault(fault);
        st.stop(StopReason::Faulted {
            task: TaskId(me),
            fault,
        });
        self.shared.turn.notify_all();
        drop(st);
        halt()
    }

    /// Stops the system on behalf of the calling task.
    fn stop(&self, mut st: MutexGuard<'_, State>, reason: StopReason) -> ! {
        st.stop(reason);
        self.shared.turn.notify_all();
        drop(st);
        halt()
    }
}

/// Takes a fault against the calling task. Used by the task thread wrapper.
pub(crate) fn fault_current(fault: Fault) -> ! {
    let ctx = context();
    let me = ctx.task("fault");
    let st = ctx.shared.lock();
    ctx.fault(st, me, fault)
}

/// Returns the current tick count.
pub fn tick_count() -> Timestamp {
    context().shared.lock().now
}

/// Blocks until `period` ticks after `*previous_wake`, then advances
/// `*previous_wake` by `period`.
///
/// If that moment has already passed this returns immediately, so a periodic
/// task that overruns doesn't drift.
pub fn delay_until(previous_wake: &mut Timestamp, period: u64) {
    let ctx = context();
    let me = ctx.task("delay_until");
    let mut st = ctx.shared.lock();
    let wake = *previous_wake + period;
    *previous_wake = wake;
    if wake > st.now {
        st.tasks[me].set_healthy_state(SchedState::InDelay(wake));
        drop(ctx.shared.switch(st, me));
    }
}

/// Sends `item` without blocking.
///
/// Any task waiting on the queue is woken. If one of them is more important
/// than the sender, it runs before this returns.
pub fn queue_send(queue: QueueId, item: u32) -> Result<(), QueueError> {
    let ctx = context();
    let mut st = ctx.shared.lock();
    st.queues[queue.0].push(item)?;

    let sender = ctx.task.map(|i| st.tasks[i].priority());
    let mut preempt = false;
    for (i, t) in st.tasks.iter_mut().enumerate() {
        if *t.state() == TaskState::Healthy(SchedState::InRecv(queue)) {
            t.set_healthy_state(SchedState::Runnable);
            ringbuf_entry_root!(Trace::Woke { task: i });
            preempt |= sender
                .is_some_and(|p| t.priority().is_more_important_than(p));
        }
    }

    if let (true, Some(me)) = (preempt, ctx.task) {
        drop(ctx.shared.switch(st, me));
    }
    Ok(())
}

/// Receives from `queue`, blocking for as long as it takes.
pub fn queue_receive(queue: QueueId) -> u32 {
    let ctx = context();
    let me = ctx.task("queue_receive");
    let mut st = ctx.shared.lock();
    loop {
        if let Some(item) = st.queues[queue.0].pop() {
            return item;
        }
        st.tasks[me].set_healthy_state(SchedState::InRecv(queue));
        st = ctx.shared.switch(st, me);
    }
}

/// Writes to the console UART.
///
/// A task needs write access to the UART's transmit register. Boards without
/// a UART discard the output.
pub fn uart_write(bytes: &[u8]) {
    let ctx = context();
    let st = ctx.shared.lock();
    let Some(uart) = st.config.uart else {
        return;
    };
    let mut st = ctx.check_access(
        st,
        uart.base.wrapping_add(UART_TXDATA),
        4,
        RegionAttributes::WRITE,
    );
    let console = &mut st.console;
    if console.write_all(bytes).and_then(|()| console.flush()).is_err() {
        ringbuf_entry_root!(Trace::ConsoleError);
    }
}

/// Checks whether the board has `led`.
pub fn led_present(_led: Led) -> bool {
    let ctx = context();
    let st = ctx.shared.lock();
    st.config.leds && st.config.gpio.is_some()
}

fn led_update(led: Led, update: impl FnOnce(bool) -> bool) {
    let ctx = context();
    let st = ctx.shared.lock();
    let Some(gpio) = st.config.gpio.filter(|_| st.config.leds) else {
        return;
    };
    let mut st = ctx.check_access(
        st,
        gpio.base.wrapping_add(GPIO_OUTPUT_VAL),
        4,
        RegionAttributes::READ | RegionAttributes::WRITE,
    );
    let slot = &mut st.leds[led as usize];
    slot.lit = update(slot.lit);
    slot.changes += 1;
}

/// Lights or darkens `led`. Does nothing on boards without it.
pub fn led_set(led: Led, lit: bool) {
    led_update(led, |_| lit);
}

/// Flips `led`. Does nothing on boards without it.
pub fn led_toggle(led: Led) {
    led_update(led, |lit| !lit);
}

/// Checks whether the caller is running in machine mode.
pub fn is_privileged() -> bool {
    let ctx = context();
    let st = ctx.shared.lock();
    ctx.is_privileged(&st)
}

/// Raises the calling task to machine mode. Returns whether the caller is
/// privileged afterwards, which in this port is always.
pub fn raise_privilege() -> bool {
    let ctx = context();
    let mut st = ctx.shared.lock();
    if let Some(i) = ctx.task {
        if st.tasks[i].mode() != Mode::Machine {
            ringbuf_entry_root!(Trace::Raised { task: i });
            st.tasks[i].set_mode(Mode::Machine);
        }
    }
    true
}

/// Masks interrupts. Requires machine mode.
///
/// With interrupts masked the tick stops, so a task that then sleeps will
/// never wake.
pub fn disable_interrupts() {
    let ctx = context();
    let mut st = ctx.shared.lock();
    if !ctx.is_privileged(&st) {
        let me = ctx.task("disable_interrupts");
        ctx.fault(st, me, Fault::PrivilegeRequired);
    }
    st.interrupts_masked = true;
}

/// Stops the scheduler. Requires machine mode.
///
/// [`Kernel::start_scheduler`](crate::startup::Kernel::start_scheduler)
/// returns in the boot context, with exit code 0.
pub fn end_scheduler() -> ! {
    let ctx = context();
    let me = ctx.task("end_scheduler");
    let st = ctx.shared.lock();
    if !ctx.is_privileged(&st) {
        ctx.fault(st, me, Fault::PrivilegeRequired);
    }
    ctx.stop(st, StopReason::Ended)
}

/// Ends the run with `code`.
///
/// From a task, this stops the scheduler and the code becomes the run's exit
/// code. From the boot context, it exits the process.
pub fn exit(code: i32) -> ! {
    let ctx = context();
    match ctx.task {
        Some(_) => {
            let st = ctx.shared.lock();
            ctx.stop(st, StopReason::Exited(code))
        }
        None => std::process::exit(code),
    }
}
