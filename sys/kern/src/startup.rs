// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup, and handing the CPU from task to task.

use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use pmp::plan::Aperture;
use pmp::provision::{Scheduler, Stack, StackPool, StackWord, TaskDesc};
use pmp::ringbuf_entry_root;

use crate::err::{Fault, OutOfMemory};
use crate::queue::{Queue, QueueId};
use crate::sys::{self, Context, Led};
use crate::task::{priority_scan, SchedState, Task, TaskId, TaskState};
use crate::time::Timestamp;
use crate::Trace;

/// Smallest stack, in words, that holds a task's initial register frame.
/// Tasks given less overflow the first time they're switched to.
pub const MIN_STACK_WORDS: usize = 64;

/// Bytes of heap charged per task for its control block.
pub const TCB_BYTES: usize = 96;

/// Heap allocations are rounded up to this.
const HEAP_ALIGN: usize = 8;

/// Called, in the overflowing task's context, with the task's name. Returns
/// the exit code for the run.
pub type StackOverflowHook = fn(&str) -> i32;

/// Board and kernel parameters.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Device address of the start of the kernel heap.
    pub heap_base: u32,
    pub heap_size: usize,
    /// Register block of the console UART, if the board has one.
    pub uart: Option<Aperture>,
    /// Register block of the GPIO controller driving the LEDs.
    pub gpio: Option<Aperture>,
    /// Whether the RGB LED is fitted.
    pub leds: bool,
    pub stack_overflow_hook: Option<StackOverflowHook>,
}

/// Why the scheduler stopped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopReason {
    /// A privileged task ended the scheduler.
    Ended,
    /// A task exited with a code.
    Exited(i32),
    /// A task faulted.
    Faulted { task: TaskId, fault: Fault },
    /// Every task is blocked with nothing left to wake it.
    Stalled,
}

impl StopReason {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ended => 0,
            Self::Exited(code) => code,
            Self::Faulted { .. } | Self::Stalled => 1,
        }
    }
}

/// The result of running the scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Outcome {
    pub reason: StopReason,
    /// Tick count when the scheduler stopped.
    pub ticks: Timestamp,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct LedState {
    pub(crate) lit: bool,
    pub(crate) changes: u32,
}

pub(crate) struct State {
    pub(crate) config: KernelConfig,
    pub(crate) tasks: Vec<Task>,
    pub(crate) queues: Vec<Queue>,
    pub(crate) now: Timestamp,
    pub(crate) leds: [LedState; 3],
    pub(crate) interrupts_masked: bool,
    pub(crate) console: Box<dyn Write + Send>,
    heap_used: usize,
    /// Task holding the CPU.
    current: Option<usize>,
    /// Task most recently given the CPU, where the next scan starts.
    previous: usize,
    stop: Option<StopReason>,
}

impl State {
    fn allocate(&mut self, bytes: usize) -> Result<u32, OutOfMemory> {
        let rounded = bytes.next_multiple_of(HEAP_ALIGN);
        let available = self.config.heap_size - self.heap_used;
        if rounded > available {
            ringbuf_entry_root!(Trace::AllocFailed { bytes });
            return Err(OutOfMemory {
                requested: bytes,
                available,
            });
        }
        let base = self.config.heap_base.wrapping_add(self.heap_used as u32);
        self.heap_used += rounded;
        ringbuf_entry_root!(Trace::Allocated { base, bytes });
        Ok(base)
    }

    /// Picks the task to run next, advancing time if nothing is runnable.
    fn select(&mut self) -> Result<usize, StopReason> {
        loop {
            if let Some(next) =
                priority_scan(self.previous, &self.tasks, Task::is_runnable)
            {
                if self.current != Some(next) {
                    ringbuf_entry_root!(Trace::Switch(next));
                }
                self.previous = next;
                self.current = Some(next);
                return Ok(next);
            }

            // Idle. Jump to the earliest deadline, unless the tick is masked.
            let deadline = self.tasks.iter().filter_map(Task::deadline).min();
            let Some(deadline) = deadline.filter(|_| !self.interrupts_masked)
            else {
                return Err(StopReason::Stalled);
            };
            self.now = self.now.max(deadline);
            ringbuf_entry_root!(Trace::Tick(self.now));
            let now = self.now;
            for t in &mut self.tasks {
                if t.deadline().is_some_and(|d| d <= now) {
                    t.set_healthy_state(SchedState::Runnable);
                }
            }
        }
    }

    /// Records why the system stopped. The first reason sticks.
    pub(crate) fn stop(&mut self, reason: StopReason) {
        if self.stop.is_none() {
            ringbuf_entry_root!(Trace::Stopped(reason));
            self.stop = Some(reason);
        }
        self.current = None;
    }
}

pub(crate) struct Shared {
    state: Mutex<State>,
    /// Signalled whenever the CPU changes hands or the system stops.
    pub(crate) turn: Condvar,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gives up the CPU to whichever task should have it, which may be `me`
    /// again, and waits until it's `me`'s turn.
    pub(crate) fn switch<'a>(
        &'a self,
        mut st: MutexGuard<'a, State>,
        me: usize,
    ) -> MutexGuard<'a, State> {
        if let Err(reason) = st.select() {
            st.stop(reason);
        }
        self.turn.notify_all();
        self.wait_turn(st, me)
    }

    /// Waits until `me` holds the CPU. If the system stops first, unwinds the
    /// calling task thread instead of returning.
    fn wait_turn<'a>(
        &'a self,
        mut st: MutexGuard<'a, State>,
        me: usize,
    ) -> MutexGuard<'a, State> {
        while st.stop.is_none() && st.current != Some(me) {
            st = self.turn.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
        if st.stop.is_some() {
            drop(st);
            halt();
        }
        st
    }
}

/// Unwind payload used to retire task threads once the system stops.
struct Halt;

/// Abandons the calling task thread. The thread's wrapper catches this.
pub(crate) fn halt() -> ! {
    panic::resume_unwind(Box::new(Halt))
}

/// Body of each task's host thread.
fn run_task(shared: Arc<Shared>, me: usize) {
    sys::install(Context {
        shared: shared.clone(),
        task: Some(me),
    });

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut st = shared.wait_turn(shared.lock(), me);
        let first = !st.tasks[me].mark_started();
        let desc = st.tasks[me].descriptor();
        let (entry, parameter) = (desc.entry, desc.parameter);
        let overflow = first && desc.stack.words < MIN_STACK_WORDS;
        let stack_base = desc.stack.base;
        let name = desc.name.clone();
        let hook = st.config.stack_overflow_hook;
        drop(st);

        if overflow {
            match hook {
                Some(hook) => sys::exit(hook(&name)),
                None => sys::fault_current(Fault::StackOverflow {
                    address: stack_base,
                }),
            }
        }

        entry(parameter);

        // The task returned. It won't run again; pass the CPU along.
        st = shared.lock();
        st.tasks[me].set_healthy_state(SchedState::Stopped);
        if let Err(reason) = st.select() {
            st.stop(reason);
        }
        shared.turn.notify_all();
    }));

    if let Err(payload) = result {
        if !payload.is::<Halt>() {
            // The task itself panicked. It still holds the CPU.
            let _ = panic::catch_unwind(|| sys::fault_current(Fault::Panicked));
        }
    }
}

/// The simulated kernel.
///
/// Creating one binds the calling thread to it as the boot context. Set up
/// queues and tasks from there, then call [`Kernel::start_scheduler`].
pub struct Kernel {
    shared: Arc<Shared>,
}

impl Kernel {
    pub fn new(config: KernelConfig, console: Box<dyn Write + Send>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                config,
                tasks: Vec::new(),
                queues: Vec::new(),
                now: Timestamp::ZERO,
                leds: [LedState::default(); 3],
                interrupts_masked: false,
                console,
                heap_used: 0,
                current: None,
                previous: 0,
                stop: None,
            }),
            turn: Condvar::new(),
        });
        sys::install(Context {
            shared: shared.clone(),
            task: None,
        });
        Self { shared }
    }

    /// Creates a queue holding up to `length` items, charging its storage to
    /// the heap.
    pub fn create_queue(&mut self, length: usize) -> Result<QueueId, OutOfMemory> {
        let mut st = self.shared.lock();
        st.allocate(Queue::footprint(length))?;
        st.queues.push(Queue::new(length));
        Ok(QueueId(st.queues.len() - 1))
    }

    /// Runs tasks until something stops the scheduler, and reports what it
    /// was.
    ///
    /// The task with the most important priority runs first. Calling this
    /// again after it has returned reports the same outcome without running
    /// anything.
    pub fn start_scheduler(&mut self) -> Outcome {
        let count = self.shared.lock().tasks.len();
        let threads: Vec<_> = (0..count)
            .map(|i| {
                let shared = self.shared.clone();
                thread::spawn(move || run_task(shared, i))
            })
            .collect();

        let mut st = self.shared.lock();
        ringbuf_entry_root!(Trace::Started { tasks: count });
        if st.stop.is_none() {
            // Act like we're scheduling after the last task, so the scan
            // starts from 0.
            st.previous = count.saturating_sub(1);
            if let Err(reason) = st.select() {
                st.stop(reason);
            }
        }
        self.shared.turn.notify_all();

        let reason = loop {
            if let Some(reason) = st.stop {
                break reason;
            }
            st = self
                .shared
                .turn
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        };
        let ticks = st.now;
        drop(st);

        for t in threads {
            // Task threads catch their own unwinds.
            let _ = t.join();
        }
        Outcome { reason, ticks }
    }

    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.shared.lock().tasks.get(task.0).map(|t| *t.state())
    }

    pub fn led_lit(&self, led: Led) -> bool {
        self.shared.lock().leds[led as usize].lit
    }

    /// How many times `led` has been written.
    pub fn led_changes(&self, led: Led) -> u32 {
        self.shared.lock().leds[led as usize].changes
    }

    pub fn heap_free(&self) -> usize {
        let st = self.shared.lock();
        st.config.heap_size - st.heap_used
    }
}

impl StackPool for Kernel {
    fn allocate_stack(&mut self, words: usize) -> Option<Stack> {
        let bytes = words * core::mem::size_of::<StackWord>();
        let base = self.shared.lock().allocate(bytes).ok()?;
        Some(Stack { base, words })
    }
}

impl Scheduler for Kernel {
    type Handle = TaskId;

    fn create_restricted(&mut self, task: TaskDesc) -> Option<TaskId> {
        let mut st = self.shared.lock();
        if st.stop.is_some() || st.current.is_some() {
            return None;
        }
        st.allocate(TCB_BYTES).ok()?;
        st.tasks.push(Task::from_descriptor(task));
        Some(TaskId(st.tasks.len() - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Capture;
    use crate::sys::{
        delay_until, end_scheduler, led_toggle, queue_receive, queue_send,
        raise_privilege, tick_count, uart_write,
    };
    use pmp::info::{ProtectionInfo, RawInfo};
    use pmp::plan::{build_task_regions, DataSegment};
    use pmp::provision::{provision, Priority, TaskEntry, TaskParams};

    const UART: Aperture = Aperture {
        base: 0x1001_3000,
        size: 0x1000,
    };
    const GPIO: Aperture = Aperture {
        base: 0x1001_2000,
        size: 0x1000,
    };
    const DATA: DataSegment = DataSegment {
        start: 0x8000_1000,
        end: 0x8000_2000,
    };

    fn config() -> KernelConfig {
        KernelConfig {
            heap_base: 0x8000_4000,
            heap_size: 0x4000,
            uart: Some(UART),
            gpio: Some(GPIO),
            leds: true,
            stack_overflow_hook: None,
        }
    }

    fn info() -> ProtectionInfo {
        ProtectionInfo::validate(RawInfo {
            entry_count: 8,
            granularity: 4,
        })
        .unwrap()
    }

    fn spawn(
        k: &mut Kernel,
        name: &str,
        entry: TaskEntry,
        parameter: usize,
        priority: u8,
        uses: &[Aperture],
    ) -> TaskId {
        let info = info();
        let uses: Vec<_> = uses.iter().copied().map(Some).collect();
        let regions = build_task_regions(&info, DATA, &uses).unwrap();
        provision(
            k,
            &info,
            TaskParams {
                name,
                entry,
                parameter,
                priority: Priority(priority),
                stack_depth: 0x100,
            },
            regions,
        )
        .unwrap()
    }

    fn echo(q: usize) {
        loop {
            let v = queue_receive(QueueId(q));
            uart_write(format!("got {v}\n").as_bytes());
        }
    }

    fn count_to_three(q: usize) {
        let mut wake = tick_count();
        for v in 1..=3 {
            delay_until(&mut wake, 10);
            queue_send(QueueId(q), v).unwrap();
        }
        raise_privilege();
        end_scheduler();
    }

    #[test]
    fn producer_consumer_runs_to_completion() {
        let out = Capture::new();
        let mut k = Kernel::new(config(), Box::new(out.clone()));
        let q = k.create_queue(1).unwrap();
        spawn(&mut k, "rx", echo, q.0, 1, &[UART]);
        spawn(&mut k, "tx", count_to_three, q.0, 2, &[]);

        let outcome = k.start_scheduler();
        assert_eq!(outcome.reason, StopReason::Ended);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.ticks, Timestamp::from(30));
        assert_eq!(out.text(), "got 1\ngot 2\ngot 3\n");
    }

    fn shout(_: usize) {
        uart_write(b"hello\n");
    }

    #[test]
    fn uart_without_region_faults() {
        let out = Capture::new();
        let mut k = Kernel::new(config(), Box::new(out.clone()));
        let t = spawn(&mut k, "loud", shout, 0, 1, &[GPIO]);

        let outcome = k.start_scheduler();
        assert_eq!(
            outcome.reason,
            StopReason::Faulted {
                task: t,
                fault: Fault::MemoryAccess {
                    address: UART.base
                },
            }
        );
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(out.text(), "");
    }

    fn quit_early(_: usize) {
        end_scheduler();
    }

    #[test]
    fn unprivileged_end_scheduler_faults() {
        let mut k = Kernel::new(config(), Box::new(Capture::new()));
        let t = spawn(&mut k, "quitter", quit_early, 0, 1, &[]);
        let outcome = k.start_scheduler();
        assert_eq!(
            outcome.reason,
            StopReason::Faulted {
                task: t,
                fault: Fault::PrivilegeRequired
            }
        );
    }

    #[test]
    fn everyone_waiting_is_a_stall() {
        let mut k = Kernel::new(config(), Box::new(Capture::new()));
        let q = k.create_queue(1).unwrap();
        spawn(&mut k, "rx", echo, q.0, 1, &[UART]);
        let outcome = k.start_scheduler();
        assert_eq!(outcome.reason, StopReason::Stalled);
        assert_eq!(outcome.exit_code(), 1);
    }

    fn blink(_: usize) {
        for _ in 0..3 {
            led_toggle(Led::Green);
        }
        raise_privilege();
        end_scheduler();
    }

    #[test]
    fn leds_need_the_gpio_region() {
        let mut k = Kernel::new(config(), Box::new(Capture::new()));
        spawn(&mut k, "blink", blink, 0, 1, &[GPIO]);
        assert_eq!(k.start_scheduler().reason, StopReason::Ended);
        assert!(k.led_lit(Led::Green));
        assert_eq!(k.led_changes(Led::Green), 3);

        let mut k = Kernel::new(config(), Box::new(Capture::new()));
        spawn(&mut k, "blink", blink, 0, 1, &[]);
        assert!(matches!(
            k.start_scheduler().reason,
            StopReason::Faulted { .. }
        ));
        assert!(!k.led_lit(Led::Green));
    }

    fn explode(_: usize) {
        panic!("boom");
    }

    #[test]
    fn task_panic_is_a_fault() {
        let mut k = Kernel::new(config(), Box::new(Capture::new()));
        let t = spawn(&mut k, "boom", explode, 0, 1, &[]);
        let outcome = k.start_scheduler();
        assert_eq!(
            outcome.reason,
            StopReason::Faulted {
                task: t,
                fault: Fault::Panicked
            }
        );
        assert!(matches!(
            k.task_state(t),
            Some(TaskState::Faulted {
                fault: Fault::Panicked,
                ..
            })
        ));
    }

    #[test]
    fn heap_runs_out() {
        let mut k = Kernel::new(
            KernelConfig {
                heap_size: 0x200,
                ..config()
            },
            Box::new(Capture::new()),
        );
        assert!(k.create_queue(1).is_ok());
        assert!(k.allocate_stack(0x100).is_none());
        assert_eq!(k.heap_free(), 0x200 - 88);
    }

    fn overflow_hook(name: &str) -> i32 {
        uart_write(format!("overflow in {name}\n").as_bytes());
        3
    }

    #[test]
    fn small_stack_calls_the_hook() {
        let out = Capture::new();
        let mut k = Kernel::new(
            KernelConfig {
                stack_overflow_hook: Some(overflow_hook),
                ..config()
            },
            Box::new(out.clone()),
        );
        let info = info();
        let regions = build_task_regions(&info, DATA, &[Some(UART)]).unwrap();
        provision(
            &mut k,
            &info,
            TaskParams {
                name: "tiny",
                entry: shout,
                parameter: 0,
                priority: Priority(1),
                stack_depth: 8,
            },
            regions,
        )
        .unwrap();

        let outcome = k.start_scheduler();
        assert_eq!(outcome.reason, StopReason::Exited(3));
        assert_eq!(out.text(), "overflow in tiny\n");
    }
}
