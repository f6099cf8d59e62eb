// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.

use pmp::descs::RegionAttributes;
use pmp::provision::{Priority, TaskDesc};

use crate::err::Fault;
use crate::queue::QueueId;
use crate::time::Timestamp;

/// Names a task by its position in the task table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskId(pub usize);

/// The privilege level a task is currently executing at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    /// Confined to the entries in the task's descriptor.
    User,
    /// Unconstrained. Tasks only get here by asking.
    Machine,
}

/// Scheduler parameters for a healthy task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedState {
    /// This task could be scheduled on the CPU.
    Runnable,
    /// This task is waiting for time to reach the given deadline.
    InDelay(Timestamp),
    /// This task is blocked waiting for something to arrive in the queue.
    InRecv(QueueId),
    /// This task returned from its entry point and won't run again.
    Stopped,
}

/// State used to make scheduling decisions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Task is healthy and can be scheduled subject to the `SchedState`
    /// requirements.
    Healthy(SchedState),
    /// Task has been stopped by a fault and must not be scheduled again.
    Faulted {
        fault: Fault,
        /// Record of the previous healthy state at the time the fault was
        /// taken.
        original_state: SchedState,
    },
}

impl From<SchedState> for TaskState {
    fn from(s: SchedState) -> Self {
        Self::Healthy(s)
    }
}

/// Internal representation of a task.
#[derive(Debug)]
pub struct Task {
    desc: TaskDesc,
    state: TaskState,
    mode: Mode,
    /// Whether the task has been switched to at least once.
    started: bool,
}

impl Task {
    /// Creates a task from its descriptor. Tasks start runnable, in user
    /// mode.
    pub fn from_descriptor(desc: TaskDesc) -> Self {
        Self {
            desc,
            state: SchedState::Runnable.into(),
            mode: Mode::User,
            started: false,
        }
    }

    pub fn descriptor(&self) -> &TaskDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        self.desc.name.as_str()
    }

    pub fn priority(&self) -> Priority {
        self.desc.priority
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn set_healthy_state(&mut self, s: SchedState) {
        self.state = s.into();
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Healthy(SchedState::Runnable)
    }

    /// Returns the deadline this task is sleeping until, if it's sleeping.
    pub fn deadline(&self) -> Option<Timestamp> {
        match self.state {
            TaskState::Healthy(SchedState::InDelay(t)) => Some(t),
            _ => None,
        }
    }

    /// Marks the task as started, returning whether it already was.
    pub fn mark_started(&mut self) -> bool {
        core::mem::replace(&mut self.started, true)
    }

    /// Puts this task into a forced fault condition.
    ///
    /// If the task is already faulted, the original healthy state is kept and
    /// the newer fault replaces the older one.
    pub fn force_fault(&mut self, fault: Fault) {
        let original_state = match self.state {
            TaskState::Healthy(s) => s,
            TaskState::Faulted { original_state, .. } => original_state,
        };
        self.state = TaskState::Faulted {
            fault,
            original_state,
        };
    }

    /// Checks whether this task, in its current mode, may touch the `len`
    /// bytes at `address` with `wanted`.
    ///
    /// Machine mode isn't checked: none of the entries we build are locked.
    pub fn can_access(
        &self,
        address: u32,
        len: u32,
        wanted: RegionAttributes,
    ) -> bool {
        match self.mode {
            Mode::Machine => true,
            Mode::User => {
                let start = u64::from(address);
                self.desc.can_access(start..start + u64::from(len), wanted)
            }
        }
    }
}

/// Scans the task table to find a prioritized candidate.
///
/// Scans `tasks` for the next task, after `previous`, that satisfies `pred`. If
/// more than one task satisfies `pred`, returns the most important one. If
/// multiple tasks with the same priority satisfy `pred`, prefers the first one
/// in order after `previous`, mod `tasks.len()`. Finally, if no tasks satisfy
/// `pred`, returns `None`
///
/// This is generally the right way to search a task table, and is used to
/// implement (among other bits) the scheduler.
pub fn priority_scan(
    previous: usize,
    tasks: &[Task],
    pred: impl Fn(&Task) -> bool,
) -> Option<usize> {
    let mut pos = previous;
    let mut choice: Option<(usize, Priority)> = None;
    for _step_no in 0..tasks.len() {
        pos = pos.wrapping_add(1);
        if pos >= tasks.len() {
            pos = 0;
        }
        let t = &tasks[pos];
        if !pred(t) {
            continue;
        }

        if let Some((_, best)) = choice {
            if !t.priority().is_more_important_than(best) {
                continue;
            }
        }

        choice = Some((pos, t.priority()));
    }

    choice.map(|(i, _)| i)
}
