// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turning a region list into a restricted task.
//!
//! The provisioner sits between region building and the scheduler. It gets a
//! stack from the pool, fences it, bundles it up with the task's regions and
//! entry point, and submits the bundle as an unprivileged task. From then on
//! the scheduler owns the descriptor.

use core::ops::Range;

use crate::check;
use crate::descs::{RegionAttributes, RegionDesc, TaskRegions};
use crate::info::ProtectionInfo;
use crate::plan::fence_pair;
use crate::{SetupError, Trace};

/// The unit a stack depth is measured in.
pub type StackWord = u32;

/// Task entry point. The argument is the task's parameter.
pub type TaskEntry = fn(usize);

/// Longest task name kept; longer names are truncated.
pub const TASK_NAME_LEN: usize = 16;

pub type TaskName = heapless::String<TASK_NAME_LEN>;

/// Indicates priority of a task.
///
/// Priorities are small numbers starting from zero. Numerically lower
/// priorities are more important, so Priority 0 is the most likely to be
/// scheduled, followed by 1, and so forth.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

/// A stack handed out by a [`StackPool`]. The memory stays with the pool;
/// this only says where it is.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stack {
    /// Address of the lowest word, as the task sees it.
    pub base: u32,
    /// Depth in words.
    pub words: usize,
}

impl Stack {
    /// Address one past the highest word.
    pub fn top(&self) -> u32 {
        let bytes = self.words * core::mem::size_of::<StackWord>();
        self.base.wrapping_add(bytes as u32)
    }
}

/// Somewhere stacks come from.
pub trait StackPool {
    /// Allocates a stack of `words` words, or returns `None` if there's no room.
    fn allocate_stack(&mut self, words: usize) -> Option<Stack>;
}

/// The scheduler operation we need: creating a task that runs unprivileged,
/// confined to the entries its descriptor lists.
pub trait Scheduler {
    type Handle: Copy;

    /// Takes ownership of `task` and registers it. Returns `None` if the
    /// scheduler can't take another task.
    fn create_restricted(&mut self, task: TaskDesc) -> Option<Self::Handle>;
}

/// Everything the scheduler needs to run one restricted task.
#[derive(Debug)]
pub struct TaskDesc {
    pub name: TaskName,
    pub entry: TaskEntry,
    pub parameter: usize,
    pub priority: Priority,
    pub stack: Stack,
    /// NA4 + TOR pair granting the task its own stack.
    pub stack_fence: [RegionDesc; 2],
    pub regions: TaskRegions,
}

impl TaskDesc {
    /// All entries to load for this task, in load order: stack fence first,
    /// then the task's regions.
    pub fn entries(&self) -> impl Iterator<Item = &RegionDesc> + '_ {
        self.stack_fence.iter().chain(self.regions.iter())
    }

    /// Checks whether this task may access `range` with `wanted`, as the
    /// hardware would decide with this task's entries loaded.
    pub fn can_access(
        &self,
        range: Range<u64>,
        wanted: RegionAttributes,
    ) -> bool {
        check::can_access(self.entries(), range, wanted)
    }

    pub fn stack_range(&self) -> Range<u32> {
        self.stack.base..self.stack.top()
    }
}

/// What a task is, before it has a stack.
#[derive(Copy, Clone, Debug)]
pub struct TaskParams<'a> {
    pub name: &'a str,
    pub entry: TaskEntry,
    pub parameter: usize,
    pub priority: Priority,
    /// Stack depth in words.
    pub stack_depth: usize,
}

fn truncated_name(name: &str) -> TaskName {
    let mut out = TaskName::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Creates a restricted task running `params.entry` with access to `regions`
/// and its own stack.
///
/// Fails with [`SetupError::CreationFailed`] if `params.stack_depth` is zero,
/// the pool has no stack to give, or the scheduler refuses the task. In every
/// case the caller must not start the scheduler.
pub fn provision<S>(
    sys: &mut S,
    info: &ProtectionInfo,
    params: TaskParams<'_>,
    regions: TaskRegions,
) -> Result<S::Handle, SetupError>
where
    S: StackPool + Scheduler,
{
    if params.stack_depth == 0 {
        ringbuf_entry_root!(Trace::CreateRefused);
        return Err(SetupError::CreationFailed);
    }
    let Some(stack) = sys.allocate_stack(params.stack_depth) else {
        ringbuf_entry_root!(Trace::CreateRefused);
        return Err(SetupError::CreationFailed);
    };
    ringbuf_entry_root!(Trace::StackFence {
        base: stack.base,
        words: stack.words,
    });
    let stack_fence = fence_pair(info, stack.base, stack.top())?;

    let task = TaskDesc {
        name: truncated_name(params.name),
        entry: params.entry,
        parameter: params.parameter,
        priority: params.priority,
        stack,
        stack_fence,
        regions,
    };

    match sys.create_restricted(task) {
        Some(handle) => {
            ringbuf_entry_root!(Trace::Created {
                priority: params.priority.0
            });
            Ok(handle)
        }
        None => {
            ringbuf_entry_root!(Trace::CreateRefused);
            Err(SetupError::CreationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::RawInfo;
    use crate::plan::{build_task_regions, Aperture, DataSegment};

    const RW: RegionAttributes =
        RegionAttributes::READ.union(RegionAttributes::WRITE);

    /// Hands out stacks from a bump pointer and keeps whatever it's given.
    struct FakeSys {
        next_base: u32,
        words_left: usize,
        accept: bool,
        tasks: Vec<TaskDesc>,
    }

    impl FakeSys {
        fn new(words: usize) -> Self {
            Self {
                next_base: 0x8000_4000,
                words_left: words,
                accept: true,
                tasks: vec![],
            }
        }
    }

    impl StackPool for FakeSys {
        fn allocate_stack(&mut self, words: usize) -> Option<Stack> {
            self.words_left = self.words_left.checked_sub(words)?;
            let base = self.next_base;
            self.next_base += (words * 4) as u32;
            Some(Stack { base, words })
        }
    }

    impl Scheduler for FakeSys {
        type Handle = usize;

        fn create_restricted(&mut self, task: TaskDesc) -> Option<usize> {
            if !self.accept {
                return None;
            }
            self.tasks.push(task);
            Some(self.tasks.len() - 1)
        }
    }

    fn info() -> ProtectionInfo {
        ProtectionInfo::validate(RawInfo {
            entry_count: 8,
            granularity: 4,
        })
        .unwrap()
    }

    fn regions(info: &ProtectionInfo) -> TaskRegions {
        build_task_regions(
            info,
            DataSegment {
                start: 0x8000_1000,
                end: 0x8000_2000,
            },
            &[Some(Aperture {
                base: 0x1001_3000,
                size: 0x1000,
            })],
        )
        .unwrap()
    }

    fn params(name: &str) -> TaskParams<'_> {
        TaskParams {
            name,
            entry: |_| {},
            parameter: 7,
            priority: Priority(1),
            stack_depth: 0x80,
        }
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority(0).is_more_important_than(Priority(1)));
        assert!(!Priority(1).is_more_important_than(Priority(1)));
        assert!(!Priority(2).is_more_important_than(Priority(1)));
    }

    #[test]
    fn provisioned_task_has_fenced_stack() {
        let info = info();
        let mut sys = FakeSys::new(0x1000);
        let h = provision(&mut sys, &info, params("rx"), regions(&info))
            .unwrap();

        let task = &sys.tasks[h];
        assert_eq!(task.name.as_str(), "rx");
        assert_eq!(task.parameter, 7);
        assert_eq!(task.stack_range(), 0x8000_4000..0x8000_4200);
        assert_eq!(task.entries().count(), 5);

        assert!(task.can_access(0x8000_41fc..0x8000_4200, RW));
        assert!(!task.can_access(0x8000_4200..0x8000_4204, RW));
        assert!(task.can_access(0x8000_1800..0x8000_1804, RW));
        assert!(task.can_access(0x1001_3000..0x1001_3004, RW));
        assert!(!task.can_access(0x1001_2000..0x1001_2004, RW));
    }

    #[test]
    fn stacks_do_not_overlap() {
        let info = info();
        let mut sys = FakeSys::new(0x1000);
        let a = provision(&mut sys, &info, params("a"), regions(&info))
            .unwrap();
        let b = provision(&mut sys, &info, params("b"), regions(&info))
            .unwrap();
        let (a, b) = (&sys.tasks[a], &sys.tasks[b]);
        let a_bottom = u64::from(a.stack.base);
        let b_bottom = u64::from(b.stack.base);
        assert!(!b.can_access(a_bottom..a_bottom + 4, RW));
        assert!(!a.can_access(b_bottom..b_bottom + 4, RW));
    }

    #[test]
    fn long_names_are_truncated() {
        let info = info();
        let mut sys = FakeSys::new(0x1000);
        let h = provision(
            &mut sys,
            &info,
            params("a-name-much-longer-than-sixteen"),
            regions(&info),
        )
        .unwrap();
        assert_eq!(sys.tasks[h].name.as_str(), "a-name-much-long");
    }

    #[test]
    fn no_stack_means_no_task() {
        let info = info();
        let mut sys = FakeSys::new(0x10);
        assert_eq!(
            provision(&mut sys, &info, params("rx"), regions(&info)),
            Err(SetupError::CreationFailed)
        );
        assert!(sys.tasks.is_empty());
    }

    #[test]
    fn zero_depth_stack_is_refused_before_allocating() {
        let info = info();
        let mut sys = FakeSys::new(0x1000);
        let p = TaskParams {
            stack_depth: 0,
            ..params("rx")
        };
        assert_eq!(
            provision(&mut sys, &info, p, regions(&info)),
            Err(SetupError::CreationFailed)
        );
        assert_eq!(sys.words_left, 0x1000);
        assert_eq!(sys.next_base, 0x8000_4000);
        assert!(sys.tasks.is_empty());
    }

    #[test]
    fn refused_creation_is_reported() {
        let info = info();
        let mut sys = FakeSys::new(0x1000);
        sys.accept = false;
        assert_eq!(
            provision(&mut sys, &info, params("rx"), regions(&info)),
            Err(SetupError::CreationFailed)
        );
    }
}
