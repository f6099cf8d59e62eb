// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fatal-error hooks.
//!
//! These can run in an unprivileged task, so each starts by getting back to
//! machine mode. Each returns the run's exit code for the caller to end with.

use kern::arch::Port;
use kern::sys::{led_set, uart_write, Led};
use pmp::escalate::{enter_fatal, FatalHook};

fn fatal(hook: FatalHook, message: &str) -> i32 {
    enter_fatal(&mut Port, hook);
    uart_write(message.as_bytes());
    led_set(Led::Red, true);
    hook.exit_code()
}

/// The heap couldn't satisfy an allocation.
pub fn malloc_failed() -> i32 {
    fatal(FatalHook::MallocFailed, "ERROR malloc \r\n")
}

/// `task` ran off the end of its stack.
pub fn stack_overflow(task: &str) -> i32 {
    let message = format!("ERROR Stack overflow on func: {task}\r\n");
    fatal(FatalHook::StackOverflow, &message)
}

/// Something the demo relies on didn't hold.
pub fn assert_failed() -> i32 {
    fatal(FatalHook::AssertFailed, "")
}
