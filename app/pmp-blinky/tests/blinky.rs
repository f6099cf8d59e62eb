// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use kern::console::Capture;
use kern::err::Fault;
use kern::startup::StopReason;
use kern::task::TaskId;
use kern::time::Timestamp;
use pmp_blinky::config::Config;
use pmp_blinky::Report;

fn shipped() -> Config {
    Config::from_file(&Path::new(env!("CARGO_MANIFEST_DIR")).join("app.toml"))
        .unwrap()
}

fn run(config: &Config) -> (Report, String) {
    let out = Capture::new();
    let report = pmp_blinky::run(config, Box::new(out.clone())).unwrap();
    (report, out.text())
}

#[test]
fn blinks_five_times_and_ends() {
    let (report, text) = run(&shipped());

    let expected = format!(
        "PMP Demo start\r\n{}PMP Demo end\r\n",
        "Blink\r\n".repeat(5)
    );
    assert_eq!(text, expected);
    assert_eq!(report.exit_code, 0);

    let outcome = report.outcome.unwrap();
    assert_eq!(outcome.reason, StopReason::Ended);
    assert_eq!(outcome.ticks, Timestamp::from(5000));
    assert!(report.green_lit);
    assert!(!report.red_lit);
}

#[test]
fn too_few_entries_is_reported() {
    let mut config = shipped();
    config.pmp.entries = 7;
    let (report, text) = run(&config);

    assert_eq!(
        text,
        "PMP Demo start\r\nPMP Demo end - Error no enough PMP entry\r\n"
    );
    assert_eq!(report.exit_code, 0);
    assert!(report.outcome.is_none());
}

#[test]
fn coarse_granularity_is_reported() {
    let mut config = shipped();
    config.pmp.granularity = 8;
    let (report, text) = run(&config);

    assert!(text.ends_with(
        "PMP Demo end - Error platform granularity no supported\r\n"
    ));
    assert!(!text.contains("Blink"));
    assert_eq!(report.exit_code, 0);
}

#[test]
fn sub_word_granularity_runs_as_word() {
    let mut config = shipped();
    config.pmp.granularity = 2;
    config.pmp.entries = 16;
    let (report, text) = run(&config);
    assert_eq!(text.matches("Blink\r\n").count(), 5);
    assert_eq!(report.exit_code, 0);
}

#[test]
fn small_heap_fails_malloc() {
    let mut config = shipped();
    config.memory.heap_size = 4096;
    let (report, text) = run(&config);

    assert!(text.ends_with("ERROR malloc \r\n"));
    assert_eq!(report.exit_code, 1);
    assert!(report.outcome.is_none());
    assert!(report.red_lit);
}

#[test]
fn consumer_without_uart_faults() {
    let mut config = shipped();
    config.tasks.get_mut("rx").unwrap().uses.clear();
    let (report, text) = run(&config);

    assert_eq!(text, "PMP Demo start\r\n");
    assert_eq!(report.exit_code, 1);
    assert_eq!(
        report.outcome.map(|o| o.reason),
        Some(StopReason::Faulted {
            task: TaskId(0),
            fault: Fault::MemoryAccess {
                address: 0x1001_3000
            },
        })
    );
}

#[test]
fn producer_without_gpio_faults() {
    let mut config = shipped();
    config.tasks.get_mut("tx").unwrap().uses.clear();
    let (report, text) = run(&config);

    assert!(!text.contains("Blink"));
    assert!(matches!(
        report.outcome.map(|o| o.reason),
        Some(StopReason::Faulted {
            task: TaskId(1),
            ..
        })
    ));
    assert!(!report.green_lit);
}

#[test]
fn tiny_stack_overflows() {
    let mut config = shipped();
    config.tasks.get_mut("tx").unwrap().stacksize = 16;
    let (report, text) = run(&config);

    assert_eq!(
        text,
        "PMP Demo start\r\nERROR Stack overflow on func: tx\r\n"
    );
    assert_eq!(report.exit_code, 1);
    assert_eq!(
        report.outcome.map(|o| o.reason),
        Some(StopReason::Exited(1))
    );
    assert!(report.red_lit);
}

#[test]
fn missing_leds_warn_but_run() {
    let mut config = shipped();
    config.leds = false;
    let (report, text) = run(&config);

    assert!(text.starts_with(
        "At least one of LEDs is null.\r\nPMP Demo start\r\n"
    ));
    assert_eq!(text.matches("Blink\r\n").count(), 5);
    assert_eq!(report.exit_code, 0);
    assert!(!report.green_lit);
}

#[test]
fn other_values_are_reported_as_unexpected() {
    let mut config = shipped();
    config.demo.value = 7;
    let (report, text) = run(&config);

    let expected = format!(
        "PMP Demo start\r\n{}PMP Demo end\r\n",
        "Unexpected value received\r\n".repeat(5)
    );
    assert_eq!(text, expected);
    assert_eq!(report.exit_code, 0);
}

#[test]
fn queue_with_no_room_trips_the_assert_hook() {
    let mut config = shipped();
    config.kernel.queue_length = 0;
    let (report, text) = run(&config);

    assert_eq!(text, "PMP Demo start\r\n");
    assert_eq!(report.exit_code, 1);
    assert_eq!(
        report.outcome.map(|o| o.reason),
        Some(StopReason::Exited(1))
    );
    assert!(report.red_lit);
}

#[test]
fn zero_stacksize_is_a_config_error() {
    let mut config = shipped();
    config.tasks.get_mut("tx").unwrap().stacksize = 0;
    let out = Capture::new();
    let err = pmp_blinky::run(&config, Box::new(out.clone())).unwrap_err();

    assert_eq!(err.to_string(), "task tx has a zero stacksize");
    assert_eq!(out.text(), "");
}

#[test]
fn repeated_runs_in_one_process_complete() {
    for _ in 0..3 {
        let (report, _) = run(&shipped());
        assert_eq!(report.exit_code, 0);
    }
}
