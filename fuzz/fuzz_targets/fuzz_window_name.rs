//! Fuzz target for named window resolution.
//!
//! This tests that `DateWindow::from_name` never panics on arbitrary names
//! and dates, and that every window it returns is well formed.

#![no_main]

use aggregator_engine::window::DateWindow;
use chrono::NaiveDate;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, i32)| {
    let (name, days_from_ce) = data;
    let Some(today) = NaiveDate::from_num_days_from_ce_opt(days_from_ce) else {
        return;
    };

    // Should never panic
    if let Ok(window) = DateWindow::from_name(name, today) {
        assert!(window.start() <= window.end());
        assert!(window.end() <= today);
        assert!(window.overlaps(&window));
    }
});
