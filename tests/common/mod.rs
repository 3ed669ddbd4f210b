//! Shared test utilities for engine, property and chaos tests.
//!
//! This module provides:
//! - Recording mock sources, targets and history
//! - Phase and window helpers

#![allow(dead_code)] // Each test binary uses a different subset

pub mod mock_adapters;

pub use mock_adapters::*;

use aggregator_engine::adapter::{Source, Target};
use aggregator_engine::phase::Phase;
use aggregator_engine::window::DateWindow;
use chrono::NaiveDate;
use std::sync::Arc;

/// A one-day window on 2024-03-01.
pub fn window() -> DateWindow {
    DateWindow::single(day(2024, 3, 1))
}

pub fn day(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

/// Build a phase from concrete mocks.
pub fn phase(name: &str, sources: &[Arc<MockSource>], targets: &[Arc<MockTarget>]) -> Phase {
    Phase::new(
        name,
        sources
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn Source>)
            .collect(),
        targets
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn Target>)
            .collect(),
    )
}
