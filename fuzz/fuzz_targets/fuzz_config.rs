//! Fuzz target for engine configuration parsing.
//!
//! This tests that deserializing and validating arbitrary JSON never
//! panics, and that a validated config yields a usable retry policy.

#![no_main]

use aggregator_engine::config::EngineConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(config) = serde_json::from_slice::<EngineConfig>(data) else {
        return;
    };

    if config.validate().is_ok() {
        assert!(config.batch_size > 0);
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, config.retries);
        assert!(retry.delay_for_attempt(config.retries) <= retry.max_delay);
    }
});
