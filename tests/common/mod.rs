#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

pub use stackdag_test_utils::{init_tracing, with_timeout};

use stackdag::engine::EngineOptions;
use stackdag::task::{RetryPolicy, RunnerOptions};

/// Path of a file under `tests/fixtures`.
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Engine options with millisecond polling so tests stay fast.
pub fn fast_options() -> EngineOptions {
    EngineOptions {
        runner: RunnerOptions {
            poll_interval: Duration::from_millis(1),
            max_poll_interval: Duration::from_millis(5),
            backoff_factor: 1.5,
            timeout: Some(Duration::from_secs(2)),
        },
        retry: RetryPolicy::none(),
        ..Default::default()
    }
}
