use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs for a rotation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowOptions {
    /// Run the SanityTest phase.
    pub run_sanity_tests: bool,
    /// Leave retired material in place.
    pub skip_cleanup: bool,
    /// Bound on each provider call.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Bound on the whole attempt. No new action starts once it is spent.
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            run_sanity_tests: true,
            skip_cleanup: false,
            call_timeout: Duration::from_secs(5 * 60),
            attempt_timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let opts: WorkflowOptions =
            serde_json::from_str(r#"{"skip_cleanup": true, "call_timeout": "10s"}"#).unwrap();
        assert!(opts.skip_cleanup);
        assert!(opts.run_sanity_tests);
        assert_eq!(opts.call_timeout, Duration::from_secs(10));
        assert_eq!(opts.attempt_timeout, Duration::from_secs(1800));
    }
}
