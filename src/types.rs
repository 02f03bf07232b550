use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// What the scheduler does with not-yet-started nodes once a node fails.
///
/// - `SkipDependents`: only nodes that (transitively) wait on the failed node
///   are skipped; independent siblings keep being scheduled (default).
/// - `StopAll`: no new node of any kind is started after the first failure.
///   Nodes that are already running are always allowed to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    SkipDependents,
    StopAll,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip_dependents" => Ok(FailurePolicy::SkipDependents),
            "stop_all" => Ok(FailurePolicy::StopAll),
            other => Err(format!(
                "invalid on_failure: {other} (expected \"skip_dependents\" or \"stop_all\")"
            )),
        }
    }
}

/// Parse a duration like `"200ms"`, `"3s"`, `"5m"` or `"1h"`.
///
/// The unit is mandatory. Values that overflow are rejected.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = (&s[..split], s[split..].trim());

    if digits.is_empty() {
        return Err(format!("duration '{s}' must start with a number"));
    }
    if unit.is_empty() {
        return Err(format!("duration '{s}' has no unit (ms, s, m or h)"));
    }

    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration number '{digits}': {e}"))?;
    let millis_per_unit: u64 = match unit.to_ascii_lowercase().as_str() {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        other => return Err(format!("unknown duration unit '{other}' (ms, s, m or h)")),
    };

    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
