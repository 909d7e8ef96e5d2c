use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How often a scheduled task runs.
///
/// Parsed once from a cron-style string at registration. Only `*/N` in the
/// minutes or hours field is honored; anything else runs hourly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntervalSpec {
    EveryMinutes { n: u32 },
    EveryHours { n: u32 },
    Hourly,
}

impl IntervalSpec {
    /// Parse the restricted cron subset, degrading to `Hourly`.
    pub fn parse(expr: &str) -> Self {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let step = |field: Option<&&str>| -> Option<u32> {
            field
                .and_then(|f| f.strip_prefix("*/"))
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0)
        };

        if let Some(n) = step(fields.first()) {
            return IntervalSpec::EveryMinutes { n };
        }
        if let Some(n) = step(fields.get(1)) {
            return IntervalSpec::EveryHours { n };
        }

        warn!(expr, "Unsupported schedule expression, running hourly");
        IntervalSpec::Hourly
    }

    pub fn period(&self) -> Duration {
        match self {
            IntervalSpec::EveryMinutes { n } => Duration::minutes(i64::from(*n)),
            IntervalSpec::EveryHours { n } => Duration::hours(i64::from(*n)),
            IntervalSpec::Hourly => Duration::hours(1),
        }
    }

    /// A task that never ran is always due.
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_run {
            None => true,
            Some(last) => now - last >= self.period(),
        }
    }
}

impl std::fmt::Display for IntervalSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntervalSpec::EveryMinutes { n: 1 } => write!(f, "every minute"),
            IntervalSpec::EveryMinutes { n } => write!(f, "every {} minutes", n),
            IntervalSpec::EveryHours { n: 1 } | IntervalSpec::Hourly => write!(f, "every hour"),
            IntervalSpec::EveryHours { n } => write!(f, "every {} hours", n),
        }
    }
}
