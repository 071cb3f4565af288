use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::models::TimeGranularity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub dedup: DedupConfig,
    pub counting: CountingConfig,
    pub log: LogConfig,
    pub drain_timeout_ms: u64,
    /// Values that were not understood and replaced by their default.
    /// Loading happens before logging exists, so `main` reports these later.
    #[serde(skip)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Access log to tail
    pub path: String,
    /// Number of parser workers, also the capacity of every queue
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub start_at_end: bool,
    pub open_retries: u32,
    pub open_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    pub backend: DedupBackend,
    pub redis_url: String,
    pub key_prefix: String,
    pub ttl_secs: u64,
    pub probe_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountingConfig {
    pub empty_records: EmptyRecordPolicy,
    pub dedup_failure: DedupFailurePolicy,
    pub time_bucket: TimeGranularity,
}

/// What parser workers do with events that have no route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyRecordPolicy {
    /// Count them under the empty route
    Forward,
    /// Discard them before they reach the counters
    Drop,
}

/// What the UV counter does when the dedup store call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupFailurePolicy {
    /// Skip the event; UV may undercount but never overcounts
    FailClosed,
    /// Count the event as a new visitor
    FailOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Append diagnostics to this file instead of stderr
    pub diag_path: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        let choice = |name: &str, default: &str| var(name, default).trim().to_lowercase().replace('-', "_");
        let mut warnings = Vec::new();

        let workers = parse_var::<usize>(&lookup, "DIG_WORKERS", 5)?;
        if workers == 0 {
            bail!("DIG_WORKERS must be at least 1");
        }

        let backend = match choice("DIG_DEDUP_BACKEND", "redis").as_str() {
            "redis" => DedupBackend::Redis,
            "memory" => DedupBackend::Memory,
            other => {
                warnings.push(format!(
                    "Unknown DIG_DEDUP_BACKEND '{other}', falling back to 'redis'. Supported values: redis, memory"
                ));
                DedupBackend::Redis
            }
        };

        let empty_records = match choice("DIG_EMPTY_RECORDS", "forward").as_str() {
            "forward" => EmptyRecordPolicy::Forward,
            "drop" => EmptyRecordPolicy::Drop,
            other => {
                warnings.push(format!(
                    "Unknown DIG_EMPTY_RECORDS '{other}', falling back to 'forward'. Supported values: forward, drop"
                ));
                EmptyRecordPolicy::Forward
            }
        };

        let dedup_failure = match choice("DIG_DEDUP_FAILURE", "fail_closed").as_str() {
            "fail_closed" | "closed" => DedupFailurePolicy::FailClosed,
            "fail_open" | "open" => DedupFailurePolicy::FailOpen,
            other => {
                warnings.push(format!(
                    "Unknown DIG_DEDUP_FAILURE '{other}', falling back to 'fail_closed'. Supported values: fail_closed, fail_open"
                ));
                DedupFailurePolicy::FailClosed
            }
        };

        let time_bucket = match choice("DIG_TIME_BUCKET", "hour").as_str() {
            "day" => TimeGranularity::Day,
            "hour" => TimeGranularity::Hour,
            "minute" => TimeGranularity::Minute,
            "second" => TimeGranularity::Second,
            other => {
                warnings.push(format!(
                    "Unknown DIG_TIME_BUCKET '{other}', falling back to 'hour'. Supported values: day, hour, minute, second"
                ));
                TimeGranularity::Hour
            }
        };

        let start_at_end = lookup("DIG_TAIL_FROM_END")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        Ok(Config {
            source: SourceConfig {
                path: var("DIG_LOG_PATH", "./dig.log"),
                workers,
                poll_interval_ms: parse_var(&lookup, "DIG_TAIL_POLL_MS", 3000)?,
                start_at_end,
                open_retries: parse_var(&lookup, "DIG_OPEN_RETRIES", 5)?,
                open_backoff_ms: parse_var(&lookup, "DIG_OPEN_BACKOFF_MS", 500)?,
            },
            dedup: DedupConfig {
                backend,
                redis_url: var("REDIS_URL", "redis://127.0.0.1:6379"),
                key_prefix: var("DIG_DEDUP_PREFIX", "uv_hpll_"),
                ttl_secs: parse_var(&lookup, "DIG_DEDUP_TTL_SECS", 86400)?,
                probe_interval_secs: parse_var(&lookup, "DIG_PROBE_INTERVAL_SECS", 3)?,
            },
            counting: CountingConfig {
                empty_records,
                dedup_failure,
                time_bucket,
            },
            log: LogConfig {
                level: var("DIG_LOG_LEVEL", "info"),
                diag_path: lookup("DIG_DIAG_LOG").filter(|p| !p.is_empty()),
            },
            drain_timeout_ms: parse_var(&lookup, "DIG_DRAIN_TIMEOUT_MS", 5000)?,
            warnings,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.source.path, "./dig.log");
        assert_eq!(config.source.workers, 5);
        assert_eq!(config.source.poll_interval_ms, 3000);
        assert!(!config.source.start_at_end);
        assert_eq!(config.dedup.backend, DedupBackend::Redis);
        assert_eq!(config.dedup.key_prefix, "uv_hpll_");
        assert_eq!(config.dedup.ttl_secs, 86400);
        assert_eq!(config.dedup.probe_interval_secs, 3);
        assert_eq!(config.counting.empty_records, EmptyRecordPolicy::Forward);
        assert_eq!(config.counting.dedup_failure, DedupFailurePolicy::FailClosed);
        assert_eq!(config.counting.time_bucket, TimeGranularity::Hour);
        assert_eq!(config.log.level, "info");
        assert!(config.log.diag_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DIG_LOG_PATH", "/var/log/nginx/dig.log"),
            ("DIG_WORKERS", "8"),
            ("DIG_TAIL_FROM_END", "yes"),
            ("DIG_DEDUP_BACKEND", "memory"),
            ("DIG_EMPTY_RECORDS", "drop"),
            ("DIG_DEDUP_FAILURE", "fail_open"),
            ("DIG_TIME_BUCKET", "minute"),
            ("DIG_DIAG_LOG", "/tmp/digstat.log"),
        ])
        .unwrap();

        assert_eq!(config.source.path, "/var/log/nginx/dig.log");
        assert_eq!(config.source.workers, 8);
        assert!(config.source.start_at_end);
        assert_eq!(config.dedup.backend, DedupBackend::Memory);
        assert_eq!(config.counting.empty_records, EmptyRecordPolicy::Drop);
        assert_eq!(config.counting.dedup_failure, DedupFailurePolicy::FailOpen);
        assert_eq!(config.counting.time_bucket, TimeGranularity::Minute);
        assert_eq!(config.log.diag_path.as_deref(), Some("/tmp/digstat.log"));
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = config_from(&[("DIG_TAIL_POLL_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("DIG_TAIL_POLL_MS"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(config_from(&[("DIG_WORKERS", "0")]).is_err());
    }

    #[test]
    fn test_unknown_policy_falls_back() {
        let config = config_from(&[("DIG_EMPTY_RECORDS", "maybe")]).unwrap();
        assert_eq!(config.counting.empty_records, EmptyRecordPolicy::Forward);
        assert_eq!(config.warnings.len(), 1);
        assert!(config.warnings[0].contains("DIG_EMPTY_RECORDS 'maybe'"));
    }

    #[test]
    fn test_fallbacks_are_recorded() {
        let config = config_from(&[
            ("DIG_DEDUP_FAILURE", "sometimes"),
            ("DIG_TIME_BUCKET", "week"),
        ])
        .unwrap();
        assert_eq!(config.counting.dedup_failure, DedupFailurePolicy::FailClosed);
        assert_eq!(config.counting.time_bucket, TimeGranularity::Hour);
        assert_eq!(config.warnings.len(), 2);
        assert!(config.warnings.iter().any(|w| w.contains("DIG_DEDUP_FAILURE 'sometimes'")));
        assert!(config.warnings.iter().any(|w| w.contains("DIG_TIME_BUCKET 'week'")));

        assert!(config_from(&[]).unwrap().warnings.is_empty());
    }

    #[test]
    fn test_hyphenated_policy_names() {
        let config = config_from(&[
            ("DIG_DEDUP_FAILURE", "Fail-Open"),
            ("DIG_EMPTY_RECORDS", " drop "),
        ])
        .unwrap();
        assert_eq!(config.counting.dedup_failure, DedupFailurePolicy::FailOpen);
        assert_eq!(config.counting.empty_records, EmptyRecordPolicy::Drop);
        assert!(config.warnings.is_empty());
    }
}
