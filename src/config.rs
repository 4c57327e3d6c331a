//! Service configuration (env-driven).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::model::ObjectiveOptions;
use crate::solver::{DEFAULT_TIME_BUDGET, SolveSettings};

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,

    /// Directory holding one result record per job.
    pub results_dir: PathBuf,

    /// Keep results in memory only; they are lost on restart.
    pub ephemeral_results: bool,

    /// Jobs allowed to solve at the same time.
    pub max_concurrent_jobs: usize,

    /// Budget for jobs that do not bring their own.
    pub time_budget: Duration,

    /// How long finished results are kept.
    pub result_retention: Duration,

    /// How often stale results are purged.
    pub janitor_interval: Duration,

    /// Whether preference lists feed the objective.
    pub preference_penalty: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = parsed(&lookup, "ALLOCATOR_BIND_ADDR")?
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));

        let results_dir = lookup("ALLOCATOR_RESULTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("results"));

        let ephemeral_results = flag(&lookup, "ALLOCATOR_EPHEMERAL_RESULTS").unwrap_or(false);

        let max_concurrent_jobs = parsed::<usize>(&lookup, "ALLOCATOR_MAX_CONCURRENT_JOBS")?
            .unwrap_or(2)
            .max(1);

        let time_budget = match parsed::<f64>(&lookup, "ALLOCATOR_TIME_BUDGET_SECS")? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|d| !d.is_zero())
                .context("ALLOCATOR_TIME_BUDGET_SECS must be a positive number of seconds.")?,
            None => DEFAULT_TIME_BUDGET,
        };

        let result_retention = Duration::from_secs(
            parsed(&lookup, "ALLOCATOR_RESULT_RETENTION_SECS")?.unwrap_or(86_400),
        );

        let janitor_interval = Duration::from_secs(
            parsed::<u64>(&lookup, "ALLOCATOR_JANITOR_INTERVAL_SECS")?
                .unwrap_or(600)
                .max(1),
        );

        let preference_penalty = flag(&lookup, "ALLOCATOR_PREFERENCE_PENALTY").unwrap_or(true);

        Ok(Self {
            bind_addr,
            results_dir,
            ephemeral_results,
            max_concurrent_jobs,
            time_budget,
            result_retention,
            janitor_interval,
            preference_penalty,
        })
    }

    pub fn solve_settings(&self) -> SolveSettings {
        SolveSettings {
            time_budget: self.time_budget,
            objective: ObjectiveOptions {
                preference_penalty: self.preference_penalty,
                stability_scale: None,
            },
        }
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|v| v.parse::<T>())
        .transpose()
        .with_context(|| format!("{key} has an invalid value."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.results_dir, PathBuf::from("results"));
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.time_budget, Duration::from_secs(55));
        assert!(config.preference_penalty);
        assert!(!config.ephemeral_results);
        assert_eq!(config.solve_settings(), SolveSettings::default());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("ALLOCATOR_BIND_ADDR", "0.0.0.0:9000"),
            ("ALLOCATOR_MAX_CONCURRENT_JOBS", "0"),
            ("ALLOCATOR_TIME_BUDGET_SECS", "2.5"),
            ("ALLOCATOR_PREFERENCE_PENALTY", "false"),
            ("ALLOCATOR_EPHEMERAL_RESULTS", "1"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert!(config.ephemeral_results);
        assert_eq!(config.time_budget, Duration::from_millis(2500));
        assert!(!config.solve_settings().objective.preference_penalty);
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = config(&[("ALLOCATOR_MAX_CONCURRENT_JOBS", "many")]).unwrap_err();
        assert!(err.to_string().contains("ALLOCATOR_MAX_CONCURRENT_JOBS"));

        assert!(config(&[("ALLOCATOR_TIME_BUDGET_SECS", "0")]).is_err());
        assert!(config(&[("ALLOCATOR_TIME_BUDGET_SECS", "-3")]).is_err());
    }
}
