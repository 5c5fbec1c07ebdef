//! Typed, `serde`-deserializable configuration structs, one per component,
//! following the teacher's convention (`Log`, `Http` in the original) of a
//! small struct with a `Default` impl per concern plus a `Configuration`
//! umbrella that `load()`s them from file/env layers.
//!
//! The umbrella only loads the ambient concerns (logging). The audit-shaped
//! structs below (`ProbeConfig`, `FallbackModelConfig`, `SchedulerConfig`,
//! `AuditConfig`) are data shapes only: discovering and merging a
//! `config.toml`/env/CLI layer into them is the named external-collaborator
//! concern (spec §1 Non-goals), so they are assembled directly by the
//! binary rather than through `Configuration::load`.

use crate::accumulator::DEFAULT_WINDOW_SIZE;
use crate::energy::FallbackConfig;
use crate::scheduler::OverrunPolicy;
use config::Config;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    pub enable_stdout: bool,
    pub enable_log_file: bool,
    pub log_file_directory: Option<String>,
    pub level: String,
    pub directives: Vec<String>,
    pub max_log_files: usize,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            enable_stdout: true,
            enable_log_file: true,
            log_file_directory: Some("/tmp/var/log/carbonwatch/".to_owned()),
            level: "INFO".to_owned(),
            directives: vec![],
            max_log_files: 7,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    #[serde(default = "Log::default")]
    pub log: Log,
}

impl Configuration {
    pub fn load() -> Result<Self, config::ConfigError> {
        let cfg = Config::builder()
            .add_source(
                config::File::with_name("config.toml")
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::File::with_name("config.json")
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix("CARBONWATCH").separator("__"))
            .build()?;

        cfg.try_deserialize()
    }
}

/// Overrides the default powercap root (§4.1); tests and containerised
/// deployments with a bind-mounted fixture tree use this.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeConfig {
    pub root: Option<String>,
}

/// Mirrors `energy::FallbackConfig` as a deserializable surface (§4.2
/// "Empirical configuration").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FallbackModelConfig {
    pub p_idle_w: Option<f64>,
    pub p_max_w: Option<f64>,
    pub tdp_w: Option<f64>,
    pub idle_fraction: Option<f64>,
    pub max_fraction: Option<f64>,
}

impl FallbackModelConfig {
    pub fn to_fallback_config(&self) -> FallbackConfig {
        FallbackConfig {
            p_idle_w: self.p_idle_w,
            p_max_w: self.p_max_w,
            tdp_w: self.tdp_w,
            idle_fraction: self.idle_fraction,
            max_fraction: self.max_fraction,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub tick_ms: u64,
    #[serde(default)]
    pub overrun_policy: OverrunPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            overrun_policy: OverrunPolicy::Coalesce,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub pid: i64,
    pub duration_seconds: f64,
    #[serde(default = "default_emission_factor")]
    pub emission_factor_g_per_kwh: f64,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default)]
    pub include_meta: bool,
}

fn default_emission_factor() -> f64 {
    475.0
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_model_config_converts_fields_through() {
        let cfg = FallbackModelConfig {
            p_idle_w: Some(8.0),
            p_max_w: Some(65.0),
            tdp_w: None,
            idle_fraction: None,
            max_fraction: None,
        };
        let fallback = cfg.to_fallback_config();
        assert_eq!(fallback.p_idle_w, Some(8.0));
        assert_eq!(fallback.p_max_w, Some(65.0));
    }

    #[test]
    fn scheduler_config_default_matches_spec_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.tick_ms, 1_000);
        assert_eq!(cfg.overrun_policy, OverrunPolicy::Coalesce);
    }

    #[test]
    fn default_fractions_match_canonical_values() {
        use crate::energy::{DEFAULT_IDLE_FRACTION, DEFAULT_MAX_FRACTION};
        assert_eq!(DEFAULT_IDLE_FRACTION, 0.07);
        assert_eq!(DEFAULT_MAX_FRACTION, 0.55);
    }
}
