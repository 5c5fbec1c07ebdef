//! C2 — Energy Reader: per-tick host CPU energy deltas, in hardware mode via
//! RAPL microjoule counters or, when hardware is unavailable, via an
//! empirical power model driven by host CPU utilisation (§4.2).

use crate::clock::Clock;
use crate::host_cpu::{HostCpuReader, HostCpuSample};
use crate::probe::{PackageInfo, ProbeResult};
use crate::reader::Reader;
use std::sync::Mutex;

const MIN_CLAMPED_DT_S: f64 = 0.2;
const MAX_CLAMPED_DT_S: f64 = 5.0;

pub const DEFAULT_IDLE_FRACTION: f64 = 0.07;
pub const DEFAULT_MAX_FRACTION: f64 = 0.55;

fn clamp_dt(dt_s: f64) -> f64 {
    if !dt_s.is_finite() || dt_s <= 0.0 {
        return MIN_CLAMPED_DT_S;
    }
    dt_s.clamp(MIN_CLAMPED_DT_S, MAX_CLAMPED_DT_S)
}

/// Empirical power-model configuration (§4.2 "Empirical configuration").
#[derive(Debug, Clone, Default)]
pub struct FallbackConfig {
    pub p_idle_w: Option<f64>,
    pub p_max_w: Option<f64>,
    pub tdp_w: Option<f64>,
    pub idle_fraction: Option<f64>,
    pub max_fraction: Option<f64>,
}

impl FallbackConfig {
    /// Resolve the idle/max power points, if this configuration is
    /// sufficient. Returns `None` when neither the direct nor the TDP-derived
    /// path is usable.
    fn resolve(&self) -> Option<(f64, f64)> {
        if let (Some(p_idle), Some(p_max)) = (self.p_idle_w, self.p_max_w)
            && p_idle > 0.0
            && p_max >= p_idle
        {
            return Some((p_idle, p_max));
        }

        if let Some(tdp) = self.tdp_w
            && tdp > 0.0
        {
            let idle_fraction = self.idle_fraction.unwrap_or(DEFAULT_IDLE_FRACTION);
            let max_fraction = self.max_fraction.unwrap_or(DEFAULT_MAX_FRACTION);
            return Some((tdp * idle_fraction, tdp * max_fraction));
        }

        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct PackageEnergySample {
    pub node_id: usize,
    pub delta_uj: u64,
    pub wraps: u32,
    pub ok: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EnergySample {
    pub ok: bool,
    pub primed: bool,
    pub clamped_dt_s: f64,
    pub delta_uj: u64,
    pub delta_j: f64,
    pub wraps: u32,
    pub packages: Vec<PackageEnergySample>,
}

/// Per-package running state: the counter's invariant is
/// `0 <= last_uj <= wrap_limit` whenever both are known (spec §3).
struct PackageState {
    node_id: usize,
    path: std::path::PathBuf,
    wrap_limit: Option<u64>,
    last_uj: Mutex<Option<u64>>,
}

enum Mode<R> {
    Hardware {
        packages: Vec<PackageState>,
    },
    Fallback {
        p_idle_w: f64,
        p_max_w: f64,
        host_cpu: HostCpuReader<R>,
    },
    NotReady,
}

pub struct EnergyReader<R> {
    reader: R,
    mode: Mode<R>,
    last_ns: Mutex<Option<i64>>,
}

impl<R> EnergyReader<R>
where
    R: Reader + Clone,
{
    pub fn new(probe: &ProbeResult, fallback: FallbackConfig, reader: R) -> Self {
        if probe.is_ok() {
            let packages = probe
                .packages
                .iter()
                .filter(|p| p.readable)
                .map(|p: &PackageInfo| PackageState {
                    node_id: p.node_id,
                    path: p.energy_uj_path.clone(),
                    wrap_limit: p.max_energy_uj,
                    last_uj: Mutex::new(None),
                })
                .collect();

            return Self {
                reader,
                mode: Mode::Hardware { packages },
                last_ns: Mutex::new(None),
            };
        }

        if let Some((p_idle_w, p_max_w)) = fallback.resolve() {
            let host_cpu = HostCpuReader::new(reader.clone());
            return Self {
                reader,
                mode: Mode::Fallback {
                    p_idle_w,
                    p_max_w,
                    host_cpu,
                },
                last_ns: Mutex::new(None),
            };
        }

        Self {
            reader,
            mode: Mode::NotReady,
            last_ns: Mutex::new(None),
        }
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self.mode, Mode::NotReady)
    }

    /// Not re-entrant: the controller must never have two outstanding calls
    /// on the same reader (§4.2 Concurrency).
    pub async fn sample(&self, now_ns: i64) -> anyhow::Result<EnergySample> {
        match &self.mode {
            Mode::NotReady => {
                Err(anyhow::anyhow!(crate::error::ConfigError::EnergySourceUnavailable))
            }
            Mode::Hardware { packages } => self.sample_hardware(packages, now_ns).await,
            Mode::Fallback {
                p_idle_w,
                p_max_w,
                host_cpu,
            } => {
                self.sample_fallback(*p_idle_w, *p_max_w, host_cpu, now_ns)
                    .await
            }
        }
    }

    async fn sample_hardware(
        &self,
        packages: &[PackageState],
        now_ns: i64,
    ) -> anyhow::Result<EnergySample> {
        let mut last_ns_guard = self.last_ns.lock().unwrap();
        let priming = last_ns_guard.is_none();
        let clamped_dt_s = match *last_ns_guard {
            None => MIN_CLAMPED_DT_S,
            Some(prev) => clamp_dt((now_ns - prev) as f64 / 1e9),
        };
        *last_ns_guard = Some(now_ns);
        drop(last_ns_guard);

        let mut results = Vec::with_capacity(packages.len());
        let mut total_delta_uj: u128 = 0;
        let mut any_ok = false;
        let mut was_primed = false;
        let mut wraps_total = 0u32;

        for pkg in packages {
            let reading = self.reader.read_to_string(&pkg.path).await;
            let current = match reading {
                Ok(contents) => contents.trim().parse::<u64>().ok(),
                Err(_) => None,
            };

            match current {
                None => {
                    // Read failed: this package contributes 0 and its
                    // baseline is left untouched (§4.2 step 2).
                    results.push(PackageEnergySample {
                        node_id: pkg.node_id,
                        delta_uj: 0,
                        wraps: 0,
                        ok: false,
                    });
                }
                Some(current) => {
                    any_ok = true;
                    let mut last_uj = pkg.last_uj.lock().unwrap();
                    match *last_uj {
                        None => {
                            *last_uj = Some(current);
                            results.push(PackageEnergySample {
                                node_id: pkg.node_id,
                                delta_uj: 0,
                                wraps: 0,
                                ok: true,
                            });
                        }
                        Some(previous) => {
                            was_primed = true;
                            let (delta, wraps) = if current >= previous {
                                (current - previous, 0u32)
                            } else if let Some(limit) = pkg.wrap_limit {
                                ((limit - previous) + current, 1u32)
                            } else {
                                (0, 0)
                            };

                            *last_uj = Some(current);
                            total_delta_uj += delta as u128;
                            wraps_total += wraps;

                            results.push(PackageEnergySample {
                                node_id: pkg.node_id,
                                delta_uj: delta,
                                wraps,
                                ok: true,
                            });
                        }
                    }
                }
            }
        }

        let delta_uj = total_delta_uj.min(u64::MAX as u128) as u64;
        Ok(EnergySample {
            ok: any_ok,
            primed: !priming && was_primed,
            clamped_dt_s,
            delta_uj,
            delta_j: delta_uj as f64 / 1e6,
            wraps: wraps_total,
            packages: results,
        })
    }

    async fn sample_fallback(
        &self,
        p_idle_w: f64,
        p_max_w: f64,
        host_cpu: &HostCpuReader<R>,
        now_ns: i64,
    ) -> anyhow::Result<EnergySample> {
        let cpu_sample: HostCpuSample = host_cpu.sample(now_ns).await?;

        if !cpu_sample.primed {
            return Ok(EnergySample {
                ok: cpu_sample.ok,
                primed: false,
                clamped_dt_s: cpu_sample.clamped_dt_s,
                delta_uj: 0,
                delta_j: 0.0,
                wraps: 0,
                packages: vec![],
            });
        }

        let power_w = p_idle_w + (p_max_w - p_idle_w) * cpu_sample.utilisation;
        let delta_j = power_w * cpu_sample.clamped_dt_s;

        Ok(EnergySample {
            ok: cpu_sample.ok,
            primed: true,
            clamped_dt_s: cpu_sample.clamped_dt_s,
            delta_uj: (delta_j * 1e6).round() as u64,
            delta_j,
            wraps: 0,
            packages: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{PackageInfo, ProbeResult, ProbeStatus, Vendor};
    use crate::reader::tests::FakeReader;

    fn package(node_id: usize, path: &str, max: Option<u64>) -> PackageInfo {
        PackageInfo {
            node_id,
            name: format!("package-{node_id}"),
            vendor: Vendor::Intel,
            energy_uj_path: path.into(),
            readable: true,
            max_energy_uj: max,
        }
    }

    fn ok_probe(packages: Vec<PackageInfo>) -> ProbeResult {
        ProbeResult {
            status: ProbeStatus::Ok,
            packages,
        }
    }

    #[tokio::test]
    async fn hardware_path_steady_load_two_packages() {
        let mut reader = FakeReader::new();
        reader.add_response("/pkg0/energy_uj", "5000000");
        reader.add_response("/pkg0/energy_uj", "7000000");
        reader.add_response("/pkg1/energy_uj", "8000000");
        reader.add_response("/pkg1/energy_uj", "10000000");

        let probe = ok_probe(vec![
            package(0, "/pkg0/energy_uj", Some(20_000_000)),
            package(1, "/pkg1/energy_uj", Some(20_000_000)),
        ]);

        let energy = EnergyReader::new(&probe, FallbackConfig::default(), reader);

        let priming = energy.sample(0).await.unwrap();
        assert!(!priming.primed);
        assert_eq!(priming.delta_uj, 0);

        let one_second_ns = 1_000_000_000;
        let sample = energy.sample(one_second_ns).await.unwrap();
        assert!(sample.primed);
        assert_eq!(sample.delta_uj, 4_000_000);
        assert!((sample.delta_j - 4.0).abs() < 1e-9);
        assert_eq!(sample.wraps, 0);
        assert_eq!(sample.packages.len(), 2);
        assert!((sample.clamped_dt_s - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn wrap_correction_single_package() {
        let mut reader = FakeReader::new();
        reader.add_response("/pkg0/energy_uj", "19000000");
        reader.add_response("/pkg0/energy_uj", "1000000");

        let probe = ok_probe(vec![package(0, "/pkg0/energy_uj", Some(20_000_000))]);
        let energy = EnergyReader::new(&probe, FallbackConfig::default(), reader);

        energy.sample(0).await.unwrap();
        let sample = energy.sample(1_000_000_000).await.unwrap();

        assert_eq!(sample.delta_uj, 2_000_000);
        assert!((sample.delta_j - 2.0).abs() < 1e-9);
        assert_eq!(sample.wraps, 1);
    }

    #[tokio::test]
    async fn missing_wrap_limit_clamps_negative_delta_to_zero() {
        let mut reader = FakeReader::new();
        reader.add_response("/pkg0/energy_uj", "19000000");
        reader.add_response("/pkg0/energy_uj", "1000000");

        let probe = ok_probe(vec![package(0, "/pkg0/energy_uj", None)]);
        let energy = EnergyReader::new(&probe, FallbackConfig::default(), reader);

        energy.sample(0).await.unwrap();
        let sample = energy.sample(1_000_000_000).await.unwrap();

        assert_eq!(sample.delta_uj, 0);
        assert_eq!(sample.wraps, 0);
    }

    #[tokio::test]
    async fn dt_clamp_bounds() {
        let mut reader = FakeReader::new();
        reader.add_response("/pkg0/energy_uj", "0");
        reader.add_response("/pkg0/energy_uj", "100");
        let probe = ok_probe(vec![package(0, "/pkg0/energy_uj", None)]);
        let energy = EnergyReader::new(&probe, FallbackConfig::default(), reader);

        energy.sample(0).await.unwrap();
        // 10ms elapsed -> clamp up to 0.2s
        let sample = energy.sample(10_000_000).await.unwrap();
        assert!((sample.clamped_dt_s - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unreadable_package_contributes_zero_without_disturbing_baseline() {
        let mut reader = FakeReader::new();
        reader.add_response("/pkg0/energy_uj", "1000");
        // second read fails (file removed mid-audit)
        let probe = ok_probe(vec![package(0, "/pkg0/energy_uj", None)]);
        let energy = EnergyReader::new(&probe, FallbackConfig::default(), reader);

        energy.sample(0).await.unwrap();
        let sample = energy.sample(1_000_000_000).await.unwrap();
        assert!(!sample.ok);
        assert_eq!(sample.delta_uj, 0);
    }

    #[tokio::test]
    async fn fallback_empirical_model() {
        let mut reader = FakeReader::new();
        reader.add_response("/proc/stat", "cpu  0 0 0 100 0 0 0 0\n");
        reader.add_response("/proc/stat", "cpu  50 0 0 150 0 0 0 0\n");

        let probe = ProbeResult {
            status: ProbeStatus::Degraded {
                hint: "no access".into(),
            },
            packages: vec![],
        };

        let fallback = FallbackConfig {
            p_idle_w: Some(8.0),
            p_max_w: Some(65.0),
            ..Default::default()
        };

        let energy = EnergyReader::new(&probe, fallback, reader);
        energy.sample(0).await.unwrap();
        let sample = energy.sample(1_000_000_000).await.unwrap();

        assert!(sample.primed);
        assert!((sample.delta_j - 36.5).abs() < 1e-6);
    }

    #[test]
    fn fallback_config_not_sufficient_without_either_path() {
        let fallback = FallbackConfig::default();
        assert!(fallback.resolve().is_none());
    }

    #[test]
    fn fallback_config_tdp_derivation_uses_canonical_fractions() {
        let fallback = FallbackConfig {
            tdp_w: Some(100.0),
            ..Default::default()
        };
        let (p_idle, p_max) = fallback.resolve().unwrap();
        assert!((p_idle - 7.0).abs() < 1e-9);
        assert!((p_max - 55.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn not_ready_reader_fails_with_canonical_error() {
        let reader = FakeReader::new();
        let probe = ProbeResult {
            status: ProbeStatus::Failed { hint: "x".into() },
            packages: vec![],
        };
        let energy = EnergyReader::new(&probe, FallbackConfig::default(), reader);
        assert!(!energy.is_ready());
        let err = energy.sample(0).await.unwrap_err();
        assert!(err.to_string().contains("fallback"));
    }
}
