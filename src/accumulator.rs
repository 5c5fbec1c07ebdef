//! C6 — Accumulator & Attribution: batch-mode running sums for a whole
//! audit, plus a streaming sliding-window variant for live attribution.

use crate::energy::EnergySample;
use crate::error::ConfigError;
use crate::host_cpu::HostCpuSample;
use crate::process_cpu::ProcessCpuSample;
use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_WINDOW_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Duration,
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct Meta {
    pub ticks_observed: u64,
    pub host_energy_primed: u64,
    pub host_cpu_primed: u64,
    pub process_ok: u64,
    pub process_primed: u64,
    pub process_error: u64,
    pub first_process_error_reason: Option<String>,
    pub skipped_periods_total: u64,
}

/// One tick's worth of input to the accumulator (§3 "Accumulator state").
pub struct TickSample<'a> {
    pub energy: &'a EnergySample,
    pub host_cpu: &'a HostCpuSample,
    pub process_cpu: &'a ProcessCpuSample,
    pub skipped_periods: u64,
}

#[derive(Debug, Clone)]
pub struct Attribution {
    pub duration_seconds: f64,
    pub host_cpu_energy_j: f64,
    pub process_cpu_energy_j: f64,
    pub process_cpu_energy_share: f64,
    pub is_active: bool,
}

fn carbon_gco2e(energy_j: f64, emission_factor_g_per_kwh: f64) -> f64 {
    let kwh = energy_j / 3_600_000.0;
    kwh * emission_factor_g_per_kwh
}

/// Batch-mode accumulator: owned by the controller for the lifetime of one
/// audit. `finalise` is required to run exactly once (§5 "At-most-once").
pub struct Accumulator {
    start_ns: i64,
    sum_host_energy_j: f64,
    sum_host_active_ticks: u128,
    sum_process_active_ticks: u128,
    meta: Meta,
    finalised: bool,
}

impl Accumulator {
    pub fn new(start_ns: i64) -> Self {
        Self {
            start_ns,
            sum_host_energy_j: 0.0,
            sum_host_active_ticks: 0,
            sum_process_active_ticks: 0,
            meta: Meta::default(),
            finalised: false,
        }
    }

    pub fn push(&mut self, sample: &TickSample<'_>) {
        self.meta.ticks_observed += 1;
        self.meta.skipped_periods_total += sample.skipped_periods;

        if sample.energy.ok && sample.energy.primed {
            self.meta.host_energy_primed += 1;
            if sample.energy.delta_j > 0.0 {
                self.sum_host_energy_j += sample.energy.delta_j;
            }
        }

        if sample.host_cpu.ok && sample.host_cpu.primed {
            self.meta.host_cpu_primed += 1;
            if sample.host_cpu.ticks.delta_active > 0 {
                self.sum_host_active_ticks += sample.host_cpu.ticks.delta_active as u128;
            }
        }

        match sample.process_cpu {
            ProcessCpuSample::Ok { primed, ticks, .. } => {
                self.meta.process_ok += 1;
                if *primed {
                    self.meta.process_primed += 1;
                    if ticks.delta_active > 0 {
                        self.sum_process_active_ticks += ticks.delta_active as u128;
                    }
                }
            }
            ProcessCpuSample::Err { reason } => {
                self.meta.process_error += 1;
                if self.meta.first_process_error_reason.is_none() {
                    self.meta.first_process_error_reason = Some(reason.clone());
                }
            }
        }
    }

    /// Must be called exactly once; a second call fails with
    /// `already_finalised` (§5). Carbon figures are derived from the
    /// returned [`Attribution`] via [`host_carbon_gco2e`]/[`process_carbon_gco2e`].
    pub fn finalise(
        &mut self,
        end_ns: i64,
        end_reason: EndReason,
    ) -> Result<(Attribution, Meta, EndReason), ConfigError> {
        if self.finalised {
            return Err(ConfigError::AlreadyFinalised);
        }
        self.finalised = true;

        let duration_seconds = (end_ns - self.start_ns) as f64 / 1e9;
        let share = if self.sum_host_active_ticks > 0 {
            (self.sum_process_active_ticks as f64 / self.sum_host_active_ticks as f64)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };

        let process_energy_j = self.sum_host_energy_j * share;
        let is_active = self.sum_process_active_ticks > 0;

        let attribution = Attribution {
            duration_seconds,
            host_cpu_energy_j: self.sum_host_energy_j,
            process_cpu_energy_j: process_energy_j,
            process_cpu_energy_share: share,
            is_active,
        };

        Ok((attribution, self.meta.clone(), end_reason))
    }
}

pub fn host_carbon_gco2e(attribution: &Attribution, emission_factor_g_per_kwh: f64) -> f64 {
    carbon_gco2e(attribution.host_cpu_energy_j, emission_factor_g_per_kwh)
}

pub fn process_carbon_gco2e(attribution: &Attribution, emission_factor_g_per_kwh: f64) -> f64 {
    carbon_gco2e(attribution.process_cpu_energy_j, emission_factor_g_per_kwh)
}

#[derive(Debug, Clone, Copy, Default)]
struct WindowEntry {
    host_energy_j: f64,
    host_active_ticks: u64,
    process_active_ticks: u64,
}

/// Streaming attribution derived from the sliding window's current contents,
/// shaped for an external collaborator to serialize one per line (§6,
/// "Added: streaming JSONL meta").
#[derive(Debug, Clone, Serialize)]
pub struct WindowAttribution {
    pub ok: bool,
    pub reason: Option<String>,
    pub samples: usize,
    pub host_cpu_energy_j: f64,
    pub process_cpu_energy_j: f64,
    pub process_cpu_energy_share: f64,
}

/// Bounded ring buffer of the last `W` ticks, recomputing sums on every push
/// (§4.6 "Sliding-window (streaming) mode").
///
/// `push` always appends and evicts the oldest entry once the buffer exceeds
/// its capacity — that mutation is unconditional, it is the window's core
/// contract (§8's round-trip property: pushing the same sample twice must
/// double the buffer's sums regardless of any one tick's activity level).
/// Only the *returned* attribution is gated on `sum_host_active_ticks == 0`;
/// there is no intermediate cache mutated ahead of that check, so a denied
/// attribution never leaks a half-applied state into the next call.
pub struct SlidingWindow {
    capacity: usize,
    entries: VecDeque<WindowEntry>,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }

    pub fn push(&mut self, sample: &TickSample<'_>) -> WindowAttribution {
        let host_energy_j = if sample.energy.ok && sample.energy.primed && sample.energy.delta_j > 0.0
        {
            sample.energy.delta_j
        } else {
            0.0
        };
        let host_active_ticks = if sample.host_cpu.ok && sample.host_cpu.primed {
            sample.host_cpu.ticks.delta_active
        } else {
            0
        };
        let process_active_ticks = match sample.process_cpu {
            ProcessCpuSample::Ok { primed: true, ticks, .. } => ticks.delta_active,
            _ => 0,
        };

        self.entries.push_back(WindowEntry {
            host_energy_j,
            host_active_ticks,
            process_active_ticks,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }

        let mut sum_host_energy_j = 0.0f64;
        let mut sum_host_active_ticks: u128 = 0;
        let mut sum_process_active_ticks: u128 = 0;
        for entry in &self.entries {
            sum_host_energy_j += entry.host_energy_j;
            sum_host_active_ticks += entry.host_active_ticks as u128;
            sum_process_active_ticks += entry.process_active_ticks as u128;
        }

        if sum_host_active_ticks == 0 {
            return WindowAttribution {
                ok: false,
                reason: Some("no_host_cpu_activity".to_owned()),
                samples: self.entries.len(),
                host_cpu_energy_j: sum_host_energy_j,
                process_cpu_energy_j: 0.0,
                process_cpu_energy_share: 0.0,
            };
        }

        let share =
            (sum_process_active_ticks as f64 / sum_host_active_ticks as f64).clamp(0.0, 1.0);

        WindowAttribution {
            ok: true,
            reason: None,
            samples: self.entries.len(),
            host_cpu_energy_j: sum_host_energy_j,
            process_cpu_energy_j: sum_host_energy_j * share,
            process_cpu_energy_share: share,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::EnergySample;
    use crate::host_cpu::{HostCpuSample, HostCpuTicks};
    use crate::process_cpu::{ProcessCpuSample, ProcessCpuTicks};

    fn energy(delta_j: f64, ok: bool, primed: bool) -> EnergySample {
        EnergySample {
            ok,
            primed,
            clamped_dt_s: 1.0,
            delta_uj: (delta_j * 1e6) as u64,
            delta_j,
            wraps: 0,
            packages: vec![],
        }
    }

    fn host(delta_active: u64, ok: bool, primed: bool) -> HostCpuSample {
        HostCpuSample {
            ok,
            primed,
            clamped_dt_s: 1.0,
            ticks: HostCpuTicks {
                delta_idle: 0,
                delta_active,
                delta_total: delta_active,
            },
            utilisation: 1.0,
        }
    }

    fn process_ok(delta_active: u64, primed: bool) -> ProcessCpuSample {
        ProcessCpuSample::Ok {
            primed,
            pid: 123,
            ticks: ProcessCpuTicks { delta_active },
        }
    }

    #[test]
    fn attribution_matches_spec_scenario_3() {
        // §8 scenario 3: over a 10-tick window, sum_host_active_ticks=381,
        // sum_process_active_ticks=37, sum_host_energy_j=49.753.
        let hosts: [u64; 10] = [38, 38, 38, 38, 38, 38, 38, 38, 38, 39];
        let procs: [u64; 10] = [4, 4, 4, 4, 4, 4, 4, 3, 3, 3];
        assert_eq!(hosts.iter().sum::<u64>(), 381);
        assert_eq!(procs.iter().sum::<u64>(), 37);

        let mut acc = Accumulator::new(0);
        for i in 0..10 {
            let e = energy(4.9753, true, true);
            let h = host(hosts[i], true, true);
            let p = process_ok(procs[i], true);
            acc.push(&TickSample {
                energy: &e,
                host_cpu: &h,
                process_cpu: &p,
                skipped_periods: 0,
            });
        }

        let (attribution, _, _) = acc
            .finalise(10_000_000_000, EndReason::Duration)
            .unwrap();

        assert!((attribution.host_cpu_energy_j - 49.753).abs() < 1e-6);
        assert!((attribution.process_cpu_energy_share - 0.0971).abs() < 1e-3);
        assert!((attribution.process_cpu_energy_j - 4.832).abs() < 1e-2);

        let carbon = process_carbon_gco2e(&attribution, 475.0);
        assert!((carbon - 6.38e-4).abs() < 1e-5);
    }

    #[test]
    fn strictly_positive_guard_excludes_zero_energy_ticks() {
        let mut acc = Accumulator::new(0);
        let e = energy(0.0, true, true);
        let h = host(5, true, true);
        let p = process_ok(1, true);
        acc.push(&TickSample {
            energy: &e,
            host_cpu: &h,
            process_cpu: &p,
            skipped_periods: 0,
        });

        let (attribution, _, _) = acc
            .finalise(1_000_000_000, EndReason::Duration)
            .unwrap();
        assert_eq!(attribution.host_cpu_energy_j, 0.0);
    }

    #[test]
    fn unprimed_samples_contribute_nothing() {
        let mut acc = Accumulator::new(0);
        let e = energy(5.0, true, false);
        let h = host(10, true, false);
        let p = process_ok(0, false);
        acc.push(&TickSample {
            energy: &e,
            host_cpu: &h,
            process_cpu: &p,
            skipped_periods: 0,
        });

        let (attribution, meta, _) = acc
            .finalise(1_000_000_000, EndReason::Duration)
            .unwrap();
        assert_eq!(attribution.host_cpu_energy_j, 0.0);
        assert_eq!(meta.host_energy_primed, 0);
    }

    #[test]
    fn finalise_twice_fails() {
        let mut acc = Accumulator::new(0);
        acc.finalise(1, EndReason::Duration).unwrap();
        let err = acc.finalise(2, EndReason::Duration).unwrap_err();
        assert_eq!(err, ConfigError::AlreadyFinalised);
    }

    #[test]
    fn process_error_retains_first_reason_only() {
        let mut acc = Accumulator::new(0);
        let e = energy(1.0, true, true);
        let h = host(1, true, true);
        let p1 = ProcessCpuSample::Err {
            reason: "file_not_found".to_owned(),
        };
        let p2 = ProcessCpuSample::Err {
            reason: "permission_denied".to_owned(),
        };
        acc.push(&TickSample {
            energy: &e,
            host_cpu: &h,
            process_cpu: &p1,
            skipped_periods: 0,
        });
        acc.push(&TickSample {
            energy: &e,
            host_cpu: &h,
            process_cpu: &p2,
            skipped_periods: 0,
        });

        let (_, meta, _) = acc.finalise(1, EndReason::Duration).unwrap();
        assert_eq!(meta.process_error, 2);
        assert_eq!(meta.first_process_error_reason.as_deref(), Some("file_not_found"));
    }

    #[test]
    fn sliding_window_evicts_oldest_past_capacity() {
        let mut window = SlidingWindow::new(2);
        let e = energy(1.0, true, true);
        let h = host(10, true, true);
        let p = process_ok(1, true);

        let tick = TickSample {
            energy: &e,
            host_cpu: &h,
            process_cpu: &p,
            skipped_periods: 0,
        };

        window.push(&tick);
        window.push(&tick);
        let result = window.push(&tick); // evicts the first entry
        assert_eq!(result.samples, 2);
        assert!((result.host_cpu_energy_j - 2.0).abs() < 1e-9);
    }

    #[test]
    fn sliding_window_round_trip_doubles_sums() {
        let mut window = SlidingWindow::new(10);
        let e = energy(2.0, true, true);
        let h = host(5, true, true);
        let p = process_ok(1, true);
        let tick = TickSample {
            energy: &e,
            host_cpu: &h,
            process_cpu: &p,
            skipped_periods: 0,
        };

        let once = window.push(&tick);
        let twice = window.push(&tick);
        assert!((twice.host_cpu_energy_j - 2.0 * once.host_cpu_energy_j).abs() < 1e-9);
    }

    #[test]
    fn sliding_window_reports_no_host_activity_without_mutating_published_attribution() {
        let mut window = SlidingWindow::new(4);
        let e = energy(3.0, true, true);
        let h = host(0, true, true); // no host activity this tick
        let p = process_ok(0, false);
        let tick = TickSample {
            energy: &e,
            host_cpu: &h,
            process_cpu: &p,
            skipped_periods: 0,
        };

        let result = window.push(&tick);
        assert!(!result.ok);
        assert_eq!(result.reason.as_deref(), Some("no_host_cpu_activity"));
        assert_eq!(result.samples, 1);
        // the buffer itself was still mutated (unconditional append).
        assert_eq!(window.len(), 1);
    }
}
