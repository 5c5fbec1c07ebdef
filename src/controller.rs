//! C7 — Audit Controller: orchestrates the three readers under the
//! scheduler, owns the accumulator for one audit, and returns the report.

use crate::accumulator::{Accumulator, EndReason, TickSample};
use crate::clock::Clock;
use crate::energy::EnergyReader;
use crate::error::ConfigError;
use crate::host_cpu::HostCpuReader;
use crate::process_cpu::ProcessCpuReader;
use crate::reader::Reader;
use crate::report::{AuditReport, ReportMeta, diagnostic_hint};
use crate::scheduler::{CancellationToken, OverrunPolicy, Scheduler};

pub struct AuditOptions {
    pub pid: i64,
    pub duration_seconds: f64,
    pub tick_ms: u64,
    pub emission_factor_g_per_kwh: f64,
    pub overrun_policy: OverrunPolicy,
    pub include_meta: bool,
    pub cancellation: CancellationToken,
}

impl AuditOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pid <= 1 {
            return Err(ConfigError::InvalidPid);
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds <= 0.0 {
            return Err(ConfigError::InvalidDuration);
        }
        if self.tick_ms == 0 {
            return Err(ConfigError::InvalidPeriod);
        }
        if !self.emission_factor_g_per_kwh.is_finite() || self.emission_factor_g_per_kwh < 0.0 {
            return Err(ConfigError::InvalidEmissionFactor);
        }
        Ok(())
    }
}

/// Runs a single audit to completion: `options.pid` over
/// `options.duration_seconds`, sampling every `options.tick_ms`. Pre-condition
/// failures abort before the loop starts (§4.7 "Pre-conditions").
pub async fn audit<R, C>(
    options: AuditOptions,
    energy: &EnergyReader<R>,
    host_cpu: &HostCpuReader<R>,
    process_cpu: &ProcessCpuReader<R>,
    clock: C,
) -> Result<AuditReport, ConfigError>
where
    R: Reader,
    C: Clock + Clone,
{
    options.validate()?;

    if !energy.is_ready() {
        return Err(ConfigError::EnergySourceUnavailable);
    }

    let mut scheduler = Scheduler::new(
        clock.clone(),
        options.tick_ms,
        options.overrun_policy,
        options.cancellation.clone(),
    )?;

    let t0_ns = scheduler.t0_ns();
    let deadline_target_ns = t0_ns + (options.duration_seconds * 1e9) as i64;

    let mut accumulator = Accumulator::new(t0_ns);
    let mut end_reason = EndReason::Duration;

    loop {
        if options.cancellation.is_cancelled() {
            end_reason = EndReason::Aborted;
            break;
        }

        let Some(tick) = scheduler.next_tick().await else {
            end_reason = EndReason::Aborted;
            break;
        };

        if tick.start_ns >= deadline_target_ns {
            end_reason = EndReason::Duration;
            break;
        }

        let (energy_sample, host_sample, process_sample) = tokio::join!(
            energy.sample(tick.start_ns),
            host_cpu.sample(tick.start_ns),
            process_cpu.sample(),
        );

        let energy_sample = energy_sample.unwrap_or_default();
        let host_sample = host_sample.unwrap_or_default();

        accumulator.push(&TickSample {
            energy: &energy_sample,
            host_cpu: &host_sample,
            process_cpu: &process_sample,
            skipped_periods: tick.skipped_periods,
        });
    }

    let (attribution, meta, end_reason) = accumulator.finalise(clock.now_ns(), end_reason)?;

    let hint = diagnostic_hint(
        attribution.is_active,
        meta.first_process_error_reason.as_deref(),
    );

    let host_carbon = crate::accumulator::host_carbon_gco2e(&attribution, options.emission_factor_g_per_kwh);
    let process_carbon =
        crate::accumulator::process_carbon_gco2e(&attribution, options.emission_factor_g_per_kwh);

    Ok(AuditReport {
        pid: options.pid,
        duration_seconds: attribution.duration_seconds,
        host_cpu_energy_j: attribution.host_cpu_energy_j,
        process_cpu_energy_j: attribution.process_cpu_energy_j,
        process_cpu_energy_share: attribution.process_cpu_energy_share,
        host_carbon_gco2e: host_carbon,
        process_carbon_gco2e: process_carbon,
        is_active: attribution.is_active,
        meta: options
            .include_meta
            .then(|| ReportMeta::from_accumulator(meta, end_reason, hint)),
    })
}
