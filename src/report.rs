//! Final audit report shape (§3 "Final report") and its optional debug meta
//! block, returned by value from the controller to the external caller.

use crate::accumulator::{EndReason, Meta};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub ticks_observed: u64,
    pub host_energy_primed: u64,
    pub host_cpu_primed: u64,
    pub process_ok: u64,
    pub process_primed: u64,
    pub process_error: u64,
    pub first_process_error_reason: Option<String>,
    pub skipped_periods_total: u64,
    pub end_reason: String,
    pub hint: Option<String>,
}

impl ReportMeta {
    pub fn from_accumulator(meta: Meta, end_reason: EndReason, hint: Option<String>) -> Self {
        Self {
            ticks_observed: meta.ticks_observed,
            host_energy_primed: meta.host_energy_primed,
            host_cpu_primed: meta.host_cpu_primed,
            process_ok: meta.process_ok,
            process_primed: meta.process_primed,
            process_error: meta.process_error,
            first_process_error_reason: meta.first_process_error_reason,
            skipped_periods_total: meta.skipped_periods_total,
            end_reason: match end_reason {
                EndReason::Duration => "duration".to_owned(),
                EndReason::Aborted => "aborted".to_owned(),
            },
            hint,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub pid: i64,
    pub duration_seconds: f64,
    pub host_cpu_energy_j: f64,
    pub process_cpu_energy_j: f64,
    pub process_cpu_energy_share: f64,
    pub host_carbon_gco2e: f64,
    pub process_carbon_gco2e: f64,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ReportMeta>,
}

/// A diagnostic hint drawn from the recorded first process error reason
/// (§4.7 "Post-loop"). Only emitted when the audit ended inactive.
pub fn diagnostic_hint(is_active: bool, first_process_error_reason: Option<&str>) -> Option<String> {
    if is_active {
        return None;
    }

    match first_process_error_reason {
        Some("file_not_found") => Some(
            "process likely ended before priming: the target exited before a second sample \
             could observe a delta; consider a shorter tick period"
                .to_owned(),
        ),
        Some(reason) => Some(format!(
            "no process CPU activity was attributed; first recorded reader error was {reason}"
        )),
        None => Some(
            "no process CPU activity was attributed over the audit window".to_owned(),
        ),
    }
}
