//! C3 — Host CPU Reader: per-tick active/idle/total tick deltas for the
//! whole host, parsed from the kernel's aggregate `/proc/stat` line.

use crate::reader::Reader;
use std::sync::Mutex;

const DEFAULT_PROC_STAT: &str = "/proc/stat";
const MIN_CLAMPED_DT_S: f64 = 0.2;
const MAX_CLAMPED_DT_S: f64 = 5.0;

fn clamp_dt(dt_s: f64) -> f64 {
    if !dt_s.is_finite() || dt_s <= 0.0 {
        return MIN_CLAMPED_DT_S;
    }
    dt_s.clamp(MIN_CLAMPED_DT_S, MAX_CLAMPED_DT_S)
}

#[derive(Debug, Clone, Copy, Default)]
struct Aggregate {
    idle_total: u64,
    active_total: u64,
    grand_total: u64,
}

/// Parse the first line whose token is exactly `cpu` (the aggregate line).
/// Missing trailing fields default to 0, per §4.3.
fn parse_aggregate_line(content: &str) -> Option<Aggregate> {
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let Some(first) = parts.next() else {
            continue;
        };
        if first != "cpu" {
            continue;
        }

        let mut fields = [0u64; 8];
        for (idx, slot) in fields.iter_mut().enumerate() {
            if idx >= 8 {
                break;
            }
            *slot = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        }

        let [user, nice, system, idle, iowait, irq, softirq, steal] = fields;
        let idle_total = idle + iowait;
        let active_total = user + nice + system + irq + softirq + steal;
        return Some(Aggregate {
            idle_total,
            active_total,
            grand_total: idle_total + active_total,
        });
    }
    None
}

#[derive(Debug, Clone, Default)]
pub struct HostCpuTicks {
    pub delta_idle: u64,
    pub delta_active: u64,
    pub delta_total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct HostCpuSample {
    pub ok: bool,
    pub primed: bool,
    pub clamped_dt_s: f64,
    pub ticks: HostCpuTicks,
    pub utilisation: f64,
}

pub struct HostCpuReader<R> {
    reader: R,
    path: std::path::PathBuf,
    state: Mutex<Option<(i64, Aggregate)>>,
}

impl<R> HostCpuReader<R>
where
    R: Reader,
{
    pub fn new(reader: R) -> Self {
        Self::with_path(reader, DEFAULT_PROC_STAT)
    }

    pub fn with_path(reader: R, path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            reader,
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    pub async fn sample(&self, now_ns: i64) -> anyhow::Result<HostCpuSample> {
        let content = match self.reader.read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                return Ok(HostCpuSample {
                    ok: false,
                    primed: false,
                    clamped_dt_s: MIN_CLAMPED_DT_S,
                    ticks: HostCpuTicks::default(),
                    utilisation: 0.0,
                }
                .with_error_noted(&e));
            }
        };

        let Some(current) = parse_aggregate_line(&content) else {
            return Ok(HostCpuSample {
                ok: false,
                primed: false,
                clamped_dt_s: MIN_CLAMPED_DT_S,
                ticks: HostCpuTicks::default(),
                utilisation: 0.0,
            });
        };

        let mut state = self.state.lock().unwrap();
        let previous = *state;
        *state = Some((now_ns, current));
        drop(state);

        let Some((prev_ns, previous)) = previous else {
            return Ok(HostCpuSample {
                ok: true,
                primed: false,
                clamped_dt_s: MIN_CLAMPED_DT_S,
                ticks: HostCpuTicks::default(),
                utilisation: 0.0,
            });
        };

        let clamped_dt_s = clamp_dt((now_ns - prev_ns) as f64 / 1e9);

        let delta_total = current.grand_total.saturating_sub(previous.grand_total);
        let delta_idle = current.idle_total.saturating_sub(previous.idle_total);

        let (delta_total, delta_idle, delta_active) = if delta_total == 0 {
            (0, 0, 0)
        } else {
            let delta_active = delta_total.saturating_sub(delta_idle);
            (delta_total, delta_idle, delta_active)
        };

        let utilisation = if delta_total == 0 {
            0.0
        } else {
            (delta_active as f64 / delta_total as f64).clamp(0.0, 1.0)
        };

        Ok(HostCpuSample {
            ok: true,
            primed: true,
            clamped_dt_s,
            ticks: HostCpuTicks {
                delta_idle,
                delta_active,
                delta_total,
            },
            utilisation,
        })
    }
}

trait WithErrorNote {
    fn with_error_noted(self, error: &std::io::Error) -> Self;
}

impl WithErrorNote for HostCpuSample {
    fn with_error_noted(self, error: &std::io::Error) -> Self {
        tracing::debug!(
            kind = %crate::error::map_io_error(error),
            "host cpu stat file read failed"
        );
        self
    }
}
