//! C4 — Process CPU Reader: per-tick active-tick deltas for the target
//! process, parsed from `/proc/<pid>/stat`, with restart detection via the
//! process's `starttime` field.

use crate::error::ConfigError;
use crate::reader::Reader;
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct ProcessCpuTicks {
    pub delta_active: u64,
}

#[derive(Debug, Clone)]
pub enum ProcessCpuSample {
    Ok {
        primed: bool,
        pid: i64,
        ticks: ProcessCpuTicks,
    },
    Err {
        reason: String,
    },
}

impl ProcessCpuSample {
    pub fn ok(&self) -> bool {
        matches!(self, ProcessCpuSample::Ok { .. })
    }
}

struct Parsed {
    app_ticks: u64,
    start_ticks: u64,
}

/// Split the stat line on the *last* `)` so that a `comm` field containing
/// whitespace or parentheses is preserved intact (§4.4).
fn parse_stat_line(content: &str) -> Option<Parsed> {
    let close_paren = content.rfind(')')?;
    let rest = content.get(close_paren + 1..)?;

    // `rest` starts with " <state> <ppid> ...", i.e. field 3 onward.
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // field index (0-based within `fields`) 0 == state (field 3 overall)
    // utime is field 14 overall -> fields[14 - 3] = fields[11]
    // stime is field 15 overall -> fields[12]
    // starttime is field 22 overall -> fields[19]
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let starttime: u64 = fields.get(19)?.parse().ok()?;

    Some(Parsed {
        app_ticks: utime + stime,
        start_ticks: starttime,
    })
}

struct State {
    last_app_ticks: Option<u64>,
    last_start_ticks: Option<u64>,
}

pub struct ProcessCpuReader<R> {
    reader: R,
    pid: i64,
    path: std::path::PathBuf,
    state: Mutex<State>,
}

fn extract_pid_from_path(path: &std::path::Path) -> Option<i64> {
    let mut components: Vec<_> = path.components().collect();
    if components.pop()?.as_os_str() != "stat" {
        return None;
    }
    components.pop()?.as_os_str().to_str()?.parse().ok()
}

impl<R> ProcessCpuReader<R>
where
    R: Reader,
{
    pub fn new(reader: R, pid: i64) -> Result<Self, ConfigError> {
        if pid <= 0 {
            return Err(ConfigError::InvalidPid);
        }
        let path = format!("/proc/{pid}/stat").into();
        Ok(Self {
            reader,
            pid,
            path,
            state: Mutex::new(State {
                last_app_ticks: None,
                last_start_ticks: None,
            }),
        })
    }

    pub fn with_path(
        reader: R,
        pid: i64,
        path: impl Into<std::path::PathBuf>,
    ) -> Result<Self, ConfigError> {
        if pid <= 0 {
            return Err(ConfigError::InvalidPid);
        }
        let path = path.into();
        if let Some(embedded) = extract_pid_from_path(&path)
            && embedded != pid
        {
            return Err(ConfigError::PidMismatch);
        }

        Ok(Self {
            reader,
            pid,
            path,
            state: Mutex::new(State {
                last_app_ticks: None,
                last_start_ticks: None,
            }),
        })
    }

    pub fn pid(&self) -> i64 {
        self.pid
    }

    pub async fn sample(&self) -> ProcessCpuSample {
        let content = match self.reader.read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                return ProcessCpuSample::Err {
                    reason: crate::error::map_io_error(&e),
                };
            }
        };

        let Some(parsed) = parse_stat_line(&content) else {
            return ProcessCpuSample::Err {
                reason: crate::error::INVALID_FILE_CONTENT.to_owned(),
            };
        };

        let mut state = self.state.lock().unwrap();

        if state.last_start_ticks.is_none() {
            state.last_app_ticks = Some(parsed.app_ticks);
            state.last_start_ticks = Some(parsed.start_ticks);
            return ProcessCpuSample::Ok {
                primed: false,
                pid: self.pid,
                ticks: ProcessCpuTicks::default(),
            };
        }

        if state.last_start_ticks != Some(parsed.start_ticks) {
            // Process restart detected (reused pid): reset and report zero,
            // never a negative or inflated delta (§3, §4.4, §8).
            state.last_app_ticks = Some(parsed.app_ticks);
            state.last_start_ticks = Some(parsed.start_ticks);
            return ProcessCpuSample::Ok {
                primed: false,
                pid: self.pid,
                ticks: ProcessCpuTicks::default(),
            };
        }

        let previous = state.last_app_ticks.unwrap_or(parsed.app_ticks);
        let delta_active = parsed.app_ticks.saturating_sub(previous);
        state.last_app_ticks = Some(parsed.app_ticks);

        ProcessCpuSample::Ok {
            primed: true,
            pid: self.pid,
            ticks: ProcessCpuTicks { delta_active },
        }
    }
}
