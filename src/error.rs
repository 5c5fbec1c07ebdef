//! Canonical error taxonomy (spec §7) and the single mapping function from
//! native filesystem errors to a canonical kind.
//!
//! Transient reader failures (`permission_denied`, `file_not_found`, ...) are
//! carried as plain strings inside reader results — they are never fatal and
//! readers never branch on the native error code directly, only on the
//! mapped kind. Configuration/programmer errors get a closed `thiserror` enum
//! because the spec requires them to "fail loudly"; a typed enum is the
//! pattern the retrieved pack reaches for when a fixed set of fatal causes
//! must be matched on by a caller (see `perf-event-open`'s `thiserror`-based
//! error type) — the teacher itself only ever returns `anyhow::Error`.

use std::io::ErrorKind as IoErrorKind;
use thiserror::Error;

/// A canonical error kind string, stable across platforms (spec §7 table).
pub type ErrorKind = &'static str;

pub const PERMISSION_DENIED: ErrorKind = "permission_denied";
pub const FILE_NOT_FOUND: ErrorKind = "file_not_found";
pub const NOT_A_DIRECTORY: ErrorKind = "not_a_directory";
pub const SYMLINK_LOOP: ErrorKind = "symlink_loop";
pub const OPERATION_NOT_PERMITTED: ErrorKind = "operation_not_permitted";
pub const INVALID_FILE_CONTENT: ErrorKind = "invalid_file_content";

/// Map a `std::io::Error` to a canonical kind. Unknown/unmapped codes fall
/// back to a lowercased rendering of the native `Debug` kind, per §7:
/// "unknown codes lowercase the original code as a fallback".
pub fn map_io_error(error: &std::io::Error) -> String {
    match error.kind() {
        IoErrorKind::PermissionDenied => PERMISSION_DENIED.to_owned(),
        IoErrorKind::NotFound => FILE_NOT_FOUND.to_owned(),
        IoErrorKind::NotADirectory => NOT_A_DIRECTORY.to_owned(),
        IoErrorKind::FilesystemLoop => SYMLINK_LOOP.to_owned(),
        other => match error.raw_os_error() {
            Some(1) => OPERATION_NOT_PERMITTED.to_owned(),
            _ => format!("{other:?}").to_lowercase(),
        },
    }
}

/// Fatal configuration/programmer errors: the spec requires these to abort
/// construction or controller entry immediately rather than degrade a tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("scheduler period must be finite and strictly positive")]
    InvalidPeriod,

    #[error("audit duration must be strictly positive")]
    InvalidDuration,

    #[error("pid must be a positive integer greater than 1")]
    InvalidPid,

    #[error("stat file path pid does not match the constructed pid")]
    PidMismatch,

    #[error("neither hardware RAPL counters nor a sufficient fallback power model are available")]
    EnergySourceUnavailable,

    #[error("accumulator has already been finalised")]
    AlreadyFinalised,

    #[error("emission factor must be non-negative")]
    InvalidEmissionFactor,
}

impl ConfigError {
    /// The canonical kind string for this error, per the §7 table.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::InvalidPeriod => "invalid_period",
            ConfigError::InvalidDuration => "invalid_duration",
            ConfigError::InvalidPid => "invalid_pid",
            ConfigError::PidMismatch => "pid_mismatch",
            ConfigError::EnergySourceUnavailable => "energy_source_unavailable",
            ConfigError::AlreadyFinalised => "already_finalised",
            ConfigError::InvalidEmissionFactor => "invalid_emission_factor",
        }
    }
}
