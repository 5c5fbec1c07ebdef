//! Filesystem access abstraction for the pseudo-files this crate reads.
//!
//! Generalizes the teacher's `datasource::Reader` trait (`read_to_string`)
//! with a second, content-blind `readable` check, needed by the Probe
//! component (§4.1: "attempt read-access; do not read its contents yet").

use std::path::Path;

pub trait Reader: Send + Sync {
    fn read_to_string(
        &self,
        path: impl AsRef<Path> + Send,
    ) -> impl Future<Output = std::io::Result<String>> + Send;

    /// True if the file can be opened for reading right now. Must not read
    /// its contents (the probe only wants to know about access, not data).
    fn readable(&self, path: impl AsRef<Path> + Send) -> impl Future<Output = bool> + Send;

    /// Resolve symlinks, falling back to the nominal path when resolution
    /// fails (broken symlink, permission denied on an ancestor directory).
    fn canonicalize(&self, path: impl AsRef<Path> + Send) -> impl Future<Output = std::path::PathBuf> + Send;

    /// List the immediate entries of a directory. `None` on any I/O error;
    /// callers classify the failure themselves (see `src/error.rs`).
    fn read_dir(&self, path: impl AsRef<Path> + Send) -> impl Future<Output = std::io::Result<Vec<std::path::PathBuf>>> + Send;
}

#[derive(Clone, Default)]
pub struct TokioReader {}

impl TokioReader {
    pub fn new() -> Self {
        Self {}
    }
}

impl Reader for TokioReader {
    #[allow(clippy::manual_async_fn)]
    fn read_to_string(
        &self,
        path: impl AsRef<Path> + Send,
    ) -> impl Future<Output = std::io::Result<String>> + Send {
        async move { tokio::fs::read_to_string(path).await }
    }

    #[allow(clippy::manual_async_fn)]
    fn readable(&self, path: impl AsRef<Path> + Send) -> impl Future<Output = bool> + Send {
        async move { tokio::fs::File::open(path).await.is_ok() }
    }

    #[allow(clippy::manual_async_fn)]
    fn canonicalize(
        &self,
        path: impl AsRef<Path> + Send,
    ) -> impl Future<Output = std::path::PathBuf> + Send {
        async move {
            let path = path.as_ref();
            tokio::fs::canonicalize(path)
                .await
                .unwrap_or_else(|_| path.to_path_buf())
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn read_dir(
        &self,
        path: impl AsRef<Path> + Send,
    ) -> impl Future<Output = std::io::Result<Vec<std::path::PathBuf>>> + Send {
        async move {
            let mut entries = tokio::fs::read_dir(path).await?;
            let mut paths = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                paths.push(entry.path());
            }
            Ok(paths)
        }
    }
}
