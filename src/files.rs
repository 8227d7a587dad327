//! Replay of recorded feed payloads from a directory

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{config::FilesConfig, errors::EramError};

/// Sorted list of recordings with a cursor.
///
/// The cursor never moves past the last file, so a replay that outlives
/// its recordings keeps delivering the final one.
#[derive(Debug, Clone)]
pub struct FileList {
    files: Vec<PathBuf>,
    current: usize,
}

impl FileList {
    /// Every file in `directory` with the given extension, sorted by name
    pub fn from_dir(directory: &Path, extension: &str) -> Result<Self, EramError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(directory)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
                files.push(path);
            }
        }
        Ok(Self::from_list(files))
    }

    pub fn from_list(mut files: Vec<PathBuf>) -> Self {
        files.sort();
        Self { files, current: 0 }
    }

    pub fn current(&self) -> Option<&Path> {
        self.files.get(self.current).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Advance unless already on the last file
    pub fn next_file(&mut self) -> Option<&Path> {
        if self.current + 1 < self.files.len() {
            self.current += 1;
        }
        self.current()
    }
}

/// Send one recording to `tx` per `interval` until `shutdown` fires or the
/// receiver is dropped.
pub async fn replay(
    config: FilesConfig,
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
) -> Result<(), EramError> {
    let mut files = FileList::from_dir(&config.directory, &config.extension)?;
    if files.is_empty() {
        return Err(EramError::ConfigurationError {
            message: format!(
                "No .{} files found in {}",
                config.extension,
                config.directory.display()
            ),
        });
    }
    info!(
        "Replaying {} recordings from {}",
        files.len(),
        config.directory.display()
    );

    let mut path = files.current().map(Path::to_path_buf);
    while let Some(current) = path {
        match tokio::fs::read_to_string(&current).await {
            Ok(payload) => {
                debug!("Replaying {}", current.display());
                if tx.send(payload).await.is_err() {
                    return Err(EramError::ChannelClosed);
                }
            }
            Err(e) => error!("Failed to read {}: {}", current.display(), e),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
        path = files.next_file().map(Path::to_path_buf);
    }
    Ok(())
}
