//! File relay
//!
//! An upload source for components that produce whole files. They hand
//! paths to [`FileRelay::enqueue`]; the relay keeps the pending list in the
//! parameter store so it survives restarts, prunes files that vanished on
//! every check, and announces each finished upload with
//! [`PlatformEvent::UploadCompleted`].
//!
//! Other processes never write the pending list. They drop a note into the
//! inbox under the relay root with [`FileRelay::submit_to`], and the owning
//! relay moves it into the list on its next refresh.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::Utc;
use harness_core::{
    ManifestReceiver, Parameters, PeriodicTask, Platform, PlatformEvent, TaskBehavior,
};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, UploadError};
use crate::source::{UploadFile, UploadSource};

/// Name of the relay task and upload source
pub const RELAY_TASK_NAME: &str = "file_relay";
/// Store key of the pending path list
pub const RELAY_PATHS_KEY: &str = "FileRelay.paths";
/// Default interval between pending list refreshes (15 minutes)
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 900;
/// Directory under the relay root that collects submitted paths
pub const INBOX_DIR: &str = ".inbox";
/// Extension of a complete inbox note
const NOTE_EXTENSION: &str = "path";

/// Orders notes written within one clock tick
static NOTE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// File relay tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayParameters {
    /// Seconds between pending list refreshes
    pub check_interval_secs: u64,
}

impl Default for RelayParameters {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
        }
    }
}

impl Parameters for RelayParameters {
    fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// File relay status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatus {
    /// Bytes waiting for upload
    pub bytes_available: u64,
    /// Files waiting for upload
    pub files_available: u64,
}

/// Size of `path` if it is an existing, regular, readable file
async fn available(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| UploadError::rejected(path, format!("cannot stat: {e}")))?;
    if !metadata.is_file() {
        return Err(UploadError::rejected(path, "not a regular file"));
    }
    tokio::fs::File::open(path)
        .await
        .map_err(|e| UploadError::rejected(path, format!("not readable: {e}")))?;
    Ok(metadata.len())
}

/// Task behavior of the file relay
pub struct RelayTask {
    root: PathBuf,
    /// Pending paths in arrival order, no duplicates
    paths: Mutex<Vec<PathBuf>>,
}

impl RelayTask {
    fn new(root: PathBuf, paths: Vec<PathBuf>) -> Self {
        Self {
            root,
            paths: Mutex::new(paths),
        }
    }

    /// Backend name of `path`: relative to the relay root, or its file name
    pub fn destination_name(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).ok().filter(|relative| {
            relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
        });
        match relative {
            Some(relative) if relative.components().next().is_some() => relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            _ => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
        }
    }

    fn inbox(&self) -> PathBuf {
        self.root.join(INBOX_DIR)
    }

    /// Append the paths noted in the inbox to `paths`.
    ///
    /// Returns the notes read; they are removed once the list is persisted.
    async fn read_inbox(&self, paths: &mut Vec<PathBuf>) -> Vec<PathBuf> {
        let mut entries = match tokio::fs::read_dir(self.inbox()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read relay inbox");
                return Vec::new();
            }
        };

        let mut notes = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let note = entry.path();
                    if note.extension() == Some(OsStr::new(NOTE_EXTENSION)) {
                        notes.push(note);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read relay inbox");
                    break;
                }
            }
        }
        // Note names start with the submission time
        notes.sort();

        let mut read = Vec::with_capacity(notes.len());
        for note in notes {
            match tokio::fs::read_to_string(&note).await {
                Ok(contents) => {
                    let path = PathBuf::from(contents.trim_end());
                    if !paths.contains(&path) {
                        info!(path = %path.display(), "Picked up submitted file");
                        paths.push(path);
                    }
                    read.push(note);
                }
                Err(e) => warn!(note = %note.display(), error = %e, "Skipping unreadable inbox note"),
            }
        }
        read
    }

    /// Collect submitted paths, drop vanished files, recount what is left
    /// and persist the list
    async fn refresh(&self, task: &PeriodicTask<Self>) {
        let mut paths = self.paths.lock().await;
        let notes = self.read_inbox(&mut paths).await;

        let mut bytes = 0u64;
        let mut kept = Vec::with_capacity(paths.len());
        for path in paths.drain(..) {
            match available(&path).await {
                Ok(length) => {
                    bytes += length;
                    kept.push(path);
                }
                Err(e) => warn!(error = %e, "Dropping pending file"),
            }
        }
        *paths = kept;

        let files = paths.len() as u64;
        task.update_status(|status| {
            status.bytes_available = bytes;
            status.files_available = files;
        });
        debug!(files, bytes, "Refreshed pending files");

        if let Err(e) = persist(task.platform(), &paths).await {
            warn!(error = %e, "Failed to persist pending files");
            return;
        }
        for note in notes {
            if let Err(e) = tokio::fs::remove_file(&note).await {
                warn!(note = %note.display(), error = %e, "Failed to remove inbox note");
            }
        }
    }
}

async fn persist(platform: &Platform, paths: &[PathBuf]) -> Result<()> {
    let blob = serde_json::to_string(paths)?;
    platform.store.save(RELAY_PATHS_KEY, &blob).await?;
    Ok(())
}

async fn recover(platform: &Platform) -> Result<Vec<PathBuf>> {
    match platform.store.load(RELAY_PATHS_KEY).await? {
        Some(blob) => Ok(serde_json::from_str(&blob)?),
        None => Ok(Vec::new()),
    }
}

#[async_trait]
impl TaskBehavior for RelayTask {
    type Params = RelayParameters;
    type Status = RelayStatus;

    fn new_parameters(&self) -> RelayParameters {
        RelayParameters::default()
    }

    async fn check(
        &self,
        task: &PeriodicTask<Self>,
        _parameters: Arc<RelayParameters>,
    ) -> harness_core::Result<()> {
        self.refresh(task).await;
        Ok(())
    }

    async fn refresh_status(&self, task: &PeriodicTask<Self>) {
        self.refresh(task).await;
    }

    async fn on_stop(&self, task: &PeriodicTask<Self>) {
        let paths = self.paths.lock().await;
        if let Err(e) = persist(task.platform(), &paths).await {
            warn!(error = %e, "Failed to persist pending files");
        }
    }
}

/// Upload source relaying files other components hand over
#[derive(Clone, Debug)]
pub struct FileRelay {
    task: PeriodicTask<RelayTask>,
}

impl FileRelay {
    /// Create a stopped relay, recovering the pending list from the store.
    ///
    /// Destination names are relative to `root`.
    pub async fn new(root: impl Into<PathBuf>, platform: Platform) -> Self {
        let paths = recover(&platform).await.unwrap_or_else(|e| {
            warn!(error = %e, "Pending file list is unreadable, starting empty");
            Vec::new()
        });
        if !paths.is_empty() {
            info!(files = paths.len(), "Recovered pending files");
        }
        Self {
            task: PeriodicTask::new(RELAY_TASK_NAME, RelayTask::new(root.into(), paths), platform),
        }
    }

    /// Underlying periodic task
    pub fn task(&self) -> &PeriodicTask<RelayTask> {
        &self.task
    }

    /// The relay as a manifest receiver
    pub fn as_receiver(&self) -> Arc<dyn ManifestReceiver> {
        Arc::new(self.task.clone())
    }

    /// The relay as an upload source.
    ///
    /// Sources are registered by identity, so keep the returned handle to
    /// unregister it later.
    pub fn as_source(&self) -> Arc<dyn UploadSource> {
        Arc::new(self.clone())
    }

    /// Start the relay task
    pub async fn start(&self) {
        self.task.start().await;
    }

    /// Stop the relay task
    pub async fn stop(&self) {
        self.task.stop().await;
    }

    /// Queue `path` for upload.
    ///
    /// Only existing, regular, readable files are accepted. Returns false if
    /// the path is already pending.
    pub async fn enqueue(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref().to_path_buf();
        let length = available(&path).await?;

        let behavior = self.task.behavior();
        let mut paths = behavior.paths.lock().await;
        if paths.contains(&path) {
            debug!(path = %path.display(), "File already pending");
            return Ok(false);
        }
        paths.push(path.clone());
        persist(self.task.platform(), &paths).await?;

        let files = paths.len() as u64;
        self.task.update_status(|status| {
            status.bytes_available += length;
            status.files_available = files;
        });
        info!(path = %path.display(), bytes = length, "Queued file for upload");
        Ok(true)
    }

    /// Hand `path` to the relay owning `root`, which may run in another
    /// process.
    ///
    /// The file is validated now and joins the pending list on the owner's
    /// next refresh. Returns the inbox note written.
    pub async fn submit_to(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        available(path).await?;
        let text = path
            .to_str()
            .ok_or_else(|| UploadError::rejected(path, "path is not valid UTF-8"))?;

        let inbox = root.as_ref().join(INBOX_DIR);
        tokio::fs::create_dir_all(&inbox).await?;
        let stem = format!(
            "{:020}-{:010}-{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            NOTE_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            Uuid::new_v4()
        );
        let staging = inbox.join(format!("{stem}.tmp"));
        let note = inbox.join(format!("{stem}.{NOTE_EXTENSION}"));
        tokio::fs::write(&staging, text).await?;
        tokio::fs::rename(&staging, &note).await?;

        info!(path = %path.display(), note = %note.display(), "Submitted file to relay");
        Ok(note)
    }

    /// [`FileRelay::submit_to`] this relay's root
    pub async fn submit(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        Self::submit_to(&self.task.behavior().root, path).await
    }

    /// Paths waiting for upload, in arrival order
    pub async fn pending(&self) -> Vec<PathBuf> {
        self.task.behavior().paths.lock().await.clone()
    }
}

#[async_trait]
impl UploadSource for FileRelay {
    fn name(&self) -> String {
        RELAY_TASK_NAME.to_string()
    }

    async fn prepare(&self) {
        self.task.behavior().refresh(&self.task).await;
    }

    async fn has_next(&self) -> bool {
        !self.task.behavior().paths.lock().await.is_empty()
    }

    async fn bytes_available(&self) -> u64 {
        self.task.status().bytes_available
    }

    async fn next(&self) -> Option<UploadFile> {
        let behavior = self.task.behavior();
        let mut paths = behavior.paths.lock().await;
        while let Some(path) = paths.first().cloned() {
            match available(&path).await {
                Ok(length) => {
                    let destination = behavior.destination_name(&path);
                    return Some(UploadFile::new(path, destination, length));
                }
                Err(e) => {
                    warn!(error = %e, "Dropping pending file");
                    paths.remove(0);
                }
            }
        }
        None
    }

    async fn complete(&self, file: &UploadFile, success: bool) {
        if !success {
            debug!(path = %file.source_path.display(), "Upload failed, keeping file");
            return;
        }

        let behavior = self.task.behavior();
        let mut paths = behavior.paths.lock().await;
        paths.retain(|path| path != &file.source_path);
        if let Err(e) = persist(self.task.platform(), &paths).await {
            warn!(error = %e, "Failed to persist pending files");
        }
        drop(paths);

        self.task.update_status(|status| {
            status.bytes_available = status.bytes_available.saturating_sub(file.length);
            status.files_available = status.files_available.saturating_sub(1);
        });
        self.task.platform().bus.publish(PlatformEvent::UploadCompleted {
            path: file.source_path.clone(),
        });
        debug!(path = %file.source_path.display(), "Relayed file uploaded");
    }
}
