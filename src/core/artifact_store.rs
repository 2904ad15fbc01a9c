//! Versioned, file-based artifact store.
//!
//! Layout under the output root:
//!
//! ```text
//! <root>/<phase_dir>/<name>/v0001.md
//! <root>/<phase_dir>/<name>/v0002.md
//! <root>/<phase_dir>/<name>/manifest.json
//! ```
//!
//! Versions are written side-by-side and never overwritten. The manifest holds
//! one record per version (status, timestamp, hash) and is replaced atomically
//! via write-then-rename. The latest record wins for reads.

use std::fs::OpenOptions as StdOpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use crate::domain::{ApprovalStatus, Artifact, ArtifactRef, Phase, VersionRecord};
use crate::error::{PipelineError, Result};

const MANIFEST_FILE: &str = "manifest.json";
const LOCK_FILE: &str = ".labflow.lock";

/// File-based artifact store rooted at the output directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

/// Exclusive advisory lock on an output directory.
///
/// Released when dropped.
#[derive(Debug)]
pub struct RunLock {
    file: std::fs::File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl ArtifactStore {
    /// Store rooted at `root`; nothing is created until the first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open (and create if needed) a store at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| PipelineError::storage(&root, e))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a phase
    pub fn phase_dir(&self, phase: Phase) -> PathBuf {
        self.root.join(phase.dir_name())
    }

    /// Directory holding every version of one artifact
    pub fn artifact_dir(&self, phase: Phase, name: &str) -> PathBuf {
        self.phase_dir(phase).join(name)
    }

    /// Take the advisory lock guarding this output directory.
    ///
    /// Fails immediately if another process holds it.
    pub fn lock(&self) -> Result<RunLock> {
        let path = self.root.join(LOCK_FILE);
        let file = StdOpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| PipelineError::storage(&path, e))?;

        file.try_lock_exclusive().map_err(|e| {
            PipelineError::storage(
                &path,
                io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("output directory is locked by another run: {}", e),
                ),
            )
        })?;

        Ok(RunLock { file, path })
    }

    /// Write a new version of an artifact
    pub async fn put(&self, phase: Phase, name: &str, content: &str) -> Result<ArtifactRef> {
        let dir = self.artifact_dir(phase, name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::storage(&dir, e))?;

        let mut records = self.read_manifest(phase, name).await?;
        let version = records.last().map(|r| r.version + 1).unwrap_or(1);
        let file = format!("v{:04}.md", version);
        let path = dir.join(&file);

        write_atomic(&path, content.as_bytes()).await?;

        let record = VersionRecord {
            version,
            file,
            produced_at: Utc::now(),
            status: ApprovalStatus::initial_for(phase),
            content_hash: content_hash(content),
            size_bytes: content.len() as u64,
        };
        records.push(record.clone());
        self.write_manifest(phase, name, &records).await?;

        debug!(%phase, name, version, "Stored artifact version");

        Ok(self.to_ref(phase, name, &record))
    }

    /// Content of the latest version
    pub async fn get(&self, phase: Phase, name: &str) -> Result<String> {
        self.latest(phase, name)
            .await?
            .map(|a| a.content)
            .ok_or_else(|| PipelineError::NotFound {
                phase,
                artifact: name.to_string(),
            })
    }

    /// Latest version with content
    pub async fn latest(&self, phase: Phase, name: &str) -> Result<Option<Artifact>> {
        let records = self.read_manifest(phase, name).await?;
        let Some(record) = records.last() else {
            return Ok(None);
        };

        let path = self.artifact_dir(phase, name).join(&record.file);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| PipelineError::storage(&path, e))?;

        Ok(Some(Artifact {
            phase,
            name: name.to_string(),
            version: record.version,
            content,
            produced_at: record.produced_at,
            status: record.status,
            content_hash: record.content_hash.clone(),
        }))
    }

    /// Handle to the latest version, without reading content
    pub async fn latest_ref(&self, phase: Phase, name: &str) -> Result<Option<ArtifactRef>> {
        let records = self.read_manifest(phase, name).await?;
        Ok(records.last().map(|r| self.to_ref(phase, name, r)))
    }

    /// Every stored version, oldest first
    pub async fn versions(&self, phase: Phase, name: &str) -> Result<Vec<ArtifactRef>> {
        let records = self.read_manifest(phase, name).await?;
        Ok(records.iter().map(|r| self.to_ref(phase, name, r)).collect())
    }

    pub async fn exists(&self, phase: Phase, name: &str) -> Result<bool> {
        Ok(self.latest_ref(phase, name).await?.is_some())
    }

    pub async fn is_approved(&self, phase: Phase, name: &str) -> Result<bool> {
        Ok(self
            .latest_ref(phase, name)
            .await?
            .map(|r| r.status == ApprovalStatus::Approved)
            .unwrap_or(false))
    }

    /// Change the approval status of the latest version.
    ///
    /// Only `Pending -> Approved` is accepted; content is never touched.
    pub async fn set_approval_status(
        &self,
        phase: Phase,
        name: &str,
        status: ApprovalStatus,
    ) -> Result<ArtifactRef> {
        let mut records = self.read_manifest(phase, name).await?;
        let Some(latest) = records.last_mut() else {
            return Err(PipelineError::NotFound {
                phase,
                artifact: name.to_string(),
            });
        };

        if !(latest.status == ApprovalStatus::Pending && status == ApprovalStatus::Approved) {
            return Err(PipelineError::InvalidApprovalTransition {
                phase,
                artifact: name.to_string(),
                from: latest.status,
                to: status,
            });
        }

        latest.status = status;
        let record = latest.clone();
        self.write_manifest(phase, name, &records).await?;

        debug!(%phase, name, version = record.version, %status, "Updated approval status");

        Ok(self.to_ref(phase, name, &record))
    }

    async fn read_manifest(&self, phase: Phase, name: &str) -> Result<Vec<VersionRecord>> {
        let path = self.artifact_dir(phase, name).join(MANIFEST_FILE);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::storage(&path, e)),
        };

        serde_json::from_str(&content).map_err(|e| {
            PipelineError::storage(&path, io::Error::new(io::ErrorKind::InvalidData, e))
        })
    }

    async fn write_manifest(
        &self,
        phase: Phase,
        name: &str,
        records: &[VersionRecord],
    ) -> Result<()> {
        let path = self.artifact_dir(phase, name).join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(records).map_err(|e| {
            PipelineError::storage(&path, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;

        write_atomic(&path, &json).await
    }

    fn to_ref(&self, phase: Phase, name: &str, record: &VersionRecord) -> ArtifactRef {
        ArtifactRef {
            phase,
            name: name.to_string(),
            version: record.version,
            path: self.artifact_dir(phase, name).join(&record.file),
            status: record.status,
            produced_at: record.produced_at,
        }
    }
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes)
        .await
        .map_err(|e| PipelineError::storage(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| PipelineError::storage(path, e))
}

/// Hash content (first 16 hex chars of SHA-256)
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
