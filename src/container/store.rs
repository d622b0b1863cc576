//! In-memory artifact store with lifecycle rules.
//!
//! Artifacts are gzip tar archives carrying a `META-INF/MANIFEST.MF`
//! entry. Starting an artifact walks it through the lifecycle:
//!
//! ```text
//! Installed ──▶ Resolved ──▶ Starting ──▶ Active
//!                  │             │
//!          fragment-host    activation-policy: lazy
//!          (stays here)     (stays here, start fails)
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::io::Read;
use std::path::Path;
use std::pin::Pin;

use flate2::read::GzDecoder;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::container::suite::ProbeContext;
use crate::container::ModuleContainer;
use crate::models::artifact::{ArtifactId, ArtifactInfo, ArtifactState};
use crate::payload::descriptor::{Manifest, MANIFEST_PATH};
use crate::{HarnessError, Result};

#[derive(Debug)]
struct Artifact {
    info: ArtifactInfo,
    manifest: Manifest,
    entries: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    last_id: u64,
    artifacts: BTreeMap<ArtifactId, Artifact>,
}

impl Inner {
    fn installed_at(&self, location: &str) -> Option<ArtifactId> {
        self.artifacts
            .values()
            .find(|a| a.info.location == location && a.info.state != ArtifactState::Uninstalled)
            .map(|a| a.info.id)
    }
}

/// Artifact registry of one container instance.
#[derive(Debug, Default)]
pub struct ArtifactContainer {
    inner: Mutex<Inner>,
}

impl ArtifactContainer {
    /// Empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `archive` under `location`.
    ///
    /// A location that is already installed returns its existing id without
    /// reading `archive`. The archive is decoded on the blocking pool before
    /// the registry is locked.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::ArtifactInstall` if the archive is not a
    /// gzip tar or lacks a valid manifest.
    pub async fn install(&self, location: &str, archive: Vec<u8>) -> Result<ArtifactId> {
        let known = self.inner.lock().await.installed_at(location);
        if let Some(existing) = known {
            debug!(location, artifact_id = %existing, "artifact already installed");
            return Ok(existing);
        }

        let (manifest, entries) = tokio::task::spawn_blocking(move || read_archive(&archive))
            .await
            .map_err(|err| {
                HarnessError::ArtifactInstall(format!("archive decoder failed: {err}"))
            })??;

        let mut inner = self.inner.lock().await;
        // Another install of the same location may have finished meanwhile.
        if let Some(existing) = inner.installed_at(location) {
            debug!(location, artifact_id = %existing, "artifact installed concurrently");
            return Ok(existing);
        }

        inner.last_id += 1;
        let id = ArtifactId(inner.last_id);
        let info = ArtifactInfo {
            id,
            location: location.to_owned(),
            symbolic_name: manifest.symbolic_name().map(str::to_owned),
            state: ArtifactState::Installed,
        };
        info!(
            artifact_id = %id,
            location,
            symbolic_name = info.symbolic_name.as_deref().unwrap_or(""),
            entries = entries.len(),
            "artifact installed"
        );
        inner.artifacts.insert(
            id,
            Artifact {
                info,
                manifest,
                entries,
            },
        );
        Ok(id)
    }

    /// Activate an installed artifact.
    ///
    /// Active artifacts are left alone. Fragments resolve but never
    /// activate, and that counts as success. Lazily activated artifacts
    /// remain `Starting`, which is reported as a failure.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::NotFound` for an unknown id, or
    /// `HarnessError::ArtifactStart` with the state the artifact was left in.
    pub async fn start(&self, artifact_id: ArtifactId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let artifact = inner
            .artifacts
            .get_mut(&artifact_id)
            .ok_or_else(|| HarnessError::NotFound(format!("artifact {artifact_id}")))?;

        match artifact.info.state {
            ArtifactState::Active => {
                debug!(artifact_id = %artifact_id, "artifact already active");
                return Ok(());
            }
            state @ (ArtifactState::Stopping | ArtifactState::Uninstalled) => {
                return Err(HarnessError::ArtifactStart { artifact_id, state });
            }
            ArtifactState::Installed | ArtifactState::Resolved | ArtifactState::Starting => {}
        }

        artifact.info.state = ArtifactState::Resolved;
        if artifact.manifest.is_fragment() {
            info!(artifact_id = %artifact_id, "fragment resolved, not activated");
            return Ok(());
        }

        artifact.info.state = ArtifactState::Starting;
        if artifact.manifest.is_lazy() {
            return Err(HarnessError::ArtifactStart {
                artifact_id,
                state: ArtifactState::Starting,
            });
        }

        artifact.info.state = ArtifactState::Active;
        info!(artifact_id = %artifact_id, "artifact active");
        Ok(())
    }

    /// Current state of an artifact.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::NotFound` for an unknown id.
    pub async fn state(&self, artifact_id: ArtifactId) -> Result<ArtifactState> {
        self.inner
            .lock()
            .await
            .artifacts
            .get(&artifact_id)
            .map(|a| a.info.state)
            .ok_or_else(|| HarnessError::NotFound(format!("artifact {artifact_id}")))
    }

    /// Snapshot of all artifacts, ordered by id.
    pub async fn artifacts(&self) -> Vec<ArtifactInfo> {
        self.inner
            .lock()
            .await
            .artifacts
            .values()
            .map(|a| a.info.clone())
            .collect()
    }

    /// Most recently installed active artifact declaring `host.method` as
    /// its entry point.
    pub async fn find_entry_point(&self, host: &str, method: &str) -> Option<ProbeContext> {
        let inner = self.inner.lock().await;
        inner
            .artifacts
            .values()
            .rev()
            .filter(|a| a.info.state == ArtifactState::Active)
            .find(|a| a.manifest.entry_point() == Some((host, method)))
            .map(|a| ProbeContext {
                artifact_id: a.info.id,
                symbolic_name: a.info.symbolic_name.clone(),
                entry_host: host.to_owned(),
                entry_method: method.to_owned(),
                headers: a
                    .manifest
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect(),
                entries: a.entries.clone(),
            })
    }
}

impl ModuleContainer for ArtifactContainer {
    fn install<'a>(
        &'a self,
        location: &'a str,
        archive: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<ArtifactId>> + Send + 'a>> {
        Box::pin(ArtifactContainer::install(self, location, archive))
    }

    fn start(&self, artifact_id: ArtifactId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(ArtifactContainer::start(self, artifact_id))
    }

    fn artifacts(&self) -> Pin<Box<dyn Future<Output = Vec<ArtifactInfo>> + Send + '_>> {
        Box::pin(ArtifactContainer::artifacts(self))
    }
}

/// Read the bytes behind an install location: a `file:` URL or a plain
/// path.
///
/// # Errors
///
/// Returns `HarnessError::ArtifactInstall` if the location uses another
/// scheme or cannot be read.
pub async fn fetch_location(location: &str) -> Result<Vec<u8>> {
    let path = match location.split_once(':') {
        Some(("file", rest)) => rest.strip_prefix("//").unwrap_or(rest),
        Some((scheme, _)) if scheme.len() > 1 => {
            return Err(HarnessError::ArtifactInstall(format!(
                "unsupported location scheme '{scheme}' in {location}"
            )))
        }
        // No scheme, or a drive letter.
        _ => location,
    };

    tokio::fs::read(Path::new(path))
        .await
        .map_err(|err| HarnessError::ArtifactInstall(format!("cannot read {location}: {err}")))
}

fn read_archive(archive: &[u8]) -> Result<(Manifest, Vec<String>)> {
    let mut reader = tar::Archive::new(GzDecoder::new(archive));
    let entries = reader.entries().map_err(malformed)?;

    let mut manifest = None;
    let mut names = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(malformed)?;
        let name = entry.path().map_err(malformed)?.to_string_lossy().into_owned();
        if name == MANIFEST_PATH && manifest.is_none() {
            let mut raw = String::new();
            entry.read_to_string(&mut raw).map_err(malformed)?;
            manifest = Some(Manifest::parse(&raw)?);
        }
        names.push(name);
    }

    let manifest = manifest
        .ok_or_else(|| HarnessError::ArtifactInstall(format!("archive has no {MANIFEST_PATH}")))?;
    Ok((manifest, names))
}

fn malformed(err: std::io::Error) -> HarnessError {
    HarnessError::ArtifactInstall(format!("malformed archive: {err}"))
}
