//! JSON-file credential store
//!
//! The file holds the credential of each backend and the logged-in session,
//! and other processes may rewrite it at any time. Reads are served from
//! memory while the file's modification time and length are unchanged.
//! Every write re-reads the file under the write lock, then persists the
//! whole document through a temp file and an atomic rename, so readers see
//! either the old or the new credential and an external write is never
//! overwritten by a stale copy.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use carelink_core::{CredentialStore, SwapOutcome};
use carelink_domain::{Backend, Credential, Result, Session, TransportError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    credentials: BTreeMap<Backend, Credential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session: Option<Session>,
}

/// File contents last seen by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    fn of(metadata: &Metadata) -> Self {
        Self { modified: metadata.modified().ok(), len: metadata.len() }
    }
}

#[derive(Debug, Clone, Default)]
struct Cached {
    document: StoreDocument,
    fingerprint: Option<Fingerprint>,
}

/// [`CredentialStore`] persisted to a JSON file.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    state: RwLock<Cached>,
    /// Serializes writers, including the disk round trip.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    /// Returns `TransportError::CredentialStore` if the file exists but cannot
    /// be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cached = read_cached(&path)?;
        debug!(
            path = %path.display(),
            backends = cached.document.credentials.len(),
            "credential store opened"
        );
        Ok(Self { path, state: RwLock::new(cached), write_lock: Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file unconditionally.
    ///
    /// # Errors
    /// Returns `TransportError::CredentialStore` if the file cannot be read.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.load_from_disk().await?;
        info!(path = %self.path.display(), "credential store reloaded");
        Ok(())
    }

    /// Replace the logged-in session.
    ///
    /// # Errors
    /// Returns `TransportError::CredentialStore` if the file cannot be read
    /// or written.
    pub async fn set_session(&self, session: Option<Session>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.load_from_disk().await?;
        next.session = session;
        self.commit(next).await
    }

    /// Current document, re-read only if the file changed since last seen.
    async fn current(&self) -> Result<StoreDocument> {
        let on_disk = tokio::fs::metadata(&self.path).await.ok().map(|m| Fingerprint::of(&m));
        {
            let state = self.state.read();
            if state.fingerprint == on_disk {
                return Ok(state.document.clone());
            }
        }
        debug!(path = %self.path.display(), "credential file changed on disk");
        self.load_from_disk().await
    }

    async fn load_from_disk(&self) -> Result<StoreDocument> {
        let path = self.path.clone();
        let cached = tokio::task::spawn_blocking(move || read_cached(&path))
            .await
            .map_err(|e| store_error("read task failed", e))??;
        let document = cached.document.clone();
        *self.state.write() = cached;
        Ok(document)
    }

    /// Persist `next`, then publish it. Caller holds `write_lock`.
    async fn commit(&self, next: StoreDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&next)
            .map_err(|e| store_error("cannot encode credential store", e))?;
        let path = self.path.clone();
        let fingerprint = tokio::task::spawn_blocking(move || {
            write_atomically(&path, &bytes)?;
            Ok::<_, TransportError>(std::fs::metadata(&path).ok().map(|m| Fingerprint::of(&m)))
        })
        .await
        .map_err(|e| store_error("persist task failed", e))??;
        *self.state.write() = Cached { document: next, fingerprint };
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get_current_credential(&self, backend: Backend) -> Result<Option<Credential>> {
        Ok(self.current().await?.credentials.remove(&backend))
    }

    async fn get_logged_in_user(&self) -> Result<Option<Session>> {
        Ok(self.current().await?.session)
    }

    async fn set_credential(&self, backend: Backend, credential: Credential) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.load_from_disk().await?;
        next.credentials.insert(backend, credential);
        self.commit(next).await?;
        debug!(%backend, "credential persisted");
        Ok(())
    }

    async fn compare_and_set(
        &self,
        backend: Backend,
        expected_access_token: Option<&str>,
        credential: Credential,
    ) -> Result<SwapOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.load_from_disk().await?;

        let current = next.credentials.get(&backend);
        let matches = match (current, expected_access_token) {
            (Some(current), Some(expected)) => current.has_access_token(expected),
            (None, None) => true,
            _ => false,
        };
        if !matches {
            return Ok(SwapOutcome::Superseded(current.cloned()));
        }

        next.credentials.insert(backend, credential);
        self.commit(next).await?;
        debug!(%backend, "credential swapped");
        Ok(SwapOutcome::Swapped)
    }

    async fn clear(&self, backend: Backend) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.load_from_disk().await?;
        if next.credentials.remove(&backend).is_none() {
            return Ok(());
        }
        self.commit(next).await?;
        debug!(%backend, "credential cleared");
        Ok(())
    }
}

/// Fingerprint is taken before the read so a concurrent rewrite shows up
/// as a change on the next access.
fn read_cached(path: &Path) -> Result<Cached> {
    let fingerprint = std::fs::metadata(path).ok().map(|m| Fingerprint::of(&m));
    let document = read_document(path)?;
    Ok(Cached { document, fingerprint })
}

fn read_document(path: &Path) -> Result<StoreDocument> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(StoreDocument::default()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| store_error(&format!("corrupt credential file {}", path.display()), e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
        Err(e) => Err(store_error(&format!("cannot read {}", path.display()), e)),
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| store_error("cannot create store directory", e))?;

    let mut file =
        NamedTempFile::new_in(dir).map_err(|e| store_error("cannot create temp file", e))?;
    file.write_all(bytes).map_err(|e| store_error("cannot write temp file", e))?;
    file.as_file().sync_all().map_err(|e| store_error("cannot sync temp file", e))?;
    file.persist(path).map_err(|e| store_error("cannot replace credential file", e.error))?;
    Ok(())
}

fn store_error(context: &str, err: impl std::fmt::Display) -> TransportError {
    TransportError::CredentialStore(format!("{context}: {err}"))
}
