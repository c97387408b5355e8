//! Directory-backed shared storage.
//!
//! Every process pointing at the same root behaves like a tab of one profile.
//! Layout per namespace:
//!
//! ```text
//! <root>/<namespace>/lease.json
//! <root>/<namespace>/entities/<hex(key)>.json
//! ```
//!
//! A lease is claimed by writing it to a temp file and hard-linking that into
//! place, so `lease.json` never exists half written. Taking over an expired
//! lease first claims `lease.takeover-<lease id>` with `create_new`; only the
//! tab holding that marker may replace the lease. Renewals replace it through a
//! temp file and `rename`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;

use tabsync_core::api::{
    CacheHandle, CacheMode, CachePlatform, LeaseError, OpenError, PersistenceError, RemoteEntity,
    TabId, TabOwnershipLease,
};

const LEASE_FILE: &str = "lease.json";
const TAKEOVER_PREFIX: &str = "lease.takeover-";
const ENTITIES_DIR: &str = "entities";

#[derive(Debug, Clone)]
pub struct FileCachePlatform {
    root: PathBuf,
}

impl FileCachePlatform {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(sanitize(namespace))
    }

    fn lease_path(&self, namespace: &str) -> PathBuf {
        self.namespace_dir(namespace).join(LEASE_FILE)
    }

    /// Current lease on disk, if any. A torn lease file counts as absent.
    pub async fn lease_holder(&self, namespace: &str) -> Option<TabOwnershipLease> {
        read_lease(&self.lease_path(namespace)).await.ok().flatten()
    }

    async fn claim_new(&self, path: &Path, lease: &TabOwnershipLease) -> Result<bool, LeaseError> {
        let bytes = serde_json::to_vec_pretty(lease).map_err(|e| LeaseError::Failed(e.to_string()))?;
        let tmp = write_temp(path, &bytes).await.map_err(lease_io)?;
        let linked = tokio::fs::hard_link(&tmp, path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(lease_io(e)),
        }
    }

    /// Replaces an abandoned lease, letting at most one contender through.
    async fn take_over(
        &self,
        dir: &Path,
        abandoned: &OnDisk,
        fresh: TabOwnershipLease,
    ) -> Result<TabOwnershipLease, LeaseError> {
        let path = dir.join(LEASE_FILE);
        let (marker_name, previous_holder) = match abandoned {
            OnDisk::Held(previous) => (previous.lease_id.clone(), previous.holder.to_string()),
            _ => ("torn".to_string(), "unknown".to_string()),
        };
        let busy = || LeaseError::Busy {
            holder: previous_holder.clone(),
        };
        let marker = dir.join(format!("{TAKEOVER_PREFIX}{}", sanitize(&marker_name)));
        let ttl = Duration::from_millis(fresh.ttl_ms);

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // A contender that died mid-takeover leaves its marker behind.
                if file_age(&marker).await >= ttl {
                    let _ = tokio::fs::remove_file(&marker).await;
                }
                return Err(busy());
            }
            Err(e) => return Err(lease_io(e)),
        }

        // Someone may have finished a takeover between our read and the marker.
        let still_abandoned = match (abandoned, read_state(&path).await) {
            (OnDisk::Held(seen), Ok(OnDisk::Held(now))) => now.is_same_grant(seen),
            (OnDisk::Torn { .. }, Ok(OnDisk::Torn { .. })) => true,
            _ => false,
        };
        let granted = match abandoned {
            OnDisk::Held(previous) => TabOwnershipLease::succeed(
                previous,
                fresh.holder.clone(),
                ttl,
                fresh.acquired_at,
            ),
            _ => fresh,
        };
        let outcome = if still_abandoned {
            write_lease(&path, &granted).await.map(|()| granted)
        } else {
            Err(busy())
        };
        let _ = tokio::fs::remove_file(&marker).await;
        outcome
    }
}

#[async_trait]
impl CachePlatform for FileCachePlatform {
    fn supports(&self, mode: CacheMode) -> bool {
        // Plain files give no cross-process write coordination.
        matches!(mode, CacheMode::SingleOwner)
    }

    async fn open_shared(
        &self,
        namespace: &str,
        mode: CacheMode,
    ) -> Result<Arc<dyn CacheHandle>, OpenError> {
        if !self.supports(mode) {
            return Err(OpenError::Unsupported);
        }
        let dir = self.namespace_dir(namespace).join(ENTITIES_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| OpenError::Failed(format!("{}: {e}", dir.display())))?;
        Ok(Arc::new(FileCache { dir, mode }))
    }

    async fn acquire_lease(
        &self,
        namespace: &str,
        holder: &TabId,
        ttl: Duration,
    ) -> Result<TabOwnershipLease, LeaseError> {
        let dir = self.namespace_dir(namespace);
        tokio::fs::create_dir_all(&dir).await.map_err(lease_io)?;
        let path = dir.join(LEASE_FILE);
        let now = Utc::now();

        let fresh = TabOwnershipLease::new(namespace, holder.clone(), ttl, now);
        if self.claim_new(&path, &fresh).await? {
            return Ok(fresh);
        }

        let current = match read_state(&path).await? {
            // Released between our claim attempt and the read.
            OnDisk::Absent => {
                if self.claim_new(&path, &fresh).await? {
                    return Ok(fresh);
                }
                return Err(LeaseError::Busy {
                    holder: "unknown".to_string(),
                });
            }
            OnDisk::Torn { age } if age < ttl => {
                return Err(LeaseError::Busy {
                    holder: "unknown".to_string(),
                })
            }
            torn @ OnDisk::Torn { .. } => {
                tracing::warn!(
                    target: "tabsync.cache",
                    namespace,
                    holder = %holder,
                    "replacing unreadable lease older than its ttl"
                );
                return self.take_over(&dir, &torn, fresh).await;
            }
            OnDisk::Held(current) => current,
        };

        if &current.holder == holder && !current.is_expired_at(now) {
            let renewed = current.renewed_at(now);
            write_lease(&path, &renewed).await?;
            return Ok(renewed);
        }
        if !current.is_expired_at(now) {
            return Err(LeaseError::Busy {
                holder: current.holder.to_string(),
            });
        }
        tracing::info!(
            target: "tabsync.cache",
            namespace,
            previous = %current.holder,
            holder = %holder,
            "taking over abandoned lease"
        );
        self.take_over(&dir, &OnDisk::Held(current), fresh).await
    }

    async fn renew_lease(&self, lease: &TabOwnershipLease) -> Result<TabOwnershipLease, LeaseError> {
        let path = self.lease_path(&lease.namespace);
        match read_lease(&path).await? {
            Some(current) if current.is_same_grant(lease) => {
                let now = Utc::now();
                // Past its ttl the grant may already be mid-takeover.
                if current.is_expired_at(now) {
                    return Err(LeaseError::Lost("lease expired before renewal".into()));
                }
                let renewed = current.renewed_at(now);
                write_lease(&path, &renewed).await?;
                Ok(renewed)
            }
            Some(current) => Err(LeaseError::Lost(format!("now held by {}", current.holder))),
            None => Err(LeaseError::Lost("lease file removed".into())),
        }
    }

    async fn release_lease(&self, lease: &TabOwnershipLease) -> Result<(), LeaseError> {
        let path = self.lease_path(&lease.namespace);
        if let Some(current) = read_lease(&path).await? {
            if current.is_same_grant(lease) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(lease_io(e)),
                }
            }
        }
        Ok(())
    }
}

/// What the lease file currently holds.
#[derive(Debug)]
enum OnDisk {
    Absent,
    Held(TabOwnershipLease),
    /// Present but not a lease; `age` is the time since it was last written.
    Torn { age: Duration },
}

async fn read_state(path: &Path) -> Result<OnDisk, LeaseError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(lease) => Ok(OnDisk::Held(lease)),
            Err(e) => {
                tracing::warn!(
                    target: "tabsync.cache",
                    path = %path.display(),
                    error = %e,
                    "unreadable lease file"
                );
                Ok(OnDisk::Torn {
                    age: file_age(path).await,
                })
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(OnDisk::Absent),
        Err(e) => Err(lease_io(e)),
    }
}

async fn read_lease(path: &Path) -> Result<Option<TabOwnershipLease>, LeaseError> {
    Ok(match read_state(path).await? {
        OnDisk::Held(lease) => Some(lease),
        OnDisk::Absent | OnDisk::Torn { .. } => None,
    })
}

/// Time since `path` was last modified; zero when unknown.
async fn file_age(path: &Path) -> Duration {
    tokio::fs::metadata(path)
        .await
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .unwrap_or_default()
}

async fn write_lease(path: &Path, lease: &TabOwnershipLease) -> Result<(), LeaseError> {
    let bytes = serde_json::to_vec_pretty(lease).map_err(|e| LeaseError::Failed(e.to_string()))?;
    replace_file(path, &bytes).await.map_err(lease_io)
}

fn lease_io(e: std::io::Error) -> LeaseError {
    LeaseError::Failed(e.to_string())
}

/// Writes `bytes` to a synced sibling temp file of `path` and returns its path.
async fn write_temp(path: &Path, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(tmp)
}

/// Write to a sibling temp file, fsync, then rename over `path`.
async fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = write_temp(path, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Namespaces come from the project id; keep them to one path component.
fn sanitize(namespace: &str) -> String {
    namespace
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn encode_key(key: &str) -> String {
    key.bytes().map(|b| format!("{b:02x}")).collect()
}

pub struct FileCache {
    dir: PathBuf,
    mode: CacheMode,
}

impl FileCache {
    fn entity_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }
}

fn cache_io(e: std::io::Error) -> PersistenceError {
    PersistenceError::Io(e.to_string())
}

#[async_trait]
impl CacheHandle for FileCache {
    fn mode(&self) -> CacheMode {
        self.mode
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntity>, PersistenceError> {
        match tokio::fs::read(self.entity_path(key)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PersistenceError::Io(format!("{key}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(cache_io(e)),
        }
    }

    async fn put(&self, key: &str, entity: RemoteEntity) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(&entity).map_err(|e| PersistenceError::Io(e.to_string()))?;
        replace_file(&self.entity_path(key), &bytes)
            .await
            .map_err(cache_io)
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(self.entity_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(cache_io(e)),
        }
    }

    async fn entry_count(&self) -> Result<usize, PersistenceError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(cache_io)?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await.map_err(cache_io)? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                count += 1;
            }
        }
        Ok(count)
    }
}
