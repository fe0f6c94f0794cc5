//! Shared link registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.circlink/
//!   registry.yaml   (all links + id counter; mode 0600, replaced by rename)
//!   registry.lock   (flock target for read-modify-write)
//! ```
//!
//! # Concurrency model
//!
//! Every CLI invocation and every watcher is a separate process. Mutations go
//! through [`Registry::transaction`]: lock, load, mutate, save, unlock. The lock
//! is never held across anything slower than that. Readers do not lock; they
//! retry a load whose YAML fails to parse instead of reporting corruption.
//!
//! # API pattern
//!
//! [`Registry::at`] takes an explicit home (tests use `TempDir`);
//! [`Registry::open`] derives it from `dirs::home_dir()`.

use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, RegistryError};
use crate::lock;
use crate::paths::{ensure_circlink_root, lock_path, registry_path};
use crate::types::{Link, LinkDraft, LinkId, LinkToken};

pub const REGISTRY_VERSION: u32 = 1;

/// How many times a reader retries a registry that fails to parse.
pub const READ_ATTEMPTS: usize = 5;
pub const READ_RETRY_INTERVAL: Duration = Duration::from_millis(25);

// ---------------------------------------------------------------------------
// On-disk document
// ---------------------------------------------------------------------------

/// Root of `registry.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    pub version: u32,
    /// Next id to hand out. Only ever grows, so cleared ids are never reused.
    pub next_id: u64,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Default for RegistryFile {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            next_id: 1,
            links: Vec::new(),
        }
    }
}

impl RegistryFile {
    pub fn get(&self, id: LinkId) -> Option<&Link> {
        self.links.iter().find(|l| l.id == id)
    }

    pub fn get_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.iter_mut().find(|l| l.id == id)
    }

    fn allocate(&mut self) -> LinkId {
        // Guard against a hand-edited counter that lags behind existing ids.
        let floor = self.links.iter().map(|l| l.id.0 + 1).max().unwrap_or(1);
        let id = LinkId(self.next_id.max(floor));
        self.next_id = id.0 + 1;
        id
    }

    fn upsert(&mut self, link: Link) {
        self.next_id = self.next_id.max(link.id.0 + 1);
        match self.get_mut(link.id) {
            Some(existing) => *existing = link,
            None => {
                self.links.push(link);
                self.links.sort_by_key(|l| l.id);
            }
        }
    }
}

/// Resolve `token` against `links`.
///
/// - `all` → every id, ascending
/// - `last` → the entry with the greatest `created_at` (ties go to the higher id)
/// - `<n>` → `n` if present
///
/// An empty result is [`RegistryError::NotFound`].
pub fn resolve_in(links: &[Link], token: LinkToken) -> Result<Vec<LinkId>, RegistryError> {
    let mut ids: Vec<LinkId> = match token {
        LinkToken::All => links.iter().map(|l| l.id).collect(),
        LinkToken::Last => links
            .iter()
            .max_by_key(|l| (l.created_at, l.id))
            .map(|l| vec![l.id])
            .unwrap_or_default(),
        LinkToken::Id(id) => links
            .iter()
            .filter(|l| l.id == id)
            .map(|l| l.id)
            .collect(),
    };
    if ids.is_empty() {
        return Err(RegistryError::NotFound {
            token: token.to_string(),
        });
    }
    ids.sort();
    ids.dedup();
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Registry handle
// ---------------------------------------------------------------------------

/// Handle on the registry rooted at `<home>/.circlink/`. Cheap to clone; holds
/// no open files between calls.
#[derive(Debug, Clone)]
pub struct Registry {
    home: PathBuf,
}

impl Registry {
    pub fn at(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
        }
    }

    /// `Registry::at` convenience wrapper.
    pub fn open() -> Result<Self, RegistryError> {
        Ok(Self::at(&crate::paths::home()?))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn path(&self) -> PathBuf {
        registry_path(&self.home)
    }

    // -- reads --------------------------------------------------------------

    /// Lock-free snapshot of the whole registry.
    ///
    /// A missing file is an empty registry. A parse failure is retried
    /// [`READ_ATTEMPTS`] times before being reported.
    pub fn load(&self) -> Result<RegistryFile, RegistryError> {
        let path = self.path();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let contents = match std::fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(RegistryFile::default())
                }
                Err(err) => return Err(io_err(&path, err)),
            };
            if contents.trim().is_empty() {
                // Either mid-write or a registry that was created but never filled.
                if attempt < READ_ATTEMPTS {
                    sleep(READ_RETRY_INTERVAL);
                    continue;
                }
                return Ok(RegistryFile::default());
            }
            match serde_yaml::from_str::<RegistryFile>(&contents) {
                Ok(file) => return Ok(file),
                Err(_) if attempt < READ_ATTEMPTS => sleep(READ_RETRY_INTERVAL),
                Err(source) => return Err(RegistryError::Parse { path, source }),
            }
        }
    }

    pub fn get(&self, id: LinkId) -> Result<Option<Link>, RegistryError> {
        Ok(self.load()?.get(id).cloned())
    }

    /// Like [`Registry::get`], but a missing id is [`RegistryError::NotFound`].
    pub fn require(&self, id: LinkId) -> Result<Link, RegistryError> {
        self.get(id)?.ok_or_else(|| RegistryError::NotFound {
            token: id.to_string(),
        })
    }

    /// Every link, ascending by id.
    pub fn list_all(&self) -> Result<Vec<Link>, RegistryError> {
        let mut links = self.load()?.links;
        links.sort_by_key(|l| l.id);
        Ok(links)
    }

    pub fn resolve_alias(&self, token: LinkToken) -> Result<Vec<LinkId>, RegistryError> {
        resolve_in(&self.load()?.links, token)
    }

    // -- writes -------------------------------------------------------------

    /// Run `f` inside the exclusive critical section and persist the result.
    ///
    /// The document is only written back when `f` returns `Ok`.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut RegistryFile) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        ensure_circlink_root(&self.home)?;
        let _guard = lock::acquire(&lock_path(&self.home))?;
        let mut file = self.load()?;
        let value = f(&mut file)?;
        self.save(&file)?;
        Ok(value)
    }

    /// Reserve the next id without creating an entry.
    pub fn allocate_id(&self) -> Result<LinkId, RegistryError> {
        self.transaction(|file| Ok(file.allocate()))
    }

    /// Allocate an id and insert a `Starting` entry for `draft` in one step.
    pub fn create(&self, draft: LinkDraft) -> Result<Link, RegistryError> {
        self.transaction(|file| {
            let id = file.allocate();
            let link = Link::from_draft(id, draft, Utc::now());
            file.upsert(link.clone());
            Ok(link)
        })
    }

    pub fn upsert(&self, link: &Link) -> Result<(), RegistryError> {
        self.transaction(|file| {
            file.upsert(link.clone());
            Ok(())
        })
    }

    /// Read-modify-write a single entry. Returns the updated link, or `None`
    /// (and writes nothing new) if the id is absent.
    pub fn update(
        &self,
        id: LinkId,
        f: impl FnOnce(&mut Link),
    ) -> Result<Option<Link>, RegistryError> {
        self.transaction(|file| {
            Ok(file.get_mut(id).map(|link| {
                f(link);
                link.clone()
            }))
        })
    }

    /// Physically remove an entry. Returns it if it existed.
    pub fn remove(&self, id: LinkId) -> Result<Option<Link>, RegistryError> {
        self.transaction(|file| {
            let index = file.links.iter().position(|l| l.id == id);
            Ok(index.map(|i| file.links.remove(i)))
        })
    }

    /// Atomic write: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
    fn save(&self, file: &RegistryFile) -> Result<(), RegistryError> {
        ensure_circlink_root(&self.home)?;
        let path = self.path();
        let tmp = path.with_extension("yaml.tmp");
        let yaml = serde_yaml::to_string(file)?;
        std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Destination, LinkOptions, LinkStatus, SourcePattern};
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn draft(name: &str) -> LinkDraft {
        LinkDraft {
            name: Some(name.to_string()),
            source: SourcePattern {
                pattern: PathBuf::from("/work/*.py"),
                recursive: false,
                base_dir: PathBuf::from("/work"),
            },
            dest: Destination::Explicit {
                path: PathBuf::from("/mnt/board"),
            },
            options: LinkOptions::default(),
        }
    }

    #[test]
    fn missing_registry_loads_empty() {
        let home = TempDir::new().unwrap();
        let file = Registry::at(home.path()).load().expect("load");
        assert!(file.links.is_empty());
        assert_eq!(file.next_id, 1);
    }

    #[test]
    fn create_assigns_sequential_ids_and_starting_status() {
        let home = TempDir::new().unwrap();
        let registry = Registry::at(home.path());
        let a = registry.create(draft("a")).unwrap();
        let b = registry.create(draft("b")).unwrap();
        assert_eq!(a.id, LinkId(1));
        assert_eq!(b.id, LinkId(2));
        assert_eq!(a.status, LinkStatus::Starting);
        assert_eq!(registry.list_all().unwrap().len(), 2);
    }

    #[test]
    fn ids_are_not_reused_after_remove() {
        let home = TempDir::new().unwrap();
        let registry = Registry::at(home.path());
        let first = registry.create(draft("a")).unwrap();
        let second = registry.create(draft("b")).unwrap();
        registry.remove(second.id).unwrap();
        registry.remove(first.id).unwrap();
        let third = registry.create(draft("c")).unwrap();
        assert_eq!(third.id, LinkId(3));
        assert_eq!(registry.allocate_id().unwrap(), LinkId(4));
    }

    #[test]
    fn update_missing_id_returns_none() {
        let home = TempDir::new().unwrap();
        let registry = Registry::at(home.path());
        let result = registry.update(LinkId(9), |l| l.mark_stopped()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn upsert_replaces_and_bumps_counter() {
        let home = TempDir::new().unwrap();
        let registry = Registry::at(home.path());
        let mut link = registry.create(draft("a")).unwrap();
        link.id = LinkId(10);
        registry.upsert(&link).unwrap();
        link.name = Some("renamed".into());
        registry.upsert(&link).unwrap();

        let all = registry.list_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(registry.require(LinkId(10)).unwrap().name.as_deref(), Some("renamed"));
        assert_eq!(registry.allocate_id().unwrap(), LinkId(11));
    }

    #[test]
    fn resolve_last_uses_created_at_not_id() {
        let home = TempDir::new().unwrap();
        let registry = Registry::at(home.path());
        let mut older = registry.create(draft("a")).unwrap();
        let newer = registry.create(draft("b")).unwrap();
        older.created_at = newer.created_at + ChronoDuration::seconds(10);
        registry.upsert(&older).unwrap();

        let ids = registry.resolve_alias(LinkToken::Last).unwrap();
        assert_eq!(ids, vec![older.id]);
    }

    #[test]
    fn resolve_on_empty_registry_is_not_found() {
        let home = TempDir::new().unwrap();
        let registry = Registry::at(home.path());
        for token in [LinkToken::All, LinkToken::Last, LinkToken::Id(LinkId(1))] {
            let err = registry.resolve_alias(token).unwrap_err();
            assert!(matches!(err, RegistryError::NotFound { .. }), "{token}");
        }
    }

    #[test]
    fn failed_transaction_writes_nothing() {
        let home = TempDir::new().unwrap();
        let registry = Registry::at(home.path());
        registry.create(draft("a")).unwrap();
        let before = std::fs::read_to_string(registry.path()).unwrap();

        let result: Result<(), _> = registry.transaction(|file| {
            file.links.clear();
            Err(RegistryError::NotFound {
                token: "x".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(registry.path()).unwrap(), before);
    }

    #[test]
    fn registry_file_has_owner_only_permissions() {
        let home = TempDir::new().unwrap();
        let registry = Registry::at(home.path());
        registry.create(draft("a")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(registry.path())
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(mode, 0o600);
        }
        let tmp = registry.path().with_extension("yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[cfg(unix)]
    #[test]
    fn first_transaction_creates_private_directory() {
        use std::os::unix::fs::PermissionsExt;

        let home = TempDir::new().unwrap();
        let registry = Registry::at(home.path());
        registry.allocate_id().unwrap();
        let dir = crate::paths::circlink_root(home.path());
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
        assert!(lock_path(home.path()).exists());
    }
}
