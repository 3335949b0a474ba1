//! The catalog: a denormalized summary of every atom, persisted as one file.
//!
//! [`CatalogIndex`] caches the catalog in memory behind a single mutex. Every
//! operation, read or write, holds that mutex for its whole
//! load/mutate/persist cycle. Lifecycle operations take the guard themselves
//! (see [`CatalogIndex::lock`]) so the atom write and the catalog write are
//! ordered against every other writer in the process.
//!
//! Two processes pointed at the same storage root are not coordinated and
//! can overwrite each other's index file.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::{
    atom::{Atom, AtomStatus, AtomType, Confidence},
    atom_id,
    data_dir::DataDir,
    encoding::{self, Encoding},
    error::Result,
    repository::AtomRepository,
};

/// Current catalog format version.
pub const CATALOG_VERSION: u32 = 1;

/// One atom as seen by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: AtomType,
    pub status: AtomStatus,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub path: String,
    pub updated_at: String,
    /// Retrieval counter kept by older writers of the index. Carried through
    /// updates unchanged; not used for ranking.
    #[serde(default)]
    pub popularity: u32,
}

impl CatalogEntry {
    pub fn from_atom(atom: &Atom) -> Self {
        Self {
            id: atom.id.clone(),
            title: atom.title.clone(),
            kind: atom.kind,
            status: atom.status,
            confidence: atom.confidence,
            language: atom.language.clone(),
            tags: atom.tags.clone(),
            path: format!("atoms/{}.{}", atom.id, Encoding::Canonical.extension()),
            updated_at: atom.updated_at.clone(),
            popularity: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub version: u32,
    pub updated_at: String,
    #[serde(default)]
    pub atoms: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self {
            version: CATALOG_VERSION,
            updated_at: now_timestamp(),
            atoms: Vec::new(),
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<&CatalogEntry> {
        self.atoms.iter().find(|entry| entry.id == id)
    }

    /// Replace the entry with the same ID in place, or append.
    ///
    /// A replaced entry keeps its stored `popularity`.
    pub fn add_or_update(&mut self, mut entry: CatalogEntry) {
        match self.atoms.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => {
                entry.popularity = existing.popularity;
                *existing = entry;
            }
            None => self.atoms.push(entry),
        }
        self.updated_at = now_timestamp();
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let Some(pos) = self.atoms.iter().position(|e| e.id == id) else {
            return false;
        };
        self.atoms.remove(pos);
        self.updated_at = now_timestamp();
        true
    }

    pub fn next_id(&self) -> Result<String> {
        atom_id::next_id(self.atoms.iter().map(|e| e.id.as_str()))
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

/// An atom that could not be loaded during a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub id: String,
    pub error: String,
}

impl LoadFailure {
    pub fn new(id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            id: id.into(),
            error: error.to_string(),
        }
    }
}

/// Result of [`CatalogIndex::rebuild_from_atoms`].
#[derive(Debug, Clone)]
pub struct Rebuild {
    pub catalog: Catalog,
    pub failures: Vec<LoadFailure>,
}

/// Result of [`CatalogIndex::migrate_and_rebuild`].
#[derive(Debug, Clone)]
pub struct Migration {
    pub catalog: Catalog,
    pub migrated: usize,
    pub failures: Vec<LoadFailure>,
}

#[derive(Debug)]
pub struct CatalogIndex {
    data_dir: DataDir,
    cached: Mutex<Option<Catalog>>,
}

impl CatalogIndex {
    pub fn new(data_dir: DataDir) -> Self {
        Self {
            data_dir,
            cached: Mutex::new(None),
        }
    }

    /// Take the catalog lock.
    ///
    /// A lock poisoned by a panicking holder is recovered with its cache
    /// dropped, so the next access reloads from disk.
    pub fn lock(&self) -> CatalogGuard<'_> {
        let slot = self.cached.lock().unwrap_or_else(|poisoned| {
            let mut slot = poisoned.into_inner();
            *slot = None;
            slot
        });
        CatalogGuard {
            data_dir: &self.data_dir,
            slot,
        }
    }

    /// The current catalog, loading it on first access.
    pub fn get_index(&self) -> Result<Catalog> {
        Ok(self.lock().catalog()?.clone())
    }

    /// Alias of [`get_index`](Self::get_index).
    pub fn load(&self) -> Result<Catalog> {
        self.get_index()
    }

    /// Clone of the current entries, in catalog order.
    pub fn snapshot(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.lock().catalog()?.atoms.clone())
    }

    pub fn save(&self) -> Result<()> {
        self.lock().save()
    }

    pub fn add_or_update(&self, entry: CatalogEntry) -> Result<()> {
        self.lock().add_or_update(entry)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        self.lock().remove(id)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<CatalogEntry>> {
        self.lock().find_by_id(id)
    }

    pub fn get_next_id(&self) -> Result<String> {
        self.lock().next_id()
    }

    pub fn rebuild_from_atoms(&self, atoms: &AtomRepository) -> Result<Rebuild> {
        self.lock().rebuild_from_atoms(atoms)
    }

    pub fn migrate_and_rebuild(&self, atoms: &AtomRepository) -> Result<Migration> {
        self.lock().migrate_and_rebuild(atoms)
    }

    /// Drop the cached catalog; the next operation reloads it from disk.
    pub fn invalidate_cache(&self) {
        *self.lock().slot = None;
    }
}

/// Exclusive access to the cached catalog.
pub struct CatalogGuard<'a> {
    data_dir: &'a DataDir,
    slot: MutexGuard<'a, Option<Catalog>>,
}

impl CatalogGuard<'_> {
    /// The cached catalog, read from disk (or created empty) if needed.
    pub fn catalog(&mut self) -> Result<&mut Catalog> {
        let catalog = match self.slot.take() {
            Some(catalog) => catalog,
            None => read_catalog(self.data_dir)?,
        };
        Ok(self.slot.insert(catalog))
    }

    /// Persist the cached catalog in the canonical encoding and drop a
    /// legacy index file. Does nothing if no catalog is cached.
    pub fn save(&self) -> Result<()> {
        let Some(catalog) = self.slot.as_ref() else {
            return Ok(());
        };

        std::fs::create_dir_all(self.data_dir.root())?;
        let path = self.data_dir.index_file(Encoding::Canonical);
        Encoding::Canonical.write_file(&path, catalog)?;
        tracing::debug!(entries = catalog.len(), "saved catalog");

        let legacy = self.data_dir.index_file(Encoding::Legacy);
        if let Err(e) = encoding::remove_if_exists(&legacy) {
            tracing::warn!(
                path = %legacy.display(),
                "could not remove legacy index file: {e}"
            );
        }
        Ok(())
    }

    pub fn add_or_update(&mut self, entry: CatalogEntry) -> Result<()> {
        self.catalog()?.add_or_update(entry);
        self.save()
    }

    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let removed = self.catalog()?.remove(id);
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn find_by_id(&mut self, id: &str) -> Result<Option<CatalogEntry>> {
        Ok(self.catalog()?.find_by_id(id).cloned())
    }

    pub fn next_id(&mut self) -> Result<String> {
        self.catalog()?.next_id()
    }

    /// Replace the catalog with one entry per loadable atom in `atoms`.
    ///
    /// Atoms that fail to load are skipped, logged and returned as
    /// failures; the rebuilt catalog is persisted either way.
    pub fn rebuild_from_atoms(&mut self, atoms: &AtomRepository) -> Result<Rebuild> {
        *self.slot = None;
        let mut catalog = Catalog::empty();
        let mut failures = Vec::new();

        if atoms.data_dir().atoms_dir().is_dir() {
            for id in atoms.list_all_ids()? {
                match atoms.load(&id) {
                    Ok(Some(atom)) => catalog.atoms.push(CatalogEntry::from_atom(&atom)),
                    Ok(None) => {}
                    Err(e) => failures.push(LoadFailure::new(id, e)),
                }
            }
        }

        for failure in &failures {
            tracing::warn!(id = %failure.id, "skipped atom during rebuild: {}", failure.error);
        }

        *self.slot = Some(catalog.clone());
        self.save()?;
        tracing::info!(
            count = catalog.len(),
            failed = failures.len(),
            "rebuilt catalog"
        );

        Ok(Rebuild { catalog, failures })
    }

    /// Move every legacy-only atom to the canonical encoding, then rebuild.
    pub fn migrate_and_rebuild(&mut self, atoms: &AtomRepository) -> Result<Migration> {
        let mut migrated = 0;
        let mut failures = Vec::new();

        for (id, encoding) in atoms.list_files()? {
            if encoding != Encoding::Legacy {
                continue;
            }
            match atoms.migrate(&id) {
                Ok(true) => migrated += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(id = %id, "could not migrate atom: {e}");
                    failures.push(LoadFailure::new(id, e));
                }
            }
        }
        tracing::info!(migrated, "migrated legacy atoms");

        let rebuild = self.rebuild_from_atoms(atoms)?;
        let fresh: Vec<_> = rebuild
            .failures
            .into_iter()
            .filter(|f| !failures.iter().any(|seen| seen.id == f.id))
            .collect();
        failures.extend(fresh);

        Ok(Migration {
            catalog: rebuild.catalog,
            migrated,
            failures,
        })
    }
}

fn read_catalog(data_dir: &DataDir) -> Result<Catalog> {
    for encoding in Encoding::PRIORITY {
        let path = data_dir.index_file(encoding);
        if let Some(catalog) = encoding.read_file(&path)? {
            return Ok(catalog);
        }
    }
    Ok(Catalog::empty())
}

fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomContent;

    fn test_index() -> (tempfile::TempDir, CatalogIndex, AtomRepository) {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::at(tmp.path());
        let index = CatalogIndex::new(data_dir.clone());
        let repo = AtomRepository::new(data_dir);
        (tmp, index, repo)
    }

    fn make_atom(id: &str, title: &str) -> Atom {
        Atom {
            id: id.to_string(),
            title: title.to_string(),
            kind: AtomType::Pattern,
            status: AtomStatus::Active,
            confidence: Confidence::Medium,
            content: AtomContent {
                summary: format!("{title} summary"),
                details: String::new(),
                pitfalls: vec![],
                update_notes: vec![],
            },
            language: None,
            created_at: "2024-01-01".to_string(),
            updated_at: "2024-01-01".to_string(),
            tags: vec!["t".to_string()],
            sources: vec![],
            links: vec![],
            supersedes: vec![],
            superseded_by: None,
        }
    }

    fn entry(id: &str) -> CatalogEntry {
        CatalogEntry::from_atom(&make_atom(id, "Test"))
    }

    #[test]
    fn missing_index_loads_empty() {
        let (_tmp, index, _repo) = test_index();
        let catalog = index.get_index().unwrap();
        assert_eq!(catalog.version, 1);
        assert!(catalog.atoms.is_empty());
    }

    #[test]
    fn entry_path_points_at_canonical_file() {
        assert_eq!(entry("K-000001").path, "atoms/K-000001.yaml");
    }

    #[test]
    fn add_or_update_replaces_in_place() {
        let (_tmp, index, _repo) = test_index();
        index.add_or_update(entry("K-000001")).unwrap();
        index.add_or_update(entry("K-000002")).unwrap();

        let mut changed = entry("K-000001");
        changed.title = "Changed".to_string();
        index.add_or_update(changed).unwrap();

        let ids: Vec<_> = index
            .snapshot()
            .unwrap()
            .into_iter()
            .map(|e| (e.id, e.title))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("K-000001".to_string(), "Changed".to_string()),
                ("K-000002".to_string(), "Test".to_string()),
            ]
        );
    }

    #[test]
    fn popularity_from_older_index_survives_updates() {
        let (tmp, index, _repo) = test_index();
        std::fs::write(
            tmp.path().join("index.json"),
            r#"{"version": 1, "updated_at": "2024-01-01T00:00:00Z", "atoms": [
                {"id": "K-000001", "title": "Test", "type": "pattern",
                 "status": "active", "confidence": "medium", "language": null,
                 "tags": ["t"], "path": "atoms/K-000001.json",
                 "updated_at": "2024-01-01", "popularity": 7}
            ]}"#,
        )
        .unwrap();

        let mut changed = entry("K-000001");
        changed.title = "Changed".to_string();
        index.add_or_update(changed).unwrap();

        index.invalidate_cache();
        let stored = index.find_by_id("K-000001").unwrap().unwrap();
        assert_eq!(stored.title, "Changed");
        assert_eq!(stored.popularity, 7);
        assert!(tmp.path().join("index.yaml").exists());
        assert!(!tmp.path().join("index.json").exists());
    }

    #[test]
    fn writes_persist_across_cache_invalidation() {
        let (tmp, index, _repo) = test_index();
        index.add_or_update(entry("K-000001")).unwrap();
        assert!(tmp.path().join("index.yaml").exists());

        index.invalidate_cache();
        assert!(index.find_by_id("K-000001").unwrap().is_some());
    }

    #[test]
    fn remove_reports_and_persists() {
        let (_tmp, index, _repo) = test_index();
        index.add_or_update(entry("K-000001")).unwrap();

        assert!(index.remove("K-000001").unwrap());
        assert!(!index.remove("K-000001").unwrap());

        index.invalidate_cache();
        assert!(index.find_by_id("K-000001").unwrap().is_none());
    }

    #[test]
    fn next_id_follows_the_highest_conforming_id() {
        let (_tmp, index, _repo) = test_index();
        assert_eq!(index.get_next_id().unwrap(), "K-000001");

        index.add_or_update(entry("K-000001")).unwrap();
        index.add_or_update(entry("K-000003")).unwrap();
        index.add_or_update(entry("legacy-7")).unwrap();
        assert_eq!(index.get_next_id().unwrap(), "K-000004");
    }

    #[test]
    fn legacy_index_is_read_then_replaced() {
        let (tmp, index, _repo) = test_index();
        let mut catalog = Catalog::empty();
        catalog.atoms.push(entry("K-000005"));
        Encoding::Legacy
            .write_file(&tmp.path().join("index.json"), &catalog)
            .unwrap();

        assert!(index.find_by_id("K-000005").unwrap().is_some());

        index.save().unwrap();
        assert!(tmp.path().join("index.yaml").exists());
        assert!(!tmp.path().join("index.json").exists());
    }

    #[test]
    fn save_without_cache_writes_nothing() {
        let (tmp, index, _repo) = test_index();
        index.save().unwrap();
        assert!(!tmp.path().join("index.yaml").exists());
    }

    #[test]
    fn rebuild_without_atoms_dir_persists_empty_catalog() {
        let (tmp, index, repo) = test_index();
        let rebuild = index.rebuild_from_atoms(&repo).unwrap();
        assert!(rebuild.catalog.is_empty());
        assert!(rebuild.failures.is_empty());
        assert!(tmp.path().join("index.yaml").exists());
    }

    #[test]
    fn rebuild_collects_failures_and_keeps_going() {
        let (_tmp, index, repo) = test_index();
        repo.save(&make_atom("K-000002", "Second")).unwrap();
        repo.save(&make_atom("K-000001", "First")).unwrap();
        let bad = repo.data_dir().atom_file("K-000003", Encoding::Canonical);
        std::fs::write(&bad, "title: [broken").unwrap();

        let rebuild = index.rebuild_from_atoms(&repo).unwrap();
        let ids: Vec<_> =
            rebuild.catalog.atoms.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["K-000001", "K-000002"]);
        assert_eq!(rebuild.failures.len(), 1);
        assert_eq!(rebuild.failures[0].id, "K-000003");
    }

    #[test]
    fn rebuild_is_idempotent() {
        let (_tmp, index, repo) = test_index();
        for (id, title) in [("K-000001", "A"), ("K-000007", "B"), ("K-000004", "C")] {
            repo.save(&make_atom(id, title)).unwrap();
        }

        let first = index.rebuild_from_atoms(&repo).unwrap().catalog;
        let second = index.rebuild_from_atoms(&repo).unwrap().catalog;
        assert_eq!(first.atoms, second.atoms);
        assert_eq!(first.version, second.version);
    }

    #[test]
    fn migrate_and_rebuild_counts_legacy_atoms() {
        let (_tmp, index, repo) = test_index();
        repo.save(&make_atom("K-000001", "Canonical")).unwrap();
        for id in ["K-000002", "K-000003"] {
            let path = repo.data_dir().atom_file(id, Encoding::Legacy);
            Encoding::Legacy
                .write_file(&path, &make_atom(id, "Legacy"))
                .unwrap();
        }

        let migration = index.migrate_and_rebuild(&repo).unwrap();
        assert_eq!(migration.migrated, 2);
        assert_eq!(migration.catalog.len(), 3);
        assert!(migration.failures.is_empty());
        for id in ["K-000002", "K-000003"] {
            assert!(!repo.is_legacy_only(id));
            assert!(!repo.data_dir().atom_file(id, Encoding::Legacy).exists());
        }
    }

    #[test]
    fn corrupt_legacy_atom_is_reported_once() {
        let (_tmp, index, repo) = test_index();
        repo.data_dir().ensure_dirs().unwrap();
        let path = repo.data_dir().atom_file("K-000009", Encoding::Legacy);
        std::fs::write(&path, "{").unwrap();

        let migration = index.migrate_and_rebuild(&repo).unwrap();
        assert_eq!(migration.migrated, 0);
        assert_eq!(migration.failures.len(), 1);
        assert_eq!(migration.failures[0].id, "K-000009");
    }
}
