use std::{collections::BTreeSet, path::PathBuf};

use crate::{
    atom::Atom,
    atom_id,
    data_dir::DataDir,
    encoding::{self, Encoding},
    error::Result,
};

/// Per-atom file storage under `<root>/atoms`.
///
/// There is no locking here. Writes made through
/// [`KnowledgeBase`](crate::knowledge::KnowledgeBase) are serialized by the
/// catalog lock; direct callers coordinate themselves.
#[derive(Debug, Clone)]
pub struct AtomRepository {
    data_dir: DataDir,
}

impl AtomRepository {
    pub fn new(data_dir: DataDir) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    /// Write `atom` in the canonical encoding and drop any legacy copy.
    ///
    /// Failing to remove the legacy file is logged, not returned: the
    /// canonical file already shadows it on load.
    pub fn save(&self, atom: &Atom) -> Result<PathBuf> {
        self.data_dir.ensure_dirs()?;

        let path = self.data_dir.atom_file(&atom.id, Encoding::Canonical);
        Encoding::Canonical.write_file(&path, atom)?;
        tracing::debug!(id = %atom.id, path = %path.display(), "saved atom");

        let legacy = self.data_dir.atom_file(&atom.id, Encoding::Legacy);
        if let Err(e) = encoding::remove_if_exists(&legacy) {
            tracing::warn!(
                id = %atom.id,
                path = %legacy.display(),
                "could not remove legacy atom file: {e}"
            );
        }

        Ok(path)
    }

    /// Load an atom, trying each encoding in priority order.
    pub fn load(&self, id: &str) -> Result<Option<Atom>> {
        for encoding in Encoding::PRIORITY {
            let path = self.data_dir.atom_file(id, encoding);
            if let Some(atom) = encoding.read_file(&path)? {
                return Ok(Some(atom));
            }
        }
        Ok(None)
    }

    /// Remove every stored encoding of `id`. Returns whether anything was
    /// removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut deleted = false;
        for encoding in Encoding::PRIORITY {
            let path = self.data_dir.atom_file(id, encoding);
            deleted |= encoding::remove_if_exists(&path)?;
        }
        if deleted {
            tracing::debug!(id, "deleted atom files");
        }
        Ok(deleted)
    }

    pub fn exists(&self, id: &str) -> bool {
        Encoding::PRIORITY
            .into_iter()
            .any(|encoding| self.data_dir.atom_file(id, encoding).is_file())
    }

    /// True if `id` is stored only in the legacy encoding.
    pub fn is_legacy_only(&self, id: &str) -> bool {
        !self.data_dir.atom_file(id, Encoding::Canonical).is_file()
            && self.data_dir.atom_file(id, Encoding::Legacy).is_file()
    }

    /// All stored atom IDs, deduplicated across encodings.
    pub fn list_all_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .list_files()?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Every `(id, encoding)` pair found in the atoms directory.
    pub(crate) fn list_files(&self) -> Result<Vec<(String, Encoding)>> {
        let dir = self.data_dir.atoms_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if !atom_id::has_id_prefix(&name) {
                continue;
            }
            if let Some((id, ext)) = name.rsplit_once('.')
                && let Some(encoding) = Encoding::from_extension(ext)
            {
                files.push((id.to_string(), encoding));
            }
        }
        Ok(files)
    }

    /// Move one atom from the legacy to the canonical encoding.
    ///
    /// Reads through the normal fallback, writes canonical, and lets
    /// [`save`](Self::save) drop the legacy file. Returns `false` when the
    /// atom was not legacy-only.
    pub fn migrate(&self, id: &str) -> Result<bool> {
        if !self.is_legacy_only(id) {
            return Ok(false);
        }
        let Some(atom) = self.load(id)? else {
            return Ok(false);
        };
        self.save(&atom)?;
        tracing::debug!(id, "migrated atom to canonical encoding");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{
        AtomContent,
        AtomStatus,
        AtomType,
        Confidence,
        Link,
        LinkRel,
        Source,
        SourceKind,
        UpdateNote,
    };

    fn test_repo() -> (tempfile::TempDir, AtomRepository) {
        let tmp = tempfile::tempdir().unwrap();
        let repo = AtomRepository::new(DataDir::at(tmp.path()));
        (tmp, repo)
    }

    fn sample_atom(id: &str) -> Atom {
        Atom {
            id: id.to_string(),
            title: "Test Atom".to_string(),
            kind: AtomType::Fact,
            status: AtomStatus::Active,
            confidence: Confidence::High,
            content: AtomContent {
                summary: "Test summary".to_string(),
                details: "line one\nline two\n".to_string(),
                pitfalls: vec!["watch out".to_string()],
                update_notes: vec![UpdateNote {
                    date: "2024-01-01".to_string(),
                    note: "Initial creation".to_string(),
                }],
            },
            language: Some("rust".to_string()),
            created_at: "2024-01-01".to_string(),
            updated_at: "2024-01-02".to_string(),
            tags: vec!["b".to_string(), "a".to_string()],
            sources: vec![Source {
                kind: SourceKind::RepoPath,
                reference: "src/lib.rs".to_string(),
            }],
            links: vec![Link {
                rel: LinkRel::DependsOn,
                id: "K-000002".to_string(),
            }],
            supersedes: vec!["K-000000".to_string()],
            superseded_by: None,
        }
    }

    fn write_legacy(repo: &AtomRepository, atom: &Atom) {
        repo.data_dir().ensure_dirs().unwrap();
        let path = repo.data_dir().atom_file(&atom.id, Encoding::Legacy);
        Encoding::Legacy.write_file(&path, atom).unwrap();
    }

    #[test]
    fn save_then_load_roundtrips() {
        let (_tmp, repo) = test_repo();
        let atom = sample_atom("K-000001");

        let path = repo.save(&atom).unwrap();
        assert!(path.ends_with("atoms/K-000001.yaml"));

        let loaded = repo.load("K-000001").unwrap().unwrap();
        assert_eq!(loaded, atom);
    }

    #[test]
    fn load_missing_is_none() {
        let (_tmp, repo) = test_repo();
        assert!(repo.load("K-000001").unwrap().is_none());
    }

    #[test]
    fn load_falls_back_to_legacy() {
        let (_tmp, repo) = test_repo();
        let atom = sample_atom("K-000003");
        write_legacy(&repo, &atom);

        assert_eq!(repo.load("K-000003").unwrap().unwrap(), atom);
        assert!(repo.exists("K-000003"));
        assert!(repo.is_legacy_only("K-000003"));
    }

    #[test]
    fn canonical_shadows_legacy() {
        let (_tmp, repo) = test_repo();
        let mut old = sample_atom("K-000001");
        old.title = "old".to_string();
        write_legacy(&repo, &old);

        let mut new = sample_atom("K-000001");
        new.title = "new".to_string();
        let path = repo.data_dir().atom_file("K-000001", Encoding::Canonical);
        Encoding::Canonical.write_file(&path, &new).unwrap();

        assert_eq!(repo.load("K-000001").unwrap().unwrap().title, "new");
    }

    #[test]
    fn save_removes_legacy_file() {
        let (_tmp, repo) = test_repo();
        let atom = sample_atom("K-000001");
        write_legacy(&repo, &atom);

        repo.save(&atom).unwrap();

        let dir = repo.data_dir();
        assert!(dir.atom_file("K-000001", Encoding::Canonical).exists());
        assert!(!dir.atom_file("K-000001", Encoding::Legacy).exists());
    }

    #[test]
    fn corrupt_file_is_a_format_error() {
        let (_tmp, repo) = test_repo();
        repo.data_dir().ensure_dirs().unwrap();
        let path = repo.data_dir().atom_file("K-000001", Encoding::Canonical);
        std::fs::write(&path, "id: [unterminated").unwrap();

        let err = repo.load("K-000001").unwrap_err();
        assert!(matches!(err, crate::error::Error::Format { .. }));
    }

    #[test]
    fn delete_removes_both_encodings() {
        let (_tmp, repo) = test_repo();
        let atom = sample_atom("K-000001");
        repo.save(&atom).unwrap();
        write_legacy(&repo, &atom);

        assert!(repo.delete("K-000001").unwrap());
        assert!(!repo.exists("K-000001"));
        assert!(!repo.delete("K-000001").unwrap());
    }

    #[test]
    fn list_all_ids_dedupes_and_ignores_strangers() {
        let (_tmp, repo) = test_repo();
        assert!(repo.list_all_ids().unwrap().is_empty());

        repo.save(&sample_atom("K-000001")).unwrap();
        repo.save(&sample_atom("K-000002")).unwrap();
        write_legacy(&repo, &sample_atom("K-000002"));
        write_legacy(&repo, &sample_atom("K-000003"));

        let atoms_dir = repo.data_dir().atoms_dir();
        std::fs::write(atoms_dir.join("README.md"), "notes").unwrap();
        std::fs::write(atoms_dir.join("K-000009.txt"), "x").unwrap();
        std::fs::create_dir(atoms_dir.join("K-000010.yaml")).unwrap();

        let ids: Vec<_> = repo.list_all_ids().unwrap().into_iter().collect();
        assert_eq!(ids, vec!["K-000001", "K-000002", "K-000003"]);
    }

    #[test]
    fn migrate_converts_legacy_only_atoms() {
        let (_tmp, repo) = test_repo();
        let atom = sample_atom("K-000004");
        write_legacy(&repo, &atom);

        assert!(repo.migrate("K-000004").unwrap());
        assert!(!repo.is_legacy_only("K-000004"));
        assert_eq!(repo.load("K-000004").unwrap().unwrap(), atom);

        assert!(!repo.migrate("K-000004").unwrap());
        assert!(!repo.migrate("K-000099").unwrap());
    }
}
