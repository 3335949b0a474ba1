//! Atom lifecycle operations.
//!
//! [`KnowledgeBase`] is the entry point adapters use. It pairs an
//! [`AtomRepository`] with a [`CatalogIndex`] and keeps the two in step:
//! every write takes the catalog lock, writes the atom file, then updates the
//! catalog entry. The pair is not transactional. A crash between the two
//! writes leaves a stale catalog that [`KnowledgeBase::rebuild`] repairs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    atom::{
        self,
        Atom,
        AtomContent,
        AtomStatus,
        AtomType,
        Confidence,
        Link,
        LinkRel,
        Source,
        SourceKind,
        UpdateNote,
    },
    atom_id,
    catalog::{CatalogEntry, CatalogIndex, LoadFailure},
    data_dir::DataDir,
    error::{Error, Result},
    repository::AtomRepository,
    search::{self, Filters, SearchHit, SearchQuery},
};

/// Default number of entries returned by [`KnowledgeBase::list`].
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Version stamped on export bundles.
pub const EXPORT_VERSION: u32 = 1;

const NOTE_CREATED: &str = "Initial creation";
const NOTE_UPDATED: &str = "Updated";

/// Group key used when an atom has no language.
pub const UNSPECIFIED_LANGUAGE: &str = "unspecified";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInput {
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInput {
    pub rel: String,
    pub id: String,
}

/// Create-or-update input, as received from an adapter.
///
/// Enum-valued fields are plain strings here and are validated by
/// [`KnowledgeBase::upsert`]. `None` list fields keep the stored value on
/// update and become empty on create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub confidence: String,
    pub summary: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub pitfalls: Option<Vec<String>>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub sources: Option<Vec<SourceInput>>,
    #[serde(default)]
    pub links: Option<Vec<LinkInput>>,
}

/// An [`UpsertRequest`] whose enum values have been checked.
struct ValidUpsert {
    id: Option<String>,
    title: String,
    kind: AtomType,
    status: AtomStatus,
    confidence: Confidence,
    summary: String,
    details: Option<String>,
    pitfalls: Option<Vec<String>>,
    language: Option<String>,
    tags: Option<Vec<String>>,
    sources: Option<Vec<Source>>,
    links: Option<Vec<Link>>,
}

impl TryFrom<UpsertRequest> for ValidUpsert {
    type Error = Error;

    fn try_from(request: UpsertRequest) -> Result<Self> {
        let id = request.id.filter(|id| !id.is_empty());
        if let Some(ref id) = id
            && !atom_id::is_storable_id(id)
        {
            return Err(Error::Validation(format!(
                "invalid atom id: {id:?} (expected {}<letters, digits, - or _>)",
                atom_id::ID_PREFIX
            )));
        }
        if let Some(ref id) = id
            && atom_id::is_last_id(id)
        {
            return Err(Error::Validation(format!(
                "invalid atom id: {id} leaves no room for later ids"
            )));
        }

        let sources = request
            .sources
            .map(|sources| {
                sources
                    .into_iter()
                    .map(|s| {
                        Ok(Source {
                            kind: s.kind.parse::<SourceKind>()?,
                            reference: s.reference,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;
        let links = request
            .links
            .map(|links| {
                links
                    .into_iter()
                    .map(|l| {
                        Ok(Link {
                            rel: l.rel.parse::<LinkRel>()?,
                            id: l.id,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;

        Ok(Self {
            id,
            title: request.title,
            kind: request.kind.parse()?,
            status: request.status.parse()?,
            confidence: request.confidence.parse()?,
            summary: request.summary,
            details: request.details,
            pitfalls: request.pitfalls,
            language: request.language,
            tags: request.tags,
            sources,
            links,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub filters: Filters,
    pub limit: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filters: Filters::default(),
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

/// Result of deprecate and purge. A missing atom is an unsuccessful
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    fn ok(message: String) -> Self {
        Self {
            success: true,
            message: Some(message),
            error: None,
        }
    }

    fn not_found(id: &str) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(format!("Atom {id} not found")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdList {
    pub ids: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportBundle {
    pub version: u32,
    pub exported_at: String,
    pub count: usize,
    pub atoms: Vec<Atom>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub success: bool,
    pub count: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub migrated: usize,
    pub count: usize,
}

/// A bulk result plus the atoms that were skipped along the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReport<T> {
    #[serde(flatten)]
    pub result: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<LoadFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Type,
    Tag,
    Language,
}

impl GroupBy {
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "type" => Some(Self::Type),
            "tag" => Some(Self::Tag),
            "language" => Some(Self::Language),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Tag => "tag",
            Self::Language => "language",
        }
    }
}

/// One atom inside a summary group. Type groups carry `status`, the other
/// groupings carry `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryItem {
    pub id: String,
    pub title: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<AtomType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AtomStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryGroup {
    pub count: usize,
    pub items: Vec<SummaryItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub group_by: String,
    pub total_atoms: usize,
    pub groups: BTreeMap<String, SummaryGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SummaryOutcome {
    Summary(Summary),
    Invalid { error: String },
}

/// The catalog and its atoms, with the operations adapters expose.
#[derive(Debug)]
pub struct KnowledgeBase {
    atoms: AtomRepository,
    catalog: CatalogIndex,
}

impl KnowledgeBase {
    pub fn open(data_dir: DataDir) -> Self {
        Self {
            atoms: AtomRepository::new(data_dir.clone()),
            catalog: CatalogIndex::new(data_dir),
        }
    }

    pub fn data_dir(&self) -> &DataDir {
        self.atoms.data_dir()
    }

    pub fn atoms(&self) -> &AtomRepository {
        &self.atoms
    }

    pub fn catalog(&self) -> &CatalogIndex {
        &self.catalog
    }

    // -- Writes --

    /// Create a new atom or update an existing one.
    ///
    /// All enum values are validated before anything is written.
    pub fn upsert(&self, request: UpsertRequest) -> Result<Atom> {
        let request = ValidUpsert::try_from(request)?;
        let today = atom::today();

        let mut catalog = self.catalog.lock();
        let existing = match request.id {
            Some(ref id) => self.atoms.load(id)?,
            None => None,
        };

        let atom = match existing {
            Some(existing) => updated_atom(existing, request, today),
            None => {
                let id = match request.id.clone() {
                    Some(id) => id,
                    None => {
                        let mut id = catalog.next_id()?;
                        while self.atoms.exists(&id) {
                            tracing::warn!(
                                id = %id,
                                "allocated id is already stored; catalog is stale, run rebuild"
                            );
                            id = atom_id::next_id([id.as_str()])?;
                        }
                        id
                    }
                };
                created_atom(id, request, today)
            }
        };

        self.atoms.save(&atom)?;
        catalog.add_or_update(CatalogEntry::from_atom(&atom))?;
        tracing::debug!(id = %atom.id, "upserted atom");

        Ok(atom)
    }

    /// Mark an atom deprecated. It stays searchable and retrievable.
    pub fn deprecate(&self, id: &str) -> Result<Outcome> {
        let mut catalog = self.catalog.lock();
        let Some(mut atom) = self.load_checked(id)? else {
            return Ok(Outcome::not_found(id));
        };

        atom.status = AtomStatus::Deprecated;
        atom.updated_at = atom::today();
        self.atoms.save(&atom)?;
        catalog.add_or_update(CatalogEntry::from_atom(&atom))?;

        tracing::info!(id, "deprecated atom");
        Ok(Outcome::ok(format!("Atom {id} deprecated")))
    }

    /// Delete every stored encoding of an atom and its catalog entry.
    pub fn purge(&self, id: &str) -> Result<Outcome> {
        let mut catalog = self.catalog.lock();
        if !atom_id::is_storable_id(id) || !self.atoms.exists(id) {
            return Ok(Outcome::not_found(id));
        }

        self.atoms.delete(id)?;
        catalog.remove(id)?;

        tracing::info!(id, "purged atom");
        Ok(Outcome::ok(format!("Atom {id} permanently deleted")))
    }

    // -- Reads --

    pub fn get(&self, id: &str) -> Result<Option<Atom>> {
        self.load_checked(id)
    }

    /// Catalog entries matching `query.filters`, in catalog order.
    pub fn list(&self, query: &ListQuery) -> Result<Vec<CatalogEntry>> {
        Ok(self
            .catalog
            .snapshot()?
            .into_iter()
            .filter(|entry| query.filters.matches(entry))
            .take(query.limit)
            .collect())
    }

    /// Rank catalog entries against `query`.
    ///
    /// The catalog lock is held only while taking the snapshot.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let entries = self.catalog.snapshot()?;
        Ok(search::execute_search(&entries, query, &self.atoms))
    }

    /// IDs of every stored atom, sorted, whether or not the catalog lists
    /// them.
    pub fn list_ids(&self) -> Result<IdList> {
        let ids: Vec<String> = self.atoms.list_all_ids()?.into_iter().collect();
        Ok(IdList {
            count: ids.len(),
            ids,
        })
    }

    /// Every catalog-listed atom in full.
    ///
    /// Atoms that are missing or fail to load are skipped and reported.
    pub fn export_all(&self) -> Result<BulkReport<ExportBundle>> {
        let entries = self.catalog.snapshot()?;
        let mut atoms = Vec::with_capacity(entries.len());
        let mut failures = Vec::new();

        for entry in &entries {
            match self.atoms.load(&entry.id) {
                Ok(Some(atom)) => atoms.push(atom),
                Ok(None) => {
                    failures.push(LoadFailure::new(&entry.id, "atom file not found"))
                }
                Err(e) => failures.push(LoadFailure::new(&entry.id, e)),
            }
        }
        for failure in &failures {
            tracing::warn!(id = %failure.id, "skipped atom during export: {}", failure.error);
        }

        Ok(BulkReport {
            result: ExportBundle {
                version: EXPORT_VERSION,
                exported_at: atom::today(),
                count: atoms.len(),
                atoms,
            },
            failures,
        })
    }

    pub fn get_summary(&self, group_by: &str) -> Result<SummaryOutcome> {
        let Some(group_by) = GroupBy::parse(group_by) else {
            return Ok(SummaryOutcome::Invalid {
                error: format!("Invalid group_by value: {group_by}"),
            });
        };
        let entries = self.catalog.snapshot()?;
        Ok(SummaryOutcome::Summary(summarize(&entries, group_by)))
    }

    pub fn next_id(&self) -> Result<String> {
        self.catalog.get_next_id()
    }

    // -- Maintenance --

    /// Regenerate the catalog from the atom files.
    pub fn rebuild(&self) -> Result<BulkReport<RebuildSummary>> {
        let rebuild = self.catalog.rebuild_from_atoms(&self.atoms)?;
        let count = rebuild.catalog.len();
        Ok(BulkReport {
            result: RebuildSummary {
                success: true,
                count,
                message: format!("Index rebuilt with {count} atoms"),
            },
            failures: rebuild.failures,
        })
    }

    /// Move legacy-only atoms to the canonical encoding and rebuild.
    pub fn migrate(&self) -> Result<BulkReport<MigrationSummary>> {
        let migration = self.catalog.migrate_and_rebuild(&self.atoms)?;
        Ok(BulkReport {
            result: MigrationSummary {
                migrated: migration.migrated,
                count: migration.catalog.len(),
            },
            failures: migration.failures,
        })
    }

    /// Load an atom, treating IDs that cannot name a file as absent.
    fn load_checked(&self, id: &str) -> Result<Option<Atom>> {
        if !atom_id::is_storable_id(id) {
            return Ok(None);
        }
        self.atoms.load(id)
    }
}

fn created_atom(id: String, request: ValidUpsert, today: String) -> Atom {
    Atom {
        id,
        title: request.title,
        kind: request.kind,
        status: request.status,
        confidence: request.confidence,
        content: AtomContent {
            summary: request.summary,
            details: request.details.unwrap_or_default(),
            pitfalls: request.pitfalls.unwrap_or_default(),
            update_notes: vec![UpdateNote {
                date: today.clone(),
                note: NOTE_CREATED.to_string(),
            }],
        },
        language: request.language,
        created_at: today.clone(),
        updated_at: today,
        tags: request.tags.unwrap_or_default(),
        sources: request.sources.unwrap_or_default(),
        links: request.links.unwrap_or_default(),
        supersedes: Vec::new(),
        superseded_by: None,
    }
}

/// Merge an update into `existing`.
///
/// `summary`, `title` and `language` are always replaced, even by empty
/// values. `details` keeps the stored text when the new one is empty.
fn updated_atom(existing: Atom, request: ValidUpsert, today: String) -> Atom {
    let Atom {
        id,
        created_at,
        content,
        tags,
        sources,
        links,
        supersedes,
        superseded_by,
        ..
    } = existing;

    let mut update_notes = content.update_notes;
    update_notes.push(UpdateNote {
        date: today.clone(),
        note: NOTE_UPDATED.to_string(),
    });

    Atom {
        id,
        title: request.title,
        kind: request.kind,
        status: request.status,
        confidence: request.confidence,
        content: AtomContent {
            summary: request.summary,
            details: request
                .details
                .filter(|d| !d.is_empty())
                .unwrap_or(content.details),
            pitfalls: request.pitfalls.unwrap_or(content.pitfalls),
            update_notes,
        },
        language: request.language,
        created_at,
        updated_at: today,
        tags: request.tags.unwrap_or(tags),
        sources: request.sources.unwrap_or(sources),
        links: request.links.unwrap_or(links),
        supersedes,
        superseded_by,
    }
}

fn summarize(entries: &[CatalogEntry], group_by: GroupBy) -> Summary {
    let mut groups: BTreeMap<String, SummaryGroup> = BTreeMap::new();

    for entry in entries {
        let keys: Vec<String> = match group_by {
            GroupBy::Type => vec![entry.kind.to_string()],
            GroupBy::Tag => entry.tags.clone(),
            GroupBy::Language => vec![
                entry
                    .language
                    .clone()
                    .unwrap_or_else(|| UNSPECIFIED_LANGUAGE.to_string()),
            ],
        };

        let item = match group_by {
            GroupBy::Type => SummaryItem {
                id: entry.id.clone(),
                title: entry.title.clone(),
                kind: None,
                status: Some(entry.status),
            },
            GroupBy::Tag | GroupBy::Language => SummaryItem {
                id: entry.id.clone(),
                title: entry.title.clone(),
                kind: Some(entry.kind),
                status: None,
            },
        };

        for key in keys {
            let group = groups.entry(key).or_default();
            group.count += 1;
            group.items.push(item.clone());
        }
    }

    Summary {
        group_by: group_by.as_str().to_string(),
        total_atoms: entries.len(),
        groups,
    }
}
