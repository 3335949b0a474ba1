//! Relevance ranking over a catalog snapshot.
//!
//! Scoring is deterministic and must stay stable across releases: callers
//! compare scores between runs.
//!
//! - Browse mode (no tokens): `10 + status*5 + confidence*3`.
//! - Match mode: per token, +100 if the title contains it and +50 more if the
//!   title starts with it; +30 once if any token occurs in any tag. Entries
//!   with no title or tag hit are dropped, the rest get the same trust
//!   weighting as browse mode.
//! - Content mode additionally gives +20 per token found in the summary or
//!   details. An entry whose only hits are in content scores
//!   `20 + status*5 + confidence*3`, plus 20 for every further content hit.

use std::collections::HashMap;

use serde::Serialize;

use crate::{
    atom::{Atom, AtomStatus, AtomType, Confidence},
    catalog::CatalogEntry,
    error::Result,
    repository::AtomRepository,
};

const BROWSE_BASE: u32 = 10;
const TITLE_HIT: u32 = 100;
const TITLE_PREFIX_BONUS: u32 = 50;
const TAG_HIT: u32 = 30;
const CONTENT_HIT: u32 = 20;

/// Default number of results for a search.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Predicates shared by search and list. An unset predicate passes
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub types: Vec<AtomType>,
    pub tags: Vec<String>,
    pub status: Option<AtomStatus>,
    pub language: Option<String>,
}

impl Filters {
    /// Build filters from adapter input, validating enum values.
    ///
    /// Empty strings count as "not given".
    pub fn parse(
        types: &[String],
        tags: &[String],
        status: Option<&str>,
        language: Option<&str>,
    ) -> Result<Self> {
        let types = types
            .iter()
            .map(|t| t.parse::<AtomType>())
            .collect::<Result<Vec<_>>>()?;
        let status = status
            .filter(|s| !s.is_empty())
            .map(str::parse::<AtomStatus>)
            .transpose()?;
        let language = language.filter(|l| !l.is_empty()).map(str::to_string);

        Ok(Self {
            types,
            tags: tags.to_vec(),
            status,
            language,
        })
    }

    pub fn matches(&self, entry: &CatalogEntry) -> bool {
        if !self.types.is_empty() && !self.types.contains(&entry.kind) {
            return false;
        }
        if let Some(status) = self.status
            && entry.status != status
        {
            return false;
        }
        if let Some(ref language) = self.language
            && entry.language.as_deref() != Some(language.as_str())
        {
            return false;
        }
        if !self.tags.is_empty() {
            let wanted: Vec<String> =
                self.tags.iter().map(|t| t.to_lowercase()).collect();
            let has_tag = entry
                .tags
                .iter()
                .any(|tag| wanted.contains(&tag.to_lowercase()));
            if !has_tag {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub tokens: Vec<String>,
    pub filters: Filters,
    pub limit: usize,
    /// Also match against each atom's summary and details.
    pub include_content: bool,
}

impl SearchQuery {
    /// Build a query from free text, splitting it into whitespace tokens.
    pub fn from_text(text: &str) -> Self {
        Self {
            tokens: tokenize(text),
            filters: Filters::default(),
            limit: DEFAULT_SEARCH_LIMIT,
            include_content: false,
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: AtomType,
    pub status: AtomStatus,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub tags: Vec<String>,
    pub updated_at: String,
    pub score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Split free text on whitespace and normalize the pieces.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_tokens(text.split_whitespace())
}

/// Lower-case tokens and drop empty ones.
pub fn normalize_tokens<I, S>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .map(|t| t.as_ref().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Trust weighting added to every surviving entry.
pub fn trust_weight(status: AtomStatus, confidence: Confidence) -> u32 {
    status.weight() * 5 + confidence.weight() * 3
}

/// Title/tag score for `entry`, or 0 if nothing matched.
///
/// `tokens` must already be normalized.
pub fn match_score(entry: &CatalogEntry, tokens: &[String]) -> u32 {
    if tokens.is_empty() {
        return BROWSE_BASE + trust_weight(entry.status, entry.confidence);
    }

    let title = entry.title.to_lowercase();
    let tags: Vec<String> = entry.tags.iter().map(|t| t.to_lowercase()).collect();

    let mut score = 0;
    let mut tag_hit = false;
    for token in tokens {
        if title.contains(token.as_str()) {
            score += TITLE_HIT;
            if title.starts_with(token.as_str()) {
                score += TITLE_PREFIX_BONUS;
            }
        }
        tag_hit |= tags.iter().any(|tag| tag.contains(token.as_str()));
    }
    if tag_hit {
        score += TAG_HIT;
    }

    if score == 0 {
        return 0;
    }
    score + trust_weight(entry.status, entry.confidence)
}

/// Fold content hits into a title/tag score.
///
/// `content` is the atom's summary and details; `None` when the atom could
/// not be loaded.
pub fn content_score(
    entry: &CatalogEntry,
    tokens: &[String],
    base: u32,
    content: Option<&str>,
) -> u32 {
    let Some(content) = content else {
        return base;
    };
    let content = content.to_lowercase();
    let hits = tokens
        .iter()
        .filter(|token| content.contains(token.as_str()))
        .count() as u32;

    match (base, hits) {
        (_, 0) => base,
        (0, hits) => {
            CONTENT_HIT
                + trust_weight(entry.status, entry.confidence)
                + CONTENT_HIT * (hits - 1)
        }
        (base, hits) => base + CONTENT_HIT * hits,
    }
}

/// Score and order `entries`.
///
/// `load_content` is only called in content mode with a non-empty query.
/// Equal scores keep their catalog order.
pub fn rank<'a, F>(
    entries: &'a [CatalogEntry],
    query: &SearchQuery,
    mut load_content: F,
) -> Vec<(&'a CatalogEntry, u32)>
where
    F: FnMut(&CatalogEntry) -> Option<String>,
{
    let tokens = normalize_tokens(&query.tokens);
    let deep = query.include_content && !tokens.is_empty();

    let mut scored: Vec<(&CatalogEntry, u32)> = entries
        .iter()
        .filter(|entry| query.filters.matches(entry))
        .filter_map(|entry| {
            let mut score = match_score(entry, &tokens);
            if deep {
                let content = load_content(entry);
                score = content_score(entry, &tokens, score, content.as_deref());
            }
            (score > 0).then_some((entry, score))
        })
        .collect();

    // `sort_by` is stable, which keeps catalog order between ties.
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(query.limit);
    scored
}

/// Run a search over a catalog snapshot, loading atoms from `atoms` for
/// content matching and result summaries.
pub fn execute_search(
    entries: &[CatalogEntry],
    query: &SearchQuery,
    atoms: &AtomRepository,
) -> Vec<SearchHit> {
    search_with(entries, query, |id| atoms.load(id))
}

/// [`execute_search`] over any atom source. Each atom is loaded at most
/// once: summaries read while scoring content are reused for the hits.
pub fn search_with<L>(
    entries: &[CatalogEntry],
    query: &SearchQuery,
    mut load: L,
) -> Vec<SearchHit>
where
    L: FnMut(&str) -> Result<Option<Atom>>,
{
    let mut summaries: HashMap<String, Option<String>> = HashMap::new();

    let ranked = rank(entries, query, |entry| {
        let atom = match load(&entry.id) {
            Ok(atom) => atom,
            Err(e) => {
                tracing::warn!(id = %entry.id, "content unavailable for search: {e}");
                None
            }
        };
        let content = atom
            .as_ref()
            .map(|atom| format!("{} {}", atom.content.summary, atom.content.details));
        summaries.insert(entry.id.clone(), atom.map(|atom| atom.content.summary));
        content
    });

    ranked
        .into_iter()
        .map(|(entry, score)| {
            let summary = match summaries.remove(&entry.id) {
                Some(summary) => summary,
                None => load(&entry.id)
                    .ok()
                    .flatten()
                    .map(|atom| atom.content.summary),
            };
            SearchHit {
                id: entry.id.clone(),
                title: entry.title.clone(),
                kind: entry.kind,
                status: entry.status,
                confidence: entry.confidence,
                language: entry.language.clone(),
                tags: entry.tags.clone(),
                updated_at: entry.updated_at.clone(),
                score,
                summary,
            }
        })
        .collect()
}

/// Format results for human-readable terminal output.
pub fn format_human(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{:>3}. [{:>3}] {} {} ({}, {}, {})",
            i + 1,
            hit.score,
            hit.id,
            hit.title,
            hit.kind,
            hit.status,
            hit.confidence
        );
        if let Some(ref summary) = hit.summary
            && !summary.is_empty()
        {
            println!("     {summary}");
        }
    }
    println!("\n{} result(s)", hits.len());
}
