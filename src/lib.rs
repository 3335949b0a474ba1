//! knowledge-catalog - a file-backed store of small knowledge records
//! ("atoms") with a denormalized catalog and deterministic ranked search.
//!
//! Every atom lives in its own YAML file under `<root>/atoms`, and the
//! catalog in `<root>/index.yaml` summarizes them for filtering and ranking.
//! Older JSON files are still read and are replaced by YAML on the next
//! write.
//!
//! # Quick start
//!
//! ```no_run
//! use knowledge_catalog::{DataDir, KnowledgeBase};
//! use knowledge_catalog::knowledge::UpsertRequest;
//! use knowledge_catalog::search::SearchQuery;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let kb = KnowledgeBase::open(data_dir);
//!
//! let atom = kb
//!     .upsert(UpsertRequest {
//!         title: "Error Handling Pattern".to_string(),
//!         kind: "pattern".to_string(),
//!         status: "active".to_string(),
//!         confidence: "high".to_string(),
//!         summary: "Propagate with ?, convert at the boundary.".to_string(),
//!         tags: Some(vec!["error-handling".to_string()]),
//!         ..Default::default()
//!     })
//!     .unwrap();
//! println!("created {}", atom.id);
//!
//! for hit in kb.search(&SearchQuery::from_text("error handling")).unwrap() {
//!     println!("{} {} (score: {})", hit.id, hit.title, hit.score);
//! }
//! ```

pub mod atom;
pub mod atom_id;
pub mod catalog;
pub mod data_dir;
pub mod encoding;
pub mod error;
pub mod knowledge;
pub mod mcp;
pub mod repository;
pub mod search;

pub use atom::Atom;
pub use catalog::CatalogIndex;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use knowledge::KnowledgeBase;
pub use repository::AtomRepository;
