//! The atom data model.
//!
//! An atom is one knowledge record: a fact, decision, procedure, pattern,
//! gotcha, glossary entry or snippet. Field names are snake_case and shared
//! by both on-disk encodings.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::Validation(format!(
                        "invalid {}: {other:?} (expected one of: {})",
                        $label,
                        [$($text),+].join(", ")
                    ))),
                }
            }
        }
    };
}

closed_enum! {
    /// Kind of knowledge an atom records.
    AtomType, "atom type" {
        Fact => "fact",
        Decision => "decision",
        Procedure => "procedure",
        Pattern => "pattern",
        Gotcha => "gotcha",
        Glossary => "glossary",
        Snippet => "snippet",
    }
}

closed_enum! {
    AtomStatus, "atom status" {
        Active => "active",
        Draft => "draft",
        Deprecated => "deprecated",
    }
}

closed_enum! {
    Confidence, "confidence level" {
        High => "high",
        Medium => "medium",
        Low => "low",
    }
}

closed_enum! {
    /// Where a piece of knowledge came from.
    SourceKind, "source kind" {
        RepoPath => "repo_path",
        Ticket => "ticket",
        Url => "url",
        Conversation => "conversation",
    }
}

closed_enum! {
    /// Relation between two atoms.
    LinkRel, "link relation" {
        DependsOn => "depends_on",
        SeeAlso => "see_also",
        Contradicts => "contradicts",
    }
}

impl AtomStatus {
    /// Ranking weight: active=3, draft=2, deprecated=1.
    pub fn weight(self) -> u32 {
        match self {
            Self::Active => 3,
            Self::Draft => 2,
            Self::Deprecated => 1,
        }
    }
}

impl Confidence {
    /// Ranking weight: high=3, medium=2, low=1.
    pub fn weight(self) -> u32 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub kind: SourceKind,
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub rel: LinkRel,
    pub id: String,
}

/// A dated entry in an atom's append-only change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNote {
    pub date: String,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomContent {
    pub summary: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub pitfalls: Vec<String>,
    #[serde(default)]
    pub update_notes: Vec<UpdateNote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atom {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: AtomType,
    pub status: AtomStatus,
    pub confidence: Confidence,
    pub content: AtomContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub supersedes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

/// Today's local calendar date as `YYYY-MM-DD`.
pub fn today() -> String {
    chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
}
