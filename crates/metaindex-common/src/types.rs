//! Metadata value types
//!
//! Properties are opaque key/value strings. Tags are stored as a single
//! property under [`TAGS_KEY`] whose value is the comma-joined tag list.

use crate::entity::{EntityId, EntityKind};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Reserved property key holding an entity's tags
pub const TAGS_KEY: &str = "tags";

/// Separator between tags in the stored tags value
pub const TAGS_SEPARATOR: &str = ",";

/// Separator between key and value in scoped index tokens and queries
pub const KEYVALUE_SEPARATOR: &str = ":";

/// A single property of an entity
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub entity: EntityId,
    pub key: String,
    pub value: String,
}

impl MetadataEntry {
    /// Create a new entry
    pub fn new(entity: EntityId, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            entity,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Whether this entry is the entity's tag list
    #[must_use]
    pub fn is_tags(&self) -> bool {
        self.key.eq_ignore_ascii_case(TAGS_KEY)
    }
}

impl fmt::Display for MetadataEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}={}", self.entity, self.key, self.value)
    }
}

/// Complete metadata state of one entity at one moment
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metadata {
    pub entity: EntityId,
    pub properties: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
}

impl Metadata {
    /// Create a metadata snapshot
    #[must_use]
    pub const fn new(
        entity: EntityId,
        properties: BTreeMap<String, String>,
        tags: BTreeSet<String>,
    ) -> Self {
        Self {
            entity,
            properties,
            tags,
        }
    }

    /// Metadata of an entity that has no properties or tags
    #[must_use]
    pub const fn empty(entity: EntityId) -> Self {
        Self::new(entity, BTreeMap::new(), BTreeSet::new())
    }

    /// Whether the entity has neither properties nor tags
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.tags.is_empty()
    }
}

/// Entity kinds a search can be restricted to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTarget {
    All,
    Application,
    Program,
    Dataset,
    Stream,
    View,
    Artifact,
}

impl SearchTarget {
    /// Whether entities of `kind` satisfy this target
    #[must_use]
    pub fn matches(self, kind: EntityKind) -> bool {
        match self {
            Self::All => true,
            Self::Application => kind == EntityKind::Application,
            Self::Program => kind == EntityKind::Program,
            Self::Dataset => kind == EntityKind::Dataset,
            Self::Stream => kind == EntityKind::Stream,
            Self::View => kind == EntityKind::View,
            Self::Artifact => kind == EntityKind::Artifact,
        }
    }

    /// Filter check for a set of targets. An empty set means no filtering.
    #[must_use]
    pub fn any_matches(targets: &[Self], kind: EntityKind) -> bool {
        targets.is_empty() || targets.iter().any(|t| t.matches(kind))
    }
}

impl FromStr for SearchTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "app" | "application" => Ok(Self::Application),
            "program" => Ok(Self::Program),
            "dataset" => Ok(Self::Dataset),
            "stream" => Ok(Self::Stream),
            "view" => Ok(Self::View),
            "artifact" => Ok(Self::Artifact),
            other => Err(Error::invalid_argument(format!(
                "unknown search target: {other}"
            ))),
        }
    }
}
