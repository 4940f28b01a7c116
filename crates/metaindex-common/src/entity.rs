//! Entity identifiers
//!
//! Metadata is attached to platform entities that are created and destroyed
//! elsewhere. The store only needs three things from an identifier: a stable
//! canonical string (used in row keys), the owning namespace (used to scope
//! search) and a coarse kind (used by search target filters).
//!
//! Canonical form is `<kind>:<part>.<part>...`, for example
//! `program:ns1.app1.flow.flow1` or `artifact:ns1.a1.1.0.0`. The last part
//! of an artifact id is its version and may itself contain dots.

use crate::error::{Error, Result};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace whose entities are visible from every namespace's search
pub const SYSTEM_NAMESPACE: &str = "system";

/// Kind of program within an application
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum ProgramType {
    #[display("flow")]
    Flow,
    #[display("mapreduce")]
    MapReduce,
    #[display("service")]
    Service,
    #[display("spark")]
    Spark,
    #[display("worker")]
    Worker,
    #[display("workflow")]
    Workflow,
}

impl ProgramType {
    /// Canonical lowercase name used in entity ids
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flow => "flow",
            Self::MapReduce => "mapreduce",
            Self::Service => "service",
            Self::Spark => "spark",
            Self::Worker => "worker",
            Self::Workflow => "workflow",
        }
    }
}

impl FromStr for ProgramType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "flow" => Ok(Self::Flow),
            "mapreduce" => Ok(Self::MapReduce),
            "service" => Ok(Self::Service),
            "spark" => Ok(Self::Spark),
            "worker" => Ok(Self::Worker),
            "workflow" => Ok(Self::Workflow),
            other => Err(Error::invalid_argument(format!(
                "unknown program type: {other}"
            ))),
        }
    }
}

/// Coarse classification of an entity, used for search target filtering
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    #[display("application")]
    Application,
    #[display("program")]
    Program,
    #[display("dataset")]
    Dataset,
    #[display("stream")]
    Stream,
    #[display("view")]
    View,
    #[display("artifact")]
    Artifact,
}

impl EntityKind {
    /// Number of dot-separated parts after the `<kind>:` prefix
    const fn part_count(self) -> usize {
        match self {
            Self::Application | Self::Dataset | Self::Stream => 2,
            Self::View | Self::Artifact => 3,
            Self::Program => 4,
        }
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "application" | "app" => Ok(Self::Application),
            "program" => Ok(Self::Program),
            "dataset" => Ok(Self::Dataset),
            "stream" => Ok(Self::Stream),
            "view" => Ok(Self::View),
            "artifact" => Ok(Self::Artifact),
            other => Err(Error::invalid_argument(format!(
                "unknown entity kind: {other}"
            ))),
        }
    }
}

/// Identifier of an entity that can carry metadata
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityId {
    Application {
        namespace: String,
        application: String,
    },
    Program {
        namespace: String,
        application: String,
        program_type: ProgramType,
        program: String,
    },
    Dataset {
        namespace: String,
        dataset: String,
    },
    Stream {
        namespace: String,
        stream: String,
    },
    View {
        namespace: String,
        stream: String,
        view: String,
    },
    Artifact {
        namespace: String,
        artifact: String,
        version: String,
    },
}

impl EntityId {
    /// Create an application id
    pub fn application(namespace: &str, application: &str) -> Result<Self> {
        validate_name("namespace", namespace)?;
        validate_name("application", application)?;
        Ok(Self::Application {
            namespace: namespace.to_string(),
            application: application.to_string(),
        })
    }

    /// Create a program id
    pub fn program(
        namespace: &str,
        application: &str,
        program_type: ProgramType,
        program: &str,
    ) -> Result<Self> {
        validate_name("namespace", namespace)?;
        validate_name("application", application)?;
        validate_name("program", program)?;
        Ok(Self::Program {
            namespace: namespace.to_string(),
            application: application.to_string(),
            program_type,
            program: program.to_string(),
        })
    }

    /// Create a dataset id
    pub fn dataset(namespace: &str, dataset: &str) -> Result<Self> {
        validate_name("namespace", namespace)?;
        validate_name("dataset", dataset)?;
        Ok(Self::Dataset {
            namespace: namespace.to_string(),
            dataset: dataset.to_string(),
        })
    }

    /// Create a stream id
    pub fn stream(namespace: &str, stream: &str) -> Result<Self> {
        validate_name("namespace", namespace)?;
        validate_name("stream", stream)?;
        Ok(Self::Stream {
            namespace: namespace.to_string(),
            stream: stream.to_string(),
        })
    }

    /// Create a stream view id
    pub fn view(namespace: &str, stream: &str, view: &str) -> Result<Self> {
        validate_name("namespace", namespace)?;
        validate_name("stream", stream)?;
        validate_name("view", view)?;
        Ok(Self::View {
            namespace: namespace.to_string(),
            stream: stream.to_string(),
            view: view.to_string(),
        })
    }

    /// Create an artifact id
    pub fn artifact(namespace: &str, artifact: &str, version: &str) -> Result<Self> {
        validate_name("namespace", namespace)?;
        validate_name("artifact", artifact)?;
        validate_version(version)?;
        Ok(Self::Artifact {
            namespace: namespace.to_string(),
            artifact: artifact.to_string(),
            version: version.to_string(),
        })
    }

    /// Namespace that owns this entity
    #[must_use]
    pub fn namespace(&self) -> &str {
        match self {
            Self::Application { namespace, .. }
            | Self::Program { namespace, .. }
            | Self::Dataset { namespace, .. }
            | Self::Stream { namespace, .. }
            | Self::View { namespace, .. }
            | Self::Artifact { namespace, .. } => namespace,
        }
    }

    /// Coarse kind of this entity
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Application { .. } => EntityKind::Application,
            Self::Program { .. } => EntityKind::Program,
            Self::Dataset { .. } => EntityKind::Dataset,
            Self::Stream { .. } => EntityKind::Stream,
            Self::View { .. } => EntityKind::View,
            Self::Artifact { .. } => EntityKind::Artifact,
        }
    }

    /// Whether this entity lives in the system namespace
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.namespace() == SYSTEM_NAMESPACE
    }

    fn parts(&self) -> Vec<&str> {
        match self {
            Self::Application {
                namespace,
                application,
            } => vec![namespace.as_str(), application.as_str()],
            Self::Program {
                namespace,
                application,
                program_type,
                program,
            } => vec![
                namespace.as_str(),
                application.as_str(),
                program_type.as_str(),
                program.as_str(),
            ],
            Self::Dataset { namespace, dataset } => vec![namespace.as_str(), dataset.as_str()],
            Self::Stream { namespace, stream } => vec![namespace.as_str(), stream.as_str()],
            Self::View {
                namespace,
                stream,
                view,
            } => vec![namespace.as_str(), stream.as_str(), view.as_str()],
            Self::Artifact {
                namespace,
                artifact,
                version,
            } => vec![namespace.as_str(), artifact.as_str(), version.as_str()],
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.parts().join("."))
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({self})")
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid_entity_id(s, "missing '<kind>:' prefix"))?;
        let kind: EntityKind = kind
            .parse()
            .map_err(|_| Error::invalid_entity_id(s, format!("unknown kind '{kind}'")))?;
        let parts: Vec<&str> = rest.splitn(kind.part_count(), '.').collect();

        match (kind, parts.as_slice()) {
            (EntityKind::Application, [ns, app]) => Self::application(ns, app),
            (EntityKind::Program, [ns, app, program_type, program]) => {
                Self::program(ns, app, program_type.parse()?, program)
            }
            (EntityKind::Dataset, [ns, dataset]) => Self::dataset(ns, dataset),
            (EntityKind::Stream, [ns, stream]) => Self::stream(ns, stream),
            (EntityKind::View, [ns, stream, view]) => Self::view(ns, stream, view),
            (EntityKind::Artifact, [ns, artifact, version]) => {
                Self::artifact(ns, artifact, version)
            }
            _ => Err(Error::invalid_entity_id(
                s,
                format!("expected {} parts", kind.part_count()),
            )),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

/// Names: non-empty, ASCII alphanumerics, '_' and '-'
fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_entity_id(value, format!("{field} is empty")));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-')
    {
        return Err(Error::invalid_entity_id(
            value,
            format!("{field} contains invalid character '{c}'"),
        ));
    }
    Ok(())
}

/// Versions additionally allow '.'
fn validate_version(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_entity_id(value, "version is empty"));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '_' | '-' | '.'))
    {
        return Err(Error::invalid_entity_id(
            value,
            format!("version contains invalid character '{c}'"),
        ));
    }
    Ok(())
}
