//! Artifact identity and the per-function variant slots.
//!
//! Identity is parsed once, at ingestion ([`ArtifactLocator::parse`]); every
//! downstream component works with [`ArtifactKey`] values and never looks at
//! file names again.

pub mod ingest;
pub mod store;

use crate::repair::Diagnostic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub use store::{ArtifactStore, RepairRun};

/// Prefix that benchmark tooling puts in front of project directory names.
pub(crate) const PROJECT_DIR_PREFIX: &str = "repoeval_";

/// One function of one project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub project_id: String,
    pub function_id: String,
}

impl ArtifactKey {
    pub fn new(project_id: impl Into<String>, function_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            function_id: function_id.into(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.function_id)
    }
}

/// The named slots kept for every function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Pristine,
    Current,
    NoProvide,
    History,
}

impl VariantKind {
    /// Directory (relative to the project directory) that holds this slot.
    pub fn dir_name(&self) -> &'static str {
        match self {
            VariantKind::Pristine => "readful_result_backup",
            VariantKind::Current => "readful_result",
            VariantKind::NoProvide => "readful_result_no_provide",
            VariantKind::History => "readful_result_history",
        }
    }

    fn from_dir_name(name: &str) -> Option<Self> {
        [
            VariantKind::Pristine,
            VariantKind::Current,
            VariantKind::NoProvide,
            VariantKind::History,
        ]
        .into_iter()
        .find(|kind| kind.dir_name() == name)
    }
}

/// Fully structured identity of one stored text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocator {
    pub key: ArtifactKey,
    pub variant: VariantKind,
    pub version_index: Option<usize>,
}

impl ArtifactLocator {
    /// Parse `<project_dir>/<slot_dir>/<Function>[_<n>].st`.
    ///
    /// Only history snapshots carry a `_<n>` version suffix; for the other
    /// slots the whole file stem is the function id.
    pub fn parse(path: &Path) -> Option<Self> {
        if path.extension().and_then(|e| e.to_str()) != Some("st") {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let slot_dir = path.parent()?;
        let variant = VariantKind::from_dir_name(slot_dir.file_name()?.to_str()?)?;
        let project_dir = slot_dir.parent()?.file_name()?.to_str()?;
        let project_id = project_id_from_dir_name(project_dir);

        let (function_id, version_index) = match variant {
            VariantKind::History => {
                let (name, version) = stem.rsplit_once('_')?;
                (name.to_string(), Some(version.parse::<usize>().ok()?))
            }
            _ => (stem.to_string(), None),
        };
        if function_id.is_empty() || project_id.is_empty() {
            return None;
        }

        Some(Self {
            key: ArtifactKey::new(project_id, function_id),
            variant,
            version_index,
        })
    }
}

/// Canonical project id for a project directory name.
pub fn project_id_from_dir_name(dir_name: &str) -> String {
    dir_name
        .strip_prefix(PROJECT_DIR_PREFIX)
        .unwrap_or(dir_name)
        .to_string()
}

/// How a recorded fix transition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Passed,
    Failed,
    ServiceError,
}

/// One fix transition `input_text -> output_text` of a repair run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub attempt_index: usize,
    pub input_text: String,
    #[serde(default)]
    pub diagnostics_in: Vec<Diagnostic>,
    pub output_text: String,
    pub outcome: AttemptOutcome,
    pub recorded_at: DateTime<Utc>,
}
