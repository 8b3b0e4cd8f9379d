//! Provide-code and ground-truth lookups keyed by [`ArtifactKey`].

use crate::artifact::{ArtifactKey, PROJECT_DIR_PREFIX};
use crate::error::{EvalError, EvalResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Per-project file a generation run writes its prompts and metadata to.
pub(crate) const RESULTS_FILE: &str = "results.jsonl";

/// Source of the provide-code prefix of a function.
pub trait ProvideCodeSource: Send + Sync {
    fn provide_code(&self, key: &ArtifactKey) -> EvalResult<String>;
}

/// Source of the reference implementation a candidate is scored against.
pub trait ReferenceSource: Send + Sync {
    fn reference(&self, key: &ArtifactKey) -> EvalResult<String>;
}

/// Normalize a generation prompt into provide code: literal `\t` and `\n`
/// escapes become real tabs and newlines, trailing whitespace is dropped.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .replace("\\t", "\t")
        .replace("\\n", "\n")
        .trim_end()
        .to_string()
}

/// In-memory provide code, mostly for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MapProvideCode {
    entries: HashMap<ArtifactKey, String>,
}

impl MapProvideCode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ArtifactKey, provide_code: impl Into<String>) {
        self.entries.insert(key, provide_code.into());
    }
}

impl ProvideCodeSource for MapProvideCode {
    fn provide_code(&self, key: &ArtifactKey) -> EvalResult<String> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| EvalError::NotFound(format!("provide code for {}", key)))
    }
}

/// Provide code read from the per-project `results.jsonl` a generation run
/// leaves behind (`<root>/<project>/results.jsonl`, or under the
/// `repoeval_`-prefixed directory).
#[derive(Debug)]
pub struct JsonlProvideCode {
    root: PathBuf,
    cache: Mutex<HashMap<String, HashMap<String, String>>>,
}

/// One line of a generation `results.jsonl`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct GenerationRecord {
    task_id: Option<String>,
    function_name: Option<String>,
    #[serde(default)]
    metadata: GenerationMetadata,
    pub(crate) prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerationMetadata {
    function_name: Option<String>,
    #[serde(default)]
    fpath_tuple: Vec<String>,
}

impl GenerationRecord {
    /// Function id of the record: the task id, else the stem of the last
    /// source path component, else an explicit function name.
    pub(crate) fn function_name(&self) -> Option<String> {
        if let Some(task_id) = self.task_id.as_deref().filter(|t| !t.is_empty()) {
            return Some(task_id.to_string());
        }
        let from_path = self
            .metadata
            .fpath_tuple
            .last()
            .and_then(|last| Path::new(last).file_stem())
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty());
        if let Some(stem) = from_path {
            return Some(stem.to_string());
        }
        self.function_name
            .clone()
            .or_else(|| self.metadata.function_name.clone())
            .filter(|name| !name.is_empty())
    }

    /// Normalized provide code, when the record has a prompt.
    pub(crate) fn provide_code(&self) -> Option<String> {
        self.prompt.as_deref().map(normalize_prompt)
    }
}

/// Directory holding the generation outputs of `project_id` under `root`,
/// plain or `repoeval_`-prefixed.
pub(crate) fn generation_dir(root: &Path, project_id: &str) -> Option<PathBuf> {
    [
        root.join(project_id),
        root.join(format!("{}{}", PROJECT_DIR_PREFIX, project_id)),
    ]
    .into_iter()
    .find(|dir| dir.join(RESULTS_FILE).is_file())
}

/// Records of a results file in line order. Blank lines are skipped; an
/// unparsable line is kept as `None` so positions still line up with the
/// generations file.
pub(crate) fn read_generation_records(path: &Path) -> EvalResult<Vec<Option<GenerationRecord>>> {
    let content = fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<GenerationRecord>(line) {
            Ok(record) => records.push(Some(record)),
            Err(err) => {
                warn!(path = %path.display(), line = line_no + 1, error = %err, "skipping unparsable results line");
                records.push(None);
            }
        }
    }
    Ok(records)
}

impl JsonlProvideCode {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn load_project(&self, project_id: &str) -> EvalResult<HashMap<String, String>> {
        let Some(dir) = generation_dir(&self.root, project_id) else {
            return Err(EvalError::NotFound(format!(
                "{} for project {}",
                RESULTS_FILE, project_id
            )));
        };
        let records = read_generation_records(&dir.join(RESULTS_FILE))?;
        Ok(provide_code_map(records.into_iter().flatten()))
    }
}

/// Map `function id -> provide code`; the first prompt for a function wins.
fn provide_code_map(records: impl IntoIterator<Item = GenerationRecord>) -> HashMap<String, String> {
    let mut prompts = HashMap::new();
    for record in records {
        if let (Some(name), Some(provide)) = (record.function_name(), record.provide_code()) {
            prompts.entry(name).or_insert(provide);
        }
    }
    prompts
}

impl ProvideCodeSource for JsonlProvideCode {
    fn provide_code(&self, key: &ArtifactKey) -> EvalResult<String> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| EvalError::Config("provide-code cache poisoned".to_string()))?;
        if !cache.contains_key(&key.project_id) {
            let loaded = self.load_project(&key.project_id)?;
            cache.insert(key.project_id.clone(), loaded);
        }
        cache
            .get(&key.project_id)
            .and_then(|prompts| prompts.get(&key.function_id))
            .cloned()
            .ok_or_else(|| EvalError::NotFound(format!("provide code for {}", key)))
    }
}

/// The two ground-truth corpora.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corpus {
    /// `generation_context_ground_truth/<P>/<F>.st`
    #[default]
    GenerationContext,
    /// `project_code/<P>/FUN/<F>.st`
    ProjectCode,
}

/// Ground truth read from a dataset directory.
#[derive(Debug, Clone)]
pub struct FsGroundTruth {
    dataset_root: PathBuf,
    corpus: Corpus,
}

impl FsGroundTruth {
    pub fn new(dataset_root: impl Into<PathBuf>, corpus: Corpus) -> Self {
        Self {
            dataset_root: dataset_root.into(),
            corpus,
        }
    }

    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        let file_name = format!("{}.st", key.function_id);
        match self.corpus {
            Corpus::GenerationContext => self
                .dataset_root
                .join("generation_context_ground_truth")
                .join(&key.project_id)
                .join(file_name),
            Corpus::ProjectCode => self
                .dataset_root
                .join("project_code")
                .join(&key.project_id)
                .join("FUN")
                .join(file_name),
        }
    }
}

impl ReferenceSource for FsGroundTruth {
    fn reference(&self, key: &ArtifactKey) -> EvalResult<String> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(EvalError::NotFound(format!(
                "ground truth for {} at {}",
                key,
                path.display()
            ))),
            Err(err) => Err(err.into()),
        }
    }
}
