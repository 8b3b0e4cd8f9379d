//! On-disk artifact store.
//!
//! Layout for project `P`, function `F` under the store root:
//!
//! ```text
//! P/readful_result/F.st                  current
//! P/readful_result_backup/F.st           pristine
//! P/readful_result_no_provide/F.st       no-provide
//! P/readful_result_history/F.history.jsonl   one FixAttempt per line
//! P/readful_result_history/F_<n>.st      version snapshots
//! P/.locks/F.lock                        per-operation advisory lock
//! P/.locks/F.run.lock                    held for a whole repair run
//! ```
//!
//! Every mutating operation holds the artifact's exclusive lock, so history
//! ordering checks and slot writes never interleave for one function while
//! distinct functions proceed in parallel. A [`RepairRun`] additionally owns
//! the run lock until it is dropped, so at most one run per artifact exists.

use super::{
    project_id_from_dir_name, ArtifactKey, ArtifactLocator, FixAttempt, VariantKind,
    PROJECT_DIR_PREFIX,
};
use crate::error::{EvalError, EvalResult};
use crate::provide;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

const LOCK_DIR: &str = ".locks";
const LOCK_TIMEOUT_SECS: u64 = 10;
const LOCK_RETRY_MS: u64 = 20;
const RUN_LOCK_SUFFIX: &str = "run.lock";
const OP_LOCK_SUFFIX: &str = "lock";
const HISTORY_SUFFIX: &str = ".history.jsonl";

/// Scope of one repair run over one artifact.
///
/// The "pristine already backed up" flag lives here, so it can never leak
/// across artifacts or across runs. The run lock is released on drop.
#[derive(Debug)]
pub struct RepairRun {
    key: ArtifactKey,
    run_id: Uuid,
    backed_up: bool,
    _run_lock: ArtifactLock,
}

impl RepairRun {
    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

#[derive(Debug)]
struct ArtifactLock {
    file: fs::File,
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Filesystem-backed store of function artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<project_id>`, or the `repoeval_`-prefixed directory when
    /// only that one exists.
    fn project_dir(&self, project_id: &str) -> PathBuf {
        let plain = self.root.join(project_id);
        if plain.is_dir() {
            return plain;
        }
        let prefixed = self
            .root
            .join(format!("{}{}", PROJECT_DIR_PREFIX, project_id));
        if prefixed.is_dir() {
            prefixed
        } else {
            plain
        }
    }

    fn slot_path(&self, key: &ArtifactKey, kind: VariantKind) -> PathBuf {
        let dir = self.project_dir(&key.project_id).join(kind.dir_name());
        match kind {
            VariantKind::History => dir.join(format!("{}{}", key.function_id, HISTORY_SUFFIX)),
            _ => dir.join(format!("{}.st", key.function_id)),
        }
    }

    fn snapshot_path(&self, key: &ArtifactKey, version: usize) -> PathBuf {
        self.project_dir(&key.project_id)
            .join(VariantKind::History.dir_name())
            .join(format!("{}_{}.st", key.function_id, version))
    }

    fn open_lock_file(&self, key: &ArtifactKey, suffix: &str) -> EvalResult<fs::File> {
        let lock_dir = self.project_dir(&key.project_id).join(LOCK_DIR);
        fs::create_dir_all(&lock_dir)?;
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_dir.join(format!("{}.{}", key.function_id, suffix)))?)
    }

    fn lock(&self, key: &ArtifactKey) -> EvalResult<ArtifactLock> {
        let file = self.open_lock_file(key, OP_LOCK_SUFFIX)?;
        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(ArtifactLock { file }),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(EvalError::Io(std::io::Error::new(
                            ErrorKind::TimedOut,
                            format!(
                                "timed out waiting for artifact lock of {} ({}s)",
                                key, LOCK_TIMEOUT_SECS
                            ),
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// The run lock is never waited for: a second run on the same artifact
    /// fails immediately instead of queueing behind a long repair.
    fn try_run_lock(&self, key: &ArtifactKey) -> EvalResult<ArtifactLock> {
        let file = self.open_lock_file(key, RUN_LOCK_SUFFIX)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(ArtifactLock { file }),
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                Err(EvalError::Io(std::io::Error::new(
                    ErrorKind::WouldBlock,
                    format!("a repair run is already active for {}", key),
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Open a repair run. History left behind by an earlier run is archived
    /// next to the live history and its snapshots are removed.
    pub fn begin_run(&self, key: &ArtifactKey) -> EvalResult<RepairRun> {
        let run_lock = self.try_run_lock(key)?;
        let _lock = self.lock(key)?;
        self.archive_history(key)?;

        Ok(RepairRun {
            key: key.clone(),
            run_id: Uuid::new_v4(),
            backed_up: false,
            _run_lock: run_lock,
        })
    }

    /// Move the live history aside and drop its snapshots. Caller holds the
    /// operation lock.
    fn archive_history(&self, key: &ArtifactKey) -> EvalResult<()> {
        let history_path = self.slot_path(key, VariantKind::History);
        if history_path.exists() {
            let archived = history_path.with_file_name(format!(
                "{}.history.{}.jsonl",
                key.function_id,
                chrono::Utc::now().timestamp_millis()
            ));
            fs::rename(&history_path, &archived)?;
            debug!(artifact = %key, archived = %archived.display(), "archived previous history");
        }
        self.remove_snapshots(key)
    }

    /// Store a freshly generated text as `current`.
    ///
    /// When it differs from the pristine backup of an earlier run, that run's
    /// state is stale: its history is archived and the pristine and
    /// no-provide slots are removed, so the next repair starts from the new
    /// text. Returns whether stale state was reset. Fails while a repair run
    /// holds the artifact.
    pub fn replace_generation(&self, key: &ArtifactKey, text: &str) -> EvalResult<bool> {
        let _run_lock = self.try_run_lock(key)?;
        let _lock = self.lock(key)?;
        let stale = match self.read_slot(key, VariantKind::Pristine)? {
            Some(pristine) => pristine != text,
            None => false,
        };
        if stale {
            self.archive_history(key)?;
            for kind in [VariantKind::Pristine, VariantKind::NoProvide] {
                let path = self.slot_path(key, kind);
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
            debug!(artifact = %key, "reset state of an earlier generation");
        }
        write_atomic(&self.slot_path(key, VariantKind::Current), text)?;
        Ok(stale)
    }

    fn remove_snapshots(&self, key: &ArtifactKey) -> EvalResult<()> {
        let dir = self
            .project_dir(&key.project_id)
            .join(VariantKind::History.dir_name());
        if !dir.exists() {
            return Ok(());
        }
        let prefix = format!("{}_", key.function_id);
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let is_snapshot = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".st"))
                .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false);
            if is_snapshot {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Write the pristine backup unless this run already wrote it.
    /// Returns whether a write happened.
    pub fn backup_once(&self, run: &mut RepairRun, text: &str) -> EvalResult<bool> {
        if run.backed_up {
            return Ok(false);
        }
        let _lock = self.lock(&run.key)?;
        write_atomic(&self.slot_path(&run.key, VariantKind::Pristine), text)?;
        run.backed_up = true;
        Ok(true)
    }

    /// Append one attempt, enforcing the history ordering invariants.
    pub fn append_history(&self, key: &ArtifactKey, attempt: &FixAttempt) -> EvalResult<()> {
        let _lock = self.lock(key)?;
        let history = self.load_history(key)?;
        let expected = history.len();
        if attempt.attempt_index != expected {
            return Err(corrupt(
                key,
                format!(
                    "expected attempt index {}, got {}",
                    expected, attempt.attempt_index
                ),
            ));
        }

        let previous_output = match history.last() {
            Some(last) => last.output_text.clone(),
            None => self
                .read_slot(key, VariantKind::Pristine)?
                .ok_or_else(|| corrupt(key, "history started without a pristine backup"))?,
        };
        if attempt.input_text != previous_output {
            return Err(corrupt(
                key,
                format!(
                    "attempt {} input does not continue from the previous version",
                    attempt.attempt_index
                ),
            ));
        }

        let path = self.slot_path(key, VariantKind::History);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(attempt)?)?;
        file.sync_data()?;

        if attempt.attempt_index == 0 {
            write_atomic(&self.snapshot_path(key, 0), &attempt.input_text)?;
        }
        write_atomic(
            &self.snapshot_path(key, attempt.attempt_index + 1),
            &attempt.output_text,
        )?;
        Ok(())
    }

    /// Overwrite the working variant.
    pub fn write_current(&self, key: &ArtifactKey, text: &str) -> EvalResult<()> {
        let _lock = self.lock(key)?;
        write_atomic(&self.slot_path(key, VariantKind::Current), text)
    }

    /// Derive `no_provide` from `current` by removing the exact provide-code
    /// prefix. On mismatch any stale no-provide text is removed so downstream
    /// readers never see a variant derived from an older `current`.
    pub fn derive_no_provide(&self, key: &ArtifactKey, provide_code: &str) -> EvalResult<String> {
        let _lock = self.lock(key)?;
        let current = self
            .read_slot(key, VariantKind::Current)?
            .ok_or_else(|| EvalError::NotFound(format!("current text of {}", key)))?;
        let no_provide_path = self.slot_path(key, VariantKind::NoProvide);

        match provide::strip_provide_code(&current, provide_code) {
            Some(body) => {
                write_atomic(&no_provide_path, body)?;
                Ok(body.to_string())
            }
            None => {
                if no_provide_path.exists() {
                    fs::remove_file(&no_provide_path)?;
                }
                Err(EvalError::PrefixMismatch {
                    artifact: key.to_string(),
                })
            }
        }
    }

    /// Ordered attempt history of the live run.
    pub fn read_history(&self, key: &ArtifactKey) -> EvalResult<Vec<FixAttempt>> {
        self.load_history(key)
    }

    fn load_history(&self, key: &ArtifactKey) -> EvalResult<Vec<FixAttempt>> {
        let path = self.slot_path(key, VariantKind::History);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        let mut attempts = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let attempt: FixAttempt = serde_json::from_str(line).map_err(|err| {
                corrupt(key, format!("history line {}: {}", line_no + 1, err))
            })?;
            if attempt.attempt_index != attempts.len() {
                return Err(corrupt(
                    key,
                    format!(
                        "history line {} has attempt index {}",
                        line_no + 1,
                        attempt.attempt_index
                    ),
                ));
            }
            attempts.push(attempt);
        }
        Ok(attempts)
    }

    /// Version texts of the live run: version 0 is the pristine text and
    /// version `n + 1` is the output of attempt `n`.
    pub fn versions(&self, key: &ArtifactKey) -> EvalResult<Vec<(usize, String)>> {
        let history = self.load_history(key)?;
        let mut versions = Vec::with_capacity(history.len() + 1);
        match history.first() {
            Some(first) => versions.push((0, first.input_text.clone())),
            None => {
                let base = match self.read_slot(key, VariantKind::Pristine)? {
                    Some(text) => text,
                    None => self.read_variant(key, VariantKind::Current)?,
                };
                versions.push((0, base));
            }
        }
        for attempt in history {
            versions.push((attempt.attempt_index + 1, attempt.output_text));
        }
        Ok(versions)
    }

    /// Read a text slot. History is not a text slot; use [`Self::versions`].
    pub fn read_variant(&self, key: &ArtifactKey, kind: VariantKind) -> EvalResult<String> {
        if kind == VariantKind::History {
            return Err(EvalError::NotFound(format!(
                "history of {} is not a text slot",
                key
            )));
        }
        self.read_slot(key, kind)?
            .ok_or_else(|| EvalError::NotFound(format!("{:?} text of {}", kind, key)))
    }

    fn read_slot(&self, key: &ArtifactKey, kind: VariantKind) -> EvalResult<Option<String>> {
        let path = self.slot_path(key, kind);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Project ids that have a current slot directory, sorted.
    pub fn list_projects(&self) -> EvalResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut projects = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if !entry.path().join(VariantKind::Current.dir_name()).is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                projects.push(project_id_from_dir_name(name));
            }
        }
        projects.sort();
        projects.dedup();
        Ok(projects)
    }

    /// Function ids with a current text in `project_id`, sorted.
    pub fn list_functions(&self, project_id: &str) -> EvalResult<Vec<ArtifactKey>> {
        let dir = self
            .project_dir(project_id)
            .join(VariantKind::Current.dir_name());
        if !dir.is_dir() {
            return Err(EvalError::NotFound(format!("project {}", project_id)));
        }
        let mut keys = Vec::new();
        for entry in walkdir::WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| EvalError::Io(std::io::Error::other(err.to_string())))?;
            match ArtifactLocator::parse(entry.path()) {
                Some(locator) if locator.variant == VariantKind::Current => {
                    keys.push(locator.key)
                }
                _ => debug!(path = %entry.path().display(), "ignoring non-artifact file"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn corrupt(key: &ArtifactKey, message: impl Into<String>) -> EvalError {
    EvalError::StoreCorrupt {
        artifact: key.to_string(),
        message: message.into(),
    }
}

/// Write via a sibling temp file and rename, so readers see either the old
/// or the new text in full.
fn write_atomic(path: &Path, content: &str) -> EvalResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("st.tmp");
    fs::write(&tmp_path, content)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::AttemptOutcome;
    use chrono::Utc;
    use tempfile::tempdir;

    fn attempt(index: usize, input: &str, output: &str, outcome: AttemptOutcome) -> FixAttempt {
        FixAttempt {
            attempt_index: index,
            input_text: input.to_string(),
            diagnostics_in: Vec::new(),
            output_text: output.to_string(),
            outcome,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn backup_once_is_idempotent_within_a_run() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new("proj", "Fun");

        let mut run = store.begin_run(&key).unwrap();
        assert!(store.backup_once(&mut run, "original").unwrap());
        assert!(!store.backup_once(&mut run, "changed").unwrap());
        assert_eq!(
            store.read_variant(&key, VariantKind::Pristine).unwrap(),
            "original"
        );

        let first_id = run.run_id();
        drop(run);
        let mut next_run = store.begin_run(&key).unwrap();
        assert_ne!(next_run.run_id(), first_id);
        assert!(store.backup_once(&mut next_run, "second run").unwrap());
        assert_eq!(
            store.read_variant(&key, VariantKind::Pristine).unwrap(),
            "second run"
        );
    }

    #[test]
    fn append_history_enforces_index_and_chain() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new("proj", "Fun");
        let mut run = store.begin_run(&key).unwrap();
        store.backup_once(&mut run, "v0").unwrap();

        let skipped = store.append_history(&key, &attempt(1, "v0", "v1", AttemptOutcome::Failed));
        assert!(matches!(skipped, Err(EvalError::StoreCorrupt { .. })));

        let wrong_input =
            store.append_history(&key, &attempt(0, "other", "v1", AttemptOutcome::Failed));
        assert!(matches!(wrong_input, Err(EvalError::StoreCorrupt { .. })));

        store
            .append_history(&key, &attempt(0, "v0", "v1", AttemptOutcome::Failed))
            .unwrap();
        let broken_chain =
            store.append_history(&key, &attempt(1, "v0", "v2", AttemptOutcome::Passed));
        assert!(matches!(broken_chain, Err(EvalError::StoreCorrupt { .. })));

        store
            .append_history(&key, &attempt(1, "v1", "v2", AttemptOutcome::Passed))
            .unwrap();

        let history = store.read_history(&key).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].outcome, AttemptOutcome::Passed);

        let versions = store.versions(&key).unwrap();
        assert_eq!(
            versions,
            vec![
                (0, "v0".to_string()),
                (1, "v1".to_string()),
                (2, "v2".to_string())
            ]
        );
        let snapshot = dir
            .path()
            .join("proj/readful_result_history/Fun_2.st");
        assert_eq!(fs::read_to_string(snapshot).unwrap(), "v2");
    }

    #[test]
    fn history_without_pristine_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new("proj", "Fun");
        let result = store.append_history(&key, &attempt(0, "v0", "v1", AttemptOutcome::Failed));
        assert!(matches!(result, Err(EvalError::StoreCorrupt { .. })));
    }

    #[test]
    fn begin_run_archives_previous_history() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new("proj", "Fun");
        let mut run = store.begin_run(&key).unwrap();
        store.backup_once(&mut run, "v0").unwrap();
        store
            .append_history(&key, &attempt(0, "v0", "v1", AttemptOutcome::Failed))
            .unwrap();
        drop(run);

        store.begin_run(&key).unwrap();
        assert!(store.read_history(&key).unwrap().is_empty());

        let history_dir = dir.path().join("proj/readful_result_history");
        let names: Vec<String> = fs::read_dir(&history_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("Fun.history.") && n != "Fun.history.jsonl"));
        assert!(!names.iter().any(|n| n == "Fun_0.st" || n == "Fun_1.st"));
    }

    #[test]
    fn only_one_run_per_artifact_at_a_time() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new("proj", "Fun");
        let other = ArtifactKey::new("proj", "Other");

        let run = store.begin_run(&key).unwrap();
        let second = store.begin_run(&key);
        assert!(matches!(second, Err(EvalError::Io(_))));
        assert!(store.replace_generation(&key, "new").is_err());
        let other_run = store.begin_run(&other).unwrap();

        store.write_current(&key, "still writable inside the run").unwrap();
        drop(run);
        drop(other_run);
        assert!(store.begin_run(&key).is_ok());
    }

    #[test]
    fn replace_generation_resets_state_of_a_stale_run() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new("proj", "Fun");
        let mut run = store.begin_run(&key).unwrap();
        store.backup_once(&mut run, "v0").unwrap();
        store
            .append_history(&key, &attempt(0, "v0", "v1", AttemptOutcome::Passed))
            .unwrap();
        store.write_current(&key, "v1").unwrap();
        drop(run);

        assert!(!store.replace_generation(&key, "v0").unwrap());
        assert_eq!(store.read_history(&key).unwrap().len(), 1);

        assert!(store.replace_generation(&key, "fresh").unwrap());
        assert!(store.read_history(&key).unwrap().is_empty());
        assert!(matches!(
            store.read_variant(&key, VariantKind::Pristine),
            Err(EvalError::NotFound(_))
        ));
        assert_eq!(store.read_variant(&key, VariantKind::Current).unwrap(), "fresh");
        assert_eq!(store.versions(&key).unwrap(), vec![(0, "fresh".to_string())]);
    }

    #[test]
    fn derive_no_provide_strips_exact_prefix_or_fails() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new("proj", "Fun");
        let provide = "FUNCTION Fun : INT\nVAR_INPUT\n\ta : INT;\nEND_VAR";
        let current = format!("{}\n\nFun := a * 2;\n\nEND_FUNCTION\n", provide);
        store.write_current(&key, &current).unwrap();

        let body = store.derive_no_provide(&key, provide).unwrap();
        assert_eq!(body, "\n\nFun := a * 2;\n\nEND_FUNCTION\n");
        assert_eq!(format!("{}{}", provide, body), current);
        assert_eq!(
            store.read_variant(&key, VariantKind::NoProvide).unwrap(),
            body
        );

        store
            .write_current(&key, "function Fun : INT\nFun := 1;")
            .unwrap();
        let mismatch = store.derive_no_provide(&key, provide);
        assert!(matches!(mismatch, Err(EvalError::PrefixMismatch { .. })));
        assert!(matches!(
            store.read_variant(&key, VariantKind::NoProvide),
            Err(EvalError::NotFound(_))
        ));
    }

    #[test]
    fn lists_projects_and_functions_sorted() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store
            .write_current(&ArtifactKey::new("beta", "Zeta"), "x")
            .unwrap();
        store
            .write_current(&ArtifactKey::new("beta", "Alpha"), "y")
            .unwrap();
        store
            .write_current(&ArtifactKey::new("alpha", "Only"), "z")
            .unwrap();

        assert_eq!(store.list_projects().unwrap(), vec!["alpha", "beta"]);
        let functions: Vec<String> = store
            .list_functions("beta")
            .unwrap()
            .into_iter()
            .map(|k| k.function_id)
            .collect();
        assert_eq!(functions, vec!["Alpha", "Zeta"]);
        assert!(matches!(
            store.list_functions("missing"),
            Err(EvalError::NotFound(_))
        ));
    }

    #[test]
    fn prefixed_project_directory_resolves_by_project_id() {
        let dir = tempdir().unwrap();
        let slot = dir.path().join("repoeval_tank").join("readful_result");
        fs::create_dir_all(&slot).unwrap();
        fs::write(slot.join("Fill.st"), "body").unwrap();

        let store = ArtifactStore::new(dir.path());
        assert_eq!(store.list_projects().unwrap(), vec!["tank"]);
        let keys = store.list_functions("tank").unwrap();
        assert_eq!(keys, vec![ArtifactKey::new("tank", "Fill")]);
        assert_eq!(
            store.read_variant(&keys[0], VariantKind::Current).unwrap(),
            "body"
        );
    }

    #[test]
    fn versions_fall_back_to_pristine_without_history() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = ArtifactKey::new("proj", "Fun");
        let mut run = store.begin_run(&key).unwrap();
        store.backup_once(&mut run, "first").unwrap();
        store.write_current(&key, "first").unwrap();
        assert_eq!(store.versions(&key).unwrap(), vec![(0, "first".to_string())]);
    }
}
