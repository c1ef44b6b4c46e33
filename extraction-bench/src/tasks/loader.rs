//! Test case discovery from a module directory tree
//!
//! ```text
//! <root>/<module>/sources/<base>.txt
//! <root>/<module>/prompts/<base>.txt
//! <root>/<module>/expected/<base>.json
//! <root>/<module>/schema.json          (optional)
//! <root>/<module>/files/<base>/*       (optional attachments)
//! ```
//!
//! Files are paired by base name (file stem) across the three artifact
//! directories. A base name missing any of its three files fails only that
//! test case; a module whose artifact directories cannot be listed fails only
//! that module.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ErrorKind;
use crate::schema::SchemaDescriptor;

use super::{TestCase, TestId};

const SOURCES_DIR: &str = "sources";
const PROMPTS_DIR: &str = "prompts";
const EXPECTED_DIR: &str = "expected";
const FILES_DIR: &str = "files";
const SCHEMA_FILE: &str = "schema.json";

/// Error type for test case loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Test root does not exist or is not a directory: {0}")]
    RootMissing(PathBuf),

    #[error("Missing {artifact} artifact for {id}")]
    MissingArtifact { id: TestId, artifact: &'static str },

    #[error("Failed to read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Skipping module '{module}': cannot list {path}: {reason}")]
    ModuleUnreadable {
        module: String,
        path: PathBuf,
        reason: String,
    },
}

impl LoadError {
    /// Taxonomy kind for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::RootMissing(_) | LoadError::MissingArtifact { .. } => {
                ErrorKind::MissingArtifact
            }
            LoadError::Io(_) | LoadError::Unreadable { .. } | LoadError::ModuleUnreadable { .. } => {
                ErrorKind::InvalidArtifact
            }
        }
    }

    /// The test this error belongs to, if it is scoped to one
    pub fn test_id(&self) -> Option<&TestId> {
        match self {
            LoadError::MissingArtifact { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Registry rooted at a test directory
#[derive(Debug, Clone)]
pub struct TestRegistry {
    root: PathBuf,
}

impl TestRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Plan a scan of the tree. Only directory listings happen here; file
    /// contents are read as the returned sequence is iterated. Calling this
    /// again restarts the scan from the current state of the filesystem.
    pub fn discover(&self, module_filter: Option<&[String]>) -> Result<Discovery, LoadError> {
        if !self.root.is_dir() {
            return Err(LoadError::RootMissing(self.root.clone()));
        }

        let filter: Option<BTreeSet<String>> =
            module_filter.map(|mods| mods.iter().map(|m| m.trim().to_lowercase()).collect());

        let mut modules: Vec<(String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if let Some(filter) = &filter {
                if !filter.contains(&name.to_lowercase()) {
                    continue;
                }
            }
            modules.push((name, path));
        }
        modules.sort();

        let mut pending: Vec<Result<PendingCase, LoadError>> = Vec::new();
        for (module, module_dir) in modules {
            match plan_module(&module, &module_dir) {
                Ok(cases) => pending.extend(cases.into_iter().map(Ok)),
                Err(e) => {
                    tracing::warn!("{}", e);
                    pending.push(Err(e));
                }
            }
        }

        tracing::debug!(
            "Planned {} test case(s) under {}",
            pending.len(),
            self.root.display()
        );

        Ok(Discovery {
            pending: pending.into_iter(),
        })
    }
}

/// Scan `root_dir`, optionally restricted to the named modules
pub fn discover(root_dir: impl Into<PathBuf>, module_filter: Option<&[String]>) -> Result<Discovery, LoadError> {
    TestRegistry::new(root_dir).discover(module_filter)
}

/// Lazily loaded sequence of test cases.
///
/// Yields `Err` for individual cases that cannot be assembled; the
/// remaining cases are unaffected.
#[derive(Debug)]
pub struct Discovery {
    pending: std::vec::IntoIter<Result<PendingCase, LoadError>>,
}

impl Discovery {
    /// Drain the sequence, logging and collecting per-case failures
    pub fn collect_logged(self) -> (Vec<TestCase>, Vec<LoadError>) {
        let mut cases = Vec::new();
        let mut skipped = Vec::new();
        for item in self {
            match item {
                Ok(case) => cases.push(case),
                Err(e) => {
                    // module failures were logged when the scan was planned
                    if !matches!(e, LoadError::ModuleUnreadable { .. }) {
                        tracing::warn!("Skipping test case: {}", e);
                    }
                    skipped.push(e);
                }
            }
        }
        (cases, skipped)
    }
}

impl Iterator for Discovery {
    type Item = Result<TestCase, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pending.next().map(|item| item.and_then(PendingCase::load))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pending.size_hint()
    }
}

#[derive(Debug)]
struct PendingCase {
    id: TestId,
    source: Option<PathBuf>,
    prompt: Option<PathBuf>,
    expected: Option<PathBuf>,
    files_dir: PathBuf,
    schema: Option<Arc<SchemaDescriptor>>,
}

impl PendingCase {
    fn load(self) -> Result<TestCase, LoadError> {
        let missing = |artifact| LoadError::MissingArtifact {
            id: self.id.clone(),
            artifact,
        };
        let source_path = self.source.as_ref().ok_or_else(|| missing("source"))?;
        let prompt_path = self.prompt.as_ref().ok_or_else(|| missing("prompt"))?;
        let expected_path = self.expected.as_ref().ok_or_else(|| missing("expected"))?;

        let source_text = read_text(source_path)?;
        let prompt_text = read_text(prompt_path)?;
        let expected_raw = read_text(expected_path)?;
        let expected: serde_json::Value =
            serde_json::from_str(&expected_raw).map_err(|e| LoadError::Unreadable {
                path: expected_path.clone(),
                reason: format!("invalid JSON: {}", e),
            })?;

        let files = list_files(&self.files_dir)?;

        let mut case = TestCase::new(self.id, source_text, prompt_text, expected).with_files(files);
        if let Some(schema) = self.schema {
            case.schema = schema;
        }
        Ok(case)
    }
}

/// Pair the artifact files of one module by base name
fn plan_module(module: &str, module_dir: &Path) -> Result<Vec<PendingCase>, LoadError> {
    let listing = |sub: &str| {
        let dir = module_dir.join(sub);
        stems_in(&dir).map_err(|e| LoadError::ModuleUnreadable {
            module: module.to_string(),
            path: dir,
            reason: e.to_string(),
        })
    };
    let sources = listing(SOURCES_DIR)?;
    let prompts = listing(PROMPTS_DIR)?;
    let expected = listing(EXPECTED_DIR)?;
    let schema = load_module_schema(module_dir).map(Arc::new);

    let names: BTreeSet<&String> = sources
        .keys()
        .chain(prompts.keys())
        .chain(expected.keys())
        .collect();

    Ok(names
        .into_iter()
        .map(|name| PendingCase {
            id: TestId::new(module, name),
            source: sources.get(name).cloned(),
            prompt: prompts.get(name).cloned(),
            expected: expected.get(name).cloned(),
            files_dir: module_dir.join(FILES_DIR).join(name),
            schema: schema.clone(),
        })
        .collect())
}

fn read_text(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|e| LoadError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Map of file stem to path for the regular files in `dir`.
/// A missing directory yields an empty map.
fn stems_in(dir: &Path) -> std::io::Result<BTreeMap<String, PathBuf>> {
    let mut stems = BTreeMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stems),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.is_empty() || stem.starts_with('.') {
            continue;
        }
        if let Some(previous) = stems.insert(stem.to_string(), path.clone()) {
            tracing::warn!(
                "Two files share the base name '{}' in {}: using {}, ignoring {}",
                stem,
                dir.display(),
                path.display(),
                previous.display()
            );
        }
    }

    Ok(stems)
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load_module_schema(module_dir: &Path) -> Option<SchemaDescriptor> {
    let path = module_dir.join(SCHEMA_FILE);
    if !path.is_file() {
        return None;
    }
    let parsed = std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|content| SchemaDescriptor::from_json_str(&content).map_err(|e| e.to_string()));
    match parsed {
        Ok(schema) => Some(schema),
        Err(e) => {
            tracing::warn!(
                "Ignoring {}: {} (schemas will be inferred from expected values)",
                path.display(),
                e
            );
            None
        }
    }
}
