use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub const SOURCE_SUFFIX: &str = "py";
pub const PACKAGE_MARKER: &str = "__init__.py";
pub const TESTS_DIR: &str = "tests";

/// One selected file, immutable once the pipeline has started.
///
/// `module_name` is only present for files carrying the Python suffix; the
/// dotted name is relative to the common root of the whole selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    original_path: PathBuf,
    relative_path: PathBuf,
    content: String,
    module_name: Option<String>,
}

impl SourceUnit {
    /// Builds the unit set for one invocation from `(path, content)` pairs.
    pub fn from_selection(files: Vec<(PathBuf, String)>) -> Vec<Self> {
        let root = common_root(files.iter().map(|(path, _)| path.as_path()));
        files
            .into_iter()
            .map(|(original_path, content)| {
                let relative_path = original_path
                    .strip_prefix(root.as_path())
                    .map(normal_components)
                    .ok()
                    .filter(|path| !path.as_os_str().is_empty())
                    .unwrap_or_else(|| file_name_only(original_path.as_path()));
                let module_name = has_source_suffix(original_path.as_path())
                    .then(|| module_name_for(relative_path.as_path()));
                Self {
                    original_path,
                    relative_path,
                    content,
                    module_name,
                }
            })
            .collect()
    }

    pub fn original_path(&self) -> &Path {
        self.original_path.as_path()
    }

    pub fn relative_path(&self) -> &Path {
        self.relative_path.as_path()
    }

    pub fn content(&self) -> &str {
        self.content.as_str()
    }

    pub fn module_name(&self) -> Option<&str> {
        self.module_name.as_deref()
    }

    pub fn file_name(&self) -> String {
        self.original_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Scratch directory tree owned by exactly one pipeline invocation.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn acquire(parent: &Path) -> Result<Self, std::io::Error> {
        let root = parent.join(format!("codelab_ws_{}", Uuid::new_v4().simple()));
        fs::create_dir_all(root.as_path())?;
        debug!(root = %root.display(), "workspace acquired");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.root.join(TESTS_DIR)
    }

    pub fn release(self) -> Result<(), std::io::Error> {
        match fs::remove_dir_all(self.root.as_path()) {
            Ok(()) => {
                debug!(root = %self.root.display(), "workspace released");
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error),
        }
    }
}

/// Runs `body` inside a fresh workspace and deletes the tree afterwards,
/// including when `body` panics.
pub fn with_workspace<T>(
    parent: &Path,
    body: impl FnOnce(&Workspace) -> T,
) -> Result<T, std::io::Error> {
    let workspace = Workspace::acquire(parent)?;
    let root_display = workspace.root().display().to_string();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&workspace)));
    if let Err(error) = workspace.release() {
        warn!(root = %root_display, error = %error, "workspace cleanup failed");
    }
    match outcome {
        Ok(value) => Ok(value),
        Err(payload) => panic::resume_unwind(payload),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MaterializedUnits {
    pub source_paths: Vec<PathBuf>,
    pub module_names: Vec<String>,
}

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Setup failed: No valid Python modules found in selection.")]
    NoValidModules,
    #[error("failed to write workspace file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes every Python unit into the workspace at its root-relative path and
/// marks every directory as a package.
pub fn materialize(
    workspace: &Workspace,
    units: &[SourceUnit],
) -> Result<MaterializedUnits, MaterializeError> {
    let mut out = MaterializedUnits::default();
    for unit in units {
        let Some(module_name) = unit.module_name() else {
            continue;
        };
        let target = workspace.root().join(unit.relative_path());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| MaterializeError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(target.as_path(), unit.content()).map_err(|source| MaterializeError::Io {
            path: target.clone(),
            source,
        })?;
        out.source_paths.push(target);
        out.module_names.push(module_name.to_string());
    }

    if out.module_names.is_empty() {
        return Err(MaterializeError::NoValidModules);
    }

    mark_packages(workspace.root())?;
    info!(modules = out.module_names.len(), "recreated python modules");
    Ok(out)
}

fn mark_packages(root: &Path) -> Result<(), MaterializeError> {
    let dirs = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                warn!(
                    root = %root.display(),
                    error = %error,
                    "skipping unreadable workspace entry"
                );
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();
    for dir in dirs {
        let marker = dir.join(PACKAGE_MARKER);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(marker.as_path())
            .map_err(|source| MaterializeError::Io {
                path: marker.clone(),
                source,
            })?;
    }
    Ok(())
}

pub fn has_source_suffix(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(SOURCE_SUFFIX)
}

fn module_name_for(relative_path: &Path) -> String {
    relative_path
        .with_extension("")
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Longest shared directory prefix of the parents of `paths`.
///
/// Parents are used so a single-file selection still resolves to the
/// directory that holds the file.
fn common_root<'a>(paths: impl Iterator<Item = &'a Path>) -> PathBuf {
    let mut shared: Option<Vec<Component<'a>>> = None;
    for path in paths {
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        let components = parent.components().collect::<Vec<_>>();
        shared = Some(match shared {
            None => components,
            Some(previous) => previous
                .into_iter()
                .zip(components)
                .take_while(|(left, right)| left == right)
                .map(|(left, _)| left)
                .collect(),
        });
    }
    shared
        .map(|components| components.into_iter().collect::<PathBuf>())
        .unwrap_or_default()
}

/// Keeps only plain name segments, so the result never carries a root,
/// a drive prefix or a parent hop and always joins beneath the workspace.
fn normal_components(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn file_name_only(path: &Path) -> PathBuf {
    path.file_name().map(PathBuf::from).unwrap_or_default()
}
