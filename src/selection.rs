use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

use crate::pipeline::workspace::has_source_suffix;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Directory not found.")]
    DirectoryNotFound,
    #[error("Base directory not found.")]
    BaseDirectoryNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<DirectoryNode>>,
}

pub fn list_directory(path: &Path) -> Result<DirectoryNode, SelectionError> {
    if !path.is_dir() {
        return Err(SelectionError::DirectoryNotFound);
    }
    Ok(folder_node(path))
}

fn folder_node(path: &Path) -> DirectoryNode {
    let mut entries = match fs::read_dir(path) {
        Ok(entries) => entries.filter_map(Result::ok).collect::<Vec<_>>(),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "failed to read directory");
            Vec::new()
        }
    };
    entries.sort_by_key(|entry| entry.file_name());

    let children = entries
        .into_iter()
        .map(|entry| {
            let child = entry.path();
            if child.is_dir() {
                folder_node(child.as_path())
            } else {
                DirectoryNode {
                    name: entry.file_name().to_string_lossy().to_string(),
                    path: child.display().to_string(),
                    kind: NodeKind::File,
                    children: None,
                }
            }
        })
        .collect();

    DirectoryNode {
        name: path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: path.display().to_string(),
        kind: NodeKind::Folder,
        children: Some(children),
    }
}

/// Expands the selected files and folders into `(path, content)` pairs in
/// selection order. Missing items and unreadable files are skipped.
pub fn read_selection(
    base_path: &Path,
    selected_items: &[String],
) -> Result<Vec<(PathBuf, String)>, SelectionError> {
    if !base_path.is_dir() {
        return Err(SelectionError::BaseDirectoryNotFound);
    }

    let mut out = Vec::new();
    for item in selected_items {
        let item_path = PathBuf::from(item);
        let files = if item_path.is_file() {
            vec![item_path]
        } else if item_path.is_dir() {
            WalkDir::new(item_path.as_path())
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .collect()
        } else {
            continue;
        };

        for file in files {
            match fs::read(file.as_path()) {
                Ok(bytes) => {
                    out.push((file, String::from_utf8_lossy(bytes.as_slice()).to_string()))
                }
                Err(error) => {
                    warn!(path = %file.display(), error = %error, "could not read selected file")
                }
            }
        }
    }
    Ok(out)
}

pub fn contains_python(files: &[(PathBuf, String)]) -> bool {
    files.iter().any(|(path, _)| has_source_suffix(path.as_path()))
}
