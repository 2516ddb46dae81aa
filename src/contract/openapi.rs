use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::{ContractError, HttpMethod, RouteSpec};

#[derive(Debug, Error)]
pub enum OpenApiContractError {
    #[error("failed to read OpenAPI file '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse OpenAPI YAML '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid OpenAPI route '{path}': {source}")]
    InvalidRoute { path: String, source: ContractError },
}

#[derive(Debug, Deserialize)]
struct OpenApiDocument {
    #[serde(default)]
    paths: BTreeMap<String, PathItem>,
}

#[derive(Debug, Default, Deserialize)]
struct PathItem {
    #[serde(default)]
    get: Option<Operation>,
    #[serde(default)]
    post: Option<Operation>,
    #[serde(default)]
    put: Option<Operation>,
    #[serde(default)]
    delete: Option<Operation>,
}

impl PathItem {
    fn operation(&self, method: HttpMethod) -> Option<&Operation> {
        match method {
            HttpMethod::Get => self.get.as_ref(),
            HttpMethod::Post => self.post.as_ref(),
            HttpMethod::Put => self.put.as_ref(),
            HttpMethod::Delete => self.delete.as_ref(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    #[serde(default)]
    operation_id: Option<String>,
}

/// A documented operation: its route and declared `operationId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentedOperation {
    pub spec: RouteSpec,
    pub operation_id: Option<String>,
}

pub fn load_operations(path: &Path) -> Result<Vec<DocumentedOperation>, OpenApiContractError> {
    let raw = fs::read_to_string(path).map_err(|source| OpenApiContractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_operations(raw.as_str()).map_err(|error| match error {
        ParseFailure::Yaml(source) => OpenApiContractError::Parse {
            path: path.to_path_buf(),
            source,
        },
        ParseFailure::Route(route_error) => route_error,
    })
}

pub fn load_routes(path: &Path) -> Result<Vec<RouteSpec>, OpenApiContractError> {
    let routes = load_operations(path)?
        .into_iter()
        .map(|operation| operation.spec)
        .collect::<BTreeSet<_>>();
    Ok(routes.into_iter().collect())
}

enum ParseFailure {
    Yaml(serde_yaml::Error),
    Route(OpenApiContractError),
}

fn parse_operations(raw: &str) -> Result<Vec<DocumentedOperation>, ParseFailure> {
    let document: OpenApiDocument = serde_yaml::from_str(raw).map_err(ParseFailure::Yaml)?;
    let mut out = Vec::new();

    for (route_path, item) in &document.paths {
        for method in HttpMethod::ALL {
            let Some(operation) = item.operation(method) else {
                continue;
            };
            let spec = RouteSpec::new(method, route_path.as_str()).map_err(|source| {
                ParseFailure::Route(OpenApiContractError::InvalidRoute {
                    path: route_path.clone(),
                    source,
                })
            })?;
            out.push(DocumentedOperation {
                spec,
                operation_id: operation.operation_id.clone(),
            });
        }
    }

    out.sort_by(|a, b| a.spec.cmp(&b.spec));
    Ok(out)
}
