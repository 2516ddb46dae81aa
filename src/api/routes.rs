use std::collections::BTreeSet;

use crate::contract::{HttpMethod, RouteSpec};

pub const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteDomain {
    System,
    Workspace,
    Analysis,
    Testing,
    Finetune,
    ModelRuntime,
}

impl RouteDomain {
    pub fn from_path(path: &str) -> Self {
        if path == "/health" {
            return Self::System;
        }
        if path.contains("/ollama/") {
            return Self::ModelRuntime;
        }
        if path.contains("/finetune") {
            return Self::Finetune;
        }
        if path.contains("/run-testing-pipeline") {
            return Self::Testing;
        }
        if path.contains("/code-analysis-report") {
            return Self::Analysis;
        }
        Self::Workspace
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Workspace => "workspace",
            Self::Analysis => "analysis",
            Self::Testing => "testing",
            Self::Finetune => "finetune",
            Self::ModelRuntime => "model_runtime",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDefinition {
    pub spec: RouteSpec,
    pub domain: RouteDomain,
    pub handler_id: String,
}

pub fn route_catalog() -> Vec<RouteDefinition> {
    let mut out = Vec::with_capacity(CONTRACT_ROUTES.len());
    let mut seen = BTreeSet::new();

    for (method, path) in CONTRACT_ROUTES {
        let spec = RouteSpec::new(*method, *path).expect("contract routes must be valid");
        assert!(
            seen.insert(spec.clone()),
            "duplicate route in contract list: {spec}"
        );

        out.push(RouteDefinition {
            domain: RouteDomain::from_path(spec.path.as_str()),
            handler_id: handler_id_for(spec.method, spec.path.as_str()),
            spec,
        });
    }

    out
}

fn handler_id_for(method: HttpMethod, path: &str) -> String {
    let mut tokens = vec![method.as_str().to_ascii_lowercase()];

    for part in path
        .strip_prefix(API_PREFIX)
        .unwrap_or(path)
        .trim_matches('/')
        .split('/')
    {
        let normalized = if part.starts_with('{') && part.ends_with('}') {
            part.trim_matches(|c| c == '{' || c == '}').to_ascii_lowercase()
        } else {
            part.chars()
                .map(|ch| {
                    if ch.is_ascii_alphanumeric() {
                        ch.to_ascii_lowercase()
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        };
        tokens.push(normalized);
    }

    tokens.join("_")
}

const CONTRACT_ROUTES: &[(HttpMethod, &str)] = &[
    (HttpMethod::Get, "/health"),
    (HttpMethod::Post, "/api/v1/list-directory"),
    (HttpMethod::Post, "/api/v1/code-analysis-report"),
    (HttpMethod::Post, "/api/v1/run-testing-pipeline"),
    (HttpMethod::Post, "/api/v1/finetune"),
    (HttpMethod::Get, "/api/v1/finetune/jobs/{jobId}"),
    (HttpMethod::Get, "/api/v1/ollama/models"),
    (HttpMethod::Post, "/api/v1/ollama/chat"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_ids_drop_the_version_prefix() {
        let catalog = route_catalog();
        let ids = catalog
            .iter()
            .map(|route| route.handler_id.as_str())
            .collect::<Vec<_>>();
        assert!(ids.contains(&"get_health"));
        assert!(ids.contains(&"post_run_testing_pipeline"));
        assert!(ids.contains(&"get_finetune_jobs_jobid"));
    }

    #[test]
    fn catalog_routes_carry_their_domain() {
        let catalog = route_catalog();
        let jobs = catalog
            .iter()
            .find(|route| route.handler_id == "get_finetune_jobs_jobid")
            .expect("job lookup route");
        assert_eq!(jobs.domain, RouteDomain::Finetune);
        assert_eq!(jobs.domain.as_str(), "finetune");
        let chat = catalog
            .iter()
            .find(|route| route.spec.path == "/api/v1/ollama/chat")
            .expect("chat route");
        assert_eq!(chat.domain.as_str(), "model_runtime");
    }

    #[test]
    fn domains_follow_path_segments() {
        assert_eq!(RouteDomain::from_path("/health"), RouteDomain::System);
        assert_eq!(
            RouteDomain::from_path("/api/v1/ollama/chat"),
            RouteDomain::ModelRuntime
        );
        assert_eq!(
            RouteDomain::from_path("/api/v1/finetune/jobs/{jobId}"),
            RouteDomain::Finetune
        );
        assert_eq!(
            RouteDomain::from_path("/api/v1/list-directory"),
            RouteDomain::Workspace
        );
    }
}
