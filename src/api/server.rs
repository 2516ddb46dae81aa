use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::analysis::{SharedCodeAnalysis, ToolchainCodeAnalyzer};
use crate::api::routes::{route_catalog, RouteDefinition};
use crate::config::AppConfig;
use crate::contract::HttpMethod;
use crate::finetune::{CommandFinetuneService, SharedFinetune};
use crate::model_runtime::{OllamaClient, SharedModelRuntime};
use crate::pipeline::coordinator::{SharedTestingPipeline, TestingPipeline};
use crate::pipeline::runtime::{SharedCommandRunner, StdPipelineCommandRunner};
use crate::pipeline::tool_adapters::{GeminiClient, SharedTestGenerationModel};

/// Collaborators behind the HTTP surface; tests swap in fakes.
#[derive(Clone)]
pub struct AppServices {
    pub testing_pipeline: SharedTestingPipeline,
    pub code_analysis: SharedCodeAnalysis,
    pub finetune: SharedFinetune,
    pub model_runtime: SharedModelRuntime,
    pub default_model_name: String,
}

impl AppServices {
    pub fn from_config(config: &AppConfig) -> Self {
        let runner: SharedCommandRunner = Arc::new(StdPipelineCommandRunner);
        let model = config.gemini_settings().map(|settings| {
            Arc::new(GeminiClient::new(settings)) as SharedTestGenerationModel
        });
        if model.is_none() {
            warn!("GEMINI_API_KEY not set; AI test generation will be skipped");
        }

        Self {
            testing_pipeline: Arc::new(TestingPipeline::new(
                config.pipeline_config(),
                runner.clone(),
                model,
            )),
            code_analysis: Arc::new(
                ToolchainCodeAnalyzer::new(runner.clone(), config.workspace_parent.clone())
                    .with_programs(config.tools.bandit.as_str(), config.tools.radon.as_str()),
            ),
            finetune: Arc::new(CommandFinetuneService::new(
                runner,
                config.app_root.clone(),
                config.adapter_output_dir(),
                config.finetune.clone(),
                config.tools.ollama.as_str(),
            )),
            model_runtime: Arc::new(OllamaClient::new(config.ollama_base_url.as_str())),
            default_model_name: config.finetune.default_model_name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub route_count: usize,
    pub services: AppServices,
}

impl AppState {
    pub fn new(route_count: usize, services: AppServices) -> Self {
        Self {
            service_name: "codelab-backend",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            route_count,
            services,
        }
    }
}

pub fn build_router(config: &AppConfig) -> Router {
    build_router_with_services(AppServices::from_config(config))
}

pub fn build_router_with_services(services: AppServices) -> Router {
    let catalog = route_catalog();
    let state = AppState::new(catalog.len(), services);
    build_router_with_catalog(catalog, state)
}

fn build_router_with_catalog(catalog: Vec<RouteDefinition>, state: AppState) -> Router {
    let mut router = Router::new().route("/health", get(health_handler));

    for route in catalog {
        if route.spec.method == HttpMethod::Get && route.spec.path == "/health" {
            continue;
        }
        let Some(method_router) = method_router_for(&route) else {
            warn!(
                route = %route.spec,
                handler = route.handler_id.as_str(),
                "route in catalog has no handler"
            );
            continue;
        };
        debug!(
            route = %route.spec,
            domain = route.domain.as_str(),
            handler = route.handler_id.as_str(),
            "mounted route"
        );
        router = router.route(route.spec.path.as_str(), method_router);
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, config: &AppConfig) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(config);
    info!(bind = %addr, "starting codelab-backend HTTP surface");
    axum::serve(listener, app).await
}

fn method_router_for(route: &RouteDefinition) -> Option<MethodRouter<AppState>> {
    let handler = match (route.spec.method, route.spec.path.as_str()) {
        (HttpMethod::Post, "/api/v1/list-directory") => {
            post(crate::api::directory::list_directory_handler)
        }
        (HttpMethod::Post, "/api/v1/code-analysis-report") => {
            post(crate::api::analysis::code_analysis_report_handler)
        }
        (HttpMethod::Post, "/api/v1/run-testing-pipeline") => {
            post(crate::api::testing::run_testing_pipeline_handler)
        }
        (HttpMethod::Post, "/api/v1/finetune") => {
            post(crate::api::finetune::start_finetune_handler)
        }
        (HttpMethod::Get, "/api/v1/finetune/jobs/{jobId}") => {
            get(crate::api::finetune::get_finetune_job_handler)
        }
        (HttpMethod::Get, "/api/v1/ollama/models") => {
            get(crate::api::models::list_models_handler)
        }
        (HttpMethod::Post, "/api/v1/ollama/chat") => post(crate::api::models::chat_handler),
        _ => return None,
    };
    Some(handler)
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "route_count": state.route_count,
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
