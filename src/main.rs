use std::path::PathBuf;
use std::sync::Arc;

use codelab_backend::analysis::{CodeAnalysisOps, ToolchainCodeAnalyzer};
use codelab_backend::api::server::serve;
use codelab_backend::config::{default_app_root, AppConfig};
use codelab_backend::pipeline::coordinator::TestingPipeline;
use codelab_backend::pipeline::runtime::{SharedCommandRunner, StdPipelineCommandRunner};
use codelab_backend::pipeline::tool_adapters::{GeminiClient, SharedTestGenerationModel};
use codelab_backend::selection::{contains_python, read_selection};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let command = cli_args.first().map(String::as_str);
    let rest = cli_args.iter().skip(1).cloned().collect::<Vec<_>>();

    match command {
        Some("-h" | "--help") => {
            print_usage();
            Ok(())
        }
        Some("print-config") => {
            let config = AppConfig::load(default_app_root().as_path())?;
            println!("{}", serde_json::to_string_pretty(&config.redacted_json())?);
            Ok(())
        }
        Some("run-testing-pipeline") => run_testing_pipeline_cli(rest).await,
        Some("analyze") => run_analyze_cli(rest).await,
        Some("serve") | None => {
            let config = AppConfig::load(default_app_root().as_path())?;
            let addr = config.bind_addr()?;
            serve(addr, &config).await?;
            Ok(())
        }
        Some(unknown) => Err(std::io::Error::other(format!(
            "Unknown command: {unknown}\n\nUse --help for usage."
        ))
        .into()),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectionCliArgs {
    base_path: PathBuf,
    items: Vec<String>,
}

fn parse_selection_cli_args(args: &[String]) -> CliResult<SelectionCliArgs> {
    let mut base_path = None::<PathBuf>;
    let mut items = Vec::new();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> CliResult<String> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--base-path" => {
                base_path = Some(PathBuf::from(needs_value(i)?));
                i += 2;
            }
            "--item" => {
                items.push(needs_value(i)?);
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let base_path =
        base_path.ok_or_else(|| std::io::Error::other("Missing required --base-path"))?;
    if items.is_empty() {
        return Err(std::io::Error::other("At least one --item is required").into());
    }
    Ok(SelectionCliArgs { base_path, items })
}

fn wants_help(args: &[String]) -> bool {
    args.iter().any(|arg| matches!(arg.as_str(), "-h" | "--help"))
}

fn read_cli_selection(parsed: &SelectionCliArgs) -> CliResult<Vec<(PathBuf, String)>> {
    let files = read_selection(parsed.base_path.as_path(), parsed.items.as_slice())?;
    if !contains_python(files.as_slice()) {
        return Err(std::io::Error::other("No Python files found.").into());
    }
    Ok(files)
}

async fn run_testing_pipeline_cli(args: Vec<String>) -> CliResult<()> {
    if wants_help(args.as_slice()) {
        print_usage();
        return Ok(());
    }
    let parsed = parse_selection_cli_args(args.as_slice())?;
    let config = AppConfig::load(default_app_root().as_path())?;
    let files = read_cli_selection(&parsed)?;

    let runner: SharedCommandRunner = Arc::new(StdPipelineCommandRunner);
    let model = config
        .gemini_settings()
        .map(|settings| Arc::new(GeminiClient::new(settings)) as SharedTestGenerationModel);
    let pipeline = TestingPipeline::new(config.pipeline_config(), runner, model);
    let report = tokio::task::spawn_blocking(move || pipeline.run(files)).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_analyze_cli(args: Vec<String>) -> CliResult<()> {
    if wants_help(args.as_slice()) {
        print_usage();
        return Ok(());
    }
    let parsed = parse_selection_cli_args(args.as_slice())?;
    let config = AppConfig::load(default_app_root().as_path())?;
    let files = read_cli_selection(&parsed)?;

    let analyzer = ToolchainCodeAnalyzer::new(
        Arc::new(StdPipelineCommandRunner),
        config.workspace_parent.clone(),
    )
    .with_programs(config.tools.bandit.as_str(), config.tools.radon.as_str());
    let report = tokio::task::spawn_blocking(move || analyzer.analyze(files)).await??;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  codelab-backend [serve]\n",
        "  codelab-backend print-config\n",
        "  codelab-backend run-testing-pipeline --base-path PATH --item PATH [--item PATH ...]\n",
        "  codelab-backend analyze --base-path PATH --item PATH [--item PATH ...]\n\n",
        "Configuration:\n",
        "  config/codelab.settings.toml (or CODELAB_SETTINGS), then .env, then the environment.\n",
        "  RUST_LOG controls log verbosity (default: info).\n"
    ));
}
