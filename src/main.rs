use flowbatch::{BatchEngine, config::Config, executor::CommandExecutor};
use tracing::{info, warn};

/// Default configuration file, overridable with `FLOWBATCH_CONFIG`
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// The main entry point for the batch runner.
///
/// Initializes logging, loads the run configuration, builds the command
/// executor for the configured flow and performs one batch run.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config_path =
        std::env::var("FLOWBATCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;
    info!("Batch runner starting with config: {:?}", config);

    let executor = CommandExecutor::new(config.flow.clone())?;
    let engine = BatchEngine::new(executor);

    let result = engine
        .run(
            &config.run.input_dirs,
            &config.run.inputs_mapping,
            &config.run.output_dir,
            config.run.run_id.clone(),
        )
        .await?;

    info!(
        "Run {} done: {} lines, {} completed, {} failed",
        result.run_id,
        result.metadata.total_lines,
        result.metadata.completed_lines,
        result.metadata.failed_lines
    );
    if result.metadata.failed_lines > 0 {
        warn!(
            "{} lines failed; see error markers in the output file",
            result.metadata.failed_lines
        );
    }

    Ok(())
}
