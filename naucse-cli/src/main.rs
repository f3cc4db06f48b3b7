use anyhow::{Context, Result};
use clap::Parser;
use naucse_core::Config;
use std::path::{Path, PathBuf};

mod commands;

/// Archive course(s) that use naucse_render 0.x.
///
/// Courses can be selected by passing their slugs as positional arguments.
/// Globs are accepted; default is '*' (all found courses).
#[derive(Parser)]
#[command(name = "naucse-archive")]
struct Cli {
    /// Directory with data files (should contain `runs` and/or `courses`
    /// directories). Default: current directory.
    #[arg(long = "data", value_name = "DIR")]
    data: Option<PathBuf>,

    /// Directory to which data will be written. Default: 'archived' in the
    /// current directory.
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Directory for a cache. Default: '.cache/naucse/archive' in the
    /// current directory.
    #[arg(short, long, value_name = "DIR")]
    cache: Option<PathBuf>,

    /// Container tool to use (`podman` or `docker`).
    #[arg(long, value_name = "TOOL")]
    container_tool: Option<String>,

    /// Configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (e.g. "debug", "naucse_core=trace").
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Slugs or globs of the courses to archive.
    #[arg(value_name = "COURSE_SLUGS")]
    course_slugs: Vec<String>,
}

impl Cli {
    /// Load the config file and apply command-line overrides.
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::load().context("Failed to load config")?,
        };
        if let Some(data) = &self.data {
            config.data_dir = data.clone();
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(cache) = &self.cache {
            config.cache_dir = cache.clone();
        }
        if let Some(tool) = &self.container_tool {
            config.container_tool = tool.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        config.data_dir = absolute(&config.data_dir)?;
        config.output_dir = absolute(&config.output_dir)?;
        config.cache_dir = absolute(&config.cache_dir)?;
        config.validate()?;
        Ok(config)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    Ok(cwd.join(path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;

    naucse_core::init_observability(&config.log_level)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    commands::archive(config, cli.course_slugs).await
}
