//! Main module for the MediRAG CLI application (medirag).
//!
//! Parses the command line, loads the configuration, builds the service and runs the
//! requested subcommand.
//!
//! # Examples
//!
//! ```sh
//! medirag init
//! medirag ask "Quels patients présentent des tremblements ?"
//! medirag field "Résumé clinique de Marie Curie"
//! medirag serve --addr 0.0.0.0:5000
//! ```

use std::error::Error;
use std::fs;
use std::io::{Write, stdout};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::ExecutableCommand;
use crossterm::style::{Attribute, Color, Print, SetAttribute, SetForegroundColor};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::OnceCell;
use tracing::*;
use tracing_subscriber::EnvFilter;

use medirag::commands::{Cli, Commands};
use medirag::config::{self, MediRagConfig};
use medirag::config_dir;
use medirag::interactive::interactive_mode;
use medirag::server;
use medirag::service::{ChatRequest, FieldRequest, MediRag};

static TRACING: OnceCell<()> = OnceCell::new();

fn init_tracing() {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config_dir()?.join("config.yaml"),
    };

    match cli.command {
        Commands::Init => init(&config_path)?,
        Commands::Ask { question, patient } => {
            let (_, app) = open(&config_path)?;
            startup_rebuild(&app).await;
            let response = app
                .answer(ChatRequest {
                    question,
                    patient_id: patient,
                })
                .await?;
            print_answer(&response.response)?;
        }
        Commands::Field { message, case_id } => {
            let (_, app) = open(&config_path)?;
            let response = app.field_query(FieldRequest { case_id, message }).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Rebuild => {
            let (_, app) = open(&config_path)?;
            let report = app.monitor().rebuild_and_resync().await?;
            info!(
                "Index v{} rebuilt: {} patients, {} chunks",
                report.version, report.records, report.chunks
            );
        }
        Commands::Check => {
            let (_, app) = open(&config_path)?;
            startup_rebuild(&app).await;
            let report = app.check().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Stats => {
            let (_, app) = open(&config_path)?;
            println!("{}", serde_json::to_string_pretty(&app.stats().await)?);
        }
        Commands::Interactive => {
            let (_, app) = open(&config_path)?;
            startup_rebuild(&app).await;
            let stdin = std::io::stdin();
            interactive_mode(&app, stdin.lock(), stdout()).await?;
        }
        Commands::Serve { addr } => {
            let (config, app) = open(&config_path)?;
            startup_rebuild(&app).await;
            let polling = config.poll_interval_secs.map(|secs| {
                info!("Checking for new patients every {}s", secs);
                app.monitor().spawn_polling(Duration::from_secs(secs))
            });
            let addr = addr.unwrap_or_else(|| config.listen_addr.clone());
            server::serve(Arc::clone(&app), &addr).await?;
            if let Some(handle) = polling {
                handle.abort();
            }
        }
    }

    Ok(())
}

/// Load and validate the configuration, then wire the service.
fn open(config_path: &Path) -> Result<(MediRagConfig, Arc<MediRag>), Box<dyn Error>> {
    debug!("Loading config from: {}", config_path.display());
    let config = config::load_config(&config_path.to_string_lossy())?;
    config.validate()?;
    let app = MediRag::from_config(&config, Some(progress_bar()?))?;
    Ok((config, Arc::new(app)))
}

/// Build the initial index. A failure leaves the service running on an empty index
/// until a freshness check builds it.
async fn startup_rebuild(app: &MediRag) {
    if let Err(e) = app.monitor().rebuild_and_resync().await {
        error!("Initial index build failed: {}", e);
    }
}

fn progress_bar() -> Result<ProgressBar, Box<dyn Error>> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} Embedding [{bar:40}] {pos}/{len} chunks")?
            .progress_chars("=> "),
    );
    Ok(bar)
}

fn print_answer(text: &str) -> Result<(), Box<dyn Error>> {
    let mut stdout = stdout();
    stdout.execute(SetForegroundColor(Color::Blue))?;
    stdout.execute(SetAttribute(Attribute::Bold))?;
    stdout.execute(Print(text))?;
    stdout.execute(SetAttribute(Attribute::Reset))?;
    stdout.execute(SetForegroundColor(Color::Reset))?;
    writeln!(stdout)?;
    Ok(())
}

/// Writes a configuration template at `config_path`.
///
/// An existing file is left untouched.
///
/// # Errors
///
/// Returns an error if the directory or the file cannot be created.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    if config_path.exists() {
        info!("Config file already exists: {}", config_path.display());
        return Ok(());
    }
    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        info!("Creating config directory: {}", dir.display());
        fs::create_dir_all(dir)?;
    }

    info!("Creating config file: {}", config_path.display());
    let config_yaml = serde_yaml::to_string(&MediRagConfig::default())?;
    fs::write(config_path, config_yaml)?;
    println!(
        "Configuration written to {}. Set api_key (or {}) before running.",
        config_path.display(),
        config::API_KEY_ENV
    );
    Ok(())
}
