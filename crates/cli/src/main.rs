//! gitfile command-line driver.
//!
//! Reads a TOML file declaring managed files, then inspects, plans, or
//! converges them against their remote repositories. Also generates and
//! validates configuration files.

mod signals;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use gitfile_core::config::AppConfig;
use gitfile_core::provider;
use gitfile_core::resource::{self, GitFileSpec, PlanAction};
use gitfile_core::RepoClient;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// gitfile command-line driver.
#[derive(Parser, Debug)]
#[command(
    name = "gitfile",
    version,
    about = "Declaratively manage single files in remote Git repositories"
)]
struct Cli {
    /// Path to the TOML configuration file
    /// (default: <config dir>/gitfile/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./gitfile.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Show the observed state of one managed file.
    Read {
        /// Managed file id (`folder/file_name`) or its index in the config.
        target: String,

        /// Print the state as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show what `apply` would change, without writing.
    Plan,

    /// Converge every managed file to its declared content.
    Apply,

    /// Stop managing a file. The file stays in the repository.
    Delete {
        /// Managed file id (`folder/file_name`) or its index in the config.
        target: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    match cli.command {
        Commands::Init { output } => {
            init_tracing(cli.log_level.as_deref(), "warn");
            cmd_init(&output)
        }
        Commands::Validate => {
            init_tracing(cli.log_level.as_deref(), "warn");
            cmd_validate(&config_path)
        }
        command => {
            let config = AppConfig::load_and_resolve(&config_path)
                .with_context(|| format!("failed to load {}", config_path.display()))?;
            init_tracing(cli.log_level.as_deref(), &config.logging.level);

            let client = provider::configure(&config.provider, &config.client)
                .context("failed to configure repository client")?;

            let cancel = CancellationToken::new();
            let watcher = tokio::spawn(signals::cancel_on_shutdown(cancel.clone()));

            let result = match command {
                Commands::Read { target, json } => {
                    cmd_read(&client, &config, &target, json, &cancel).await
                }
                Commands::Plan => cmd_plan(&client, &config, &cancel).await,
                Commands::Apply => cmd_apply(&client, &config, &cancel).await,
                Commands::Delete { target } => cmd_delete(&config, &target),
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            };

            watcher.abort();
            result
        }
    }
}

/// Explicit flag, then `RUST_LOG`, then the configured level.
fn init_tracing(flag: Option<&str>, configured: &str) {
    let filter = match flag {
        Some(level) => EnvFilter::try_new(level),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(configured)),
    }
    .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("could not determine the user config directory")?;
    Ok(dir.join("gitfile").join("config.toml"))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Find a managed file by id or by position in the config.
fn select<'a>(config: &'a AppConfig, target: &str) -> Result<&'a GitFileSpec> {
    if let Some(spec) = config.files.iter().find(|spec| spec.id() == target) {
        return Ok(spec);
    }
    if let Ok(idx) = target.parse::<usize>() {
        if let Some(spec) = config.files.get(idx) {
            return Ok(spec);
        }
    }
    anyhow::bail!("no managed file matches '{}'", target)
}

fn truncate(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    if first_line.chars().count() <= max_len && !s.contains('\n') {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# gitfile configuration

[provider]
username = "deploy-bot"
# Name of the environment variable holding the password or access token.
password_env = "GITFILE_PASSWORD"

[client]
# Shallow clone depth; 0 fetches full history.
clone_depth = 1
# Retries after a push is rejected because the branch moved.
max_push_retries = 3
commit_tool = "terraform"

[logging]
level = "info"

[[files]]
repository = "https://git.example.com/org/repo.git"
branch = "main"
# Either `path`, or `folder` + `file_name`.
path = "docs/readme.md"
content = "hello"
author = "Deploy Bot"
email = "bot@example.com"
postfix = "init"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Declare the files to manage under [[files]]");
    println!("  2. Export the password variable (GITFILE_PASSWORD)");
    println!(
        "  3. Validate with: gitfile validate --config {}",
        output.display()
    );
    println!("  4. Preview with: gitfile plan --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Username      : {}", config.provider.username);
    println!(
        "  Password      : {}",
        if config.provider.password.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!("  Clone depth   : {}", config.client.clone_depth);
    println!("  Push retries  : {}", config.client.max_push_retries);
    println!("  Managed files : {}", config.files.len());
    for (idx, spec) in config.files.iter().enumerate() {
        println!("    [{}] {} ({} @ {})", idx, spec.id(), spec.repository, spec.branch);
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}

async fn cmd_read(
    client: &RepoClient,
    config: &AppConfig,
    target: &str,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let spec = select(config, target)?;
    let state = resource::read(client, spec, cancel)
        .await
        .with_context(|| format!("failed to read {}", spec.id()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("id     : {}", state.id);
    println!("exists : {}", state.exists);
    if state.exists {
        println!("content:");
        print!("{}", state.content);
        if !state.content.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

async fn cmd_plan(client: &RepoClient, config: &AppConfig, cancel: &CancellationToken) -> Result<()> {
    if config.files.is_empty() {
        println!("No managed files declared.");
        return Ok(());
    }

    let mut pending = 0;
    println!("{:<10} {:<40} {}", "ACTION", "ID", "OBSERVED");
    println!("{}", "-".repeat(80));
    for spec in &config.files {
        let plan = resource::plan(client, spec, cancel)
            .await
            .with_context(|| format!("failed to plan {}", spec.id()))?;
        if plan.action != PlanAction::NoChange {
            pending += 1;
        }
        let observed = if plan.observed.exists {
            truncate(&plan.observed.content, 30)
        } else {
            "(absent)".to_string()
        };
        println!(
            "{:<10} {:<40} {}",
            plan.action.to_string(),
            truncate(&spec.id(), 40),
            observed
        );
    }
    println!();
    println!("{} of {} file(s) would change.", pending, config.files.len());
    Ok(())
}

async fn cmd_apply(client: &RepoClient, config: &AppConfig, cancel: &CancellationToken) -> Result<()> {
    let mut processed = 0;
    let mut failures = 0;
    for spec in &config.files {
        if cancel.is_cancelled() {
            debug!("cancelled, skipping remaining files");
            break;
        }
        match resource::apply(client, spec, cancel).await {
            Ok(outcome) => println!("  [{}] {}", outcome.action, outcome.state.id),
            Err(e) => {
                failures += 1;
                println!("  [FAIL] {}: {}", spec.id(), e);
            }
        }
        processed += 1;
    }

    apply_summary(config.files.len(), processed, failures)?;
    println!();
    println!("Apply complete: {} file(s) converged.", config.files.len());
    Ok(())
}

/// Fail unless every declared file was processed without error.
fn apply_summary(total: usize, processed: usize, failures: usize) -> Result<()> {
    if processed < total {
        anyhow::bail!(
            "cancelled after {} of {} file(s) ({} failed)",
            processed,
            total,
            failures
        );
    }
    if failures > 0 {
        anyhow::bail!("{} file(s) failed to apply", failures);
    }
    Ok(())
}

fn cmd_delete(config: &AppConfig, target: &str) -> Result<()> {
    let spec = select(config, target)?;
    resource::delete(spec).with_context(|| format!("failed to delete {}", spec.id()))?;
    println!(
        "Stopped managing {}. The file was left in {} ({}).",
        spec.id(),
        spec.repository,
        spec.branch
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitfile_core::config::ClientConfig;
    use gitfile_core::git::Credentials;

    fn config() -> AppConfig {
        toml::from_str(
            r#"
[provider]
username = "bot"
password_env = "PW"

[[files]]
repository = "https://git.example.com/r.git"
branch = "main"
path = "docs/readme.md"
content = "x"
author = "A"
email = "a@example.com"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_select_by_id_and_index() {
        let config = config();
        assert_eq!(select(&config, "docs/readme.md").unwrap().path, "docs/readme.md");
        assert_eq!(select(&config, "0").unwrap().path, "docs/readme.md");
        assert!(select(&config, "1").is_err());
        assert!(select(&config, "nope").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long line of text", 10), "a long ...");
        assert_eq!(truncate("two\nlines", 10), "two...");
    }

    #[test]
    fn test_apply_summary_reports_partial_run() {
        assert!(apply_summary(3, 3, 0).is_ok());

        let err = apply_summary(3, 1, 0).unwrap_err();
        assert_eq!(err.to_string(), "cancelled after 1 of 3 file(s) (0 failed)");

        let err = apply_summary(3, 3, 2).unwrap_err();
        assert_eq!(err.to_string(), "2 file(s) failed to apply");
    }

    #[tokio::test]
    async fn test_apply_after_cancellation_is_not_reported_as_complete() {
        let config = config();
        let client = RepoClient::new(
            Credentials::new("bot", "secret"),
            ClientConfig::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = cmd_apply(&client, &config, &cancel).await.unwrap_err();
        assert!(err.to_string().starts_with("cancelled after 0 of 1"));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["gitfile", "-c", "x.toml", "read", "0", "--json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Commands::Read { json: true, .. }));
    }
}
