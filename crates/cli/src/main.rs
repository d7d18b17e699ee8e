//! synconflict command-line tool.
//!
//! Provides subcommands for listing conflict groups, inspecting and diffing
//! individual conflicts, merging them with the configured tool, and
//! generating / validating configuration files.

mod commands;
mod style;
mod surface;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use synconflict_core::config::{AppConfig, MergeToolKind};
use synconflict_core::tree::{FsTree, TreeFile};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Find, group and merge Syncthing conflict copies.
#[derive(Parser, Debug)]
#[command(
    name = "synconflict",
    version,
    about = "Find, group and merge Syncthing conflict copies in a synced folder"
)]
struct Cli {
    /// Path to the TOML configuration file
    /// [default: <config dir>/synconflict/config.toml].
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Vault root, overriding `vault.root` from the configuration.
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every conflict group in the vault.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show the conflicts belonging to one file.
    Show {
        /// The original or any of its conflict copies.
        file: String,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show a unified diff between a conflict copy and its original.
    Diff {
        /// Path of the conflict copy.
        conflict: String,
    },

    /// Merge a conflict copy into its original.
    Merge {
        /// The original or any of its conflict copies.
        file: String,

        /// Which conflict to merge (1-based, as listed by `show`).
        #[arg(short, long)]
        index: Option<usize>,

        /// Merge tool to use instead of the configured one
        /// (meld, smerge, goland, custom, embedded).
        #[arg(short, long)]
        tool: Option<String>,

        /// Delete the conflict after a successful merge without asking.
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete a conflict copy without merging it.
    Delete {
        /// Path of the conflict copy.
        conflict: String,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./synconflict.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Minimal logging for CLI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(cli.config.as_deref()),
        command => {
            let config = load_config(cli.config.as_deref(), cli.vault)?;
            let tree = Arc::new(open_vault(&config)?);

            match command {
                Commands::List { json } => commands::report::run_list(tree.as_ref(), json),
                Commands::Show { file, json } => {
                    let file = resolve_file(&tree, &file);
                    commands::report::run_show(tree.as_ref(), &file, json)
                }
                Commands::Diff { conflict } => {
                    let conflict = resolve_file(&tree, &conflict);
                    commands::report::run_diff(tree.as_ref(), &conflict).await
                }
                Commands::Merge {
                    file,
                    index,
                    tool,
                    yes,
                } => {
                    let file = resolve_file(&tree, &file);
                    let tool = tool
                        .as_deref()
                        .map(str::parse::<MergeToolKind>)
                        .transpose()
                        .context("invalid --tool")?;
                    commands::merge::run_merge(tree, &config, &file, index, tool, yes).await
                }
                Commands::Delete { conflict, yes } => {
                    let conflict = resolve_file(&tree, &conflict);
                    commands::merge::run_delete(tree, &conflict, yes).await
                }
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// `<config dir>/synconflict/config.toml`, falling back to the working
/// directory on platforms without a config dir.
fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("synconflict").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("synconflict.toml"))
}

/// An explicit `--config` must exist; the default location is optional.
fn load_config(path: Option<&Path>, vault: Option<PathBuf>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::load_from_file(path).context("failed to load configuration file")?,
        None => AppConfig::load_or_default(default_config_path())
            .context("failed to load configuration file")?,
    };
    if let Some(root) = vault {
        config.vault.root = root;
    }
    config.validate().context("configuration validation failed")?;
    Ok(config)
}

fn open_vault(config: &AppConfig) -> Result<FsTree> {
    let root = &config.vault.root;
    let root = root
        .canonicalize()
        .with_context(|| format!("vault root {} is not accessible", root.display()))?;
    if !root.is_dir() {
        anyhow::bail!("vault root {} is not a directory", root.display());
    }
    Ok(FsTree::new(root))
}

/// Accept vault-relative paths as well as absolute or cwd-relative paths
/// that point inside the vault.
fn resolve_file(tree: &FsTree, arg: &str) -> TreeFile {
    let candidate = Path::new(arg);
    if let Ok(absolute) = candidate.canonicalize() {
        if let Some(relative) = tree.relative(&absolute) {
            return TreeFile::new(relative);
        }
    }
    TreeFile::new(arg)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# synconflict configuration
# See documentation for all available options.

[vault]
# Folder synced by Syncthing.
root = "."

[merge]
# meld | smerge | goland | custom | embedded
tool = "meld"
# Used when tool = "custom". $BASE is the original, $CONFLICT the conflict copy.
# custom_command = "kdiff3 $BASE $CONFLICT -o $BASE"
# Set when the custom command blocks until you finish merging.
custom_waits = false

[daemon]
log_level = "info"
# status_file = "/tmp/synconflict-status.json"
# track = ["notes.md"]
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Set vault.root to your synced folder");
    println!("  2. Pick a merge tool");
    println!(
        "  3. Validate with: synconflict validate --config {}",
        output.display()
    );
    println!(
        "  4. Start the watcher: synconflict-daemon --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: Option<&Path>) -> Result<()> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config =
        AppConfig::load_from_file(&config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    if config.vault.root.is_dir() {
        println!("  [OK] Vault root exists");
    } else {
        println!("  [WARN] Vault root {} does not exist", config.vault.root.display());
    }

    // Summary
    println!();
    println!("Configuration summary:");
    println!("  Vault root    : {}", config.vault.root.display());
    println!("  Merge tool    : {}", config.merge.tool);
    if config.merge.tool == MergeToolKind::Custom {
        println!(
            "  Custom command: {}",
            config.merge.custom_command.as_deref().unwrap_or("-")
        );
        println!(
            "  Command waits : {}",
            if config.merge.custom_waits { "yes" } else { "no" }
        );
    }
    println!("  Log level     : {}", config.daemon.log_level);
    println!(
        "  Status file   : {}",
        config
            .daemon
            .status_file
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not set".to_string())
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_merge() {
        let cli = Cli::try_parse_from([
            "synconflict",
            "--vault",
            "/notes",
            "merge",
            "notes.md",
            "--index",
            "2",
            "--tool",
            "smerge",
            "--yes",
        ])
        .unwrap();
        assert_eq!(cli.vault, Some(PathBuf::from("/notes")));
        match cli.command {
            Commands::Merge {
                file,
                index,
                tool,
                yes,
            } => {
                assert_eq!(file, "notes.md");
                assert_eq!(index, Some(2));
                assert_eq!(tool.as_deref(), Some("smerge"));
                assert!(yes);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_init_writes_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested/synconflict.toml");
        cmd_init(&output).unwrap();

        let config = AppConfig::load_and_validate(&output).unwrap();
        assert_eq!(config.merge.tool, MergeToolKind::Meld);
        assert!(cmd_init(&output).is_err(), "refuses to overwrite");
    }

    #[test]
    fn test_explicit_config_must_exist() {
        assert!(load_config(Some(Path::new("/nonexistent/synconflict.toml")), None).is_err());
    }

    #[test]
    fn test_resolve_file_accepts_paths_inside_vault() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("daily")).unwrap();
        std::fs::write(root.join("daily/today.md"), "").unwrap();
        let tree = FsTree::new(&root);

        let absolute = root.join("daily/today.md");
        assert_eq!(
            resolve_file(&tree, absolute.to_str().unwrap()).path(),
            "daily/today.md"
        );
        assert_eq!(resolve_file(&tree, "daily/missing.md").path(), "daily/missing.md");
    }
}
