//! Plugin developer tool for Fleet Chat.
//!
//! This binary provides the `fleetchat-plugin` command with subcommands for
//! validating a plugin before it ships, running the static security scan on
//! its own, previewing the capability grant a plugin would receive under a
//! given policy, and listing plugin candidates in an extensions directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fleetchat_manifest::{
    Capability, CommandMode, PluginManifest, extract_manifest_from_code, load_manifest,
};
use fleetchat_runtime::loader::{self, MANIFEST_FILE, PluginSource, SOURCE_FILE};
use fleetchat_sandbox::{SandboxPolicy, create_sandbox, validate_code};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Fleet Chat plugin developer tool.
#[derive(Parser)]
#[command(
    name = "fleetchat-plugin",
    version,
    about = "Validate, scan, and inspect Fleet Chat plugins"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a plugin: manifest rules plus the static security scan.
    Validate {
        /// Plugin directory, or a single source file with an embedded
        /// manifest.
        path: PathBuf,
    },

    /// Run only the static security scan over a source file.
    Scan {
        file: PathBuf,
    },

    /// Show the capability grant a plugin would receive under a policy.
    Grant {
        /// Plugin directory or source file.
        path: PathBuf,

        /// Capability token to allow; repeatable.
        #[arg(long = "allow", value_name = "CAPABILITY")]
        allow: Vec<String>,

        /// Network domain to allow; repeatable.
        #[arg(long = "allow-domain", value_name = "DOMAIN")]
        allow_domain: Vec<String>,

        /// Allow every capability.
        #[arg(long)]
        allow_all: bool,
    },

    /// List plugin candidates under an extensions directory.
    Discover {
        dir: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("warn");
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => cmd_validate(&path),
        Commands::Scan { file } => cmd_scan(&file),
        Commands::Grant {
            path,
            allow,
            allow_domain,
            allow_all,
        } => cmd_grant(&path, &allow, &allow_domain, allow_all),
        Commands::Discover { dir } => cmd_discover(&dir).await,
    }
}

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn cmd_validate(path: &Path) -> Result<()> {
    let (manifest, code) = read_plugin(path)?;
    validate_code(&code).context("static security scan failed")?;

    println!("ok: {} v{}", manifest.name, manifest.version);
    for command in &manifest.commands {
        let mode = match command.mode {
            CommandMode::View => "view",
            CommandMode::NoView => "no-view",
        };
        println!("  command    {} [{mode}]  {}", command.name, command.title);
    }
    for permission in &manifest.permissions {
        println!("  permission {permission}");
    }
    Ok(())
}

fn cmd_scan(file: &Path) -> Result<()> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    validate_code(&code)?;
    println!("ok: no forbidden patterns in {}", file.display());
    Ok(())
}

fn cmd_grant(path: &Path, allow: &[String], allow_domain: &[String], allow_all: bool) -> Result<()> {
    let (manifest, _) = read_plugin(path)?;

    let mut policy = if allow_all {
        SandboxPolicy::new().allow_all()
    } else {
        SandboxPolicy::new()
    };
    for token in allow {
        let capability = Capability::from_token(token)
            .with_context(|| format!("unknown capability token `{token}`"))?;
        policy = policy.allow(capability);
    }
    for domain in allow_domain {
        policy = policy.allow_domain(domain);
    }

    let config = create_sandbox(&manifest, &policy);
    println!("plugin {} v{}", manifest.name, manifest.version);
    for capability in &manifest.permissions {
        let verdict = if config.is_granted(*capability) {
            "granted"
        } else {
            "denied"
        };
        println!("  {:<14} {verdict}", capability.token());
    }
    if config.is_granted(Capability::Network) {
        if config.allowed_domains.is_empty() {
            println!("  network allow-list is empty: every fetch will be refused");
        }
        for domain in &config.allowed_domains {
            println!("  domain         {domain}");
        }
    }
    Ok(())
}

async fn cmd_discover(dir: &Path) -> Result<()> {
    let sources = loader::discover(dir)
        .await
        .with_context(|| format!("scanning {}", dir.display()))?;
    if sources.is_empty() {
        println!("no plugin candidates under {}", dir.display());
        return Ok(());
    }
    for source in sources {
        let PluginSource::Directory(path) = source else {
            continue;
        };
        match read_plugin(&path) {
            Ok((manifest, _)) => println!(
                "{}  {} v{} ({} commands)",
                path.display(),
                manifest.name,
                manifest.version,
                manifest.commands.len()
            ),
            Err(error) => println!("{}  unreadable: {error:#}", path.display()),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read a plugin's manifest and source from a directory or a bare source
/// file, preferring the side-car manifest over an embedded block.
fn read_plugin(path: &Path) -> Result<(PluginManifest, String)> {
    let source_path = if path.is_dir() {
        path.join(SOURCE_FILE)
    } else {
        path.to_path_buf()
    };
    let code = std::fs::read_to_string(&source_path)
        .with_context(|| format!("reading {}", source_path.display()))?;

    let sidecar = source_path
        .parent()
        .map(|dir| dir.join(MANIFEST_FILE))
        .filter(|p| p.is_file());
    let manifest = match sidecar {
        Some(sidecar) => load_manifest(&sidecar)?,
        None => match extract_manifest_from_code(&code)? {
            Some(manifest) => manifest,
            None => bail!(
                "{} has no {MANIFEST_FILE} and no embedded @fleet-manifest block",
                path.display()
            ),
        },
    };
    Ok((manifest, code))
}
