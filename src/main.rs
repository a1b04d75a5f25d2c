use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use ovpn_deploy::deploy::{self, DeployOutcome, DeployRequest};
use ovpn_deploy::exec::{CommandExecutor, LocalExecutor};
use ovpn_deploy::platform::{self, PlatformKind};
use ovpn_deploy::{DeployConfig, DeployError, backup};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

#[derive(Parser)]
#[command(name = "ovpn-deploy")]
#[command(about = "Deploy generated OpenVPN server configuration bundles onto this host", long_about = None)]
struct Cli {
    /// Show debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Host platform to drive
    #[arg(long, value_enum, default_value_t = PlatformArg::Auto, global = true)]
    platform: PlatformArg,
    /// Config file (default: /etc/ovpn-deploy/config.toml or %ProgramData%\ovpn-deploy\config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print the outcome as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    Auto,
    Linux,
    Windows,
}

impl PlatformArg {
    fn resolve(self) -> PlatformKind {
        match self {
            PlatformArg::Auto => PlatformKind::detect(),
            PlatformArg::Linux => PlatformKind::Linux,
            PlatformArg::Windows => PlatformKind::Windows,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a bundle if it is newer than the installed configuration
    Deploy {
        /// Bundle directory, its parent (holding server/), or a .zip archive
        #[arg(default_value = ".")]
        bundle: PathBuf,
        /// Report what would happen without changing the host
        #[arg(long)]
        dry_run: bool,
    },
    /// Check that this host can run a deployment
    Check,
    /// Inspect and restore configuration backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// List available backups, newest first
    List,
    /// Restore a backup and restart the service on it
    Restore {
        /// Backup name (timestamp), as shown by `backup list`
        name: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let kind = cli.platform.resolve();
    let config = DeployConfig::load(kind, cli.config.as_deref())?;
    let exec: Rc<dyn CommandExecutor> = Rc::new(LocalExecutor);

    match cli.command {
        Commands::Deploy { bundle, dry_run } => {
            let host = platform::build(kind, exec, &config, dry_run);
            let request = DeployRequest {
                bundle,
                dry_run,
                quiet: cli.json,
            };
            match deploy::run(host.as_ref(), &config, &request) {
                Ok(outcome) => {
                    print_outcome(&outcome, cli.json)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => report_failure(&e, cli.json),
            }
        }
        Commands::Check => {
            let host = platform::build(kind, exec, &config, true);
            match host.probe() {
                Ok(profile) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&profile)?);
                    } else {
                        println!("✓ Host can run deployments ({})", host.kind());
                        if let Some(pm) = profile.package_manager {
                            println!("  Package manager: {}", pm.display_name());
                        }
                        for advisory in &profile.advisories {
                            println!("⚠ {}", advisory);
                        }
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => report_failure(&DeployError::from(e), cli.json),
            }
        }
        Commands::Backup { command } => match command {
            BackupCommands::List => {
                let entries = backup::list(&config.backup_dir)?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else if entries.is_empty() {
                    println!("No backups found in {}", config.backup_dir.display());
                } else {
                    println!("Available backups in {}:", config.backup_dir.display());
                    println!();
                    for entry in &entries {
                        println!("  {}  {}", entry.name, entry.artifacts.join(", "));
                    }
                }
                Ok(ExitCode::SUCCESS)
            }
            BackupCommands::Restore { name } => {
                let host = platform::build(kind, exec, &config, false);
                match deploy::restore(host.as_ref(), &config, &name, cli.json) {
                    Ok(outcome) => {
                        if cli.json {
                            println!("{}", serde_json::to_string_pretty(&outcome)?);
                        } else {
                            println!();
                            println!("✓ Restore complete");
                        }
                        Ok(ExitCode::SUCCESS)
                    }
                    Err(e) => report_failure(&e, cli.json),
                }
            }
        },
    }
}

fn print_outcome(outcome: &DeployOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    println!();
    match outcome {
        DeployOutcome::NoUpdateNeeded { .. } => println!("✓ No update needed"),
        DeployOutcome::WouldDeploy { candidate, .. } => {
            println!("✓ Dry run complete: {} would be deployed", candidate)
        }
        DeployOutcome::DeployedSuccessfully(report) => {
            println!("✓ Deployed configuration {}", report.timestamp);
            println!("  Backup: {}", report.backup.path.display());
        }
    }
    Ok(())
}

fn report_failure(error: &DeployError, json: bool) -> Result<ExitCode> {
    tracing::debug!(stage = %error.stage(), reason = error.reason_code(), "run failed");
    if json {
        let body = serde_json::json!({
            "outcome": "failed",
            "stage": error.stage(),
            "reason": error.reason_code(),
            "message": error.to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        eprintln!();
        eprintln!("✗ Failed at {} step: {}", error.stage(), error);
    }
    Ok(ExitCode::from(error.exit_code()))
}
