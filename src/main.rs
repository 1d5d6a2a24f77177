//! Birst administration command-line tool.
//!
//! Run with: `birst-admin --config birst.yaml <command>`

use anyhow::{Context, Result};
use birst_admin::{
    run_extract_cloud_connector_data_job, run_publish_data_job, BirstAdminService, BirstConfig,
    CloudConnection, SharedAdminService,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Administration client for the Birst web service.
///
/// Creates users, changes passwords, runs extraction and publishing jobs
/// and fetches SSO tokens for the configured tenant.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "birst.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user with access to the configured space
    CreateUser { login: String, password: String },

    /// Change a user's password
    SetPassword { login: String, password: String },

    /// Extract cloud connector data and wait for the job
    Extract {
        /// Space to extract into (defaults to the configured space)
        #[arg(long)]
        space_id: Option<String>,

        /// Connection as TYPE:NAME, repeatable
        #[arg(long = "connection", value_parser = parse_connection, required = true)]
        connections: Vec<CloudConnection>,

        /// Seconds between status checks (defaults to the configured interval)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Publish processing groups and wait for the job
    Publish {
        #[arg(long)]
        space_id: Option<String>,

        /// Processing group, repeatable
        #[arg(long = "group", required = true)]
        groups: Vec<String>,

        #[arg(long)]
        interval: Option<u64>,
    },

    /// Show the status of a job
    JobStatus { job_token: String },

    /// List the groups of a space
    ListGroups {
        #[arg(long)]
        space_id: Option<String>,
    },

    /// Show the catalog directory tree of a space
    Directory {
        #[arg(long)]
        space_id: Option<String>,

        #[arg(default_value = "shared")]
        dir: String,
    },

    /// Fetch an SSO token for the configured user
    SsoToken {
        /// Username to issue the token for (defaults to the configured email)
        #[arg(long)]
        username: Option<String>,
    },
}

fn parse_connection(value: &str) -> std::result::Result<CloudConnection, String> {
    let (connection_type, connection_name) = value
        .split_once(':')
        .ok_or_else(|| format!("expected TYPE:NAME, got {value:?}"))?;
    Ok(CloudConnection {
        connection_type: connection_type.to_string(),
        connection_name: connection_name.to_string(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Config file: {}", args.config.display());

    // Load configuration
    let config = if args.config.exists() {
        let content = tokio::fs::read_to_string(&args.config)
            .await
            .context("Failed to read config file")?;
        BirstConfig::from_yaml_str(&content).context("Failed to parse config file")?
    } else {
        info!("Config file not found, using defaults");
        BirstConfig::default()
    };

    config.ensure_configured()?;

    let default_space = config.space_id.clone().unwrap_or_default();
    let default_interval = config.settings.polling_interval();
    let sso_password = config.sso_password.clone();
    let admin: SharedAdminService = Arc::new(BirstAdminService::from_config(config));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, cancelling");
            cancel.cancel();
        }
    });

    let interval = |secs: Option<u64>| secs.map(Duration::from_secs).unwrap_or(default_interval);

    match args.command {
        Command::CreateUser { login, password } => {
            admin.create_user(&login, &password).await?;
            println!("Created {login}");
        }
        Command::SetPassword { login, password } => {
            admin.set_user_password(&login, &password).await?;
            println!("Password updated for {login}");
        }
        Command::Extract {
            space_id,
            connections,
            interval: secs,
        } => {
            let space_id = space_id.unwrap_or_else(|| default_space.clone());
            let status = run_extract_cloud_connector_data_job(
                admin,
                &space_id,
                connections,
                interval(secs),
                cancel,
            )
            .await?;
            println!("{} {}", status.status_code, status.message);
        }
        Command::Publish {
            space_id,
            groups,
            interval: secs,
        } => {
            let space_id = space_id.unwrap_or_else(|| default_space.clone());
            let status = run_publish_data_job(admin, &space_id, groups, interval(secs), cancel).await?;
            println!("{} {}", status.status_code, status.message);
        }
        Command::JobStatus { job_token } => {
            let complete = admin.is_job_complete(&job_token).await?;
            let status = admin.get_job_status(&job_token).await?;
            println!("complete={complete} {} {}", status.status_code, status.message);
        }
        Command::ListGroups { space_id } => {
            let space_id = space_id.unwrap_or_else(|| default_space.clone());
            for group in admin.list_groups_in_space(&space_id).await? {
                println!("{group}");
            }
        }
        Command::Directory { space_id, dir } => {
            let space_id = space_id.unwrap_or_else(|| default_space.clone());
            let node = admin.get_directory_contents(&space_id, &dir).await?;
            print_tree(&node, 0);
        }
        Command::SsoToken { username } => {
            let token = match username {
                Some(username) => {
                    admin
                        .get_sso_token_for(
                            Some(default_space.as_str()),
                            sso_password.as_deref(),
                            Some(username.as_str()),
                        )
                        .await?
                }
                None => admin.get_sso_token().await?,
            };
            match token {
                Some(token) => println!("{token}"),
                None => anyhow::bail!("Birst did not issue an SSO token"),
            }
        }
    }

    Ok(())
}

fn print_tree(node: &birst_admin::FileNode, depth: usize) {
    let marker = if node.is_directory { "/" } else { "" };
    println!("{}{}{}", "  ".repeat(depth), node.name, marker);
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
