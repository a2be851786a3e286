//! ecodeploy - 基于 git 的远程部署
//!
//! Usage:
//! - Set up:   `ecodeploy -c ecosystem.json setup production [--reset]`
//! - Deploy:   `ecodeploy -c ecosystem.json deploy production [ref]`
//! - Shortcut: `ecodeploy -c ecosystem.json production [ref]`
//! - Run:      `ecodeploy -c ecosystem.json run production -- pm2 ls`

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ecodeploy::config::constants::DEFAULT_LOG_FILTER;
use ecodeploy::config::{load_private_key, propagate_to_apps, EcosystemConfig};
use ecodeploy::{Deployer, DeployerOptions, EnvironmentMap, LocalSession, RemoteSession, SshSession};

#[derive(Parser)]
#[command(name = "ecodeploy", version)]
#[command(about = "Deploy a git ref to a remote host over SSH", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Set ecosystem config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run commands on this machine instead of over SSH
    #[arg(long, global = true)]
    local: bool,

    /// Do not echo hook output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Environment to deploy (same as `deploy <ENV> [REF]`)
    env: Option<String>,

    /// Ref to deploy instead of the configured one
    #[arg(value_name = "REF")]
    git_ref: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Setup deployment environment
    Setup {
        env: String,
        /// Reset deployment environment, deleting everything that was there
        #[arg(short, long)]
        reset: bool,
    },

    /// Run a command in the deployment environment
    Run {
        env: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Deploy [REF] to <ENV>
    Deploy {
        env: String,
        #[arg(value_name = "REF")]
        git_ref: Option<String>,
    },
}

enum Action {
    Setup { reset: bool },
    Run { command: String },
    Deploy { git_ref: Option<String>, new_config: Option<Value> },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config_path = cli.config.context("Config file must be set")?;
    let config = EcosystemConfig::load(&config_path)?;

    let (env_name, action) = match cli.command {
        Some(Commands::Setup { env, reset }) => (env, Action::Setup { reset }),
        Some(Commands::Run { env, command }) => {
            if command.is_empty() {
                bail!("No command given");
            }
            (env, Action::Run { command: command.join(" ") })
        }
        Some(Commands::Deploy { env, git_ref }) => (env, Action::Deploy { git_ref, new_config: None }),
        None => match cli.env {
            Some(env) => (env, Action::Deploy { git_ref: cli.git_ref, new_config: None }),
            None => bail!("No environment given, see --help"),
        },
    };

    let environment = config.environment(&env_name)?;

    // 环境快照只在这里读取一次
    let snapshot: EnvironmentMap = std::env::vars().collect();
    let saved = environment
        .save_env
        .as_ref()
        .map(|save| save.resolve(&snapshot))
        .unwrap_or_default();
    let options = DeployerOptions::from_environment(environment, &saved);

    let action = match action {
        Action::Deploy { git_ref, .. } if !saved.is_empty() => {
            let mut propagated = config.to_value();
            propagate_to_apps(&mut propagated, &saved);
            Action::Deploy { git_ref, new_config: Some(propagated) }
        }
        other => other,
    };

    let log_output = !cli.quiet;

    if cli.local {
        let deployer = Deployer::with_options(LocalSession::new(log_output), options);
        execute(&deployer, &action).await
    } else {
        let private_key = load_private_key(environment.key.as_deref())?;
        let session = SshSession::new(environment.connection(private_key), log_output);
        let deployer = Deployer::with_options(session, options);
        execute(&deployer, &action).await
    }
}

/// 打开会话、执行操作，无论结果如何都关闭会话
async fn execute<S: RemoteSession>(deployer: &Deployer<S>, action: &Action) -> Result<bool> {
    let result = perform(deployer, action).await;
    deployer.stop().await;
    result
}

async fn perform<S: RemoteSession>(deployer: &Deployer<S>, action: &Action) -> Result<bool> {
    deployer.start().await.context("Could not open session")?;

    match action {
        Action::Setup { reset } => Ok(deployer.setup(*reset).await.is_success()),
        Action::Deploy { git_ref, new_config } => Ok(deployer
            .deploy(git_ref.as_deref(), new_config.as_ref())
            .await
            .is_success()),
        Action::Run { command } => {
            let outcome = deployer.run(command).await?;
            print!("{}", outcome.stdout);
            Ok(true)
        }
    }
}
