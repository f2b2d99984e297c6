// crates/cli/src/main.rs
//! `explainer`: sign in, submit a source, and follow the rendering job.
//!
//! ```bash
//! explainer login --email ada@example.com    # password from EXPLAINER_PASSWORD
//! explainer generate --url https://example.com/post --voice alloy
//! explainer generate --file notes.md
//! explainer watch abc123
//! ```

mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};

use explainer_client::{ExplainerClient, GenerationOptions, JobHandle};
use explainer_core::{ClientConfig, JobId, JobStatus};
use explainer_observability::{init_tracing, TracingOptions};

const DEFAULT_LOG_FILTER: &str = "warn,explainer_client=info,explainer_cli=info";

#[derive(Parser)]
#[command(name = "explainer")]
#[command(version)]
#[command(about = "Turn articles, files and notes into narrated explainer videos")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// REST API base URL
    #[arg(long, global = true, env = "EXPLAINER_API_URL")]
    api_url: Option<String>,

    /// WebSocket push endpoint
    #[arg(long, global = true, env = "EXPLAINER_PUSH_URL")]
    push_url: Option<String>,

    /// Session file (defaults to the platform data dir)
    #[arg(long, global = true, env = "EXPLAINER_STORE_PATH")]
    store_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and persist the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "EXPLAINER_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long, env = "EXPLAINER_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// End the session and forget stored tokens
    Logout,

    /// Show the signed-in user, verifying the token with the server
    Whoami,

    /// Submit a source and follow the job until it finishes
    Generate {
        #[command(flatten)]
        source: Source,

        #[arg(long)]
        voice: Option<String>,

        #[arg(long)]
        style: Option<String>,
    },

    /// Follow an existing job
    Watch { job_id: String },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Source {
    /// Web page to explain
    #[arg(long)]
    url: Option<String>,

    /// Local document to upload
    #[arg(long)]
    file: Option<PathBuf>,

    /// Inline text to explain
    #[arg(long)]
    text: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_tracing(&TracingOptions::from_env(DEFAULT_LOG_FILTER))?;

    let config = build_config(&cli);
    debug!(api = %config.api_base_url, push = %config.push_url, "client config");
    let client = ExplainerClient::new(config).context("building API client")?;
    client.initialize().await;

    match cli.command {
        Command::Login { email, password } => {
            let user = client.login(&email, &password).await?;
            println!("Signed in as {}", display_name(&user.name, &user.email));
        }
        Command::Register { email, name, password } => {
            let user = client.register(&email, &password, &name).await?;
            println!("Welcome, {}", display_name(&user.name, &user.email));
        }
        Command::Logout => {
            client.logout().await;
            println!("Signed out");
        }
        Command::Whoami => match client.check_auth_status().await {
            Ok(user) => println!("{} <{}>", display_name(&user.name, &user.email), user.email),
            Err(e) if e.requires_sign_in() => {
                println!("Not signed in");
                return Ok(ExitCode::FAILURE);
            }
            Err(e) => return Err(e.into()),
        },
        Command::Generate { source, voice, style } => {
            let options = GenerationOptions { voice, style };
            let handle = if let Some(url) = source.url {
                client.generate_video(&url, options).await?
            } else if let Some(path) = source.file {
                client.generate_video_from_file(&path, options).await?
            } else if let Some(text) = source.text {
                client.generate_video_from_text(&text, options).await?
            } else {
                anyhow::bail!("one of --url, --file or --text is required");
            };
            return follow(&client, handle).await;
        }
        Command::Watch { job_id } => {
            let job_id = JobId::parse(&job_id)?;
            let handle = client.watch_job(job_id).await;
            return follow(&client, handle).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn build_config(cli: &Cli) -> ClientConfig {
    let mut config = ClientConfig::from_env();
    if let Some(url) = &cli.api_url {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(url) = &cli.push_url {
        config.push_url = url.clone();
    }
    if let Some(path) = &cli.store_path {
        config.store_path = Some(path.clone());
    }
    config
}

async fn follow(client: &ExplainerClient, handle: JobHandle) -> anyhow::Result<ExitCode> {
    info!(job_id = %handle.job_id, mode = ?handle.mode, "following job");
    println!("Job {}", handle.job_id);

    let Some(state) = client.subscribe_job().await else {
        anyhow::bail!("job channel closed before it could be followed");
    };

    let last = tokio::select! {
        last = progress::follow(state) => last,
        _ = tokio::signal::ctrl_c() => {
            client.stop().await;
            eprintln!("Stopped following job {}; it keeps running on the server.", handle.job_id);
            return Ok(ExitCode::from(130));
        }
    };
    client.reset().await;

    match last.status {
        JobStatus::Done => {
            match last.result_uri {
                Some(uri) => println!("Video ready: {uri}"),
                None => println!("Video ready"),
            }
            Ok(ExitCode::SUCCESS)
        }
        JobStatus::Error => {
            eprintln!(
                "Generation failed: {}",
                last.error.as_deref().unwrap_or("unknown error")
            );
            Ok(ExitCode::FAILURE)
        }
        JobStatus::Queued | JobStatus::Processing => {
            eprintln!("Lost track of job {} ({})", handle.job_id, last.status.as_str());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn display_name<'a>(name: &'a str, email: &'a str) -> &'a str {
    if name.is_empty() {
        email
    } else {
        name
    }
}
