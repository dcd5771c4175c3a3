//! CLI definitions and the thin HTTP client behind `sources` / `jobs`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use quarry_protocol::config::sample_config_toml;
use quarry_protocol::http_types::{
    CreateJobRequest, JobDetail, JobListResponse, ProblemDetails, SourceCatalogResponse,
    TransitionResponse,
};
use quarry_protocol::types::Priority;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quarry", about = "Aptitude-question scraping pipeline", version)]
pub struct Cli {
    /// Verbose console logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the pipeline and its REST/WebSocket surface.
    Serve(ServeArgs),
    /// Write a commented configuration seed.
    InitConfig(InitConfigArgs),
    /// Inspect the source catalog of a running server.
    Sources(SourcesArgs),
    /// Manage jobs on a running server.
    Jobs(JobsArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Bind address override.
    #[arg(long)]
    pub bind: Option<String>,
    /// Database URL override.
    #[arg(long)]
    pub db: Option<String>,
}

#[derive(Args)]
pub struct InitConfigArgs {
    /// Where to write the seed file.
    #[arg(long, default_value = "quarry.toml")]
    pub path: PathBuf,
    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct SourcesArgs {
    /// Server base URL.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub server: String,

    #[command(subcommand)]
    pub command: SourcesCommand,
}

#[derive(Subcommand)]
pub enum SourcesCommand {
    /// List configured sources.
    List,
    /// Show one source by id (case-insensitive).
    Show { source_id: String },
}

#[derive(Args)]
pub struct JobsArgs {
    /// Server base URL.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub server: String,

    #[command(subcommand)]
    pub command: JobsCommand,
}

#[derive(Subcommand)]
pub enum JobsCommand {
    /// List jobs.
    List,
    /// Create a job.
    Create {
        #[arg(long)]
        name: String,
        /// Source names, repeatable.
        #[arg(long = "source", required = true)]
        sources: Vec<String>,
        #[arg(long, default_value_t = 50)]
        max_per_source: u64,
        /// Category filter, repeatable.
        #[arg(long = "category")]
        categories: Vec<String>,
        #[arg(long, default_value = "medium")]
        priority: Priority,
    },
    /// Start (or resume) a job.
    Start { job_id: u64 },
    /// Pause a running job.
    Pause { job_id: u64 },
    /// Cancel a job.
    Cancel { job_id: u64 },
    /// Show job detail and progress.
    Show { job_id: u64 },
}

// ----------------------------------------------------------------------
// HTTP client plumbing
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientErrorKind {
    Validation,
    Conflict,
    NotFound,
    Server,
}

/// A problem-details response from the server, kept for exit-code mapping.
#[derive(Debug)]
pub struct ClientError {
    kind: ClientErrorKind,
    pub problem: ProblemDetails,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, request {})",
            self.problem.message, self.problem.code, self.problem.request_id
        )
    }
}

impl std::error::Error for ClientError {}

impl ClientError {
    pub fn exit_code(&self) -> i32 {
        match self.kind {
            ClientErrorKind::Validation | ClientErrorKind::Conflict | ClientErrorKind::NotFound => 2,
            ClientErrorKind::Server => 4,
        }
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.context("malformed response body");
    }
    let problem: ProblemDetails = response
        .json()
        .await
        .unwrap_or_else(|_| ProblemDetails {
            error: status.to_string(),
            code: "unknown".to_string(),
            message: "server returned an error without details".to_string(),
            details: None,
            request_id: String::new(),
        });
    let kind = if status.as_u16() == 409 {
        ClientErrorKind::Conflict
    } else if status.as_u16() == 404 {
        ClientErrorKind::NotFound
    } else if status.is_client_error() {
        ClientErrorKind::Validation
    } else {
        ClientErrorKind::Server
    };
    Err(ClientError { kind, problem }.into())
}

// ----------------------------------------------------------------------
// Subcommand bodies
// ----------------------------------------------------------------------

pub fn init_config(args: InitConfigArgs) -> Result<()> {
    if args.path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            args.path.display()
        );
    }
    std::fs::write(&args.path, sample_config_toml())
        .with_context(|| format!("writing {}", args.path.display()))?;
    println!("wrote {}", args.path.display());
    Ok(())
}

pub async fn sources(args: SourcesArgs) -> Result<()> {
    let client = reqwest::Client::new();
    match args.command {
        SourcesCommand::List => {
            let response = client
                .get(format!("{}/api/scraping/sources", args.server))
                .send()
                .await?;
            let catalog: SourceCatalogResponse = parse_response(response).await?;

            let mut table = Table::new();
            table.set_header(["id", "name", "method", "enabled", "reliability", "targets"]);
            for source in catalog.sources {
                table.add_row([
                    source.source_id.to_string(),
                    source.display_name,
                    source.method,
                    source.enabled.to_string(),
                    format!("{:.2}", source.reliability),
                    source.target_count.to_string(),
                ]);
            }
            println!("{table}");
        }
        SourcesCommand::Show { source_id } => {
            let response = client
                .get(format!("{}/api/scraping/sources/{source_id}", args.server))
                .send()
                .await?;
            let detail: serde_json::Value = parse_response(response).await?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
    }
    Ok(())
}

pub async fn jobs(args: JobsArgs) -> Result<()> {
    let client = reqwest::Client::new();
    let base = &args.server;
    match args.command {
        JobsCommand::List => {
            let response = client.get(format!("{base}/api/scraping/jobs")).send().await?;
            let list: JobListResponse = parse_response(response).await?;

            let mut table = Table::new();
            table.set_header(["id", "name", "state", "priority", "sources", "created"]);
            for job in list.jobs {
                table.add_row([
                    job.job_id.to_string(),
                    job.job_name,
                    job.state.as_str().to_string(),
                    job.priority.as_str().to_string(),
                    job.sources
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(","),
                    job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                ]);
            }
            println!("{table}");
        }
        JobsCommand::Create {
            name,
            sources,
            max_per_source,
            categories,
            priority,
        } => {
            let request = CreateJobRequest {
                job_name: name,
                source_names: sources,
                max_questions_per_source: max_per_source,
                target_categories: categories,
                priority_level: priority,
            };
            let response = client
                .post(format!("{base}/api/scraping/jobs"))
                .json(&request)
                .send()
                .await?;
            let created: quarry_protocol::http_types::CreateJobResponse =
                parse_response(response).await?;
            println!("created job {} ({})", created.job_id, created.state.as_str());
        }
        JobsCommand::Start { job_id } => {
            transition(&client, base, job_id, "start").await?;
        }
        JobsCommand::Pause { job_id } => {
            transition(&client, base, job_id, "pause").await?;
        }
        JobsCommand::Cancel { job_id } => {
            transition(&client, base, job_id, "stop").await?;
        }
        JobsCommand::Show { job_id } => {
            let response = client
                .get(format!("{base}/api/scraping/jobs/{job_id}"))
                .send()
                .await?;
            let detail: JobDetail = parse_response(response).await?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
    }
    Ok(())
}

async fn transition(
    client: &reqwest::Client,
    base: &str,
    job_id: u64,
    action: &str,
) -> Result<()> {
    let response = client
        .put(format!("{base}/api/scraping/jobs/{job_id}/{action}"))
        .send()
        .await?;
    let result: TransitionResponse = parse_response(response).await?;
    println!("job {} -> {}", result.job_id, result.state.as_str());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_a_job_create_invocation() {
        let cli = Cli::try_parse_from([
            "quarry",
            "jobs",
            "create",
            "--name",
            "nightly",
            "--source",
            "quizpages",
            "--source",
            "prepstream",
            "--max-per-source",
            "25",
            "--priority",
            "high",
        ])
        .unwrap();
        match cli.command {
            Command::Jobs(args) => match args.command {
                JobsCommand::Create {
                    name,
                    sources,
                    max_per_source,
                    priority,
                    ..
                } => {
                    assert_eq!(name, "nightly");
                    assert_eq!(sources.len(), 2);
                    assert_eq!(max_per_source, 25);
                    assert_eq!(priority, Priority::High);
                }
                _ => panic!("expected create"),
            },
            _ => panic!("expected jobs subcommand"),
        }
    }

    #[test]
    fn init_config_refuses_silent_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarry.toml");

        init_config(InitConfigArgs {
            path: path.clone(),
            force: false,
        })
        .unwrap();
        assert!(path.exists());

        let again = init_config(InitConfigArgs {
            path: path.clone(),
            force: false,
        });
        assert!(again.is_err());

        init_config(InitConfigArgs { path, force: true }).unwrap();
    }
}
