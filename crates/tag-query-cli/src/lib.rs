//! `tq`: run tag queries through the pipeline from a shell.
//!
//! Collaborators come from a JSON fixture (see [`StaticLookups`]); without
//! one every user, pool and set is unknown and no tag exists.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tag_query::{Collaborators, QueryError, QueryPipeline, StaticLookups};
use tag_query_core::{Identity, QueryConfig, Role, SearchContext};
use tracing_subscriber::EnvFilter;

/// Exit code for a query the pipeline rejected.
pub const EXIT_QUERY_ERROR: i32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("cannot read fixtures {}: {source}", .path.display())]
    Fixtures {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid fixtures {}: {source}", .path.display())]
    FixtureFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "tq", version, about = "Tag query language tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the parsed query tree.
    Parse(QueryArgs),
    /// Print the compiled search document.
    Compile(QueryArgs),
    /// Print the canonical form of the query.
    Normalize(QueryArgs),
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Query text, e.g. `cat -dog ~( fox wolf )`.
    pub query: String,
    /// JSON file with users, pools, sets, tags and aliases.
    #[arg(long, value_name = "FILE")]
    pub fixtures: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub resolve_aliases: bool,
    #[arg(long, default_value_t = false)]
    pub safe_mode: bool,
    #[arg(long, default_value_t = 0)]
    pub free_tags: u32,
    /// Act as this user id; anonymous when omitted.
    #[arg(long)]
    pub user_id: Option<i64>,
    #[arg(long, value_parser = parse_role)]
    pub role: Option<Role>,
}

fn parse_role(value: &str) -> Result<Role, String> {
    Role::parse(value).ok_or_else(|| format!("unknown role: {value}"))
}

impl QueryArgs {
    fn context(&self) -> SearchContext {
        let identity = match (self.user_id, self.role) {
            (Some(id), role) => Identity::user(id, role.unwrap_or(Role::Member)),
            (None, Some(role)) => Identity { id: None, role },
            (None, None) => Identity::anonymous(),
        };
        let mut context = SearchContext::new(identity).with_free_tags(self.free_tags);
        if self.resolve_aliases {
            context = context.with_aliases();
        }
        if self.safe_mode {
            context = context.with_safe_mode();
        }
        context
    }
}

fn load_fixtures(path: Option<&Path>) -> CliResult<StaticLookups> {
    let Some(path) = path else {
        return Ok(StaticLookups::new());
    };
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::Fixtures {
        path: path.to_path_buf(),
        source,
    })?;
    StaticLookups::from_json(&raw).map_err(|source| CliError::FixtureFormat {
        path: path.to_path_buf(),
        source,
    })
}

/// Run one command and return the pretty JSON it prints.
pub fn execute(cli: &Cli, config: &QueryConfig) -> CliResult<String> {
    let (Commands::Parse(args) | Commands::Compile(args) | Commands::Normalize(args)) =
        &cli.command;
    let lookups = load_fixtures(args.fixtures.as_deref())?;
    let pipeline = QueryPipeline::new(config, Collaborators::from_one(&lookups));
    let context = args.context();
    tracing::debug!(query = %args.query, "running tq command");

    let output = match &cli.command {
        Commands::Parse(_) => {
            serde_json::to_string_pretty(&pipeline.parse(&args.query, &context)?)?
        }
        Commands::Compile(_) => {
            serde_json::to_string_pretty(&pipeline.compile(&args.query, &context)?)?
        }
        Commands::Normalize(_) => serde_json::to_string_pretty(&json!({
            "query": args.query,
            "normalized": pipeline.normalize(&args.query, &context),
        }))?,
    };
    Ok(output)
}

fn error_json(err: &QueryError) -> String {
    let mut body = json!({
        "error_type": err.error_type(),
        "message": err.to_string(),
    });
    if let Some(over) = err.over_limit_by() {
        body["over_limit_by"] = json!(over);
    }
    serde_json::to_string_pretty(&body).unwrap_or_else(|_| err.to_string())
}

pub fn run() -> i32 {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match execute(&cli, QueryConfig::global()) {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(CliError::Query(err)) => {
            eprintln!("{}", error_json(&err));
            EXIT_QUERY_ERROR
        }
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}
