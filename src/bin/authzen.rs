//! AuthZen CLI
//!
//! Evaluates authorization requests from a JSON file and prints decisions

use anyhow::Context;
use authzen::{AuthZen, EngineConfig, Principal, Resource};
use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "authzen")]
#[command(about = "Evaluate identity and resource policies for authorization requests")]
struct Args {
    /// JSON file with one request or an array of requests ("-" for stdin)
    #[arg(short = 'r', long)]
    request: PathBuf,

    /// TOML engine configuration
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Pretty-print the decision JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Deserialize)]
struct Request {
    principal: Principal,
    resource: Resource,
    action: String,
    #[serde(default)]
    context: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Requests {
    One(Box<Request>),
    Many(Vec<Request>),
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading request from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only decisions
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let authz = AuthZen::from_config(&config)?;

    let input = read_input(&args.request)?;
    let requests = match serde_json::from_str::<Requests>(&input)
        .context("parsing authorization request")?
    {
        Requests::One(request) => vec![*request],
        Requests::Many(requests) => requests,
    };

    info!("Evaluating {} request(s)", requests.len());

    for request in requests {
        let decision = match &request.context {
            Some(ctx) => authz.authorize_with_context(
                &request.principal,
                &request.resource,
                &request.action,
                ctx,
            ),
            None => authz.authorize(&request.principal, &request.resource, &request.action),
        };

        let output = if args.pretty {
            serde_json::to_string_pretty(&decision)?
        } else {
            serde_json::to_string(&decision)?
        };
        println!("{}", output);
    }

    Ok(())
}
