//! meshweaver - submit one generation and watch it through to the imported files.
//!
//! A stand-in for the host application: it owns the timer that drives
//! `Session::tick` and writes imported assets into a directory.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::info;

use meshweaver_core::domain::{
    GenerationOptions, GenerationRequest, ImageRef, ModelVersion, MultiviewImages, TaskEvent,
    TaskStatus,
};
use meshweaver_core::impls::DirectorySink;
use meshweaver_core::{OrchestratorConfig, Session};

#[derive(Debug, Parser)]
#[command(name = "meshweaver", version, about = "Generate 3D models from text or images")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Model version, full (`v2.5-20250123`) or short (`v2.5`)
    #[arg(long, global = true)]
    model_version: Option<String>,

    /// Where imported assets are written
    #[arg(long, global = true, default_value = "meshweaver-out")]
    out: PathBuf,

    /// Generation option, repeatable (`--option texture=true`)
    #[arg(long = "option", global = true, value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Host tick period in milliseconds
    #[arg(long, global = true, default_value_t = 500)]
    tick_ms: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Text to model
    Text {
        prompt: String,
        #[arg(long)]
        negative_prompt: Option<String>,
    },
    /// Single image to model
    Image { path: PathBuf },
    /// Three or four views to model
    Multiview {
        front: PathBuf,
        left: PathBuf,
        back: PathBuf,
        right: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("meshweaver error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing();

    let request = build_request(&cli)?;
    let config = OrchestratorConfig::from_env()?;
    let auto_import = config.scheduler.auto_import;
    let cost = request.estimated_cost();

    let mut session = Session::activate(config).context("failed to start the session")?;
    let balance = session
        .fetch_balance()
        .await
        .context("API key check failed")?;
    info!(balance = balance.balance, frozen = balance.frozen, "account ready");

    let id = session.submit(request)?;
    println!("submitted {id} (about {cost} credits)");

    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("cannot create {}", cli.out.display()))?;
    let mut sink = DirectorySink::new(&cli.out);
    let mut events = session.subscribe();

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.tick_ms.max(50)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelled = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.tick(&mut sink);
                while let Ok(event) = events.try_recv() {
                    print_event(&event);
                }
                let Some(task) = session.task(id) else { bail!("task {id} disappeared") };
                let finished = match task.status {
                    TaskStatus::Succeeded => !auto_import || task.imported || task.import_error.is_some(),
                    status => status.is_terminal(),
                };
                if finished {
                    break;
                }
            }
            res = &mut ctrl_c, if !cancelled => {
                res.context("cannot listen for Ctrl-C")?;
                println!("cancelling {id}...");
                session.cancel(id)?;
                cancelled = true;
            }
        }
    }

    let task = session.task(id).context("task missing after run")?;
    for path in sink.written() {
        println!("wrote {}", path.display());
    }
    session.deactivate()?;

    match task.status {
        TaskStatus::Succeeded => match task.import_error {
            Some(reason) => bail!("generation succeeded but import failed: {reason}"),
            None => Ok(()),
        },
        TaskStatus::Cancelled => {
            println!("cancelled");
            Ok(())
        }
        _ => bail!(
            "task failed after {} retries: {}",
            task.total_retries,
            task.error.unwrap_or_else(|| "unknown error".into())
        ),
    }
}

fn build_request(cli: &Cli) -> anyhow::Result<GenerationRequest> {
    let request = match &cli.command {
        Command::Text {
            prompt,
            negative_prompt,
        } => {
            let request = GenerationRequest::text(prompt.clone());
            match negative_prompt {
                Some(n) => request.with_negative_prompt(n.clone()),
                None => request,
            }
        }
        Command::Image { path } => GenerationRequest::image(ImageRef::local(path)),
        Command::Multiview {
            front,
            left,
            back,
            right,
        } => GenerationRequest::multiview(MultiviewImages {
            front: ImageRef::local(front),
            left: ImageRef::local(left),
            back: ImageRef::local(back),
            right: right.as_ref().map(ImageRef::local),
        }),
    };

    let version = match &cli.model_version {
        Some(v) => v.parse::<ModelVersion>()?,
        None => request.model_version(),
    };
    let options = GenerationOptions::from_map(request.kind(), version, &parse_options(&cli.options)?)?;
    Ok(request.with_model_version(version).with_options(options))
}

/// `key=value` pairs; values are read as JSON when they parse, else as strings.
fn parse_options(raw: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("option {pair:?} is not KEY=VALUE");
        };
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        map.insert(key.trim().to_string(), value);
    }
    Ok(map)
}

fn print_event(event: &TaskEvent) {
    match event {
        TaskEvent::Submitted { remote_id, .. } => println!("remote task {remote_id}"),
        TaskEvent::StatusChanged { from, to, .. } => println!("{from} -> {to}"),
        TaskEvent::Progress { progress, .. } => println!("progress {progress}%"),
        TaskEvent::Succeeded { handles, .. } => println!("done, {handles} result(s)"),
        TaskEvent::Failed { reason, .. } => println!("failed: {reason}"),
        TaskEvent::Imported { role, .. } => println!("imported {role:?}"),
        TaskEvent::ImportFailed { reason, .. } => println!("import failed: {reason}"),
        TaskEvent::BalanceUpdated(b) => println!("balance {} ({} frozen)", b.balance, b.frozen),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("meshweaver=info,meshweaver_core=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_parse_json_or_string() {
        let raw = vec!["texture=true".to_string(), "style=person:person2cartoon".to_string()];
        let map = parse_options(&raw).unwrap();
        assert_eq!(map["texture"], Value::Bool(true));
        assert_eq!(map["style"], Value::String("person:person2cartoon".into()));
        assert!(parse_options(&["oops".to_string()]).is_err());
    }

    #[test]
    fn text_command_builds_a_request() {
        let cli = Cli::parse_from(["meshweaver", "text", "a red fox", "--model-version", "v2.5"]);
        let request = build_request(&cli).unwrap();
        assert_eq!(request.model_version(), ModelVersion::V2_5);
    }

    #[test]
    fn v1_rejects_advanced_options() {
        let cli = Cli::parse_from([
            "meshweaver",
            "text",
            "a red fox",
            "--model-version",
            "v1.4",
            "--option",
            "pbr=true",
        ]);
        assert!(build_request(&cli).is_err());
    }
}
