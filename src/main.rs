use message_state::store::config::parse_nodes;
use message_state::{GarbageCollector, MessageId, MessageStore, StoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str = "\
Usage: message-state [options] <command>

Options:
  --config <file>          JSON config file (defaults to MESSAGE_STATE_* env vars)
  --nodes <h:p,h:p,...>    replica set endpoints
  --db <n>                 database index
  --gc-threshold <secs>    grace window added to now when sweeping
  --verbose                debug logging

Commands:
  discover                 print the current master
  sweep [--every <secs>]   run garbage collection once, or periodically
  inspect <message-id>     print every tracked attribute as JSON
  delete <message-id>      delete every attribute of a message
  flush                    wipe the selected database";

enum Command {
    Discover,
    Sweep { every: Option<Duration> },
    Inspect(MessageId),
    Delete(MessageId),
    Flush,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.iter().any(|arg| arg == "--help" || arg == "-h") {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let mut config_path: Option<PathBuf> = None;
    let mut nodes: Option<String> = None;
    let mut db: Option<i64> = None;
    let mut gc_threshold: Option<i64> = None;
    let mut every: Option<Duration> = None;
    let mut verbose = false;
    let mut positional: Vec<String> = vec![];

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                config_path = Some(PathBuf::from(flag_value(&args, i)?));
                i += 2;
            }
            "--nodes" => {
                nodes = Some(flag_value(&args, i)?.to_string());
                i += 2;
            }
            "--db" => {
                db = Some(flag_value(&args, i)?.parse()?);
                i += 2;
            }
            "--gc-threshold" => {
                gc_threshold = Some(flag_value(&args, i)?.parse()?);
                i += 2;
            }
            "--every" => {
                let secs: u64 = flag_value(&args, i)?.parse()?;
                if secs == 0 {
                    anyhow::bail!("--every must be at least 1 second");
                }
                every = Some(Duration::from_secs(secs));
                i += 2;
            }
            "--verbose" => {
                verbose = true;
                i += 1;
            }
            other => {
                positional.push(other.to_string());
                i += 1;
            }
        }
    }

    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let mut config = match &config_path {
        Some(path) => StoreConfig::from_json_file(path)?,
        None => StoreConfig::from_env()?,
    };
    if let Some(nodes) = nodes {
        config.nodes = parse_nodes(&nodes)?;
    }
    if let Some(db) = db {
        config.db = db;
    }
    if let Some(threshold) = gc_threshold {
        config.gc_threshold_secs = threshold;
    }
    config.validate()?;

    let command = parse_command(&positional, every)?;

    tracing::info!(
        "Replica set: {:?} (db {})",
        config
            .nodes
            .iter()
            .map(|node| node.to_string())
            .collect::<Vec<_>>(),
        config.db
    );

    let store = Arc::new(MessageStore::connect(&config));

    match command {
        Command::Discover => {
            let master = store.connection().discover().await?;
            println!("{}", master.endpoint());
        }
        Command::Sweep { every: None } => {
            let gc = GarbageCollector::from_config(store.clone(), &config);
            let report = gc.sweep().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Sweep {
            every: Some(interval),
        } => {
            let gc = GarbageCollector::from_config(store.clone(), &config);
            tracing::info!(
                "Sweeping every {:?} with threshold {}s",
                interval,
                gc.threshold_secs()
            );
            gc.run_every(interval).await?;
        }
        Command::Inspect(id) => {
            let record = store.record(&id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Delete(id) => {
            let removed = store.delete_all(&id).await?;
            tracing::info!("Deleted {} keys of {}", removed, id);
        }
        Command::Flush => {
            store.flush_all().await?;
        }
    }

    Ok(())
}

fn flag_value(args: &[String], i: usize) -> anyhow::Result<&str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{} requires a value", args[i]))
}

fn parse_command(positional: &[String], every: Option<Duration>) -> anyhow::Result<Command> {
    let message_id = || -> anyhow::Result<MessageId> {
        positional
            .get(1)
            .map(|raw| MessageId::from_prefixed(raw.as_str()))
            .ok_or_else(|| anyhow::anyhow!("missing <message-id>\n\n{}", USAGE))
    };

    match positional.first().map(String::as_str) {
        Some("discover") => Ok(Command::Discover),
        Some("sweep") => Ok(Command::Sweep { every }),
        Some("inspect") => Ok(Command::Inspect(message_id()?)),
        Some("delete") => Ok(Command::Delete(message_id()?)),
        Some("flush") => Ok(Command::Flush),
        Some(other) => anyhow::bail!("unknown command '{}'\n\n{}", other, USAGE),
        None => anyhow::bail!("missing command\n\n{}", USAGE),
    }
}
