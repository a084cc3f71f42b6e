use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use serde_json::Value;
use stow_persist::{load_stored_state, purge_stored_state, PersistConfig, PersistOptions};
use stow_storage::{CompressedStorage, FileStorage, InMemoryStorage, Storage};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let storage = open_storage(&cli)?;
    match cli.command {
        Command::Keys(ref args) => cmd_keys(&cli, &storage, args).await,
        Command::Get(ref args) => cmd_get(&cli, &storage, args).await,
        Command::Set(ref args) => cmd_set(&cli, &storage, args).await,
        Command::Purge(ref args) => cmd_purge(&cli, &storage, args).await,
        Command::Load(ref args) => cmd_load(&cli, storage, args).await,
        Command::CheckConfig(ref args) => cmd_check_config(args),
    }
}

fn open_storage(cli: &Cli) -> anyhow::Result<Arc<dyn Storage>> {
    let file = FileStorage::open(&cli.file)
        .with_context(|| format!("cannot open {}", cli.file.display()))?;
    Ok(if cli.compressed {
        Arc::new(CompressedStorage::new(file))
    } else {
        Arc::new(file)
    })
}

async fn cmd_keys(cli: &Cli, storage: &Arc<dyn Storage>, args: &KeysArgs) -> anyhow::Result<()> {
    let mut keys: Vec<String> = storage
        .get_all_keys()
        .await?
        .into_iter()
        .filter_map(|key| {
            if args.all {
                Some(key)
            } else {
                key.strip_prefix(cli.prefix.as_str()).map(str::to_string)
            }
        })
        .collect();
    keys.sort();

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&keys)?),
        OutputFormat::Text if keys.is_empty() => println!("No persisted keys."),
        OutputFormat::Text => {
            for key in &keys {
                println!("{}", key.yellow());
            }
        }
    }
    Ok(())
}

async fn cmd_get(cli: &Cli, storage: &Arc<dyn Storage>, args: &GetArgs) -> anyhow::Result<()> {
    let storage_key = format!("{}{}", cli.prefix, args.key);
    let raw = storage
        .get_item(&storage_key)
        .await?
        .with_context(|| format!("nothing stored for {}", args.key))?;

    if args.raw {
        println!("{raw}");
        return Ok(());
    }
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("value of {} is not JSON; use --raw", args.key))?;
    match cli.format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(&value)?),
    }
    Ok(())
}

async fn cmd_set(cli: &Cli, storage: &Arc<dyn Storage>, args: &SetArgs) -> anyhow::Result<()> {
    let value: Value = serde_json::from_str(&args.value)
        .with_context(|| format!("value for {} is not valid JSON", args.key))?;
    storage
        .set_item(&format!("{}{}", cli.prefix, args.key), &value.to_string())
        .await?;
    println!("{} Stored {}", "✓".green().bold(), args.key.yellow());
    Ok(())
}

async fn cmd_purge(cli: &Cli, storage: &Arc<dyn Storage>, args: &PurgeArgs) -> anyhow::Result<()> {
    let keys = (!args.keys.is_empty()).then_some(args.keys.as_slice());
    purge_stored_state(storage, &cli.prefix, keys).await?;
    match keys {
        Some(keys) => println!("{} Purged {} key(s)", "✓".green().bold(), keys.len()),
        None => println!(
            "{} Purged everything under {}",
            "✓".green().bold(),
            cli.prefix.bold()
        ),
    }
    Ok(())
}

async fn cmd_load(cli: &Cli, storage: Arc<dyn Storage>, args: &LoadArgs) -> anyhow::Result<()> {
    let mut options = PersistOptions::from_path(&args.options)
        .with_context(|| format!("cannot load {}", args.options.display()))?;
    options.key_prefix.get_or_insert_with(|| cli.prefix.clone());
    let config = PersistConfig::builder()
        .options(options)
        .storage(storage)
        .build()?;

    let state = load_stored_state(&config).await?;
    match cli.format {
        OutputFormat::Json => println!("{}", state.to_value()),
        OutputFormat::Text => {
            println!("Restored {} key(s)", state.len().to_string().bold());
            println!("{}", serde_json::to_string_pretty(&state.to_value())?);
        }
    }
    Ok(())
}

fn cmd_check_config(args: &CheckConfigArgs) -> anyhow::Result<()> {
    let options = PersistOptions::from_path(&args.options)
        .with_context(|| format!("cannot load {}", args.options.display()))?;
    let config = PersistConfig::builder()
        .options(options)
        .storage(Arc::new(InMemoryStorage::new()))
        .build()?;

    println!("{} {} is valid", "✓".green().bold(), args.options.display());
    println!(
        "  Persisted: {}",
        config.persisted_keys().collect::<Vec<_>>().join(", ").cyan()
    );
    println!("  Prefix: {}", config.key_prefix().yellow());
    if let Some(timeout) = config.write_timeout() {
        println!("  Write timeout: {timeout:?}");
    }
    if let Some(retry) = config.retry() {
        println!(
            "  Retry: {} attempt(s), {:?} apart",
            retry.max_attempts, retry.delay
        );
    }
    Ok(())
}
