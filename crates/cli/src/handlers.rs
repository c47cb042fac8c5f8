//! Command handlers for s3pilot CLI
//!
//! The CLI is the host of the reconciler: it loads the state file, runs one
//! operation and writes the state back only when that operation succeeded.

use crate::cors::load_cors_from_file;
use crate::wizard::run_init_wizard;
use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Shell as ClapShell};
use dialoguer::{theme::ColorfulTheme, Confirm};
use s3pilot_core::{
    get_config_path, load_config_or_default, validate_bucket_name, validate_config,
    AwsClientFactory, BucketState, ConfigFile, DeployInputs, Reconciler, StateStore,
    UploadOptions,
};
use std::path::Path;
use tabled::{Table, Tabled};
use tokio_util::sync::CancellationToken;

/// Handle init command
pub async fn handle_init() -> Result<()> {
    run_init_wizard().await
}

/// Handle config commands
pub async fn handle_config(action: &str) -> Result<()> {
    match action {
        "show" => {
            println!("Current configuration:");
            println!("  File: {}", get_config_path()?.display());
            println!();

            let config = load_config_or_default()?;
            let advanced = config.advanced();
            let logging = config.logging();

            println!("AWS:");
            println!("  Credentials: {}", credentials_source(&config));
            if let Some(key) = &config.aws.access_key_id {
                println!("  Access Key ID: {}", mask(key));
            }
            println!(
                "  Endpoint: {}",
                config.aws.endpoint_url.as_deref().unwrap_or("AWS (default)")
            );
            println!();
            println!("Defaults:");
            println!("  Region: {}", config.defaults.region);
            println!("  Accelerated: {}", config.defaults.accelerated);
            println!();
            println!("Advanced:");
            println!("  Retry interval: {}ms", advanced.retry_interval_ms);
            println!(
                "  Max retries: {}",
                advanced
                    .max_retries
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unbounded".to_string())
            );
            println!("  Concurrent requests: {}", advanced.max_concurrent_requests);
            println!(
                "  Multipart: >= {}MB in {}MB parts",
                advanced.multipart_threshold_mb, advanced.multipart_chunk_size_mb
            );
            println!();
            println!("Logging: {} ({})", logging.level, logging.format);

            Ok(())
        }
        "validate" => {
            println!("Validating configuration...");

            let config = load_config_or_default()?;
            validate_config(&config)?;

            println!("  ✅ Valid configuration format");
            println!("  Credentials: {}", credentials_source(&config));

            Ok(())
        }
        _ => {
            println!("Unknown action: {}", action);
            println!("Available actions: show, validate");
            Ok(())
        }
    }
}

fn credentials_source(config: &ConfigFile) -> &'static str {
    if config.aws.access_key_id.is_some() {
        "Access Keys (config file)"
    } else {
        "AWS default provider chain"
    }
}

/// Show only the first 4 chars of a key
fn mask(key: &str) -> String {
    if key.chars().count() > 4 {
        format!("{}...", key.chars().take(4).collect::<String>())
    } else {
        "****".to_string()
    }
}

/// Build a reconciler from the loaded configuration
async fn build_reconciler(
    config: &ConfigFile,
    cancel: CancellationToken,
) -> Reconciler<AwsClientFactory> {
    let advanced = config.advanced();
    let factory = AwsClientFactory::new(&config.aws).await;

    Reconciler::new(factory)
        .with_retry_policy(advanced.retry_policy())
        .with_cancellation(cancel)
        .with_concurrency(advanced.max_concurrent_requests)
        .with_multipart(advanced.multipart())
}

/// Handle deploy command
pub async fn handle_deploy(
    store: &StateStore,
    cancel: CancellationToken,
    name: Option<String>,
    region: Option<String>,
    accelerated: Option<bool>,
    cors: Option<&Path>,
) -> Result<()> {
    let config = load_config_or_default()?;
    validate_config(&config)?;

    let prior = store.load()?;

    let cors = match cors {
        Some(path) => Some(load_cors_from_file(path).await?),
        None => None,
    };

    let inputs = DeployInputs {
        name,
        region: region.unwrap_or_else(|| config.defaults.region.clone()),
        accelerated: accelerated.unwrap_or(config.defaults.accelerated),
        cors,
    };

    // Fail on a bad name before touching credentials or the network
    match inputs.name.as_deref().or(prior.name.as_deref()) {
        Some(name) => validate_bucket_name(name, inputs.accelerated)?,
        None => {
            return Err(anyhow::anyhow!(
                "No bucket name given and none found in {}.\n\
                 Pass one with --name.",
                store.path().display()
            ))
        }
    }

    let reconciler = build_reconciler(&config, cancel).await;
    let state = reconciler.deploy(&inputs, &prior).await?;

    store.save(&state)?;

    println!();
    println!("  ✅ Bucket deployed");
    print_state(&state);

    Ok(())
}

/// Handle remove command
pub async fn handle_remove(store: &StateStore, cancel: CancellationToken, yes: bool) -> Result<()> {
    let state = store.load()?;

    let Some(identity) = state.identity() else {
        println!("Nothing to remove: no bucket found in {}", store.path().display());
        return Ok(());
    };

    if !yes {
        println!(
            "⚠️  Warning: you are about to delete bucket '{}' and every object in it",
            identity.name
        );
        println!("  This action is IRREVERSIBLE!");

        let confirm = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Continue?")
            .default(false)
            .interact()?;

        if !confirm {
            println!("❌ Removal cancelled");
            return Ok(());
        }
    }

    let config = load_config_or_default()?;
    validate_config(&config)?;

    let reconciler = build_reconciler(&config, cancel).await;
    reconciler.remove(&state).await?;

    store.clear()?;

    println!("  ✅ Bucket deleted: {} ({})", identity.name, identity.region);

    Ok(())
}

/// Handle upload command
pub async fn handle_upload(
    store: &StateStore,
    cancel: CancellationToken,
    options: &UploadOptions,
) -> Result<()> {
    let state = store.load()?;

    if options.name.is_none() && !state.is_managed() {
        println!(
            "No bucket to upload to: pass --name or deploy one first (state: {})",
            store.path().display()
        );
        return Ok(());
    }

    let config = load_config_or_default()?;
    validate_config(&config)?;

    let reconciler = build_reconciler(&config, cancel).await;
    reconciler.upload(options, &state).await?;

    println!("  ✅ Upload complete");

    Ok(())
}

#[derive(Tabled)]
struct StateRow {
    field: &'static str,
    value: String,
}

fn state_rows(state: &BucketState) -> Vec<StateRow> {
    let show = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());

    vec![
        StateRow {
            field: "name",
            value: show(state.name.clone()),
        },
        StateRow {
            field: "region",
            value: show(state.region.clone()),
        },
        StateRow {
            field: "accelerated",
            value: show(state.accelerated.map(|a| a.to_string())),
        },
        StateRow {
            field: "url",
            value: show(state.url.clone()),
        },
    ]
}

fn print_state(state: &BucketState) {
    println!();
    println!("{}", Table::new(state_rows(state)));
}

/// Handle state show command
pub fn handle_state_show(store: &StateStore, output: &str) -> Result<()> {
    let state = store.load()?;

    match output {
        "json" => println!("{}", serde_json::to_string_pretty(&state)?),
        "table" => {
            if !state.is_managed() {
                println!("No bucket under management ({})", store.path().display());
            } else {
                print_state(&state);
            }
        }
        _ => {
            return Err(anyhow::anyhow!(
                "Unknown output format: {}\nSupported formats: table, json",
                output
            ))
        }
    }

    Ok(())
}

/// Handle shell completion generation
pub async fn handle_completion(shell: &str, cmd: &mut Command) -> Result<()> {
    use std::io;

    let clap_shell = match shell {
        "bash" => ClapShell::Bash,
        "zsh" => ClapShell::Zsh,
        "fish" => ClapShell::Fish,
        "elvish" => ClapShell::Elvish,
        "powershell" | "pwsh" => ClapShell::PowerShell,
        _ => {
            return Err(anyhow::anyhow!(
                "Unsupported shell: {}\nSupported shells: bash, zsh, fish, elvish, powershell",
                shell
            ));
        }
    };

    // Script on stdout, instructions on stderr so `source <(...)` works
    generate(clap_shell, cmd, "s3pilot", &mut io::stdout());

    eprintln!();
    eprintln!("Installation instructions:");

    match shell {
        "bash" => {
            eprintln!("  # Add to your ~/.bashrc:");
            eprintln!("  source <(s3pilot completion bash)");
        }
        "zsh" => {
            eprintln!("  s3pilot completion zsh > ~/.zsh/completion/_s3pilot");
            eprintln!("  # then add to ~/.zshrc:");
            eprintln!("  fpath=(~/.zsh/completion $fpath)");
            eprintln!("  autoload -U compinit && compinit");
        }
        "fish" => {
            eprintln!("  s3pilot completion fish > ~/.config/fish/completions/s3pilot.fish");
        }
        "elvish" => {
            eprintln!("  s3pilot completion elvish > ~/.elvish/lib/s3pilot.elv");
            eprintln!("  # then add to rc.elv:");
            eprintln!("  use ~/.elvish/lib/s3pilot");
        }
        "powershell" | "pwsh" => {
            eprintln!("  s3pilot completion powershell | Out-String | Invoke-Expression");
        }
        _ => {}
    }

    Ok(())
}
