//! Interactive setup wizard for s3pilot configuration

use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password, Select};
use indicatif::{ProgressBar, ProgressStyle};
use s3pilot_core::{
    get_config_path, save_config, validate_config, AwsConfig, ConfigFile, DefaultsConfig,
};

/// Run the interactive setup wizard
pub async fn run_init_wizard() -> Result<()> {
    println!("🚀 Welcome to s3pilot setup!\n");

    println!("This wizard will guide you through the configuration process.");
    println!("You will need:");
    println!("  1. AWS credentials (or a configured AWS profile)");
    println!("  2. The region your bucket should live in\n");

    // Step 1: Credentials
    let (access_key_id, secret_access_key) = prompt_auth_method()?;

    // Step 2: Optional S3-compatible endpoint
    let endpoint_url = prompt_endpoint()?;

    // Step 3: Defaults
    let region = prompt_region()?;
    let accelerated = prompt_acceleration(endpoint_url.is_some())?;

    // Summary
    println!("\n📋 Configuration summary:");
    println!(
        "  Auth: {}",
        if access_key_id.is_some() {
            "Access Keys"
        } else {
            "AWS default provider chain"
        }
    );
    println!(
        "  Endpoint: {}",
        endpoint_url.as_deref().unwrap_or("AWS (default)")
    );
    println!("  Region: {}", region);
    println!("  Accelerated: {}", accelerated);

    // Confirmation
    let confirm = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Save this configuration?")
        .default(false)
        .interact()?;

    if !confirm {
        println!("❌ Configuration cancelled");
        return Ok(());
    }

    let config = ConfigFile {
        aws: AwsConfig {
            access_key_id,
            secret_access_key,
            session_token: None,
            endpoint_url,
        },
        defaults: DefaultsConfig {
            region,
            accelerated,
        },
        advanced: None,
        logging: None,
    };
    validate_config(&config)?;

    // Save config
    let pb = ProgressBar::new(2);
    pb.set_style(
        ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    pb.set_message("Saving configuration...");

    save_config(&config)?;

    pb.inc(1);
    pb.finish_with_message("✅ Configuration saved!");

    println!("\n🎉 Setup complete!");
    println!("\nConfiguration saved to: {}", get_config_path()?.display());
    println!("\nYou can now use s3pilot:");
    println!("  $ s3pilot deploy --name my-bucket");
    println!("  $ s3pilot upload --dir ./public");
    println!("  $ s3pilot remove");

    Ok(())
}

/// Prompt for authentication method
fn prompt_auth_method() -> Result<(Option<String>, Option<String>)> {
    let auth_methods = vec![
        "AWS default provider chain (recommended)",
        "Access Key ID + Secret Access Key",
    ];

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Authentication method")
        .items(&auth_methods)
        .default(0)
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to select auth method: {}", e))?;

    if selection == 0 {
        return Ok((None, None));
    }

    let access_key = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Access Key ID")
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.is_empty() {
                Err("Access Key ID cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to get Access Key ID: {}", e))?;

    let secret_key = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Secret Access Key")
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.is_empty() {
                Err("Secret Access Key cannot be empty")
            } else if input.len() < 20 {
                Err("Secret Access Key seems too short")
            } else {
                Ok(())
            }
        })
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to get Secret Access Key: {}", e))?;

    Ok((Some(access_key), Some(secret_key)))
}

/// Prompt for a custom endpoint (MinIO, LocalStack, ...)
fn prompt_endpoint() -> Result<Option<String>> {
    let custom = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Use a custom S3-compatible endpoint?")
        .default(false)
        .interact()?;

    if !custom {
        return Ok(None);
    }

    let endpoint = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Endpoint URL")
        .default("http://localhost:9000".to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.starts_with("http://") || input.starts_with("https://") {
                Ok(())
            } else {
                Err("Endpoint must start with http:// or https://")
            }
        })
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to get endpoint: {}", e))?;

    Ok(Some(endpoint))
}

/// Prompt for the default region
fn prompt_region() -> Result<String> {
    Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Default region")
        .default(s3pilot_core::DEFAULT_REGION.to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Region cannot be empty")
            } else if !input
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            {
                Err("Region must look like eu-west-1")
            } else {
                Ok(())
            }
        })
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to get region: {}", e))
}

/// Prompt for the default acceleration mode; custom endpoints have none
fn prompt_acceleration(custom_endpoint: bool) -> Result<bool> {
    if custom_endpoint {
        return Ok(false);
    }

    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Enable transfer acceleration by default?")
        .default(true)
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to get acceleration mode: {}", e))
}

