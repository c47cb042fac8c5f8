//! CORS rules loaded from JSON files

use anyhow::Result;
use s3pilot_core::{CorsConfiguration, CorsRule};
use std::path::Path;

/// Parse a CORS config from JSON.
///
/// Accepts either `{"rules": [...]}` (or the AWS `CORSRules` spelling) or a
/// bare array of rules.
pub fn parse_cors(content: &str) -> Result<CorsConfiguration> {
    if let Ok(rules) = serde_json::from_str::<Vec<CorsRule>>(content) {
        return Ok(CorsConfiguration { rules });
    }

    let config: CorsConfiguration = serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Failed to parse CORS config: {}", e))?;

    Ok(config)
}

/// Create a CORS config from JSON file
pub async fn load_cors_from_file(file_path: &Path) -> Result<CorsConfiguration> {
    let content = tokio::fs::read_to_string(file_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", file_path.display(), e))?;

    let config = parse_cors(&content)?;
    config.validate()?;

    Ok(config)
}
