//! Persisted bucket state
//!
//! A flat record (`name`, `region`, `accelerated`, `url`) that survives
//! between runs. Only the reconciler produces new values; the host decides
//! when to write them.

use crate::client::DEFAULT_REGION;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Last successfully applied bucket state.
///
/// No `name` means nothing is under management.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Identity of a managed bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketIdentity {
    pub name: String,
    pub region: String,
    pub accelerated: bool,
}

impl BucketState {
    /// Fully populated state for a deployed bucket
    pub fn deployed(name: &str, region: &str, accelerated: bool) -> Self {
        Self {
            name: Some(name.to_string()),
            region: Some(region.to_string()),
            accelerated: Some(accelerated),
            url: Some(bucket_url(name)),
        }
    }

    pub fn is_managed(&self) -> bool {
        self.name.is_some()
    }

    pub fn region_or_default(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    /// Acceleration mode of the persisted bucket; unknown counts as off
    pub fn is_accelerated(&self) -> bool {
        self.accelerated.unwrap_or(false)
    }

    pub fn identity(&self) -> Option<BucketIdentity> {
        let name = self.name.clone()?;
        Some(BucketIdentity {
            name,
            region: self.region_or_default().to_string(),
            accelerated: self.is_accelerated(),
        })
    }
}

/// Public URL of a bucket
pub fn bucket_url(name: &str) -> String {
    format!("https://{}.s3.amazonaws.com", name)
}

/// JSON file holding one [`BucketState`]
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state; a missing file is an empty state
    pub fn load(&self) -> Result<BucketState> {
        if !self.path.exists() {
            return Ok(BucketState::default());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BucketState::default());
        }

        Ok(serde_json::from_str(&content)?)
    }

    /// Replace the stored state.
    ///
    /// Writes a sibling temp file and renames it over the target, so readers
    /// see either the old or the new snapshot.
    pub fn save(&self, state: &BucketState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    /// Persist the empty state
    pub fn clear(&self) -> Result<()> {
        self.save(&BucketState::default())
    }
}
