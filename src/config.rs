use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_API_URL: &str = "http://localhost:5001/api";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    Local,
    Cloud,
}

impl std::str::FromStr for StorageMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(StorageMode::Local),
            "cloud" => Ok(StorageMode::Cloud),
            other => Err(anyhow!("Unknown storage mode '{}' (expected local or cloud)", other)),
        }
    }
}

/// Settings from `offerloop.toml`, overridable through `OFFERLOOP_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub scout_url: Option<String>,
    pub firebase_project: Option<String>,
    pub storage: StorageMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            scout_url: None,
            firebase_project: None,
            storage: StorageMode::Local,
        }
    }
}

impl Config {
    pub fn path() -> PathBuf {
        directories::ProjectDirs::from("ai", "offerloop", "offerloop")
            .map(|dirs| dirs.config_dir().join("offerloop.toml"))
            .unwrap_or_else(|| PathBuf::from("offerloop.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::path();
        let config = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.with_overrides(|name| std::env::var(name).ok())
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `OFFERLOOP_*` values from `lookup`; empty values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("OFFERLOOP_API_URL") {
            self.api_url = url;
        }
        if let Some(url) = get("OFFERLOOP_SCOUT_URL") {
            self.scout_url = Some(url);
        }
        if let Some(project) = get("OFFERLOOP_FIREBASE_PROJECT") {
            self.firebase_project = Some(project);
        }
        if let Some(mode) = get("OFFERLOOP_STORAGE") {
            self.storage = mode.parse()?;
        }
        Ok(self)
    }

    pub fn api_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn scout_url(&self) -> String {
        self.scout_url
            .clone()
            .unwrap_or_else(|| format!("{}/scout-suggestions", self.api_url()))
    }

    /// Project id for cloud storage; an error when cloud mode has none.
    pub fn cloud_project(&self) -> Result<Option<&str>> {
        match (self.storage, self.firebase_project.as_deref()) {
            (StorageMode::Local, _) => Ok(None),
            (StorageMode::Cloud, Some(project)) if !project.trim().is_empty() => Ok(Some(project)),
            (StorageMode::Cloud, _) => Err(anyhow!(
                "storage = \"cloud\" needs firebase_project in {} or OFFERLOOP_FIREBASE_PROJECT",
                Self::path().display()
            )),
        }
    }
}
