use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SOURCE_GLOB: &str = "_sample_pages/*.wiki";
pub const DEFAULT_OUTPUT_DIR: &str = "out";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub convert: ConvertSection,
    #[serde(default)]
    pub confluence: ConfluenceSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConvertSection {
    pub source_glob: Option<String>,
    pub output_dir: Option<String>,
    #[serde(default)]
    pub strip_residual: bool,
    #[serde(default)]
    pub render_html: bool,
    #[serde(default)]
    pub verify: bool,
    #[serde(default)]
    pub strict: bool,
}

/// Publishing target. The API token is only read from `CONFLUENCE_API_TOKEN`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConfluenceSection {
    pub url: Option<String>,
    pub space: Option<String>,
    pub user: Option<String>,
    pub parent_id: Option<String>,
}

impl ToolConfig {
    /// Resolve the source pattern: env WIKIDMARK_SOURCE_GLOB > config > DEFAULT_SOURCE_GLOB.
    pub fn source_glob(&self) -> String {
        env_setting("WIKIDMARK_SOURCE_GLOB")
            .or_else(|| self.convert.source_glob.clone())
            .unwrap_or_else(|| DEFAULT_SOURCE_GLOB.to_string())
    }

    /// Resolve the output directory: env WIKIDMARK_OUTPUT_DIR > config > DEFAULT_OUTPUT_DIR.
    pub fn output_dir(&self) -> String {
        env_setting("WIKIDMARK_OUTPUT_DIR")
            .or_else(|| self.convert.output_dir.clone())
            .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string())
    }

    pub fn confluence_url(&self) -> Option<String> {
        env_setting("CONFLUENCE_URL").or_else(|| non_blank(self.confluence.url.as_deref()))
    }

    pub fn confluence_space(&self) -> Option<String> {
        env_setting("CONFLUENCE_SPACE").or_else(|| non_blank(self.confluence.space.as_deref()))
    }

    pub fn confluence_user(&self) -> Option<String> {
        env_setting("CONFLUENCE_USER").or_else(|| non_blank(self.confluence.user.as_deref()))
    }

    pub fn confluence_parent_id(&self) -> Option<String> {
        env_setting("CONFLUENCE_PARENT_ID")
            .or_else(|| non_blank(self.confluence.parent_id.as_deref()))
    }

    pub fn confluence_api_token(&self) -> Option<String> {
        env_setting("CONFLUENCE_API_TOKEN")
    }
}

/// Load and parse a ToolConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_setting(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .and_then(|value| non_blank(Some(value.as_str())))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
