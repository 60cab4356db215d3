use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-repo override file, looked up at the repository root
pub const LOCAL_CONFIG_FILE: &str = ".radicle-patches.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpvConfig {
    #[serde(default)]
    pub httpd: HttpdConfig,
    #[serde(default)]
    pub cli: CliConfig,
    #[serde(default)]
    pub diff: DiffConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// [httpd] section: where the review API lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpdConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pre-issued session token sent with mutating requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

/// [cli] section: external binaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default = "default_rad")]
    pub rad: String,
    #[serde(default = "default_git")]
    pub git: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// [diff] section: how to open two file versions side by side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffConfig {
    #[serde(default = "default_diff_cmd")]
    pub command: String,
    /// `{old}` and `{new}` are replaced with the snapshot paths
    #[serde(default = "default_diff_args")]
    pub args: Vec<String>,
    /// Root for file snapshots; defaults to `<tmpdir>/radicle`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_true")]
    pub show_tooltip: bool,
    #[serde(default = "default_tree_width")]
    pub tree_width: u16,
}

fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    "http://127.0.0.1:8080/api/v1".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_rad() -> String {
    "rad".into()
}

fn default_git() -> String {
    "git".into()
}

fn default_diff_cmd() -> String {
    "code".into()
}

fn default_diff_args() -> Vec<String> {
    vec!["--diff".into(), "{old}".into(), "{new}".into()]
}

fn default_tree_width() -> u16 {
    60
}

impl Default for HttpdConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            session_token: None,
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            rad: default_rad(),
            git: default_git(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            command: default_diff_cmd(),
            args: default_diff_args(),
            temp_root: None,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_tooltip: true,
            tree_width: default_tree_width(),
        }
    }
}

impl DiffConfig {
    pub fn snapshot_root(&self) -> PathBuf {
        self.temp_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("radicle"))
    }
}

/// `~/.config/radicle-patches/config.toml`
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("radicle-patches").join("config.toml"))
}

pub fn local_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(LOCAL_CONFIG_FILE)
}

/// Load config by merging global defaults with per-repo overrides.
/// Priority: per-repo `.radicle-patches.toml` > global config > built-in defaults.
/// Merging is deep: individual keys within a section override independently.
pub fn load_config(repo_root: &Path) -> RpvConfig {
    load_config_from(global_config_path().as_deref(), &local_config_path(repo_root))
}

pub fn load_config_from(global: Option<&Path>, local: &Path) -> RpvConfig {
    let global_table = global.and_then(read_table);
    let local_table = read_table(local);

    let merged = match (global_table, local_table) {
        (Some(mut global), Some(local)) => {
            deep_merge(&mut global, local);
            global
        }
        (Some(global), None) => global,
        (None, Some(local)) => local,
        (None, None) => return RpvConfig::default(),
    };

    match toml::Value::Table(merged).try_into() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("ignoring invalid configuration: {}", e);
            RpvConfig::default()
        }
    }
}

fn read_table(path: &Path) -> Option<toml::Table> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<toml::Table>(&content) {
        Ok(table) => Some(table),
        Err(e) => {
            tracing::warn!(path = %path.display(), "failed to parse config: {}", e);
            None
        }
    }
}

/// Recursively merge `overlay` into `base`. Overlay values win; nested tables are merged recursively.
fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                deep_merge(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Save config to the global config dir.
pub fn save_config(config: &RpvConfig) -> Result<()> {
    let path = global_config_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    save_config_to(config, &path)
}

pub fn save_config_to(config: &RpvConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
