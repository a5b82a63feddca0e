//! Configuration for darkroom paths and operating limits.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DARKROOM_HOME, DARKROOM_INBOX)
//! 2. Config file (.darkroom/config.yaml)
//! 3. Defaults (~/.darkroom)
//!
//! Config file discovery:
//! - Searches current directory and parents for .darkroom/config.yaml
//! - Paths in the config file are relative to the config file's parent
//!
//! Platform credentials are never read from the YAML; adapters take them
//! from environment variables and fail fast at construction.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub budget: Option<BudgetConfig>,
    #[serde(default)]
    pub costs: Option<CostsConfig>,
    #[serde(default)]
    pub batch: Option<BatchConfig>,
    #[serde(default)]
    pub products: Vec<ProductSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Agent state directory (relative to config file)
    pub home: Option<String>,
    /// Photo inbox scanned by the import stage (relative to config file)
    pub photo_inbox: Option<String>,
    /// Public gallery root URL (pin link fallback)
    pub gallery_root: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Daily spend cap. Absent/null means no cap; an explicit 0.0 blocks
    /// every paid action.
    pub daily_budget_usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CostsConfig {
    pub vision_usd: Option<f64>,
    pub copy_usd: Option<f64>,
    pub publish_usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub concurrency: Option<usize>,
    pub timeout_seconds: Option<u64>,
}

/// One print variant template; sku_gen stamps these out per photo
#[derive(Debug, Clone, Deserialize)]
pub struct ProductSpec {
    pub size: String,
    pub paper: String,
    pub cost_usd: f64,
    pub min_price_usd: f64,
    pub retail_usd: f64,
}

/// Estimated per-action costs used by safety checks and reservations
#[derive(Debug, Clone, Copy)]
pub struct CostTable {
    pub vision_usd: f64,
    pub copy_usd: f64,
    pub publish_usd: f64,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            vision_usd: 0.02,
            copy_usd: 0.03,
            publish_usd: 0.01,
        }
    }
}

/// Batch coordinator settings
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub concurrency: usize,
    pub timeout_seconds: Option<u64>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout_seconds: None,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the agent state directory
    pub home: PathBuf,
    /// Absolute path to the photo inbox
    pub photo_inbox: PathBuf,
    /// Public gallery root URL
    pub gallery_root: String,
    /// Daily budget cap (None = no cap, Some(0.0) = freeze)
    pub daily_budget_usd: Option<f64>,
    /// Estimated action costs
    pub costs: CostTable,
    /// Batch settings
    pub batch: BatchSettings,
    /// Print variant templates
    pub products: Vec<ProductSpec>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn audit_log_path(&self) -> PathBuf {
        self.home.join("audit.jsonl")
    }

    pub fn content_ledger_path(&self) -> PathBuf {
        self.home.join("content.jsonl")
    }

    pub fn budget_snapshot_path(&self) -> PathBuf {
        self.home.join("budget.json")
    }

    pub fn safety_snapshot_path(&self) -> PathBuf {
        self.home.join("safety.json")
    }

    pub fn sku_catalog_path(&self) -> PathBuf {
        self.home.join("skus.json")
    }

    pub fn last_run_path(&self) -> PathBuf {
        self.home.join("last_run.json")
    }

    pub fn pipeline_lock_path(&self) -> PathBuf {
        self.home.join("pipeline.lock")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".darkroom").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(&path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

const DEFAULT_GALLERY_ROOT: &str = "https://photos.example.com/gallery";

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".darkroom");

    let config_file = find_config_file();

    let mut resolved = ResolvedConfig {
        home: default_home.clone(),
        photo_inbox: default_home.join("inbox"),
        gallery_root: DEFAULT_GALLERY_ROOT.to_string(),
        daily_budget_usd: None,
        costs: CostTable::default(),
        batch: BatchSettings::default(),
        products: Vec::new(),
        config_file: config_file.clone(),
    };

    if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // Base directory is the parent of .darkroom/
        let base_dir = config_path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));

        if let Some(ref home) = config.paths.home {
            // home is relative to the .darkroom/ directory
            let darkroom_dir = config_path.parent().unwrap_or(Path::new("."));
            resolved.home = resolve_path(darkroom_dir, home);
        }
        if let Some(ref inbox) = config.paths.photo_inbox {
            resolved.photo_inbox = resolve_path(base_dir, inbox);
        } else {
            resolved.photo_inbox = resolved.home.join("inbox");
        }
        if let Some(ref root) = config.paths.gallery_root {
            resolved.gallery_root = root.clone();
        }

        if let Some(ref budget) = config.budget {
            resolved.daily_budget_usd = budget.daily_budget_usd;
        }

        if let Some(ref costs) = config.costs {
            let defaults = CostTable::default();
            resolved.costs = CostTable {
                vision_usd: costs.vision_usd.unwrap_or(defaults.vision_usd),
                copy_usd: costs.copy_usd.unwrap_or(defaults.copy_usd),
                publish_usd: costs.publish_usd.unwrap_or(defaults.publish_usd),
            };
        }

        if let Some(ref batch) = config.batch {
            resolved.batch = BatchSettings {
                concurrency: batch.concurrency.unwrap_or(4),
                timeout_seconds: batch.timeout_seconds,
            };
        }

        resolved.products = config.products;
    }

    // Environment variables beat the config file
    if let Ok(env_home) = std::env::var("DARKROOM_HOME") {
        resolved.home = PathBuf::from(env_home);
    }
    if let Ok(env_inbox) = std::env::var("DARKROOM_INBOX") {
        resolved.photo_inbox = PathBuf::from(env_inbox);
    }

    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let darkroom_dir = temp.path().join(".darkroom");
        std::fs::create_dir_all(&darkroom_dir).unwrap();

        let config_path = darkroom_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
  photo_inbox: ../inbox
  gallery_root: https://prints.example.com
budget:
  daily_budget_usd: 25.0
costs:
  vision_usd: 0.05
batch:
  concurrency: 2
  timeout_seconds: 90
products:
  - size: 8x10
    paper: matte
    cost_usd: 6.0
    min_price_usd: 18.0
    retail_usd: 30.0
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./".to_string()));
        assert_eq!(
            config.budget.as_ref().unwrap().daily_budget_usd,
            Some(25.0)
        );
        assert_eq!(config.costs.as_ref().unwrap().vision_usd, Some(0.05));
        assert_eq!(config.batch.as_ref().unwrap().concurrency, Some(2));
        assert_eq!(config.products.len(), 1);
        assert_eq!(config.products[0].size, "8x10");
    }

    #[test]
    fn test_absent_budget_means_no_cap() {
        let temp = TempDir::new().unwrap();
        let darkroom_dir = temp.path().join(".darkroom");
        std::fs::create_dir_all(&darkroom_dir).unwrap();

        let config_path = darkroom_dir.join("config.yaml");
        std::fs::write(&config_path, "version: \"1.0\"\n").unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert!(config.budget.is_none());

        // And an explicit zero is a zero cap, not "unset"
        std::fs::write(
            &config_path,
            "version: \"1.0\"\nbudget:\n  daily_budget_usd: 0.0\n",
        )
        .unwrap();
        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.budget.unwrap().daily_budget_usd, Some(0.0));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/studio");

        assert_eq!(
            resolve_path(&base, "./inbox"),
            PathBuf::from("/home/user/studio/inbox")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_state_file_paths() {
        let config = ResolvedConfig {
            home: PathBuf::from("/test/.darkroom"),
            photo_inbox: PathBuf::from("/test/inbox"),
            gallery_root: DEFAULT_GALLERY_ROOT.to_string(),
            daily_budget_usd: None,
            costs: CostTable::default(),
            batch: BatchSettings::default(),
            products: Vec::new(),
            config_file: None,
        };

        assert_eq!(
            config.audit_log_path(),
            PathBuf::from("/test/.darkroom/audit.jsonl")
        );
        assert_eq!(
            config.pipeline_lock_path(),
            PathBuf::from("/test/.darkroom/pipeline.lock")
        );
    }
}
