use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local, NaiveDate, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::normalize_email;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// E-mail of the logged in user. Every budget permission is checked against it.
    #[serde(default)]
    pub user_email: Option<String>,

    /// Budget each user works on when `--budget` is not given, keyed by e-mail.
    #[serde(default)]
    pub current_budgets: BTreeMap<String, Uuid>,

    /// Single install-wide selection written by older versions; folded into
    /// `current_budgets` on load.
    #[serde(default, skip_serializing)]
    current_budget: Option<Uuid>,

    #[serde(default = "default_currency")]
    pub default_currency: String,

    #[serde(default = "default_cutoff_day")]
    pub default_cutoff_day: u32,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_cutoff_day() -> u32 {
    1
}

impl AppConfig {
    pub fn selected_budget(&self, user: &str) -> Option<Uuid> {
        self.current_budgets.get(user).copied()
    }

    pub fn select_budget(&mut self, user: &str, budget_id: Uuid) {
        self.current_budgets.insert(user.to_string(), budget_id);
    }

    pub fn clear_selection(&mut self, user: &str) {
        self.current_budgets.remove(user);
    }

    /// Drops `budget_id` from every user's selection.
    pub fn forget_budget(&mut self, budget_id: Uuid) {
        self.current_budgets.retain(|_, id| *id != budget_id);
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            user_email: None,
            current_budgets: BTreeMap::new(),
            current_budget: None,
            default_currency: default_currency(),
            default_cutoff_day: default_cutoff_day(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("manejate.sqlite3")
    }
}

pub fn app_paths(override_home: Option<PathBuf>) -> Result<AppPaths> {
    if let Some(home) = override_home {
        return Ok(AppPaths {
            config_dir: home.join("config"),
            data_dir: home.join("data"),
        });
    }

    let proj = ProjectDirs::from("com", "manejate", "manejate")
        .context("Failed to resolve platform directories")?;

    Ok(AppPaths {
        config_dir: proj.config_dir().to_path_buf(),
        data_dir: proj.data_dir().to_path_buf(),
    })
}

pub fn load_or_init_config(paths: &AppPaths) -> Result<(AppConfig, PathBuf)> {
    fs::create_dir_all(&paths.config_dir)
        .with_context(|| format!("Failed to create config dir {}", paths.config_dir.display()))?;

    let cfg_path = paths.config_dir.join("config.json");
    if !cfg_path.exists() {
        let cfg = AppConfig::default();
        write_config(&cfg_path, &cfg)?;
        return Ok((cfg, cfg_path));
    }

    let raw = fs::read_to_string(&cfg_path)
        .with_context(|| format!("Failed to read {}", cfg_path.display()))?;
    let mut cfg: AppConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", cfg_path.display()))?;

    // Older configs may hold an unnormalized e-mail or a cutoff out of range.
    let mut changed = false;
    if let Some(email) = cfg.user_email.clone() {
        let normalized = normalize_email(&email);
        if normalized != email {
            cfg.user_email = Some(normalized);
            changed = true;
        }
    }
    if let Some(legacy) = cfg.current_budget.take() {
        if let Some(email) = cfg.user_email.clone() {
            cfg.current_budgets.entry(email).or_insert(legacy);
        }
        changed = true;
    }
    if !(1..=31).contains(&cfg.default_cutoff_day) {
        cfg.default_cutoff_day = default_cutoff_day();
        changed = true;
    }
    if changed {
        write_config(&cfg_path, &cfg)?;
    }

    Ok((cfg, cfg_path))
}

pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Resolves who is acting: `--user` / `MANEJATE_USER` first, then the logged in user.
pub fn current_user(cfg: &AppConfig, override_user: Option<&str>) -> Result<String> {
    if let Some(user) = override_user {
        let user = normalize_email(user);
        if !user.is_empty() {
            return Ok(user);
        }
    }
    cfg.user_email
        .clone()
        .ok_or_else(|| anyhow!("Not logged in. Run: manejate login <email>"))
}

/// Reference date for billing cycles and recurring generation.
pub fn today(override_today: Option<&str>) -> Result<NaiveDate> {
    match override_today {
        Some(raw) => parse_date(raw).context("Invalid --today"),
        None => Ok(Local::now().date_naive()),
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{raw}'. Expected YYYY-MM-DD"))
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
