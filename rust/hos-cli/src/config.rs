//! Project configuration from `hos.toml`.
//!
//! Searches the current directory then its ancestors, falling back to
//! `~/.config/hos/hos.toml` when no project-level file exists.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use hos_core::strategy::{Mode, StrengthLevel};

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct HosConfig {
    /// Per-user seed; every random choice of a protection run derives from it.
    pub genome: Option<u64>,
    /// Strategy file (TOML or JSON), relative to the config file.
    pub strategy: Option<PathBuf>,
    pub mode: Option<Mode>,
    pub level: Option<StrengthLevel>,
}

impl HosConfig {
    /// Nearest `hos.toml`, with relative paths resolved against its directory.
    /// Returns `Default` when no file is found.
    pub fn load() -> Self {
        Self::find_and_load()
            .map(|(_path, cfg)| cfg)
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
        let mut cfg: Self = toml::from_str(&content)
            .map_err(|e| format!("invalid toml in '{}': {}", path.display(), e))?;
        if let (Some(strategy), Some(dir)) = (cfg.strategy.as_mut(), path.parent()) {
            if strategy.is_relative() {
                *strategy = dir.join(&*strategy);
            }
        }
        Ok(cfg)
    }

    fn find_and_load() -> Option<(PathBuf, Self)> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let candidate = dir.join("hos.toml");
            if candidate.exists() {
                let cfg = Self::load_from(&candidate).ok()?;
                return Some((candidate, cfg));
            }
            if !dir.pop() {
                break;
            }
        }
        let global = home_dir()?.join(".config").join("hos").join("hos.toml");
        if global.exists() {
            let cfg = Self::load_from(&global).ok()?;
            return Some((global, cfg));
        }
        None
    }

    pub fn default_template() -> &'static str {
        r#"# HOS project configuration

# Seed for every random choice; keep it private to keep builds distinct.
# genome = 1234567890

# Either a strategy file...
# strategy = "strategy.toml"

# ...or a preset.
mode = "balanced"
level = "medium"
"#
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
