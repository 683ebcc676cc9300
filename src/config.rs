//! Configuration toggles, heuristic tables, and the settings file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::selector::SelectorList;

/// The six user-facing toggles. Keys are camelCase on the wire; a missing key
/// reads as `false` and unknown keys are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub lazy_load: bool,
    #[serde(default)]
    pub image_optimization: bool,
    #[serde(default)]
    pub no_animation: bool,
    #[serde(default)]
    pub block_ads: bool,
    #[serde(default)]
    pub save_data: bool,
    #[serde(default)]
    pub preload: bool,
}

impl Default for Config {
    /// Install-time defaults: everything on.
    fn default() -> Self {
        Self {
            lazy_load: true,
            image_optimization: true,
            no_animation: true,
            block_ads: true,
            save_data: true,
            preload: true,
        }
    }
}

impl Config {
    pub fn all_disabled() -> Self {
        Self {
            lazy_load: false,
            image_optimization: false,
            no_animation: false,
            block_ads: false,
            save_data: false,
            preload: false,
        }
    }
}

/// An attribute/value pair that a lazy-load library sets once it has
/// swapped the real source in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusAttr {
    pub name: String,
    pub value: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Keyword and selector tables driving classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Heuristics {
    /// Attributes holding the real image URL, in lookup order.
    pub deferred_src_attrs: Vec<String>,
    pub lazy_loaded_classes: Vec<String>,
    pub lazy_status_attrs: Vec<StatusAttr>,
    /// `sizes` value used when a density srcset is synthesized.
    pub responsive_sizes: String,
    pub container_selectors: Vec<String>,
    pub protected_roles: Vec<String>,
    pub protected_tags: Vec<String>,
    /// Matched as substrings of class and id, and as words of short own text.
    pub protected_keywords: Vec<String>,
    pub protected_attr_substrings: Vec<String>,
    pub protected_attr_prefixes: Vec<String>,
    pub hidden_classes: Vec<String>,
    /// Class-name fragments that suggest an entrance animation.
    pub reveal_class_keywords: Vec<String>,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            deferred_src_attrs: strings(&["data-lazy-src", "data-src", "data-original"]),
            lazy_loaded_classes: strings(&["lazyloaded"]),
            lazy_status_attrs: vec![StatusAttr {
                name: "data-ll-status".into(),
                value: "loaded".into(),
            }],
            responsive_sizes: "(max-width: 768px) 100vw, (max-width: 1200px) 50vw, 33vw".into(),
            container_selectors: strings(&[
                "main",
                "article",
                "section",
                ".content",
                ".post",
                ".article",
                ".product-list",
                ".grid",
                r#"[role="main"]"#,
                r#"[role="article"]"#,
            ]),
            protected_roles: strings(&[
                "menu",
                "menubar",
                "menuitem",
                "navigation",
                "dialog",
                "alertdialog",
            ]),
            protected_tags: strings(&["nav", "dialog", "menu"]),
            protected_keywords: strings(&[
                "menu",
                "nav",
                "dropdown",
                "modal",
                "dialog",
                "popup",
                "popover",
                "overlay",
                "offcanvas",
                "drawer",
                "hamburger",
                "tooltip",
                "lightbox",
            ]),
            protected_attr_substrings: strings(&["menu", "nav", "dropdown", "modal", "dialog"]),
            protected_attr_prefixes: strings(&["data-toggle", "aria-"]),
            hidden_classes: strings(&["hidden", "hide", "invisible", "is-hidden", "d-none"]),
            reveal_class_keywords: strings(&[
                "animate", "aos", "fade", "reveal", "wow", "slide", "zoom", "appear", "entrance",
                "transition", "in-view", "motion",
            ]),
        }
    }
}

impl Heuristics {
    pub fn compile(&self) -> Result<CompiledHeuristics> {
        let containers = SelectorList::parse_all(&self.container_selectors)
            .context("invalid container selector")?;
        Ok(CompiledHeuristics {
            tables: self.clone(),
            containers,
        })
    }
}

/// Heuristics with selector strings parsed once.
#[derive(Debug, Clone)]
pub struct CompiledHeuristics {
    pub tables: Heuristics,
    pub containers: SelectorList,
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout_ms() -> u64 {
    2000
}

fn default_viewport_margin_px() -> f32 {
    200.0
}

fn default_worker_chunk_size() -> usize {
    32
}

/// Everything a session needs besides the page itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub heuristics: Heuristics,
    /// Enables the force-visible rules for animation-gated content.
    #[serde(default = "default_true")]
    pub reveal_hidden: bool,
    /// Upper bound on how long a scheduled pass waits for an idle period.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Vertical root margin for viewport containers.
    #[serde(default = "default_viewport_margin_px")]
    pub viewport_margin_px: f32,
    #[serde(default = "default_worker_chunk_size")]
    pub worker_chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config: Config::default(),
            heuristics: Heuristics::default(),
            reveal_hidden: default_true(),
            idle_timeout_ms: default_idle_timeout_ms(),
            viewport_margin_px: default_viewport_margin_px(),
            worker_chunk_size: default_worker_chunk_size(),
        }
    }
}

/// Default settings location: `~/.pagelift/settings.json`
pub fn settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pagelift")
        .join("settings.json")
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json).context("invalid settings JSON")?;
        Ok(settings.normalized())
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings = Self::from_json(&json)
            .with_context(|| format!("failed to parse settings in {}", path.display()))?;
        info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn normalized(mut self) -> Self {
        self.worker_chunk_size = self.worker_chunk_size.max(1);
        if !self.viewport_margin_px.is_finite() || self.viewport_margin_px < 0.0 {
            self.viewport_margin_px = default_viewport_margin_px();
        }
        self
    }
}
