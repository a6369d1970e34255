//! Layered, section-scoped configuration.
//!
//! Mirrors the storage engine ancestor's `db::config::Config` (a plain struct with a
//! hand-written `Default`), but split into the four sections the spec names: `cli`,
//! `planner`, `jupyterint`, `experiment`. A `config.toml` next to the session root overrides
//! individual fields; anything absent keeps its compiled-in default, and an unrecognized
//! top-level section is a hard error rather than silently ignored.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KishuError, Result};

/// Environment variable gating deterministic commit ids and disabling notebook-save I/O.
pub const TEST_MODE_ENV: &str = "KISHU_TEST_MODE";

/// CLI-facing presentation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Print full error chains instead of a single `Kishu internal error (<Kind>)` line.
    pub verbose: bool,
    /// Show ancestry as a text graph in `log` by default.
    pub graph_by_default: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            graph_by_default: false,
        }
    }
}

/// Planner cost-model tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Store only the delta of active VSes relative to the nearest ancestor, instead of
    /// all active VSes at every commit.
    pub incremental_store: bool,
    /// Assumed cost, in the same units as recorded runtimes, of serializing one byte.
    pub serialize_cost_per_byte: f64,
    /// Assumed cost of deserializing one byte.
    pub deserialize_cost_per_byte: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            incremental_store: true,
            serialize_cost_per_byte: 1e-7,
            deserialize_cost_per_byte: 1e-7,
        }
    }
}

/// Host (Jupyter-like) integration behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JupyterIntConfig {
    /// Whether notebook-save polling and file I/O are enabled.
    pub notebook_save_enabled: bool,
    /// Backoff start, in milliseconds, for notebook-save polling.
    pub notebook_save_backoff_start_ms: u64,
    /// Backoff cap, in milliseconds, for notebook-save polling.
    pub notebook_save_backoff_cap_ms: u64,
    /// Whether `checkout(..., skip_notebook=true)` auto-commits the resulting live state.
    pub auto_commit_on_skip_notebook: bool,
}

impl Default for JupyterIntConfig {
    fn default() -> Self {
        Self {
            notebook_save_enabled: true,
            notebook_save_backoff_start_ms: 200,
            notebook_save_backoff_cap_ms: 1000,
            auto_commit_on_skip_notebook: true,
        }
    }
}

/// Experimental / test-mode switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Use deterministic `"<session>:<counter>"` commit ids instead of random hex ids.
    pub deterministic_ids: bool,
    /// Enable the `fegraph`/`fecommit` frontend-oriented JSON commands.
    pub frontend_commands: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            deterministic_ids: false,
            frontend_commands: false,
        }
    }
}

/// Top-level configuration, one section per collaborator named in the spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CLI presentation section.
    pub cli: CliConfig,
    /// Planner cost-model section.
    pub planner: PlannerConfig,
    /// Host integration section.
    pub jupyterint: JupyterIntConfig,
    /// Experimental switches section.
    pub experiment: ExperimentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cli: CliConfig::default(),
            planner: PlannerConfig::default(),
            jupyterint: JupyterIntConfig::default(),
            experiment: ExperimentConfig::default(),
        }
    }
}

impl Config {
    /// Loads defaults, then applies `KISHU_TEST_MODE` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_test_mode_env();
        config
    }

    /// Loads a TOML file at `path`, merging it onto defaults, then applies
    /// `KISHU_TEST_MODE`. A missing file is equivalent to an empty file (pure defaults).
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            config.merge_toml(&text)?;
        }
        config.apply_test_mode_env();
        Ok(config)
    }

    fn apply_test_mode_env(&mut self) {
        if std::env::var(TEST_MODE_ENV).is_ok() {
            self.experiment.deterministic_ids = true;
            self.jupyterint.notebook_save_enabled = false;
        }
    }

    /// Merges a TOML document's `[cli]`, `[planner]`, `[jupyterint]`, `[experiment]` tables
    /// onto `self`, field by field. Rejects any top-level table not in that set.
    fn merge_toml(&mut self, text: &str) -> Result<()> {
        let raw: BTreeMap<String, toml::Value> = toml::from_str(text)
            .map_err(|e| KishuError::Config(format!("invalid config.toml: {e}")))?;

        const KNOWN_SECTIONS: &[&str] = &["cli", "planner", "jupyterint", "experiment"];
        for key in raw.keys() {
            if !KNOWN_SECTIONS.contains(&key.as_str()) {
                return Err(KishuError::Config(format!(
                    "unrecognized config section {key:?}"
                )));
            }
        }

        if let Some(value) = raw.get("cli") {
            self.cli = merge_section(&self.cli, value)?;
        }
        if let Some(value) = raw.get("planner") {
            self.planner = merge_section(&self.planner, value)?;
        }
        if let Some(value) = raw.get("jupyterint") {
            self.jupyterint = merge_section(&self.jupyterint, value)?;
        }
        if let Some(value) = raw.get("experiment") {
            self.experiment = merge_section(&self.experiment, value)?;
        }
        Ok(())
    }
}

/// Merges a partial TOML table onto a section's current value by round-tripping through
/// `serde_json::Value`: start from the section encoded as JSON, overlay the TOML table's
/// keys on top, then decode back into the section type. Fields absent from the TOML table
/// keep the base value (the default), and unknown fields inside a known section are
/// rejected by `serde`'s normal deny-unknown-fields behavior being left to the type itself.
fn merge_section<T>(base: &T, overlay: &toml::Value) -> Result<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    let mut base_json = serde_json::to_value(base)
        .map_err(|e| KishuError::Config(format!("internal config encode error: {e}")))?;
    let overlay_json = serde_json::to_value(overlay)
        .map_err(|e| KishuError::Config(format!("invalid config.toml value: {e}")))?;
    if let (Some(base_obj), Some(overlay_obj)) = (base_json.as_object_mut(), overlay_json.as_object())
    {
        for (k, v) in overlay_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(base_json)
        .map_err(|e| KishuError::Config(format!("invalid config section: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_incremental_store_enabled() {
        let config = Config::default();
        assert!(config.planner.incremental_store);
        assert!(!config.experiment.deterministic_ids);
    }

    #[test]
    fn merge_overrides_only_named_fields() {
        let mut config = Config::default();
        config
            .merge_toml("[planner]\nincremental_store = false\n")
            .unwrap();
        assert!(!config.planner.incremental_store);
        // Untouched field keeps its default.
        assert_eq!(
            config.planner.serialize_cost_per_byte,
            PlannerConfig::default().serialize_cost_per_byte
        );
    }

    #[test]
    fn unknown_section_is_rejected() {
        let mut config = Config::default();
        let err = config.merge_toml("[bogus]\nfoo = 1\n").unwrap_err();
        assert!(matches!(err, KishuError::Config(_)));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }
}
