//! # Profiler Configuration
//!
//! TOML-backed settings with a default for every field, so an empty or
//! partial file is valid.

use serde::Deserialize;
use std::path::Path;

use xp_core::event::DEFAULT_SEQUENCE_FIELD;
use xp_core::ViewConfig;

use crate::error::Result;
use crate::template::SessionTemplate;

pub const DEFAULT_BUFFER_CAPACITY: usize = 100_000;

#[derive(Deserialize, Clone, Debug)]
pub struct ProfilerConfig {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_template")]
    pub default_template: String,
    #[serde(default = "default_view")]
    pub default_view: String,
    #[serde(default = "default_sequence_field")]
    pub sequence_field: String,
    /// Fields the event ring keeps equality indexes for.
    #[serde(default = "default_index_fields")]
    pub index_fields: Vec<String>,
    #[serde(default)]
    pub replay: ReplayConfig,
    /// Extra view templates; a name matching a built-in replaces it.
    #[serde(default)]
    pub views: Vec<ViewConfig>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            default_template: default_template(),
            default_view: default_view(),
            sequence_field: default_sequence_field(),
            index_fields: default_index_fields(),
            replay: ReplayConfig::default(),
            views: Vec::new(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ReplayConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}
fn default_template() -> String {
    "Standard_OnPrem".into()
}
fn default_view() -> String {
    "Standard View".into()
}
fn default_sequence_field() -> String {
    DEFAULT_SEQUENCE_FIELD.into()
}
pub(crate) fn default_index_fields() -> Vec<String> {
    vec!["eventClass".into(), "databaseName".into(), "spid".into()]
}
fn default_batch_size() -> usize {
    500
}

impl ProfilerConfig {
    /// Read `path` if it exists, defaults otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        if config.buffer_capacity == 0 {
            tracing::warn!(
                "buffer_capacity must be positive, using {}",
                default_buffer_capacity()
            );
            config.buffer_capacity = default_buffer_capacity();
        }
        if config.replay.batch_size == 0 {
            config.replay.batch_size = default_batch_size();
        }
        Ok(config)
    }

    /// Built-in views overlaid with the configured ones.
    pub fn views(&self) -> Vec<ViewConfig> {
        let mut views = ViewConfig::builtin();
        for custom in &self.views {
            match views.iter_mut().find(|v| v.name == custom.name) {
                Some(existing) => *existing = custom.clone(),
                None => views.push(custom.clone()),
            }
        }
        views
    }

    pub fn view(&self, name: &str) -> Option<ViewConfig> {
        self.views()
            .into_iter()
            .find(|v| v.name.eq_ignore_ascii_case(name))
    }

    pub fn template(&self) -> Option<SessionTemplate> {
        SessionTemplate::find(&self.default_template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ProfilerConfig::parse("").unwrap();
        assert_eq!(config.buffer_capacity, 100_000);
        assert_eq!(config.sequence_field, "event_sequence");
        assert_eq!(config.replay.batch_size, 500);
        assert_eq!(config.template().map(|t| t.name), Some("Standard_OnPrem".into()));
    }

    #[test]
    fn test_zero_capacity_is_replaced() {
        let config = ProfilerConfig::parse("buffer_capacity = 0").unwrap();
        assert_eq!(config.buffer_capacity, 100_000);
    }

    #[test]
    fn test_custom_views_overlay_builtins() {
        let config = ProfilerConfig::parse(
            r#"
            default_view = "Mine"

            [[views]]
            name = "Mine"
            columns = [{ name = "Text", eventFields = ["textData"] }]

            [[views]]
            name = "TSQL View"
            columns = []
            "#,
        )
        .unwrap();
        let views = config.views();
        assert_eq!(views.len(), 4);
        assert!(config.view("tsql view").unwrap().columns.is_empty());
        let mine = config.view(&config.default_view).unwrap();
        assert_eq!(mine.columns[0].event_fields, vec!["textData"]);
        assert!(mine.columns[0].visible);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buffer_capacity = 250\n[replay]\nbatch_size = 10").unwrap();
        let config = ProfilerConfig::load(file.path()).unwrap();
        assert_eq!(config.buffer_capacity, 250);
        assert_eq!(config.replay.batch_size, 10);

        let missing = ProfilerConfig::load(Path::new("/nonexistent/xp.toml")).unwrap();
        assert_eq!(missing.buffer_capacity, 100_000);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "buffer_capacity = \"lots\"").unwrap();
        assert!(ProfilerConfig::load(bad.path()).is_err());
    }
}
