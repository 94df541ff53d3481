//! Layered configuration
//!
//! Settings are kept per protocol section (`HTTP`, `SSH`, `PowerDNS`, ...).
//! Every registered updater contributes a baked-in default section; a YAML
//! file, when present, is deep-merged on top of those defaults:
//!
//! - section names match case-insensitively (`Http` merges into `HTTP`)
//! - nested mappings merge key by key
//! - any other value of the later layer replaces the earlier one
//!
//! Updaters read their section through [`Config::settings`], which
//! deserializes it into the updater's own typed settings struct.
//!
//! Besides the file-backed settings the config carries a small override
//! table mapping a *source* protocol to the *target* protocol a caller asked
//! for explicitly (`--target`). Indirection updaters consult it through
//! [`Config::target_protocol`] to learn where to delegate.

use crate::error::{Error, Result};
use crate::registry::UpdaterRegistry;
use crate::request::DEFAULT_PROTOCOL;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Key of the global default protocol
pub const DEFAULT_KEY: &str = "Default";

/// Key of the per-section downstream protocol
pub const TARGET_KEY: &str = "Target";

/// Protocol used when neither the caller nor the file names one
pub const BUILTIN_DEFAULT_PROTOCOL: &str = "PowerDNS";

/// Config file looked up when the requested one does not exist
pub const SYSTEM_CONFIG_FILE: &str = "/etc/dnsupdater.yaml";

/// Merge `overlay` into `base` recursively
///
/// Nested mappings merge key by key; for every other value the overlay wins.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, new_value) in overlay {
                let merged = match base.remove(&key) {
                    Some(old_value @ Value::Object(_)) => deep_merge(old_value, new_value),
                    _ => new_value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Process configuration
#[derive(Debug)]
pub struct Config {
    /// Merged settings, one entry per section
    settings: Map<String, Value>,

    /// Explicit source → target protocol overrides
    target_protocols: RwLock<HashMap<String, String>>,

    /// File the loaded layer came from
    source: Option<PathBuf>,
}

impl Config {
    /// Build a config from the default layer only
    pub fn new(defaults: Map<String, Value>) -> Self {
        Self::from_layers(defaults, None)
    }

    /// Build a config from the default layer and an optional loaded layer
    ///
    /// A loaded layer that is not a mapping contributes nothing.
    pub fn from_layers(defaults: Map<String, Value>, loaded: Option<Value>) -> Self {
        let mut base = Map::new();
        base.insert(
            DEFAULT_KEY.to_string(),
            Value::String(BUILTIN_DEFAULT_PROTOCOL.to_string()),
        );
        let mut merged = deep_merge(Value::Object(base), Value::Object(defaults));

        if let Some(Value::Object(loaded)) = loaded {
            let loaded = match &merged {
                Value::Object(base) => align_section_keys(base, loaded),
                _ => loaded,
            };
            merged = deep_merge(merged, Value::Object(loaded));
        }

        let settings = match merged {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Self {
            settings,
            target_protocols: RwLock::new(HashMap::new()),
            source: None,
        }
    }

    /// Load the YAML layer from `path` and merge it over `defaults`
    ///
    /// A relative path is resolved against the working directory. When the
    /// file does not exist, [`SYSTEM_CONFIG_FILE`] is tried instead; when that
    /// is missing too, only the defaults apply.
    pub fn load(path: Option<&Path>, defaults: Map<String, Value>) -> Result<Self> {
        let Some(path) = path.and_then(resolve_config_path) else {
            tracing::debug!("No config file found, using defaults");
            return Ok(Self::new(defaults));
        };

        let text = std::fs::read_to_string(&path)?;
        let loaded: Option<Value> = if text.trim().is_empty() {
            None
        } else {
            Some(serde_yaml::from_str(&text).map_err(|e| {
                Error::config(format!("Failed to parse {}: {}", path.display(), e))
            })?)
        };

        tracing::debug!("Loaded config from {}", path.display());

        let mut config = Self::from_layers(defaults, loaded);
        config.source = Some(path);
        Ok(config)
    }

    /// File the config was loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The configured global default protocol (lowercase, never `default`)
    pub fn default_protocol(&self) -> String {
        let protocol = self
            .settings
            .get(DEFAULT_KEY)
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case(DEFAULT_PROTOCOL))
            .unwrap_or(BUILTIN_DEFAULT_PROTOCOL);

        protocol.to_lowercase()
    }

    /// Raw settings of a section, matched case-insensitively
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.settings
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Typed settings of a section
    ///
    /// A missing section yields the type's default.
    pub fn settings<T>(&self, name: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.section(name) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| Error::config(format!("Invalid {} settings: {}", name, e))),
        }
    }

    /// Check every registered updater's section, failing on the first malformed one
    pub fn validate(&self, registry: &UpdaterRegistry) -> Result<()> {
        registry.validate_config(self)
    }

    /// Record the protocol a caller explicitly asked `source` to delegate to
    ///
    /// `None` or an empty protocol leaves the table untouched.
    pub fn set_target_protocol(&self, source: &str, protocol: Option<&str>) {
        let Some(protocol) = protocol.filter(|p| !p.is_empty()) else {
            return;
        };

        let mut targets = self
            .target_protocols
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        targets.insert(source.to_lowercase(), protocol.to_lowercase());
    }

    /// Protocol that `source` should delegate to
    ///
    /// An explicit override wins, then the section's `Target` setting, then
    /// the global default.
    pub fn target_protocol(&self, source: &str) -> String {
        let source = source.to_lowercase();
        {
            let targets = self
                .target_protocols
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(protocol) = targets.get(&source) {
                return protocol.clone();
            }
        }

        self.section(&source)
            .and_then(|section| section.get(TARGET_KEY))
            .and_then(Value::as_str)
            .filter(|target| !target.is_empty() && !target.eq_ignore_ascii_case(DEFAULT_PROTOCOL))
            .map(str::to_lowercase)
            .unwrap_or_else(|| self.default_protocol())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Map::new())
    }
}

/// Rename top-level keys of `loaded` to the spelling already used in `base`
///
/// Sections are matched case-insensitively, so `Http` in a file must merge
/// into the default `HTTP` section instead of sitting next to it.
fn align_section_keys(base: &Map<String, Value>, loaded: Map<String, Value>) -> Map<String, Value> {
    let mut aligned = Map::new();
    for (key, value) in loaded {
        let key = base
            .keys()
            .find(|existing| existing.eq_ignore_ascii_case(&key))
            .cloned()
            .unwrap_or(key);

        let value = match (aligned.remove(&key), value) {
            (Some(earlier), value) => deep_merge(earlier, value),
            (None, value) => value,
        };
        aligned.insert(key, value);
    }
    aligned
}

fn resolve_config_path(path: &Path) -> Option<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };

    if path.exists() {
        return Some(path);
    }

    let fallback = PathBuf::from(SYSTEM_CONFIG_FILE);
    fallback.exists().then_some(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::io::Write;

    fn defaults() -> Map<String, Value> {
        let value = json!({
            "HTTP": { "Host": "127.0.0.1", "Port": 8245 },
            "PowerDNS": {
                "TTL": 300,
                "API": { "Shared": false, "Host": "localhost", "Port": 8081 }
            }
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct HttpSection {
        host: String,
        port: u16,
        shared_secret: Option<String>,
    }

    #[test]
    fn test_deep_merge_nested_maps() {
        let base = json!({ "A": { "X": 1, "Y": { "Z": 2, "W": 3 } }, "B": 1 });
        let overlay = json!({ "A": { "Y": { "Z": 20 } }, "C": 5 });

        let merged = deep_merge(base, overlay);
        assert_eq!(
            merged,
            json!({ "A": { "X": 1, "Y": { "Z": 20, "W": 3 } }, "B": 1, "C": 5 })
        );
    }

    #[test]
    fn test_deep_merge_later_scalar_wins() {
        let merged = deep_merge(json!({ "A": { "X": 1 }, "B": [1, 2] }), json!({ "A": 7, "B": [3] }));
        assert_eq!(merged, json!({ "A": 7, "B": [3] }));
    }

    #[test]
    fn test_builtin_default_protocol() {
        let config = Config::default();
        assert_eq!(config.default_protocol(), "powerdns");
    }

    #[test]
    fn test_default_sentinel_is_never_the_default() {
        let config = Config::from_layers(Map::new(), Some(json!({ "Default": "default" })));
        assert_eq!(config.default_protocol(), "powerdns");
    }

    #[test]
    fn test_loaded_layer_overrides_leaves() {
        let loaded = json!({ "HTTP": { "SharedSecret": "s3cret" }, "PowerDNS": { "API": { "Shared": true } } });
        let config = Config::from_layers(defaults(), Some(loaded));

        let http: HttpSection = config.settings("http").unwrap();
        assert_eq!(http.host, "127.0.0.1");
        assert_eq!(http.port, 8245);
        assert_eq!(http.shared_secret.as_deref(), Some("s3cret"));

        let api = &config.section("powerdns").unwrap()["API"];
        assert_eq!(api["Shared"], json!(true));
        assert_eq!(api["Port"], json!(8081));
    }

    #[test]
    fn test_loaded_section_case_merges_into_default() {
        let loaded = json!({ "Http": { "SharedSecret": "s3cret" }, "powerdns": { "TTL": 60 } });
        let config = Config::from_layers(defaults(), Some(loaded));

        let http: HttpSection = config.settings("HTTP").unwrap();
        assert_eq!(http.shared_secret.as_deref(), Some("s3cret"));
        assert_eq!(http.port, 8245);

        let powerdns = config.section("PowerDNS").unwrap();
        assert_eq!(powerdns["TTL"], json!(60));
        assert_eq!(powerdns["API"]["Port"], json!(8081));
        assert!(config.section("Http").is_some());
        assert_eq!(config.settings.len(), 3);
    }

    #[test]
    fn test_invalid_section_is_a_config_error() {
        let config = Config::from_layers(defaults(), Some(json!({ "HTTP": { "Port": "not-a-port" } })));
        let result: Result<HttpSection> = config.settings("HTTP");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_target_protocol_cascade() {
        let config = Config::from_layers(defaults(), Some(json!({ "SSH": { "Target": "HTTP" } })));

        // Section without Target falls back to the default
        assert_eq!(config.target_protocol("HTTP"), "powerdns");
        // Section Target
        assert_eq!(config.target_protocol("SSH"), "http");

        // Explicit override wins
        config.set_target_protocol("ssh", Some("PowerDNS"));
        assert_eq!(config.target_protocol("SSH"), "powerdns");

        // Empty override is ignored
        config.set_target_protocol("http", Some(""));
        assert_eq!(config.target_protocol("HTTP"), "powerdns");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "Default: HTTP\nHTTP:\n  SharedSecret: from-file\n  Target: PowerDNS").unwrap();

        let config = Config::load(Some(file.path()), defaults()).unwrap();
        assert_eq!(config.default_protocol(), "http");
        assert_eq!(config.source(), Some(file.path()));

        let http: HttpSection = config.settings("HTTP").unwrap();
        assert_eq!(http.shared_secret.as_deref(), Some("from-file"));
        assert_eq!(http.port, 8245);
    }

    #[test]
    fn test_load_from_empty_file() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();

        let config = Config::load(Some(file.path()), defaults()).unwrap();
        assert_eq!(config.default_protocol(), "powerdns");
    }

    #[test]
    fn test_load_rejects_broken_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "HTTP: [unterminated").unwrap();

        assert!(matches!(
            Config::load(Some(file.path()), defaults()),
            Err(Error::Config(_))
        ));
    }
}
