//! Topology schema and validation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use strada_rtproc::Properties;

use crate::{ConfigError, Result};

/// Pipeline-level parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Pipeline name.
    pub name: String,
    /// Frames per period.
    pub period_size: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// One module instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleEntryConfig {
    /// Module type name, e.g. `"volume"`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Unique instance name.
    pub instance: String,
    /// Configuration properties handed to the module factory.
    #[serde(default)]
    pub properties: toml::Table,
}

impl ModuleEntryConfig {
    /// Converts the TOML properties into a runtime property map.
    ///
    /// Supported value types: integer, float, string and homogeneous
    /// arrays of those.
    pub fn runtime_properties(&self) -> Result<Properties> {
        let mut props = Properties::new();
        for (key, value) in &self.properties {
            match value {
                toml::Value::Integer(v) => props.set(key.clone(), *v as i32),
                toml::Value::Float(v) => props.set(key.clone(), *v as f32),
                toml::Value::String(v) => props.set(key.clone(), v.clone()),
                toml::Value::Array(items) => {
                    Self::array_property(&mut props, key, items)?;
                }
                other => {
                    return Err(ConfigError::Property {
                        key: key.clone(),
                        reason: format!("type {} is not a property type", other.type_str()),
                    });
                }
            }
        }
        Ok(props)
    }

    fn array_property(props: &mut Properties, key: &str, items: &[toml::Value]) -> Result<()> {
        let first = items.first().ok_or_else(|| ConfigError::Property {
            key: key.to_string(),
            reason: "empty arrays carry no type".into(),
        })?;
        match first {
            toml::Value::Integer(_) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        toml::Value::Integer(v) => values.push(*v as i32),
                        _ => return Err(mixed_array(key)),
                    }
                }
                props.set(key.to_string(), values);
            }
            toml::Value::Float(_) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        toml::Value::Float(v) => values.push(*v as f32),
                        _ => return Err(mixed_array(key)),
                    }
                }
                props.set(key.to_string(), values);
            }
            toml::Value::String(_) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        toml::Value::String(v) => values.push(v.clone()),
                        _ => return Err(mixed_array(key)),
                    }
                }
                props.set(key.to_string(), values);
            }
            other => {
                return Err(ConfigError::Property {
                    key: key.to_string(),
                    reason: format!("arrays of {} are not supported", other.type_str()),
                });
            }
        }
        Ok(())
    }
}

fn mixed_array(key: &str) -> ConfigError {
    ConfigError::Property {
        key: key.to_string(),
        reason: "arrays must be homogeneous".into(),
    }
}

/// Role of a pin within the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinRole {
    /// Pipeline input pin, fed from a WAV file.
    Input,
    /// Pipeline output pin, drained into a WAV file.
    Output,
    /// In-place pin of a module (requires `module`).
    Inout,
    /// Pin consumed by a `[[mappings]]` entry.
    Free,
}

/// One pin.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PinConfig {
    /// Unique pin name.
    pub name: String,
    /// Channel count.
    pub channels: u32,
    /// Role within the topology.
    pub role: PinRole,
    /// Owning module, for `inout` pins.
    #[serde(default)]
    pub module: Option<String>,
}

/// One pin mapping of a non-in-place module.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    /// Owning module instance.
    pub module: String,
    /// Input pin name.
    pub input: String,
    /// Output pin name.
    pub output: String,
}

/// One link between pins.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    /// Source pin name.
    pub from: String,
    /// Destination pin name.
    pub to: String,
    /// One-period delay link, for feedback loops.
    #[serde(default)]
    pub delayed: bool,
}

/// A WAV file bound to a boundary pin.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaveBinding {
    /// Boundary pin name.
    pub pin: String,
    /// WAV file path, relative to the topology file.
    pub file: PathBuf,
}

/// A complete topology document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    /// Pipeline parameters.
    pub pipeline: PipelineConfig,
    /// Module instances.
    #[serde(default)]
    pub modules: Vec<ModuleEntryConfig>,
    /// Pins.
    #[serde(default)]
    pub pins: Vec<PinConfig>,
    /// Pin mappings.
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
    /// Links.
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    /// Input WAV bindings.
    #[serde(default)]
    pub inputs: Vec<WaveBinding>,
    /// Output WAV bindings.
    #[serde(default)]
    pub outputs: Vec<WaveBinding>,
}

impl TopologyConfig {
    /// Parses a topology from TOML text and validates it.
    pub fn from_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a topology file and validates it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&text)
    }

    fn pin(&self, name: &str) -> Option<&PinConfig> {
        self.pins.iter().find(|p| p.name == name)
    }

    fn has_module(&self, instance: &str) -> bool {
        self.modules.iter().any(|m| m.instance == instance)
    }

    /// Cross-checks the document: unique names, resolvable references,
    /// sensible roles.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.period_size == 0 {
            return Err(ConfigError::Validation("period_size must be positive".into()));
        }
        if self.pipeline.sample_rate == 0 {
            return Err(ConfigError::Validation("sample_rate must be positive".into()));
        }

        let mut seen = BTreeSet::new();
        for module in &self.modules {
            if !seen.insert(&module.instance) {
                return Err(ConfigError::Validation(format!(
                    "duplicate module instance '{}'",
                    module.instance
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for pin in &self.pins {
            if !seen.insert(&pin.name) {
                return Err(ConfigError::Validation(format!(
                    "duplicate pin '{}'",
                    pin.name
                )));
            }
            if pin.channels == 0 {
                return Err(ConfigError::Validation(format!(
                    "pin '{}' needs at least one channel",
                    pin.name
                )));
            }
            match (pin.role, &pin.module) {
                (PinRole::Inout, None) => {
                    return Err(ConfigError::Validation(format!(
                        "inout pin '{}' names no module",
                        pin.name
                    )));
                }
                (PinRole::Inout, Some(module)) if !self.has_module(module) => {
                    return Err(ConfigError::Validation(format!(
                        "pin '{}' references unknown module '{module}'",
                        pin.name
                    )));
                }
                (PinRole::Input | PinRole::Output | PinRole::Free, Some(_)) => {
                    return Err(ConfigError::Validation(format!(
                        "pin '{}' names a module but is not an inout pin",
                        pin.name
                    )));
                }
                _ => {}
            }
        }

        for mapping in &self.mappings {
            if !self.has_module(&mapping.module) {
                return Err(ConfigError::Validation(format!(
                    "mapping references unknown module '{}'",
                    mapping.module
                )));
            }
            for name in [&mapping.input, &mapping.output] {
                match self.pin(name) {
                    None => {
                        return Err(ConfigError::Validation(format!(
                            "mapping references unknown pin '{name}'"
                        )));
                    }
                    Some(pin) if pin.role != PinRole::Free => {
                        return Err(ConfigError::Validation(format!(
                            "mapping pin '{name}' must have role \"free\""
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        for link in &self.links {
            for name in [&link.from, &link.to] {
                if self.pin(name).is_none() {
                    return Err(ConfigError::Validation(format!(
                        "link references unknown pin '{name}'"
                    )));
                }
            }
            let from = self.pin(&link.from).map(|p| p.channels);
            let to = self.pin(&link.to).map(|p| p.channels);
            if from != to {
                return Err(ConfigError::Validation(format!(
                    "link '{}' -> '{}' connects differing channel counts",
                    link.from, link.to
                )));
            }
        }

        for (bindings, role, what) in [
            (&self.inputs, PinRole::Input, "input"),
            (&self.outputs, PinRole::Output, "output"),
        ] {
            for binding in bindings.iter() {
                match self.pin(&binding.pin) {
                    None => {
                        return Err(ConfigError::Validation(format!(
                            "{what} binding references unknown pin '{}'",
                            binding.pin
                        )));
                    }
                    Some(pin) if pin.role != role => {
                        return Err(ConfigError::Validation(format!(
                            "{what} binding pin '{}' has the wrong role",
                            binding.pin
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }
}
