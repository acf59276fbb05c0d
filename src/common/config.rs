//! Configuration files with inline documentation.
//!
//! Every field is written as `key = value  # description`. Fields that are
//! `None` are not serialized by toml, so they are written commented out with
//! an example value instead. That way a freshly created config file lists
//! every knob without changing behaviour.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Documentation for a single configuration field
#[derive(Debug, Clone, Copy)]
pub struct FieldDoc {
    pub name: &'static str,
    pub description: &'static str,
    /// Example shown (commented out) when the field is unset
    pub example: Option<&'static str>,
}

impl FieldDoc {
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            example: None,
        }
    }

    pub const fn optional(
        name: &'static str,
        description: &'static str,
        example: &'static str,
    ) -> Self {
        Self {
            name,
            description,
            example: Some(example),
        }
    }
}

/// Trait for configs with documented fields
pub trait DocumentedConfig: Sized + Default + Serialize + DeserializeOwned {
    fn field_docs() -> &'static [FieldDoc];

    /// Render the config as TOML with a trailing comment on every line
    fn to_documented_toml(&self) -> Result<String> {
        let value = toml::Value::try_from(self).context("serializing config")?;
        let table = value
            .as_table()
            .context("config did not serialize to a TOML table")?;
        let mut output = String::new();

        for field in Self::field_docs() {
            match table.get(field.name) {
                Some(value) => {
                    output.push_str(&format!(
                        "{} = {}  # {}\n",
                        field.name, value, field.description
                    ));
                }
                None => {
                    let Some(example) = field.example else {
                        continue;
                    };
                    output.push_str(&format!(
                        "# {} = {}  # {}\n",
                        field.name, example, field.description
                    ));
                }
            }
        }

        Ok(output)
    }

    fn save_with_documentation(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }
        fs::write(path, self.to_documented_toml()?)
            .with_context(|| format!("writing config to {}", path.display()))?;
        Ok(())
    }

    /// Load the config, creating a documented default file when missing
    fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_with_documentation(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }
}
