use anyhow::{Context, Result};
use config::{Config, Environment, File as ConfigFile};
use serde::Deserialize;

pub type Number = f32;

pub const EPSILON: f32 = 1e-6;

const DEFAULT_PATH: &str = "data/vectordb";
const DEFAULT_DIMENSIONS: usize = 384;
const DEFAULT_CHUNK_SIZE: usize = 1000;
const DEFAULT_CHUNK_OVERLAP: usize = 200;
const DEFAULT_TOP_K: usize = 5;
const DEFAULT_MODEL: &str = "hash-bow-v1";

/// Raw values as they come out of the config file and `VEKTA_*` variables.
#[derive(Deserialize, Default)]
pub struct VektaConfig {
    pub path: Option<String>,
    pub dimensions: Option<usize>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub top_k: Option<usize>,
    pub max_context_chars: Option<usize>,
    pub model: Option<String>,
    pub verbose: Option<bool>,
}

/// Resolved and validated settings shared by the CLI and the pipeline.
#[derive(Debug, Clone)]
pub struct Settings {
    pub path: String,
    pub dimensions: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub max_context_chars: Option<usize>,
    pub model: String,
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(VektaConfig::default())
    }
}

impl Settings {
    /// Loads `vekta_config.*` from the working directory (optional), then
    /// applies `VEKTA_*` environment overrides.
    pub fn new() -> Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::with_name("vekta_config").required(false))
            .add_source(Environment::with_prefix("VEKTA").try_parsing(true))
            .build()
            .context("failed to read vekta configuration")?;

        let raw: VektaConfig = config
            .try_deserialize()
            .context("invalid vekta configuration")?;

        let settings = Self::resolve(raw);
        settings.validate()?;
        Ok(settings)
    }

    fn resolve(raw: VektaConfig) -> Self {
        Self {
            path: raw.path.unwrap_or_else(|| DEFAULT_PATH.to_string()),
            dimensions: raw.dimensions.unwrap_or(DEFAULT_DIMENSIONS),
            chunk_size: raw.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            chunk_overlap: raw.chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP),
            top_k: raw.top_k.unwrap_or(DEFAULT_TOP_K),
            max_context_chars: raw.max_context_chars,
            model: raw.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            verbose: raw.verbose.unwrap_or(false),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            anyhow::bail!("VEKTA_DIMENSIONS must be greater than zero.");
        }
        if self.chunk_size <= self.chunk_overlap {
            anyhow::bail!(
                "VEKTA_CHUNK_SIZE ({}) must be greater than VEKTA_CHUNK_OVERLAP ({}).",
                self.chunk_size,
                self.chunk_overlap
            );
        }
        if self.top_k == 0 {
            anyhow::bail!("VEKTA_TOP_K must be greater than zero.");
        }
        Ok(())
    }

    pub fn print_config(&self) {
        println!("path={}", self.path);
        println!("dimensions={}", self.dimensions);
        println!("chunk_size={}", self.chunk_size);
        println!("chunk_overlap={}", self.chunk_overlap);
        println!("top_k={}", self.top_k);
        match self.max_context_chars {
            Some(limit) => println!("max_context_chars={}", limit),
            None => println!("max_context_chars=unbounded"),
        }
        println!("model={}", self.model);
        println!("verbose={}", self.verbose);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.path, DEFAULT_PATH);
        assert_eq!(settings.dimensions, 384);
        assert_eq!(settings.chunk_size, 1000);
        assert_eq!(settings.chunk_overlap, 200);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let settings = Settings {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_dimensions_rejected() {
        let settings = Settings {
            dimensions: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
