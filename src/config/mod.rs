use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use anyhow::Result;
use thiserror::Error;

use crate::parser::classifier::DEFAULT_MIN_CHARS;

pub const CONFIG_FILE: &str = "config/settings.toml";
const ENV_PREFIX: &str = "DOCSIGHT";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub chunking: ChunkingConfig,
    pub extraction: ExtractionConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub api_key: String,
    /// OpenAI-compatible chat completions endpoint
    pub api_url: String,
    pub model: String,
    pub vision_model: String,
    pub timeout_secs: u64,
    /// 1 means a failed call degrades immediately
    pub max_attempts: u32,
    pub proxy: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageImageFallback {
    /// Register rasterized pages as images whenever no embedded figure exists
    Always,
    ScannedOnly,
    Never,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    pub classify_min_chars: usize,
    pub table_summary_min_chars: usize,
    pub page_images_when_no_figures: PageImageFallback,
    /// Smallest embedded image (either side, pixels) kept as a figure
    pub min_figure_px: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RenderConfig {
    pub page_dpi: f32,
    pub citation_dpi: f32,
    pub citation_padding: f32,
    /// Directory holding the pdfium shared library; empty uses the system library
    pub pdfium_lib_dir: String,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("chunking.overlap ({overlap}) must be smaller than chunking.chunk_size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },

    #[error("chunking.chunk_size must be positive")]
    ZeroChunkSize,

    #[error("render.{0} must be positive")]
    NonPositiveDpi(&'static str),
}

impl AppConfig {
    /// 默认值 → config/settings.toml → DOCSIGHT__* 环境变量
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;
        if self.render.page_dpi <= 0.0 {
            return Err(ConfigError::NonPositiveDpi("page_dpi"));
        }
        if self.render.citation_dpi <= 0.0 {
            return Err(ConfigError::NonPositiveDpi("citation_dpi"));
        }
        Ok(())
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                data_dir: PathBuf::from("data"),
            },
            storage: StorageConfig {
                database_path: PathBuf::from("data/knowledge.db"),
                max_connections: 5,
            },
            llm: LlmConfig {
                api_key: String::new(),
                api_url: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions".to_string(),
                model: "gemini-2.5-pro".to_string(),
                vision_model: "gemini-2.5-pro".to_string(),
                timeout_secs: 120,
                max_attempts: 1,
                proxy: String::new(),
            },
            chunking: ChunkingConfig::default(),
            extraction: ExtractionConfig {
                classify_min_chars: DEFAULT_MIN_CHARS,
                table_summary_min_chars: 50,
                page_images_when_no_figures: PageImageFallback::Always,
                min_figure_px: 10,
            },
            render: RenderConfig {
                page_dpi: 300.0,
                citation_dpi: 200.0,
                citation_padding: 10.0,
                pdfium_lib_dir: String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let chunking = ChunkingConfig { chunk_size: 50, overlap: 50 };
        assert_eq!(
            chunking.validate(),
            Err(ConfigError::OverlapTooLarge { chunk_size: 50, overlap: 50 })
        );
    }

    #[test]
    fn toml_round_trip_keeps_extraction_settings() {
        let mut config = AppConfig::default();
        config.extraction.page_images_when_no_figures = PageImageFallback::ScannedOnly;

        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("page_images_when_no_figures = \"scanned_only\""));

        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.extraction.page_images_when_no_figures, PageImageFallback::ScannedOnly);
        assert_eq!(parsed.chunking.chunk_size, 500);
    }
}
