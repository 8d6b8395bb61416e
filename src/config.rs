use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::model::LayoutMode;

pub const DEFAULT_OCR_CONFIDENCE_THRESHOLD: f64 = 65.0;
pub const DEFAULT_CLASSIFY_CONFIDENCE_THRESHOLD: u32 = 60;

pub const DEFAULT_BASE_DPI: u32 = 300;
pub const DEFAULT_ESCALATED_DPI: u32 = 450;
pub const DEFAULT_PAGE_CONFIDENCE_FLOOR: f64 = 80.0;
pub const DEFAULT_LOW_WORD_CONFIDENCE: f64 = 60.0;
pub const DEFAULT_LOW_WORD_RATIO_LIMIT: f64 = 0.15;

pub const DEFAULT_BORN_DIGITAL_CHARS_PER_PAGE: f64 = 200.0;
pub const MIN_UNIQUE_CHAR_RATIO: f64 = 0.15;
pub const UNIQUE_CHAR_WINDOW: usize = 100;
pub const MIN_NON_WHITESPACE_RATIO: f64 = 0.6;
pub const BORN_DIGITAL_CONFIDENCE: f64 = 99.0;

// Canonical layout unit: one PDF point.
pub const CANONICAL_DPI: f64 = 72.0;

pub const CLASSIFY_TEXT_WINDOW_CHARS: usize = 2000;
pub const FILENAME_MATCH_BONUS: u32 = 10;
pub const MEDIA_FILE_BONUS: u32 = 15;
pub const MAX_CLASSIFICATION_CONFIDENCE: u32 = 100;

pub const SNIPPET_MAX_TOKENS: usize = 18;
pub const SNIPPET_MAX_LINE_SPAN: usize = 2;
pub const SNIPPET_MAX_CHARS: usize = 180;

pub const PROGRESS_STEP_PERCENT: u8 = 5;

pub const DEFAULT_WORKER_CONCURRENCY: usize = 2;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_OCR_LANG: &str = "ita+eng";

#[derive(Debug, Clone, Serialize)]
pub struct RecognitionTiers {
    pub dpi_tiers: Vec<u32>,
    pub base_mode: LayoutMode,
    pub retry_mode: LayoutMode,
    pub page_confidence_floor: f64,
    pub low_word_confidence: f64,
    pub low_word_ratio_limit: f64,
}

impl Default for RecognitionTiers {
    fn default() -> Self {
        Self {
            dpi_tiers: vec![DEFAULT_BASE_DPI, DEFAULT_ESCALATED_DPI],
            base_mode: LayoutMode::SingleColumn,
            retry_mode: LayoutMode::MultiBlock,
            page_confidence_floor: DEFAULT_PAGE_CONFIDENCE_FLOOR,
            low_word_confidence: DEFAULT_LOW_WORD_CONFIDENCE,
            low_word_ratio_limit: DEFAULT_LOW_WORD_RATIO_LIMIT,
        }
    }
}

impl RecognitionTiers {
    pub fn new(base_dpi: u32, escalated_dpi: u32, page_confidence_floor: f64) -> Result<Self> {
        if base_dpi == 0 {
            bail!("base DPI must be positive");
        }
        let mut dpi_tiers = vec![base_dpi];
        if escalated_dpi > base_dpi {
            dpi_tiers.push(escalated_dpi);
        }

        Ok(Self {
            dpi_tiers,
            page_confidence_floor,
            ..Self::default()
        })
    }

    pub fn base_dpi(&self) -> u32 {
        self.dpi_tiers
            .first()
            .copied()
            .unwrap_or(DEFAULT_BASE_DPI)
    }

    pub fn max_passes(&self) -> usize {
        self.dpi_tiers.len() * 2
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectorConfig {
    pub min_chars_per_page: f64,
    pub min_unique_char_ratio: f64,
    pub min_non_whitespace_ratio: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_chars_per_page: DEFAULT_BORN_DIGITAL_CHARS_PER_PAGE,
            min_unique_char_ratio: MIN_UNIQUE_CHAR_RATIO,
            min_non_whitespace_ratio: MIN_NON_WHITESPACE_RATIO,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolConfig {
    pub poppler_path: Option<PathBuf>,
    pub tesseract_path: PathBuf,
    pub tessdata_dir: Option<PathBuf>,
    pub ocr_lang: String,
    pub timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            poppler_path: None,
            tesseract_path: PathBuf::from("tesseract"),
            tessdata_dir: None,
            ocr_lang: DEFAULT_OCR_LANG.to_string(),
            timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }
}

impl ToolConfig {
    pub fn poppler_bin(&self, name: &str) -> PathBuf {
        match &self.poppler_path {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub tiers: RecognitionTiers,
    pub detector: DetectorConfig,
    pub ocr_confidence_threshold: f64,
    pub classify_confidence_threshold: u32,
    pub work_root: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tiers: RecognitionTiers::default(),
            detector: DetectorConfig::default(),
            ocr_confidence_threshold: DEFAULT_OCR_CONFIDENCE_THRESHOLD,
            classify_confidence_threshold: DEFAULT_CLASSIFY_CONFIDENCE_THRESHOLD,
            work_root: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tiers_escalate_from_300_to_450() {
        let tiers = RecognitionTiers::default();
        assert_eq!(tiers.dpi_tiers, vec![300, 450]);
        assert_eq!(tiers.base_dpi(), 300);
        assert_eq!(tiers.max_passes(), 4);
    }

    #[test]
    fn escalated_dpi_not_above_base_drops_the_tier() {
        let tiers = RecognitionTiers::new(300, 300, 80.0).expect("tiers");
        assert_eq!(tiers.dpi_tiers, vec![300]);
        assert!(RecognitionTiers::new(0, 450, 80.0).is_err());
    }

    #[test]
    fn poppler_bin_respects_install_dir() {
        let mut tools = ToolConfig::default();
        assert_eq!(tools.poppler_bin("pdfinfo"), PathBuf::from("pdfinfo"));
        tools.poppler_path = Some(PathBuf::from("/opt/poppler/bin"));
        assert_eq!(
            tools.poppler_bin("pdfinfo"),
            PathBuf::from("/opt/poppler/bin/pdfinfo")
        );
    }
}
