use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub source_ref: String,
    pub filename: String,
    pub media_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterPage {
    pub page: u32,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraph: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Word {
    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    SingleColumn,
    MultiBlock,
}

impl LayoutMode {
    pub fn psm(self) -> u8 {
        match self {
            Self::SingleColumn => 6,
            Self::MultiBlock => 4,
        }
    }
}

impl fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "psm{}", self.psm())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutPage {
    pub page: u32,
    pub source_width: f64,
    pub source_height: f64,
    pub dpi_used: u32,
    pub psm_used: Option<LayoutMode>,
    pub bbox_scale: f64,
    pub words: Vec<Word>,
}

impl LayoutPage {
    pub fn page_width(&self) -> f64 {
        self.source_width * self.bbox_scale
    }

    pub fn page_height(&self) -> f64 {
        self.source_height * self.bbox_scale
    }

    pub fn is_embedded_text(&self) -> bool {
        self.psm_used.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub text: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub pages: Vec<PageText>,
    pub avg_confidence: f64,
    pub layout: Vec<LayoutPage>,
    #[serde(default)]
    pub born_digital: bool,
}

impl OcrResult {
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<&str>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub bucket_key: String,
    pub tags: Vec<String>,
    pub confidence: u32,
    pub rationale: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrStatus {
    Pending,
    Processing,
    Completed,
    LowConfidence,
    Failed,
}

impl OcrStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::LowConfidence => "low_confidence",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OcrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobUpdate {
    pub status: OcrStatus,
    pub progress: u8,
    pub text: Option<String>,
    pub confidence: Option<f64>,
    pub layout: Option<Vec<LayoutPage>>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn progress(status: OcrStatus, progress: u8) -> Self {
        Self {
            status,
            progress,
            text: None,
            confidence: None,
            layout: None,
            error: None,
        }
    }

    pub fn failed(progress: u8, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::progress(OcrStatus::Failed, progress)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResultFile {
    pub document_id: String,
    pub filename: String,
    pub status: OcrStatus,
    pub generated_at: String,
    pub ocr: OcrResult,
    pub classification: Option<ClassificationResult>,
    pub applied_bucket_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolVersions {
    pub pdfinfo: Option<String>,
    pub pdftotext: Option<String>,
    pub pdffonts: Option<String>,
    pub pdftoppm: Option<String>,
    pub tesseract: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRunSummary {
    pub document_id: String,
    pub job_id: String,
    pub filename: String,
    pub status: OcrStatus,
    pub born_digital: bool,
    pub page_count: usize,
    pub avg_confidence: Option<f64>,
    pub bucket_key: Option<String>,
    pub class_confidence: Option<u32>,
    pub applied_bucket_id: Option<i64>,
    pub result_path: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessCounts {
    pub document_count: usize,
    pub completed_count: usize,
    pub low_confidence_count: usize,
    pub failed_count: usize,
    pub born_digital_count: usize,
    pub classified_count: usize,
    pub moved_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub case_id: Option<String>,
    pub concurrency: usize,
    pub tool_versions: ToolVersions,
    pub config: crate::config::PipelineConfig,
    pub counts: ProcessCounts,
    pub documents: Vec<DocumentRunSummary>,
    pub warnings: Vec<String>,
}
