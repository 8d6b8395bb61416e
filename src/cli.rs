use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_BASE_DPI, DEFAULT_BORN_DIGITAL_CHARS_PER_PAGE, DEFAULT_CLASSIFY_CONFIDENCE_THRESHOLD,
    DEFAULT_ESCALATED_DPI, DEFAULT_OCR_CONFIDENCE_THRESHOLD, DEFAULT_OCR_LANG,
    DEFAULT_PAGE_CONFIDENCE_FLOOR, DEFAULT_TOOL_TIMEOUT_SECS, DEFAULT_WORKER_CONCURRENCY,
    DetectorConfig, PipelineConfig, RecognitionTiers, ToolConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "legalflow-ocr",
    version,
    about = "Adaptive OCR, layout extraction and classification for case documents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(subcommand)]
    Case(CaseCommands),
    Process(ProcessArgs),
    Classify(ClassifyArgs),
    Search(SearchArgs),
    Status(StatusArgs),
}

#[derive(Subcommand, Debug)]
pub enum CaseCommands {
    Create(CaseCreateArgs),
    List(CaseListArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = ".cache/legalflow")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

impl StoreArgs {
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.cache_root.join("legalflow.sqlite"))
    }
}

#[derive(Args, Debug, Clone)]
pub struct CaseCreateArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub client: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CaseListArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct OcrArgs {
    #[arg(long, env = "OCR_CONFIDENCE_THRESHOLD", default_value_t = DEFAULT_OCR_CONFIDENCE_THRESHOLD)]
    pub ocr_confidence_threshold: f64,

    #[arg(long, env = "CLASSIFY_CONFIDENCE_THRESHOLD", default_value_t = DEFAULT_CLASSIFY_CONFIDENCE_THRESHOLD)]
    pub classify_confidence_threshold: u32,

    #[arg(long, env = "OCR_DPI_BASE", default_value_t = DEFAULT_BASE_DPI)]
    pub base_dpi: u32,

    #[arg(long, env = "OCR_DPI_MAX", default_value_t = DEFAULT_ESCALATED_DPI)]
    pub max_dpi: u32,

    #[arg(long, env = "OCR_CONF_PAGE", default_value_t = DEFAULT_PAGE_CONFIDENCE_FLOOR)]
    pub page_confidence_floor: f64,

    #[arg(long, env = "OCR_CONF_TEXT_THRESHOLD", default_value_t = DEFAULT_BORN_DIGITAL_CHARS_PER_PAGE)]
    pub born_digital_chars_per_page: f64,

    #[arg(long, env = "OCR_LANG", default_value = DEFAULT_OCR_LANG)]
    pub ocr_lang: String,

    #[arg(long, env = "POPPLER_PATH")]
    pub poppler_path: Option<PathBuf>,

    #[arg(long, env = "TESSERACT_PATH", default_value = "tesseract")]
    pub tesseract_path: PathBuf,

    #[arg(long, env = "TESSDATA_DIR")]
    pub tessdata_dir: Option<PathBuf>,

    #[arg(long = "timeout-sec", env = "OCR_TIMEOUT_SEC", default_value_t = DEFAULT_TOOL_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

impl OcrArgs {
    pub fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            poppler_path: self.poppler_path.clone(),
            tesseract_path: self.tesseract_path.clone(),
            tessdata_dir: self.tessdata_dir.clone(),
            ocr_lang: self.ocr_lang.clone(),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        }
    }

    pub fn pipeline_config(&self, work_root: Option<PathBuf>) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            tiers: RecognitionTiers::new(self.base_dpi, self.max_dpi, self.page_confidence_floor)?,
            detector: DetectorConfig {
                min_chars_per_page: self.born_digital_chars_per_page,
                ..DetectorConfig::default()
            },
            ocr_confidence_threshold: self.ocr_confidence_threshold,
            classify_confidence_threshold: self.classify_confidence_threshold,
            work_root,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub ocr: OcrArgs,

    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[arg(long)]
    pub case_id: Option<String>,

    #[arg(long, env = "OCR_CONCURRENCY", default_value_t = DEFAULT_WORKER_CONCURRENCY)]
    pub concurrency: usize,

    #[arg(long)]
    pub work_root: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    #[arg(long, conflicts_with = "text_file", required_unless_present = "text_file")]
    pub text: Option<String>,

    #[arg(long)]
    pub text_file: Option<PathBuf>,

    #[arg(long, default_value = "document.pdf")]
    pub filename: String,

    #[arg(long, env = "CLASSIFY_CONFIDENCE_THRESHOLD", default_value_t = DEFAULT_CLASSIFY_CONFIDENCE_THRESHOLD)]
    pub threshold: u32,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(long)]
    pub result: PathBuf,

    #[arg(long)]
    pub query: String,

    #[arg(long)]
    pub page: Option<u32>,

    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub rotation: i32,

    #[arg(long)]
    pub render_width: Option<f64>,

    #[arg(long)]
    pub render_height: Option<f64>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub document: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn process_defaults_follow_configuration_constants() {
        let cli = Cli::try_parse_from(["legalflow-ocr", "process", "a.pdf", "b.png"]).expect("parse");
        let Commands::Process(args) = cli.command else {
            panic!("expected process command");
        };
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.store.resolved_db_path(), PathBuf::from(".cache/legalflow/legalflow.sqlite"));

        let config = args.ocr.pipeline_config(None).expect("config");
        assert_eq!(config.tiers.dpi_tiers, vec![300, 450]);
        assert_eq!(config.classify_confidence_threshold, 60);
        assert_eq!(args.ocr.tool_config().ocr_lang, "ita+eng");
    }

    #[test]
    fn classify_requires_exactly_one_text_source() {
        assert!(Cli::try_parse_from(["legalflow-ocr", "classify"]).is_err());
        assert!(
            Cli::try_parse_from([
                "legalflow-ocr",
                "classify",
                "--text",
                "querela",
                "--text-file",
                "x.txt"
            ])
            .is_err()
        );
        assert!(Cli::try_parse_from(["legalflow-ocr", "classify", "--text", "querela"]).is_ok());
    }

    #[test]
    fn search_accepts_negative_rotation() {
        let cli = Cli::try_parse_from([
            "legalflow-ocr",
            "search",
            "--result",
            "r.json",
            "--query",
            "atto",
            "--rotation",
            "-90",
        ])
        .expect("parse");
        let Commands::Search(args) = cli.command else {
            panic!("expected search command");
        };
        assert_eq!(args.rotation, -90);
    }
}
