use std::path::Path;

use anyhow::{Context, Result, bail};
use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::{BORN_DIGITAL_CONFIDENCE, PipelineConfig};
use crate::error::PipelineError;
use crate::model::{OcrResult, PageText, RasterPage};
use crate::source::{MediaKind, file_extension, media_kind};
use crate::util::{ensure_directory, safe_file_stem};

use super::detector;
use super::engine::{PageOutcome, RecognitionEngine};
use super::progress::CancelFlag;
use super::tools::{PdfTools, TextRecognizer, raster_page_from_file};

const RASTERIZED_FRACTION: f64 = 0.5;

pub struct ExtractInput<'a> {
    pub filename: &'a str,
    pub media_type: &'a str,
    pub bytes: &'a [u8],
}

pub type ProgressFn<'a> = dyn FnMut(f64) + Send + 'a;

pub struct OcrPipeline<P, R> {
    pdf_tools: P,
    recognizer: R,
    config: PipelineConfig,
}

impl<P: PdfTools, R: TextRecognizer> OcrPipeline<P, R> {
    pub fn new(pdf_tools: P, recognizer: R, config: PipelineConfig) -> Self {
        Self {
            pdf_tools,
            recognizer,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn extract(
        &self,
        input: ExtractInput<'_>,
        progress: &mut ProgressFn<'_>,
        cancel: &CancelFlag,
    ) -> Result<OcrResult> {
        if input.bytes.is_empty() {
            return Err(PipelineError::EmptyInput(input.filename.to_string()).into());
        }

        let kind = media_kind(input.media_type, input.filename, input.bytes);
        if kind == MediaKind::Other {
            return Err(PipelineError::UnsupportedMedia {
                media_type: input.media_type.to_string(),
                filename: input.filename.to_string(),
            }
            .into());
        }

        // Removed on drop, on success and on every error path.
        let work_dir = self.create_work_dir()?;

        match kind {
            MediaKind::Pdf => self.extract_pdf(&input, work_dir.path(), progress, cancel).await,
            _ => self.extract_image(&input, work_dir.path(), progress, cancel).await,
        }
    }

    fn create_work_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("legalflow-ocr-");
        match &self.config.work_root {
            Some(root) => {
                ensure_directory(root)?;
                builder
                    .tempdir_in(root)
                    .with_context(|| format!("failed to create working directory in {}", root.display()))
            }
            None => builder
                .tempdir()
                .context("failed to create working directory"),
        }
    }

    async fn extract_pdf(
        &self,
        input: &ExtractInput<'_>,
        work_dir: &Path,
        progress: &mut ProgressFn<'_>,
        cancel: &CancelFlag,
    ) -> Result<OcrResult> {
        let pdf_path = work_dir.join(format!("{}.pdf", safe_file_stem(input.filename)));
        tokio::fs::write(&pdf_path, input.bytes)
            .await
            .with_context(|| format!("failed to write {}", pdf_path.display()))?;

        let page_count = match self.pdf_tools.page_count(&pdf_path).await {
            Ok(count) if count > 0 => count,
            Ok(_) => {
                warn!(filename = input.filename, "pdfinfo reported zero pages; assuming 1");
                1
            }
            Err(err) => {
                warn!(filename = input.filename, error = %err, "page count unavailable; assuming 1");
                1
            }
        };

        let detection =
            detector::detect(&self.pdf_tools, &pdf_path, page_count, &self.config.detector).await;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(1).into());
        }
        if detection.born_digital {
            let layout = match self.pdf_tools.embedded_layout(&pdf_path).await {
                Ok(layout) => layout,
                Err(err) => {
                    warn!(filename = input.filename, error = %err, "embedded layout unavailable");
                    Vec::new()
                }
            };
            let pages = born_digital_pages(&detection.text);
            info!(
                filename = input.filename,
                pages = pages.len(),
                "born-digital PDF; skipping recognition"
            );
            progress(1.0);
            return Ok(OcrResult {
                pages,
                avg_confidence: BORN_DIGITAL_CONFIDENCE,
                layout,
                born_digital: true,
            });
        }

        let base_dpi = self.config.tiers.base_dpi();
        let rasters = self
            .pdf_tools
            .rasterize_all(&pdf_path, base_dpi, work_dir)
            .await
            .with_context(|| format!("failed to rasterize {}", input.filename))?;
        if rasters.is_empty() {
            bail!("rasterization produced no pages for {}", input.filename);
        }
        info!(
            filename = input.filename,
            pages = rasters.len(),
            dpi = base_dpi,
            "rasterized document"
        );
        progress(RASTERIZED_FRACTION);

        self.recognize_pages(Some(&pdf_path), &rasters, work_dir, progress, cancel)
            .await
    }

    async fn extract_image(
        &self,
        input: &ExtractInput<'_>,
        work_dir: &Path,
        progress: &mut ProgressFn<'_>,
        cancel: &CancelFlag,
    ) -> Result<OcrResult> {
        let extension = file_extension(input.filename).unwrap_or_else(|| "png".to_string());
        let image_path = work_dir.join(format!("page-1.{extension}"));
        tokio::fs::write(&image_path, input.bytes)
            .await
            .with_context(|| format!("failed to write {}", image_path.display()))?;

        let raster = match raster_page_from_file(&image_path, 1, self.config.tiers.base_dpi()) {
            Ok(raster) => raster,
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(filename = input.filename, page = 1, error = %reason, "unreadable image");
                progress(1.0);
                return Ok(OcrResult {
                    pages: vec![failed_page()],
                    ..OcrResult::default()
                });
            }
        };
        progress(RASTERIZED_FRACTION);

        self.recognize_pages(None, &[raster], work_dir, progress, cancel)
            .await
    }

    async fn recognize_pages(
        &self,
        pdf: Option<&Path>,
        rasters: &[RasterPage],
        work_dir: &Path,
        progress: &mut ProgressFn<'_>,
        cancel: &CancelFlag,
    ) -> Result<OcrResult> {
        let engine =
            RecognitionEngine::new(&self.pdf_tools, &self.recognizer, &self.config.tiers);
        let total = rasters.len() as f64;
        let max_passes = self.config.tiers.max_passes().max(1) as f64;

        let mut result = OcrResult::default();
        let mut confidence_sum = 0.0;

        for (index, raster) in rasters.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled(raster.page).into());
            }

            let done = index as f64;
            let outcome = {
                let mut on_pass = |passes: usize| {
                    let fraction = (done + passes as f64 / max_passes) / total;
                    progress(RASTERIZED_FRACTION + fraction * (1.0 - RASTERIZED_FRACTION));
                };
                engine.recognize_page(pdf, raster, work_dir, &mut on_pass).await
            };

            confidence_sum += outcome.confidence();
            match outcome {
                PageOutcome::Recognized(page) => {
                    result.pages.push(PageText {
                        text: page.text,
                        confidence: page.confidence,
                    });
                    result.layout.push(page.layout);
                }
                PageOutcome::Failed { page, reason } => {
                    warn!(page, reason = %reason, "page recognition failed");
                    result.pages.push(failed_page());
                }
            }

            progress(RASTERIZED_FRACTION + (done + 1.0) / total * (1.0 - RASTERIZED_FRACTION));
        }

        result.avg_confidence = confidence_sum / total;
        Ok(result)
    }
}

fn failed_page() -> PageText {
    PageText {
        text: String::new(),
        confidence: 0.0,
    }
}

pub fn born_digital_pages(text: &str) -> Vec<PageText> {
    let mut pages: Vec<PageText> = text
        .split('\u{000C}')
        .map(|chunk| PageText {
            text: chunk.replace('\u{0000}', "").trim().to_string(),
            confidence: BORN_DIGITAL_CONFIDENCE,
        })
        .collect();

    while pages.last().is_some_and(|page| page.text.is_empty()) {
        pages.pop();
    }

    pages
}
