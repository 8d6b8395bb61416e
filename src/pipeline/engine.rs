use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::{CANONICAL_DPI, RecognitionTiers};
use crate::model::{LayoutMode, LayoutPage, RasterPage, Word};
use crate::reading_order;

use super::tools::{PdfTools, TextRecognizer};
use super::tsv::RawWord;

#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedPage {
    pub page: u32,
    pub confidence: f64,
    pub text: String,
    pub layout: LayoutPage,
    pub passes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Recognized(RecognizedPage),
    Failed { page: u32, reason: String },
}

impl PageOutcome {
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Recognized(page) => page.confidence,
            Self::Failed { .. } => 0.0,
        }
    }
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[middle]
    } else {
        (sorted[middle - 1] + sorted[middle]) / 2.0
    }
}

pub fn low_confidence_ratio(words: &[RawWord], low_word_confidence: f64) -> f64 {
    if words.is_empty() {
        return 1.0;
    }
    let low = words
        .iter()
        .filter(|word| word.confidence < low_word_confidence)
        .count();
    low as f64 / words.len() as f64
}

struct Pass {
    raster: RasterPage,
    mode: LayoutMode,
    words: Vec<RawWord>,
    median: f64,
}

impl Pass {
    fn new(raster: &RasterPage, mode: LayoutMode, words: Vec<RawWord>) -> Self {
        let confidences: Vec<f64> = words.iter().map(|word| word.confidence).collect();
        Self {
            raster: raster.clone(),
            mode,
            median: median(&confidences),
            words,
        }
    }

    fn into_recognized(self, passes: usize) -> RecognizedPage {
        let dpi = self.raster.dpi.max(1);
        let scale = CANONICAL_DPI / f64::from(dpi);
        let words: Vec<Word> = self
            .words
            .into_iter()
            .map(|word| Word {
                text: word.text,
                x0: word.left * scale,
                y0: word.top * scale,
                x1: (word.left + word.width) * scale,
                y1: (word.top + word.height) * scale,
                confidence: word.confidence,
                block: word.block,
                paragraph: word.paragraph,
                line: word.line,
            })
            .collect();

        let layout = LayoutPage {
            page: self.raster.page,
            source_width: f64::from(self.raster.width),
            source_height: f64::from(self.raster.height),
            dpi_used: dpi,
            psm_used: Some(self.mode),
            bbox_scale: scale,
            words,
        };
        let text = reading_order::build(&layout.words, layout.page_width(), layout.page_height())
            .plain_text();

        RecognizedPage {
            page: self.raster.page,
            confidence: self.median,
            text,
            layout,
            passes,
        }
    }
}

pub struct RecognitionEngine<'a, P, R> {
    pdf_tools: &'a P,
    recognizer: &'a R,
    tiers: &'a RecognitionTiers,
}

impl<'a, P: PdfTools, R: TextRecognizer> RecognitionEngine<'a, P, R> {
    pub fn new(pdf_tools: &'a P, recognizer: &'a R, tiers: &'a RecognitionTiers) -> Self {
        Self {
            pdf_tools,
            recognizer,
            tiers,
        }
    }

    // `pdf` is None for image documents, which cannot be re-rasterized.
    pub async fn recognize_page(
        &self,
        pdf: Option<&Path>,
        base_raster: &RasterPage,
        work_dir: &Path,
        on_pass: &mut (dyn FnMut(usize) + Send),
    ) -> PageOutcome {
        let page = base_raster.page;
        let mut best: Option<Pass> = None;
        let mut passes = 0usize;

        for (tier_index, &dpi) in self.tiers.dpi_tiers.iter().enumerate() {
            let raster = if tier_index == 0 {
                base_raster.clone()
            } else {
                if best
                    .as_ref()
                    .is_some_and(|pass| pass.median >= self.tiers.page_confidence_floor)
                {
                    break;
                }
                let Some(pdf) = pdf else {
                    break;
                };
                match self.pdf_tools.rasterize_page(pdf, page, dpi, work_dir).await {
                    Ok(raster) => raster,
                    Err(err) => {
                        warn!(page, dpi, error = %err, "escalated rasterization failed");
                        break;
                    }
                }
            };

            let base = match self.run_pass(&raster, self.tiers.base_mode).await {
                Ok(pass) => pass,
                Err(reason) if best.is_none() => return PageOutcome::Failed { page, reason },
                Err(_) => break,
            };
            passes += 1;
            on_pass(passes);

            let mut tier_best = base;
            if self.needs_layout_retry(&tier_best) {
                if let Ok(retry) = self.run_pass(&raster, self.tiers.retry_mode).await {
                    passes += 1;
                    on_pass(passes);
                    if retry.median > tier_best.median {
                        tier_best = retry;
                    }
                }
            }

            if best
                .as_ref()
                .is_none_or(|current| tier_best.median > current.median)
            {
                best = Some(tier_best);
            }
        }

        match best {
            Some(pass) => {
                let recognized = pass.into_recognized(passes);
                info!(
                    page,
                    dpi = recognized.layout.dpi_used,
                    psm = ?recognized.layout.psm_used,
                    median = recognized.confidence,
                    passes,
                    "page recognized"
                );
                PageOutcome::Recognized(recognized)
            }
            None => PageOutcome::Failed {
                page,
                reason: "no recognition pass completed".to_string(),
            },
        }
    }

    async fn run_pass(&self, raster: &RasterPage, mode: LayoutMode) -> Result<Pass, String> {
        match self.recognizer.recognize(raster, mode).await {
            Ok(words) => {
                let pass = Pass::new(raster, mode, words);
                debug!(
                    page = raster.page,
                    dpi = raster.dpi,
                    psm = %mode,
                    median = pass.median,
                    words = pass.words.len(),
                    "recognition pass"
                );
                Ok(pass)
            }
            Err(err) => {
                warn!(
                    page = raster.page,
                    dpi = raster.dpi,
                    psm = %mode,
                    error = %err,
                    "recognition pass failed"
                );
                Err(format!("{err:#}"))
            }
        }
    }

    fn needs_layout_retry(&self, base: &Pass) -> bool {
        base.median < self.tiers.page_confidence_floor
            || low_confidence_ratio(&base.words, self.tiers.low_word_confidence)
                > self.tiers.low_word_ratio_limit
    }
}
