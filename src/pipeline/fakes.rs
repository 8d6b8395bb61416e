use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, bail};

use crate::model::{LayoutMode, LayoutPage, RasterPage};

use super::tools::{PdfTools, TextRecognizer};
use super::tsv::RawWord;

// Letter size at 300 DPI.
const BASE_WIDTH_PX: u32 = 2550;
const BASE_HEIGHT_PX: u32 = 3300;

pub(crate) fn raster(page: u32, dpi: u32, dir: &Path) -> RasterPage {
    RasterPage {
        page,
        path: dir.join(format!("page-{page}-{dpi}.png")),
        width: BASE_WIDTH_PX * dpi / 300,
        height: BASE_HEIGHT_PX * dpi / 300,
        dpi,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RasterCall {
    All { dpi: u32 },
    Page { page: u32, dpi: u32 },
}

pub(crate) struct FakePdfTools {
    pub(crate) page_count: Option<u32>,
    pub(crate) text: Option<String>,
    pub(crate) fonts: usize,
    pub(crate) fail_fonts: bool,
    pub(crate) layout: Option<Vec<LayoutPage>>,
    pub(crate) layout_calls: Mutex<usize>,
    pub(crate) pages: u32,
    pub(crate) fail_rasterize_all: bool,
    pub(crate) raster_calls: Mutex<Vec<RasterCall>>,
}

impl FakePdfTools {
    pub(crate) fn scanned(pages: u32) -> Self {
        Self {
            page_count: Some(pages),
            text: Some(String::new()),
            fonts: 0,
            fail_fonts: false,
            layout: None,
            layout_calls: Mutex::new(0),
            pages,
            fail_rasterize_all: false,
            raster_calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<RasterCall> {
        self.raster_calls.lock().expect("raster calls").clone()
    }
}

impl PdfTools for FakePdfTools {
    async fn page_count(&self, _pdf: &Path) -> Result<u32> {
        match self.page_count {
            Some(count) => Ok(count),
            None => bail!("pdfinfo unavailable"),
        }
    }

    async fn embedded_text(&self, _pdf: &Path) -> Result<String> {
        match &self.text {
            Some(text) => Ok(text.clone()),
            None => bail!("pdftotext unavailable"),
        }
    }

    async fn embedded_font_count(&self, _pdf: &Path) -> Result<usize> {
        if self.fail_fonts {
            bail!("pdffonts unavailable");
        }
        Ok(self.fonts)
    }

    async fn embedded_layout(&self, _pdf: &Path) -> Result<Vec<LayoutPage>> {
        *self.layout_calls.lock().expect("layout calls") += 1;
        match &self.layout {
            Some(layout) => Ok(layout.clone()),
            None => bail!("bbox layout unavailable"),
        }
    }

    async fn rasterize_all(&self, _pdf: &Path, dpi: u32, out_dir: &Path) -> Result<Vec<RasterPage>> {
        self.raster_calls
            .lock()
            .expect("raster calls")
            .push(RasterCall::All { dpi });
        if self.fail_rasterize_all {
            bail!("pdftoppm crashed");
        }
        Ok((1..=self.pages).map(|page| raster(page, dpi, out_dir)).collect())
    }

    async fn rasterize_page(
        &self,
        _pdf: &Path,
        page: u32,
        dpi: u32,
        out_dir: &Path,
    ) -> Result<RasterPage> {
        self.raster_calls
            .lock()
            .expect("raster calls")
            .push(RasterCall::Page { page, dpi });
        Ok(raster(page, dpi, out_dir))
    }
}

// Word confidences per (page, dpi, mode); a missing entry fails the call.
#[derive(Default)]
pub(crate) struct ScriptedRecognizer {
    script: HashMap<(u32, u32, LayoutMode), Vec<f64>>,
    pub(crate) calls: Mutex<Vec<(u32, u32, LayoutMode)>>,
}

impl ScriptedRecognizer {
    pub(crate) fn with(mut self, page: u32, dpi: u32, mode: LayoutMode, confidences: &[f64]) -> Self {
        self.script.insert((page, dpi, mode), confidences.to_vec());
        self
    }

    // Same confidences for every page at the base DPI in single-column mode.
    pub(crate) fn uniform(pages: u32, confidence: f64) -> Self {
        (1..=pages).fold(Self::default(), |recognizer, page| {
            recognizer.with(page, 300, LayoutMode::SingleColumn, &[confidence; 4])
        })
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().expect("recognizer calls").len()
    }
}

impl TextRecognizer for ScriptedRecognizer {
    async fn recognize(&self, page: &RasterPage, mode: LayoutMode) -> Result<Vec<RawWord>> {
        self.calls
            .lock()
            .expect("recognizer calls")
            .push((page.page, page.dpi, mode));
        let Some(confidences) = self.script.get(&(page.page, page.dpi, mode)) else {
            bail!("tesseract exited with status 1 on page {}", page.page);
        };

        let scale = f64::from(page.dpi) / 300.0;
        Ok(confidences
            .iter()
            .enumerate()
            .map(|(index, confidence)| RawWord {
                text: format!("parola{}", index + 1),
                left: (300.0 + index as f64 * 150.0) * scale,
                top: 300.0 * scale,
                width: 120.0 * scale,
                height: 40.0 * scale,
                confidence: *confidence,
                block: Some(1),
                paragraph: Some(1),
                line: Some(1),
            })
            .collect())
    }
}
