use std::ffi::OsStr;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::process::Command;
use tracing::debug;

use crate::config::ToolConfig;
use crate::model::{LayoutMode, LayoutPage, RasterPage, ToolVersions};

use super::embedded::parse_bbox_layout;
use super::tsv::{RawWord, parse_tsv};

const RASTER_PREFIX: &str = "page";

pub trait PdfTools: Send + Sync {
    fn page_count(&self, pdf: &Path) -> impl Future<Output = Result<u32>> + Send;

    fn embedded_text(&self, pdf: &Path) -> impl Future<Output = Result<String>> + Send;

    fn embedded_font_count(&self, pdf: &Path) -> impl Future<Output = Result<usize>> + Send;

    fn embedded_layout(&self, pdf: &Path) -> impl Future<Output = Result<Vec<LayoutPage>>> + Send;

    fn rasterize_all(
        &self,
        pdf: &Path,
        dpi: u32,
        out_dir: &Path,
    ) -> impl Future<Output = Result<Vec<RasterPage>>> + Send;

    fn rasterize_page(
        &self,
        pdf: &Path,
        page: u32,
        dpi: u32,
        out_dir: &Path,
    ) -> impl Future<Output = Result<RasterPage>> + Send;
}

pub trait TextRecognizer: Send + Sync {
    fn recognize(
        &self,
        page: &RasterPage,
        mode: LayoutMode,
    ) -> impl Future<Output = Result<Vec<RawWord>>> + Send;
}

async fn run_tool(mut command: Command, label: &str, timeout: Duration) -> Result<Vec<u8>> {
    command.stdin(Stdio::null()).kill_on_drop(true);
    debug!(tool = label, timeout_secs = timeout.as_secs(), "running external tool");

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| anyhow!("{label} timed out after {}s", timeout.as_secs()))?
        .with_context(|| format!("failed to execute {label}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{label} returned non-zero exit status: {}", stderr.trim());
    }

    Ok(output.stdout)
}

fn lossy_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\u{0000}', "")
}

pub fn parse_page_count(pdfinfo: &str) -> Option<u32> {
    pdfinfo.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Pages:")?;
        rest.trim().parse::<u32>().ok()
    })
}

pub fn count_font_rows(pdffonts: &str) -> usize {
    pdffonts
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("name") && !line.starts_with("---"))
        .count()
}

pub fn raster_page_from_file(path: &Path, page: u32, dpi: u32) -> Result<RasterPage> {
    let (width, height) = image::image_dimensions(path)
        .with_context(|| format!("failed to read raster dimensions of {}", path.display()))?;
    Ok(RasterPage {
        page,
        path: path.to_path_buf(),
        width,
        height,
        dpi,
    })
}

fn raster_page_number(path: &Path) -> Option<u32> {
    if path.extension().and_then(|value| value.to_str()) != Some("png") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let number = stem.strip_prefix(RASTER_PREFIX)?.strip_prefix('-')?;
    number.parse::<u32>().ok()
}

#[derive(Debug, Clone)]
pub struct PopplerTools {
    config: ToolConfig,
}

impl PopplerTools {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    fn command(&self, name: &str) -> Command {
        Command::new(self.config.poppler_bin(name))
    }

    async fn run(&self, name: &str, args: &[&OsStr]) -> Result<Vec<u8>> {
        let mut command = self.command(name);
        command.args(args);
        run_tool(command, name, self.config.timeout).await
    }
}

impl PdfTools for PopplerTools {
    async fn page_count(&self, pdf: &Path) -> Result<u32> {
        let stdout = self.run("pdfinfo", &[pdf.as_os_str()]).await?;
        parse_page_count(&lossy_text(&stdout))
            .ok_or_else(|| anyhow!("pdfinfo reported no page count for {}", pdf.display()))
    }

    async fn embedded_text(&self, pdf: &Path) -> Result<String> {
        let stdout = self
            .run(
                "pdftotext",
                &[OsStr::new("-layout"), pdf.as_os_str(), OsStr::new("-")],
            )
            .await?;
        Ok(lossy_text(&stdout))
    }

    async fn embedded_font_count(&self, pdf: &Path) -> Result<usize> {
        let stdout = self.run("pdffonts", &[pdf.as_os_str()]).await?;
        Ok(count_font_rows(&lossy_text(&stdout)))
    }

    async fn embedded_layout(&self, pdf: &Path) -> Result<Vec<LayoutPage>> {
        let stdout = self
            .run(
                "pdftotext",
                &[OsStr::new("-bbox-layout"), pdf.as_os_str(), OsStr::new("-")],
            )
            .await?;
        parse_bbox_layout(&lossy_text(&stdout))
            .with_context(|| format!("failed to parse bbox layout of {}", pdf.display()))
    }

    async fn rasterize_all(&self, pdf: &Path, dpi: u32, out_dir: &Path) -> Result<Vec<RasterPage>> {
        let dpi_arg = dpi.to_string();
        let prefix = out_dir.join(RASTER_PREFIX);
        self.run(
            "pdftoppm",
            &[
                OsStr::new("-r"),
                OsStr::new(&dpi_arg),
                OsStr::new("-png"),
                OsStr::new("-cropbox"),
                pdf.as_os_str(),
                prefix.as_os_str(),
            ],
        )
        .await
        .with_context(|| format!("failed to rasterize {} at {dpi} DPI", pdf.display()))?;

        let mut numbered: Vec<(u32, PathBuf)> = fs::read_dir(out_dir)
            .with_context(|| format!("failed to read {}", out_dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter_map(|path| raster_page_number(&path).map(|page| (page, path)))
            .collect();
        // pdftoppm zero-pads to the page count width, so sort numerically.
        numbered.sort_by_key(|(page, _)| *page);

        numbered
            .into_iter()
            .map(|(page, path)| raster_page_from_file(&path, page, dpi))
            .collect()
    }

    async fn rasterize_page(
        &self,
        pdf: &Path,
        page: u32,
        dpi: u32,
        out_dir: &Path,
    ) -> Result<RasterPage> {
        let dpi_arg = dpi.to_string();
        let page_arg = page.to_string();
        let prefix = out_dir.join(format!("{RASTER_PREFIX}_{page}_{dpi}dpi"));
        self.run(
            "pdftoppm",
            &[
                OsStr::new("-r"),
                OsStr::new(&dpi_arg),
                OsStr::new("-f"),
                OsStr::new(&page_arg),
                OsStr::new("-l"),
                OsStr::new(&page_arg),
                OsStr::new("-singlefile"),
                OsStr::new("-png"),
                OsStr::new("-cropbox"),
                pdf.as_os_str(),
                prefix.as_os_str(),
            ],
        )
        .await
        .with_context(|| format!("failed to rasterize page {page} at {dpi} DPI"))?;

        let png_path = prefix.with_extension("png");
        if !png_path.exists() {
            bail!("pdftoppm did not produce expected image for page {page} at {dpi} DPI");
        }
        raster_page_from_file(&png_path, page, dpi)
    }
}

#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    config: ToolConfig,
}

impl TesseractRecognizer {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }
}

impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, page: &RasterPage, mode: LayoutMode) -> Result<Vec<RawWord>> {
        let mut command = Command::new(&self.config.tesseract_path);
        command
            .arg(&page.path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.config.ocr_lang)
            .arg("--oem")
            .arg("1")
            .arg("--psm")
            .arg(mode.psm().to_string())
            .arg("-c")
            .arg("preserve_interword_spaces=1");
        if let Some(tessdata) = &self.config.tessdata_dir {
            command.arg("--tessdata-dir").arg(tessdata);
            command.env("TESSDATA_PREFIX", tessdata);
        }
        command.arg("tsv");

        let stdout = run_tool(command, "tesseract", self.config.timeout)
            .await
            .with_context(|| {
                format!(
                    "failed to recognize page {} at {} DPI ({mode})",
                    page.page, page.dpi
                )
            })?;
        parse_tsv(&lossy_text(&stdout))
    }
}

pub fn collect_tool_versions(config: &ToolConfig) -> ToolVersions {
    let poppler = |name: &str| command_version_optional(&config.poppler_bin(name), &["-v"]);
    ToolVersions {
        pdfinfo: poppler("pdfinfo"),
        pdftotext: poppler("pdftotext"),
        pdffonts: poppler("pdffonts"),
        pdftoppm: poppler("pdftoppm"),
        tesseract: command_version_optional(&config.tesseract_path, &["--version"]),
    }
}

fn command_version_optional(program: &Path, args: &[&str]) -> Option<String> {
    let output = std::process::Command::new(program).args(args).output().ok()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let source = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };

    source
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_reads_pages_line() {
        let info = "Title:          Atto\nProducer:       Scanner\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_page_count(info), Some(12));
        assert_eq!(parse_page_count("Title: x\n"), None);
    }

    #[test]
    fn font_rows_skip_header_and_separator() {
        let fonts = "name                                 type              encoding         emb sub uni object ID\n\
                     ------------------------------------ ----------------- ---------------- --- --- --- ---------\n\
                     ABCDEE+Calibri                       CID TrueType      Identity-H       yes yes yes      5  0\n\
                     ABCDEE+Calibri-Bold                  CID TrueType      Identity-H       yes yes yes      9  0\n";
        assert_eq!(count_font_rows(fonts), 2);
        assert_eq!(
            count_font_rows("name type encoding emb sub uni object ID\n---- ----\n"),
            0
        );
    }

    #[test]
    fn raster_names_sort_numerically() {
        assert_eq!(raster_page_number(Path::new("/tmp/page-07.png")), Some(7));
        assert_eq!(raster_page_number(Path::new("/tmp/page-123.png")), Some(123));
        assert_eq!(raster_page_number(Path::new("/tmp/page-1.ppm")), None);
        assert_eq!(raster_page_number(Path::new("/tmp/page_2_450dpi.png")), None);
        assert_eq!(raster_page_number(Path::new("/tmp/atto.pdf")), None);
    }

    #[test]
    fn raster_dimensions_come_from_the_image_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("page-1.png");
        image::RgbImage::new(31, 17).save(&path).expect("save png");
        let raster = raster_page_from_file(&path, 1, 300).expect("raster");
        assert_eq!((raster.width, raster.height, raster.dpi), (31, 17, 300));
    }
}
