use std::io::{self, Write};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::info;

use crate::cli::SearchArgs;
use crate::geometry::{BoundingBox, ClientRect, Rotation, SourceSpace, project, rotated_frame};
use crate::model::{DocumentResultFile, LayoutPage};
use crate::reading_order::{build, match_in_built};
use crate::util::read_json;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub rotation: Rotation,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub page: u32,
    pub token_start: usize,
    pub token_end: usize,
    pub snippet: String,
    pub bbox: BoundingBox,
    pub bbox_pct: BoundingBox,
    pub rotation: i32,
    pub client_rect: ClientRect,
}

#[derive(Debug, Serialize)]
struct SearchResponse<'a> {
    document_id: &'a str,
    filename: &'a str,
    query: &'a str,
    returned: usize,
    hits: &'a [SearchHit],
}

pub fn run(args: SearchArgs) -> Result<()> {
    let result: DocumentResultFile = read_json(&args.result)?;
    let rotation = Rotation::from_degrees(args.rotation)
        .ok_or_else(|| anyhow!("rotation must be a multiple of 90, got {}", args.rotation))?;
    let options = RenderOptions {
        rotation,
        width: args.render_width,
        height: args.render_height,
    };

    let hits = search_layout(&result.ocr.layout, &args.query, args.page, options);
    info!(
        document_id = %result.document_id,
        pages = result.ocr.layout.len(),
        hits = hits.len(),
        "search completed"
    );

    if args.json {
        let response = SearchResponse {
            document_id: &result.document_id,
            filename: &result.filename,
            query: &args.query,
            returned: hits.len(),
            hits: &hits,
        };
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, &response)
            .context("failed to serialize search json output")?;
        writeln!(output)?;
        output.flush()?;
        return Ok(());
    }

    write_text_response(&result, &args.query, &hits)
}

pub fn search_layout(
    pages: &[LayoutPage],
    query: &str,
    page_filter: Option<u32>,
    options: RenderOptions,
) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    for page in pages
        .iter()
        .filter(|page| page_filter.is_none_or(|wanted| wanted == page.page))
    {
        let built = build(&page.words, page.page_width(), page.page_height());
        let source = SourceSpace::for_layout_page(page);
        let page_rect = render_rect(source, options);

        for found in match_in_built(&built, query) {
            let client_rect = project(found.bbox, source, options.rotation, page_rect, page_rect);
            hits.push(SearchHit {
                page: page.page,
                token_start: found.token_start,
                token_end: found.token_end,
                snippet: found.snippet,
                bbox: found.bbox,
                bbox_pct: found.bbox_pct,
                rotation: options.rotation.degrees(),
                client_rect,
            });
        }
    }

    hits
}

fn render_rect(source: SourceSpace, options: RenderOptions) -> ClientRect {
    let (frame_w, frame_h) = rotated_frame(source, options.rotation);
    let (width, height) = match (options.width, options.height) {
        (Some(width), Some(height)) => (width, height),
        (Some(width), None) => (width, width * frame_h / frame_w),
        (None, Some(height)) => (height * frame_w / frame_h, height),
        (None, None) => (frame_w, frame_h),
    };
    ClientRect::new(0.0, 0.0, width, height)
}

fn write_text_response(result: &DocumentResultFile, query: &str, hits: &[SearchHit]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Document: {} ({})", result.filename, result.document_id)?;
    writeln!(output, "Query: {query}")?;
    writeln!(output, "Hits: {}", hits.len())?;

    for (index, hit) in hits.iter().enumerate() {
        writeln!(
            output,
            "{}. page={} tokens={}..{} rect=[{:.1}, {:.1}, {:.1} x {:.1}]",
            index + 1,
            hit.page,
            hit.token_start,
            hit.token_end,
            hit.client_rect.left,
            hit.client_rect.top,
            hit.client_rect.width,
            hit.client_rect.height,
        )?;
        writeln!(output, "   {}", hit.snippet)?;
    }

    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LayoutMode, Word};

    fn word(text: &str, x0: f64, y0: f64) -> Word {
        Word {
            text: text.to_string(),
            x0,
            y0,
            x1: x0 + 40.0,
            y1: y0 + 10.0,
            confidence: 90.0,
            block: Some(1),
            paragraph: Some(1),
            line: Some(1),
        }
    }

    fn page(number: u32) -> LayoutPage {
        LayoutPage {
            page: number,
            source_width: 2550.0,
            source_height: 3300.0,
            dpi_used: 300,
            psm_used: Some(LayoutMode::SingleColumn),
            bbox_scale: 72.0 / 300.0,
            words: vec![
                word("Atto", 72.0, 100.0),
                word("di", 120.0, 100.0),
                word("citazione", 168.0, 100.0),
            ],
        }
    }

    fn options(rotation: Rotation) -> RenderOptions {
        RenderOptions {
            rotation,
            width: None,
            height: None,
        }
    }

    #[test]
    fn finds_phrase_on_every_page_unless_filtered() {
        let pages = vec![page(1), page(2)];
        let all = search_layout(&pages, "atto di citazione", None, options(Rotation::Deg0));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].token_start, 0);
        assert_eq!(all[0].token_end, 2);

        let second = search_layout(&pages, "citazione", Some(2), options(Rotation::Deg0));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].page, 2);
    }

    #[test]
    fn unrotated_native_render_keeps_layout_coordinates() {
        let hits = search_layout(&[page(1)], "di", None, options(Rotation::Deg0));
        let rect = hits[0].client_rect;
        assert!((rect.left - 120.0).abs() < 1e-6);
        assert!((rect.top - 100.0).abs() < 1e-6);
        assert!((rect.width - 40.0).abs() < 1e-6);
    }

    #[test]
    fn render_width_alone_preserves_aspect_ratio() {
        let rect = render_rect(
            SourceSpace::Raster {
                width: 612.0,
                height: 792.0,
            },
            RenderOptions {
                rotation: Rotation::Deg90,
                width: Some(396.0),
                height: None,
            },
        );
        assert!((rect.width - 396.0).abs() < 1e-6);
        assert!((rect.height - 306.0).abs() < 1e-6);
    }

    #[test]
    fn quarter_turn_swaps_highlight_extent() {
        let hits = search_layout(&[page(1)], "atto", None, options(Rotation::Deg90));
        let rect = hits[0].client_rect;
        assert!((rect.width - 10.0).abs() < 1e-6);
        assert!((rect.height - 40.0).abs() < 1e-6);
    }

    #[test]
    fn unmatched_query_returns_nothing() {
        assert!(search_layout(&[page(1)], "sentenza", None, options(Rotation::Deg0)).is_empty());
    }
}
