use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::config::{BORN_DIGITAL_CONFIDENCE, CANONICAL_DPI};
use crate::model::{LayoutPage, Word};

struct OpenWord {
    bbox: Option<(f64, f64, f64, f64)>,
    text: String,
}

// Parses `pdftotext -bbox-layout` XHTML. Coordinates are already PDF points
// with a top-left origin, and page sizes keep their fractional points.
pub fn parse_bbox_layout(xhtml: &str) -> Result<Vec<LayoutPage>> {
    let mut reader = Reader::from_str(xhtml);
    reader.trim_text(true);

    let mut pages: Vec<LayoutPage> = Vec::new();
    let mut block = 0u32;
    let mut line = 0u32;
    let mut word: Option<OpenWord> = None;

    loop {
        let event = reader
            .read_event()
            .with_context(|| format!("malformed bbox layout at byte {}", reader.buffer_position()))?;
        match event {
            Event::Start(element) => match element.local_name().as_ref() {
                b"page" => {
                    pages.push(layout_page(pages.len() as u32 + 1, &element)?);
                    block = 0;
                    line = 0;
                }
                b"block" => block += 1,
                b"line" => line += 1,
                b"word" => {
                    word = Some(OpenWord {
                        bbox: word_bbox(&element)?,
                        text: String::new(),
                    });
                }
                _ => {}
            },
            Event::Empty(element) if element.local_name().as_ref() == b"page" => {
                pages.push(layout_page(pages.len() as u32 + 1, &element)?);
            }
            Event::Text(text) => {
                if let Some(open) = word.as_mut() {
                    open.text
                        .push_str(&text.unescape().context("invalid character reference in word")?);
                }
            }
            Event::End(element) if element.local_name().as_ref() == b"word" => {
                let (Some(open), Some(page)) = (word.take(), pages.last_mut()) else {
                    continue;
                };
                let text = open.text.trim();
                let Some((x0, y0, x1, y1)) = open.bbox else {
                    continue;
                };
                if text.is_empty() {
                    continue;
                }
                page.words.push(Word {
                    text: text.to_string(),
                    x0,
                    y0,
                    x1,
                    y1,
                    confidence: BORN_DIGITAL_CONFIDENCE,
                    block: (block > 0).then_some(block),
                    paragraph: None,
                    line: (line > 0).then_some(line),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(pages)
}

fn layout_page(page: u32, element: &BytesStart<'_>) -> Result<LayoutPage> {
    Ok(LayoutPage {
        page,
        source_width: number(element, b"width")?.unwrap_or(0.0).max(0.0),
        source_height: number(element, b"height")?.unwrap_or(0.0).max(0.0),
        dpi_used: CANONICAL_DPI as u32,
        psm_used: None,
        bbox_scale: 1.0,
        words: Vec::new(),
    })
}

fn word_bbox(element: &BytesStart<'_>) -> Result<Option<(f64, f64, f64, f64)>> {
    let (Some(x0), Some(y0), Some(x1), Some(y1)) = (
        number(element, b"xMin")?,
        number(element, b"yMin")?,
        number(element, b"xMax")?,
        number(element, b"yMax")?,
    ) else {
        return Ok(None);
    };
    Ok(Some((x0, y0, x1, y1)))
}

fn number(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<f64>> {
    for attribute in element.attributes() {
        let attribute = attribute.context("malformed attribute in bbox layout")?;
        if attribute.key.local_name().as_ref() != name {
            continue;
        }
        let value = attribute
            .unescape_value()
            .context("invalid attribute value in bbox layout")?;
        return Ok(value.trim().parse::<f64>().ok());
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
<title></title>
<meta name="Producer" content="Microsoft&#174; Word"/>
</head>
<body>
<doc>
  <page width="612.000000" height="792.000000">
    <flow>
      <block xMin="72.0" yMin="70.0" xMax="300.0" yMax="84.0">
        <line xMin="72.0" yMin="70.0" xMax="300.0" yMax="84.0">
          <word xMin="72.000000" yMin="70.500000" xMax="130.250000" yMax="83.900000">Tribunale</word>
          <word xMin="134.000000" yMin="70.500000" xMax="146.000000" yMax="83.900000">di</word>
        </line>
        <line xMin="72.0" yMin="90.0" xMax="300.0" yMax="104.0">
          <word xMin="72.000000" yMin="90.000000" xMax="120.000000" yMax="104.000000">R&amp;S</word>
        </line>
      </block>
    </flow>
  </page>
  <page width="595.280000" height="841.890000">
    <flow>
      <block xMin="50.0" yMin="50.0" xMax="90.0" yMax="60.0">
        <line xMin="50.0" yMin="50.0" xMax="90.0" yMax="60.0">
          <word xMin="50.0" yMin="50.0" xMax="90.0" yMax="60.0">Milano</word>
        </line>
      </block>
    </flow>
  </page>
</doc>
</body>
</html>"#;

    #[test]
    fn words_keep_point_coordinates_and_nesting() {
        let pages = parse_bbox_layout(SAMPLE).expect("parse");
        assert_eq!(pages.len(), 2);

        let first = &pages[0];
        assert_eq!((first.source_width, first.source_height), (612.0, 792.0));
        assert!(first.is_embedded_text());
        assert_eq!(first.dpi_used, 72);
        assert_eq!(first.words.len(), 3);
        assert_eq!(first.words[0].text, "Tribunale");
        assert_eq!(first.words[0].x1, 130.25);
        assert_eq!(first.words[0].line, Some(1));
        assert_eq!(first.words[2].text, "R&S");
        assert_eq!(first.words[2].line, Some(2));
        assert_eq!(first.words[2].block, Some(1));

        let second = &pages[1];
        assert_eq!(second.page, 2);
        assert_eq!(second.words[0].block, Some(1));
        assert_eq!(second.words[0].line, Some(1));
    }

    #[test]
    fn a4_page_size_keeps_fractional_points() {
        let pages = parse_bbox_layout(SAMPLE).expect("parse");
        let a4 = &pages[1];
        assert_eq!((a4.source_width, a4.source_height), (595.28, 841.89));
        assert_eq!((a4.page_width(), a4.page_height()), (595.28, 841.89));
    }

    #[test]
    fn numeric_references_and_attribute_order_are_handled() {
        let xhtml = r#"<doc>
  <page height="841.89"
        width="595.28">
    <flow><block><line>
      <word yMax="60.0" xMax="90.0"   yMin="50.0" xMin="50.0">Citt&#224;</word>
      <word xMin="95.0" yMin="50.0" xMax="130.0" yMax="60.0">perch&#xE9;</word>
      <word xMin="135.0" yMin="50.0" xMax="150.0" yMax="60.0"> </word>
      <word xMin="155.0" yMin="50.0" xMax="170.0">orfana</word>
    </line></block></flow>
  </page>
</doc>"#;

        let pages = parse_bbox_layout(xhtml).expect("parse");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].source_width, 595.28);

        let words: Vec<&str> = pages[0].words.iter().map(|word| word.text.as_str()).collect();
        assert_eq!(words, vec!["Città", "perché"]);
        let first = &pages[0].words[0];
        assert_eq!((first.x0, first.y0, first.x1, first.y1), (50.0, 50.0, 90.0, 60.0));
    }

    #[test]
    fn malformed_markup_is_an_error() {
        let err = parse_bbox_layout(r#"<doc><page width="612" height="792"><word xMin="1"></page></doc>"#)
            .expect_err("mismatched tags");
        assert!(format!("{err:#}").contains("malformed bbox layout"));
    }

    #[test]
    fn empty_document_yields_no_pages() {
        assert!(parse_bbox_layout("").expect("parse").is_empty());
    }
}
