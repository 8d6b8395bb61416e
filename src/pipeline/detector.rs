use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{DetectorConfig, UNIQUE_CHAR_WINDOW};
use crate::text::condense_whitespace;

use super::tools::PdfTools;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSignals {
    pub chars_per_page: f64,
    pub unique_char_ratio: f64,
    pub non_whitespace_ratio: f64,
    pub font_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub born_digital: bool,
    pub text: String,
    pub signals: Option<TextSignals>,
}

impl Detection {
    fn no_evidence() -> Self {
        Self {
            born_digital: false,
            text: String::new(),
            signals: None,
        }
    }
}

pub fn text_signals(text: &str, page_count: u32, font_count: usize) -> TextSignals {
    let condensed = condense_whitespace(text);
    let length = condensed.chars().count();
    if length == 0 {
        return TextSignals {
            chars_per_page: 0.0,
            unique_char_ratio: 0.0,
            non_whitespace_ratio: 0.0,
            font_count,
        };
    }

    let characters: Vec<char> = condensed.chars().collect();
    // Distinct glyphs are counted per window.
    let distinct: usize = characters
        .chunks(UNIQUE_CHAR_WINDOW)
        .map(|window| window.iter().collect::<HashSet<&char>>().len())
        .sum();
    let non_whitespace = characters
        .iter()
        .filter(|character| !character.is_whitespace())
        .count();

    TextSignals {
        chars_per_page: length as f64 / f64::from(page_count.max(1)),
        unique_char_ratio: distinct as f64 / length as f64,
        non_whitespace_ratio: non_whitespace as f64 / length as f64,
        font_count,
    }
}

pub fn assess(signals: &TextSignals, config: &DetectorConfig) -> bool {
    signals.chars_per_page > config.min_chars_per_page
        && signals.font_count > 0
        && signals.unique_char_ratio >= config.min_unique_char_ratio
        && signals.non_whitespace_ratio >= config.min_non_whitespace_ratio
}

pub async fn detect<P: PdfTools>(
    tools: &P,
    pdf: &Path,
    page_count: u32,
    config: &DetectorConfig,
) -> Detection {
    let text = match tools.embedded_text(pdf).await {
        Ok(text) => text,
        Err(err) => {
            warn!(pdf = %pdf.display(), error = %err, "embedded text extraction failed");
            return Detection::no_evidence();
        }
    };
    let font_count = match tools.embedded_font_count(pdf).await {
        Ok(count) => count,
        Err(err) => {
            warn!(pdf = %pdf.display(), error = %err, "font listing failed");
            return Detection::no_evidence();
        }
    };

    let signals = text_signals(&text, page_count, font_count);
    let born_digital = assess(&signals, config);
    debug!(
        pdf = %pdf.display(),
        chars_per_page = signals.chars_per_page,
        unique_char_ratio = signals.unique_char_ratio,
        non_whitespace_ratio = signals.non_whitespace_ratio,
        font_count,
        born_digital,
        "born-digital assessment"
    );

    Detection {
        born_digital,
        text,
        signals: Some(signals),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fakes::FakePdfTools;

    fn legal_prose(chars: usize) -> String {
        let sentence = "Il Tribunale di Milano, sezione penale, letti gli atti del procedimento n. 1234/2023 R.G.N.R., osserva quanto segue. ";
        sentence.chars().cycle().take(chars).collect()
    }

    #[test]
    fn dense_text_with_fonts_is_born_digital() {
        let signals = text_signals(&legal_prose(5000), 1, 3);
        assert!(signals.chars_per_page > 4900.0);
        assert!(assess(&signals, &DetectorConfig::default()));
    }

    #[test]
    fn missing_fonts_rule_out_born_digital() {
        let signals = text_signals(&legal_prose(5000), 1, 0);
        assert!(!assess(&signals, &DetectorConfig::default()));
    }

    #[test]
    fn sparse_text_is_not_born_digital() {
        // 150 chars over 1 page is below the 200 char threshold.
        let signals = text_signals(&legal_prose(150), 1, 2);
        assert!(!assess(&signals, &DetectorConfig::default()));

        let signals = text_signals(&legal_prose(1000), 10, 2);
        assert!((signals.chars_per_page - 100.0).abs() < 1.0);
        assert!(!assess(&signals, &DetectorConfig::default()));
    }

    #[test]
    fn repetitive_garbage_fails_the_uniqueness_gate() {
        // OCR'd scans often carry a junk text layer of repeated glyphs.
        let garbage = "l l l l ".repeat(400);
        let signals = text_signals(&garbage, 1, 1);
        assert!(signals.unique_char_ratio < 0.15);
        assert!(!assess(&signals, &DetectorConfig::default()));
    }

    #[test]
    fn short_text_uses_the_plain_distinct_ratio() {
        // 4 distinct characters over 8.
        let signals = text_signals("abcdabcd", 1, 1);
        assert!((signals.unique_char_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_text_has_zero_signals() {
        let signals = text_signals(" \n\u{000C} ", 3, 1);
        assert_eq!(signals.chars_per_page, 0.0);
        assert_eq!(signals.unique_char_ratio, 0.0);
        assert_eq!(signals.non_whitespace_ratio, 0.0);
    }

    #[test]
    fn whitespace_runs_are_collapsed_before_measuring() {
        let padded = format!("{}{}", legal_prose(300), " ".repeat(5000));
        let signals = text_signals(&padded, 1, 1);
        assert!(signals.chars_per_page < 301.0);
        assert!(signals.non_whitespace_ratio > 0.6);
    }

    #[tokio::test]
    async fn failed_font_listing_is_no_evidence() {
        let mut tools = FakePdfTools::scanned(1);
        tools.text = Some(legal_prose(5000));
        tools.fonts = 3;
        tools.fail_fonts = true;

        let detection = detect(&tools, Path::new("atto.pdf"), 1, &DetectorConfig::default()).await;
        assert!(!detection.born_digital);
        assert!(detection.signals.is_none());
        assert!(detection.text.is_empty());
    }

    #[tokio::test]
    async fn failed_text_extraction_is_no_evidence() {
        let mut tools = FakePdfTools::scanned(1);
        tools.text = None;
        tools.fonts = 3;

        let detection = detect(&tools, Path::new("atto.pdf"), 1, &DetectorConfig::default()).await;
        assert_eq!(detection, Detection::no_evidence());
    }
}
