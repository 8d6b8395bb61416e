pub mod rules;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::{
    CLASSIFY_TEXT_WINDOW_CHARS, FILENAME_MATCH_BONUS, MAX_CLASSIFICATION_CONFIDENCE,
    MEDIA_FILE_BONUS,
};
use crate::model::ClassificationResult;
use crate::source::file_extension;
use crate::text::{normalize, truncate_chars};

use self::rules::{DEFAULT_RULES, EVIDENCE_BUCKET, MEDIA_EXTENSIONS, RuleSpec, UNCLASSIFIED_BUCKET};

pub const NEEDS_REVIEW_TAG: &str = "needs_review";
pub const LOW_CONFIDENCE_TAG: &str = "low_confidence";
const MAX_KEYWORD_TAGS: usize = 3;

#[derive(Debug, Clone)]
struct KeywordPattern {
    label: String,
    regex: Regex,
}

#[derive(Debug, Clone)]
pub struct ClassificationRule {
    bucket_key: String,
    patterns: Vec<KeywordPattern>,
    base_confidence: u32,
    tags: Vec<String>,
}

impl ClassificationRule {
    pub fn compile(spec: &RuleSpec) -> Result<Self> {
        let patterns = spec
            .patterns
            .iter()
            .map(|(label, pattern)| {
                let regex = Regex::new(pattern).with_context(|| {
                    format!("invalid pattern {pattern:?} for bucket {}", spec.bucket_key)
                })?;
                Ok(KeywordPattern {
                    label: (*label).to_string(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            bucket_key: spec.bucket_key.to_string(),
            patterns,
            base_confidence: spec.base_confidence,
            tags: spec.tags.iter().map(|tag| (*tag).to_string()).collect(),
        })
    }

    pub fn bucket_key(&self) -> &str {
        &self.bucket_key
    }
}

#[derive(Debug, Default)]
struct RuleScore {
    score: u32,
    matched_labels: Vec<String>,
    reasons: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassificationRule>,
    threshold: u32,
}

impl Classifier {
    pub fn new(rules: Vec<ClassificationRule>, threshold: u32) -> Self {
        Self { rules, threshold }
    }

    pub fn with_default_rules(threshold: u32) -> Result<Self> {
        let rules = DEFAULT_RULES
            .iter()
            .map(ClassificationRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules, threshold))
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn classify(&self, text: &str, filename: &str) -> ClassificationResult {
        let normalized_text = normalize(text);
        let window = truncate_chars(&normalized_text, CLASSIFY_TEXT_WINDOW_CHARS);
        let normalized_filename = normalize(filename);
        let is_media = file_extension(filename)
            .map(|extension| MEDIA_EXTENSIONS.contains(&extension.as_str()))
            .unwrap_or(false);

        let mut best: Option<(&ClassificationRule, RuleScore)> = None;
        for rule in &self.rules {
            let scored = score_rule(rule, window, &normalized_filename, is_media);
            let best_score = best.as_ref().map(|(_, current)| current.score).unwrap_or(0);
            if scored.score > best_score {
                best = Some((rule, scored));
            }
        }

        let result = match best {
            Some((rule, scored)) => {
                let mut tags = rule.tags.clone();
                for label in scored.matched_labels.into_iter().take(MAX_KEYWORD_TAGS) {
                    if !tags.contains(&label) {
                        tags.push(label);
                    }
                }
                ClassificationResult {
                    bucket_key: rule.bucket_key.clone(),
                    tags,
                    confidence: scored.score,
                    rationale: format!("Matched: {}", scored.reasons.join(", ")),
                }
            }
            None => ClassificationResult {
                bucket_key: UNCLASSIFIED_BUCKET.to_string(),
                tags: Vec::new(),
                confidence: 0,
                rationale: "No rule matched".to_string(),
            },
        };

        self.apply_gate(result)
    }

    fn apply_gate(&self, result: ClassificationResult) -> ClassificationResult {
        if result.confidence >= self.threshold {
            return result;
        }
        ClassificationResult {
            bucket_key: UNCLASSIFIED_BUCKET.to_string(),
            tags: vec![NEEDS_REVIEW_TAG.to_string(), LOW_CONFIDENCE_TAG.to_string()],
            confidence: result.confidence,
            rationale: format!(
                "Low confidence ({}%, threshold {}%): {}",
                result.confidence, self.threshold, result.rationale
            ),
        }
    }
}

fn score_rule(
    rule: &ClassificationRule,
    text: &str,
    filename: &str,
    is_media: bool,
) -> RuleScore {
    let mut scored = RuleScore::default();

    for pattern in &rule.patterns {
        if pattern.regex.is_match(text) {
            scored.score += rule.base_confidence;
            scored.matched_labels.push(pattern.label.clone());
            scored.reasons.push(format!("keyword \"{}\"", pattern.label));
        }
        if pattern.regex.is_match(filename) {
            scored.score += FILENAME_MATCH_BONUS;
            scored
                .reasons
                .push(format!("filename contains \"{}\"", pattern.label));
        }
    }

    if rule.bucket_key == EVIDENCE_BUCKET && is_media {
        scored.score += MEDIA_FILE_BONUS;
        scored.reasons.push("media file extension".to_string());
    }

    scored.score = scored.score.min(MAX_CLASSIFICATION_CONFIDENCE);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::with_default_rules(60).expect("default rules compile")
    }

    #[test]
    fn denuncia_querela_text_lands_in_its_bucket() {
        let result = classifier().classify("DENUNCIA QUERELA del sig. Rossi", "doc1.pdf");
        assert_eq!(result.bucket_key, "denuncia_querela");
        assert!(result.confidence >= 75);
        assert!(result.tags.contains(&"denuncia".to_string()));
        assert!(result.rationale.contains("querela"));
    }

    #[test]
    fn scores_are_clamped_to_one_hundred() {
        let result = classifier().classify(
            "Ordinanza del GIP, decreto e sentenza del tribunale collegiale",
            "ordinanza.pdf",
        );
        assert_eq!(result.bucket_key, "provvedimenti_giudice");
        assert_eq!(result.confidence, 100);
        assert!(result.rationale.contains("filename contains \"ordinanza\""));
    }

    #[test]
    fn below_threshold_routes_to_review_bucket() {
        // A filename-only hit scores 10, well under any sane gate.
        let result = classifier().classify("testo generico senza parole chiave", "perizia.pdf");
        assert_eq!(result.bucket_key, UNCLASSIFIED_BUCKET);
        assert_eq!(result.confidence, 10);
        assert_eq!(result.tags, vec!["needs_review", "low_confidence"]);
        assert!(result.rationale.starts_with("Low confidence (10%"));
        assert!(result.rationale.contains("perizia"));
    }

    #[test]
    fn gate_holds_for_every_threshold() {
        let samples = [
            ("querela", "a.pdf"),
            ("nulla di rilevante", "foto.jpg"),
            ("verbale di udienza, lista testi", "udienza.pdf"),
            ("", "vuoto.pdf"),
        ];
        for threshold in [0, 15, 60, 75, 100, 101] {
            let classifier = Classifier::with_default_rules(threshold).expect("rules");
            for (text, filename) in samples {
                let result = classifier.classify(text, filename);
                if result.confidence < threshold {
                    assert_eq!(result.bucket_key, UNCLASSIFIED_BUCKET);
                } else {
                    assert!(!result.tags.contains(&LOW_CONFIDENCE_TAG.to_string()));
                }
            }
        }
    }

    #[test]
    fn no_match_scores_zero() {
        let result = Classifier::with_default_rules(0)
            .expect("rules")
            .classify("lorem ipsum", "x.pdf");
        assert_eq!(result.bucket_key, UNCLASSIFIED_BUCKET);
        assert_eq!(result.confidence, 0);
    }

    #[test]
    fn ties_keep_the_earlier_rule() {
        // One hit each for denuncia_querela (75) and udienze_verbali (75).
        let result = classifier().classify("esposto e dibattimento", "x.pdf");
        assert_eq!(result.bucket_key, "denuncia_querela");
        assert_eq!(result.confidence, 75);
    }

    #[test]
    fn media_extension_boosts_evidence_bucket() {
        let result = Classifier::with_default_rules(0)
            .expect("rules")
            .classify("", "registrazione.MP3");
        assert_eq!(result.bucket_key, EVIDENCE_BUCKET);
        assert_eq!(result.confidence, 15);

        let result = classifier().classify("screenshot della chat whatsapp", "chat.png");
        assert_eq!(result.bucket_key, EVIDENCE_BUCKET);
        assert_eq!(result.confidence, 100);
    }

    #[test]
    fn only_the_leading_window_is_scanned() {
        let padding = "x".repeat(CLASSIFY_TEXT_WINDOW_CHARS);
        let result = classifier().classify(&format!("{padding} querela"), "x.pdf");
        assert_eq!(result.bucket_key, UNCLASSIFIED_BUCKET);
        assert_eq!(result.confidence, 0);
    }

    #[test]
    fn accented_text_matches_plain_patterns() {
        let result = classifier().classify("Copia del documento d'identità e dati anagrafici", "x.pdf");
        assert_eq!(result.bucket_key, "parti_anagrafiche");
        assert_eq!(result.confidence, 100);
        assert!(result.tags.contains(&"documento identità".to_string()));
    }

    #[test]
    fn keyword_tags_are_capped_at_three() {
        let result = classifier().classify(
            "procura della repubblica, polizia giudiziaria, perquisizione, invito a presentarsi",
            "x.pdf",
        );
        assert_eq!(result.bucket_key, "indagini_preliminari");
        // perquisizione is already a rule tag.
        assert_eq!(
            result.tags,
            vec![
                "415-bis",
                "indagini",
                "sequestro",
                "perquisizione",
                "procura della repubblica",
                "polizia giudiziaria",
            ]
        );
    }
}
