use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{SNIPPET_MAX_CHARS, SNIPPET_MAX_LINE_SPAN, SNIPPET_MAX_TOKENS};
use crate::geometry::{BoundingBox, to_percent};
use crate::model::Word;
use crate::text::{condense_whitespace, normalize, truncate_chars};

// Coordinates at or below this are taken to be already normalized to the page.
const NORMALIZED_COORD_LIMIT: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderedToken {
    pub text: String,
    pub word: Word,
    pub block_index: usize,
    pub line_index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuiltText {
    pub tokens: Vec<OrderedToken>,
    pub joined: String,
    pub char_to_tok: Vec<usize>,
    pub width: f64,
    pub height: f64,
}

impl BuiltText {
    pub fn plain_text(&self) -> String {
        let mut output = String::new();
        let mut previous: Option<(usize, usize)> = None;

        for token in &self.tokens {
            let position = (token.block_index, token.line_index);
            match previous {
                Some(last) if last == position => output.push(' '),
                Some(_) => output.push('\n'),
                None => {}
            }
            output.push_str(&token.text);
            previous = Some(position);
        }

        output
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextMatch {
    pub token_start: usize,
    pub token_end: usize,
    pub bbox: BoundingBox,
    pub bbox_pct: BoundingBox,
    pub snippet: String,
}

#[derive(Debug, Clone)]
struct PlacedWord {
    word: Word,
    block: u32,
    paragraph: u32,
    line: u32,
}

#[derive(Debug)]
struct LineGroup {
    y0: f64,
    y1: f64,
    words: Vec<Word>,
}

#[derive(Debug)]
struct BlockGroup {
    id: u32,
    x0: f64,
    y0: f64,
    lines: BTreeMap<(u32, u32), LineGroup>,
}

pub fn build(words: &[Word], width: f64, height: f64) -> BuiltText {
    let cleaned = words
        .iter()
        .filter_map(|word| {
            let text = condense_whitespace(&word.text);
            if text.is_empty() || normalize(&text).is_empty() {
                return None;
            }
            Some(Word {
                text,
                ..word.clone()
            })
        })
        .collect::<Vec<Word>>();

    let placed = assign_lines(assign_blocks(cleaned));
    let blocks = group_blocks(placed);

    let mut tokens = Vec::new();
    for (block_index, block) in blocks.into_iter().enumerate() {
        let mut lines = block.lines.into_iter().collect::<Vec<_>>();
        lines.sort_by(|(left_key, left), (right_key, right)| {
            left.y0
                .total_cmp(&right.y0)
                .then_with(|| left.y1.total_cmp(&right.y1))
                .then_with(|| left_key.cmp(right_key))
        });

        for (line_index, (_, mut line)) in lines.into_iter().enumerate() {
            line.words.sort_by(compare_words);
            for word in line.words {
                tokens.push(OrderedToken {
                    text: word.text.clone(),
                    word,
                    block_index,
                    line_index,
                });
            }
        }
    }

    let mut joined = String::new();
    let mut char_to_tok = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        let normalized = normalize(&token.text);
        char_to_tok.extend(std::iter::repeat_n(index, normalized.chars().count()));
        joined.push_str(&normalized);
        if index + 1 < tokens.len() {
            joined.push(' ');
            char_to_tok.push(index);
        }
    }

    BuiltText {
        tokens,
        joined,
        char_to_tok,
        width,
        height,
    }
}

pub fn match_in_built(built: &BuiltText, query: &str) -> Vec<TextMatch> {
    let needle = normalize(&condense_whitespace(query));
    if needle.is_empty() || built.tokens.is_empty() {
        return Vec::new();
    }

    let needle_chars = needle.chars().count();
    let last_token = built.tokens.len() - 1;
    let mut matches = Vec::new();
    let mut search_from = 0usize;
    let mut counted_bytes = 0usize;
    let mut counted_chars = 0usize;

    while let Some(relative) = built.joined[search_from..].find(&needle) {
        let start_byte = search_from + relative;
        counted_chars += built.joined[counted_bytes..start_byte].chars().count();
        counted_bytes = start_byte;

        let start = counted_chars;
        let end = start + needle_chars;
        let token_start = built.char_to_tok.get(start).copied().unwrap_or(0);
        let token_end = built
            .char_to_tok
            .get(end - 1)
            .copied()
            .unwrap_or(last_token)
            .min(last_token)
            .max(token_start);

        let matched = &built.tokens[token_start..=token_end];
        let bbox = matched
            .iter()
            .map(|token| BoundingBox::of_word(&token.word))
            .reduce(|left, right| left.union(&right))
            .unwrap_or(BoundingBox {
                x0: 0.0,
                y0: 0.0,
                x1: 0.0,
                y1: 0.0,
            });

        let max_coord = matched
            .iter()
            .map(|token| token.word.x1.max(token.word.y1))
            .fold(f64::NEG_INFINITY, f64::max);
        let bbox_pct = if max_coord <= NORMALIZED_COORD_LIMIT {
            BoundingBox {
                x0: bbox.x0.clamp(0.0, 1.0),
                y0: bbox.y0.clamp(0.0, 1.0),
                x1: bbox.x1.clamp(0.0, 1.0),
                y1: bbox.y1.clamp(0.0, 1.0),
            }
        } else {
            to_percent(bbox, built.width, built.height)
        };

        matches.push(TextMatch {
            token_start,
            token_end,
            bbox,
            bbox_pct,
            snippet: snippet_from(built, token_start),
        });

        search_from = start_byte + needle.len();
    }

    matches
}

fn snippet_from(built: &BuiltText, token_start: usize) -> String {
    let start = &built.tokens[token_start];
    let mut parts = Vec::new();

    for token in built.tokens.iter().skip(token_start) {
        if parts.len() >= SNIPPET_MAX_TOKENS {
            break;
        }
        if token.block_index != start.block_index {
            break;
        }
        if token.line_index > start.line_index + SNIPPET_MAX_LINE_SPAN {
            break;
        }
        parts.push(token.text.trim());
    }

    let snippet = condense_whitespace(&parts.join(" "));
    if snippet.chars().count() > SNIPPET_MAX_CHARS {
        format!("{}…", truncate_chars(&snippet, SNIPPET_MAX_CHARS).trim_end())
    } else {
        snippet
    }
}

fn compare_words(left: &Word, right: &Word) -> Ordering {
    left.x0
        .total_cmp(&right.x0)
        .then_with(|| left.y0.total_cmp(&right.y0))
        .then_with(|| left.x1.total_cmp(&right.x1))
        .then_with(|| left.y1.total_cmp(&right.y1))
        .then_with(|| left.text.cmp(&right.text))
        .then_with(|| left.confidence.total_cmp(&right.confidence))
}

fn median_word_height(words: &[&Word]) -> f64 {
    let mut heights = words.iter().map(|word| word.height()).collect::<Vec<f64>>();
    if heights.is_empty() {
        return 1.0;
    }
    heights.sort_by(f64::total_cmp);
    heights[heights.len() / 2].max(1.0)
}

fn assign_blocks(words: Vec<Word>) -> Vec<PlacedWord> {
    let next_free_block = words
        .iter()
        .filter_map(|word| word.block)
        .max()
        .map(|value| value + 1)
        .unwrap_or(0);

    let mut unassigned = words
        .iter()
        .enumerate()
        .filter(|(_, word)| word.block.is_none())
        .collect::<Vec<(usize, &Word)>>();
    unassigned.sort_by(|(_, left), (_, right)| compare_words(left, right));

    // Column clustering: merge x-intervals separated by less than one line height.
    let gutter = median_word_height(&unassigned.iter().map(|(_, word)| *word).collect::<Vec<_>>());
    let mut inferred = vec![None; words.len()];
    let mut column = next_free_block;
    let mut column_right: Option<f64> = None;
    for (index, word) in &unassigned {
        match column_right {
            Some(right) if word.x0 <= right + gutter => {
                column_right = Some(right.max(word.x1));
            }
            Some(_) => {
                column += 1;
                column_right = Some(word.x1);
            }
            None => column_right = Some(word.x1),
        }
        inferred[*index] = Some(column);
    }

    words
        .into_iter()
        .enumerate()
        .map(|(index, word)| {
            let block = word.block.or(inferred[index]).unwrap_or(next_free_block);
            PlacedWord {
                block,
                paragraph: word.paragraph.unwrap_or(0),
                line: 0,
                word,
            }
        })
        .collect()
}

fn assign_lines(mut placed: Vec<PlacedWord>) -> Vec<PlacedWord> {
    let mut by_block: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (index, entry) in placed.iter().enumerate() {
        by_block.entry(entry.block).or_default().push(index);
    }

    for indices in by_block.values() {
        let next_free_line = indices
            .iter()
            .filter_map(|index| placed[*index].word.line)
            .max()
            .map(|value| value + 1)
            .unwrap_or(0);

        let mut unassigned = indices
            .iter()
            .copied()
            .filter(|index| placed[*index].word.line.is_none())
            .collect::<Vec<usize>>();
        unassigned.sort_by(|left, right| {
            let left_word = &placed[*left].word;
            let right_word = &placed[*right].word;
            center_y(left_word)
                .total_cmp(&center_y(right_word))
                .then_with(|| compare_words(left_word, right_word))
        });

        let mut line = next_free_line;
        let mut extent: Option<(f64, f64)> = None;
        let mut inferred = Vec::with_capacity(unassigned.len());
        for index in unassigned {
            let word = &placed[index].word;
            let center = center_y(word);
            extent = match extent {
                Some((top, bottom)) if center >= top && center <= bottom => {
                    Some((top.min(word.y0), bottom.max(word.y1)))
                }
                Some(_) => {
                    line += 1;
                    Some((word.y0, word.y1))
                }
                None => Some((word.y0, word.y1)),
            };
            inferred.push((index, line));
        }

        for (index, line) in inferred {
            placed[index].line = line;
        }
        for index in indices {
            if let Some(line) = placed[*index].word.line {
                placed[*index].line = line;
            }
        }
    }

    placed
}

fn center_y(word: &Word) -> f64 {
    (word.y0 + word.y1) / 2.0
}

fn group_blocks(placed: Vec<PlacedWord>) -> Vec<BlockGroup> {
    let mut blocks: BTreeMap<u32, BlockGroup> = BTreeMap::new();

    for entry in placed {
        let block = blocks.entry(entry.block).or_insert_with(|| BlockGroup {
            id: entry.block,
            x0: entry.word.x0,
            y0: entry.word.y0,
            lines: BTreeMap::new(),
        });
        block.x0 = block.x0.min(entry.word.x0);
        block.y0 = block.y0.min(entry.word.y0);

        let line = block
            .lines
            .entry((entry.paragraph, entry.line))
            .or_insert_with(|| LineGroup {
                y0: entry.word.y0,
                y1: entry.word.y1,
                words: Vec::new(),
            });
        line.y0 = line.y0.min(entry.word.y0);
        line.y1 = line.y1.max(entry.word.y1);
        line.words.push(entry.word);
    }

    let mut ordered = blocks.into_values().collect::<Vec<BlockGroup>>();
    ordered.sort_by(|left, right| {
        left.x0
            .total_cmp(&right.x0)
            .then_with(|| left.y0.total_cmp(&right.y0))
            .then_with(|| left.id.cmp(&right.id))
    });
    ordered
}
