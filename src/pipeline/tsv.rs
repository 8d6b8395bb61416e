use anyhow::{Result, bail};

const WORD_LEVEL: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct RawWord {
    pub text: String,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    pub block: Option<u32>,
    pub paragraph: Option<u32>,
    pub line: Option<u32>,
}

struct Columns {
    level: usize,
    left: usize,
    top: usize,
    width: usize,
    height: usize,
    conf: usize,
    text: usize,
    block: Option<usize>,
    paragraph: Option<usize>,
    line: Option<usize>,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self> {
        let names: Vec<&str> = header.split('\t').map(str::trim).collect();
        let find = |name: &str| names.iter().position(|candidate| *candidate == name);
        let require = |name: &str| match find(name) {
            Some(index) => Ok(index),
            None => bail!("tesseract TSV header is missing column {name:?}"),
        };

        Ok(Self {
            level: require("level")?,
            left: require("left")?,
            top: require("top")?,
            width: require("width")?,
            height: require("height")?,
            conf: require("conf")?,
            text: require("text")?,
            block: find("block_num"),
            paragraph: find("par_num"),
            line: find("line_num"),
        })
    }
}

pub fn parse_tsv(tsv: &str) -> Result<Vec<RawWord>> {
    let mut lines = tsv.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns = Columns::from_header(header)?;

    let mut words = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split('\t').collect();
        let number = |index: usize| {
            fields
                .get(index)
                .and_then(|value| value.trim().parse::<f64>().ok())
        };
        let id = |index: Option<usize>| {
            index
                .and_then(|index| fields.get(index))
                .and_then(|value| value.trim().parse::<u32>().ok())
        };

        if id(Some(columns.level)) != Some(WORD_LEVEL) {
            continue;
        }
        let Some(confidence) = number(columns.conf) else {
            continue;
        };
        if confidence < 0.0 {
            continue;
        }
        let text = fields
            .get(columns.text)
            .map(|value| value.trim())
            .unwrap_or_default();
        if text.is_empty() {
            continue;
        }
        let (Some(left), Some(top), Some(width), Some(height)) = (
            number(columns.left),
            number(columns.top),
            number(columns.width),
            number(columns.height),
        ) else {
            continue;
        };

        words.push(RawWord {
            text: text.to_string(),
            left,
            top,
            width,
            height,
            confidence,
            block: id(columns.block),
            paragraph: id(columns.paragraph),
            line: id(columns.line),
        });
    }

    Ok(words)
}
