use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

pub fn normalize(input: &str) -> String {
    input
        .nfd()
        .flat_map(char::to_lowercase)
        .filter(|character| !is_combining_mark(*character))
        .map(fold_quote)
        .collect()
}

fn fold_quote(character: char) -> char {
    match character {
        '\u{2019}' | '\u{2018}' | '`' | '\u{00B4}' => '\'',
        '\u{201C}' | '\u{201D}' | '\u{201E}' => '"',
        other => other,
    }
}

pub fn condense_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &input[..byte_index],
        None => input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_diacritics_and_case() {
        assert_eq!(normalize("Identità PERIZIA"), "identita perizia");
        assert_eq!(normalize("Procura l’Avvocato"), "procura l'avvocato");
        assert_eq!(normalize("«Citazione» “testo”"), "«citazione» \"testo\"");
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "DENUNCIA–QUERELA del sig. Rossi",
            "Perché è così? Ça va, Ångström, İstanbul",
            "l`imputato ´teste´ ‘a’",
            "",
            "  spazi\tmultipli\n",
            "ﬁne ẞ Σίσυφος",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn condense_whitespace_collapses_runs() {
        assert_eq!(condense_whitespace("  a \t b\n\nc  "), "a b c");
    }

    #[test]
    fn truncate_chars_respects_multibyte_boundaries() {
        assert_eq!(truncate_chars("perché sì", 6), "perché");
        assert_eq!(truncate_chars("breve", 10), "breve");
    }
}
