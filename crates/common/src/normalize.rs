use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Comparison key for artist names, album titles and search terms.
///
/// Lowercases, expands letterforms that have no decomposition (æ, ø, ß and
/// friends), strips diacritics and collapses whitespace. Total and stable:
/// two strings that should be considered the same name map to the same key.
pub fn normalize(input: &str) -> String {
    let mut expanded = String::with_capacity(input.len());
    for ch in input.chars().flat_map(char::to_lowercase) {
        match ch {
            '\0' => {}
            'æ' => expanded.push_str("ae"),
            'œ' => expanded.push_str("oe"),
            'ø' => expanded.push('o'),
            'ß' => expanded.push_str("ss"),
            'ð' | 'đ' => expanded.push('d'),
            'þ' => expanded.push_str("th"),
            'ł' => expanded.push('l'),
            'ı' => expanded.push('i'),
            '&' => expanded.push_str(" and "),
            other => expanded.push(other),
        }
    }

    let folded: String = expanded.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits a leading "The" off an artist name.
///
/// Returns `(prefix, name)`. A name that is only "The" keeps it as the name.
pub fn split_prefix(raw: &str) -> (Option<String>, String) {
    let trimmed = raw.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("");
    let rest = parts.next().map(str::trim).unwrap_or("");
    if head.eq_ignore_ascii_case("the") && !rest.is_empty() {
        (Some(head.to_string()), rest.to_string())
    } else {
        (None, trimmed.to_string())
    }
}
