use std::sync::OnceLock;

use regex::Regex;

fn live_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}[._-]\d{2}[._-]\d{2}(\s*[-_]\s*|\s+)live")
            .expect("live album pattern compiles")
    })
}

/// True when a normalized album title names a dated live recording,
/// e.g. "2016-09-20 - live at somewhere".
pub fn is_live_title(normtitle: &str) -> bool {
    live_pattern().is_match(normtitle)
}
