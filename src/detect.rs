// Rule-based flags for common prompt-injection phrasing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static JAILBREAK_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        r"ignore\s+(the\s+)?(previous|above)\s+instructions",
        r"disregard\s+(the\s+)?rules",
        r"override\s+(the\s+)?system",
        r"act\s+as",
        r"system\s*prompt",
        r"reveal\s+(the\s+)?secret",
        r"show\s+me\s+(the\s+)?secret",
        r"base64",
        r"decode",
        r"translate\s+this",
        r"ignore\s+security",
    ]
    .iter()
    .map(|p| {
        (
            *p,
            Regex::new(&format!("(?i){p}")).expect("invalid jailbreak regex"),
        )
    })
    .collect()
});

static BASE64_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9+/=]{8,}").expect("invalid base64 regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub suspicious: bool,
    pub patterns: Vec<String>,
    pub base64: Vec<String>,
}

/// Tokens of 8+ base64-alphabet characters count only when they also hold a
/// digit or one of `+/=`. Plain English words would match the bare alphabet
/// rule, so this deliberately misses encodings made purely of letters such as
/// `YWJjZGVm`.
pub fn looks_like_base64(token: &str) -> bool {
    token.len() >= 8
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        && token
            .chars()
            .any(|c| c.is_ascii_digit() || matches!(c, '+' | '/' | '='))
}

pub fn detect_jailbreaks(user_input: &str, model_output: &str) -> Detection {
    let patterns: Vec<String> = JAILBREAK_PATTERNS
        .iter()
        .filter(|(_, re)| re.is_match(user_input) || re.is_match(model_output))
        .map(|(source, _)| source.to_string())
        .collect();

    let base64: Vec<String> = [user_input, model_output]
        .iter()
        .flat_map(|text| BASE64_TOKEN.find_iter(text))
        .map(|m| m.as_str())
        .filter(|token| looks_like_base64(token))
        .map(str::to_owned)
        .collect();

    Detection {
        suspicious: !patterns.is_empty() || !base64.is_empty(),
        patterns,
        base64,
    }
}
