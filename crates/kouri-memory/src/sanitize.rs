use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

const MAX_VALUE_CHARS: usize = 1000;

static SENSITIVE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"password[s]?\s*[:=]?\s*\S+",
        r"api[-_]?key[s]?\s*[:=]?\s*\S+",
        r"token[s]?\s*[:=]?\s*\S+",
        r"secret[s]?\s*[:=]?\s*\S+",
        r"access[-_]?key[s]?\s*[:=]?\s*\S+",
    ]
    .iter()
    .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
    .collect()
});

static COMMANDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"rm\s+-rf", r"sudo\s+", r"chmod\s+", r"chown\s+", r"wget\s+", r"curl\s+"]
        .iter()
        .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
        .collect()
});

/// Redact credentials, neutralize shell commands and cap the length of a
/// value before it is stored as a fact.
pub fn clean_memory_content(value: &str) -> String {
    let mut cleaned = value.to_string();
    for re in SENSITIVE.iter() {
        cleaned = re.replace_all(&cleaned, "[REDACTED]").into_owned();
    }
    for re in COMMANDS.iter() {
        cleaned = re.replace_all(&cleaned, "[FILTERED]").into_owned();
    }
    if cleaned.chars().count() > MAX_VALUE_CHARS {
        cleaned = cleaned.chars().take(MAX_VALUE_CHARS).collect::<String>() + "...";
    }
    cleaned
}

/// Keys are stored trimmed.
pub fn clean_memory_key(key: &str) -> String {
    key.trim().to_string()
}
