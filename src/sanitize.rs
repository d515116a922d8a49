//! Text sanitization applied before any content leaves the process.
//!
//! Two independent transforms:
//!
//! - [`sanitize_user_input`] strips control characters and code fences,
//!   replaces the **whole** input with [`INJECTION_SENTINEL`] when it matches
//!   a known prompt-injection pattern, and caps length at
//!   [`MAX_INPUT_CHARS`].
//! - [`sanitize_pii`] replaces emails, card numbers, SSNs, IPv4 addresses,
//!   and phone numbers with bracketed tags.
//!
//! Neither function fails. Detection is reported through `tracing` on the
//! `security` target.

use regex::Regex;
use std::sync::LazyLock;

/// Hard cap on user-supplied chat content, in characters.
pub const MAX_INPUT_CHARS: usize = 4000;

/// Replacement for input that matched an injection pattern.
pub const INJECTION_SENTINEL: &str = "[CONTENT SANITIZED - possible prompt injection attempt]";

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)ignore\s+(all\s+)?(the\s+)?(previous|prior|above|earlier)\s+(instructions|prompts|rules|messages)",
        r"(?i)disregard\s+(all\s+)?(the\s+)?(previous|prior|above|earlier)",
        r"(?i)forget\s+(all\s+)?(your|the|previous)\s+(instructions|rules|training)",
        r"(?i)\byou\s+are\s+now\b",
        r"(?i)\bact\s+as\s+(an?\s+)?(unrestricted|unfiltered|jailbroken)",
        r"(?i)(reveal|show|print|repeat|output)\s+(me\s+)?(the\s+|your\s+)?(system|hidden)\s+prompt",
        r"(?i)\bnew\s+instructions\s*:",
        r"(?i)\[/?INST\]",
        r"(?i)<<\s*/?SYS\s*>>",
        r"(?i)<\|im_(start|end)\|>",
        r"(?im)^\s*(system|assistant)\s*:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid regex"))
    .collect()
});

static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x1F\x7F]").expect("Invalid regex"));

/// PII patterns in application order. Card and SSN run before phone so
/// their digit groups are not claimed by the looser phone pattern.
static PII_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}", "[EMAIL]"),
        (r"\b(?:\d{4}[ -]?){3}\d{4}\b", "[CARD]"),
        (r"\b\d{3}-\d{2}-\d{4}\b", "[SSN]"),
        (
            r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
            "[IP]",
        ),
        (
            r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{3}\)|\b\d{3})[\s.-]?\d{3}[\s.-]?\d{4}\b",
            "[PHONE]",
        ),
    ]
    .into_iter()
    .map(|(p, tag)| (Regex::new(p).expect("Invalid regex"), tag))
    .collect()
});

/// Clean user-role chat content before it is sent to the provider.
pub fn sanitize_user_input(input: &str) -> String {
    let unfenced = input.replace("```", "");
    let cleaned = CONTROL_CHARS.replace_all(&unfenced, "");

    // Role labels are only recognised at line starts, so check before
    // newlines are stripped as well as after.
    if detect_injection(&unfenced) || detect_injection(&cleaned) {
        tracing::warn!(
            target: "security",
            input_chars = input.chars().count(),
            "possible prompt injection detected; input replaced"
        );
        return INJECTION_SENTINEL.to_string();
    }

    truncate_chars(&cleaned, MAX_INPUT_CHARS)
}

/// Whether `input` matches any known injection pattern.
pub fn detect_injection(input: &str) -> bool {
    INJECTION_PATTERNS.iter().any(|re| re.is_match(input))
}

/// Redact personally identifiable information.
pub fn sanitize_pii(text: &str) -> String {
    let mut out = text.to_string();
    for (re, tag) in PII_PATTERNS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *tag).into_owned();
        }
    }
    out
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
