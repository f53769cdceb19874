//! HTML sanitization and text normalization helpers.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Formatting tags that survive sanitization, without attributes.
const ALLOWED_TAGS: &[&str] = &[
    "b", "i", "em", "strong", "u", "p", "br", "ul", "ol", "li", "code", "pre", "blockquote",
];

/// Elements removed together with their content.
static DANGEROUS_ELEMENTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["script", "style", "iframe", "object", "embed"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<\s*{tag}\b[^>]*>.*?<\s*/\s*{tag}\s*>"))
                .expect("valid element pattern")
        })
        .collect()
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment pattern"));

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<\s*(/?)\s*([A-Za-z][A-Za-z0-9]*)\b[^>]*>").expect("valid tag pattern")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email pattern")
});

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,50}$").expect("valid username pattern"));

/// Strip markup down to a small set of attribute-free formatting tags.
///
/// Text outside tags is left untouched.
pub fn sanitize_html(input: &str) -> String {
    let mut out = COMMENT.replace_all(input, "").into_owned();
    for element in DANGEROUS_ELEMENTS.iter() {
        out = element.replace_all(&out, "").into_owned();
    }

    TAG.replace_all(&out, |caps: &Captures| {
        let name = caps[2].to_ascii_lowercase();
        if ALLOWED_TAGS.contains(&name.as_str()) {
            format!("<{}{}>", &caps[1], name)
        } else {
            String::new()
        }
    })
    .into_owned()
}

/// Drop control characters other than `\n`, `\t` and `\r`, then trim.
pub fn clean_input(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// [`clean_input`], then collapse whitespace runs and lowercase.
pub fn normalize_input(input: &str) -> String {
    WHITESPACE
        .replace_all(&clean_input(input), " ")
        .to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 255 && EMAIL.is_match(email)
}

pub fn is_valid_username(username: &str) -> bool {
    USERNAME.is_match(username)
}
