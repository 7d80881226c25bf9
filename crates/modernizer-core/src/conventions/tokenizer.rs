//! Filename tokenization and shape classification.
//!
//! A base name is split on `_`, `-`, whitespace and dots (dots between two
//! digits are kept, so `v1.2` survives), then on case boundaries. Each word
//! is classified by shape into a [`TokenType`].

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Shape class of a single token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    Numeric,
    DateLike,
    AlphaCode,
    FreeText,
}

/// A classified word of a filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub token_type: TokenType,
}

impl Token {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let token_type = classify(&text);
        Self { text, token_type }
    }

    /// Lowercased text, the form used for comparisons.
    pub fn folded(&self) -> String {
        self.text.to_lowercase()
    }
}

/// A parsed revision marker such as `R2`, `Rev3`, `v1.2` or `RevB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Revision {
    pub major: u32,
    pub minor: u32,
}

impl Revision {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "R{}", self.major)
        } else {
            write!(f, "R{}.{}", self.major, self.minor)
        }
    }
}

static NUMBERED_REVISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:rev|r|v)\.?(\d{1,4})(?:\.(\d{1,4}))?$").expect("revision regex is valid")
});

static LETTER_REVISION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i:rev)([A-Za-z])$").expect("letter revision regex is valid"));

static SHORT_MIXED_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z]{1,3}\d{1,4}(?:\.\d{1,4})?$").expect("mixed code regex is valid")
});

/// Parse a revision marker. Letter revisions map `A` to 1, `B` to 2 and so on.
pub fn parse_revision(text: &str) -> Option<Revision> {
    if let Some(caps) = NUMBERED_REVISION.captures(text) {
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        return Some(Revision::new(major, minor));
    }
    if let Some(caps) = LETTER_REVISION.captures(text) {
        let letter = caps.get(1)?.as_str().chars().next()?.to_ascii_uppercase();
        return Some(Revision::new(u32::from(letter) - u32::from('A') + 1, 0));
    }
    None
}

/// Whether a word is a revision marker, including a bare `rev`.
pub fn is_revision_word(text: &str) -> bool {
    text.eq_ignore_ascii_case("rev") || parse_revision(text).is_some()
}

/// Split a base name (extension already removed) into raw words.
pub fn split_words(stem: &str) -> Vec<String> {
    let chars: Vec<char> = stem.chars().collect();
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        let is_separator = match c {
            '_' | '-' => true,
            c if c.is_whitespace() => true,
            '.' => {
                let prev_digit = i > 0 && chars[i - 1].is_ascii_digit();
                let next_digit = chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
                !(prev_digit && next_digit)
            }
            _ => false,
        };
        if is_separator {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    let words: Vec<String> = chunks.iter().flat_map(|c| split_case(c)).collect();
    merge_revision_words(words)
}

/// Split one chunk on lower→upper, acronym-end and digit→letter boundaries.
fn split_case(chunk: &str) -> Vec<String> {
    let chars: Vec<char> = chunk.chars().collect();
    let mut words = Vec::new();
    let mut start = 0;

    for i in 1..chars.len() {
        let prev = chars[i - 1];
        let cur = chars[i];
        let next = chars.get(i + 1).copied();

        let lower_to_upper = prev.is_lowercase() && cur.is_uppercase();
        let acronym_end = prev.is_uppercase()
            && cur.is_uppercase()
            && next.is_some_and(|n| n.is_lowercase());
        let digit_to_letter = prev.is_ascii_digit() && cur.is_alphabetic();

        if lower_to_upper || acronym_end || digit_to_letter {
            words.push(chars[start..i].iter().collect());
            start = i;
        }
    }
    if start < chars.len() {
        words.push(chars[start..].iter().collect());
    }
    words
}

/// Re-join `Rev` + `A` and `Rev` + `2` that case or separator splitting tore apart.
fn merge_revision_words(words: Vec<String>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(words.len());
    let mut iter = words.into_iter().peekable();
    while let Some(word) = iter.next() {
        if word.eq_ignore_ascii_case("rev") {
            if let Some(next) = iter.peek() {
                let joinable = next.chars().all(|c| c.is_ascii_digit())
                    || (next.len() == 1 && next.chars().all(|c| c.is_ascii_uppercase()));
                if joinable && parse_revision(&format!("{}{}", word, next)).is_some() {
                    let next = iter.next().unwrap_or_default();
                    merged.push(format!("{}{}", word, next));
                    continue;
                }
            }
        }
        merged.push(word);
    }
    merged
}

/// Tokenize a base name into classified tokens.
pub fn tokenize(stem: &str) -> Vec<Token> {
    split_words(stem).into_iter().map(Token::new).collect()
}

/// Classify a word by shape.
///
/// All-digit words are DATE-LIKE only when they parse as a calendar date
/// (or a plausible year); otherwise NUMERIC.
pub fn classify(word: &str) -> TokenType {
    if !word.is_empty() && word.chars().all(|c| c.is_ascii_digit()) {
        return if is_valid_date(word) {
            TokenType::DateLike
        } else {
            TokenType::Numeric
        };
    }

    let letters_only = word.chars().all(|c| c.is_alphabetic());
    if letters_only && word.chars().count() == 1 {
        return TokenType::AlphaCode;
    }
    if letters_only && word.chars().count() <= 5 && word.chars().all(|c| c.is_uppercase()) {
        return TokenType::AlphaCode;
    }
    if parse_revision(word).is_some() || SHORT_MIXED_CODE.is_match(word) {
        return TokenType::AlphaCode;
    }
    TokenType::FreeText
}

/// Whether an all-digit word reads as a date or year.
pub fn is_valid_date(digits: &str) -> bool {
    let num = |s: &str| s.parse::<u32>().ok();
    match digits.len() {
        8 => match (num(&digits[0..4]), num(&digits[4..6]), num(&digits[6..8])) {
            (Some(y), Some(m), Some(d)) => {
                (1950..=2099).contains(&y) && NaiveDate::from_ymd_opt(y as i32, m, d).is_some()
            }
            _ => false,
        },
        6 => {
            let (Some(a), Some(b), Some(c)) =
                (num(&digits[0..2]), num(&digits[2..4]), num(&digits[4..6]))
            else {
                return false;
            };
            let valid = |yy: u32, m: u32, d: u32| {
                let year = if yy < 50 { 2000 + yy } else { 1900 + yy };
                NaiveDate::from_ymd_opt(year as i32, m, d).is_some()
            };
            // YYMMDD, MMDDYY, DDMMYY
            valid(a, b, c) || valid(c, a, b) || valid(c, b, a)
        }
        4 => num(digits).is_some_and(|y| (1950..=2099).contains(&y)),
        _ => false,
    }
}

/// Extract a four-digit year from a DATE-LIKE word.
pub fn year_of(word: &str) -> Option<i32> {
    match word.len() {
        4 | 8 if classify(word) == TokenType::DateLike => word[0..4].parse().ok(),
        _ => None,
    }
}
