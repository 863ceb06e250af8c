//! Filter expression parser for the command line.
//!
//! Turns a compact query string into a [`SearchRequest`].
//!
//! # Syntax
//!
//! ```text
//! filter_expr := term*
//! term := field_name:value | field_name:"quoted value" | word | "quoted phrase"
//! field_name := from | since | until | contains | links (case-insensitive)
//! ```
//!
//! # Supported Fields
//!
//! - `from:name` - Conversation has a participant whose handle contains `name`
//! - `since:YYYY-MM-DD` - Only messages on or after the date
//! - `until:YYYY-MM-DD` - Only messages on or before the date
//! - `contains:text` - Some message contains `text`
//! - `links:yes|no` - Only emit conversations with music links
//!
//! Words without a field become the free-text query (joined with single spaces).
//!
//! # Examples
//!
//! ```rust
//! # use chat_playlist_explorer::filters::parser::parse_filter;
//! // Bare query: matches display name or message content
//! let request = parse_filter("roadtrip").unwrap();
//!
//! // Same field gets implicit OR
//! let request = parse_filter("from:alice from:bob").unwrap();
//! assert_eq!(request.participants.len(), 2);
//!
//! // Quoted values for spaces
//! let request = parse_filter("contains:\"road trip\" since:2024-06-01").unwrap();
//! ```
//!
//! # Validation
//!
//! - Dates must be YYYY-MM-DD and semantically valid
//! - `since` and `until` may each appear once
//! - Empty field names or values are rejected

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;

use crate::models::SearchRequest;

/// Token types produced by the tokenizer
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// field:value or field:"quoted value"
    FieldValue { field: String, value: String },
    /// Bare word or quoted phrase
    Text(String),
}

/// Fields understood by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    From,
    Since,
    Until,
    Contains,
    Links,
}

/// Tokenize filter input string into tokens
fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        let word = read_word(&mut chars);

        if word.is_empty() {
            return Err(anyhow!("Unexpected character in filter input"));
        }

        if word.starts_with('"') {
            let phrase = read_quoted_value(&mut chars, &word)?;
            if !phrase.trim().is_empty() {
                tokens.push(Token::Text(phrase));
            }
            continue;
        }

        if let Some(colon_pos) = word.find(':') {
            let field = word[..colon_pos].to_string();
            let mut value = word[colon_pos + 1..].to_string();

            if value.starts_with('"') {
                value = read_quoted_value(&mut chars, &value)?;
            }

            if field.is_empty() || value.is_empty() {
                return Err(anyhow!("Invalid field:value format: {}", word));
            }

            tokens.push(Token::FieldValue { field, value });
        } else {
            tokens.push(Token::Text(word));
        }
    }

    Ok(tokens)
}

/// Read a word (until whitespace or end)
fn read_word(chars: &mut std::iter::Peekable<std::str::Chars>) -> String {
    let mut word = String::new();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            break;
        }
        word.push(ch);
        chars.next();
    }

    word
}

/// Read a quoted value, handling the case where word already contains the opening quote
fn read_quoted_value(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    initial: &str,
) -> Result<String> {
    let mut value = initial[1..].to_string();

    if let Some(quote_pos) = value.find('"') {
        return Ok(value[..quote_pos].to_string());
    }

    for ch in chars.by_ref() {
        if ch == '"' {
            return Ok(value);
        }
        value.push(ch);
    }

    Err(anyhow!("Unterminated quoted string"))
}

fn parse_field(field: &str) -> Result<Field> {
    match field.to_lowercase().as_str() {
        "from" => Ok(Field::From),
        "since" => Ok(Field::Since),
        "until" => Ok(Field::Until),
        "contains" => Ok(Field::Contains),
        "links" => Ok(Field::Links),
        _ => Err(anyhow!(
            "Unknown field: '{}' (valid fields: from, since, until, contains, links)",
            field
        )),
    }
}

/// Parse filter string into a [`SearchRequest`]
///
/// Examples:
/// - "roadtrip" → free-text query
/// - "from:alice from:bob" → either participant
/// - "roadtrip since:2024-01-01" → name match within the date range
/// - "contains:\"open.spotify.com\" links:yes" → content filter, linked conversations only
pub fn parse_filter(input: &str) -> Result<SearchRequest> {
    let mut request = SearchRequest::default();
    if input.trim().is_empty() {
        return Ok(request);
    }

    let tokens = tokenize(input).context("Failed to tokenize filter")?;
    let mut words: Vec<String> = Vec::new();
    let mut contains: Vec<String> = Vec::new();

    for token in tokens {
        match token {
            Token::Text(word) => words.push(word),
            Token::FieldValue { field, value } => match parse_field(&field)? {
                Field::From => request.participants.push(value),
                Field::Since => {
                    if request.date_range.start.is_some() {
                        return Err(anyhow!("Duplicate field: since"));
                    }
                    request.date_range.start = Some(parse_date(&value)?);
                }
                Field::Until => {
                    if request.date_range.end.is_some() {
                        return Err(anyhow!("Duplicate field: until"));
                    }
                    request.date_range.end = Some(parse_date(&value)?);
                }
                Field::Contains => contains.push(value),
                Field::Links => request.links_only = parse_flag(&value)?,
            },
        }
    }

    if !words.is_empty() {
        request.query = Some(words.join(" "));
    }
    if !contains.is_empty() {
        request.contains = Some(contains.join(" "));
    }

    Ok(request)
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "yes" | "true" | "1" | "only" => Ok(true),
        "no" | "false" | "0" | "any" => Ok(false),
        _ => Err(anyhow!("Invalid links value: '{}' (must be 'yes' or 'no')", value)),
    }
}

/// Parse a strict YYYY-MM-DD date
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    if !is_valid_date_format(value) {
        return Err(anyhow!("Invalid date format: '{}' (expected YYYY-MM-DD)", value));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date: '{}'", value))
}

/// Check if string is valid YYYY-MM-DD format
fn is_valid_date_format(s: &str) -> bool {
    // Enforce strict YYYY-MM-DD format (10 chars)
    if s.len() != 10 {
        return false;
    }
    // Use chrono for semantic validation (e.g., reject 2024-02-31)
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
