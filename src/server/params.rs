//! Request decoding for the HTTP surface.
//!
//! Query strings and form bodies are `application/x-www-form-urlencoded`. Empty values count
//! as absent, so `?q=&start=` is the same as no parameters.

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use url::form_urlencoded;

use crate::filters::parser::parse_date;
use crate::models::{PlaylistRequest, SearchRequest};

fn pairs(input: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(input.as_bytes()).into_owned().collect()
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        other => Err(anyhow!("Invalid value for {}: '{}' (expected true or false)", key, other)),
    }
}

fn parse_optional_date(key: &str, value: &str) -> Result<Option<NaiveDate>> {
    match non_empty(value) {
        Some(value) => parse_date(&value).map(Some).with_context(|| format!("Invalid {}", key)),
        None => Ok(None),
    }
}

fn parse_chat_id(value: &str) -> Result<i64> {
    value.trim().parse::<i64>().map_err(|_| anyhow!("Invalid chat id: '{}'", value.trim()))
}

/// `chat_ids` form value: a JSON array (`[10,77]`) or a comma-separated list
fn parse_chat_ids(value: &str) -> Result<Vec<i64>> {
    let value = value.trim();
    if value.starts_with('[') {
        return serde_json::from_str::<Vec<i64>>(value)
            .with_context(|| format!("Invalid chat_ids: '{}'", value));
    }
    value.split(',').filter(|part| !part.trim().is_empty()).map(parse_chat_id).collect()
}

/// Decode `GET /search` query parameters
pub fn search_request(query: &str) -> Result<SearchRequest> {
    let mut request = SearchRequest::default();
    for (key, value) in pairs(query) {
        match key.as_str() {
            "q" | "query" => request.query = non_empty(&value),
            "start" => request.date_range.start = parse_optional_date("start", &value)?,
            "end" => request.date_range.end = parse_optional_date("end", &value)?,
            "participant" => request.participants.extend(non_empty(&value)),
            "participants" => {
                request.participants.extend(value.split(',').filter_map(non_empty));
            }
            "contains" => request.contains = non_empty(&value),
            "links_only" => request.links_only = parse_flag("links_only", &value)?,
            "stream" => request.stream = parse_flag("stream", &value)?,
            _ => {}
        }
    }
    Ok(request)
}

/// Decode a `POST /playlist` body, JSON or form-encoded
pub fn playlist_request(content_type: Option<&str>, body: &str) -> Result<PlaylistRequest> {
    let is_json = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
        || body.trim_start().starts_with('{');
    if is_json {
        return serde_json::from_str(body).context("Invalid JSON body");
    }

    let mut request = PlaylistRequest::default();
    for (key, value) in pairs(body) {
        match key.as_str() {
            "name" => request.name = non_empty(&value),
            "playlist_id" => request.playlist_id = non_empty(&value),
            "start" => request.date_range.start = parse_optional_date("start", &value)?,
            "end" => request.date_range.end = parse_optional_date("end", &value)?,
            "chat_ids" => request.chat_ids.extend(parse_chat_ids(&value)?),
            "chat_id" => request.chat_ids.push(parse_chat_id(&value)?),
            _ => {}
        }
    }
    Ok(request)
}

/// Reject playlist requests that cannot start
pub fn validate_playlist(request: &PlaylistRequest) -> Result<()> {
    if request.chat_ids.is_empty() {
        bail!("No conversations selected: chat_ids is empty");
    }
    if request.target_id().is_none() && request.target_name().is_none() {
        bail!("A playlist name or playlist_id is required");
    }
    if request.date_range.is_inverted() {
        bail!("Invalid date range: end is before start");
    }
    Ok(())
}

/// Token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
