//! Spotify Web API catalog backed by `ureq`.

use std::collections::HashSet;
use std::io::Read;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use serde_json::{Value, json};

use super::catalog::{
    ADD_BATCH_LIMIT, Catalog, CatalogError, CatalogPlaylist, CatalogTrack, LOOKUP_BATCH_LIMIT,
    playlist_url, track_uri,
};
use crate::links::extract_track_keys;

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
const MAX_RATE_LIMIT_RETRIES: usize = 3;
const MAX_RETRY_AFTER_SECS: u64 = 30;
const PAGE_LIMIT: usize = 50;
/// Upper bound on a short-link landing page read while scanning for the track URL
const SHORT_LINK_BODY_LIMIT: u64 = 512 * 1024;

/// Spotify catalog client for one access token
pub struct SpotifyCatalog {
    http_client: ureq::Agent,
    api_base: String,
    token: String,
}

impl SpotifyCatalog {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            http_client,
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    fn classify_failure(error: ureq::Error) -> CatalogError {
        match error {
            ureq::Error::Status(code, response) => {
                let retry_after = response
                    .header("retry-after")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(1);
                let body = response.into_string().unwrap_or_default();
                let detail = api_error_message(&body).unwrap_or(body);
                match code {
                    401 | 403 => CatalogError::Unauthorized(format!("HTTP {}: {}", code, detail)),
                    404 => CatalogError::NotFound(detail),
                    429 => CatalogError::RateLimited { retry_after_secs: retry_after },
                    _ => CatalogError::Request(format!("HTTP {}: {}", code, detail)),
                }
            }
            ureq::Error::Transport(transport) => CatalogError::Request(transport.to_string()),
        }
    }

    /// Failures from a short-link redirector. It never sees the access token, so a 401/403
    /// there is the landing page refusing us, not an authorization failure.
    fn classify_redirect_failure(url: &str, error: ureq::Error) -> CatalogError {
        match error {
            ureq::Error::Status(code, _) => {
                CatalogError::NotFound(format!("{} answered HTTP {}", url, code))
            }
            ureq::Error::Transport(transport) => CatalogError::Request(transport.to_string()),
        }
    }

    /// Run a request, sleeping through up to [`MAX_RATE_LIMIT_RETRIES`] rate-limit responses
    fn execute<F>(&self, send: F) -> Result<ureq::Response, CatalogError>
    where
        F: Fn() -> Result<ureq::Response, ureq::Error>,
    {
        let mut attempt = 0;
        loop {
            match send().map_err(Self::classify_failure) {
                Err(CatalogError::RateLimited { retry_after_secs })
                    if attempt < MAX_RATE_LIMIT_RETRIES =>
                {
                    attempt += 1;
                    let wait = retry_after_secs.min(MAX_RETRY_AFTER_SECS);
                    warn!("Catalog rate limited, retrying in {}s (attempt {})", wait, attempt);
                    thread::sleep(Duration::from_secs(wait));
                }
                other => return other,
            }
        }
    }

    fn get_json(&self, url: &str) -> Result<Value, CatalogError> {
        debug!("GET {}", url);
        let response = self.execute(|| {
            self.http_client
                .get(url)
                .set("Authorization", &format!("Bearer {}", self.token))
                .call()
        })?;
        response.into_json().map_err(|e| CatalogError::BadResponse(e.to_string()))
    }

    fn post_json(&self, url: &str, body: &Value) -> Result<Value, CatalogError> {
        debug!("POST {}", url);
        let response = self.execute(|| {
            self.http_client
                .post(url)
                .set("Authorization", &format!("Bearer {}", self.token))
                .send_json(body.clone())
        })?;
        response.into_json().map_err(|e| CatalogError::BadResponse(e.to_string()))
    }

    fn current_user_id(&self) -> Result<String, CatalogError> {
        let me = self.get_json(&self.api_url("me"))?;
        me.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CatalogError::BadResponse("profile without id".to_string()))
    }
}

fn api_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.pointer("/error/message").and_then(Value::as_str).map(str::to_string)
}

fn parse_playlist(value: &Value) -> Result<CatalogPlaylist, CatalogError> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| CatalogError::BadResponse("playlist without id".to_string()))?;
    let name = value.get("name").and_then(Value::as_str).unwrap_or_default();
    let url = value
        .pointer("/external_urls/spotify")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| playlist_url(id));
    Ok(CatalogPlaylist { id: id.to_string(), name: name.to_string(), url })
}

fn next_page(page: &Value) -> Option<String> {
    page.get("next").and_then(Value::as_str).map(str::to_string)
}

fn first_canonical(text: &str) -> Option<String> {
    extract_track_keys(text).iter().find_map(|key| key.canonical_id().map(str::to_string))
}

impl Catalog for SpotifyCatalog {
    fn find_playlist(&self, name: &str) -> Result<Option<CatalogPlaylist>, CatalogError> {
        let mut url = Some(self.api_url(&format!("me/playlists?limit={}", PAGE_LIMIT)));
        while let Some(page_url) = url {
            let page = self.get_json(&page_url)?;
            let items = page.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
            for item in &items {
                if item.get("name").and_then(Value::as_str) == Some(name) {
                    return parse_playlist(item).map(Some);
                }
            }
            url = next_page(&page);
        }
        Ok(None)
    }

    fn create_playlist(&self, name: &str) -> Result<CatalogPlaylist, CatalogError> {
        let user_id = self.current_user_id()?;
        let body = json!({
            "name": name,
            "public": false,
            "description": "Tracks shared in Messages",
        });
        let url = self.api_url(&format!("users/{}/playlists", user_id));
        let created = self.post_json(&url, &body)?;
        parse_playlist(&created)
    }

    fn playlist(&self, id: &str) -> Result<CatalogPlaylist, CatalogError> {
        let value = self.get_json(
            &self.api_url(&format!("playlists/{}?fields=id,name,external_urls", id)),
        )?;
        parse_playlist(&value)
    }

    fn playlist_track_ids(&self, id: &str) -> Result<HashSet<String>, CatalogError> {
        let mut ids = HashSet::new();
        let mut url = Some(self.api_url(&format!(
            "playlists/{}/tracks?fields=items(track(id)),next&limit={}",
            id, ADD_BATCH_LIMIT
        )));
        while let Some(page_url) = url {
            let page = self.get_json(&page_url)?;
            if let Some(items) = page.get("items").and_then(Value::as_array) {
                ids.extend(
                    items
                        .iter()
                        .filter_map(|item| item.pointer("/track/id").and_then(Value::as_str))
                        .map(str::to_string),
                );
            }
            url = next_page(&page);
        }
        Ok(ids)
    }

    fn resolve_short_link(&self, url: &str) -> Result<String, CatalogError> {
        debug!("Resolving short link {}", url);
        let response = self
            .http_client
            .get(url)
            .call()
            .map_err(|e| Self::classify_redirect_failure(url, e))?;
        if let Some(id) = first_canonical(response.get_url()) {
            return Ok(id);
        }

        let mut body = String::new();
        response
            .into_reader()
            .take(SHORT_LINK_BODY_LIMIT)
            .read_to_string(&mut body)
            .map_err(|e| CatalogError::Request(e.to_string()))?;
        first_canonical(&body)
            .ok_or_else(|| CatalogError::NotFound(format!("{} does not lead to a track", url)))
    }

    fn lookup_tracks(&self, ids: &[String]) -> Result<Vec<Option<CatalogTrack>>, CatalogError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > LOOKUP_BATCH_LIMIT {
            return Err(CatalogError::Request(format!(
                "lookup batch of {} exceeds {}",
                ids.len(),
                LOOKUP_BATCH_LIMIT
            )));
        }
        let value = self.get_json(&self.api_url(&format!("tracks?ids={}", ids.join(","))))?;
        let tracks = value
            .get("tracks")
            .and_then(Value::as_array)
            .ok_or_else(|| CatalogError::BadResponse("lookup without tracks".to_string()))?;

        Ok((0..ids.len())
            .map(|i| {
                let track = tracks.get(i).filter(|t| !t.is_null())?;
                let id = track.get("id").and_then(Value::as_str)?;
                let name = track.get("name").and_then(Value::as_str).unwrap_or_default();
                Some(CatalogTrack { id: id.to_string(), name: name.to_string() })
            })
            .collect())
    }

    fn add_tracks(&self, playlist_id: &str, ids: &[String]) -> Result<(), CatalogError> {
        if ids.len() > ADD_BATCH_LIMIT {
            return Err(CatalogError::Request(format!(
                "add batch of {} exceeds {}",
                ids.len(),
                ADD_BATCH_LIMIT
            )));
        }
        let uris: Vec<String> = ids.iter().map(|id| track_uri(id)).collect();
        self.post_json(
            &self.api_url(&format!("playlists/{}/tracks", playlist_id)),
            &json!({ "uris": uris }),
        )?;
        Ok(())
    }
}
