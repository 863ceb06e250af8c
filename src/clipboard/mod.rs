use anyhow::{Context, Result, bail};
use arboard::Clipboard;
use url::Url;

/// Playlist links are short; anything longer is not one
const MAX_URL_LEN: usize = 2048;

/// Trait for clipboard operations (allows mocking in tests)
trait ClipboardProvider {
    fn set_text(&mut self, text: &str) -> Result<()>;
}

struct SystemClipboard {
    clipboard: Clipboard,
}

impl SystemClipboard {
    fn new() -> Result<Self> {
        let clipboard = Clipboard::new().context("Failed to initialize clipboard")?;
        Ok(Self { clipboard })
    }
}

impl ClipboardProvider for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        self.clipboard.set_text(text).context("Failed to set clipboard contents")?;
        Ok(())
    }
}

/// Check that `text` is a web link worth copying, returning it trimmed
fn validate_playlist_url(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        bail!("Cannot copy an empty playlist URL");
    }
    if text.len() > MAX_URL_LEN {
        bail!("Playlist URL too long ({} bytes, max {})", text.len(), MAX_URL_LEN);
    }
    let url = Url::parse(text).with_context(|| format!("Not a valid URL: {}", text))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("Refusing to copy non-web URL: {}", text);
    }
    Ok(text)
}

#[cfg(test)]
fn copy_with_provider(text: &str, provider: &mut dyn ClipboardProvider) -> Result<()> {
    provider.set_text(validate_playlist_url(text)?)
}

/// Copy a playlist link to the system clipboard.
///
/// # Errors
/// Returns error if:
/// - The text is not an http(s) URL
/// - The clipboard is unavailable (headless session, permissions)
pub fn copy_playlist_url(url: &str) -> Result<()> {
    // Validate before touching the clipboard so bad input fails the same way in CI
    let url = validate_playlist_url(url)?;
    let mut clipboard = SystemClipboard::new()?;
    clipboard.set_text(url)
}
