//! Terminal output sanitization.
//!
//! Display names, participant handles and catalog messages come from other people's devices
//! and remote services. Everything printed by the CLI goes through [`strip_ansi_codes`] (or
//! [`single_line`] for table cells) so embedded escape sequences cannot move the cursor,
//! recolor the terminal or set the window title.

const ESC: char = '\x1b';
const BEL: char = '\x07';

/// Strips ANSI escape sequences and control characters
///
/// Removes CSI sequences (`ESC [ ... letter`), OSC sequences (`ESC ] ... BEL` or
/// `ESC ] ... ESC \`) and every control character except tab, newline and carriage return.
///
/// # Examples
///
/// ```
/// use chat_playlist_explorer::utils::terminal::strip_ansi_codes;
///
/// let text = "\x1b[31mRoadtrip\x1b[0m";
/// assert_eq!(strip_ansi_codes(text), "Roadtrip");
/// ```
pub fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == ESC {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    for next in chars.by_ref() {
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(next) = chars.next() {
                        if next == BEL {
                            break;
                        }
                        if next == ESC && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
            continue;
        }

        if ch.is_control() && ch != '\t' && ch != '\n' && ch != '\r' {
            continue;
        }
        result.push(ch);
    }

    result
}

/// Sanitize and collapse all whitespace runs to single spaces
pub fn single_line(text: &str) -> String {
    strip_ansi_codes(text).split_whitespace().collect::<Vec<_>>().join(" ")
}
