// LogTrail - core/codec.rs
//
// Line codecs: turn one raw text line into a structured `LogEntry`.
// Core layer: pure string processing, never touches the filesystem.
//
// `decode_line` is the only entry point readers use. It never fails and never
// panics; anything a codec does not recognise becomes an invalid entry that
// keeps the original text, so one malformed line cannot abort a page.

use crate::core::model::LogEntry;
use crate::util::constants::DEBUG_MAX_LINE_PREVIEW;
use regex::Regex;
use std::sync::{Arc, OnceLock};

/// A parser for one log line format.
pub trait LineCodec: Send + Sync {
    /// Stable identifier used in profiles and on the CLI.
    fn id(&self) -> &'static str;

    /// Parse a line, returning `None` when the line is not in this format.
    fn parse_line(&self, line: &str) -> Option<LogEntry>;
}

/// Decode a line with `codec`, falling back to an invalid entry.
pub fn decode_line(codec: &dyn LineCodec, line: &str) -> LogEntry {
    if line.trim().is_empty() {
        return LogEntry::invalid(line);
    }
    match codec.parse_line(line) {
        Some(entry) => entry,
        None => {
            tracing::trace!(
                codec = codec.id(),
                line = %preview(line),
                "Line not recognised; keeping raw text"
            );
            LogEntry::invalid(line)
        }
    }
}

/// Look up a built-in codec by id (case-insensitive).
pub fn codec_by_id(id: &str) -> Option<Arc<dyn LineCodec>> {
    match id.to_ascii_lowercase().as_str() {
        "symfony" => Some(Arc::new(SymfonyCodec)),
        "ox" => Some(Arc::new(OxCodec)),
        "plain" => Some(Arc::new(PlainCodec)),
        _ => None,
    }
}

/// Ids accepted by `codec_by_id`.
pub fn builtin_codec_ids() -> &'static [&'static str] {
    &["symfony", "ox", "plain"]
}

fn preview(line: &str) -> &str {
    match line.char_indices().nth(DEBUG_MAX_LINE_PREVIEW) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

// =============================================================================
// Symfony / Monolog
// =============================================================================

/// `[2024-04-19T12:45:22.124+02:00] app.ERROR: Message {"json":"context"} []`
#[derive(Debug, Clone, Copy, Default)]
pub struct SymfonyCodec;

fn symfony_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(\d{4}-\d{2}-\d{2})T(\d{2}:\d{2}:\d{2})\.[^\]]+]\s+(\w+)\.(\w+):\s+(.*)")
            .expect("valid symfony regex")
    })
}

impl LineCodec for SymfonyCodec {
    fn id(&self) -> &'static str {
        "symfony"
    }

    fn parse_line(&self, line: &str) -> Option<LogEntry> {
        let caps = symfony_regex().captures(line)?;
        let timestamp = format!("{} {}", &caps[1], &caps[2]);
        let level = &caps[4];
        let remaining = &caps[5];

        // Trailing `{...}` is the structured context.
        let (message, context) = match (remaining.find('{'), remaining.rfind('}')) {
            (Some(start), Some(end)) if end > start => (
                remaining[..start].trim(),
                remaining[start..=end].trim(),
            ),
            _ => (remaining, ""),
        };

        Some(LogEntry::parsed(timestamp, "", level, message, context, ""))
    }
}

// =============================================================================
// OX
// =============================================================================

/// `19.04.2024 12:45:22 [file.php] app.ERROR: Message <[context]>{..}<[/context]> <[extra]>{..}<[/extra]>`
#[derive(Debug, Clone, Copy, Default)]
pub struct OxCodec;

const CONTEXT_OPEN: &str = "<[context]>";
const CONTEXT_CLOSE: &str = "<[/context]>";
const EXTRA_OPEN: &str = "<[extra]>";
const EXTRA_CLOSE: &str = "<[/extra]>";

fn ox_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)(\d{2}\.\d{2}\.\d{4}) (\d{2}:\d{2}:\d{2}) \[([^\]]+)] (\S+)[:-] (.*)")
            .expect("valid ox regex")
    })
}

fn stack_frame_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*#(\d+)\s*").expect("valid stack frame regex"))
}

/// Text between `open` and `close`, trimmed, or empty when either is missing.
fn between<'a>(text: &'a str, open: &str, close: &str) -> &'a str {
    match (text.find(open), text.find(close)) {
        (Some(start), Some(end)) if end >= start + open.len() => {
            text[start + open.len()..end].trim()
        }
        _ => "",
    }
}

/// Put every `#N` stack frame on its own line, separated from the message.
fn reflow_stack_trace(message: &str) -> String {
    let Some(idx) = message.find("Stack trace:") else {
        return message.to_string();
    };
    let before = message[..idx].trim();
    let stack = stack_frame_regex().replace_all(message[idx..].trim(), "\n#$1 ");
    format!("{before}\n\n{}", stack.trim())
}

impl LineCodec for OxCodec {
    fn id(&self) -> &'static str {
        "ox"
    }

    fn parse_line(&self, line: &str) -> Option<LogEntry> {
        let caps = ox_regex().captures(line)?;
        let timestamp = format!("{} {}", &caps[1], &caps[2]);
        let file = &caps[3];
        let level_full = &caps[4];
        let remaining = caps[5].trim();

        let level = match level_full.find('.') {
            Some(dot) => &level_full[dot + 1..],
            None => level_full,
        };

        let context = between(remaining, CONTEXT_OPEN, CONTEXT_CLOSE);
        let extra = between(remaining, EXTRA_OPEN, EXTRA_CLOSE);
        let message_end = remaining
            .find(CONTEXT_OPEN)
            .or_else(|| remaining.find(EXTRA_OPEN))
            .unwrap_or(remaining.len());
        let message = reflow_stack_trace(remaining[..message_end].trim());

        Some(LogEntry::parsed(timestamp, file, level, message, context, extra))
    }
}

// =============================================================================
// Plain text
// =============================================================================

/// Accepts any non-blank line verbatim as the message.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

impl LineCodec for PlainCodec {
    fn id(&self) -> &'static str {
        "plain"
    }

    fn parse_line(&self, line: &str) -> Option<LogEntry> {
        if line.trim().is_empty() {
            return None;
        }
        Some(LogEntry::parsed("", "", "", line, "", ""))
    }
}
