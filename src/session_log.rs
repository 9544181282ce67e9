//! Read side of the agent's structured session log.
//!
//! The agent appends one JSON object per line to
//! `<projects_dir>/<workspace-slug>/<session-id>.jsonl`. The relay only
//! reads the tail of that file, except for image stripping, which rewrites
//! the whole file between process launches.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::files;

/// Bytes read from the end of the log when inspecting recent entries.
pub const TAIL_BYTES: u64 = 64 * 1024;

/// Text that replaces a stripped image.
pub const IMAGE_PLACEHOLDER: &str = "[screenshot removed]";

/// Cumulative token counters reported with an assistant message.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Uncached input tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Output tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Tokens written to the prompt cache.
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    /// Tokens read from the prompt cache.
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl Usage {
    /// Sum of all four counters: the tokens occupying the context window.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }
}

/// Message payload of a log entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryMessage {
    /// Either a plain string or a list of typed parts.
    #[serde(default)]
    pub content: Value,
    /// Token counters (assistant entries only).
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// One line of the session log.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionEntry {
    /// `user` or `assistant` (other values are ignored).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Message payload.
    #[serde(default)]
    pub message: Option<EntryMessage>,
}

impl SessionEntry {
    fn parts(&self) -> impl Iterator<Item = &Value> {
        self.message
            .as_ref()
            .and_then(|msg| msg.content.as_array())
            .into_iter()
            .flatten()
    }

    fn part_type(part: &Value) -> Option<&str> {
        part.get("type").and_then(Value::as_str)
    }

    /// User-role entry.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.kind.as_deref() == Some("user")
    }

    /// Assistant-role entry.
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.kind.as_deref() == Some("assistant")
    }

    /// Whether any part is a `tool_result`.
    #[must_use]
    pub fn has_tool_result(&self) -> bool {
        self.parts()
            .any(|part| Self::part_type(part) == Some("tool_result"))
    }

    /// Concatenated text of all `text` parts.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .parts()
            .filter(|part| Self::part_type(part) == Some("text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }

    /// Whether any part is a `text` part.
    #[must_use]
    pub fn has_text(&self) -> bool {
        self.parts().any(|part| Self::part_type(part) == Some("text"))
    }
}

/// Handle on one session's structured log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    /// Locate the log for `session_id` in `workspace`.
    #[must_use]
    pub fn locate(projects_dir: &Path, workspace: &Path, session_id: &str) -> Self {
        Self {
            path: projects_dir
                .join(workspace_slug(workspace))
                .join(format!("{session_id}.jsonl")),
        }
    }

    /// Wrap an explicit path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size in bytes; `0` when the file does not exist yet.
    #[must_use]
    pub fn size(&self) -> u64 {
        files::len_or_zero(&self.path)
    }

    /// Complete, non-blank lines within the last `bytes` of the log.
    ///
    /// When the window starts mid-file, the partial first line is dropped.
    #[must_use]
    pub fn tail_lines(&self, bytes: u64) -> Vec<String> {
        match self.read_tail(bytes) {
            Ok(lines) => lines,
            Err(err) => {
                debug!(path = %self.path.display(), %err, "session log tail unavailable");
                Vec::new()
            }
        }
    }

    fn read_tail(&self, bytes: u64) -> std::io::Result<Vec<String>> {
        let mut file = File::open(&self.path)?;
        let size = file.seek(SeekFrom::End(0))?;
        if size == 0 {
            return Ok(Vec::new());
        }
        let offset = size.saturating_sub(bytes);
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let text = String::from_utf8_lossy(&buf);
        let mut lines = text.lines();
        if offset > 0 {
            lines.next();
        }
        Ok(lines
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Parsed entries of the tail, newest first; malformed lines skipped.
    fn recent_entries(&self) -> Vec<SessionEntry> {
        self.tail_lines(TAIL_BYTES)
            .iter()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// The last entry, if the last line parses.
    #[must_use]
    pub fn last_entry(&self) -> Option<SessionEntry> {
        let lines = self.tail_lines(TAIL_BYTES);
        serde_json::from_str(lines.last()?).ok()
    }

    /// Whether the log ends on a user entry carrying a tool result, meaning
    /// the process died mid tool call rather than after a natural turn end.
    #[must_use]
    pub fn ends_mid_tool_call(&self) -> bool {
        self.last_entry()
            .is_some_and(|entry| entry.is_user() && entry.has_tool_result())
    }

    /// Whether the agent's last message contains text output.
    ///
    /// A turn that ended on tool calls only, or on a tool result, did not
    /// finish communicating.
    #[must_use]
    pub fn ended_with_text(&self) -> bool {
        for entry in self.recent_entries() {
            if entry.is_assistant() {
                return entry.has_text();
            }
            if entry.is_user() {
                return false;
            }
        }
        false
    }

    /// Whether the agent's final answer is too brief to be decisive.
    #[must_use]
    pub fn last_output_is_idle(&self, max_chars: usize) -> bool {
        for entry in self.recent_entries() {
            if entry.is_assistant() {
                return entry
                    .text()
                    .is_some_and(|text| text.trim().chars().count() < max_chars);
            }
            if entry.is_user() {
                return false;
            }
        }
        false
    }

    /// Usage counters of the most recent assistant entry that reports them.
    #[must_use]
    pub fn last_usage(&self) -> Option<Usage> {
        self.recent_entries()
            .into_iter()
            .filter(SessionEntry::is_assistant)
            .find_map(|entry| entry.message.and_then(|msg| msg.usage))
    }

    /// Context fill percentage derived from the latest usage counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Token counts stay far below 2^52.
    pub fn usage_fill_pct(&self, window_tokens: u64) -> f64 {
        if window_tokens == 0 {
            return 0.0;
        }
        self.last_usage()
            .map_or(0.0, |usage| usage.total() as f64 / window_tokens as f64 * 100.0)
    }

    /// Replace all but the last `keep_last` image-bearing tool results with
    /// a placeholder. Returns the number of entries rewritten.
    ///
    /// Non-image lines are written back byte for byte; sibling text parts
    /// of a stripped tool result are kept.
    #[must_use]
    pub fn strip_old_images(&self, keep_last: usize) -> usize {
        let Some(raw) = files::read_bytes_lenient(&self.path) else {
            return 0;
        };
        let lines: Vec<&[u8]> = raw.split_inclusive(|&byte| byte == b'\n').collect();
        let image_lines: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line_has_image(line))
            .map(|(idx, _)| idx)
            .collect();
        if image_lines.len() <= keep_last {
            return 0;
        }
        let to_strip = &image_lines[..image_lines.len() - keep_last];

        let mut out = Vec::with_capacity(raw.len());
        let mut next = to_strip.iter().peekable();
        for (idx, line) in lines.iter().enumerate() {
            if next.peek() == Some(&&idx) {
                next.next();
                out.extend_from_slice(&strip_images_from_line(line));
            } else {
                out.extend_from_slice(line);
            }
        }

        if let Err(err) = files::write_atomic(&self.path, &out) {
            warn!(path = %self.path.display(), %err, "failed to rewrite session log");
            return 0;
        }
        to_strip.len()
    }

    /// Replace every embedded image with a placeholder.
    #[must_use]
    pub fn strip_all_images(&self) -> usize {
        self.strip_old_images(0)
    }
}

/// Directory name the agent derives from a workspace path: every `/` and
/// `.` becomes `-`.
#[must_use]
pub fn workspace_slug(workspace: &Path) -> String {
    workspace.to_string_lossy().replace(['/', '.'], "-")
}

fn tool_results_mut(entry: &mut Value) -> impl Iterator<Item = &mut Value> {
    entry
        .get_mut("message")
        .and_then(|msg| msg.get_mut("content"))
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("tool_result"))
}

fn is_image(part: &Value) -> bool {
    part.get("type").and_then(Value::as_str) == Some("image")
}

fn line_has_image(line: &[u8]) -> bool {
    let Ok(mut entry) = serde_json::from_slice::<Value>(line) else {
        return false;
    };
    let found = tool_results_mut(&mut entry).any(|item| {
        item.get("content")
            .and_then(Value::as_array)
            .is_some_and(|sub| sub.iter().any(is_image))
    });
    found
}

fn line_ending(line: &[u8]) -> &[u8] {
    if line.ends_with(b"\r\n") {
        b"\r\n"
    } else if line.ends_with(b"\n") {
        b"\n"
    } else {
        b""
    }
}

fn strip_images_from_line(line: &[u8]) -> Vec<u8> {
    let Ok(mut entry) = serde_json::from_slice::<Value>(line) else {
        return line.to_vec();
    };
    for item in tool_results_mut(&mut entry) {
        if let Some(sub) = item.get_mut("content").and_then(Value::as_array_mut) {
            for part in sub.iter_mut().filter(|part| is_image(part)) {
                *part = json!({ "type": "text", "text": IMAGE_PLACEHOLDER });
            }
        }
    }
    match serde_json::to_vec(&entry) {
        Ok(mut rewritten) => {
            rewritten.extend_from_slice(line_ending(line));
            rewritten
        }
        Err(_) => line.to_vec(),
    }
}
