//! The agent subprocess streaming protocol: one JSON event per stdout line.
//!
//! Three event shapes matter:
//! - `content_block_delta` — an incremental text fragment
//! - `assistant` — a full message whose text blocks are treated like deltas
//! - `result` — an authoritative final text that supersedes everything
//!   accumulated so far
//!
//! Lines that do not parse are either discarded (PTY shim chatter) or
//! appended verbatim (ordinary text the agent printed outside the protocol).

use serde::Deserialize;

/// Events from the agent's stream-json output format.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: Delta },

    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct Delta {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    /// Tool-use and any future block types carry no streamable text.
    #[serde(other)]
    Other,
}

/// Accumulates streamed output for one invocation.
///
/// Owned by exactly one reader task; no synchronization needed within a call.
#[derive(Debug, Default)]
pub struct OutputAccumulator {
    text: String,
    final_result: Option<String>,
}

impl OutputAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one stdout line. Returns the text fragment that became
    /// visible with this line, if any, so callers can stream it live.
    pub fn feed_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<StreamEvent>(line) {
            Ok(StreamEvent::ContentBlockDelta { delta }) => {
                if delta.text.is_empty() {
                    return None;
                }
                self.text.push_str(&delta.text);
                Some(delta.text)
            }
            Ok(StreamEvent::Assistant { message }) => {
                let mut emitted = String::new();
                for block in message.content {
                    if let ContentBlock::Text { text } = block {
                        self.text.push_str(&text);
                        self.text.push('\n');
                        emitted.push_str(&text);
                        emitted.push('\n');
                    }
                }
                (!emitted.is_empty()).then_some(emitted)
            }
            Ok(StreamEvent::Result { result }) => {
                if result.is_some() {
                    self.final_result = result;
                }
                None
            }
            Err(_) => {
                if is_shim_chatter(line) {
                    return None;
                }
                self.text.push_str(line);
                self.text.push('\n');
                Some(format!("{line}\n"))
            }
        }
    }

    /// The finalized output: the `result` event's text when one arrived,
    /// otherwise everything accumulated.
    pub fn into_output(self) -> String {
        self.final_result.unwrap_or(self.text)
    }

    /// Whether a final `result` event has been seen.
    pub fn has_final_result(&self) -> bool {
        self.final_result.is_some()
    }
}

/// Noise emitted by the `script(1)` pseudo-terminal wrapper, not the agent.
fn is_shim_chatter(line: &str) -> bool {
    line.starts_with("Script started on") || line.starts_with("Script done on")
}
