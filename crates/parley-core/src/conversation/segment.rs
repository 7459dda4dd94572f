use serde::{Deserialize, Serialize};

use super::message::ReasoningStatus;

/// Delimiters that wrap reasoning inside the response text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReasoningMarkers {
    pub open: String,
    pub close: String,
}

impl Default for ReasoningMarkers {
    fn default() -> Self {
        Self {
            open: "<think>".to_string(),
            close: "</think>".to_string(),
        }
    }
}

/// A typed slice of response text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSegment {
    Plain {
        text: String,
    },
    Reasoning {
        text: String,
        status: ReasoningStatus,
    },
}

impl ContentSegment {
    pub fn plain(text: impl Into<String>) -> Self {
        ContentSegment::Plain { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>, status: ReasoningStatus) -> Self {
        ContentSegment::Reasoning {
            text: text.into(),
            status,
        }
    }
}

/// Split accumulated response text into plain and reasoning segments.
///
/// Segment bodies are trimmed and blank ones dropped. An opening marker
/// without a matching close yields an in-progress reasoning segment for the
/// rest of the text; trailing text is only emitted once every opener is
/// closed. Text that produces no segment at all comes back as a single
/// untrimmed plain segment when it is not blank.
pub fn reconstruct(text: &str, markers: &ReasoningMarkers) -> Vec<ContentSegment> {
    let open = markers.open.as_str();
    let close = markers.close.as_str();
    let mut segments = Vec::new();

    if open.is_empty() || close.is_empty() {
        push_plain(&mut segments, text);
        return segments;
    }

    let mut last_index = 0;
    while let Some(found) = text[last_index..].find(open) {
        let open_at = last_index + found;
        let inner_start = open_at + open.len();
        let Some(found) = text[inner_start..].find(close) else {
            break;
        };
        let close_at = inner_start + found;

        push_plain(&mut segments, &text[last_index..open_at]);
        push_reasoning(
            &mut segments,
            &text[inner_start..close_at],
            ReasoningStatus::Done,
        );
        last_index = close_at + close.len();
    }

    let unclosed = text.matches(open).count() > text.matches(close).count();
    if unclosed {
        if let Some(open_at) = text.rfind(open).filter(|at| *at >= last_index) {
            push_plain(&mut segments, &text[last_index..open_at]);
            push_reasoning(
                &mut segments,
                &text[open_at + open.len()..],
                ReasoningStatus::InProgress,
            );
        }
    } else {
        push_plain(&mut segments, &text[last_index..]);
    }

    if segments.is_empty() && !text.trim().is_empty() {
        segments.push(ContentSegment::plain(text));
    }

    segments
}

fn push_plain(segments: &mut Vec<ContentSegment>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        segments.push(ContentSegment::plain(text));
    }
}

fn push_reasoning(segments: &mut Vec<ContentSegment>, text: &str, status: ReasoningStatus) {
    let text = text.trim();
    if !text.is_empty() {
        segments.push(ContentSegment::reasoning(text, status));
    }
}

/// The two live views published while a response streams in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveChannels {
    pub plain: String,
    pub reasoning: String,
    pub reasoning_in_progress: bool,
}

impl LiveChannels {
    /// Project segments onto the live channels. Field-carried reasoning, when
    /// present, replaces the reasoning parsed out of the text.
    pub fn project(segments: &[ContentSegment], field_reasoning: &str, field_active: bool) -> Self {
        let mut plain = Vec::new();
        let mut reasoning = Vec::new();
        let mut in_progress = false;
        for segment in segments {
            match segment {
                ContentSegment::Plain { text } => plain.push(text.as_str()),
                ContentSegment::Reasoning { text, status } => {
                    reasoning.push(text.as_str());
                    in_progress |= *status == ReasoningStatus::InProgress;
                }
            }
        }

        if field_reasoning.is_empty() {
            Self {
                plain: plain.join("\n\n"),
                reasoning: reasoning.join("\n\n"),
                reasoning_in_progress: in_progress,
            }
        } else {
            Self {
                plain: plain.join("\n\n"),
                reasoning: field_reasoning.to_string(),
                reasoning_in_progress: field_active,
            }
        }
    }
}
