//! Folding streamed deltas into the response text.
//!
//! Servers are inconsistent about what a packet's `content` means: some send
//! the full text so far, some send only the new characters, and completion
//! packets carry the final text. [`fold`] reconciles the three.

/// How a packet's content relates to what has been accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeltaKind {
    /// Authoritative full text.
    Snapshot,
    /// New characters to append.
    Answer,
    /// Unlabelled; either a suffix or a full re-send.
    #[default]
    Incremental,
}

impl DeltaKind {
    pub fn classify(is_complete: bool, event_type: Option<&str>) -> Self {
        if is_complete {
            DeltaKind::Snapshot
        } else if event_type == Some("answer") {
            DeltaKind::Answer
        } else {
            DeltaKind::Incremental
        }
    }
}

/// Apply one delta to the accumulated text.
///
/// `Incremental` deltas append when they are longer than everything seen so
/// far or are not already contained in it; otherwise they are taken as a
/// re-send of the full text. Lengths are counted in characters.
pub fn fold(accumulated: &mut String, text: &str, kind: DeltaKind) {
    match kind {
        DeltaKind::Snapshot => text.clone_into(accumulated),
        DeltaKind::Answer => accumulated.push_str(text),
        DeltaKind::Incremental => {
            let longer = text.chars().count() > accumulated.chars().count();
            if longer || !accumulated.contains(text.trim()) {
                accumulated.push_str(text);
            } else {
                text.clone_into(accumulated);
            }
        }
    }
}

/// Per-turn text buffers fed by stream packets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseBuffers {
    pub response: String,
    /// Reasoning delivered in the packet's `thoughts` field.
    pub reasoning: String,
    pub reasoning_active: bool,
}

impl ResponseBuffers {
    /// Fold one packet. Returns whether anything changed.
    ///
    /// While field-carried reasoning is streaming, the server re-sends the
    /// whole answer, so content replaces the response instead of folding.
    pub fn apply(&mut self, content: &str, thoughts: Option<&str>, kind: DeltaKind) -> bool {
        match thoughts {
            Some(thoughts) if !thoughts.is_empty() => {
                self.reasoning_active = true;
                self.reasoning.push_str(thoughts);
                if !content.is_empty() {
                    content.clone_into(&mut self.response);
                }
                return true;
            }
            Some(_) if self.reasoning_active => {
                self.reasoning_active = false;
                if !content.is_empty() {
                    content.clone_into(&mut self.response);
                }
                return true;
            }
            _ => {}
        }

        if content.is_empty() {
            return false;
        }

        if self.reasoning_active {
            self.reasoning_active = false;
            content.clone_into(&mut self.response);
        } else {
            fold(&mut self.response, content, kind);
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.response.trim().is_empty() && self.reasoning.trim().is_empty()
    }
}
