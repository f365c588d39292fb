//! Bracket discipline for substreams and map streams.
//!
//! Components keep one [`BracketStack`] for the channel they subscribe to.
//! Control packets on that channel push and pop frames; control packets on
//! any other channel never touch the stack. A frame is either a plain
//! substream or a map carrying the currently active namespace — because each
//! map frame owns its namespace, a `Switch` inside a nested map can never
//! leak into the enclosing one.

use crate::error::ProtocolError;
use crate::packet::ControlKind;
use serde::{Deserialize, Serialize};

/// Upper bound on bracket nesting per component.
pub const MAX_BRACKET_DEPTH: usize = 64;

/// One open bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BracketFrame {
    /// An `Open` .. `Close` substream.
    Substream,
    /// A `MapOpen` .. `MapClose` map stream and its active namespace.
    Map { active: Option<String> },
}

/// The per-channel stack of open brackets.
#[derive(Debug, Clone, Default)]
pub struct BracketStack {
    frames: Vec<BracketFrame>,
}

impl BracketStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The active namespace of the innermost map, if the top frame is a map
    /// with a namespace selected.
    pub fn active_namespace(&self) -> Option<&str> {
        match self.frames.last() {
            Some(BracketFrame::Map { active }) => active.as_deref(),
            _ => None,
        }
    }

    /// Apply one control marker to the stack.
    pub fn apply(&mut self, kind: &ControlKind) -> Result<(), ProtocolError> {
        match kind {
            ControlKind::Open => self.push(BracketFrame::Substream),
            ControlKind::Close => match self.frames.last() {
                Some(BracketFrame::Substream) => {
                    self.frames.pop();
                    Ok(())
                }
                _ => Err(ProtocolError::UnbalancedClose),
            },
            ControlKind::MapOpen => self.push(BracketFrame::Map { active: None }),
            ControlKind::MapClose => match self.frames.last() {
                Some(BracketFrame::Map { .. }) => {
                    self.frames.pop();
                    Ok(())
                }
                _ => Err(ProtocolError::UnbalancedMapClose),
            },
            ControlKind::Switch(namespace) => match self.frames.last_mut() {
                Some(BracketFrame::Map { active }) => {
                    // Re-selecting the active namespace is a no-op.
                    if active.as_deref() != Some(namespace) {
                        *active = Some(namespace.clone());
                    }
                    Ok(())
                }
                _ => Err(ProtocolError::SwitchOutsideMap(namespace.clone())),
            },
        }
    }

    /// Verify the stack is empty at end of stream.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.frames.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::UnclosedBrackets(self.frames.len()))
        }
    }

    fn push(&mut self, frame: BracketFrame) -> Result<(), ProtocolError> {
        if self.frames.len() >= MAX_BRACKET_DEPTH {
            return Err(ProtocolError::DepthExceeded(MAX_BRACKET_DEPTH));
        }
        self.frames.push(frame);
        Ok(())
    }
}
