//! Connectivity candidates and the per-session pending queue

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A connectivity candidate as browsers serialize `RTCIceCandidate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_m_line_index = Some(index);
        self
    }
}

/// Candidates that arrived before their endpoint existed.
///
/// FIFO and unbounded. Draining empties the queue in place, so a second drain
/// yields nothing.
#[derive(Debug, Default, Clone)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
    total_queued: usize,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.total_queued += 1;
        self.pending.push_back(candidate);
    }

    /// Take every pending candidate in arrival order
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending).into()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Candidates queued over the session's lifetime
    pub fn total_queued(&self) -> usize {
        self.total_queued
    }
}
