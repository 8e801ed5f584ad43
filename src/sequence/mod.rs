//! Pattern sequences and their playback state.
//!
//! A [`Sequence`] is the ordered list of calibrated frames built from a list of
//! [`OpticalParameters`]. [`SequenceManager`] owns the current sequence, the
//! device handle and the [`PlaybackState`] machine:
//!
//! ```text
//! Idle --build--> Built --load_to_device--> Loaded --run--> Running --stop--> Loaded
//! ```

pub mod manager;

pub use manager::SequenceManager;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pattern::{OpticalParameters, Pattern};

/// Where the current sequence is in its lifecycle.
///
/// Ordered so that `state >= PlaybackState::Built` means "a sequence exists".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Nothing built
    Idle,
    /// Sequence computed, not on the device
    Built,
    /// Sequence uploaded (or single frame written)
    Loaded,
    /// Device is following external triggers
    Running,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Built => "Built",
            Self::Loaded => "Loaded",
            Self::Running => "Running",
        };
        f.write_str(name)
    }
}

/// One frame of a sequence with the parameters it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceEntry {
    /// Input parameters
    pub params: OpticalParameters,
    /// Calibrated device frame
    pub frame: Pattern,
}

/// Ordered, immutable list of calibrated frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    entries: Vec<SequenceEntry>,
}

impl Sequence {
    /// Wrap already-built entries.
    pub fn new(entries: Vec<SequenceEntry>) -> Self {
        Self { entries }
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the sequence has no frames.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in playback order.
    pub fn entries(&self) -> &[SequenceEntry] {
        &self.entries
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Option<&SequenceEntry> {
        self.entries.get(index)
    }

    /// Frames in playback order.
    pub fn frames(&self) -> Vec<&Pattern> {
        self.entries.iter().map(|e| &e.frame).collect()
    }

    /// Parameters in playback order.
    pub fn parameters(&self) -> Vec<OpticalParameters> {
        self.entries.iter().map(|e| e.params).collect()
    }
}
