use serde::{Deserialize, Serialize};

use super::offsets::{Lengths, Offsets, Strides};

/// Spatial metadata of a chunk: where it sits in the logical array and its shape.
///
/// Equality looks at `offsets` only. Two tags at the same address with
/// different shapes compare equal, so equality says nothing about shape
/// compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkTag {
    offsets: Offsets,
    lengths: Lengths,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    strides: Strides,
}

impl ChunkTag {
    pub fn new(offsets: Offsets, lengths: Lengths) -> Self {
        Self {
            offsets,
            lengths,
            strides: Vec::new(),
        }
    }

    pub fn with_strides(offsets: Offsets, lengths: Lengths, strides: Strides) -> Self {
        Self {
            offsets,
            lengths,
            strides,
        }
    }

    /// Map key of this tag.
    pub fn key(&self) -> &Offsets {
        &self.offsets
    }

    pub fn offsets(&self) -> &Offsets {
        &self.offsets
    }

    pub fn offset(&self, idx: usize) -> Option<usize> {
        self.offsets.get(idx).copied()
    }

    pub fn lengths(&self) -> &Lengths {
        &self.lengths
    }

    pub fn length(&self, idx: usize) -> Option<usize> {
        self.lengths.get(idx).copied()
    }

    pub fn strides(&self) -> &Strides {
        &self.strides
    }

    pub fn ndim(&self) -> usize {
        self.lengths.len()
    }

    /// Element count, the product of `lengths`.
    pub fn size(&self) -> usize {
        self.lengths.iter().product()
    }
}

impl PartialEq for ChunkTag {
    fn eq(&self, other: &Self) -> bool {
        self.offsets == other.offsets
    }
}

impl Eq for ChunkTag {}
