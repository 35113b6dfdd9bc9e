use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{
    chunk_tag::ChunkTag,
    collection::{Collection, Member},
    offsets::{Lengths, Offsets},
};
use crate::{result::RegResult, util::TryClone};

/// Metadata-only mirror of [`Data`](super::Data): chunk tags keyed by offsets.
/// Chunk tags have no lock, so the hierarchical lock covers the map alone.
pub type DataTag = Collection<ChunkTag>;

impl TryClone for ChunkTag {
    fn try_clone(&self) -> RegResult<Self> {
        Ok(self.clone())
    }
}

impl Member for ChunkTag {
    const COLLECTION: &'static str = "data_tag";

    fn member_key(&self) -> Offsets {
        self.offsets().clone()
    }
}

impl Collection<ChunkTag> {
    pub fn add_chunk_tag(&self, tag: ChunkTag) -> RegResult<()> {
        self.add(tag)
    }

    pub fn add_chunk_tag_copy(&self, tag: &ChunkTag) -> RegResult<()> {
        self.add_copy(tag)
    }

    pub fn remove_chunk_tag(&self, offsets: &[usize]) -> RegResult<Arc<ChunkTag>> {
        self.remove(offsets)
    }

    pub fn get_chunk_tag(&self, offsets: &[usize]) -> RegResult<Arc<ChunkTag>> {
        self.get(offsets)
    }

    pub fn num_chunk_tags(&self) -> usize {
        self.num_members()
    }

    pub fn for_each_chunk_tag(&self, f: impl FnMut(&Offsets, &ChunkTag)) -> RegResult<()> {
        self.for_each(f)
    }

    /// Snapshot in the serializable layout used by configuration files.
    pub fn to_spec(&self) -> RegResult<DataTagSpec> {
        let mut chunks = Vec::with_capacity(self.num_members());
        self.for_each(|_, tag| chunks.push(tag.clone()))?;
        chunks.sort_by(|a, b| a.offsets().cmp(b.offsets()));
        Ok(DataTagSpec {
            name: self.name().to_owned(),
            lengths: self.lengths(),
            chunks,
        })
    }
}

/// Serializable description of a data tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTagSpec {
    pub name: String,
    #[serde(default)]
    pub lengths: Lengths,
    #[serde(default)]
    pub chunks: Vec<ChunkTag>,
}

impl DataTagSpec {
    /// Builds the data tag, rejecting duplicate chunk offsets.
    pub fn build(&self) -> RegResult<DataTag> {
        let tag = DataTag::with_capacity(self.name.clone(), self.chunks.len())
            .with_lengths(self.lengths.clone());
        for chunk in &self.chunks {
            tag.add_chunk_tag_copy(chunk)?;
        }
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        general::test_utils::GRID_2X2, result::ErrorKind, util::container::HierLock,
    };
    use std::thread;

    fn grid_tag(name: &str) -> DataTag {
        let tag = DataTag::new(name).with_lengths(vec![4, 4]);
        for offs in GRID_2X2 {
            tag.add_chunk_tag(ChunkTag::new(offs.to_vec(), vec![2, 2]))
                .unwrap();
        }
        tag
    }

    #[test]
    fn test_mirrors_data_contract() {
        let tag = grid_tag("T");
        assert_eq!(tag.num_chunk_tags(), 4);
        assert_eq!(tag.size(), 16);
        assert_eq!(tag.get_chunk_tag(&[2, 2]).unwrap().lengths(), &vec![2, 2]);
        assert_eq!(
            tag.add_chunk_tag(ChunkTag::new(vec![2, 2], vec![1, 1]))
                .unwrap_err()
                .kind(),
            ErrorKind::DuplicateKey
        );
        assert_eq!(
            tag.add_chunk_tag_copy(&ChunkTag::new(vec![0, 0], vec![9, 9]))
                .unwrap_err()
                .kind(),
            ErrorKind::DuplicateKey
        );
        let removed = tag.remove_chunk_tag(&[0, 2]).unwrap();
        assert_eq!(removed.offsets(), &vec![0, 2]);
        assert_eq!(
            tag.get_chunk_tag(&[0, 2]).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_lock_covers_only_itself() {
        let tag = Arc::new(grid_tag("L"));
        tag.lock();
        tag.add_chunk_tag(ChunkTag::new(vec![4, 4], vec![1, 1]))
            .unwrap();
        let _ = tag.remove_chunk_tag(&[4, 4]).unwrap();
        let other = tag.clone();
        let reader = thread::spawn(move || other.num_chunk_tags());
        tag.unlock().unwrap();
        assert_eq!(reader.join().unwrap(), 4);
    }

    #[test]
    fn test_export_round_trip_sorted() {
        let spec = grid_tag("S").to_spec().unwrap();
        assert_eq!(spec.chunks.len(), 4);
        assert_eq!(spec.chunks[0].offsets(), &vec![0, 0]);
        assert_eq!(spec.chunks[3].offsets(), &vec![2, 2]);
        let rebuilt = spec.build().unwrap();
        assert_eq!(rebuilt.num_chunk_tags(), 4);
        assert_eq!(rebuilt.lengths(), vec![4, 4]);

        let yaml = "name: bad\nchunks:\n  - {offsets: [0], lengths: [1]}\n  - {offsets: [0], lengths: [2]}\n";
        let bad: DataTagSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(bad.build().unwrap_err().kind(), ErrorKind::DuplicateKey);
    }
}
