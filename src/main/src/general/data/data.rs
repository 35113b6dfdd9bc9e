use std::sync::Arc;

use super::{
    chunk::Chunk,
    collection::{Cascade, Collection, Member},
    offsets::Offsets,
};
use crate::result::RegResult;

/// A named set of chunks keyed by offsets.
pub type Data = Collection<Chunk>;

impl Member for Chunk {
    const COLLECTION: &'static str = "data";

    fn member_key(&self) -> Offsets {
        self.offsets()
    }

    fn lock_member(&self, _: &Cascade) {
        self.acquire_detached();
    }

    fn unlock_member(&self, _: &Cascade) -> RegResult<()> {
        self.release_detached()
    }
}

impl Collection<Chunk> {
    pub fn add_chunk(&self, chunk: Chunk) -> RegResult<()> {
        self.add(chunk)
    }

    pub fn add_chunk_copy(&self, chunk: &Chunk) -> RegResult<()> {
        self.add_copy(chunk)
    }

    pub fn remove_chunk(&self, offsets: &[usize]) -> RegResult<Arc<Chunk>> {
        self.remove(offsets)
    }

    /// Handle to the chunk at `offsets`; the Data itself is not kept locked.
    /// A guard from [`Chunk::lock_scope`] makes a concurrent `Data::lock` wait
    /// until it drops.
    pub fn get_chunk(&self, offsets: &[usize]) -> RegResult<Arc<Chunk>> {
        self.get(offsets)
    }

    pub fn contains_chunk(&self, offsets: &[usize]) -> bool {
        self.contains(offsets)
    }

    pub fn num_chunks(&self) -> usize {
        self.num_members()
    }

    pub fn for_each_chunk(&self, f: impl FnMut(&Offsets, &Chunk)) -> RegResult<()> {
        self.for_each(f)
    }

    /// Total buffer bytes across every allocated chunk.
    pub fn allocated_bytes(&self) -> RegResult<usize> {
        let mut total = 0;
        self.for_each(|_, chunk| total += chunk.bytes())?;
        Ok(total)
    }
}
