use std::{
    alloc::{self, Layout},
    cell::Cell,
    fmt::Debug,
    ops::Deref,
    ptr::NonNull,
};

use parking_lot::{ReentrantMutexGuard, RwLock};

use super::{
    chunk_tag::ChunkTag,
    offsets::{Lengths, Offsets, Strides},
};
use crate::{
    result::{RegDataErr, RegError, RegHandleErr, RegLockErr, RegResult},
    util::{
        calc_alignment,
        container::HierCell,
        copy_bytes, TryClone,
    },
};

/// Alignment requested from the allocator by plain [`Chunk::allocate`],
/// matching what a libc `malloc` guarantees on 64-bit targets.
const MALLOC_ALIGNMENT: usize = 16;

/// Heap block owned by exactly one chunk.
struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
    // alignment reported to callers, may exceed layout.align()
    alignment: usize,
    // >0 shared slice borrows, -1 exclusive
    access: Cell<isize>,
}

// SAFETY: the block is exclusively owned and only touched under the owning
// chunk's lock.
unsafe impl Send for AlignedBuf {}

#[cfg(test)]
thread_local! {
    static REFUSE_NEXT_ALLOC: Cell<bool> = Cell::new(false);
}

/// Makes the next allocation on this thread fail.
#[cfg(test)]
pub(crate) fn refuse_next_alloc() {
    REFUSE_NEXT_ALLOC.with(|refuse| refuse.set(true));
}

#[cfg(test)]
fn alloc_refused() -> bool {
    REFUSE_NEXT_ALLOC.with(|refuse| refuse.replace(false))
}

#[cfg(not(test))]
fn alloc_refused() -> bool {
    false
}

impl AlignedBuf {
    fn alloc(layout: Layout) -> Option<NonNull<u8>> {
        if alloc_refused() {
            return None;
        }
        #[cfg(feature = "unsafe-log")]
        tracing::debug!("alloc {:?}", layout);
        // SAFETY: callers never build a zero sized layout. Zeroed so that
        // slices handed out before the first write are initialized.
        NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
    }

    fn new(bytes: usize, align: usize, alignment: Option<usize>) -> Option<Self> {
        if bytes == 0 {
            return None;
        }
        let layout = Layout::from_size_align(bytes, align).ok()?;
        let ptr = Self::alloc(layout)?;
        let alignment = alignment.unwrap_or_else(|| calc_alignment(ptr.as_ptr() as usize));
        Some(Self {
            ptr,
            layout,
            alignment,
            access: Cell::new(0),
        })
    }

    fn len(&self) -> usize {
        self.layout.size()
    }

    fn duplicate(&self) -> Option<Self> {
        let copy = Self::new(
            self.len(),
            self.alignment.max(self.layout.align()),
            Some(self.alignment),
        )?;
        // SAFETY: both blocks are live and `len` bytes long.
        unsafe { copy_bytes(copy.ptr.as_ptr(), self.ptr.as_ptr(), self.len()) };
        Some(copy)
    }

    fn with_slice<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        if self.access.get() < 0 {
            return None;
        }
        let _reset = AccessReset::enter(&self.access, self.access.get() + 1);
        // SAFETY: no exclusive slice is alive (checked above).
        let slice = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) };
        Some(f(slice))
    }

    fn with_slice_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        if self.access.get() != 0 {
            return None;
        }
        let _reset = AccessReset::enter(&self.access, -1);
        // SAFETY: no other slice of this block is alive (checked above).
        let slice = unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) };
        Some(f(slice))
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        #[cfg(feature = "unsafe-log")]
        tracing::debug!("dealloc {:?}", self.layout);
        // SAFETY: allocated in `AlignedBuf::alloc` with this very layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

struct AccessReset<'a> {
    access: &'a Cell<isize>,
    prev: isize,
}

impl<'a> AccessReset<'a> {
    fn enter(access: &'a Cell<isize>, next: isize) -> Self {
        let prev = access.get();
        access.set(next);
        Self { access, prev }
    }
}

impl Drop for AccessReset<'_> {
    fn drop(&mut self) {
        self.access.set(self.prev);
    }
}

/// A chunk tag plus an exclusively owned, aligned byte buffer.
///
/// Buffer operations take the chunk's reentrant lock; the tag sits behind its
/// own read/write lock so metadata reads never contend with byte access.
/// The offsets never change after construction, so a chunk stays valid under
/// the key it was stored with.
pub struct Chunk {
    tag: RwLock<ChunkTag>,
    mem: HierCell<Option<AlignedBuf>>,
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new(ChunkTag::default())
    }
}

impl From<ChunkTag> for Chunk {
    fn from(tag: ChunkTag) -> Self {
        Self::new(tag)
    }
}

impl Chunk {
    /// Chunk described by `tag`, with no memory.
    pub fn new(tag: ChunkTag) -> Self {
        Self {
            tag: RwLock::new(tag),
            mem: HierCell::new(None),
        }
    }

    pub fn from_parts(offsets: Offsets, lengths: Lengths) -> Self {
        Self::new(ChunkTag::new(offsets, lengths))
    }

    pub fn from_parts_strided(offsets: Offsets, lengths: Lengths, strides: Strides) -> Self {
        Self::new(ChunkTag::with_strides(offsets, lengths, strides))
    }

    pub fn tag(&self) -> ChunkTag {
        self.tag.read().clone()
    }

    pub fn offsets(&self) -> Offsets {
        self.tag.read().offsets().clone()
    }

    pub fn lengths(&self) -> Lengths {
        self.tag.read().lengths().clone()
    }

    pub fn strides(&self) -> Strides {
        self.tag.read().strides().clone()
    }

    pub fn ndim(&self) -> usize {
        self.tag.read().ndim()
    }

    /// Element count of the described region.
    pub fn size(&self) -> usize {
        self.tag.read().size()
    }

    fn alloc_failure(&self, bytes: usize, alignment: usize, context: &str) -> RegError {
        RegDataErr::AllocationFailure {
            offsets: self.offsets(),
            bytes,
            alignment,
            context: context.to_owned(),
        }
        .into()
    }

    fn install(&self, alignment: usize, bytes: usize, requested: Option<usize>) -> RegResult<()> {
        self.mem
            .write("allocate", |mem, _| {
                if mem.is_some() {
                    return Err(self.alloc_failure(bytes, alignment, "chunk already allocated"));
                }
                let buf = AlignedBuf::new(bytes, alignment, requested)
                    .ok_or_else(|| self.alloc_failure(bytes, alignment, "allocator refused"))?;
                tracing::debug!(
                    "chunk {:?} allocated {} bytes, alignment {}",
                    self.offsets(),
                    bytes,
                    buf.alignment
                );
                *mem = Some(buf);
                Ok(())
            })?
    }

    /// Allocates `bytes` and records the alignment the block happens to have.
    pub fn allocate(&self, bytes: usize) -> RegResult<()> {
        self.install(MALLOC_ALIGNMENT, bytes, None)
    }

    /// Allocates `bytes` aligned to `alignment`, which must be a power of two.
    pub fn aligned_allocate(&self, alignment: usize, bytes: usize) -> RegResult<()> {
        self.install(alignment, bytes, Some(alignment))
    }

    /// Releases the buffer. Freeing an empty chunk does nothing.
    pub fn free(&self) -> RegResult<()> {
        let released = self.mem.write("free", |mem, _| mem.take())?;
        drop(released);
        Ok(())
    }

    pub fn is_allocated(&self) -> bool {
        // only internal writers hold the cell mutably and they never re-enter
        self.mem.read("is_allocated", |mem| mem.is_some()).unwrap_or(false)
    }

    /// Alignment of the buffer, 0 when unallocated.
    pub fn alignment(&self) -> usize {
        self.mem
            .read("alignment", |mem| mem.as_ref().map_or(0, |b| b.alignment))
            .unwrap_or(0)
    }

    /// Byte count of the buffer, 0 when unallocated.
    pub fn bytes(&self) -> usize {
        self.mem
            .read("bytes", |mem| mem.as_ref().map_or(0, |b| b.len()))
            .unwrap_or(0)
    }

    /// Address of the buffer, if any.
    pub fn address(&self) -> Option<usize> {
        self.mem
            .read("address", |mem| mem.as_ref().map(|b| b.ptr.as_ptr() as usize))
            .ok()
            .flatten()
    }

    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> RegResult<R> {
        self.mem.read("with_bytes", |mem| {
            let buf = mem.as_ref().ok_or_else(|| self.not_allocated())?;
            buf.with_slice(f).ok_or_else(|| self.nested_access("with_bytes"))
        })?
    }

    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> RegResult<R> {
        self.mem.read("with_bytes_mut", |mem| {
            let buf = mem.as_ref().ok_or_else(|| self.not_allocated())?;
            buf.with_slice_mut(f)
                .ok_or_else(|| self.nested_access("with_bytes_mut"))
        })?
    }

    pub fn write_bytes(&self, offset: usize, src: &[u8]) -> RegResult<()> {
        self.with_bytes_mut(|bytes| {
            let dst = self.range_mut(bytes, offset, src.len())?;
            dst.copy_from_slice(src);
            Ok(())
        })?
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> RegResult<Vec<u8>> {
        self.with_bytes(|bytes| {
            let end = self.check_range(bytes.len(), offset, len)?;
            Ok(bytes[offset..end].to_vec())
        })?
    }

    fn check_range(&self, total: usize, start: usize, len: usize) -> RegResult<usize> {
        match start.checked_add(len) {
            Some(end) if end <= total => Ok(end),
            _ => Err(RegHandleErr::ByteRangeOutOfBound {
                offsets: self.offsets(),
                start,
                len,
                bytes: total,
            }
            .into()),
        }
    }

    fn range_mut<'b>(&self, bytes: &'b mut [u8], start: usize, len: usize) -> RegResult<&'b mut [u8]> {
        let end = self.check_range(bytes.len(), start, len)?;
        Ok(&mut bytes[start..end])
    }

    fn not_allocated(&self) -> RegError {
        RegHandleErr::ChunkNotAllocated {
            offsets: self.offsets(),
        }
        .into()
    }

    fn nested_access(&self, op: &'static str) -> RegError {
        RegLockErr::MapBorrowed {
            target: format!("chunk {:?} bytes", self.offsets()),
            op,
        }
        .into()
    }

    /// Copy-assignment between chunks at the same offsets: shape and buffer
    /// are copied. The replacement buffer is built before the current one is
    /// released, so a failed allocation leaves `self` untouched.
    pub fn assign_from(&self, other: &Chunk) -> RegResult<()> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        let (mine, theirs) = (self.offsets(), other.offsets());
        if mine != theirs {
            return Err(RegHandleErr::OffsetsMismatch {
                target: mine,
                source: theirs,
            }
            .into());
        }
        let copy_over = |mine: &mut Option<AlignedBuf>, theirs: &Option<AlignedBuf>| -> RegResult<()> {
            let replacement = match theirs {
                Some(buf) => Some(buf.duplicate().ok_or_else(|| {
                    other.alloc_failure(buf.len(), buf.alignment, "copy assignment")
                })?),
                None => None,
            };
            *mine = replacement;
            *self.tag.write() = other.tag();
            Ok(())
        };
        // lower address first so crossed assignments cannot deadlock
        if (self as *const Chunk) < (other as *const Chunk) {
            self.mem.write("assign_from", |mine, _| {
                other.mem.read("assign_from", |theirs| copy_over(mine, theirs))
            })???;
        } else {
            other.mem.read("assign_from", |theirs| {
                self.mem.write("assign_from", |mine, _| copy_over(mine, theirs))
            })???;
        }
        Ok(())
    }

    /// Moves the buffer into a new chunk with the same tag, leaving this one
    /// unallocated.
    pub fn take(&self) -> RegResult<Chunk> {
        let mem = self.mem.write("take", |mem, _| mem.take())?;
        Ok(Chunk {
            tag: RwLock::new(self.tag()),
            mem: HierCell::new(mem),
        })
    }

    /// Holds the chunk's lock until the guard drops. Byte access from the
    /// holding thread still works; other threads wait.
    pub fn lock_scope(&self) -> ChunkGuard<'_> {
        ChunkGuard {
            chunk: self,
            _guard: self.mem.guard(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.mem.is_locked()
    }

    /// Cascade depth held on this chunk by the current thread.
    pub fn lock_depth(&self) -> usize {
        if self.mem.is_owned_by_current_thread() {
            self.mem.held()
        } else {
            0
        }
    }

    pub(crate) fn acquire_detached(&self) {
        let _ = self.mem.acquire();
    }

    pub(crate) fn release_detached(&self) -> RegResult<()> {
        self.mem.release()
    }
}

/// Scoped lock on one chunk, see [`Chunk::lock_scope`].
pub struct ChunkGuard<'a> {
    chunk: &'a Chunk,
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl Deref for ChunkGuard<'_> {
    type Target = Chunk;

    fn deref(&self) -> &Chunk {
        self.chunk
    }
}

impl TryClone for Chunk {
    /// Deep copy: same tag, a fresh buffer of the same size and alignment.
    fn try_clone(&self) -> RegResult<Chunk> {
        let tag = self.tag();
        let mem = self.mem.read("try_clone", |mem| match mem {
            Some(buf) => buf
                .duplicate()
                .map(Some)
                .ok_or_else(|| self.alloc_failure(buf.len(), buf.alignment, "deep copy")),
            None => Ok(None),
        })??;
        Ok(Chunk {
            tag: RwLock::new(tag),
            mem: HierCell::new(mem),
        })
    }
}

impl PartialEq for Chunk {
    /// Offsets only, like [`ChunkTag`].
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let mine = self.tag.read().clone();
        mine == *other.tag.read()
    }
}

impl Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("tag", &*self.tag.read())
            .field("bytes", &self.bytes())
            .field("alignment", &self.alignment())
            .finish()
    }
}
