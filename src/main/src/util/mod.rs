pub mod container;

use crate::result::RegResult;

#[cfg(test)]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Largest power of two tested by [`calc_alignment`].
pub const MAX_PROBE_ALIGNMENT: usize = 2048;

#[cfg(test)]
pub fn test_tracing_start() {
    let my_filter = tracing_subscriber::filter::filter_fn(|v| {
        if let Some(mp) = v.module_path() {
            if mp.contains("tokio") {
                return false;
            }
        }
        v.level() != &tracing::Level::TRACE
    });
    let my_layer = tracing_subscriber::fmt::layer().with_test_writer();
    let _ = tracing_subscriber::registry()
        .with(my_layer.with_filter(my_filter))
        .try_init();
}

/// Fallible deep copy, for values owning resources that may fail to duplicate.
pub trait TryClone: Sized {
    fn try_clone(&self) -> RegResult<Self>;
}

/// True if `[a, a+al]` and `[b, b+bl]` touch or overlap.
pub fn can_alias(a: *const u8, al: usize, b: *const u8, bl: usize) -> bool {
    let aa = a as usize;
    let ae = aa + al;
    let bb = b as usize;
    let be = bb + bl;
    (bb <= aa && aa <= be) || (bb <= ae && ae <= be) || (aa <= bb && bb <= ae) || (aa <= be && be <= ae)
}

/// Copies `len` bytes, falling back to an overlapping move when the ranges may alias.
///
/// # Safety
/// `src` must be valid for reads and `dest` valid for writes of `len` bytes.
pub unsafe fn copy_bytes(dest: *mut u8, src: *const u8, len: usize) {
    if len == 0 || dest as *const u8 == src {
        return;
    }
    if can_alias(src, len, dest, len) {
        std::ptr::copy(src, dest, len);
    } else {
        std::ptr::copy_nonoverlapping(src, dest, len);
    }
}

/// Alignment of `addr` as the largest power of two dividing it, capped at
/// [`MAX_PROBE_ALIGNMENT`].
pub fn calc_alignment(addr: usize) -> usize {
    let mut alignment = 1;
    let mut m = 2;
    while m <= MAX_PROBE_ALIGNMENT {
        if addr % m != 0 {
            return alignment;
        }
        alignment *= 2;
        m *= 2;
    }
    alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_alignment() {
        assert_eq!(calc_alignment(1), 1);
        assert_eq!(calc_alignment(6), 2);
        assert_eq!(calc_alignment(64), 64);
        assert_eq!(calc_alignment(4096 * 3), MAX_PROBE_ALIGNMENT);
        assert_eq!(calc_alignment(0), MAX_PROBE_ALIGNMENT);
    }

    #[test]
    fn test_can_alias() {
        let buf = [0u8; 32];
        let p = buf.as_ptr();
        assert!(can_alias(p, 16, unsafe { p.add(8) }, 16));
        assert!(!can_alias(p, 8, unsafe { p.add(16) }, 8));
    }

    #[test]
    fn test_copy_bytes_overlapping() {
        let mut buf: Vec<u8> = (0..16).collect();
        let p = buf.as_mut_ptr();
        unsafe { copy_bytes(p.add(4), p, 8) };
        assert_eq!(&buf[4..12], &[0, 1, 2, 3, 4, 5, 6, 7]);
    }
}
