pub mod hier_cell;

pub use hier_cell::{Entry, HierCell, HierGuard, HierLock};
