pub mod m_files;
pub mod shared_file;

pub use m_files::Files;
pub use shared_file::{FileMode, SharedFile};
