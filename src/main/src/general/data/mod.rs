pub mod chunk;
pub mod chunk_tag;
pub mod collection;
pub mod data;
pub mod data_tag;
pub mod m_data_manager;
pub mod offsets;

pub use chunk::Chunk;
pub use chunk_tag::ChunkTag;
pub use collection::{Collection, Member};
pub use data::Data;
pub use data_tag::{DataTag, DataTagSpec};
pub use m_data_manager::{DataManager, DataTagManager};
pub use offsets::{offsets_hash, Lengths, Offsets, OffsetsMap, Strides};
