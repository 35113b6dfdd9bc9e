use super::data::{Chunk, Data};

/// Offsets of the four 2x2 chunks tiling a 4x4 array.
pub const GRID_2X2: [[usize; 2]; 4] = [[0, 0], [0, 2], [2, 0], [2, 2]];

pub fn grid_2x2_chunks() -> Vec<Chunk> {
    GRID_2X2
        .iter()
        .map(|offs| Chunk::from_parts(offs.to_vec(), vec![2, 2]))
        .collect()
}

/// 4x4 data named `name` holding the four unallocated 2x2 chunks.
pub fn grid_2x2_data(name: &str) -> Data {
    let data = Data::with_capacity(name, 4).with_lengths(vec![4, 4]);
    for chunk in grid_2x2_chunks() {
        data.add_chunk(chunk).unwrap();
    }
    data
}
