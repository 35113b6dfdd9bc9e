pub mod data;
pub mod fs;
pub mod network;
pub mod registry;

#[cfg(test)]
pub mod test_utils;
