use super::{Data, DataTag};
use crate::general::registry::Registry;

/// Session registry of [`Data`] by name.
pub type DataManager = Registry<Data>;

/// Session registry of [`DataTag`] by name.
pub type DataTagManager = Registry<DataTag>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        general::{data::ChunkTag, test_utils::grid_2x2_data},
        result::ErrorKind,
        util::container::HierLock,
    };
    use std::{sync::Arc, thread};

    #[test]
    fn test_miss_is_recoverable() {
        let manager = DataManager::new();
        let err = manager.get("F").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        manager.add(Data::new("F")).unwrap();
        assert_eq!(manager.get("F").unwrap().name(), "F");
        assert_eq!(manager.remove("G").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(manager.contains("F"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let manager = DataManager::new();
        manager.add(grid_2x2_data("C")).unwrap();
        assert_eq!(
            manager.add(Data::new("C")).unwrap_err().kind(),
            ErrorKind::DuplicateKey
        );
        let clash = Data::new("C");
        assert_eq!(
            manager.add_copy(&clash).unwrap_err().kind(),
            ErrorKind::DuplicateKey
        );
        // the source survives
        assert_eq!(manager.get("C").unwrap().num_chunks(), 4);
    }

    #[test]
    fn test_add_copy_is_deep() {
        let manager = DataManager::new();
        let data = grid_2x2_data("orig");
        manager.add_copy(&data).unwrap();
        let _ = data.remove_chunk(&[0, 0]).unwrap();
        assert_eq!(manager.get("orig").unwrap().num_chunks(), 4);
        assert_eq!(data.num_chunks(), 3);
    }

    #[test]
    fn test_cascading_lock_reaches_chunks() {
        let manager = Arc::new(DataManager::new());
        manager.add(grid_2x2_data("A")).unwrap();
        manager.add(grid_2x2_data("B")).unwrap();
        manager.lock();
        let other = manager.clone();
        // another thread cannot touch any chunk until the cascade is released
        let waiter = thread::spawn(move || {
            let data = other.get("A").unwrap();
            let chunk = data.get_chunk(&[2, 2]).unwrap();
            let _guard = chunk.lock_scope();
        });
        manager.add(grid_2x2_data("C")).unwrap();
        let _ = manager.remove("B").unwrap();
        manager.unlock().unwrap();
        waiter.join().unwrap();
        assert_eq!(manager.names(), vec!["A".to_owned(), "C".to_owned()]);
        assert!(manager.unlock().is_err());
    }

    #[test]
    fn test_tag_manager() {
        let tags = DataTagManager::new();
        let tag = DataTag::new("T");
        tag.add_chunk_tag(ChunkTag::new(vec![0], vec![8])).unwrap();
        tags.add(tag).unwrap();
        assert_eq!(tags.get("T").unwrap().num_chunk_tags(), 1);
        let mut seen = Vec::new();
        tags.drain(|t| seen.push(t.name().to_owned())).unwrap();
        assert_eq!(seen, vec!["T".to_owned()]);
        assert!(tags.is_empty());
    }
}
