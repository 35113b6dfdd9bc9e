use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    config::RegistryConfig,
    general::{
        data::{Chunk, Data, DataManager, DataTagManager},
        fs::{Files, SharedFile},
        network::{ops, TaskId, Transport},
    },
    result::{RegResult, RegResultExt, RegRuntimeErr},
    util::container::HierLock,
};

/// Per-task session: transport groups plus the three managers.
///
/// Teardown order is files first, then the transport groups.
pub struct Sys {
    config: RegistryConfig,
    world: Box<dyn Transport>,
    shared: Box<dyn Transport>,
    data_manager: DataManager,
    data_tag_manager: DataTagManager,
    files: Files,
    finalized: AtomicBool,
}

impl Drop for Sys {
    fn drop(&mut self) {
        if !self.finalized.load(Ordering::Acquire) {
            self.finalize().todo_handle();
        }
        tracing::info!("drop sys of task {}", self.world.task_id());
    }
}

impl Sys {
    /// Collective over `world`: every task builds its session together.
    pub fn new(config: RegistryConfig, world: Box<dyn Transport>) -> RegResult<Sys> {
        config.validate()?;
        let shared = world.split_shared()?;
        let data_tag_manager = DataTagManager::new();
        for spec in &config.data_tags {
            data_tag_manager.add(spec.build()?)?;
        }
        if world.is_master() {
            tracing::info!(
                "session started with {} tasks, files at {:?}",
                world.num_tasks(),
                config.files_dir
            );
        }
        Ok(Sys {
            config,
            world,
            shared,
            data_manager: DataManager::new(),
            data_tag_manager,
            files: Files::new(),
            finalized: AtomicBool::new(false),
        })
    }

    /// Runs `f` on one session per task, each task on its own thread, and
    /// returns the results in task order.
    pub fn launch<F, R>(config: RegistryConfig, f: F) -> RegResult<Vec<R>>
    where
        F: Fn(&Sys) -> RegResult<R> + Send + Sync + 'static,
        R: Send + 'static,
    {
        config.validate()?;
        let f = std::sync::Arc::new(f);
        let handles: Vec<_> = config
            .build_world()
            .into_iter()
            .map(|world| -> RegResult<_> {
                let (config, f) = (config.clone(), f.clone());
                let task = world.task_id();
                let handle = std::thread::Builder::new()
                    .name(format!("task-{}", task))
                    .spawn(move || {
                        let sys = Sys::new(config, world)?;
                        let res = f(&sys);
                        sys.finalize()?;
                        res
                    })?;
                Ok((task, handle))
            })
            .collect::<RegResult<_>>()?;
        handles
            .into_iter()
            .map(|(task, handle)| -> RegResult<R> {
                handle.join().map_err(|_| RegRuntimeErr::ThreadPanicked {
                    context: format!("task {}", task),
                })?
            })
            .collect()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn world(&self) -> &dyn Transport {
        self.world.as_ref()
    }

    pub fn shared(&self) -> &dyn Transport {
        self.shared.as_ref()
    }

    pub fn task_id(&self) -> TaskId {
        self.world.task_id()
    }

    pub fn is_master(&self) -> bool {
        self.world.is_master()
    }

    pub fn data_manager(&self) -> &DataManager {
        &self.data_manager
    }

    pub fn data_tag_manager(&self) -> &DataTagManager {
        &self.data_tag_manager
    }

    pub fn files(&self) -> &Files {
        &self.files
    }

    /// Registers an empty data sized with the configured chunk capacity.
    pub fn create_data(&self, name: &str) -> RegResult<()> {
        self.data_manager
            .add(Data::with_capacity(name, self.config.default_chunk_capacity))
    }

    /// Registers a data with one unallocated chunk per chunk tag of the data
    /// tag `tag_name`.
    pub fn create_data_from_tag(&self, name: &str, tag_name: &str) -> RegResult<()> {
        let data = {
            let tag = self.data_tag_manager.get(tag_name)?;
            let data = Data::with_capacity(name, tag.num_chunk_tags()).with_lengths(tag.lengths());
            let mut chunks = Vec::with_capacity(tag.num_chunk_tags());
            tag.for_each_chunk_tag(|_, chunk_tag| chunks.push(Chunk::new(chunk_tag.clone())))?;
            for chunk in chunks {
                data.add_chunk(chunk)?;
            }
            data
        };
        self.data_manager.add(data)
    }

    /// Collectively opens `<files_dir>/<name>` on the world group and registers it.
    pub fn open_file(&self, name: &str, mode: &str) -> RegResult<()> {
        let file = SharedFile::with_name(name, self.config.file_path(name));
        file.open(self.world(), mode)?;
        self.files.add(file)
    }

    /// Locks every manager, parent first.
    pub fn lock_all(&self) {
        self.data_manager.lock();
        self.data_tag_manager.lock();
        self.files.lock();
    }

    pub fn unlock_all(&self) -> RegResult<()> {
        let files = self.files.unlock();
        let tags = self.data_tag_manager.unlock();
        let data = self.data_manager.unlock();
        files.and(tags).and(data)
    }

    /// Closes every file, then releases the transport groups. Calling it
    /// again does nothing.
    pub fn finalize(&self) -> RegResult<()> {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let files = self.files.finalize();
        let shared = self.shared.finalize();
        let world = self.world.finalize();
        files.and(shared).and(world)
    }

    /// Meets every task at a barrier, lets the master report `stat` and
    /// `message`, then finalizes.
    pub fn finalize_with(&self, stat: i32, message: &str) -> RegResult<()> {
        ops::barrier(self.world())?;
        if self.is_master() {
            tracing::info!("{}, exiting with status {}", message, stat);
        }
        self.finalize()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TransportConfig,
        general::{data::ChunkTag, data::DataTag, data::DataTagSpec},
        result::ErrorKind,
        util::test_tracing_start,
    };

    fn tagged_config(files_dir: &std::path::Path, tasks: usize) -> RegistryConfig {
        RegistryConfig {
            files_dir: files_dir.to_owned(),
            transport: TransportConfig::Fabric { tasks },
            default_chunk_capacity: 8,
            data_tags: vec![DataTagSpec {
                name: "grid".to_owned(),
                lengths: vec![4, 4],
                chunks: crate::general::test_utils::GRID_2X2
                    .iter()
                    .map(|o| ChunkTag::new(o.to_vec(), vec![2, 2]))
                    .collect(),
            }],
        }
    }

    #[test]
    fn test_solo_session() {
        test_tracing_start();
        let dir = tempfile::tempdir().unwrap();
        let sys = Sys::new(
            RegistryConfig {
                files_dir: dir.path().to_owned(),
                ..Default::default()
            },
            Box::new(crate::general::network::SoloComm::new()),
        )
        .unwrap();
        assert!(sys.is_master());
        assert_eq!(sys.shared().num_tasks(), 1);

        sys.create_data("A").unwrap();
        assert_eq!(sys.create_data("A").unwrap_err().kind(), ErrorKind::DuplicateKey);
        assert_eq!(sys.data_manager().get("B").unwrap_err().kind(), ErrorKind::NotFound);

        sys.data_tag_manager().add(DataTag::new("t")).unwrap();
        sys.create_data_from_tag("from_t", "t").unwrap();

        sys.open_file("out.bin", "w+").unwrap();
        sys.files().get("out.bin").unwrap().write(b"xyz").unwrap();

        sys.lock_all();
        sys.create_data("locked").unwrap();
        sys.unlock_all().unwrap();

        sys.finalize_with(0, "solo done").unwrap();
        assert!(sys.files().is_empty());
        assert!(sys.world().is_finalized());
        assert_eq!(sys.world().barrier().unwrap_err().kind(), ErrorKind::InvalidHandle);
        sys.finalize().unwrap();
        assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap(), b"xyz");
    }

    #[test]
    fn test_launch_fabric_session() {
        test_tracing_start();
        let dir = tempfile::tempdir().unwrap();
        let results = Sys::launch(tagged_config(dir.path(), 3), |sys| {
            assert_eq!(sys.world().num_tasks(), 3);
            assert_eq!(sys.data_tag_manager().get("grid")?.num_chunk_tags(), 4);

            sys.create_data_from_tag("field", "grid")?;
            let owned = {
                let data = sys.data_manager().get("field")?;
                assert_eq!(data.size(), 16);
                let chunk = data.get_chunk(&[2, 2])?;
                chunk.allocate(4)?;
                chunk.write_bytes(0, &[sys.task_id() as u8; 4])?;
                data.num_chunks()
            };

            sys.open_file("field.bin", "w")?;
            {
                let data = sys.data_manager().get("field")?;
                let chunk = data.get_chunk(&[2, 2])?;
                let bytes = chunk.read_bytes(0, 4)?;
                sys.files()
                    .get("field.bin")?
                    .write_at_all(sys.task_id() as u64 * 4, &bytes)?;
            }
            sys.finalize_with(0, "fabric done")?;
            Ok(owned)
        })
        .unwrap();
        assert_eq!(results, vec![4, 4, 4]);
        assert_eq!(
            std::fs::read(dir.path().join("field.bin")).unwrap(),
            vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]
        );
    }

    #[test]
    fn test_launch_reports_task_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = Sys::launch(tagged_config(dir.path(), 2), |sys| {
            sys.data_manager().get("missing").map(|_| ())
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let bad = RegistryConfig {
            transport: TransportConfig::Fabric { tasks: 0 },
            ..Default::default()
        };
        assert_eq!(Sys::launch(bad, |_| Ok(())).unwrap_err().kind(), ErrorKind::Config);
    }
}
