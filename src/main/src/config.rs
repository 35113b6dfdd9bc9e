use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    general::{
        data::DataTagSpec,
        network::{Fabric, SoloComm, Transport},
    },
    result::{RegConfigErr, RegResult},
};

/// File name looked up by [`read_config`] under `<dir>/files/`.
pub const CONFIG_FILE_NAME: &str = "registry_config.yaml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// One task, no peers.
    #[default]
    Solo,
    /// `tasks` tasks inside this process, one thread each.
    Fabric { tasks: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base directory for shared files.
    #[serde(default = "default_files_dir")]
    pub files_dir: PathBuf,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Initial map capacity of data created through the session.
    #[serde(default)]
    pub default_chunk_capacity: usize,
    /// Data tags registered when a session starts.
    #[serde(default)]
    pub data_tags: Vec<DataTagSpec>,
}

fn default_files_dir() -> PathBuf {
    PathBuf::from("files")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            files_dir: default_files_dir(),
            transport: TransportConfig::default(),
            default_chunk_capacity: 0,
            data_tags: Vec::new(),
        }
    }
}

impl RegistryConfig {
    pub fn num_tasks(&self) -> usize {
        match self.transport {
            TransportConfig::Solo => 1,
            TransportConfig::Fabric { tasks } => tasks,
        }
    }

    pub fn validate(&self) -> RegResult<()> {
        if self.num_tasks() == 0 {
            return Err(RegConfigErr::Invalid {
                reason: "fabric transport needs at least one task".to_owned(),
            }
            .into());
        }
        let mut names: Vec<&str> = self.data_tags.iter().map(|t| t.name.as_str()).collect();
        names.sort();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(RegConfigErr::Invalid {
                reason: format!("data tag {} declared twice", dup[0]),
            }
            .into());
        }
        Ok(())
    }

    /// World handles, one per task.
    pub fn build_world(&self) -> Vec<Box<dyn Transport>> {
        match self.transport {
            TransportConfig::Solo => vec![Box::new(SoloComm::new())],
            TransportConfig::Fabric { tasks } => Fabric::world(tasks)
                .into_iter()
                .map(|comm| Box::new(comm) as Box<dyn Transport>)
                .collect(),
        }
    }

    /// Path of a shared file named `name` under `files_dir`.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.files_dir.join(name)
    }
}

fn read_yaml_config(file_path: impl AsRef<Path>) -> RegResult<RegistryConfig> {
    let path = file_path.as_ref().to_owned();
    let file = std::fs::File::open(&path).map_err(|err| RegConfigErr::Open {
        path: path.clone(),
        err,
    })?;
    Ok(serde_yaml::from_reader(file)?)
}

/// Reads `<dir>/files/registry_config.yaml`. A relative `files_dir` is
/// resolved against `dir`.
pub fn read_config(dir: impl AsRef<Path>) -> RegResult<RegistryConfig> {
    let config_path = dir.as_ref().join("files").join(CONFIG_FILE_NAME);
    tracing::info!("reading config {:?}", config_path);
    let mut config = read_yaml_config(config_path)?;
    if config.files_dir.is_relative() {
        config.files_dir = dir.as_ref().join(&config.files_dir);
    }
    config.validate()?;
    Ok(config)
}
