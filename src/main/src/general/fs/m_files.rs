use super::shared_file::SharedFile;
use crate::{
    general::registry::Registry,
    result::{RegResult, RegResultExt},
    util::container::{Entry, HierLock},
};

/// Session registry of open shared files. Files are only moved in, never
/// copied, and are closed before they leave the registry.
#[derive(Default)]
pub struct Files {
    files: Registry<SharedFile>,
}

impl Files {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, file: SharedFile) -> RegResult<()> {
        self.files.add(file)
    }

    /// Closes the file, then unregisters it.
    pub fn remove(&self, name: &str) -> RegResult<SharedFile> {
        self.files.get(name)?.close()?;
        self.files.remove(name)
    }

    pub fn get(&self, name: &str) -> RegResult<Entry<'_, SharedFile>> {
        self.files.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.files.names()
    }

    /// Closes and drops every file. Must run before the transport group the
    /// files were opened on is finalized.
    pub fn finalize(&self) -> RegResult<()> {
        let mut first_err = None;
        self.files.drain(|file| {
            if let Err(err) = file.close() {
                tracing::warn!("closing {} at finalize failed: {:?}", file.path().display(), err);
                let _ = first_err.get_or_insert(err);
            }
        })?;
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl HierLock for Files {
    fn lock(&self) {
        self.files.lock();
    }

    fn unlock(&self) -> RegResult<()> {
        self.files.unlock()
    }
}

impl Drop for Files {
    fn drop(&mut self) {
        if !self.files.is_empty() {
            self.finalize().todo_handle();
        }
    }
}
