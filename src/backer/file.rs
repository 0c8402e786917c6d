//! Filesystem backer
//!
//! Each room is a file named after the room inside one folder. Every
//! operation runs under a single lock, so at most one filesystem operation
//! is in flight at a time.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{Backer, Backing};

/// Backer storing one file per room
pub struct FileBacker {
    folder: PathBuf,
    lock: Mutex<()>,
}

impl FileBacker {
    /// Open a backer rooted at `folder`, creating it if needed
    pub async fn open(folder: impl AsRef<Path>) -> io::Result<Self> {
        let folder = folder.as_ref().to_path_buf();
        fs::create_dir_all(&folder).await?;

        tracing::debug!(folder = %folder.display(), "File backer opened");

        Ok(Self {
            folder,
            lock: Mutex::new(()),
        })
    }

    /// Folder holding the room files
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Path of the file for `name`
    ///
    /// Names that could resolve outside the folder are rejected.
    fn path(&self, name: &str) -> io::Result<PathBuf> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0']);
        if invalid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("room name '{}' cannot be used as a file name", name),
            ));
        }
        Ok(self.folder.join(name))
    }
}

#[async_trait]
impl Backer for FileBacker {
    async fn write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        let path = self.path(name)?;
        let _guard = self.lock.lock().await;

        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn read(&self, name: &str, capacity: usize) -> io::Result<Backing> {
        let path = self.path(name)?;
        let _guard = self.lock.lock().await;

        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Backing::fresh(capacity)),
            Err(e) => return Err(e),
        };

        let size = file.metadata().await?.len() as usize;
        let mut data = Vec::with_capacity(capacity.max(size));
        file.read_to_end(&mut data).await?;

        Ok(Backing {
            data,
            existed: true,
        })
    }

    async fn for_each_backing(
        &self,
        visit: &mut (dyn for<'n, 's> FnMut(&'n str, &'s dyn Fn() -> io::Result<usize>) -> bool + Send),
    ) -> io::Result<()> {
        let _guard = self.lock.lock().await;

        let mut dir = fs::read_dir(&self.folder).await?;
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };

            let length = metadata.len() as usize;
            if !visit(&name, &move || Ok(length)) {
                break;
            }
        }
        Ok(())
    }
}
