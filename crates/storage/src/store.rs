//! Sharded on-disk store for fetched artifacts.
//!
//! Artifacts live under `<root>/<first alias char>/<alias>_<suffix>.xml`. The
//! first character of an alias is effectively random (see [`alias`](crate::alias)),
//! which keeps any one directory from growing to hundreds of thousands of
//! entries.

use crate::alias;
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use derive_more::Display;
use exn::ResultExt;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::instrument;

/// Which of an object's two artifacts is being stored or fetched.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// The remote service's metadata document about the object.
    #[display("descriptor")]
    Descriptor,
    /// The object's payload.
    #[display("content")]
    Content,
}
impl ArtifactKind {
    /// File name suffix used on disk.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Descriptor => "sysm",
            Self::Content => "content",
        }
    }
}

/// Local directory tree holding descriptor and content artifacts.
///
/// Cheap to clone; every fetch worker gets its own copy.
///
/// # Examples
///
/// ```no_run
/// use ocache_storage::{ArtifactKind, ContentStore};
///
/// # async fn example() -> ocache_storage::error::Result<()> {
/// let store = ContentStore::new("/home/me/.dataone/content")?;
/// let body = std::io::Cursor::new(b"<systemMetadata/>".to_vec());
/// let relative = store.write("n242n", ArtifactKind::Descriptor, body).await?;
/// assert_eq!(relative, std::path::Path::new("n/n242n_sysm.xml"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}
impl ContentStore {
    /// Open (or create) a content store rooted at an absolute path.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Only happens once when the cache is opened; not worth an async
            // constructor.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store-relative path of an artifact. This is what gets recorded in the
    /// cache index.
    pub fn relative_path(alias: &str, kind: ArtifactKind) -> Result<PathBuf> {
        // Decoding proves the alias only contains alphabet characters, so it
        // is safe to use as both a directory and a file name.
        alias::decode(alias)?;
        let Some(shard) = alias::shard(alias) else {
            exn::bail!(ErrorKind::InvalidAlias(alias.to_string()));
        };
        Ok(PathBuf::from(shard.to_string()).join(format!("{alias}_{}.xml", kind.suffix())))
    }

    /// Absolute path of an artifact, creating its shard directory if needed.
    ///
    /// Safe to call concurrently for the same shard from many workers.
    pub async fn path_for(&self, alias: &str, kind: ArtifactKind) -> Result<PathBuf> {
        let path = self.root.join(Self::relative_path(alias, kind)?);
        if let Some(parent) = path.parent() {
            // `create_dir_all` treats "already exists" as success, including
            // when another task wins the race.
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, parent))?;
        }
        Ok(path)
    }

    /// Absolute path for a store-relative path read back from the index.
    pub fn absolute_path(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(relative)?))
    }

    /// Stream an artifact to disk, replacing any previous copy.
    ///
    /// Bytes go to a temporary file in the shard directory which is synced and
    /// then renamed over the target, so the target path only ever holds a
    /// complete artifact. If anything fails the temporary file is removed and
    /// the error is [`StoreWriteFailed`](ErrorKind::StoreWriteFailed).
    ///
    /// Returns the store-relative path.
    #[instrument(level = "debug", skip(self, reader))]
    pub async fn write<R>(&self, alias: &str, kind: ArtifactKind, mut reader: R) -> Result<PathBuf>
    where
        R: AsyncRead + Unpin + Send,
    {
        let relative = Self::relative_path(alias, kind)?;
        let target = self.path_for(alias, kind).await?;
        let failed = || ErrorKind::StoreWriteFailed(target.clone());
        let directory = target.parent().unwrap_or(&self.root);
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{alias}_{}", kind.suffix()))
            .suffix(".part")
            .tempfile_in(directory)
            .or_raise(failed)?;
        // The TempPath half deletes the file when dropped, which covers every
        // early return below.
        let (file, temp_path) = temp.into_parts();
        let mut file = fs::File::from_std(file);
        let bytes = tokio::io::copy(&mut reader, &mut file).await.or_raise(failed)?;
        file.flush().await.or_raise(failed)?;
        file.sync_all().await.or_raise(failed)?;
        drop(file);
        temp_path.persist(&target).or_raise(failed)?;
        tracing::debug!(path = %relative.display(), bytes, "Artifact stored");
        Ok(relative)
    }

    /// Check whether an artifact exists at a store-relative path.
    pub async fn exists(&self, relative: impl AsRef<Path>) -> Result<bool> {
        let path = self.absolute_path(relative)?;
        Ok(fs::try_exists(&path).await.map_err(ErrorKind::Io)?)
    }

    /// Read a stored artifact as text.
    pub async fn read_to_string(&self, relative: impl AsRef<Path>) -> Result<String> {
        let path = self.absolute_path(relative.as_ref())?;
        Ok(fs::read_to_string(&path).await.map_err(|e| Self::map_io_error(e, relative.as_ref()))?)
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }
}
