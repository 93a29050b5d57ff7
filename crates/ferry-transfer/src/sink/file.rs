//! Filesystem sink.
//!
//! Each transfer lands in `{root}/{sanitized identity}__{unix nanos}`.
//! Bytes go to a uniquely named `.tmp` sibling first; commit syncs and
//! moves it into place without replacing anything, abort removes it, so a
//! partial transfer never appears under its final name.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use ferry_core::wire::unix_nanos;

use super::{DurableSink, SinkError, SinkHandle};

#[derive(Clone)]
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(SinkError::io("create", &root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open_named(&self, name: &str) -> Result<FileHandle, SinkError> {
        let file = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(SinkError::io("create", &self.root))?;
        Ok(FileHandle { file: BufWriter::new(file), path: self.root.join(name) })
    }
}

impl DurableSink for FileSink {
    fn open(&self, identity: &str) -> Result<Box<dyn SinkHandle>, SinkError> {
        let name = format!("{}__{}", sanitize(identity), unix_nanos());
        Ok(Box::new(self.open_named(&name)?))
    }
}

struct FileHandle {
    file: BufWriter<NamedTempFile>,
    path: PathBuf,
}

impl FileHandle {
    fn commit(self) -> Result<(), SinkError> {
        let FileHandle { file, path } = self;
        let mut tmp = file.into_inner().map_err(|e| {
            let (error, writer) = e.into_parts();
            SinkError::io("flush", writer.get_ref().path())(error)
        })?;
        tmp.as_file().sync_all().map_err(SinkError::io("sync", tmp.path()))?;

        // Same name in the same clock tick: suffix instead of overwriting.
        let mut dest = path.clone();
        let mut attempt = 0u32;
        loop {
            match tmp.persist_noclobber(&dest) {
                Ok(_) => break,
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    tmp = e.file;
                    attempt += 1;
                    dest = numbered(&path, attempt);
                }
                Err(e) => return Err(SinkError::io("rename", e.file.path())(e.error)),
            }
        }
        tracing::debug!(path = %dest.display(), "transfer stored");
        Ok(())
    }
}

impl SinkHandle for FileHandle {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.file
            .write_all(data)
            .map_err(|e| SinkError::io("write", self.file.get_ref().path())(e))
    }

    fn close(self: Box<Self>, committed: bool) -> Result<(), SinkError> {
        if committed {
            return self.commit();
        }
        let FileHandle { file, .. } = *self;
        let (tmp, _) = file.into_parts();
        let tmp_path = tmp.path().to_path_buf();
        tmp.close().map_err(SinkError::io("remove", &tmp_path))
    }
}

fn numbered(path: &Path, n: u32) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Reduce an identity to one safe path component.
fn sanitize(identity: &str) -> String {
    let cleaned: String = identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}
