use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static STAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Replaces `path` with `content` so readers observe either the old bytes or the new ones.
///
/// Missing parent directories are created. The bytes are staged in a sibling file, flushed,
/// then renamed over the target; the staged file is removed whenever the write does not land.
pub fn atomic_write_file(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        Some(_) => Path::new("."),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{}` has no parent directory", path.display()),
            ))
        }
    };
    fs::create_dir_all(dir)?;

    let mut staged = StagedFile::create(dir, path)?;
    staged.file.write_all(content)?;
    staged.file.sync_all()?;
    staged.commit(path)?;
    sync_dir(dir)
}

/// A sibling temp file that deletes itself unless `commit` renamed it into place.
struct StagedFile {
    path: PathBuf,
    file: File,
    committed: bool,
}

impl StagedFile {
    fn create(dir: &Path, target: &Path) -> io::Result<Self> {
        let stem = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "write".to_string());
        let path = dir.join(format!(
            ".{stem}.tmp-{}-{}",
            std::process::id(),
            STAGE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        Ok(Self {
            path,
            file,
            committed: false,
        })
    }

    fn commit(&mut self, target: &Path) -> io::Result<()> {
        fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
