use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// Filesystem primitives a relocation is built from.
///
/// The executor only reaches the disk through this trait so that every step can
/// be made to fail on demand.
pub trait TransactionFs: Send + Sync {
    /// Moves the directory tree (or single file) `from` to `to`. `to` must not exist.
    fn move_dir(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Replaces `path` with `contents` so readers see either the old or the new file.
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl TransactionFs for LocalFs {
    fn move_dir(&self, from: &Path, to: &Path) -> io::Result<()> {
        move_dir_or_copy(from, to)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::copy(from, to)?;
        fs::OpenOptions::new().write(true).open(to)?.sync_all()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let part_path = part_path_for(path);
        let result = (|| -> io::Result<()> {
            let mut file = fs::File::create(&part_path)?;
            file.write_all(contents)?;
            file.sync_all()?;
            fs::rename(&part_path, path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&part_path);
        }
        result
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// `<path>.egmove-part`, where a file is written before it is renamed into place.
pub fn part_path_for(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".egmove-part")
}

/// `<path>.bak`, the backup convention for launcher documents.
pub fn backup_path_for(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".bak")
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn move_dir_or_copy(src: &Path, dst: &Path) -> io::Result<()> {
    if fs::symlink_metadata(dst).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("move target already exists: {}", dst.display()),
        ));
    }

    let rename_err = match fs::rename(src, dst) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    if !is_cross_device(&rename_err) {
        return Err(rename_err);
    }

    if fs::symlink_metadata(src)?.is_file() {
        info!(
            from = %src.display(),
            to = %dst.display(),
            "destination is on another volume; copying file"
        );
        if let Err(err) = fs::copy(src, dst) {
            let _ = fs::remove_file(dst);
            return Err(err);
        }
        return fs::remove_file(src);
    }

    info!(
        from = %src.display(),
        to = %dst.display(),
        "destination is on another volume; copying tree"
    );
    if let Err(err) = copy_dir_recursive(src, dst) {
        if let Err(cleanup_err) = fs::remove_dir_all(dst) {
            warn!(
                path = %dst.display(),
                error = %cleanup_err,
                "failed to remove partial copy"
            );
        }
        return Err(err);
    }

    // The payload is complete at `dst`; leftovers at `src` no longer hold the install.
    if let Err(err) = fs::remove_dir_all(src) {
        warn!(
            path = %src.display(),
            error = %err,
            "copied tree but could not fully remove the original"
        );
    }
    Ok(())
}

fn is_cross_device(err: &io::Error) -> bool {
    // EXDEV on unix, ERROR_NOT_SAME_DEVICE on Windows.
    let code = if cfg!(windows) { 17 } else { 18 };
    err.raw_os_error() == Some(code)
}

pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let metadata = fs::symlink_metadata(&src_path)?;
        if metadata.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
            continue;
        }

        #[cfg(unix)]
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&src_path)?;
            std::os::unix::fs::symlink(&target, &dst_path)?;
            continue;
        }

        fs::copy(&src_path, &dst_path)?;
    }
    Ok(())
}
