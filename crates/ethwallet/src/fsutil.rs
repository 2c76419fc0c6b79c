use crate::key::fill_random;
use eyre::Context as _;
use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

pub const MODE_DIR_PRIVATE: u32 = 0o700;
pub const MODE_FILE_PRIVATE: u32 = 0o600;

fn is_symlink(p: &Path) -> eyre::Result<bool> {
    let md = fs::symlink_metadata(p).with_context(|| format!("stat {}", p.display()))?;
    Ok(md.file_type().is_symlink())
}

pub fn ensure_private_dir(dir: &Path) -> eyre::Result<()> {
    if dir.exists() {
        if is_symlink(dir)? {
            eyre::bail!("refusing to use symlinked directory: {}", dir.display());
        }
        let md = fs::metadata(dir).with_context(|| format!("stat {}", dir.display()))?;
        if !md.is_dir() {
            eyre::bail!("expected directory at {}", dir.display());
        }
    } else {
        fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    }

    // Best-effort: enforce private perms on Unix.
    #[cfg(unix)]
    {
        let md = fs::metadata(dir).with_context(|| format!("stat {}", dir.display()))?;
        let mut mode = md.permissions().mode();
        if (mode & 0o077) != 0 {
            mode = MODE_DIR_PRIVATE;
            fs::set_permissions(dir, fs::Permissions::from_mode(mode))
                .with_context(|| format!("chmod {:o} {}", mode, dir.display()))?;
        }
    }

    Ok(())
}

fn tmp_path_for(parent: &Path, final_name: &Path) -> PathBuf {
    let base = final_name
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let mut rand_bytes = [0_u8; 8];
    fill_random(&mut rand_bytes);
    let suffix = hex::encode(rand_bytes);
    parent.join(format!(".{base}.tmp.{suffix}"))
}

fn parent_of(path: &Path) -> eyre::Result<&Path> {
    path.parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))
}

/// Write `bytes` to a fresh private temp file next to `path` and fsync it.
fn write_private_temp(path: &Path, bytes: &[u8], mode: u32) -> eyre::Result<PathBuf> {
    let parent = parent_of(path)?;
    ensure_private_dir(parent)?;

    if path.exists() && is_symlink(path)? {
        eyre::bail!("refusing to write to symlink: {}", path.display());
    }

    let tmp = tmp_path_for(parent, path);
    let mut oo = OpenOptions::new();
    oo.create_new(true).write(true);
    #[cfg(unix)]
    {
        oo.mode(mode);
    }
    #[cfg(not(unix))]
    {
        let _unused_mode = mode;
    }
    let mut f = oo
        .open(&tmp)
        .with_context(|| format!("open temp {}", tmp.display()))?;

    let written = f
        .write_all(bytes)
        .and_then(|()| f.flush())
        .and_then(|()| f.sync_all());
    drop(f);
    if let Err(e) = written {
        drop(fs::remove_file(&tmp));
        return Err(eyre::Report::new(e).wrap_err(format!("write {}", tmp.display())));
    }
    Ok(tmp)
}

fn rename_into_place(tmp: &Path, path: &Path) -> eyre::Result<()> {
    // `rename` is atomic on Unix. On Windows, this can fail if the destination exists.
    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path).with_context(|| format!("remove existing {}", path.display()))?;
        }
    }
    fs::rename(tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))
}

pub fn write_atomic_restrictive(path: &Path, bytes: &[u8], mode: u32) -> eyre::Result<()> {
    let tmp = write_private_temp(path, bytes, mode)?;
    if let Err(e) = rename_into_place(&tmp, path) {
        drop(fs::remove_file(&tmp));
        return Err(e);
    }
    Ok(())
}

pub fn write_string_atomic_restrictive(path: &Path, s: &str, mode: u32) -> eyre::Result<()> {
    write_atomic_restrictive(path, s.as_bytes(), mode)
}

/// A group of files that become visible together or not at all.
///
/// Every file is first written to a private temp file; [`StagedWrite::commit`] then renames
/// them into place in staging order. If any rename fails, files already renamed by this
/// commit are removed again. Uncommitted temp files are deleted on drop.
#[derive(Debug, Default)]
pub struct StagedWrite {
    staged: Vec<(PathBuf, PathBuf)>,
}

impl StagedWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, path: &Path, bytes: &[u8]) -> eyre::Result<()> {
        let tmp = write_private_temp(path, bytes, MODE_FILE_PRIVATE)?;
        self.staged.push((tmp, path.to_path_buf()));
        Ok(())
    }

    pub fn commit(mut self) -> eyre::Result<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut placed: Vec<&Path> = Vec::with_capacity(staged.len());
        for (tmp, path) in &staged {
            if let Err(e) = rename_into_place(tmp, path) {
                for p in placed {
                    drop(fs::remove_file(p));
                }
                for (t, _) in &staged {
                    drop(fs::remove_file(t));
                }
                return Err(e.wrap_err("commit staged files"));
            }
            placed.push(path);
        }
        if let Some((_, last)) = staged.last() {
            sync_dir(parent_of(last)?);
        }
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        for (tmp, _) in &self.staged {
            drop(fs::remove_file(tmp));
        }
    }
}

/// Best-effort fsync of a directory so renames survive a crash.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(d) = fs::File::open(dir) {
            drop(d.sync_all());
        }
    }
    #[cfg(not(unix))]
    {
        let _unused_dir = dir;
    }
}
