//! Tar packing of a file or directory tree, optionally gzip-compressed.
//!
//! `pack` walks the source in sorted order so identical trees produce
//! identical streams. Only regular files and directories are archived;
//! symlinks and special files are skipped. The source directory itself is
//! not an entry, and a single-file source becomes one entry named after
//! the file.
//!
//! `unpack` refuses any entry that is not a regular file or directory, or
//! whose path would land outside the destination.

use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType, HeaderMode};
use tracing::{debug, warn};

use crate::errors::{AetherVaultError, Result};

/// The two leading bytes of every gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Pack `source` into a tar stream, gzip-wrapped when `compress` is set.
pub fn pack(source: &Path, compress: bool) -> Result<Vec<u8>> {
    let meta = fs::metadata(source)
        .map_err(|_| AetherVaultError::SourceNotFound(source.to_path_buf()))?;

    if compress {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = new_builder(encoder);
        append_source(&mut builder, source, meta.is_dir())?;
        Ok(builder.into_inner()?.finish()?)
    } else {
        let mut builder = new_builder(Vec::new());
        append_source(&mut builder, source, meta.is_dir())?;
        Ok(builder.into_inner()?)
    }
}

fn new_builder<W: Write>(inner: W) -> Builder<W> {
    let mut builder = Builder::new(inner);
    builder.mode(HeaderMode::Complete);
    builder.follow_symlinks(false);
    builder
}

fn append_source<W: Write>(builder: &mut Builder<W>, source: &Path, is_dir: bool) -> Result<()> {
    if is_dir {
        return append_dir_contents(builder, source, Path::new(""));
    }

    let name = source.file_name().ok_or_else(|| {
        AetherVaultError::InvalidInput(format!("source has no file name: {}", source.display()))
    })?;
    builder.append_path_with_name(source, name)?;
    Ok(())
}

/// Recursively append the children of `dir`, naming them under `prefix`.
fn append_dir_contents<W: Write>(builder: &mut Builder<W>, dir: &Path, prefix: &Path) -> Result<()> {
    let mut children: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let path = child.path();
        let name = prefix.join(child.file_name());
        let file_type = fs::symlink_metadata(&path)?.file_type();

        if file_type.is_dir() {
            builder.append_dir(&name, &path)?;
            append_dir_contents(builder, &path, &name)?;
        } else if file_type.is_file() {
            builder.append_path_with_name(&path, &name)?;
        } else {
            warn!(path = %path.display(), "skipping non-regular file while packing");
        }
    }
    Ok(())
}

/// Whether `bytes` begins with the gzip magic.
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Counts of what `unpack` wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackStats {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Extract a stream produced by `pack` into `destination`.
///
/// Compression is detected from the stream itself. Intermediate
/// directories are created and modes from the headers are applied, with
/// directory modes set only after every file has been written.
pub fn unpack(stream: &[u8], destination: &Path) -> Result<UnpackStats> {
    let reader: Box<dyn Read + '_> = if is_gzip(stream) {
        Box::new(GzDecoder::new(stream))
    } else {
        Box::new(stream)
    };

    fs::create_dir_all(destination)?;

    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut stats = UnpackStats::default();
    let mut dir_modes = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        let path = entry.path()?.into_owned();

        if matches!(entry_type, EntryType::XGlobalHeader | EntryType::XHeader) {
            continue;
        }
        if !entry_type.is_file() && !entry_type.is_dir() {
            return Err(AetherVaultError::InvalidFormat(format!(
                "archive entry '{}' has unsupported type {entry_type:?}",
                path.display()
            )));
        }
        ensure_contained(&path)?;

        if entry_type.is_dir() {
            // Created writable; the recorded mode lands once children exist.
            let target = destination.join(&path);
            fs::create_dir_all(&target)?;
            dir_modes.push((target, entry.header().mode()?));
            stats.directories += 1;
            continue;
        }

        if !entry.unpack_in(destination)? {
            return Err(AetherVaultError::InvalidFormat(format!(
                "archive entry '{}' escapes the destination",
                path.display()
            )));
        }
        stats.files += 1;
        stats.bytes += entry.header().size()?;
    }

    apply_dir_modes(dir_modes)?;

    debug!(
        files = stats.files,
        directories = stats.directories,
        bytes = stats.bytes,
        "archive unpacked"
    );
    Ok(stats)
}

/// Apply directory modes deepest first, so a read-only parent is never
/// locked before its subdirectories are finished.
fn apply_dir_modes(mut dirs: Vec<(PathBuf, u32)>) -> Result<()> {
    dirs.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));

    #[cfg(unix)]
    for (path, mode) in dirs {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(mode & 0o7777))?;
    }
    #[cfg(not(unix))]
    drop(dirs);

    Ok(())
}

/// Reject absolute paths and any `..` component.
fn ensure_contained(path: &Path) -> Result<()> {
    let ok = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok && path.components().next().is_some() {
        Ok(())
    } else {
        Err(AetherVaultError::InvalidFormat(format!(
            "archive entry path '{}' is not relative to the destination",
            path.display()
        )))
    }
}
