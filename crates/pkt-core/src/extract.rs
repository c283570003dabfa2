//! Archive extraction module
//!
//! Unpacks package artifacts (zstd tar, also gzip and plain tar) into a
//! destination tree without ever writing outside it. Also packs a
//! directory into an artifact for package authors.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;
use zstd::stream::Decoder as ZstdDecoder;

/// Errors from packing and unpacking artifacts.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// File extension is not a known tar variant.
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// Entry would land outside the destination.
    #[error("Path escapes destination: {}", .0.display())]
    PathTraversal(PathBuf),

    /// Hardlink to an entry that was not extracted.
    #[error("Hardlink {} points at missing {}", link.display(), target.display())]
    MissingLinkTarget {
        /// The link entry.
        link: PathBuf,
        /// Where it points.
        target: PathBuf,
    },
}

/// Outer compression of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.pkt`, `.tar.zst`, `.tzst`
    TarZst,
    /// `.tar.gz`, `.tgz`
    TarGz,
    /// `.tar`
    Tar,
}

/// Information about an extracted entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntry {
    /// Path relative to extraction root
    pub relative_path: PathBuf,
    /// Absolute path on disk
    pub absolute_path: PathBuf,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// Detect archive format from file extension
///
/// # Errors
///
/// Returns [`ExtractError::UnsupportedFormat`] for anything that is not a tar
/// variant.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat, ExtractError> {
    let path_str = path.to_string_lossy().to_lowercase();

    if path_str.ends_with(".pkt") || path_str.ends_with(".tar.zst") || path_str.ends_with(".tzst")
    {
        Ok(ArchiveFormat::TarZst)
    } else if path_str.ends_with(".tar.gz") || path_str.ends_with(".tgz") {
        Ok(ArchiveFormat::TarGz)
    } else if path_str.ends_with(".tar") {
        Ok(ArchiveFormat::Tar)
    } else {
        Err(ExtractError::UnsupportedFormat(path_str))
    }
}

/// Extract an artifact file, picking the codec from its name.
///
/// # Errors
///
/// See [`extract_tar`].
pub fn extract_file(
    archive_path: &Path,
    dest_dir: &Path,
    script: &str,
) -> Result<Vec<ExtractedEntry>, ExtractError> {
    extract_tar(open_decoded(archive_path)?, dest_dir, script)
}

/// Open an artifact and wrap it in the decoder its name calls for.
///
/// # Errors
///
/// Returns [`ExtractError`] if the format is unknown or the file cannot be
/// opened.
pub fn open_decoded(archive_path: &Path) -> Result<Box<dyn Read>, ExtractError> {
    let format = detect_format(archive_path)?;
    decoder(File::open(archive_path)?, format)
}

/// Wrap a compressed stream in its decoder, yielding the inner tar stream.
///
/// # Errors
///
/// Returns [`ExtractError::Io`] if the decoder cannot be set up.
pub fn decoder<'a, R: Read + 'a>(
    reader: R,
    format: ArchiveFormat,
) -> Result<Box<dyn Read + 'a>, ExtractError> {
    let reader = BufReader::new(reader);
    Ok(match format {
        ArchiveFormat::TarZst => Box::new(ZstdDecoder::new(reader)?),
        ArchiveFormat::TarGz => Box::new(flate2::read::GzDecoder::new(reader)),
        ArchiveFormat::Tar => Box::new(reader),
    })
}

/// Extract a compressed stream.
///
/// # Errors
///
/// See [`extract_tar`].
pub fn extract_reader<R: Read>(
    reader: R,
    format: ArchiveFormat,
    dest_dir: &Path,
    script: &str,
) -> Result<Vec<ExtractedEntry>, ExtractError> {
    extract_tar(decoder(reader, format)?, dest_dir, script)
}

/// Extract an uncompressed tar stream into `dest_dir`.
///
/// Hardlinks are created in a second pass, so their targets may appear
/// anywhere in the stream. The hook script, the root-level file named
/// `script`, gets its executable bits forced on.
///
/// # Errors
///
/// Returns [`ExtractError::PathTraversal`] as soon as any entry (or a
/// symlink on its way) would land outside `dest_dir`; extraction stops
/// there. Returns [`ExtractError::MissingLinkTarget`] for hardlinks whose
/// target never appeared.
pub fn extract_tar<R: Read>(
    reader: R,
    dest_dir: &Path,
    script: &str,
) -> Result<Vec<ExtractedEntry>, ExtractError> {
    fs::create_dir_all(dest_dir)?;
    let root = dest_dir.canonicalize()?;

    let mut archive = tar::Archive::new(reader);
    let mut extracted = Vec::new();
    let mut hardlinks: Vec<(PathBuf, PathBuf)> = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_path = entry.path()?.into_owned();
        let Some(relative) = clean_relative(&raw_path)? else {
            continue;
        };
        let absolute = root.join(&relative);
        let entry_type = entry.header().entry_type();
        let mode = entry.header().mode().unwrap_or(0o644) & 0o7777;

        if entry_type.is_dir() {
            create_dirs_within(&root, &relative)?;
            fs::set_permissions(&absolute, fs::Permissions::from_mode(mode))?;
            extracted.push(ExtractedEntry {
                relative_path: relative,
                absolute_path: absolute,
                is_dir: true,
            });
            continue;
        }

        if entry_type.is_hard_link() {
            let target = entry
                .link_name()?
                .ok_or_else(|| ExtractError::PathTraversal(raw_path.clone()))?
                .into_owned();
            let target = clean_relative(&target)?
                .ok_or_else(|| ExtractError::PathTraversal(target.clone()))?;
            hardlinks.push((relative, target));
            continue;
        }

        if let Some(parent) = relative.parent() {
            create_dirs_within(&root, parent)?;
        }

        if entry_type.is_symlink() {
            let target = entry
                .link_name()?
                .ok_or_else(|| ExtractError::PathTraversal(raw_path.clone()))?
                .into_owned();
            remove_existing(&absolute)?;
            std::os::unix::fs::symlink(&target, &absolute)?;
            trace!(link = %relative.display(), target = %target.display(), "symlink");
        } else if entry_type.is_file() || entry_type == tar::EntryType::Continuous {
            // Never write through a link planted by an earlier entry.
            remove_existing(&absolute)?;
            let mut file = File::create(&absolute)?;
            io::copy(&mut entry, &mut file)?;
            fs::set_permissions(&absolute, fs::Permissions::from_mode(mode))?;
            if relative == Path::new(script) {
                fs::set_permissions(&absolute, fs::Permissions::from_mode(mode | 0o755))?;
            }
        } else {
            debug!(path = %relative.display(), ?entry_type, "skipping unsupported entry");
            continue;
        }

        extracted.push(ExtractedEntry {
            relative_path: relative,
            absolute_path: absolute,
            is_dir: false,
        });
    }

    for (link, target) in hardlinks {
        let source = root.join(&target);
        if fs::symlink_metadata(&source).is_err() {
            return Err(ExtractError::MissingLinkTarget { link, target });
        }
        if !source.canonicalize()?.starts_with(&root) {
            return Err(ExtractError::PathTraversal(target));
        }
        if let Some(parent) = link.parent() {
            create_dirs_within(&root, parent)?;
        }
        let absolute = root.join(&link);
        remove_existing(&absolute)?;
        fs::hard_link(&source, &absolute)?;
        extracted.push(ExtractedEntry {
            relative_path: link,
            absolute_path: absolute,
            is_dir: false,
        });
    }

    Ok(extracted)
}

/// Lexically clean an archive path into a relative one.
///
/// Root and `.` components are dropped; `..` pops. Returns `None` for
/// paths that clean to nothing, and an error if `..` would climb above
/// the root.
fn clean_relative(path: &Path) -> Result<Option<PathBuf>, ExtractError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(ExtractError::PathTraversal(path.to_path_buf()));
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Ok((!clean.as_os_str().is_empty()).then_some(clean))
}

/// `mkdir -p root/relative`, refusing to pass through a symlink that
/// leaves `root`.
fn create_dirs_within(root: &Path, relative: &Path) -> Result<(), ExtractError> {
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let resolved = current
                    .canonicalize()
                    .map_err(|_| ExtractError::PathTraversal(relative.to_path_buf()))?;
                if !resolved.starts_with(root) || !resolved.is_dir() {
                    return Err(ExtractError::PathTraversal(relative.to_path_buf()));
                }
            }
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ExtractError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is not a directory", current.display()),
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(&current)?,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Pack `src_dir` into a zstd tar written to `out`, preserving relative
/// paths, modes and symlinks.
///
/// # Errors
///
/// Returns [`ExtractError::Io`] on any read or write failure.
pub fn pack_dir<W: Write>(src_dir: &Path, out: W) -> Result<W, ExtractError> {
    let encoder = zstd::stream::write::Encoder::new(out, 0)?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in WalkDir::new(src_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        builder.append_path_with_name(entry.path(), relative)?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Pack `src_dir` into the artifact file `out_path`.
///
/// # Errors
///
/// Returns [`ExtractError::Io`] on any read or write failure.
pub fn pack_dir_to_file(src_dir: &Path, out_path: &Path) -> Result<(), ExtractError> {
    let file = File::create(out_path)?;
    let mut file = pack_dir(src_dir, io::BufWriter::new(file))?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkt_schema::HOOK_SCRIPT;
    use std::collections::BTreeMap;
    use tar::{EntryType, Header};
    use tempfile::tempdir;

    fn set_mode(path: &Path, mode: u32) {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    fn modes(root: &Path) -> BTreeMap<PathBuf, u32> {
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| !e.path_is_symlink())
            .map(|e| {
                let mode = e.metadata().unwrap().permissions().mode() & 0o7777;
                (e.path().strip_prefix(root).unwrap().to_path_buf(), mode)
            })
            .collect()
    }

    /// Tar with raw names, bypassing the builder's own path validation.
    fn raw_tar(entries: &[(&str, EntryType, &str, Option<&Path>)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, kind, data, link) in entries {
            let name = name.as_bytes();
            let data = data.as_bytes();
            let mut header = Header::new_gnu();
            header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
            header.set_entry_type(*kind);
            header.set_mode(0o644);
            header.set_size(data.len() as u64);
            if let Some(link) = link {
                header.set_link_name(link).unwrap();
            }
            header.set_cksum();
            builder.append(&header, data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("foo-1.0.pkt")).unwrap(), ArchiveFormat::TarZst);
        assert_eq!(detect_format(Path::new("a.TAR.GZ")).unwrap(), ArchiveFormat::TarGz);
        assert_eq!(detect_format(Path::new("a.tar")).unwrap(), ArchiveFormat::Tar);
        assert!(matches!(
            detect_format(Path::new("a.zip")),
            Err(ExtractError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_pack_extract_round_trip() {
        let src = tempdir().unwrap();
        let root = src.path();
        fs::create_dir(root.join("bin")).unwrap();
        fs::write(root.join("bin/tool"), b"#!/bin/sh\n").unwrap();
        fs::write(root.join("README"), b"hello").unwrap();
        fs::write(root.join(HOOK_SCRIPT), b"function install() end").unwrap();
        fs::create_dir(root.join("share")).unwrap();
        fs::write(root.join("share/data"), b"x").unwrap();
        std::os::unix::fs::symlink("bin/tool", root.join("tool-link")).unwrap();
        set_mode(&root.join("bin/tool"), 0o755);
        set_mode(&root.join("README"), 0o640);
        set_mode(&root.join(HOOK_SCRIPT), 0o644);
        set_mode(&root.join("share"), 0o750);

        let artifact = tempdir().unwrap();
        let path = artifact.path().join("tool-1.0.pkt");
        pack_dir_to_file(root, &path).unwrap();

        let dest = tempdir().unwrap();
        let extracted = extract_file(&path, dest.path(), HOOK_SCRIPT).unwrap();
        assert_eq!(extracted.len(), 7);

        let mut expected = modes(root);
        expected.insert(PathBuf::from(HOOK_SCRIPT), 0o755);
        assert_eq!(modes(dest.path()), expected);

        let link = fs::read_link(dest.path().join("tool-link")).unwrap();
        assert_eq!(link, PathBuf::from("bin/tool"));
        assert_eq!(fs::read(dest.path().join("README")).unwrap(), b"hello");
    }

    #[test]
    fn test_parent_dir_escape_is_rejected() {
        let outer = tempdir().unwrap();
        let dest = outer.path().join("a").join("dest");
        let tar = raw_tar(&[
            ("ok.txt", EntryType::Regular, "fine", None),
            ("../../etc/passwd", EntryType::Regular, "evil", None),
        ]);

        let err = extract_tar(tar.as_slice(), &dest, HOOK_SCRIPT).unwrap_err();
        assert!(matches!(err, ExtractError::PathTraversal(_)));
        assert!(!outer.path().join("etc").join("passwd").exists());
        assert!(!outer.path().join("a").join("etc").exists());
    }

    #[test]
    fn test_inner_parent_dirs_are_cleaned() {
        let dest = tempdir().unwrap();
        let tar = raw_tar(&[("a/../b.txt", EntryType::Regular, "b", None)]);
        extract_tar(tar.as_slice(), dest.path(), HOOK_SCRIPT).unwrap();
        assert!(dest.path().join("b.txt").is_file());
    }

    #[test]
    fn test_absolute_paths_stay_inside() {
        let dest = tempdir().unwrap();
        let tar = raw_tar(&[("/etc/motd", EntryType::Regular, "hi", None)]);
        extract_tar(tar.as_slice(), dest.path(), HOOK_SCRIPT).unwrap();
        assert!(dest.path().join("etc/motd").is_file());
    }

    #[test]
    fn test_symlink_escape_is_rejected() {
        let outside = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let tar = raw_tar(&[
            ("lib", EntryType::Symlink, "", Some(outside.path())),
            ("lib/evil", EntryType::Regular, "evil", None),
        ]);

        let err = extract_tar(tar.as_slice(), dest.path(), HOOK_SCRIPT).unwrap_err();
        assert!(matches!(err, ExtractError::PathTraversal(_)));
        assert!(!outside.path().join("evil").exists());
    }

    #[test]
    fn test_file_over_planted_symlink_does_not_follow() {
        let outside = tempdir().unwrap();
        let victim = outside.path().join("victim");
        fs::write(&victim, b"original").unwrap();
        let dest = tempdir().unwrap();
        let tar = raw_tar(&[
            ("x", EntryType::Symlink, "", Some(victim.as_path())),
            ("x", EntryType::Regular, "evil", None),
        ]);

        extract_tar(tar.as_slice(), dest.path(), HOOK_SCRIPT).unwrap();
        assert_eq!(fs::read(&victim).unwrap(), b"original");
        assert_eq!(fs::read(dest.path().join("x")).unwrap(), b"evil");
    }

    #[test]
    fn test_hardlinks_are_deferred() {
        let dest = tempdir().unwrap();
        let tar = raw_tar(&[
            ("b.txt", EntryType::Link, "", Some(Path::new("a.txt"))),
            ("a.txt", EntryType::Regular, "same", None),
        ]);

        extract_tar(tar.as_slice(), dest.path(), HOOK_SCRIPT).unwrap();
        assert_eq!(fs::read(dest.path().join("b.txt")).unwrap(), b"same");
    }

    #[test]
    fn test_hardlink_to_missing_target() {
        let dest = tempdir().unwrap();
        let tar = raw_tar(&[("b.txt", EntryType::Link, "", Some(Path::new("nope")))]);

        let err = extract_tar(tar.as_slice(), dest.path(), HOOK_SCRIPT).unwrap_err();
        assert!(matches!(err, ExtractError::MissingLinkTarget { .. }));
    }

    #[test]
    fn test_custom_hook_script_is_made_executable() {
        let dest = tempdir().unwrap();
        let tar = raw_tar(&[
            ("setup.lua", EntryType::Regular, "function install() end", None),
            (HOOK_SCRIPT, EntryType::Regular, "-- plain data", None),
            ("lib/setup.lua", EntryType::Regular, "-- not the hook", None),
        ]);

        extract_tar(tar.as_slice(), dest.path(), "setup.lua").unwrap();
        let modes = modes(dest.path());
        assert_eq!(modes[&PathBuf::from("setup.lua")], 0o755);
        assert_eq!(modes[&PathBuf::from(HOOK_SCRIPT)], 0o644);
        assert_eq!(modes[&PathBuf::from("lib/setup.lua")], 0o644);
    }
}
