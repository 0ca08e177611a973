//! Archive extraction into a sibling `<file>_extracted/` directory.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::{Component, Path, PathBuf};

use capitol_common::ExtractionResult;
use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
}

/// Identify an archive by its leading bytes, not its file name.
pub fn detect_format(data: &[u8]) -> Option<ArchiveFormat> {
    match data {
        [0x50, 0x4B, 0x03, 0x04, ..] | [0x50, 0x4B, 0x05, 0x06, ..] => Some(ArchiveFormat::Zip),
        [0x1F, 0x8B, ..] => Some(ArchiveFormat::TarGz),
        _ if data.len() >= 263 && &data[257..262] == b"ustar" => Some(ArchiveFormat::Tar),
        _ => None,
    }
}

/// Sniff the format of a file on disk. Unreadable files are `None`.
pub fn detect_path(path: &Path) -> Option<ArchiveFormat> {
    let mut header = Vec::with_capacity(512);
    File::open(path).ok()?.take(512).read_to_end(&mut header).ok()?;
    detect_format(&header)
}

/// Where `extract` puts the members of `archive`.
pub fn extraction_dir(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push("_extracted");
    PathBuf::from(name)
}

/// Unpack `archive` into `<archive>_extracted/`. Corrupt or unsupported input
/// is reported in the result, never raised.
pub fn extract(archive: &Path, remove_original: bool) -> ExtractionResult {
    let destination_dir = extraction_dir(archive);

    let outcome = match detect_path(archive) {
        Some(format) => {
            debug!(archive = %archive.display(), ?format, "Extracting");
            unpack(archive, format, &destination_dir)
        }
        None => Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported or unrecognized archive format")),
    };

    match outcome {
        Ok(members) => {
            info!(
                archive = %archive.display(),
                dest = %destination_dir.display(),
                members,
                "Archive extracted"
            );
            if remove_original {
                if let Err(e) = std::fs::remove_file(archive) {
                    warn!(archive = %archive.display(), error = %e, "Failed to remove extracted archive");
                }
            }
            ExtractionResult {
                ok: true,
                destination_dir,
                error: None,
            }
        }
        Err(e) => {
            warn!(archive = %archive.display(), error = %e, "Extraction failed");
            ExtractionResult {
                ok: false,
                destination_dir,
                error: Some(e.to_string()),
            }
        }
    }
}

fn unpack(archive: &Path, format: ArchiveFormat, dest: &Path) -> io::Result<usize> {
    std::fs::create_dir_all(dest)?;
    let reader = BufReader::new(File::open(archive)?);
    match format {
        ArchiveFormat::Zip => unpack_zip(reader, dest),
        ArchiveFormat::TarGz => unpack_tar(GzDecoder::new(reader), dest),
        ArchiveFormat::Tar => unpack_tar(reader, dest),
    }
}

fn unpack_zip<R: Read + Seek>(reader: R, dest: &Path) -> io::Result<usize> {
    let mut zip = zip::ZipArchive::new(reader).map_err(to_io)?;
    let mut files = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(to_io)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(name = entry.name(), "Skipping archive member with unsafe path");
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        files += 1;
    }

    Ok(files)
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> io::Result<usize> {
    let mut archive = tar::Archive::new(reader);
    let mut files = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if !is_safe_relative(&path) {
            warn!(name = %path.display(), "Skipping archive member with unsafe path");
            continue;
        }
        let kind = entry.header().entry_type();
        if !(kind.is_file() || kind.is_dir()) {
            continue;
        }
        // unpack_in refuses anything that would land outside `dest`.
        if entry.unpack_in(dest)? && kind.is_file() {
            files += 1;
        }
    }

    Ok(files)
}

fn is_safe_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn to_io(e: zip::result::ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, members: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, body) in members {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, members: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, body) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn detects_by_magic_bytes() {
        assert_eq!(detect_format(&[0x50, 0x4B, 0x03, 0x04, 0x14]), Some(ArchiveFormat::Zip));
        assert_eq!(detect_format(&[0x1F, 0x8B, 0x08]), Some(ArchiveFormat::TarGz));
        let mut tar_header = [0u8; 512];
        tar_header[257..263].copy_from_slice(b"ustar\0");
        assert_eq!(detect_format(&tar_header), Some(ArchiveFormat::Tar));
        assert_eq!(detect_format(b"<?xml version=\"1.0\"?>"), None);
    }

    #[test]
    fn zip_extracts_into_sibling_directory() {
        let dir = tempfile::tempdir().unwrap();
        // Misleading extension: detection goes by content.
        let archive = dir.path().join("BILLSTATUS-117-hr.data");
        write_zip(&archive, &[("BILLSTATUS-117hr1.xml", "<billStatus/>"), ("nested/b.xml", "<b/>")]);

        let result = extract(&archive, false);

        assert!(result.ok, "{:?}", result.error);
        assert_eq!(result.destination_dir, dir.path().join("BILLSTATUS-117-hr.data_extracted"));
        assert!(result.destination_dir.join("BILLSTATUS-117hr1.xml").exists());
        assert!(result.destination_dir.join("nested/b.xml").exists());
        assert!(archive.exists());
    }

    #[test]
    fn tar_gz_extracts_and_can_remove_original() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("legislators.tar.gz");
        write_tar_gz(&archive, &[("roster/legislators-current.json", "[]")]);

        let result = extract(&archive, true);

        assert!(result.ok, "{:?}", result.error);
        assert!(result.destination_dir.join("roster/legislators-current.json").exists());
        assert!(!archive.exists());
    }

    #[test]
    fn corrupt_zip_is_a_failure_result() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, [0x50, 0x4B, 0x03, 0x04, 0, 0, 0, 0, 1, 2, 3]).unwrap();

        let result = extract(&archive, true);

        assert!(!result.ok);
        assert!(result.error.is_some());
        assert!(archive.exists(), "failed archives are never removed");
    }

    #[test]
    fn plain_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vote.xml");
        std::fs::write(&path, "<roll_call_vote/>").unwrap();

        let result = extract(&path, false);

        assert!(!result.ok);
        assert!(result.error.unwrap().contains("unsupported"));
    }

    #[test]
    fn unsafe_tar_paths_are_rejected() {
        assert!(is_safe_relative(Path::new("a/b.xml")));
        assert!(!is_safe_relative(Path::new("../escape.xml")));
        assert!(!is_safe_relative(Path::new("/etc/passwd")));
    }
}
