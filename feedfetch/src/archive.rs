//! Zip archive extraction into a run-scoped temporary directory.

use std::io::{Cursor, Read};
use std::path::PathBuf;

use tempfile::TempDir;
use tracing::{error, info};

use crate::{FetchError, Result};

/// An archive unpacked onto disk. Files live inside the temporary
/// directory and are removed when this value is dropped.
#[derive(Debug)]
pub struct ExtractedArchive {
    _dir: TempDir,
    files: Vec<(String, PathBuf)>,
}

impl ExtractedArchive {
    /// Extracted member names and their on-disk paths, in archive order.
    pub fn files(&self) -> &[(String, PathBuf)] {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&PathBuf> {
        self.files
            .iter()
            .find(|(member, _)| member == name)
            .map(|(_, path)| path)
    }
}

/// Unpack a zip archive into a temporary directory.
///
/// With `scrub_embedded_breaks` set, every `\r\n\t` byte sequence in a
/// member is rewritten to a single tab before the member is written out.
/// One register wraps long text fields across physical lines inside
/// otherwise line-oriented files; the scrub restores one record per line.
///
/// If the bytes are not a readable zip the first 1,000 bytes of the
/// payload are logged before the error is returned, since the upstream
/// failure mode is usually an HTML error page where an archive should be.
pub fn extract_zip(bytes: &[u8], scrub_embedded_breaks: bool) -> Result<ExtractedArchive> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1000)]).into_owned();
        error!(payload_start = %head, "could not open archive");
        FetchError::BadArchive(e.to_string())
    })?;

    let dir = TempDir::new()?;
    let mut files = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let mut member = zip.by_index(index).map_err(|e| {
            error!(index, "could not read archive member");
            FetchError::BadArchive(e.to_string())
        })?;
        if member.is_dir() {
            continue;
        }
        let name = member.name().to_string();
        // members keep their relative path on disk, so two members with
        // the same leaf name in different directories cannot clobber
        // each other; a path escaping the extraction directory is fatal
        let path = match member.enclosed_name() {
            Some(relative) => dir.path().join(relative),
            None => {
                error!(member = %name, "archive member path escapes the extraction directory");
                return Err(FetchError::BadArchive(format!("unsafe member path {name}")));
            }
        };
        let mut contents = Vec::with_capacity(member.size() as usize);
        member.read_to_end(&mut contents)?;
        if scrub_embedded_breaks {
            contents = scrub_crlf_tab(&contents);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &contents)?;
        info!(member = %name, bytes = contents.len(), "extracted archive member");
        files.push((name, path));
    }

    Ok(ExtractedArchive { _dir: dir, files })
}

fn scrub_crlf_tab(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i..].starts_with(b"\r\n\t") {
            out.push(b'\t');
            i += 3;
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn build_zip(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in members {
            writer
                .start_file(name.to_string(), FileOptions::default())
                .unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn extracts_members_to_disk() {
        let bytes = build_zip(&[("extract1.txt", b"a\tb\r\n"), ("extract2.txt", b"c\td\r\n")]);
        let archive = extract_zip(&bytes, false).unwrap();
        assert_eq!(archive.files().len(), 2);
        let contents = std::fs::read(archive.file("extract1.txt").unwrap()).unwrap();
        assert_eq!(contents, b"a\tb\r\n");
    }

    #[test]
    fn scrubs_embedded_line_breaks() {
        let bytes = build_zip(&[("wrapped.txt", b"1\tfirst line\r\n\tcontinued\r\n")]);
        let archive = extract_zip(&bytes, true).unwrap();
        let contents = std::fs::read(archive.file("wrapped.txt").unwrap()).unwrap();
        assert_eq!(contents, b"1\tfirst line\tcontinued\r\n");
    }

    #[test]
    fn members_keep_their_archive_paths() {
        let bytes = build_zip(&[("Data/multi_csv/part1.csv", b"pcds\r\nAB1 0AA\r\n")]);
        let archive = extract_zip(&bytes, false).unwrap();
        let (name, path) = &archive.files()[0];
        assert_eq!(name, "Data/multi_csv/part1.csv");
        assert!(path.ends_with("Data/multi_csv/part1.csv"));
    }

    #[test]
    fn members_sharing_a_leaf_name_do_not_clobber_each_other() {
        let bytes = build_zip(&[
            ("Data/data.csv", b"a\r\n"),
            ("Documents/data.csv", b"b\r\n"),
        ]);
        let archive = extract_zip(&bytes, false).unwrap();
        assert_eq!(
            std::fs::read(archive.file("Data/data.csv").unwrap()).unwrap(),
            b"a\r\n"
        );
        assert_eq!(
            std::fs::read(archive.file("Documents/data.csv").unwrap()).unwrap(),
            b"b\r\n"
        );
    }

    #[test]
    fn rejects_non_archive_payloads() {
        let err = extract_zip(b"<html>503 Service Unavailable</html>", false).unwrap_err();
        assert!(matches!(err, FetchError::BadArchive(_)));
    }
}
