//! Base64 decoding and atomic persistence of the recovered file.

use std::io::Write;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;
use tempfile::NamedTempFile;

use super::extract::Payload;
use crate::error::{PayloadError, Result};

/// Characters of the first/last line kept in a decode error.
const DIAGNOSTIC_PREFIX: usize = 100;

/// Decode the concatenated payload in memory.
///
/// On failure the error carries the first and last candidate lines, which
/// is usually enough to see a truncated transfer or a stray noise line.
pub fn decode(payload: &Payload<'_>) -> Result<Vec<u8>> {
    let encoded = payload.concat();
    debug!(
        "decoding {} base64 bytes from {} lines",
        encoded.len(),
        payload.len()
    );

    STANDARD.decode(encoded.as_bytes()).map_err(|source| {
        PayloadError::Decode {
            source,
            first_line: diagnostic(payload.first()),
            last_line: diagnostic(payload.last()),
        }
        .into()
    })
}

/// Write `data` to `path` without ever leaving a partial file behind.
///
/// The bytes go to a uniquely named temporary file in the destination
/// directory, which is renamed over `path` once fully written. On failure
/// the temporary file is removed when it is dropped.
pub async fn persist(data: Vec<u8>, path: &Path) -> Result<u64> {
    let target = path.to_path_buf();
    let written = tokio::task::spawn_blocking(move || write_atomic(&data, &target))
        .await
        .map_err(std::io::Error::other)
        .and_then(|r| r)
        .map_err(|source| PayloadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    debug!("wrote {} bytes to {}", written, path.display());
    Ok(written)
}

/// Decode the payload and, only if that succeeds, persist it.
///
/// Returns the number of bytes written.
pub async fn decode_and_persist(payload: &Payload<'_>, path: &Path) -> Result<u64> {
    let data = decode(payload)?;
    persist(data, path).await
}

fn write_atomic(data: &[u8], path: &Path) -> std::io::Result<u64> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(data.len() as u64)
}

fn diagnostic(line: Option<&str>) -> String {
    match line {
        Some(line) => line.chars().take(DIAGNOSTIC_PREFIX).collect(),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use proptest::prelude::*;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn lines_of(encoded: &str, width: usize) -> Vec<&str> {
        encoded
            .as_bytes()
            .chunks(width)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_decode_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.tgz");
        let encoded = STANDARD.encode(b"HELLO WORLD");
        let payload: Payload = lines_of(&encoded, 5).into_iter().collect();

        let written = decode_and_persist(&payload, &path).await.unwrap();

        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO WORLD");
        assert_eq!(entries(dir.path()), vec!["backup.tgz"]);
    }

    #[tokio::test]
    async fn test_bad_padding_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.tgz");
        let payload: Payload = ["SEVMTE8gV09STEQ", "=="].into_iter().collect();

        let err = decode_and_persist(&payload, &path).await.unwrap_err();

        match err {
            Error::Payload(PayloadError::Decode {
                first_line,
                last_line,
                ..
            }) => {
                assert_eq!(first_line, "SEVMTE8gV09STEQ");
                assert_eq!(last_line, "==");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!path.exists());
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn test_diagnostic_truncates() {
        let long = "A".repeat(250);
        assert_eq!(diagnostic(Some(&long)).len(), DIAGNOSTIC_PREFIX);
        assert_eq!(diagnostic(None), "none");
    }

    #[tokio::test]
    async fn test_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("backup.tgz");

        let err = persist(b"data".to_vec(), &path).await.unwrap_err();

        assert!(matches!(err, Error::Payload(PayloadError::Io { .. })));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_persist_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.tgz");
        std::fs::write(&path, b"old contents that are longer").unwrap();

        persist(b"new".to_vec(), &path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_persist_leaves_sibling_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.tgz");
        let sibling = dir.path().join("gw.tgz.part");
        std::fs::write(&sibling, b"unrelated").unwrap();

        persist(b"new".to_vec(), &path).await.unwrap();

        assert_eq!(std::fs::read(&sibling).unwrap(), b"unrelated");
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert_eq!(entries(dir.path()), vec!["gw.tgz", "gw.tgz.part"]);
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file
        let path = dir.path().join("gw.tgz");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        let err = persist(b"data".to_vec(), &path).await.unwrap_err();

        assert!(matches!(err, Error::Payload(PayloadError::Io { .. })));
        assert_eq!(entries(dir.path()), vec!["gw.tgz"]);
        assert!(path.join("keep").exists());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_written_bytes_match_decoded(data in prop::collection::vec(any::<u8>(), 0..2048), width in 4usize..120) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("out.bin");
            let encoded = STANDARD.encode(&data);
            let payload: Payload = lines_of(&encoded, width).into_iter().collect();

            let written = tokio_test::block_on(decode_and_persist(&payload, &path)).unwrap();

            prop_assert_eq!(written as usize, data.len());
            prop_assert_eq!(std::fs::read(&path).unwrap(), data);
        }
    }
}
