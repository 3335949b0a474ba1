//! On-disk encodings for atoms and the catalog.
//!
//! Files are written in the canonical encoding (YAML, block style) and read
//! in [`Encoding::PRIORITY`] order, so stores written by older releases in
//! the legacy encoding (JSON) keep loading until they are migrated.

use std::{io::Write, path::Path};

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Indented, human-diffable YAML.
    Canonical,
    /// Dense JSON, read for compatibility only.
    Legacy,
}

impl Encoding {
    /// Read order: the first encoding with a file on disk wins.
    pub const PRIORITY: [Encoding; 2] = [Encoding::Canonical, Encoding::Legacy];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Canonical => "yaml",
            Self::Legacy => "json",
        }
    }

    /// Map a file extension back to its encoding.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::PRIORITY
            .into_iter()
            .find(|encoding| encoding.extension() == ext)
    }

    pub fn encode<T: Serialize>(self, value: &T, what: &str) -> Result<String> {
        let encoded = match self {
            Self::Canonical => {
                serde_yaml::to_string(value).map_err(|e| e.to_string())
            }
            Self::Legacy => {
                serde_json::to_string(value).map_err(|e| e.to_string())
            }
        };
        encoded.map_err(|message| Error::Encode {
            what: what.to_string(),
            message,
        })
    }

    /// Decode `text`, attributing failures to `path`.
    pub fn decode<T: DeserializeOwned>(self, text: &str, path: &Path) -> Result<T> {
        let decoded = match self {
            Self::Canonical => {
                serde_yaml::from_str(text).map_err(|e| e.to_string())
            }
            Self::Legacy => {
                serde_json::from_str(text).map_err(|e| e.to_string())
            }
        };
        decoded.map_err(|message| Error::Format {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Read and decode `path`. Returns `Ok(None)` if the file is absent.
    pub fn read_file<T: DeserializeOwned>(self, path: &Path) -> Result<Option<T>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.decode(&text, path).map(Some)
    }

    /// Encode `value` and replace `path` atomically.
    ///
    /// The text goes to a temporary file in the same directory that is then
    /// renamed over `path`, so readers see either the old or the new file,
    /// never a partial one.
    pub fn write_file<T: Serialize>(self, path: &Path, value: &T) -> Result<()> {
        let text = self.encode(value, &path.display().to_string())?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(text.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Remove `path` if it exists. Returns whether a file was removed.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn canonical_is_tried_first() {
        assert_eq!(Encoding::PRIORITY[0], Encoding::Canonical);
        assert_eq!(Encoding::PRIORITY[1], Encoding::Legacy);
    }

    #[test]
    fn extensions_map_back() {
        assert_eq!(Encoding::from_extension("yaml"), Some(Encoding::Canonical));
        assert_eq!(Encoding::from_extension("json"), Some(Encoding::Legacy));
        assert_eq!(Encoding::from_extension("yml"), None);
    }

    #[test]
    fn canonical_output_is_block_style() {
        let mut value = BTreeMap::new();
        value.insert("title", "hello");
        value.insert("type", "fact");
        let text = Encoding::Canonical.encode(&value, "test").unwrap();
        assert_eq!(text, "title: hello\ntype: fact\n");
    }

    #[test]
    fn read_missing_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent.yaml");
        let value: Option<BTreeMap<String, String>> =
            Encoding::Canonical.read_file(&path).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn decode_failure_names_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = Encoding::Legacy
            .read_file::<BTreeMap<String, String>>(&path)
            .unwrap_err();
        match err {
            Error::Format { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn write_replaces_without_leaving_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("value.yaml");

        let mut value = BTreeMap::new();
        value.insert("title".to_string(), "first".to_string());
        Encoding::Canonical.write_file(&path, &value).unwrap();
        value.insert("title".to_string(), "second".to_string());
        Encoding::Canonical.write_file(&path, &value).unwrap();

        let read: BTreeMap<String, String> =
            Encoding::Canonical.read_file(&path).unwrap().unwrap();
        assert_eq!(read["title"], "second");

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("value.yaml")]);
    }

    #[test]
    fn remove_if_exists_reports_absence() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f.json");
        assert!(!remove_if_exists(&path).unwrap());
        std::fs::write(&path, "{}").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!path.exists());
    }
}
