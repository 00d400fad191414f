//! Configuration file loading

use crate::errors::types::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Read a TOML file into `T`
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml(&raw, &path.display().to_string())
}

/// Parse TOML text into `T`; `origin` names the source in error messages
pub fn parse_toml<T: DeserializeOwned>(raw: &str, origin: &str) -> Result<T> {
    toml::from_str(raw).map_err(|e| Error::Parse {
        path: origin.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        #[serde(default)]
        retries: u32,
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"alice\"").unwrap();

        let sample: Sample = load_toml(file.path()).unwrap();
        assert_eq!(sample, Sample { name: "alice".to_string(), retries: 0 });
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_toml::<Sample>("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = parse_toml::<Sample>("name = ", "inline").unwrap_err();
        match err {
            Error::Parse { path, .. } => assert_eq!(path, "inline"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
