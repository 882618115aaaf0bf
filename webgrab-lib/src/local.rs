//! Local file access.
//!
//! The network fetch path refuses filesystem paths; these helpers are the
//! local counterpart.

use crate::error::GrabError;
use crate::types::{ReadMode, WriteMode};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Text encodings supported for local reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Ascii,
    Latin1,
}

impl Encoding {
    /// Parse an encoding label such as `utf-8` or `ascii`.
    pub fn parse(label: &str) -> Result<Self, GrabError> {
        match label.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Self::Latin1),
            other => Err(GrabError::invalid_argument(
                "encoding",
                format!("unsupported encoding '{}'", other),
            )),
        }
    }

    fn decode(self, bytes: Vec<u8>) -> Result<String, &'static str> {
        match self {
            Self::Utf8 => String::from_utf8(bytes).map_err(|_| "content is not valid utf-8"),
            Self::Ascii => {
                if bytes.is_ascii() {
                    String::from_utf8(bytes).map_err(|_| "content is not valid ascii")
                } else {
                    Err("content is not valid ascii")
                }
            }
            Self::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        }
    }

    fn encode(self, text: &str) -> Result<Vec<u8>, &'static str> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Ascii => {
                if text.is_ascii() {
                    Ok(text.as_bytes().to_vec())
                } else {
                    Err("text cannot be encoded as ascii")
                }
            }
            Self::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| "text cannot be encoded as latin-1"))
                .collect(),
        }
    }
}

/// Contents of a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl LocalContent {
    /// Text contents; binary contents are decoded lossily.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }
}

/// Read a local file.
///
/// In [`ReadMode::Text`] the contents are decoded with `encoding`; in
/// [`ReadMode::Binary`] the raw bytes are returned and `encoding` is only
/// validated.
///
/// # Errors
///
/// Returns `InvalidArgument` for unknown encodings and `File` for missing,
/// unreadable or undecodable files.
pub fn read_local<P: AsRef<Path>>(
    path: P,
    mode: ReadMode,
    encoding: &str,
) -> Result<LocalContent, GrabError> {
    let path = path.as_ref();
    let encoding = Encoding::parse(encoding)?;
    let shown = path.display().to_string();

    let bytes = std::fs::read(path).map_err(|e| GrabError::file_error(&shown, e.to_string()))?;

    match mode {
        ReadMode::Binary => Ok(LocalContent::Bytes(bytes)),
        ReadMode::Text => encoding
            .decode(bytes)
            .map(LocalContent::Text)
            .map_err(|reason| GrabError::file_error(&shown, reason)),
    }
}

/// Write text to a local file, creating it if needed.
///
/// # Errors
///
/// Returns `InvalidArgument` for unknown encodings or text the encoding
/// cannot represent, and `File` for I/O failures.
pub fn write_local<P: AsRef<Path>>(
    path: P,
    data: &str,
    mode: WriteMode,
    encoding: &str,
) -> Result<(), GrabError> {
    let bytes = Encoding::parse(encoding)?
        .encode(data)
        .map_err(|reason| GrabError::invalid_argument("data", reason))?;
    write_local_bytes(path, &bytes, mode)
}

/// Write raw bytes to a local file, creating it if needed.
pub fn write_local_bytes<P: AsRef<Path>>(path: P, data: &[u8], mode: WriteMode) -> Result<(), GrabError> {
    let path = path.as_ref();
    let shown = path.display().to_string();

    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        WriteMode::Write => options.write(true).truncate(true),
        WriteMode::Append => options.append(true),
    };

    let mut file = options
        .open(path)
        .map_err(|e| GrabError::file_error(&shown, e.to_string()))?;
    file.write_all(data)
        .map_err(|e| GrabError::file_error(&shown, e.to_string()))?;
    tracing::debug!(path = %shown, bytes = data.len(), mode = %mode, "wrote local file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_write_then_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");

        write_local(&path, "hello", WriteMode::Write, "utf-8").unwrap();
        write_local(&path, " world", WriteMode::Append, "utf-8").unwrap();
        let content = read_local(&path, ReadMode::Text, "utf-8").unwrap();
        assert_eq!(content, LocalContent::Text("hello world".to_string()));

        write_local(&path, "reset", WriteMode::Write, "ascii").unwrap();
        assert_eq!(
            read_local(&path, ReadMode::Text, "ascii").unwrap().into_text(),
            "reset"
        );
    }

    #[test]
    fn test_binary_read() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xff, 0x00, 0x41]).unwrap();

        let content = read_local(file.path(), ReadMode::Binary, "utf-8").unwrap();
        assert_eq!(content.into_bytes(), vec![0xff, 0x00, 0x41]);

        // Not valid utf-8 as text
        assert!(matches!(
            read_local(file.path(), ReadMode::Text, "utf-8"),
            Err(GrabError::File { .. })
        ));
        // Latin-1 decodes every byte
        assert_eq!(
            read_local(file.path(), ReadMode::Text, "latin-1").unwrap().into_text(),
            "\u{ff}\u{0}A"
        );
    }

    #[test]
    fn test_ascii_rejects_non_ascii() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        assert!(matches!(
            write_local(&path, "café", WriteMode::Write, "ascii"),
            Err(GrabError::InvalidArgument { .. })
        ));
        write_local(&path, "café", WriteMode::Write, "utf-8").unwrap();
        assert!(read_local(&path, ReadMode::Text, "ascii").is_err());
    }

    #[test]
    fn test_unknown_encoding_and_missing_file() {
        assert!(matches!(
            read_local("/definitely/not/here", ReadMode::Text, "utf-16"),
            Err(GrabError::InvalidArgument { .. })
        ));
        assert!(matches!(
            read_local("/definitely/not/here", ReadMode::Text, "utf-8"),
            Err(GrabError::File { .. })
        ));
    }
}
