use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Category of a [`KeyStorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyStorageErrorKind {
    /// The key storage file (or its parent directory) does not exist.
    NotFound,
    /// The key storage file exists but cannot be read.
    NotReadable,
    /// The key storage file cannot be written.
    NotWritable,
    /// The file is empty or one of the layers cannot be decoded.
    Malformed,
    /// Decryption failed, usually because of a wrong password.
    Undecryptable,
    /// The contents do not pass validation or use an unsupported version.
    Invalid,
    /// A bug or an environment problem unrelated to the file contents.
    InternalError,
}

impl KeyStorageErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::NotReadable => "not-readable",
            Self::NotWritable => "not-writable",
            Self::Malformed => "malformed",
            Self::Undecryptable => "undecryptable",
            Self::Invalid => "invalid",
            Self::InternalError => "internal-error",
        }
    }

    /// Whether the user can act on this error, e.g. by re-entering the
    /// password or by linking the device again.
    pub fn is_user_recoverable(self) -> bool {
        matches!(self, Self::NotFound | Self::Undecryptable)
    }
}

impl fmt::Display for KeyStorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Key storage error ({kind}): {message}")]
pub struct KeyStorageError {
    kind: KeyStorageErrorKind,
    message: String,
    #[source]
    source: Option<BoxedSource>,
}

impl KeyStorageError {
    pub fn new(kind: KeyStorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> KeyStorageErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
