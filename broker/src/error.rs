// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;

use codec::{DecodeError, EncodeError};

#[derive(Clone, Debug)]
pub enum ErrorKind {
    /// Error occurred while performing network I/O.
    IoError,

    /// Packet encode error.
    EncodeError,

    /// Packet decode error, always followed by closing the connection.
    DecodeError,

    /// Password/auth file malformed or unreadable.
    AuthError,

    /// Config file malformed or unreadable.
    ConfigError,
}

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::IoError, &err.to_string())
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Self::new(ErrorKind::DecodeError, &err.to_string())
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Self::new(ErrorKind::EncodeError, &err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::new(ErrorKind::ConfigError, &err.to_string())
    }
}
