// SPDX-License-Identifier: Apache-2.0

use std::ffi::NulError;
use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    InvalidArgument,
    Bug,
    InvalidDhcpMessage,
    InvalidDhcpServerReply,
    IoError,
    NoLease,
    NotSupported,
    Timeout,
    AddressConflict,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::InvalidArgument => "invalid_argument",
                Self::Bug => "bug",
                Self::InvalidDhcpMessage => "invalid_dhcp_message",
                Self::InvalidDhcpServerReply => "invalid_dhcp_server_reply",
                Self::IoError => "io_error",
                Self::NoLease => "no_lease",
                Self::NotSupported => "not_supported",
                Self::Timeout => "timeout",
                Self::AddressConflict => "address_conflict",
            }
        )
    }
}

#[derive(Debug, Clone)]
pub struct DhcpError {
    kind: ErrorKind,
    msg: String,
}

impl DhcpError {
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self { kind, msg }
    }

    pub fn invalid_argument(msg: String) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }

    pub fn bug(msg: String) -> Self {
        Self::new(ErrorKind::Bug, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn msg(&self) -> &str {
        self.msg.as_str()
    }
}

impl fmt::Display for DhcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for DhcpError {}

impl From<io::Error> for DhcpError {
    fn from(e: io::Error) -> Self {
        Self::new(ErrorKind::IoError, e.to_string())
    }
}

impl From<NulError> for DhcpError {
    fn from(e: NulError) -> Self {
        Self::new(ErrorKind::InvalidArgument, e.to_string())
    }
}

impl From<etherparse::WriteError> for DhcpError {
    fn from(e: etherparse::WriteError) -> Self {
        Self::new(
            ErrorKind::Bug,
            format!("failed to build ethernet frame: {e}"),
        )
    }
}

/// Annotate a `Result`'s error with the field or stage that produced it,
/// without discarding the original kind.
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T, DhcpError>;
}

impl<T> ErrorContext<T> for Result<T, DhcpError> {
    fn context(self, msg: &str) -> Result<T, DhcpError> {
        self.map_err(|e| DhcpError::new(e.kind(), format!("{msg}: {}", e.msg())))
    }
}
