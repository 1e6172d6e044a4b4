//! エラー型

use kagami_target::{HostError, MemoryError};
use serde::Serialize;
use std::path::PathBuf;

/// コア機能のエラー
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// デバッガ出力が想定した形をしていない
    #[error("failed to parse debugger output: {0}")]
    Parse(String),
    /// リクエストのペイロードが不正
    #[error("malformed request: {0}")]
    Protocol(String),
    /// 調査対象プロセスが終了した
    #[error("inferior terminated: {0}")]
    InferiorExited(String),
    #[error(transparent)]
    Host(HostError),
    #[error(transparent)]
    Memory(MemoryError),
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/// 応答に載せるエラー分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    Protocol,
    Fatal,
    Transient,
}

impl Error {
    /// エラー分類を取得する
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse(_) => ErrorKind::Parse,
            Error::Protocol(_) | Error::Json(_) => ErrorKind::Protocol,
            Error::InferiorExited(_) => ErrorKind::Fatal,
            Error::Host(e) if !e.is_transient() => ErrorKind::Fatal,
            Error::Memory(e) if e.is_fatal() => ErrorKind::Fatal,
            Error::Host(_) | Error::Memory(_) | Error::Io { .. } | Error::Pattern(_) => {
                ErrorKind::Transient
            }
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }
}

impl From<HostError> for Error {
    fn from(e: HostError) -> Self {
        match e {
            HostError::Exited(reason) => Error::InferiorExited(reason),
            other => Error::Host(other),
        }
    }
}

impl From<MemoryError> for Error {
    fn from(e: MemoryError) -> Self {
        Error::Memory(e)
    }
}
