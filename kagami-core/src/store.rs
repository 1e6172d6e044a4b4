//! IPCディレクトリとアーティファクトの永続化
//!
//! フロントエンドとのメールボックス、トレース結果、ヒット集計はすべてIPCディレクトリ内の
//! JSONファイルです。書き込みは一時ファイルへの書き込みとrenameで行うため、
//! 読み手が書きかけのファイルを見ることはありません。

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// IPCディレクトリ内のファイル配置
#[derive(Debug, Clone)]
pub struct IpcPaths {
    dir: PathBuf,
}

impl IpcPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// pidごとの既定のIPCディレクトリ
    pub fn default_dir(pid: i32) -> PathBuf {
        std::env::temp_dir()
            .join("kagami-connection")
            .join(pid.to_string())
    }

    /// ディレクトリを作成する
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|source| Error::Io {
            path: self.dir.clone(),
            source,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// フロントエンドからのメールボックス
    pub fn from_frontend(&self) -> PathBuf {
        self.dir.join("ipc_from_frontend")
    }

    /// フロントエンドへのメールボックス
    pub fn to_frontend(&self) -> PathBuf {
        self.dir.join("ipc_to_frontend")
    }

    pub fn track_watchpoint(&self, group: &str) -> PathBuf {
        self.artifact("track_watchpoint", group)
    }

    pub fn track_breakpoint(&self, breakpoint: &str) -> PathBuf {
        self.artifact("track_breakpoint", breakpoint)
    }

    pub fn trace_instructions(&self, breakpoint: &str) -> PathBuf {
        self.artifact("trace_instructions", breakpoint)
    }

    pub fn trace_status(&self, breakpoint: &str) -> PathBuf {
        self.artifact("trace_instructions_status", breakpoint)
    }

    fn artifact(&self, prefix: &str, key: &str) -> PathBuf {
        // キーはフロントエンド由来なのでファイル名に使えない文字を置き換える
        let key: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
            .collect();
        self.dir.join(format!("{}_{}", prefix, key))
    }
}

/// 値をJSONとして書き込む（上書き）
pub fn persist<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let io_error = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let json = serde_json::to_vec(value)?;
    fs::write(&tmp, json).map_err(io_error)?;
    fs::rename(&tmp, path).map_err(io_error)?;
    Ok(())
}

/// JSONファイルを読み込む
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// フロントエンドとのメールボックス
///
/// 1回の書き込みが1メッセージです。
#[derive(Debug, Clone)]
pub struct Mailbox {
    inbound: PathBuf,
    outbound: PathBuf,
}

impl Mailbox {
    pub fn new(paths: &IpcPaths) -> Self {
        Self {
            inbound: paths.from_frontend(),
            outbound: paths.to_frontend(),
        }
    }

    /// フロントエンドからのペイロードを読み取る
    ///
    /// 形が合わないペイロードは呼び出し側の契約違反として `Error::Protocol` になります。
    pub fn receive<T: DeserializeOwned>(&self) -> Result<T> {
        load(&self.inbound).map_err(|e| match e {
            Error::Json(e) => Error::protocol(format!("unexpected payload shape: {}", e)),
            other => other,
        })
    }

    /// フロントエンドへ応答を書き込む
    pub fn send<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        persist(&self.outbound, value)
    }
}
