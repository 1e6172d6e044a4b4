//! ホストデバッガとのインターフェース
//!
//! コアはホストデバッガを「コマンドを受け取ってテキストを返すもの」として扱います。
//! 実行制御（stepi / nexti / continue）もコマンドとして発行します。

use std::io;

/// ホストデバッガ操作のエラー
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// コマンドがデバッガに拒否された
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },
    /// 調査対象プロセスが終了している
    #[error("inferior is no longer running: {0}")]
    Exited(String),
    /// デバッガプロセス自体が終了した
    #[error("host debugger terminated")]
    Terminated,
    /// 想定外の出力
    #[error("unexpected host debugger output: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl HostError {
    /// 単一のコマンドに閉じた失敗かどうか
    ///
    /// `Command` 以外はセッション全体に影響するため、呼び出し側で握りつぶしてはいけません。
    pub fn is_transient(&self) -> bool {
        matches!(self, HostError::Command { .. })
    }
}

/// ホストデバッガ
pub trait HostDebugger {
    /// コンソールコマンドを実行し、出力テキストを返す
    ///
    /// 実行制御コマンドの場合は、inferior が再び停止するまでブロックします。
    fn execute(&mut self, command: &str) -> Result<String, HostError>;

    /// 式を評価し、値のテキスト表現を返す
    fn evaluate(&mut self, expression: &str) -> Result<String, HostError>;

    /// inferior の実行を再開する（停止は待たない）
    fn resume(&mut self) -> Result<(), HostError>;
}
