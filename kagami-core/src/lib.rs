//! Kagami 調査・トレースのコア機能
//!
//! このクレートは、ホストデバッガの出力を構造化し、調査対象プロセスの状態を読み出す機能を提供します。
//! メモリ・レジスタの読み取り、スタックフレームの再構築、命令トレース、
//! ウォッチポイント/ブレークポイントのヒット集計、フロントエンドからのリクエスト処理を統合します。

pub mod address;
pub mod command;
pub mod dispatch;
pub mod error;
pub mod parse;
pub mod protocol;
pub mod registers;
pub mod session;
pub mod stack;
pub mod store;
pub mod trace;
pub mod track;
pub mod value;

pub use address::{AddressExpr, AddressReader, ReadItem, WriteFailure, WriteTarget};
pub use command::Request;
pub use dispatch::{Dispatcher, Outcome};
pub use error::{Error, ErrorKind};
pub use protocol::Reply;
pub use registers::{Arch, RegisterMap, RegisterSelection, RegisterSnapshot};
pub use session::{Session, SessionConfig};
pub use stack::{FrameRecord, StackSlot, StackWalker};
pub use store::{IpcPaths, Mailbox};
pub use trace::{InstructionTracer, NodeId, StepMode, TraceConfig, TraceStatus, TraceTree};
pub use track::{BreakpointTracker, ExpressionHistogram, WatchpointGroup, WatchpointHit, WatchpointTracker};
pub use value::{ReadOptions, ReadValue, ValueType};

// 他のクレートから使用するために再エクスポート
pub use kagami_target::{HostDebugger, HostError, MemoryAccess, MemoryError};

/// コア機能の結果型
pub type Result<T> = std::result::Result<T, Error>;
