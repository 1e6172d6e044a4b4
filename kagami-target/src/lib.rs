//! Kagami ターゲットプロセス制御
//!
//! このクレートは、調査対象プロセス（inferior）にアクセスするための低レベル機能を提供します。
//! /proc/pid/mem によるメモリアクセス、プロセスの生存確認、
//! ホストデバッガ（GDB）をMI経由で操作するセッションなどを扱います。

pub mod gdb;
pub mod host;
pub mod memory;
pub mod mi;
pub mod process;

pub use gdb::GdbSession;
pub use host::{HostDebugger, HostError};
pub use memory::{Memory, MemoryAccess, MemoryError};
pub use process::Process;
