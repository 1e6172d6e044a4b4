//! セッションのメインロジック
//!
//! 調査対象プロセス1つに対して1つ作成し、プロセスが終了するまで使い続けます。
//! ウォッチポイント/ブレークポイントの集計のように、リクエストをまたいで保持する状態はここに置きます。

use crate::address::AddressReader;
use crate::parse::OutputParser;
use crate::registers::{Arch, RegisterSnapshot};
use crate::stack::StackWalker;
use crate::store::{IpcPaths, Mailbox};
use crate::trace::InstructionTracer;
use crate::track::{BreakpointTracker, WatchpointTracker};
use crate::Result;
use kagami_target::{GdbSession, HostDebugger, Memory, MemoryAccess};
use std::path::PathBuf;
use tracing::info;

/// セッションの起動設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// 調査対象のプロセスID
    pub pid: i32,
    /// GDBの実行ファイル
    pub gdb: PathBuf,
    /// IPCディレクトリ（`None` の場合は既定の場所）
    pub ipc_dir: Option<PathBuf>,
}

impl SessionConfig {
    pub fn ipc_paths(&self) -> IpcPaths {
        let dir = self
            .ipc_dir
            .clone()
            .unwrap_or_else(|| IpcPaths::default_dir(self.pid));
        IpcPaths::new(dir)
    }
}

/// 調査セッション
pub struct Session<H, M> {
    host: H,
    memory: M,
    parser: OutputParser,
    arch: Arch,
    paths: IpcPaths,
    mailbox: Mailbox,
    watchpoints: WatchpointTracker,
    breakpoints: BreakpointTracker,
}

impl Session<GdbSession, Memory> {
    /// GDBをプロセスにアタッチしてセッションを開始する
    pub fn attach(config: &SessionConfig) -> Result<Self> {
        let paths = config.ipc_paths();
        paths.create()?;

        let host = GdbSession::attach(&config.gdb, config.pid)?;
        Self::new(host, Memory::new(config.pid), paths)
    }
}

impl<H: HostDebugger, M: MemoryAccess> Session<H, M> {
    /// セッションを作成する
    ///
    /// アーキテクチャはここで一度だけ判定します。
    pub fn new(mut host: H, memory: M, paths: IpcPaths) -> Result<Self> {
        let parser = OutputParser::new()?;
        let arch = Arch::detect(&mut host)?;
        info!("session started ({:?}), ipc directory {}", arch, paths.dir().display());

        Ok(Self {
            host,
            memory,
            parser,
            arch,
            mailbox: Mailbox::new(&paths),
            paths,
            watchpoints: WatchpointTracker::new(),
            breakpoints: BreakpointTracker::new(),
        })
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn paths(&self) -> &IpcPaths {
        &self.paths
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn parser(&self) -> &OutputParser {
        &self.parser
    }

    /// ホストデバッガへの直接アクセス
    pub fn host(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn watchpoints(&self) -> &WatchpointTracker {
        &self.watchpoints
    }

    pub fn breakpoints(&self) -> &BreakpointTracker {
        &self.breakpoints
    }

    pub fn addresses(&mut self) -> AddressReader<'_, H, M> {
        AddressReader::new(&mut self.host, &self.memory, &self.parser)
    }

    pub fn registers(&mut self) -> RegisterSnapshot<'_, H> {
        RegisterSnapshot::new(&mut self.host, &self.parser, self.arch)
    }

    pub fn stack(&mut self) -> StackWalker<'_, H, M> {
        StackWalker::new(&mut self.host, &self.memory, &self.parser, self.arch)
    }

    pub fn tracer(&mut self) -> InstructionTracer<'_, H> {
        InstructionTracer::new(&mut self.host, &self.parser, self.arch, &self.paths)
    }

    /// ウォッチポイントのトラップを記録する
    pub fn track_watchpoint(&mut self, watchpoints: &str) -> Result<()> {
        self.watchpoints
            .record_hit(&mut self.host, &self.parser, self.arch, &self.paths, watchpoints)?;
        Ok(())
    }

    /// ブレークポイントのトラップを記録する
    pub fn track_breakpoint(&mut self, argument: &str) -> Result<()> {
        self.breakpoints
            .record_hit(&mut self.host, &self.parser, &self.paths, argument)?;
        Ok(())
    }
}
