//! 結合テスト用のホストデバッガとメモリ

#![allow(dead_code)]

use kagami_core::{HostDebugger, HostError, IpcPaths, MemoryAccess, MemoryError};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::PathBuf;

/// 命令列を1つずつ実行していくホストデバッガ
///
/// `x/i $pc` は現在の命令を返し、`stepi` / `nexti` で次の命令に進みます。
/// 命令列の終わりを越えるとプロセスが終了した扱いになります。
#[derive(Debug, Default)]
pub struct ScriptedHost {
    /// 命令テキスト
    pub program: Vec<String>,
    pub step: usize,
    /// コマンド → 出力
    pub responses: HashMap<String, String>,
    /// 拒否されるコマンド
    pub rejected: HashSet<String>,
    /// 式 → 評価結果
    pub evaluations: HashMap<String, String>,
    /// `p/x $<name>` の値
    pub registers: HashMap<String, u64>,
    /// 実行されたコマンド
    pub log: Vec<String>,
    pub resumed: usize,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: &[&str]) -> Self {
        Self {
            program: program.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn respond(&mut self, command: &str, output: &str) {
        self.responses.insert(command.to_string(), output.to_string());
    }

    pub fn reject(&mut self, command: &str) {
        self.rejected.insert(command.to_string());
    }

    pub fn pc(&self) -> u64 {
        self.registers
            .get("pc")
            .copied()
            .unwrap_or(0x401000 + self.step as u64 * 4)
    }

    pub fn count(&self, command: &str) -> usize {
        self.log.iter().filter(|c| *c == command).count()
    }

    fn rejection(command: &str) -> HostError {
        HostError::Command {
            command: command.to_string(),
            message: format!("No symbol \"{}\" in current context.", command),
        }
    }
}

impl HostDebugger for ScriptedHost {
    fn execute(&mut self, command: &str) -> Result<String, HostError> {
        self.log.push(command.to_string());

        if self.rejected.contains(command) {
            return Err(Self::rejection(command));
        }
        if let Some(output) = self.responses.get(command) {
            return Ok(output.clone());
        }

        match command {
            "x/i $pc" => match self.program.get(self.step) {
                Some(text) => Ok(format!("=> 0x{:x} <f+{}>:\t{}\n", self.pc(), self.step * 4, text)),
                None => Err(HostError::Exited("exited-normally".to_string())),
            },
            "stepi" | "nexti" => {
                self.step += 1;
                Ok(String::new())
            }
            _ => {
                if let Some(register) = command.strip_prefix("p/x $") {
                    let value = match register {
                        "pc" => self.pc(),
                        "eflags" => 0x246,
                        other => self.registers.get(other).copied().unwrap_or(0x10),
                    };
                    Ok(format!("$1 = 0x{:x}\n", value))
                } else {
                    Ok(String::new())
                }
            }
        }
    }

    fn evaluate(&mut self, expression: &str) -> Result<String, HostError> {
        self.log.push(format!("eval {}", expression));

        if let Some(value) = self.evaluations.get(expression) {
            return Ok(value.clone());
        }
        if expression.starts_with("$st") || expression.starts_with("$xmm") || expression == "$rax" {
            return Ok("0".to_string());
        }
        Err(Self::rejection(expression))
    }

    fn resume(&mut self) -> Result<(), HostError> {
        self.resumed += 1;
        Ok(())
    }
}

/// マップされたバイトだけを持つメモリ
#[derive(Debug, Default)]
pub struct FakeMemory {
    bytes: RefCell<BTreeMap<u64, u8>>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `address` から `data` をマップする
    pub fn map(&self, address: u64, data: &[u8]) {
        let mut bytes = self.bytes.borrow_mut();
        for (offset, byte) in data.iter().enumerate() {
            bytes.insert(address + offset as u64, *byte);
        }
    }

    /// 未マップにする
    pub fn unmap(&self, address: u64) {
        self.bytes.borrow_mut().remove(&address);
    }

    pub fn byte(&self, address: u64) -> Option<u8> {
        self.bytes.borrow().get(&address).copied()
    }

    fn fault(address: u64) -> MemoryError {
        MemoryError::Access {
            address,
            source: io::Error::from_raw_os_error(5),
        }
    }
}

impl MemoryAccess for FakeMemory {
    fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        let bytes = self.bytes.borrow();
        (address..address + size as u64)
            .map(|a| bytes.get(&a).copied().ok_or_else(|| Self::fault(a)))
            .collect()
    }

    fn write(&self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        let mut bytes = self.bytes.borrow_mut();
        let end = address + data.len() as u64;
        if let Some(missing) = (address..end).find(|a| !bytes.contains_key(a)) {
            return Err(Self::fault(missing));
        }
        for (offset, byte) in data.iter().enumerate() {
            bytes.insert(address + offset as u64, *byte);
        }
        Ok(())
    }
}

/// テストごとのIPCディレクトリ
pub fn scratch_paths(name: &str) -> IpcPaths {
    let dir: PathBuf = std::env::temp_dir().join(format!("kagami-test-{}-{}", std::process::id(), name));
    let _ = std::fs::remove_dir_all(&dir);
    let paths = IpcPaths::new(dir);
    paths.create().unwrap();
    paths
}
