//! メモリアクセス機能

use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io::{self, Read as _, Seek, SeekFrom, Write as _};
use std::path::PathBuf;

/// メモリアクセスのエラー
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// 指定アドレスへのアクセスに失敗した（未マップ領域、権限など）
    #[error("Can't access the address 0x{address:x}: {source}")]
    Access {
        address: u64,
        #[source]
        source: io::Error,
    },
    /// メモリデバイス自体が開けない（プロセスが終了した等）
    #[error("Memory device {} is unavailable: {source}", path.display())]
    Device {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MemoryError {
    /// 処理の継続が不可能なエラーかどうか
    pub fn is_fatal(&self) -> bool {
        matches!(self, MemoryError::Device { .. })
    }

    /// アクセスに失敗したアドレス
    pub fn address(&self) -> Option<u64> {
        match self {
            MemoryError::Access { address, .. } => Some(*address),
            MemoryError::Device { .. } => None,
        }
    }
}

/// inferior のメモリへの読み書き
///
/// コア側のコンポーネントはこのトレイト越しにメモリへアクセスするため、
/// テストではメモリ上のバイト列で置き換えられます。
pub trait MemoryAccess {
    /// `address` から `size` バイトを読み取る
    fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError>;

    /// `address` に `data` を書き込む
    fn write(&self, address: u64, data: &[u8]) -> Result<(), MemoryError>;
}

/// /proc/pid/mem を使ったメモリアクセス
///
/// キャッシュは持たず、アクセスのたびにデバイスを開き直します。
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> PathBuf {
        PathBuf::from(format!("/proc/{}/mem", self.pid))
    }

    fn open(&self, write: bool) -> Result<File, MemoryError> {
        let path = self.mem_path();
        OpenOptions::new()
            .read(!write)
            .write(write)
            .open(&path)
            .map_err(|source| MemoryError::Device { path, source })
    }
}

impl MemoryAccess for Memory {
    fn read(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        let mut file = self.open(false)?;
        let access = |source| MemoryError::Access { address, source };

        file.seek(SeekFrom::Start(address)).map_err(access)?;

        // 読めた分だけバッファを伸ばす
        let mut buffer = Vec::new();
        file.take(size as u64).read_to_end(&mut buffer).map_err(access)?;
        if buffer.len() < size {
            return Err(access(io::ErrorKind::UnexpectedEof.into()));
        }

        Ok(buffer)
    }

    fn write(&self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        let mut file = self.open(true)?;
        let access = |source| MemoryError::Access { address, source };

        file.seek(SeekFrom::Start(address)).map_err(access)?;
        file.write_all(data).map_err(access)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_own_memory() {
        let value: u64 = 0x1122_3344_5566_7788;
        let memory = Memory::new(std::process::id() as i32);
        let addr = &value as *const u64 as u64;

        let bytes = memory.read(addr, 8).unwrap();
        assert_eq!(bytes, value.to_le_bytes());
    }

    #[test]
    fn test_unmapped_read_reports_address() {
        let memory = Memory::new(std::process::id() as i32);
        let err = memory.read(0, 8).unwrap_err();
        assert_eq!(err.address(), Some(0));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_huge_read_fails_without_allocating() {
        let memory = Memory::new(std::process::id() as i32);
        let err = memory.read(0, 1 << 50).unwrap_err();
        assert_eq!(err.address(), Some(0));
    }

    #[test]
    fn test_missing_device_is_fatal() {
        // pid 0 は /proc に存在しない
        let memory = Memory::new(0);
        let err = memory.read(0x1000, 1).unwrap_err();
        assert!(err.is_fatal());
    }
}
