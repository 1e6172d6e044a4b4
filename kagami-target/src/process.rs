//! プロセス制御機能

use nix::errno::Errno;
use nix::unistd::Pid;

/// 調査対象のプロセス
///
/// アタッチ自体はホストデバッガが行うため、ここではpidの保持と生存確認のみを扱います。
#[derive(Debug, Clone, Copy)]
pub struct Process {
    pid: Pid,
}

impl Process {
    /// pidからプロセスハンドルを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// プロセスがまだ存在するか確認する
    ///
    /// シグナル0を送って確認します。権限エラー（EPERM）はプロセスが存在することを意味します。
    pub fn is_alive(&self) -> bool {
        match nix::sys::signal::kill(self.pid, None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        let process = Process::new(std::process::id() as i32);
        assert!(process.is_alive());
        assert_eq!(process.pid(), std::process::id() as i32);
    }

    #[test]
    fn test_reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        assert!(!Process::new(pid).is_alive());
    }
}
