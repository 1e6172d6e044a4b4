//! GDB/MI セッション
//!
//! `gdb --interpreter=mi2` を子プロセスとして起動し、パイプ越しにコマンドを送ります。
//! コンソールコマンドは `-interpreter-exec console` で包み、`~` ストリームを出力として集めます。

use crate::host::{HostDebugger, HostError};
use crate::mi::{self, Record, ResultClass, StreamKind};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, warn};

/// セッション開始直後に流す設定コマンド
const SETUP_COMMANDS: &[&str] = &[
    "set pagination off",
    "set confirm off",
    "set width 0",
    "set height 0",
];

/// 1つのコマンドの完了結果
struct Completion {
    console: String,
    results: String,
}

/// GDBプロセスとのMIセッション
pub struct GdbSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_token: u64,
}

impl GdbSession {
    /// GDBを起動して指定pidのプロセスにアタッチする
    pub fn attach(gdb: &Path, pid: i32) -> Result<Self, HostError> {
        let mut child = Command::new(gdb)
            .args(["--interpreter=mi2", "-q", "-nx", "-p"])
            .arg(pid.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::Protocol("gdb stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Protocol("gdb stdout is not piped".to_string()))?;

        let mut session = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_token: 1,
        };

        // アタッチ時の出力を最初のプロンプトまで読み捨てる
        loop {
            match session.read_record()? {
                Record::Prompt => break,
                Record::Stream {
                    kind: StreamKind::Log,
                    text,
                } => debug!("gdb: {}", text.trim_end()),
                _ => {}
            }
        }

        for command in SETUP_COMMANDS {
            session.execute(command)?;
        }

        Ok(session)
    }

    fn read_record(&mut self) -> Result<Record, HostError> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(HostError::Terminated);
        }
        Ok(mi::parse_record(&line))
    }

    fn send(&mut self, operation: &str) -> Result<u64, HostError> {
        let token = self.next_token;
        self.next_token += 1;
        debug!("-> {}{}", token, operation);
        writeln!(self.stdin, "{}{}", token, operation)?;
        self.stdin.flush()?;
        Ok(token)
    }

    /// MI操作を送り、完了まで待つ
    ///
    /// `^running` が返った場合は `*stopped` を受け取るまで待機します。
    /// `wait_for_stop` が偽なら `^running` の時点で戻ります。
    fn run(&mut self, command: &str, operation: &str, wait_for_stop: bool) -> Result<Completion, HostError> {
        let token = self.send(operation)?;
        let mut console = String::new();
        let mut running = false;

        loop {
            match self.read_record()? {
                Record::Stream {
                    kind: StreamKind::Console,
                    text,
                } => console.push_str(&text),
                Record::Result {
                    token: Some(t),
                    class,
                    results,
                } if t == token => match class {
                    ResultClass::Done | ResultClass::Connected => {
                        return Ok(Completion { console, results })
                    }
                    ResultClass::Running if !wait_for_stop => {
                        return Ok(Completion { console, results })
                    }
                    ResultClass::Running => running = true,
                    ResultClass::Error => {
                        let message = mi::field(&results, "msg").unwrap_or(results);
                        return Err(command_error(command, message));
                    }
                    ResultClass::Exit => return Err(HostError::Terminated),
                },
                Record::Async { class, results, .. } if running && class == "stopped" => {
                    let reason = mi::field(&results, "reason").unwrap_or_default();
                    if reason.starts_with("exited") {
                        return Err(HostError::Exited(reason));
                    }
                    return Ok(Completion { console, results });
                }
                Record::Unknown(line) => warn!("unrecognized MI output: {}", line),
                _ => {}
            }
        }
    }
}

fn command_error(command: &str, message: String) -> HostError {
    if message.contains("The program is not being run") || message.contains("No registers") {
        HostError::Exited(message)
    } else {
        HostError::Command {
            command: command.to_string(),
            message,
        }
    }
}

impl HostDebugger for GdbSession {
    fn execute(&mut self, command: &str) -> Result<String, HostError> {
        let operation = format!("-interpreter-exec console {}", mi::quote(command));
        self.run(command, &operation, true).map(|c| c.console)
    }

    fn evaluate(&mut self, expression: &str) -> Result<String, HostError> {
        let operation = format!("-data-evaluate-expression {}", mi::quote(expression));
        let completion = self.run(expression, &operation, true)?;
        mi::field(&completion.results, "value").ok_or_else(|| {
            HostError::Protocol(format!("no value in evaluation result: {}", completion.results))
        })
    }

    fn resume(&mut self) -> Result<(), HostError> {
        self.run("continue", "-exec-continue", false).map(|_| ())
    }
}

impl Drop for GdbSession {
    fn drop(&mut self) {
        // デタッチしてから終了させる
        let _ = writeln!(self.stdin, "-target-detach");
        let _ = writeln!(self.stdin, "-gdb-exit");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}
