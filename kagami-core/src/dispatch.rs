//! リクエストの処理
//!
//! 1つのリクエストごとに、必要ならメールボックスからペイロードを読み、
//! 結果の応答を1つ書き込みます。失敗したリクエストは応答のないものでもエラー応答を書き込みます。

use crate::command::Request;
use crate::protocol::{self, Reply};
use crate::session::Session;
use crate::trace::TraceConfig;
use crate::{Error, Result};
use kagami_target::{HostDebugger, MemoryAccess};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// 1リクエストの処理結果
#[derive(Debug, Default, PartialEq)]
pub struct Outcome {
    /// メールボックスに書き込んだ応答
    pub reply: Option<Reply>,
    /// オペレータ向けのコンソール出力
    pub console: Vec<String>,
    /// 調査対象プロセスが終了した
    pub exited: bool,
    /// 終了が要求された
    pub quit: bool,
}

/// リクエストディスパッチャ
pub struct Dispatcher<H, M> {
    session: Session<H, M>,
}

impl<H: HostDebugger, M: MemoryAccess> Dispatcher<H, M> {
    pub fn new(session: Session<H, M>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session<H, M> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<H, M> {
        &mut self.session
    }

    /// リクエスト行を処理する
    pub fn handle_line(&mut self, line: &str) -> Outcome {
        let line = line.trim();
        if line.is_empty() {
            return Outcome::default();
        }

        match Request::parse(line) {
            Some(request) => self.handle(&request),
            None => {
                let name = line.split_whitespace().next().unwrap_or(line);
                let error = Error::protocol(format!("Unknown request: {}", name));
                let mut outcome = Outcome::default();
                self.fail(&mut outcome, error);
                outcome
            }
        }
    }

    /// リクエストを処理する
    pub fn handle(&mut self, request: &Request) -> Outcome {
        let mut outcome = Outcome::default();

        match request {
            Request::Help => {
                outcome.console.push("Available requests:".to_string());
                for (name, description) in Request::names() {
                    outcome.console.push(format!("  {:<32} - {}", name, description));
                }
                return outcome;
            }
            Request::Quit => {
                outcome.quit = true;
                return outcome;
            }
            _ => {}
        }

        match self.execute(request, &mut outcome.console) {
            Ok(Some(value)) => {
                let reply = Reply::Ok(value);
                self.send(&mut outcome, &reply);
                outcome.reply = Some(reply);
            }
            Ok(None) => {}
            Err(e) => self.fail(&mut outcome, e),
        }
        outcome
    }

    fn execute(&mut self, request: &Request, console: &mut Vec<String>) -> Result<Option<Value>> {
        debug!("handling {:?}", request);

        let session = &mut self.session;
        match request {
            Request::ReadMultipleAddresses => {
                let payload: Value = session.mailbox().receive()?;
                let items = protocol::read_items(&payload)?;
                reply(session.addresses().read_multiple(&items)?)
            }
            Request::SetMultipleAddresses => {
                let payload: Value = session.mailbox().receive()?;
                let (targets, value) = protocol::write_targets(&payload)?;
                let failures = session.addresses().write_multiple(&targets, &value)?;
                console.extend(failures.iter().map(|f| f.to_string()));
                Ok(None)
            }
            Request::ReadSingleAddress => {
                let payload: Value = session.mailbox().receive()?;
                let item = protocol::single_read_item(&payload)?;
                reply(session.addresses().read_single(&item)?)
            }
            Request::ParseConvenienceVariables => {
                let payload: Value = session.mailbox().receive()?;
                let expressions = protocol::expressions(&payload)?;
                let mut addresses = session.addresses();
                let values = expressions
                    .iter()
                    .map(|expression| addresses.evaluate(expression))
                    .collect::<Result<Vec<_>>>()?;
                reply(values)
            }
            Request::ReadRegisters => reply(session.registers().merged()?),
            Request::ReadFloatRegisters => reply(session.registers().floats()?),
            Request::GetStackTraceInfo => reply(session.stack().stack_trace_info()?),
            Request::GetStackInfo => reply(session.stack().stack_dump()?),
            Request::GetFrameReturnAddresses => reply(session.stack().frame_return_addresses()?),
            Request::GetFrameInfo => {
                let payload: Value = session.mailbox().receive()?;
                let index = protocol::frame_index(&payload)?;
                reply(session.stack().frame_info(index)?)
            }
            Request::HexDump => {
                let payload: Value = session.mailbox().receive()?;
                let (address, length) = protocol::hex_dump_range(&payload)?;
                let mut addresses = session.addresses();
                let dump = match addresses.resolve(&address)? {
                    Some(address) => addresses.hex_dump(address, length)?,
                    None => vec!["??".to_string(); length],
                };
                reply(dump)
            }
            Request::CliOutput(command) => {
                let output = match session.host().execute(command) {
                    Ok(output) => output,
                    Err(e) if e.is_transient() => e.to_string(),
                    Err(e) => return Err(e.into()),
                };
                console.push(output.trim_end().to_string());
                reply(output)
            }
            Request::IgnoreErrors(command) => {
                match session.host().execute(command) {
                    Ok(_) => {}
                    Err(e) if e.is_transient() => debug!("ignored: {}", e),
                    Err(e) => return Err(e.into()),
                }
                Ok(None)
            }
            Request::TrackWatchpoint(watchpoints) => {
                session.track_watchpoint(watchpoints)?;
                Ok(None)
            }
            Request::TrackBreakpoint(argument) => {
                session.track_breakpoint(argument)?;
                Ok(None)
            }
            Request::TraceInstructions => {
                let config: TraceConfig = session.mailbox().receive()?;
                session.tracer().run(&config)?;
                Ok(None)
            }
            Request::Help | Request::Quit => Ok(None),
        }
    }

    fn fail(&self, outcome: &mut Outcome, error: Error) {
        outcome.console.push(format!("Error: {}", error));
        outcome.exited = matches!(error, Error::InferiorExited(_));

        let reply = Reply::from_error(&error);
        self.send(outcome, &reply);
        outcome.reply = Some(reply);
    }

    fn send(&self, outcome: &mut Outcome, reply: &Reply) {
        if let Err(e) = self.session.mailbox().send(reply) {
            warn!("failed to write reply: {}", e);
            outcome.console.push(format!("Error: {}", e));
        }
    }
}

fn reply<T: Serialize>(value: T) -> Result<Option<Value>> {
    Ok(Some(serde_json::to_value(value)?))
}
