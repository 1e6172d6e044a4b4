//! アドレス指定での値の読み書き
//!
//! アドレスの値を型に従ってデコードする処理はすべてここを通ります。
//! バッチ内の1要素の失敗は番兵値に置き換え、他の要素の処理は続けます。

use crate::parse::{parse_address, OutputParser};
use crate::value::{ReadOptions, ReadValue, ValueType};
use crate::Result;
use kagami_target::{HostDebugger, MemoryAccess};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

/// 16進ダンプで一度に読むバイト数
const HEX_DUMP_CHUNK: usize = 4096;

/// アドレス指定（絶対アドレス、またはデバッガが解釈できる式）
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AddressExpr {
    Absolute(u64),
    Expression(String),
}

impl fmt::Display for AddressExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AddressExpr::Absolute(address) => write!(f, "0x{:x}", address),
            AddressExpr::Expression(expression) => write!(f, "{}", expression),
        }
    }
}

/// 読み取り要求の1要素
#[derive(Debug, Clone, PartialEq)]
pub struct ReadItem {
    pub address: AddressExpr,
    pub value_type: ValueType,
    pub options: ReadOptions,
}

/// 書き込み要求の1要素
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    pub address: AddressExpr,
    pub value_type: ValueType,
    /// 文字列をUTF-16で書き込むかどうか
    pub is_wide: bool,
}

/// 書き込みに失敗した要素
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub address: String,
    pub message: String,
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Can't access the address {}", self.address)
    }
}

/// 型付きのメモリ読み書き
pub struct AddressReader<'a, H, M> {
    host: &'a mut H,
    memory: &'a M,
    parser: &'a OutputParser,
}

impl<'a, H: HostDebugger, M: MemoryAccess> AddressReader<'a, H, M> {
    pub fn new(host: &'a mut H, memory: &'a M, parser: &'a OutputParser) -> Self {
        Self {
            host,
            memory,
            parser,
        }
    }

    /// アドレス指定を数値に解決する
    ///
    /// デバッガが式を評価できなかった場合は `None` を返します。
    pub fn resolve(&mut self, address: &AddressExpr) -> Result<Option<u64>> {
        let expression = match address {
            AddressExpr::Absolute(address) => return Ok(Some(*address)),
            AddressExpr::Expression(expression) => expression,
        };

        if let Ok(address) = parse_address(expression) {
            return Ok(Some(address));
        }

        match self.host.execute(&format!("p/x {}", expression)) {
            Ok(output) => Ok(self.parser.extract_value(&output)),
            Err(e) if e.is_transient() => {
                debug!("cannot resolve {}: {}", expression, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 式を評価し、デバッガが表示したままの文字列で返す
    ///
    /// 評価できなかった式は `None` になります。
    pub fn evaluate(&mut self, expression: &str) -> Result<Option<String>> {
        match self.host.evaluate(expression) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_transient() => {
                debug!("cannot evaluate {}: {}", expression, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 1つのアドレスを読み取る
    ///
    /// 読めない場合は `ReadValue::Unreadable` を返します。
    /// エラーになるのはメモリデバイスやプロセス自体が失われた場合だけです。
    pub fn read_single(&mut self, item: &ReadItem) -> Result<ReadValue> {
        let address = match self.resolve(&item.address)? {
            Some(address) => address,
            None => return Ok(ReadValue::Unreadable),
        };

        let size = match item.value_type.byte_len(&item.options) {
            Some(size) => size,
            None => return Ok(ReadValue::Unreadable),
        };
        match self.memory.read(address, size) {
            Ok(bytes) => Ok(item.value_type.decode(&bytes, &item.options)),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                debug!("{}", e);
                Ok(ReadValue::Unreadable)
            }
        }
    }

    /// 複数のアドレスを読み取る（入力と同じ順序・同じ個数で返す）
    pub fn read_multiple(&mut self, items: &[ReadItem]) -> Result<Vec<ReadValue>> {
        items.iter().map(|item| self.read_single(item)).collect()
    }

    /// 同じ値を複数のアドレスに書き込む
    ///
    /// 値が型に合わない場合は何も書き込まずにエラーを返します。
    /// 個々の書き込み失敗は失敗したアドレスとともに返し、残りの書き込みは続けます。
    pub fn write_multiple(&mut self, targets: &[WriteTarget], value: &str) -> Result<Vec<WriteFailure>> {
        let encoded = targets
            .iter()
            .map(|target| target.value_type.encode(value, target.is_wide))
            .collect::<Result<Vec<_>>>()?;

        let mut failures = Vec::new();
        for (target, bytes) in targets.iter().zip(encoded) {
            let address = &target.address;
            let resolved = match self.resolve(address)? {
                Some(resolved) => resolved,
                None => {
                    failures.push(WriteFailure {
                        address: address.to_string(),
                        message: "address expression could not be evaluated".to_string(),
                    });
                    continue;
                }
            };

            match self.memory.write(resolved, &bytes) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    let failure = WriteFailure {
                        address: address.to_string(),
                        message: e.to_string(),
                    };
                    warn!("{}: {}", failure, failure.message);
                    failures.push(failure);
                }
            }
        }

        Ok(failures)
    }

    /// `length` バイトを2桁の16進文字列で返す（読めないバイトは `??`）
    pub fn hex_dump(&mut self, address: u64, length: usize) -> Result<Vec<String>> {
        let mut dump = Vec::new();
        let mut offset = 0;
        while offset < length {
            let size = HEX_DUMP_CHUNK.min(length - offset);
            let start = address.wrapping_add(offset as u64);
            self.dump_chunk(start, size, &mut dump)?;
            offset += size;
        }
        Ok(dump)
    }

    fn dump_chunk(&mut self, address: u64, size: usize, dump: &mut Vec<String>) -> Result<()> {
        match self.memory.read(address, size) {
            Ok(bytes) if bytes.len() == size => {
                dump.extend(bytes.iter().map(|b| format!("{:02x}", b)));
                return Ok(());
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            _ => {}
        }

        // 一部が読めない場合は1バイトずつ読む
        for offset in 0..size as u64 {
            match self.memory.read(address.wrapping_add(offset), 1) {
                Ok(byte) if byte.len() == 1 => dump.push(format!("{:02x}", byte[0])),
                Err(e) if e.is_fatal() => return Err(e.into()),
                _ => dump.push("??".to_string()),
            }
        }
        Ok(())
    }
}
