//! メールボックスのペイロード形式
//!
//! フロントエンドは位置で意味の決まるJSON配列を送ってきます。
//! ここで型付きの値に変換し、形が合わないものは `Error::Protocol` にします。

use crate::address::{AddressExpr, ReadItem, WriteTarget};
use crate::error::{Error, ErrorKind};
use crate::value::{ReadOptions, ValueType};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ペイロードで指定できる長さの上限
pub const MAX_LENGTH: u64 = 1 << 20;

/// 応答
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Reply {
    Ok(Value),
    Error(ErrorReply),
}

/// エラー応答の中身
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReply {
    pub kind: ErrorKind,
    pub message: String,
}

impl Reply {
    pub fn from_error(error: &Error) -> Self {
        Reply::Error(ErrorReply {
            kind: error.kind(),
            message: error.to_string(),
        })
    }
}

/// `[address, slot, length?, is_wide?, zero_terminate?]`
pub fn read_item(value: &Value) -> Result<ReadItem> {
    let fields = array(value, "read item")?;
    if fields.len() < 2 || fields.len() > 5 {
        return Err(Error::protocol(format!(
            "read item must have 2 to 5 elements, got {}",
            fields.len()
        )));
    }

    let defaults = ReadOptions::default();
    let options = ReadOptions {
        length: match fields.get(2) {
            Some(field) => length(field)?,
            None => defaults.length,
        },
        is_wide: match fields.get(3) {
            Some(flag) => boolean(flag, "is_wide")?,
            None => defaults.is_wide,
        },
        zero_terminate: match fields.get(4) {
            Some(flag) => boolean(flag, "zero_terminate")?,
            None => defaults.zero_terminate,
        },
    };

    Ok(ReadItem {
        address: address(&fields[0])?,
        value_type: value_type(&fields[1])?,
        options,
    })
}

/// 複数アドレスの読み取り要求
pub fn read_items(payload: &Value) -> Result<Vec<ReadItem>> {
    array(payload, "read request")?.iter().map(read_item).collect()
}

/// 1アドレスの読み取り要求（要素は必ず5つ）
pub fn single_read_item(payload: &Value) -> Result<ReadItem> {
    let fields = array(payload, "read request")?;
    if fields.len() != 5 {
        return Err(Error::protocol(format!(
            "single read must have exactly 5 elements, got {}",
            fields.len()
        )));
    }
    read_item(payload)
}

/// `[[address, slot, is_wide?], ..., value]`
///
/// 最後の要素がすべてのアドレスに書き込む値です。
pub fn write_targets(payload: &Value) -> Result<(Vec<WriteTarget>, String)> {
    let elements = array(payload, "write request")?;
    let (value, targets) = match elements.split_last() {
        Some(split) => split,
        None => return Err(Error::protocol("write request is empty")),
    };

    let value = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        other => return Err(Error::protocol(format!("write value must be a string or a number, got {}", other))),
    };

    let targets = targets
        .iter()
        .map(|target| {
            let fields = array(target, "write target")?;
            if fields.len() < 2 || fields.len() > 3 {
                return Err(Error::protocol(format!(
                    "write target must have 2 or 3 elements, got {}",
                    fields.len()
                )));
            }
            Ok(WriteTarget {
                address: address(&fields[0])?,
                value_type: value_type(&fields[1])?,
                is_wide: match fields.get(2) {
                    Some(flag) => boolean(flag, "is_wide")?,
                    None => false,
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((targets, value))
}

/// 評価する式の一覧
pub fn expressions(payload: &Value) -> Result<Vec<String>> {
    array(payload, "expression list")?
        .iter()
        .map(|expression| match expression {
            Value::String(text) => Ok(text.clone()),
            other => Err(Error::protocol(format!("expression must be a string, got {}", other))),
        })
        .collect()
}

/// フレーム番号（文字列または数値）
pub fn frame_index(payload: &Value) -> Result<i64> {
    match payload {
        Value::String(text) => text
            .trim()
            .parse()
            .map_err(|_| Error::protocol(format!("invalid frame index {:?}", text))),
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| Error::protocol(format!("invalid frame index {}", number))),
        other => Err(Error::protocol(format!("frame index must be a string or a number, got {}", other))),
    }
}

/// `[address, length]`
pub fn hex_dump_range(payload: &Value) -> Result<(AddressExpr, usize)> {
    let fields = array(payload, "hex dump request")?;
    if fields.len() != 2 {
        return Err(Error::protocol(format!(
            "hex dump request must have exactly 2 elements, got {}",
            fields.len()
        )));
    }
    Ok((address(&fields[0])?, length(&fields[1])?))
}

fn array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| Error::protocol(format!("{} must be an array, got {}", what, value)))
}

fn address(value: &Value) -> Result<AddressExpr> {
    AddressExpr::deserialize(value)
        .map_err(|_| Error::protocol(format!("invalid address {}", value)))
}

fn value_type(value: &Value) -> Result<ValueType> {
    let slot = index(value, "value type")?;
    ValueType::from_index(slot).ok_or_else(|| Error::protocol(format!("unknown value type {}", slot)))
}

fn index(value: &Value, what: &str) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| Error::protocol(format!("{} must be a non-negative integer, got {}", what, value)))
}

fn length(value: &Value) -> Result<usize> {
    let length = index(value, "length")?;
    if length > MAX_LENGTH {
        return Err(Error::protocol(format!("length {} exceeds the limit of {}", length, MAX_LENGTH)));
    }
    Ok(length as usize)
}

fn boolean(value: &Value, what: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::protocol(format!("{} must be a boolean, got {}", what, value)))
}
