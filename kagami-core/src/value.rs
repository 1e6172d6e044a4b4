//! 値の型とデコード
//!
//! フロントエンドは読み書きする値の型をスロット番号で指定します。
//! メモリ上の表現はすべてリトルエンディアンです。

use crate::{Error, Result};
use serde::{Serialize, Serializer};

/// 値の型（スロット番号で指定される）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// 文字列（1バイトまたは2バイト単位）
    String,
    /// バイト列
    Bytes,
    I8,
    I16,
    I32,
    I64,
}

/// 文字列・バイト列の読み取りオプション
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// 文字数（ワイド文字なら2バイト単位）またはバイト数
    pub length: usize,
    /// UTF-16として読むかどうか
    pub is_wide: bool,
    /// 終端のヌル文字で打ち切るかどうか
    pub zero_terminate: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            length: 0,
            is_wide: false,
            zero_terminate: true,
        }
    }
}

/// 読み取り結果
///
/// 読み取れなかった要素は `Unreadable`（JSONでは `null`）になり、
/// バッチ内の位置はずれません。
/// NaNや無限大は `null` と区別するため文字列で出力します。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadValue {
    Unsigned(u64),
    Signed(i64),
    #[serde(serialize_with = "serialize_float")]
    Float(f64),
    Text(String),
    Unreadable,
}

impl ValueType {
    /// スロット番号から型を取得する
    pub fn from_index(index: u64) -> Option<Self> {
        let value_type = match index {
            0 => ValueType::U8,
            1 => ValueType::U16,
            2 => ValueType::U32,
            3 => ValueType::U64,
            4 => ValueType::F32,
            5 => ValueType::F64,
            6 => ValueType::String,
            7 => ValueType::Bytes,
            8 => ValueType::I8,
            9 => ValueType::I16,
            10 => ValueType::I32,
            11 => ValueType::I64,
            _ => return None,
        };
        Some(value_type)
    }

    /// スカラー型の幅（バイト数）
    pub fn width(self) -> Option<usize> {
        match self {
            ValueType::U8 | ValueType::I8 => Some(1),
            ValueType::U16 | ValueType::I16 => Some(2),
            ValueType::U32 | ValueType::I32 | ValueType::F32 => Some(4),
            ValueType::U64 | ValueType::I64 | ValueType::F64 => Some(8),
            ValueType::String | ValueType::Bytes => None,
        }
    }

    /// 読み取るバイト数
    ///
    /// ワイド文字列のバイト数が `usize` に収まらない場合は `None` を返します。
    pub fn byte_len(self, options: &ReadOptions) -> Option<usize> {
        match self {
            ValueType::String if options.is_wide => options.length.checked_mul(2),
            ValueType::String | ValueType::Bytes => Some(options.length),
            scalar => scalar.width(),
        }
    }

    /// バイト列をデコードする
    pub fn decode(self, bytes: &[u8], options: &ReadOptions) -> ReadValue {
        match self.byte_len(options) {
            Some(size) if bytes.len() >= size => {}
            _ => return ReadValue::Unreadable,
        }

        match self {
            ValueType::U8 => ReadValue::Unsigned(u64::from(bytes[0])),
            ValueType::U16 => ReadValue::Unsigned(u64::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
            ValueType::U32 => ReadValue::Unsigned(u64::from(u32::from_le_bytes(le4(bytes)))),
            ValueType::U64 => ReadValue::Unsigned(u64::from_le_bytes(le8(bytes))),
            ValueType::I8 => ReadValue::Signed(i64::from(bytes[0] as i8)),
            ValueType::I16 => ReadValue::Signed(i64::from(i16::from_le_bytes([bytes[0], bytes[1]]))),
            ValueType::I32 => ReadValue::Signed(i64::from(i32::from_le_bytes(le4(bytes)))),
            ValueType::I64 => ReadValue::Signed(i64::from_le_bytes(le8(bytes))),
            ValueType::F32 => ReadValue::Float(f64::from(f32::from_le_bytes(le4(bytes)))),
            ValueType::F64 => ReadValue::Float(f64::from_le_bytes(le8(bytes))),
            ValueType::String => ReadValue::Text(decode_string(bytes, options)),
            ValueType::Bytes => ReadValue::Text(
                bytes
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
        }
    }

    /// テキストで与えられた値をこの型のバイト列にエンコードする
    pub fn encode(self, text: &str, is_wide: bool) -> Result<Vec<u8>> {
        let invalid = || Error::protocol(format!("invalid value {:?} for {:?}", text, self));
        let bytes = match self {
            ValueType::U8 => u8::try_from(parse_unsigned(text).ok_or_else(invalid)?)
                .map_err(|_| invalid())?
                .to_le_bytes()
                .to_vec(),
            ValueType::U16 => u16::try_from(parse_unsigned(text).ok_or_else(invalid)?)
                .map_err(|_| invalid())?
                .to_le_bytes()
                .to_vec(),
            ValueType::U32 => u32::try_from(parse_unsigned(text).ok_or_else(invalid)?)
                .map_err(|_| invalid())?
                .to_le_bytes()
                .to_vec(),
            ValueType::U64 => parse_unsigned(text).ok_or_else(invalid)?.to_le_bytes().to_vec(),
            ValueType::I8 => i8::try_from(parse_signed(text).ok_or_else(invalid)?)
                .map_err(|_| invalid())?
                .to_le_bytes()
                .to_vec(),
            ValueType::I16 => i16::try_from(parse_signed(text).ok_or_else(invalid)?)
                .map_err(|_| invalid())?
                .to_le_bytes()
                .to_vec(),
            ValueType::I32 => i32::try_from(parse_signed(text).ok_or_else(invalid)?)
                .map_err(|_| invalid())?
                .to_le_bytes()
                .to_vec(),
            ValueType::I64 => parse_signed(text).ok_or_else(invalid)?.to_le_bytes().to_vec(),
            ValueType::F32 => text
                .trim()
                .parse::<f32>()
                .map_err(|_| invalid())?
                .to_le_bytes()
                .to_vec(),
            ValueType::F64 => text
                .trim()
                .parse::<f64>()
                .map_err(|_| invalid())?
                .to_le_bytes()
                .to_vec(),
            ValueType::String if is_wide => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            ValueType::String => text.as_bytes().to_vec(),
            ValueType::Bytes => text
                .split_whitespace()
                .map(|b| u8::from_str_radix(b, 16).map_err(|_| invalid()))
                .collect::<Result<Vec<_>>>()?,
        };
        Ok(bytes)
    }
}

fn serialize_float<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    if value.is_nan() {
        serializer.serialize_str("nan")
    } else if value.is_infinite() {
        serializer.serialize_str(if *value > 0.0 { "inf" } else { "-inf" })
    } else {
        serializer.serialize_f64(*value)
    }
}

fn le4(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    let mut array = [0u8; 8];
    array.copy_from_slice(&bytes[..8]);
    array
}

fn decode_string(bytes: &[u8], options: &ReadOptions) -> String {
    if options.is_wide {
        let mut units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if options.zero_terminate {
            if let Some(end) = units.iter().position(|&u| u == 0) {
                units.truncate(end);
            }
        }
        String::from_utf16_lossy(&units)
    } else {
        let end = if options.zero_terminate {
            bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len())
        } else {
            bytes.len()
        };
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }
}

fn parse_unsigned(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn parse_signed(text: &str) -> Option<i64> {
    let text = text.trim();
    match text.strip_prefix('-') {
        Some(magnitude) => {
            let magnitude = parse_unsigned(magnitude)?;
            0i64.checked_sub_unsigned(magnitude)
        }
        None => parse_unsigned(text).and_then(|v| i64::try_from(v).ok()),
    }
}
