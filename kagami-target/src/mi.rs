//! GDB/MI レコードのパース
//!
//! MI出力は1行1レコードです。
//! 例:
//! ```text
//! ~"0x0000000000401126 in main ()\n"
//! 12^done,value="42"
//! *stopped,reason="end-stepping-range",thread-id="1"
//! (gdb)
//! ```

/// ストリームレコードの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `~` コンソール出力
    Console,
    /// `@` ターゲット出力
    Target,
    /// `&` デバッガ内部ログ（エラーメッセージやコマンドのエコー）
    Log,
}

/// 結果レコードのクラス
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

/// MI出力の1レコード
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// `(gdb)` プロンプト
    Prompt,
    Stream {
        kind: StreamKind,
        text: String,
    },
    /// `^` で始まる結果レコード
    Result {
        token: Option<u64>,
        class: ResultClass,
        results: String,
    },
    /// `*` `+` `=` で始まる非同期レコード
    Async {
        token: Option<u64>,
        class: String,
        results: String,
    },
    Unknown(String),
}

/// 1行をレコードとしてパースする
pub fn parse_record(line: &str) -> Record {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim_end() == "(gdb)" {
        return Record::Prompt;
    }

    let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
    let (token, rest) = line.split_at(digits);
    let token = token.parse::<u64>().ok();

    let mut chars = rest.chars();
    match chars.next() {
        Some(marker @ ('~' | '@' | '&')) => {
            let kind = match marker {
                '~' => StreamKind::Console,
                '@' => StreamKind::Target,
                _ => StreamKind::Log,
            };
            match parse_c_string(chars.as_str()) {
                Some((text, _)) => Record::Stream { kind, text },
                None => Record::Unknown(line.to_string()),
            }
        }
        Some('^') => {
            let (class, results) = split_class(chars.as_str());
            let class = match class {
                "done" => ResultClass::Done,
                "running" => ResultClass::Running,
                "connected" => ResultClass::Connected,
                "error" => ResultClass::Error,
                "exit" => ResultClass::Exit,
                _ => return Record::Unknown(line.to_string()),
            };
            Record::Result {
                token,
                class,
                results: results.to_string(),
            }
        }
        Some('*' | '+' | '=') => {
            let (class, results) = split_class(chars.as_str());
            Record::Async {
                token,
                class: class.to_string(),
                results: results.to_string(),
            }
        }
        _ => Record::Unknown(line.to_string()),
    }
}

fn split_class(body: &str) -> (&str, &str) {
    body.split_once(',').unwrap_or((body, ""))
}

/// Cスタイルの文字列リテラルをパースする
///
/// 入力は `"` で始まる必要があります。戻り値は (デコード済み文字列, 閉じ引用符以降の残り)。
pub fn parse_c_string(input: &str) -> Option<(String, &str)> {
    let bytes = input.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let text = String::from_utf8_lossy(&out).into_owned();
                return Some((text, &input[i + 1..]));
            }
            b'\\' => {
                let escaped = *bytes.get(i + 1)?;
                i += 2;
                match escaped {
                    b'n' => out.push(b'\n'),
                    b't' => out.push(b'\t'),
                    b'r' => out.push(b'\r'),
                    b'e' => out.push(0x1b),
                    b'0'..=b'7' => {
                        // 8進数エスケープ（最大3桁）
                        let mut value = u32::from(escaped - b'0');
                        let mut taken = 0;
                        while taken < 2 {
                            match bytes.get(i) {
                                Some(d @ b'0'..=b'7') => {
                                    value = value * 8 + u32::from(d - b'0');
                                    i += 1;
                                    taken += 1;
                                }
                                _ => break,
                            }
                        }
                        out.push(value as u8);
                    }
                    other => out.push(other),
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    None
}

/// 結果リストからトップレベルの `name="..."` の値を取り出す
pub fn field(results: &str, name: &str) -> Option<String> {
    let pattern = format!("{}=\"", name);
    let mut offset = 0;

    while let Some(pos) = results[offset..].find(&pattern) {
        let start = offset + pos;
        if start == 0 || results.as_bytes()[start - 1] == b',' {
            return parse_c_string(&results[start + name.len() + 1..]).map(|(value, _)| value);
        }
        offset = start + pattern.len();
    }

    None
}

/// 文字列をMIコマンド引数用のCスタイル文字列にする
pub fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
