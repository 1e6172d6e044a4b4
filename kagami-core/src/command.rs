//! フロントエンドからのリクエスト

/// リクエスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// 複数アドレスの読み取り
    ReadMultipleAddresses,
    /// 複数アドレスへの書き込み
    SetMultipleAddresses,
    /// 1アドレスの読み取り
    ReadSingleAddress,
    /// コンビニエンス変数・式の評価
    ParseConvenienceVariables,
    /// 汎用・フラグ・セグメントレジスタ
    ReadRegisters,
    /// 浮動小数点レジスタ
    ReadFloatRegisters,
    /// 全フレームの戻りアドレスとフレーム位置
    GetStackTraceInfo,
    /// スタックダンプ
    GetStackInfo,
    /// 全フレームの戻りアドレス
    GetFrameReturnAddresses,
    /// 1フレームの情報
    GetFrameInfo,
    /// 16進ダンプ
    HexDump,
    /// デバッガコマンドを実行して出力を返す
    CliOutput(String),
    /// デバッガコマンドを実行し、エラーを無視する
    IgnoreErrors(String),
    /// ウォッチポイントのトラップを記録
    TrackWatchpoint(String),
    /// ブレークポイントのトラップを記録
    TrackBreakpoint(String),
    /// 命令トレース
    TraceInstructions,
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Request {
    /// リクエスト行をパースする
    ///
    /// 名前が不明な場合や、必要な引数がない場合は `None` を返します。
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        let (name, argument) = match input.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (input, ""),
        };
        let argument = || {
            if argument.is_empty() {
                None
            } else {
                Some(argument.to_string())
            }
        };

        match name {
            "read-multiple-addresses" => Some(Request::ReadMultipleAddresses),
            "set-multiple-addresses" => Some(Request::SetMultipleAddresses),
            "read-single-address" => Some(Request::ReadSingleAddress),
            "parse-convenience-variables" => Some(Request::ParseConvenienceVariables),
            "read-registers" => Some(Request::ReadRegisters),
            "read-float-registers" => Some(Request::ReadFloatRegisters),
            "get-stack-trace-info" => Some(Request::GetStackTraceInfo),
            "get-stack-info" => Some(Request::GetStackInfo),
            "get-frame-return-addresses" => Some(Request::GetFrameReturnAddresses),
            "get-frame-info" => Some(Request::GetFrameInfo),
            "hex-dump" => Some(Request::HexDump),
            "cli-output" => argument().map(Request::CliOutput),
            "ignore-errors" => argument().map(Request::IgnoreErrors),
            "track-watchpoint" => argument().map(Request::TrackWatchpoint),
            "track-breakpoint" => argument().map(Request::TrackBreakpoint),
            "trace-instructions" => Some(Request::TraceInstructions),
            "help" | "h" | "?" => Some(Request::Help),
            "quit" | "q" | "exit" => Some(Request::Quit),
            _ => None,
        }
    }

    /// リクエスト名の一覧（ヘルプ表示用）
    pub fn names() -> &'static [(&'static str, &'static str)] {
        &[
            ("read-multiple-addresses", "Read typed values at multiple addresses"),
            ("set-multiple-addresses", "Write one value to multiple addresses"),
            ("read-single-address", "Read a typed value at one address"),
            ("parse-convenience-variables", "Evaluate expressions to addresses"),
            ("read-registers", "Read general, flag and segment registers"),
            ("read-float-registers", "Read floating-point registers"),
            ("get-stack-trace-info", "Return addresses and frame positions"),
            ("get-stack-info", "Dump the stack from the stack pointer"),
            ("get-frame-return-addresses", "Return addresses of all frames"),
            ("get-frame-info", "Description of one frame"),
            ("hex-dump", "Hex dump of a memory range"),
            ("cli-output <command>", "Run a debugger command and return its output"),
            ("ignore-errors <command>", "Run a debugger command ignoring errors"),
            ("track-watchpoint <numbers>", "Record a watchpoint hit"),
            ("track-breakpoint <exprs>,<id>", "Record expression values at a breakpoint"),
            ("trace-instructions", "Trace instructions from a breakpoint"),
            ("help", "Show this help"),
            ("quit", "Exit"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        assert_eq!(Request::parse("read-registers"), Some(Request::ReadRegisters));
        assert_eq!(Request::parse("  hex-dump \n"), Some(Request::HexDump));
        assert_eq!(
            Request::parse("cli-output info frame 1"),
            Some(Request::CliOutput("info frame 1".to_string()))
        );
        assert_eq!(
            Request::parse("track-breakpoint $rax,$rbx,3"),
            Some(Request::TrackBreakpoint("$rax,$rbx,3".to_string()))
        );
        assert_eq!(
            Request::parse("track-watchpoint [1, 2]"),
            Some(Request::TrackWatchpoint("[1, 2]".to_string()))
        );
        assert_eq!(Request::parse("quit"), Some(Request::Quit));
    }

    #[test]
    fn test_parse_invalid_requests() {
        assert_eq!(Request::parse(""), None);
        assert_eq!(Request::parse("frobnicate"), None);
        assert_eq!(Request::parse("cli-output"), None);
        assert_eq!(Request::parse("track-watchpoint   "), None);
    }
}
