//! デバッガ出力のパース
//!
//! ホストデバッガが返すテキストのパターンマッチはすべてここに集約しています。
//! 出力形式が変わった場合もこのモジュールだけを差し替えれば済むようにしています。

use crate::{Error, Result};
use regex::Regex;

/// `info frame` の解析結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDetail {
    /// フレームのベースアドレス
    pub frame_address: u64,
    /// 保存されている戻りアドレス（最外フレームでは存在しない）
    pub saved_return: Option<String>,
}

/// 逆アセンブル結果の1命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: String,
    /// `<main+4>` の中身
    pub location: Option<String>,
    /// ニーモニックとオペランド
    pub text: String,
}

/// 命令の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    Step,
    Call,
    Return,
}

/// デバッガ出力のパーサー
pub struct OutputParser {
    /// バックトレースのフレーム行
    /// 例: `#10 0x000000000040c45a in _start ()`
    backtrace_frame: Regex,
    /// 例: `Stack level 0, frame at 0x7ffe1e989950:`
    frame_address: Regex,
    /// 例: `saved rip = 0x7f633a853fe4`
    saved_return: Regex,
    /// 例: `0x40c431 <_start>:	0x31`
    examined_location: Regex,
    /// 例: `=> 0x7f71a4dc5ff8 <poll+72>:	ret`
    instruction_line: Regex,
    return_mnemonic: Regex,
    call_mnemonic: Regex,
    hex: Regex,
}

impl OutputParser {
    /// パーサーを作成する
    pub fn new() -> Result<Self> {
        Ok(Self {
            backtrace_frame: Regex::new(r"(?m)^#(\d+)\s+\S")?,
            frame_address: Regex::new(r"frame\s+at\s+(0x[0-9a-fA-F]+)")?,
            saved_return: Regex::new(r"saved\s+\w+\s*=\s*(0x[0-9a-fA-F]+)")?,
            examined_location: Regex::new(r"(?m)^\s*(0x[0-9a-fA-F]+(?:\s+<.*>)?):")?,
            instruction_line: Regex::new(r"(?m)^(?:=>)?\s*(0x[0-9a-fA-F]+)(?:\s+<(.*)>)?:\s*(.*?)\s*$")?,
            return_mnemonic: Regex::new(r"^(?:(?:rep[a-z]*|bnd|notrack)\s+)*ret[a-z]*\b")?,
            call_mnemonic: Regex::new(r"^(?:(?:bnd|notrack|data16)\s+)*call[a-z]*\b")?,
            hex: Regex::new(r"0x[0-9a-fA-F]+")?,
        })
    }

    /// バックトレース出力から最大のフレーム番号を取得する
    ///
    /// フレーム行が1つもない場合は `Error::Parse` を返します。
    pub fn backtrace_depth(&self, backtrace: &str) -> Result<usize> {
        self.backtrace_frame
            .captures_iter(backtrace)
            .filter_map(|c| c[1].parse::<usize>().ok())
            .max()
            .ok_or_else(|| Error::parse(format!("no frame markers in backtrace: {:?}", backtrace.trim())))
    }

    /// `info frame` 出力を解析する
    pub fn frame_detail(&self, frame_info: &str) -> Result<FrameDetail> {
        let frame_address = self
            .frame_address
            .captures(frame_info)
            .and_then(|c| parse_address(&c[1]).ok())
            .ok_or_else(|| Error::parse(format!("no frame address in: {:?}", frame_info.trim())))?;

        let saved_return = self
            .saved_return
            .captures(frame_info)
            .map(|c| c[1].to_string());

        Ok(FrameDetail {
            frame_address,
            saved_return,
        })
    }

    /// `x/b` 出力からシンボル付きアドレスを取り出す
    ///
    /// 例: `0x40c431 <_start>:	0x31` -> `0x40c431 <_start>`
    pub fn examined_location(&self, examined: &str) -> Option<String> {
        self.examined_location
            .captures(examined)
            .map(|c| c[1].trim().to_string())
    }

    /// `x/i` の出力や逆アセンブルの1行を解析する
    pub fn instruction(&self, line: &str) -> Result<Instruction> {
        self.instructions(line)
            .into_iter()
            .next()
            .ok_or_else(|| Error::parse(format!("no instruction in: {:?}", line.trim())))
    }

    /// 逆アセンブル出力の命令行をすべて取り出す
    pub fn instructions(&self, disassembly: &str) -> Vec<Instruction> {
        self.instruction_line
            .captures_iter(disassembly)
            .map(|c| Instruction {
                address: c[1].to_string(),
                location: c.get(2).map(|m| m.as_str().to_string()),
                text: c[3].to_string(),
            })
            .collect()
    }

    /// 逆アセンブル出力の最後の命令のアドレス
    pub fn last_instruction_address(&self, disassembly: &str) -> Option<String> {
        self.instructions(disassembly).pop().map(|i| i.address)
    }

    /// 命令テキスト（ニーモニック以降）を分類する
    pub fn classify(&self, text: &str) -> InstructionKind {
        let text = text.trim();
        if self.return_mnemonic.is_match(text) {
            InstructionKind::Return
        } else if self.call_mnemonic.is_match(text) {
            InstructionKind::Call
        } else {
            InstructionKind::Step
        }
    }

    /// テキスト中の最初の16進アドレスを取り出す
    ///
    /// 例: `$6 = 0x7f0bc0b6bb40` -> `0x7f0bc0b6bb40`
    pub fn extract_address(&self, text: &str) -> Option<String> {
        self.hex.find(text).map(|m| m.as_str().to_string())
    }

    /// テキスト中の最初の16進アドレスを数値として取り出す
    pub fn extract_value(&self, text: &str) -> Option<u64> {
        self.extract_address(text).and_then(|a| parse_address(&a).ok())
    }
}

/// アドレス文字列をu64にパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート
///
/// # Examples
/// ```
/// use kagami_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
            .map_err(|e| Error::parse(format!("Invalid hexadecimal address '{}': {}", s, e)))
    } else {
        s.parse::<u64>()
            .map_err(|e| Error::parse(format!("Invalid address '{}': {}", s, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKTRACE: &str = "\
#0  0x00007f633a8ea0ca in __GI___poll (fds=0x7ffe1e989a20, nfds=1, timeout=-1) at ../sysdeps/unix/sysv/linux/poll.c:29
#1  0x000000000040c45a in event_loop () at main.c:40
#2  0x00007f633a853fe4 in __libc_start_main () from /lib/libc.so.6
#3  0x000000000040c431 in _start ()
";

    const FRAME_INFO: &str = "\
Stack level 1, frame at 0x7ffe1e989950:
 rip = 0x40c45a in event_loop (main.c:40); saved rip = 0x7f633a853fe4
 caller of frame at 0x7ffe1e989920
 source language c.
 Arglist at 0x7ffe1e989940, args:
 Locals at 0x7ffe1e989940, Previous frame's sp is 0x7ffe1e989950
 Saved registers:
  rbp at 0x7ffe1e989940, rip at 0x7ffe1e989948
";

    fn parser() -> OutputParser {
        OutputParser::new().unwrap()
    }

    #[test]
    fn test_backtrace_depth() {
        assert_eq!(parser().backtrace_depth(BACKTRACE).unwrap(), 3);
    }

    #[test]
    fn test_backtrace_depth_frame_without_address() {
        let bt = "#0  main () at t.c:3\n";
        assert_eq!(parser().backtrace_depth(bt).unwrap(), 0);
    }

    #[test]
    fn test_backtrace_depth_empty_is_parse_error() {
        let err = parser().backtrace_depth("No stack.\n").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(parser().backtrace_depth("").is_err());
    }

    #[test]
    fn test_frame_detail() {
        let detail = parser().frame_detail(FRAME_INFO).unwrap();
        assert_eq!(detail.frame_address, 0x7ffe1e989950);
        assert_eq!(detail.saved_return.as_deref(), Some("0x7f633a853fe4"));
    }

    #[test]
    fn test_frame_detail_outermost() {
        let info = "Stack level 3, frame at 0x0:\n rip = 0x40c431 in _start; saved rip = <not saved>\n Outermost frame: outermost\n";
        let detail = parser().frame_detail(info).unwrap();
        assert_eq!(detail.frame_address, 0);
        assert_eq!(detail.saved_return, None);
    }

    #[test]
    fn test_examined_location() {
        let p = parser();
        assert_eq!(
            p.examined_location("0x40c431 <_start>:\t0x31\n").as_deref(),
            Some("0x40c431 <_start>")
        );
        assert_eq!(
            p.examined_location("0x401136 <ns::run()+4>:\t0x90\n").as_deref(),
            Some("0x401136 <ns::run()+4>")
        );
        assert_eq!(p.examined_location("0x401000:\t0x55\n").as_deref(), Some("0x401000"));
        assert_eq!(p.examined_location("Cannot access memory"), None);
    }

    #[test]
    fn test_instruction_from_examine() {
        let insn = parser()
            .instruction("=> 0x7f71a4dc5fe4 <poll+52>:\tcall   0x7f71a4de1100 <__poll_chk>\n")
            .unwrap();
        assert_eq!(insn.address, "0x7f71a4dc5fe4");
        assert_eq!(insn.location.as_deref(), Some("poll+52"));
        assert_eq!(insn.text, "call   0x7f71a4de1100 <__poll_chk>");
    }

    #[test]
    fn test_last_instruction_address() {
        let disas = "\
Dump of assembler code from 0x401108 to 0x401126:
   0x0000000000401108 <main+0>:\tpush   rbp
   0x0000000000401109 <main+1>:\tmov    rbp,rsp
   0x000000000040110c <main+4>:\tmov    DWORD PTR [rip+0x2f0a],0x1
End of assembler dump.
";
        assert_eq!(
            parser().last_instruction_address(disas).as_deref(),
            Some("0x000000000040110c")
        );
        assert_eq!(parser().last_instruction_address("End of assembler dump.\n"), None);
    }

    #[test]
    fn test_classify() {
        let p = parser();
        assert_eq!(p.classify("ret"), InstructionKind::Return);
        assert_eq!(p.classify("retq   "), InstructionKind::Return);
        assert_eq!(p.classify("repz ret"), InstructionKind::Return);
        assert_eq!(p.classify("bnd ret"), InstructionKind::Return);
        assert_eq!(p.classify("call   0x401000 <foo>"), InstructionKind::Call);
        assert_eq!(p.classify("callq  *%rax"), InstructionKind::Call);
        assert_eq!(p.classify("mov    eax,0x0"), InstructionKind::Step);
        assert_eq!(p.classify("lea    rdi,[rip+0xe9c]        # 0x402004 <ret_value>"), InstructionKind::Step);
    }

    #[test]
    fn test_extract_address() {
        let p = parser();
        assert_eq!(p.extract_address("$6 = 0x7f0bc0b6bb40\n").as_deref(), Some("0x7f0bc0b6bb40"));
        assert_eq!(p.extract_value("$1 = 0x246"), Some(0x246));
        assert_eq!(p.extract_value("$1 = void"), None);
    }

    #[test]
    fn test_parse_address_hex() {
        assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0X1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0xABCD").unwrap(), 0xabcd);
    }

    #[test]
    fn test_parse_address_dec() {
        assert_eq!(parse_address("1234").unwrap(), 1234);
    }

    #[test]
    fn test_parse_address_invalid() {
        assert!(parse_address("xyz").is_err());
        assert!(parse_address("0xghij").is_err());
        assert!(parse_address("$rsp+8").is_err());
    }
}
