//! ウォッチポイント/ブレークポイントのヒット集計
//!
//! トラップのたびに呼ばれ、セッション中ずっと状態を積み上げます。
//! 更新のたびに集計全体をIPCディレクトリに書き出し、フロントエンドがポーリングできるようにします。

use crate::parse::OutputParser;
use crate::registers::{Arch, RegisterMap, RegisterSnapshot};
use crate::store::{self, IpcPaths};
use crate::{Error, Result};
use indexmap::IndexMap;
use kagami_target::HostDebugger;
use serde::Serialize;
use tracing::{debug, warn};

/// 直前の命令を探すために逆アセンブルするバイト数
const PREVIOUS_INSTRUCTION_SPAN: u64 = 30;

/// ヒット時に表示する逆アセンブル範囲
const DISASSEMBLY_WINDOW: u64 = 40;

/// あるPCでのウォッチポイントヒット情報
///
/// コンテキスト（レジスタ、逆アセンブル）は最初のヒット時のものです。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchpointHit {
    pub hit_count: u64,
    pub previous_instruction_address: String,
    pub registers: RegisterMap,
    pub float_registers: RegisterMap,
    pub disassembly: String,
}

/// PC → ヒット情報（最初に観測した順）
pub type WatchpointGroup = IndexMap<u64, WatchpointHit>;

/// 式 → 解決したアドレス → 回数
pub type ExpressionHistogram = IndexMap<String, IndexMap<String, u64>>;

/// ウォッチポイントヒットの集計
#[derive(Debug, Default)]
pub struct WatchpointTracker {
    groups: IndexMap<String, WatchpointGroup>,
}

impl WatchpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// ウォッチポイント番号の集合から正規化したグループキーを作る
    ///
    /// 例: `[2, 1]` / `1,2` / `1 2` -> `1_2`
    pub fn group_key(watchpoints: &str) -> Result<String> {
        let mut numbers: Vec<u64> = watchpoints
            .split(|c: char| !c.is_ascii_digit())
            .filter_map(|n| n.parse().ok())
            .collect();
        if numbers.is_empty() {
            return Err(Error::protocol(format!("no watchpoint numbers in {:?}", watchpoints)));
        }
        numbers.sort_unstable();
        numbers.dedup();

        Ok(numbers
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join("_"))
    }

    /// グループの集計を取得する
    pub fn group(&self, key: &str) -> Option<&WatchpointGroup> {
        self.groups.get(key)
    }

    /// トラップを1回記録し、グループ全体を書き出す
    pub fn record_hit<H: HostDebugger>(
        &mut self,
        host: &mut H,
        parser: &OutputParser,
        arch: Arch,
        paths: &IpcPaths,
        watchpoints: &str,
    ) -> Result<&WatchpointGroup> {
        let key = Self::group_key(watchpoints)?;
        let pc = RegisterSnapshot::new(&mut *host, parser, arch).program_counter()?;

        let seen = self
            .groups
            .get(&key)
            .map_or(false, |group| group.contains_key(&pc));
        let first_hit = if seen {
            None
        } else {
            Some(capture_context(host, parser, arch, pc)?)
        };

        let group = self.groups.entry(key.clone()).or_default();
        match first_hit {
            Some(hit) => {
                group.insert(pc, hit);
            }
            None => {
                if let Some(hit) = group.get_mut(&pc) {
                    hit.hit_count += 1;
                }
            }
        }

        debug!("watchpoint group {}: pc 0x{:x} recorded", key, pc);
        store::persist(&paths.track_watchpoint(&key), group)?;
        Ok(group)
    }
}

fn capture_context<H: HostDebugger>(
    host: &mut H,
    parser: &OutputParser,
    arch: Arch,
    pc: u64,
) -> Result<WatchpointHit> {
    let previous_instruction_address = previous_instruction(host, parser, pc)?;

    let mut snapshot = RegisterSnapshot::new(&mut *host, parser, arch);
    let registers = snapshot.merged()?;
    let float_registers = snapshot.floats()?;

    let window = format!("disas {},+{}", previous_instruction_address, DISASSEMBLY_WINDOW);
    let disassembly = match host.execute(&window) {
        Ok(text) => text.replace("=>", "  "),
        Err(e) if e.is_transient() => {
            warn!("{}", e);
            String::new()
        }
        Err(e) => return Err(e.into()),
    };

    Ok(WatchpointHit {
        hit_count: 1,
        previous_instruction_address,
        registers,
        float_registers,
        disassembly,
    })
}

/// 現在のPCの直前の命令のアドレス
///
/// 逆アセンブルできない場合は現在のPCを返します。
fn previous_instruction<H: HostDebugger>(host: &mut H, parser: &OutputParser, pc: u64) -> Result<String> {
    let command = format!("disas $pc-{},$pc", PREVIOUS_INSTRUCTION_SPAN);
    let previous = match host.execute(&command) {
        Ok(disassembly) => parser.last_instruction_address(&disassembly),
        Err(e) if e.is_transient() => {
            debug!("{}", e);
            None
        }
        Err(e) => return Err(e.into()),
    };
    Ok(previous.unwrap_or_else(|| format!("0x{:x}", pc)))
}

/// ブレークポイントでのレジスタ式の値の集計
#[derive(Debug, Default)]
pub struct BreakpointTracker {
    breakpoints: IndexMap<String, ExpressionHistogram>,
}

impl BreakpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `式1,式2,...,ブレークポイント番号` を分解する
    pub fn parse_argument(argument: &str) -> Result<(String, Vec<String>)> {
        let mut parts: Vec<&str> = argument.split(',').collect();
        let breakpoint = parts.pop().unwrap_or_default().trim();
        if breakpoint.is_empty() {
            return Err(Error::protocol(format!("no breakpoint identifier in {:?}", argument)));
        }

        let expressions = parts
            .into_iter()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();
        Ok((breakpoint.to_string(), expressions))
    }

    /// ブレークポイントの集計を取得する
    pub fn histogram(&self, breakpoint: &str) -> Option<&ExpressionHistogram> {
        self.breakpoints.get(breakpoint)
    }

    /// トラップを1回記録し、ブレークポイントの集計全体を書き出す
    ///
    /// 評価できなかった式はこのトラップでは数えません。
    pub fn record_hit<H: HostDebugger>(
        &mut self,
        host: &mut H,
        parser: &OutputParser,
        paths: &IpcPaths,
        argument: &str,
    ) -> Result<&ExpressionHistogram> {
        let (breakpoint, expressions) = Self::parse_argument(argument)?;

        let mut resolved = Vec::with_capacity(expressions.len());
        for expression in expressions {
            match host.execute(&format!("p/x {}", expression)) {
                Ok(output) => match parser.extract_address(&output) {
                    Some(address) => resolved.push((expression, address)),
                    None => debug!("{} did not evaluate to an address", expression),
                },
                Err(e) if e.is_transient() => debug!("{}", e),
                Err(e) => return Err(e.into()),
            }
        }

        let histogram = self.breakpoints.entry(breakpoint.clone()).or_default();
        for (expression, address) in resolved {
            *histogram
                .entry(expression)
                .or_default()
                .entry(address)
                .or_insert(0) += 1;
        }

        store::persist(&paths.track_breakpoint(&breakpoint), histogram)?;
        Ok(histogram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_is_canonical() {
        assert_eq!(WatchpointTracker::group_key("[2, 1]").unwrap(), "1_2");
        assert_eq!(WatchpointTracker::group_key("1,2").unwrap(), "1_2");
        assert_eq!(WatchpointTracker::group_key("2 1 2").unwrap(), "1_2");
        assert_eq!(WatchpointTracker::group_key("7").unwrap(), "7");
    }

    #[test]
    fn test_group_key_without_numbers() {
        let err = WatchpointTracker::group_key("[]").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_parse_breakpoint_argument() {
        let (breakpoint, expressions) = BreakpointTracker::parse_argument("$rax,,$rbx+8,3").unwrap();
        assert_eq!(breakpoint, "3");
        assert_eq!(expressions, vec!["$rax".to_string(), "$rbx+8".to_string()]);

        let (breakpoint, expressions) = BreakpointTracker::parse_argument("5").unwrap();
        assert_eq!(breakpoint, "5");
        assert!(expressions.is_empty());

        assert!(BreakpointTracker::parse_argument("$rax,").is_err());
    }
}
