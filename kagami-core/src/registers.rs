//! レジスタ読み取り機能

use crate::parse::OutputParser;
use crate::{Error, Result};
use indexmap::IndexMap;
use kagami_target::HostDebugger;
use tracing::debug;

/// レジスタ名 → 値 のマップ（挿入順を保持）
pub type RegisterMap = IndexMap<String, String>;

const GENERAL_64: &[&str] = &[
    "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15", "rip",
];
const GENERAL_32: &[&str] = &["eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "eip"];
const SEGMENT: &[&str] = &["cs", "ss", "ds", "es", "fs", "gs"];

/// eflags のビット位置
const FLAGS: &[(&str, u32)] = &[
    ("cf", 0),
    ("pf", 2),
    ("af", 4),
    ("zf", 6),
    ("sf", 7),
    ("tf", 8),
    ("if", 9),
    ("df", 10),
    ("of", 11),
];

/// 調査対象のアーキテクチャ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86,
    X86_64,
}

impl Arch {
    /// アキュムレータの評価結果からビット幅を判定する
    ///
    /// 32ビットプロセスでは `$rax` が `void` になります。
    pub fn detect<H: HostDebugger>(host: &mut H) -> Result<Self> {
        match host.evaluate("$rax") {
            Ok(value) if value.trim() == "void" => Ok(Arch::X86),
            Ok(_) => Ok(Arch::X86_64),
            Err(e) if e.is_transient() => {
                debug!("$rax is not available ({}), assuming 32-bit", e);
                Ok(Arch::X86)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// スタックポインタのレジスタ名
    pub fn stack_pointer(self) -> &'static str {
        match self {
            Arch::X86 => "esp",
            Arch::X86_64 => "rsp",
        }
    }

    /// ワードサイズ（バイト数）
    pub fn word_size(self) -> usize {
        match self {
            Arch::X86 => 4,
            Arch::X86_64 => 8,
        }
    }

    fn general_registers(self) -> &'static [&'static str] {
        match self {
            Arch::X86 => GENERAL_32,
            Arch::X86_64 => GENERAL_64,
        }
    }

    fn xmm_count(self) -> usize {
        match self {
            Arch::X86 => 8,
            Arch::X86_64 => 16,
        }
    }
}

/// どのレジスタ群を集めるか
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSelection {
    pub general: bool,
    pub flags: bool,
    pub segment: bool,
    pub float: bool,
}

/// 現在停止している状態のレジスタを読み取る
pub struct RegisterSnapshot<'a, H> {
    host: &'a mut H,
    parser: &'a OutputParser,
    arch: Arch,
}

impl<'a, H: HostDebugger> RegisterSnapshot<'a, H> {
    pub fn new(host: &'a mut H, parser: &'a OutputParser, arch: Arch) -> Self {
        Self { host, parser, arch }
    }

    /// 汎用・フラグ・セグメントレジスタをまとめて取得する
    pub fn merged(&mut self) -> Result<RegisterMap> {
        self.collect(RegisterSelection {
            general: true,
            flags: true,
            segment: true,
            float: false,
        })
    }

    /// 選択されたレジスタ群を1つのマップにまとめる
    pub fn collect(&mut self, selection: RegisterSelection) -> Result<RegisterMap> {
        let mut registers = RegisterMap::new();
        if selection.general {
            registers.extend(self.general()?);
        }
        if selection.flags {
            registers.extend(self.flags()?);
        }
        if selection.segment {
            registers.extend(self.segments()?);
        }
        if selection.float {
            registers.extend(self.floats()?);
        }
        Ok(registers)
    }

    /// 汎用レジスタ
    pub fn general(&mut self) -> Result<RegisterMap> {
        self.hex_registers(self.arch.general_registers())
    }

    /// セグメントレジスタ
    pub fn segments(&mut self) -> Result<RegisterMap> {
        self.hex_registers(SEGMENT)
    }

    /// フラグレジスタ（各フラグを "0" / "1" で返す）
    pub fn flags(&mut self) -> Result<RegisterMap> {
        let eflags = self.read_hex("eflags")?;
        Ok(FLAGS
            .iter()
            .map(|(name, bit)| (name.to_string(), ((eflags >> *bit) & 1).to_string()))
            .collect())
    }

    /// 浮動小数点・ベクタレジスタ
    pub fn floats(&mut self) -> Result<RegisterMap> {
        let mut registers = RegisterMap::new();
        for i in 0..8 {
            let name = format!("st{}", i);
            let value = self.host.evaluate(&format!("${}", name))?;
            registers.insert(name, value);
        }
        for i in 0..self.arch.xmm_count() {
            let name = format!("xmm{}", i);
            let value = self.host.evaluate(&format!("${}.v4_float", name))?;
            registers.insert(name, value);
        }
        Ok(registers)
    }

    /// スタックポインタの値
    pub fn stack_pointer(&mut self) -> Result<u64> {
        self.read_hex(self.arch.stack_pointer())
    }

    /// プログラムカウンタの値
    pub fn program_counter(&mut self) -> Result<u64> {
        self.read_hex("pc")
    }

    fn hex_registers(&mut self, names: &[&str]) -> Result<RegisterMap> {
        let mut registers = RegisterMap::new();
        for name in names {
            let value = self.read_hex(name)?;
            registers.insert(name.to_string(), format!("0x{:x}", value));
        }
        Ok(registers)
    }

    fn read_hex(&mut self, register: &str) -> Result<u64> {
        let output = self.host.execute(&format!("p/x ${}", register))?;
        self.parser
            .extract_value(&output)
            .ok_or_else(|| Error::parse(format!("no value for ${} in {:?}", register, output.trim())))
    }
}
