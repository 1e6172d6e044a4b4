//! スタックフレームの再構築
//!
//! `bt` と `info frame N` のテキスト出力からフレームごとのベースアドレスと戻りアドレスを取り出します。

use crate::parse::{FrameDetail, OutputParser};
use crate::registers::{Arch, RegisterSnapshot};
use crate::Result;
use kagami_target::{HostDebugger, MemoryAccess};
use serde::ser::{Serialize, SerializeTuple, Serializer};
use tracing::{debug, info};

/// 保存された戻りアドレスが存在しないフレームの表示
pub const UNAVAILABLE: &str = "<unavailable>";

/// スタックダンプで読む範囲（バイト数）
const STACK_DUMP_SIZE: usize = 4096;

/// 1フレーム分の情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// シンボル付きの戻りアドレス（最外フレームでは `None`）
    pub return_address: Option<String>,
    /// 例: `0x7ffe1e989950(rsp+0x40)`
    pub frame_descriptor: String,
}

impl Serialize for FrameRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(self.return_address.as_deref().unwrap_or(UNAVAILABLE))?;
        tuple.serialize_element(&self.frame_descriptor)?;
        tuple.end()
    }
}

/// スタックダンプの1ワード
#[derive(Debug, Clone, PartialEq)]
pub struct StackSlot {
    /// 例: `0x7ffe1e989958(rsp+0x8)`
    pub location: String,
    /// ゼロ埋めした16進表現
    pub hex: String,
    /// 符号付き10進表現
    pub signed: String,
    /// 浮動小数点として解釈した値
    pub float: String,
}

impl Serialize for StackSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(4)?;
        tuple.serialize_element(&self.location)?;
        tuple.serialize_element(&self.hex)?;
        tuple.serialize_element(&self.signed)?;
        tuple.serialize_element(&self.float)?;
        tuple.end()
    }
}

/// スタックの走査
pub struct StackWalker<'a, H, M> {
    host: &'a mut H,
    memory: &'a M,
    parser: &'a OutputParser,
    arch: Arch,
}

impl<'a, H: HostDebugger, M: MemoryAccess> StackWalker<'a, H, M> {
    pub fn new(host: &'a mut H, memory: &'a M, parser: &'a OutputParser, arch: Arch) -> Self {
        Self {
            host,
            memory,
            parser,
            arch,
        }
    }

    /// 最大のフレーム番号
    pub fn backtrace_depth(&mut self) -> Result<usize> {
        let backtrace = self.host.execute("bt")?;
        self.parser.backtrace_depth(&backtrace)
    }

    /// 全フレームの戻りアドレスとフレーム位置
    pub fn stack_trace_info(&mut self) -> Result<Vec<FrameRecord>> {
        let sp = self.stack_pointer()?;
        let depth = self.backtrace_depth()?;

        let mut frames = Vec::with_capacity(depth + 1);
        for index in 0..=depth {
            let detail = self.frame_detail(index)?;
            let return_address = self.symbolic_return(&detail)?;
            frames.push(FrameRecord {
                return_address,
                frame_descriptor: self.describe_offset(detail.frame_address, sp),
            });
        }
        Ok(frames)
    }

    /// 全フレームの戻りアドレスのみ
    pub fn frame_return_addresses(&mut self) -> Result<Vec<String>> {
        let depth = self.backtrace_depth()?;

        let mut addresses = Vec::with_capacity(depth + 1);
        for index in 0..=depth {
            let detail = self.frame_detail(index)?;
            let address = self.symbolic_return(&detail)?;
            addresses.push(address.unwrap_or_else(|| UNAVAILABLE.to_string()));
        }
        Ok(addresses)
    }

    /// 1フレームの `info frame` 出力
    ///
    /// 範囲外のフレーム番号には `None` を返します。
    pub fn frame_info(&mut self, index: i64) -> Result<Option<String>> {
        let depth = self.backtrace_depth()?;
        match usize::try_from(index) {
            Ok(index) if index <= depth => {
                let info = self.host.execute(&format!("info frame {}", index))?;
                Ok(Some(info))
            }
            _ => {
                info!("Frame {} doesn't exist", index);
                Ok(None)
            }
        }
    }

    /// スタックポインタから1ページ分をワード単位でダンプする
    pub fn stack_dump(&mut self) -> Result<Vec<StackSlot>> {
        let sp = self.stack_pointer()?;
        let word = self.arch.word_size();
        let register = self.arch.stack_pointer();

        let mut slots = Vec::with_capacity(STACK_DUMP_SIZE / word);
        for index in 0..STACK_DUMP_SIZE / word {
            let offset = (index * word) as u64;
            let address = sp.wrapping_add(offset);
            let location = format!("0x{:x}({}+0x{:x})", address, register, offset);

            let bytes = match self.memory.read(address, word) {
                Ok(bytes) if bytes.len() >= word => bytes,
                Err(e) if e.is_fatal() => return Err(e.into()),
                _ => {
                    info!("Can't access the stack after address {}", location);
                    break;
                }
            };

            let hex: String = bytes.iter().rev().map(|b| format!("{:02x}", b)).collect();
            let (signed, float) = match self.arch {
                Arch::X86_64 => {
                    let raw = [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]];
                    (i64::from_le_bytes(raw).to_string(), format!("{:?}", f64::from_le_bytes(raw)))
                }
                Arch::X86 => {
                    let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
                    (i32::from_le_bytes(raw).to_string(), format!("{:?}", f32::from_le_bytes(raw)))
                }
            };

            slots.push(StackSlot {
                location,
                hex: format!("0x{}", hex),
                signed,
                float,
            });
        }
        Ok(slots)
    }

    fn stack_pointer(&mut self) -> Result<u64> {
        RegisterSnapshot::new(&mut *self.host, self.parser, self.arch).stack_pointer()
    }

    fn frame_detail(&mut self, index: usize) -> Result<FrameDetail> {
        let info = self.host.execute(&format!("info frame {}", index))?;
        self.parser.frame_detail(&info)
    }

    /// 保存された戻りアドレスにシンボル情報を付ける
    ///
    /// シンボルが引けない場合はアドレスそのものを返します。
    fn symbolic_return(&mut self, detail: &FrameDetail) -> Result<Option<String>> {
        let saved = match &detail.saved_return {
            Some(saved) => saved,
            None => return Ok(None),
        };

        match self.host.execute(&format!("x/b {}", saved)) {
            Ok(examined) => Ok(Some(
                self.parser
                    .examined_location(&examined)
                    .unwrap_or_else(|| saved.clone()),
            )),
            Err(e) if e.is_transient() => {
                debug!("cannot examine return address {}: {}", saved, e);
                Ok(Some(saved.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn describe_offset(&self, frame_address: u64, sp: u64) -> String {
        let register = self.arch.stack_pointer();
        if frame_address >= sp {
            format!("0x{:x}({}+0x{:x})", frame_address, register, frame_address - sp)
        } else {
            format!("0x{:x}({}-0x{:x})", frame_address, register, sp - frame_address)
        }
    }
}
