//! 命令トレース
//!
//! ブレークポイントから1命令ずつ実行し、call/ret の対応で木構造にまとめます。
//!
//! ノードはアリーナ（`Vec`）に格納し、親子関係はインデックスで表します。
//! 親へのリンクは上方向に辿るためだけのもので、シリアライズされません。

use crate::parse::{parse_address, InstructionKind, OutputParser};
use crate::registers::{Arch, RegisterMap, RegisterSelection, RegisterSnapshot};
use crate::store::{self, IpcPaths};
use crate::{Error, Result};
use kagami_target::HostDebugger;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// アリーナ内のノード番号
pub type NodeId = usize;

/// 完了時のステータスメッセージ
const COMPLETED: &str = "Tracing has been completed";

#[derive(Debug, Clone)]
struct TraceNode {
    label: Option<String>,
    registers: Option<RegisterMap>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

impl TraceNode {
    fn new(label: Option<String>, registers: Option<RegisterMap>, parent: Option<NodeId>) -> Self {
        Self {
            label,
            registers,
            children: Vec::new(),
            parent,
        }
    }
}

/// call/ret で入れ子になった命令列
///
/// 常に1つの「現在のノード」（カーソル）があり、命令はその子として追加されます。
#[derive(Debug, Clone)]
pub struct TraceTree {
    nodes: Vec<TraceNode>,
    cursor: NodeId,
}

impl Default for TraceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceTree {
    /// ラベルのないルートだけを持つ木
    pub fn new() -> Self {
        Self {
            nodes: vec![TraceNode::new(None, None, None)],
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> NodeId {
        self.cursor
    }

    /// カーソルから親を辿った先のルート
    pub fn root(&self) -> NodeId {
        let mut id = self.cursor;
        while let Some(parent) = self.nodes[id].parent {
            id = parent;
        }
        id
    }

    /// ノード数（ルートを含む）
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[self.root()].children.is_empty()
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id).and_then(|n| n.label.as_deref())
    }

    pub fn registers(&self, id: NodeId) -> Option<&RegisterMap> {
        self.nodes.get(id).and_then(|n| n.registers.as_ref())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    /// カーソルの子として命令を追加する（カーソルは動かない）
    pub fn append(&mut self, label: impl Into<String>, registers: RegisterMap) -> NodeId {
        let id = self.nodes.len();
        self.nodes
            .push(TraceNode::new(Some(label.into()), Some(registers), Some(self.cursor)));
        self.nodes[self.cursor].children.push(id);
        id
    }

    /// 直前に追加した子に入る（call）
    pub fn enter_last_child(&mut self) {
        if let Some(&last) = self.nodes[self.cursor].children.last() {
            self.cursor = last;
        }
    }

    /// 親に戻る（ret）
    ///
    /// カーソルがルートにある場合は新しいルートを作り、元のルートをその子にします。
    pub fn return_to_parent(&mut self) {
        let parent = match self.nodes[self.cursor].parent {
            Some(parent) => parent,
            None => {
                let root = self.nodes.len();
                let mut node = TraceNode::new(None, None, None);
                node.children.push(self.cursor);
                self.nodes.push(node);
                self.nodes[self.cursor].parent = Some(root);
                root
            }
        };
        self.cursor = parent;
    }
}

/// シリアライズ用のノードビュー
struct NodeView<'a> {
    tree: &'a TraceTree,
    id: NodeId,
}

impl Serialize for NodeView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let node = &self.tree.nodes[self.id];
        let children: Vec<NodeView> = node
            .children
            .iter()
            .map(|&id| NodeView { tree: self.tree, id })
            .collect();

        let mut state = serializer.serialize_struct("TraceNode", 3)?;
        state.serialize_field("label", &node.label)?;
        state.serialize_field("registers", &node.registers)?;
        state.serialize_field("children", &children)?;
        state.end()
    }
}

impl Serialize for TraceTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        NodeView {
            tree: self,
            id: self.root(),
        }
        .serialize(serializer)
    }
}

/// ステップ実行の方法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// call の中に入る（`stepi`）
    #[default]
    SingleStep,
    /// call を1命令として実行する（`nexti`）
    StepOver,
}

impl StepMode {
    fn command(self) -> &'static str {
        match self {
            StepMode::SingleStep => "stepi",
            StepMode::StepOver => "nexti",
        }
    }
}

/// トレースの設定（フロントエンドから受け取る）
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    #[serde(deserialize_with = "breakpoint_id")]
    pub breakpoint: String,
    pub max_trace_count: usize,
    pub stop_condition: Option<String>,
    pub step_mode: StepMode,
    pub stop_after_trace: bool,
    pub collect_general_registers: bool,
    pub collect_flag_registers: bool,
    pub collect_segment_registers: bool,
    pub collect_float_registers: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            breakpoint: String::new(),
            max_trace_count: 1000,
            stop_condition: None,
            step_mode: StepMode::SingleStep,
            stop_after_trace: false,
            collect_general_registers: true,
            collect_flag_registers: true,
            collect_segment_registers: true,
            collect_float_registers: false,
        }
    }
}

impl TraceConfig {
    pub fn selection(&self) -> RegisterSelection {
        RegisterSelection {
            general: self.collect_general_registers,
            flags: self.collect_flag_registers,
            segment: self.collect_segment_registers,
            float: self.collect_float_registers,
        }
    }

    fn stop_condition(&self) -> Option<&str> {
        self.stop_condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// ブレークポイント番号は文字列でも数値でも受け付ける
fn breakpoint_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

/// フロントエンドがポーリングする進捗
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum TraceStatus {
    Tracing(String),
    Finished(String),
}

/// 命令トレーサー
pub struct InstructionTracer<'a, H> {
    host: &'a mut H,
    parser: &'a OutputParser,
    arch: Arch,
    paths: &'a IpcPaths,
}

impl<'a, H: HostDebugger> InstructionTracer<'a, H> {
    pub fn new(host: &'a mut H, parser: &'a OutputParser, arch: Arch, paths: &'a IpcPaths) -> Self {
        Self {
            host,
            parser,
            arch,
            paths,
        }
    }

    /// トレースを実行し、木とステータスを書き出す
    ///
    /// 途中で失敗した場合も、それまでの木と終了ステータスを書き出してからエラーを返します。
    pub fn run(&mut self, config: &TraceConfig) -> Result<TraceTree> {
        if config.breakpoint.trim().is_empty() {
            return Err(Error::protocol("trace configuration has no breakpoint"));
        }

        let tree_path = self.paths.trace_instructions(&config.breakpoint);
        let status_path = self.paths.trace_status(&config.breakpoint);

        let mut tree = TraceTree::new();
        let outcome = self
            .delete_breakpoint(&config.breakpoint)
            .and_then(|()| self.trace(config, &mut tree, &status_path));

        match outcome {
            Ok(()) => {
                store::persist(&tree_path, &tree)?;
                store::persist(&status_path, &TraceStatus::Finished(COMPLETED.to_string()))?;
                info!("trace of breakpoint {} finished", config.breakpoint);

                if !config.stop_after_trace {
                    self.host.resume()?;
                }
                Ok(tree)
            }
            Err(e) => {
                warn!("trace of breakpoint {} terminated: {}", config.breakpoint, e);
                let status = TraceStatus::Finished(format!("Tracing was terminated: {}", e));
                if let Err(persist_error) = store::persist(&tree_path, &tree)
                    .and_then(|()| store::persist(&status_path, &status))
                {
                    warn!("{}", persist_error);
                }
                Err(e)
            }
        }
    }

    fn delete_breakpoint(&mut self, breakpoint: &str) -> Result<()> {
        match self.host.execute(&format!("delete {}", breakpoint)) {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => {
                debug!("{}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn trace(&mut self, config: &TraceConfig, tree: &mut TraceTree, status_path: &Path) -> Result<()> {
        let selection = config.selection();

        for step in 1..=config.max_trace_count {
            let examined = self.host.execute("x/i $pc")?;
            let instruction = self.parser.instruction(&examined)?;

            let registers = RegisterSnapshot::new(&mut *self.host, self.parser, self.arch).collect(selection)?;
            tree.append(instruction.text.clone(), registers);

            let progress = format!("{} ({}/{})", instruction.text, step, config.max_trace_count);
            store::persist(status_path, &TraceStatus::Tracing(progress))?;

            match self.parser.classify(&instruction.text) {
                InstructionKind::Return => tree.return_to_parent(),
                InstructionKind::Call if config.step_mode == StepMode::SingleStep => {
                    tree.enter_last_child()
                }
                _ => {}
            }

            if self.stop_condition_met(config)? {
                info!("stop condition met at step {}", step);
                break;
            }

            self.host.execute(config.step_mode.command())?;
        }
        Ok(())
    }

    /// 停止条件を評価する（評価できない場合は満たされていないものとする）
    fn stop_condition_met(&mut self, config: &TraceConfig) -> Result<bool> {
        let condition = match config.stop_condition() {
            Some(condition) => condition,
            None => return Ok(false),
        };

        match self.host.evaluate(condition) {
            Ok(value) => Ok(is_truthy(&value)),
            Err(e) if e.is_transient() => {
                warn!("cannot evaluate stop condition {:?}: {}", condition, e);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// 評価結果が0以外の整数、または `true` なら真
fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        return true;
    }
    match value.parse::<i64>() {
        Ok(number) => number != 0,
        Err(_) => parse_address(value).map_or(false, |number| number != 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labels(tree: &TraceTree, id: NodeId) -> Vec<&str> {
        tree.children(id)
            .iter()
            .map(|&child| tree.label(child).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_call_nests_and_ret_returns() {
        let mut tree = TraceTree::new();
        let root = tree.cursor();

        tree.append("call   0x401000 <f>", RegisterMap::new());
        tree.enter_last_child();
        tree.append("nop", RegisterMap::new());
        tree.append("ret", RegisterMap::new());
        tree.return_to_parent();

        assert_eq!(tree.cursor(), root);
        assert_eq!(tree.root(), root);
        assert_eq!(labels(&tree, root), vec!["call   0x401000 <f>"]);
        let call = tree.children(root)[0];
        assert_eq!(labels(&tree, call), vec!["nop", "ret"]);
    }

    #[test]
    fn test_leading_ret_synthesizes_root() {
        let mut tree = TraceTree::new();
        let first_root = tree.cursor();

        tree.append("ret", RegisterMap::new());
        tree.return_to_parent();

        let root = tree.root();
        assert_ne!(root, first_root);
        assert_eq!(tree.cursor(), root);
        assert_eq!(tree.label(root), None);
        assert_eq!(tree.children(root), &[first_root]);
        assert_eq!(tree.parent(first_root), Some(root));
        assert_eq!(labels(&tree, first_root), vec!["ret"]);

        tree.append("mov    eax,0x1", RegisterMap::new());
        assert_eq!(tree.children(root).len(), 2);
    }

    #[test]
    fn test_enter_without_children_keeps_cursor() {
        let mut tree = TraceTree::new();
        tree.enter_last_child();
        assert_eq!(tree.cursor(), 0);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_tree_serialization() {
        let mut tree = TraceTree::new();
        let mut registers = RegisterMap::new();
        registers.insert("rax".to_string(), "0x1".to_string());
        tree.append("nop", registers);

        let value = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            value,
            json!({
                "label": null,
                "registers": null,
                "children": [
                    {"label": "nop", "registers": {"rax": "0x1"}, "children": []}
                ]
            })
        );
    }

    #[test]
    fn test_trace_config_defaults() {
        let config: TraceConfig = serde_json::from_value(json!({"breakpoint": 3})).unwrap();
        assert_eq!(config.breakpoint, "3");
        assert_eq!(config.max_trace_count, 1000);
        assert_eq!(config.step_mode, StepMode::SingleStep);
        assert!(config.selection().general);
        assert!(!config.selection().float);

        let config: TraceConfig = serde_json::from_value(json!({
            "breakpoint": "2",
            "step_mode": "step_over",
            "stop_condition": "  "
        }))
        .unwrap();
        assert_eq!(config.step_mode, StepMode::StepOver);
        assert_eq!(config.stop_condition(), None);
    }

    #[test]
    fn test_status_serialization() {
        let status = TraceStatus::Tracing("nop (1/10)".to_string());
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"status": "tracing", "message": "nop (1/10)"})
        );
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy("-1"));
        assert!(is_truthy("0x10"));
        assert!(is_truthy("true"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("0x0"));
        assert!(!is_truthy("{1, 2}"));
    }
}
