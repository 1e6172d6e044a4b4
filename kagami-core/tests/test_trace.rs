//! 命令トレースのテスト

mod common;

use common::{scratch_paths, ScriptedHost};
use kagami_core::parse::OutputParser;
use kagami_core::store::load;
use kagami_core::{Arch, Error, InstructionTracer, StepMode, TraceConfig, TraceStatus};
use serde_json::Value;

fn config(max_trace_count: usize) -> TraceConfig {
    TraceConfig {
        breakpoint: "1".to_string(),
        max_trace_count,
        ..TraceConfig::default()
    }
}

#[test]
fn test_call_and_ret_build_nested_tree() {
    let paths = scratch_paths("trace-nested");
    let parser = OutputParser::new().unwrap();
    let mut host = ScriptedHost::with_program(&["call   0x401100 <g>", "nop", "ret"]);

    let tree = InstructionTracer::new(&mut host, &parser, Arch::X86_64, &paths)
        .run(&config(3))
        .unwrap();

    let root = tree.root();
    assert_eq!(tree.cursor(), root);
    assert_eq!(tree.children(root).len(), 1);

    let call = tree.children(root)[0];
    assert_eq!(tree.label(call), Some("call   0x401100 <g>"));
    let nested: Vec<_> = tree.children(call).iter().map(|&id| tree.label(id)).collect();
    assert_eq!(nested, vec![Some("nop"), Some("ret")]);
    assert_eq!(tree.registers(call).unwrap()["rax"], "0x10");

    assert_eq!(host.count("delete 1"), 1);
    assert_eq!(host.count("stepi"), 3);
    assert_eq!(host.resumed, 1);

    let status: TraceStatus = load(&paths.trace_status("1")).unwrap();
    assert_eq!(status, TraceStatus::Finished("Tracing has been completed".to_string()));

    let artifact: Value = load(&paths.trace_instructions("1")).unwrap();
    assert_eq!(artifact["label"], Value::Null);
    assert_eq!(artifact["children"][0]["label"], "call   0x401100 <g>");
    assert_eq!(artifact["children"][0]["children"].as_array().unwrap().len(), 2);
}

#[test]
fn test_leading_ret_keeps_tree_rooted() {
    let paths = scratch_paths("trace-leading-ret");
    let parser = OutputParser::new().unwrap();
    let mut host = ScriptedHost::with_program(&["ret", "mov    eax,0x1"]);

    let tree = InstructionTracer::new(&mut host, &parser, Arch::X86_64, &paths)
        .run(&config(2))
        .unwrap();

    let root = tree.root();
    assert_eq!(tree.label(root), None);
    assert_eq!(tree.children(root).len(), 2);

    let former_root = tree.children(root)[0];
    assert_eq!(tree.label(former_root), None);
    assert_eq!(tree.children(former_root).len(), 1);
    assert_eq!(tree.label(tree.children(former_root)[0]), Some("ret"));
    assert_eq!(tree.label(tree.children(root)[1]), Some("mov    eax,0x1"));
}

#[test]
fn test_zero_count_finishes_with_empty_root() {
    let paths = scratch_paths("trace-zero");
    let parser = OutputParser::new().unwrap();
    let mut host = ScriptedHost::with_program(&["nop"]);

    let tree = InstructionTracer::new(&mut host, &parser, Arch::X86_64, &paths)
        .run(&config(0))
        .unwrap();

    assert!(tree.is_empty());
    assert_eq!(host.count("x/i $pc"), 0);
    let status: TraceStatus = load(&paths.trace_status("1")).unwrap();
    assert!(matches!(status, TraceStatus::Finished(_)));
}

#[test]
fn test_stop_condition_ends_trace() {
    let paths = scratch_paths("trace-stop");
    let parser = OutputParser::new().unwrap();
    let mut host = ScriptedHost::with_program(&["nop", "nop", "nop"]);
    host.evaluations.insert("$done".to_string(), "1".to_string());

    let config = TraceConfig {
        stop_condition: Some("$done".to_string()),
        ..config(10)
    };
    let tree = InstructionTracer::new(&mut host, &parser, Arch::X86_64, &paths)
        .run(&config)
        .unwrap();

    assert_eq!(tree.children(tree.root()).len(), 1);
    assert_eq!(host.count("stepi"), 0);
}

#[test]
fn test_unevaluable_stop_condition_keeps_tracing() {
    let paths = scratch_paths("trace-bad-condition");
    let parser = OutputParser::new().unwrap();
    let mut host = ScriptedHost::with_program(&["nop", "nop"]);

    let config = TraceConfig {
        stop_condition: Some("$missing".to_string()),
        ..config(2)
    };
    let tree = InstructionTracer::new(&mut host, &parser, Arch::X86_64, &paths)
        .run(&config)
        .unwrap();

    assert_eq!(tree.children(tree.root()).len(), 2);
}

#[test]
fn test_step_over_keeps_calls_flat() {
    let paths = scratch_paths("trace-step-over");
    let parser = OutputParser::new().unwrap();
    let mut host = ScriptedHost::with_program(&["call   0x401100 <g>", "nop"]);

    let config = TraceConfig {
        step_mode: StepMode::StepOver,
        stop_after_trace: true,
        collect_general_registers: false,
        collect_flag_registers: false,
        collect_segment_registers: false,
        ..config(2)
    };
    let tree = InstructionTracer::new(&mut host, &parser, Arch::X86_64, &paths)
        .run(&config)
        .unwrap();

    let root = tree.root();
    assert_eq!(tree.children(root).len(), 2);
    assert!(tree.registers(tree.children(root)[0]).unwrap().is_empty());
    assert_eq!(host.count("nexti"), 2);
    assert_eq!(host.resumed, 0);
}

#[test]
fn test_exit_mid_trace_persists_partial_tree() {
    let paths = scratch_paths("trace-exit");
    let parser = OutputParser::new().unwrap();
    let mut host = ScriptedHost::with_program(&["nop"]);

    let err = InstructionTracer::new(&mut host, &parser, Arch::X86_64, &paths)
        .run(&config(5))
        .unwrap_err();
    assert!(matches!(err, Error::InferiorExited(_)));
    assert_eq!(host.resumed, 0);

    let artifact: Value = load(&paths.trace_instructions("1")).unwrap();
    assert_eq!(artifact["children"].as_array().unwrap().len(), 1);

    match load::<TraceStatus>(&paths.trace_status("1")).unwrap() {
        TraceStatus::Finished(message) => assert!(message.contains("terminated")),
        other => panic!("unexpected status {:?}", other),
    }
}
