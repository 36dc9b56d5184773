//! End-to-end pipeline tests over the public API: bytecode in, verified
//! circuit out.

use gatelift::prelude::*;

fn collect(code: &[u8], num_vregs: u16, handlers: &[(u32, u32, u32)]) -> MethodInfo {
    let table = handlers
        .iter()
        .map(|&(s, e, h)| ExceptionHandler::new(s, e, h))
        .collect();
    MethodCollector::new()
        .collect("m", num_vregs, 0, code, table)
        .expect("test bytecode must decode")
}

fn kinds(result: &BuildResult, want: fn(&GateKind) -> bool) -> Vec<GateRef> {
    result.circuit.gates_of_kind(want)
}

const DIAMOND: [u8; 20] = [
    0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
    0x33, 0x09, // jeqz +9
    0x07, 0x02, 0x00, 0x00, 0x00, // ldai 2
    0x30, 0x07, // jmp +7
    0x07, 0x03, 0x00, 0x00, 0x00, // ldai 3
    0x38, // return
];

#[test]
fn diamond_builds_four_regions_and_one_phi() {
    let method = collect(&DIAMOND, 0, &[]);
    let result = build_circuit(&method).unwrap();

    let live: Vec<&BytecodeRegion> = result
        .graph
        .regions()
        .iter()
        .filter(|r| !r.is_dead)
        .collect();
    assert_eq!(live.len(), 4);

    let join = result.graph.region_of_instruction(5);
    assert!(result.graph.region(join).phis.contains(&SsaVar::Acc));

    // The join's selector feeds the return with both arm constants.
    let selectors = kinds(&result, |k| matches!(k, GateKind::ValueSelector));
    assert_eq!(selectors.len(), 1);
    let mut arms: Vec<GateKind> = result
        .circuit
        .gate(selectors[0])
        .value_ins
        .iter()
        .map(|g| result.circuit.gate(*g).kind)
        .collect();
    arms.sort_by_key(|k| match k {
        GateKind::Constant(ConstValue::Int(i)) => *i,
        _ => i32::MAX,
    });
    assert_eq!(
        arms,
        vec![
            GateKind::Constant(ConstValue::Int(2)),
            GateKind::Constant(ConstValue::Int(3)),
        ]
    );
}

#[test]
fn straight_line_needs_no_joins() {
    let code = [
        0x07, 0x2A, 0x00, 0x00, 0x00, // ldai 42
        0x0A, 0x00, // sta v0
        0x09, 0x00, // lda v0
        0x38, // return
    ];
    let method = collect(&code, 1, &[]);
    let result = build_circuit(&method).unwrap();
    assert!(kinds(&result, |k| matches!(k, GateKind::Merge)).is_empty());
    assert!(kinds(&result, |k| matches!(k, GateKind::ValueSelector)).is_empty());
    let ret = kinds(&result, |k| matches!(k, GateKind::Return))[0];
    let value = result.circuit.gate(result.circuit.gate(ret).value_ins[0]);
    assert_eq!(value.kind, GateKind::Constant(ConstValue::Int(42)));
}

#[test]
fn catch_entry_reads_the_caught_exception() {
    // try { acc = v0 + acc } catch { return acc }
    let code = [
        0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
        0x12, 0x00, // add2 v0 (protected)
        0x38, // return
        0x38, // return (handler)
    ];
    let method = collect(&code, 1, &[(5, 7, 8)]);
    assert!(method.has_try_catch());
    let result = build_circuit(&method).unwrap();

    let exceptions = kinds(&result, |k| matches!(k, GateKind::IfException));
    assert_eq!(exceptions.len(), 1);
    let get_exc = kinds(&result, |k| matches!(k, GateKind::GetException));
    assert_eq!(get_exc.len(), 1);
    // The handler's state comes from the exceptional projection.
    assert_eq!(
        result.circuit.gate(get_exc[0]).state_ins,
        vec![exceptions[0]]
    );
    // The handler returns the caught value.
    let caught_return = kinds(&result, |k| matches!(k, GateKind::Return))
        .into_iter()
        .find(|r| result.circuit.gate(*r).value_ins[0] == get_exc[0]);
    assert!(caught_return.is_some());
}

#[test]
fn nested_try_routes_to_innermost_handler() {
    // Both handlers cover the add2; only the inner one receives its edge.
    let code = [
        0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
        0x12, 0x00, // add2 v0 (doubly protected)
        0x38, // return
        0x01, // ld_null (outer handler)
        0x38, // return
        0x02, // ld_true (inner handler)
        0x38, // return
    ];
    let method = collect(&code, 1, &[(0, 7, 8), (5, 7, 10)]);
    let result = build_circuit(&method).unwrap();

    let protected = result.graph.region_of_instruction(1);
    let inner = result.graph.region_of_instruction(5);
    assert_eq!(result.graph.region(protected).catches, vec![inner]);
    // The outer handler never became a catch target and is unreachable.
    let outer = result.graph.region_of_instruction(3);
    assert!(result.graph.region(outer).is_dead);
}

#[test]
fn loop_closes_through_its_phi() {
    // acc = 10; do { acc-- } while (acc != 0); return acc
    let code = [
        0x07, 0x0A, 0x00, 0x00, 0x00, // ldai 10
        0x10, // dec
        0x35, 0xFF, // jnez -1
        0x38, // return
    ];
    let method = collect(&code, 0, &[]);
    let result = build_circuit(&method).unwrap();

    let loops = kinds(&result, |k| matches!(k, GateKind::LoopBegin));
    assert_eq!(loops.len(), 1);
    let selectors = kinds(&result, |k| matches!(k, GateKind::ValueSelector));
    assert_eq!(selectors.len(), 1);
    // dec reads the phi, and the phi's back input is dec.
    let dec = kinds(&result, |k| matches!(k, GateKind::JsBytecode(Opcode::Dec)))[0];
    assert_eq!(result.circuit.gate(dec).value_ins[0], selectors[0]);
    assert_eq!(result.circuit.gate(selectors[0]).value_ins[1], dec);
}

#[test]
fn unreachable_code_lowers_no_gates() {
    let code = [
        0x30, 0x07, // jmp +7
        0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1 (dead)
        0x38, // return
    ];
    let method = collect(&code, 0, &[]);
    let result = build_circuit(&method).unwrap();
    assert!(result.bytecode_to_gate[1].is_none());
    let dead = result.graph.region_of_instruction(1);
    assert!(result.graph.region(dead).is_dead);
}

#[test]
fn every_build_verifies_and_keeps_edge_symmetry() {
    let programs: Vec<(&[u8], u16, &[(u32, u32, u32)])> = vec![
        (&DIAMOND, 0, &[]),
        (
            &[
                0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
                0x12, 0x00, // add2 v0
                0x38, // return
                0x38, // return (handler)
            ],
            1,
            &[(5, 7, 8)],
        ),
        (
            &[
                0x07, 0x0A, 0x00, 0x00, 0x00, // ldai 10
                0x10, // dec
                0x35, 0xFF, // jnez -1
                0x38, // return
            ],
            0,
            &[],
        ),
    ];
    for (code, vregs, handlers) in programs {
        let method = collect(code, vregs, handlers);
        let result = build_circuit(&method).unwrap();
        assert!(result.circuit.verify().is_ok());
        for region in result.graph.regions().iter().filter(|r| !r.is_dead) {
            for &s in &region.succs {
                assert!(result.graph.region(s).preds.contains(&region.id));
            }
            for &p in &region.preds {
                assert!(result.graph.region(p).succs.contains(&region.id));
            }
        }
    }
}

#[test]
fn module_driver_compiles_in_parallel() {
    let collector = MethodCollector::new();
    let methods: Vec<MethodInfo> = (0..16)
        .map(|i| {
            collector
                .collect(&format!("m{i}"), 0, 0, &DIAMOND, vec![])
                .unwrap()
        })
        .collect();
    let outcomes = compile_module(&methods, &BuildOptions::default());
    assert_eq!(outcomes.len(), 16);
    assert!(outcomes.iter().all(CompileOutcome::is_compiled));
    // All sixteen share one decode.
    assert_eq!(collector.distinct_bodies(), 1);
}

#[test]
fn dot_renderings_cover_both_graphs() {
    let method = collect(&DIAMOND, 0, &[]);
    let result = build_circuit(&method).unwrap();
    let regions = result.graph.to_dot(Some("diamond"));
    assert!(regions.contains("digraph regions"));
    assert!(regions.contains("B0"));
    let circuit = result.circuit.to_dot(Some("diamond"));
    assert!(circuit.contains("digraph circuit"));
    assert!(circuit.contains("VALUE_SELECTOR"));
}
