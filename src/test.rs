//! Shared test fixtures. Compiled only for `cfg(test)`.

use std::sync::Arc;

use crate::bytecode::{decode_stream, ExceptionHandler, MethodInfo, MethodPcInfo};

/// Builds a [`MethodInfo`] from raw bytecode and an exception table given as
/// `(try_start, try_end, handler)` byte-offset triples.
///
/// Panics on decode failure; tests feeding deliberately broken streams call
/// the decoder directly instead.
pub(crate) fn method(
    num_vregs: u16,
    num_args: u16,
    code: &[u8],
    handlers: &[(u32, u32, u32)],
) -> MethodInfo {
    let (infos, pc_offsets) = decode_stream(code, num_vregs).expect("fixture bytecode must decode");
    MethodInfo {
        name: "test_method".to_string(),
        num_vregs,
        num_args,
        pc_info: Arc::new(MethodPcInfo {
            pc_offsets,
            infos,
            byte_len: code.len(),
        }),
        exception_table: handlers
            .iter()
            .map(|&(s, e, h)| ExceptionHandler::new(s, e, h))
            .collect(),
        inner_methods: Vec::new(),
    }
}

/// Builds a method and runs the full graph pipeline (regions, dominators,
/// phi placement), panicking on failure.
pub(crate) fn analyzed_graph(
    num_vregs: u16,
    num_args: u16,
    code: &[u8],
    handlers: &[(u32, u32, u32)],
) -> (MethodInfo, crate::graph::RegionGraph) {
    let m = method(num_vregs, num_args, code, handlers);
    let mut graph = crate::graph::RegionGraph::build(&m.pc_info, &m.exception_table)
        .expect("fixture graph must build");
    crate::graph::dominators::compute(&mut graph);
    graph.update_cfg();
    crate::graph::phis::insert(&mut graph, &m.pc_info);
    (m, graph)
}
