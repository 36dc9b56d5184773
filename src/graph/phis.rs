//! Phi placement via iterated dominance frontiers.
//!
//! For every variable (each virtual register plus the accumulator) the pass
//! collects its defining regions, then pushes phi markers through the
//! dominance frontiers with the standard worklist until closure. The
//! markers land in [`super::BytecodeRegion::phis`]; the circuit builder
//! materializes them lazily as value selectors during renaming.

use std::collections::{HashMap, HashSet};

use super::{RegionGraph, SsaVar};
use crate::bytecode::MethodPcInfo;

/// Collects per-variable definition sites over live regions.
///
/// The entry region is an implicit definition site for every variable: at
/// entry each register holds an incoming-argument value and the accumulator
/// holds undefined, so a definition anywhere else always competes with the
/// entry version. `resume_generator` defines every register (the decoder
/// already expands its write set).
fn definition_sites(graph: &RegionGraph, pc: &MethodPcInfo) -> HashMap<SsaVar, HashSet<usize>> {
    let mut defs: HashMap<SsaVar, HashSet<usize>> = HashMap::new();
    for id in graph.live_ids() {
        let region = graph.region(id);
        for i in region.start..region.end {
            let info = &pc.infos[i];
            for &v in &info.vreg_out {
                defs.entry(SsaVar::Reg(v)).or_default().insert(id);
            }
            if info.acc_out {
                defs.entry(SsaVar::Acc).or_default().insert(id);
            }
        }
    }
    let entry = graph.entry();
    for sites in defs.values_mut() {
        sites.insert(entry);
    }
    defs
}

/// Places phis at catch handlers whose gate-level fan-in exceeds their
/// region-level predecessor count.
///
/// Registers written inside the protected code phi at the handler; the
/// accumulator does not (a catch entry always reads the caught exception
/// instead). Each placed phi is recorded as a definition site so the main
/// worklist iterates it through the handler's own frontiers.
fn refine_catch_joins(
    graph: &mut RegionGraph,
    pc: &MethodPcInfo,
    defs: &mut HashMap<SsaVar, HashSet<usize>>,
) {
    let handlers: Vec<usize> = graph
        .live_ids()
        .filter(|&id| graph.region(id).is_catch())
        .collect();
    for handler in handlers {
        let trys = graph.region(handler).trys.clone();
        let throw_sites: usize = trys
            .iter()
            .map(|&t| graph.exception_sources(t, pc).len())
            .sum();
        let other_preds = graph.region(handler).preds.len() - trys.len();
        if throw_sites + other_preds < 2 {
            continue;
        }
        let mut vars: HashSet<SsaVar> = HashSet::new();
        for &t in &trys {
            let (start, end) = {
                let r = graph.region(t);
                (r.start, r.end)
            };
            for i in start..end {
                for &v in &pc.infos[i].vreg_out {
                    vars.insert(SsaVar::Reg(v));
                }
            }
        }
        for var in vars {
            graph.region_mut(handler).phis.insert(var);
            defs.entry(var).or_default().insert(handler);
        }
    }
}

/// Inserts phi markers for every variable defined in more than one region.
///
/// Requires dominators (and frontiers) to be computed. Catch handlers need
/// one refinement over plain frontier placement: their merge fans in once
/// per throw-capable instruction, so a handler with a single protected
/// predecessor is still a join whenever that predecessor can throw more
/// than once, and every register the protected code writes gets a phi
/// there (the value at the handler depends on which instruction threw).
pub fn insert(graph: &mut RegionGraph, pc: &MethodPcInfo) {
    for id in 0..graph.len() {
        graph.region_mut(id).phis.clear();
    }

    let mut defs = definition_sites(graph, pc);
    refine_catch_joins(graph, pc, &mut defs);
    for (var, sites) in defs {
        if sites.len() < 2 {
            continue;
        }
        let mut placed: HashSet<usize> = HashSet::new();
        let mut worklist: Vec<usize> = sites.iter().copied().collect();
        while let Some(block) = worklist.pop() {
            let frontier = graph.region(block).dom_frontiers.clone();
            for join in frontier {
                if placed.insert(join) {
                    graph.region_mut(join).phis.insert(var);
                    // The phi is itself a definition; iterate.
                    if !sites.contains(&join) {
                        worklist.push(join);
                    }
                }
            }
        }
    }
}
