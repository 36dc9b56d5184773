//! Dominator analysis over the region graph.
//!
//! The pass runs in four steps: a depth-first walk assigning visitation
//! timestamps, dead-region elimination for everything the walk never
//! reached, the iterative dominator-set dataflow, and dominance-frontier
//! computation. The dataflow is the classic O(N^2) formulation over full
//! dominator sets; methods are small enough that the quadratic bound never
//! bites, and the full sets make the immediate-dominator extraction a
//! one-line scan for the latest-visited strict dominator.

use std::collections::HashSet;

use super::RegionGraph;

/// Runs the full dominator pipeline: DFS, dead-region elimination,
/// dominator sets, immediate dominators and dominance frontiers.
///
/// Idempotent: re-running on an already-analyzed graph recomputes the same
/// answers.
pub fn compute(graph: &mut RegionGraph) {
    let (timestamps, order) = depth_first_walk(graph);
    eliminate_dead(graph, &timestamps);
    let dom_sets = dominator_sets(graph, &order);
    assign_idoms(graph, &order, &dom_sets, &timestamps);
    compute_frontiers(graph, &order);
    graph.set_dfs(timestamps, order);
}

/// Preorder DFS from the entry region, over live successor edges.
///
/// Returns per-region visitation timestamps (`None` for unreached regions)
/// and the visitation order.
fn depth_first_walk(graph: &RegionGraph) -> (Vec<Option<usize>>, Vec<usize>) {
    let n = graph.len();
    let mut timestamps: Vec<Option<usize>> = vec![None; n];
    let mut order = Vec::new();
    if n == 0 {
        return (timestamps, order);
    }

    let mut stack = vec![graph.entry()];
    while let Some(id) = stack.pop() {
        if timestamps[id].is_some() {
            continue;
        }
        timestamps[id] = Some(order.len());
        order.push(id);
        // Reversed push keeps the visit order aligned with successor order.
        for &succ in graph.region(id).succs.iter().rev() {
            if timestamps[succ].is_none() {
                stack.push(succ);
            }
        }
    }
    (timestamps, order)
}

/// Marks every region the DFS never reached as dead and drops all edges and
/// try/catch associations that touch a dead region.
fn eliminate_dead(graph: &mut RegionGraph, timestamps: &[Option<usize>]) {
    let dead: Vec<usize> = (0..graph.len())
        .filter(|&id| timestamps[id].is_none())
        .collect();
    if dead.is_empty() {
        graph.rebuild_preds();
        return;
    }

    for &id in &dead {
        let region = graph.region_mut(id);
        region.is_dead = true;
        region.succs.clear();
        region.preds.clear();
        region.catches.clear();
        region.trys.clear();
    }
    let dead_set: HashSet<usize> = dead.iter().copied().collect();
    for id in 0..graph.len() {
        if graph.region(id).is_dead {
            continue;
        }
        let region = graph.region_mut(id);
        region.succs.retain(|s| !dead_set.contains(s));
        region.catches.retain(|c| !dead_set.contains(c));
        region.trys.retain(|t| !dead_set.contains(t));
    }
    graph.rebuild_preds();
}

/// Iterative dominator-set dataflow to a fixed point.
///
/// The entry's set is the singleton `{entry}`; every other live region
/// starts at the full live set and shrinks monotonically by intersecting
/// its predecessors' sets.
fn dominator_sets(graph: &RegionGraph, order: &[usize]) -> Vec<HashSet<usize>> {
    let n = graph.len();
    let entry = graph.entry();
    let full: HashSet<usize> = order.iter().copied().collect();

    let mut dom: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for &id in order {
        dom[id] = if id == entry {
            [entry].into_iter().collect()
        } else {
            full.clone()
        };
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &b in order {
            if b == entry {
                continue;
            }
            let mut next: Option<HashSet<usize>> = None;
            for &p in &graph.region(b).preds {
                next = Some(match next {
                    None => dom[p].clone(),
                    Some(acc) => acc.intersection(&dom[p]).copied().collect(),
                });
            }
            let mut next = next.unwrap_or_default();
            next.insert(b);
            if next != dom[b] {
                dom[b] = next;
                changed = true;
            }
        }
    }
    dom
}

/// Extracts each live region's immediate dominator: the strict dominator
/// with the latest DFS timestamp. The entry is its own idom.
fn assign_idoms(
    graph: &mut RegionGraph,
    order: &[usize],
    dom: &[HashSet<usize>],
    timestamps: &[Option<usize>],
) {
    let entry = graph.entry();
    for &b in order {
        let idom = if b == entry {
            entry
        } else {
            dom[b]
                .iter()
                .copied()
                .filter(|&d| d != b)
                .max_by_key(|&d| timestamps[d])
                .unwrap_or(entry)
        };
        graph.region_mut(b).idom = idom;
    }
}

/// Dominance frontiers by the Cytron et al. runner walk: for every join
/// block, each predecessor and its idom-chain ancestors up to (excluding)
/// the join's idom gain the join in their frontier.
fn compute_frontiers(graph: &mut RegionGraph, order: &[usize]) {
    for &id in order {
        graph.region_mut(id).dom_frontiers.clear();
    }
    let joins: Vec<(usize, Vec<usize>, usize)> = order
        .iter()
        .filter(|&&b| graph.region(b).preds.len() >= 2)
        .map(|&b| (b, graph.region(b).preds.clone(), graph.region(b).idom))
        .collect();

    for (b, preds, idom_b) in joins {
        for p in preds {
            let mut runner = p;
            while runner != idom_b {
                graph.region_mut(runner).dom_frontiers.insert(b);
                let up = graph.region(runner).idom;
                if up == runner {
                    break;
                }
                runner = up;
            }
        }
    }
}
