//! Basic-block (region) discovery and the control-flow graph.
//!
//! This module converts a decoded instruction stream into
//! [`BytecodeRegion`] records: it scans the stream once for block-boundary
//! markers (jump targets, fall-throughs after branches, return/throw
//! terminators, try/catch boundaries), commits them in one sort/dedupe pass,
//! and wires predecessor/successor edges including the exception edges from
//! throw-capable instructions to their innermost covering catch handler.
//!
//! Dominator computation and phi placement live in the [`dominators`] and
//! [`phis`] submodules; both operate on the [`RegionGraph`] built here.

pub mod dominators;
pub mod phis;

use std::{
    collections::{BTreeSet, HashSet},
    fmt::Write,
};

use crate::{
    bytecode::{ExceptionHandler, MethodPcInfo},
    Error,
    Error::GraphError,
    Result,
};

/// An SSA-tracked storage location: one virtual register or the implicit
/// accumulator.
///
/// The accumulator is keyed separately from the register file; it behaves
/// like one more variable for phi placement and renaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SsaVar {
    /// A virtual register.
    Reg(u16),
    /// The implicit accumulator.
    Acc,
}

/// One basic block of the method, identified by a dense id.
///
/// The region table ([`RegionGraph`]) is the sole owner; all
/// cross-references (`preds`, `succs`, `catches`, `trys`, `idom`) are
/// indices into it. Dead regions stay allocated but are excluded from every
/// later pass.
#[derive(Debug, Clone)]
pub struct BytecodeRegion {
    /// Dense id, order of creation.
    pub id: usize,
    /// First instruction index (inclusive).
    pub start: usize,
    /// One past the last instruction index.
    pub end: usize,
    /// Predecessor region ids.
    pub preds: Vec<usize>,
    /// Successor region ids.
    pub succs: Vec<usize>,
    /// Catch-handler region covering this region, if any. At most one
    /// survives region building: the innermost.
    pub catches: Vec<usize>,
    /// Regions protected by this region (set only on catch handlers).
    pub trys: Vec<usize>,
    /// True once dead-region elimination proves this block unreachable.
    pub is_dead: bool,
    /// Immediate dominator id; the entry block dominates itself.
    pub idom: usize,
    /// Dominance frontier of this block.
    pub dom_frontiers: HashSet<usize>,
    /// Variables that need a phi at this block's head.
    pub phis: HashSet<SsaVar>,
    /// Gate-level state fan-in, filled by the circuit builder.
    pub num_state_preds: usize,
    /// Number of loop-back predecessors.
    pub num_loop_backs: usize,
    /// Predecessor ids whose edge into this block is a back edge.
    pub loopback_blocks: HashSet<usize>,
}

impl BytecodeRegion {
    fn new(id: usize, start: usize, end: usize) -> Self {
        BytecodeRegion {
            id,
            start,
            end,
            preds: Vec::new(),
            succs: Vec::new(),
            catches: Vec::new(),
            trys: Vec::new(),
            is_dead: false,
            idom: 0,
            dom_frontiers: HashSet::new(),
            phis: HashSet::new(),
            num_state_preds: 0,
            num_loop_backs: 0,
            loopback_blocks: HashSet::new(),
        }
    }

    /// True for the synthesized trailing region and for degenerate ranges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True if this region is a catch-handler entry.
    #[must_use]
    pub fn is_catch(&self) -> bool {
        !self.trys.is_empty()
    }

    /// Number of instructions in the region.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

/// An exception-table entry resolved to instruction indices.
#[derive(Debug, Clone, Copy)]
struct ResolvedHandler {
    try_start: usize,
    try_end: usize,
    handler: usize,
}

/// The method's control-flow graph: the owning region table plus the DFS
/// order computed by the dominator pass.
#[derive(Debug)]
pub struct RegionGraph {
    regions: Vec<BytecodeRegion>,
    /// Instruction index -> region id.
    region_of: Vec<usize>,
    /// DFS visitation timestamp per region; `None` for dead regions.
    dfs_timestamp: Vec<Option<usize>>,
    /// Live region ids in DFS order.
    dfs_order: Vec<usize>,
}

impl RegionGraph {
    /// Builds the region graph for one method.
    ///
    /// This performs marker collection, region construction and edge
    /// wiring. Dominators, dead-region elimination and phi placement are
    /// separate passes ([`dominators::compute`], [`phis::insert`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the method decodes to zero instructions, a jump
    /// targets a non-boundary offset, or an exception-table entry does not
    /// line up with instruction boundaries.
    pub fn build(pc: &MethodPcInfo, exception_table: &[ExceptionHandler]) -> Result<Self> {
        if pc.is_empty() {
            return Err(Error::Empty);
        }

        let handlers = Self::resolve_handlers(pc, exception_table)?;
        let starts = Self::collect_markers(pc, &handlers)?;
        let mut graph = Self::commit_regions(pc, &starts);
        graph.wire_edges(pc)?;
        graph.wire_exceptions(pc, &handlers);
        graph.rebuild_preds();

        Ok(graph)
    }

    /// Resolves exception-table byte offsets to instruction indices.
    fn resolve_handlers(
        pc: &MethodPcInfo,
        table: &[ExceptionHandler],
    ) -> Result<Vec<ResolvedHandler>> {
        let mut resolved = Vec::with_capacity(table.len());
        for entry in table {
            if entry.try_start > entry.try_end {
                return Err(malformed_error!(
                    "Exception entry has tryStart {} > tryEnd {}",
                    entry.try_start,
                    entry.try_end
                ));
            }
            let index_or = |offset: u32, what: &str| -> Result<usize> {
                let offset = offset as usize;
                if offset == pc.byte_len {
                    return Ok(pc.len());
                }
                pc.index_of_offset(offset).ok_or_else(|| {
                    malformed_error!(
                        "Exception {} offset {} is not an instruction boundary",
                        what,
                        offset
                    )
                })
            };
            resolved.push(ResolvedHandler {
                try_start: index_or(entry.try_start, "tryStart")?,
                try_end: index_or(entry.try_end, "tryEnd")?,
                handler: index_or(entry.handler, "handler")?,
            });
        }
        Ok(resolved)
    }

    /// Scans the stream once and collects every block-start marker into a
    /// fresh buffer. The ordered set does the sort/dedupe commit; end
    /// markers are implied by the next start, which also gives the
    /// end-before-start attribution at equal offsets.
    fn collect_markers(pc: &MethodPcInfo, handlers: &[ResolvedHandler]) -> Result<BTreeSet<usize>> {
        let n = pc.len();
        let mut starts = BTreeSet::new();
        starts.insert(0);

        for (i, info) in pc.infos.iter().enumerate() {
            if let Some(offset) = info.jump_offset() {
                let target_byte = Self::checked_target(pc.pc_offsets[i], offset, pc.byte_len)?;
                let target = pc.index_of_offset(target_byte).ok_or_else(|| {
                    malformed_error!(
                        "Jump at instruction {} targets non-boundary offset {}",
                        i,
                        target_byte
                    )
                })?;
                starts.insert(target);
                if i + 1 < n {
                    starts.insert(i + 1);
                }
            } else if (info.is_return() || info.is_throw()) && i + 1 < n {
                starts.insert(i + 1);
            }
        }

        for h in handlers {
            starts.insert(h.try_start);
            if h.try_end < n {
                starts.insert(h.try_end);
            }
            if h.handler < n {
                starts.insert(h.handler);
            }
        }

        Ok(starts)
    }

    /// Computes a jump-target byte offset with bounds checking.
    fn checked_target(base: usize, offset: i64, byte_len: usize) -> Result<usize> {
        let target =
            i64::try_from(base).map_err(|_| malformed_error!("pc offset overflow"))? + offset;
        if target < 0 || target as usize >= byte_len {
            return Err(malformed_error!(
                "Jump target {} outside method of {} bytes",
                target,
                byte_len
            ));
        }
        Ok(target as usize)
    }

    /// Materializes the region table from the committed start markers.
    fn commit_regions(pc: &MethodPcInfo, starts: &BTreeSet<usize>) -> Self {
        let n = pc.len();
        let bounds: Vec<usize> = starts.iter().copied().filter(|s| *s < n).collect();

        let mut regions = Vec::with_capacity(bounds.len() + 1);
        for (idx, &start) in bounds.iter().enumerate() {
            let end = bounds.get(idx + 1).copied().unwrap_or(n);
            regions.push(BytecodeRegion::new(idx, start, end));
        }

        // A stream whose final instruction does not terminate needs a
        // synthesized empty end region so every start has a matching end.
        let last_terminates = pc
            .infos
            .last()
            .map(super::bytecode::BytecodeInfo::is_terminator)
            .unwrap_or(true);
        if !last_terminates {
            let id = regions.len();
            regions.push(BytecodeRegion::new(id, n, n));
        }

        let mut region_of = vec![0usize; n];
        for region in &regions {
            for i in region.start..region.end {
                region_of[i] = region.id;
            }
        }

        RegionGraph {
            regions,
            region_of,
            dfs_timestamp: Vec::new(),
            dfs_order: Vec::new(),
        }
    }

    /// Wires control-flow successors from each region's final instruction.
    fn wire_edges(&mut self, pc: &MethodPcInfo) -> Result<()> {
        let n = pc.len();
        let mut edges: Vec<(usize, usize)> = Vec::new();

        for region in &self.regions {
            if region.is_empty() {
                continue;
            }
            let last = region.end - 1;
            let info = &pc.infos[last];

            if let Some(offset) = info.jump_offset() {
                let target_byte = Self::checked_target(pc.pc_offsets[last], offset, pc.byte_len)?;
                let target = self.region_of[pc
                    .index_of_offset(target_byte)
                    .ok_or_else(|| GraphError(format!("Unsplit jump target {target_byte}")))?];
                if info.is_cond_jump() {
                    let fall = self.region_at(region.end)?;
                    if target == fall {
                        // Both arms landing on one region would leave the
                        // false projection without a control edge of its
                        // own; no emitter produces such a branch.
                        return Err(malformed_error!(
                            "Conditional jump at instruction {} branches to its own fall-through",
                            last
                        ));
                    }
                    // Successor order is fixed: branch target first, then
                    // fall-through. Gate emission relies on it.
                    edges.push((region.id, target));
                    edges.push((region.id, fall));
                } else {
                    edges.push((region.id, target));
                }
            } else if info.is_return() || info.is_throw() {
                // No successors.
            } else if region.end <= n {
                edges.push((region.id, self.region_at(region.end)?));
            }
        }

        for (from, to) in edges {
            if !self.regions[from].succs.contains(&to) {
                self.regions[from].succs.push(to);
            }
        }
        Ok(())
    }

    /// The region starting exactly at instruction index `start`.
    fn region_at(&self, start: usize) -> Result<usize> {
        self.regions
            .iter()
            .find(|r| r.start == start)
            .map(|r| r.id)
            .ok_or_else(|| GraphError(format!("No region starts at instruction {start}")))
    }

    /// Associates protected regions with their innermost catch handler and
    /// adds the corresponding control-flow edges.
    ///
    /// Handlers sort by try-range start descending, so the most deeply
    /// nested range claims its regions first; once a region is claimed,
    /// redundant outer handlers are dropped for it.
    fn wire_exceptions(&mut self, pc: &MethodPcInfo, handlers: &[ResolvedHandler]) {
        let mut ordered: Vec<ResolvedHandler> = handlers.to_vec();
        ordered.sort_by(|a, b| {
            b.try_start
                .cmp(&a.try_start)
                .then(a.try_end.cmp(&b.try_end))
        });

        let mut associations: Vec<(usize, usize)> = Vec::new();
        for h in &ordered {
            let Ok(handler_region) = self.region_at(h.handler) else {
                continue;
            };
            for region in &self.regions {
                if region.id == handler_region
                    || region.start < h.try_start
                    || region.end > h.try_end
                    || region.is_empty()
                {
                    continue;
                }
                let can_raise = (region.start..region.end).any(|i| pc.infos[i].is_general());
                if !can_raise {
                    continue;
                }
                let already_claimed = associations.iter().any(|(r, _)| *r == region.id);
                if !already_claimed {
                    associations.push((region.id, handler_region));
                }
            }
        }

        for (protected, handler) in associations {
            self.regions[protected].catches.push(handler);
            self.regions[handler].trys.push(protected);
            if !self.regions[protected].succs.contains(&handler) {
                self.regions[protected].succs.push(handler);
            }
        }
    }

    /// Rebuilds every `preds` list from the `succs` lists, restoring edge
    /// symmetry. Dead regions keep empty lists.
    pub fn rebuild_preds(&mut self) {
        for region in &mut self.regions {
            region.preds.clear();
        }
        let edges: Vec<(usize, usize)> = self
            .regions
            .iter()
            .filter(|r| !r.is_dead)
            .flat_map(|r| r.succs.iter().map(move |s| (r.id, *s)))
            .collect();
        for (from, to) in edges {
            if !self.regions[to].preds.contains(&from) {
                self.regions[to].preds.push(from);
            }
        }
    }

    /// Recomputes edge symmetry and loop-back classification after the
    /// dominator pass has run.
    ///
    /// An edge `p -> b` is a back edge when `b` dominates `p` (self-loops
    /// included). Loop-backs can only be classified here because dominance
    /// is required.
    pub fn update_cfg(&mut self) {
        self.rebuild_preds();

        let live: Vec<usize> = self.live_ids().collect();
        for &b in &live {
            let preds = self.regions[b].preds.clone();
            let mut loopbacks = HashSet::new();
            for p in preds {
                if self.dominates(b, p) {
                    loopbacks.insert(p);
                }
            }
            self.regions[b].num_loop_backs = loopbacks.len();
            self.regions[b].num_state_preds = self.regions[b].preds.len();
            self.regions[b].loopback_blocks = loopbacks;
        }
    }

    /// True if region `a` dominates region `b`, walking the idom chain.
    ///
    /// Both regions must be live and the dominator pass must have run.
    #[must_use]
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        if a == b {
            return true;
        }
        let entry = self.entry();
        let mut current = b;
        while current != entry {
            let idom = self.regions[current].idom;
            if idom == a {
                return true;
            }
            if idom == current {
                break;
            }
            current = idom;
        }
        a == entry
    }

    /// The entry region id. Always 0: the first region starts at
    /// instruction 0 by construction.
    #[must_use]
    pub fn entry(&self) -> usize {
        0
    }

    /// Number of regions, dead ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// True if the graph holds no regions at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Borrows one region.
    #[must_use]
    pub fn region(&self, id: usize) -> &BytecodeRegion {
        &self.regions[id]
    }

    /// Mutably borrows one region.
    pub fn region_mut(&mut self, id: usize) -> &mut BytecodeRegion {
        &mut self.regions[id]
    }

    /// All regions, dead ones included.
    #[must_use]
    pub fn regions(&self) -> &[BytecodeRegion] {
        &self.regions
    }

    /// The region containing instruction index `i`.
    #[must_use]
    pub fn region_of_instruction(&self, i: usize) -> usize {
        self.region_of[i]
    }

    /// Live region ids in creation order.
    pub fn live_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.regions
            .iter()
            .filter(|r| !r.is_dead)
            .map(|r| r.id)
    }

    /// Live region ids in DFS order. Empty before the dominator pass runs.
    #[must_use]
    pub fn dfs_order(&self) -> &[usize] {
        &self.dfs_order
    }

    /// DFS timestamp of a region, `None` for dead regions.
    #[must_use]
    pub fn dfs_timestamp(&self, id: usize) -> Option<usize> {
        self.dfs_timestamp.get(id).copied().flatten()
    }

    pub(crate) fn set_dfs(&mut self, timestamps: Vec<Option<usize>>, order: Vec<usize>) {
        self.dfs_timestamp = timestamps;
        self.dfs_order = order;
    }

    /// Generates a Graphviz DOT rendering of the region graph.
    ///
    /// Exception edges render dashed; dead regions render grey.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();
        dot.push_str("digraph regions {\n");
        if let Some(name) = title {
            let _ = writeln!(dot, "    label=\"{name}\";");
        }
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");

        for region in &self.regions {
            let style = if region.is_dead {
                ", style=filled, fillcolor=grey"
            } else if region.is_catch() {
                ", style=filled, fillcolor=lightyellow"
            } else {
                ""
            };
            let _ = writeln!(
                dot,
                "    B{} [label=\"B{} [{}, {})\"{}];",
                region.id, region.id, region.start, region.end, style
            );
        }
        for region in &self.regions {
            for succ in &region.succs {
                let style = if region.catches.contains(succ) {
                    " [style=dashed]"
                } else {
                    ""
                };
                let _ = writeln!(dot, "    B{} -> B{}{};", region.id, succ, style);
            }
        }
        dot.push_str("}\n");
        dot
    }

    /// Counts the throw-capable instructions of `protected` that feed the
    /// catch handler's merge.
    #[must_use]
    pub fn exception_sources(&self, protected: usize, pc: &MethodPcInfo) -> Vec<usize> {
        let region = &self.regions[protected];
        (region.start..region.end)
            .filter(|i| pc.infos[*i].is_general())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn edge_map(&self) -> std::collections::HashMap<usize, Vec<usize>> {
        self.regions
            .iter()
            .map(|r| (r.id, r.succs.clone()))
            .collect()
    }
}
