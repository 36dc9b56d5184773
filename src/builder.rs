//! Bytecode-to-circuit lowering.
//!
//! The builder runs after region discovery, dominator analysis and phi
//! placement, and emits the gate graph in three phases:
//!
//! 1. **Heads.** Every live join block gets its control head up front: a
//!    `MERGE` (or `LOOP_BEGIN` with forward/back sub-merges) plus the
//!    mirroring `DEPEND_SELECTOR`, all with [`GateRef::NULL`] placeholder
//!    slots. Single-predecessor blocks get no head at all; they read their
//!    predecessor's exit directly.
//! 2. **Bodies.** A walk in depth-first order lowers each instruction,
//!    threading the control and effect-order chains through the block, then
//!    patches every placeholder slot from the recorded block exits. Value
//!    operands stay unwired and are queued instead.
//! 3. **Values.** The queue drains through [`CircuitBuilder::rename_variable`],
//!    the recursive SSA renamer that walks backwards through blocks and up
//!    the dominator tree, materializing constants, value selectors and
//!    generator save/restore gates on demand.

use std::{collections::HashMap, sync::Arc};

use crate::{
    bytecode::{MethodInfo, MethodPcInfo, Opcode, OpcodeFlags, Operand},
    circuit::{Circuit, ConstValue, GateKind, GateRef},
    graph::{dominators, phis, RegionGraph, SsaVar},
    Result,
};

/// How a predecessor reaches a block, at gate granularity.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SlotKind {
    /// The method entry itself (roots of the control/effect planes).
    Entry,
    /// An ordinary control edge from the predecessor's exit.
    Forward,
    /// The exceptional edge of one specific throw-capable instruction.
    Exception { instr: usize },
    /// A back edge of a loop this block heads.
    LoopBack,
}

/// One incoming path of a block. Slot order is the positional contract
/// shared by the block's merge, depend selector and value selectors.
#[derive(Debug, Clone, Copy)]
struct PredSlot {
    pred: usize,
    kind: SlotKind,
}

/// A block's control exit, as seen by its successors.
#[derive(Debug, Clone, Copy, Default)]
enum RegionExit {
    /// Terminated by return or throw; no successor reads it.
    #[default]
    None,
    /// Straight-line exit.
    Normal(GateRef),
    /// Conditional exit: the taken projection flows to `target`, the
    /// fall-through projection to `fall`.
    Branch {
        if_true: GateRef,
        if_false: GateRef,
        target: usize,
        fall: usize,
    },
}

/// Per-block build state.
#[derive(Debug, Default)]
struct RegionState {
    slots: Vec<PredSlot>,
    /// `MERGE`/`LOOP_BEGIN`, or null for pass-through blocks.
    state_head: GateRef,
    depend_head: GateRef,
    /// Forward-side sub-merge of a loop head (null when unsplit).
    forward_merge: GateRef,
    back_merge: GateRef,
    forward_depend: GateRef,
    back_depend: GateRef,
    /// Resolved control/effect at the block's first instruction.
    entry_state: GateRef,
    entry_depend: GateRef,
    exit: RegionExit,
    exit_depend: GateRef,
    /// `GET_EXCEPTION` gate of a catch entry.
    get_exception: GateRef,
    /// Memoized value selectors, one per phi variable.
    selectors: HashMap<SsaVar, GateRef>,
}

impl RegionState {
    fn is_pass_through(&self) -> bool {
        self.slots.len() <= 1
    }
}

/// A value operand queued for the renaming phase.
#[derive(Debug, Clone, Copy)]
struct PendingValue {
    gate: GateRef,
    slot: usize,
    region: usize,
    /// Renaming looks at definitions strictly before this instruction.
    limit: usize,
    var: SsaVar,
}

/// Output of a successful build.
#[derive(Debug)]
pub struct BuildResult {
    /// The finished gate graph.
    pub circuit: Circuit,
    /// The analyzed region graph the circuit was lowered from.
    pub graph: RegionGraph,
    /// Main gate of each instruction, by instruction index. `None` for
    /// instructions that lower to no gate (moves, unconditional jumps) or
    /// sit in dead blocks; constants appear once materialized.
    pub bytecode_to_gate: Vec<Option<GateRef>>,
    /// Reverse map from gates back to the instruction they lower.
    pub gate_to_bytecode: HashMap<GateRef, usize>,
}

/// Builds the circuit of one method.
///
/// Runs the whole pipeline: region discovery, dominator analysis, phi
/// placement, then the three lowering phases. The returned circuit has
/// passed [`Circuit::verify`].
///
/// # Errors
///
/// Fails on malformed input (empty method, jumps to non-boundary offsets,
/// inconsistent exception tables) and on verification failure, which
/// indicates a lowering bug rather than bad input.
pub fn build_circuit(method: &MethodInfo) -> Result<BuildResult> {
    let mut graph = RegionGraph::build(&method.pc_info, &method.exception_table)?;
    dominators::compute(&mut graph);
    graph.update_cfg();
    phis::insert(&mut graph, &method.pc_info);

    let builder = CircuitBuilder::new(method, graph);
    let result = builder.run()?;
    result.circuit.verify()?;
    Ok(result)
}

struct CircuitBuilder {
    pc: Arc<MethodPcInfo>,
    graph: RegionGraph,
    circuit: Circuit,
    states: Vec<RegionState>,
    arg_gates: HashMap<u16, GateRef>,
    undefined_const: GateRef,
    exception_const: GateRef,
    constant_cache: HashMap<usize, GateRef>,
    restore_cache: HashMap<(usize, u16), GateRef>,
    /// Per-instruction exceptional control source: the `IF_EXCEPTION`
    /// projection, or the `throw` gate itself (throws project nothing).
    exception_projection: Vec<Option<GateRef>>,
    bytecode_to_gate: Vec<Option<GateRef>>,
    gate_to_bytecode: HashMap<GateRef, usize>,
    pending: Vec<PendingValue>,
}

impl CircuitBuilder {
    fn new(method: &MethodInfo, graph: RegionGraph) -> Self {
        let n = method.pc_info.len();
        let states = (0..graph.len()).map(|_| RegionState::default()).collect();
        CircuitBuilder {
            pc: Arc::clone(&method.pc_info),
            graph,
            circuit: Circuit::new(),
            states,
            arg_gates: HashMap::new(),
            undefined_const: GateRef::NULL,
            exception_const: GateRef::NULL,
            constant_cache: HashMap::new(),
            restore_cache: HashMap::new(),
            exception_projection: vec![None; n],
            bytecode_to_gate: vec![None; n],
            gate_to_bytecode: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn run(mut self) -> Result<BuildResult> {
        self.build_heads();
        let order: Vec<usize> = self.graph.dfs_order().to_vec();
        for &id in &order {
            self.emit_region(id);
        }
        for &id in &order {
            self.patch_head_slots(id);
        }
        while let Some(p) = self.pending.pop() {
            let value = self.rename_variable(p.region, p.limit, p.var);
            self.circuit.gate_mut(p.gate).value_ins[p.slot] = value;
        }

        Ok(BuildResult {
            circuit: self.circuit,
            graph: self.graph,
            bytecode_to_gate: self.bytecode_to_gate,
            gate_to_bytecode: self.gate_to_bytecode,
        })
    }

    // ---- phase 1: heads -------------------------------------------------

    /// Computes each live block's slot list and pre-creates its control and
    /// effect-order heads with placeholder inputs.
    fn build_heads(&mut self) {
        let order: Vec<usize> = self.graph.dfs_order().to_vec();
        for id in order {
            let (forward, back) = self.collect_slots(id);
            let n_fwd = forward.len();
            let n_back = back.len();
            let mut slots = forward;
            slots.extend(back);
            self.graph.region_mut(id).num_state_preds = slots.len();

            let st = &mut self.states[id];
            st.slots = slots;
            if st.is_pass_through() {
                continue;
            }

            if n_back == 0 {
                let merge = self.circuit.add_gate(
                    GateKind::Merge,
                    vec![GateRef::NULL; n_fwd],
                    vec![],
                    vec![],
                );
                let depend = self.circuit.add_gate(
                    GateKind::DependSelector,
                    vec![merge],
                    vec![GateRef::NULL; n_fwd],
                    vec![],
                );
                let st = &mut self.states[id];
                st.state_head = merge;
                st.forward_merge = merge;
                st.depend_head = depend;
                st.forward_depend = depend;
            } else {
                self.build_loop_head(id, n_fwd, n_back);
            }
        }
    }

    /// Loop heads split into a forward side and a loop-back side; each side
    /// with more than one path gets its own sub-merge, mirrored in the
    /// effect plane.
    fn build_loop_head(&mut self, id: usize, n_fwd: usize, n_back: usize) {
        let mut fwd_state = GateRef::NULL;
        let mut fwd_depend = GateRef::NULL;
        if n_fwd > 1 {
            fwd_state = self.circuit.add_gate(
                GateKind::Merge,
                vec![GateRef::NULL; n_fwd],
                vec![],
                vec![],
            );
            fwd_depend = self.circuit.add_gate(
                GateKind::DependSelector,
                vec![fwd_state],
                vec![GateRef::NULL; n_fwd],
                vec![],
            );
        }
        let mut back_state = GateRef::NULL;
        let mut back_depend = GateRef::NULL;
        if n_back > 1 {
            back_state = self.circuit.add_gate(
                GateKind::Merge,
                vec![GateRef::NULL; n_back],
                vec![],
                vec![],
            );
            back_depend = self.circuit.add_gate(
                GateKind::DependSelector,
                vec![back_state],
                vec![GateRef::NULL; n_back],
                vec![],
            );
        }

        let loop_begin = self.circuit.add_gate(
            GateKind::LoopBegin,
            vec![fwd_state, back_state],
            vec![],
            vec![],
        );
        let depend_head = self.circuit.add_gate(
            GateKind::DependSelector,
            vec![loop_begin],
            vec![fwd_depend, back_depend],
            vec![],
        );

        let st = &mut self.states[id];
        st.state_head = loop_begin;
        st.depend_head = depend_head;
        st.forward_merge = fwd_state;
        st.back_merge = back_state;
        st.forward_depend = fwd_depend;
        st.back_depend = back_depend;
    }

    /// Splits a block's predecessors into the forward group (entry,
    /// ordinary edges and per-instruction exception edges) and the
    /// loop-back group.
    fn collect_slots(&self, id: usize) -> (Vec<PredSlot>, Vec<PredSlot>) {
        let region = self.graph.region(id);
        let mut forward = Vec::new();
        let mut back = Vec::new();

        if id == self.graph.entry() {
            forward.push(PredSlot {
                pred: usize::MAX,
                kind: SlotKind::Entry,
            });
        }
        for &p in &region.preds {
            if region.loopback_blocks.contains(&p) {
                back.push(PredSlot {
                    pred: p,
                    kind: SlotKind::LoopBack,
                });
            } else if region.trys.contains(&p) {
                // One slot per throw-capable instruction of the protected
                // block; the value of a variable at the handler may differ
                // per throw site.
                for instr in self.graph.exception_sources(p, &self.pc) {
                    forward.push(PredSlot {
                        pred: p,
                        kind: SlotKind::Exception { instr },
                    });
                }
            } else {
                forward.push(PredSlot {
                    pred: p,
                    kind: SlotKind::Forward,
                });
            }
        }
        (forward, back)
    }

    /// Where slot `k` of a block patches into: the `(gate, position)` pair
    /// for the state plane and for the effect plane.
    fn slot_targets(&self, id: usize, k: usize) -> ((GateRef, usize), (GateRef, usize)) {
        let st = &self.states[id];
        let n_back = st
            .slots
            .iter()
            .filter(|s| s.kind == SlotKind::LoopBack)
            .count();
        let n_fwd = st.slots.len() - n_back;

        if self.circuit.gate(st.state_head).kind == GateKind::LoopBegin {
            if k < n_fwd {
                if n_fwd > 1 {
                    ((st.forward_merge, k), (st.forward_depend, k))
                } else {
                    ((st.state_head, 0), (st.depend_head, 0))
                }
            } else {
                let j = k - n_fwd;
                if n_back > 1 {
                    ((st.back_merge, j), (st.back_depend, j))
                } else {
                    ((st.state_head, 1), (st.depend_head, 1))
                }
            }
        } else {
            ((st.state_head, k), (st.depend_head, k))
        }
    }

    // ---- phase 2: bodies ------------------------------------------------

    fn emit_region(&mut self, id: usize) {
        let (mut state, mut depend) = self.resolve_entry(id);

        if self.graph.region(id).is_catch() {
            let get_exc = self.circuit.add_gate(
                GateKind::GetException,
                vec![state],
                vec![depend],
                vec![],
            );
            self.states[id].get_exception = get_exc;
            depend = get_exc;
        }
        self.states[id].entry_state = state;
        self.states[id].entry_depend = depend;

        let (start, end) = {
            let r = self.graph.region(id);
            (r.start, r.end)
        };
        let has_catch = !self.graph.region(id).catches.is_empty();
        let mut exit = RegionExit::Normal(state);

        for i in start..end {
            let info = self.pc.infos[i].clone();
            if info.is_constant() || info.is_move() || info.is_jump() {
                continue;
            }

            if info.is_cond_jump() {
                let branch = self.circuit.add_gate(
                    GateKind::IfBranch,
                    vec![state],
                    vec![],
                    vec![GateRef::NULL],
                );
                self.queue_value(branch, 0, id, i, SsaVar::Acc);
                self.map_gate(i, branch);
                let if_true = self
                    .circuit
                    .add_gate(GateKind::IfTrue, vec![branch], vec![], vec![]);
                let if_false = self
                    .circuit
                    .add_gate(GateKind::IfFalse, vec![branch], vec![], vec![]);
                let (target, fall) = self.branch_successors(id);
                exit = RegionExit::Branch {
                    if_true,
                    if_false,
                    target,
                    fall,
                };
                continue;
            }

            if info.is_return() {
                let value = if info.acc_in {
                    GateRef::NULL
                } else {
                    self.undefined_constant()
                };
                let ret = self.circuit.add_gate(
                    GateKind::Return,
                    vec![state],
                    vec![depend],
                    vec![value],
                );
                if info.acc_in {
                    self.queue_value(ret, 0, id, i, SsaVar::Acc);
                }
                self.map_gate(i, ret);
                self.circuit.add_return(ret);
                exit = RegionExit::None;
                continue;
            }

            if info.is_throw() {
                let gate = self.circuit.add_gate(
                    GateKind::JsBytecode(info.opcode),
                    vec![state],
                    vec![depend],
                    vec![GateRef::NULL],
                );
                self.queue_value(gate, 0, id, i, SsaVar::Acc);
                self.map_gate(i, gate);
                // Throws project nothing; the gate itself is the
                // exceptional control source.
                self.exception_projection[i] = Some(gate);
                if !has_catch {
                    self.emit_exception_exit(gate, gate);
                }
                exit = RegionExit::None;
                continue;
            }

            if info.is_general() {
                let mut value_ins = Vec::new();
                let mut queued: Vec<SsaVar> = Vec::new();
                for op in &info.inputs {
                    if let Operand::VirtualRegister(v) = op {
                        value_ins.push(GateRef::NULL);
                        queued.push(SsaVar::Reg(*v));
                    }
                }
                if info.acc_in {
                    value_ins.push(GateRef::NULL);
                    queued.push(SsaVar::Acc);
                }
                let gate = self.circuit.add_gate(
                    GateKind::JsBytecode(info.opcode),
                    vec![state],
                    vec![depend],
                    value_ins,
                );
                for (slot, var) in queued.into_iter().enumerate() {
                    self.queue_value(gate, slot, id, i, var);
                }
                self.map_gate(i, gate);

                let success = self
                    .circuit
                    .add_gate(GateKind::IfSuccess, vec![gate], vec![], vec![]);
                let exception = self
                    .circuit
                    .add_gate(GateKind::IfException, vec![gate], vec![], vec![]);
                self.exception_projection[i] = Some(exception);
                if !has_catch {
                    self.emit_exception_exit(exception, gate);
                }
                state = success;
                depend = gate;
                exit = RegionExit::Normal(state);
            }
        }

        self.states[id].exit = exit;
        self.states[id].exit_depend = depend;
    }

    /// Resolves a block's incoming control/effect pair. Pass-through blocks
    /// read their single predecessor's exit; join blocks read their heads.
    fn resolve_entry(&mut self, id: usize) -> (GateRef, GateRef) {
        if !self.states[id].is_pass_through() {
            return (self.states[id].state_head, self.states[id].depend_head);
        }
        let slot = self.states[id].slots[0];
        self.slot_sources(slot, id)
    }

    /// The control/effect pair one slot contributes.
    fn slot_sources(&mut self, slot: PredSlot, succ: usize) -> (GateRef, GateRef) {
        match slot.kind {
            SlotKind::Entry => (self.circuit.state_entry(), self.circuit.depend_entry()),
            SlotKind::Forward | SlotKind::LoopBack => (
                self.exit_state_to(slot.pred, succ),
                self.states[slot.pred].exit_depend,
            ),
            SlotKind::Exception { instr } => {
                let projection = self.exception_projection[instr]
                    .unwrap_or_else(|| unreachable!("exception source lowered before its handler"));
                let source = self.bytecode_to_gate[instr]
                    .unwrap_or_else(|| unreachable!("exception source lowered before its handler"));
                // Re-anchor the throwing gate's effect onto its exceptional
                // control edge.
                let relay = self.circuit.add_gate(
                    GateKind::DependRelay,
                    vec![projection],
                    vec![source],
                    vec![],
                );
                (projection, relay)
            }
        }
    }

    /// The control gate predecessor `pred` hands to successor `succ`.
    fn exit_state_to(&self, pred: usize, succ: usize) -> GateRef {
        match self.states[pred].exit {
            RegionExit::Normal(state) => state,
            RegionExit::Branch {
                if_true,
                if_false,
                target,
                fall,
            } => {
                if succ == target {
                    if_true
                } else if succ == fall {
                    if_false
                } else {
                    unreachable!("branch exit feeds a region it never targets")
                }
            }
            RegionExit::None => unreachable!("terminated region used as forward predecessor"),
        }
    }

    /// Target and fall-through regions of a block ending in a conditional
    /// jump. Edge wiring orders the successors target-first and rejects a
    /// branch whose arms coincide, so the first two entries are exactly
    /// the branch arms (exception edges only append after them).
    fn branch_successors(&self, id: usize) -> (usize, usize) {
        match self.graph.region(id).succs.as_slice() {
            [target, fall, ..] => (*target, *fall),
            _ => unreachable!("conditional jump region with fewer than two successors"),
        }
    }

    /// An uncaught exception leaves the method: a `RETURN` carrying the
    /// exception marker, fed from the exceptional control edge.
    fn emit_exception_exit(&mut self, control: GateRef, source: GateRef) {
        let value = self.exception_constant();
        let ret = self
            .circuit
            .add_gate(GateKind::Return, vec![control], vec![source], vec![value]);
        self.circuit.add_return(ret);
    }

    /// Patches every placeholder slot of a join block's heads, now that all
    /// predecessors have lowered.
    fn patch_head_slots(&mut self, id: usize) {
        if self.states[id].is_pass_through() {
            return;
        }
        let slots = self.states[id].slots.clone();
        for (k, slot) in slots.into_iter().enumerate() {
            let (state_src, depend_src) = self.slot_sources(slot, id);
            let ((state_gate, state_pos), (depend_gate, depend_pos)) = self.slot_targets(id, k);
            self.circuit.gate_mut(state_gate).state_ins[state_pos] = state_src;
            self.circuit.gate_mut(depend_gate).depend_ins[depend_pos] = depend_src;
        }
    }

    fn queue_value(&mut self, gate: GateRef, slot: usize, region: usize, limit: usize, var: SsaVar) {
        self.pending.push(PendingValue {
            gate,
            slot,
            region,
            limit,
            var,
        });
    }

    fn map_gate(&mut self, instr: usize, gate: GateRef) {
        self.bytecode_to_gate[instr] = Some(gate);
        self.gate_to_bytecode.insert(gate, instr);
    }

    // ---- phase 3: values ------------------------------------------------

    /// Resolves the value of `var` as observed just before instruction
    /// `limit` of `region`.
    ///
    /// The renamer scans the block backwards for a reaching definition,
    /// looking through the renaming-transparent moves (`lda`/`sta`/`mov`).
    /// Failing that it falls back, in order: the exception value at a catch
    /// entry, the block's value selector if the variable phis here, the
    /// incoming arguments at the method entry, and finally the immediate
    /// dominator at its exit. An unresolvable variable is a pipeline
    /// invariant violation, not an input error.
    fn rename_variable(&mut self, region: usize, limit: usize, var: SsaVar) -> GateRef {
        let start = self.graph.region(region).start;
        let pc = Arc::clone(&self.pc);

        let mut i = limit;
        while i > start {
            i -= 1;
            let info = &pc.infos[i];
            match var {
                SsaVar::Acc if info.acc_out => {
                    return if info.is_constant() {
                        self.constant_gate(i)
                    } else if info.opcode == Opcode::Lda {
                        let src = match info.inputs.first() {
                            Some(Operand::VirtualRegister(v)) => *v,
                            _ => unreachable!("lda without a register operand"),
                        };
                        self.rename_variable(region, i, SsaVar::Reg(src))
                    } else {
                        self.bytecode_to_gate[i]
                            .unwrap_or_else(|| unreachable!("accumulator def without a gate"))
                    };
                }
                SsaVar::Reg(v) if info.writes_reg(v) => {
                    return match info.opcode {
                        Opcode::Sta => self.rename_variable(region, i, SsaVar::Acc),
                        Opcode::Mov => {
                            let src = match info.inputs.first() {
                                Some(Operand::VirtualRegister(s)) => *s,
                                _ => unreachable!("mov without a source register"),
                            };
                            self.rename_variable(region, i, SsaVar::Reg(src))
                        }
                        _ if info.flags().contains(OpcodeFlags::RESUME) => {
                            self.restore_register(i, v)
                        }
                        _ => self.bytecode_to_gate[i]
                            .unwrap_or_else(|| unreachable!("register def without a gate")),
                    };
                }
                _ => {}
            }
        }

        // Nothing in the block defines it; consult the block's head.
        if var == SsaVar::Acc && self.graph.region(region).is_catch() {
            return self.states[region].get_exception;
        }
        if self.graph.region(region).phis.contains(&var) {
            return self.value_selector(region, var);
        }
        if region == self.graph.entry() {
            return self.entry_value(var);
        }
        let idom = self.graph.region(region).idom;
        debug_assert_ne!(idom, region);
        let idom_end = self.graph.region(idom).end;
        self.rename_variable(idom, idom_end, var)
    }

    /// The memoized value selector of a phi variable at a join block.
    ///
    /// The selector is registered before its inputs resolve so that a
    /// loop-back path re-entering the same block observes the selector
    /// itself instead of recursing forever.
    fn value_selector(&mut self, region: usize, var: SsaVar) -> GateRef {
        if let Some(&existing) = self.states[region].selectors.get(&var) {
            return existing;
        }

        let st = &self.states[region];
        let slots = st.slots.clone();
        let state_head = st.state_head;
        let forward_merge = st.forward_merge;
        let is_loop = self.circuit.gate(state_head).kind == GateKind::LoopBegin;

        if !is_loop {
            let selector = self.circuit.add_gate(
                GateKind::ValueSelector,
                vec![state_head],
                vec![],
                vec![GateRef::NULL; slots.len()],
            );
            self.states[region].selectors.insert(var, selector);
            for (k, slot) in slots.iter().enumerate() {
                let value = self.slot_value(*slot, var);
                self.circuit.gate_mut(selector).value_ins[k] = value;
            }
            return selector;
        }

        // Loop heads mirror the state split: the parent selector chooses
        // between the forward side and the loop-back side, each side
        // collapsing through its own sub-selector when it merges several
        // paths.
        let n_back = slots
            .iter()
            .filter(|s| s.kind == SlotKind::LoopBack)
            .count();
        let n_fwd = slots.len() - n_back;

        let parent = self.circuit.add_gate(
            GateKind::ValueSelector,
            vec![state_head],
            vec![],
            vec![GateRef::NULL; 2],
        );
        self.states[region].selectors.insert(var, parent);

        let fwd_value = if n_fwd > 1 {
            let sub = self.circuit.add_gate(
                GateKind::ValueSelector,
                vec![forward_merge],
                vec![],
                vec![GateRef::NULL; n_fwd],
            );
            for k in 0..n_fwd {
                let value = self.slot_value(slots[k], var);
                self.circuit.gate_mut(sub).value_ins[k] = value;
            }
            sub
        } else {
            self.slot_value(slots[0], var)
        };
        self.circuit.gate_mut(parent).value_ins[0] = fwd_value;

        let back_value = if n_back > 1 {
            let back_merge = self.states[region].back_merge;
            let sub = self.circuit.add_gate(
                GateKind::ValueSelector,
                vec![back_merge],
                vec![],
                vec![GateRef::NULL; n_back],
            );
            for j in 0..n_back {
                let value = self.slot_value(slots[n_fwd + j], var);
                self.circuit.gate_mut(sub).value_ins[j] = value;
            }
            sub
        } else {
            self.slot_value(slots[n_fwd], var)
        };
        self.circuit.gate_mut(parent).value_ins[1] = back_value;
        parent
    }

    /// The value `var` carries along one incoming path of a block.
    ///
    /// An exceptional path reads the variable as of the throwing
    /// instruction: writes the instruction would have performed on success
    /// never happened on that path.
    fn slot_value(&mut self, slot: PredSlot, var: SsaVar) -> GateRef {
        match slot.kind {
            SlotKind::Entry => self.entry_value(var),
            SlotKind::Forward | SlotKind::LoopBack => {
                let end = self.graph.region(slot.pred).end;
                self.rename_variable(slot.pred, end, var)
            }
            SlotKind::Exception { instr } => self.rename_variable(slot.pred, instr, var),
        }
    }

    /// The value of `var` at the method entry: an argument gate per
    /// register, undefined for the accumulator.
    fn entry_value(&mut self, var: SsaVar) -> GateRef {
        match var {
            SsaVar::Acc => self.undefined_constant(),
            SsaVar::Reg(v) => {
                if let Some(&gate) = self.arg_gates.get(&v) {
                    return gate;
                }
                // Declared arguments arrive in the leading registers; the
                // rest still read as (undefined-valued) incoming arguments
                // so renaming is total. Both lower to ARG gates.
                let gate = self
                    .circuit
                    .add_gate(GateKind::Arg(v), vec![], vec![], vec![]);
                self.arg_gates.insert(v, gate);
                gate
            }
        }
    }

    /// Memoized constant gate of a literal-producing instruction.
    fn constant_gate(&mut self, instr: usize) -> GateRef {
        if let Some(&gate) = self.constant_cache.get(&instr) {
            return gate;
        }
        let info = &self.pc.infos[instr];
        let value = match info.opcode {
            Opcode::LdUndefined => ConstValue::Undefined,
            Opcode::LdNull => ConstValue::Null,
            Opcode::LdTrue => ConstValue::Bool(true),
            Opcode::LdFalse => ConstValue::Bool(false),
            Opcode::LdHole => ConstValue::Hole,
            Opcode::LdNan => ConstValue::double(f64::NAN),
            Opcode::LdInfinity => ConstValue::double(f64::INFINITY),
            Opcode::Ldai => match info.inputs.first() {
                Some(Operand::Immediate(imm)) => ConstValue::Int(*imm as i32),
                _ => unreachable!("ldai without an immediate"),
            },
            Opcode::Fldai => match info.inputs.first() {
                Some(Operand::Immediate(bits)) => ConstValue::Double(*bits as u64),
                _ => unreachable!("fldai without an immediate"),
            },
            other => unreachable!("{other:?} is not a literal producer"),
        };
        let gate = self
            .circuit
            .add_gate(GateKind::Constant(value), vec![], vec![], vec![]);
        self.constant_cache.insert(instr, gate);
        self.map_gate(instr, gate);
        gate
    }

    fn undefined_constant(&mut self) -> GateRef {
        if self.undefined_const.is_null() {
            self.undefined_const = self.circuit.add_gate(
                GateKind::Constant(ConstValue::Undefined),
                vec![],
                vec![],
                vec![],
            );
        }
        self.undefined_const
    }

    fn exception_constant(&mut self) -> GateRef {
        if self.exception_const.is_null() {
            self.exception_const = self.circuit.add_gate(
                GateKind::Constant(ConstValue::Exception),
                vec![],
                vec![],
                vec![],
            );
        }
        self.exception_const
    }

    /// Memoized restore gate for one register of a generator resume, with
    /// the matching save spliced into the effect chain of the next suspend.
    fn restore_register(&mut self, resume: usize, reg: u16) -> GateRef {
        if let Some(&gate) = self.restore_cache.get(&(resume, reg)) {
            return gate;
        }
        let resume_gate = self.bytecode_to_gate[resume]
            .unwrap_or_else(|| unreachable!("resume point lowered before its restores"));
        let restore = self.circuit.add_gate(
            GateKind::RestoreRegister(reg),
            vec![],
            vec![resume_gate],
            vec![],
        );
        self.restore_cache.insert((resume, reg), restore);

        // The value restored here must have been captured at the suspend
        // the generator frame was written by: splice a save before the next
        // suspend in bytecode order, its value renamed at that point.
        if let Some(suspend) = (resume + 1..self.pc.len())
            .find(|&j| self.pc.infos[j].flags().contains(OpcodeFlags::SUSPEND))
        {
            if let Some(suspend_gate) = self.bytecode_to_gate[suspend] {
                let upstream = self.circuit.gate(suspend_gate).depend_ins[0];
                let save = self.circuit.add_gate(
                    GateKind::SaveRegister(reg),
                    vec![],
                    vec![upstream],
                    vec![GateRef::NULL],
                );
                self.circuit.gate_mut(suspend_gate).depend_ins[0] = save;
                let suspend_region = self.graph.region_of_instruction(suspend);
                self.queue_value(save, 0, suspend_region, suspend, SsaVar::Reg(reg));
            }
        }
        restore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::method;

    fn kinds(result: &BuildResult, want: fn(&GateKind) -> bool) -> Vec<GateRef> {
        result.circuit.gates_of_kind(want)
    }

    #[test]
    fn test_straight_line_circuit() {
        // ldai 1; sta v0; lda v0; return
        let code = [
            0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
            0x0A, 0x00, // sta v0
            0x09, 0x00, // lda v0
            0x38, // return
        ];
        let result = build_circuit(&method(1, 0, &code, &[])).unwrap();
        let returns = kinds(&result, |k| matches!(k, GateKind::Return));
        assert_eq!(returns.len(), 1);
        // The returned value traces through lda/sta to the constant 1.
        let ret = result.circuit.gate(returns[0]);
        let value = result.circuit.gate(ret.value_ins[0]);
        assert_eq!(value.kind, GateKind::Constant(ConstValue::Int(1)));
        // No joins anywhere.
        assert!(kinds(&result, |k| matches!(k, GateKind::Merge)).is_empty());
    }

    #[test]
    fn test_constant_gate_is_memoized() {
        // The same ldai feeds two consumers through one gate.
        // ldai 5; add2 v0; add2 v0... acc redefined; instead: ldai, sta,
        // lda, add2 uses both reg and acc paths reaching the same constant.
        let code = [
            0x07, 0x05, 0x00, 0x00, 0x00, // ldai 5
            0x0A, 0x00, // sta v0
            0x09, 0x00, // lda v0
            0x12, 0x00, // add2 v0 (lhs v0, rhs acc: both are the constant)
            0x38, // return
        ];
        let result = build_circuit(&method(1, 0, &code, &[])).unwrap();
        let constants = kinds(&result, |k| {
            matches!(k, GateKind::Constant(ConstValue::Int(5)))
        });
        assert_eq!(constants.len(), 1);
        let add = kinds(&result, |k| matches!(k, GateKind::JsBytecode(Opcode::Add2)))[0];
        let ins = &result.circuit.gate(add).value_ins;
        assert_eq!(ins[0], constants[0]);
        assert_eq!(ins[1], constants[0]);
    }

    #[test]
    fn test_return_undefined_uses_constant() {
        let code = [0x39]; // return_undefined
        let result = build_circuit(&method(0, 0, &code, &[])).unwrap();
        let ret = kinds(&result, |k| matches!(k, GateKind::Return))[0];
        let value = result.circuit.gate(result.circuit.gate(ret).value_ins[0]);
        assert_eq!(value.kind, GateKind::Constant(ConstValue::Undefined));
    }

    #[test]
    fn test_entry_register_reads_argument_gate() {
        // lda v1; return -- v1 never written, must resolve to ARG.
        let code = [0x09, 0x01, 0x38];
        let result = build_circuit(&method(2, 2, &code, &[])).unwrap();
        let ret = kinds(&result, |k| matches!(k, GateKind::Return))[0];
        let value = result.circuit.gate(result.circuit.gate(ret).value_ins[0]);
        assert_eq!(value.kind, GateKind::Arg(1));
    }

    #[test]
    fn test_branch_projections_feed_merge() {
        let code = [
            0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
            0x33, 0x09, // jeqz8 +9
            0x07, 0x02, 0x00, 0x00, 0x00, // ldai 2
            0x30, 0x07, // jmp8 +7
            0x07, 0x03, 0x00, 0x00, 0x00, // ldai 3
            0x38, // return
        ];
        let result = build_circuit(&method(0, 0, &code, &[])).unwrap();
        let merges = kinds(&result, |k| matches!(k, GateKind::Merge));
        assert_eq!(merges.len(), 1);
        let merge = result.circuit.gate(merges[0]);
        assert_eq!(merge.state_ins.len(), 2);
        let in_kinds: Vec<GateKind> = merge
            .state_ins
            .iter()
            .map(|g| result.circuit.gate(*g).kind)
            .collect();
        assert!(in_kinds.contains(&GateKind::IfTrue));
        assert!(in_kinds.contains(&GateKind::IfFalse));
    }

    #[test]
    fn test_diamond_value_selector_resolves_both_constants() {
        let code = [
            0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
            0x33, 0x09, // jeqz8 +9
            0x07, 0x02, 0x00, 0x00, 0x00, // ldai 2
            0x30, 0x07, // jmp8 +7
            0x07, 0x03, 0x00, 0x00, 0x00, // ldai 3
            0x38, // return
        ];
        let result = build_circuit(&method(0, 0, &code, &[])).unwrap();
        let selectors = kinds(&result, |k| matches!(k, GateKind::ValueSelector));
        assert_eq!(selectors.len(), 1);
        let sel = result.circuit.gate(selectors[0]);
        assert_eq!(sel.value_ins.len(), 2);
        let mut values: Vec<GateKind> = sel
            .value_ins
            .iter()
            .map(|g| result.circuit.gate(*g).kind)
            .collect();
        values.sort_by_key(|k| match k {
            GateKind::Constant(ConstValue::Int(i)) => *i,
            _ => i32::MAX,
        });
        assert_eq!(
            values,
            vec![
                GateKind::Constant(ConstValue::Int(2)),
                GateKind::Constant(ConstValue::Int(3)),
            ]
        );
        // The return reads the selector.
        let ret = kinds(&result, |k| matches!(k, GateKind::Return))[0];
        assert_eq!(result.circuit.gate(ret).value_ins[0], selectors[0]);
    }

    #[test]
    fn test_general_instruction_projections() {
        // add2 gets IF_SUCCESS/IF_EXCEPTION; uncaught, so an exceptional
        // return joins the exit list.
        let code = [
            0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
            0x12, 0x00, // add2 v0
            0x38, // return
        ];
        let result = build_circuit(&method(1, 0, &code, &[])).unwrap();
        assert_eq!(kinds(&result, |k| matches!(k, GateKind::IfSuccess)).len(), 1);
        assert_eq!(kinds(&result, |k| matches!(k, GateKind::IfException)).len(), 1);
        let exits = result
            .circuit
            .gate(result.circuit.return_list())
            .state_ins
            .len();
        assert_eq!(exits, 2); // normal return + exception exit
    }

    #[test]
    fn test_catch_entry_gets_exception_value() {
        // try { add2 } catch { return acc } -- the caught return's value
        // must be the GET_EXCEPTION gate.
        let code = [
            0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
            0x12, 0x00, // add2 v0 (protected)
            0x38, // return
            0x38, // return (handler: returns the caught value)
        ];
        let result = build_circuit(&method(1, 0, &code, &[(5, 7, 8)])).unwrap();
        let get_exc = kinds(&result, |k| matches!(k, GateKind::GetException));
        assert_eq!(get_exc.len(), 1);
        let returns = kinds(&result, |k| matches!(k, GateKind::Return));
        let caught: Vec<_> = returns
            .iter()
            .filter(|r| result.circuit.gate(**r).value_ins[0] == get_exc[0])
            .collect();
        assert_eq!(caught.len(), 1);
        // The exceptional edge flows into the handler, not the exit list.
        let exits = result
            .circuit
            .gate(result.circuit.return_list())
            .state_ins
            .len();
        assert_eq!(exits, 2); // try's normal return + handler's return
    }

    #[test]
    fn test_catch_value_read_at_throw_point() {
        // Two throw sites with different values of v0 in between: the
        // handler's read of v0 selects per throw site.
        // 0: ldai 1   @0
        // 1: sta v0   @5
        // 2: inc      @7  (throw site 1: v0 == 1)
        // 3: ldai 2   @8
        // 4: sta v0   @13
        // 5: inc      @15 (throw site 2: v0 == 2)
        // 6: return   @16
        // 7: lda v0   @17 (handler)
        // 8: return   @19
        let code = [
            0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
            0x0A, 0x00, // sta v0
            0x0F, // inc
            0x07, 0x02, 0x00, 0x00, 0x00, // ldai 2
            0x0A, 0x00, // sta v0
            0x0F, // inc
            0x38, // return
            0x09, 0x00, // lda v0 (handler)
            0x38, // return
        ];
        let result = build_circuit(&method(1, 0, &code, &[(7, 16, 17)])).unwrap();
        // Two exception slots flow into the handler's merge.
        let merges = kinds(&result, |k| matches!(k, GateKind::Merge));
        assert_eq!(merges.len(), 1);
        assert_eq!(result.circuit.gate(merges[0]).state_ins.len(), 2);
        // v0 phis at the handler: constants 1 and 2, one per throw site.
        let selectors = kinds(&result, |k| matches!(k, GateKind::ValueSelector));
        assert_eq!(selectors.len(), 1);
        let mut values: Vec<GateKind> = result
            .circuit
            .gate(selectors[0])
            .value_ins
            .iter()
            .map(|g| result.circuit.gate(*g).kind)
            .collect();
        values.sort_by_key(|k| match k {
            GateKind::Constant(ConstValue::Int(i)) => *i,
            _ => i32::MAX,
        });
        assert_eq!(
            values,
            vec![
                GateKind::Constant(ConstValue::Int(1)),
                GateKind::Constant(ConstValue::Int(2)),
            ]
        );
    }

    #[test]
    fn test_throw_has_no_projections() {
        // ldai 1; throw
        let code = [0x07, 0x01, 0x00, 0x00, 0x00, 0x3A];
        let result = build_circuit(&method(0, 0, &code, &[])).unwrap();
        let throws = kinds(&result, |k| matches!(k, GateKind::JsBytecode(Opcode::Throw)));
        assert_eq!(throws.len(), 1);
        assert!(kinds(&result, |k| matches!(k, GateKind::IfException)).is_empty());
        assert!(kinds(&result, |k| matches!(k, GateKind::IfSuccess)).is_empty());
        // Uncaught: one exceptional exit carrying the exception marker.
        let ret = kinds(&result, |k| matches!(k, GateKind::Return))[0];
        let value = result.circuit.gate(result.circuit.gate(ret).value_ins[0]);
        assert_eq!(value.kind, GateKind::Constant(ConstValue::Exception));
    }

    #[test]
    fn test_loop_head_gates() {
        // ldai 10; loop: dec; jnez8 loop; return
        let code = [
            0x07, 0x0A, 0x00, 0x00, 0x00, // ldai 10
            0x10, // dec
            0x35, 0xFF, // jnez8 -1
            0x38, // return
        ];
        let result = build_circuit(&method(0, 0, &code, &[])).unwrap();
        let loops = kinds(&result, |k| matches!(k, GateKind::LoopBegin));
        assert_eq!(loops.len(), 1);
        let head = result.circuit.gate(loops[0]);
        assert_eq!(head.state_ins.len(), 2);

        // The accumulator phi at the head: forward side is the constant 10,
        // back side flows from the dec.
        let selectors = kinds(&result, |k| matches!(k, GateKind::ValueSelector));
        assert_eq!(selectors.len(), 1);
        let sel = result.circuit.gate(selectors[0]);
        assert_eq!(sel.state_ins[0], loops[0]);
        assert_eq!(sel.value_ins.len(), 2);
        let fwd = result.circuit.gate(sel.value_ins[0]);
        assert_eq!(fwd.kind, GateKind::Constant(ConstValue::Int(10)));
        let back = result.circuit.gate(sel.value_ins[1]);
        assert!(matches!(back.kind, GateKind::JsBytecode(Opcode::Dec)));
        // The dec reads the selector: the cycle closes through the phi.
        let dec = sel.value_ins[1];
        assert_eq!(result.circuit.gate(dec).value_ins[0], selectors[0]);
    }

    #[test]
    fn test_generator_save_restore_spliced() {
        // suspend/resume loop; v0 live across the suspension point.
        // 0: ldai 1; 1: sta v0; 2: suspend v0; 3: resume v0;
        // 4: lda v0; 5: return
        let code = [
            0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
            0x0A, 0x00, // sta v0
            0x3C, 0x00, // suspend_generator v0
            0x3D, 0x00, // resume_generator v0
            0x09, 0x00, // lda v0
            0x38, // return
        ];
        let result = build_circuit(&method(1, 0, &code, &[])).unwrap();
        let restores = kinds(&result, |k| matches!(k, GateKind::RestoreRegister(0)));
        assert_eq!(restores.len(), 1);
        // The returned value is the restore, not the original constant.
        let ret = kinds(&result, |k| matches!(k, GateKind::Return))
            .into_iter()
            .find(|r| {
                result.circuit.gate(result.circuit.gate(*r).value_ins[0]).kind
                    == GateKind::RestoreRegister(0)
            });
        assert!(ret.is_some());
        // The restore hangs off the resume's effect chain.
        let resume = kinds(&result, |k| {
            matches!(k, GateKind::JsBytecode(Opcode::ResumeGenerator))
        })[0];
        assert_eq!(result.circuit.gate(restores[0]).depend_ins[0], resume);
    }

    #[test]
    fn test_save_register_before_following_suspend() {
        // A resume followed by another suspend: the register restored from
        // the frame is re-captured by a save spliced into the suspend's
        // effect chain.
        let code = [
            0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
            0x0A, 0x00, // sta v0
            0x3D, 0x00, // resume_generator v0
            0x3C, 0x00, // suspend_generator v0
            0x09, 0x00, // lda v0
            0x38, // return
        ];
        let result = build_circuit(&method(1, 0, &code, &[])).unwrap();
        let saves = kinds(&result, |k| matches!(k, GateKind::SaveRegister(0)));
        assert_eq!(saves.len(), 1);
        let restores = kinds(&result, |k| matches!(k, GateKind::RestoreRegister(0)));
        assert_eq!(restores.len(), 1);
        let suspend = kinds(&result, |k| {
            matches!(k, GateKind::JsBytecode(Opcode::SuspendGenerator))
        })[0];
        // The save sits between the resume and the suspend in the chain.
        assert_eq!(result.circuit.gate(suspend).depend_ins[0], saves[0]);
        assert_eq!(result.circuit.gate(saves[0]).value_ins[0], restores[0]);
    }

    #[test]
    fn test_circuit_verifies() {
        let code = [
            0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
            0x33, 0x09, // jeqz8 +9
            0x07, 0x02, 0x00, 0x00, 0x00, // ldai 2
            0x30, 0x07, // jmp8 +7
            0x07, 0x03, 0x00, 0x00, 0x00, // ldai 3
            0x38, // return
        ];
        let result = build_circuit(&method(0, 0, &code, &[])).unwrap();
        assert!(result.circuit.verify().is_ok());
    }

    #[test]
    fn test_bytecode_gate_maps_are_inverse() {
        let code = [
            0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
            0x12, 0x00, // add2 v0
            0x38, // return
        ];
        let result = build_circuit(&method(1, 0, &code, &[])).unwrap();
        for (i, gate) in result.bytecode_to_gate.iter().enumerate() {
            if let Some(g) = gate {
                assert_eq!(result.gate_to_bytecode.get(g), Some(&i));
            }
        }
    }

    #[test]
    fn test_branch_into_own_fallthrough_is_rejected() {
        // jeqz8 +2 jumps to its own fall-through; accepting it would drop
        // the false path's control edge.
        let code = [0x33, 0x02, 0x38]; // jeqz8 +2; return
        assert!(build_circuit(&method(0, 0, &code, &[])).is_err());
    }
}
