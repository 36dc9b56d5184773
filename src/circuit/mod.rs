//! The circuit: a sea-of-nodes gate graph over three edge planes.
//!
//! A [`Circuit`] owns a flat gate table; gates address each other through
//! [`GateRef`] indices only. Construction is two-phase by design: heads of
//! join blocks are created with [`GateRef::NULL`] placeholder slots and
//! patched once their producers exist. [`Circuit::verify`] is the gate
//! keeper that proves no placeholder survived.

mod gate;

pub use gate::{ConstValue, Gate, GateKind, GateRef};

use std::fmt::Write;

use crate::{Error::GraphError, Result};

/// The gate graph of one compiled method.
#[derive(Debug)]
pub struct Circuit {
    gates: Vec<Gate>,
    state_entry: GateRef,
    depend_entry: GateRef,
    return_list: GateRef,
}

impl Circuit {
    /// Creates a circuit holding only the three root gates.
    #[must_use]
    pub fn new() -> Self {
        let mut circuit = Circuit {
            gates: Vec::new(),
            state_entry: GateRef::NULL,
            depend_entry: GateRef::NULL,
            return_list: GateRef::NULL,
        };
        circuit.state_entry = circuit.add_gate(GateKind::StateEntry, vec![], vec![], vec![]);
        circuit.depend_entry = circuit.add_gate(
            GateKind::DependEntry,
            vec![circuit.state_entry],
            vec![],
            vec![],
        );
        circuit.return_list = circuit.add_gate(GateKind::ReturnList, vec![], vec![], vec![]);
        circuit
    }

    /// Appends a gate and returns its reference.
    pub fn add_gate(
        &mut self,
        kind: GateKind,
        state_ins: Vec<GateRef>,
        depend_ins: Vec<GateRef>,
        value_ins: Vec<GateRef>,
    ) -> GateRef {
        let id = GateRef::new(self.gates.len());
        self.gates.push(Gate {
            kind,
            state_ins,
            depend_ins,
            value_ins,
        });
        id
    }

    /// Root of the control plane.
    #[must_use]
    pub fn state_entry(&self) -> GateRef {
        self.state_entry
    }

    /// Root of the effect-order plane.
    #[must_use]
    pub fn depend_entry(&self) -> GateRef {
        self.depend_entry
    }

    /// The sink collecting every method exit.
    #[must_use]
    pub fn return_list(&self) -> GateRef {
        self.return_list
    }

    /// Borrows a gate.
    #[must_use]
    pub fn gate(&self, id: GateRef) -> &Gate {
        &self.gates[id.index()]
    }

    /// Mutably borrows a gate.
    pub fn gate_mut(&mut self, id: GateRef) -> &mut Gate {
        &mut self.gates[id.index()]
    }

    /// All gates in creation order.
    #[must_use]
    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    /// Number of gates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// True for a circuit holding only the root gates (never after build).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gates.len() <= 3
    }

    /// Registers a `Return` gate with the method's exit sink.
    pub fn add_return(&mut self, ret: GateRef) {
        let sink = self.return_list;
        self.gates[sink.index()].state_ins.push(ret);
    }

    /// Gates of a given kind, in creation order. Test and tooling helper.
    pub fn gates_of_kind(&self, want: impl Fn(&GateKind) -> bool) -> Vec<GateRef> {
        self.gates
            .iter()
            .enumerate()
            .filter(|(_, g)| want(&g.kind))
            .map(|(i, _)| GateRef::new(i))
            .collect()
    }

    /// Structural well-formedness check.
    ///
    /// Verifies that no placeholder slot survived construction, that every
    /// reference is in bounds, that projections have exactly one state
    /// input of the right producer kind, that selector widths match their
    /// head's state width, and that both arms of every branch continue
    /// into the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] naming the first offending gate.
    pub fn verify(&self) -> Result<()> {
        let mut state_consumed = vec![false; self.gates.len()];
        for gate in &self.gates {
            for s in &gate.state_ins {
                if s.index() < self.gates.len() {
                    state_consumed[s.index()] = true;
                }
            }
        }

        for (i, gate) in self.gates.iter().enumerate() {
            for input in gate.all_ins() {
                if input.is_null() {
                    return Err(GraphError(format!(
                        "Gate #{i} ({}) has an unwired input slot",
                        gate.kind.mnemonic()
                    )));
                }
                if input.index() >= self.gates.len() {
                    return Err(GraphError(format!(
                        "Gate #{i} ({}) references out-of-bounds gate #{}",
                        gate.kind.mnemonic(),
                        input.index()
                    )));
                }
            }

            match gate.kind {
                GateKind::Merge => {
                    if gate.state_ins.is_empty() {
                        return Err(GraphError(format!("Merge #{i} has no state inputs")));
                    }
                }
                GateKind::LoopBegin => {
                    if gate.state_ins.len() != 2 {
                        return Err(GraphError(format!(
                            "LoopBegin #{i} has {} state inputs, expected 2",
                            gate.state_ins.len()
                        )));
                    }
                }
                GateKind::DependSelector => {
                    let head = self.selector_head(gate, i)?;
                    if gate.depend_ins.len() != self.gate(head).state_ins.len() {
                        return Err(GraphError(format!(
                            "DependSelector #{i} width {} does not match its head's {}",
                            gate.depend_ins.len(),
                            self.gate(head).state_ins.len()
                        )));
                    }
                }
                GateKind::ValueSelector => {
                    let head = self.selector_head(gate, i)?;
                    if gate.value_ins.len() != self.gate(head).state_ins.len() {
                        return Err(GraphError(format!(
                            "ValueSelector #{i} width {} does not match its head's {}",
                            gate.value_ins.len(),
                            self.gate(head).state_ins.len()
                        )));
                    }
                }
                _ if gate.kind.is_projection() => {
                    if gate.state_ins.len() != 1 {
                        return Err(GraphError(format!(
                            "Projection #{i} ({}) must have exactly one state input",
                            gate.kind.mnemonic()
                        )));
                    }
                    let producer = &self.gate(gate.state_ins[0]).kind;
                    let ok = match gate.kind {
                        GateKind::IfTrue | GateKind::IfFalse => {
                            matches!(producer, GateKind::IfBranch)
                        }
                        GateKind::IfSuccess | GateKind::IfException => {
                            matches!(producer, GateKind::JsBytecode(_))
                        }
                        _ => unreachable!(),
                    };
                    if !ok {
                        return Err(GraphError(format!(
                            "Projection #{i} ({}) hangs off a {}",
                            gate.kind.mnemonic(),
                            producer.mnemonic()
                        )));
                    }
                    // A branch projection nothing consumes means a control
                    // path was dropped during lowering.
                    if matches!(gate.kind, GateKind::IfTrue | GateKind::IfFalse)
                        && !state_consumed[i]
                    {
                        return Err(GraphError(format!(
                            "Branch projection #{i} ({}) has no control continuation",
                            gate.kind.mnemonic()
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// The `Merge`/`LoopBegin` a selector mirrors.
    fn selector_head(&self, gate: &Gate, index: usize) -> Result<GateRef> {
        let head = *gate.state_ins.first().ok_or_else(|| {
            GraphError(format!("Selector #{index} has no head state input"))
        })?;
        match self.gate(head).kind {
            GateKind::Merge | GateKind::LoopBegin => Ok(head),
            other => Err(GraphError(format!(
                "Selector #{index} mirrors a {} instead of a merge",
                other.mnemonic()
            ))),
        }
    }

    /// Generates a Graphviz DOT rendering of the circuit.
    ///
    /// State edges are solid, dependency edges dashed, value edges dotted.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();
        dot.push_str("digraph circuit {\n");
        if let Some(name) = title {
            let _ = writeln!(dot, "    label=\"{name}\";");
        }
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");

        for (i, gate) in self.gates.iter().enumerate() {
            let label = match gate.kind {
                GateKind::JsBytecode(op) => format!("JS_BYTECODE\\n{}", op.mnemonic()),
                GateKind::Constant(v) => format!("CONSTANT\\n{v:?}"),
                GateKind::Arg(r) => format!("ARG v{r}"),
                GateKind::SaveRegister(r) => format!("SAVE_REGISTER v{r}"),
                GateKind::RestoreRegister(r) => format!("RESTORE_REGISTER v{r}"),
                other => other.mnemonic().to_string(),
            };
            let _ = writeln!(dot, "    g{i} [label=\"#{i} {label}\"];");
        }
        for (i, gate) in self.gates.iter().enumerate() {
            for s in &gate.state_ins {
                let _ = writeln!(dot, "    g{} -> g{i};", s.index());
            }
            for d in &gate.depend_ins {
                let _ = writeln!(dot, "    g{} -> g{i} [style=dashed];", d.index());
            }
            for v in &gate.value_ins {
                let _ = writeln!(dot, "    g{} -> g{i} [style=dotted];", v.index());
            }
        }
        dot.push_str("}\n");
        dot
    }
}

impl Default for Circuit {
    fn default() -> Self {
        Circuit::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Opcode;

    #[test]
    fn test_new_circuit_has_roots() {
        let circuit = Circuit::new();
        assert!(circuit.is_empty());
        assert_eq!(circuit.gate(circuit.state_entry()).kind, GateKind::StateEntry);
        assert_eq!(circuit.gate(circuit.depend_entry()).kind, GateKind::DependEntry);
        assert_eq!(circuit.gate(circuit.return_list()).kind, GateKind::ReturnList);
        assert!(circuit.verify().is_ok());
    }

    #[test]
    fn test_verify_rejects_unwired_slot() {
        let mut circuit = Circuit::new();
        let entry = circuit.state_entry();
        circuit.add_gate(
            GateKind::Merge,
            vec![entry, GateRef::NULL],
            vec![],
            vec![],
        );
        assert!(circuit.verify().is_err());
    }

    #[test]
    fn test_verify_rejects_selector_width_mismatch() {
        let mut circuit = Circuit::new();
        let entry = circuit.state_entry();
        let depend = circuit.depend_entry();
        let merge = circuit.add_gate(GateKind::Merge, vec![entry, entry], vec![], vec![]);
        // Only one depend input for a two-way merge.
        circuit.add_gate(GateKind::DependSelector, vec![merge], vec![depend], vec![]);
        assert!(circuit.verify().is_err());
    }

    #[test]
    fn test_verify_rejects_misparented_projection() {
        let mut circuit = Circuit::new();
        let entry = circuit.state_entry();
        // IF_TRUE must hang off IF_BRANCH, not the entry.
        circuit.add_gate(GateKind::IfTrue, vec![entry], vec![], vec![]);
        assert!(circuit.verify().is_err());
    }

    #[test]
    fn test_verify_accepts_wellformed_branch() {
        let mut circuit = Circuit::new();
        let entry = circuit.state_entry();
        let depend = circuit.depend_entry();
        let cond = circuit.add_gate(
            GateKind::Constant(ConstValue::Bool(true)),
            vec![],
            vec![],
            vec![],
        );
        let branch = circuit.add_gate(GateKind::IfBranch, vec![entry], vec![], vec![cond]);
        let t = circuit.add_gate(GateKind::IfTrue, vec![branch], vec![], vec![]);
        let f = circuit.add_gate(GateKind::IfFalse, vec![branch], vec![], vec![]);
        let merge = circuit.add_gate(GateKind::Merge, vec![t, f], vec![], vec![]);
        circuit.add_gate(
            GateKind::DependSelector,
            vec![merge],
            vec![depend, depend],
            vec![],
        );
        assert!(circuit.verify().is_ok());
    }

    #[test]
    fn test_verify_rejects_dangling_branch_projection() {
        let mut circuit = Circuit::new();
        let entry = circuit.state_entry();
        let depend = circuit.depend_entry();
        let cond = circuit.add_gate(
            GateKind::Constant(ConstValue::Bool(true)),
            vec![],
            vec![],
            vec![],
        );
        let branch = circuit.add_gate(GateKind::IfBranch, vec![entry], vec![], vec![cond]);
        let t = circuit.add_gate(GateKind::IfTrue, vec![branch], vec![], vec![]);
        // The false arm never continues anywhere.
        circuit.add_gate(GateKind::IfFalse, vec![branch], vec![], vec![]);
        let ret = circuit.add_gate(GateKind::Return, vec![t], vec![depend], vec![cond]);
        circuit.add_return(ret);
        assert!(circuit.verify().is_err());
    }

    #[test]
    fn test_add_return_collects_exits() {
        let mut circuit = Circuit::new();
        let entry = circuit.state_entry();
        let depend = circuit.depend_entry();
        let value = circuit.add_gate(
            GateKind::Constant(ConstValue::Undefined),
            vec![],
            vec![],
            vec![],
        );
        let ret = circuit.add_gate(GateKind::Return, vec![entry], vec![depend], vec![value]);
        circuit.add_return(ret);
        assert_eq!(circuit.gate(circuit.return_list()).state_ins, vec![ret]);
        assert!(circuit.verify().is_ok());
    }

    #[test]
    fn test_to_dot_mentions_kinds() {
        let mut circuit = Circuit::new();
        circuit.add_gate(
            GateKind::JsBytecode(Opcode::Add2),
            vec![circuit.state_entry()],
            vec![circuit.depend_entry()],
            vec![],
        );
        let dot = circuit.to_dot(Some("m"));
        assert!(dot.contains("JS_BYTECODE"));
        assert!(dot.contains("add2"));
        assert!(dot.contains("STATE_ENTRY"));
    }
}
