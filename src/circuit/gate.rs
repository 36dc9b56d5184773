//! Gate definitions: the node type of the circuit graph.

use strum::IntoStaticStr;

use crate::bytecode::Opcode;

/// Index of a gate in its owning [`super::Circuit`]'s gate table.
///
/// Gates reference each other only through these indices; a slot that is
/// not yet wired holds [`GateRef::NULL`]. The builder patches every null
/// slot before the circuit is handed out, and [`super::Circuit::verify`]
/// rejects any that slipped through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GateRef(u32);

impl GateRef {
    /// The unwired-slot sentinel.
    pub const NULL: GateRef = GateRef(u32::MAX);

    pub(crate) fn new(index: usize) -> Self {
        debug_assert!(index < u32::MAX as usize);
        GateRef(index as u32)
    }

    /// The gate-table index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// True for the unwired-slot sentinel.
    #[must_use]
    pub fn is_null(self) -> bool {
        self == GateRef::NULL
    }
}

impl Default for GateRef {
    fn default() -> Self {
        GateRef::NULL
    }
}

/// A literal value carried by a `Constant` gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    /// The undefined value.
    Undefined,
    /// The null value.
    Null,
    /// A boolean literal.
    Bool(bool),
    /// The hole marker (elided array element / TDZ).
    Hole,
    /// A 32-bit integer literal.
    Int(i32),
    /// A double literal, stored as raw IEEE-754 bits so constants stay
    /// comparable (NaN included).
    Double(u64),
    /// The in-flight-exception marker used on exceptional method exits.
    Exception,
}

impl ConstValue {
    /// Wraps a float literal.
    #[must_use]
    pub fn double(value: f64) -> Self {
        ConstValue::Double(value.to_bits())
    }

    /// The float value of a `Double` constant.
    #[must_use]
    pub fn as_double(self) -> Option<f64> {
        match self {
            ConstValue::Double(bits) => Some(f64::from_bits(bits)),
            _ => None,
        }
    }
}

/// The operation a gate performs.
///
/// Every gate belongs to exactly one of three planes: control (state
/// edges), effect order (dependency edges) or data (value edges); the
/// `JS_BYTECODE` workhorse participates in all three.
#[derive(Debug, Clone, Copy, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum GateKind {
    /// Root of the control plane.
    StateEntry,
    /// Root of the effect-order plane.
    DependEntry,
    /// An incoming argument (one per virtual register).
    Arg(u16),
    /// A literal value.
    Constant(ConstValue),
    /// Control merge of N forward predecessors.
    Merge,
    /// Control merge of a loop head: exactly two state inputs, the forward
    /// side first, the loop-back side second.
    LoopBegin,
    /// Effect-order merge mirroring a `Merge`/`LoopBegin`: one dependency
    /// input per state input of its head.
    DependSelector,
    /// Re-anchors a dependency onto a control edge (used where an
    /// exception path carries the throwing gate's effect into a catch).
    DependRelay,
    /// One lowered bytecode instruction that may raise.
    JsBytecode(Opcode),
    /// Two-way branch on a condition value.
    IfBranch,
    /// Taken projection of an `IfBranch`.
    IfTrue,
    /// Fall-through projection of an `IfBranch`.
    IfFalse,
    /// Normal-completion projection of a `JsBytecode`.
    IfSuccess,
    /// Exceptional-completion projection of a `JsBytecode`.
    IfException,
    /// Materializes the in-flight exception at a catch entry.
    GetException,
    /// Value merge (phi) mirroring a `Merge`/`LoopBegin`: one value input
    /// per state input of its head.
    ValueSelector,
    /// Captures a register's value into the generator frame before a
    /// suspend.
    SaveRegister(u16),
    /// Reloads a register's value from the generator frame after a resume.
    RestoreRegister(u16),
    /// One method exit carrying the returned (or thrown) value.
    Return,
    /// Sink collecting every `Return` of the method.
    ReturnList,
}

impl GateKind {
    /// The SCREAMING_SNAKE_CASE mnemonic, used by the DOT renderer.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.into()
    }

    /// True for the projections that must have exactly one state input.
    #[must_use]
    pub fn is_projection(&self) -> bool {
        matches!(
            self,
            GateKind::IfTrue | GateKind::IfFalse | GateKind::IfSuccess | GateKind::IfException
        )
    }
}

/// One node of the circuit.
///
/// Input lists are ordered and positional: a `Merge`'s k-th state input,
/// its `DependSelector`'s k-th dependency input and any `ValueSelector`'s
/// k-th value input all describe the same incoming path.
#[derive(Debug, Clone)]
pub struct Gate {
    /// What the gate does.
    pub kind: GateKind,
    /// Incoming control edges.
    pub state_ins: Vec<GateRef>,
    /// Incoming effect-order edges.
    pub depend_ins: Vec<GateRef>,
    /// Incoming data edges.
    pub value_ins: Vec<GateRef>,
}

impl Gate {
    /// Iterates over every input edge of the gate.
    pub fn all_ins(&self) -> impl Iterator<Item = GateRef> + '_ {
        self.state_ins
            .iter()
            .chain(self.depend_ins.iter())
            .chain(self.value_ins.iter())
            .copied()
    }
}
