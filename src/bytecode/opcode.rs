//! Opcode definitions and the static decoder-descriptor table.
//!
//! Every opcode maps to a small [`OpcodeDescriptor`] carrying its operand
//! layout, byte length and behavior flags. The table is expressed as an
//! exhaustive `match` so adding an opcode without a descriptor fails at
//! compile time.

use bitflags::bitflags;
use strum::{EnumIter, FromRepr, IntoStaticStr};

bitflags! {
    /// Behavior flags for one opcode.
    ///
    /// `GENERAL` marks instructions that lower to a `JS_BYTECODE` gate with
    /// success/exception projections; everything an engine must assume can
    /// raise (calls, property access, arithmetic with valueOf semantics)
    /// carries it. `MOVE` marks register-shuffle instructions that are
    /// transparent to SSA renaming and emit no gate at all.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpcodeFlags: u16 {
        /// Reads the implicit accumulator.
        const ACC_READ = 1 << 0;
        /// Writes the implicit accumulator.
        const ACC_WRITE = 1 << 1;
        /// Lowers to a `JS_BYTECODE` gate and may raise an exception.
        const GENERAL = 1 << 2;
        /// Unconditional jump.
        const JUMP = 1 << 3;
        /// Conditional jump (branch on the accumulator).
        const COND_JUMP = 1 << 4;
        /// Terminates the method normally.
        const RETURN = 1 << 5;
        /// Terminates the block by raising the accumulator as an exception.
        const THROW = 1 << 6;
        /// Register/accumulator shuffle, transparent to renaming.
        const MOVE = 1 << 7;
        /// Produces a literal value; lowers to a `CONSTANT` gate.
        const CONSTANT = 1 << 8;
        /// Resumes a suspended generator; writes every virtual register.
        const RESUME = 1 << 9;
        /// Suspends a generator; save-register gates splice into it.
        const SUSPEND = 1 << 10;
    }
}

/// Operand layout of one opcode.
///
/// The layout fixes the instruction's total byte length: one opcode byte
/// plus [`OperandLayout::byte_size`] operand bytes. Immediates are
/// little-endian and signed where used as jump offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandLayout {
    /// No operands.
    None,
    /// One 8-bit signed immediate.
    Imm8,
    /// One 16-bit signed immediate.
    Imm16,
    /// One 32-bit signed immediate.
    Imm32,
    /// One 64-bit float immediate (raw IEEE-754 bits).
    F64,
    /// One virtual-register index.
    V8,
    /// Two virtual-register indices.
    V8V8,
    /// Three virtual-register indices.
    V8V8V8,
    /// One 16-bit string constant-pool index.
    Str16,
    /// One 16-bit string index followed by one virtual register.
    Str16V8,
    /// One 16-bit method index followed by an 8-bit formal-argument count.
    Method16Imm8,
    /// Argument-window call: 8-bit argument count N followed by the first
    /// register of N consecutive argument registers.
    CallRange,
    /// Like [`OperandLayout::CallRange`], with the `this` register
    /// preceding the N arguments.
    CallThisRange,
}

impl OperandLayout {
    /// Number of operand bytes following the opcode byte.
    #[must_use]
    pub const fn byte_size(self) -> usize {
        match self {
            OperandLayout::None => 0,
            OperandLayout::Imm8 | OperandLayout::V8 => 1,
            OperandLayout::Imm16
            | OperandLayout::V8V8
            | OperandLayout::Str16
            | OperandLayout::CallRange
            | OperandLayout::CallThisRange => 2,
            OperandLayout::Imm32 => 4,
            OperandLayout::F64 => 8,
            OperandLayout::V8V8V8 | OperandLayout::Str16V8 | OperandLayout::Method16Imm8 => 3,
        }
    }
}

/// Decoder descriptor for one opcode: operand layout plus behavior flags.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeDescriptor {
    /// Operand layout, which also fixes the instruction length.
    pub layout: OperandLayout,
    /// Behavior flags.
    pub flags: OpcodeFlags,
}

impl OpcodeDescriptor {
    const fn new(layout: OperandLayout, flags: OpcodeFlags) -> Self {
        OpcodeDescriptor { layout, flags }
    }

    /// Total instruction length in bytes (opcode byte included).
    #[must_use]
    pub const fn length(&self) -> usize {
        1 + self.layout.byte_size()
    }
}

/// All defined opcodes of the bytecode set.
///
/// The numeric values are the wire encoding. Mnemonics follow the usual
/// accumulator-machine conventions: `Lda`/`Sta` move between a register and
/// the accumulator, binary operators take their left operand from a register
/// and the right from the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    // Literal producers
    LdUndefined = 0x00,
    LdNull = 0x01,
    LdTrue = 0x02,
    LdFalse = 0x03,
    LdHole = 0x04,
    LdNan = 0x05,
    LdInfinity = 0x06,
    Ldai = 0x07,
    Fldai = 0x08,

    // Register shuffles, transparent to renaming
    Lda = 0x09,
    Sta = 0x0A,
    Mov = 0x0B,

    // Unary operators
    Typeof = 0x0C,
    Neg = 0x0D,
    Not = 0x0E,
    Inc = 0x0F,
    Dec = 0x10,
    Tonumber = 0x11,

    // Binary operators: vreg (lhs) op acc (rhs) -> acc
    Add2 = 0x12,
    Sub2 = 0x13,
    Mul2 = 0x14,
    Div2 = 0x15,
    Mod2 = 0x16,
    Less = 0x17,
    Lesseq = 0x18,
    Greater = 0x19,
    Greatereq = 0x1A,
    Eq = 0x1B,
    Noteq = 0x1C,
    Stricteq = 0x1D,

    // Object and global access
    CreateEmptyObject = 0x1E,
    CreateEmptyArray = 0x1F,
    LdObjByName = 0x20,
    StObjByName = 0x21,
    LdObjByValue = 0x22,
    StObjByValue = 0x23,
    LdaStr = 0x24,
    LdGlobalVar = 0x25,
    StGlobalVar = 0x26,
    DefineFunc = 0x27,

    // Call family: callee in the accumulator, result in the accumulator
    CallArg0 = 0x28,
    CallArg1 = 0x29,
    CallArgs2 = 0x2A,
    CallArgs3 = 0x2B,
    CallRange = 0x2C,
    CallThisRange = 0x2D,

    // Jumps: signed offset relative to the jump instruction's own start
    Jmp8 = 0x30,
    Jmp16 = 0x31,
    Jmp32 = 0x32,
    Jeqz8 = 0x33,
    Jeqz16 = 0x34,
    Jnez8 = 0x35,
    Jnez16 = 0x36,

    // Terminators
    Return = 0x38,
    ReturnUndefined = 0x39,
    Throw = 0x3A,

    // Generators
    SuspendGenerator = 0x3C,
    ResumeGenerator = 0x3D,
    GetResumeMode = 0x3E,
}

impl Opcode {
    /// Returns the decoder descriptor for this opcode.
    ///
    /// The table is total: every opcode has exactly one descriptor.
    #[must_use]
    pub const fn descriptor(self) -> OpcodeDescriptor {
        use OperandLayout as L;

        const ACC_W: OpcodeFlags = OpcodeFlags::ACC_WRITE;
        const ACC_R: OpcodeFlags = OpcodeFlags::ACC_READ;
        const CONST_W: OpcodeFlags = OpcodeFlags::CONSTANT.union(OpcodeFlags::ACC_WRITE);
        const GEN_RW: OpcodeFlags = OpcodeFlags::GENERAL
            .union(OpcodeFlags::ACC_READ)
            .union(OpcodeFlags::ACC_WRITE);
        const GEN_W: OpcodeFlags = OpcodeFlags::GENERAL.union(OpcodeFlags::ACC_WRITE);
        const GEN_R: OpcodeFlags = OpcodeFlags::GENERAL.union(OpcodeFlags::ACC_READ);

        match self {
            Opcode::LdUndefined
            | Opcode::LdNull
            | Opcode::LdTrue
            | Opcode::LdFalse
            | Opcode::LdHole
            | Opcode::LdNan
            | Opcode::LdInfinity => OpcodeDescriptor::new(L::None, CONST_W),
            Opcode::Ldai => OpcodeDescriptor::new(L::Imm32, CONST_W),
            Opcode::Fldai => OpcodeDescriptor::new(L::F64, CONST_W),

            Opcode::Lda => {
                OpcodeDescriptor::new(L::V8, OpcodeFlags::MOVE.union(OpcodeFlags::ACC_WRITE))
            }
            Opcode::Sta => {
                OpcodeDescriptor::new(L::V8, OpcodeFlags::MOVE.union(OpcodeFlags::ACC_READ))
            }
            Opcode::Mov => OpcodeDescriptor::new(L::V8V8, OpcodeFlags::MOVE),

            Opcode::Typeof
            | Opcode::Neg
            | Opcode::Not
            | Opcode::Inc
            | Opcode::Dec
            | Opcode::Tonumber => OpcodeDescriptor::new(L::None, GEN_RW),

            Opcode::Add2
            | Opcode::Sub2
            | Opcode::Mul2
            | Opcode::Div2
            | Opcode::Mod2
            | Opcode::Less
            | Opcode::Lesseq
            | Opcode::Greater
            | Opcode::Greatereq
            | Opcode::Eq
            | Opcode::Noteq
            | Opcode::Stricteq => OpcodeDescriptor::new(L::V8, GEN_RW),

            Opcode::CreateEmptyObject | Opcode::CreateEmptyArray => {
                OpcodeDescriptor::new(L::None, GEN_W)
            }
            Opcode::LdObjByName => OpcodeDescriptor::new(L::Str16, GEN_RW),
            Opcode::StObjByName => OpcodeDescriptor::new(L::Str16V8, GEN_R),
            Opcode::LdObjByValue => OpcodeDescriptor::new(L::V8, GEN_RW),
            Opcode::StObjByValue => OpcodeDescriptor::new(L::V8V8, GEN_R),
            Opcode::LdaStr => OpcodeDescriptor::new(L::Str16, GEN_W),
            Opcode::LdGlobalVar => OpcodeDescriptor::new(L::Str16, GEN_W),
            Opcode::StGlobalVar => OpcodeDescriptor::new(L::Str16, GEN_R),
            Opcode::DefineFunc => OpcodeDescriptor::new(L::Method16Imm8, GEN_W),

            Opcode::CallArg0 => OpcodeDescriptor::new(L::None, GEN_RW),
            Opcode::CallArg1 => OpcodeDescriptor::new(L::V8, GEN_RW),
            Opcode::CallArgs2 => OpcodeDescriptor::new(L::V8V8, GEN_RW),
            Opcode::CallArgs3 => OpcodeDescriptor::new(L::V8V8V8, GEN_RW),
            Opcode::CallRange => OpcodeDescriptor::new(L::CallRange, GEN_RW),
            Opcode::CallThisRange => OpcodeDescriptor::new(L::CallThisRange, GEN_RW),

            Opcode::Jmp8 => OpcodeDescriptor::new(L::Imm8, OpcodeFlags::JUMP),
            Opcode::Jmp16 => OpcodeDescriptor::new(L::Imm16, OpcodeFlags::JUMP),
            Opcode::Jmp32 => OpcodeDescriptor::new(L::Imm32, OpcodeFlags::JUMP),
            Opcode::Jeqz8 | Opcode::Jnez8 => {
                OpcodeDescriptor::new(L::Imm8, OpcodeFlags::COND_JUMP.union(ACC_R))
            }
            Opcode::Jeqz16 | Opcode::Jnez16 => {
                OpcodeDescriptor::new(L::Imm16, OpcodeFlags::COND_JUMP.union(ACC_R))
            }

            Opcode::Return => OpcodeDescriptor::new(L::None, OpcodeFlags::RETURN.union(ACC_R)),
            Opcode::ReturnUndefined => OpcodeDescriptor::new(L::None, OpcodeFlags::RETURN),
            Opcode::Throw => OpcodeDescriptor::new(
                L::None,
                OpcodeFlags::THROW
                    .union(OpcodeFlags::GENERAL)
                    .union(ACC_R),
            ),

            Opcode::SuspendGenerator => OpcodeDescriptor::new(
                L::V8,
                OpcodeFlags::SUSPEND.union(OpcodeFlags::GENERAL).union(ACC_R),
            ),
            Opcode::ResumeGenerator => OpcodeDescriptor::new(
                L::V8,
                OpcodeFlags::RESUME.union(OpcodeFlags::GENERAL).union(ACC_W),
            ),
            Opcode::GetResumeMode => OpcodeDescriptor::new(L::None, GEN_W),
        }
    }

    /// The snake_case mnemonic of this opcode.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_roundtrip_repr() {
        for op in Opcode::iter() {
            assert_eq!(Opcode::from_repr(op as u8), Some(op));
        }
    }

    #[test]
    fn test_undefined_bytes_have_no_opcode() {
        // Gaps in the encoding must not decode
        assert_eq!(Opcode::from_repr(0x2E), None);
        assert_eq!(Opcode::from_repr(0x37), None);
        assert_eq!(Opcode::from_repr(0xFF), None);
    }

    #[test]
    fn test_lengths() {
        assert_eq!(Opcode::LdTrue.descriptor().length(), 1);
        assert_eq!(Opcode::Ldai.descriptor().length(), 5);
        assert_eq!(Opcode::Fldai.descriptor().length(), 9);
        assert_eq!(Opcode::Mov.descriptor().length(), 3);
        assert_eq!(Opcode::Jmp16.descriptor().length(), 3);
        assert_eq!(Opcode::CallRange.descriptor().length(), 3);
        assert_eq!(Opcode::DefineFunc.descriptor().length(), 4);
    }

    #[test]
    fn test_flag_classes_are_disjoint() {
        for op in Opcode::iter() {
            let f = op.descriptor().flags;
            let classes = [
                f.contains(OpcodeFlags::GENERAL),
                f.contains(OpcodeFlags::MOVE),
                f.contains(OpcodeFlags::CONSTANT),
                f.contains(OpcodeFlags::JUMP) || f.contains(OpcodeFlags::COND_JUMP),
                f.contains(OpcodeFlags::RETURN),
            ];
            let active = classes.iter().filter(|c| **c).count();
            assert!(active <= 1, "{:?} belongs to more than one class", op);
        }
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(Opcode::LdUndefined.mnemonic(), "ld_undefined");
        assert_eq!(Opcode::Add2.mnemonic(), "add2");
    }
}
