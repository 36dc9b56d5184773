//! Decoded instruction view ([`BytecodeInfo`]) and the stream decoder.
//!
//! Decoding is a pure function of the byte stream: no lookahead beyond the
//! instruction's own encoded length, no state. The decoded view carries
//! everything later stages need: accumulator in/out flags, written
//! registers, tagged operands and the instruction's byte length.

use crate::{
    bytecode::{Opcode, OpcodeFlags, OperandLayout},
    Error, Result,
};

/// One tagged instruction operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// A virtual-register index read by the instruction.
    VirtualRegister(u16),
    /// A signed immediate. Jump instructions encode their branch offset
    /// here; `fldai` stores the raw IEEE-754 bits.
    Immediate(i64),
    /// A string constant-pool index.
    StringId(u16),
    /// A method constant-pool index.
    MethodId(u16),
}

/// Decoded view of a single instruction.
///
/// Immutable once decoded. Cheap to recompute, so callers that only need
/// one field decode on demand instead of caching.
#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeInfo {
    /// The decoded opcode.
    pub opcode: Opcode,
    /// Total instruction length in bytes; callers advance by this much.
    pub size: usize,
    /// True if the instruction reads the accumulator.
    pub acc_in: bool,
    /// True if the instruction writes the accumulator.
    pub acc_out: bool,
    /// Virtual registers written, in order. At most one, except
    /// `resume_generator` which conservatively writes every register of
    /// the method.
    pub vreg_out: Vec<u16>,
    /// Tagged value operands, in encoding order.
    pub inputs: Vec<Operand>,
}

impl BytecodeInfo {
    /// Behavior flags of the decoded opcode.
    #[must_use]
    pub fn flags(&self) -> OpcodeFlags {
        self.opcode.descriptor().flags
    }

    /// True for instructions lowering to a `JS_BYTECODE` gate (anything
    /// that can raise).
    #[must_use]
    pub fn is_general(&self) -> bool {
        self.flags().contains(OpcodeFlags::GENERAL)
    }

    /// True for unconditional jumps.
    #[must_use]
    pub fn is_jump(&self) -> bool {
        self.flags().contains(OpcodeFlags::JUMP)
    }

    /// True for conditional jumps.
    #[must_use]
    pub fn is_cond_jump(&self) -> bool {
        self.flags().contains(OpcodeFlags::COND_JUMP)
    }

    /// True for `return`/`return_undefined`.
    #[must_use]
    pub fn is_return(&self) -> bool {
        self.flags().contains(OpcodeFlags::RETURN)
    }

    /// True for `throw`.
    #[must_use]
    pub fn is_throw(&self) -> bool {
        self.flags().contains(OpcodeFlags::THROW)
    }

    /// True for renaming-transparent register shuffles (`lda`/`sta`/`mov`).
    #[must_use]
    pub fn is_move(&self) -> bool {
        self.flags().contains(OpcodeFlags::MOVE)
    }

    /// True for literal producers lowering to `CONSTANT` gates.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.flags().contains(OpcodeFlags::CONSTANT)
    }

    /// True if the instruction ends its basic block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.is_jump() || self.is_cond_jump() || self.is_return() || self.is_throw()
    }

    /// The branch offset of a jump instruction, relative to the
    /// instruction's own first byte.
    #[must_use]
    pub fn jump_offset(&self) -> Option<i64> {
        if self.is_jump() || self.is_cond_jump() {
            match self.inputs.first() {
                Some(Operand::Immediate(off)) => Some(*off),
                _ => None,
            }
        } else {
            None
        }
    }

    /// True if the instruction writes the given register.
    #[must_use]
    pub fn writes_reg(&self, reg: u16) -> bool {
        self.vreg_out.contains(&reg)
    }

    /// Virtual-register operands read, in encoding order.
    pub fn vreg_in(&self) -> impl Iterator<Item = u16> + '_ {
        self.inputs.iter().filter_map(|op| match op {
            Operand::VirtualRegister(v) => Some(*v),
            _ => None,
        })
    }
}

/// Reads a little-endian signed immediate of `width` bytes.
fn read_imm(bytes: &[u8], pos: usize, width: usize) -> Result<i64> {
    let end = pos.checked_add(width).ok_or(Error::OutOfBounds)?;
    if end > bytes.len() {
        return Err(Error::OutOfBounds);
    }
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(&bytes[pos..end]);
    let raw = u64::from_le_bytes(buf);
    // Sign-extend from the operand width
    let shift = 64 - width * 8;
    #[allow(clippy::cast_possible_wrap)]
    Ok(((raw << shift) as i64) >> shift)
}

fn read_u8(bytes: &[u8], pos: usize) -> Result<u8> {
    bytes.get(pos).copied().ok_or(Error::OutOfBounds)
}

fn read_u16(bytes: &[u8], pos: usize) -> Result<u16> {
    if pos + 2 > bytes.len() {
        return Err(Error::OutOfBounds);
    }
    Ok(u16::from_le_bytes([bytes[pos], bytes[pos + 1]]))
}

/// Decodes exactly one instruction starting at `pos`.
///
/// `num_vregs` is the method's register-file size; it is only consulted by
/// `resume_generator`, which conservatively writes every register.
///
/// # Errors
///
/// [`Error::UnknownOpcode`] for an undefined opcode byte (fatal: downstream
/// stages assume every instruction decodes), [`Error::OutOfBounds`] if the
/// encoded operands extend past the end of the stream.
pub fn decode_info(bytes: &[u8], pos: usize, num_vregs: u16) -> Result<BytecodeInfo> {
    let raw = read_u8(bytes, pos)?;
    let opcode = Opcode::from_repr(raw).ok_or(Error::UnknownOpcode(raw))?;
    let desc = opcode.descriptor();
    let flags = desc.flags;
    let operands = pos + 1;

    if pos + desc.length() > bytes.len() {
        return Err(Error::OutOfBounds);
    }

    let mut inputs = Vec::new();
    let mut vreg_out = Vec::new();

    match desc.layout {
        OperandLayout::None => {}
        OperandLayout::Imm8 => inputs.push(Operand::Immediate(read_imm(bytes, operands, 1)?)),
        OperandLayout::Imm16 => inputs.push(Operand::Immediate(read_imm(bytes, operands, 2)?)),
        OperandLayout::Imm32 => inputs.push(Operand::Immediate(read_imm(bytes, operands, 4)?)),
        OperandLayout::F64 => {
            let end = operands + 8;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[operands..end]);
            #[allow(clippy::cast_possible_wrap)]
            inputs.push(Operand::Immediate(u64::from_le_bytes(buf) as i64));
        }
        OperandLayout::V8 => {
            let v = u16::from(read_u8(bytes, operands)?);
            match opcode {
                // sta writes its register operand, it does not read it
                Opcode::Sta => vreg_out.push(v),
                _ => inputs.push(Operand::VirtualRegister(v)),
            }
        }
        OperandLayout::V8V8 => {
            let a = u16::from(read_u8(bytes, operands)?);
            let b = u16::from(read_u8(bytes, operands + 1)?);
            match opcode {
                // mov dst, src: dst is written, src is read
                Opcode::Mov => {
                    vreg_out.push(a);
                    inputs.push(Operand::VirtualRegister(b));
                }
                _ => {
                    inputs.push(Operand::VirtualRegister(a));
                    inputs.push(Operand::VirtualRegister(b));
                }
            }
        }
        OperandLayout::V8V8V8 => {
            for k in 0..3 {
                inputs.push(Operand::VirtualRegister(u16::from(read_u8(
                    bytes,
                    operands + k,
                )?)));
            }
        }
        OperandLayout::Str16 => inputs.push(Operand::StringId(read_u16(bytes, operands)?)),
        OperandLayout::Str16V8 => {
            inputs.push(Operand::StringId(read_u16(bytes, operands)?));
            inputs.push(Operand::VirtualRegister(u16::from(read_u8(
                bytes,
                operands + 2,
            )?)));
        }
        OperandLayout::Method16Imm8 => {
            inputs.push(Operand::MethodId(read_u16(bytes, operands)?));
            inputs.push(Operand::Immediate(i64::from(read_u8(bytes, operands + 2)?)));
        }
        OperandLayout::CallRange | OperandLayout::CallThisRange => {
            // The register window expands into N explicit register operands,
            // where N is the count immediate decoded first.
            let argc = read_u8(bytes, operands)?;
            let first = u16::from(read_u8(bytes, operands + 1)?);
            let extra = u16::from(desc.layout == OperandLayout::CallThisRange);
            inputs.push(Operand::Immediate(i64::from(argc)));
            let window = u16::from(argc) + extra;
            for v in first..first.saturating_add(window) {
                inputs.push(Operand::VirtualRegister(v));
            }
        }
    }

    if flags.contains(OpcodeFlags::RESUME) {
        // The generator's captured register file may overwrite anything.
        vreg_out = (0..num_vregs).collect();
    }

    Ok(BytecodeInfo {
        opcode,
        size: desc.length(),
        acc_in: flags.contains(OpcodeFlags::ACC_READ),
        acc_out: flags.contains(OpcodeFlags::ACC_WRITE),
        vreg_out,
        inputs,
    })
}

/// Decodes a whole method body, returning the decoded instructions and the
/// byte offset of each (the pc-offset table).
///
/// # Errors
///
/// Fails on an empty body or any individual decode failure.
pub fn decode_stream(bytes: &[u8], num_vregs: u16) -> Result<(Vec<BytecodeInfo>, Vec<usize>)> {
    if bytes.is_empty() {
        return Err(Error::Empty);
    }

    let mut infos = Vec::new();
    let mut pc_offsets = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let info = decode_info(bytes, pos, num_vregs)?;
        pc_offsets.push(pos);
        pos += info.size;
        infos.push(info);
    }
    Ok((infos, pc_offsets))
}
