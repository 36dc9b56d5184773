//! Per-method metadata: pc tables, exception tables and constant pools.

use std::sync::Arc;

use crate::{
    bytecode::{BytecodeInfo, Operand},
    Result,
};

/// One entry of a method's exception table: a protected byte range and its
/// handler entry point, all as byte offsets into the method body.
///
/// Multiple handlers may cover the same try range; the region builder sorts
/// them so the innermost handler wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First byte of the protected range (inclusive).
    pub try_start: u32,
    /// One past the last byte of the protected range.
    pub try_end: u32,
    /// Byte offset of the catch handler's first instruction.
    pub handler: u32,
}

impl ExceptionHandler {
    /// Creates an exception-table entry.
    #[must_use]
    pub const fn new(try_start: u32, try_end: u32, handler: u32) -> Self {
        ExceptionHandler {
            try_start,
            try_end,
            handler,
        }
    }
}

/// Shared decode result for one method body.
///
/// Two methods with byte-identical bodies share a single `MethodPcInfo`
/// through [`Arc`]; the collector deduplicates them. Never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodPcInfo {
    /// Byte offset of each instruction, monotonically increasing.
    pub pc_offsets: Vec<usize>,
    /// Decoded instructions, one per entry of `pc_offsets`.
    pub infos: Vec<BytecodeInfo>,
    /// Total byte length of the body.
    pub byte_len: usize,
}

impl MethodPcInfo {
    /// Number of instructions in the method.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// True if the method decoded to zero instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Translates a byte offset to its instruction index, if the offset is
    /// an instruction boundary.
    #[must_use]
    pub fn index_of_offset(&self, offset: usize) -> Option<usize> {
        self.pc_offsets.binary_search(&offset).ok()
    }
}

/// Per-method compilation input: register-file shape, shared decode result
/// and the exception table.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// Debug name of the method.
    pub name: String,
    /// Size of the virtual-register file.
    pub num_vregs: u16,
    /// Number of declared arguments. Arguments arrive in registers
    /// `0..num_args`; every other register reads as an incoming argument
    /// gate too, so renaming at the entry block is total.
    pub num_args: u16,
    /// Shared, interned decode result.
    pub pc_info: Arc<MethodPcInfo>,
    /// Exception table, outer-to-inner or inner-to-outer; the region
    /// builder re-sorts it.
    pub exception_table: Vec<ExceptionHandler>,
    /// Method ids of nested function literals defined by this body.
    pub inner_methods: Vec<u16>,
}

impl MethodInfo {
    /// True if the method body is covered by at least one catch handler.
    #[must_use]
    pub fn has_try_catch(&self) -> bool {
        !self.exception_table.is_empty()
    }

    /// Resolves the method's nested function literals to global body
    /// indices through the module's constant pool.
    ///
    /// # Errors
    ///
    /// Fails when a method id has no pool entry, meaning the module
    /// metadata is inconsistent with the bytecode.
    pub fn inner_bodies(&self, pool: &impl ConstantPool) -> Result<Vec<u32>> {
        self.inner_methods
            .iter()
            .map(|&id| {
                pool.method(id).ok_or_else(|| {
                    malformed_error!("Method id {} has no constant-pool entry", id)
                })
            })
            .collect()
    }

    /// Renders a one-line-per-instruction listing, resolving string
    /// operands through the module's constant pool.
    #[must_use]
    pub fn disassemble(&self, pool: &impl ConstantPool) -> String {
        use std::fmt::Write;

        let mut listing = String::new();
        for (i, info) in self.pc_info.infos.iter().enumerate() {
            let _ = write!(
                listing,
                "{:4}: {}",
                self.pc_info.pc_offsets[i],
                info.opcode.mnemonic()
            );
            for op in &info.inputs {
                match op {
                    Operand::VirtualRegister(r) => {
                        let _ = write!(listing, " v{r}");
                    }
                    Operand::Immediate(imm) => {
                        let _ = write!(listing, " {imm}");
                    }
                    Operand::StringId(id) => match pool.string(*id) {
                        Some(s) => {
                            let _ = write!(listing, " \"{s}\"");
                        }
                        None => {
                            let _ = write!(listing, " str#{id}");
                        }
                    },
                    Operand::MethodId(id) => {
                        let _ = write!(listing, " method#{id}");
                    }
                }
            }
            listing.push('\n');
        }
        listing
    }
}

/// Read-only constant-pool view resolving string/method operand indices.
///
/// Only consulted when materializing constant gates and when resolving
/// nested method literals; the pipeline itself never mutates it.
pub trait ConstantPool {
    /// Resolves a string id to its interned text.
    fn string(&self, id: u16) -> Option<&str>;
    /// Resolves a method id to the global index of the method's body.
    fn method(&self, id: u16) -> Option<u32>;
}

/// Trivial vector-backed constant pool, sufficient for tests and tools.
#[derive(Debug, Default, Clone)]
pub struct SimpleConstantPool {
    /// Interned strings, indexed by string id.
    pub strings: Vec<String>,
    /// Method body indices, indexed by method id.
    pub methods: Vec<u32>,
}

impl ConstantPool for SimpleConstantPool {
    fn string(&self, id: u16) -> Option<&str> {
        self.strings.get(usize::from(id)).map(String::as_str)
    }

    fn method(&self, id: u16) -> Option<u32> {
        self.methods.get(usize::from(id)).copied()
    }
}
