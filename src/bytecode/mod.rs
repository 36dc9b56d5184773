//! Bytecode model: opcodes, the instruction decoder and method metadata.
//!
//! The decoder is the leaf of the whole pipeline: a pure function from a
//! byte stream position to a [`BytecodeInfo`]. Everything downstream (region
//! discovery, dominators, gate emission) consumes decoded views only and
//! never touches raw bytes again.
//!
//! # Example
//!
//! ```rust
//! use gatelift::bytecode::{decode_info, Opcode};
//!
//! let code = [0x02]; // ld_true
//! let info = decode_info(&code, 0, 0)?;
//! assert_eq!(info.opcode, Opcode::LdTrue);
//! assert!(info.acc_out);
//! # Ok::<(), gatelift::Error>(())
//! ```

mod instruction;
mod method;
mod opcode;

pub use instruction::{decode_info, decode_stream, BytecodeInfo, Operand};
pub use method::{ConstantPool, ExceptionHandler, MethodInfo, MethodPcInfo, SimpleConstantPool};
pub use opcode::{Opcode, OpcodeDescriptor, OpcodeFlags, OperandLayout};
