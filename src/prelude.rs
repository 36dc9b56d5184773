//! Convenient re-exports of the most commonly used types.
//!
//! ```rust,no_run
//! use gatelift::prelude::*;
//! ```

pub use crate::{
    builder::{build_circuit, BuildResult},
    bytecode::{
        decode_info, decode_stream, BytecodeInfo, ConstantPool, ExceptionHandler, MethodInfo,
        MethodPcInfo, Opcode, Operand, SimpleConstantPool,
    },
    circuit::{Circuit, ConstValue, Gate, GateKind, GateRef},
    collector::MethodCollector,
    compile::{compile_method, compile_module, BuildOptions, CompileOutcome},
    graph::{BytecodeRegion, RegionGraph, SsaVar},
    Error, Result,
};
