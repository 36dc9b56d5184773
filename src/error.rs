use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type covering every failure this library can report.
///
/// Errors fall into two families. **Input errors** (`Malformed`,
/// `UnknownOpcode`, `OutOfBounds`, `Empty`) indicate the bytecode handed to
/// the pipeline violates its encoding contract; compilation of the affected
/// method is abandoned. **Analysis errors** (`GraphError`) indicate the
/// region graph handed to a later stage is structurally unusable.
///
/// Internal invariant violations (an unresolvable SSA operand, a conditional
/// branch with the wrong successor count) are *not* represented here: they
/// mean an upstream pass produced inconsistent state, and the pipeline
/// asserts on them rather than returning an error.
///
/// # Examples
///
/// ```rust
/// use gatelift::{Error, bytecode::decode_info};
///
/// match decode_info(&[0xFF], 0, 8) {
///     Err(Error::UnknownOpcode(op)) => assert_eq!(op, 0xFF),
///     other => panic!("expected UnknownOpcode, got {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The bytecode stream is damaged and could not be decoded.
    ///
    /// Includes the source location where the malformation was detected,
    /// for debugging.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error was raised
        file: &'static str,
        /// The source line in which this error was raised
        line: u32,
    },

    /// An opcode byte that no defined instruction uses.
    ///
    /// Every later stage assumes every instruction decodes, so this is
    /// never recovered; the whole method compilation aborts.
    #[error("Unknown opcode byte 0x{0:02X}")]
    UnknownOpcode(u8),

    /// An out of bound read would have occurred while decoding.
    ///
    /// Raised when an instruction's encoded operands extend past the end
    /// of the method's bytecode.
    #[error("Out of bound read would have occurred")]
    OutOfBounds,

    /// Provided bytecode was empty.
    #[error("Provided bytecode was empty")]
    Empty,

    /// Region graph construction or update failed.
    ///
    /// Covers structural problems in the control-flow graph: a jump target
    /// outside the method, an exception-table entry referring past the end
    /// of the stream, or an empty graph where one region was expected.
    #[error("{0}")]
    GraphError(String),
}

/// Universal `Result` type of this crate.
pub type Result<T> = std::result::Result<T, Error>;
