// Copyright 2025 The gatelift developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # gatelift
//!
//! Bytecode-to-SSA circuit construction for a JavaScript engine JIT
//! front end: `gatelift` lowers register-machine bytecode into a
//! sea-of-nodes gate graph ready for optimization.
//!
//! ## Pipeline
//!
//! A method body runs through five stages:
//!
//! 1. **Decode** ([`bytecode`]) - the byte stream becomes a dense table of
//!    [`bytecode::BytecodeInfo`] views, one per instruction.
//! 2. **Regions** ([`graph`]) - block boundaries (jump targets,
//!    terminators, try/catch edges) split the method into basic blocks
//!    with explicit exception edges to their innermost catch handler.
//! 3. **Dominators** ([`graph::dominators`]) - a depth-first walk kills
//!    unreachable blocks, then the iterative dataflow yields immediate
//!    dominators and dominance frontiers.
//! 4. **Phis** ([`graph::phis`]) - iterated dominance frontiers mark the
//!    variables needing a merge value at each join.
//! 5. **Gates** ([`builder`]) - blocks lower to `MERGE`/`LOOP_BEGIN`
//!    heads, instructions to `JS_BYTECODE` gates with success/exception
//!    projections, and a recursive renamer wires every value operand to
//!    its unique SSA producer.
//!
//! Whole modules compile in parallel through [`compile::compile_module`];
//! identical method bodies share their decode through
//! [`collector::MethodCollector`].
//!
//! ## Quick Start
//!
//! ```rust
//! use gatelift::prelude::*;
//!
//! // if (acc == 0) { acc = 3 } else { acc = 2 }; return acc
//! let code = [
//!     0x07, 0x01, 0x00, 0x00, 0x00, // ldai 1
//!     0x33, 0x09, // jeqz +9
//!     0x07, 0x02, 0x00, 0x00, 0x00, // ldai 2
//!     0x30, 0x07, // jmp +7
//!     0x07, 0x03, 0x00, 0x00, 0x00, // ldai 3
//!     0x38, // return
//! ];
//! let collector = MethodCollector::new();
//! let method = collector.collect("choose", 0, 0, &code, vec![])?;
//!
//! let result = build_circuit(&method)?;
//! assert!(result.circuit.verify().is_ok());
//! println!("{}", result.circuit.to_dot(Some("choose")));
//! # Ok::<(), gatelift::Error>(())
//! ```

#[macro_use]
pub(crate) mod error;

pub mod builder;
pub mod bytecode;
pub mod circuit;
pub mod collector;
pub mod compile;
pub mod graph;
pub mod prelude;

#[cfg(test)]
pub(crate) mod test;

pub use builder::{build_circuit, BuildResult};
pub use error::{Error, Result};
