//! Method collection: decoding, deduplication and nested-method discovery.
//!
//! Modules routinely contain byte-identical method bodies (accessors,
//! trivial arrow functions); the collector decodes each distinct body once
//! and hands out shared [`MethodPcInfo`] handles. The cache is concurrent,
//! so the parallel module driver can collect from worker threads directly.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    bytecode::{decode_stream, ExceptionHandler, MethodInfo, MethodPcInfo, Operand},
    Result,
};

/// Decodes method bodies into [`MethodInfo`] records, interning the decode
/// results.
///
/// Keyed by body bytes plus register-file size: the decoder expands
/// `resume_generator`'s write set from the register count, so two methods
/// only share a decode when both match.
#[derive(Debug, Default)]
pub struct MethodCollector {
    cache: DashMap<(Vec<u8>, u16), Arc<MethodPcInfo>>,
}

impl MethodCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        MethodCollector {
            cache: DashMap::new(),
        }
    }

    /// Decodes (or re-uses) one method body and assembles its
    /// [`MethodInfo`], discovering the nested function literals it defines.
    ///
    /// # Errors
    ///
    /// Propagates decode failures; nothing is cached for a failing body.
    pub fn collect(
        &self,
        name: &str,
        num_vregs: u16,
        num_args: u16,
        code: &[u8],
        exception_table: Vec<ExceptionHandler>,
    ) -> Result<MethodInfo> {
        let pc_info = self.intern(code, num_vregs)?;
        let inner_methods = Self::inner_methods(&pc_info);
        Ok(MethodInfo {
            name: name.to_string(),
            num_vregs,
            num_args,
            pc_info,
            exception_table,
            inner_methods,
        })
    }

    /// The shared decode result for one body, decoding on first sight.
    fn intern(&self, code: &[u8], num_vregs: u16) -> Result<Arc<MethodPcInfo>> {
        let key = (code.to_vec(), num_vregs);
        if let Some(existing) = self.cache.get(&key) {
            return Ok(Arc::clone(&existing));
        }
        let (infos, pc_offsets) = decode_stream(code, num_vregs)?;
        let pc_info = Arc::new(MethodPcInfo {
            pc_offsets,
            infos,
            byte_len: code.len(),
        });
        self.cache.insert(key, Arc::clone(&pc_info));
        Ok(pc_info)
    }

    /// Method ids of every nested function literal the body defines.
    fn inner_methods(pc: &MethodPcInfo) -> Vec<u16> {
        let mut ids = Vec::new();
        for info in &pc.infos {
            for op in &info.inputs {
                if let Operand::MethodId(id) = op {
                    if !ids.contains(id) {
                        ids.push(*id);
                    }
                }
            }
        }
        ids
    }

    /// Number of distinct bodies decoded so far.
    #[must_use]
    pub fn distinct_bodies(&self) -> usize {
        self.cache.len()
    }
}
