// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel_shaders::{KernelId, KernelLayout};

use crate::recording::{BufferProxy, Recording, ShaderId, SubmissionIndex};
use crate::Result;

/// A backend that runs recordings of kernel dispatches.
///
/// Recordings are executed in submission order. Everything a recording
/// touches is identified by proxies, which the engine materializes on first
/// use.
pub trait Engine {
    /// Prepares a kernel for dispatch, validating it against its layout.
    fn add_kernel(&mut self, layout: &'static KernelLayout) -> Result<ShaderId>;

    fn submit(&mut self, recording: Recording) -> Result<SubmissionIndex>;

    /// Returns true when the submission and every earlier one completed.
    fn is_complete(&mut self, index: SubmissionIndex) -> bool;

    /// Blocks until the submission completed.
    fn wait(&mut self, index: SubmissionIndex) -> Result<()>;

    /// Writes host data straight into a buffer, outside of any recording.
    fn write_buffer(&mut self, proxy: &BufferProxy, offset: u64, data: &[u8]) -> Result<()>;

    /// Reads back a byte range of a buffer once all submitted work that
    /// writes it has completed.
    fn read_buffer(&mut self, proxy: &BufferProxy, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Whether the host can write device buffers directly, so that staging
    /// uploads through a submission can be skipped.
    fn is_unified_memory(&self) -> bool;
}

/// The shader id of every kernel of the pipeline, indexed by [`KernelId`].
#[derive(Clone, Debug)]
pub struct Kernels {
    ids: Vec<ShaderId>,
}

impl Kernels {
    /// Adds every kernel to the engine.
    pub fn new(engine: &mut dyn Engine) -> Result<Self> {
        let ids = KernelId::ALL
            .iter()
            .map(|id| engine.add_kernel(id.layout()))
            .collect::<Result<_>>()?;
        Ok(Self { ids })
    }

    pub fn get(&self, id: KernelId) -> ShaderId {
        self.ids[id as usize]
    }
}
