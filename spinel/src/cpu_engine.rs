// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! An engine that runs the CPU implementations of the kernels.

use std::cell::RefCell;
use std::collections::HashMap;

use spinel_shaders::cpu::{self, CpuBinding, CpuBuffer, CpuKernel};
use spinel_shaders::KernelLayout;

use crate::engine::Engine;
use crate::recording::{BufferProxy, Command, Recording, ResourceId, ShaderId, SubmissionIndex};
use crate::{Error, Result};

struct CpuShader {
    layout: &'static KernelLayout,
    kernel: CpuKernel,
}

/// Runs every recording synchronously, at submission.
///
/// Buffers live in host memory, so the engine reports unified memory and
/// every submission is complete as soon as `submit` returns.
#[derive(Default)]
pub struct CpuEngine {
    shaders: Vec<CpuShader>,
    buffers: HashMap<ResourceId, RefCell<CpuBuffer>>,
    submitted: u64,
}

impl CpuEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn materialize(&mut self, proxy: &BufferProxy) -> &RefCell<CpuBuffer> {
        self.buffers
            .entry(proxy.id)
            .or_insert_with(|| RefCell::new(CpuBuffer::new(proxy.size as usize)))
    }

    fn range(proxy: &BufferProxy, offset: u64, len: u64) -> Result<std::ops::Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= proxy.size => Ok(offset as usize..end as usize),
            _ => Err(Error::Engine(format!(
                "range {offset}+{len} is out of bounds of '{}'",
                proxy.name
            ))),
        }
    }

    fn dispatch(
        &mut self,
        shader: ShaderId,
        n_wg: u32,
        push: &[u8],
        bindings: &[BufferProxy],
    ) -> Result<()> {
        let Some(&CpuShader { layout, kernel }) = self.shaders.get(shader.0) else {
            return Err(Error::Engine(format!("unknown shader {}", shader.0)));
        };
        if bindings.len() != layout.binding_count() {
            return Err(Error::BindingMismatch(layout.name));
        }
        if push.len() != layout.push_size() {
            return Err(Error::PushConstantSize(layout.name));
        }
        for (i, proxy) in bindings.iter().enumerate() {
            if bindings[..i].iter().any(|p| p.id == proxy.id) {
                return Err(Error::BindingMismatch(layout.name));
            }
            self.materialize(proxy);
        }
        let resources = bindings
            .iter()
            .map(|proxy| self.buffers.get(&proxy.id).map(CpuBinding))
            .collect::<Option<Vec<_>>>()
            .ok_or(Error::BindingMismatch(layout.name))?;
        log::trace!("cpu dispatch {} x{n_wg}", layout.name);
        kernel(n_wg, push, &resources);
        Ok(())
    }

    fn run(&mut self, recording: Recording) -> Result<()> {
        for command in recording.commands {
            match command {
                Command::Write(proxy, offset, data) => {
                    let range = Self::range(&proxy, offset, data.len() as u64)?;
                    self.materialize(&proxy).borrow_mut().bytes_mut()[range]
                        .copy_from_slice(&data);
                }
                Command::Clear(proxy, offset, size) => {
                    let size = size.unwrap_or(proxy.size.saturating_sub(offset));
                    let range = Self::range(&proxy, offset, size)?;
                    self.materialize(&proxy).borrow_mut().bytes_mut()[range].fill(0);
                }
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let src_range = Self::range(&src, src_offset, size)?;
                    let dst_range = Self::range(&dst, dst_offset, size)?;
                    let data = self.materialize(&src).borrow().bytes()[src_range].to_vec();
                    self.materialize(&dst).borrow_mut().bytes_mut()[dst_range]
                        .copy_from_slice(&data);
                }
                Command::Dispatch(shader, n_wg, push, bindings) => {
                    self.dispatch(shader, n_wg, &push, &bindings)?;
                }
                Command::DispatchIndirect(shader, proxy, offset, push, bindings) => {
                    let range = Self::range(&proxy, offset, 4)?;
                    let bytes = self.materialize(&proxy).borrow().bytes()[range].to_vec();
                    let n_wg: u32 = bytemuck::pod_read_unaligned(&bytes);
                    if n_wg > 0 {
                        self.dispatch(shader, n_wg, &push, &bindings)?;
                    }
                }
                Command::FreeBuffer(proxy) => {
                    self.buffers.remove(&proxy.id);
                }
                Command::Wait(semaphore, value) => {
                    if semaphore.value() < value {
                        return Err(Error::SemaphoreWait);
                    }
                }
                Command::Signal(semaphore, value) => semaphore.signal(value),
            }
        }
        Ok(())
    }
}

impl Engine for CpuEngine {
    fn add_kernel(&mut self, layout: &'static KernelLayout) -> Result<ShaderId> {
        let id = ShaderId(self.shaders.len());
        self.shaders.push(CpuShader {
            layout,
            kernel: cpu::kernel(layout.id),
        });
        Ok(id)
    }

    fn submit(&mut self, recording: Recording) -> Result<SubmissionIndex> {
        self.submitted += 1;
        self.run(recording)?;
        Ok(SubmissionIndex(self.submitted))
    }

    fn is_complete(&mut self, _index: SubmissionIndex) -> bool {
        true
    }

    fn wait(&mut self, _index: SubmissionIndex) -> Result<()> {
        Ok(())
    }

    fn write_buffer(&mut self, proxy: &BufferProxy, offset: u64, data: &[u8]) -> Result<()> {
        let range = Self::range(proxy, offset, data.len() as u64)?;
        self.materialize(proxy).borrow_mut().bytes_mut()[range].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, proxy: &BufferProxy, offset: u64, len: u64) -> Result<Vec<u8>> {
        let range = Self::range(proxy, offset, len)?;
        Ok(self.materialize(proxy).borrow().bytes()[range].to_vec())
    }

    fn is_unified_memory(&self) -> bool {
        true
    }
}
