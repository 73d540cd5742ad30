// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! An engine that runs the SPIR-V kernels of a target on a wgpu device.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use spinel_encoding::{Target, TargetConfig};
use spinel_shaders::{Access, KernelLayout};
use wgpu::{
    BindGroup, BindGroupLayout, Buffer, BufferUsages, CommandEncoder, CommandEncoderDescriptor,
    ComputePassDescriptor, ComputePipeline, Device, Features, PipelineCompilationOptions, Queue,
    ShaderStages,
};

use crate::engine::Engine;
use crate::recording::{
    BufferProxy, Command, Recording, ResourceId, ShaderId, SubmissionIndex, TimelineSemaphore,
};
use crate::{Error, Result};

struct WgpuShader {
    layout: &'static KernelLayout,
    pipeline: ComputePipeline,
    set_layouts: Vec<BindGroupLayout>,
}

/// Runs recordings on a wgpu queue.
///
/// The device must support push constants of the largest kernel push block.
/// Use [`WgpuEngine::config`] as the target of the context driving it.
pub struct WgpuEngine {
    device: Device,
    queue: Queue,
    target: Target,
    /// Bind group layouts keyed by descriptor set name.
    set_layouts: HashMap<&'static str, BindGroupLayout>,
    shaders: Vec<WgpuShader>,
    buffers: HashMap<ResourceId, Buffer>,
    submitted: u64,
    completed: Arc<AtomicU64>,
}

const USAGES: BufferUsages = BufferUsages::STORAGE
    .union(BufferUsages::UNIFORM)
    .union(BufferUsages::COPY_SRC)
    .union(BufferUsages::COPY_DST)
    .union(BufferUsages::INDIRECT);

fn engine_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Engine(format!("{context}: {err}"))
}

fn check_aligned(proxy: &BufferProxy, offset: u64, len: u64) -> Result<()> {
    if offset % 4 != 0 || len % 4 != 0 || offset + len > proxy.size {
        return Err(Error::Engine(format!(
            "unaligned or out of bounds range {offset}+{len} of '{}'",
            proxy.name
        )));
    }
    Ok(())
}

impl WgpuEngine {
    pub fn new(device: Device, queue: Queue, target: Target) -> Result<Self> {
        if !device.features().contains(Features::PUSH_CONSTANTS) {
            return Err(Error::Engine("device lacks push constants".into()));
        }
        log::info!(
            "wgpu engine: {} kernel modules, {} extensions",
            target.modules().len(),
            target.extensions().len()
        );
        Ok(Self {
            device,
            queue,
            target,
            set_layouts: HashMap::new(),
            shaders: Vec::new(),
            buffers: HashMap::new(),
            submitted: 0,
            completed: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The tuning the target's kernels were built with.
    pub fn config(&self) -> TargetConfig {
        *self.target.config()
    }

    fn set_layout(&mut self, layout: &'static KernelLayout, set: usize) -> BindGroupLayout {
        let descriptor = layout.sets[set];
        if let Some(bgl) = self.set_layouts.get(descriptor.name) {
            return bgl.clone();
        }
        let entries = descriptor
            .bindings
            .iter()
            .enumerate()
            .map(|(i, binding)| wgpu::BindGroupLayoutEntry {
                binding: i as u32,
                visibility: ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match binding.access {
                        Access::Uniform => wgpu::BufferBindingType::Uniform,
                        access => wgpu::BufferBindingType::Storage {
                            read_only: !access.is_mutable(),
                        },
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect::<Vec<_>>();
        let bgl = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(descriptor.name),
                entries: &entries,
            });
        self.set_layouts.insert(descriptor.name, bgl.clone());
        bgl
    }

    fn materialize(&mut self, proxy: &BufferProxy) -> &Buffer {
        let device = &self.device;
        self.buffers.entry(proxy.id).or_insert_with(|| {
            // Buffers are zeroed at creation.
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(proxy.name),
                size: proxy.size.next_multiple_of(4),
                usage: USAGES,
                mapped_at_creation: false,
            })
        })
    }

    fn buffer(&self, proxy: &BufferProxy) -> Result<&Buffer> {
        self.buffers
            .get(&proxy.id)
            .ok_or_else(|| Error::Engine(format!("buffer '{}' is not materialized", proxy.name)))
    }

    fn bind_groups(
        &mut self,
        shader: ShaderId,
        push: &[u8],
        bindings: &[BufferProxy],
    ) -> Result<(&WgpuShader, Vec<BindGroup>)> {
        let Some(layout) = self.shaders.get(shader.0).map(|s| s.layout) else {
            return Err(Error::Engine(format!("unknown shader {}", shader.0)));
        };
        if bindings.len() != layout.binding_count() {
            return Err(Error::BindingMismatch(layout.name));
        }
        if push.len() != layout.push_size() {
            return Err(Error::PushConstantSize(layout.name));
        }
        for proxy in bindings {
            self.materialize(proxy);
        }
        let shader = &self.shaders[shader.0];
        let mut groups = Vec::with_capacity(layout.sets.len());
        let mut rest = bindings;
        for (set, bgl) in layout.sets.iter().zip(&shader.set_layouts) {
            let (proxies, tail) = rest.split_at(set.bindings.len());
            rest = tail;
            let entries = proxies
                .iter()
                .enumerate()
                .map(|(i, proxy)| {
                    Ok(wgpu::BindGroupEntry {
                        binding: i as u32,
                        resource: self.buffer(proxy)?.as_entire_binding(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(set.name),
                layout: bgl,
                entries: &entries,
            }));
        }
        Ok((shader, groups))
    }

    fn encode_dispatch(
        &mut self,
        encoder: &mut CommandEncoder,
        shader: ShaderId,
        push: &[u8],
        bindings: &[BufferProxy],
        workgroups: Workgroups,
    ) -> Result<()> {
        let indirect = match workgroups {
            Workgroups::Direct(_) => None,
            Workgroups::Indirect(proxy, offset) => {
                check_aligned(&proxy, offset, 12)?;
                Some((self.materialize(&proxy).clone(), offset))
            }
        };
        let (shader, groups) = self.bind_groups(shader, push, bindings)?;
        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some(shader.layout.name),
            timestamp_writes: None,
        });
        pass.set_pipeline(&shader.pipeline);
        for (i, group) in groups.iter().enumerate() {
            pass.set_bind_group(i as u32, group, &[]);
        }
        if !push.is_empty() {
            pass.set_push_constants(0, push);
        }
        match (workgroups, indirect) {
            (_, Some((buffer, offset))) => pass.dispatch_workgroups_indirect(&buffer, offset),
            (Workgroups::Direct(n_wg), None) => pass.dispatch_workgroups(n_wg, 1, 1),
            (Workgroups::Indirect(..), None) => {}
        }
        Ok(())
    }

    /// Encodes a host write as a copy from a mapped staging buffer, so that
    /// it stays ordered with the surrounding commands.
    fn encode_write(
        &mut self,
        encoder: &mut CommandEncoder,
        proxy: &BufferProxy,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        check_aligned(proxy, offset, data.len() as u64)?;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: data.len() as u64,
            usage: BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        });
        staging.slice(..).get_mapped_range_mut().copy_from_slice(data);
        staging.unmap();
        let dst = self.materialize(proxy);
        encoder.copy_buffer_to_buffer(&staging, 0, dst, offset, data.len() as u64);
        Ok(())
    }

    fn encode(&mut self, recording: Recording) -> Result<(CommandEncoder, Vec<Signal>)> {
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("spinel"),
            });
        let mut signals = Vec::new();
        let mut frees = Vec::new();
        for command in recording.commands {
            match command {
                Command::Write(proxy, offset, data) => {
                    self.encode_write(&mut encoder, &proxy, offset, &data)?;
                }
                Command::Clear(proxy, offset, size) => {
                    let size = size.unwrap_or(proxy.size.saturating_sub(offset));
                    check_aligned(&proxy, offset, size)?;
                    let buffer = self.materialize(&proxy);
                    encoder.clear_buffer(buffer, offset, Some(size));
                }
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    check_aligned(&src, src_offset, size)?;
                    check_aligned(&dst, dst_offset, size)?;
                    self.materialize(&src);
                    self.materialize(&dst);
                    encoder.copy_buffer_to_buffer(
                        self.buffer(&src)?,
                        src_offset,
                        self.buffer(&dst)?,
                        dst_offset,
                        size,
                    );
                }
                Command::Dispatch(shader, n_wg, push, bindings) => {
                    if n_wg > 0 {
                        let workgroups = Workgroups::Direct(n_wg);
                        self.encode_dispatch(&mut encoder, shader, &push, &bindings, workgroups)?;
                    }
                }
                Command::DispatchIndirect(shader, proxy, offset, push, bindings) => {
                    let workgroups = Workgroups::Indirect(proxy, offset);
                    self.encode_dispatch(&mut encoder, shader, &push, &bindings, workgroups)?;
                }
                Command::FreeBuffer(proxy) => frees.push(proxy.id),
                Command::Wait(semaphore, value) => {
                    // The queue runs in submission order: a reachable value
                    // is signalled by earlier work or by the host.
                    if !semaphore.is_reachable(value) {
                        return Err(Error::SemaphoreWait);
                    }
                }
                Command::Signal(semaphore, value) => signals.push(Signal { semaphore, value }),
            }
        }
        for id in frees {
            self.buffers.remove(&id);
        }
        Ok((encoder, signals))
    }

    fn poll_wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|err| engine_error("poll", err))
    }
}

struct Signal {
    semaphore: TimelineSemaphore,
    value: u64,
}

#[derive(Copy, Clone)]
enum Workgroups {
    Direct(u32),
    /// Workgroup counts read from a buffer at a byte offset.
    Indirect(BufferProxy, u64),
}

impl Engine for WgpuEngine {
    fn add_kernel(&mut self, layout: &'static KernelLayout) -> Result<ShaderId> {
        let Some(words) = self.target.module(layout.id as u32) else {
            return Err(Error::UnknownKernel(layout.name));
        };
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(layout.name),
                source: wgpu::ShaderSource::SpirV(Cow::Owned(words.to_vec())),
            });
        let set_layouts = (0..layout.sets.len())
            .map(|set| self.set_layout(layout, set))
            .collect::<Vec<_>>();
        let push_size = layout.push_size() as u32;
        let push_ranges = [wgpu::PushConstantRange {
            stages: ShaderStages::COMPUTE,
            range: 0..push_size,
        }];
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(layout.name),
                bind_group_layouts: &set_layouts.iter().collect::<Vec<_>>(),
                push_constant_ranges: if push_size > 0 { &push_ranges } else { &[] },
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(layout.name),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: PipelineCompilationOptions::default(),
                cache: None,
            });
        log::debug!("wgpu kernel '{}': {} words", layout.name, words.len());
        self.shaders.push(WgpuShader {
            layout,
            pipeline,
            set_layouts,
        });
        Ok(ShaderId(self.shaders.len() - 1))
    }

    fn submit(&mut self, recording: Recording) -> Result<SubmissionIndex> {
        let (encoder, signals) = self.encode(recording)?;
        self.queue.submit(Some(encoder.finish()));
        self.submitted += 1;
        let index = self.submitted;
        for signal in &signals {
            signal.semaphore.enqueue(signal.value);
        }
        let completed = self.completed.clone();
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(index, Ordering::AcqRel);
            for signal in signals {
                signal.semaphore.signal(signal.value);
            }
        });
        Ok(SubmissionIndex(index))
    }

    fn is_complete(&mut self, index: SubmissionIndex) -> bool {
        if self.completed.load(Ordering::Acquire) >= index.0 {
            return true;
        }
        if let Err(err) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("wgpu poll: {err}");
        }
        self.completed.load(Ordering::Acquire) >= index.0
    }

    fn wait(&mut self, index: SubmissionIndex) -> Result<()> {
        while !self.is_complete(index) {
            self.poll_wait()?;
        }
        Ok(())
    }

    fn write_buffer(&mut self, proxy: &BufferProxy, offset: u64, data: &[u8]) -> Result<()> {
        check_aligned(proxy, offset, data.len() as u64)?;
        let buffer = self.materialize(proxy).clone();
        self.queue.write_buffer(&buffer, offset, data);
        Ok(())
    }

    fn read_buffer(&mut self, proxy: &BufferProxy, offset: u64, len: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        if offset % 4 != 0 || offset + len > proxy.size {
            return Err(Error::Engine(format!(
                "readback {offset}+{len} out of bounds of '{}'",
                proxy.name
            )));
        }
        // Buffers are allocated in whole dwords, so the padded range fits.
        let padded = len.next_multiple_of(4);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: padded,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("readback"),
            });
        let src = self.materialize(proxy);
        encoder.copy_buffer_to_buffer(src, offset, &staging, 0, padded);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            // Only fails when the receiver is gone.
            let _ = sender.send(v);
        });
        self.poll_wait()?;
        pollster::block_on(receiver.receive())
            .ok_or_else(|| Error::Engine("readback channel closed".into()))?
            .map_err(|err| engine_error("map", err))?;
        let bytes = slice.get_mapped_range()[..len as usize].to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn is_unified_memory(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use spinel_encoding::{Target, TargetBuilder, TargetConfig};
    use spinel_shaders::layout::KERNELS;
    use spinel_shaders::KernelId;

    use super::WgpuEngine;
    use crate::engine::Engine;
    use crate::recording::{BufferProxy, Recording, TimelineSemaphore};
    use crate::{Context, ContextCreateInfo, Error};

    /// A compute shader with a `main` entry point that does nothing.
    #[rustfmt::skip]
    const EMPTY_KERNEL: &[u32] = &[
        0x0723_0203, 0x0001_0000, 0, 5, 0,
        0x0002_0011, 1,
        0x0003_000E, 0, 1,
        0x0005_000F, 5, 1, 0x6E69_616D, 0,
        0x0006_0010, 1, 17, 1, 1, 1,
        0x0002_0013, 2,
        0x0003_0021, 3, 2,
        0x0005_0036, 2, 1, 0, 3,
        0x0002_00F8, 4,
        0x0001_00FD,
        0x0001_0038,
    ];

    fn full_target() -> Target {
        let builder = KERNELS.iter().fold(
            TargetBuilder::new(TargetConfig::default()),
            |builder, kernel| builder.module(kernel.id as u32, EMPTY_KERNEL),
        );
        Target::parse(&builder.build()).unwrap()
    }

    /// Opens the default adapter, or `None` when there is no adapter with
    /// push constants.
    fn device() -> Option<(wgpu::Device, wgpu::Queue)> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::from_env().unwrap_or_default(),
                flags: wgpu::InstanceFlags::from_build_config().with_env(),
                memory_budget_thresholds: Default::default(),
                backend_options: wgpu::BackendOptions::from_env_or_default(),
            });
            let adapter = wgpu::util::initialize_adapter_from_env_or_default(&instance, None)
                .await
                .ok()?;
            if !adapter.features().contains(wgpu::Features::PUSH_CONSTANTS) {
                return None;
            }
            adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("spinel test device"),
                    required_features: wgpu::Features::PUSH_CONSTANTS,
                    required_limits: adapter.limits(),
                    ..Default::default()
                })
                .await
                .ok()
        })
    }

    macro_rules! device_or_skip {
        () => {
            match device() {
                Some(device) => device,
                None => {
                    eprintln!("no adapter with push constants, skipping");
                    return;
                }
            }
        };
    }

    #[test]
    #[cfg_attr(skip_gpu_tests, ignore)]
    fn writes_are_ordered_with_signals() {
        let (device, queue) = device_or_skip!();
        let mut engine = WgpuEngine::new(device, queue, full_target()).unwrap();
        let buffer = BufferProxy::new(16, "data");
        let semaphore = TimelineSemaphore::new();
        let mut recording = Recording::default();
        recording.write(buffer, 4, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        recording.signal(semaphore.clone(), 3);
        let index = engine.submit(recording).unwrap();
        engine.wait(index).unwrap();
        assert!(engine.is_complete(index));
        assert_eq!(semaphore.value(), 3);
        assert_eq!(
            engine.read_buffer(&buffer, 0, 12).unwrap(),
            [0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8]
        );

        engine.write_buffer(&buffer, 12, &[9; 4]).unwrap();
        assert_eq!(engine.read_buffer(&buffer, 12, 3).unwrap(), [9; 3]);
        assert!(engine.write_buffer(&buffer, 14, &[0; 4]).is_err());
    }

    #[test]
    #[cfg_attr(skip_gpu_tests, ignore)]
    fn kernels_need_a_module() {
        let (device, queue) = device_or_skip!();
        let target = TargetBuilder::new(TargetConfig::default())
            .module(KernelId::ALL[0] as u32, EMPTY_KERNEL)
            .build();
        let mut engine =
            WgpuEngine::new(device, queue, Target::parse(&target).unwrap()).unwrap();
        engine.add_kernel(KernelId::ALL[0].layout()).unwrap();
        let missing = KernelId::ALL[1].layout();
        assert_eq!(
            engine.add_kernel(missing),
            Err(Error::UnknownKernel(missing.name))
        );
    }

    #[test]
    #[cfg_attr(skip_gpu_tests, ignore)]
    fn context_runs_on_the_device() {
        let (device, queue) = device_or_skip!();
        let engine = WgpuEngine::new(device, queue, full_target()).unwrap();
        let info = ContextCreateInfo {
            target: engine.config(),
            block_pool_size: 1 << 20,
            handle_count: 256,
        };
        let ctx = Context::new(Box::new(engine), info).unwrap();
        ctx.drain().unwrap();
        assert_eq!(ctx.status().unwrap().handles_in_use, 0);
    }
}
