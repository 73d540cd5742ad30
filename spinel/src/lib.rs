// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Spinel is a 2D vector renderer that does all of its heavy lifting in
//! compute kernels.
//!
//! Paths are built on the host into a staging ring and copied into a
//! device-side block pool. Raster builders transform, clip and rasterize
//! paths into tile keys, compositions place rasters on layers and a render
//! submission interprets a styling extent over every covered tile.
//!
//! The pipeline runs on an [`Engine`]. [`CpuEngine`] executes the reference
//! kernels on the host and needs nothing but memory; with the `wgpu`
//! feature, `WgpuEngine` runs the SPIR-V kernels carried by a target blob.
//!
//! ```no_run
//! use spinel::peniko::{color::palette, Fill};
//! use spinel::{Context, ContextCreateInfo, CpuEngine, RenderSubmit};
//!
//! # fn main() -> spinel::Result<()> {
//! let ctx = Context::new(Box::new(CpuEngine::new()), ContextCreateInfo::default())?;
//! let pb = ctx.path_builder()?;
//! pb.begin()?;
//! pb.move_to(8.0, 8.0)?;
//! pb.line_to(56.0, 8.0)?;
//! pb.line_to(56.0, 56.0)?;
//! pb.line_to(8.0, 56.0)?;
//! pb.line_to(8.0, 8.0)?;
//! let path = pb.end()?;
//!
//! let rb = ctx.raster_builder()?;
//! rb.begin()?;
//! rb.add(&[path], None, None, None, None)?;
//! let raster = rb.end()?;
//!
//! let composition = ctx.composition()?;
//! composition.place(&[raster], &[0], None)?;
//!
//! let styling = ctx.styling(1, 64)?;
//! let root = styling.group_alloc()?;
//! styling.group_layer_fill(root, 0, Fill::NonZero, palette::css::RED)?;
//! styling.group_leave(root, &spinel::styling::root_group_leave(palette::css::WHITE))?;
//!
//! let surface = ctx.surface(64, 64)?;
//! ctx.render(&RenderSubmit::new(&styling, &composition, &surface))?;
//! let _pixels = surface.read_pixels()?;
//! # Ok(())
//! # }
//! ```

// LINEBENDER LINT SET - lib.rs - v2
// See https://linebender.org/wiki/canonical-lints/
// These lints aren't included in Cargo.toml because they
// shouldn't apply to examples and tests
#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// The following lints are part of the Linebender standard set,
// but resolving them has been deferred for now.
#![allow(missing_docs, reason = "We have many as-yet undocumented items.")]
#![allow(
    missing_debug_implementations,
    clippy::cast_possible_truncation,
    clippy::missing_assert_message,
    reason = "Deferred"
)]

mod block_pool;
mod composition;
mod context;
mod cpu_engine;
mod engine;
mod handles;
mod path_builder;
mod raster_builder;
mod recording;
mod render;
pub mod styling;
mod surface;
#[cfg(feature = "wgpu")]
mod wgpu_engine;

pub mod low_level {
    //! The engine interface, for driving Spinel's kernels on another
    //! backend.

    pub use crate::engine::{Engine, Kernels};
    pub use crate::recording::{
        Bindings, BufferProxy, Command, Recording, ResourceId, ShaderId, SubmissionIndex,
    };
}

/// Styling and composition primitives.
pub use peniko;
/// 2D geometry, with a focus on curves.
pub use peniko::kurbo;

#[cfg(feature = "wgpu")]
pub use wgpu;

pub use spinel_encoding::{
    Clip, ClipWeakref, PathHeader, PrimCounts, RasterHeader, Target, TargetBuilder, TargetConfig,
    TargetError, TargetRequirements, Transform, TransformStack, TransformType, TransformWeakref,
};
pub use spinel_encoding::styling::GroupId;

pub use composition::Composition;
pub use context::{Context, ContextCreateInfo, Status};
pub use cpu_engine::CpuEngine;
pub use handles::{Path, Raster};
pub use path_builder::PathBuilder;
pub use raster_builder::RasterBuilder;
pub use recording::TimelineSemaphore;
pub use render::{RenderSubmit, SubmitExt};
pub use styling::Styling;
pub use surface::Surface;
#[cfg(feature = "wgpu")]
pub use wgpu_engine::WgpuEngine;

use spinel_encoding::styling::StylingError;
use thiserror::Error;

/// Errors that can occur in Spinel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A device-side failure was observed. The context no longer accepts
    /// work.
    #[error("context is lost")]
    ContextLost,
    #[error("path builder is lost")]
    PathBuilderLost,
    #[error("path builder has no path begun")]
    PathBuilderPathNotBegun,
    #[error("path builder is already building a path")]
    PathBuilderBuilding,
    #[error("raster builder is lost")]
    RasterBuilderLost,
    #[error("raster builder has no raster begun")]
    RasterBuilderNotBuilding,
    #[error("raster builder is already building a raster")]
    RasterBuilderBuilding,
    /// A single raster does not fit the capacities of one cohort.
    #[error("raster does not fit in a raster cohort")]
    RasterBuilderTooManyRasters,
    #[error("composition is sealed")]
    CompositionSealed,
    #[error("styling is sealed")]
    StylingSealed,
    #[error("styling command region is exhausted")]
    StylingCommandsOverflow,
    #[error("layer id is out of range")]
    LayerIdInvalid,
    /// A path or raster handle was never created, or has been released.
    #[error("handle is invalid")]
    HandleInvalid,
    #[error("every handle is in use")]
    HandleOverflow,
    /// The block pool, or a key buffer, ran out of space on the device.
    #[error("block pool is exhausted")]
    BlockPoolEmpty,
    #[error("transform weakref is stale and no transform was supplied")]
    TransformWeakrefInvalid,
    #[error("clip weakref is stale and no clip was supplied")]
    ClipWeakrefInvalid,
    /// Some of the outputs of a requirements query were missing or too small.
    #[error("target requirements are incomplete")]
    PartialTargetRequirements,
    #[error("invalid target: {0}")]
    Target(#[from] TargetError),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("invalid render extension chain: {0}")]
    RenderExtensionInvalid(&'static str),
    /// A submission waits on a semaphore value nothing will signal.
    #[error("semaphore wait can never be satisfied")]
    SemaphoreWait,
    #[error("bindings do not match the kernel layout of '{0}'")]
    BindingMismatch(&'static str),
    #[error("push constants do not match the kernel layout of '{0}'")]
    PushConstantSize(&'static str),
    #[error("no module for kernel '{0}'")]
    UnknownKernel(&'static str),
    #[error("engine error: {0}")]
    Engine(String),
}

impl From<StylingError> for Error {
    fn from(error: StylingError) -> Self {
        match error {
            StylingError::CommandsOverflow | StylingError::CountTooLarge => {
                Self::StylingCommandsOverflow
            }
            StylingError::LayerIdInvalid => Self::LayerIdInvalid,
            StylingError::GroupIdInvalid => Self::InvalidArgument("group id"),
        }
    }
}

/// A convenience alias for `Result<T, spinel::Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Queries the device requirements of a target.
///
/// See [`Target::get_requirements`]. Returns
/// [`Error::PartialTargetRequirements`] when an output was missing or too
/// small to hold the requirements.
pub fn get_requirements(target: &Target, requirements: &mut TargetRequirements<'_>) -> Result<()> {
    if target.get_requirements(requirements) {
        Ok(())
    } else {
        Err(Error::PartialTargetRequirements)
    }
}
