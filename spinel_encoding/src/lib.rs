// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Raw data layouts shared by the Spinel host runtime and its kernels.
//!
//! Everything in this crate is plain data or pure host-side arithmetic:
//! tagged block ids, sort keys, staging ring cursors, weak references,
//! transforms, styling command encoding and the target blob format.

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
#![allow(missing_docs, reason = "We have many as-yet undocumented items.")]
#![allow(
    missing_debug_implementations,
    clippy::cast_possible_truncation,
    clippy::missing_panics_doc,
    reason = "Deferred"
)]

mod block_id;
mod config;
mod keys;
pub mod math;
mod path;
mod raster;
mod ring;
pub mod styling;
mod target;
mod transform_stack;
mod weakref;

pub use block_id::{BlockId, Tag, TaggedBlockId};
pub use config::{
    align_up, BlockPoolAtomics, BlockPoolConfig, BufferSize, IndirectCount, PushFillSurface,
    PushFills, PushPathsAlloc, PushPathsCopy, PushPlace, PushRasters, PushReclaim, PushRender,
    TargetConfig,
};
pub use keys::{KeysHeader, Ttck, Ttrk, Ttxk};
pub use math::{Transform, TransformType};
pub use path::{PathBlockKind, PathEncoder, PathHeader, PrimCounts, NODE_LINK_DWORDS};
pub use raster::{
    Clip, FillCmd, PlaceCmd, RastCmd, RasterHeader, RasterizeCounts, RcMeta, TileRange,
};
pub use ring::{Next, Ring};
pub use target::{
    Target, TargetBuilder, TargetError, TargetFeatures, TargetHeader, TargetModule,
    TargetRequirements, EXTENSION_NAME_BYTES, TARGET_MAGIC, TARGET_VERSION,
};
pub use transform_stack::TransformStack;
pub use weakref::{ClipWeakref, Epoch, TransformWeakref, TypedWeakref, Weakref};
