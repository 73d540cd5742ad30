// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Spinel tests.

// LINEBENDER LINT SET - lib.rs - v2
// See https://linebender.org/wiki/canonical-lints/
// These lints aren't included in Cargo.toml because they
// shouldn't apply to examples and tests
#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
// Targeting e.g. 32-bit means structs containing usize can give false positives for 64-bit.
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
// END LINEBENDER LINT SET
#![cfg_attr(docsrs, feature(doc_cfg))]
// The following lints are part of the Linebender standard set,
// but resolving them has been deferred for now.
// Feel free to send a PR that solves one or more of these.
#![allow(
    missing_debug_implementations,
    unreachable_pub,
    missing_docs,
    clippy::missing_assert_message
)]

use anyhow::{ensure, Result};
use spinel::kurbo::Rect;
use spinel::peniko::{Color, Fill};
use spinel::styling::root_group_leave;
use spinel::{
    Context, ContextCreateInfo, CpuEngine, Path, PathBuilder, RenderSubmit, SubmitExt,
    TargetConfig,
};

pub struct TestParams {
    pub width: u32,
    pub height: u32,
    pub background: Color,
    pub block_pool_size: u64,
    pub handle_count: u32,
    pub target: TargetConfig,
}

impl TestParams {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background: spinel::peniko::color::palette::css::WHITE,
            block_pool_size: 1 << 20,
            handle_count: 256,
            target: TargetConfig::default(),
        }
    }

    pub fn context(&self) -> Result<Context> {
        let info = ContextCreateInfo {
            target: self.target,
            block_pool_size: self.block_pool_size,
            handle_count: self.handle_count,
        };
        Ok(Context::new(Box::new(CpuEngine::new()), info)?)
    }
}

/// Pixels read back from a surface.
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Image {
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Number of pixels equal to `rgba`.
    pub fn count(&self, rgba: [u8; 4]) -> usize {
        self.data
            .chunks_exact(4)
            .filter(|pixel| **pixel == rgba)
            .count()
    }
}

/// The RGBA8 bytes a surface stores for an opaque color.
pub fn rgba8(color: Color) -> [u8; 4] {
    let c = color.to_rgba8();
    [c.r, c.g, c.b, c.a]
}

/// Appends a closed rectangle to the path being built.
pub fn rect_to(pb: &PathBuilder, rect: Rect) -> spinel::Result<()> {
    let [x0, y0, x1, y1] = [rect.x0, rect.y0, rect.x1, rect.y1].map(|v| v as f32);
    pb.move_to(x0, y0)?;
    pb.line_to(x1, y0)?;
    pb.line_to(x1, y1)?;
    pb.line_to(x0, y1)?;
    pb.line_to(x0, y0)
}

pub fn rect_path(pb: &PathBuilder, rect: Rect) -> spinel::Result<Path> {
    pb.begin()?;
    rect_to(pb, rect)?;
    pb.end()
}

/// Renders filled rectangles over the background. Later rectangles are
/// drawn on top of earlier ones.
pub fn render_rects(params: &TestParams, rects: &[(Rect, Color)]) -> Result<Image> {
    ensure!(!rects.is_empty(), "nothing to render");
    let ctx = params.context()?;
    let pb = ctx.path_builder()?;
    let rb = ctx.raster_builder()?;
    let mut rasters = Vec::with_capacity(rects.len());
    for (rect, _) in rects {
        let path = rect_path(&pb, *rect)?;
        rb.begin()?;
        rb.add(&[path], None, None, None, None)?;
        rasters.push(rb.end()?);
        ctx.path_release(&[path])?;
    }

    // Layer 0 is the front-most layer.
    let layer_count = rects.len() as u32;
    let layers: Vec<u32> = (0..layer_count).rev().collect();
    let composition = ctx.composition()?;
    composition.place(&rasters, &layers, None)?;
    ctx.raster_release(&rasters)?;

    let styling = ctx.styling(layer_count, 16 + 8 * layer_count)?;
    let root = styling.group_alloc()?;
    for (&layer, (_, color)) in layers.iter().zip(rects) {
        styling.group_layer_fill(root, layer, Fill::NonZero, *color)?;
    }
    styling.group_leave(root, &root_group_leave(params.background))?;

    let surface = ctx.surface(params.width, params.height)?;
    let clear = SubmitExt::ComputeFill {
        rect: [0, 0, params.width, params.height],
        color: params.background,
    };
    ctx.render(&RenderSubmit::new(&styling, &composition, &surface).with_ext(clear))?;
    Ok(Image {
        width: params.width,
        height: params.height,
        data: surface.read_pixels()?,
    })
}
