// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use peniko::Color;
use spinel_encoding::{PushFillSurface, PushRender};
use spinel_shaders::KernelId;

use crate::context::{Context, ContextImpl};
use crate::recording::{Bindings, Recording, TimelineSemaphore};
use crate::{Composition, Error, Result, Styling, Surface};

/// An extension of a render submission.
///
/// Compute extensions run in the listed order in one submission, followed
/// by the graphics extensions in a second one. The render itself runs where
/// [`SubmitExt::ComputeRender`] is listed, or after every compute extension
/// when it is not.
#[derive(Clone)]
pub enum SubmitExt<'a> {
    /// Holds the compute submission until the semaphore reaches `value`.
    ComputeWait {
        semaphore: TimelineSemaphore,
        value: u64,
    },
    /// Takes ownership of the surface for compute work.
    ComputeAcquire,
    /// Fills a pixel rectangle, `x0 y0 x1 y1`, of the surface.
    ComputeFill { rect: [u32; 4], color: Color },
    ComputeRender,
    /// Copies the surface into another surface of the same size.
    ComputeCopy { dst: &'a Surface },
    /// Gives up ownership of the surface.
    ComputeRelease,
    ComputeSignal {
        semaphore: TimelineSemaphore,
        value: u64,
    },
    GraphicsWait {
        semaphore: TimelineSemaphore,
        value: u64,
    },
    /// Clears a surface to a color.
    GraphicsClear { dst: &'a Surface, color: Color },
    /// Stores the rendered surface into a surface of the same size.
    GraphicsStore { dst: &'a Surface },
    GraphicsSignal {
        semaphore: TimelineSemaphore,
        value: u64,
    },
}

impl SubmitExt<'_> {
    fn is_graphics(&self) -> bool {
        matches!(
            self,
            Self::GraphicsWait { .. }
                | Self::GraphicsClear { .. }
                | Self::GraphicsStore { .. }
                | Self::GraphicsSignal { .. }
        )
    }
}

/// Everything a render reads and writes.
pub struct RenderSubmit<'a> {
    pub styling: &'a Styling,
    pub composition: &'a Composition,
    pub surface: &'a Surface,
    /// Pixel clip, `x0 y0 x1 y1`, exclusive upper bounds.
    pub clip: [u32; 4],
    pub ext: Vec<SubmitExt<'a>>,
}

impl<'a> RenderSubmit<'a> {
    /// A submission covering the whole surface, with no extensions.
    pub fn new(styling: &'a Styling, composition: &'a Composition, surface: &'a Surface) -> Self {
        Self {
            styling,
            composition,
            surface,
            clip: [0, 0, surface.width(), surface.height()],
            ext: Vec::new(),
        }
    }

    pub fn with_clip(mut self, clip: [u32; 4]) -> Self {
        self.clip = clip;
        self
    }

    pub fn with_ext(mut self, ext: SubmitExt<'a>) -> Self {
        self.ext.push(ext);
        self
    }

    fn validate(&self, ctx: &Context) -> Result<()> {
        if !self.styling.same_context(ctx)
            || !self.composition.same_context(ctx)
            || !self.surface.same_context(ctx)
        {
            return Err(Error::InvalidArgument("object of another context"));
        }
        let renders = self
            .ext
            .iter()
            .filter(|ext| matches!(ext, SubmitExt::ComputeRender))
            .count();
        if renders > 1 {
            return Err(Error::RenderExtensionInvalid("more than one render"));
        }
        for ext in &self.ext {
            match ext {
                SubmitExt::ComputeCopy { dst } | SubmitExt::GraphicsStore { dst } => {
                    if !dst.same_context(ctx) {
                        return Err(Error::InvalidArgument("object of another context"));
                    }
                    let size = (dst.width(), dst.height());
                    if size != (self.surface.width(), self.surface.height()) {
                        return Err(Error::RenderExtensionInvalid("surface sizes differ"));
                    }
                    if dst.buffer == self.surface.buffer {
                        return Err(Error::RenderExtensionInvalid("copy onto itself"));
                    }
                }
                SubmitExt::GraphicsClear { dst, .. } => {
                    if !dst.same_context(ctx) {
                        return Err(Error::InvalidArgument("object of another context"));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn pack_color(color: Color) -> u32 {
    let c = color.to_rgba8();
    u32::from_le_bytes([c.r, c.g, c.b, c.a])
}

fn check_wait(semaphore: &TimelineSemaphore, value: u64) -> Result<()> {
    if semaphore.is_reachable(value) {
        Ok(())
    } else {
        Err(Error::SemaphoreWait)
    }
}

fn record_fill(
    ctx: &ContextImpl,
    recording: &mut Recording,
    surface: &Surface,
    rect: [u32; 4],
    color: Color,
) {
    let pixels = rect[2].saturating_sub(rect[0]) * rect[3].saturating_sub(rect[1]);
    recording.dispatch(
        ctx.kernels.get(KernelId::FillSurface),
        ctx.block_pool.wg_count(pixels),
        &PushFillSurface {
            surface_width: surface.width(),
            surface_height: surface.height(),
            rgba: pack_color(color),
            pad: 0,
            rect,
        },
        Bindings::from_slice(&[surface.buffer]),
    );
}

impl Context {
    /// Renders a composition with a styling into a surface.
    ///
    /// Seals the styling and the composition. Both stay locked until the
    /// render completes: the next mutation of either waits for it.
    pub fn render(&self, submit: &RenderSubmit<'_>) -> Result<()> {
        self.inner.borrow().check_lost()?;
        submit.validate(self)?;
        submit.composition.inner.borrow_mut().seal()?;
        submit.styling.inner.borrow_mut().seal()?;

        let surface = submit.surface;
        let mut compute = Recording::default();
        let mut graphics = Recording::default();
        let mut rendered = false;
        {
            let composition = submit.composition.inner.borrow();
            let styling = submit.styling.inner.borrow();
            let ctx = self.inner.borrow();
            let record_render = |recording: &mut Recording| {
                recording.dispatch_indirect(
                    ctx.kernels.get(KernelId::Render),
                    composition.tile_ranges,
                    0,
                    &PushRender {
                        surface_width: surface.width(),
                        surface_height: surface.height(),
                        layer_count: styling.layer_count(),
                        pad: 0,
                        clip: submit.clip,
                    },
                    ctx.block_pool.bindings_with(&[
                        composition.ttck,
                        composition.tile_ranges,
                        styling.buffer,
                        surface.buffer,
                    ]),
                );
            };

            for ext in submit.ext.iter().filter(|ext| !ext.is_graphics()) {
                match ext {
                    SubmitExt::ComputeWait { semaphore, value } => {
                        check_wait(semaphore, *value)?;
                        compute.wait(semaphore.clone(), *value);
                    }
                    SubmitExt::ComputeAcquire | SubmitExt::ComputeRelease => {
                        log::trace!("surface ownership transfer");
                    }
                    SubmitExt::ComputeFill { rect, color } => {
                        record_fill(&ctx, &mut compute, surface, *rect, *color);
                    }
                    SubmitExt::ComputeRender => {
                        record_render(&mut compute);
                        rendered = true;
                    }
                    SubmitExt::ComputeCopy { dst } => {
                        compute.copy_buffer(surface.buffer, dst.buffer);
                    }
                    SubmitExt::ComputeSignal { semaphore, value } => {
                        compute.signal(semaphore.clone(), *value);
                    }
                    _ => {}
                }
            }
            if !rendered {
                record_render(&mut compute);
            }

            for ext in submit.ext.iter().filter(|ext| ext.is_graphics()) {
                match ext {
                    SubmitExt::GraphicsWait { semaphore, value } => {
                        graphics.wait(semaphore.clone(), *value);
                    }
                    SubmitExt::GraphicsClear { dst, color } => {
                        let rect = [0, 0, dst.width(), dst.height()];
                        record_fill(&ctx, &mut graphics, dst, rect, *color);
                    }
                    SubmitExt::GraphicsStore { dst } => {
                        graphics.copy_buffer(surface.buffer, dst.buffer);
                    }
                    SubmitExt::GraphicsSignal { semaphore, value } => {
                        graphics.signal(semaphore.clone(), *value);
                    }
                    _ => {}
                }
            }
        }

        let index = self.borrow_mut().submit_raw(compute, Vec::new())?;
        submit.composition.inner.borrow_mut().lock(index);
        submit.styling.inner.borrow_mut().lock(index);
        log::debug!(
            "render {}x{} with {} extensions",
            surface.width(),
            surface.height(),
            submit.ext.len()
        );

        let mut ctx = self.borrow_mut();
        if !graphics.is_empty() {
            // Signals of the compute submission count towards these waits.
            for ext in &submit.ext {
                if let SubmitExt::GraphicsWait { semaphore, value } = ext {
                    check_wait(semaphore, *value)?;
                }
            }
            let index = ctx.submit_raw(graphics, Vec::new())?;
            submit.composition.inner.borrow_mut().lock(index);
            submit.styling.inner.borrow_mut().lock(index);
        }
        ctx.poll()
    }
}

#[cfg(test)]
mod tests {
    use peniko::{color::palette, Fill};
    use spinel_encoding::styling::root_group_leave;

    use super::{RenderSubmit, SubmitExt};
    use crate::{Composition, Context, ContextCreateInfo, CpuEngine, Error, Styling, Surface};

    struct Scene {
        ctx: Context,
        styling: Styling,
        composition: Composition,
        surface: Surface,
    }

    /// A red square from 8 to 56 over white, on a 128 by 64 surface.
    fn scene() -> Scene {
        let info = ContextCreateInfo {
            block_pool_size: 1 << 20,
            handle_count: 64,
            ..Default::default()
        };
        let ctx = Context::new(Box::new(CpuEngine::new()), info).unwrap();
        let pb = ctx.path_builder().unwrap();
        pb.begin().unwrap();
        pb.move_to(8.0, 8.0).unwrap();
        pb.line_to(56.0, 8.0).unwrap();
        pb.line_to(56.0, 56.0).unwrap();
        pb.line_to(8.0, 56.0).unwrap();
        pb.line_to(8.0, 8.0).unwrap();
        let path = pb.end().unwrap();
        let rb = ctx.raster_builder().unwrap();
        rb.begin().unwrap();
        rb.add(&[path], None, None, None, None).unwrap();
        let raster = rb.end().unwrap();

        let composition = ctx.composition().unwrap();
        composition.place(&[raster], &[0], None).unwrap();
        let styling = ctx.styling(1, 32).unwrap();
        let root = styling.group_alloc().unwrap();
        styling
            .group_layer_fill(root, 0, Fill::NonZero, palette::css::RED)
            .unwrap();
        styling
            .group_leave(root, &root_group_leave(palette::css::WHITE))
            .unwrap();
        let surface = ctx.surface(128, 64).unwrap();
        Scene {
            ctx,
            styling,
            composition,
            surface,
        }
    }

    fn pixel(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * width + x) * 4) as usize;
        [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
    }

    #[test]
    fn extension_order() {
        let s = scene();
        let fill = SubmitExt::ComputeFill {
            rect: [0, 0, 128, 64],
            color: palette::css::LIME,
        };
        let submit = RenderSubmit::new(&s.styling, &s.composition, &s.surface).with_ext(fill);
        s.ctx.render(&submit).unwrap();
        let pixels = s.surface.read_pixels().unwrap();
        assert_eq!(pixel(&pixels, 128, 12, 12), [255, 0, 0, 255]);
        assert_eq!(pixel(&pixels, 128, 4, 4), [255, 255, 255, 255]);
        assert_eq!(pixel(&pixels, 128, 100, 10), [0, 255, 0, 255]);

        // A fill listed after the render overwrites it.
        let submit = RenderSubmit::new(&s.styling, &s.composition, &s.surface)
            .with_ext(SubmitExt::ComputeRender)
            .with_ext(SubmitExt::ComputeFill {
                rect: [0, 0, 16, 16],
                color: palette::css::BLUE,
            });
        s.ctx.render(&submit).unwrap();
        let pixels = s.surface.read_pixels().unwrap();
        assert_eq!(pixel(&pixels, 128, 12, 12), [0, 0, 255, 255]);
        assert_eq!(pixel(&pixels, 128, 20, 12), [255, 0, 0, 255]);
    }

    #[test]
    fn copy_and_store() {
        let s = scene();
        let copy = s.ctx.surface(128, 64).unwrap();
        let store = s.ctx.surface(128, 64).unwrap();
        let submit = RenderSubmit::new(&s.styling, &s.composition, &s.surface)
            .with_ext(SubmitExt::GraphicsClear {
                dst: &store,
                color: palette::css::BLACK,
            })
            .with_ext(SubmitExt::ComputeCopy { dst: &copy })
            .with_ext(SubmitExt::ComputeRender);
        s.ctx.render(&submit).unwrap();
        // The copy ran before the render.
        assert_eq!(copy.read_pixels().unwrap(), vec![0; 128 * 64 * 4]);
        let black = store.read_pixels().unwrap();
        assert_eq!(pixel(&black, 128, 12, 12), [0, 0, 0, 255]);

        let submit = RenderSubmit::new(&s.styling, &s.composition, &s.surface)
            .with_ext(SubmitExt::GraphicsStore { dst: &store });
        s.ctx.render(&submit).unwrap();
        assert_eq!(store.read_pixels().unwrap(), s.surface.read_pixels().unwrap());
    }

    #[test]
    fn invalid_chains() {
        let s = scene();
        let submit = RenderSubmit::new(&s.styling, &s.composition, &s.surface)
            .with_ext(SubmitExt::ComputeRender)
            .with_ext(SubmitExt::ComputeRender);
        assert_eq!(
            s.ctx.render(&submit),
            Err(Error::RenderExtensionInvalid("more than one render"))
        );
        let small = s.ctx.surface(16, 16).unwrap();
        let submit = RenderSubmit::new(&s.styling, &s.composition, &s.surface)
            .with_ext(SubmitExt::ComputeCopy { dst: &small });
        assert_eq!(
            s.ctx.render(&submit),
            Err(Error::RenderExtensionInvalid("surface sizes differ"))
        );
    }

    #[test]
    fn clip_limits_stores() {
        let s = scene();
        let submit =
            RenderSubmit::new(&s.styling, &s.composition, &s.surface).with_clip([0, 0, 10, 64]);
        s.ctx.render(&submit).unwrap();
        let pixels = s.surface.read_pixels().unwrap();
        assert_eq!(pixel(&pixels, 128, 9, 12), [255, 0, 0, 255]);
        assert_eq!(pixel(&pixels, 128, 12, 12), [0, 0, 0, 0]);
    }

    #[test]
    fn render_locks_until_unseal() {
        let s = scene();
        s.ctx
            .render(&RenderSubmit::new(&s.styling, &s.composition, &s.surface))
            .unwrap();
        assert!(s.styling.is_sealed());
        assert_eq!(
            s.composition.place(&[], &[], None),
            Err(Error::CompositionSealed)
        );
        s.composition.unseal().unwrap();
        s.composition.place(&[], &[], None).unwrap();
    }
}
