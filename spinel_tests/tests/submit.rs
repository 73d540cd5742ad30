// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel::kurbo::Rect;
use spinel::peniko::color::palette;
use spinel::peniko::Fill;
use spinel::styling::root_group_leave;
use spinel::{
    Composition, Context, Error, RenderSubmit, Styling, SubmitExt, Surface, TimelineSemaphore,
};
use spinel_tests::{rect_path, rgba8, TestParams};

struct Scene {
    ctx: Context,
    styling: Styling,
    composition: Composition,
    surface: Surface,
}

fn scene() -> Scene {
    let ctx = TestParams::new(32, 32).context().unwrap();
    let pb = ctx.path_builder().unwrap();
    let path = rect_path(&pb, Rect::new(0.0, 0.0, 16.0, 16.0)).unwrap();
    let rb = ctx.raster_builder().unwrap();
    rb.begin().unwrap();
    rb.add(&[path], None, None, None, None).unwrap();
    let raster = rb.end().unwrap();
    let composition = ctx.composition().unwrap();
    composition.place(&[raster], &[0], None).unwrap();
    let styling = ctx.styling(1, 16).unwrap();
    let root = styling.group_alloc().unwrap();
    styling
        .group_layer_fill(root, 0, Fill::NonZero, palette::css::RED)
        .unwrap();
    styling
        .group_leave(root, &root_group_leave(palette::css::WHITE))
        .unwrap();
    let surface = ctx.surface(32, 32).unwrap();
    Scene {
        ctx,
        styling,
        composition,
        surface,
    }
}

fn first_pixel(surface: &Surface) -> [u8; 4] {
    let pixels = surface.read_pixels().unwrap();
    [pixels[0], pixels[1], pixels[2], pixels[3]]
}

#[test]
fn signals_are_observable() {
    let s = scene();
    let compute = TimelineSemaphore::new();
    let graphics = TimelineSemaphore::new();
    let submit = RenderSubmit::new(&s.styling, &s.composition, &s.surface)
        .with_ext(SubmitExt::ComputeSignal {
            semaphore: compute.clone(),
            value: 1,
        })
        // Satisfied by the compute submission.
        .with_ext(SubmitExt::GraphicsWait {
            semaphore: compute.clone(),
            value: 1,
        })
        .with_ext(SubmitExt::GraphicsSignal {
            semaphore: graphics.clone(),
            value: 7,
        });
    s.ctx.render(&submit).unwrap();
    s.ctx.drain().unwrap();
    assert_eq!(compute.value(), 1);
    assert_eq!(graphics.value(), 7);
}

#[test]
fn unreachable_waits_fail() {
    let s = scene();
    let semaphore = TimelineSemaphore::new();
    let wait = SubmitExt::ComputeWait {
        semaphore: semaphore.clone(),
        value: 2,
    };
    let submit =
        RenderSubmit::new(&s.styling, &s.composition, &s.surface).with_ext(wait.clone());
    assert_eq!(s.ctx.render(&submit), Err(Error::SemaphoreWait));

    semaphore.signal(2);
    s.ctx.render(&submit).unwrap();
    assert_eq!(first_pixel(&s.surface), rgba8(palette::css::RED));
}

#[test]
fn acquire_and_release_bracket_the_render() {
    let s = scene();
    let submit = RenderSubmit::new(&s.styling, &s.composition, &s.surface)
        .with_ext(SubmitExt::ComputeAcquire)
        .with_ext(SubmitExt::ComputeRender)
        .with_ext(SubmitExt::ComputeRelease);
    s.ctx.render(&submit).unwrap();
    assert_eq!(first_pixel(&s.surface), rgba8(palette::css::RED));
}

#[test]
fn restyling_after_a_render() {
    let s = scene();
    s.ctx
        .render(&RenderSubmit::new(&s.styling, &s.composition, &s.surface))
        .unwrap();
    assert_eq!(first_pixel(&s.surface), rgba8(palette::css::RED));

    // Mutating waits for the render and unseals.
    s.styling.reset().unwrap();
    let root = s.styling.group_alloc().unwrap();
    s.styling
        .group_layer_fill(root, 0, Fill::NonZero, palette::css::BLUE)
        .unwrap();
    s.styling
        .group_leave(root, &root_group_leave(palette::css::WHITE))
        .unwrap();
    s.ctx
        .render(&RenderSubmit::new(&s.styling, &s.composition, &s.surface))
        .unwrap();
    assert_eq!(first_pixel(&s.surface), rgba8(palette::css::BLUE));
}

#[test]
fn recomposition_moves_rasters() {
    let s = scene();
    s.ctx
        .render(&RenderSubmit::new(&s.styling, &s.composition, &s.surface))
        .unwrap();
    s.composition.reset().unwrap();
    assert_eq!(s.composition.get_bounds().unwrap(), None);

    let pb = s.ctx.path_builder().unwrap();
    let path = rect_path(&pb, Rect::new(0.0, 0.0, 8.0, 8.0)).unwrap();
    let rb = s.ctx.raster_builder().unwrap();
    rb.begin().unwrap();
    rb.add(&[path], None, None, None, None).unwrap();
    let raster = rb.end().unwrap();
    s.composition
        .place(&[raster], &[0], Some(&[[16, 16]]))
        .unwrap();
    assert_eq!(s.composition.get_bounds().unwrap(), Some([16, 16, 32, 32]));

    let fill = SubmitExt::ComputeFill {
        rect: [0, 0, 32, 32],
        color: palette::css::BLACK,
    };
    s.ctx
        .render(&RenderSubmit::new(&s.styling, &s.composition, &s.surface).with_ext(fill))
        .unwrap();
    let pixels = s.surface.read_pixels().unwrap();
    assert_eq!(&pixels[..4], rgba8(palette::css::BLACK));
    let i = (20 * 32 + 20) * 4;
    assert_eq!(&pixels[i..i + 4], rgba8(palette::css::RED));
}
