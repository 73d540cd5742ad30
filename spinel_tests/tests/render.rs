// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel::kurbo::Rect;
use spinel::peniko::color::palette;
use spinel::peniko::Fill;
use spinel::styling::root_group_leave;
use spinel::{RenderSubmit, SubmitExt, Transform};
use spinel_tests::{rect_path, rect_to, render_rects, rgba8, TestParams};

#[test]
fn filled_rect() {
    let params = TestParams::new(64, 32);
    let rect = Rect::new(8.0, 8.0, 40.0, 24.0);
    let image = render_rects(&params, &[(rect, palette::css::RED)]).unwrap();
    let red = rgba8(palette::css::RED);
    let white = rgba8(palette::css::WHITE);
    assert_eq!(image.count(red), 32 * 16);
    assert_eq!(image.count(white), 64 * 32 - 32 * 16);
    assert_eq!(image.pixel(8, 8), red);
    assert_eq!(image.pixel(39, 23), red);
    assert_eq!(image.pixel(7, 8), white);
    assert_eq!(image.pixel(40, 23), white);
    assert_eq!(image.pixel(39, 24), white);
}

#[test]
fn later_rects_cover_earlier_ones() {
    let params = TestParams::new(64, 64);
    let image = render_rects(
        &params,
        &[
            (Rect::new(0.0, 0.0, 48.0, 48.0), palette::css::RED),
            (Rect::new(16.0, 16.0, 64.0, 64.0), palette::css::BLUE),
        ],
    )
    .unwrap();
    assert_eq!(image.pixel(4, 4), rgba8(palette::css::RED));
    assert_eq!(image.pixel(20, 20), rgba8(palette::css::BLUE));
    assert_eq!(image.pixel(60, 60), rgba8(palette::css::BLUE));
    assert_eq!(image.pixel(60, 4), rgba8(palette::css::WHITE));
}

#[test]
fn fill_rules() {
    let params = TestParams::new(64, 64);
    let ctx = params.context().unwrap();
    let pb = ctx.path_builder().unwrap();
    pb.begin().unwrap();
    rect_to(&pb, Rect::new(4.0, 4.0, 60.0, 60.0)).unwrap();
    rect_to(&pb, Rect::new(20.0, 20.0, 44.0, 44.0)).unwrap();
    let path = pb.end().unwrap();
    let rb = ctx.raster_builder().unwrap();
    rb.begin().unwrap();
    rb.add(&[path], None, None, None, None).unwrap();
    let raster = rb.end().unwrap();

    let composition = ctx.composition().unwrap();
    composition.place(&[raster, raster], &[0, 1], Some(&[[0, 0], [64, 0]])).unwrap();
    let styling = ctx.styling(2, 32).unwrap();
    let root = styling.group_alloc().unwrap();
    styling
        .group_layer_fill(root, 0, Fill::NonZero, palette::css::BLACK)
        .unwrap();
    styling
        .group_layer_fill(root, 1, Fill::EvenOdd, palette::css::BLACK)
        .unwrap();
    styling
        .group_leave(root, &root_group_leave(palette::css::WHITE))
        .unwrap();
    let surface = ctx.surface(128, 64).unwrap();
    ctx.render(&RenderSubmit::new(&styling, &composition, &surface))
        .unwrap();
    let pixels = surface.read_pixels().unwrap();
    let pixel = |x: usize, y: usize| &pixels[(y * 128 + x) * 4..][..4];
    // The inner rectangle winds twice.
    assert_eq!(pixel(32, 32), rgba8(palette::css::BLACK));
    assert_eq!(pixel(64 + 32, 32), rgba8(palette::css::WHITE));
    assert_eq!(pixel(64 + 10, 10), rgba8(palette::css::BLACK));
}

#[test]
fn transformed_raster() {
    let params = TestParams::new(64, 64);
    let ctx = params.context().unwrap();
    let pb = ctx.path_builder().unwrap();
    let path = rect_path(&pb, Rect::new(0.0, 0.0, 8.0, 8.0)).unwrap();
    let rb = ctx.raster_builder().unwrap();
    rb.begin().unwrap();
    let transform = Transform::translate(16.0, 16.0) * Transform::scale(2.0, 2.0);
    rb.add(&[path], None, Some(&[transform]), None, None)
        .unwrap();
    let raster = rb.end().unwrap();
    let header = ctx.read_raster_header(raster).unwrap();
    assert_eq!(header.bounds, [1, 1, 3, 3]);

    let composition = ctx.composition().unwrap();
    composition.place(&[raster], &[0], None).unwrap();
    assert_eq!(composition.get_bounds().unwrap(), Some([16, 16, 48, 48]));
    let styling = ctx.styling(1, 16).unwrap();
    let root = styling.group_alloc().unwrap();
    styling
        .group_layer_fill(root, 0, Fill::NonZero, palette::css::RED)
        .unwrap();
    styling
        .group_leave(root, &root_group_leave(palette::css::WHITE))
        .unwrap();
    let surface = ctx.surface(64, 64).unwrap();
    let submit = RenderSubmit::new(&styling, &composition, &surface).with_ext(
        SubmitExt::ComputeFill {
            rect: [0, 0, 64, 64],
            color: palette::css::WHITE,
        },
    );
    ctx.render(&submit).unwrap();
    let pixels = surface.read_pixels().unwrap();
    let red = pixels
        .chunks_exact(4)
        .filter(|p| *p == rgba8(palette::css::RED))
        .count();
    assert_eq!(red, 16 * 16);
}
