// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel::kurbo::Rect;
use spinel::Error;
use spinel_tests::{rect_path, TestParams};

#[test]
fn exhausted_pool_loses_the_context() {
    let params = TestParams {
        // Four blocks of 1 KiB.
        block_pool_size: 4 << 10,
        handle_count: 32,
        ..TestParams::new(16, 16)
    };
    let ctx = params.context().unwrap();
    let pb = ctx.path_builder().unwrap();
    for i in 0..8 {
        let x = i as f64;
        rect_path(&pb, Rect::new(x, 0.0, x + 4.0, 4.0)).unwrap();
    }
    assert_eq!(pb.flush(), Err(Error::BlockPoolEmpty));
    assert!(ctx.is_lost());
    assert!(matches!(ctx.path_builder(), Err(Error::ContextLost)));
    assert!(matches!(ctx.composition(), Err(Error::ContextLost)));
}

#[test]
fn released_handles_are_reused() {
    let params = TestParams {
        handle_count: 4,
        ..TestParams::new(16, 16)
    };
    let ctx = params.context().unwrap();
    let pb = ctx.path_builder().unwrap();
    let rb = ctx.raster_builder().unwrap();
    for _ in 0..16 {
        let path = rect_path(&pb, Rect::new(1.0, 1.0, 9.0, 9.0)).unwrap();
        rb.begin().unwrap();
        rb.add(&[path], None, None, None, None).unwrap();
        let raster = rb.end().unwrap();
        // Staged fills keep their paths alive until the cohort is flushed.
        rb.flush().unwrap();
        ctx.path_release(&[path]).unwrap();
        ctx.raster_release(&[raster]).unwrap();
    }
    ctx.drain().unwrap();
    let status = ctx.status().unwrap();
    assert_eq!(status.handles_in_use, 0);
    assert_eq!(status.handles_total, 4);
    assert_eq!(status.blocks_available, status.blocks_total);
}

#[test]
fn composition_holds_its_rasters() {
    let params = TestParams {
        handle_count: 8,
        ..TestParams::new(16, 16)
    };
    let ctx = params.context().unwrap();
    let pb = ctx.path_builder().unwrap();
    let path = rect_path(&pb, Rect::new(1.0, 1.0, 9.0, 9.0)).unwrap();
    let rb = ctx.raster_builder().unwrap();
    rb.begin().unwrap();
    rb.add(&[path], None, None, None, None).unwrap();
    let raster = rb.end().unwrap();
    ctx.path_release(&[path]).unwrap();

    let composition = ctx.composition().unwrap();
    composition.place(&[raster], &[0], None).unwrap();
    ctx.raster_release(&[raster]).unwrap();
    ctx.drain().unwrap();
    assert_eq!(ctx.status().unwrap().handles_in_use, 1);
    assert_eq!(ctx.read_raster_header(raster), Err(Error::HandleInvalid));

    drop(composition);
    ctx.drain().unwrap();
    let status = ctx.status().unwrap();
    assert_eq!(status.handles_in_use, 0);
    assert_eq!(status.blocks_available, status.blocks_total);
}

#[test]
fn stale_weakrefs_need_values() {
    let params = TestParams::new(16, 16);
    let ctx = params.context().unwrap();
    let pb = ctx.path_builder().unwrap();
    let path = rect_path(&pb, Rect::new(1.0, 1.0, 9.0, 9.0)).unwrap();
    let rb = ctx.raster_builder().unwrap();
    let mut weakrefs = [spinel::TransformWeakref::INVALID];
    rb.begin().unwrap();
    assert_eq!(
        rb.add(&[path], Some(&mut weakrefs), None, None, None),
        Err(Error::TransformWeakrefInvalid)
    );
}
