// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::cell::RefCell;
use std::rc::Rc;

use spinel_encoding::{IndirectCount, KeysHeader, PlaceCmd, PushPlace, TileRange, Ttck};
use spinel_shaders::KernelId;

use crate::context::{Action, Context};
use crate::handles::{HandleKind, Raster};
use crate::recording::{Bindings, BufferProxy, Recording, SubmissionIndex};
use crate::{Error, Result};

/// Most tile ranges a composition can produce, one per tile of the key
/// space.
const TILE_RANGES_MAX: u32 = (Ttck::TILE_X_MAX + 1) * (Ttck::TILE_Y_MAX + 1);

const CLIP_UNBOUNDED: [i32; 4] = [
    0,
    0,
    Ttck::TILE_X_MAX as i32 + 1,
    Ttck::TILE_Y_MAX as i32 + 1,
];

pub(crate) struct CompositionImpl {
    ctx: Context,
    places: Vec<PlaceCmd>,
    capacity: u32,
    ttck_capacity: u32,
    tile_size: [i32; 2],
    /// Clip in tiles, exclusive.
    clip: [i32; 4],
    sealed: Option<SubmissionIndex>,
    /// Last render reading the composition.
    lock: Option<SubmissionIndex>,
    place_cmds: BufferProxy,
    pub(crate) ttck: BufferProxy,
    pub(crate) tile_ranges: BufferProxy,
}

impl CompositionImpl {
    fn new(ctx: &Context) -> Result<Self> {
        let config = {
            let ctx = ctx.inner.borrow();
            ctx.check_lost()?;
            *ctx.config()
        };
        let ranges = config.ttck_capacity.min(TILE_RANGES_MAX) as u64;
        Ok(Self {
            ctx: ctx.clone(),
            places: Vec::new(),
            capacity: config.place_capacity,
            ttck_capacity: config.ttck_capacity,
            tile_size: [config.tile_width() as i32, config.tile_height() as i32],
            clip: CLIP_UNBOUNDED,
            sealed: None,
            lock: None,
            place_cmds: BufferProxy::new(
                config.place_capacity as u64 * size_of::<PlaceCmd>() as u64,
                "place_cmds",
            ),
            ttck: BufferProxy::new(KeysHeader::buffer_size(config.ttck_capacity), "ttck"),
            tile_ranges: BufferProxy::new(
                size_of::<IndirectCount>() as u64 + ranges * size_of::<TileRange>() as u64,
                "tile_ranges",
            ),
        })
    }

    fn place(&mut self, rasters: &[Raster], layer_ids: &[u32], txtys: Option<&[[i32; 2]]>) -> Result<()> {
        self.ctx.inner.borrow().check_lost()?;
        if self.sealed.is_some() {
            return Err(Error::CompositionSealed);
        }
        if layer_ids.len() != rasters.len() || txtys.is_some_and(|t| t.len() != rasters.len()) {
            return Err(Error::InvalidArgument("place slices differ in length"));
        }
        if layer_ids.iter().any(|&layer| layer > Ttck::LAYER_MAX) {
            return Err(Error::LayerIdInvalid);
        }
        let [tw, th] = self.tile_size;
        if txtys
            .unwrap_or_default()
            .iter()
            .any(|&[tx, ty]| tx % tw != 0 || ty % th != 0)
        {
            return Err(Error::InvalidArgument("translation is not tile aligned"));
        }
        if self.places.len() + rasters.len() > self.capacity as usize {
            return Err(Error::InvalidArgument("composition is full"));
        }
        let mut ctx = self.ctx.borrow_mut();
        for raster in rasters {
            ctx.handles.check(raster.0, HandleKind::Raster)?;
        }
        for (i, (raster, &layer)) in rasters.iter().zip(layer_ids).enumerate() {
            let [tx, ty] = txtys.map_or([0, 0], |t| t[i]);
            ctx.handles.device_retain(raster.0);
            self.places.push(PlaceCmd {
                raster: raster.0,
                layer,
                tx: tx / tw,
                ty: ty / th,
            });
        }
        Ok(())
    }

    /// Records the translation of every placed raster into sorted
    /// composition keys.
    pub(crate) fn seal(&mut self) -> Result<()> {
        if self.sealed.is_some() {
            return Ok(());
        }
        let not_ready = {
            let ctx = self.ctx.inner.borrow();
            ctx.check_lost()?;
            self.places.iter().any(|p| !ctx.handles.is_ready(p.raster))
        };
        if not_ready {
            self.ctx.flush_raster_builders()?;
        }

        let mut recording = Recording::default();
        if !self.places.is_empty() {
            recording.write(
                self.place_cmds,
                0,
                bytemuck::cast_slice::<PlaceCmd, u8>(&self.places),
            );
        }
        recording.write(
            self.ttck,
            0,
            bytemuck::bytes_of(&KeysHeader::new(self.ttck_capacity)),
        );
        let mut ctx = self.ctx.borrow_mut();
        let place_count = self.places.len() as u32;
        recording.dispatch(
            ctx.kernels.get(KernelId::Place),
            ctx.block_pool.wg_count(place_count),
            &PushPlace {
                place_count,
                pad: 0,
                clip: self.clip,
            },
            ctx.block_pool.bindings_with(&[self.place_cmds, self.ttck]),
        );
        recording.dispatch(
            ctx.kernels.get(KernelId::SortKeys),
            1,
            &(),
            Bindings::from_slice(&[self.ttck]),
        );
        recording.dispatch(
            ctx.kernels.get(KernelId::SegmentTtck),
            1,
            &(),
            Bindings::from_slice(&[self.ttck, self.tile_ranges]),
        );
        log::debug!("composition seal: {place_count} places");
        let index = ctx.submit_raw(recording, vec![Action::CheckKeys(self.ttck)])?;
        self.sealed = Some(index);
        ctx.poll()
    }

    /// Waits for the seal and for every render reading the composition.
    fn unseal(&mut self) -> Result<()> {
        let Some(sealed) = self.sealed else {
            return Ok(());
        };
        let index = self.lock.take().map_or(sealed, |lock| lock.max(sealed));
        self.ctx.borrow_mut().wait(index)?;
        self.sealed = None;
        Ok(())
    }

    pub(crate) fn lock(&mut self, index: SubmissionIndex) {
        self.lock = Some(index);
    }

    fn reset(&mut self) -> Result<()> {
        self.unseal()?;
        let mut ctx = self.ctx.borrow_mut();
        for place in self.places.drain(..) {
            ctx.handles.device_release(place.raster);
        }
        ctx.poll()
    }

    fn set_clip(&mut self, clip: [i32; 4]) -> Result<()> {
        if self.sealed.is_some() {
            return Err(Error::CompositionSealed);
        }
        let [tw, th] = self.tile_size;
        self.clip = [
            clip[0].div_euclid(tw),
            clip[1].div_euclid(th),
            clip[2].div_euclid(tw) + i32::from(clip[2].rem_euclid(tw) != 0),
            clip[3].div_euclid(th) + i32::from(clip[3].rem_euclid(th) != 0),
        ];
        Ok(())
    }

    fn bounds(&self) -> Result<Option<[i32; 4]>> {
        let mut bounds: Option<[i32; 4]> = None;
        for place in &self.places {
            let header = self.ctx.raster_header(place.raster)?;
            if header.is_empty() {
                continue;
            }
            let b = header.bounds;
            let placed = [
                (b[0] + place.tx).max(self.clip[0]),
                (b[1] + place.ty).max(self.clip[1]),
                (b[2] + place.tx).min(self.clip[2]),
                (b[3] + place.ty).min(self.clip[3]),
            ];
            if placed[0] >= placed[2] || placed[1] >= placed[3] {
                continue;
            }
            bounds = Some(match bounds {
                Some(u) => [
                    u[0].min(placed[0]),
                    u[1].min(placed[1]),
                    u[2].max(placed[2]),
                    u[3].max(placed[3]),
                ],
                None => placed,
            });
        }
        let [tw, th] = self.tile_size;
        Ok(bounds.map(|b| [b[0] * tw, b[1] * th, b[2] * tw, b[3] * th]))
    }
}

impl Drop for CompositionImpl {
    fn drop(&mut self) {
        let rasters: Vec<u32> = self.places.drain(..).map(|p| p.raster).collect();
        let mut recording = Recording::default();
        for proxy in [self.place_cmds, self.ttck, self.tile_ranges] {
            recording.free_buffer(proxy);
        }
        let mut ctx = self.ctx.borrow_mut();
        if ctx.check_lost().is_err() {
            return;
        }
        // Released once every submission reading the rasters completed.
        if let Err(err) = ctx.submit_raw(recording, vec![Action::ReleaseRasters(rasters)]) {
            log::warn!("dropping composition: {err}");
        }
    }
}

/// Rasters placed on layers.
///
/// A composition is sealed by a render and stays sealed, and immutable,
/// until [`Composition::unseal`] or [`Composition::reset`].
#[derive(Clone)]
pub struct Composition {
    pub(crate) inner: Rc<RefCell<CompositionImpl>>,
}

impl Composition {
    pub(crate) fn new(ctx: &Context) -> Result<Self> {
        Ok(Self {
            inner: Rc::new(RefCell::new(CompositionImpl::new(ctx)?)),
        })
    }

    /// Places each raster on the matching layer, translated by a tile
    /// aligned pixel offset.
    pub fn place(
        &self,
        rasters: &[Raster],
        layer_ids: &[u32],
        txtys: Option<&[[i32; 2]]>,
    ) -> Result<()> {
        self.inner.borrow_mut().place(rasters, layer_ids, txtys)
    }

    pub fn seal(&self) -> Result<()> {
        self.inner.borrow_mut().seal()
    }

    /// Makes the composition mutable again once the work reading it is
    /// complete.
    pub fn unseal(&self) -> Result<()> {
        self.inner.borrow_mut().unseal()
    }

    /// Unseals the composition and drops every placed raster.
    pub fn reset(&self) -> Result<()> {
        self.inner.borrow_mut().reset()
    }

    /// Restricts the composition to a pixel rectangle, `x0 y0 x1 y1`,
    /// widened to whole tiles.
    pub fn set_clip(&self, clip: [i32; 4]) -> Result<()> {
        self.inner.borrow_mut().set_clip(clip)
    }

    /// Pixel bounds of the placed rasters, in whole tiles, or `None` when
    /// nothing is covered.
    ///
    /// Reads the raster headers back, waiting for outstanding work.
    pub fn get_bounds(&self) -> Result<Option<[i32; 4]>> {
        self.inner.borrow().bounds()
    }

    pub(crate) fn same_context(&self, ctx: &Context) -> bool {
        self.inner.borrow().ctx.same_as(ctx)
    }
}
