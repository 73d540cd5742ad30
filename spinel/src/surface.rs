// Copyright 2024 the Spinel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use spinel_encoding::Ttck;

use crate::context::Context;
use crate::recording::{BufferProxy, Recording};
use crate::{Error, Result};

/// An RGBA8 image the render kernel stores tiles into.
///
/// Pixels are packed one per dword, red in the low byte.
pub struct Surface {
    ctx: Context,
    width: u32,
    height: u32,
    pub(crate) buffer: BufferProxy,
}

impl Surface {
    pub(crate) fn new(ctx: &Context, width: u32, height: u32) -> Result<Self> {
        let config = {
            let ctx = ctx.inner.borrow();
            ctx.check_lost()?;
            *ctx.config()
        };
        let max_width = (Ttck::TILE_X_MAX + 1) * config.tile_width();
        let max_height = (Ttck::TILE_Y_MAX + 1) * config.tile_height();
        if width == 0 || height == 0 || width > max_width || height > max_height {
            return Err(Error::InvalidArgument("surface size out of range"));
        }
        Ok(Self {
            ctx: ctx.clone(),
            width,
            height,
            buffer: BufferProxy::new(width as u64 * height as u64 * 4, "surface"),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Waits for every submitted render and reads the pixels back, row
    /// major, four bytes per pixel.
    pub fn read_pixels(&self) -> Result<Vec<u8>> {
        let mut ctx = self.ctx.borrow_mut();
        ctx.check_lost()?;
        ctx.wait_all()?;
        let len = self.buffer.size;
        ctx.engine.read_buffer(&self.buffer, 0, len)
    }

    pub(crate) fn same_context(&self, ctx: &Context) -> bool {
        self.ctx.same_as(ctx)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        let mut recording = Recording::default();
        recording.free_buffer(self.buffer);
        let mut ctx = self.ctx.borrow_mut();
        if ctx.check_lost().is_ok() {
            if let Err(err) = ctx.submit_raw(recording, Vec::new()) {
                log::warn!("dropping surface: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Context, ContextCreateInfo, CpuEngine, Error};

    #[test]
    fn size_limits() {
        let info = ContextCreateInfo {
            block_pool_size: 1 << 16,
            handle_count: 16,
            ..Default::default()
        };
        let ctx = Context::new(Box::new(CpuEngine::new()), info).unwrap();
        assert!(matches!(ctx.surface(0, 4), Err(Error::InvalidArgument(_))));
        assert!(matches!(ctx.surface(8193, 4), Err(Error::InvalidArgument(_))));
        let surface = ctx.surface(3, 2).unwrap();
        assert_eq!((surface.width(), surface.height()), (3, 2));
        assert_eq!(surface.read_pixels().unwrap(), vec![0; 24]);
    }
}
