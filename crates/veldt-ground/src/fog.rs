//! Fog-of-war overlay texture.
//!
//! A single-channel mask sized to the next power of two that fits the map
//! plus a one-cell border. The border stays opaque black so that bilinear
//! sampling at the map edge never bleeds in visible terrain. Edits only
//! touch the backing store and accumulate a dirty rectangle;
//! [`FogOverlay::update`] then uploads the smallest 4-texel-aligned block
//! covering it, once per frame at most.

use tracing::debug;
use veldt_common::{CellRect, GridSize, GroundError, GroundResult};

use crate::renderer::GraphicsContext;
use crate::surface::SightSource;

/// Mask value for never-explored cells.
pub const FOG_UNEXPLORED: u8 = 0;
/// Mask value for explored cells currently out of sight.
pub const FOG_FOGGED: u8 = 128;
/// Mask value for cells in sight.
pub const FOG_VISIBLE: u8 = 255;

/// Texel alignment of partial uploads; the texture may be block-compressed
/// downstream, so blocks never start mid-texel-quad.
const UPLOAD_ALIGN: u32 = 4;

/// Visibility mask with dirty-rectangle upload tracking.
#[derive(Debug)]
pub struct FogOverlay {
    map_size: GridSize,
    texture_size: u32,
    mask: Vec<u8>,
    dirty: Option<CellRect>,
    texture: Option<wgpu::Texture>,
    view: Option<wgpu::TextureView>,
}

impl FogOverlay {
    /// Creates the overlay for a map, fully unexplored.
    ///
    /// # Errors
    ///
    /// Returns [`GroundError::InvalidSize`] for an empty map.
    pub fn new(map_size: GridSize) -> GroundResult<Self> {
        if map_size.is_empty() {
            return Err(GroundError::InvalidSize {
                width: map_size.width,
                height: map_size.height,
            });
        }
        // Square power of two that fits the map plus the opaque border.
        let needed = map_size.width.max(map_size.height) + 2;
        let texture_size = needed.next_power_of_two();
        debug!(
            width = map_size.width,
            height = map_size.height,
            texture_size, "created fog overlay"
        );
        Ok(Self {
            map_size,
            texture_size,
            mask: vec![FOG_UNEXPLORED; (texture_size * texture_size) as usize],
            dirty: None,
            texture: None,
            view: None,
        })
    }

    /// The map size the overlay was created for.
    #[must_use]
    pub fn map_size(&self) -> GridSize {
        self.map_size
    }

    /// Edge length of the square mask texture.
    #[must_use]
    pub fn texture_size(&self) -> u32 {
        self.texture_size
    }

    /// Whether an upload is pending.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    /// Mask value of a map cell.
    #[must_use]
    pub fn cell_value(&self, x: u32, y: u32) -> u8 {
        // The one-cell border shifts every cell by one texel.
        self.texel(x + 1, y + 1)
    }

    /// Raw mask texel.
    #[must_use]
    pub fn texel(&self, tx: u32, ty: u32) -> u8 {
        self.mask[(ty * self.texture_size + tx) as usize]
    }

    /// Re-reads the sight state of every cell in the rectangle into the
    /// backing store and extends the pending dirty rectangle. Nothing is
    /// uploaded until [`Self::update`].
    ///
    /// Out-of-range rectangles are clamped. Idempotent: marking the same
    /// rectangle twice leaves the same mask and the same dirty state.
    pub fn explored_changed<V>(&mut self, sight: &V, rect: &CellRect)
    where
        V: SightSource + ?Sized,
    {
        let rect = rect.clamped_to(self.map_size);
        if rect.is_empty() {
            return;
        }
        for (x, y) in rect.cells() {
            let (x, y) = (x as u32, y as u32);
            let value = if !sight.is_explored(x, y) {
                FOG_UNEXPLORED
            } else if sight.is_fogged(x, y) {
                FOG_FOGGED
            } else {
                FOG_VISIBLE
            };
            self.mask[((y + 1) * self.texture_size + x + 1) as usize] = value;
        }
        self.dirty = Some(match self.dirty {
            Some(prev) => prev.union(&rect),
            None => rect,
        });
    }

    /// Texel block `(x, y, width, height)` that the next upload will cover:
    /// the pending dirty rectangle aligned outward to 4 texels.
    #[must_use]
    pub fn aligned_dirty_block(&self) -> Option<(u32, u32, u32, u32)> {
        let rect = self.dirty?;
        let x0 = (rect.left as u32 + 1) & !(UPLOAD_ALIGN - 1);
        let y0 = (rect.top as u32 + 1) & !(UPLOAD_ALIGN - 1);
        let x1 = (rect.right as u32 + 2).next_multiple_of(UPLOAD_ALIGN);
        let y1 = (rect.bottom as u32 + 2).next_multiple_of(UPLOAD_ALIGN);
        let x1 = x1.min(self.texture_size);
        let y1 = y1.min(self.texture_size);
        Some((x0, y0, x1 - x0, y1 - y0))
    }

    /// Uploads pending changes, creating the texture on first use.
    pub fn update(&mut self, ctx: &GraphicsContext) {
        if self.texture.is_none() {
            let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("fog-overlay"),
                size: wgpu::Extent3d {
                    width: self.texture_size,
                    height: self.texture_size,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            write_block(
                ctx,
                &texture,
                &self.mask,
                self.texture_size,
                (0, 0, self.texture_size, self.texture_size),
            );
            self.view = Some(texture.create_view(&wgpu::TextureViewDescriptor::default()));
            self.texture = Some(texture);
            self.dirty = None;
            return;
        }

        let Some(block) = self.aligned_dirty_block() else {
            return;
        };
        if let Some(texture) = &self.texture {
            write_block(ctx, texture, &self.mask, self.texture_size, block);
        }
        self.dirty = None;
    }

    /// The mask texture view, present after the first [`Self::update`].
    #[must_use]
    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.view.as_ref()
    }

    /// Drops the GPU texture; the next [`Self::update`] recreates it from
    /// the backing store.
    pub fn release_gpu(&mut self) {
        self.texture = None;
        self.view = None;
    }
}

fn write_block(
    ctx: &GraphicsContext,
    texture: &wgpu::Texture,
    mask: &[u8],
    texture_size: u32,
    (x, y, width, height): (u32, u32, u32, u32),
) {
    let start = (y * texture_size + x) as usize;
    let len = ((height - 1) * texture_size + width) as usize;
    ctx.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x, y, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        &mask[start..start + len],
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(texture_size),
            rows_per_image: None,
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::FullSight;

    struct PatchSight;
    impl SightSource for PatchSight {
        fn is_explored(&self, x: u32, y: u32) -> bool {
            x >= 4 && y >= 4
        }
        fn is_fogged(&self, x: u32, y: u32) -> bool {
            x >= 8 && y >= 4
        }
    }

    #[test]
    fn test_texture_size_is_power_of_two_with_border() {
        let overlay = FogOverlay::new(GridSize::new(128, 128)).expect("new");
        // 128 + 2 rounds up to 256.
        assert_eq!(overlay.texture_size(), 256);
        let small = FogOverlay::new(GridSize::new(30, 14)).expect("new");
        assert_eq!(small.texture_size(), 32);
    }

    #[test]
    fn test_empty_map_is_rejected() {
        assert!(FogOverlay::new(GridSize::new(0, 16)).is_err());
    }

    #[test]
    fn test_border_stays_opaque() {
        let size = GridSize::new(14, 14);
        let mut overlay = FogOverlay::new(size).expect("new");
        overlay.explored_changed(&FullSight, &CellRect::full(size));

        assert_eq!(overlay.cell_value(0, 0), FOG_VISIBLE);
        assert_eq!(overlay.cell_value(13, 13), FOG_VISIBLE);
        // The one-texel frame around the map never changes.
        assert_eq!(overlay.texel(0, 0), FOG_UNEXPLORED);
        assert_eq!(overlay.texel(0, 7), FOG_UNEXPLORED);
        assert_eq!(overlay.texel(15, 15), FOG_UNEXPLORED);
    }

    #[test]
    fn test_sight_states_map_to_mask_values() {
        let size = GridSize::new(16, 16);
        let mut overlay = FogOverlay::new(size).expect("new");
        overlay.explored_changed(&PatchSight, &CellRect::full(size));

        assert_eq!(overlay.cell_value(0, 0), FOG_UNEXPLORED);
        assert_eq!(overlay.cell_value(5, 5), FOG_VISIBLE);
        assert_eq!(overlay.cell_value(9, 5), FOG_FOGGED);
    }

    #[test]
    fn test_marking_twice_is_idempotent() {
        let size = GridSize::new(16, 16);
        let rect = CellRect::new(2, 2, 9, 9);

        let mut once = FogOverlay::new(size).expect("new");
        once.explored_changed(&PatchSight, &rect);

        let mut twice = FogOverlay::new(size).expect("new");
        twice.explored_changed(&PatchSight, &rect);
        twice.explored_changed(&PatchSight, &rect);

        assert_eq!(once.mask, twice.mask);
        assert_eq!(once.aligned_dirty_block(), twice.aligned_dirty_block());
    }

    #[test]
    fn test_dirty_block_is_four_texel_aligned() {
        let size = GridSize::new(32, 32);
        let mut overlay = FogOverlay::new(size).expect("new");
        assert_eq!(overlay.aligned_dirty_block(), None);

        overlay.explored_changed(&FullSight, &CellRect::new(5, 6, 6, 6));
        let (x, y, w, h) = overlay.aligned_dirty_block().expect("dirty");
        assert_eq!(x % 4, 0);
        assert_eq!(y % 4, 0);
        assert_eq!(w % 4, 0);
        assert_eq!(h % 4, 0);
        // Covers texels (6..=7, 7): cells shift by one for the border.
        assert!(x <= 6 && x + w >= 8);
        assert!(y <= 7 && y + h >= 8);
    }

    #[test]
    fn test_dirty_unions_across_edits() {
        let size = GridSize::new(32, 32);
        let mut overlay = FogOverlay::new(size).expect("new");
        overlay.explored_changed(&FullSight, &CellRect::cell(0, 0));
        overlay.explored_changed(&FullSight, &CellRect::cell(20, 20));
        let (x, y, w, h) = overlay.aligned_dirty_block().expect("dirty");
        assert!(x <= 1 && y <= 1);
        assert!(x + w >= 22 && y + h >= 22);
    }

    #[test]
    fn test_out_of_range_edit_is_clamped() {
        let size = GridSize::new(16, 16);
        let mut overlay = FogOverlay::new(size).expect("new");
        overlay.explored_changed(&FullSight, &CellRect::new(-5, -5, 100, 100));
        assert_eq!(overlay.cell_value(15, 15), FOG_VISIBLE);
        assert_eq!(overlay.texel(17, 17), FOG_UNEXPLORED);
    }
}
