//! # Veldt Ground
//!
//! Terrain LOD visibility culling and ground rendering on wgpu.
//!
//! Given a height-mapped cell grid, a camera view frustum and a set of
//! blended ground texture layers, this crate decides which terrain cells are
//! visible, at what resolution each region is drawn, and how to assemble a
//! crack-free mesh from regions rendered at different resolutions — while
//! the terrain is edited live and the camera moves every frame.
//!
//! ## Coordinate conventions
//!
//! A map of `W x H` cells has `(W+1) x (H+1)` corners. Heights, normals and
//! texture weights live on corners. The world position of corner `(x, y)` is
//! `(x, -y, height)`: x grows right, grid y grows down (so world y is
//! negated), z is up.
//!
//! ## Subsystems
//!
//! - [`surface`]: the narrow interfaces to the terrain data model
//! - [`frustum`]: view-frustum classification primitives
//! - [`quadtree`] + [`chunks`]: the two spatial index variants
//! - [`lod`]: distance/error-driven level-of-detail policies
//! - [`cull`]: per-frame visible-region generation
//! - [`stitch`]: bridge geometry between regions of different detail
//! - [`geometry`] + [`fog`]: GPU-resident caches with dirty-rect re-upload
//! - [`renderer`]: the per-frame orchestrator

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunks;
pub mod cull;
pub mod fog;
pub mod frustum;
pub mod geometry;
pub mod lod;
pub mod pipeline;
pub mod quadtree;
pub mod renderer;
pub mod stitch;
pub mod surface;

pub use cull::RenderRegion;
pub use frustum::{Containment, Frustum};
pub use renderer::{
    FrameCamera, FrameDraw, GraphicsContext, GroundRenderer, RenderFlags, RendererKind, Statistics,
};
pub use surface::{HeightmapSurface, SightSource, TerrainSource};
