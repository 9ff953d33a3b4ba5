use crate::map::RoomMapData;
use crate::overworld::{Camera2D, Vec2};

/// Fully composed draw transform for one renderable, in pixel space.
///
/// The core composes position (including the visual height offset), rotation,
/// and scale before delegating; renderer backends only place the result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawParams {
    pub position: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
}

/// A renderable attached to a world object. Sprite sheets, animation players,
/// and script-driven visuals all sit behind this; the core only calls `draw`.
pub trait Actor {
    fn draw(&mut self, params: &DrawParams);
}

/// Backend contract for drawing tile layers during the room render walk.
/// Batching, shaders, and texture atlases are the implementer's business.
pub trait OverworldRenderer {
    fn draw_tile_layer(&mut self, map: &RoomMapData, layer: usize, camera: &Camera2D);
}
