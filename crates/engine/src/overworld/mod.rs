mod collision;
mod controller;
mod entrypoint;
mod environment;
mod object;
mod room;

pub use collision::{CollisionHandler, FIXED_STEP};
pub use controller::{OverworldController, RoomSwitchRequest, TransitionFactory};
pub use entrypoint::{Entrypoint, RoomSupplier};
pub use environment::Environment;
pub use object::{BodyState, ObjectBehavior, WorldObject};
pub use room::{RenderItem, RoomBehavior, WorldRoom};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::input::InputSnapshot;

/// Pixel-space ↔ physics-space conversion factor: one physics unit is 40 px.
/// All public APIs speak pixels; positions divide by this going into the
/// physics world and multiply by it coming back out.
pub const PIXELS_PER_UNIT: f32 = 40.0;

/// Logical view dimensions used for camera bounding.
pub const VIEW_WIDTH_PX: f32 = 640.0;
pub const VIEW_HEIGHT_PX: f32 = 480.0;

pub const CAMERA_ZOOM_DEFAULT: f32 = 1.0;
pub const CAMERA_ZOOM_MIN: f32 = 0.25;
pub const CAMERA_ZOOM_MAX: f32 = 4.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntrypointId(pub u64);

#[derive(Debug, Default)]
struct IdCounters {
    objects: AtomicU64,
    rooms: AtomicU64,
    entrypoints: AtomicU64,
}

/// Allocates object, room, and entrypoint ids for one controller's scope.
///
/// Persisting objects keep their ids when handed to a new room, so uniqueness
/// must span every room owned by the same controller. The allocator is a
/// cheap cloneable handle; rooms and lazy room suppliers each hold a clone.
/// Ids are never reused.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    counters: Arc<IdCounters>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_object(&self) -> ObjectId {
        ObjectId(self.counters.objects.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_room(&self) -> RoomId {
        RoomId(self.counters.rooms.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_entrypoint(&self) -> EntrypointId {
        EntrypointId(self.counters.entrypoints.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifies which simulated thing owns a collider in contact callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColliderTag {
    Object(ObjectId),
    Entrypoint(EntrypointId),
}

/// Per-tick parameters handed down through scheduler, controller, room, and
/// object hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickArgs {
    pub delta: f32,
    pub input: InputSnapshot,
}

impl TickArgs {
    pub fn new(delta: f32, input: InputSnapshot) -> Self {
        Self { delta, input }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Camera2D {
    pub position: Vec2,
    pub zoom: f32,
}

impl Default for Camera2D {
    fn default() -> Self {
        Self {
            position: Vec2::default(),
            zoom: CAMERA_ZOOM_DEFAULT,
        }
    }
}

impl Camera2D {
    pub fn effective_zoom(&self) -> f32 {
        clamp_camera_zoom(self.zoom)
    }

    pub fn set_zoom_clamped(&mut self, zoom: f32) {
        self.zoom = clamp_camera_zoom(zoom);
    }
}

fn clamp_camera_zoom(zoom: f32) -> f32 {
    if !zoom.is_finite() {
        return CAMERA_ZOOM_DEFAULT;
    }
    zoom.clamp(CAMERA_ZOOM_MIN, CAMERA_ZOOM_MAX)
}

/// Error raised by script-backed hooks (persist callbacks, scheduler tasks).
///
/// Hooks are opaque to the core, so the failure is carried as a message; the
/// call sites decide containment (log-and-continue vs. force-finish).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum OverworldError {
    #[error("malformed entrypoint shape reference '{reference}': expected 'layer:shape'")]
    MalformedShapeRef { reference: String },
    #[error("degenerate polygon shape '{name}': convex hull construction failed")]
    DegenerateShape { name: String },
    #[error("object is already claimed by another room")]
    AlreadyClaimed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_never_reuses_ids() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next_object(), ObjectId(0));
        assert_eq!(ids.next_object(), ObjectId(1));
        assert_eq!(ids.next_object(), ObjectId(2));
    }

    #[test]
    fn allocator_clones_share_one_sequence() {
        let ids = IdAllocator::new();
        let clone = ids.clone();
        let first = ids.next_object();
        let second = clone.next_object();
        assert_ne!(first, second);
        assert_eq!(second, ObjectId(first.0 + 1));
    }

    #[test]
    fn object_room_and_entrypoint_sequences_are_independent() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next_object(), ObjectId(0));
        assert_eq!(ids.next_room(), RoomId(0));
        assert_eq!(ids.next_entrypoint(), EntrypointId(0));
    }

    #[test]
    fn camera_zoom_is_clamped() {
        let mut camera = Camera2D::default();
        camera.set_zoom_clamped(100.0);
        assert!((camera.zoom - CAMERA_ZOOM_MAX).abs() < 0.0001);
        camera.set_zoom_clamped(0.0);
        assert!((camera.zoom - CAMERA_ZOOM_MIN).abs() < 0.0001);
        camera.set_zoom_clamped(f32::NAN);
        assert!((camera.zoom - CAMERA_ZOOM_DEFAULT).abs() < 0.0001);
    }
}
