use rapier2d::prelude::RigidBodyHandle;
use tracing::debug;

use crate::map::RoomMapData;

use super::collision::{BodySpec, CollisionHandler};
use super::controller::RoomSwitchRequest;
use super::room::WorldRoom;
use super::{ColliderTag, EntrypointId, IdAllocator, OverworldError, Vec2};

/// Lazily builds the destination room the first time the trigger fires.
pub type RoomSupplier = Box<dyn FnMut() -> WorldRoom>;

/// A named static trigger volume backed by a shape in the room's map data.
///
/// Doubles as a named spawn marker: persisted objects entering through this
/// entrypoint are placed at its spawn position. A trigger with no destination
/// supplier is spawn-only and never switches rooms.
pub struct Entrypoint {
    id: EntrypointId,
    name: String,
    layer: String,
    shape: String,
    spawn: Option<Vec2>,
    target: Option<String>,
    destination: Option<RoomSupplier>,
    body: Option<RigidBodyHandle>,
    resolved_center: Option<Vec2>,
    used: bool,
}

impl std::fmt::Debug for Entrypoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entrypoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("layer", &self.layer)
            .field("shape", &self.shape)
            .field("used", &self.used)
            .finish()
    }
}

impl Entrypoint {
    /// `shape_ref` names the backing map shape as `layer:shape`; a malformed
    /// reference is a construction-time error.
    pub fn new(ids: &IdAllocator, name: &str, shape_ref: &str) -> Result<Self, OverworldError> {
        let (layer, shape) = parse_shape_ref(shape_ref)?;
        Ok(Self {
            id: ids.next_entrypoint(),
            name: name.to_string(),
            layer,
            shape,
            spawn: None,
            target: None,
            destination: None,
            body: None,
            resolved_center: None,
            used: false,
        })
    }

    pub fn with_spawn(mut self, spawn: Vec2) -> Self {
        self.spawn = Some(spawn);
        self
    }

    /// Name of the entrypoint to enter through in the destination room.
    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_destination(mut self, destination: RoomSupplier) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn id(&self) -> EntrypointId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn used(&self) -> bool {
        self.used
    }

    /// Where objects entering through this entrypoint are placed: the
    /// explicit spawn position when set, else the backing shape's center.
    pub fn spawn_position(&self) -> Option<Vec2> {
        self.spawn.or(self.resolved_center)
    }

    /// Resolve the backing shape and create the static trigger body. A shape
    /// missing from the map leaves the entrypoint inert on purpose: it can be
    /// referenced by name before the map revision that defines it ships.
    pub(crate) fn claim(
        &mut self,
        map: Option<&RoomMapData>,
        collision: &mut CollisionHandler,
    ) -> Result<(), OverworldError> {
        let Some(shape) = map.and_then(|map| map.shape(&self.layer, &self.shape)) else {
            debug!(
                entrypoint = self.name.as_str(),
                layer = self.layer.as_str(),
                shape = self.shape.as_str(),
                "entrypoint_inert"
            );
            return Ok(());
        };
        self.resolved_center = Some(shape.position);
        let mut anchored = shape.clone();
        // The body carries the world position; the collider sits at its origin.
        anchored.position = Vec2::ZERO;
        let handle = collision.create_body(BodySpec {
            tag: ColliderTag::Entrypoint(self.id),
            position: shape.position,
            rotation: 0.0,
            velocity: Vec2::ZERO,
            fixed: true,
            collidable: false,
            group: 0,
            shapes: std::slice::from_ref(&anchored),
        })?;
        self.body = Some(handle);
        Ok(())
    }

    pub(crate) fn release(&mut self, collision: &mut CollisionHandler) {
        if let Some(body) = self.body.take() {
            collision.destroy_body(body);
        }
        self.resolved_center = None;
    }

    /// Fire the trigger. At most one firing per entrypoint lifetime: the
    /// `used` flag is never reset, even across claim cycles.
    pub(crate) fn try_trigger(&mut self) -> Option<RoomSwitchRequest> {
        if self.used {
            return None;
        }
        let destination = self.destination.as_mut()?;
        self.used = true;
        let room = destination();
        Some(RoomSwitchRequest {
            room,
            exit: Some(self.name.clone()),
            entry: self.target.clone(),
        })
    }
}

fn parse_shape_ref(reference: &str) -> Result<(String, String), OverworldError> {
    let malformed = || OverworldError::MalformedShapeRef {
        reference: reference.to_string(),
    };
    let (layer, shape) = reference.split_once(':').ok_or_else(malformed)?;
    if layer.is_empty() || shape.is_empty() || shape.contains(':') {
        return Err(malformed());
    }
    Ok((layer.to_string(), shape.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{ShapeDef, ShapeKind, ShapeLayerData};

    fn trigger_map() -> RoomMapData {
        RoomMapData {
            name: "hall".to_string(),
            width_px: 320.0,
            height_px: 240.0,
            layers: Vec::new(),
            shape_layers: vec![ShapeLayerData {
                name: "triggers".to_string(),
                shapes: vec![ShapeDef {
                    name: "east_door".to_string(),
                    position: Vec2::new(300.0, 120.0),
                    kind: ShapeKind::Rect {
                        half_width: 10.0,
                        half_height: 40.0,
                    },
                }],
            }],
        }
    }

    fn destination_room() -> WorldRoom {
        WorldRoom::new(&IdAllocator::new(), "next", None)
    }

    #[test]
    fn malformed_shape_references_fail_fast() {
        let ids = IdAllocator::new();
        for reference in ["", "nodelimiter", ":shape", "layer:", "a:b:c"] {
            assert!(
                Entrypoint::new(&ids, "door", reference).is_err(),
                "accepted {reference:?}"
            );
        }
        assert!(Entrypoint::new(&ids, "door", "triggers:east_door").is_ok());
    }

    #[test]
    fn fires_at_most_once() {
        let ids = IdAllocator::new();
        let mut entrypoint = Entrypoint::new(&ids, "east_door", "triggers:east_door")
            .expect("entrypoint")
            .with_target("west_door")
            .with_destination(Box::new(destination_room));

        let first = entrypoint.try_trigger().expect("first firing");
        assert_eq!(first.exit.as_deref(), Some("east_door"));
        assert_eq!(first.entry.as_deref(), Some("west_door"));
        assert!(entrypoint.used());
        assert!(entrypoint.try_trigger().is_none());
        assert!(entrypoint.try_trigger().is_none());
    }

    #[test]
    fn spawn_only_entrypoint_never_triggers() {
        let ids = IdAllocator::new();
        let mut entrypoint = Entrypoint::new(&ids, "marker", "triggers:east_door")
            .expect("entrypoint")
            .with_spawn(Vec2::new(50.0, 60.0));
        assert!(entrypoint.try_trigger().is_none());
        assert!(!entrypoint.used());
    }

    #[test]
    fn spawn_position_prefers_explicit_over_shape_center() {
        let ids = IdAllocator::new();
        let mut collision = CollisionHandler::new();
        let map = trigger_map();

        let mut explicit = Entrypoint::new(&ids, "a", "triggers:east_door")
            .expect("entrypoint")
            .with_spawn(Vec2::new(5.0, 6.0));
        explicit.claim(Some(&map), &mut collision).expect("claim");
        assert_eq!(explicit.spawn_position(), Some(Vec2::new(5.0, 6.0)));

        let mut derived = Entrypoint::new(&ids, "b", "triggers:east_door").expect("entrypoint");
        derived.claim(Some(&map), &mut collision).expect("claim");
        assert_eq!(derived.spawn_position(), Some(Vec2::new(300.0, 120.0)));
    }

    #[test]
    fn missing_shape_leaves_entrypoint_inert() {
        let ids = IdAllocator::new();
        let mut collision = CollisionHandler::new();
        let map = trigger_map();
        let mut entrypoint =
            Entrypoint::new(&ids, "ghost", "triggers:missing_shape").expect("entrypoint");
        entrypoint.claim(Some(&map), &mut collision).expect("claim");
        assert!(entrypoint.body.is_none());
        assert_eq!(entrypoint.spawn_position(), None);
    }

    #[test]
    fn used_flag_survives_release_and_reclaim() {
        let ids = IdAllocator::new();
        let mut collision = CollisionHandler::new();
        let map = trigger_map();
        let mut entrypoint = Entrypoint::new(&ids, "east_door", "triggers:east_door")
            .expect("entrypoint")
            .with_destination(Box::new(destination_room));
        entrypoint.claim(Some(&map), &mut collision).expect("claim");
        assert!(entrypoint.try_trigger().is_some());

        entrypoint.release(&mut collision);
        collision.reset();
        entrypoint.claim(Some(&map), &mut collision).expect("claim");
        assert!(entrypoint.try_trigger().is_none());
    }
}
