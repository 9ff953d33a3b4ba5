use std::collections::{BTreeMap, BTreeSet};

use rapier2d::prelude::RigidBodyHandle;

use crate::map::{ShapeDef, ShapeKind};
use crate::render::{Actor, DrawParams};

use super::{ColliderTag, HookError, ObjectId, RoomId, TickArgs, Vec2};

/// Which storage currently backs an object's transform.
///
/// `Detached` means the object's own fields are authoritative (the pending
/// body definition). `Attached` means the live physics body is authoritative
/// and the fields are a per-tick synced mirror; writes while attached are
/// pushed through to the body before the next physics step. The switch
/// happens only at room claim and room release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    Detached,
    Attached { body: RigidBodyHandle },
}

/// Game-specific reactions composed into a [`WorldObject`]. Script bindings
/// implement this; every hook defaults to a no-op so partial implementations
/// stay cheap.
///
/// `on_persist` runs while the object is re-registered into a new room after
/// a switch; its error is caught and logged by the room, never propagated.
/// Collision and process hooks are not sanitized; embedders decide their own
/// containment policy for those.
pub trait ObjectBehavior {
    fn process(&mut self, _object: &mut WorldObject, _args: &TickArgs) {}

    fn on_collision_start(&mut self, _object: &mut WorldObject, _other: ColliderTag) {}

    fn on_collision_end(&mut self, _object: &mut WorldObject, _other: ColliderTag) {}

    fn on_persist(
        &mut self,
        _object: &mut WorldObject,
        _room: RoomId,
        _entry: Option<&str>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    fn on_pause(&mut self, _object: &mut WorldObject) {}

    fn on_resume(&mut self, _object: &mut WorldObject) {}

    fn on_destroy(&mut self, _object: &mut WorldObject) {}
}

/// One simulated entity: positionable, collidable, renderable.
///
/// Constructed detached; a room assigns the id at registration and the id
/// never changes afterwards, including across persistence handoffs.
pub struct WorldObject {
    id: Option<ObjectId>,
    owner: Option<RoomId>,
    body: BodyState,
    position: Vec2,
    rotation: f32,
    velocity: Vec2,
    transform_dirty: bool,
    z: i32,
    height: f32,
    scale: f32,
    collidable: bool,
    one_sided: bool,
    group: i32,
    persistent: bool,
    shapes: BTreeMap<String, ShapeDef>,
    ignored: BTreeSet<ObjectId>,
    actor: Option<Box<dyn Actor>>,
    behavior: Option<Box<dyn ObjectBehavior>>,
    destroyed: bool,
}

impl std::fmt::Debug for WorldObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldObject")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("body", &self.body)
            .field("position", &self.position)
            .field("z", &self.z)
            .finish()
    }
}

impl Default for WorldObject {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldObject {
    pub fn new() -> Self {
        Self {
            id: None,
            owner: None,
            body: BodyState::Detached,
            position: Vec2::ZERO,
            rotation: 0.0,
            velocity: Vec2::ZERO,
            transform_dirty: false,
            z: 0,
            height: 0.0,
            scale: 1.0,
            collidable: true,
            one_sided: false,
            group: 0,
            persistent: false,
            shapes: BTreeMap::new(),
            ignored: BTreeSet::new(),
            actor: None,
            behavior: None,
            destroyed: false,
        }
    }

    pub fn id(&self) -> Option<ObjectId> {
        self.id
    }

    pub fn owner(&self) -> Option<RoomId> {
        self.owner
    }

    pub fn body_state(&self) -> BodyState {
        self.body
    }

    /// Bind this object to a room. Fails if already claimed, including an
    /// idempotent re-claim by the same room.
    pub fn claim(&mut self, room: RoomId) -> bool {
        if self.owner.is_some() {
            return false;
        }
        self.owner = Some(room);
        true
    }

    /// Unbind from the owning room. Only the owner may release.
    pub fn release(&mut self, room: RoomId) -> bool {
        if self.owner != Some(room) {
            return false;
        }
        self.owner = None;
        true
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.position = position;
        self.transform_dirty = true;
    }

    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: Vec2) {
        self.velocity = velocity;
        self.transform_dirty = true;
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: f32) {
        self.rotation = rotation;
        self.transform_dirty = true;
    }

    pub fn z(&self) -> i32 {
        self.z
    }

    pub fn set_z(&mut self, z: i32) {
        self.z = z;
    }

    /// Visual Y offset applied at draw time; the physics position is untouched.
    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn set_height(&mut self, height: f32) {
        self.height = height;
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    pub fn can_collide(&self) -> bool {
        self.collidable
    }

    pub fn set_can_collide(&mut self, collidable: bool) {
        self.collidable = collidable;
    }

    /// Equal negative group ids never collide with each other (mutual
    /// exclusion layers, e.g. one squad passing through itself).
    pub fn group_id(&self) -> i32 {
        self.group
    }

    pub fn set_group_id(&mut self, group: i32) {
        self.group = group;
    }

    /// A one-sided object reacts to begin contacts only; end contacts are
    /// not dispatched to it.
    pub fn one_sided(&self) -> bool {
        self.one_sided
    }

    pub fn set_one_sided(&mut self, one_sided: bool) {
        self.one_sided = one_sided;
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    pub fn set_persistent(&mut self, persistent: bool) {
        self.persistent = persistent;
    }

    pub fn add_bounding_shape(&mut self, name: &str, offset: Vec2, kind: ShapeKind) {
        self.shapes.insert(
            name.to_string(),
            ShapeDef {
                name: name.to_string(),
                position: offset,
                kind,
            },
        );
    }

    pub fn remove_bounding_shape(&mut self, name: &str) -> bool {
        self.shapes.remove(name).is_some()
    }

    pub(crate) fn bounding_shapes(&self) -> Vec<ShapeDef> {
        self.shapes.values().cloned().collect()
    }

    pub fn ignore_collider(&mut self, other: ObjectId) {
        self.ignored.insert(other);
    }

    pub fn unignore_collider(&mut self, other: ObjectId) {
        self.ignored.remove(&other);
    }

    pub fn ignores(&self, other: ObjectId) -> bool {
        self.ignored.contains(&other)
    }

    pub fn set_actor(&mut self, actor: Box<dyn Actor>) {
        self.actor = Some(actor);
    }

    pub fn has_actor(&self) -> bool {
        self.actor.is_some()
    }

    pub fn set_behavior(&mut self, behavior: Box<dyn ObjectBehavior>) {
        self.behavior = Some(behavior);
    }

    /// Idempotent teardown: fires `on_destroy` once, then drops the actor and
    /// behavior references. The owning room detaches the physics body before
    /// calling this.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Some(mut behavior) = self.behavior.take() {
            behavior.on_destroy(self);
        }
        self.actor = None;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub(crate) fn assign_id(&mut self, id: ObjectId) {
        if self.id.is_none() {
            self.id = Some(id);
        }
    }

    pub(crate) fn attach(&mut self, body: RigidBodyHandle) {
        self.body = BodyState::Attached { body };
        // The body was created from the pending record; nothing left to push.
        self.transform_dirty = false;
    }

    pub(crate) fn detach(&mut self) {
        self.body = BodyState::Detached;
    }

    pub(crate) fn take_transform_dirty(&mut self) -> bool {
        std::mem::take(&mut self.transform_dirty)
    }

    /// Pull the post-step body transform into the cached fields without
    /// marking them dirty.
    pub(crate) fn apply_physics_transform(&mut self, position: Vec2, rotation: f32, velocity: Vec2) {
        self.position = position;
        self.rotation = rotation;
        self.velocity = velocity;
    }

    pub(crate) fn take_behavior(&mut self) -> Option<Box<dyn ObjectBehavior>> {
        self.behavior.take()
    }

    pub(crate) fn put_behavior(&mut self, behavior: Box<dyn ObjectBehavior>) {
        if self.behavior.is_none() {
            self.behavior = Some(behavior);
        }
    }

    pub(crate) fn draw_params(&self) -> DrawParams {
        DrawParams {
            position: Vec2::new(self.position.x, self.position.y + self.height),
            rotation: self.rotation,
            scale: Vec2::new(self.scale, self.scale),
        }
    }

    pub(crate) fn draw(&mut self) {
        let params = self.draw_params();
        if let Some(actor) = self.actor.as_mut() {
            actor.draw(&params);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_released() {
        let mut object = WorldObject::new();
        assert!(object.claim(RoomId(1)));
        assert!(!object.claim(RoomId(2)));
        assert!(!object.claim(RoomId(1)));
        assert!(!object.release(RoomId(2)));
        assert!(object.release(RoomId(1)));
        assert!(object.claim(RoomId(2)));
    }

    #[test]
    fn detached_transform_reads_back_what_was_set() {
        let mut object = WorldObject::new();
        object.set_position(Vec2::new(12.0, -3.5));
        object.set_velocity(Vec2::new(40.0, 0.0));
        object.set_rotation(1.25);
        assert_eq!(object.position(), Vec2::new(12.0, -3.5));
        assert_eq!(object.velocity(), Vec2::new(40.0, 0.0));
        assert!((object.rotation() - 1.25).abs() < f32::EPSILON);
        assert_eq!(object.body_state(), BodyState::Detached);
    }

    #[test]
    fn ignore_set_adds_and_removes() {
        let mut object = WorldObject::new();
        object.ignore_collider(ObjectId(9));
        assert!(object.ignores(ObjectId(9)));
        assert!(!object.ignores(ObjectId(8)));
        object.unignore_collider(ObjectId(9));
        assert!(!object.ignores(ObjectId(9)));
    }

    struct CountingBehavior {
        destroyed: std::rc::Rc<std::cell::Cell<u32>>,
    }

    impl ObjectBehavior for CountingBehavior {
        fn on_destroy(&mut self, _object: &mut WorldObject) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    #[test]
    fn destroy_is_idempotent_and_fires_hook_once() {
        let destroyed = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut object = WorldObject::new();
        object.set_behavior(Box::new(CountingBehavior {
            destroyed: destroyed.clone(),
        }));
        object.destroy();
        object.destroy();
        assert_eq!(destroyed.get(), 1);
        assert!(object.is_destroyed());
        assert!(!object.has_actor());
    }

    #[test]
    fn draw_params_apply_height_offset_and_scale() {
        let mut object = WorldObject::new();
        object.set_position(Vec2::new(10.0, 20.0));
        object.set_height(6.0);
        object.set_scale(2.0);
        let params = object.draw_params();
        assert_eq!(params.position, Vec2::new(10.0, 26.0));
        assert_eq!(params.scale, Vec2::new(2.0, 2.0));
    }
}
