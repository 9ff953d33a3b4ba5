use std::collections::BTreeMap;

use tracing::{debug, error, warn};

use crate::map::RoomMapData;

use super::collision::{BodySpec, CollisionHandler, ContactEvent};
use super::controller::RoomSwitchRequest;
use super::entrypoint::Entrypoint;
use super::object::{BodyState, WorldObject};
use super::{
    ColliderTag, EntrypointId, IdAllocator, ObjectId, OverworldError, RoomId, TickArgs, Vec2,
};

/// Room-level logic composed into a [`WorldRoom`]; script bindings implement
/// this. Every hook defaults to a no-op.
pub trait RoomBehavior {
    fn process(&mut self, _room: &mut WorldRoom, _args: &TickArgs) {}

    fn on_enter(&mut self, _room: &mut WorldRoom, _entry: Option<&str>) {}

    fn on_exit(&mut self, _room: &mut WorldRoom, _exit: Option<&str>) {}

    fn on_pause(&mut self, _room: &mut WorldRoom) {}

    fn on_resume(&mut self, _room: &mut WorldRoom) {}
}

/// One element of a room's back-to-front render walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderItem {
    /// Index into the map's tile layers.
    TileLayer(usize),
    Object(ObjectId),
}

/// Container and coordinator for all simulated entities within one place.
///
/// Owns the physics world (through its [`CollisionHandler`]), the live object
/// set, and the named entrypoints. Object additions and removals are staged
/// and applied once per tick so mutation inside a tick never invalidates the
/// set being iterated.
pub struct WorldRoom {
    id: RoomId,
    name: String,
    ids: IdAllocator,
    map: Option<RoomMapData>,
    collision: CollisionHandler,
    objects: BTreeMap<ObjectId, WorldObject>,
    pending_add: Vec<WorldObject>,
    pending_remove: Vec<ObjectId>,
    entrypoints: BTreeMap<String, Entrypoint>,
    behavior: Option<Box<dyn RoomBehavior>>,
    claimed: bool,
}

impl std::fmt::Debug for WorldRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldRoom")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("objects", &self.objects.len())
            .field("claimed", &self.claimed)
            .finish()
    }
}

fn create_body_with(
    collision: &mut CollisionHandler,
    object: &mut WorldObject,
) -> Result<(), OverworldError> {
    let Some(id) = object.id() else {
        return Ok(());
    };
    if let BodyState::Attached { .. } = object.body_state() {
        return Ok(());
    }
    let shapes = object.bounding_shapes();
    let handle = collision.create_body(BodySpec {
        tag: ColliderTag::Object(id),
        position: object.position(),
        rotation: object.rotation(),
        velocity: object.velocity(),
        fixed: false,
        collidable: object.can_collide(),
        group: object.group_id(),
        shapes: &shapes,
    })?;
    object.attach(handle);
    if let Some((position, rotation, velocity)) = collision.body_transform(handle) {
        object.apply_physics_transform(position, rotation, velocity);
    }
    Ok(())
}

/// Flush the body's last transform into the pending record, then drop the
/// body. Leaves the object detached with its position intact.
fn detach_body(collision: &mut CollisionHandler, object: &mut WorldObject) {
    if let BodyState::Attached { body } = object.body_state() {
        if let Some((position, rotation, velocity)) = collision.body_transform(body) {
            object.apply_physics_transform(position, rotation, velocity);
        }
        collision.destroy_body(body);
        object.detach();
    }
}

impl WorldRoom {
    pub fn new(ids: &IdAllocator, name: &str, map: Option<RoomMapData>) -> Self {
        Self {
            id: ids.next_room(),
            name: name.to_string(),
            ids: ids.clone(),
            map,
            collision: CollisionHandler::new(),
            objects: BTreeMap::new(),
            pending_add: Vec::new(),
            pending_remove: Vec::new(),
            entrypoints: BTreeMap::new(),
            behavior: Some(Box::new(NoopRoomBehavior)),
            claimed: false,
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn map(&self) -> Option<&RoomMapData> {
        self.map.as_ref()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    pub fn set_behavior(&mut self, behavior: Box<dyn RoomBehavior>) {
        self.behavior = Some(behavior);
    }

    pub fn object(&self, id: ObjectId) -> Option<&WorldObject> {
        self.objects.get(&id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut WorldObject> {
        self.objects.get_mut(&id)
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn entrypoint(&self, name: &str) -> Option<&Entrypoint> {
        self.entrypoints.get(name)
    }

    /// Spawn position for a named entrypoint, if it resolves to one.
    pub fn spawn_position(&self, name: &str) -> Option<Vec2> {
        self.entrypoints.get(name)?.spawn_position()
    }

    pub fn add_entrypoint(&mut self, mut entrypoint: Entrypoint) -> Result<(), OverworldError> {
        if self.claimed {
            entrypoint.claim(self.map.as_ref(), &mut self.collision)?;
        }
        self.entrypoints
            .insert(entrypoint.name().to_string(), entrypoint);
        Ok(())
    }

    /// Claim the object for this room and stage it for the live set. The
    /// object becomes visible to processing, collision, and rendering at the
    /// next pending-reconciliation, but its physics body is created right
    /// away when the room already has a live world.
    pub fn register_object(&mut self, mut object: WorldObject) -> Result<ObjectId, OverworldError> {
        if !object.claim(self.id) {
            return Err(OverworldError::AlreadyClaimed);
        }
        let id = object.id().unwrap_or_else(|| self.ids.next_object());
        object.assign_id(id);
        if self.claimed {
            create_body_with(&mut self.collision, &mut object)?;
        }
        self.pending_add.push(object);
        Ok(id)
    }

    /// Stage an object for removal; it detaches and destroys at the next
    /// pending-reconciliation.
    pub fn remove_object(&mut self, id: ObjectId) -> bool {
        let live = self.objects.contains_key(&id);
        let staged = self.pending_add.iter().any(|object| object.id() == Some(id));
        if !live && !staged {
            return false;
        }
        self.pending_remove.push(id);
        true
    }

    /// Apply staged additions and removals. Runs once per tick, before
    /// processing, so the object pass iterates a stable set.
    pub fn apply_pending(&mut self) {
        if !self.pending_remove.is_empty() {
            let mut pending = std::mem::take(&mut self.pending_remove);
            pending.sort_by_key(|id| id.0);
            pending.dedup();
            for id in pending {
                if let Some(index) = self
                    .pending_add
                    .iter()
                    .position(|object| object.id() == Some(id))
                {
                    let mut object = self.pending_add.remove(index);
                    detach_body(&mut self.collision, &mut object);
                    object.release(self.id);
                    object.destroy();
                    continue;
                }
                if let Some(mut object) = self.objects.remove(&id) {
                    detach_body(&mut self.collision, &mut object);
                    object.release(self.id);
                    object.destroy();
                }
            }
        }
        for object in self.pending_add.drain(..) {
            if let Some(id) = object.id() {
                self.objects.insert(id, object);
            }
        }
    }

    /// Bind to a live controller: reset the physics world, flush bodies for
    /// every object registered before the world existed, and claim the
    /// entrypoint triggers against the map.
    pub fn claim(&mut self) -> Result<(), OverworldError> {
        if self.claimed {
            return Ok(());
        }
        self.claimed = true;
        self.collision.reset();
        for object in self.objects.values_mut() {
            create_body_with(&mut self.collision, object)?;
        }
        for object in &mut self.pending_add {
            create_body_with(&mut self.collision, object)?;
        }
        for entrypoint in self.entrypoints.values_mut() {
            entrypoint.claim(self.map.as_ref(), &mut self.collision)?;
        }
        Ok(())
    }

    /// Tear down the physics world. Objects stay registered and keep their
    /// last body transform in the pending record.
    pub fn release(&mut self) {
        if !self.claimed {
            return;
        }
        for object in self.objects.values_mut() {
            detach_body(&mut self.collision, object);
        }
        for object in &mut self.pending_add {
            detach_body(&mut self.collision, object);
        }
        for entrypoint in self.entrypoints.values_mut() {
            entrypoint.release(&mut self.collision);
        }
        self.collision.reset();
        self.claimed = false;
    }

    /// Dispose every live object except the recognized character, which is
    /// handed off rather than destroyed, then drop the physics world.
    pub fn destroy(&mut self, character: Option<ObjectId>) {
        self.apply_pending();
        let ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        for id in ids {
            if Some(id) == character {
                continue;
            }
            if let Some(mut object) = self.objects.remove(&id) {
                detach_body(&mut self.collision, &mut object);
                object.release(self.id);
                object.destroy();
            }
        }
        for entrypoint in self.entrypoints.values_mut() {
            entrypoint.release(&mut self.collision);
        }
        self.collision.reset();
        self.claimed = false;
    }

    /// Remove and release the character plus every persistence-flagged object
    /// for handoff to the next room. Ids are kept.
    pub fn extract_persisting(&mut self, character: Option<ObjectId>) -> Vec<WorldObject> {
        self.apply_pending();
        let ids: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(id, object)| Some(**id) == character || object.persistent())
            .map(|(id, _)| *id)
            .collect();
        let mut carried = Vec::new();
        for id in ids {
            if let Some(mut object) = self.objects.remove(&id) {
                detach_body(&mut self.collision, &mut object);
                object.release(self.id);
                carried.push(object);
            }
        }
        carried
    }

    /// Re-register an object carried over from a previous room. The object is
    /// already released, keeps its id, and goes straight into the live set.
    /// A failing persist hook is logged and never aborts the switch.
    pub fn adopt_persisted(&mut self, mut object: WorldObject, entry: Option<&str>) {
        let Some(id) = object.id() else {
            warn!(room = self.name.as_str(), "persisted object without id dropped");
            return;
        };
        if !object.claim(self.id) {
            warn!(
                room = self.name.as_str(),
                object_id = id.0,
                "persisted object still claimed elsewhere"
            );
            return;
        }
        if let Some(spawn) = entry.and_then(|name| self.spawn_position(name)) {
            object.set_position(spawn);
        }
        if self.claimed {
            if let Err(err) = create_body_with(&mut self.collision, &mut object) {
                error!(
                    room = self.name.as_str(),
                    object_id = id.0,
                    error = %err,
                    "persisted_body_failed"
                );
            }
        }
        self.objects.insert(id, object);

        let room_id = self.id;
        if let Some(object) = self.objects.get_mut(&id) {
            if let Some(mut behavior) = object.take_behavior() {
                if let Err(err) = behavior.on_persist(object, room_id, entry) {
                    warn!(object_id = id.0, error = %err, "persist_hook_failed");
                }
                object.put_behavior(behavior);
            }
        }
    }

    pub(crate) fn notify_enter(&mut self, entry: Option<&str>) {
        if let Some(mut behavior) = self.behavior.take() {
            behavior.on_enter(self, entry);
            if self.behavior.is_none() {
                self.behavior = Some(behavior);
            }
        }
    }

    pub(crate) fn notify_exit(&mut self, exit: Option<&str>) {
        if let Some(mut behavior) = self.behavior.take() {
            behavior.on_exit(self, exit);
            if self.behavior.is_none() {
                self.behavior = Some(behavior);
            }
        }
    }

    pub fn pause(&mut self) {
        if let Some(mut behavior) = self.behavior.take() {
            behavior.on_pause(self);
            if self.behavior.is_none() {
                self.behavior = Some(behavior);
            }
        }
        let ids = self.object_ids();
        for id in ids {
            if let Some(object) = self.objects.get_mut(&id) {
                if let Some(mut behavior) = object.take_behavior() {
                    behavior.on_pause(object);
                    object.put_behavior(behavior);
                }
            }
        }
    }

    pub fn resume(&mut self) {
        if let Some(mut behavior) = self.behavior.take() {
            behavior.on_resume(self);
            if self.behavior.is_none() {
                self.behavior = Some(behavior);
            }
        }
        let ids = self.object_ids();
        for id in ids {
            if let Some(object) = self.objects.get_mut(&id) {
                if let Some(mut behavior) = object.take_behavior() {
                    behavior.on_resume(object);
                    object.put_behavior(behavior);
                }
            }
        }
    }

    /// One simulation tick: room logic, the object pass over this tick's
    /// snapshot, transform/filter sync, fixed-step physics, and reaction
    /// dispatch. Returns a room-switch request when an entrypoint fired.
    pub fn process(
        &mut self,
        args: &TickArgs,
        character: Option<ObjectId>,
    ) -> Option<RoomSwitchRequest> {
        if let Some(mut behavior) = self.behavior.take() {
            behavior.process(self, args);
            if self.behavior.is_none() {
                self.behavior = Some(behavior);
            }
        }

        let snapshot: Vec<ObjectId> = self.objects.keys().copied().collect();
        for id in snapshot {
            let Some(object) = self.objects.get_mut(&id) else {
                continue;
            };
            if let Some(mut behavior) = object.take_behavior() {
                behavior.process(object, args);
                object.put_behavior(behavior);
            }
        }

        for object in self.objects.values_mut() {
            let BodyState::Attached { body } = object.body_state() else {
                continue;
            };
            if object.take_transform_dirty() {
                self.collision.push_transform(
                    body,
                    object.position(),
                    object.rotation(),
                    object.velocity(),
                );
            }
            if let Some(id) = object.id() {
                self.collision
                    .update_object_filter(body, id, object.can_collide(), object.group_id());
            }
        }

        let steps = self.collision.step(args.delta);
        if steps > 0 {
            for object in self.objects.values_mut() {
                if let BodyState::Attached { body } = object.body_state() {
                    if let Some((position, rotation, velocity)) =
                        self.collision.body_transform(body)
                    {
                        object.apply_physics_transform(position, rotation, velocity);
                    }
                }
            }
        }

        let contacts = self.collision.drain_contacts();
        self.dispatch_contacts(&contacts, character)
    }

    fn dispatch_contacts(
        &mut self,
        contacts: &[ContactEvent],
        character: Option<ObjectId>,
    ) -> Option<RoomSwitchRequest> {
        let mut request: Option<RoomSwitchRequest> = None;
        for contact in contacts {
            match (contact.a, contact.b) {
                (ColliderTag::Object(a), ColliderTag::Object(b)) => {
                    self.notify_contact(a, ColliderTag::Object(b), contact.started);
                    self.notify_contact(b, ColliderTag::Object(a), contact.started);
                }
                (ColliderTag::Object(object), ColliderTag::Entrypoint(entrypoint))
                | (ColliderTag::Entrypoint(entrypoint), ColliderTag::Object(object)) => {
                    self.notify_contact(object, ColliderTag::Entrypoint(entrypoint), contact.started);
                    if contact.started && character == Some(object) {
                        if let Some(fired) = self.trigger_entrypoint(entrypoint) {
                            if request.is_none() {
                                request = Some(fired);
                            } else {
                                warn!(
                                    room = self.name.as_str(),
                                    "second entrypoint firing in one tick ignored"
                                );
                            }
                        }
                    }
                }
                (ColliderTag::Entrypoint(_), ColliderTag::Entrypoint(_)) => {}
            }
        }
        request
    }

    /// Reaction hooks run for collidable objects only; the ignore set and the
    /// one-sided flag filter per pair. Contact order (A,B) vs. (B,A) is not
    /// guaranteed upstream, so each side is notified independently.
    fn notify_contact(&mut self, target: ObjectId, other: ColliderTag, started: bool) {
        let Some(object) = self.objects.get_mut(&target) else {
            return;
        };
        if !object.can_collide() {
            return;
        }
        if let ColliderTag::Object(other_id) = other {
            if object.ignores(other_id) {
                return;
            }
        }
        if !started && object.one_sided() {
            return;
        }
        if let Some(mut behavior) = object.take_behavior() {
            if started {
                behavior.on_collision_start(object, other);
            } else {
                behavior.on_collision_end(object, other);
            }
            object.put_behavior(behavior);
        }
    }

    fn trigger_entrypoint(&mut self, id: EntrypointId) -> Option<RoomSwitchRequest> {
        let entrypoint = self
            .entrypoints
            .values_mut()
            .find(|entrypoint| entrypoint.id() == id)?;
        let fired = entrypoint.try_trigger();
        if fired.is_some() {
            debug!(
                room = self.name.as_str(),
                entrypoint = entrypoint.name(),
                "entrypoint_fired"
            );
        }
        fired
    }

    /// Total draw order over tile layers and objects:
    /// z ascending; within a z, tile layers precede objects; objects order by
    /// descending Y (back-to-front for a top-down view); remaining ties break
    /// by insertion order.
    pub fn render_order(&self) -> Vec<RenderItem> {
        struct Entry {
            z: i32,
            tile: bool,
            y: f32,
            seq: u64,
            item: RenderItem,
        }

        let mut entries = Vec::new();
        if let Some(map) = &self.map {
            for (index, layer) in map.layers.iter().enumerate() {
                entries.push(Entry {
                    z: layer.z,
                    tile: true,
                    y: 0.0,
                    seq: index as u64,
                    item: RenderItem::TileLayer(index),
                });
            }
        }
        for (id, object) in &self.objects {
            entries.push(Entry {
                z: object.z(),
                tile: false,
                y: object.position().y,
                seq: id.0,
                item: RenderItem::Object(*id),
            });
        }

        entries.sort_by(|a, b| {
            a.z.cmp(&b.z)
                .then_with(|| b.tile.cmp(&a.tile))
                .then_with(|| match (a.tile, b.tile) {
                    (false, false) => b.y.total_cmp(&a.y),
                    _ => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|entry| entry.item).collect()
    }

    pub(crate) fn draw_object(&mut self, id: ObjectId) {
        if let Some(object) = self.objects.get_mut(&id) {
            object.draw();
        }
    }
}

struct NoopRoomBehavior;

impl RoomBehavior for NoopRoomBehavior {}
