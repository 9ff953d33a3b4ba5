use std::sync::Mutex;

use rapier2d::prelude::*;

use crate::map::{ShapeDef, ShapeKind};

use super::{ColliderTag, EntrypointId, ObjectId, OverworldError, PIXELS_PER_UNIT};
use super::Vec2 as PxVec2;

/// Physics integration interval, independent of the render frame delta.
pub const FIXED_STEP: f32 = 1.0 / 60.0;

/// Cap applied to a single frame delta before accumulation, bounding the
/// number of catch-up substeps after a long stall.
const MAX_FRAME_DELTA: f32 = 0.25;

const KIND_OBJECT: u128 = 1;
const KIND_ENTRYPOINT: u128 = 2;

fn to_physics(v: PxVec2) -> Vec2 {
    Vec2::new(v.x / PIXELS_PER_UNIT, v.y / PIXELS_PER_UNIT)
}

fn to_pixels(v: Vec2) -> PxVec2 {
    PxVec2::new(v.x * PIXELS_PER_UNIT, v.y * PIXELS_PER_UNIT)
}

// Collider user data layout:
//   bits   0..64   owner id
//   bits  64..96   group id (i32 bit pattern)
//   bit   96       collidable flag
//   bits 120..128  owner kind
fn pack_user_data(kind: u128, id: u64, collidable: bool, group: i32) -> u128 {
    (kind << 120) | ((collidable as u128) << 96) | (((group as u32) as u128) << 64) | id as u128
}

fn unpack_tag(data: u128) -> Option<ColliderTag> {
    let id = data as u64;
    match data >> 120 {
        KIND_OBJECT => Some(ColliderTag::Object(ObjectId(id))),
        KIND_ENTRYPOINT => Some(ColliderTag::Entrypoint(EntrypointId(id))),
        _ => None,
    }
}

fn unpack_collidable(data: u128) -> bool {
    (data >> 96) & 1 == 1
}

fn unpack_group(data: u128) -> i32 {
    ((data >> 64) as u32) as i32
}

/// A begin or end contact between two tagged colliders. Either ordering of
/// the pair may be reported; dispatch must tolerate (A,B) and (B,A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContactEvent {
    pub a: ColliderTag,
    pub b: ColliderTag,
    pub started: bool,
}

/// Everything an object needs to request a physics body.
pub(crate) struct BodySpec<'a> {
    pub tag: ColliderTag,
    pub position: PxVec2,
    pub rotation: f32,
    pub velocity: PxVec2,
    pub fixed: bool,
    pub collidable: bool,
    pub group: i32,
    pub shapes: &'a [ShapeDef],
}

/// Pre-solve contact gate. Reads the packed filter state from collider user
/// data, so it needs no access to room state during the step:
/// - a pair where either side has the collidable flag clear never resolves;
/// - equal negative group ids model mutual exclusion (members of the same
///   negative group pass through each other).
struct ContactFilter;

impl PhysicsHooks for ContactFilter {
    fn filter_contact_pair(&self, context: &PairFilterContext) -> Option<SolverFlags> {
        let a = context.colliders.get(context.collider1)?.user_data;
        let b = context.colliders.get(context.collider2)?.user_data;
        if !unpack_collidable(a) || !unpack_collidable(b) {
            return None;
        }
        let (group_a, group_b) = (unpack_group(a), unpack_group(b));
        if group_a < 0 && group_a == group_b {
            return None;
        }
        Some(SolverFlags::COMPUTE_IMPULSES)
    }
}

/// Collects begin/end contact events during a step for per-tick dispatch.
/// Tags are decoded at collection time; colliders removed mid-step are
/// dropped rather than reported with dangling handles.
#[derive(Default)]
struct ContactCollector {
    contacts: Mutex<Vec<ContactEvent>>,
}

impl EventHandler for ContactCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        colliders: &ColliderSet,
        event: CollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        let (first, second, started) = match event {
            CollisionEvent::Started(first, second, _) => (first, second, true),
            CollisionEvent::Stopped(first, second, _) => (first, second, false),
        };
        let (Some(collider_a), Some(collider_b)) = (colliders.get(first), colliders.get(second))
        else {
            return;
        };
        let (Some(a), Some(b)) = (
            unpack_tag(collider_a.user_data),
            unpack_tag(collider_b.user_data),
        ) else {
            return;
        };
        if let Ok(mut contacts) = self.contacts.lock() {
            contacts.push(ContactEvent { a, b, started });
        }
    }

    fn handle_contact_force_event(
        &self,
        _dt: f32,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: f32,
    ) {
    }
}

/// Owns one room's physics world and advances it at a fixed timestep.
///
/// The world is zero-gravity: this is a top-down simulation and no global
/// force applies to bodies. Frame deltas accumulate and the world advances in
/// exact [`FIXED_STEP`] increments, so a render tick may run zero or several
/// substeps but the trajectory is independent of frame-rate chunking.
pub struct CollisionHandler {
    pipeline: PhysicsPipeline,
    params: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    accumulator: f32,
    hooks: ContactFilter,
    collector: ContactCollector,
}

impl std::fmt::Debug for CollisionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollisionHandler")
            .field("bodies", &self.bodies.len())
            .field("colliders", &self.colliders.len())
            .field("accumulator", &self.accumulator)
            .finish()
    }
}

impl Default for CollisionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CollisionHandler {
    pub fn new() -> Self {
        let mut params = IntegrationParameters::default();
        params.dt = FIXED_STEP;
        Self {
            pipeline: PhysicsPipeline::new(),
            params,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            accumulator: 0.0,
            hooks: ContactFilter,
            collector: ContactCollector::default(),
        }
    }

    /// Drop the current world and start over with a fresh zero-gravity one.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Accumulate `delta` seconds and advance the world by however many whole
    /// fixed steps fit. Returns the number of substeps run.
    pub fn step(&mut self, delta: f32) -> u32 {
        if delta > 0.0 {
            self.accumulator += delta.min(MAX_FRAME_DELTA);
        }
        let mut steps = 0;
        while self.accumulator >= FIXED_STEP {
            self.pipeline.step(
                Vec2::ZERO,
                &self.params,
                &mut self.islands,
                &mut self.broad_phase,
                &mut self.narrow_phase,
                &mut self.bodies,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                &mut self.ccd_solver,
                &self.hooks,
                &self.collector,
            );
            self.accumulator -= FIXED_STEP;
            steps += 1;
        }
        steps
    }

    pub(crate) fn drain_contacts(&mut self) -> Vec<ContactEvent> {
        self.collector
            .contacts
            .lock()
            .map(|mut contacts| std::mem::take(&mut *contacts))
            .unwrap_or_default()
    }

    /// Create a body plus one collider per bounding shape. Fixture creation
    /// failures (degenerate polygons) surface here, at claim time.
    pub(crate) fn create_body(&mut self, spec: BodySpec<'_>) -> Result<RigidBodyHandle, OverworldError> {
        let (kind, id) = match spec.tag {
            ColliderTag::Object(ObjectId(id)) => (KIND_OBJECT, id),
            ColliderTag::Entrypoint(EntrypointId(id)) => (KIND_ENTRYPOINT, id),
        };
        let user_data = pack_user_data(kind, id, spec.collidable, spec.group);

        let builder = if spec.fixed {
            RigidBodyBuilder::fixed()
        } else {
            RigidBodyBuilder::dynamic().lock_rotations()
        };
        let body = builder
            .translation(to_physics(spec.position))
            .rotation(spec.rotation)
            .linvel(to_physics(spec.velocity))
            .build();
        let handle = self.bodies.insert(body);

        for shape in spec.shapes {
            let collider = match shape_collider(shape) {
                Some(collider) => collider,
                None => {
                    self.destroy_body(handle);
                    return Err(OverworldError::DegenerateShape {
                        name: shape.name.clone(),
                    });
                }
            };
            let collider = collider
                .translation(to_physics(shape.position))
                .sensor(!spec.collidable)
                .active_events(ActiveEvents::COLLISION_EVENTS)
                .active_hooks(ActiveHooks::FILTER_CONTACT_PAIRS)
                .user_data(user_data)
                .build();
            self.colliders
                .insert_with_parent(collider, handle, &mut self.bodies);
        }
        Ok(handle)
    }

    pub(crate) fn destroy_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    /// Read a body's transform back out in pixel space.
    pub(crate) fn body_transform(&self, handle: RigidBodyHandle) -> Option<(PxVec2, f32, PxVec2)> {
        let body = self.bodies.get(handle)?;
        Some((
            to_pixels(body.translation()),
            body.rotation().angle(),
            to_pixels(body.linvel()),
        ))
    }

    /// Push an externally set transform into the body.
    pub(crate) fn push_transform(
        &mut self,
        handle: RigidBodyHandle,
        position: PxVec2,
        rotation: f32,
        velocity: PxVec2,
    ) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_position(Pose::new(to_physics(position), rotation), true);
            body.set_linvel(to_physics(velocity), true);
        }
    }

    /// Refresh the packed filter state on every collider of an object's body.
    /// Called before each step so the pre-solve gate sees current flags.
    pub(crate) fn update_object_filter(
        &mut self,
        handle: RigidBodyHandle,
        id: ObjectId,
        collidable: bool,
        group: i32,
    ) {
        let Some(body) = self.bodies.get(handle) else {
            return;
        };
        let handles: Vec<ColliderHandle> = body.colliders().to_vec();
        let user_data = pack_user_data(KIND_OBJECT, id.0, collidable, group);
        for collider_handle in handles {
            if let Some(collider) = self.colliders.get_mut(collider_handle) {
                collider.user_data = user_data;
                collider.set_sensor(!collidable);
            }
        }
    }
}

fn shape_collider(shape: &ShapeDef) -> Option<ColliderBuilder> {
    match &shape.kind {
        ShapeKind::Rect {
            half_width,
            half_height,
        } => Some(ColliderBuilder::cuboid(
            half_width / PIXELS_PER_UNIT,
            half_height / PIXELS_PER_UNIT,
        )),
        ShapeKind::Circle { radius } => Some(ColliderBuilder::ball(radius / PIXELS_PER_UNIT)),
        ShapeKind::Polygon { points } => {
            let points: Vec<Vec2> = points.iter().map(|p| to_physics(*p)).collect();
            ColliderBuilder::convex_hull(&points)
        }
    }
}
