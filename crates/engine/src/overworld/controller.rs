use tracing::info;

use crate::render::OverworldRenderer;
use crate::scheduler::{Scheduler, Task};

use super::room::{RenderItem, WorldRoom};
use super::{
    Camera2D, HookError, IdAllocator, ObjectId, OverworldError, TickArgs, Vec2, VIEW_HEIGHT_PX,
    VIEW_WIDTH_PX,
};

/// Builds one transition task per room switch. Held by the controller so
/// every scripted switch gets a fresh task instance.
pub type TransitionFactory = Box<dyn Fn() -> Box<dyn Task>>;

/// A pending room switch produced by an entrypoint firing; consumed by the
/// environment at the start of the next tick.
#[derive(Debug)]
pub struct RoomSwitchRequest {
    pub room: WorldRoom,
    pub exit: Option<String>,
    pub entry: Option<String>,
}

/// Per-environment façade over the current room, the camera, and scripted
/// room transitions. At most one room is current; switching always tears the
/// old room's physics world down before the new room claims the controller.
pub struct OverworldController {
    ids: IdAllocator,
    camera: Camera2D,
    room: Option<WorldRoom>,
    character: Option<ObjectId>,
    rendering: bool,
    processing: bool,
    camera_fixing: bool,
    was_processing: bool,
    entry_transition: Option<TransitionFactory>,
    exit_transition: Option<TransitionFactory>,
    pending_switch: Option<RoomSwitchRequest>,
}

impl Default for OverworldController {
    fn default() -> Self {
        Self::new()
    }
}

impl OverworldController {
    pub fn new() -> Self {
        Self {
            ids: IdAllocator::new(),
            camera: Camera2D::default(),
            room: None,
            character: None,
            rendering: true,
            processing: true,
            camera_fixing: true,
            was_processing: true,
            entry_transition: None,
            exit_transition: None,
            pending_switch: None,
        }
    }

    /// Id scope shared by every room this controller will ever own. Clone it
    /// into room constructors and lazy room suppliers.
    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn camera(&self) -> &Camera2D {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera2D {
        &mut self.camera
    }

    pub fn room(&self) -> Option<&WorldRoom> {
        self.room.as_ref()
    }

    pub fn room_mut(&mut self) -> Option<&mut WorldRoom> {
        self.room.as_mut()
    }

    /// Designate the character object. Entrypoint triggering and persistence
    /// across switches recognize it by identity.
    pub fn set_character(&mut self, character: Option<ObjectId>) {
        self.character = character;
    }

    pub fn character(&self) -> Option<ObjectId> {
        self.character
    }

    pub fn set_rendering(&mut self, rendering: bool) {
        self.rendering = rendering;
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    pub fn set_processing(&mut self, processing: bool) {
        self.processing = processing;
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn set_camera_fixing(&mut self, camera_fixing: bool) {
        self.camera_fixing = camera_fixing;
    }

    pub fn set_entry_transition(&mut self, factory: Option<TransitionFactory>) {
        self.entry_transition = factory;
    }

    pub fn set_exit_transition(&mut self, factory: Option<TransitionFactory>) {
        self.exit_transition = factory;
    }

    pub(crate) fn take_pending_switch(&mut self) -> Option<RoomSwitchRequest> {
        self.pending_switch.take()
    }

    /// Make `room` current. With transitions, the exit task, the swap, and
    /// the entry task are queued on the scheduler's active queue in that
    /// order, so each completes fully before the next starts. Without
    /// transitions the swap happens right here.
    pub fn set_current_room(
        &mut self,
        scheduler: &mut Scheduler,
        room: WorldRoom,
        with_transitions: bool,
        exit: Option<String>,
        entry: Option<String>,
    ) -> Result<(), OverworldError> {
        if !with_transitions {
            return self.swap_room(room, exit, entry);
        }
        if let Some(factory) = &self.exit_transition {
            scheduler.register_task(factory(), true);
        }
        scheduler.register_task(
            Box::new(RoomSwapTask {
                room: Some(room),
                exit,
                entry,
            }),
            true,
        );
        if let Some(factory) = &self.entry_transition {
            scheduler.register_task(factory(), true);
        }
        Ok(())
    }

    /// The actual swap: persist handoff out of the old room, teardown, claim,
    /// re-registration, enter notification, camera recentering.
    pub(crate) fn swap_room(
        &mut self,
        mut room: WorldRoom,
        exit: Option<String>,
        entry: Option<String>,
    ) -> Result<(), OverworldError> {
        let mut carried = Vec::new();
        if let Some(mut old) = self.room.take() {
            old.apply_pending();
            old.notify_exit(exit.as_deref());
            carried = old.extract_persisting(self.character);
            old.destroy(self.character);
        }

        room.claim()?;
        for object in carried {
            room.adopt_persisted(object, entry.as_deref());
        }
        room.notify_enter(entry.as_deref());

        self.camera.position = match room.map() {
            Some(map) => Vec2::new(map.width_px * 0.5, map.height_px * 0.5),
            None => Vec2::ZERO,
        };
        info!(
            room = room.name(),
            objects = room.object_count(),
            "room_switched"
        );
        self.room = Some(room);
        self.fix_position();
        Ok(())
    }

    /// Clamp the camera so the view never shows past the room's edges. An
    /// axis where the view is wider than the room centers instead.
    pub fn fix_position(&mut self) {
        if !self.camera_fixing {
            return;
        }
        let Some(map) = self.room.as_ref().and_then(|room| room.map()) else {
            return;
        };
        let zoom = self.camera.effective_zoom();
        self.camera.position.x =
            clamp_camera_axis(self.camera.position.x, map.width_px, VIEW_WIDTH_PX / zoom);
        self.camera.position.y =
            clamp_camera_axis(self.camera.position.y, map.height_px, VIEW_HEIGHT_PX / zoom);
    }

    /// One tick: fire pause/resume on the processing-flag edge, always
    /// reconcile pending objects, and step the room only while processing is
    /// enabled. Entrypoint firings surface as the pending switch request.
    pub fn process(&mut self, args: &TickArgs) {
        if self.processing != self.was_processing {
            if let Some(room) = self.room.as_mut() {
                if self.processing {
                    room.resume();
                } else {
                    room.pause();
                }
            }
            self.was_processing = self.processing;
        }

        let mut fired = None;
        if let Some(room) = self.room.as_mut() {
            room.apply_pending();
            if self.processing {
                fired = room.process(args, self.character);
            }
        }
        if let Some(request) = fired {
            if self.pending_switch.is_none() {
                self.pending_switch = Some(request);
            }
        }
        self.fix_position();
    }

    /// Walk the room's render order, drawing tile layers through the backend
    /// and objects through their actors.
    pub fn render(&mut self, renderer: &mut dyn OverworldRenderer) {
        if !self.rendering {
            return;
        }
        let camera = self.camera;
        let Some(room) = self.room.as_mut() else {
            return;
        };
        for item in room.render_order() {
            match item {
                RenderItem::TileLayer(index) => {
                    if let Some(map) = room.map() {
                        renderer.draw_tile_layer(map, index, &camera);
                    }
                }
                RenderItem::Object(id) => room.draw_object(id),
            }
        }
    }
}

fn clamp_camera_axis(center: f32, room_extent: f32, view_extent: f32) -> f32 {
    if view_extent >= room_extent {
        room_extent * 0.5
    } else {
        center.clamp(view_extent * 0.5, room_extent - view_extent * 0.5)
    }
}

/// Internal active task performing the deferred half of a scripted switch.
struct RoomSwapTask {
    room: Option<WorldRoom>,
    exit: Option<String>,
    entry: Option<String>,
}

impl Task for RoomSwapTask {
    fn process(
        &mut self,
        overworld: &mut OverworldController,
        _args: &TickArgs,
    ) -> Result<bool, HookError> {
        if let Some(room) = self.room.take() {
            let exit = self.exit.take();
            let entry = self.entry.take();
            overworld
                .swap_room(room, exit, entry)
                .map_err(|error| HookError::new(error.to_string()))?;
        }
        Ok(true)
    }
}
