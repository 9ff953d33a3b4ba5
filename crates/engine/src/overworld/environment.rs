use tracing::error;

use crate::render::OverworldRenderer;
use crate::scheduler::{Scheduler, TaskId};

use super::controller::OverworldController;
use super::room::WorldRoom;
use super::{OverworldError, TickArgs};

/// One simulation environment: a scheduler paired with an overworld
/// controller, stepped together in a fixed order each tick.
///
/// Per tick: any room switch requested by an entrypoint last tick is queued
/// as a scripted transition, then the scheduler runs (background tasks plus
/// the active head, which is where transitions and the room swap execute),
/// then the controller steps the current room.
pub struct Environment {
    scheduler: Scheduler,
    overworld: OverworldController,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            overworld: OverworldController::new(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn overworld(&self) -> &OverworldController {
        &self.overworld
    }

    pub fn overworld_mut(&mut self) -> &mut OverworldController {
        &mut self.overworld
    }

    pub fn set_current_room(
        &mut self,
        room: WorldRoom,
        with_transitions: bool,
        exit: Option<String>,
        entry: Option<String>,
    ) -> Result<(), OverworldError> {
        self.overworld
            .set_current_room(&mut self.scheduler, room, with_transitions, exit, entry)
    }

    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        self.scheduler.cancel_task(&mut self.overworld, id)
    }

    pub fn process(&mut self, args: &TickArgs) {
        if let Some(request) = self.overworld.take_pending_switch() {
            if let Err(err) = self.overworld.set_current_room(
                &mut self.scheduler,
                request.room,
                true,
                request.exit,
                request.entry,
            ) {
                error!(error = %err, "entrypoint_room_switch_failed");
            }
        }
        self.scheduler.process(&mut self.overworld, args);
        self.overworld.process(args);
    }

    pub fn render(&mut self, renderer: &mut dyn OverworldRenderer) {
        self.overworld.render(renderer);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::super::entrypoint::Entrypoint;
    use super::super::object::WorldObject;
    use super::super::{Vec2, FIXED_STEP};
    use super::*;
    use crate::map::{RoomMapData, ShapeDef, ShapeKind, ShapeLayerData};
    use crate::overworld::HookError;
    use crate::scheduler::Task;

    type Log = Rc<RefCell<Vec<String>>>;

    struct TimedTask {
        tag: &'static str,
        remaining: u32,
        log: Log,
    }

    impl Task for TimedTask {
        fn process(
            &mut self,
            _overworld: &mut OverworldController,
            _args: &TickArgs,
        ) -> Result<bool, HookError> {
            self.log.borrow_mut().push(format!("{}:tick", self.tag));
            self.remaining -= 1;
            Ok(self.remaining == 0)
        }

        fn on_finish(&mut self, _overworld: &mut OverworldController, forced: bool) {
            self.log
                .borrow_mut()
                .push(format!("{}:finish:{forced}", self.tag));
        }
    }

    #[test]
    fn scripted_switch_runs_exit_swap_entry_in_strict_order() {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let mut environment = Environment::new();

        let exit_log = log.clone();
        environment
            .overworld_mut()
            .set_exit_transition(Some(Box::new(move || {
                Box::new(TimedTask {
                    tag: "exit",
                    remaining: 2,
                    log: exit_log.clone(),
                })
            })));
        let entry_log = log.clone();
        environment
            .overworld_mut()
            .set_entry_transition(Some(Box::new(move || {
                Box::new(TimedTask {
                    tag: "entry",
                    remaining: 2,
                    log: entry_log.clone(),
                })
            })));

        let room = WorldRoom::new(environment.overworld().ids(), "destination", None);
        environment
            .set_current_room(room, true, None, None)
            .expect("queue switch");

        let args = TickArgs::default();
        // Two ticks of exit transition; the room must not swap during them.
        environment.process(&args);
        assert!(environment.overworld().room().is_none());
        environment.process(&args);
        assert!(environment.overworld().room().is_none());
        // Tick three runs the swap task.
        environment.process(&args);
        assert_eq!(
            environment.overworld().room().expect("room").name(),
            "destination"
        );
        // Entry transition runs only after the swap completed.
        environment.process(&args);
        environment.process(&args);

        assert_eq!(
            log.borrow().as_slice(),
            [
                "exit:tick",
                "exit:tick",
                "exit:finish:false",
                "entry:tick",
                "entry:tick",
                "entry:finish:false",
            ]
        );
        assert_eq!(environment.scheduler().active_len(), 0);
    }

    fn trigger_map(name: &str) -> RoomMapData {
        RoomMapData {
            name: name.to_string(),
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

    #[test]
    fn character_walking_into_an_entrypoint_switches_rooms() {
        let mut environment = Environment::new();
        let ids = environment.overworld().ids().clone();

        let mut first = WorldRoom::new(&ids, "first", Some(trigger_map("first")));
        let destination_ids = ids.clone();
        first
            .add_entrypoint(
                Entrypoint::new(&ids, "east_door", "triggers:east_door")
                    .expect("entrypoint")
                    .with_destination(Box::new(move || {
                        WorldRoom::new(&destination_ids, "second", None)
                    })),
            )
            .expect("add entrypoint");

        let mut character = WorldObject::new();
        character.set_position(Vec2::new(200.0, 120.0));
        character.set_velocity(Vec2::new(400.0, 0.0));
        character.add_bounding_shape(
            "bounds",
            Vec2::ZERO,
            ShapeKind::Circle { radius: 8.0 },
        );
        let character = first.register_object(character).expect("character");
        environment.overworld_mut().set_character(Some(character));
        environment
            .set_current_room(first, false, None, None)
            .expect("install first room");

        let args = TickArgs::new(FIXED_STEP, Default::default());
        for _ in 0..60 {
            environment.process(&args);
        }

        let room = environment.overworld().room().expect("room");
        assert_eq!(room.name(), "second");
        let carried = room.object(character).expect("character carried over");
        assert_eq!(carried.id(), Some(character));
        assert_eq!(carried.owner(), Some(room.id()));
    }
}
