use engine::{
    Actor, DrawParams, Entrypoint, Environment, IdAllocator, InputAction, InputSnapshot,
    ObjectBehavior, ObjectId, OverworldRenderer, RoomMapData, ShapeKind, TickArgs, Vec2,
    WorldObject, WorldRoom, FIXED_STEP,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const CHARACTER_SPEED_PX_PER_SECOND: f32 = 160.0;
const PATROL_SPEED_PX_PER_SECOND: f32 = 60.0;
const SIM_TICKS: u32 = 150;
const LOG_EVERY_TICKS: u32 = 60;

const MEADOW_MAP: &str = r#"{
    "name": "meadow",
    "width_px": 320.0,
    "height_px": 240.0,
    "layers": [
        {
            "name": "grass",
            "z": 0,
            "tile_size": 80,
            "columns": 4,
            "rows": 3,
            "tiles": [1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1]
        }
    ],
    "shape_layers": [
        {
            "name": "triggers",
            "shapes": [
                {
                    "name": "east_door",
                    "position": { "x": 300.0, "y": 120.0 },
                    "kind": "rect",
                    "half_width": 10.0,
                    "half_height": 40.0
                }
            ]
        }
    ]
}"#;

const CAVERN_MAP: &str = r#"{
    "name": "cavern",
    "width_px": 320.0,
    "height_px": 240.0,
    "layers": [
        {
            "name": "stone",
            "z": 0,
            "tile_size": 80,
            "columns": 4,
            "rows": 3,
            "tiles": [2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2],
            "blocked": [2]
        },
        {
            "name": "stalactites",
            "z": 5,
            "tile_size": 80,
            "columns": 4,
            "rows": 3,
            "tiles": [3, 0, 3, 0, 0, 3, 0, 3, 3, 0, 3, 0]
        }
    ],
    "shape_layers": [
        {
            "name": "markers",
            "shapes": [
                {
                    "name": "west_door",
                    "position": { "x": 40.0, "y": 120.0 },
                    "kind": "rect",
                    "half_width": 10.0,
                    "half_height": 40.0
                }
            ]
        }
    ]
}"#;

/// Player-controlled movement: the input snapshot maps straight to velocity.
struct CharacterBehavior;

impl ObjectBehavior for CharacterBehavior {
    fn process(&mut self, object: &mut WorldObject, args: &TickArgs) {
        let velocity = movement_velocity(&args.input, CHARACTER_SPEED_PX_PER_SECOND);
        object.set_velocity(velocity);
    }

    fn on_collision_start(&mut self, object: &mut WorldObject, other: engine::ColliderTag) {
        debug!(object = ?object.id(), other = ?other, "character_contact");
    }
}

/// Walks back and forth between two x bounds.
struct PatrolBehavior {
    min_x: f32,
    max_x: f32,
}

impl ObjectBehavior for PatrolBehavior {
    fn process(&mut self, object: &mut WorldObject, _args: &TickArgs) {
        let x = object.position().x;
        let mut vx = object.velocity().x;
        if vx == 0.0 || x <= self.min_x {
            vx = PATROL_SPEED_PX_PER_SECOND;
        } else if x >= self.max_x {
            vx = -PATROL_SPEED_PX_PER_SECOND;
        }
        object.set_velocity(Vec2::new(vx, 0.0));
    }
}

struct NamedActor {
    name: &'static str,
}

impl Actor for NamedActor {
    fn draw(&mut self, params: &DrawParams) {
        debug!(
            actor = self.name,
            x = params.position.x,
            y = params.position.y,
            "draw_actor"
        );
    }
}

/// Headless render backend: tile layers go to the debug log.
struct ConsoleRenderer;

impl OverworldRenderer for ConsoleRenderer {
    fn draw_tile_layer(&mut self, map: &RoomMapData, layer: usize, _camera: &engine::Camera2D) {
        if let Some(tile_layer) = map.layers.get(layer) {
            debug!(map = map.name.as_str(), layer = tile_layer.name.as_str(), "draw_tile_layer");
        }
    }
}

fn movement_velocity(input: &InputSnapshot, speed: f32) -> Vec2 {
    let mut x = 0.0f32;
    let mut y = 0.0f32;

    if input.is_down(InputAction::MoveRight) {
        x += 1.0;
    }
    if input.is_down(InputAction::MoveLeft) {
        x -= 1.0;
    }
    if input.is_down(InputAction::MoveUp) {
        y += 1.0;
    }
    if input.is_down(InputAction::MoveDown) {
        y -= 1.0;
    }

    let len_sq = x * x + y * y;
    if len_sq > 0.0 {
        let inv_len = len_sq.sqrt().recip();
        x *= inv_len;
        y *= inv_len;
    }

    Vec2::new(x * speed, y * speed)
}

fn build_cavern(ids: &IdAllocator) -> WorldRoom {
    let map = match RoomMapData::from_json_str(CAVERN_MAP) {
        Ok(map) => Some(map),
        Err(err) => {
            warn!(error = %err, "cavern map failed to decode; room will be mapless");
            None
        }
    };
    let mut room = WorldRoom::new(ids, "cavern", map);
    match Entrypoint::new(ids, "west_door", "markers:west_door") {
        Ok(entrypoint) => {
            if let Err(err) = room.add_entrypoint(entrypoint) {
                warn!(error = %err, "west_door entrypoint rejected");
            }
        }
        Err(err) => warn!(error = %err, "west_door entrypoint invalid"),
    }
    room
}

fn build_meadow(ids: &IdAllocator) -> Result<WorldRoom, Box<dyn std::error::Error>> {
    let map = RoomMapData::from_json_str(MEADOW_MAP)?;
    let mut room = WorldRoom::new(ids, "meadow", Some(map));

    let supplier_ids = ids.clone();
    room.add_entrypoint(
        Entrypoint::new(ids, "east_door", "triggers:east_door")?
            .with_target("west_door")
            .with_destination(Box::new(move || build_cavern(&supplier_ids))),
    )?;

    let mut patrol = WorldObject::new();
    patrol.set_position(Vec2::new(100.0, 200.0));
    patrol.add_bounding_shape("bounds", Vec2::ZERO, ShapeKind::Circle { radius: 10.0 });
    patrol.set_behavior(Box::new(PatrolBehavior {
        min_x: 100.0,
        max_x: 260.0,
    }));
    patrol.set_actor(Box::new(NamedActor { name: "patrol" }));
    room.register_object(patrol)?;

    Ok(room)
}

fn build_environment() -> Result<(Environment, ObjectId), Box<dyn std::error::Error>> {
    let mut environment = Environment::new();
    let ids = environment.overworld().ids().clone();

    let mut meadow = build_meadow(&ids)?;

    let mut character = WorldObject::new();
    character.set_position(Vec2::new(60.0, 120.0));
    character.set_persistent(true);
    character.add_bounding_shape("bounds", Vec2::ZERO, ShapeKind::Circle { radius: 10.0 });
    character.set_behavior(Box::new(CharacterBehavior));
    character.set_actor(Box::new(NamedActor { name: "character" }));
    let character_id = meadow.register_object(character)?;

    environment.overworld_mut().set_character(Some(character_id));
    environment.set_current_room(meadow, false, None, None)?;
    Ok((environment, character_id))
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let (mut environment, character_id) = build_environment()?;
    let mut renderer = ConsoleRenderer;

    // Hold "move right" so the character walks into the east door.
    let input = InputSnapshot::empty().with_action_down(InputAction::MoveRight, true);
    let args = TickArgs::new(FIXED_STEP, input);

    for tick in 0..SIM_TICKS {
        environment.process(&args);
        if tick % LOG_EVERY_TICKS == 0 {
            environment.render(&mut renderer);
            if let Some(room) = environment.overworld().room() {
                let position = room
                    .object(character_id)
                    .map(|object| object.position())
                    .unwrap_or_default();
                info!(
                    tick,
                    room = room.name(),
                    x = position.x,
                    y = position.y,
                    "simulation_tick"
                );
            }
        }
    }

    let final_room = environment
        .overworld()
        .room()
        .map(|room| room.name().to_string())
        .unwrap_or_default();
    info!(room = final_room.as_str(), "simulation_complete");
    Ok(())
}

fn main() {
    init_tracing();
    info!("=== Overworld Demo Startup ===");
    if let Err(err) = run() {
        error!(error = %err, "startup_failed");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}
