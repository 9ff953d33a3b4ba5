pub mod input;
pub mod map;
pub mod overworld;
pub mod render;
pub mod scheduler;

pub use input::{InputAction, InputSnapshot};
pub use map::{
    MapError, RoomMapData, ShapeDef, ShapeKind, ShapeLayerData, TileAnimation, TileLayerData,
};
pub use overworld::{
    BodyState, Camera2D, ColliderTag, CollisionHandler, Entrypoint, EntrypointId, Environment,
    HookError, IdAllocator, ObjectBehavior, ObjectId, OverworldController, OverworldError,
    RenderItem, RoomBehavior, RoomId, RoomSupplier, RoomSwitchRequest, TickArgs,
    TransitionFactory, Vec2, WorldObject, WorldRoom, FIXED_STEP, PIXELS_PER_UNIT, VIEW_HEIGHT_PX,
    VIEW_WIDTH_PX,
};
pub use render::{Actor, DrawParams, OverworldRenderer};
pub use scheduler::{Scheduler, Task, TaskId};
