use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::overworld::Vec2;

/// Geometry for a named map shape or an object bounding shape, in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapeKind {
    Rect { half_width: f32, half_height: f32 },
    Circle { radius: f32 },
    Polygon { points: Vec<Vec2> },
}

/// A named shape anchored at `position` (pixel space, shape center).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeDef {
    pub name: String,
    pub position: Vec2,
    #[serde(flatten)]
    pub kind: ShapeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeLayerData {
    pub name: String,
    pub shapes: Vec<ShapeDef>,
}

/// Frame timing for an animated tile id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileAnimation {
    pub tile: u32,
    pub frames: Vec<u32>,
    pub frame_seconds: f32,
}

/// One tile layer: a row-major grid of tile ids at a fixed z order.
///
/// `blocked` lists tile ids that are not traversable; `animations` carries
/// per-tile frame timing. Both default to empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileLayerData {
    pub name: String,
    pub z: i32,
    pub tile_size: u32,
    pub columns: u32,
    pub rows: u32,
    pub tiles: Vec<u32>,
    #[serde(default)]
    pub blocked: Vec<u32>,
    #[serde(default)]
    pub animations: Vec<TileAnimation>,
}

impl TileLayerData {
    pub fn tile_at(&self, column: u32, row: u32) -> Option<u32> {
        if column >= self.columns || row >= self.rows {
            return None;
        }
        let index = row as usize * self.columns as usize + column as usize;
        self.tiles.get(index).copied()
    }

    pub fn is_traversable(&self, column: u32, row: u32) -> Option<bool> {
        self.tile_at(column, row)
            .map(|tile| !self.blocked.contains(&tile))
    }

    pub fn animation_for(&self, tile: u32) -> Option<&TileAnimation> {
        self.animations.iter().find(|anim| anim.tile == tile)
    }
}

/// Read-only room map descriptor: pixel dimensions, tile layers, and named
/// shapes grouped by layer. Decoded from JSON; the core never writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMapData {
    pub name: String,
    pub width_px: f32,
    pub height_px: f32,
    #[serde(default)]
    pub layers: Vec<TileLayerData>,
    #[serde(default)]
    pub shape_layers: Vec<ShapeLayerData>,
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to read map file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode map JSON at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("tile count mismatch in layer '{layer}': expected {expected}, got {actual}")]
    TileCountMismatch {
        layer: String,
        expected: usize,
        actual: usize,
    },
    #[error("duplicate shape '{shape}' in shape layer '{layer}'")]
    DuplicateShape { layer: String, shape: String },
}

impl RoomMapData {
    pub fn from_json_str(json: &str) -> Result<Self, MapError> {
        let mut deserializer = serde_json::Deserializer::from_str(json);
        let map: RoomMapData =
            serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
                let path = error.path().to_string();
                MapError::Decode {
                    path,
                    source: error.into_inner(),
                }
            })?;
        map.validate()?;
        Ok(map)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| MapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<(), MapError> {
        for layer in &self.layers {
            let expected = layer.columns as usize * layer.rows as usize;
            let actual = layer.tiles.len();
            if expected != actual {
                return Err(MapError::TileCountMismatch {
                    layer: layer.name.clone(),
                    expected,
                    actual,
                });
            }
        }
        for shape_layer in &self.shape_layers {
            for (index, shape) in shape_layer.shapes.iter().enumerate() {
                if shape_layer.shapes[..index]
                    .iter()
                    .any(|earlier| earlier.name == shape.name)
                {
                    return Err(MapError::DuplicateShape {
                        layer: shape_layer.name.clone(),
                        shape: shape.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Look up a named shape within a shape layer.
    pub fn shape(&self, layer: &str, name: &str) -> Option<&ShapeDef> {
        self.shape_layers
            .iter()
            .find(|shape_layer| shape_layer.name == layer)?
            .shapes
            .iter()
            .find(|shape| shape.name == name)
    }
}
