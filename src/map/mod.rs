//! The world map model: province bitmap segmentation, definition and
//! adjacency reconciliation, state / strategic region / supply area
//! grouping, and the loader that assembles and validates all of it.

use std::{
    fmt, io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use derive_more::{Display, From};
use serde::Serialize;

use super::types::MapId;

/// A submodule decoding the province bitmap into a pixel color grid.
mod bitmap;
pub use bitmap::{BitmapError, ProvinceBitmap, RowOrder, TILE_SIZE};

/// A submodule with the shared geometry primitives and the wraparound
/// aware region aggregation.
mod region;
pub use region::{merge_regions, FPoint, Point, Region, Zone};

/// A submodule turning the pixel grid into per-color shapes with cover
/// zones and traced border polylines.
mod shapes;
pub use shapes::{ProvinceShape, RawEdge, XCrossing};

/// A submodule with the generic id conflict resolution every entity
/// loader runs through.
mod items;
pub use items::{sort_items, ItemTable, MapItem, MissingIdPolicy};

/// A submodule with the structured warning types of the warning feed.
mod warnings;
pub use warnings::{EntityKind, Warning, WarningSource};

/// A submodule reading the definition and adjacency tables.
mod definitions;
pub use definitions::{Adjacency, ProvinceDefinition, ProvinceKind};

/// A submodule reconciling definitions with bitmap shapes into provinces.
mod provinces;
pub use provinces::{Province, ProvinceEdge};

mod states;
pub use states::{State, VictoryPoint};

mod strategic;
pub use strategic::StrategicRegion;

mod supply;
pub use supply::SupplyArea;

mod countries;
pub use countries::{Country, Terrain};

/// A submodule with the loader orchestrating the stage pipeline.
mod loader;
pub use loader::{StageDependencies, StageKind, UpdateSummary, WorldMapLoader};

/// A cooperative cancellation flag shared between the loader and the
/// CPU-bound pixel scans. Cloning hands out another handle to the same
/// flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// The load was cancelled through a [CancelToken]; partial output has
/// been discarded.
#[derive(Debug)]
pub struct LoadCancelled;

impl fmt::Display for LoadCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the load was cancelled")
    }
}

impl std::error::Error for LoadCancelled {}

/// Tunables of a load pass. The ceilings bound the id-indexed arrays;
/// the row order covers bitmaps whose header flag disagrees with their
/// actual layout.
#[derive(Debug, Clone, Serialize)]
pub struct MapSettings {
    pub max_province_id: MapId,
    pub max_state_id: MapId,
    pub max_strategic_region_id: MapId,
    pub max_supply_area_id: MapId,
    pub row_order: RowOrder,
}

impl Default for MapSettings {
    fn default() -> Self {
        MapSettings {
            max_province_id: 200_000,
            max_state_id: 10_000,
            max_strategic_region_id: 5_000,
            max_supply_area_id: 5_000,
            row_order: RowOrder::Auto,
        }
    }
}

/// An error that aborts the whole load. Data-quality problems never end
/// up here; they are collected as [Warning]s instead.
#[derive(Debug, From, Display)]
pub enum MapError {
    Io(io::Error),
    /// A required input file is absent
    #[from(ignore)]
    #[display("a required file {} is missing", _0.display())]
    MissingFile(PathBuf),
    #[display("error occurred while decoding the province bitmap: {_0}")]
    Bitmap(BitmapError),
    /// One of the delimiter-separated tables could not be read at all
    #[display("error occurred while reading a table: {_0}")]
    Table(csv::Error),
    /// An entity id exceeds the configured ceiling
    #[display("{kind} id {id} exceeds the configured ceiling of {ceiling}")]
    IdCeiling {
        kind: EntityKind,
        id: MapId,
        ceiling: MapId,
    },
    /// The declared stage graph contains a cycle
    #[from(ignore)]
    #[display("the {_0} stage participates in a dependency cycle")]
    DependencyCycle(StageKind),
    #[display("the load was cancelled")]
    Cancelled,
}

impl From<LoadCancelled> for MapError {
    fn from(_: LoadCancelled) -> Self {
        MapError::Cancelled
    }
}

impl std::error::Error for MapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MapError::Io(e) => Some(e),
            MapError::Bitmap(e) => Some(e),
            MapError::Table(e) => Some(e),
            _ => None,
        }
    }
}

/// The immutable result of one load pass: every entity table plus the
/// concatenated warning feed. Reloading produces a new snapshot; nothing
/// in here mutates after assembly.
#[derive(Serialize)]
pub struct WorldMapData {
    pub width: u32,
    pub height: u32,
    pub provinces: Arc<ItemTable<Province>>,
    pub states: Arc<ItemTable<State>>,
    pub strategic_regions: Arc<ItemTable<StrategicRegion>>,
    pub supply_areas: Arc<ItemTable<SupplyArea>>,
    pub countries: Arc<Vec<Country>>,
    pub terrains: Arc<Vec<Terrain>>,
    pub warnings: Vec<Warning>,
}
