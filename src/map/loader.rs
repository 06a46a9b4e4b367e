use std::{
    collections::hash_map::DefaultHasher,
    fmt, fs,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info};
use serde::Serialize;

use super::{
    bitmap::ProvinceBitmap,
    countries::{load_countries, load_terrains, Country, Terrain},
    definitions::{load_adjacencies, load_definitions, Adjacency, ProvinceDefinition},
    items::ItemTable,
    provinces::{build_provinces, Province},
    shapes::{extract_shapes, find_x_crossings, ProvinceShape, XCrossing},
    states::{load_states, State},
    strategic::{load_strategic_regions, StrategicRegion},
    supply::{load_supply_areas, SupplyArea},
    warnings::Warning,
    CancelToken, MapError, MapSettings, WorldMapData,
};

/// The stages of the load pipeline, used for dependency reporting and the
/// scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StageKind {
    Bitmap,
    Definitions,
    Adjacencies,
    Terrains,
    Countries,
    Provinces,
    States,
    StrategicRegions,
    SupplyAreas,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Bitmap => write!(f, "bitmap"),
            StageKind::Definitions => write!(f, "definitions"),
            StageKind::Adjacencies => write!(f, "adjacencies"),
            StageKind::Terrains => write!(f, "terrains"),
            StageKind::Countries => write!(f, "countries"),
            StageKind::Provinces => write!(f, "provinces"),
            StageKind::States => write!(f, "states"),
            StageKind::StrategicRegions => write!(f, "strategic regions"),
            StageKind::SupplyAreas => write!(f, "supply areas"),
        }
    }
}

/// The declared dependency graph of the pipeline. Execution in [load]
/// follows a topological order of this graph; the order is validated once
/// per loader so a bad edit here fails loudly instead of deadlocking.
const STAGE_GRAPH: &[(StageKind, &[StageKind])] = &[
    (StageKind::Bitmap, &[]),
    (StageKind::Definitions, &[]),
    (StageKind::Adjacencies, &[]),
    (StageKind::Terrains, &[]),
    (StageKind::Countries, &[]),
    (
        StageKind::Provinces,
        &[
            StageKind::Bitmap,
            StageKind::Definitions,
            StageKind::Adjacencies,
            StageKind::Terrains,
        ],
    ),
    (StageKind::States, &[StageKind::Provinces]),
    (
        StageKind::StrategicRegions,
        &[StageKind::Provinces, StageKind::Terrains],
    ),
    (
        StageKind::SupplyAreas,
        &[StageKind::Provinces, StageKind::States],
    ),
];

/// Computes a topological order of [STAGE_GRAPH]. A cycle among the
/// declared dependencies is a hard error, not a hang.
fn topological_order() -> Result<Vec<StageKind>, MapError> {
    let mut order = Vec::with_capacity(STAGE_GRAPH.len());
    let mut placed: Vec<StageKind> = Vec::new();
    let mut remaining: Vec<&(StageKind, &[StageKind])> = STAGE_GRAPH.iter().collect();
    while !remaining.is_empty() {
        let ready: Vec<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, (_, deps))| deps.iter().all(|d| placed.contains(d)))
            .map(|(i, _)| i)
            .collect();
        if ready.is_empty() {
            return Err(MapError::DependencyCycle(remaining[0].0));
        }
        for i in ready.into_iter().rev() {
            let stage = remaining.remove(i).0;
            placed.push(stage);
            order.push(stage);
        }
    }
    Ok(order)
}

/// Which files a stage read during the last load. A caller can skip a
/// reload entirely when none of the reported files changed.
#[derive(Debug, Clone, Serialize)]
pub struct StageDependencies {
    pub stage: StageKind,
    pub files: Vec<PathBuf>,
}

/// Which parts of the snapshot were recomputed by a load pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UpdateSummary {
    pub provinces: bool,
    pub states: bool,
    pub strategic_regions: bool,
    pub supply_areas: bool,
    pub countries: bool,
    pub terrains: bool,
}

impl UpdateSummary {
    pub fn any(&self) -> bool {
        self.provinces
            || self.states
            || self.strategic_regions
            || self.supply_areas
            || self.countries
            || self.terrains
    }
}

/// The bitmap-derived intermediate: shapes plus the X-crossing scan.
struct ShapeData {
    width: u32,
    height: u32,
    shapes: Vec<ProvinceShape>,
    crossings: Vec<XCrossing>,
}

/// One memoized stage result, keyed by the hash of everything the stage
/// consumed (file contents for source stages, input stage hashes for
/// derived ones).
struct StageCache<T> {
    hash: u64,
    value: Arc<T>,
    warnings: Vec<Warning>,
}

fn stale<T>(slot: &Option<StageCache<T>>, hash: u64) -> bool {
    slot.as_ref().map(|c| c.hash != hash).unwrap_or(true)
}

#[derive(Default)]
struct SessionCache {
    shapes: Option<StageCache<ShapeData>>,
    definitions: Option<StageCache<Vec<ProvinceDefinition>>>,
    adjacencies: Option<StageCache<Vec<Adjacency>>>,
    terrains: Option<StageCache<Vec<Terrain>>>,
    countries: Option<StageCache<Vec<Country>>>,
    provinces: Option<StageCache<ItemTable<Province>>>,
    states: Option<StageCache<ItemTable<State>>>,
    strategic: Option<StageCache<ItemTable<StrategicRegion>>>,
    supply: Option<StageCache<ItemTable<SupplyArea>>>,
}

/// The input file set of one load pass.
struct Inputs {
    bitmap: PathBuf,
    definitions: PathBuf,
    adjacencies: Option<PathBuf>,
    terrains: Vec<PathBuf>,
    country_tags: Vec<PathBuf>,
    country_colors: Option<PathBuf>,
    states: Vec<PathBuf>,
    strategic: Vec<PathBuf>,
    supply: Vec<PathBuf>,
}

impl Inputs {
    fn gather(root: &Path) -> Result<Self, MapError> {
        let bitmap = root.join("map").join("provinces.bmp");
        if !bitmap.is_file() {
            return Err(MapError::MissingFile(bitmap));
        }
        let definitions = root.join("map").join("definition.csv");
        if !definitions.is_file() {
            return Err(MapError::MissingFile(definitions));
        }
        let adjacencies = Some(root.join("map").join("adjacencies.csv")).filter(|p| p.is_file());
        let country_colors =
            Some(root.join("common").join("countries").join("colors.txt")).filter(|p| p.is_file());
        Ok(Inputs {
            bitmap,
            definitions,
            adjacencies,
            terrains: list_txt_files(&root.join("common").join("terrain"))?,
            country_tags: list_txt_files(&root.join("common").join("country_tags"))?,
            country_colors,
            states: list_txt_files(&root.join("history").join("states"))?,
            strategic: list_txt_files(&root.join("map").join("strategicregions"))?,
            supply: list_txt_files(&root.join("map").join("supplyareas"))?,
        })
    }
}

/// Every .txt file of a directory, sorted by path so file order, and with
/// it entity order and warning order, is stable. A missing directory is
/// an empty contribution, not an error.
fn list_txt_files(dir: &Path) -> Result<Vec<PathBuf>, MapError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map(|e| e == "txt").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Content hash over a file set: paths and bytes both count, so a rename
/// invalidates just like an edit.
fn hash_files(paths: &[PathBuf]) -> Result<u64, MapError> {
    let mut hasher = DefaultHasher::new();
    for path in paths {
        path.hash(&mut hasher);
        fs::read(path)?.hash(&mut hasher);
    }
    Ok(hasher.finish())
}

fn combine_hashes(hashes: &[u64]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for hash in hashes {
        hash.hash(&mut hasher);
    }
    hasher.finish()
}

/// Loads a world map out of a game or mod directory and keeps a
/// per-session content-addressed cache so unchanged stages are not
/// recomputed on reload.
pub struct WorldMapLoader {
    root: PathBuf,
    settings: MapSettings,
    cancel: CancelToken,
    cache: SessionCache,
    last: Option<Arc<WorldMapData>>,
    dependencies: Vec<StageDependencies>,
}

impl WorldMapLoader {
    /// Creates a loader rooted at a game or mod directory. The stage
    /// graph is validated here, once.
    pub fn new<P: AsRef<Path>>(root: P, settings: MapSettings) -> Result<Self, MapError> {
        let order = topological_order()?;
        debug!("stage order: {:?}", order);
        Ok(WorldMapLoader {
            root: root.as_ref().to_owned(),
            settings,
            cancel: CancelToken::new(),
            cache: SessionCache::default(),
            last: None,
            dependencies: Vec::new(),
        })
    }

    /// A handle that cancels the CPU-bound part of an in-flight load from
    /// another thread. After a cancelled load the token stays set; call
    /// [CancelToken::reset] before retrying.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Which files each stage consumed during the last load.
    pub fn dependencies(&self) -> &[StageDependencies] {
        &self.dependencies
    }

    /// Runs one load pass and returns the immutable snapshot plus what
    /// changed compared to the previous pass. Unchanged stages are served
    /// from the session cache; if nothing changed at all the previous
    /// snapshot is returned as is.
    pub fn load(&mut self) -> Result<(Arc<WorldMapData>, UpdateSummary), MapError> {
        let inputs = Inputs::gather(&self.root)?;
        // source hashes; the bitmap bytes are kept since decoding wants them
        let bitmap_bytes = fs::read(&inputs.bitmap)?;
        let bitmap_hash = {
            let mut hasher = DefaultHasher::new();
            inputs.bitmap.hash(&mut hasher);
            bitmap_bytes.hash(&mut hasher);
            hasher.finish()
        };
        let definitions_hash = hash_files(std::slice::from_ref(&inputs.definitions))?;
        let adjacencies_hash = match &inputs.adjacencies {
            Some(path) => hash_files(std::slice::from_ref(path))?,
            None => 0,
        };
        let terrains_hash = hash_files(&inputs.terrains)?;
        let mut country_files = inputs.country_tags.clone();
        if let Some(colors) = &inputs.country_colors {
            country_files.push(colors.clone());
        }
        let countries_hash = hash_files(&country_files)?;
        let states_hash = hash_files(&inputs.states)?;
        let strategic_hash = hash_files(&inputs.strategic)?;
        let supply_hash = hash_files(&inputs.supply)?;

        // independent source stages; the pixel scans and the country
        // tables share no data, so they run side by side
        let shapes_dirty = stale(&self.cache.shapes, bitmap_hash);
        let terrains_dirty = stale(&self.cache.terrains, terrains_hash);
        let countries_dirty = stale(&self.cache.countries, countries_hash);
        let settings = &self.settings;
        let cancel = &self.cancel;
        let (shapes_refresh, aux_refresh) = rayon::join(
            || -> Result<Option<StageCache<ShapeData>>, MapError> {
                if !shapes_dirty {
                    return Ok(None);
                }
                info!("decoding province bitmap ({} bytes)", bitmap_bytes.len());
                let bitmap = ProvinceBitmap::decode(&bitmap_bytes, settings.row_order)?;
                let shapes = extract_shapes(&bitmap, cancel)?;
                let crossings = find_x_crossings(&bitmap);
                info!("found {} province shapes", shapes.len());
                Ok(Some(StageCache {
                    hash: bitmap_hash,
                    value: Arc::new(ShapeData {
                        width: bitmap.width(),
                        height: bitmap.height(),
                        shapes,
                        crossings,
                    }),
                    warnings: Vec::new(),
                }))
            },
            || {
                let terrains = if terrains_dirty {
                    let mut warnings = Vec::new();
                    let terrains = load_terrains(&inputs.terrains, &mut warnings);
                    Some(StageCache {
                        hash: terrains_hash,
                        value: Arc::new(terrains),
                        warnings,
                    })
                } else {
                    None
                };
                let countries = if countries_dirty {
                    let mut warnings = Vec::new();
                    let countries = load_countries(
                        &inputs.country_tags,
                        inputs.country_colors.as_ref(),
                        &mut warnings,
                    );
                    Some(StageCache {
                        hash: countries_hash,
                        value: Arc::new(countries),
                        warnings,
                    })
                } else {
                    None
                };
                (terrains, countries)
            },
        );
        if let Some(refreshed) = shapes_refresh? {
            self.cache.shapes = Some(refreshed);
        }
        let (terrains_refresh, countries_refresh) = aux_refresh;
        if let Some(refreshed) = terrains_refresh {
            self.cache.terrains = Some(refreshed);
        }
        if let Some(refreshed) = countries_refresh {
            self.cache.countries = Some(refreshed);
        }
        if stale(&self.cache.definitions, definitions_hash) {
            let mut warnings = Vec::new();
            let definitions = load_definitions(&inputs.definitions, &mut warnings)?;
            self.cache.definitions = Some(StageCache {
                hash: definitions_hash,
                value: Arc::new(definitions),
                warnings,
            });
        }
        if stale(&self.cache.adjacencies, adjacencies_hash) {
            let mut warnings = Vec::new();
            let adjacencies = match &inputs.adjacencies {
                Some(path) => load_adjacencies(path, &mut warnings)?,
                None => Vec::new(),
            };
            self.cache.adjacencies = Some(StageCache {
                hash: adjacencies_hash,
                value: Arc::new(adjacencies),
                warnings,
            });
        }
        // after the refresh above, every source slot holds a value whose
        // hash equals the freshly computed one, so derived stage keys can
        // be built from the local hashes directly
        let shape_data = self.cache.shapes.as_ref().unwrap().value.clone();
        let definitions = self.cache.definitions.as_ref().unwrap().value.clone();
        let adjacencies = self.cache.adjacencies.as_ref().unwrap().value.clone();
        let terrains_value = self.cache.terrains.as_ref().unwrap().value.clone();
        let map_width = shape_data.width as i32;

        let provinces_hash = combine_hashes(&[
            bitmap_hash,
            definitions_hash,
            adjacencies_hash,
            terrains_hash,
        ]);
        let provinces_dirty = stale(&self.cache.provinces, provinces_hash);
        if provinces_dirty {
            let mut warnings = Vec::new();
            let provinces = build_provinces(
                &shape_data.shapes,
                &shape_data.crossings,
                &definitions,
                &adjacencies,
                &terrains_value,
                shape_data.width,
                shape_data.height,
                settings,
                &mut warnings,
            )?;
            self.cache.provinces = Some(StageCache {
                hash: provinces_hash,
                value: Arc::new(provinces),
                warnings,
            });
        }
        let provinces = self.cache.provinces.as_ref().unwrap().value.clone();

        let states_input = combine_hashes(&[provinces_hash, states_hash]);
        let states_dirty = stale(&self.cache.states, states_input);
        if states_dirty {
            let mut warnings = Vec::new();
            let states = load_states(
                &inputs.states,
                &provinces,
                map_width,
                settings,
                &mut warnings,
            )?;
            self.cache.states = Some(StageCache {
                hash: states_input,
                value: Arc::new(states),
                warnings,
            });
        }
        let states = self.cache.states.as_ref().unwrap().value.clone();

        let strategic_input =
            combine_hashes(&[provinces_hash, terrains_hash, strategic_hash]);
        let supply_input = combine_hashes(&[provinces_hash, states_input, supply_hash]);
        let strategic_dirty = stale(&self.cache.strategic, strategic_input);
        let supply_dirty = stale(&self.cache.supply, supply_input);
        let (strategic_refresh, supply_refresh) = rayon::join(
            || -> Result<Option<StageCache<ItemTable<StrategicRegion>>>, MapError> {
                if !strategic_dirty {
                    return Ok(None);
                }
                let mut warnings = Vec::new();
                let regions = load_strategic_regions(
                    &inputs.strategic,
                    &provinces,
                    &terrains_value,
                    map_width,
                    settings,
                    &mut warnings,
                )?;
                Ok(Some(StageCache {
                    hash: strategic_input,
                    value: Arc::new(regions),
                    warnings,
                }))
            },
            || -> Result<Option<StageCache<ItemTable<SupplyArea>>>, MapError> {
                if !supply_dirty {
                    return Ok(None);
                }
                let mut warnings = Vec::new();
                let areas = load_supply_areas(
                    &inputs.supply,
                    &states,
                    &provinces,
                    map_width,
                    settings,
                    &mut warnings,
                )?;
                Ok(Some(StageCache {
                    hash: supply_input,
                    value: Arc::new(areas),
                    warnings,
                }))
            },
        );
        if let Some(refreshed) = strategic_refresh? {
            self.cache.strategic = Some(refreshed);
        }
        if let Some(refreshed) = supply_refresh? {
            self.cache.supply = Some(refreshed);
        }

        let summary = UpdateSummary {
            provinces: provinces_dirty,
            states: states_dirty,
            strategic_regions: strategic_dirty,
            supply_areas: supply_dirty,
            countries: countries_dirty,
            terrains: terrains_dirty,
        };
        self.record_dependencies(&inputs);
        if !summary.any() {
            if let Some(last) = &self.last {
                debug!("no inputs changed, serving previous snapshot");
                return Ok((last.clone(), summary));
            }
        }
        let cache = &self.cache;
        let mut warnings = Vec::new();
        for stage_warnings in [
            cache.definitions.as_ref().map(|c| &c.warnings),
            cache.adjacencies.as_ref().map(|c| &c.warnings),
            cache.terrains.as_ref().map(|c| &c.warnings),
            cache.countries.as_ref().map(|c| &c.warnings),
            cache.provinces.as_ref().map(|c| &c.warnings),
            cache.states.as_ref().map(|c| &c.warnings),
            cache.strategic.as_ref().map(|c| &c.warnings),
            cache.supply.as_ref().map(|c| &c.warnings),
        ]
        .into_iter()
        .flatten()
        {
            warnings.extend(stage_warnings.iter().cloned());
        }
        let data = Arc::new(WorldMapData {
            width: shape_data.width,
            height: shape_data.height,
            provinces: cache.provinces.as_ref().unwrap().value.clone(),
            states: cache.states.as_ref().unwrap().value.clone(),
            strategic_regions: cache.strategic.as_ref().unwrap().value.clone(),
            supply_areas: cache.supply.as_ref().unwrap().value.clone(),
            countries: cache.countries.as_ref().unwrap().value.clone(),
            terrains: cache.terrains.as_ref().unwrap().value.clone(),
            warnings,
        });
        self.last = Some(data.clone());
        Ok((data, summary))
    }

    fn record_dependencies(&mut self, inputs: &Inputs) {
        let bitmap_files = vec![inputs.bitmap.clone()];
        let definition_files = vec![inputs.definitions.clone()];
        let adjacency_files: Vec<PathBuf> = inputs.adjacencies.iter().cloned().collect();
        let mut country_files = inputs.country_tags.clone();
        country_files.extend(inputs.country_colors.iter().cloned());
        let mut province_files = bitmap_files.clone();
        province_files.extend(definition_files.iter().cloned());
        province_files.extend(adjacency_files.iter().cloned());
        province_files.extend(inputs.terrains.iter().cloned());
        let mut state_files = province_files.clone();
        state_files.extend(inputs.states.iter().cloned());
        let mut strategic_files = province_files.clone();
        strategic_files.extend(inputs.strategic.iter().cloned());
        let mut supply_files = state_files.clone();
        supply_files.extend(inputs.supply.iter().cloned());
        self.dependencies = vec![
            StageDependencies {
                stage: StageKind::Bitmap,
                files: bitmap_files,
            },
            StageDependencies {
                stage: StageKind::Definitions,
                files: definition_files,
            },
            StageDependencies {
                stage: StageKind::Adjacencies,
                files: adjacency_files,
            },
            StageDependencies {
                stage: StageKind::Terrains,
                files: inputs.terrains.clone(),
            },
            StageDependencies {
                stage: StageKind::Countries,
                files: country_files,
            },
            StageDependencies {
                stage: StageKind::Provinces,
                files: province_files,
            },
            StageDependencies {
                stage: StageKind::States,
                files: state_files,
            },
            StageDependencies {
                stage: StageKind::StrategicRegions,
                files: strategic_files,
            },
            StageDependencies {
                stage: StageKind::SupplyAreas,
                files: supply_files,
            },
        ];
    }
}
