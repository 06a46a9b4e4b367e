use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::warn;
use rayon::prelude::*;
use serde::Serialize;

use super::{
    super::{
        parser::{parse_script_file, ScriptMap},
        types::{GameString, HashMap, MapId},
    },
    countries::Terrain,
    definitions::missing_reference_warning,
    items::{sort_items, ItemTable, MapItem, MissingIdPolicy},
    provinces::Province,
    region::{merge_regions, Region},
    warnings::{EntityKind, Warning, WarningSource},
    MapError, MapSettings,
};

/// A named group of provinces used for regional planning, independent of
/// the state grouping. Unlike states these cover sea provinces too.
#[derive(Debug, Clone, Serialize)]
pub struct StrategicRegion {
    pub id: MapId,
    pub name: GameString,
    pub provinces: Vec<MapId>,
    pub naval_terrain: Option<GameString>,
    pub region: Region,
    pub file: PathBuf,
}

impl MapItem for StrategicRegion {
    const KIND: EntityKind = EntityKind::StrategicRegion;

    fn id(&self) -> MapId {
        self.id
    }

    fn set_id(&mut self, id: MapId) {
        self.id = id;
    }

    fn file(&self) -> Option<&Path> {
        Some(&self.file)
    }
}

fn parse_strategic_region(
    block: &ScriptMap,
    path: &Path,
    warnings: &mut Vec<Warning>,
) -> StrategicRegion {
    let id = block.get_id("id").unwrap_or(-1);
    let name = match block.get_string("name") {
        Ok(name) => name,
        Err(_) => {
            warnings.push(
                Warning::new(format!(
                    "a strategic region in {} has no name",
                    path.display()
                ))
                .file(path),
            );
            Arc::from("")
        }
    };
    let naval_terrain = block.get("naval_terrain").and_then(|v| v.as_string().ok());
    let mut provinces = Vec::new();
    if let Some(Ok(obj)) = block.get("provinces").map(|p| p.as_object()) {
        if let Ok(list) = obj.as_array() {
            for value in list {
                match value.as_id() {
                    Ok(pid) => provinces.push(pid),
                    Err(e) => warnings.push(
                        Warning::new(format!(
                            "strategic region {} has an invalid province reference: {}",
                            id, e
                        ))
                        .source(WarningSource::StrategicRegion(id))
                        .file(path),
                    ),
                }
            }
        }
    }
    StrategicRegion {
        id,
        name,
        provinces,
        naval_terrain,
        region: Region::EMPTY,
        file: path.to_owned(),
    }
}

/// Loads every strategic region file and resolves the province grouping.
/// Every province, land or sea, belongs to exactly one strategic region;
/// deviations in either direction are warnings.
pub fn load_strategic_regions(
    files: &[PathBuf],
    provinces: &ItemTable<Province>,
    terrains: &[Terrain],
    map_width: i32,
    settings: &MapSettings,
    warnings: &mut Vec<Warning>,
) -> Result<ItemTable<StrategicRegion>, MapError> {
    let parsed: Vec<(Vec<StrategicRegion>, Vec<Warning>)> = files
        .par_iter()
        .map(|path| {
            let mut local = Vec::new();
            match parse_script_file(path) {
                Ok(root) => {
                    let regions = root
                        .get_blocks("strategic_region")
                        .into_iter()
                        .map(|block| parse_strategic_region(block, path, &mut local))
                        .collect();
                    (regions, local)
                }
                Err(e) => {
                    warn!("skipping strategic region file {}: {}", path.display(), e);
                    local.push(
                        Warning::new(format!("strategic region file failed to parse: {}", e))
                            .file(path),
                    );
                    (Vec::new(), local)
                }
            }
        })
        .collect();
    let mut regions = Vec::new();
    for (mut file_regions, mut file_warnings) in parsed {
        regions.append(&mut file_regions);
        warnings.append(&mut file_warnings);
    }
    let mut table = sort_items(
        regions,
        settings.max_strategic_region_id,
        MissingIdPolicy::Conflict,
        warnings,
    )?;
    let known_terrains: std::collections::HashSet<&str> =
        terrains.iter().map(|t| t.name.as_ref()).collect();
    let mut claimed: HashMap<MapId, MapId> = HashMap::default();
    let ids: Vec<MapId> = table.ids().filter(|id| *id >= 0).collect();
    for id in ids {
        let (wanted, file, naval_terrain) = match table.get(id) {
            Some(region) => (
                region.provinces.clone(),
                region.file.clone(),
                region.naval_terrain.clone(),
            ),
            None => continue,
        };
        if let Some(terrain) = naval_terrain {
            if !known_terrains.is_empty() && !known_terrains.contains(terrain.as_ref()) {
                warnings.push(
                    Warning::new(format!(
                        "strategic region {} uses naval terrain '{}', which is not defined",
                        id, terrain
                    ))
                    .source(WarningSource::StrategicRegion(id))
                    .source(WarningSource::Terrain(terrain.clone()))
                    .file(file.clone()),
                );
            }
        }
        let mut kept = Vec::new();
        for pid in wanted {
            if provinces.get(pid).is_none() {
                warnings.push(
                    missing_reference_warning(
                        EntityKind::StrategicRegion,
                        id,
                        EntityKind::Province,
                        pid,
                    )
                    .file(file.clone()),
                );
                continue;
            }
            match claimed.get(&pid) {
                Some(&first) => warnings.push(
                    Warning::new(format!(
                        "province {} is part of both strategic region {} and strategic region {}; it stays in strategic region {}",
                        pid, first, id, first
                    ))
                    .source(WarningSource::Province(pid))
                    .source(WarningSource::StrategicRegion(first))
                    .source(WarningSource::StrategicRegion(id))
                    .file(file.clone()),
                ),
                None => {
                    claimed.insert(pid, id);
                    kept.push(pid);
                }
            }
        }
        if kept.is_empty() {
            warnings.push(
                Warning::new(format!("strategic region {} has no valid provinces", id))
                    .source(WarningSource::StrategicRegion(id))
                    .file(file.clone()),
            );
        }
        let region = merge_regions(
            kept.iter().filter_map(|&pid| provinces.get(pid)).map(|p| p.region),
            map_width,
        );
        if let Some(strategic) = table.get_mut(id) {
            strategic.provinces = kept;
            strategic.region = region;
        }
    }
    if !files.is_empty() {
        for province in provinces.iter_valid() {
            if province.id > 0 && !claimed.contains_key(&province.id) {
                warnings.push(
                    Warning::new(format!(
                        "province {} is not part of any strategic region",
                        province.id
                    ))
                    .source(WarningSource::Province(province.id)),
                );
            }
        }
    }
    Ok(table)
}
