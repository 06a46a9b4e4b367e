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
    definitions::{missing_reference_warning, ProvinceKind},
    items::{sort_items, ItemTable, MapItem, MissingIdPolicy},
    provinces::Province,
    region::{merge_regions, Region},
    warnings::{EntityKind, Warning, WarningSource},
    MapError, MapSettings,
};

/// A per-province victory point award inside a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VictoryPoint {
    pub province: MapId,
    pub value: u32,
}

/// A named group of land provinces sharing ownership and economy.
#[derive(Debug, Clone, Serialize)]
pub struct State {
    pub id: MapId,
    pub name: GameString,
    pub manpower: i64,
    pub category: GameString,
    pub owner: Option<GameString>,
    pub provinces: Vec<MapId>,
    pub cores: Vec<GameString>,
    pub victory_points: Vec<VictoryPoint>,
    pub resources: Vec<(GameString, f64)>,
    pub region: Region,
    pub file: PathBuf,
}

impl MapItem for State {
    const KIND: EntityKind = EntityKind::State;

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

/// Reads one `state = { ... }` block. Field problems cost a warning, not
/// the state; a missing id is left for [sort_items] to park.
fn parse_state(block: &ScriptMap, path: &Path, warnings: &mut Vec<Warning>) -> State {
    let id = block.get_id("id").unwrap_or(-1);
    let name = match block.get_string("name") {
        Ok(name) => name,
        Err(_) => {
            warnings.push(
                Warning::new(format!("a state in {} has no name", path.display())).file(path),
            );
            Arc::from("")
        }
    };
    let manpower = match block.get("manpower") {
        Some(value) => value.as_integer().unwrap_or_else(|e| {
            warnings.push(
                Warning::new(format!("state {} has an invalid manpower value: {}", id, e))
                    .source(WarningSource::State(id))
                    .file(path),
            );
            0
        }),
        None => 0,
    };
    let category = block.get_string("state_category").unwrap_or_else(|_| Arc::from(""));
    let history = block
        .get("history")
        .and_then(|h| h.as_object().ok())
        .and_then(|o| o.as_map().ok());
    let owner = history.and_then(|h| h.get_string("owner").ok());
    let cores = history
        .map(|h| h.get_strings("add_core_of"))
        .unwrap_or_default();
    let mut victory_points = Vec::new();
    if let Some(history) = history {
        for vp in history.get_arrays("victory_points") {
            let parsed = if vp.len() == 2 {
                vp[0].as_id().ok().zip(vp[1].as_integer().ok())
            } else {
                None
            };
            match parsed {
                Some((province, value)) => victory_points.push(VictoryPoint {
                    province,
                    value: value.max(0) as u32,
                }),
                None => warnings.push(
                    Warning::new(format!(
                        "state {} has a malformed victory_points block",
                        id
                    ))
                    .source(WarningSource::State(id))
                    .file(path),
                ),
            }
        }
    }
    let mut resources: Vec<(GameString, f64)> = Vec::new();
    if let Some(Ok(obj)) = block.get("resources").map(|r| r.as_object()) {
        if let Ok(map) = obj.as_map() {
            for (key, value) in map {
                match value.as_number() {
                    Ok(amount) => resources.push((Arc::from(key.as_str()), amount)),
                    Err(_) => warnings.push(
                        Warning::new(format!(
                            "state {} has an invalid amount of resource '{}'",
                            id, key
                        ))
                        .source(WarningSource::State(id))
                        .file(path),
                    ),
                }
            }
            // key-value storage iterates in arbitrary order
            resources.sort_by(|a, b| a.0.cmp(&b.0));
        }
    }
    let mut provinces = Vec::new();
    if let Some(Ok(list)) = block.get("provinces").map(|p| p.as_object()) {
        if let Ok(list) = list.as_array() {
            for value in list {
                match value.as_id() {
                    Ok(pid) => provinces.push(pid),
                    Err(e) => warnings.push(
                        Warning::new(format!(
                            "state {} has an invalid province reference: {}",
                            id, e
                        ))
                        .source(WarningSource::State(id))
                        .file(path),
                    ),
                }
            }
        }
    }
    State {
        id,
        name,
        manpower,
        category,
        owner,
        provinces,
        cores,
        victory_points,
        resources,
        region: Region::EMPTY,
        file: path.to_owned(),
    }
}

/// Loads every state file, resolves ids, claims provinces (first claimant
/// wins) and aggregates the per-state regions.
pub fn load_states(
    files: &[PathBuf],
    provinces: &ItemTable<Province>,
    map_width: i32,
    settings: &MapSettings,
    warnings: &mut Vec<Warning>,
) -> Result<ItemTable<State>, MapError> {
    let parsed: Vec<(Vec<State>, Vec<Warning>)> = files
        .par_iter()
        .map(|path| {
            let mut local = Vec::new();
            match parse_script_file(path) {
                Ok(root) => {
                    let states = root
                        .get_blocks("state")
                        .into_iter()
                        .map(|block| parse_state(block, path, &mut local))
                        .collect();
                    (states, local)
                }
                Err(e) => {
                    warn!("skipping state file {}: {}", path.display(), e);
                    local.push(
                        Warning::new(format!("state file failed to parse: {}", e)).file(path),
                    );
                    (Vec::new(), local)
                }
            }
        })
        .collect();
    let mut states = Vec::new();
    for (mut file_states, mut file_warnings) in parsed {
        states.append(&mut file_states);
        warnings.append(&mut file_warnings);
    }
    let mut table = sort_items(
        states,
        settings.max_state_id,
        MissingIdPolicy::Conflict,
        warnings,
    )?;
    let mut claimed: HashMap<MapId, MapId> = HashMap::default();
    let ids: Vec<MapId> = table.ids().filter(|id| *id >= 0).collect();
    for id in ids {
        let (wanted, file, victory_points) = match table.get(id) {
            Some(state) => (
                state.provinces.clone(),
                state.file.clone(),
                state.victory_points.clone(),
            ),
            None => continue,
        };
        let mut kept = Vec::new();
        for pid in wanted {
            if provinces.get(pid).is_none() {
                warnings.push(
                    missing_reference_warning(
                        EntityKind::State,
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
                        "province {} is part of both state {} and state {}; it stays in state {}",
                        pid, first, id, first
                    ))
                    .source(WarningSource::Province(pid))
                    .source(WarningSource::State(first))
                    .source(WarningSource::State(id))
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
                Warning::new(format!("state {} has no valid provinces", id))
                    .source(WarningSource::State(id))
                    .file(file.clone()),
            );
        }
        for vp in &victory_points {
            if !kept.contains(&vp.province) {
                warnings.push(
                    Warning::new(format!(
                        "state {} awards victory points to province {}, which is not part of it",
                        id, vp.province
                    ))
                    .source(WarningSource::State(id))
                    .source(WarningSource::Province(vp.province))
                    .file(file.clone()),
                );
            }
        }
        let region = merge_regions(
            kept.iter().filter_map(|&pid| provinces.get(pid)).map(|p| p.region),
            map_width,
        );
        if let Some(state) = table.get_mut(id) {
            state.provinces = kept;
            state.region = region;
        }
    }
    // a mod without state files is not claiming every land province is
    // orphaned
    if !files.is_empty() {
        for province in provinces.iter_valid() {
            if province.id > 0
                && province.kind == ProvinceKind::Land
                && !claimed.contains_key(&province.id)
            {
                warnings.push(
                    Warning::new(format!(
                        "province {} is not part of any state",
                        province.id
                    ))
                    .source(WarningSource::Province(province.id)),
                );
            }
        }
    }
    Ok(table)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::map::{
        definitions::ProvinceDefinition,
        region::Zone,
        shapes::{ProvinceShape, RawEdge},
    };
    use std::fs;
    use tempfile::TempDir;

    /// A provinces table with `count` unit provinces in a row, each
    /// adjacent to the next. Shared by the sibling loader tests.
    pub(crate) fn province_fixture(count: MapId, kind: ProvinceKind) -> ItemTable<Province> {
        let shapes: Vec<ProvinceShape> = (1..=count)
            .map(|i| {
                let mut edges = Vec::new();
                if i > 1 {
                    edges.push(RawEdge {
                        to_color: Some(i as u32 - 1),
                        paths: vec![vec![]],
                    });
                }
                if i < count {
                    edges.push(RawEdge {
                        to_color: Some(i as u32 + 1),
                        paths: vec![vec![]],
                    });
                }
                ProvinceShape {
                    color: i as u32,
                    region: crate::map::region::Region::from(Zone::new(i * 4, 0, 4, 4)),
                    cover_zones: vec![Zone::new(i * 4, 0, 4, 4)],
                    edges,
                }
            })
            .collect();
        let definitions: Vec<ProvinceDefinition> = (1..=count)
            .map(|i| ProvinceDefinition {
                id: i,
                color: i as u32,
                kind,
                coastal: false,
                terrain: Arc::from(""),
                continent: 0,
            })
            .collect();
        let mut warnings = Vec::new();
        crate::map::provinces::build_provinces(
            &shapes,
            &[],
            &definitions,
            &[],
            &[],
            1024,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap()
    }

    fn write_state_files(files: &[&str]) -> (TempDir, Vec<PathBuf>) {
        let dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for (i, contents) in files.iter().enumerate() {
            let path = dir.path().join(format!("{}.txt", i));
            fs::write(&path, contents).unwrap();
            paths.push(path);
        }
        (dir, paths)
    }

    #[test]
    fn test_load_states() {
        let provinces = province_fixture(4, ProvinceKind::Land);
        let (_dir, files) = write_state_files(&[
            "state={
                id=1
                name=\"STATE_1\"
                manpower=1200
                state_category=town
                resources={ steel=8 aluminium=2 }
                history={
                    owner=GER
                    add_core_of=GER
                    add_core_of=POL
                    victory_points={ 1 5 }
                }
                provinces={ 1 2 }
            }",
            "state={
                id=2
                name=\"STATE_2\"
                provinces={ 3 4 }
            }",
        ]);
        let mut warnings = Vec::new();
        let states = load_states(
            &files,
            &provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(states.count(), 3);
        assert_eq!(states.bad_count(), 0);
        let one = states.get(1).unwrap();
        assert_eq!(one.name.as_ref(), "STATE_1");
        assert_eq!(one.manpower, 1200);
        assert_eq!(one.category.as_ref(), "town");
        assert_eq!(one.owner.as_deref(), Some("GER"));
        assert_eq!(one.cores.len(), 2);
        assert_eq!(
            one.victory_points,
            vec![VictoryPoint {
                province: 1,
                value: 5
            }]
        );
        // resources come out sorted by name
        assert_eq!(one.resources[0].0.as_ref(), "aluminium");
        assert_eq!(one.resources[1].1, 8.0);
        assert_eq!(one.provinces, vec![1, 2]);
        assert!(one.region.mass > 0);
    }

    #[test]
    fn test_bad_file_skips_only_itself() {
        let provinces = province_fixture(2, ProvinceKind::Land);
        let (_dir, files) = write_state_files(&[
            "state={ id=1 name=\"A\" provinces={ 1 2 } }",
            "state={ id=2 name=\"B\" provinces={ this is { not balanced",
        ]);
        let mut warnings = Vec::new();
        let states = load_states(
            &files,
            &provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap();
        assert!(states.get(1).is_some());
        assert!(states.get(2).is_none());
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("failed to parse")));
    }

    #[test]
    fn test_province_claim_conflict() {
        let provinces = province_fixture(2, ProvinceKind::Land);
        let (_dir, files) = write_state_files(&[
            "state={ id=1 name=\"A\" provinces={ 1 2 } }
             state={ id=2 name=\"B\" provinces={ 2 } }",
        ]);
        let mut warnings = Vec::new();
        let states = load_states(
            &files,
            &provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap();
        // first claimant wins; the duplicate claim is dropped with a warning
        assert_eq!(states.get(1).unwrap().provinces, vec![1, 2]);
        assert!(states.get(2).unwrap().provinces.is_empty());
        assert!(warnings.iter().any(|w| w.text().contains("part of both")));
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("state 2 has no valid provinces")));
    }

    #[test]
    fn test_missing_province_reference() {
        let provinces = province_fixture(1, ProvinceKind::Land);
        let (_dir, files) =
            write_state_files(&["state={ id=1 name=\"A\" provinces={ 1 42 } }"]);
        let mut warnings = Vec::new();
        let states = load_states(
            &files,
            &provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap();
        assert_eq!(states.get(1).unwrap().provinces, vec![1]);
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("province 42, which does not exist")));
    }

    #[test]
    fn test_orphan_land_province() {
        let provinces = province_fixture(3, ProvinceKind::Land);
        let (_dir, files) =
            write_state_files(&["state={ id=1 name=\"A\" provinces={ 1 2 } }"]);
        let mut warnings = Vec::new();
        load_states(
            &files,
            &provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("province 3 is not part of any state")));
    }

    #[test]
    fn test_sea_provinces_are_not_orphans() {
        let provinces = province_fixture(2, ProvinceKind::Sea);
        let (_dir, files) = write_state_files(&["state={ id=1 name=\"A\" provinces={ } }"]);
        let mut warnings = Vec::new();
        load_states(
            &files,
            &provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap();
        assert!(!warnings
            .iter()
            .any(|w| w.text().contains("not part of any state")));
    }

    #[test]
    fn test_no_state_files_no_orphan_warnings() {
        let provinces = province_fixture(2, ProvinceKind::Land);
        let mut warnings = Vec::new();
        let states = load_states(&[], &provinces, 1024, &MapSettings::default(), &mut warnings)
            .unwrap();
        assert_eq!(states.count(), 1);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_victory_point_outside_state() {
        let provinces = province_fixture(2, ProvinceKind::Land);
        let (_dir, files) = write_state_files(&[
            "state={ id=1 name=\"A\" history={ victory_points={ 2 3 } } provinces={ 1 } }",
        ]);
        let mut warnings = Vec::new();
        load_states(
            &files,
            &provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("victory points")));
    }
}
