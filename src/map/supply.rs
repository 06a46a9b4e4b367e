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
    definitions::missing_reference_warning,
    items::{sort_items, ItemTable, MapItem, MissingIdPolicy},
    provinces::Province,
    region::{merge_regions, Region},
    states::State,
    warnings::{EntityKind, Warning, WarningSource},
    MapError, MapSettings,
};

/// A named group of states used for logistics. Unlike the other
/// groupings this one has to be internally contiguous over the province
/// adjacency graph.
#[derive(Debug, Clone, Serialize)]
pub struct SupplyArea {
    pub id: MapId,
    pub name: GameString,
    pub value: f64,
    pub states: Vec<MapId>,
    pub region: Region,
    pub file: PathBuf,
}

impl MapItem for SupplyArea {
    const KIND: EntityKind = EntityKind::SupplyArea;

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

fn parse_supply_area(block: &ScriptMap, path: &Path, warnings: &mut Vec<Warning>) -> SupplyArea {
    let id = block.get_id("id").unwrap_or(-1);
    let name = match block.get_string("name") {
        Ok(name) => name,
        Err(_) => {
            warnings.push(
                Warning::new(format!("a supply area in {} has no name", path.display()))
                    .file(path),
            );
            Arc::from("")
        }
    };
    let value = match block.get("value") {
        Some(v) => v.as_number().unwrap_or_else(|e| {
            warnings.push(
                Warning::new(format!("supply area {} has an invalid value: {}", id, e))
                    .source(WarningSource::SupplyArea(id))
                    .file(path),
            );
            0.0
        }),
        None => 0.0,
    };
    let mut states = Vec::new();
    if let Some(Ok(obj)) = block.get("states").map(|s| s.as_object()) {
        if let Ok(list) = obj.as_array() {
            for value in list {
                match value.as_id() {
                    Ok(sid) => states.push(sid),
                    Err(e) => warnings.push(
                        Warning::new(format!(
                            "supply area {} has an invalid state reference: {}",
                            id, e
                        ))
                        .source(WarningSource::SupplyArea(id))
                        .file(path),
                    ),
                }
            }
        }
    }
    SupplyArea {
        id,
        name,
        value,
        states,
        region: Region::EMPTY,
        file: path.to_owned(),
    }
}

/// Loads every supply area file, resolves the state grouping and checks
/// each area for contiguity. A torn area is a warning; the data is still
/// returned.
pub fn load_supply_areas(
    files: &[PathBuf],
    states: &ItemTable<State>,
    provinces: &ItemTable<Province>,
    map_width: i32,
    settings: &MapSettings,
    warnings: &mut Vec<Warning>,
) -> Result<ItemTable<SupplyArea>, MapError> {
    let parsed: Vec<(Vec<SupplyArea>, Vec<Warning>)> = files
        .par_iter()
        .map(|path| {
            let mut local = Vec::new();
            match parse_script_file(path) {
                Ok(root) => {
                    let areas = root
                        .get_blocks("supply_area")
                        .into_iter()
                        .map(|block| parse_supply_area(block, path, &mut local))
                        .collect();
                    (areas, local)
                }
                Err(e) => {
                    warn!("skipping supply area file {}: {}", path.display(), e);
                    local.push(
                        Warning::new(format!("supply area file failed to parse: {}", e))
                            .file(path),
                    );
                    (Vec::new(), local)
                }
            }
        })
        .collect();
    let mut areas = Vec::new();
    for (mut file_areas, mut file_warnings) in parsed {
        areas.append(&mut file_areas);
        warnings.append(&mut file_warnings);
    }
    let mut table = sort_items(
        areas,
        settings.max_supply_area_id,
        MissingIdPolicy::Conflict,
        warnings,
    )?;
    let mut claimed: HashMap<MapId, MapId> = HashMap::default();
    let ids: Vec<MapId> = table.ids().filter(|id| *id >= 0).collect();
    for id in ids {
        let (wanted, file) = match table.get(id) {
            Some(area) => (area.states.clone(), area.file.clone()),
            None => continue,
        };
        let mut kept = Vec::new();
        for sid in wanted {
            if states.get(sid).is_none() {
                warnings.push(
                    missing_reference_warning(
                        EntityKind::SupplyArea,
                        id,
                        EntityKind::State,
                        sid,
                    )
                    .file(file.clone()),
                );
                continue;
            }
            match claimed.get(&sid) {
                Some(&first) => warnings.push(
                    Warning::new(format!(
                        "state {} is part of both supply area {} and supply area {}; it stays in supply area {}",
                        sid, first, id, first
                    ))
                    .source(WarningSource::State(sid))
                    .source(WarningSource::SupplyArea(first))
                    .source(WarningSource::SupplyArea(id))
                    .file(file.clone()),
                ),
                None => {
                    claimed.insert(sid, id);
                    kept.push(sid);
                }
            }
        }
        if kept.is_empty() {
            warnings.push(
                Warning::new(format!("supply area {} has no valid states", id))
                    .source(WarningSource::SupplyArea(id))
                    .file(file.clone()),
            );
        }
        if let Some(warning) = check_contiguity(id, &kept, states, provinces) {
            warnings.push(warning.file(file.clone()));
        }
        let region = merge_regions(
            kept.iter().filter_map(|&sid| states.get(sid)).map(|s| s.region),
            map_width,
        );
        if let Some(area) = table.get_mut(id) {
            area.states = kept;
            area.region = region;
        }
    }
    if !files.is_empty() {
        for state in states.iter_valid() {
            if state.id > 0 && !claimed.contains_key(&state.id) {
                warnings.push(
                    Warning::new(format!(
                        "state {} is not part of any supply area",
                        state.id
                    ))
                    .source(WarningSource::State(state.id)),
                );
            }
        }
    }
    Ok(table)
}

/// Verifies that the member states form one connected component over the
/// province graph. Two states touch when any province of one has a
/// non-impassable edge to any province of the other. On failure the
/// warning names one unreached and one reached state as witnesses.
fn check_contiguity(
    area_id: MapId,
    members: &[MapId],
    states: &ItemTable<State>,
    provinces: &ItemTable<Province>,
) -> Option<Warning> {
    if members.len() <= 1 {
        return None;
    }
    let member_provinces: Vec<Vec<MapId>> = members
        .iter()
        .map(|&sid| {
            states
                .get(sid)
                .map(|s| s.provinces.clone())
                .unwrap_or_default()
        })
        .collect();
    let mut owner: HashMap<MapId, usize> = HashMap::default();
    for (node, provs) in member_provinces.iter().enumerate() {
        for &pid in provs {
            owner.insert(pid, node);
        }
    }
    let mut visited = vec![false; members.len()];
    let mut stack = vec![0];
    visited[0] = true;
    while let Some(node) = stack.pop() {
        for &pid in &member_provinces[node] {
            let Some(province) = provinces.get(pid) else {
                continue;
            };
            for neighbor in province.passable_neighbors() {
                if let Some(&other) = owner.get(&neighbor) {
                    if !visited[other] {
                        visited[other] = true;
                        stack.push(other);
                    }
                }
            }
        }
    }
    let unreached = visited.iter().position(|&v| !v)?;
    Some(
        Warning::new(format!(
            "supply area {} is not contiguous: state {} has no connection to state {}",
            area_id, members[unreached], members[0]
        ))
        .source(WarningSource::SupplyArea(area_id))
        .source(WarningSource::State(members[unreached]))
        .source(WarningSource::State(members[0])),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{definitions::ProvinceKind, states::tests::province_fixture};
    use std::fs;
    use tempfile::TempDir;

    fn write_files(files: &[&str]) -> (TempDir, Vec<PathBuf>) {
        let dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for (i, contents) in files.iter().enumerate() {
            let path = dir.path().join(format!("{}.txt", i));
            fs::write(&path, contents).unwrap();
            paths.push(path);
        }
        (dir, paths)
    }

    /// Three single-province states over a 4 province map where province
    /// 4 (state 3) is separated from the rest by leaving province 3 out
    /// of any state.
    fn state_fixture(provinces: &ItemTable<Province>) -> ItemTable<State> {
        let (_dir, files) = write_files(&[
            "state={ id=1 name=\"A\" provinces={ 1 } }
             state={ id=2 name=\"B\" provinces={ 2 } }
             state={ id=3 name=\"C\" provinces={ 4 } }",
        ]);
        let mut warnings = Vec::new();
        crate::map::states::load_states(
            &files,
            provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap()
    }

    #[test]
    fn test_load_supply_areas() {
        let provinces = province_fixture(4, ProvinceKind::Land);
        let states = state_fixture(&provinces);
        let (_dir, files) = write_files(&[
            "supply_area={ id=1 name=\"AREA_1\" value=12.5 states={ 1 2 } }",
            "supply_area={ id=2 name=\"AREA_2\" value=3 states={ 3 } }",
        ]);
        let mut warnings = Vec::new();
        let areas = load_supply_areas(
            &files,
            &states,
            &provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(areas.count(), 3);
        let one = areas.get(1).unwrap();
        assert_eq!(one.name.as_ref(), "AREA_1");
        assert_eq!(one.value, 12.5);
        assert_eq!(one.states, vec![1, 2]);
        assert!(one.region.mass > 0);
    }

    #[test]
    fn test_disconnected_area_warns_with_witnesses() {
        let provinces = province_fixture(4, ProvinceKind::Land);
        let states = state_fixture(&provinces);
        // states 1 and 2 touch, state 3 sits beyond the unowned province 3
        let (_dir, files) =
            write_files(&["supply_area={ id=1 name=\"A\" states={ 1 2 3 } }"]);
        let mut warnings = Vec::new();
        load_supply_areas(
            &files,
            &states,
            &provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap();
        let torn: Vec<_> = warnings
            .iter()
            .filter(|w| w.text().contains("not contiguous"))
            .collect();
        assert_eq!(torn.len(), 1);
        assert!(torn[0].text().contains("state 3"));
        assert!(torn[0]
            .sources()
            .contains(&WarningSource::State(3)));
        assert!(torn[0].sources().contains(&WarningSource::SupplyArea(1)));
    }

    #[test]
    fn test_state_claim_conflict() {
        let provinces = province_fixture(4, ProvinceKind::Land);
        let states = state_fixture(&provinces);
        let (_dir, files) = write_files(&[
            "supply_area={ id=1 name=\"A\" states={ 1 2 } }
             supply_area={ id=2 name=\"B\" states={ 2 3 } }",
        ]);
        let mut warnings = Vec::new();
        let areas = load_supply_areas(
            &files,
            &states,
            &provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap();
        assert_eq!(areas.get(1).unwrap().states, vec![1, 2]);
        assert_eq!(areas.get(2).unwrap().states, vec![3]);
        assert!(warnings.iter().any(|w| w.text().contains("part of both")));
    }

    #[test]
    fn test_missing_state_and_orphan() {
        let provinces = province_fixture(4, ProvinceKind::Land);
        let states = state_fixture(&provinces);
        let (_dir, files) =
            write_files(&["supply_area={ id=1 name=\"A\" states={ 1 99 } }"]);
        let mut warnings = Vec::new();
        load_supply_areas(
            &files,
            &states,
            &provinces,
            1024,
            &MapSettings::default(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("state 99, which does not exist")));
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("state 2 is not part of any supply area")));
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("state 3 is not part of any supply area")));
    }
}
