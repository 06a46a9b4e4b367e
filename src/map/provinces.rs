use serde::Serialize;

use super::{
    super::types::{Color, DisplayColor, GameString, HashMap, MapId},
    countries::Terrain,
    definitions::{Adjacency, ProvinceDefinition, ProvinceKind},
    items::{sort_items, ItemTable, MissingIdPolicy},
    region::{Point, Region, Zone},
    shapes::{ProvinceShape, XCrossing},
    warnings::{Warning, WarningSource},
    MapError, MapSettings,
};

/// A border between a province and one neighbor (or the off-map void at
/// the vertical bounds, `to == None`), optionally decorated by an
/// adjacency override row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvinceEdge {
    pub to: Option<MapId>,
    pub paths: Vec<Vec<Point>>,
    /// Adjacency type override, e.g. `sea` for a strait
    pub kind: Option<GameString>,
    /// The province a strait passes through
    pub through: Option<MapId>,
    pub rule: Option<GameString>,
    pub start: Option<Point>,
    pub stop: Option<Point>,
    /// Impassable edges exist on the bitmap but do not connect their
    /// provinces for contiguity purposes
    pub impassable: bool,
}

impl ProvinceEdge {
    fn from_traced(to: Option<MapId>, paths: Vec<Vec<Point>>) -> Self {
        ProvinceEdge {
            to,
            paths,
            kind: None,
            through: None,
            rule: None,
            start: None,
            stop: None,
            impassable: false,
        }
    }

    fn apply(&mut self, adjacency: &Adjacency) {
        if !adjacency.kind.is_empty() {
            self.kind = Some(adjacency.kind.clone());
        }
        self.through = adjacency.through;
        self.rule = adjacency.rule.clone();
        self.start = adjacency.start;
        self.stop = adjacency.stop;
        self.impassable = adjacency.is_impassable();
    }
}

/// A fully reconciled province: declared identity from the definition
/// table married to the geometry discovered on the bitmap.
#[derive(Debug, Clone, Serialize)]
pub struct Province {
    pub id: MapId,
    pub color: Color,
    pub kind: ProvinceKind,
    pub coastal: bool,
    pub terrain: GameString,
    pub continent: u32,
    pub region: Region,
    pub cover_zones: Vec<Zone>,
    pub edges: Vec<ProvinceEdge>,
}

impl Province {
    /// The ids of provinces reachable from this one for contiguity
    /// purposes: every neighbor not severed by an impassable override.
    pub fn passable_neighbors(&self) -> impl Iterator<Item = MapId> + '_ {
        self.edges
            .iter()
            .filter(|e| !e.impassable)
            .filter_map(|e| e.to)
    }
}

/// Reconciles bitmap shapes with the definition table and merges the
/// adjacency overrides in, producing the id-indexed province array every
/// higher-level loader works from.
#[allow(clippy::too_many_arguments)]
pub fn build_provinces(
    shapes: &[ProvinceShape],
    crossings: &[XCrossing],
    definitions: &[ProvinceDefinition],
    adjacencies: &[Adjacency],
    terrains: &[Terrain],
    width: u32,
    height: u32,
    settings: &MapSettings,
    warnings: &mut Vec<Warning>,
) -> Result<ItemTable<Province>, MapError> {
    for crossing in crossings {
        let mut warning = Warning::new(format!(
            "four different provinces meet in a point at ({}, {})",
            crossing.pos.x, crossing.pos.y
        ));
        for color in crossing.colors {
            warning = warning.source(WarningSource::ProvinceColor(color));
        }
        warnings.push(warning);
    }
    let sorted = sort_items(
        definitions.to_vec(),
        settings.max_province_id,
        MissingIdPolicy::Conflict,
        warnings,
    )?;
    // first definition claiming a color wins the shape
    let mut color_to_id: HashMap<Color, MapId> = HashMap::default();
    for def in sorted.iter_valid() {
        if let Some(&first) = color_to_id.get(&def.color) {
            warnings.push(
                Warning::new(format!(
                    "color {} is used by both province {} and province {}",
                    DisplayColor(def.color),
                    first,
                    def.id
                ))
                .source(WarningSource::Province(first))
                .source(WarningSource::Province(def.id))
                .source(WarningSource::ProvinceColor(def.color)),
            );
        } else {
            color_to_id.insert(def.color, def.id);
        }
    }
    let shape_by_color: HashMap<Color, &ProvinceShape> =
        shapes.iter().map(|s| (s.color, s)).collect();
    for shape in shapes {
        if !color_to_id.contains_key(&shape.color) {
            warnings.push(
                Warning::new(format!(
                    "color {} appears on the bitmap but is not defined",
                    DisplayColor(shape.color)
                ))
                .source(WarningSource::ProvinceColor(shape.color)),
            );
        }
    }
    let mut oversized: Vec<Warning> = Vec::new();
    let mut missing_shape: Vec<Warning> = Vec::new();
    let mut provinces = sorted.map_items(|def| {
        let shape = if def.id >= 0 && color_to_id.get(&def.color) == Some(&def.id) {
            shape_by_color.get(&def.color).copied()
        } else {
            None
        };
        match shape {
            Some(shape) => {
                let b = shape.region.bounding_box;
                if b.w > width as i32 / 2 || b.h > height as i32 / 2 {
                    oversized.push(
                        Warning::new(format!(
                            "province {} spans more than half the map, possibly a wraparound artifact",
                            def.id
                        ))
                        .source(WarningSource::Province(def.id)),
                    );
                }
                let edges = shape
                    .edges
                    .iter()
                    .filter_map(|edge| match edge.to_color {
                        None => Some(ProvinceEdge::from_traced(None, edge.paths.clone())),
                        Some(color) => color_to_id
                            .get(&color)
                            .map(|&id| ProvinceEdge::from_traced(Some(id), edge.paths.clone())),
                    })
                    .collect();
                Province {
                    id: def.id,
                    color: def.color,
                    kind: def.kind,
                    coastal: def.coastal,
                    terrain: def.terrain,
                    continent: def.continent,
                    region: shape.region,
                    cover_zones: shape.cover_zones.clone(),
                    edges,
                }
            }
            None => {
                if def.id > 0 {
                    missing_shape.push(
                        Warning::new(format!(
                            "province {} has no pixels on the bitmap",
                            def.id
                        ))
                        .source(WarningSource::Province(def.id))
                        .source(WarningSource::ProvinceColor(def.color)),
                    );
                }
                Province {
                    id: def.id,
                    color: def.color,
                    kind: def.kind,
                    coastal: def.coastal,
                    terrain: def.terrain,
                    continent: def.continent,
                    region: Region::EMPTY,
                    cover_zones: Vec::new(),
                    edges: Vec::new(),
                }
            }
        }
    });
    warnings.append(&mut missing_shape);
    warnings.append(&mut oversized);
    merge_adjacencies(&mut provinces, adjacencies, warnings);
    check_terrains(&provinces, terrains, warnings);
    Ok(provinces)
}

/// Folds the explicit adjacency rows into the bitmap-implied edges,
/// keeping the edge lists symmetric: whatever happens to the from->to
/// edge also happens to to->from.
fn merge_adjacencies(
    provinces: &mut ItemTable<Province>,
    adjacencies: &[Adjacency],
    warnings: &mut Vec<Warning>,
) {
    for adjacency in adjacencies {
        let mut valid = true;
        for id in [adjacency.from, adjacency.to] {
            if provinces.get(id).is_none() {
                warnings.push(
                    Warning::new(format!(
                        "an adjacency row connects province {} to province {}, but province {} does not exist",
                        adjacency.from, adjacency.to, id
                    ))
                    .source(WarningSource::Province(id)),
                );
                valid = false;
            }
        }
        if let Some(through) = adjacency.through {
            if provinces.get(through).is_none() {
                warnings.push(
                    Warning::new(format!(
                        "the adjacency between province {} and province {} passes through province {}, which does not exist",
                        adjacency.from, adjacency.to, through
                    ))
                    .source(WarningSource::Province(through)),
                );
                valid = false;
            }
        }
        if !valid {
            continue;
        }
        apply_adjacency(provinces, adjacency.from, adjacency.to, adjacency);
        apply_adjacency(provinces, adjacency.to, adjacency.from, adjacency);
    }
}

fn apply_adjacency(provinces: &mut ItemTable<Province>, a: MapId, b: MapId, row: &Adjacency) {
    if let Some(province) = provinces.get_mut(a) {
        match province.edges.iter_mut().find(|e| e.to == Some(b)) {
            Some(edge) => edge.apply(row),
            None => {
                let mut edge = ProvinceEdge::from_traced(Some(b), Vec::new());
                edge.apply(row);
                province.edges.push(edge);
            }
        }
    }
}

/// Definitions name terrains by key; when a terrain table was loaded,
/// every key has to resolve into it.
fn check_terrains(provinces: &ItemTable<Province>, terrains: &[Terrain], warnings: &mut Vec<Warning>) {
    if terrains.is_empty() {
        return;
    }
    let known: std::collections::HashSet<&str> =
        terrains.iter().map(|t| t.name.as_ref()).collect();
    for province in provinces.iter_valid() {
        if !province.terrain.is_empty() && !known.contains(province.terrain.as_ref()) {
            warnings.push(
                Warning::new(format!(
                    "province {} uses terrain '{}', which is not defined",
                    province.id, province.terrain
                ))
                .source(WarningSource::Province(province.id))
                .source(WarningSource::Terrain(province.terrain.clone())),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::shapes::RawEdge;
    use std::sync::Arc;

    fn settings() -> MapSettings {
        MapSettings::default()
    }

    fn shape(color: Color, zone: Zone, edges: Vec<RawEdge>) -> ProvinceShape {
        ProvinceShape {
            color,
            region: Region::from(zone),
            cover_zones: vec![zone],
            edges,
        }
    }

    fn definition(id: MapId, color: Color, kind: ProvinceKind) -> ProvinceDefinition {
        ProvinceDefinition {
            id,
            color,
            kind,
            coastal: false,
            terrain: Arc::from("plains"),
            continent: 0,
        }
    }

    fn two_province_fixture() -> (Vec<ProvinceShape>, Vec<ProvinceDefinition>) {
        let path = vec![vec![Point::new(8, 0), Point::new(8, 8)]];
        let shapes = vec![
            shape(
                1,
                Zone::new(0, 0, 8, 8),
                vec![RawEdge {
                    to_color: Some(2),
                    paths: path.clone(),
                }],
            ),
            shape(
                2,
                Zone::new(8, 0, 8, 8),
                vec![RawEdge {
                    to_color: Some(1),
                    paths: path,
                }],
            ),
        ];
        let definitions = vec![
            definition(1, 1, ProvinceKind::Land),
            definition(2, 2, ProvinceKind::Land),
        ];
        (shapes, definitions)
    }

    #[test]
    fn test_edges_rekeyed_to_ids() {
        let (shapes, definitions) = two_province_fixture();
        let mut warnings = Vec::new();
        let provinces = build_provinces(
            &shapes,
            &[],
            &definitions,
            &[],
            &[],
            1024,
            1024,
            &settings(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings.is_empty());
        let one = provinces.get(1).unwrap();
        assert_eq!(one.edges.len(), 1);
        assert_eq!(one.edges[0].to, Some(2));
        assert!(!one.edges[0].paths.is_empty());
        let two = provinces.get(2).unwrap();
        assert_eq!(two.edges[0].to, Some(1));
    }

    #[test]
    fn test_undefined_color_warning() {
        let (mut shapes, definitions) = two_province_fixture();
        shapes.push(shape(99, Zone::new(16, 0, 8, 8), Vec::new()));
        let mut warnings = Vec::new();
        build_provinces(
            &shapes,
            &[],
            &definitions,
            &[],
            &[],
            1024,
            1024,
            &settings(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("not defined")));
    }

    #[test]
    fn test_definition_without_shape() {
        let (shapes, mut definitions) = two_province_fixture();
        definitions.push(definition(3, 77, ProvinceKind::Land));
        let mut warnings = Vec::new();
        let provinces = build_provinces(
            &shapes,
            &[],
            &definitions,
            &[],
            &[],
            1024,
            1024,
            &settings(),
            &mut warnings,
        )
        .unwrap();
        let three = provinces.get(3).unwrap();
        assert_eq!(three.region, Region::EMPTY);
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("no pixels")));
    }

    #[test]
    fn test_adjacency_creates_sea_crossing() {
        let (shapes, definitions) = two_province_fixture();
        let row = Adjacency {
            from: 1,
            to: 2,
            kind: Arc::from("sea"),
            through: None,
            start: Some(Point::new(1, 1)),
            stop: Some(Point::new(9, 1)),
            rule: None,
        };
        let mut warnings = Vec::new();
        let provinces = build_provinces(
            &shapes,
            &[],
            &definitions,
            &[row],
            &[],
            1024,
            1024,
            &settings(),
            &mut warnings,
        )
        .unwrap();
        let one = provinces.get(1).unwrap();
        let edge = one.edges.iter().find(|e| e.to == Some(2)).unwrap();
        assert_eq!(edge.kind.as_deref(), Some("sea"));
        assert_eq!(edge.start, Some(Point::new(1, 1)));
        assert!(!edge.impassable);
        // the override lands symmetrically
        let two = provinces.get(2).unwrap();
        let back = two.edges.iter().find(|e| e.to == Some(1)).unwrap();
        assert_eq!(back.kind.as_deref(), Some("sea"));
    }

    #[test]
    fn test_impassable_adjacency_severs_contiguity() {
        let (shapes, definitions) = two_province_fixture();
        let row = Adjacency {
            from: 1,
            to: 2,
            kind: Arc::from("impassable"),
            through: None,
            start: None,
            stop: None,
            rule: None,
        };
        let mut warnings = Vec::new();
        let provinces = build_provinces(
            &shapes,
            &[],
            &definitions,
            &[row],
            &[],
            1024,
            1024,
            &settings(),
            &mut warnings,
        )
        .unwrap();
        let one = provinces.get(1).unwrap();
        assert!(one.edges.iter().any(|e| e.to == Some(2) && e.impassable));
        assert_eq!(one.passable_neighbors().count(), 0);
    }

    #[test]
    fn test_adjacency_to_missing_province() {
        let (shapes, definitions) = two_province_fixture();
        let row = Adjacency {
            from: 1,
            to: 9,
            kind: Arc::from("sea"),
            through: None,
            start: None,
            stop: None,
            rule: None,
        };
        let mut warnings = Vec::new();
        let provinces = build_provinces(
            &shapes,
            &[],
            &definitions,
            &[row],
            &[],
            1024,
            1024,
            &settings(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("province 9 does not exist")));
        // nothing was half-applied
        assert_eq!(provinces.get(1).unwrap().edges.len(), 1);
    }

    #[test]
    fn test_oversized_province_warning() {
        let big = Zone::new(0, 0, 600, 8);
        let shapes = vec![shape(1, big, Vec::new())];
        let definitions = vec![definition(1, 1, ProvinceKind::Land)];
        let mut warnings = Vec::new();
        build_provinces(
            &shapes,
            &[],
            &definitions,
            &[],
            &[],
            1024,
            1024,
            &settings(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("wraparound")));
    }

    #[test]
    fn test_duplicate_color_warning() {
        let (shapes, mut definitions) = two_province_fixture();
        definitions.push(definition(3, 1, ProvinceKind::Land));
        let mut warnings = Vec::new();
        let provinces = build_provinces(
            &shapes,
            &[],
            &definitions,
            &[],
            &[],
            1024,
            1024,
            &settings(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("used by both")));
        // the first claimant kept the shape
        assert_eq!(provinces.get(1).unwrap().region.mass, 64);
        assert_eq!(provinces.get(3).unwrap().region.mass, 0);
    }

    #[test]
    fn test_unknown_terrain_warning() {
        let (shapes, definitions) = two_province_fixture();
        let terrains = vec![Terrain {
            name: Arc::from("forest"),
            color: None,
            is_water: false,
        }];
        let mut warnings = Vec::new();
        build_provinces(
            &shapes,
            &[],
            &definitions,
            &[],
            &terrains,
            1024,
            1024,
            &settings(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("terrain 'plains'")));
    }

    #[test]
    fn test_x_crossing_warnings() {
        let (shapes, definitions) = two_province_fixture();
        let crossing = XCrossing {
            pos: Point::new(4, 4),
            colors: [1, 2, 3, 4],
        };
        let mut warnings = Vec::new();
        build_provinces(
            &shapes,
            &[crossing],
            &definitions,
            &[],
            &[],
            1024,
            1024,
            &settings(),
            &mut warnings,
        )
        .unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.text().contains("meet in a point")));
    }
}
