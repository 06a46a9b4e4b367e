use std::{path::Path, str::FromStr, sync::Arc};

use csv::{ReaderBuilder, StringRecord};
use log::warn;
use serde::Serialize;

use super::{
    super::types::{pack_color, Color, GameString, MapId},
    items::MapItem,
    region::Point,
    warnings::{EntityKind, Warning},
    MapError,
};

/// What kind of terrain feature a province fundamentally is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProvinceKind {
    Land,
    Sea,
    Lake,
}

impl FromStr for ProvinceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "land" => Ok(ProvinceKind::Land),
            "sea" => Ok(ProvinceKind::Sea),
            "lake" => Ok(ProvinceKind::Lake),
            _ => Err(()),
        }
    }
}

/// One row of the definition table: the declared identity of a province,
/// before it is matched with a bitmap shape.
#[derive(Debug, Clone, Serialize)]
pub struct ProvinceDefinition {
    pub id: MapId,
    pub color: Color,
    pub kind: ProvinceKind,
    pub coastal: bool,
    pub terrain: GameString,
    pub continent: u32,
}

impl MapItem for ProvinceDefinition {
    const KIND: EntityKind = EntityKind::Province;

    fn id(&self) -> MapId {
        self.id
    }

    fn set_id(&mut self, id: MapId) {
        self.id = id;
    }
}

/// Reads the province definition table: `id;r;g;b;type;coastal;terrain;
/// continent`, no header row. A malformed row only costs that row.
pub fn load_definitions<P: AsRef<Path>>(
    path: P,
    warnings: &mut Vec<Warning>,
) -> Result<Vec<ProvinceDefinition>, MapError> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .comment(Some(b'#'))
        .flexible(true)
        .has_headers(false)
        .delimiter(b';')
        .from_path(path)?;
    let mut definitions = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("skipping malformed definition row {}: {}", row, e);
                warnings.push(
                    Warning::new(format!("definition row {} is malformed: {}", row, e))
                        .file(path),
                );
                continue;
            }
        };
        match parse_definition(&record) {
            Ok(definition) => definitions.push(definition),
            Err(reason) => {
                warnings.push(
                    Warning::new(format!("definition row {} is malformed: {}", row, reason))
                        .file(path),
                );
            }
        }
    }
    Ok(definitions)
}

fn parse_definition(record: &StringRecord) -> Result<ProvinceDefinition, String> {
    if record.len() < 8 {
        return Err(format!("expected 8 fields, found {}", record.len()));
    }
    let id = record[0]
        .trim()
        .parse::<MapId>()
        .map_err(|_| format!("invalid id '{}'", &record[0]))?;
    let r = parse_channel(&record[1])?;
    let g = parse_channel(&record[2])?;
    let b = parse_channel(&record[3])?;
    let kind = record[4]
        .trim()
        .parse::<ProvinceKind>()
        .map_err(|_| format!("unknown province type '{}'", &record[4]))?;
    let coastal = match record[5].trim() {
        "true" => true,
        "false" => false,
        other => return Err(format!("invalid coastal flag '{}'", other)),
    };
    let terrain: GameString = Arc::from(record[6].trim());
    let continent = record[7]
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid continent index '{}'", &record[7]))?;
    Ok(ProvinceDefinition {
        id,
        color: pack_color(r, g, b),
        kind,
        coastal,
        terrain,
        continent,
    })
}

fn parse_channel(field: &str) -> Result<u8, String> {
    field
        .trim()
        .parse::<u8>()
        .map_err(|_| format!("invalid color channel '{}'", field))
}

/// An explicit adjacency override row: a connection (or an impassable
/// border) between two provinces that the bitmap alone cannot express.
#[derive(Debug, Clone, Serialize)]
pub struct Adjacency {
    pub from: MapId,
    pub to: MapId,
    pub kind: GameString,
    pub through: Option<MapId>,
    pub start: Option<Point>,
    pub stop: Option<Point>,
    pub rule: Option<GameString>,
}

impl Adjacency {
    /// Impassable rows sever the implied edge instead of decorating it.
    pub fn is_impassable(&self) -> bool {
        self.kind.as_ref() == "impassable"
    }
}

/// Reads the adjacency table: `from;to;type;through;start_x;start_y;
/// stop_x;stop_y;rule;comment`. The first row is a header. A trailing
/// `-1;-1;...` sentinel row ends the table and is not an error.
pub fn load_adjacencies<P: AsRef<Path>>(
    path: P,
    warnings: &mut Vec<Warning>,
) -> Result<Vec<Adjacency>, MapError> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .comment(Some(b'#'))
        .flexible(true)
        .has_headers(true)
        .delimiter(b';')
        .from_path(path)?;
    let mut adjacencies = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("skipping malformed adjacency row {}: {}", row, e);
                warnings.push(
                    Warning::new(format!("adjacency row {} is malformed: {}", row, e)).file(path),
                );
                continue;
            }
        };
        match parse_adjacency(&record) {
            Ok(Some(adjacency)) => adjacencies.push(adjacency),
            Ok(None) => {}
            Err(reason) => {
                warnings.push(
                    Warning::new(format!("adjacency row {} is malformed: {}", row, reason))
                        .file(path),
                );
            }
        }
    }
    Ok(adjacencies)
}

fn parse_adjacency(record: &StringRecord) -> Result<Option<Adjacency>, String> {
    if record.len() < 2 {
        return Err(format!("expected at least 2 fields, found {}", record.len()));
    }
    let from = record[0]
        .trim()
        .parse::<MapId>()
        .map_err(|_| format!("invalid from id '{}'", &record[0]))?;
    if from < 0 {
        // the conventional end-of-table sentinel
        return Ok(None);
    }
    let to = record[1]
        .trim()
        .parse::<MapId>()
        .map_err(|_| format!("invalid to id '{}'", &record[1]))?;
    let kind: GameString = Arc::from(record.get(2).unwrap_or("").trim());
    let through = parse_opt_coord(record.get(3))?;
    let start = parse_opt_point(record.get(4), record.get(5))?;
    let stop = parse_opt_point(record.get(6), record.get(7))?;
    let rule = record
        .get(8)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(Arc::from);
    Ok(Some(Adjacency {
        from,
        to,
        kind,
        through,
        start,
        stop,
        rule,
    }))
}

/// `-1` and the empty string both mean "not set" in the adjacency table.
fn parse_opt_coord(field: Option<&str>) -> Result<Option<i32>, String> {
    match field.map(str::trim) {
        None | Some("") | Some("-1") => Ok(None),
        Some(value) => value
            .parse::<i32>()
            .map(Some)
            .map_err(|_| format!("invalid number '{}'", value)),
    }
}

fn parse_opt_point(x: Option<&str>, y: Option<&str>) -> Result<Option<Point>, String> {
    match (parse_opt_coord(x)?, parse_opt_coord(y)?) {
        (Some(x), Some(y)) => Ok(Some(Point::new(x, y))),
        _ => Ok(None),
    }
}

/// Shared warning shape for rows referencing provinces that are not in
/// the table.
pub fn missing_reference_warning(
    referrer: EntityKind,
    referrer_id: MapId,
    target: EntityKind,
    target_id: MapId,
) -> Warning {
    Warning::new(format!(
        "{} {} references {} {}, which does not exist",
        referrer, referrer_id, target, target_id
    ))
    .source(referrer.source(referrer_id))
    .source(target.source(target_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_definitions() {
        let file = write_file(
            "0;0;0;0;land;false;unknown;0\n\
             1;84;24;14;land;true;plains;1\n\
             2;0;0;255;sea;false;ocean;0\n",
        );
        let mut warnings = Vec::new();
        let defs = load_definitions(file.path(), &mut warnings).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[1].id, 1);
        assert_eq!(defs[1].color, pack_color(84, 24, 14));
        assert_eq!(defs[1].kind, ProvinceKind::Land);
        assert!(defs[1].coastal);
        assert_eq!(defs[1].terrain.as_ref(), "plains");
        assert_eq!(defs[1].continent, 1);
        assert_eq!(defs[2].kind, ProvinceKind::Sea);
    }

    #[test]
    fn test_malformed_definition_row_is_skipped() {
        let file = write_file(
            "1;84;24;14;land;true;plains;1\n\
             2;84;24;banana;land;true;plains;1\n\
             3;0;0;255;swamp?;false;ocean;0\n",
        );
        let mut warnings = Vec::new();
        let defs = load_definitions(file.path(), &mut warnings).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].text().contains("color channel"));
        assert!(warnings[1].text().contains("province type"));
    }

    #[test]
    fn test_load_adjacencies() {
        let file = write_file(
            "From;To;Type;Through;start_x;start_y;stop_x;stop_y;adjacency_rule_name;Comment\n\
             2;4;sea;3;100;50;120;50;;Strait\n\
             5;6;impassable;-1;-1;-1;-1;-1;;Mountains\n\
             -1;-1;;-1;-1;-1;-1;-1\n",
        );
        let mut warnings = Vec::new();
        let rows = load_adjacencies(file.path(), &mut warnings).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].from, 2);
        assert_eq!(rows[0].to, 4);
        assert_eq!(rows[0].through, Some(3));
        assert_eq!(rows[0].start, Some(Point::new(100, 50)));
        assert_eq!(rows[0].stop, Some(Point::new(120, 50)));
        assert!(!rows[0].is_impassable());
        assert!(rows[1].is_impassable());
        assert_eq!(rows[1].through, None);
        assert_eq!(rows[1].start, None);
    }

    #[test]
    fn test_malformed_adjacency_row() {
        let file = write_file(
            "From;To;Type;Through;start_x;start_y;stop_x;stop_y;rule;Comment\n\
             2;banana;sea;-1;-1;-1;-1;-1;;\n",
        );
        let mut warnings = Vec::new();
        let rows = load_adjacencies(file.path(), &mut warnings).unwrap();
        assert!(rows.is_empty());
        assert_eq!(warnings.len(), 1);
    }
}
