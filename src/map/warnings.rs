use std::{fmt, path::PathBuf};

use serde::Serialize;

use super::super::types::{Color, DisplayColor, GameString, MapId};

/// The kind of entity a loader is processing. Used to phrase warnings
/// uniformly across the structurally identical loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityKind {
    Province,
    State,
    StrategicRegion,
    SupplyArea,
}

impl EntityKind {
    /// The warning source pointing at the entity with the given id.
    pub fn source(self, id: MapId) -> WarningSource {
        match self {
            EntityKind::Province => WarningSource::Province(id),
            EntityKind::State => WarningSource::State(id),
            EntityKind::StrategicRegion => WarningSource::StrategicRegion(id),
            EntityKind::SupplyArea => WarningSource::SupplyArea(id),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Province => write!(f, "province"),
            EntityKind::State => write!(f, "state"),
            EntityKind::StrategicRegion => write!(f, "strategic region"),
            EntityKind::SupplyArea => write!(f, "supply area"),
        }
    }
}

/// A pointer from a warning to the entity it concerns, with whichever
/// identity the entity has at that point: id, bitmap color or name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum WarningSource {
    Province(MapId),
    ProvinceColor(Color),
    State(MapId),
    StrategicRegion(MapId),
    SupplyArea(MapId),
    Country(GameString),
    Terrain(GameString),
}

impl fmt::Display for WarningSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningSource::Province(id) => write!(f, "province {}", id),
            WarningSource::ProvinceColor(color) => {
                write!(f, "province color {}", DisplayColor(*color))
            }
            WarningSource::State(id) => write!(f, "state {}", id),
            WarningSource::StrategicRegion(id) => write!(f, "strategic region {}", id),
            WarningSource::SupplyArea(id) => write!(f, "supply area {}", id),
            WarningSource::Country(tag) => write!(f, "country {}", tag),
            WarningSource::Terrain(name) => write!(f, "terrain {}", name),
        }
    }
}

/// A single data-quality finding. Never fatal; the full list is part of
/// the assembled map data so a consumer can deep-link to the offending
/// entity or file.
#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    text: String,
    sources: Vec<WarningSource>,
    files: Vec<PathBuf>,
}

impl Warning {
    pub fn new<T: Into<String>>(text: T) -> Self {
        Warning {
            text: text.into(),
            sources: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn source(mut self, source: WarningSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.files.push(path.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sources(&self) -> &[WarningSource] {
        &self.sources
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)?;
        if !self.files.is_empty() {
            write!(f, " [")?;
            for (i, file) in self.files.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", file.display())?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let warning = Warning::new("something is off")
            .source(WarningSource::State(3))
            .file("history/states/3.txt");
        assert_eq!(warning.text(), "something is off");
        assert_eq!(warning.sources(), &[WarningSource::State(3)]);
        assert_eq!(warning.files().len(), 1);
    }

    #[test]
    fn test_display_includes_files() {
        let warning = Warning::new("bad data").file("map/definition.csv");
        assert_eq!(warning.to_string(), "bad data [map/definition.csv]");
    }
}
