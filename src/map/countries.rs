use std::{path::PathBuf, sync::Arc};

use log::warn;
use serde::Serialize;

use super::{
    super::{
        parser::{parse_script_file, ScriptObject, ScriptValue},
        types::{pack_color, Color, GameString, HashMap},
    },
    warnings::{Warning, WarningSource},
};

/// A country tag with its map color. Countries group nothing on the map
/// themselves; they are referenced by state ownership and cores.
#[derive(Debug, Clone, Serialize)]
pub struct Country {
    pub tag: GameString,
    /// Path of the country definition, as declared in the tag table
    pub definition: GameString,
    pub color: Option<Color>,
}

/// A terrain category referenced by province definitions and strategic
/// regions.
#[derive(Debug, Clone, Serialize)]
pub struct Terrain {
    pub name: GameString,
    pub color: Option<Color>,
    pub is_water: bool,
}

/// Parses a `{ r g b }` style block into a packed color.
fn parse_color_block(object: &ScriptObject) -> Option<Color> {
    let array = object.as_array().ok()?;
    if array.len() != 3 {
        return None;
    }
    let mut channels = [0u8; 3];
    for (i, channel) in channels.iter_mut().enumerate() {
        *channel = match array.get_index(i)?.as_integer().ok()? {
            v @ 0..=255 => v as u8,
            _ => return None,
        };
    }
    Some(pack_color(channels[0], channels[1], channels[2]))
}

/// Loads the country tag tables and the country color table.
/// Runs independently of the bitmap branch; the result is sorted by tag
/// so concurrent loading stays deterministic.
pub fn load_countries(
    tag_files: &[PathBuf],
    colors_file: Option<&PathBuf>,
    warnings: &mut Vec<Warning>,
) -> Vec<Country> {
    let mut by_tag: HashMap<GameString, Country> = HashMap::default();
    for path in tag_files {
        let root = match parse_script_file(path) {
            Ok(root) => root,
            Err(e) => {
                warn!("skipping country tag file {}: {}", path.display(), e);
                warnings.push(
                    Warning::new(format!("country tag file failed to parse: {}", e)).file(path),
                );
                continue;
            }
        };
        let mut keys: Vec<&String> = root.keys().collect();
        keys.sort();
        for key in keys {
            if key == "dynamic_tags" {
                continue;
            }
            // a tag declared twice in one file comes back as an array
            let definitions = root.get_strings(key);
            let definition = match definitions.first() {
                Some(d) => d.clone(),
                None => continue,
            };
            let tag: GameString = Arc::from(key.as_str());
            if key.len() != 3 {
                warnings.push(
                    Warning::new(format!("country tag '{}' is not three characters", key))
                        .source(WarningSource::Country(tag.clone()))
                        .file(path),
                );
            }
            if definitions.len() > 1 || by_tag.contains_key(&tag) {
                warnings.push(
                    Warning::new(format!("country tag '{}' is declared more than once", key))
                        .source(WarningSource::Country(tag.clone()))
                        .file(path),
                );
                if by_tag.contains_key(&tag) {
                    continue;
                }
            }
            by_tag.insert(
                tag.clone(),
                Country {
                    tag,
                    definition,
                    color: None,
                },
            );
        }
    }
    if let Some(path) = colors_file {
        match parse_script_file(path) {
            Ok(root) => {
                let mut entries: Vec<(&String, &ScriptValue)> = root.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                for (key, value) in entries {
                    let tag: GameString = Arc::from(key.as_str());
                    let block = match value {
                        ScriptValue::Object(ScriptObject::Map(m)) => m,
                        _ => continue,
                    };
                    let color = block
                        .get("color")
                        .and_then(|c| c.as_object().ok())
                        .and_then(parse_color_block);
                    match by_tag.get_mut(&tag) {
                        Some(country) => country.color = color,
                        None => warnings.push(
                            Warning::new(format!(
                                "a color is defined for unknown country tag '{}'",
                                key
                            ))
                            .source(WarningSource::Country(tag))
                            .file(path),
                        ),
                    }
                }
            }
            Err(e) => {
                warn!("skipping country colors file {}: {}", path.display(), e);
                warnings.push(
                    Warning::new(format!("country colors file failed to parse: {}", e))
                        .file(path),
                );
            }
        }
    }
    let mut countries: Vec<Country> = by_tag.into_values().collect();
    countries.sort_by(|a, b| a.tag.cmp(&b.tag));
    if let Some(path) = colors_file {
        for country in &countries {
            if country.color.is_none() {
                warnings.push(
                    Warning::new(format!("country '{}' has no color", country.tag))
                        .source(WarningSource::Country(country.tag.clone()))
                        .file(path),
                );
            }
        }
    }
    countries
}

/// Loads the terrain category tables. Terrains feed the cross-reference
/// checks in the province and strategic region loaders.
pub fn load_terrains(files: &[PathBuf], warnings: &mut Vec<Warning>) -> Vec<Terrain> {
    let mut by_name: HashMap<GameString, Terrain> = HashMap::default();
    for path in files {
        let root = match parse_script_file(path) {
            Ok(root) => root,
            Err(e) => {
                warn!("skipping terrain file {}: {}", path.display(), e);
                warnings.push(
                    Warning::new(format!("terrain file failed to parse: {}", e)).file(path),
                );
                continue;
            }
        };
        for categories in root.get_blocks("categories") {
            let mut entries: Vec<(&String, &ScriptValue)> = categories.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, _) in entries {
                let name: GameString = Arc::from(key.as_str());
                let blocks = categories.get_blocks(key);
                let block = match blocks.first() {
                    Some(block) => *block,
                    None => continue,
                };
                if blocks.len() > 1 || by_name.contains_key(&name) {
                    warnings.push(
                        Warning::new(format!(
                            "terrain '{}' is declared more than once",
                            key
                        ))
                        .source(WarningSource::Terrain(name.clone()))
                        .file(path),
                    );
                    if by_name.contains_key(&name) {
                        continue;
                    }
                }
                let color = block
                    .get("color")
                    .and_then(|c| c.as_object().ok())
                    .and_then(parse_color_block);
                let is_water = block.get_boolean("is_water").unwrap_or(false);
                by_name.insert(
                    name.clone(),
                    Terrain {
                        name,
                        color,
                        is_water,
                    },
                );
            }
        }
    }
    let mut terrains: Vec<Terrain> = by_name.into_values().collect();
    terrains.sort_by(|a, b| a.name.cmp(&b.name));
    terrains
}
