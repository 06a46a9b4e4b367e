use std::{fs, process, time::Duration};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::error;

/// A submodule that provides opaque types commonly used in the project
mod types;

/// A submodule that parses Paradox script files into generic blocks
mod parser;

/// A submodule holding the world map model and its loader
mod map;
use map::{MapSettings, WorldMapLoader};

/// A submodule with the command line argument definitions
mod args;
use args::Args;

/// Main function. This is the entry point of the program.
///
/// # Process
///
/// 1. Parses the command line arguments.
/// 2. Builds a [WorldMapLoader] over the given directory and runs one
///    load pass: bitmap segmentation, definition and adjacency merge,
///    state / strategic region / supply area grouping, validation.
/// 3. Prints a summary of the loaded map and every warning the load
///    produced.
/// 4. Optionally dumps the whole data model to a JSON file.
///
/// A fatal load error (bad bitmap, id ceiling exceeded) exits with a
/// non-zero status; warnings do not.
fn main() {
    env_logger::init();
    let args = Args::parse();
    let settings = MapSettings {
        row_order: args.row_order,
        max_province_id: args
            .max_province_id
            .unwrap_or(MapSettings::default().max_province_id),
        ..MapSettings::default()
    };
    let mut loader = match WorldMapLoader::new(&args.root, settings) {
        Ok(loader) => loader,
        Err(e) => {
            error!("could not set up the loader: {}", e);
            eprintln!("fatal: {}", e);
            process::exit(1);
        }
    };
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner} {msg}")
            .unwrap(),
    );
    spinner.set_message(format!("Loading world map from {}", args.root.display()));
    spinner.enable_steady_tick(Duration::from_millis(100));
    let (data, _updated) = match loader.load() {
        Ok(result) => result,
        Err(e) => {
            spinner.finish_and_clear();
            error!("load failed: {}", e);
            eprintln!("fatal: {}", e);
            process::exit(1);
        }
    };
    spinner.finish_with_message("World map loaded");
    println!(
        "{}x{} map: {} provinces ({} defective), {} states ({} defective), {} strategic regions, {} supply areas, {} countries, {} terrains",
        data.width,
        data.height,
        data.provinces.count(),
        data.provinces.bad_count(),
        data.states.count(),
        data.states.bad_count(),
        data.strategic_regions.count(),
        data.supply_areas.count(),
        data.countries.len(),
        data.terrains.len(),
    );
    if !args.quiet {
        for warning in &data.warnings {
            println!("warning: {}", warning);
        }
    }
    println!("{} warnings total", data.warnings.len());
    if let Some(dump) = &args.dump {
        match serde_json::to_string_pretty(&*data) {
            Ok(json) => {
                if let Err(e) = fs::write(dump, json) {
                    eprintln!("could not write {}: {}", dump.display(), e);
                    process::exit(1);
                }
                println!("world map data dumped to {}", dump.display());
            }
            Err(e) => {
                eprintln!("could not serialize the world map data: {}", e);
                process::exit(1);
            }
        }
    }
}
