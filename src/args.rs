use clap_derive::Parser;

use std::path::PathBuf;

use super::map::RowOrder;

/// A function to parse the root directory argument.
fn parse_dir_arg(input: &str) -> Result<PathBuf, &'static str> {
    let p = PathBuf::from(input);
    if !p.exists() {
        Err("path does not exist")
    } else if !p.is_dir() {
        Err("path is not a directory")
    } else {
        Ok(p)
    }
}

/// A function to parse the row order argument.
fn parse_row_order(input: &str) -> Result<RowOrder, &'static str> {
    match input {
        "auto" => Ok(RowOrder::Auto),
        "bottom-up" => Ok(RowOrder::BottomUp),
        "top-down" => Ok(RowOrder::TopDown),
        _ => Err("expected auto, bottom-up or top-down"),
    }
}

/// The arguments to the program.
#[derive(Parser)]
pub struct Args {
    #[arg(value_parser = parse_dir_arg)]
    /// The game or mod directory holding map/, history/ and common/.
    pub root: PathBuf,
    #[arg(long, default_value = None)]
    /// A path to dump the assembled world map data to as JSON.
    pub dump: Option<PathBuf>,
    #[arg(long, default_value = "auto", value_parser = parse_row_order)]
    /// The bitmap row order convention: auto, bottom-up or top-down.
    pub row_order: RowOrder,
    #[arg(long)]
    /// Overrides the highest accepted province id.
    pub max_province_id: Option<i32>,
    #[arg(short, long, default_value_t = false)]
    /// Only print the warning count, not every warning.
    pub quiet: bool,
}
