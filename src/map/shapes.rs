use serde::Serialize;

use super::{
    super::types::{Color, HashMap},
    bitmap::{ProvinceBitmap, TILE_SIZE},
    region::{merge_regions, Point, Region, Zone},
    CancelToken, LoadCancelled,
};

/// One border of a province shape: every polyline it shares with a single
/// neighbor color. `to_color == None` is the off-map sentinel for the
/// vertical map bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEdge {
    pub to_color: Option<Color>,
    pub paths: Vec<Vec<Point>>,
}

/// A maximal same-colored pixel region as discovered on the bitmap,
/// before any definition data is attached to it.
#[derive(Debug, Clone, Serialize)]
pub struct ProvinceShape {
    pub color: Color,
    pub region: Region,
    /// Tiles exactly partitioning the pixels of this color
    pub cover_zones: Vec<Zone>,
    pub edges: Vec<RawEdge>,
}

/// A 2x2 pixel block whose four quadrants all have distinct colors.
/// Renders badly in the game, so the loader warns about each of these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct XCrossing {
    /// The corner point shared by the four pixels
    pub pos: Point,
    /// Top-left, top-right, bottom-left, bottom-right
    pub colors: [Color; 4],
}

/// Extracts one [ProvinceShape] per distinct color on the bitmap,
/// combining the quadtree cover zones with the traced borders. Shapes
/// come out sorted by color so the output is reproducible.
pub fn extract_shapes(
    bitmap: &ProvinceBitmap,
    cancel: &CancelToken,
) -> Result<Vec<ProvinceShape>, LoadCancelled> {
    let zones = cover_zones(bitmap);
    let mut edges = trace_edges(bitmap, cancel)?;
    let width = bitmap.width() as i32;
    let mut shapes: Vec<ProvinceShape> = zones
        .into_iter()
        .map(|(color, zones)| ProvinceShape {
            color,
            region: merge_regions(zones.iter().copied().map(Region::from), width),
            edges: edges.remove(&color).unwrap_or_default(),
            cover_zones: zones,
        })
        .collect();
    shapes.sort_by_key(|s| s.color);
    Ok(shapes)
}

/// Decomposes the bitmap into per-color cover zones.
///
/// Classic region quadtree with an explicit work stack: pop a tile, keep
/// it whole if it is a single color, otherwise split it into 4 equal
/// quadrants, bottoming out at single pixels. The bitmap dimensions are
/// multiples of [TILE_SIZE], so the halving always lands on integers.
fn cover_zones(bitmap: &ProvinceBitmap) -> HashMap<Color, Vec<Zone>> {
    let mut zones: HashMap<Color, Vec<Zone>> = HashMap::default();
    let mut stack: Vec<Zone> = Vec::new();
    let tile = TILE_SIZE as i32;
    let mut y = bitmap.height() as i32 - tile;
    while y >= 0 {
        let mut x = bitmap.width() as i32 - tile;
        while x >= 0 {
            stack.push(Zone::new(x, y, tile, tile));
            x -= tile;
        }
        y -= tile;
    }
    while let Some(zone) = stack.pop() {
        match uniform_color(bitmap, &zone) {
            Some(color) => zones.entry(color).or_default().push(zone),
            None => {
                let hw = zone.w / 2;
                let hh = zone.h / 2;
                stack.push(Zone::new(zone.x, zone.y, hw, hh));
                stack.push(Zone::new(zone.x + hw, zone.y, hw, hh));
                stack.push(Zone::new(zone.x, zone.y + hh, hw, hh));
                stack.push(Zone::new(zone.x + hw, zone.y + hh, hw, hh));
            }
        }
    }
    zones
}

/// The color of the zone if all its pixels share one, None otherwise.
fn uniform_color(bitmap: &ProvinceBitmap, zone: &Zone) -> Option<Color> {
    let first = bitmap.color_at(zone.x as u32, zone.y as u32);
    for y in zone.y..zone.bottom() {
        for x in zone.x..zone.right() {
            if bitmap.color_at(x as u32, y as u32) != first {
                return None;
            }
        }
    }
    Some(first)
}

/// Traces the borders of every connected same-color component and stitches
/// them into per-neighbor-color polylines.
///
/// Flood fill with an explicit stack over the 4-neighborhood; x wraps
/// around the seam, y clips at the map bounds where the neighbor becomes
/// the off-map sentinel. Every pixel contributes one unit segment per
/// differently-colored neighbor, oriented clockwise around the pixel so
/// that segments of one border chain head-to-tail. The cancellation token
/// is polled between components; on cancellation the partial result is
/// dropped.
fn trace_edges(
    bitmap: &ProvinceBitmap,
    cancel: &CancelToken,
) -> Result<HashMap<Color, Vec<RawEdge>>, LoadCancelled> {
    let width = bitmap.width() as i32;
    let height = bitmap.height() as i32;
    let mut visited = vec![false; (width * height) as usize];
    let mut segments: HashMap<Color, HashMap<Option<Color>, Vec<(Point, Point)>>> =
        HashMap::default();
    let mut stack: Vec<(i32, i32)> = Vec::new();
    for start_y in 0..height {
        for start_x in 0..width {
            if visited[(start_y * width + start_x) as usize] {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(LoadCancelled);
            }
            let color = bitmap.color_at(start_x as u32, start_y as u32);
            let by_neighbor = segments.entry(color).or_default();
            visited[(start_y * width + start_x) as usize] = true;
            stack.push((start_x, start_y));
            while let Some((x, y)) = stack.pop() {
                // up
                let up = Point::new(x, y);
                let up_end = Point::new(x + 1, y);
                if y == 0 {
                    by_neighbor.entry(None).or_default().push((up, up_end));
                } else {
                    visit_neighbor(
                        bitmap, color, x, y - 1, (up, up_end), by_neighbor, &mut visited, &mut stack, width,
                    );
                }
                // right
                let rx = (x + 1) % width;
                visit_neighbor(
                    bitmap,
                    color,
                    rx,
                    y,
                    (Point::new(x + 1, y), Point::new(x + 1, y + 1)),
                    by_neighbor,
                    &mut visited,
                    &mut stack,
                    width,
                );
                // down
                let down = Point::new(x + 1, y + 1);
                let down_end = Point::new(x, y + 1);
                if y == height - 1 {
                    by_neighbor.entry(None).or_default().push((down, down_end));
                } else {
                    visit_neighbor(
                        bitmap, color, x, y + 1, (down, down_end), by_neighbor, &mut visited, &mut stack, width,
                    );
                }
                // left
                let lx = (x + width - 1) % width;
                visit_neighbor(
                    bitmap,
                    color,
                    lx,
                    y,
                    (Point::new(x, y + 1), Point::new(x, y)),
                    by_neighbor,
                    &mut visited,
                    &mut stack,
                    width,
                );
            }
        }
    }
    let mut edges: HashMap<Color, Vec<RawEdge>> = HashMap::default();
    for (color, by_neighbor) in segments {
        let mut list: Vec<RawEdge> = by_neighbor
            .into_iter()
            .filter(|(_, segs)| !segs.is_empty())
            .map(|(to_color, segs)| RawEdge {
                to_color,
                paths: stitch_segments(segs),
            })
            .collect();
        list.sort_by_key(|e| e.to_color);
        if !list.is_empty() {
            edges.insert(color, list);
        }
    }
    Ok(edges)
}

/// Handles one in-bounds neighbor during the flood fill: same color means
/// more fill work, a different color records the unit boundary segment.
#[allow(clippy::too_many_arguments)]
fn visit_neighbor(
    bitmap: &ProvinceBitmap,
    color: Color,
    nx: i32,
    ny: i32,
    segment: (Point, Point),
    by_neighbor: &mut HashMap<Option<Color>, Vec<(Point, Point)>>,
    visited: &mut [bool],
    stack: &mut Vec<(i32, i32)>,
    width: i32,
) {
    let neighbor = bitmap.color_at(nx as u32, ny as u32);
    if neighbor == color {
        let idx = (ny * width + nx) as usize;
        if !visited[idx] {
            visited[idx] = true;
            stack.push((nx, ny));
        }
    } else {
        by_neighbor.entry(Some(neighbor)).or_default().push(segment);
    }
}

/// Chains unit segments into polylines by repeatedly matching an open
/// path's tail against a segment's head and vice versa, then collapses
/// colinear runs into their end points.
fn stitch_segments(segments: Vec<(Point, Point)>) -> Vec<Vec<Point>> {
    let mut paths: Vec<Vec<Point>> = Vec::new();
    'segments: for (head, tail) in segments {
        for path in paths.iter_mut() {
            if *path.last().unwrap() == head {
                path.push(tail);
                continue 'segments;
            }
            if path[0] == tail {
                path.insert(0, head);
                continue 'segments;
            }
        }
        paths.push(vec![head, tail]);
    }
    // partial chains can only join up once both have been built
    loop {
        let mut merged = None;
        'search: for i in 0..paths.len() {
            for j in 0..paths.len() {
                if i != j && paths[i].last() == paths[j].first() {
                    merged = Some((i, j));
                    break 'search;
                }
            }
        }
        match merged {
            Some((i, j)) => {
                let mut tail = paths.remove(j);
                let i = if j < i { i - 1 } else { i };
                tail.remove(0);
                paths[i].append(&mut tail);
            }
            None => break,
        }
    }
    for path in paths.iter_mut() {
        collapse_colinear(path);
    }
    paths
}

fn collapse_colinear(path: &mut Vec<Point>) {
    let mut compact: Vec<Point> = Vec::with_capacity(path.len());
    for point in path.iter() {
        if compact.len() >= 2 {
            let a = compact[compact.len() - 2];
            let b = compact[compact.len() - 1];
            let prev = ((b.x - a.x).signum(), (b.y - a.y).signum());
            let next = ((point.x - b.x).signum(), (point.y - b.y).signum());
            if prev == next {
                compact.pop();
            }
        }
        compact.push(*point);
    }
    *path = compact;
}

/// Scans every interior 2x2 pixel block for four mutually distinct
/// colors. Returns data only; the loader layer turns these into warnings.
pub fn find_x_crossings(bitmap: &ProvinceBitmap) -> Vec<XCrossing> {
    let mut crossings = Vec::new();
    for y in 0..bitmap.height() - 1 {
        for x in 0..bitmap.width() - 1 {
            let tl = bitmap.color_at(x, y);
            let tr = bitmap.color_at(x + 1, y);
            let bl = bitmap.color_at(x, y + 1);
            let br = bitmap.color_at(x + 1, y + 1);
            if tl != tr && tl != bl && tl != br && tr != bl && tr != br && bl != br {
                crossings.push(XCrossing {
                    pos: Point::new(x as i32 + 1, y as i32 + 1),
                    colors: [tl, tr, bl, br],
                });
            }
        }
    }
    crossings
}
