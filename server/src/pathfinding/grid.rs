//! Mesh-free path search driven only by a visibility predicate.
//!
//! The plane around start/end is quantized into square cells. A* expands
//! 8-connected neighbours, and a step between two cells is only legal when the
//! two cell centres can see each other, which is what keeps the search out of
//! walls without any navigation mesh. The raw cell chain is then collapsed by
//! jumping to the farthest point still visible from the current anchor.
//!
//! Cell heights are interpolated along the straight start→end line rather
//! than following terrain.

use shared::Point3D;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSearchConfig {
    /// Edge length of one search cell.
    pub cell_size: f32,
    /// Spacing of points on a directly visible segment.
    pub sample_spacing: f32,
    /// Padding added around the start/end bounding rectangle.
    pub search_margin: f32,
    /// Maximum node expansions before the search gives up.
    pub node_budget: usize,
    /// A node this close to `end` (and seeing it) finishes the search.
    pub goal_radius: f32,
    /// Start and end closer than this are treated as the same spot.
    pub same_point_tolerance: f32,
}

impl Default for GridSearchConfig {
    fn default() -> Self {
        Self {
            cell_size: 4.0,
            sample_spacing: 4.0,
            search_margin: 40.0,
            node_budget: 20_000,
            goal_radius: 6.0,
            same_point_tolerance: 0.5,
        }
    }
}

/// Grids wider than this many cells on an axis are not searched.
const MAX_GRID_SPAN: f32 = 100_000.0;

/// Upper bound on points produced for one visible segment. Longer segments
/// get a wider spacing instead of more points.
pub const MAX_SEGMENT_POINTS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchStats {
    pub expanded: usize,
    pub budget_exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Cell {
    i: i32,
    j: i32,
}

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    f: f32,
    g: f32,
    cell: Cell,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    // BinaryHeap is a max-heap: invert so the lowest f pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| self.g.total_cmp(&other.g))
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

/// Bounded plane the search runs over.
struct SearchGrid {
    min_x: f32,
    min_y: f32,
    cell_size: f32,
    columns: i32,
    rows: i32,
    start: Point3D,
    end: Point3D,
}

impl SearchGrid {
    fn new(start: Point3D, end: Point3D, config: &GridSearchConfig) -> Option<Self> {
        let min_x = start.x.min(end.x) - config.search_margin;
        let min_y = start.y.min(end.y) - config.search_margin;
        let max_x = start.x.max(end.x) + config.search_margin;
        let max_y = start.y.max(end.y) + config.search_margin;

        let span_x = ((max_x - min_x) / config.cell_size).ceil();
        let span_y = ((max_y - min_y) / config.cell_size).ceil();
        if !(span_x.is_finite() && span_y.is_finite())
            || span_x > MAX_GRID_SPAN
            || span_y > MAX_GRID_SPAN
        {
            return None;
        }

        Some(Self {
            min_x,
            min_y,
            cell_size: config.cell_size,
            columns: (span_x as i32).max(1),
            rows: (span_y as i32).max(1),
            start,
            end,
        })
    }

    fn quantize(&self, p: &Point3D) -> Cell {
        let i = ((p.x - self.min_x) / self.cell_size).floor() as i32;
        let j = ((p.y - self.min_y) / self.cell_size).floor() as i32;
        Cell {
            i: i.clamp(0, self.columns - 1),
            j: j.clamp(0, self.rows - 1),
        }
    }

    fn contains(&self, cell: Cell) -> bool {
        cell.i >= 0 && cell.j >= 0 && cell.i < self.columns && cell.j < self.rows
    }

    fn center(&self, cell: Cell) -> Point3D {
        let x = self.min_x + (cell.i as f32 + 0.5) * self.cell_size;
        let y = self.min_y + (cell.j as f32 + 0.5) * self.cell_size;
        Point3D::new(x, y, self.interpolated_z(x, y))
    }

    /// Height along the start→end parametrization, not the terrain.
    fn interpolated_z(&self, x: f32, y: f32) -> f32 {
        let dx = self.end.x - self.start.x;
        let dy = self.end.y - self.start.y;
        let len_sq = dx * dx + dy * dy;
        if len_sq <= f32::EPSILON {
            return self.start.z;
        }
        let t = (((x - self.start.x) * dx + (y - self.start.y) * dy) / len_sq).clamp(0.0, 1.0);
        self.start.z + t * (self.end.z - self.start.z)
    }
}

fn manhattan(a: Cell, b: Cell) -> f32 {
    ((a.i - b.i).abs() + (a.j - b.j).abs()) as f32
}

const NEIGHBOURS: [(i32, i32, f32); 8] = [
    (1, 0, 1.0),
    (-1, 0, 1.0),
    (0, 1, 1.0),
    (0, -1, 1.0),
    (1, 1, std::f32::consts::SQRT_2),
    (1, -1, std::f32::consts::SQRT_2),
    (-1, 1, std::f32::consts::SQRT_2),
    (-1, -1, std::f32::consts::SQRT_2),
];

#[derive(Debug, Clone, Default)]
pub struct GridSearch {
    config: GridSearchConfig,
}

impl GridSearch {
    pub fn new(config: GridSearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GridSearchConfig {
        &self.config
    }

    pub fn find_path<F>(&self, start: Point3D, end: Point3D, visible: F) -> Vec<Point3D>
    where
        F: Fn(Point3D, Point3D) -> bool,
    {
        self.find_path_with_stats(start, end, visible).0
    }

    /// Runs the fallback search. Never returns non-finite points; returns an
    /// empty path when no route is found within the node budget.
    pub fn find_path_with_stats<F>(
        &self,
        start: Point3D,
        end: Point3D,
        visible: F,
    ) -> (Vec<Point3D>, SearchStats)
    where
        F: Fn(Point3D, Point3D) -> bool,
    {
        let mut stats = SearchStats::default();
        if !start.is_finite() || !end.is_finite() {
            return (Vec::new(), stats);
        }

        if start.distance(&end) < self.config.same_point_tolerance {
            return (vec![start, end], stats);
        }

        if visible(start, end) {
            return (self.resample_segment(start, end), stats);
        }

        let Some(grid) = SearchGrid::new(start, end, &self.config) else {
            return (Vec::new(), stats);
        };

        let start_cell = grid.quantize(&start);
        let goal_cell = grid.quantize(&end);

        let mut open = BinaryHeap::new();
        let mut closed: HashSet<Cell> = HashSet::new();
        let mut g_score: HashMap<Cell, f32> = HashMap::new();
        let mut came_from: HashMap<Cell, Cell> = HashMap::new();

        g_score.insert(start_cell, 0.0);
        open.push(OpenNode {
            f: manhattan(start_cell, goal_cell),
            g: 0.0,
            cell: start_cell,
        });

        while let Some(node) = open.pop() {
            if !closed.insert(node.cell) {
                continue;
            }
            if stats.expanded >= self.config.node_budget {
                stats.budget_exhausted = true;
                return (Vec::new(), stats);
            }
            stats.expanded += 1;

            let center = grid.center(node.cell);
            if center.distance_2d(&end) <= self.config.goal_radius && visible(center, end) {
                let cells = reconstruct(&came_from, node.cell);
                let mut points = Vec::with_capacity(cells.len() + 2);
                points.push(start);
                points.extend(cells.into_iter().map(|c| grid.center(c)));
                points.push(end);
                let simplified = simplify(&points, &visible);
                return (simplified.into_iter().filter(Point3D::is_finite).collect(), stats);
            }

            for (di, dj, step) in NEIGHBOURS {
                let next = Cell {
                    i: node.cell.i + di,
                    j: node.cell.j + dj,
                };
                if !grid.contains(next) || closed.contains(&next) {
                    continue;
                }
                let tentative = node.g + step;
                if g_score.get(&next).map_or(false, |&g| g <= tentative) {
                    continue;
                }
                if !visible(center, grid.center(next)) {
                    continue;
                }
                g_score.insert(next, tentative);
                came_from.insert(next, node.cell);
                open.push(OpenNode {
                    f: tentative + manhattan(next, goal_cell),
                    g: tentative,
                    cell: next,
                });
            }
        }

        (Vec::new(), stats)
    }

    /// Evenly spaced points from `start` to `end` inclusive, at most
    /// [`MAX_SEGMENT_POINTS`] of them.
    pub fn resample_segment(&self, start: Point3D, end: Point3D) -> Vec<Point3D> {
        let spacing = self.config.sample_spacing.max(f32::EPSILON);
        let wanted = (start.distance(&end) / spacing).ceil().max(1.0);
        let segments = if wanted.is_finite() {
            (wanted as usize).min(MAX_SEGMENT_POINTS - 1)
        } else {
            MAX_SEGMENT_POINTS - 1
        };
        let mut points: Vec<Point3D> = (0..segments)
            .map(|i| start.lerp(&end, i as f32 / segments as f32))
            .collect();
        points.push(end);
        points
    }
}

fn reconstruct(came_from: &HashMap<Cell, Cell>, goal: Cell) -> Vec<Cell> {
    let mut cells = vec![goal];
    let mut current = goal;
    while let Some(&parent) = came_from.get(&current) {
        cells.push(parent);
        current = parent;
    }
    cells.reverse();
    cells
}

/// Keeps only the points needed to stay visible: from each anchor, jump to
/// the farthest later point the anchor can see.
pub fn simplify<F>(points: &[Point3D], visible: &F) -> Vec<Point3D>
where
    F: Fn(Point3D, Point3D) -> bool,
{
    if points.len() <= 2 {
        return points.to_vec();
    }

    let mut out = vec![points[0]];
    let mut anchor = 0;
    let last = points.len() - 1;
    while anchor < last {
        let next = (anchor + 2..=last)
            .rev()
            .find(|&candidate| visible(points[anchor], points[candidate]))
            .unwrap_or(anchor + 1);
        out.push(points[next]);
        anchor = next;
    }
    out
}
