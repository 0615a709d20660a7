use super::{Aabb, GroundSample, SweepHit, WorldError, WorldQuery, GROUND_HINT_TOLERANCE};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::{LiquidKind, LiquidSample, Point3D};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Points this far below terrain count as occluded.
const TERRAIN_LOS_TOLERANCE: f32 = 0.1;
/// Horizontal sampling step when testing a segment against a height grid.
const TERRAIN_LOS_STEP: f32 = 1.0;
/// Long segments are sampled more coarsely past this many samples.
const MAX_TERRAIN_LOS_SAMPLES: usize = 4096;
/// Obstacles are shrunk by this much for visibility so segments grazing a
/// face are not blocked.
const LOS_SKIN: f32 = 0.01;
/// Liquid is reported up to this far above its surface.
const LIQUID_PROBE_HEIGHT: f32 = 4.0;

/// Regular height grid, row-major, `columns * rows` vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeightGrid {
    pub origin_x: f32,
    pub origin_y: f32,
    pub cell_size: f32,
    pub columns: u32,
    pub rows: u32,
    pub heights: Vec<f32>,
}

impl HeightGrid {
    fn validate(&self) -> Result<(), String> {
        if self.columns < 2 || self.rows < 2 {
            return Err("height grid needs at least 2x2 vertices".to_string());
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(format!("invalid cell size {}", self.cell_size));
        }
        let expected = self.columns as usize * self.rows as usize;
        if self.heights.len() != expected {
            return Err(format!(
                "height grid has {} samples, expected {}",
                self.heights.len(),
                expected
            ));
        }
        if !self.origin_x.is_finite()
            || !self.origin_y.is_finite()
            || self.heights.iter().any(|h| !h.is_finite())
        {
            return Err("height grid contains non-finite values".to_string());
        }
        Ok(())
    }

    fn vertex(&self, col: usize, row: usize) -> f32 {
        self.heights[row * self.columns as usize + col]
    }

    /// Bilinear height and surface normal at (x, y).
    pub fn sample(&self, x: f32, y: f32) -> Option<GroundSample> {
        let gx = (x - self.origin_x) / self.cell_size;
        let gy = (y - self.origin_y) / self.cell_size;
        let max_x = (self.columns - 1) as f32;
        let max_y = (self.rows - 1) as f32;
        if !(gx >= 0.0 && gy >= 0.0 && gx <= max_x && gy <= max_y) {
            return None;
        }

        let col = (gx.floor() as usize).min(self.columns as usize - 2);
        let row = (gy.floor() as usize).min(self.rows as usize - 2);
        let fx = gx - col as f32;
        let fy = gy - row as f32;

        let h00 = self.vertex(col, row);
        let h10 = self.vertex(col + 1, row);
        let h01 = self.vertex(col, row + 1);
        let h11 = self.vertex(col + 1, row + 1);

        let height = h00 * (1.0 - fx) * (1.0 - fy)
            + h10 * fx * (1.0 - fy)
            + h01 * (1.0 - fx) * fy
            + h11 * fx * fy;
        let dh_dx = ((h10 - h00) * (1.0 - fy) + (h11 - h01) * fy) / self.cell_size;
        let dh_dy = ((h01 - h00) * (1.0 - fx) + (h11 - h10) * fx) / self.cell_size;

        Some(GroundSample {
            height,
            normal: Point3D::new(-dh_dx, -dh_dy, 1.0).normalize(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Terrain {
    #[default]
    None,
    Flat {
        height: f32,
    },
    Grid(HeightGrid),
}

impl Terrain {
    fn sample(&self, x: f32, y: f32) -> Option<GroundSample> {
        match self {
            Terrain::None => None,
            Terrain::Flat { height } => Some(GroundSample {
                height: *height,
                normal: Point3D::UP,
            }),
            Terrain::Grid(grid) => grid.sample(x, y),
        }
    }

    fn occludes(&self, from: Point3D, to: Point3D) -> bool {
        match self {
            Terrain::None => false,
            // a segment's lowest point against a plane is one of its ends
            Terrain::Flat { height } => {
                from.z < height - TERRAIN_LOS_TOLERANCE || to.z < height - TERRAIN_LOS_TOLERANCE
            }
            Terrain::Grid(grid) => {
                let wanted = (from.distance_2d(&to) / TERRAIN_LOS_STEP).ceil().max(1.0);
                let steps = if wanted.is_finite() {
                    (wanted as usize).min(MAX_TERRAIN_LOS_SAMPLES)
                } else {
                    MAX_TERRAIN_LOS_SAMPLES
                };
                (0..=steps).any(|i| {
                    let p = from.lerp(&to, i as f32 / steps as f32);
                    grid.sample(p.x, p.y)
                        .map_or(false, |g| p.z < g.height - TERRAIN_LOS_TOLERANCE)
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidVolume {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
    /// Bottom of the liquid column.
    pub floor: f32,
    /// Surface height.
    pub level: f32,
    pub kind: LiquidKind,
}

impl LiquidVolume {
    fn contains(&self, p: &Point3D) -> bool {
        p.x >= self.min_x
            && p.x <= self.max_x
            && p.y >= self.min_y
            && p.y <= self.max_y
            && p.z >= self.floor
            && p.z <= self.level + LIQUID_PROBE_HEIGHT
    }
}

/// Geometry of one map as stored in `<data>/maps/<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapData {
    pub map_id: u32,
    #[serde(default)]
    pub terrain: Terrain,
    #[serde(default)]
    pub obstacles: Vec<Aabb>,
    #[serde(default)]
    pub liquids: Vec<LiquidVolume>,
}

impl MapData {
    /// An empty map with flat ground.
    pub fn flat(map_id: u32, height: f32) -> Self {
        Self {
            map_id,
            terrain: Terrain::Flat { height },
            obstacles: Vec::new(),
            liquids: Vec::new(),
        }
    }

    pub fn with_obstacle(mut self, obstacle: Aabb) -> Self {
        self.obstacles.push(obstacle);
        self
    }

    pub fn with_liquid(mut self, liquid: LiquidVolume) -> Self {
        self.liquids.push(liquid);
        self
    }

    fn validate(&self) -> Result<(), WorldError> {
        let invalid = |reason: String| WorldError::InvalidMap {
            map_id: self.map_id,
            reason,
        };
        match &self.terrain {
            Terrain::Flat { height } if !height.is_finite() => {
                return Err(invalid("flat terrain height is not finite".to_string()))
            }
            Terrain::Grid(grid) => grid.validate().map_err(invalid)?,
            _ => {}
        }
        if let Some(i) = self.obstacles.iter().position(|o| !o.is_valid()) {
            return Err(invalid(format!("obstacle {} has invalid bounds", i)));
        }
        for (i, l) in self.liquids.iter().enumerate() {
            let values = [l.min_x, l.min_y, l.max_x, l.max_y, l.floor, l.level];
            if values.iter().any(|v| !v.is_finite()) || l.min_x > l.max_x || l.min_y > l.max_y {
                return Err(invalid(format!("liquid {} has invalid bounds", i)));
            }
        }
        Ok(())
    }
}

/// Pure-Rust collision world built from map geometry files.
#[derive(Debug, Default)]
pub struct StaticWorld {
    maps: BTreeMap<u32, MapData>,
}

impl StaticWorld {
    pub fn from_maps(maps: impl IntoIterator<Item = MapData>) -> Result<Self, WorldError> {
        let mut world = StaticWorld::default();
        for map in maps {
            map.validate()?;
            if world.maps.contains_key(&map.map_id) {
                return Err(WorldError::DuplicateMap(map.map_id));
            }
            world.maps.insert(map.map_id, map);
        }
        Ok(world)
    }

    /// Loads every `*.json` file under `<data_dir>/maps`.
    pub fn load_dir(data_dir: &Path) -> Result<Self, WorldError> {
        let map_dir = data_dir.join("maps");
        if !map_dir.is_dir() {
            return Err(WorldError::MissingMapDirectory(map_dir));
        }

        let entries = fs::read_dir(&map_dir).map_err(|source| WorldError::Io {
            path: map_dir.clone(),
            source,
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
            .collect();
        paths.sort();

        let mut maps = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = fs::read(&path).map_err(|source| WorldError::Io {
                path: path.clone(),
                source,
            })?;
            let map: MapData = serde_json::from_slice(&bytes).map_err(|source| {
                WorldError::Parse {
                    path: path.clone(),
                    source,
                }
            })?;
            debug!(
                "Parsed map {} from {} ({} obstacles, {} liquids)",
                map.map_id,
                path.display(),
                map.obstacles.len(),
                map.liquids.len()
            );
            maps.push(map);
        }

        if maps.is_empty() {
            warn!("No map files found in {}", map_dir.display());
        }
        let world = Self::from_maps(maps)?;
        info!("Loaded {} maps from {}", world.maps.len(), map_dir.display());
        Ok(world)
    }

    pub fn map(&self, map_id: u32) -> Option<&MapData> {
        self.maps.get(&map_id)
    }
}

impl WorldQuery for StaticWorld {
    fn loaded_maps(&self) -> BTreeSet<u32> {
        self.maps.keys().copied().collect()
    }

    fn has_map(&self, map_id: u32) -> bool {
        self.maps.contains_key(&map_id)
    }

    fn line_of_sight(&self, map_id: u32, from: Point3D, to: Point3D) -> bool {
        let Some(map) = self.maps.get(&map_id) else {
            return false;
        };
        if !from.is_finite() || !to.is_finite() {
            return false;
        }
        let motion = to - from;
        let blocked_by_obstacle = map
            .obstacles
            .iter()
            .any(|o| o.shrunk(LOS_SKIN).ray_cast(from, motion).is_some());

        !blocked_by_obstacle && !map.terrain.occludes(from, to)
    }

    fn ground_height(
        &self,
        map_id: u32,
        x: f32,
        y: f32,
        z_hint: f32,
        max_search: f32,
    ) -> Option<GroundSample> {
        let map = self.maps.get(&map_id)?;
        let ceiling = z_hint + GROUND_HINT_TOLERANCE;
        let floor = z_hint - max_search.max(0.0);

        let terrain = map.terrain.sample(x, y);
        let tops = map
            .obstacles
            .iter()
            .filter(|o| o.contains_xy(x, y))
            .map(|o| GroundSample {
                height: o.max.z,
                normal: Point3D::UP,
            });

        terrain
            .into_iter()
            .chain(tops)
            .filter(|g| g.height <= ceiling && g.height >= floor)
            .max_by(|a, b| a.height.total_cmp(&b.height))
    }

    fn liquid_at(&self, map_id: u32, position: Point3D) -> Option<LiquidSample> {
        let map = self.maps.get(&map_id)?;
        map.liquids
            .iter()
            .filter(|l| l.contains(&position))
            .max_by(|a, b| a.level.total_cmp(&b.level))
            .map(|l| LiquidSample {
                level: l.level,
                kind: l.kind,
            })
    }

    fn sweep_box(
        &self,
        map_id: u32,
        center: Point3D,
        half_extents: Point3D,
        motion: Point3D,
    ) -> Option<SweepHit> {
        let map = self.maps.get(&map_id)?;
        map.obstacles
            .iter()
            .filter_map(|o| o.expanded(half_extents).ray_cast(center, motion))
            .min_by(|a, b| a.fraction.total_cmp(&b.fraction))
    }
}
