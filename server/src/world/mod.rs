//! Collision world queries.
//!
//! Everything the engines need from map geometry goes through [`WorldQuery`].
//! The pure-Rust [`StaticWorld`] answers from per-map geometry files; with the
//! `native` feature the same queries can be served by the native library.

mod static_world;

pub use static_world::{HeightGrid, LiquidVolume, MapData, StaticWorld, Terrain};

use serde::{Deserialize, Serialize};
use shared::{LiquidSample, Point3D};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("map directory {0} does not exist")]
    MissingMapDirectory(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("map {0} is defined twice")]
    DuplicateMap(u32),
    #[error("map {map_id}: {reason}")]
    InvalidMap { map_id: u32, reason: String },
    #[error("native navigation library failed to initialize (status {0})")]
    NativeInit(i32),
}

/// A supporting surface found under a probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundSample {
    pub height: f32,
    pub normal: Point3D,
}

/// First contact of a swept box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    /// Fraction of the requested motion travelled before contact, in [0, 1].
    pub fraction: f32,
    /// Contact normal pointing away from the obstacle.
    pub normal: Point3D,
}

/// Map geometry queries shared by the pathfinder and the physics stepper.
pub trait WorldQuery: Send + Sync {
    fn loaded_maps(&self) -> BTreeSet<u32>;

    fn has_map(&self, map_id: u32) -> bool {
        self.loaded_maps().contains(&map_id)
    }

    /// True when nothing solid lies between `from` and `to`.
    fn line_of_sight(&self, map_id: u32, from: Point3D, to: Point3D) -> bool;

    /// Highest surface at (x, y) no higher than slightly above `z_hint` and
    /// no lower than `z_hint - max_search`.
    fn ground_height(
        &self,
        map_id: u32,
        x: f32,
        y: f32,
        z_hint: f32,
        max_search: f32,
    ) -> Option<GroundSample>;

    fn liquid_at(&self, map_id: u32, position: Point3D) -> Option<LiquidSample>;

    /// Sweeps an axis-aligned box centred at `center` by `motion` against
    /// static geometry.
    fn sweep_box(
        &self,
        map_id: u32,
        center: Point3D,
        half_extents: Point3D,
        motion: Point3D,
    ) -> Option<SweepHit>;
}

/// How far above the hint a surface may be and still count as ground.
pub const GROUND_HINT_TOLERANCE: f32 = 0.5;

/// Axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3D,
    pub max: Point3D,
}

impl Aabb {
    pub fn new(min: Point3D, max: Point3D) -> Self {
        Self { min, max }
    }

    pub fn from_center(center: Point3D, half_extents: Point3D) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite()
            && self.max.is_finite()
            && self.min.x <= self.max.x
            && self.min.y <= self.max.y
            && self.min.z <= self.max.z
    }

    pub fn center(&self) -> Point3D {
        self.min.lerp(&self.max, 0.5)
    }

    pub fn contains_xy(&self, x: f32, y: f32) -> bool {
        x >= self.min.x && x <= self.max.x && y >= self.min.y && y <= self.max.y
    }

    pub fn contains(&self, p: &Point3D) -> bool {
        self.contains_xy(p.x, p.y) && p.z >= self.min.z && p.z <= self.max.z
    }

    /// Grows the box by `extents` on every side (Minkowski sum with a box).
    pub fn expanded(&self, extents: Point3D) -> Aabb {
        Aabb {
            min: self.min - extents,
            max: self.max + extents,
        }
    }

    /// Shrinks the box by `amount` on every side, never inverting it.
    pub fn shrunk(&self, amount: f32) -> Aabb {
        let center = self.center();
        let shrink = |lo: f32, hi: f32, c: f32| -> (f32, f32) {
            if hi - lo > 2.0 * amount {
                (lo + amount, hi - amount)
            } else {
                (c, c)
            }
        };
        let (min_x, max_x) = shrink(self.min.x, self.max.x, center.x);
        let (min_y, max_y) = shrink(self.min.y, self.max.y, center.y);
        let (min_z, max_z) = shrink(self.min.z, self.max.z, center.z);
        Aabb {
            min: Point3D::new(min_x, min_y, min_z),
            max: Point3D::new(max_x, max_y, max_z),
        }
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    /// Slab test for the segment `origin + t * motion`, `t` in [0, 1].
    ///
    /// Returns the entry fraction and the face normal that was hit. A segment
    /// that starts inside the box reports no hit.
    pub fn ray_cast(&self, origin: Point3D, motion: Point3D) -> Option<SweepHit> {
        let origin_axes = [origin.x, origin.y, origin.z];
        let motion_axes = [motion.x, motion.y, motion.z];
        let min_axes = [self.min.x, self.min.y, self.min.z];
        let max_axes = [self.max.x, self.max.y, self.max.z];

        let mut t_enter = f32::NEG_INFINITY;
        let mut t_exit = f32::INFINITY;
        let mut enter_axis = 0usize;
        let mut enter_sign = 0.0f32;

        for axis in 0..3 {
            let o = origin_axes[axis];
            let d = motion_axes[axis];
            if d.abs() < 1e-9 {
                if o < min_axes[axis] || o > max_axes[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (min_axes[axis] - o) * inv;
            let mut t1 = (max_axes[axis] - o) * inv;
            // normal of the face entered along this axis
            let mut sign = -1.0;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
                sign = 1.0;
            }
            if t0 > t_enter {
                t_enter = t0;
                enter_axis = axis;
                enter_sign = sign;
            }
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return None;
            }
        }

        if t_enter < 0.0 || t_enter > 1.0 || !t_enter.is_finite() {
            return None;
        }

        let mut normal = Point3D::ZERO;
        match enter_axis {
            0 => normal.x = enter_sign,
            1 => normal.y = enter_sign,
            _ => normal.z = enter_sign,
        }
        Some(SweepHit {
            fraction: t_enter,
            normal,
        })
    }

    /// Smallest horizontal translation that moves `self` out of `other`.
    pub fn horizontal_push_out(&self, other: &Aabb) -> Option<Point3D> {
        if !self.intersects(other) {
            return None;
        }
        let push_pos_x = other.max.x - self.min.x;
        let push_neg_x = self.max.x - other.min.x;
        let push_pos_y = other.max.y - self.min.y;
        let push_neg_y = self.max.y - other.min.y;

        let candidates = [
            (push_pos_x, Point3D::new(push_pos_x, 0.0, 0.0)),
            (push_neg_x, Point3D::new(-push_neg_x, 0.0, 0.0)),
            (push_pos_y, Point3D::new(0.0, push_pos_y, 0.0)),
            (push_neg_y, Point3D::new(0.0, -push_neg_y, 0.0)),
        ];
        candidates
            .iter()
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, v)| *v)
    }
}
