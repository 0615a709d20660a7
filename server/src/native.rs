//! Adapter for the native mesh/collision library (`native` feature).
//!
//! The library is linked as `libnavigation` and exposes a flat C ABI. Every
//! call is wrapped here so the rest of the server only sees [`WorldQuery`] and
//! [`PathSource`]. Non-finite output is filtered by the callers.

use crate::pathfinding::{PathSource, PathSourceError};
use crate::world::{GroundSample, SweepHit, WorldError, WorldQuery};
use log::{info, warn};
use shared::{LiquidKind, LiquidSample, PathRequest, Point3D};
use std::collections::BTreeSet;
use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::sync::Arc;

const MAX_PATH_CORNERS: usize = 256;
const MAX_MAPS: usize = 1024;
const NAV_OK: c_int = 0;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct NavVec3 {
    x: f32,
    y: f32,
    z: f32,
}

impl From<Point3D> for NavVec3 {
    fn from(p: Point3D) -> Self {
        NavVec3 {
            x: p.x,
            y: p.y,
            z: p.z,
        }
    }
}

impl From<NavVec3> for Point3D {
    fn from(v: NavVec3) -> Self {
        Point3D::new(v.x, v.y, v.z)
    }
}

#[link(name = "navigation")]
extern "C" {
    fn nav_initialize(data_dir: *const c_char) -> c_int;
    fn nav_loaded_maps(out: *mut u32, capacity: u32) -> u32;
    fn nav_find_path(
        map_id: u32,
        start: *const NavVec3,
        end: *const NavVec3,
        smooth: c_int,
        out: *mut NavVec3,
        capacity: u32,
        out_count: *mut u32,
    ) -> c_int;
    fn nav_line_of_sight(map_id: u32, from: *const NavVec3, to: *const NavVec3) -> c_int;
    fn nav_ground_height(
        map_id: u32,
        x: f32,
        y: f32,
        z_hint: f32,
        max_search: f32,
        out_height: *mut f32,
        out_normal: *mut NavVec3,
    ) -> c_int;
    fn nav_liquid_at(
        map_id: u32,
        position: *const NavVec3,
        out_level: *mut f32,
        out_kind: *mut u32,
    ) -> c_int;
    fn nav_sweep_box(
        map_id: u32,
        center: *const NavVec3,
        half_extents: *const NavVec3,
        motion: *const NavVec3,
        out_fraction: *mut f32,
        out_normal: *mut NavVec3,
    ) -> c_int;
}

fn liquid_kind(raw: u32) -> LiquidKind {
    match raw {
        1 => LiquidKind::Ocean,
        2 => LiquidKind::Magma,
        3 => LiquidKind::Slime,
        _ => LiquidKind::Water,
    }
}

/// Collision world served by the native library.
pub struct NativeWorld {
    maps: BTreeSet<u32>,
}

impl NativeWorld {
    /// Loads every map under `data_dir`. Blocking and slow.
    pub fn open(data_dir: &Path) -> Result<Self, WorldError> {
        let dir = CString::new(data_dir.to_string_lossy().into_owned()).map_err(|_| {
            WorldError::InvalidMap {
                map_id: 0,
                reason: format!("data directory {} contains a NUL byte", data_dir.display()),
            }
        })?;

        let status = unsafe { nav_initialize(dir.as_ptr()) };
        if status != NAV_OK {
            return Err(WorldError::NativeInit(status));
        }

        let mut ids = vec![0u32; MAX_MAPS];
        let count = unsafe { nav_loaded_maps(ids.as_mut_ptr(), ids.len() as u32) } as usize;
        ids.truncate(count.min(MAX_MAPS));
        let maps: BTreeSet<u32> = ids.into_iter().collect();

        info!("Native library loaded {} maps", maps.len());
        Ok(Self { maps })
    }
}

impl WorldQuery for NativeWorld {
    fn loaded_maps(&self) -> BTreeSet<u32> {
        self.maps.clone()
    }

    fn line_of_sight(&self, map_id: u32, from: Point3D, to: Point3D) -> bool {
        if !from.is_finite() || !to.is_finite() {
            return false;
        }
        let (from, to) = (NavVec3::from(from), NavVec3::from(to));
        unsafe { nav_line_of_sight(map_id, &from, &to) != 0 }
    }

    fn ground_height(
        &self,
        map_id: u32,
        x: f32,
        y: f32,
        z_hint: f32,
        max_search: f32,
    ) -> Option<GroundSample> {
        let mut height = 0.0f32;
        let mut normal = NavVec3::default();
        let found = unsafe {
            nav_ground_height(map_id, x, y, z_hint, max_search, &mut height, &mut normal)
        };
        let normal = Point3D::from(normal);
        (found != 0 && height.is_finite() && normal.is_finite()).then(|| GroundSample {
            height,
            normal: if normal.length() > 0.0 {
                normal.normalize()
            } else {
                Point3D::UP
            },
        })
    }

    fn liquid_at(&self, map_id: u32, position: Point3D) -> Option<LiquidSample> {
        let position = NavVec3::from(position);
        let mut level = 0.0f32;
        let mut kind = 0u32;
        let found = unsafe { nav_liquid_at(map_id, &position, &mut level, &mut kind) };
        (found != 0 && level.is_finite()).then(|| LiquidSample {
            level,
            kind: liquid_kind(kind),
        })
    }

    fn sweep_box(
        &self,
        map_id: u32,
        center: Point3D,
        half_extents: Point3D,
        motion: Point3D,
    ) -> Option<SweepHit> {
        let (center, half, motion) = (
            NavVec3::from(center),
            NavVec3::from(half_extents),
            NavVec3::from(motion),
        );
        let mut fraction = 1.0f32;
        let mut normal = NavVec3::default();
        let hit = unsafe {
            nav_sweep_box(map_id, &center, &half, &motion, &mut fraction, &mut normal)
        };
        let normal = Point3D::from(normal);
        (hit != 0 && fraction.is_finite() && normal.is_finite()).then(|| SweepHit {
            fraction: fraction.clamp(0.0, 1.0),
            normal: normal.normalize(),
        })
    }
}

/// Mesh path search through the native library.
pub struct NativeMeshSource {
    world: Arc<NativeWorld>,
}

impl NativeMeshSource {
    pub fn new(world: Arc<NativeWorld>) -> Self {
        Self { world }
    }
}

impl PathSource for NativeMeshSource {
    fn name(&self) -> &'static str {
        "native mesh"
    }

    fn find_path(&self, request: &PathRequest) -> Result<Vec<Point3D>, PathSourceError> {
        if !self.world.has_map(request.map_id) {
            return Err(PathSourceError::MapNotLoaded(request.map_id));
        }

        let start = NavVec3::from(request.start);
        let end = NavVec3::from(request.end);
        let mut corners = vec![NavVec3::default(); MAX_PATH_CORNERS];
        let mut count = 0u32;
        let status = unsafe {
            nav_find_path(
                request.map_id,
                &start,
                &end,
                request.smooth as c_int,
                corners.as_mut_ptr(),
                corners.len() as u32,
                &mut count,
            )
        };
        if status != NAV_OK {
            return Err(PathSourceError::Failed(format!("native status {}", status)));
        }

        let count = count as usize;
        if count > MAX_PATH_CORNERS {
            warn!("Native path reported {} corners, truncating", count);
        }
        corners.truncate(count.min(MAX_PATH_CORNERS));
        Ok(corners.into_iter().map(Point3D::from).collect())
    }
}
