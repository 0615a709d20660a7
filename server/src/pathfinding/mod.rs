//! Path queries: native mesh search first, grid search when it can't answer.

mod grid;

pub use grid::{simplify, GridSearch, GridSearchConfig, SearchStats, MAX_SEGMENT_POINTS};

use crate::world::WorldQuery;
use log::{debug, warn};
use shared::{PathRequest, PathResult, PathSourceTag, Point3D};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathSourceError {
    #[error("path search failed: {0}")]
    Failed(String),
    #[error("map {0} is not loaded by the path source")]
    MapNotLoaded(u32),
}

/// A mesh-backed path search, typically the native library.
pub trait PathSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn find_path(&self, request: &PathRequest) -> Result<Vec<Point3D>, PathSourceError>;
}

/// Drops corners with non-finite coordinates, returning the survivors and the
/// original count.
pub fn sanitize_corners(raw: Vec<Point3D>) -> (Vec<Point3D>, u32) {
    let raw_count = raw.len() as u32;
    let corners = raw.into_iter().filter(Point3D::is_finite).collect();
    (corners, raw_count)
}

pub struct Pathfinder {
    primary: Option<Arc<dyn PathSource>>,
    world: Arc<dyn WorldQuery>,
    fallback: GridSearch,
}

impl Pathfinder {
    pub fn new(
        primary: Option<Arc<dyn PathSource>>,
        world: Arc<dyn WorldQuery>,
        fallback: GridSearch,
    ) -> Self {
        Self {
            primary,
            world,
            fallback,
        }
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Always answers: an empty `corners` list means no route was found.
    pub fn find_path(&self, request: &PathRequest) -> PathResult {
        let inputs_finite = request.start.is_finite() && request.end.is_finite();
        let mut raw_from_primary = 0;

        if let (Some(primary), true) = (&self.primary, inputs_finite) {
            match catch_unwind(AssertUnwindSafe(|| primary.find_path(request))) {
                Ok(Ok(raw)) => {
                    let (corners, raw_count) = sanitize_corners(raw);
                    if raw_count as usize != corners.len() {
                        warn!(
                            "{} returned {} non-finite corners on map {}",
                            primary.name(),
                            raw_count as usize - corners.len(),
                            request.map_id
                        );
                    }
                    if !corners.is_empty() {
                        return PathResult {
                            corners,
                            raw_corner_count: raw_count,
                            source: PathSourceTag::NativePath,
                        };
                    }
                    raw_from_primary = raw_count;
                    debug!(
                        "{} found no usable corners on map {}, falling back",
                        primary.name(),
                        request.map_id
                    );
                }
                Ok(Err(e)) => {
                    debug!("{} failed on map {}: {}", primary.name(), request.map_id, e);
                }
                Err(_) => {
                    warn!("{} panicked on map {}", primary.name(), request.map_id);
                }
            }
        }

        if !inputs_finite {
            return PathResult {
                raw_corner_count: raw_from_primary,
                ..PathResult::no_path()
            };
        }

        let map_id = request.map_id;
        let world = &self.world;
        let (corners, raw_count) = sanitize_corners(self.fallback.find_path(
            request.start,
            request.end,
            |a, b| world.line_of_sight(map_id, a, b),
        ));

        if corners.is_empty() {
            return PathResult {
                raw_corner_count: raw_from_primary,
                ..PathResult::no_path()
            };
        }

        PathResult {
            corners,
            raw_corner_count: raw_count,
            source: PathSourceTag::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Aabb, MapData, StaticWorld};
    use assert_approx_eq::assert_approx_eq;

    struct FixedSource(Result<Vec<Point3D>, String>);

    impl PathSource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn find_path(&self, _request: &PathRequest) -> Result<Vec<Point3D>, PathSourceError> {
            self.0.clone().map_err(PathSourceError::Failed)
        }
    }

    struct PanickingSource;

    impl PathSource for PanickingSource {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn find_path(&self, _request: &PathRequest) -> Result<Vec<Point3D>, PathSourceError> {
            panic!("native call blew up")
        }
    }

    fn open_world() -> Arc<dyn WorldQuery> {
        Arc::new(StaticWorld::from_maps(vec![MapData::flat(0, 0.0)]).unwrap())
    }

    fn request(end: Point3D) -> PathRequest {
        PathRequest {
            map_id: 0,
            start: Point3D::ZERO,
            end,
            smooth: false,
        }
    }

    fn pathfinder(primary: Option<Arc<dyn PathSource>>) -> Pathfinder {
        Pathfinder::new(primary, open_world(), GridSearch::default())
    }

    #[test]
    fn test_native_corners_sanitized() {
        let source = FixedSource(Ok(vec![
            Point3D::ZERO,
            Point3D::new(f32::NAN, 1.0, 0.0),
            Point3D::new(5.0, f32::INFINITY, 0.0),
            Point3D::new(10.0, 0.0, 0.0),
        ]));
        let result = pathfinder(Some(Arc::new(source))).find_path(&request(Point3D::new(10.0, 0.0, 0.0)));

        assert_eq!(result.source, PathSourceTag::NativePath);
        assert_eq!(result.raw_corner_count, 4);
        assert_eq!(result.corners.len(), 2);
        assert!(result.corners.iter().all(Point3D::is_finite));
    }

    #[test]
    fn test_native_failure_falls_back() {
        let source = FixedSource(Err("navmesh tile missing".to_string()));
        let result = pathfinder(Some(Arc::new(source))).find_path(&request(Point3D::new(40.0, 0.0, 0.0)));
        assert_eq!(result.source, PathSourceTag::Fallback);
        assert!(result.corners.len() > 2);
    }

    #[test]
    fn test_native_all_nan_falls_back_and_keeps_raw_count_consistent() {
        let source = FixedSource(Ok(vec![Point3D::new(f32::NAN, 0.0, 0.0); 3]));
        let result = pathfinder(Some(Arc::new(source))).find_path(&request(Point3D::new(8.0, 0.0, 0.0)));
        assert_eq!(result.source, PathSourceTag::Fallback);
        assert!(result.raw_corner_count as usize >= result.corners.len());
    }

    #[test]
    fn test_native_empty_falls_back() {
        let source = FixedSource(Ok(Vec::new()));
        let result = pathfinder(Some(Arc::new(source))).find_path(&request(Point3D::new(8.0, 0.0, 0.0)));
        assert_eq!(result.source, PathSourceTag::Fallback);
    }

    #[test]
    fn test_native_panic_falls_back() {
        let result = pathfinder(Some(Arc::new(PanickingSource))).find_path(&request(Point3D::new(8.0, 0.0, 0.0)));
        assert_eq!(result.source, PathSourceTag::Fallback);
        assert!(!result.corners.is_empty());
    }

    #[test]
    fn test_straight_line_without_native_engine() {
        let result = pathfinder(None).find_path(&request(Point3D::new(100.0, 0.0, 0.0)));
        assert_eq!(result.source, PathSourceTag::Fallback);
        assert!(result.corners.len() > 2);
        assert_eq!(result.corners[0], Point3D::ZERO);
        assert_eq!(*result.corners.last().unwrap(), Point3D::new(100.0, 0.0, 0.0));

        let spacing = result.corners[0].distance(&result.corners[1]);
        for pair in result.corners.windows(2) {
            assert_approx_eq!(pair[0].distance(&pair[1]), spacing, 1e-3);
        }
        for p in &result.corners {
            assert_eq!(p.y, 0.0);
            assert_eq!(p.z, 0.0);
        }
    }

    #[test]
    fn test_no_route_is_no_path() {
        let cage = Aabb::new(Point3D::new(40.0, -4.0, -1.0), Point3D::new(48.0, 4.0, 20.0));
        let world = StaticWorld::from_maps(vec![MapData::flat(0, 0.0).with_obstacle(cage)]).unwrap();
        let finder = Pathfinder::new(None, Arc::new(world), GridSearch::default());
        let result = finder.find_path(&request(Point3D::new(44.0, 0.0, 0.0)));
        assert_eq!(result.source, PathSourceTag::NoPath);
        assert!(result.corners.is_empty());
    }

    #[test]
    fn test_same_point_two_point_path() {
        let end = Point3D::new(0.3, 0.0, 0.0);
        let result = pathfinder(None).find_path(&request(end));
        assert_eq!(result.corners, vec![Point3D::ZERO, end]);
    }
}
