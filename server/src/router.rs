//! Request dispatch.
//!
//! Validates every request at the boundary, gates on readiness and turns
//! every failure, including panics, into an in-band [`Response::Error`].

use crate::lifecycle::{Engines, Lifecycle, Readiness};
use log::{debug, error};
use shared::{
    ErrorKind, GroundHeightRequest, GroundHeightResult, LineOfSightRequest, PathRequest, Point3D,
    Request, Response, StepRequest, NOT_READY_MESSAGE,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("{0}")]
    Validation(String),
    #[error("{}", NOT_READY_MESSAGE)]
    NotReady,
    #[error("{0}")]
    Internal(String),
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::Validation(_) => ErrorKind::Validation,
            RequestError::NotReady => ErrorKind::NotReady,
            RequestError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<RequestError> for Response {
    fn from(e: RequestError) -> Self {
        Response::error(e.kind(), e.to_string())
    }
}

/// Coordinates further than this from the origin are rejected. Every map
/// fits well inside it.
pub const MAX_WORLD_COORDINATE: f32 = 100_000.0;

fn require_position(label: &str, p: &Point3D) -> Result<(), RequestError> {
    if !p.is_finite() {
        return Err(RequestError::Validation(format!(
            "{} has non-finite coordinates",
            label
        )));
    }
    if [p.x, p.y, p.z].iter().any(|v| v.abs() > MAX_WORLD_COORDINATE) {
        return Err(RequestError::Validation(format!(
            "{} is outside the world bounds (|coordinate| <= {})",
            label, MAX_WORLD_COORDINATE
        )));
    }
    Ok(())
}

fn require_map(engines: &Engines, map_id: u32) -> Result<(), RequestError> {
    if engines.loaded_maps.contains(&map_id) {
        Ok(())
    } else {
        Err(RequestError::Validation(format!("map {} is not loaded", map_id)))
    }
}

pub struct Router {
    lifecycle: Arc<Lifecycle>,
}

impl Router {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Never panics and never blocks on map loading.
    pub fn handle_request(&self, request: Request) -> Response {
        let readiness = self.lifecycle.ensure_initialized();

        if let Request::Health = request {
            return Response::Health(readiness.status());
        }

        let engines = match readiness {
            Readiness::Ready(engines) => engines,
            Readiness::Loading => return RequestError::NotReady.into(),
            Readiness::Failed(reason) => {
                return RequestError::Internal(format!(
                    "navigation service failed to initialize: {}",
                    reason
                ))
                .into()
            }
        };

        let kind = request.kind_name();
        match catch_unwind(AssertUnwindSafe(|| dispatch(&engines, request))) {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!("Rejected {} request: {}", kind, e);
                e.into()
            }
            Err(_) => {
                error!("Handler for {} request panicked", kind);
                RequestError::Internal(format!("internal error while handling {}", kind)).into()
            }
        }
    }
}

fn dispatch(engines: &Engines, request: Request) -> Result<Response, RequestError> {
    match request {
        Request::FindPath(req) => find_path(engines, &req),
        Request::LineOfSight(req) => line_of_sight(engines, &req),
        Request::Step(req) => step(engines, &req),
        Request::GroundHeight(req) => ground_height(engines, &req),
        Request::Health => Err(RequestError::Internal(
            "health probe reached the engine dispatcher".to_string(),
        )),
    }
}

fn find_path(engines: &Engines, req: &PathRequest) -> Result<Response, RequestError> {
    require_position("start", &req.start)?;
    require_position("end", &req.end)?;
    require_map(engines, req.map_id)?;
    Ok(Response::Path(engines.pathfinder.find_path(req)))
}

fn line_of_sight(engines: &Engines, req: &LineOfSightRequest) -> Result<Response, RequestError> {
    require_position("from", &req.from)?;
    require_position("to", &req.to)?;
    require_map(engines, req.map_id)?;
    Ok(Response::LineOfSight {
        visible: engines.world.line_of_sight(req.map_id, req.from, req.to),
    })
}

fn step(engines: &Engines, req: &StepRequest) -> Result<Response, RequestError> {
    if !req.snapshot.is_finite() {
        return Err(RequestError::Validation(
            "movement snapshot has non-finite values".to_string(),
        ));
    }
    if !req.delta_time.is_finite() {
        return Err(RequestError::Validation(
            "delta time is not finite".to_string(),
        ));
    }
    if let Some(bad) = req.nearby_objects.iter().find(|o| {
        !(o.position.is_finite() && o.orientation.is_finite() && o.scale.is_finite())
    }) {
        return Err(RequestError::Validation(format!(
            "nearby object {} has non-finite values",
            bad.guid
        )));
    }
    require_position("snapshot position", &req.snapshot.position)?;
    if let Some(transport) = &req.snapshot.transport {
        require_position("transport position", &transport.world_position)?;
    }
    if let Some(spline) = &req.snapshot.spline {
        for point in &spline.points {
            require_position("spline point", point)?;
        }
    }
    for object in &req.nearby_objects {
        require_position("nearby object", &object.position)?;
    }
    require_map(engines, req.snapshot.map_id)?;

    Ok(Response::Step(engines.stepper.step(
        &req.snapshot,
        &req.nearby_objects,
        req.delta_time,
    )))
}

fn ground_height(engines: &Engines, req: &GroundHeightRequest) -> Result<Response, RequestError> {
    require_position("position", &req.position)?;
    if !req.max_search_distance.is_finite() || req.max_search_distance < 0.0 {
        return Err(RequestError::Validation(
            "max search distance must be finite and non-negative".to_string(),
        ));
    }
    require_map(engines, req.map_id)?;

    let p = req.position;
    let result = match engines
        .world
        .ground_height(req.map_id, p.x, p.y, p.z, req.max_search_distance)
    {
        Some(ground) => GroundHeightResult {
            height: ground.height,
            found: true,
        },
        None => GroundHeightResult {
            height: p.z,
            found: false,
        },
    };
    Ok(Response::GroundHeight(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{EngineLoader, LoadError, StatusReporter};
    use crate::pathfinding::GridSearchConfig;
    use crate::world::{Aabb, MapData, StaticWorld};
    use assert_approx_eq::assert_approx_eq;
    use shared::{MovementFlags, MovementSnapshot, NearbyObject, PathSourceTag};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    struct TestLoader;

    impl EngineLoader for TestLoader {
        fn load(&self) -> Result<Engines, LoadError> {
            let wall = Aabb::new(Point3D::new(10.0, -5.0, 0.0), Point3D::new(11.0, 5.0, 10.0));
            let world = StaticWorld::from_maps(vec![MapData::flat(0, 0.0).with_obstacle(wall)])?;
            Ok(Engines::new(Arc::new(world), None, GridSearchConfig::default()))
        }
    }

    struct BlockedLoader {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl EngineLoader for BlockedLoader {
        fn load(&self) -> Result<Engines, LoadError> {
            let _ = self.gate.lock().unwrap().recv();
            TestLoader.load()
        }
    }

    fn ready_router() -> Router {
        let lifecycle = Lifecycle::new(Arc::new(TestLoader), StatusReporter::disabled());
        assert!(lifecycle.wait_until_settled(Duration::from_secs(5)).is_ready());
        Router::new(lifecycle)
    }

    fn error_kind(response: &Response) -> Option<ErrorKind> {
        match response {
            Response::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    fn ground_request(z: f32) -> Request {
        Request::GroundHeight(GroundHeightRequest {
            map_id: 0,
            position: Point3D::new(1.0, 1.0, z),
            max_search_distance: 10.0,
        })
    }

    #[test]
    fn test_not_ready_rejects_everything_but_health() {
        let (release, gate) = mpsc::channel::<()>();
        let lifecycle = Lifecycle::new(
            Arc::new(BlockedLoader {
                gate: Mutex::new(gate),
            }),
            StatusReporter::disabled(),
        );
        let router = Router::new(lifecycle);

        let requests = vec![
            Request::FindPath(PathRequest {
                map_id: 0,
                start: Point3D::ZERO,
                end: Point3D::new(5.0, 0.0, 0.0),
                smooth: false,
            }),
            Request::LineOfSight(LineOfSightRequest {
                map_id: 0,
                from: Point3D::ZERO,
                to: Point3D::new(5.0, 0.0, 0.0),
            }),
            Request::Step(StepRequest {
                snapshot: MovementSnapshot::new(0, Point3D::ZERO),
                nearby_objects: Vec::new(),
                delta_time: 0.1,
            }),
            ground_request(5.0),
        ];
        for request in requests {
            let response = router.handle_request(request);
            assert_eq!(error_kind(&response), Some(ErrorKind::NotReady));
            if let Response::Error { message, .. } = response {
                assert_eq!(message, NOT_READY_MESSAGE);
            }
        }

        match router.handle_request(Request::Health) {
            Response::Health(status) => assert!(!status.is_ready),
            other => panic!("unexpected response {:?}", other),
        }

        release.send(()).unwrap();
    }

    #[test]
    fn test_health_when_ready() {
        match ready_router().handle_request(Request::Health) {
            Response::Health(status) => {
                assert!(status.is_ready);
                assert!(status.loaded_maps.contains(&0));
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_ground_height_non_finite_hint_is_validation_error() {
        let router = ready_router();
        for z in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let response = router.handle_request(ground_request(z));
            assert_eq!(error_kind(&response), Some(ErrorKind::Validation));
        }
    }

    #[test]
    fn test_ground_height_found_and_missing() {
        let router = ready_router();
        match router.handle_request(ground_request(5.0)) {
            Response::GroundHeight(result) => {
                assert!(result.found);
                assert_approx_eq!(result.height, 0.0, 1e-6);
            }
            other => panic!("unexpected response {:?}", other),
        }
        match router.handle_request(ground_request(50.0)) {
            Response::GroundHeight(result) => {
                assert!(!result.found);
                assert_approx_eq!(result.height, 50.0, 1e-6);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_line_of_sight() {
        let router = ready_router();
        let blocked = router.handle_request(Request::LineOfSight(LineOfSightRequest {
            map_id: 0,
            from: Point3D::new(0.0, 0.0, 1.0),
            to: Point3D::new(20.0, 0.0, 1.0),
        }));
        assert_eq!(blocked, Response::LineOfSight { visible: false });

        let clear = router.handle_request(Request::LineOfSight(LineOfSightRequest {
            map_id: 0,
            from: Point3D::new(0.0, 0.0, 1.0),
            to: Point3D::new(5.0, 0.0, 1.0),
        }));
        assert_eq!(clear, Response::LineOfSight { visible: true });

        let bad = router.handle_request(Request::LineOfSight(LineOfSightRequest {
            map_id: 0,
            from: Point3D::new(f32::NAN, 0.0, 1.0),
            to: Point3D::new(5.0, 0.0, 1.0),
        }));
        assert_eq!(error_kind(&bad), Some(ErrorKind::Validation));
    }

    #[test]
    fn test_unknown_map_rejected() {
        let response = ready_router().handle_request(Request::FindPath(PathRequest {
            map_id: 99,
            start: Point3D::ZERO,
            end: Point3D::new(5.0, 0.0, 0.0),
            smooth: false,
        }));
        assert_eq!(error_kind(&response), Some(ErrorKind::Validation));
    }

    #[test]
    fn test_find_path_routes_around_wall() {
        let response = ready_router().handle_request(Request::FindPath(PathRequest {
            map_id: 0,
            start: Point3D::ZERO,
            end: Point3D::new(20.0, 0.0, 0.0),
            smooth: true,
        }));
        match response {
            Response::Path(path) => {
                assert_eq!(path.source, PathSourceTag::Fallback);
                assert!(path.corners.len() >= 3);
                assert!(path.raw_corner_count as usize >= path.corners.len());
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_step_accumulates_fall_time() {
        let router = ready_router();
        let mut snapshot = MovementSnapshot::new(0, Point3D::new(0.0, 0.0, 30.0));
        snapshot.flags = MovementFlags::JUMPING;

        let mut fall_times = Vec::new();
        for _ in 0..2 {
            let response = router.handle_request(Request::Step(StepRequest {
                snapshot: snapshot.clone(),
                nearby_objects: Vec::new(),
                delta_time: 0.05,
            }));
            match response {
                Response::Step(result) => {
                    fall_times.push(result.fall_time);
                    snapshot.apply_result(&result);
                }
                other => panic!("unexpected response {:?}", other),
            }
        }
        assert_eq!(fall_times, vec![50, 100]);
    }

    #[test]
    fn test_step_rejects_non_finite_objects() {
        let mut object = NearbyObject {
            guid: 77,
            display_id: 1,
            position: Point3D::new(3.0, 0.0, 0.0),
            orientation: 0.0,
            scale: 1.0,
            state: NearbyObject::STATE_READY,
        };
        object.orientation = f32::NAN;
        let response = ready_router().handle_request(Request::Step(StepRequest {
            snapshot: MovementSnapshot::new(0, Point3D::ZERO),
            nearby_objects: vec![object],
            delta_time: 0.1,
        }));
        assert_eq!(error_kind(&response), Some(ErrorKind::Validation));
    }

    #[test]
    fn test_coordinates_outside_world_rejected() {
        let router = ready_router();

        let path = router.handle_request(Request::FindPath(PathRequest {
            map_id: 0,
            start: Point3D::ZERO,
            end: Point3D::new(1.0e12, 0.0, 0.0),
            smooth: false,
        }));
        assert_eq!(error_kind(&path), Some(ErrorKind::Validation));

        let los = router.handle_request(Request::LineOfSight(LineOfSightRequest {
            map_id: 0,
            from: Point3D::new(0.0, -2.0e5, 1.0),
            to: Point3D::new(5.0, 0.0, 1.0),
        }));
        assert_eq!(error_kind(&los), Some(ErrorKind::Validation));

        assert_eq!(
            error_kind(&router.handle_request(ground_request(-1.0e7))),
            Some(ErrorKind::Validation)
        );

        let step = router.handle_request(Request::Step(StepRequest {
            snapshot: MovementSnapshot::new(0, Point3D::ZERO),
            nearby_objects: vec![NearbyObject {
                guid: 5,
                display_id: 1,
                position: Point3D::new(1.0e9, 0.0, 0.0),
                orientation: 0.0,
                scale: 1.0,
                state: NearbyObject::STATE_READY,
            }],
            delta_time: 0.1,
        }));
        assert_eq!(error_kind(&step), Some(ErrorKind::Validation));

        // the edge of the world is still served
        let edge = router.handle_request(Request::LineOfSight(LineOfSightRequest {
            map_id: 0,
            from: Point3D::new(MAX_WORLD_COORDINATE, 0.0, 1.0),
            to: Point3D::new(MAX_WORLD_COORDINATE - 10.0, 0.0, 1.0),
        }));
        assert_eq!(edge, Response::LineOfSight { visible: true });
    }
}
