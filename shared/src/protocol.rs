use crate::geometry::Point3D;
use crate::movement::{MovementResult, MovementSnapshot, NearbyObject};
use crate::status::ServiceStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRequest {
    pub map_id: u32,
    pub start: Point3D,
    pub end: Point3D,
    pub smooth: bool,
}

/// Which engine produced a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathSourceTag {
    NativePath,
    NoPath,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResult {
    pub corners: Vec<Point3D>,
    /// Corner count before non-finite corners were dropped.
    pub raw_corner_count: u32,
    pub source: PathSourceTag,
}

impl PathResult {
    pub fn no_path() -> Self {
        Self {
            corners: Vec::new(),
            raw_corner_count: 0,
            source: PathSourceTag::NoPath,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineOfSightRequest {
    pub map_id: u32,
    pub from: Point3D,
    pub to: Point3D,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub snapshot: MovementSnapshot,
    pub nearby_objects: Vec<NearbyObject>,
    pub delta_time: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundHeightRequest {
    pub map_id: u32,
    /// x/y select the column, z is the search hint.
    pub position: Point3D,
    pub max_search_distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundHeightResult {
    pub height: f32,
    pub found: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed request (non-finite coordinates, unknown map, bad frame).
    Validation,
    /// Map data is still loading.
    NotReady,
    /// Anything that went wrong inside the service.
    Internal,
}

/// Requests accepted by the navigation server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    FindPath(PathRequest),
    LineOfSight(LineOfSightRequest),
    Step(StepRequest),
    GroundHeight(GroundHeightRequest),
    /// Answered even while the service is still loading.
    Health,
}

impl Request {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Request::FindPath(_) => "find_path",
            Request::LineOfSight(_) => "line_of_sight",
            Request::Step(_) => "step",
            Request::GroundHeight(_) => "ground_height",
            Request::Health => "health",
        }
    }
}

/// One response per request, same shape plus an error variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Path(PathResult),
    LineOfSight { visible: bool },
    Step(MovementResult),
    GroundHeight(GroundHeightResult),
    Health(ServiceStatus),
    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

pub const NOT_READY_MESSAGE: &str = "navigation service is still initializing";

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::{deserialize, serialize};

    #[test]
    fn test_request_serialization_find_path() {
        let request = Request::FindPath(PathRequest {
            map_id: 1,
            start: Point3D::new(1.0, 2.0, 3.0),
            end: Point3D::new(-4.0, 5.5, 0.25),
            smooth: true,
        });

        let serialized = serialize(&request).unwrap();
        let deserialized: Request = deserialize(&serialized).unwrap();

        match deserialized {
            Request::FindPath(path) => {
                assert_eq!(path.map_id, 1);
                assert_eq!(path.end, Point3D::new(-4.0, 5.5, 0.25));
                assert!(path.smooth);
            }
            _ => panic!("Wrong request type after deserialization"),
        }
    }

    #[test]
    fn test_response_serialization_error() {
        let response = Response::error(ErrorKind::NotReady, NOT_READY_MESSAGE);
        let serialized = serialize(&response).unwrap();
        let deserialized: Response = deserialize(&serialized).unwrap();

        match deserialized {
            Response::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::NotReady);
                assert_eq!(message, NOT_READY_MESSAGE);
            }
            _ => panic!("Wrong response type after deserialization"),
        }
    }

    #[test]
    fn test_step_request_keeps_nearby_objects() {
        let request = Request::Step(StepRequest {
            snapshot: MovementSnapshot::new(0, Point3D::new(0.0, 0.0, 10.0)),
            nearby_objects: vec![NearbyObject {
                guid: 0xF110_0000_0000_0042,
                display_id: 7,
                position: Point3D::new(3.0, 0.0, 0.0),
                orientation: 1.5,
                scale: 1.0,
                state: NearbyObject::STATE_READY,
            }],
            delta_time: 0.05,
        });

        let bytes = serialize(&request).unwrap();
        let back: Request = deserialize(&bytes).unwrap();
        assert_eq!(back, request);
        assert_eq!(back.kind_name(), "step");
    }
}
