//! # Shared Navigation Model
//!
//! Value types and wire schema shared by the navigation server and its
//! clients. Nothing in here touches map data; it only describes what travels
//! over the socket and what the status artifact looks like.
//!
//! - [`geometry`]: `Point3D` and small vector helpers
//! - [`movement`]: movement snapshots, results, flags and nearby objects
//! - [`protocol`]: the `Request` / `Response` enums
//! - [`frame`]: length-prefixed bincode framing over tokio streams
//! - [`status`]: the readiness artifact written next to the server process

pub mod frame;
pub mod geometry;
pub mod movement;
pub mod protocol;
pub mod status;

pub use frame::{read_frame, write_frame, ProtocolError};
pub use geometry::Point3D;
pub use movement::{
    LiquidKind, LiquidSample, MovementFlags, MovementResult, MovementSnapshot, NearbyObject,
    SpeedTable, SplineState, StandingOn, TransportInfo,
};
pub use protocol::{
    ErrorKind, GroundHeightRequest, GroundHeightResult, LineOfSightRequest, PathRequest,
    PathResult, PathSourceTag, Request, Response, StepRequest, NOT_READY_MESSAGE,
};
pub use status::ServiceStatus;

/// Default TCP port of the navigation server.
pub const DEFAULT_PORT: u16 = 47500;

/// Default file name of the readiness artifact.
pub const STATUS_FILE_NAME: &str = "nav_status.json";
