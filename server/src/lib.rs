//! # Navigation Server Library
//!
//! This library provides the navigation service used by game servers to ask
//! map questions they can't answer cheaply themselves: how to walk from A to
//! B, whether two points can see each other, where the ground is, and where a
//! unit ends up after one movement tick.
//!
//! ## Core Responsibilities
//!
//! ### Pathfinding
//! A mesh-backed [`pathfinding::PathSource`] is tried first when one is
//! available. When it fails, panics, returns nothing or returns garbage, the
//! grid search in [`pathfinding::GridSearch`] takes over. It only needs a
//! line-of-sight predicate, so it works on any map the world can answer for.
//!
//! ### Movement Simulation
//! [`physics::PhysicsStepper`] advances one movement snapshot by one tick:
//! gravity, falling, swimming, flying, collide-and-slide, step-up, ground
//! snapping, transports and depenetration from nearby objects. It keeps no
//! state between calls.
//!
//! ### Readiness
//! Map data is large and loads once in the background. Until it is resident
//! every engine request is answered with a "still initializing" error, and a
//! small JSON status file next to the process tells supervisors when the
//! service became ready.
//!
//! ## Architecture Design
//!
//! ### Connection Handling
//! One tokio task per TCP connection, one frame in, one frame out. Engine
//! work runs on the blocking pool so a long path search only stalls its own
//! connection.
//!
//! ### World Backends
//! Everything geometric goes through [`world::WorldQuery`]. The pure-Rust
//! [`world::StaticWorld`] reads per-map JSON files; building with the
//! `native` feature adds an adapter for the native mesh library.
//!
//! ## Module Organization
//!
//! - [`world`]: collision world trait and the static backend
//! - [`pathfinding`]: primary/fallback path search
//! - [`physics`]: per-tick movement stepper
//! - [`lifecycle`]: one-time preload, readiness and status reporting
//! - [`router`]: validation and dispatch of decoded requests
//! - [`network`]: TCP server and connection loop
//! - [`config`]: server configuration and data directory discovery

pub mod config;
pub mod lifecycle;
#[cfg(feature = "native")]
pub mod native;
pub mod network;
pub mod pathfinding;
pub mod physics;
pub mod router;
pub mod world;
