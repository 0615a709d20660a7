//! Movement state exchanged with the physics stepper.
//!
//! A [`MovementSnapshot`] carries everything the stepper needs for one tick.
//! The stepper keeps nothing between calls, so every piece of continuity
//! (fall time, last ground contact, pending depenetration, the object being
//! stood on) travels in the snapshot and comes back in the
//! [`MovementResult`]. [`MovementSnapshot::apply_result`] turns a result into
//! the next tick's input.

use crate::geometry::Point3D;
use serde::{Deserialize, Serialize};

/// Movement flag bitmask as reported by the game client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct MovementFlags(pub u32);

impl MovementFlags {
    pub const NONE: MovementFlags = MovementFlags(0x0000_0000);
    pub const FORWARD: MovementFlags = MovementFlags(0x0000_0001);
    pub const BACKWARD: MovementFlags = MovementFlags(0x0000_0002);
    pub const STRAFE_LEFT: MovementFlags = MovementFlags(0x0000_0004);
    pub const STRAFE_RIGHT: MovementFlags = MovementFlags(0x0000_0008);
    pub const TURN_LEFT: MovementFlags = MovementFlags(0x0000_0010);
    pub const TURN_RIGHT: MovementFlags = MovementFlags(0x0000_0020);
    pub const PITCH_UP: MovementFlags = MovementFlags(0x0000_0040);
    pub const PITCH_DOWN: MovementFlags = MovementFlags(0x0000_0080);
    pub const WALK_MODE: MovementFlags = MovementFlags(0x0000_0100);
    pub const LEVITATING: MovementFlags = MovementFlags(0x0000_0400);
    pub const JUMPING: MovementFlags = MovementFlags(0x0000_2000);
    pub const FALLING_FAR: MovementFlags = MovementFlags(0x0000_4000);
    pub const SWIMMING: MovementFlags = MovementFlags(0x0020_0000);
    pub const SPLINE_ENABLED: MovementFlags = MovementFlags(0x0040_0000);
    pub const CAN_FLY: MovementFlags = MovementFlags(0x0080_0000);
    pub const FLYING: MovementFlags = MovementFlags(0x0100_0000);
    pub const ONTRANSPORT: MovementFlags = MovementFlags(0x0200_0000);
    pub const ROOT: MovementFlags = MovementFlags(0x0800_0000);
    pub const WATERWALKING: MovementFlags = MovementFlags(0x1000_0000);
    pub const SAFE_FALL: MovementFlags = MovementFlags(0x2000_0000);
    pub const HOVER: MovementFlags = MovementFlags(0x4000_0000);

    /// Flags that mean "wants to translate".
    pub const MOVING: MovementFlags = MovementFlags(0x0000_000F);
    /// Flags that mean "airborne under gravity".
    pub const AIRBORNE: MovementFlags = MovementFlags(0x0000_6000);

    pub fn contains(&self, other: MovementFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: MovementFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: MovementFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: MovementFlags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: MovementFlags, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for MovementFlags {
    type Output = MovementFlags;

    fn bitor(self, rhs: MovementFlags) -> MovementFlags {
        MovementFlags(self.0 | rhs.0)
    }
}

/// Per-mode speed caps, units per second (rates in radians per second).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedTable {
    pub walk: f32,
    pub run: f32,
    pub run_back: f32,
    pub swim: f32,
    pub swim_back: f32,
    pub flight: f32,
    pub flight_back: f32,
    pub turn_rate: f32,
    pub pitch_rate: f32,
}

impl Default for SpeedTable {
    fn default() -> Self {
        SpeedTable {
            walk: 2.5,
            run: 7.0,
            run_back: 4.5,
            swim: 4.722222,
            swim_back: 2.5,
            flight: 7.0,
            flight_back: 4.5,
            turn_rate: std::f32::consts::PI,
            pitch_rate: std::f32::consts::PI,
        }
    }
}

/// Parent entity for transport-relative motion.
///
/// `guid == 0` means "no transport"; the rest of the fields are ignored then.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TransportInfo {
    pub guid: u64,
    /// Offset from the transport origin, in the transport's frame.
    pub local_offset: Point3D,
    pub local_orientation: f32,
    /// Where the transport itself is this tick.
    pub world_position: Point3D,
    pub world_orientation: f32,
}

impl TransportInfo {
    pub fn is_attached(&self) -> bool {
        self.guid != 0
    }

    pub fn to_world(&self, local: &Point3D) -> Point3D {
        self.world_position + local.rotate_z(self.world_orientation)
    }

    pub fn to_local(&self, world: &Point3D) -> Point3D {
        (*world - self.world_position).rotate_z(-self.world_orientation)
    }
}

/// The nearby object a unit is standing on, in that object's frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandingOn {
    pub guid: u64,
    pub local_offset: Point3D,
}

/// Progress along a precomputed path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SplineState {
    pub points: Vec<Point3D>,
    /// Index of the segment start point.
    pub segment: u32,
    /// Distance already travelled along the current segment.
    pub segment_progress: f32,
}

impl SplineState {
    pub fn is_finished(&self) -> bool {
        self.points.len() < 2 || self.segment as usize >= self.points.len() - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidKind {
    Water,
    Ocean,
    Magma,
    Slime,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidSample {
    pub level: f32,
    pub kind: LiquidKind,
}

/// Game object close enough to collide with this tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearbyObject {
    pub guid: u64,
    pub display_id: u32,
    pub position: Point3D,
    pub orientation: f32,
    pub scale: f32,
    pub state: u8,
}

impl NearbyObject {
    /// Active (open) objects are passable.
    pub const STATE_ACTIVE: u8 = 0;
    pub const STATE_READY: u8 = 1;

    /// Footprint half extent and height of a unit-scale object.
    pub const BASE_HALF_EXTENT: f32 = 1.0;
    pub const BASE_HEIGHT: f32 = 2.0;

    pub fn collides(&self) -> bool {
        self.state != Self::STATE_ACTIVE && self.scale > 0.0 && self.position.is_finite()
    }

    /// Axis-aligned bounds as (min, max), anchored at the object's base.
    pub fn bounds(&self) -> (Point3D, Point3D) {
        let half = Self::BASE_HALF_EXTENT * self.scale;
        let height = Self::BASE_HEIGHT * self.scale;
        (
            Point3D::new(self.position.x - half, self.position.y - half, self.position.z),
            Point3D::new(
                self.position.x + half,
                self.position.y + half,
                self.position.z + height,
            ),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementSnapshot {
    pub map_id: u32,
    /// Feet position in world space. Ignored in favour of the transport
    /// offset while a transport is attached.
    pub position: Point3D,
    pub orientation: f32,
    pub pitch: f32,
    pub velocity: Point3D,
    pub speeds: SpeedTable,
    pub flags: MovementFlags,
    pub transport: Option<TransportInfo>,
    /// Milliseconds spent airborne so far.
    pub fall_time: u32,
    pub fall_start_z: f32,
    pub ground_normal: Point3D,
    pub ground_z: f32,
    pub pending_depenetration: Point3D,
    pub standing_on: Option<StandingOn>,
    pub collision_radius: f32,
    pub collision_height: f32,
    pub spline: Option<SplineState>,
}

impl MovementSnapshot {
    pub fn new(map_id: u32, position: Point3D) -> Self {
        Self {
            map_id,
            position,
            orientation: 0.0,
            pitch: 0.0,
            velocity: Point3D::ZERO,
            speeds: SpeedTable::default(),
            flags: MovementFlags::NONE,
            transport: None,
            fall_time: 0,
            fall_start_z: position.z,
            ground_normal: Point3D::UP,
            ground_z: position.z,
            pending_depenetration: Point3D::ZERO,
            standing_on: None,
            collision_radius: 0.3889,
            collision_height: 2.0313,
            spline: None,
        }
    }

    /// Every float the stepper reads is finite.
    pub fn is_finite(&self) -> bool {
        let scalars = [
            self.orientation,
            self.pitch,
            self.fall_start_z,
            self.ground_z,
            self.collision_radius,
            self.collision_height,
            self.speeds.walk,
            self.speeds.run,
            self.speeds.run_back,
            self.speeds.swim,
            self.speeds.swim_back,
            self.speeds.flight,
            self.speeds.flight_back,
            self.speeds.turn_rate,
            self.speeds.pitch_rate,
        ];
        let transport_ok = self.transport.map_or(true, |t| {
            t.local_offset.is_finite()
                && t.world_position.is_finite()
                && t.local_orientation.is_finite()
                && t.world_orientation.is_finite()
        });
        let standing_ok = self
            .standing_on
            .map_or(true, |s| s.local_offset.is_finite());
        let spline_ok = self.spline.as_ref().map_or(true, |s| {
            s.segment_progress.is_finite() && s.points.iter().all(Point3D::is_finite)
        });

        self.position.is_finite()
            && self.velocity.is_finite()
            && self.ground_normal.is_finite()
            && self.pending_depenetration.is_finite()
            && scalars.iter().all(|v| v.is_finite())
            && transport_ok
            && standing_ok
            && spline_ok
    }

    /// Builds the next tick's input from a step result.
    pub fn apply_result(&mut self, result: &MovementResult) {
        self.position = result.position;
        self.orientation = result.orientation;
        self.pitch = result.pitch;
        self.velocity = result.velocity;
        self.flags = result.flags;
        self.transport = result.transport;
        self.fall_time = result.fall_time;
        self.fall_start_z = result.fall_start_z;
        self.ground_normal = result.ground_normal;
        self.ground_z = result.ground_z;
        self.pending_depenetration = result.pending_depenetration;
        self.standing_on = result.standing_on;
        self.spline = result.spline.clone();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementResult {
    /// World-space feet position after the tick.
    pub position: Point3D,
    pub orientation: f32,
    pub pitch: f32,
    pub velocity: Point3D,
    pub flags: MovementFlags,
    pub transport: Option<TransportInfo>,
    pub fall_time: u32,
    pub fall_start_z: f32,
    pub ground_normal: Point3D,
    pub ground_z: f32,
    pub pending_depenetration: Point3D,
    pub standing_on: Option<StandingOn>,
    pub spline: Option<SplineState>,
    pub liquid: Option<LiquidSample>,
    pub in_liquid: bool,
    pub collided: bool,
}

impl MovementResult {
    /// A result that leaves the snapshot where it was and stops it.
    pub fn unchanged(snapshot: &MovementSnapshot) -> Self {
        let position = if snapshot.position.is_finite() {
            snapshot.position
        } else {
            Point3D::ZERO
        };
        Self {
            position,
            orientation: finite_or(snapshot.orientation, 0.0),
            pitch: finite_or(snapshot.pitch, 0.0),
            velocity: Point3D::ZERO,
            flags: snapshot.flags,
            transport: snapshot.transport.filter(|t| {
                t.local_offset.is_finite() && t.world_position.is_finite()
            }),
            fall_time: snapshot.fall_time,
            fall_start_z: finite_or(snapshot.fall_start_z, position.z),
            ground_normal: if snapshot.ground_normal.is_finite() {
                snapshot.ground_normal
            } else {
                Point3D::UP
            },
            ground_z: finite_or(snapshot.ground_z, position.z),
            pending_depenetration: Point3D::ZERO,
            standing_on: snapshot
                .standing_on
                .filter(|s| s.local_offset.is_finite()),
            spline: snapshot.spline.clone(),
            liquid: None,
            in_liquid: false,
            collided: false,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.orientation.is_finite()
            && self.pitch.is_finite()
            && self.fall_start_z.is_finite()
            && self.ground_z.is_finite()
            && self.ground_normal.is_finite()
            && self.pending_depenetration.is_finite()
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
