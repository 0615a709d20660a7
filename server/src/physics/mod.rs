//! Per-tick movement simulation.
//!
//! [`PhysicsStepper::step`] is a pure function of a [`MovementSnapshot`], the
//! nearby objects and the tick length. All state that must survive between
//! ticks (fall time, pending depenetration, spline progress, the object
//! being stood on) travels in the snapshot and comes back in the
//! [`MovementResult`].

mod collision;
mod spline;

pub use collision::{split_depenetration, Body, Scene, Support};

use crate::world::{GroundSample, WorldQuery};
use log::{debug, warn};
use shared::geometry::normalize_orientation;
use shared::{
    MovementFlags, MovementResult, MovementSnapshot, NearbyObject, Point3D, SpeedTable,
    StandingOn, TransportInfo,
};
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

pub const GRAVITY: f32 = 19.291_105;
pub const TERMINAL_VELOCITY: f32 = 60.148_003;
pub const SAFE_FALL_TERMINAL_VELOCITY: f32 = 7.0;
pub const STEP_HEIGHT: f32 = 2.125;
pub const MAX_DELTA_TIME: f32 = 0.5;
pub const MAX_DEPENETRATION_PER_TICK: f32 = 0.5;

/// Extra drop a grounded body follows without becoming airborne. Travel
/// distance is added on top so 45° descents stay grounded.
const STEP_DOWN_BASE: f32 = 0.5;
const LANDING_TOLERANCE: f32 = 0.05;
/// cos(50°): steeper ground can't be walked up.
const MIN_WALKABLE_NORMAL_Z: f32 = 0.642_787_6;
/// Fractions of the body height submerged to start and stop swimming.
const SWIM_ENTER_FRACTION: f32 = 0.6;
const SWIM_EXIT_FRACTION: f32 = 0.5;
const MIN_BODY_RADIUS: f32 = 0.05;
const MIN_BODY_HEIGHT: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Swimming,
    Flying,
    Airborne,
    Grounded,
}

impl Mode {
    fn from_flags(flags: MovementFlags) -> Self {
        if flags.contains(MovementFlags::SWIMMING) {
            Mode::Swimming
        } else if flags.intersects(MovementFlags::FLYING | MovementFlags::LEVITATING) {
            Mode::Flying
        } else if flags.intersects(MovementFlags::AIRBORNE) {
            Mode::Airborne
        } else {
            Mode::Grounded
        }
    }
}

/// Mutable state threaded through one tick.
struct Tick {
    position: Point3D,
    orientation: f32,
    pitch: f32,
    velocity: Point3D,
    flags: MovementFlags,
    fall_time: u32,
    fall_start_z: f32,
    ground: GroundSample,
    support_object: Option<u64>,
    collided: bool,
}

impl Tick {
    fn start_falling(&mut self) {
        self.flags.insert(MovementFlags::JUMPING);
        self.velocity.z = 0.0;
        self.fall_time = 0;
        self.fall_start_z = self.position.z;
        self.support_object = None;
    }

    fn land(&mut self, support: Support) {
        self.position.z = support.ground.height;
        self.velocity.z = 0.0;
        self.flags.remove(MovementFlags::AIRBORNE);
        self.fall_time = 0;
        self.ground = support.ground;
        self.support_object = support.object;
    }
}

/// Unit intent direction from the movement keys. Forward follows pitch when
/// `pitched` is set.
fn intent_direction(flags: MovementFlags, orientation: f32, pitch: f32, pitched: bool) -> Point3D {
    if flags.contains(MovementFlags::ROOT) {
        return Point3D::ZERO;
    }

    let mut forward = 0.0;
    if flags.contains(MovementFlags::FORWARD) {
        forward += 1.0;
    }
    if flags.contains(MovementFlags::BACKWARD) {
        forward -= 1.0;
    }
    let mut strafe = 0.0;
    if flags.contains(MovementFlags::STRAFE_LEFT) {
        strafe += 1.0;
    }
    if flags.contains(MovementFlags::STRAFE_RIGHT) {
        strafe -= 1.0;
    }
    if forward == 0.0 && strafe == 0.0 {
        return Point3D::ZERO;
    }

    let (sin_o, cos_o) = orientation.sin_cos();
    let ahead = if pitched {
        let (sin_p, cos_p) = pitch.sin_cos();
        Point3D::new(cos_o * cos_p, sin_o * cos_p, sin_p)
    } else {
        Point3D::new(cos_o, sin_o, 0.0)
    };
    let left = Point3D::new(-sin_o, cos_o, 0.0);

    (ahead.scale(forward) + left.scale(strafe)).normalize()
}

fn mode_speed(mode: Mode, flags: MovementFlags, speeds: &SpeedTable) -> f32 {
    let backward =
        flags.contains(MovementFlags::BACKWARD) && !flags.contains(MovementFlags::FORWARD);
    match (mode, backward) {
        (Mode::Swimming, true) => speeds.swim_back,
        (Mode::Swimming, false) => speeds.swim,
        (Mode::Flying, true) => speeds.flight_back,
        (Mode::Flying, false) => speeds.flight,
        (_, true) if flags.contains(MovementFlags::WALK_MODE) => speeds.walk.min(speeds.run_back),
        (_, true) => speeds.run_back,
        (_, false) if flags.contains(MovementFlags::WALK_MODE) => speeds.walk,
        (_, false) => speeds.run,
    }
    .max(0.0)
}

pub struct PhysicsStepper {
    world: Arc<dyn WorldQuery>,
}

impl PhysicsStepper {
    pub fn new(world: Arc<dyn WorldQuery>) -> Self {
        Self { world }
    }

    /// Advances one tick. Never returns non-finite values: invalid input or
    /// a degenerate outcome yields the input position with zero velocity.
    pub fn step(
        &self,
        snapshot: &MovementSnapshot,
        objects: &[NearbyObject],
        delta_time: f32,
    ) -> MovementResult {
        if !snapshot.is_finite() || !delta_time.is_finite() {
            debug!("rejecting non-finite movement input on map {}", snapshot.map_id);
            return MovementResult::unchanged(snapshot);
        }
        if delta_time <= 0.0 {
            return MovementResult::unchanged(snapshot);
        }

        let dt = delta_time.min(MAX_DELTA_TIME);
        let result = self.integrate(snapshot, objects, dt);
        if result.is_finite() {
            result
        } else {
            warn!(
                "physics step produced non-finite state on map {}, keeping input position",
                snapshot.map_id
            );
            MovementResult::unchanged(snapshot)
        }
    }

    fn integrate(
        &self,
        snapshot: &MovementSnapshot,
        objects: &[NearbyObject],
        dt: f32,
    ) -> MovementResult {
        let scene = Scene {
            world: self.world.as_ref(),
            map_id: snapshot.map_id,
            objects,
        };
        let body = Body {
            radius: snapshot.collision_radius.max(MIN_BODY_RADIUS),
            height: snapshot.collision_height.max(MIN_BODY_HEIGHT),
        };
        let transport = snapshot.transport.filter(TransportInfo::is_attached);

        let mut position = match &transport {
            Some(t) => t.to_world(&t.local_offset),
            None => snapshot.position,
        };
        if transport.is_none() {
            if let Some(carried) = carried_by_object(snapshot, objects) {
                position = carried;
            }
        }
        position = position + snapshot.pending_depenetration;

        let mut tick = Tick {
            position,
            orientation: snapshot.orientation,
            pitch: snapshot.pitch,
            velocity: snapshot.velocity,
            flags: snapshot.flags,
            fall_time: snapshot.fall_time,
            fall_start_z: snapshot.fall_start_z,
            ground: GroundSample {
                height: snapshot.ground_z,
                normal: snapshot.ground_normal,
            },
            support_object: snapshot.standing_on.map(|s| s.guid),
            collided: false,
        };

        self.turn(&mut tick, &snapshot.speeds, dt);

        let mut spline = snapshot.spline.clone();
        let following_spline = tick.flags.contains(MovementFlags::SPLINE_ENABLED)
            && spline.as_ref().map_or(false, |s| !s.is_finished());

        let mode = Mode::from_flags(tick.flags);
        if following_spline {
            if let Some(state) = spline.as_mut() {
                let speed = mode_speed(mode, tick.flags, &snapshot.speeds);
                let progress = spline::advance(state, speed * dt);
                tick.position = progress.position;
                tick.velocity = progress.direction.scale(speed);
                if progress.direction.length_2d() > f32::EPSILON {
                    tick.orientation =
                        normalize_orientation(progress.direction.y.atan2(progress.direction.x));
                }
                if progress.finished {
                    tick.flags.remove(MovementFlags::SPLINE_ENABLED);
                }
                tick.support_object = None;
            }
        } else {
            match mode {
                Mode::Grounded => {
                    let on_transport = transport.is_some();
                    self.step_grounded(&scene, &body, &mut tick, snapshot, on_transport, dt)
                }
                Mode::Airborne => self.step_airborne(&scene, &body, &mut tick, dt),
                Mode::Swimming | Mode::Flying => {
                    self.step_free(&scene, &body, &mut tick, snapshot, mode, dt)
                }
            }
        }

        let liquid = self.world.liquid_at(snapshot.map_id, tick.position);
        if !following_spline {
            self.update_swimming(&scene, &body, &mut tick, liquid.map(|l| l.level));
        }

        let mut pending = Point3D::ZERO;
        if !following_spline {
            let (applied, deferred) = split_depenetration(
                scene.object_penetration(&body, tick.position),
                MAX_DEPENETRATION_PER_TICK,
            );
            if applied.length() > 0.0 {
                tick.position = tick.position + applied;
                tick.collided = true;
            }
            pending = deferred;
        }

        let standing_on = tick.support_object.and_then(|guid| {
            objects.iter().find(|o| o.guid == guid).map(|o| StandingOn {
                guid,
                local_offset: (tick.position - o.position).rotate_z(-o.orientation),
            })
        });

        let mut transport_out = snapshot.transport;
        if let Some(mut t) = transport {
            t.local_offset = t.to_local(&tick.position);
            t.local_orientation = normalize_orientation(tick.orientation - t.world_orientation);
            tick.flags.insert(MovementFlags::ONTRANSPORT);
            transport_out = Some(t);
        }

        MovementResult {
            position: tick.position,
            orientation: tick.orientation,
            pitch: tick.pitch,
            velocity: tick.velocity,
            flags: tick.flags,
            transport: transport_out,
            fall_time: tick.fall_time,
            fall_start_z: tick.fall_start_z,
            ground_normal: tick.ground.normal,
            ground_z: tick.ground.height,
            pending_depenetration: pending,
            standing_on,
            spline,
            liquid,
            in_liquid: liquid.map_or(false, |l| l.level > tick.position.z),
            collided: tick.collided,
        }
    }

    fn turn(&self, tick: &mut Tick, speeds: &SpeedTable, dt: f32) {
        if tick.flags.contains(MovementFlags::ROOT) {
            return;
        }
        let mut turn = 0.0;
        if tick.flags.contains(MovementFlags::TURN_LEFT) {
            turn += 1.0;
        }
        if tick.flags.contains(MovementFlags::TURN_RIGHT) {
            turn -= 1.0;
        }
        tick.orientation = normalize_orientation(tick.orientation + turn * speeds.turn_rate * dt);

        let mut pitch = 0.0;
        if tick.flags.contains(MovementFlags::PITCH_UP) {
            pitch += 1.0;
        }
        if tick.flags.contains(MovementFlags::PITCH_DOWN) {
            pitch -= 1.0;
        }
        tick.pitch = (tick.pitch + pitch * speeds.pitch_rate * dt).clamp(-FRAC_PI_2, FRAC_PI_2);
    }

    /// Highest support under (x, y) in `[z_top - max_search, z_top]`. With
    /// water walking the liquid surface counts as ground.
    fn support_at(
        &self,
        scene: &Scene<'_>,
        flags: MovementFlags,
        at: Point3D,
        z_top: f32,
        max_search: f32,
    ) -> Option<Support> {
        let solid = scene.probe_support(at.x, at.y, z_top, max_search);
        if !flags.contains(MovementFlags::WATERWALKING) {
            return solid;
        }

        let surface = self
            .world
            .liquid_at(scene.map_id, Point3D::new(at.x, at.y, z_top - max_search))
            .filter(|l| l.level <= z_top && l.level >= z_top - max_search)
            .map(|l| Support {
                ground: GroundSample {
                    height: l.level,
                    normal: Point3D::UP,
                },
                object: None,
            });

        match (solid, surface) {
            (Some(s), Some(w)) if w.ground.height > s.ground.height => Some(w),
            (Some(s), _) => Some(s),
            (None, w) => w,
        }
    }

    fn step_up(
        &self,
        scene: &Scene<'_>,
        body: &Body,
        flags: MovementFlags,
        start: Point3D,
        desired: Point3D,
    ) -> Option<Point3D> {
        let lift = Point3D::new(0.0, 0.0, STEP_HEIGHT);
        let raised = match scene.first_hit(body, start, lift) {
            Some(hit) => start + lift.scale(hit.fraction) - Point3D::new(0.0, 0.0, collision::SKIN),
            None => start + lift,
        };
        let headroom = raised.z - start.z;
        if headroom <= collision::SKIN {
            return None;
        }

        let (across, _) = scene.move_and_slide(body, raised, desired);
        let support = self.support_at(scene, flags, across, raised.z, headroom + STEP_DOWN_BASE)?;
        Some(Point3D::new(across.x, across.y, support.ground.height))
    }

    fn step_grounded(
        &self,
        scene: &Scene<'_>,
        body: &Body,
        tick: &mut Tick,
        snapshot: &MovementSnapshot,
        on_transport: bool,
        dt: f32,
    ) {
        let direction = intent_direction(tick.flags, tick.orientation, tick.pitch, false);
        let speed = mode_speed(Mode::Grounded, tick.flags, &snapshot.speeds);
        let desired = direction.scale(speed * dt);
        let start = tick.position;

        let (mut moved, collided) = scene.move_and_slide(body, start, desired);
        if collided && desired.length_2d() > 0.0 {
            if let Some(stepped) = self.step_up(scene, body, tick.flags, start, desired) {
                if stepped.distance_2d(&start) > moved.distance_2d(&start) + 1.0e-4 {
                    moved = stepped;
                }
            }
        }
        tick.collided |= collided;

        let step_down = STEP_DOWN_BASE + moved.distance_2d(&start);
        let support = self.support_at(
            scene,
            tick.flags,
            moved,
            moved.z + STEP_HEIGHT,
            STEP_HEIGHT + step_down,
        );

        match support {
            Some(s)
                if s.ground.normal.z < MIN_WALKABLE_NORMAL_Z
                    && s.ground.height > start.z + collision::SKIN =>
            {
                // too steep to climb
                tick.position = start;
                tick.velocity = Point3D::ZERO;
                tick.collided = true;
            }
            Some(s) => {
                tick.position = Point3D::new(moved.x, moved.y, s.ground.height);
                tick.velocity = direction.scale(speed);
                tick.ground = s.ground;
                tick.support_object = s.object;
                tick.fall_start_z = tick.position.z;
            }
            None if on_transport => {
                // the transport deck carries the unit
                tick.position = moved;
                tick.velocity = direction.scale(speed);
                tick.ground = GroundSample {
                    height: moved.z,
                    normal: Point3D::UP,
                };
                tick.support_object = None;
                tick.fall_start_z = moved.z;
            }
            None => {
                tick.position = moved;
                tick.velocity = direction.scale(speed);
                tick.start_falling();
            }
        }
    }

    fn step_airborne(&self, scene: &Scene<'_>, body: &Body, tick: &mut Tick, dt: f32) {
        let terminal = if tick.flags.contains(MovementFlags::SAFE_FALL) {
            SAFE_FALL_TERMINAL_VELOCITY
        } else {
            TERMINAL_VELOCITY
        };
        let vz0 = tick.velocity.z;
        let vz1 = (vz0 - GRAVITY * dt).max(-terminal);
        let dz = 0.5 * (vz0 + vz1) * dt;
        let horizontal = tick.velocity.flatten();
        let start = tick.position;

        let motion = horizontal.scale(dt) + Point3D::new(0.0, 0.0, dz);
        let (moved, collided) = scene.move_and_slide(body, start, motion);
        tick.collided |= collided;
        tick.position = moved;
        tick.velocity = Point3D::new(horizontal.x, horizontal.y, vz1);
        tick.fall_time = tick.fall_time.saturating_add((dt * 1000.0).round() as u32);
        tick.support_object = None;

        if dz > 0.0 && moved.z < start.z + dz - collision::SKIN * 2.0 {
            // head hit a ceiling
            tick.velocity.z = tick.velocity.z.min(0.0);
        }
        if tick.velocity.z < 0.0 {
            tick.flags.insert(MovementFlags::FALLING_FAR);
        } else {
            return;
        }

        let top = start.z.max(moved.z) + LANDING_TOLERANCE;
        let search = top - moved.z + LANDING_TOLERANCE;
        if let Some(s) = self.support_at(scene, tick.flags, moved, top, search) {
            if moved.z <= s.ground.height + LANDING_TOLERANCE {
                debug!(
                    "landed at {:.2} after {} ms, fell {:.2}",
                    s.ground.height,
                    tick.fall_time,
                    tick.fall_start_z - s.ground.height
                );
                tick.land(s);
            }
        }
    }

    /// Swimming and flying: velocity follows pitched intent, no gravity.
    fn step_free(
        &self,
        scene: &Scene<'_>,
        body: &Body,
        tick: &mut Tick,
        snapshot: &MovementSnapshot,
        mode: Mode,
        dt: f32,
    ) {
        let direction = intent_direction(tick.flags, tick.orientation, tick.pitch, true);
        let speed = mode_speed(mode, tick.flags, &snapshot.speeds);
        let motion = direction.scale(speed * dt);
        let (mut moved, collided) = scene.move_and_slide(body, tick.position, motion);
        tick.collided |= collided;

        if mode == Mode::Swimming {
            if let Some(liquid) = self.world.liquid_at(scene.map_id, moved) {
                moved.z = moved.z.min(liquid.level - body.height * SWIM_ENTER_FRACTION);
            }
        }

        let floor = scene.probe_support(
            moved.x,
            moved.y,
            moved.z + STEP_HEIGHT,
            STEP_HEIGHT + body.height,
        );
        if let Some(floor) = floor {
            moved.z = moved.z.max(floor.ground.height);
            tick.ground = floor.ground;
        }

        tick.position = moved;
        tick.velocity = direction.scale(speed);
        tick.flags.remove(MovementFlags::AIRBORNE);
        tick.fall_time = 0;
        tick.fall_start_z = moved.z;
        tick.support_object = None;
    }

    fn update_swimming(&self, scene: &Scene<'_>, body: &Body, tick: &mut Tick, level: Option<f32>) {
        let depth = level.map(|l| l - tick.position.z);
        let swimming = tick.flags.contains(MovementFlags::SWIMMING);

        if swimming {
            if depth.map_or(true, |d| d < body.height * SWIM_EXIT_FRACTION) {
                tick.flags.remove(MovementFlags::SWIMMING);
                let top = tick.position.z + collision::FOOT_CLEARANCE;
                match self.support_at(scene, tick.flags, tick.position, top, STEP_HEIGHT) {
                    Some(s) => {
                        tick.position.z = s.ground.height;
                        tick.ground = s.ground;
                        tick.support_object = s.object;
                    }
                    None => tick.start_falling(),
                }
            }
            return;
        }

        let walking_on_water = tick.flags.contains(MovementFlags::WATERWALKING);
        if !walking_on_water
            && !tick.flags.intersects(MovementFlags::FLYING | MovementFlags::LEVITATING)
            && depth.map_or(false, |d| d >= body.height * SWIM_ENTER_FRACTION)
        {
            tick.flags.insert(MovementFlags::SWIMMING);
            tick.flags.remove(MovementFlags::AIRBORNE);
            tick.velocity.z = 0.0;
            tick.fall_time = 0;
            tick.fall_start_z = tick.position.z;
            tick.support_object = None;
        }
    }
}

/// Where a unit standing on a nearby object ends up after that object moved.
fn carried_by_object(snapshot: &MovementSnapshot, objects: &[NearbyObject]) -> Option<Point3D> {
    if snapshot.flags.intersects(MovementFlags::AIRBORNE | MovementFlags::SWIMMING) {
        return None;
    }
    let standing = snapshot.standing_on?;
    let object = objects
        .iter()
        .find(|o| o.guid == standing.guid && o.collides() && o.orientation.is_finite())?;
    Some(object.position + standing.local_offset.rotate_z(object.orientation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Aabb, LiquidVolume, MapData, StaticWorld};
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use shared::{LiquidKind, SplineState};

    fn stepper(maps: Vec<MapData>) -> PhysicsStepper {
        PhysicsStepper::new(Arc::new(StaticWorld::from_maps(maps).unwrap()))
    }

    fn flat() -> PhysicsStepper {
        stepper(vec![MapData::flat(0, 0.0)])
    }

    fn lake() -> PhysicsStepper {
        stepper(vec![MapData::flat(0, -20.0).with_liquid(LiquidVolume {
            min_x: -50.0,
            min_y: -50.0,
            max_x: 50.0,
            max_y: 50.0,
            floor: -20.0,
            level: 0.0,
            kind: LiquidKind::Water,
        })])
    }

    fn snapshot_at(x: f32, y: f32, z: f32) -> MovementSnapshot {
        MovementSnapshot::new(0, Point3D::new(x, y, z))
    }

    #[test]
    fn test_grounded_run_forward() {
        let mut snapshot = snapshot_at(0.0, 0.0, 0.0);
        snapshot.flags = MovementFlags::FORWARD;
        let result = flat().step(&snapshot, &[], 0.5);

        assert_approx_eq!(result.position.x, 3.5, 1e-4);
        assert_approx_eq!(result.position.z, 0.0, 1e-6);
        assert_approx_eq!(result.velocity.x, 7.0, 1e-4);
        assert!(!result.flags.intersects(MovementFlags::AIRBORNE));
        assert!(!result.collided);
    }

    #[test]
    fn test_speed_selection() {
        let stepper = flat();
        let mut snapshot = snapshot_at(0.0, 0.0, 0.0);

        snapshot.flags = MovementFlags::FORWARD | MovementFlags::WALK_MODE;
        assert_approx_eq!(stepper.step(&snapshot, &[], 0.5).position.x, 1.25, 1e-4);

        snapshot.flags = MovementFlags::BACKWARD;
        assert_approx_eq!(stepper.step(&snapshot, &[], 0.5).position.x, -2.25, 1e-4);

        snapshot.flags = MovementFlags::FORWARD | MovementFlags::ROOT;
        assert_eq!(stepper.step(&snapshot, &[], 0.5).position, Point3D::ZERO);
    }

    #[test]
    fn test_delta_time_clamped() {
        let mut snapshot = snapshot_at(0.0, 0.0, 0.0);
        snapshot.flags = MovementFlags::FORWARD;
        let result = flat().step(&snapshot, &[], 10.0);
        assert_approx_eq!(result.position.x, 3.5, 1e-4);
    }

    #[test]
    fn test_turning() {
        let mut snapshot = snapshot_at(0.0, 0.0, 0.0);
        snapshot.flags = MovementFlags::TURN_LEFT;
        let result = flat().step(&snapshot, &[], 0.5);
        assert_approx_eq!(result.orientation, FRAC_PI_2, 1e-5);

        snapshot.flags = MovementFlags::TURN_RIGHT;
        let result = flat().step(&snapshot, &[], 0.5);
        assert_approx_eq!(result.orientation, 3.0 * FRAC_PI_2, 1e-5);
    }

    #[test]
    fn test_fall_and_land() {
        let stepper = flat();
        let mut snapshot = snapshot_at(0.0, 0.0, 10.0);
        snapshot.flags = MovementFlags::JUMPING;

        let mut landed = false;
        for _ in 0..50 {
            let result = stepper.step(&snapshot, &[], 0.1);
            snapshot.apply_result(&result);
            if !result.flags.intersects(MovementFlags::AIRBORNE) {
                landed = true;
                break;
            }
            assert!(result.position.z > 0.0);
        }

        assert!(landed);
        assert_approx_eq!(snapshot.position.z, 0.0, 1e-5);
        assert_eq!(snapshot.fall_time, 0);
        assert_eq!(snapshot.velocity.z, 0.0);
    }

    #[test]
    fn test_fall_time_accumulates_across_ticks() {
        let stepper = flat();
        let mut snapshot = snapshot_at(0.0, 0.0, 100.0);
        snapshot.flags = MovementFlags::JUMPING;

        let first = stepper.step(&snapshot, &[], 0.1);
        assert_eq!(first.fall_time, 100);
        assert!(first.flags.contains(MovementFlags::FALLING_FAR));

        snapshot.apply_result(&first);
        let second = stepper.step(&snapshot, &[], 0.1);
        assert_eq!(second.fall_time, 200);
        assert_approx_eq!(second.velocity.z, -2.0 * GRAVITY * 0.1, 1e-4);
        assert!(second.position.z < first.position.z);
    }

    #[test]
    fn test_terminal_velocity() {
        let stepper = flat();
        let mut snapshot = snapshot_at(0.0, 0.0, 500.0);
        snapshot.flags = MovementFlags::JUMPING;
        snapshot.velocity = Point3D::new(0.0, 0.0, -59.0);
        let result = stepper.step(&snapshot, &[], 0.5);
        assert_approx_eq!(result.velocity.z, -TERMINAL_VELOCITY, 1e-4);

        snapshot.flags = MovementFlags::JUMPING | MovementFlags::SAFE_FALL;
        snapshot.velocity = Point3D::new(0.0, 0.0, -5.0);
        let result = stepper.step(&snapshot, &[], 0.5);
        assert_approx_eq!(result.velocity.z, -SAFE_FALL_TERMINAL_VELOCITY, 1e-4);
    }

    #[test]
    fn test_jump_keeps_momentum() {
        let mut snapshot = snapshot_at(0.0, 0.0, 0.0);
        snapshot.flags = MovementFlags::JUMPING | MovementFlags::FORWARD;
        snapshot.velocity = Point3D::new(7.0, 0.0, 8.0);
        let result = flat().step(&snapshot, &[], 0.1);

        assert_approx_eq!(result.position.x, 0.7, 1e-4);
        assert!(result.position.z > 0.0);
        assert!(result.flags.contains(MovementFlags::JUMPING));
        assert!(!result.flags.contains(MovementFlags::FALLING_FAR));
    }

    #[test]
    fn test_walking_off_ledge_starts_fall() {
        let platform = Aabb::new(Point3D::new(-10.0, -10.0, 0.0), Point3D::new(1.0, 10.0, 5.0));
        let stepper = stepper(vec![MapData::flat(0, 0.0).with_obstacle(platform)]);
        let mut snapshot = snapshot_at(0.0, 0.0, 5.0);
        snapshot.flags = MovementFlags::FORWARD;

        let result = stepper.step(&snapshot, &[], 0.5);
        assert!(result.flags.contains(MovementFlags::JUMPING));
        assert_approx_eq!(result.fall_start_z, 5.0, 1e-5);
        assert_eq!(result.fall_time, 0);
    }

    #[test]
    fn test_step_up_low_obstacle() {
        let step = Aabb::new(Point3D::new(2.0, -10.0, 0.0), Point3D::new(10.0, 10.0, 1.0));
        let stepper = stepper(vec![MapData::flat(0, 0.0).with_obstacle(step)]);
        let mut snapshot = snapshot_at(0.0, 0.0, 0.0);
        snapshot.flags = MovementFlags::FORWARD;

        let result = stepper.step(&snapshot, &[], 0.5);
        assert_approx_eq!(result.position.x, 3.5, 1e-3);
        assert_approx_eq!(result.position.z, 1.0, 1e-5);
    }

    #[test]
    fn test_tall_wall_blocks() {
        let wall = Aabb::new(Point3D::new(2.0, -10.0, 0.0), Point3D::new(3.0, 10.0, 5.0));
        let stepper = stepper(vec![MapData::flat(0, 0.0).with_obstacle(wall)]);
        let mut snapshot = snapshot_at(0.0, 0.0, 0.0);
        snapshot.flags = MovementFlags::FORWARD;

        let result = stepper.step(&snapshot, &[], 0.5);
        assert!(result.collided);
        assert!(result.position.x < 2.0 - snapshot.collision_radius + 1e-3);
        assert_approx_eq!(result.position.z, 0.0, 1e-6);
    }

    #[test]
    fn test_entering_deep_water_swims() {
        let snapshot = snapshot_at(0.0, 0.0, -20.0);
        let result = lake().step(&snapshot, &[], 0.1);
        assert!(result.flags.contains(MovementFlags::SWIMMING));
        assert!(result.in_liquid);
        assert_eq!(result.liquid.map(|l| l.kind), Some(LiquidKind::Water));
    }

    #[test]
    fn test_swimming_forward_and_surface_clamp() {
        let stepper = lake();
        let mut snapshot = snapshot_at(0.0, 0.0, -5.0);
        snapshot.flags = MovementFlags::SWIMMING | MovementFlags::FORWARD;
        let result = stepper.step(&snapshot, &[], 0.5);
        assert_approx_eq!(result.position.x, 4.722222 * 0.5, 1e-3);
        assert_approx_eq!(result.position.z, -5.0, 1e-4);
        assert!(result.flags.contains(MovementFlags::SWIMMING));

        snapshot.position.z = -0.5;
        snapshot.pitch = 0.5;
        let result = stepper.step(&snapshot, &[], 0.5);
        assert!(result.position.z <= -snapshot.collision_height * SWIM_ENTER_FRACTION + 1e-4);
        assert!(result.flags.contains(MovementFlags::SWIMMING));
    }

    #[test]
    fn test_water_walking_stays_on_surface() {
        let mut snapshot = snapshot_at(0.0, 0.0, 0.0);
        snapshot.flags = MovementFlags::WATERWALKING | MovementFlags::FORWARD;
        let result = lake().step(&snapshot, &[], 0.5);
        assert_approx_eq!(result.position.z, 0.0, 1e-5);
        assert!(!result.flags.contains(MovementFlags::SWIMMING));
        assert!(!result.flags.intersects(MovementFlags::AIRBORNE));
    }

    #[test]
    fn test_flying_ignores_gravity() {
        let mut snapshot = snapshot_at(0.0, 0.0, 50.0);
        snapshot.flags = MovementFlags::FLYING | MovementFlags::CAN_FLY | MovementFlags::FORWARD;
        snapshot.pitch = FRAC_PI_2;
        let result = flat().step(&snapshot, &[], 0.5);
        assert_approx_eq!(result.position.z, 53.5, 1e-3);
        assert_approx_eq!(result.position.x, 0.0, 1e-3);
    }

    #[test]
    fn test_transport_relative_motion() {
        let mut snapshot = snapshot_at(0.0, 0.0, 0.0);
        snapshot.transport = Some(TransportInfo {
            guid: 7,
            local_offset: Point3D::new(1.0, 0.0, 0.0),
            local_orientation: 0.0,
            world_position: Point3D::new(100.0, 0.0, 0.0),
            world_orientation: FRAC_PI_2,
        });
        let result = flat().step(&snapshot, &[], 0.1);

        assert_approx_eq!(result.position.x, 100.0, 1e-4);
        assert_approx_eq!(result.position.y, 1.0, 1e-4);
        assert!(result.flags.contains(MovementFlags::ONTRANSPORT));
        let transport = result.transport.unwrap();
        assert_approx_eq!(transport.local_offset.x, 1.0, 1e-4);
        assert_approx_eq!(transport.local_offset.y, 0.0, 1e-4);
    }

    #[test]
    fn test_transport_deck_supports() {
        let mut snapshot = snapshot_at(0.0, 0.0, 0.0);
        snapshot.transport = Some(TransportInfo {
            guid: 7,
            local_offset: Point3D::new(1.0, 0.0, 0.0),
            local_orientation: 0.0,
            world_position: Point3D::new(0.0, 0.0, 50.0),
            world_orientation: 0.0,
        });
        let result = flat().step(&snapshot, &[], 0.1);
        assert_approx_eq!(result.position.z, 50.0, 1e-4);
        assert!(!result.flags.intersects(MovementFlags::AIRBORNE));
    }

    #[test]
    fn test_unset_transport_ignored() {
        let mut snapshot = snapshot_at(3.0, 0.0, 0.0);
        snapshot.transport = Some(TransportInfo::default());
        let result = flat().step(&snapshot, &[], 0.1);
        assert_approx_eq!(result.position.x, 3.0, 1e-6);
        assert!(!result.flags.contains(MovementFlags::ONTRANSPORT));
        assert_eq!(result.transport, Some(TransportInfo::default()));
    }

    #[test]
    fn test_depenetration_deferred_across_ticks() {
        let stepper = flat();
        let pillar = NearbyObject {
            guid: 1,
            display_id: 10,
            position: Point3D::ZERO,
            orientation: 0.0,
            scale: 1.5,
            state: NearbyObject::STATE_READY,
        };
        let objects = [pillar];
        let mut snapshot = snapshot_at(0.2, 0.0, 0.0);

        let first = stepper.step(&snapshot, &objects, 0.1);
        assert_approx_eq!(first.position.x, 0.7, 1e-4);
        assert_approx_eq!(first.pending_depenetration.x, 1.5 + snapshot.collision_radius - 0.7, 1e-3);
        assert!(first.collided);

        snapshot.apply_result(&first);
        let second = stepper.step(&snapshot, &objects, 0.1);
        assert_approx_eq!(second.position.x, 1.5 + snapshot.collision_radius, 1e-3);
        assert!(second.pending_depenetration.length() < 1e-3);
    }

    #[test]
    fn test_standing_on_moving_object() {
        let stepper = flat();
        let mut lift = NearbyObject {
            guid: 42,
            display_id: 3,
            position: Point3D::ZERO,
            orientation: 0.0,
            scale: 1.0,
            state: NearbyObject::STATE_READY,
        };
        let mut snapshot = snapshot_at(0.0, 0.0, 2.0);

        let first = stepper.step(&snapshot, &[lift], 0.1);
        let standing = first.standing_on.unwrap();
        assert_eq!(standing.guid, 42);
        assert_approx_eq!(first.position.z, 2.0, 1e-5);

        // the lift rises: the unit rides along
        snapshot.apply_result(&first);
        lift.position.z = 1.0;
        let second = stepper.step(&snapshot, &[lift], 0.1);
        assert_approx_eq!(second.position.z, 3.0, 1e-4);
        assert_eq!(second.standing_on.map(|s| s.guid), Some(42));
    }

    #[test]
    fn test_spline_follow() {
        let stepper = flat();
        let mut snapshot = snapshot_at(0.0, 0.0, 0.0);
        snapshot.flags = MovementFlags::SPLINE_ENABLED;
        snapshot.spline = Some(SplineState {
            points: vec![
                Point3D::new(0.0, 0.0, 0.0),
                Point3D::new(10.0, 0.0, 0.0),
                Point3D::new(10.0, 10.0, 0.0),
            ],
            segment: 0,
            segment_progress: 0.0,
        });

        for _ in 0..4 {
            let result = stepper.step(&snapshot, &[], 0.5);
            snapshot.apply_result(&result);
        }
        assert_approx_eq!(snapshot.position.x, 10.0, 1e-3);
        assert_approx_eq!(snapshot.position.y, 4.0, 1e-3);
        assert_approx_eq!(snapshot.orientation, FRAC_PI_2, 1e-4);

        for _ in 0..4 {
            let result = stepper.step(&snapshot, &[], 0.5);
            snapshot.apply_result(&result);
        }
        assert_eq!(snapshot.position, Point3D::new(10.0, 10.0, 0.0));
        assert!(!snapshot.flags.contains(MovementFlags::SPLINE_ENABLED));
        assert_eq!(snapshot.velocity, Point3D::ZERO);
    }

    #[test]
    fn test_non_finite_input_unchanged() {
        let stepper = flat();
        let mut snapshot = snapshot_at(1.0, 2.0, 0.0);
        snapshot.flags = MovementFlags::FORWARD;
        snapshot.velocity = Point3D::new(3.0, 0.0, 0.0);

        let result = stepper.step(&snapshot, &[], f32::NAN);
        assert_eq!(result.position, snapshot.position);
        assert_eq!(result.velocity, Point3D::ZERO);

        let result = stepper.step(&snapshot, &[], 0.0);
        assert_eq!(result.position, snapshot.position);

        snapshot.orientation = f32::INFINITY;
        let result = stepper.step(&snapshot, &[], 0.1);
        assert_eq!(result.position, Point3D::new(1.0, 2.0, 0.0));
        assert!(result.is_finite());
    }

    #[test]
    fn test_random_ticks_deterministic_and_finite() {
        let wall = Aabb::new(Point3D::new(5.0, -5.0, 0.0), Point3D::new(6.0, 5.0, 4.0));
        let ledge = Aabb::new(Point3D::new(-8.0, -8.0, 0.0), Point3D::new(-4.0, -4.0, 1.5));
        let stepper = stepper(vec![MapData::flat(0, 0.0).with_obstacle(wall).with_obstacle(ledge)]);
        let crate_box = NearbyObject {
            guid: 5,
            display_id: 1,
            position: Point3D::new(0.0, 4.0, 0.0),
            orientation: 0.3,
            scale: 0.8,
            state: NearbyObject::STATE_READY,
        };

        let run = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut snapshot = snapshot_at(0.0, 0.0, 0.0);
            let mut trace = Vec::new();
            for _ in 0..300 {
                snapshot.flags = MovementFlags(rng.gen::<u32>() & 0x0000_203F);
                if snapshot.flags.contains(MovementFlags::JUMPING) && snapshot.velocity.z == 0.0 {
                    snapshot.velocity.z = rng.gen_range(0.0..8.0);
                }
                let dt = rng.gen_range(0.0..0.6);
                let result = stepper.step(&snapshot, &[crate_box], dt);
                assert!(result.is_finite());
                snapshot.apply_result(&result);
                trace.push(result);
            }
            trace
        };

        assert_eq!(run(7), run(7));
    }
}
