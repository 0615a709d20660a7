use crate::world::{Aabb, GroundSample, SweepHit, WorldQuery, GROUND_HINT_TOLERANCE};
use shared::{NearbyObject, Point3D};

/// Separation kept from surfaces after a blocked move.
pub const SKIN: f32 = 0.01;
/// The swept body starts this far above the feet so surfaces level with the
/// feet don't block horizontal motion.
pub const FOOT_CLEARANCE: f32 = 0.05;
pub const MAX_SLIDE_ITERATIONS: u32 = 4;
const MIN_MOVE_SQ: f32 = 1.0e-8;

/// Collision volume of the moving unit, anchored at its feet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub radius: f32,
    pub height: f32,
}

impl Body {
    /// Centre and half extents of the box used for sweeps.
    pub fn sweep_box(&self, feet: Point3D) -> (Point3D, Point3D) {
        let half_z = ((self.height - FOOT_CLEARANCE) * 0.5).max(0.01);
        let center = Point3D::new(feet.x, feet.y, feet.z + FOOT_CLEARANCE + half_z);
        (center, Point3D::new(self.radius, self.radius, half_z))
    }

    pub fn bounds(&self, feet: Point3D) -> Aabb {
        Aabb::new(
            Point3D::new(feet.x - self.radius, feet.y - self.radius, feet.z),
            Point3D::new(feet.x + self.radius, feet.y + self.radius, feet.z + self.height),
        )
    }
}

/// Everything a tick collides against.
pub struct Scene<'a> {
    pub world: &'a dyn WorldQuery,
    pub map_id: u32,
    pub objects: &'a [NearbyObject],
}

/// A supporting surface and, when it is the top of a nearby object, which one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Support {
    pub ground: GroundSample,
    pub object: Option<u64>,
}

impl<'a> Scene<'a> {
    fn colliders(&self) -> impl Iterator<Item = (&'a NearbyObject, Aabb)> + 'a {
        self.objects
            .iter()
            .filter(|o| o.collides())
            .map(|o| (o, Aabb::new(o.bounds().0, o.bounds().1)))
    }

    /// Earliest hit of the body swept by `motion` from `feet`.
    pub fn first_hit(&self, body: &Body, feet: Point3D, motion: Point3D) -> Option<SweepHit> {
        let (center, half) = body.sweep_box(feet);
        let static_hit = self.world.sweep_box(self.map_id, center, half, motion);
        let object_hits = self
            .colliders()
            .filter_map(|(_, bounds)| bounds.expanded(half).ray_cast(center, motion));

        static_hit
            .into_iter()
            .chain(object_hits)
            .min_by(|a, b| a.fraction.total_cmp(&b.fraction))
    }

    /// Sweep-and-slide: travel to the first contact, then slide the leftover
    /// motion along the contact plane, a few times to handle corners.
    ///
    /// Returns the end position and whether anything was hit.
    pub fn move_and_slide(&self, body: &Body, start: Point3D, motion: Point3D) -> (Point3D, bool) {
        let mut pos = start;
        let mut remaining = motion;
        let mut collided = false;

        for _ in 0..MAX_SLIDE_ITERATIONS {
            if remaining.dot(&remaining) <= MIN_MOVE_SQ {
                break;
            }

            match self.first_hit(body, pos, remaining) {
                None => {
                    pos = pos + remaining;
                    break;
                }
                Some(hit) => {
                    collided = true;
                    let len = remaining.length();
                    let dir = remaining.scale(1.0 / len);
                    let travel = (len * hit.fraction).max(0.0);
                    pos = pos + dir.scale((travel - SKIN).max(0.0));

                    let leftover = dir.scale(len - travel);
                    let slide = leftover - hit.normal.scale(leftover.dot(&hit.normal));
                    remaining = slide;
                }
            }
        }

        (pos, collided)
    }

    /// Highest support at (x, y) between `z_top` and `z_top - max_search`,
    /// from static ground and from the tops of nearby objects.
    pub fn probe_support(&self, x: f32, y: f32, z_top: f32, max_search: f32) -> Option<Support> {
        let floor = z_top - max_search;
        let world = self
            .world
            .ground_height(self.map_id, x, y, z_top - GROUND_HINT_TOLERANCE, max_search - GROUND_HINT_TOLERANCE)
            .map(|ground| Support {
                ground,
                object: None,
            });
        let tops = self
            .colliders()
            .filter(|(_, b)| b.contains_xy(x, y) && b.max.z <= z_top && b.max.z >= floor)
            .map(|(o, b)| Support {
                ground: GroundSample {
                    height: b.max.z,
                    normal: Point3D::UP,
                },
                object: Some(o.guid),
            });

        world
            .into_iter()
            .chain(tops)
            .max_by(|a, b| a.ground.height.total_cmp(&b.ground.height))
    }

    /// Total horizontal push needed to clear every overlapping nearby object.
    pub fn object_penetration(&self, body: &Body, feet: Point3D) -> Point3D {
        let bounds = body.bounds(feet);
        self.colliders()
            .filter_map(|(_, b)| bounds.horizontal_push_out(&b))
            .fold(Point3D::ZERO, |acc, push| acc + push)
    }
}

/// Splits a correction into the part applied now and the part deferred to
/// the next tick.
pub fn split_depenetration(total: Point3D, max_per_tick: f32) -> (Point3D, Point3D) {
    let magnitude = total.length();
    if magnitude <= max_per_tick || magnitude <= f32::EPSILON {
        return (total, Point3D::ZERO);
    }
    let applied = total.scale(max_per_tick / magnitude);
    (applied, total - applied)
}
