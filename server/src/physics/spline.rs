use shared::{Point3D, SplineState};

const MIN_SEGMENT_LENGTH: f32 = 1.0e-4;

/// Where a spline follower ended up after one advance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineProgress {
    pub position: Point3D,
    /// Unit direction of the segment being travelled, zero once finished.
    pub direction: Point3D,
    pub finished: bool,
}

/// Moves `distance` units along the polyline, updating segment and progress.
pub fn advance(spline: &mut SplineState, distance: f32) -> SplineProgress {
    let mut remaining = distance.max(0.0);

    while !spline.is_finished() {
        let index = spline.segment as usize;
        let start = spline.points[index];
        let end = spline.points[index + 1];
        let length = start.distance(&end);

        if length < MIN_SEGMENT_LENGTH {
            spline.segment += 1;
            spline.segment_progress = 0.0;
            continue;
        }

        let left_on_segment = (length - spline.segment_progress).max(0.0);
        if remaining < left_on_segment {
            spline.segment_progress += remaining;
            return SplineProgress {
                position: start.lerp(&end, spline.segment_progress / length),
                direction: (end - start).scale(1.0 / length),
                finished: false,
            };
        }

        remaining -= left_on_segment;
        spline.segment += 1;
        spline.segment_progress = 0.0;
    }

    let position = spline.points.last().copied().unwrap_or(Point3D::ZERO);
    SplineProgress {
        position,
        direction: Point3D::ZERO,
        finished: true,
    }
}
