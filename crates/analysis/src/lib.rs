use model::*;
use serde_json::{json, Value};

/// Derives the per-segment cruise speed table from a complete telemetry
/// batch. Each point is assigned to its nearest waypoint by squared
/// planar distance (no geodesic correction, deliberately — changing the
/// metric would change every derived profile), then speeds are averaged
/// per waypoint index.
///
/// The output always has exactly one entry per route waypoint, in
/// waypoint order. Waypoints that attracted no samples report
/// `avg_speed = 0.0, sample_count = 0`. Distance ties go to the lowest
/// index.
pub fn compute_cruise_profile(points: &[TelemetryPoint], route: &RouteModel) -> CruiseProfile {
    let mut speeds_per_segment: Vec<Vec<f64>> = vec![Vec::new(); route.len()];

    for point in points {
        let mut min_dist = f64::INFINITY;
        let mut seg_idx = 0;
        for (i, wp) in route.waypoints().iter().enumerate() {
            let d_lat = point.lat - wp.lat;
            let d_lng = point.lng - wp.lng;
            let dist = d_lat * d_lat + d_lng * d_lng;
            if dist < min_dist {
                min_dist = dist;
                seg_idx = i;
            }
        }
        if let Some(speeds) = speeds_per_segment.get_mut(seg_idx) {
            speeds.push(point.speed);
        }
    }

    let mut segments = Vec::with_capacity(route.len());
    for (i, wp) in route.waypoints().iter().enumerate() {
        let speeds = &speeds_per_segment[i];
        let avg = if speeds.is_empty() {
            0.0
        } else {
            let mean = speeds.iter().sum::<f64>() / speeds.len() as f64;
            round2(mean)
        };
        segments.push(SegmentProfile {
            segment_index: i,
            avg_speed: avg,
            sample_count: speeds.len(),
            lat: wp.lat,
            lng: wp.lng,
        });
    }
    CruiseProfile { segments }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Display/export summary of a derived profile: the segment average
/// speed list plus a few aggregates.
pub fn profile_summary(profile: &CruiseProfile) -> Value {
    let total_samples: usize = profile.segments.iter().map(|s| s.sample_count).sum();
    let covered: Vec<f64> = profile
        .segments
        .iter()
        .filter(|s| s.sample_count > 0)
        .map(|s| s.avg_speed)
        .collect();
    let min = covered.iter().copied().fold(f64::INFINITY, f64::min);
    let max = covered.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    json!({
        "segment_average_speeds": profile.avg_speeds(),
        "total_samples": total_samples,
        "covered_segments": covered.len(),
        "min_avg_speed": if covered.is_empty() { 0.0 } else { min },
        "max_avg_speed": if covered.is_empty() { 0.0 } else { max },
    })
}
