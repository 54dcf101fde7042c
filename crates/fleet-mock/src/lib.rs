//! Mock fleet telemetry for driving the profile pipeline without a live
//! data source.

use model::{RouteModel, TelemetryPoint, Waypoint};
use rand::Rng;

/// A driving style band; generated speeds fall uniformly inside
/// `base_speed ± variance`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Behavior {
    pub name: &'static str,
    pub base_speed: f64,
    pub variance: f64,
}

pub const SLOW: Behavior = Behavior {
    name: "slow",
    base_speed: 40.0,
    variance: 5.0,
};
pub const MEDIUM: Behavior = Behavior {
    name: "medium",
    base_speed: 55.0,
    variance: 5.0,
};
pub const FAST: Behavior = Behavior {
    name: "fast",
    base_speed: 70.0,
    variance: 5.0,
};

/// Seven waypoints along Heilbronner Strasse, starting at Stuttgart
/// Hauptbahnhof.
pub fn stuttgart_route() -> RouteModel {
    RouteModel::new(vec![
        Waypoint { lat: 48.7837, lng: 9.1829 },
        Waypoint { lat: 48.7832, lng: 9.1815 },
        Waypoint { lat: 48.7825, lng: 9.1800 },
        Waypoint { lat: 48.7815, lng: 9.1790 },
        Waypoint { lat: 48.7805, lng: 9.1780 },
        Waypoint { lat: 48.7795, lng: 9.1770 },
        Waypoint { lat: 48.7785, lng: 9.1760 },
    ])
}

/// Dominant behavior per Stuttgart route segment: 2 slow, 3 medium, 2 fast.
pub fn stuttgart_behaviors() -> Vec<Behavior> {
    vec![SLOW, SLOW, MEDIUM, MEDIUM, MEDIUM, FAST, FAST]
}

/// One telemetry point per waypoint, placed exactly at the waypoint,
/// speed drawn from the segment's dominant behavior, timestamps 1s apart.
pub fn generate_vehicle<R: Rng>(
    rng: &mut R,
    vehicle_id: &str,
    route: &RouteModel,
    behaviors: &[Behavior],
    start_ts: f64,
) -> Vec<TelemetryPoint> {
    route
        .waypoints()
        .iter()
        .enumerate()
        .map(|(i, wp)| {
            let behavior = behaviors
                .get(i)
                .or_else(|| behaviors.last())
                .copied()
                .unwrap_or(MEDIUM);
            let jitter = (rng.random::<f64>() - 0.5) * 2.0 * behavior.variance;
            TelemetryPoint {
                vehicle_id: vehicle_id.to_string(),
                timestamp: start_ts + i as f64 * 1000.0,
                lat: wp.lat,
                lng: wp.lng,
                speed: behavior.base_speed + jitter,
            }
        })
        .collect()
}

/// Flat batch for a whole fleet, vehicle ids `car-1` .. `car-{count}`.
pub fn generate_fleet<R: Rng>(
    rng: &mut R,
    count: usize,
    route: &RouteModel,
    behaviors: &[Behavior],
    start_ts: f64,
) -> Vec<TelemetryPoint> {
    let mut batch = Vec::with_capacity(count * route.len());
    for v in 1..=count {
        let id = format!("car-{v}");
        batch.extend(generate_vehicle(rng, &id, route, behaviors, start_ts));
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn fleet_size_and_placement() {
        let route = stuttgart_route();
        let behaviors = stuttgart_behaviors();
        let mut rng = StdRng::seed_from_u64(7);
        let batch = generate_fleet(&mut rng, 10, &route, &behaviors, 0.0);
        assert_eq!(batch.len(), 10 * route.len());
        for (i, p) in batch.iter().enumerate() {
            let wp = route.get(i % route.len()).unwrap();
            assert_eq!(p.lat, wp.lat);
            assert_eq!(p.lng, wp.lng);
            assert!(p.is_finite());
        }
        assert_eq!(batch[0].vehicle_id, "car-1");
        assert_eq!(batch.last().unwrap().vehicle_id, "car-10");
    }

    #[test]
    fn speeds_stay_within_behavior_band() {
        let route = stuttgart_route();
        let behaviors = stuttgart_behaviors();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let points = generate_vehicle(&mut rng, "car-1", &route, &behaviors, 0.0);
            for (i, p) in points.iter().enumerate() {
                let b = behaviors[i];
                assert!(p.speed >= b.base_speed - b.variance);
                assert!(p.speed <= b.base_speed + b.variance);
            }
        }
    }

    #[test]
    fn seeded_generation_is_deterministic() {
        let route = stuttgart_route();
        let behaviors = stuttgart_behaviors();
        let a = generate_fleet(&mut StdRng::seed_from_u64(1), 3, &route, &behaviors, 0.0);
        let b = generate_fleet(&mut StdRng::seed_from_u64(1), 3, &route, &behaviors, 0.0);
        assert_eq!(a, b);
    }

    #[test]
    fn timestamps_advance_one_second_per_waypoint() {
        let route = stuttgart_route();
        let mut rng = StdRng::seed_from_u64(3);
        let points = generate_vehicle(&mut rng, "car-1", &route, &stuttgart_behaviors(), 5000.0);
        for (i, p) in points.iter().enumerate() {
            assert_eq!(p.timestamp, 5000.0 + i as f64 * 1000.0);
        }
    }
}
