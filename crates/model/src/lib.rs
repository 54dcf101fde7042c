use serde::{Deserialize, Serialize};

/// One fixed geographic point of the route geometry.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
}

/// Ordered waypoints; segment `i` spans waypoint `i` to `i + 1`.
/// Immutable for the lifetime of a simulation run.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct RouteModel {
    waypoints: Vec<Waypoint>,
}

impl RouteModel {
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        Self { waypoints }
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Waypoint> {
        self.waypoints.get(i)
    }

    pub fn first(&self) -> Option<&Waypoint> {
        self.waypoints.first()
    }

    pub fn last(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }

    pub fn segment_count(&self) -> usize {
        self.waypoints.len().saturating_sub(1)
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }
}

/// One observed (position, speed) sample from one vehicle at one time.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct TelemetryPoint {
    pub vehicle_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    pub lat: f64,
    pub lng: f64,
    /// km/h
    pub speed: f64,
}

impl TelemetryPoint {
    /// Validation boundary check: aggregation assumes finite inputs.
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite() && self.speed.is_finite()
    }
}

/// Per-segment average observed speed, index-aligned with the route.
/// `lat`/`lng` copy the segment's starting waypoint for convenience.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SegmentProfile {
    pub segment_index: usize,
    /// km/h, rounded to 2 decimals; 0.0 when no samples landed here.
    pub avg_speed: f64,
    pub sample_count: usize,
    pub lat: f64,
    pub lng: f64,
}

/// Derived, immutable-per-batch speed table: exactly one entry per
/// route waypoint, in waypoint order.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CruiseProfile {
    pub segments: Vec<SegmentProfile>,
}

impl CruiseProfile {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&SegmentProfile> {
        self.segments.get(i)
    }

    pub fn avg_speeds(&self) -> Vec<f64> {
        self.segments.iter().map(|s| s.avg_speed).collect()
    }
}

/// Snapshot of the simulated vehicle, produced once per tick.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SimulationState {
    pub segment_index: usize,
    /// Fractional position within the current segment, in [0, 1).
    pub progress: f64,
    pub position: Waypoint,
    /// Blended instantaneous speed reported for this tick, km/h.
    pub current_speed: f64,
    /// Average speed of the upcoming segment, km/h.
    pub next_speed_target: f64,
    /// The clamped multiplier that was applied on this tick.
    pub speed_multiplier: f64,
}

/// Linear interpolation between two waypoints. Total for t in [0, 1]:
/// t=0 yields `a` exactly, t=1 yields `b` exactly.
pub fn interpolate_position(a: &Waypoint, b: &Waypoint, t: f64) -> Waypoint {
    Waypoint {
        lat: a.lat + (b.lat - a.lat) * t,
        lng: a.lng + (b.lng - a.lng) * t,
    }
}
