//! Tick-driven speed smoothing and route playback for one simulated
//! vehicle, driven by a derived cruise profile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use model::{interpolate_position, CruiseProfile, RouteModel, SimulationState, Waypoint};

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("cruise profile has {got} entries but route has {want} waypoints")]
    ProfileLengthMismatch { got: usize, want: usize },
}

/// Tuning constants for the smoother, passed in explicitly so tests can
/// run with alternate values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SmootherConfig {
    /// Base progress increment per tick at reference speed.
    pub base_step: f64,
    /// Speed (km/h) at which a tick advances exactly `base_step * scale_factor`.
    pub reference_speed: f64,
    pub scale_factor: f64,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    /// Cadence the external clock is expected to tick at.
    pub tick_interval_ms: u64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            base_step: 0.02,
            reference_speed: 50.0,
            scale_factor: 0.05,
            min_multiplier: 0.2,
            max_multiplier: 20.0,
            tick_interval_ms: 100,
        }
    }
}

impl SmootherConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// State machine advancing one vehicle along the route. Single-writer:
/// exactly one caller may invoke `advance`, once per tick.
pub struct SpeedSmoother {
    route: Arc<RouteModel>,
    profile: Arc<CruiseProfile>,
    config: SmootherConfig,
    state: SimulationState,
    // Set when crossing into a segment whose average exceeds the
    // previous segment's; drives the one-tick hold before ramping up.
    just_entered_faster: bool,
    terminal: bool,
}

impl SpeedSmoother {
    pub fn new(
        route: Arc<RouteModel>,
        profile: Arc<CruiseProfile>,
        config: SmootherConfig,
    ) -> Result<Self, SimError> {
        if profile.len() != route.len() {
            return Err(SimError::ProfileLengthMismatch {
                got: profile.len(),
                want: route.len(),
            });
        }
        let position = route
            .first()
            .copied()
            .unwrap_or(Waypoint { lat: 0.0, lng: 0.0 });
        let current_speed = profile.get(0).map(|s| s.avg_speed).unwrap_or(0.0);
        let next_speed_target = profile
            .get(1)
            .or_else(|| profile.get(0))
            .map(|s| s.avg_speed)
            .unwrap_or(0.0);
        Ok(Self {
            // A route without segments is terminal from the start.
            terminal: route.len() < 2,
            state: SimulationState {
                segment_index: 0,
                progress: 0.0,
                position,
                current_speed,
                next_speed_target,
                speed_multiplier: 1.0,
            },
            route,
            profile,
            config,
            just_entered_faster: false,
        })
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Replaces the cruise profile between ticks, e.g. after a new
    /// telemetry batch was aggregated. Never mutates a profile in place.
    pub fn swap_profile(&mut self, profile: Arc<CruiseProfile>) -> Result<(), SimError> {
        if profile.len() != self.route.len() {
            return Err(SimError::ProfileLengthMismatch {
                got: profile.len(),
                want: self.route.len(),
            });
        }
        self.profile = profile;
        Ok(())
    }

    /// One tick: blend the instantaneous speed, advance intra-segment
    /// progress, interpolate the position. Past the terminal segment
    /// this is a no-op. Never fails; every tick-time condition is a
    /// defined branch.
    pub fn advance(&mut self, multiplier: f64) -> SimulationState {
        if self.terminal {
            return self.state.clone();
        }

        let seg = self.state.segment_index;
        let t = self.state.progress;
        let current = &self.profile.segments[seg];
        let next = self.profile.get(seg + 1).unwrap_or(current);

        // Blend the instantaneous speed for this tick.
        let mut smooth = current.avg_speed;
        if next.avg_speed > current.avg_speed {
            if t == 0.0 && self.just_entered_faster {
                // Just entered a faster segment: stay at the previous
                // segment's average for exactly this tick.
                smooth = self.profile.segments[seg - 1].avg_speed;
            } else if t > 0.0 {
                let start = if seg > 0 {
                    self.profile.segments[seg - 1].avg_speed
                } else {
                    current.avg_speed
                };
                smooth = start + (current.avg_speed - start) * t;
            }
        } else if next.avg_speed < current.avg_speed {
            // Anticipatory braking toward the slower upcoming segment.
            smooth = current.avg_speed + (next.avg_speed - current.avg_speed) * t;
        }

        self.state.current_speed = smooth;
        self.state.next_speed_target = next.avg_speed;

        let clamped = multiplier.clamp(self.config.min_multiplier, self.config.max_multiplier);
        self.state.speed_multiplier = clamped;
        let step = self.config.base_step * (smooth / self.config.reference_speed)
            * self.config.scale_factor
            * clamped;

        let mut t = t + step;
        if t > 1.0 {
            t = 0.0;
            let seg = seg + 1;
            self.just_entered_faster = false;
            self.state.segment_index = seg;
            self.state.progress = 0.0;
            if seg >= self.route.len() - 1 {
                // Reached the final waypoint: snap and freeze.
                if let Some(last) = self.route.last() {
                    self.state.position = *last;
                }
                if let Some(final_seg) = self.profile.segments.last() {
                    self.state.current_speed = final_seg.avg_speed;
                }
                self.terminal = true;
                log::debug!("simulation reached terminal segment {seg}");
                return self.state.clone();
            }
            if self.profile.segments[seg].avg_speed > self.profile.segments[seg - 1].avg_speed {
                self.just_entered_faster = true;
            }
            self.state.next_speed_target = self.profile.segments[seg + 1].avg_speed;
            log::debug!("entered segment {seg}");
        } else if self.just_entered_faster && t > 0.0 {
            self.just_entered_faster = false;
        }

        self.state.progress = t;
        let seg = self.state.segment_index;
        let a = &self.route.waypoints()[seg];
        let b = &self.route.waypoints()[seg + 1];
        self.state.position = interpolate_position(a, b, t);
        self.state.clone()
    }
}

pub type SnapshotTx = crossbeam_channel::Sender<SimulationState>;
pub type SnapshotRx = crossbeam_channel::Receiver<SimulationState>;

pub fn snapshot_channel() -> (SnapshotTx, SnapshotRx) {
    crossbeam_channel::unbounded()
}

/// Cancellable fixed-interval ticker driving a shared smoother from a
/// background thread. Snapshots go out over a channel; after the
/// terminal snapshot has been delivered once, no further sends happen.
pub struct SimClock {
    stop: Arc<AtomicBool>,
    multiplier: Arc<Mutex<f64>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SimClock {
    pub fn start(
        smoother: Arc<Mutex<SpeedSmoother>>,
        interval: Duration,
        initial_multiplier: f64,
        tx: SnapshotTx,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let multiplier = Arc::new(Mutex::new(initial_multiplier));

        let handle = {
            let stop = Arc::clone(&stop);
            let multiplier = Arc::clone(&multiplier);
            thread::spawn(move || {
                let mut terminal_delivered = false;
                while !stop.load(Ordering::Relaxed) {
                    let m = *multiplier.lock();
                    let (snapshot, terminal) = {
                        let mut smoother = smoother.lock();
                        let snapshot = smoother.advance(m);
                        (snapshot, smoother.is_terminal())
                    };
                    if !terminal_delivered {
                        if tx.send(snapshot).is_err() {
                            // Receiver went away; nothing left to drive.
                            break;
                        }
                        terminal_delivered = terminal;
                    }
                    thread::sleep(interval);
                }
            })
        };

        Self {
            stop,
            multiplier,
            handle: Some(handle),
        }
    }

    /// Takes effect at the start of the next tick. The smoother clamps
    /// the value into its configured range.
    pub fn set_multiplier(&self, m: f64) {
        *self.multiplier.lock() = m;
    }

    /// Idempotent: the second and later calls are no-ops. The smoother
    /// keeps its last computed state.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimClock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::SegmentProfile;

    fn route(n: usize) -> Arc<RouteModel> {
        let waypoints = (0..n)
            .map(|i| Waypoint {
                lat: i as f64,
                lng: i as f64 * 2.0,
            })
            .collect();
        Arc::new(RouteModel::new(waypoints))
    }

    fn profile_of(route: &RouteModel, speeds: &[f64]) -> Arc<CruiseProfile> {
        assert_eq!(route.len(), speeds.len());
        let segments = speeds
            .iter()
            .enumerate()
            .map(|(i, &avg)| SegmentProfile {
                segment_index: i,
                avg_speed: avg,
                sample_count: 1,
                lat: route.get(i).unwrap().lat,
                lng: route.get(i).unwrap().lng,
            })
            .collect();
        Arc::new(CruiseProfile { segments })
    }

    // Large steps so boundary behavior shows up within a few ticks.
    fn fast_config() -> SmootherConfig {
        SmootherConfig {
            base_step: 0.5,
            reference_speed: 50.0,
            scale_factor: 1.0,
            ..SmootherConfig::default()
        }
    }

    #[test]
    fn rejects_profile_length_mismatch() {
        let r = route(3);
        let p = profile_of(&route(2), &[50.0, 50.0]);
        assert!(matches!(
            SpeedSmoother::new(r, p, SmootherConfig::default()),
            Err(SimError::ProfileLengthMismatch { got: 2, want: 3 })
        ));
    }

    #[test]
    fn initial_state_from_profile() {
        let r = route(3);
        let p = profile_of(&r, &[45.0, 55.0, 51.0]);
        let smoother = SpeedSmoother::new(r.clone(), p, SmootherConfig::default()).unwrap();
        let s = smoother.state();
        assert_eq!(s.segment_index, 0);
        assert_eq!(s.progress, 0.0);
        assert_eq!(s.position, *r.first().unwrap());
        assert_eq!(s.current_speed, 45.0);
        assert_eq!(s.next_speed_target, 55.0);
        assert!(!smoother.is_terminal());
    }

    #[test]
    fn short_route_is_immediately_terminal() {
        let r = route(1);
        let p = profile_of(&r, &[50.0]);
        let mut smoother = SpeedSmoother::new(r.clone(), p, SmootherConfig::default()).unwrap();
        assert!(smoother.is_terminal());
        let before = smoother.state().clone();
        let after = smoother.advance(1.0);
        assert_eq!(before, after);
        assert_eq!(after.segment_index, 0);
    }

    #[test]
    fn terminal_freeze_is_idempotent() {
        let r = route(2);
        let p = profile_of(&r, &[50.0, 50.0]);
        // step = 2.0 * (50/50) * 1.0 * 1.0 = 2.0 > 1, crosses on the first tick
        let config = SmootherConfig {
            base_step: 2.0,
            scale_factor: 1.0,
            ..SmootherConfig::default()
        };
        let mut smoother = SpeedSmoother::new(r.clone(), p, config).unwrap();
        let terminal = smoother.advance(1.0);
        assert!(smoother.is_terminal());
        assert_eq!(terminal.segment_index, 1);
        assert_eq!(terminal.position, *r.last().unwrap());
        assert_eq!(terminal.current_speed, 50.0);
        for _ in 0..3 {
            assert_eq!(smoother.advance(1.0), terminal);
        }
    }

    #[test]
    fn doubling_multiplier_doubles_the_step() {
        let r = route(3);
        let p = profile_of(&r, &[50.0, 50.0, 50.0]);
        let mut a = SpeedSmoother::new(r.clone(), p.clone(), SmootherConfig::default()).unwrap();
        let mut b = SpeedSmoother::new(r, p, SmootherConfig::default()).unwrap();
        let pa = a.advance(1.0).progress;
        let pb = b.advance(2.0).progress;
        assert!(pb > pa);
        assert!((pb - 2.0 * pa).abs() < 1e-12);
    }

    #[test]
    fn multiplier_is_clamped_silently() {
        let r = route(3);
        let p = profile_of(&r, &[50.0, 50.0, 50.0]);
        let mut a = SpeedSmoother::new(r.clone(), p.clone(), SmootherConfig::default()).unwrap();
        let mut b = SpeedSmoother::new(r, p, SmootherConfig::default()).unwrap();
        let high = a.advance(100.0);
        let max = b.advance(20.0);
        assert_eq!(high.speed_multiplier, 20.0);
        assert_eq!(high.progress, max.progress);
    }

    #[test]
    fn equal_averages_keep_speed_continuous_across_boundary() {
        let r = route(3);
        let p = profile_of(&r, &[50.0, 50.0, 50.0]);
        let mut smoother = SpeedSmoother::new(r, p, fast_config()).unwrap();
        while !smoother.is_terminal() {
            let s = smoother.advance(1.0);
            assert_eq!(s.current_speed, 50.0);
        }
    }

    #[test]
    fn holds_previous_speed_for_one_tick_then_ramps() {
        let r = route(4);
        let p = profile_of(&r, &[40.0, 50.0, 60.0, 60.0]);
        // step in segment 0: 0.5 * (40/50) * 1.0 = 0.4
        let mut smoother = SpeedSmoother::new(r, p, fast_config()).unwrap();

        // Segment 0 has no previous segment, so the blend stays at 40.
        assert_eq!(smoother.advance(1.0).current_speed, 40.0); // t 0 -> 0.4
        assert_eq!(smoother.advance(1.0).current_speed, 40.0); // t 0.4 -> 0.8
        let crossing = smoother.advance(1.0); // t 0.8 -> over 1, enters segment 1
        assert_eq!(crossing.segment_index, 1);
        assert_eq!(crossing.progress, 0.0);
        assert_eq!(crossing.current_speed, 40.0);

        // First tick inside the faster segment: hold at segment 0's average.
        let hold = smoother.advance(1.0);
        assert_eq!(hold.current_speed, 40.0);
        assert!(hold.progress > 0.0);

        // Next tick ramps from 40 toward 50 using progress as the blend.
        let ramp = smoother.advance(1.0);
        let expected = 40.0 + (50.0 - 40.0) * hold.progress;
        assert!((ramp.current_speed - expected).abs() < 1e-12);
        assert!(ramp.current_speed > 40.0 && ramp.current_speed < 50.0);
    }

    #[test]
    fn brakes_ahead_of_a_slower_segment() {
        let r = route(3);
        let p = profile_of(&r, &[60.0, 40.0, 40.0]);
        let mut smoother = SpeedSmoother::new(r, p, fast_config()).unwrap();
        let first = smoother.advance(1.0);
        assert_eq!(first.current_speed, 60.0); // progress was still 0
        let second = smoother.advance(1.0);
        let expected = 60.0 + (40.0 - 60.0) * first.progress;
        assert!((second.current_speed - expected).abs() < 1e-12);
        assert!(second.current_speed < 60.0);
        assert_eq!(second.next_speed_target, 40.0);
    }

    #[test]
    fn position_interpolates_within_segment() {
        let r = route(3);
        let p = profile_of(&r, &[50.0, 50.0, 50.0]);
        let mut smoother = SpeedSmoother::new(r.clone(), p, fast_config()).unwrap();
        let s = smoother.advance(1.0); // t 0 -> 0.5
        assert_eq!(s.progress, 0.5);
        let a = r.get(0).unwrap();
        let b = r.get(1).unwrap();
        assert_eq!(s.position, interpolate_position(a, b, 0.5));
    }

    #[test]
    fn swap_profile_is_length_checked() {
        let r = route(3);
        let p = profile_of(&r, &[50.0, 50.0, 50.0]);
        let mut smoother = SpeedSmoother::new(r.clone(), p, SmootherConfig::default()).unwrap();
        assert!(smoother
            .swap_profile(profile_of(&route(2), &[10.0, 10.0]))
            .is_err());
        let newer = profile_of(&r, &[30.0, 30.0, 30.0]);
        smoother.swap_profile(newer).unwrap();
        assert_eq!(smoother.advance(1.0).current_speed, 30.0);
    }

    #[test]
    fn clock_drives_to_terminal_and_stop_is_idempotent() {
        let r = route(2);
        let p = profile_of(&r, &[50.0, 50.0]);
        let config = SmootherConfig {
            base_step: 0.5,
            scale_factor: 1.0,
            ..SmootherConfig::default()
        };
        let smoother = Arc::new(Mutex::new(SpeedSmoother::new(r.clone(), p, config).unwrap()));
        let (tx, rx) = snapshot_channel();
        let mut clock = SimClock::start(
            Arc::clone(&smoother),
            Duration::from_millis(1),
            1.0,
            tx,
        );

        let mut last = None;
        loop {
            let snap = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("clock stopped sending before terminal");
            let done = snap.segment_index == r.len() - 1;
            last = Some(snap);
            if done {
                break;
            }
        }
        let terminal = last.unwrap();
        assert_eq!(terminal.position, *r.last().unwrap());

        clock.stop();
        let frozen = smoother.lock().state().clone();
        clock.stop(); // second stop: no error, no further change
        assert_eq!(frozen, *smoother.lock().state());
        // nothing else arrives after the terminal snapshot
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn clock_multiplier_updates_apply_on_later_ticks() {
        let r = route(3);
        let p = profile_of(&r, &[50.0, 50.0, 50.0]);
        let smoother = Arc::new(Mutex::new(
            SpeedSmoother::new(r, p, SmootherConfig::default()).unwrap(),
        ));
        let (tx, rx) = snapshot_channel();
        let mut clock = SimClock::start(
            Arc::clone(&smoother),
            Duration::from_millis(1),
            1.0,
            tx,
        );
        clock.set_multiplier(4.0);
        // Eventually a tick reads the new value.
        let mut saw_update = false;
        for _ in 0..200 {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(snap) => {
                    if snap.speed_multiplier == 4.0 {
                        saw_update = true;
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        clock.stop();
        assert!(saw_update);
    }
}
