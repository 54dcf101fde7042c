use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use uuid::Uuid;

use model::*;

/// Telemetry CSV import. This is the validation boundary: rows with a
/// non-finite lat/lng/speed are dropped here with a warning, so the
/// aggregator downstream can assume finite inputs.
pub fn import_telemetry_csv(path: &Path) -> Result<Vec<TelemetryPoint>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut points = Vec::new();
    let mut rejected = 0usize;
    for rec in rdr.deserialize() {
        let r: CsvRow = rec?;
        let point = TelemetryPoint {
            vehicle_id: r.vehicle_id,
            timestamp: r.timestamp,
            lat: r.lat,
            lng: r.lng,
            speed: r.speed,
        };
        if point.is_finite() {
            points.push(point);
        } else {
            rejected += 1;
        }
    }
    if rejected > 0 {
        log::warn!("dropped {rejected} telemetry rows with non-finite values");
    }
    Ok(points)
}

pub fn export_telemetry_csv(points: &[TelemetryPoint], path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path)?;
    for p in points {
        w.serialize(CsvRow {
            vehicle_id: p.vehicle_id.clone(),
            timestamp: p.timestamp,
            lat: p.lat,
            lng: p.lng,
            speed: p.speed,
        })?;
    }
    w.flush()?;
    Ok(())
}

/// The "segment logs" document the UI offers for download: the derived
/// profile plus the recorded per-tick snapshot history of one run.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RunLog {
    pub id: Uuid,
    pub profile: CruiseProfile,
    pub segment_average_speeds: Vec<f64>,
    pub snapshots: Vec<SimulationState>,
}

impl RunLog {
    pub fn new(profile: CruiseProfile, snapshots: Vec<SimulationState>) -> Self {
        Self {
            id: Uuid::new_v4(),
            segment_average_speeds: profile.avg_speeds(),
            profile,
            snapshots,
        }
    }
}

pub fn export_run_log(log: &RunLog, path: &Path) -> Result<()> {
    let f = File::create(path)?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer_pretty(&mut w, log)?;
    w.flush()?;
    Ok(())
}

pub fn import_run_log(path: &Path) -> Result<RunLog> {
    let f = File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(f))?)
}

pub fn export_snapshots_ndjson(snapshots: &[SimulationState], path: &Path) -> Result<()> {
    let f = File::create(path)?;
    let mut w = BufWriter::new(f);
    for s in snapshots {
        let line = serde_json::to_string(s)?;
        writeln!(w, "{}", line)?;
    }
    w.flush()?;
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct CsvRow {
    vehicle_id: String,
    timestamp: f64,
    lat: f64,
    lng: f64,
    speed: f64,
}
