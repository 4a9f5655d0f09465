//! Deadline scaling.
//!
//! Matches are tuned on a reference machine. On another host the per-turn deadline is
//! multiplied by `measured / reference`, where both numbers are run times of the same
//! calibration program.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

#[derive(Deserialize)]
struct Measurement {
    seconds: f64,
}

#[derive(Serialize, Deserialize)]
struct Reference {
    ref_seconds: f64,
}

/// Where the calibration program and its reference value live.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationConfig {
    /// Program printing `{"seconds": <f64>}` on stdout.
    pub command: Vec<String>,
    /// JSON file holding `{"ref_seconds": <f64>}`.
    pub reference_file: PathBuf,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".into(), "tools/calibrate.py".into()],
            reference_file: PathBuf::from("tools/reference_calibrate.json"),
        }
    }
}

impl CalibrationConfig {
    /// Runs the calibration program and returns `measured / reference`.
    ///
    /// Without a usable reference file the measurement becomes the new reference and the
    /// scale is 1.
    #[instrument(skip(self), fields(command = ?self.command))]
    pub fn measure_scale(&self) -> anyhow::Result<f64> {
        let measured = self.run_calibrator()?;

        let Some(reference) = read_reference(&self.reference_file) else {
            write_reference(&self.reference_file, measured)?;
            info!(
                measured,
                "wrote new calibration reference to {}",
                self.reference_file.display()
            );
            return Ok(1.0);
        };

        let scale = measured / reference;
        info!(measured, reference, scale, "calibrated");
        Ok(scale)
    }

    fn run_calibrator(&self) -> anyhow::Result<f64> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("no calibration command configured");
        };
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to run calibrator '{program}'"))?;
        if !output.status.success() {
            bail!("calibrator exited with {}", output.status);
        }
        let measurement: Measurement = serde_json::from_slice(&output.stdout)
            .context("failed to parse calibrator output")?;
        if !(measurement.seconds > 0.0) {
            bail!("calibrator reported {} seconds", measurement.seconds);
        }
        Ok(measurement.seconds)
    }
}

fn read_reference(path: &Path) -> Option<f64> {
    let data = std::fs::read(path).ok()?;
    let reference: Reference = serde_json::from_slice(&data).ok()?;
    (reference.ref_seconds > 0.0).then_some(reference.ref_seconds)
}

fn write_reference(path: &Path, seconds: f64) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(&Reference {
        ref_seconds: seconds,
    })?;
    std::fs::write(path, data)
        .with_context(|| format!("failed to write reference calibrate file {}", path.display()))
}

/// Deadline multiplier for a match.
///
/// A positive `override_scale` wins. Otherwise `calibrate` is called once; on failure, or
/// on a non-positive result, the deadline is left unscaled.
pub fn resolve_timeout_scale<F>(override_scale: Option<f64>, calibrate: F) -> f64
where
    F: FnOnce() -> anyhow::Result<f64>,
{
    if let Some(scale) = override_scale.filter(|s| *s > 0.0) {
        return scale;
    }
    match calibrate() {
        Ok(scale) if scale > 0.0 => scale,
        Ok(scale) => {
            warn!("calibration returned scale {scale}, using 1.0");
            1.0
        }
        Err(e) => {
            warn!("calibration failed, using unscaled deadline: {e:#}");
            1.0
        }
    }
}
