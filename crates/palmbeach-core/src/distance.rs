//! Signal strength to distance estimation.
//!
//! Signal strength here is the calibrated value recovered from the
//! advertisement tail (`256 - raw_byte`), so a *smaller* value means a
//! stronger signal and a closer beacon. The curve is an empirical fit and is
//! kept numerically identical to the deployed scanners so that logged
//! distances stay comparable across versions.

use thiserror::Error;

/// Reference power used when the caller has no calibration of its own.
pub const DEFAULT_REFERENCE_POWER: u16 = 65;

/// Errors that can occur while estimating a distance.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DistanceError {
    /// A zero signal strength carries no range information.
    #[error("Cannot estimate range from a zero signal strength")]
    InvalidSignal,

    /// A zero reference power would divide by zero.
    #[error("Reference power must be greater than zero")]
    InvalidReferencePower,
}

/// Estimates the distance to a beacon, in metres.
///
/// # Errors
///
/// Returns [`DistanceError::InvalidSignal`] when `signal_strength` is zero and
/// [`DistanceError::InvalidReferencePower`] when `reference_power` is zero.
pub fn estimate(signal_strength: u16, reference_power: u16) -> Result<f64, DistanceError> {
    if signal_strength == 0 {
        return Err(DistanceError::InvalidSignal);
    }
    if reference_power == 0 {
        return Err(DistanceError::InvalidReferencePower);
    }

    Ok(fitted_distance(
        f64::from(signal_strength) / f64::from(reference_power),
    ))
}

/// Estimates a distance for a smoothed (averaged) signal strength.
///
/// # Errors
///
/// Same conditions as [`estimate`]; a mean below `0.5` counts as zero.
pub fn estimate_mean(mean_signal: f64, reference_power: u16) -> Result<f64, DistanceError> {
    if mean_signal < 0.5 {
        return Err(DistanceError::InvalidSignal);
    }
    if reference_power == 0 {
        return Err(DistanceError::InvalidReferencePower);
    }

    Ok(fitted_distance(mean_signal / f64::from(reference_power)))
}

fn fitted_distance(ratio: f64) -> f64 {
    if ratio < 1.0 {
        return ratio.powi(10);
    }
    0.89976f64.mul_add(ratio.powf(7.7095), 0.111)
}
