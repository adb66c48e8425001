use ampsense_monitor::sensors::AVERAGE_TO_RMS;

/// Household load factor over the day, in 0..=1.
///
/// Overnight base load with a morning ramp and a taller evening peak,
/// both modelled as gaussian bumps.
pub fn daily_load_factor(day_fraction: f64) -> f64 {
    const NIGHT_BASE: f64 = 0.12;
    const MORNING_CENTER: f64 = 0.31;
    const MORNING_WIDTH: f64 = 0.045;
    const MORNING_SCALE: f64 = 0.55;
    const EVENING_CENTER: f64 = 0.79;
    const EVENING_WIDTH: f64 = 0.07;

    let factor = NIGHT_BASE
        + gaussian(day_fraction, MORNING_CENTER, MORNING_WIDTH) * MORNING_SCALE
        + gaussian(day_fraction, EVENING_CENTER, EVENING_WIDTH);

    factor.min(1.0)
}

fn gaussian(x: f64, center: f64, width: f64) -> f64 {
    let deviation = (x - center) / width;
    (-0.5 * deviation * deviation).exp()
}

/// Raw sample a device must report so the monitor, after RMS conversion
/// and calibration, reads the given amps.
pub fn raw_for_amps(amps: f64, numerator: i32, denominator: i32) -> i32 {
    let scale = f64::from(AVERAGE_TO_RMS) * f64::from(numerator) / f64::from(denominator);
    if scale == 0.0 {
        return 0;
    }

    (amps / scale).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_factor_stays_in_range() {
        for step in 0..=100 {
            let factor = daily_load_factor(step as f64 / 100.0);
            assert!((0.0..=1.0).contains(&factor), "factor {factor} at {step}");
        }
    }

    #[test]
    fn test_evening_peaks_above_night() {
        assert!(daily_load_factor(0.79) > daily_load_factor(0.05));
    }

    #[test]
    fn test_raw_round_trips_through_calibration() {
        let raw = raw_for_amps(10.0, 100, 1000);
        let amps = f64::from(raw) * f64::from(AVERAGE_TO_RMS) * 100.0 / 1000.0;
        assert!((amps - 10.0).abs() < 0.05, "got {amps}");
    }
}
