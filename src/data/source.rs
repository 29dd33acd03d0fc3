//! Sensor sampling collaborator.

/// Produces calibrated sensor readings on demand.
///
/// Sampling and calibration happen outside this crate; the publisher only
/// needs the resulting value.
pub trait MeasurementSource {
    /// Sample the sensor and return the calibrated value.
    fn sample_calibrated_value(&mut self) -> f64;
}

impl<F> MeasurementSource for F
where
    F: FnMut() -> f64,
{
    fn sample_calibrated_value(&mut self) -> f64 {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_source() {
        let mut readings = vec![410.0, 412.5].into_iter();
        let mut source = move || readings.next().unwrap_or(0.0);

        assert_eq!(source.sample_calibrated_value(), 410.0);
        assert_eq!(source.sample_calibrated_value(), 412.5);
        assert_eq!(source.sample_calibrated_value(), 0.0);
    }
}
