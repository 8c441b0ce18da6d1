//! Per-image goniometer angles
//!
//! The detector reports each rotation axis as a `<axis>_start` and an
//! `<axis>_increment`. At the end of a series these are expanded into one angle
//! per observed frame id, so dropped frames do not shift angles against images.

/// Rotation axes expanded at end of series
pub const GONIOMETER_AXES: [&str; 5] = ["chi", "kappa", "omega", "phi", "two_theta"];

/// Angle series derived for one axis
#[derive(Debug, Clone, PartialEq)]
pub struct AxisSeries {
    pub axis: String,
    pub start: f64,
    pub increment: f64,
    /// One angle per observed frame id, `[start]` if no frames arrived
    pub values: Vec<f64>,
}

impl AxisSeries {
    /// Last angle of the series
    pub fn end(&self) -> f64 {
        self.values.last().copied().unwrap_or(self.start)
    }

    /// Difference between last and first angle
    pub fn range_total(&self) -> f64 {
        match (self.values.first(), self.values.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Angular step per image
    pub fn range_average(&self) -> f64 {
        self.increment
    }

    /// Derived `(key, value)` pairs in write order
    pub fn derived_entries(&self) -> Vec<(String, f64)> {
        vec![
            (axis_key(&self.axis, "_end"), self.end()),
            (axis_key(&self.axis, "_range_total"), self.range_total()),
            (axis_key(&self.axis, "_range_average"), self.range_average()),
        ]
    }
}

/// `start + frame_id * increment` for every observed frame id
pub fn derive_axis(axis: &str, start: f64, increment: f64, frame_ids: &[u64]) -> AxisSeries {
    let values = if frame_ids.is_empty() {
        vec![start]
    } else {
        frame_ids
            .iter()
            .map(|&id| start + id as f64 * increment)
            .collect()
    };
    AxisSeries {
        axis: axis.to_string(),
        start,
        increment,
        values,
    }
}

/// Parameter key for an axis and suffix, e.g. `omega` + `_start`
pub fn axis_key(axis: &str, suffix: &str) -> String {
    format!("{}{}", axis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omega_series() {
        let omega = derive_axis("omega", 10.0, 0.5, &[0, 1, 2]);
        assert_eq!(omega.values, vec![10.0, 10.5, 11.0]);
        assert_eq!(omega.end(), 11.0);
        assert_eq!(omega.range_total(), 1.0);
        assert_eq!(omega.range_average(), 0.5);
    }

    #[test]
    fn test_follows_observed_ids() {
        let phi = derive_axis("phi", 0.0, 1.0, &[1, 2, 5]);
        assert_eq!(phi.values, vec![1.0, 2.0, 5.0]);
        assert_eq!(phi.range_total(), 4.0);
    }

    #[test]
    fn test_no_frames() {
        let chi = derive_axis("chi", 3.0, 0.1, &[]);
        assert_eq!(chi.values, vec![3.0]);
        assert_eq!(chi.end(), 3.0);
        assert_eq!(chi.range_total(), 0.0);
    }

    #[test]
    fn test_derived_keys() {
        let keys: Vec<String> = derive_axis("two_theta", 0.0, 0.0, &[1])
            .derived_entries()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            ["two_theta_end", "two_theta_range_total", "two_theta_range_average"]
        );
    }
}
