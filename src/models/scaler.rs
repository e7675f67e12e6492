use serde::{Deserialize, Serialize};

use super::Normalizer;
use crate::error::{SimError, SimResult};

/// Per-feature min-max scaling onto `feature_range`.
///
/// Values outside the fitted range extrapolate linearly. A feature whose fitted
/// range is zero is scaled as if its range were 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub feature_names: Vec<String>,
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
    #[serde(default = "unit_range")]
    pub feature_range: (f64, f64),
}

fn unit_range() -> (f64, f64) {
    (0.0, 1.0)
}

impl MinMaxScaler {
    pub fn validate(&self, expected: &[&str]) -> SimResult<()> {
        super::check_feature_names("scaler", &self.feature_names, expected)?;
        if self.data_min.len() != expected.len() || self.data_max.len() != expected.len() {
            return Err(SimError::Configuration(format!(
                "scaler: expected {} min/max values, got {}/{}",
                expected.len(),
                self.data_min.len(),
                self.data_max.len()
            )));
        }
        Ok(())
    }

    fn scale_one(&self, i: usize, x: f64) -> f64 {
        let (lo, hi) = self.feature_range;
        let mut span = self.data_max[i] - self.data_min[i];
        if span == 0.0 {
            span = 1.0;
        }
        (x - self.data_min[i]) / span * (hi - lo) + lo
    }
}

impl Normalizer for MinMaxScaler {
    fn width(&self) -> usize {
        self.data_min.len()
    }

    fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter().enumerate().map(|(i, v)| self.scale_one(i, *v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaler() -> MinMaxScaler {
        MinMaxScaler {
            feature_names: vec!["a".into(), "b".into()],
            data_min: vec![0.0, 10.0],
            data_max: vec![50.0, 10.0],
            feature_range: (0.0, 100.0),
        }
    }

    #[test]
    fn test_scales_and_extrapolates() {
        let s = scaler();
        let out = s.transform(&[25.0, 10.0]);
        assert_eq!(out, vec![50.0, 0.0]);
        let out = s.transform(&[75.0, 12.0]);
        assert_eq!(out[0], 150.0);
        assert_eq!(out[1], 200.0);
    }

    #[test]
    fn test_validate_rejects_wrong_names() {
        let s = scaler();
        assert!(s.validate(&["a", "b"]).is_ok());
        assert!(matches!(s.validate(&["b", "a"]), Err(SimError::Configuration(_))));
    }

    #[test]
    fn test_default_range_from_json() {
        let s: MinMaxScaler =
            serde_json::from_str(r#"{"feature_names":["x"],"data_min":[2.0],"data_max":[4.0]}"#).unwrap();
        assert_eq!(s.feature_range, (0.0, 1.0));
        assert_eq!(s.transform(&[3.0]), vec![0.5]);
    }
}
