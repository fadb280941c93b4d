// ─────────────────────────────────────────────────────────────────────
// Mesh Tuner Kernel — Vibration Feature Record
// ─────────────────────────────────────────────────────────────────────
//! Fixed-schema vibration feature vector.
//!
//! The rig reports features as parallel `names[]` / `values[]` arrays.
//! They are validated exactly once, at the protocol boundary, into a
//! [`FeatureVector`]; the optimizer never sees raw maps.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{TuneError, TuneResult};

/// Accelerometer axis channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn suffix(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

/// Wire metric names, in `AxisFeatures` field order.
pub const METRIC_NAMES: [&str; 8] = [
    "Time_rms",
    "Time_crestfactor",
    "Time_skewness",
    "Time_kurtosis",
    "Powerspectrum_rms",
    "Powerspectrum_skewness",
    "Powerspectrum_kurtosis",
    "Powerspectrum_crestfactor",
];

/// Wire key for a metric on an axis, e.g. `Time_rms_x`.
pub fn feature_key(metric: &str, axis: Axis) -> String {
    format!("{metric}_{}", axis.suffix())
}

/// Eight scalar metrics of one axis channel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisFeatures {
    pub time_rms: f64,
    pub time_crest_factor: f64,
    pub time_skewness: f64,
    pub time_kurtosis: f64,
    pub spectrum_rms: f64,
    pub spectrum_skewness: f64,
    pub spectrum_kurtosis: f64,
    pub spectrum_crest_factor: f64,
}

impl AxisFeatures {
    fn to_array(self) -> [f64; 8] {
        [
            self.time_rms,
            self.time_crest_factor,
            self.time_skewness,
            self.time_kurtosis,
            self.spectrum_rms,
            self.spectrum_skewness,
            self.spectrum_kurtosis,
            self.spectrum_crest_factor,
        ]
    }

    fn from_array(v: [f64; 8]) -> Self {
        Self {
            time_rms: v[0],
            time_crest_factor: v[1],
            time_skewness: v[2],
            time_kurtosis: v[3],
            spectrum_rms: v[4],
            spectrum_skewness: v[5],
            spectrum_kurtosis: v[6],
            spectrum_crest_factor: v[7],
        }
    }

    /// Same value for every metric; handy for fixtures.
    pub fn uniform(value: f64) -> Self {
        Self::from_array([value; 8])
    }
}

/// Validated feature vector. The x channel is mandatory; y and z
/// contribute to the max-over-axes reductions only when present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub x: AxisFeatures,
    pub y: Option<AxisFeatures>,
    pub z: Option<AxisFeatures>,
}

impl FeatureVector {
    pub fn from_x(x: AxisFeatures) -> Self {
        Self { x, y: None, z: None }
    }

    pub fn axis(&self, axis: Axis) -> Option<&AxisFeatures> {
        match axis {
            Axis::X => Some(&self.x),
            Axis::Y => self.y.as_ref(),
            Axis::Z => self.z.as_ref(),
        }
    }

    /// Populated axis channels, x first.
    pub fn channels(&self) -> impl Iterator<Item = &AxisFeatures> {
        std::iter::once(&self.x).chain(self.y.iter()).chain(self.z.iter())
    }

    /// Maximum of one metric over the populated channels.
    ///
    /// Propagates NaN so that callers can apply their non-finite policy.
    pub fn max_over_axes(&self, metric: impl Fn(&AxisFeatures) -> f64) -> f64 {
        let mut out = f64::NEG_INFINITY;
        for ch in self.channels() {
            let v = metric(ch);
            if v.is_nan() {
                return f64::NAN;
            }
            out = out.max(v);
        }
        out
    }

    /// Build from the wire representation: parallel name and value arrays.
    ///
    /// Errors with `MalformedResult` when the arrays differ in length,
    /// when any x-channel key is missing, or when an optional channel is
    /// only partially present.
    pub fn from_named(names: &[String], values: &[f64]) -> TuneResult<Self> {
        if names.len() != values.len() {
            return Err(TuneError::MalformedResult(format!(
                "{} feature names but {} values",
                names.len(),
                values.len()
            )));
        }
        let map: HashMap<&str, f64> = names
            .iter()
            .map(String::as_str)
            .zip(values.iter().copied())
            .collect();

        let read_axis = |axis: Axis| -> (Vec<String>, [f64; 8]) {
            let mut missing = Vec::new();
            let mut out = [0.0; 8];
            for (slot, metric) in out.iter_mut().zip(METRIC_NAMES) {
                let key = feature_key(metric, axis);
                match map.get(key.as_str()) {
                    Some(v) => *slot = *v,
                    None => missing.push(key),
                }
            }
            (missing, out)
        };

        let (missing, x) = read_axis(Axis::X);
        if !missing.is_empty() {
            return Err(TuneError::MalformedResult(format!(
                "missing required keys: {}",
                missing.join(", ")
            )));
        }

        let mut optional = [None, None];
        for (slot, axis) in optional.iter_mut().zip([Axis::Y, Axis::Z]) {
            let (missing, values) = read_axis(axis);
            match missing.len() {
                0 => *slot = Some(AxisFeatures::from_array(values)),
                n if n == METRIC_NAMES.len() => {}
                _ => {
                    return Err(TuneError::MalformedResult(format!(
                        "axis {} partially reported, missing: {}",
                        axis.suffix(),
                        missing.join(", ")
                    )))
                }
            }
        }

        Ok(Self {
            x: AxisFeatures::from_array(x),
            y: optional[0],
            z: optional[1],
        })
    }

    /// Flatten back to wire keys (used for before/after snapshots).
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for axis in Axis::ALL {
            if let Some(ch) = self.axis(axis) {
                for (metric, v) in METRIC_NAMES.iter().zip(ch.to_array()) {
                    out.insert(feature_key(metric, axis), v);
                }
            }
        }
        out
    }

    /// Wire form: parallel name and value arrays.
    pub fn to_named(&self) -> (Vec<String>, Vec<f64>) {
        self.to_map().into_iter().unzip()
    }

    /// Element-wise median over repeated measurements of one point.
    ///
    /// An optional channel survives only if every repeat reports it.
    pub fn median(batch: &[FeatureVector]) -> TuneResult<Self> {
        let first = batch
            .first()
            .ok_or_else(|| TuneError::Validation("median of empty batch".to_string()))?;
        if batch.len() == 1 {
            return Ok(*first);
        }
        let reduce = |pick: &dyn Fn(&FeatureVector) -> Option<AxisFeatures>| {
            let rows: Option<Vec<[f64; 8]>> =
                batch.iter().map(|f| pick(f).map(AxisFeatures::to_array)).collect();
            rows.map(|rows| {
                let mut out = [0.0; 8];
                for (k, slot) in out.iter_mut().enumerate() {
                    let mut col: Vec<f64> = rows.iter().map(|r| r[k]).collect();
                    *slot = median_of(&mut col);
                }
                AxisFeatures::from_array(out)
            })
        };
        let x = reduce(&|f| Some(f.x)).unwrap_or(first.x);
        Ok(Self {
            x,
            y: reduce(&|f| f.y),
            z: reduce(&|f| f.z),
        })
    }
}

/// Median with the mean-of-middle-pair convention for even counts.
fn median_of(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x_names() -> Vec<String> {
        METRIC_NAMES.iter().map(|m| feature_key(m, Axis::X)).collect()
    }

    #[test]
    fn test_from_named_x_only() {
        let names = x_names();
        let values: Vec<f64> = (1..=8).map(f64::from).collect();
        let fv = FeatureVector::from_named(&names, &values).unwrap();
        assert_eq!(fv.x.time_rms, 1.0);
        assert_eq!(fv.x.time_crest_factor, 2.0);
        assert_eq!(fv.x.spectrum_crest_factor, 8.0);
        assert!(fv.y.is_none());
        assert!(fv.z.is_none());
    }

    #[test]
    fn test_from_named_length_mismatch() {
        let names = x_names();
        let err = FeatureVector::from_named(&names, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, TuneError::MalformedResult(_)));
    }

    #[test]
    fn test_from_named_missing_required_key() {
        let mut names = x_names();
        names.pop();
        let values = vec![1.0; names.len()];
        let err = FeatureVector::from_named(&names, &values).unwrap_err();
        assert!(err.to_string().contains("Powerspectrum_crestfactor_x"));
    }

    #[test]
    fn test_from_named_partial_optional_axis() {
        let mut names = x_names();
        names.push("Time_rms_y".to_string());
        let values = vec![1.0; names.len()];
        assert!(FeatureVector::from_named(&names, &values).is_err());
    }

    #[test]
    fn test_from_named_ignores_extra_keys_and_reads_z() {
        let mut names = x_names();
        names.extend(METRIC_NAMES.iter().map(|m| feature_key(m, Axis::Z)));
        names.push("Temperature".to_string());
        let mut values = vec![1.0; 8];
        values.extend(vec![3.0; 8]);
        values.push(42.0);
        let fv = FeatureVector::from_named(&names, &values).unwrap();
        assert_eq!(fv.z.unwrap().time_rms, 3.0);
        assert_eq!(fv.max_over_axes(|a| a.time_rms), 3.0);
    }

    #[test]
    fn test_named_roundtrip_preserves_axes() {
        let fv = FeatureVector {
            x: AxisFeatures::uniform(1.0),
            y: Some(AxisFeatures::uniform(2.0)),
            z: None,
        };
        let (names, values) = fv.to_named();
        assert_eq!(names.len(), 16);
        assert_eq!(FeatureVector::from_named(&names, &values).unwrap(), fv);
    }

    #[test]
    fn test_max_over_axes_propagates_nan() {
        let mut y = AxisFeatures::uniform(1.0);
        y.time_rms = f64::NAN;
        let fv = FeatureVector {
            x: AxisFeatures::uniform(1.0),
            y: Some(y),
            z: None,
        };
        assert!(fv.max_over_axes(|a| a.time_rms).is_nan());
    }

    #[test]
    fn test_median_odd_and_even() {
        let batch: Vec<FeatureVector> = [1.0, 9.0, 3.0]
            .iter()
            .map(|&v| FeatureVector::from_x(AxisFeatures::uniform(v)))
            .collect();
        assert_eq!(FeatureVector::median(&batch).unwrap().x.time_rms, 3.0);
        let m = FeatureVector::median(&batch[..2]).unwrap();
        assert_eq!(m.x.spectrum_rms, 5.0);
    }

    #[test]
    fn test_median_drops_inconsistent_optional_axis() {
        let a = FeatureVector {
            x: AxisFeatures::uniform(1.0),
            y: Some(AxisFeatures::uniform(1.0)),
            z: None,
        };
        let b = FeatureVector::from_x(AxisFeatures::uniform(2.0));
        let m = FeatureVector::median(&[a, b]).unwrap();
        assert!(m.y.is_none());
        assert_eq!(m.x.time_rms, 1.5);
    }

    #[test]
    fn test_median_empty_batch() {
        assert!(FeatureVector::median(&[]).is_err());
    }
}
