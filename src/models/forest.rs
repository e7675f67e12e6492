//! Tree ensembles exported from the offline training job.
//!
//! Trees use the flat array layout: node `i` is a leaf when
//! `children_left[i] == -1`; otherwise `x[feature[i]] <= threshold[i]` goes
//! left.

use serde::{Deserialize, Serialize};

use super::{AnomalyVerdict, OutlierScorer, Regressor};
use crate::error::{SimError, SimResult};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    /// Leaf outputs (regressors).
    #[serde(default)]
    pub value: Vec<f64>,
    /// Training samples per node (isolation trees).
    #[serde(default)]
    pub n_node_samples: Vec<u64>,
    /// Input column for each tree-local feature index, when the tree was fit
    /// on a permuted subset.
    #[serde(default)]
    pub feature_map: Vec<usize>,
}

impl Tree {
    fn validate(&self, width: usize, what: &str) -> SimResult<()> {
        let n = self.children_left.len();
        let bad = |msg: String| Err(SimError::Configuration(format!("{}: {}", what, msg)));
        if n == 0 {
            return bad("empty tree".to_string());
        }
        if self.children_right.len() != n || self.feature.len() != n || self.threshold.len() != n {
            return bad("node arrays differ in length".to_string());
        }
        if self.feature_map.iter().any(|&c| c >= width) {
            return bad("feature_map out of range".to_string());
        }
        let local_width = if self.feature_map.is_empty() { width } else { self.feature_map.len() };
        for i in 0..n {
            let (l, r) = (self.children_left[i], self.children_right[i]);
            if l == -1 {
                continue;
            }
            if l < 0 || r < 0 || l as usize >= n || r as usize >= n {
                return bad(format!("node {} has invalid children", i));
            }
            if self.feature[i] < 0 || self.feature[i] as usize >= local_width {
                return bad(format!("node {} splits on unknown feature", i));
            }
        }
        Ok(())
    }

    /// Leaf index and its depth. Walk is bounded by the node count.
    fn leaf(&self, x: &[f64]) -> (usize, u32) {
        let mut node = 0usize;
        let mut depth = 0u32;
        for _ in 0..self.children_left.len() {
            let left = self.children_left[node];
            if left == -1 {
                break;
            }
            let mut col = self.feature[node] as usize;
            if !self.feature_map.is_empty() {
                col = self.feature_map[col];
            }
            node = if x[col] <= self.threshold[node] { left as usize } else { self.children_right[node] as usize };
            depth += 1;
        }
        (node, depth)
    }
}

/// Mean of per-tree leaf values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsembleRegressor {
    pub feature_names: Vec<String>,
    pub trees: Vec<Tree>,
}

impl TreeEnsembleRegressor {
    pub fn validate(&self, expected: &[&str]) -> SimResult<()> {
        super::check_feature_names("forecaster", &self.feature_names, expected)?;
        if self.trees.is_empty() {
            return Err(SimError::Configuration("forecaster: no trees".to_string()));
        }
        for tree in &self.trees {
            tree.validate(expected.len(), "forecaster")?;
            if tree.value.len() != tree.children_left.len() {
                return Err(SimError::Configuration("forecaster: value array length".to_string()));
            }
        }
        Ok(())
    }
}

impl Regressor for TreeEnsembleRegressor {
    fn predict(&self, x: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.value[t.leaf(x).0]).sum();
        total / self.trees.len() as f64
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: u64) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Isolation forest: short average paths mean easy-to-isolate points.
///
/// `score = -2^(-mean_path / c(max_samples)) - offset`; negative is an outlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    pub feature_names: Vec<String>,
    pub max_samples: u64,
    pub offset: f64,
    pub trees: Vec<Tree>,
}

impl IsolationForest {
    pub fn validate(&self, expected: &[&str]) -> SimResult<()> {
        super::check_feature_names("anomaly", &self.feature_names, expected)?;
        if self.trees.is_empty() || self.max_samples < 2 {
            return Err(SimError::Configuration("anomaly: needs trees and max_samples >= 2".to_string()));
        }
        for tree in &self.trees {
            tree.validate(expected.len(), "anomaly")?;
            if tree.n_node_samples.len() != tree.children_left.len() {
                return Err(SimError::Configuration("anomaly: n_node_samples length".to_string()));
            }
        }
        Ok(())
    }

    pub fn mean_path_length(&self, x: &[f64]) -> f64 {
        let total: f64 = self
            .trees
            .iter()
            .map(|t| {
                let (leaf, depth) = t.leaf(x);
                depth as f64 + average_path_length(t.n_node_samples[leaf])
            })
            .sum();
        total / self.trees.len() as f64
    }
}

impl OutlierScorer for IsolationForest {
    fn score(&self, x: &[f64]) -> AnomalyVerdict {
        let norm = average_path_length(self.max_samples);
        let raw = -(2f64).powf(-self.mean_path_length(x) / norm);
        let score = raw - self.offset;
        AnomalyVerdict { is_outlier: score < 0.0, score }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump(feature: i64, threshold: f64, left: f64, right: f64) -> Tree {
        Tree {
            children_left: vec![1, -1, -1],
            children_right: vec![2, -1, -1],
            feature: vec![feature, -2, -2],
            threshold: vec![threshold, -2.0, -2.0],
            value: vec![0.0, left, right],
            n_node_samples: vec![256, 250, 6],
            feature_map: Vec::new(),
        }
    }

    #[test]
    fn test_ensemble_averages_leaves() {
        let reg = TreeEnsembleRegressor {
            feature_names: vec!["a".into(), "b".into()],
            trees: vec![stump(0, 0.5, 10.0, 20.0), stump(1, 0.5, 30.0, 40.0)],
        };
        reg.validate(&["a", "b"]).unwrap();
        assert_eq!(reg.predict(&[0.2, 0.9]), 25.0);
        // boundary goes left
        assert_eq!(reg.predict(&[0.5, 0.5]), 20.0);
    }

    #[test]
    fn test_feature_map_redirects_columns() {
        let mut t = stump(0, 0.5, 1.0, 2.0);
        t.feature_map = vec![1, 0];
        let reg = TreeEnsembleRegressor { feature_names: vec!["a".into(), "b".into()], trees: vec![t] };
        reg.validate(&["a", "b"]).unwrap();
        assert_eq!(reg.predict(&[0.0, 0.9]), 2.0);
    }

    #[test]
    fn test_validate_catches_bad_children() {
        let mut t = stump(0, 0.5, 1.0, 2.0);
        t.children_right[0] = 9;
        let reg = TreeEnsembleRegressor { feature_names: vec!["a".into()], trees: vec![t] };
        assert!(reg.validate(&["a"]).is_err());
    }

    #[test]
    fn test_average_path_length_values() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.2448).abs() < 1e-3, "{}", c256);
    }

    #[test]
    fn test_isolation_short_path_is_outlier() {
        let forest = IsolationForest {
            feature_names: vec!["a".into()],
            max_samples: 256,
            offset: -0.5,
            trees: vec![stump(0, 100.0, 0.0, 0.0)],
        };
        forest.validate(&["a"]).unwrap();
        // right leaf: depth 1 + c(6) ~ 3.1, far below c(256)
        let out = forest.score(&[500.0]);
        assert!(out.is_outlier);
        // left leaf: depth 1 + c(250) ~ 11.2
        let inlier = forest.score(&[1.0]);
        assert!(!inlier.is_outlier);
        assert!(inlier.score > out.score);
    }
}
