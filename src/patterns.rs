use std::collections::BTreeMap;

use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::activity::round_to;
use crate::classify::Thresholds;
use crate::config::{AnalyticsConfig, ClusteringConfig};
use crate::models::Sample;

const MAX_ITERATIONS: u64 = 300;
const TOLERANCE: f64 = 1e-4;

#[derive(Debug, Error, PartialEq)]
pub enum PatternError {
    #[error("at least 3 clusters are needed to derive two thresholds, got {0}")]
    TooFewClusters(usize),

    #[error("{values} values cannot be split into {clusters} clusters")]
    NotEnoughValues { values: usize, clusters: usize },

    #[error("{distinct} distinct values cannot be split into {clusters} clusters")]
    NotEnoughDistinct { distinct: usize, clusters: usize },

    #[error("acceleration values must be finite")]
    NonFinite,

    #[error("k-means failed: {0}")]
    Clustering(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPatterns {
    pub cluster_centers: Vec<f64>,
    pub cluster_distribution: BTreeMap<usize, usize>,
    pub silhouette_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternReport {
    pub patterns: Option<DetectedPatterns>,
    pub suggested: Thresholds,
}

impl PatternReport {
    fn unchanged(current: Thresholds) -> Self {
        Self {
            patterns: None,
            suggested: current,
        }
    }
}

/// Never fails: short input or a clustering error keeps the configured
/// thresholds as the suggestion.
pub fn detect_patterns(samples: &[Sample], config: &AnalyticsConfig) -> PatternReport {
    let minimum = config.clustering.min_samples;
    if samples.is_empty() || samples.len() < minimum {
        info!(
            samples = samples.len(),
            minimum, "insufficient data for clustering, keeping thresholds"
        );
        return PatternReport::unchanged(config.thresholds);
    }

    let values: Vec<f64> = samples.iter().map(|s| s.acceleration_val).collect();
    match suggest_thresholds(&values, &config.clustering) {
        Ok((patterns, suggested)) => {
            info!(
                centers = ?patterns.cluster_centers,
                fidget = suggested.fidget,
                active = suggested.active,
                "detected activity clusters"
            );
            PatternReport {
                patterns: Some(patterns),
                suggested,
            }
        }
        Err(err) => {
            warn!(error = %err, "clustering failed, keeping thresholds");
            PatternReport::unchanged(config.thresholds)
        }
    }
}

pub fn suggest_thresholds(
    values: &[f64],
    clustering: &ClusteringConfig,
) -> Result<(DetectedPatterns, Thresholds), PatternError> {
    if clustering.clusters < 3 {
        return Err(PatternError::TooFewClusters(clustering.clusters));
    }

    let fit = KMeans1d::new(clustering).fit(values)?;
    let centers = &fit.centers;

    let suggested = Thresholds {
        fidget: round_to((centers[0] + centers[1]) / 2.0, 4),
        active: round_to((centers[1] + centers[2]) / 2.0, 4),
    };

    let mut distribution = BTreeMap::new();
    for label in &fit.labels {
        *distribution.entry(*label).or_insert(0) += 1;
    }

    Ok((
        DetectedPatterns {
            cluster_centers: fit.centers.clone(),
            cluster_distribution: distribution,
            silhouette_score: None,
        },
        suggested,
    ))
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    /// Ascending; `labels` index into this order.
    pub centers: Vec<f64>,
    pub labels: Vec<usize>,
    pub inertia: f64,
}

#[derive(Debug, Clone)]
pub struct KMeans1d {
    clusters: usize,
    seed: u64,
    n_init: usize,
}

impl KMeans1d {
    pub fn new(config: &ClusteringConfig) -> Self {
        Self {
            clusters: config.clusters,
            seed: config.random_state,
            n_init: config.n_init.max(1),
        }
    }

    pub fn fit(&self, values: &[f64]) -> Result<KMeansFit, PatternError> {
        if self.clusters == 0 || values.len() < self.clusters {
            return Err(PatternError::NotEnoughValues {
                values: values.len(),
                clusters: self.clusters,
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PatternError::NonFinite);
        }
        let distinct = distinct_count(values);
        if distinct < self.clusters {
            return Err(PatternError::NotEnoughDistinct {
                distinct,
                clusters: self.clusters,
            });
        }

        let observations = Array2::from_shape_vec((values.len(), 1), values.to_vec())
            .map_err(|err| PatternError::Clustering(err.to_string()))?;
        let dataset = DatasetBase::from(observations.clone());

        let model = KMeans::params_with_rng(self.clusters, StdRng::seed_from_u64(self.seed))
            .n_runs(self.n_init)
            .max_n_iterations(MAX_ITERATIONS)
            .tolerance(TOLERANCE)
            .fit(&dataset)
            .map_err(|err| PatternError::Clustering(err.to_string()))?;

        let labels: Array1<usize> = model.predict(&observations);
        let centers = model.centroids().column(0).to_vec();
        let inertia: f64 = labels
            .iter()
            .zip(values)
            .map(|(label, value)| (value - centers[*label]).powi(2))
            .sum();
        debug!(inertia, "k-means fit finished");

        Ok(sort_clusters(KMeansFit {
            centers,
            labels: labels.to_vec(),
            inertia,
        }))
    }
}

fn distinct_count(values: &[f64]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.len()
}

fn sort_clusters(fit: KMeansFit) -> KMeansFit {
    let mut order: Vec<usize> = (0..fit.centers.len()).collect();
    order.sort_by(|a, b| fit.centers[*a].total_cmp(&fit.centers[*b]));

    let mut rank = vec![0usize; order.len()];
    for (new_idx, old_idx) in order.iter().enumerate() {
        rank[*old_idx] = new_idx;
    }

    KMeansFit {
        centers: order.iter().map(|idx| fit.centers[*idx]).collect(),
        labels: fit.labels.iter().map(|label| rank[*label]).collect(),
        inertia: fit.inertia,
    }
}
