//! Deterministic experiment-group assignment.
//!
//! A user's group is a pure function of (user_id, experiment_id, config):
//! hash into one of 10,000 buckets, normalize to [0,1), and walk the
//! experiment's groups in configuration order accumulating weights. No
//! assignment table is persisted; configuration is read-only after process
//! startup.

use crate::error::{AppError, Result};
use crate::models::ModelKind;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use tracing::{debug, info, warn};

const BUCKET_GRANULARITY: u64 = 10_000;
const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// The experiment every recommendation request consults to pick its
/// serving strategy.
pub const SERVING_EXPERIMENT_ID: &str = "model_comparison";

#[derive(Debug, Clone)]
pub struct ExperimentGroup {
    pub name: String,
    pub weight: f64,
    /// Strategy-specific parameters (e.g. `model`, blend weights).
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ExperimentGroup {
    pub fn new(name: &str, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            weight,
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Configuration order decides cumulative-weight walking order.
    pub groups: Vec<ExperimentGroup>,
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    fn is_active_on(&self, today: NaiveDate) -> bool {
        if today < self.start_date {
            return false;
        }
        match self.end_date {
            Some(end) => today <= end,
            None => true,
        }
    }
}

/// A derived group assignment; recomputed on every lookup, never stored.
#[derive(Debug, Clone)]
pub struct GroupAssignment {
    pub group_name: String,
    pub experiment_id: String,
    pub experiment_name: String,
    pub weight: f64,
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ExperimentInfo {
    pub experiment_id: String,
    pub name: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub groups: Vec<String>,
    pub is_active: bool,
}

#[derive(Deserialize)]
struct RawExperiment {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
    groups: serde_json::Map<String, serde_json::Value>,
}

#[derive(Default)]
pub struct ExperimentManager {
    experiments: HashMap<String, Experiment>,
}

impl ExperimentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the default model-comparison experiment used when no config
    /// file is provided: collaborative control vs. hybrid treatment, 50/50.
    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        let seeded = manager.create_experiment(
            SERVING_EXPERIMENT_ID,
            "Hybrid vs Collaborative Filtering",
            "Compare hybrid model performance against pure collaborative filtering",
            NaiveDate::from_ymd_opt(2024, 1, 1),
            None,
            vec![
                ExperimentGroup::new("control", 0.5).with_param(
                    "model",
                    serde_json::Value::String(ModelKind::Collaborative.as_str().to_string()),
                ),
                ExperimentGroup::new("treatment", 0.5).with_param(
                    "model",
                    serde_json::Value::String(ModelKind::Hybrid.as_str().to_string()),
                ),
            ],
        );
        if let Err(e) = seeded {
            warn!("Failed to seed default experiment: {}", e);
        }
        manager
    }

    /// Load experiment definitions from a JSON config file:
    ///
    /// ```json
    /// {
    ///   "experiment_1": {
    ///     "name": "...", "description": "...",
    ///     "start_date": "2024-01-01", "end_date": null,
    ///     "groups": {
    ///       "control":   {"model": "collaborative", "weight": 0.5},
    ///       "treatment": {"model": "hybrid", "weight": 0.5}
    ///     }
    ///   }
    /// }
    /// ```
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let parsed: HashMap<String, RawExperiment> = serde_json::from_str(&raw)
            .map_err(|e| AppError::Configuration(format!("invalid experiment config: {}", e)))?;

        let mut manager = Self::new();
        for (experiment_id, raw_experiment) in parsed {
            let groups = Self::parse_groups(&experiment_id, raw_experiment.groups)?;
            let start_date = raw_experiment
                .start_date
                .as_deref()
                .map(|s| Self::parse_date(&experiment_id, s))
                .transpose()?;
            let end_date = raw_experiment
                .end_date
                .as_deref()
                .map(|s| Self::parse_date(&experiment_id, s))
                .transpose()?;

            manager.create_experiment(
                &experiment_id,
                &raw_experiment.name,
                &raw_experiment.description,
                start_date,
                end_date,
                groups,
            )?;
        }

        info!(
            experiments = manager.experiments.len(),
            "Experiment config loaded"
        );
        Ok(manager)
    }

    fn parse_groups(
        experiment_id: &str,
        raw_groups: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<ExperimentGroup>> {
        let mut groups = Vec::with_capacity(raw_groups.len());
        for (name, value) in raw_groups {
            let mut params = match value {
                serde_json::Value::Object(map) => map,
                _ => {
                    return Err(AppError::Configuration(format!(
                        "experiment {}: group {} is not an object",
                        experiment_id, name
                    )))
                }
            };
            let weight = params
                .remove("weight")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| {
                    AppError::Configuration(format!(
                        "experiment {}: group {} is missing a numeric weight",
                        experiment_id, name
                    ))
                })?;
            groups.push(ExperimentGroup {
                name,
                weight,
                params,
            });
        }
        Ok(groups)
    }

    fn parse_date(experiment_id: &str, raw: &str) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
            AppError::Configuration(format!(
                "experiment {}: invalid date {}: {}",
                experiment_id, raw, e
            ))
        })
    }

    /// Register an experiment. Group weights must sum to 1.0 within
    /// tolerance; this is validated here only, never on lookup.
    pub fn create_experiment(
        &mut self,
        experiment_id: &str,
        name: &str,
        description: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        groups: Vec<ExperimentGroup>,
    ) -> Result<()> {
        if groups.is_empty() {
            return Err(AppError::Configuration(format!(
                "experiment {} has no groups",
                experiment_id
            )));
        }

        let total_weight: f64 = groups.iter().map(|g| g.weight).sum();
        if (total_weight - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(AppError::Configuration(format!(
                "group weights must sum to 1.0, got {:.4}",
                total_weight
            )));
        }

        let experiment = Experiment {
            id: experiment_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            start_date: start_date.unwrap_or_else(|| Utc::now().date_naive()),
            end_date,
            groups,
            created_at: Utc::now(),
        };

        info!(
            experiment_id,
            groups = experiment.groups.len(),
            "Experiment registered"
        );
        self.experiments.insert(experiment_id.to_string(), experiment);
        Ok(())
    }

    fn bucket(user_id: i64, experiment_id: &str) -> f64 {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        experiment_id.hash(&mut hasher);
        (hasher.finish() % BUCKET_GRANULARITY) as f64 / BUCKET_GRANULARITY as f64
    }

    /// Assign a user to a group. `None` when the experiment is unknown or
    /// outside its activation window (evaluated at call time).
    pub fn get_group(&self, user_id: i64, experiment_id: &str) -> Option<String> {
        let experiment = match self.experiments.get(experiment_id) {
            Some(experiment) => experiment,
            None => {
                warn!("Experiment {} not found", experiment_id);
                return None;
            }
        };

        if !experiment.is_active_on(Utc::now().date_naive()) {
            debug!("Experiment {} is not active", experiment_id);
            return None;
        }

        let bucket = Self::bucket(user_id, experiment_id);
        let mut cumulative = 0.0;
        for group in &experiment.groups {
            cumulative += group.weight;
            if bucket <= cumulative {
                return Some(group.name.clone());
            }
        }

        // Unreachable while weights sum to ~1.0; fall back to the first
        // configured group.
        experiment.groups.first().map(|g| g.name.clone())
    }

    /// Full configuration of the user's assigned group.
    pub fn get_group_config(&self, user_id: i64, experiment_id: &str) -> Option<GroupAssignment> {
        let group_name = self.get_group(user_id, experiment_id)?;
        let experiment = self.experiments.get(experiment_id)?;
        let group = experiment.groups.iter().find(|g| g.name == group_name)?;

        Some(GroupAssignment {
            group_name,
            experiment_id: experiment.id.clone(),
            experiment_name: experiment.name.clone(),
            weight: group.weight,
            params: group.params.clone(),
        })
    }

    pub fn active_experiments(&self) -> Vec<String> {
        let today = Utc::now().date_naive();
        self.experiments
            .values()
            .filter(|experiment| experiment.is_active_on(today))
            .map(|experiment| experiment.id.clone())
            .collect()
    }

    pub fn experiment_info(&self, experiment_id: &str) -> Option<ExperimentInfo> {
        let experiment = self.experiments.get(experiment_id)?;
        Some(ExperimentInfo {
            experiment_id: experiment.id.clone(),
            name: experiment.name.clone(),
            description: experiment.description.clone(),
            start_date: experiment.start_date,
            end_date: experiment.end_date,
            groups: experiment.groups.iter().map(|g| g.name.clone()).collect(),
            is_active: experiment.is_active_on(Utc::now().date_naive()),
        })
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}
