use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::features::FeatureVector;
use crate::models::MemberPrediction;
use crate::tree::RegressionTree;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("an ensemble needs at least one member")]
    Empty,
    #[error("failed to read model artifact {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write model artifact {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model artifact {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("model {model} failed: {reason}")]
    Prediction { model: String, reason: String },
}

/// A fitted regression function. Members are read-only after loading, so
/// `predict` takes `&self`.
pub trait Regressor {
    fn name(&self) -> &str;
    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError>;
}

/// Trees fit on bootstrap samples; predicts their mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaggedTrees {
    pub name: String,
    pub trees: Vec<RegressionTree>,
}

impl Regressor for BaggedTrees {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        if self.trees.is_empty() {
            return Err(self.failure("no trees"));
        }
        let sum: f64 = self.trees.iter().map(|tree| tree.predict(features)).sum();
        finite_output(&self.name, sum / self.trees.len() as f64)
    }
}

impl BaggedTrees {
    fn failure(&self, reason: &str) -> ModelError {
        ModelError::Prediction {
            model: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Stagewise additive trees: `base + learning_rate * sum(tree outputs)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostedTrees {
    pub name: String,
    pub base: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
}

impl Regressor for BoostedTrees {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        let boost: f64 = self.trees.iter().map(|tree| tree.predict(features)).sum();
        finite_output(&self.name, self.base + self.learning_rate * boost)
    }
}

fn finite_output(model: &str, value: f64) -> Result<f64, ModelError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ModelError::Prediction {
            model: model.to_string(),
            reason: format!("non-finite output {value}"),
        })
    }
}

/// On-disk form of one ensemble member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    BaggedTrees(BaggedTrees),
    BoostedTrees(BoostedTrees),
}

impl ModelArtifact {
    pub fn name(&self) -> &str {
        match self {
            ModelArtifact::BaggedTrees(model) => &model.name,
            ModelArtifact::BoostedTrees(model) => &model.name,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.name())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name().trim().is_empty() {
            return Err("member has an empty name".to_string());
        }
        let trees = match self {
            ModelArtifact::BaggedTrees(model) => {
                if model.trees.is_empty() {
                    return Err("bagged member has no trees".to_string());
                }
                &model.trees
            }
            ModelArtifact::BoostedTrees(model) => {
                if !model.base.is_finite() {
                    return Err("boosted member has a non-finite base".to_string());
                }
                if !model.learning_rate.is_finite() || model.learning_rate <= 0.0 {
                    return Err(format!("invalid learning rate {}", model.learning_rate));
                }
                &model.trees
            }
        };
        for (index, tree) in trees.iter().enumerate() {
            tree.validate().map_err(|reason| format!("tree {index}: {reason}"))?;
        }
        Ok(())
    }

    pub fn into_regressor(self) -> Box<dyn Regressor> {
        match self {
            ModelArtifact::BaggedTrees(model) => Box::new(model),
            ModelArtifact::BoostedTrees(model) => Box::new(model),
        }
    }

    pub fn tree_count(&self) -> usize {
        match self {
            ModelArtifact::BaggedTrees(model) => model.trees.len(),
            ModelArtifact::BoostedTrees(model) => model.trees.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub members: Vec<String>,
}

/// Unweighted average of interchangeable members. A failure in any member
/// fails the whole prediction.
pub struct Ensemble {
    members: Vec<Box<dyn Regressor>>,
}

impl std::fmt::Debug for Ensemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ensemble")
            .field("members", &self.member_names())
            .finish()
    }
}

impl Ensemble {
    pub fn new(members: Vec<Box<dyn Regressor>>) -> Result<Self, ModelError> {
        if members.is_empty() {
            return Err(ModelError::Empty);
        }
        Ok(Self { members })
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|member| member.name()).collect()
    }

    pub fn predict_members(
        &self,
        features: &FeatureVector,
    ) -> Result<Vec<MemberPrediction>, ModelError> {
        self.members
            .iter()
            .map(|member| {
                let value = member.predict(features)?;
                if !value.is_finite() {
                    return Err(ModelError::Prediction {
                        model: member.name().to_string(),
                        reason: format!("non-finite output {value}"),
                    });
                }
                Ok(MemberPrediction {
                    model: member.name().to_string(),
                    value,
                })
            })
            .collect()
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        let members = self.predict_members(features)?;
        Ok(average(&members))
    }

    /// Reads `manifest.json` from `dir` and every member it lists. Any
    /// missing or invalid member aborts the load.
    pub fn load(dir: &Path) -> Result<Self, ModelError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest: Manifest = read_json(&manifest_path)?;
        if manifest.members.is_empty() {
            return Err(ModelError::Empty);
        }

        let mut members = Vec::with_capacity(manifest.members.len());
        for file in &manifest.members {
            if !is_plain_file_name(file) {
                return Err(ModelError::Corrupt {
                    path: manifest_path.clone(),
                    reason: format!("member entry {file:?} is not a file name inside the model directory"),
                });
            }
            let path = dir.join(file);
            let artifact: ModelArtifact = read_json(&path)?;
            artifact
                .validate()
                .map_err(|reason| ModelError::Corrupt {
                    path: path.clone(),
                    reason,
                })?;
            debug!(
                member = artifact.name(),
                trees = artifact.tree_count(),
                "loaded ensemble member"
            );
            members.push(artifact.into_regressor());
        }

        let ensemble = Self::new(members)?;
        info!(
            count = ensemble.member_count(),
            members = ?ensemble.member_names(),
            dir = %dir.display(),
            "ensemble ready"
        );
        Ok(ensemble)
    }
}

fn is_plain_file_name(entry: &str) -> bool {
    Path::new(entry)
        .file_name()
        .map_or(false, |name| name == entry)
}

pub fn average(members: &[MemberPrediction]) -> f64 {
    members.iter().map(|member| member.value).sum::<f64>() / members.len() as f64
}

/// Writes one JSON file per artifact plus the manifest naming them.
pub fn save_artifacts(dir: &Path, artifacts: &[ModelArtifact]) -> Result<(), ModelError> {
    if artifacts.is_empty() {
        return Err(ModelError::Empty);
    }
    std::fs::create_dir_all(dir).map_err(|source| ModelError::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    for artifact in artifacts {
        artifact.validate().map_err(|reason| ModelError::Corrupt {
            path: dir.join(artifact.file_name()),
            reason,
        })?;
    }

    let mut files = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let file = artifact.file_name();
        write_json(&dir.join(&file), artifact)?;
        files.push(file);
    }
    write_json(&dir.join(MANIFEST_FILE), &Manifest { members: files })?;
    info!(dir = %dir.display(), members = artifacts.len(), "saved model artifacts");
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|err| ModelError::Corrupt {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ModelError> {
    let json = serde_json::to_string_pretty(value).map_err(|err| ModelError::Write {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
    })?;
    std::fs::write(path, json).map_err(|source| ModelError::Write {
        path: path.to_path_buf(),
        source,
    })
}
