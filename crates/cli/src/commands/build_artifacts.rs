use std::path::Path;

use reliant_core::pricing::builder::{load_observations, write_artifacts, BuildError};

use crate::commands::CommandResult;

pub fn run(observations_path: &Path, out_dir: &Path) -> CommandResult {
    let observations = match load_observations(observations_path) {
        Ok(observations) => observations,
        Err(error) => {
            return CommandResult::failure(
                "build-artifacts",
                "observations_input",
                error.to_string(),
                3,
            );
        }
    };

    match write_artifacts(&observations, out_dir) {
        Ok(summary) => CommandResult::success(
            "build-artifacts",
            format!(
                "built {} bucket(s) and {} similarity point(s) from {} observation(s); \
                 global_mean={:.2}; model alpha={} cv_mae={}; wrote {}, {} and {}",
                summary.buckets,
                summary.similarity_points,
                summary.observations,
                summary.global_mean,
                summary.model_alpha,
                summary.model_cv_mae.map_or_else(|| "n/a".to_string(), |mae| format!("{mae:.2}")),
                summary.bucket_stats_path.display(),
                summary.similarity_index_path.display(),
                summary.model_path.display(),
            ),
        ),
        Err(error @ BuildError::NoObservations) => {
            CommandResult::failure("build-artifacts", "observations_input", error.to_string(), 3)
        }
        Err(error @ BuildError::ModelFit { .. }) => {
            CommandResult::failure("build-artifacts", "model_fit", error.to_string(), 5)
        }
        Err(error) => {
            CommandResult::failure("build-artifacts", "artifact_write", error.to_string(), 5)
        }
    }
}
