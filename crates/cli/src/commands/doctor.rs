use reliant_core::config::{AppConfig, LoadOptions};
use reliant_core::errors::ArtifactError;
use reliant_core::pricing::model::{ArtifactModelLoader, ModelInputStyle, ModelLoader};
use reliant_core::pricing::{ArtifactPaths, BucketStats, SimilarityIndex};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: format!(
                    "configuration loaded and validated; blend weights {}",
                    config.pricing.blend_weights()
                ),
            });
            let paths = ArtifactPaths::resolve(&config.pricing);
            checks.push(check_bucket_stats(&paths));
            checks.push(check_similarity_index(&paths));
            checks.push(check_model(&paths));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["bucket_stats", "similarity_index", "model"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_fail { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_fail {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: pricing engine is ready".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

// Bucket statistics are the only artifact the blend cannot do without.
fn check_bucket_stats(paths: &ArtifactPaths) -> DoctorCheck {
    match BucketStats::load(&paths.bucket_stats) {
        Ok(stats) => DoctorCheck {
            name: "bucket_stats",
            status: CheckStatus::Pass,
            details: format!(
                "{} bucket(s), global_mean={:.2} from `{}`",
                stats.buckets.len(),
                stats.global_mean,
                paths.bucket_stats.display()
            ),
        },
        Err(error) => artifact_problem("bucket_stats", CheckStatus::Fail, &error),
    }
}

fn check_similarity_index(paths: &ArtifactPaths) -> DoctorCheck {
    match SimilarityIndex::load(&paths.similarity_index) {
        Ok(index) => DoctorCheck {
            name: "similarity_index",
            status: CheckStatus::Pass,
            details: format!(
                "{} bucket(s), k={} from `{}`",
                index.buckets.len(),
                index.k,
                paths.similarity_index.display()
            ),
        },
        Err(error) => artifact_problem("similarity_index", CheckStatus::Warn, &error),
    }
}

fn check_model(paths: &ArtifactPaths) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "model",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    match runtime.block_on(ArtifactModelLoader.load(&paths.model)) {
        Ok(session) => {
            let style = ModelInputStyle::from_input_count(session.inputs().len());
            let status = if style == ModelInputStyle::Unavailable {
                CheckStatus::Warn
            } else {
                CheckStatus::Pass
            };
            DoctorCheck {
                name: "model",
                status,
                details: format!(
                    "{} input(s) ({style:?}) from `{}`",
                    session.inputs().len(),
                    paths.model.display()
                ),
            }
        }
        Err(error) => artifact_problem("model", CheckStatus::Warn, &error),
    }
}

fn artifact_problem(name: &'static str, status: CheckStatus, error: &ArtifactError) -> DoctorCheck {
    DoctorCheck { name, status, details: format!("{}: {error}", error.reason_code()) }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
