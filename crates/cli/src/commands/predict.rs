use std::path::Path;

use reliant_core::pricing::features::ResidualFeatures;
use reliant_core::pricing::{PricingRuntime, ResidualBreakdown};
use reliant_core::PricingRequest;
use serde::Serialize;

use crate::commands::{block_on, load_config, read_json_input, CommandResult};

#[derive(Debug, Serialize)]
struct PredictReport {
    features: ResidualFeatures,
    breakdown: ResidualBreakdown,
}

pub fn run(request_path: &Path) -> CommandResult {
    let config = match load_config("predict") {
        Ok(config) => config,
        Err(result) => return result,
    };

    let request: PricingRequest = match read_json_input(request_path) {
        Ok(request) => request,
        Err(error) => {
            return CommandResult::failure("predict", "request_input", format!("{error:#}"), 3);
        }
    };

    let runtime = PricingRuntime::from_config(&config.pricing);
    let features = ResidualFeatures::from_request(&request);
    let breakdown = match block_on("predict", runtime.explain_residual(&features)) {
        Ok(breakdown) => breakdown,
        Err(result) => return result,
    };

    CommandResult::report("predict", &PredictReport { features, breakdown })
}
