use std::path::Path;

use reliant_core::pricing::builder::load_observations;
use reliant_core::pricing::metrics::evaluate;
use reliant_core::pricing::PricingRuntime;

use crate::commands::{block_on, load_config, CommandResult};

pub fn run(observations_path: &Path) -> CommandResult {
    let config = match load_config("evaluate") {
        Ok(config) => config,
        Err(result) => return result,
    };

    let observations = match load_observations(observations_path) {
        Ok(observations) if observations.is_empty() => {
            return CommandResult::failure(
                "evaluate",
                "observations_input",
                "no historical observations were supplied",
                3,
            );
        }
        Ok(observations) => observations,
        Err(error) => {
            return CommandResult::failure("evaluate", "observations_input", error.to_string(), 3);
        }
    };

    let runtime = PricingRuntime::from_config(&config.pricing);
    match block_on("evaluate", evaluate(&runtime, &observations)) {
        Ok(report) => CommandResult::report("evaluate", &report),
        Err(result) => result,
    }
}
