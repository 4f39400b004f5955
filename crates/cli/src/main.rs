use std::process::ExitCode;

fn main() -> ExitCode {
    reliant_cli::run()
}
