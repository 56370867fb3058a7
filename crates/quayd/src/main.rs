use std::process::ExitCode;

use quay_config::Config;

fn main() -> ExitCode {
    let config = Config::from_args();
    match quayd::run_daemon(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Telemetry may not be installed when bootstrap fails early,
            // so report fatal errors on stderr directly.
            eprintln!("quayd: {error}");
            ExitCode::FAILURE
        }
    }
}
