//! ODK Aggregate submission CLI
//!
//! Usage:
//!   odk-pusher -s https://aggregate.example.org/ODKAggregate -u alice -p secret \
//!       post -x intake.xml -v info/name Alice -v info/age 30
//!   odk-pusher -s http://localhost:8080 post -x intake.xml -c patients.csv

use std::process::ExitCode;

fn main() -> ExitCode {
    match odk_pusher::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");

            // Print chain of errors
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("  Caused by: {cause}");
                source = std::error::Error::source(cause);
            }

            ExitCode::FAILURE
        }
    }
}
