use std::process::ExitCode;

fn main() -> ExitCode {
    grid_cli::run()
}
