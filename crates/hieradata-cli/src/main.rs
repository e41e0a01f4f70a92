use std::process::ExitCode;

fn main() -> ExitCode {
    hieradata_cli::run()
}
