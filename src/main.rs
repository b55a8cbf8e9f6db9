use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match loopcheck::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::from(loopcheck::errors::get_exit_code(&e))
        }
    }
}
