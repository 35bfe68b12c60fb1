//! docforge CLI — build a PDF from a source document through the project's
//! extraction, enhancement and compilation steps.

mod commands;

use color_eyre::eyre::Result;

/// Conventional exit status after SIGINT.
const INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = commands::parse_args();
    commands::init_tracing(&cli);

    tokio::select! {
        result = commands::run(cli) => result,
        () = commands::shutdown_signal() => {
            // the run future is dropped by now: temp dir released, step killed
            tracing::warn!("interrupted");
            std::process::exit(INTERRUPTED);
        }
    }
}
