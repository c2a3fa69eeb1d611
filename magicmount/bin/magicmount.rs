use std::process::ExitCode;

use clap::Parser;
use magicmount::{
    cli::{AnsiStyles, MagicMountArgs},
    log,
    mount::MagicMount,
};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

fn main() -> ExitCode {
    let args = MagicMountArgs::parse();
    let (config, layers, destination) = args.into_parts();

    // Held until exit so the file writer flushes.
    let _guard = match log::init_logging(config.get_log_target()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}: {}", "warning".error(), e);
            None
        }
    };

    tracing::debug!(
        "option: recursive={} name=[{}] full_merge={}",
        config.get_recursive(),
        config.get_name(),
        config.get_full_merge()
    );

    match MagicMount::new(config, layers, destination.clone()).mount() {
        Ok(summary) => {
            tracing::info!(
                "mounted {} ({} nodes, {} closed) by {}",
                summary.get_destination().display(),
                summary.get_nodes(),
                summary.get_ignored(),
                summary.get_method()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!(
                "{}: unable to mount {}: {}",
                "error".error(),
                destination.display().to_string().literal(),
                e.reason()
            );
            ExitCode::FAILURE
        }
    }
}
