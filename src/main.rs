//! plugbrowser — the UI process.
//!
//! Opens the profile, hands the URIs to a running instance if there is one,
//! and otherwise serves tabs until the last one is closed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use plugbrowser::app::{App, AppOptions};
use plugbrowser::services::process_supervisor::RendererLauncher;

/// plugbrowser - a multi-process web browser shell
#[derive(Parser)]
#[command(name = "plugbrowser")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Profile to use (a directory under the config dir)
    #[arg(short, long, default_value = "default")]
    profile: String,

    /// Log level: 0 errors only, 3 debug
    #[arg(short, long, default_value_t = 1)]
    verbose: u8,

    /// Renderer executable (default: plugbrowser-renderer next to this binary)
    #[arg(long, value_name = "PATH")]
    renderer: Option<PathBuf>,

    /// URIs to open
    #[arg(default_value = "about:blank")]
    uris: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    plugbrowser::init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Can't start the event loop: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let options = AppOptions {
        profile: cli.profile,
        verbosity: cli.verbose,
        renderer_program: cli.renderer.unwrap_or_else(RendererLauncher::sibling_program),
    };
    let result = runtime.block_on(async move {
        let app = App::new(options)?;
        app.run(cli.uris).await
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("plugbrowser: {}", e);
            ExitCode::FAILURE
        }
    }
}
