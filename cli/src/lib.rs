pub mod cmd;
pub mod util;

use clap::Parser as _;
use marks_core::Registry;

pub use cmd::{Exit, GlobalArgs};

/// Entry point of a test program: parses the command line and runs the tests in `registry`.
pub async fn run(registry: Registry) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let app = GlobalArgs::parse();
    app.exec_subcmd(&registry).await.unwrap_or_else(|e| {
        if let Some(exit) = e.downcast_ref::<Exit>() {
            log::info!("Exiting: {}", exit);
            std::process::exit(exit.code());
        }
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    });
}
