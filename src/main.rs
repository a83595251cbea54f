use std::process::ExitCode;

use log::error;
use pkgrelay::{
    app::cli,
    config::Config,
    manager::job_manager::JobManager,
    package::commands::PackageCommands,
    queue::icon::icon_queue,
};

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR]: {}", e);
            return ExitCode::FAILURE;
        }
    };
    env_logger::Builder::new()
        .parse_filters(&config.log_level)
        .parse_default_env()
        .init();

    let commands = PackageCommands::from_config(&config);
    let icons = icon_queue(&config.icons);
    let manager = JobManager::new(config);
    manager.start();

    match cli::run_cli(manager, commands, icons) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
