use clap::Parser;

use camstage::cli::{self, Args, Command};
use camstage::config::Config;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match args.command {
        Command::Driver { synthetic } => cli::run_driver(&config, synthetic),
        Command::Overlay {
            preset,
            tokens,
            clear,
        } => {
            if clear {
                cli::clear_overlay(&config)
            } else {
                cli::update_overlay(&config, preset, tokens)
            }
        }
        Command::Start => cli::request_streaming(&config, true),
        Command::Stop => cli::request_streaming(&config, false),
        Command::SelectDevice { id } => cli::select_device(&config, &id),
        Command::ListDevices => cli::list_devices(),
        Command::Status => cli::show_status(&config),
        Command::Config { action } => cli::handle_config_action(&config, action),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
