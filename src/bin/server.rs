use argh::FromArgs;
use std::{path::PathBuf, sync::Arc};
use strata::{config::Config, default_zenoh_prefix, nodes::server};
use zenoh::prelude::ZFuture;

#[derive(FromArgs)]
/// strata server node
struct Args {
    /// path to the YAML configuration file
    #[argh(positional)]
    config_file: PathBuf,
}

fn main() -> eyre::Result<()> {
    if let Err(err) = set_up_logger() {
        eprintln!(
            "{:?}",
            eyre::Error::new(err).wrap_err("failed to set up logger")
        );
    }

    let args: Args = argh::from_env();
    let config = Config::load(&args.config_file)?;

    let zenoh = zenoh::open(zenoh::config::Config::default())
        .wait()
        .map_err(|e| eyre::eyre!(e))?;
    let zenoh_prefix = default_zenoh_prefix();

    server::run(&config, Arc::new(zenoh), zenoh_prefix.to_owned())
}

fn set_up_logger() -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .chain(fern::log_file("server.log")?)
        .apply()?;
    Ok(())
}
