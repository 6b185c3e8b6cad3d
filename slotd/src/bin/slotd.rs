//! The `slotd` daemon binary: parses startup flags, binds the command
//! port, loads any plug-ins named with `--load`, and enters the reactor
//! loop. §7 kind 4 (reactor-fatal errors) is the one place this binary
//! maps a library error to a documented non-zero process exit rather than
//! unwinding past `main`.

use std::process::ExitCode;

use anyhow::Context;
use slotd::{Config, Host};

/// §7: FD table overflow and unrecoverable poll failures exit non-zero
/// after logging; everything else that can fail during startup (a bad
/// `--bind` address, a port already in use) is reported through `anyhow`
/// with its usual chained context.
const EXIT_REACTOR_FATAL: u8 = 2;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse_args();
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::from(EXIT_REACTOR_FATAL)
        }
    }
}

fn run(config: Config) -> anyhow::Result<()> {
    let mut host = Host::bind(&config).with_context(|| {
        format!("failed to bind slotd command listener on {}:{}", config.bind, config.port)
    })?;
    host.run().context("reactor loop exited with a fatal error")?;
    Ok(())
}
