//! Daemon startup configuration (§1 ambient-stack addition). The C
//! original took its bind address, port, and initial plug-in list from a
//! config file read once at startup; this is the same information,
//! expressed as `clap` flags the way the rest of this corpus takes its CLI
//! arguments.

use std::net::{IpAddr, Ipv4Addr};

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "slotd", about = "Peripheral slot command daemon")]
pub struct Config {
    /// Address to bind the command listener to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))]
    pub bind: IpAddr,

    /// Port to bind the command listener to.
    #[arg(long, default_value_t = 8870)]
    pub port: u16,

    /// Verb prefix commands must carry, e.g. `SLOT.` for `SLOT.LIST`.
    /// Empty by default.
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Plug-in to load into a slot at startup; repeatable, loaded in the
    /// order given, lowest-numbered empty slot first.
    #[arg(long = "load", value_name = "PLUGIN")]
    pub load: Vec<String>,

    /// Maximum simultaneous client sessions.
    #[arg(long, default_value_t = crate::session::DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,

    /// Maximum simultaneous plug-in slots.
    #[arg(long, default_value_t = crate::slot::DEFAULT_MAX_SLOTS)]
    pub max_slots: usize,
}

impl Config {
    pub fn parse_args() -> Self {
        Config::parse()
    }
}
