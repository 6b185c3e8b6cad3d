//! §4.7/§6's CLI client surface: one binary, five personalities
//! (`<prefix>get`, `<prefix>set`, `<prefix>cat`, `<prefix>list`,
//! `<prefix>loadso`), selected by how it was invoked — the same multicall
//! trick BusyBox-style tools and several crates in this corpus' CLI layer
//! use (`clap`'s own `Command::multicall` documentation example is exactly
//! this: one binary, symlinked under several names, dispatching on
//! `argv[0]`).
//!
//! Connects to the daemon, writes one command line, then streams the
//! response to stdout until the prompt byte (`\`) is seen or the peer
//! closes — a `CAT`-like invocation never sees a prompt and is expected to
//! run until the user interrupts it (§4.7).

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
const DEFAULT_PORT: u16 = 8870;
const PROMPT_BYTE: u8 = b'\\';

/// The five wire verbs this binary can speak, in the form its invocation
/// name carries them (lower-case suffix on `argv[0]`).
const VERB_SUFFIXES: [(&str, &str); 5] = [
    ("loadso", "LOADSO"),
    ("list", "LIST"),
    ("get", "GET"),
    ("set", "SET"),
    ("cat", "CAT"),
];

/// Shared flags every one of the five personalities accepts (§6).
#[derive(Debug, Parser)]
#[command(name = "slotd-cli", about = "TCP command-line client for slotd")]
struct Cli {
    /// Daemon address to connect to.
    #[arg(short = 'a', long = "addr", default_value_t = DEFAULT_ADDR)]
    addr: IpAddr,

    /// Daemon command port.
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// The command's operands, forwarded to the daemon space-joined
    /// (`GET hellodemo text` becomes operands `["hellodemo", "text"]`).
    operands: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let argv0 = std::env::args().next().unwrap_or_default();
    let (prefix, verb) = verb_from_invocation(&argv0)
        .with_context(|| format!("'{argv0}' does not end in get/set/cat/list/loadso; invoke this binary under one of those names"))?;

    let cli = Cli::parse_from(std::env::args());
    let wire_verb = format!("{prefix}{verb}");
    let mut line = wire_verb;
    if !cli.operands.is_empty() {
        line.push(' ');
        line.push_str(&cli.operands.join(" "));
    }
    line.push('\n');

    let mut stream = TcpStream::connect((cli.addr, cli.port))
        .with_context(|| format!("failed to connect to {}:{}", cli.addr, cli.port))?;
    stream.write_all(line.as_bytes()).context("failed to send command")?;

    stream_until_prompt(&mut stream)
}

/// Splits an invocation name into its configured prefix and recognized
/// verb suffix, matching case-insensitively since filesystem names are
/// conventionally lower-case while the wire verb is always upper-case
/// (§4.4: "VERB ∈ {LIST, GET, SET, CAT, LOADSO}").
fn verb_from_invocation(argv0: &str) -> Option<(String, &'static str)> {
    let basename = argv0.rsplit(['/', '\\']).next().unwrap_or(argv0);
    let lower = basename.to_ascii_lowercase();
    for (suffix, verb) in VERB_SUFFIXES {
        if let Some(prefix) = lower.strip_suffix(suffix) {
            return Some((prefix.to_string(), verb));
        }
    }
    None
}

/// Copies bytes from `stream` to stdout until the prompt byte is seen
/// (consumed, not printed) or the peer closes without ever sending one —
/// which is simply `CAT`'s normal behavior, not an error (§4.7).
fn stream_until_prompt(stream: &mut TcpStream) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).context("failed to read from daemon")?;
        if n == 0 {
            return Ok(());
        }
        if let Some(prompt_at) = buf[..n].iter().position(|&b| b == PROMPT_BYTE) {
            stdout.write_all(&buf[..prompt_at]).ok();
            stdout.flush().ok();
            return Ok(());
        }
        stdout.write_all(&buf[..n]).ok();
        stdout.flush().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_bare_verb_names() {
        assert_eq!(verb_from_invocation("get"), Some(("".into(), "GET")));
        assert_eq!(verb_from_invocation("loadso"), Some(("".into(), "LOADSO")));
    }

    #[test]
    fn recognizes_prefixed_verb_names() {
        assert_eq!(verb_from_invocation("edget"), Some(("ed".into(), "GET")));
        assert_eq!(verb_from_invocation("dpcat"), Some(("dp".into(), "CAT")));
    }

    #[test]
    fn strips_a_leading_path() {
        assert_eq!(verb_from_invocation("/usr/local/bin/edlist"), Some(("ed".into(), "LIST")));
    }

    #[test]
    fn rejects_unrecognized_invocation_names() {
        assert_eq!(verb_from_invocation("slotd-cli"), None);
    }

    #[test]
    fn loadso_is_not_shadowed_by_the_shorter_set_suffix() {
        // "loadso" must win over any accidental partial match before "set"/"get".
        assert_eq!(verb_from_invocation("loadso"), Some(("".into(), "LOADSO")));
    }
}
