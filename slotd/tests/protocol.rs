//! Drives a real [`Host`] over loopback TCP, one test process acting as
//! both the daemon (via repeated `run_once` calls) and its own client. No
//! separate daemon process or thread is involved — everything here runs
//! the same reactor iteration by iteration a production `run()` loop would,
//! just paced by the test instead of blocking forever.

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::time::Duration;

use slotd::{Config, Host};

fn test_config() -> Config {
    Config {
        bind: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        port: 0,
        prefix: String::new(),
        load: Vec::new(),
        max_sessions: 8,
        max_slots: 4,
    }
}

/// Alternates `Host::run_once` with short, non-blocking-ish reads on
/// `client` until `condition` is satisfied against everything read so far,
/// or gives up after a generous number of iterations.
fn drive_until(host: &mut Host, client: &mut TcpStream, buf: &mut Vec<u8>, condition: impl Fn(&[u8]) -> bool) {
    client.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    for _ in 0..200 {
        if condition(buf) {
            return;
        }
        host.run_once().expect("reactor iteration failed");
        let mut chunk = [0u8; 1024];
        match client.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(err) => panic!("client read failed: {err}"),
        }
    }
    assert!(condition(buf), "condition never satisfied; got {:?}", String::from_utf8_lossy(buf));
}

fn connect(host: &Host) -> TcpStream {
    TcpStream::connect(host.local_addr()).expect("connect to test daemon")
}

fn has_prompt(buf: &[u8]) -> bool {
    buf.contains(&b'\\')
}

#[test]
fn loadso_then_get_round_trips_default_text() {
    let mut host = Host::bind(&test_config()).unwrap();
    let mut client = connect(&host);

    client.write_all(b"LOADSO hellodemo\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    assert_eq!(buf, b"\\");

    buf.clear();
    client.write_all(b"GET 0 text\n").unwrap();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    assert_eq!(buf, b"hello\n\\");
}

#[test]
fn set_then_get_reflects_the_new_value() {
    let mut host = Host::bind(&test_config()).unwrap();
    host.load_plugin("hellodemo").unwrap();
    let mut client = connect(&host);

    client.write_all(b"SET 0 text \"good evening\"\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    assert_eq!(buf, b"\\");

    buf.clear();
    client.write_all(b"GET 0 text\n").unwrap();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    assert_eq!(buf, b"good evening\n\\");
}

#[test]
fn get_on_an_empty_slot_reports_bad_slot_index() {
    let mut host = Host::bind(&test_config()).unwrap();
    let mut client = connect(&host);

    client.write_all(b"GET 0 text\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    let line = String::from_utf8(buf).unwrap();
    assert!(line.starts_with("ERROR 003"), "unexpected error line: {line:?}");
    // §4.4: every error is followed by the prompt, so a client blocked in
    // stream_until_prompt is released — not just handed a trailing newline.
    assert!(line.ends_with('\\'), "error response is missing its prompt byte: {line:?}");
}

#[test]
fn set_on_a_read_only_resource_reports_not_writable() {
    let mut host = Host::bind(&test_config()).unwrap();
    host.load_plugin("padiron").unwrap();
    let mut client = connect(&host);

    client.write_all(b"SET 0 buttons 1\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    let line = String::from_utf8(buf).unwrap();
    assert!(line.starts_with("ERROR 007"), "unexpected error line: {line:?}");
    assert!(line.ends_with('\\'), "error response is missing its prompt byte: {line:?}");
}

#[test]
fn cat_on_a_non_broadcastable_resource_is_rejected() {
    let mut host = Host::bind(&test_config()).unwrap();
    host.load_plugin("hellodemo").unwrap();
    let mut client = connect(&host);

    client.write_all(b"CAT 0 text\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    let line = String::from_utf8(buf).unwrap();
    assert!(line.starts_with("ERROR 009"), "unexpected error line: {line:?}");
    assert!(line.ends_with('\\'), "error response is missing its prompt byte: {line:?}");
}

#[test]
fn cat_streams_broadcasts_until_the_client_disconnects() {
    let mut host = Host::bind(&test_config()).unwrap();
    host.load_plugin("hellodemo").unwrap();
    let mut client = connect(&host);

    // Shrink the period so the test doesn't wait a full second for the
    // first broadcast.
    client.write_all(b"SET 0 period 5\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);

    buf.clear();
    client.write_all(b"CAT 0 message\n").unwrap();
    drive_until(&mut host, &mut client, &mut buf, |b| b.contains(&b'\n'));
    assert_eq!(buf, b"hello\n");

    // CAT never prompts: the lone byte delivered is the broadcast body's
    // newline, not a trailing prompt.
    assert!(!buf.contains(&b'\\'));
}

#[test]
fn list_reports_every_loaded_slot_and_its_resource_tags() {
    let mut host = Host::bind(&test_config()).unwrap();
    host.load_plugin("hellodemo").unwrap();
    host.load_plugin("ircdemo").unwrap();
    let mut client = connect(&host);

    client.write_all(b"LIST\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    let text = String::from_utf8(buf).unwrap();
    assert!(text.contains("0 hellodemo"));
    assert!(text.contains("1 ircdemo"));
    assert!(text.contains("message B"));
    assert!(text.ends_with('\\'));
}

#[test]
fn slot_resolution_by_name_prefix_matches_the_first_loaded_slot() {
    let mut host = Host::bind(&test_config()).unwrap();
    host.load_plugin("hellodemo").unwrap();
    let mut client = connect(&host);

    client.write_all(b"GET hello text\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    assert_eq!(buf, b"hello\n\\");
}

#[test]
fn configured_verb_prefix_is_required_on_every_command() {
    let mut config = test_config();
    config.prefix = "ed".to_string();
    let mut host = Host::bind(&config).unwrap();
    let mut client = connect(&host);

    // The unprefixed form must now be rejected as unrecognized.
    client.write_all(b"LIST\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    let line = String::from_utf8(buf).unwrap();
    assert!(line.starts_with("ERROR 001"));
    assert!(line.ends_with('\\'), "error response is missing its prompt byte: {line:?}");

    let mut client2 = connect(&host);
    client2.write_all(b"edLIST\n").unwrap();
    let mut buf2 = Vec::new();
    drive_until(&mut host, &mut client2, &mut buf2, has_prompt);
    assert_eq!(buf2, b"\\");
}

#[test]
fn loadso_of_an_unknown_plugin_reports_unknown_plugin() {
    let mut host = Host::bind(&test_config()).unwrap();
    let mut client = connect(&host);

    client.write_all(b"LOADSO nonexistent\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    let line = String::from_utf8(buf).unwrap();
    assert!(line.starts_with("ERROR 002"));
    assert!(line.ends_with('\\'), "error response is missing its prompt byte: {line:?}");
}

#[test]
fn get_on_an_unresolved_plugin_name_reports_unknown_plugin_not_bad_slot_index() {
    let mut host = Host::bind(&test_config()).unwrap();
    let mut client = connect(&host);

    client.write_all(b"GET nonesuch foo\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    let line = String::from_utf8(buf).unwrap();
    assert!(line.starts_with("ERROR 002"), "unexpected error line: {line:?}");
    assert!(line.ends_with('\\'), "error response is missing its prompt byte: {line:?}");
}

#[test]
fn pending_reply_lock_rejects_a_second_get_until_the_first_replies() {
    let mut host = Host::bind(&test_config()).unwrap();
    host.load_plugin("hellodemo").unwrap();
    let mut client_a = connect(&host);
    let mut client_b = connect(&host);

    // A's GET takes ownership of `echo`'s pending-reply lock and does not
    // reply immediately (§8 scenario 5).
    client_a.write_all(b"GET 0 echo\n").unwrap();
    host.run_once().expect("reactor iteration failed");

    // B's GET against the same resource, issued while A's reply is still
    // outstanding, must be rejected as busy rather than queued or stalled.
    client_b.write_all(b"GET 0 echo\n").unwrap();
    let mut buf_b = Vec::new();
    drive_until(&mut host, &mut client_b, &mut buf_b, has_prompt);
    let line_b = String::from_utf8(buf_b).unwrap();
    assert!(line_b.starts_with("ERROR 005"), "unexpected error line: {line_b:?}");
    assert!(line_b.ends_with('\\'), "error response is missing its prompt byte: {line_b:?}");

    // A's deferred reply eventually arrives and releases the lock.
    let mut buf_a = Vec::new();
    drive_until(&mut host, &mut client_a, &mut buf_a, has_prompt);
    assert_eq!(buf_a, b"hello\n\\");

    // With the lock released, a fresh GET from B now succeeds.
    client_b.write_all(b"GET 0 echo\n").unwrap();
    let mut buf_b2 = Vec::new();
    drive_until(&mut host, &mut client_b, &mut buf_b2, has_prompt);
    assert_eq!(buf_b2, b"hello\n\\");
}

#[test]
fn list_with_an_operand_returns_that_slots_long_help_text() {
    let mut host = Host::bind(&test_config()).unwrap();
    host.load_plugin("hellodemo").unwrap();
    let mut client = connect(&host);

    client.write_all(b"LIST hellodemo\n").unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, has_prompt);
    let text = String::from_utf8(buf).unwrap();
    assert!(text.contains("hellodemo:"), "unexpected help body: {text:?}");
    assert!(text.ends_with('\\'));
}

#[test]
fn two_commands_in_one_write_are_both_dispatched_in_order() {
    let mut host = Host::bind(&test_config()).unwrap();
    host.load_plugin("hellodemo").unwrap();
    let mut client = connect(&host);

    // A single write carrying two complete lines must not stall the second
    // command until more bytes arrive (§4.4: "Multiple commands in one
    // read are dispatched in order").
    client
        .write_all(b"SET 0 text \"batched\"\nGET 0 text\n")
        .unwrap();
    let mut buf = Vec::new();
    drive_until(&mut host, &mut client, &mut buf, |b| {
        b.iter().filter(|&&c| c == b'\\').count() >= 2
    });
    assert_eq!(buf, b"\\batched\n\\");
}

#[test]
fn an_overlong_line_with_no_terminator_closes_the_session() {
    let mut host = Host::bind(&test_config()).unwrap();
    let mut client = connect(&host);

    let overlong = vec![b'x'; slotd::session::MAX_COMMAND_LINE_LEN + 1];
    client.write_all(&overlong).unwrap();

    let mut buf = Vec::new();
    // The peer should close its end; a subsequent read returns 0.
    for _ in 0..200 {
        host.run_once().unwrap();
        let mut chunk = [0u8; 64];
        client
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        match client.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(err) => panic!("client read failed: {err}"),
        }
    }
    panic!("session was never closed for an overlong unterminated line");
}
