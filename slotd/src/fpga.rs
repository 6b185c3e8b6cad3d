//! §6's second plug-in callback and §1's scope cut: "the wire transport to
//! any downstream FPGA (the enumerator/packetizer module)... [is] treated
//! as an external collaborator, only their core-facing contracts are
//! specified". This module is that contract boundary and nothing else — no
//! type here opens a real serial port or speaks a real packet format. A
//! future plug-in that does bridge to hardware implements [`FpgaBridge`]
//! and is driven by a transport module this repository does not ship.

/// What a downstream FPGA transport expects from a plug-in that bridges to
/// it: a place to hand inbound packets, and a place to send outbound ones.
/// Mirrors [`crate::plugin::Plugin::on_packet`], which is this trait's
/// mirror image on the plug-in side — `on_packet` is how the transport
/// tells the plug-in a reply arrived; `send_packet` is how the plug-in asks
/// the transport to write one.
pub trait FpgaBridge {
    /// Queue `packet` for transmission to the downstream FPGA. Returns
    /// `false` if the bridge has no room (the transport's own write buffer
    /// is full); callers should treat that as backpressure, not an error.
    fn send_packet(&mut self, packet: &[u8]) -> bool;
}

/// §6: "Codes 100+ are reserved for transport-related errors raised by the
/// FPGA bridge plug-ins." No variant in [`crate::error::ProtocolError`]
/// uses this range; it is reserved here as a documented constant so a
/// future bridge plug-in has a starting point that doesn't collide with
/// the core's own 001-010.
pub const FPGA_ERROR_CODE_BASE: u16 = 100;

/// §4.3's watchdog convention: "Plug-ins that expect replies from
/// downstream transports schedule their own OneShot timers (conventionally
/// 100 ms) and log a no-ack warning on expiry." Exposed as a named constant
/// so a bridge plug-in doesn't have to rediscover the convention from
/// prose.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 100;
