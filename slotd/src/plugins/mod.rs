//! The three built-in peripherals (`SPEC_FULL.md` §2): local-state
//! demonstration plug-ins grounded in §2's "Peripherals either represent
//! purely local state (demo/IRC/gamepad)". None of these talk to a real
//! downstream FPGA — see [`crate::fpga`] for that (unimplemented) seam.

pub mod hellodemo;
pub mod ircdemo;
pub mod padiron;

use crate::plugin::PluginRegistry;

/// Registers every built-in plug-in's factory under its wire-visible name.
/// Called once by [`crate::plugin::PluginRegistry::with_builtin_plugins`];
/// stands in for the C original's directory of shared objects (§9).
pub fn register_all(registry: &mut PluginRegistry) {
    registry.register("hellodemo", hellodemo::create);
    registry.register("ircdemo", ircdemo::create);
    registry.register("padiron", padiron::create);
}
