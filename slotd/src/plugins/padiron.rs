//! A local gamepad-state mirror: `buttons` reports the current button
//! bitmask, `state` broadcasts it once per tick to subscribers. Grounded in
//! §2's "Peripherals either represent purely local state (demo/IRC/
//! gamepad)" — this never reads a real controller; the bitmask free-runs
//! so `CAT state` has something changing to demonstrate.

use std::cell::Cell;
use std::rc::Rc;

use reactor::TimerKind;

use crate::core::Core;
use crate::error::PluginError;
use crate::ids::SessionId;
use crate::plugin::{CallOutcome, Plugin, Verb};
use crate::resource::{Capability, ResourceDescriptor};

const BUTTONS: usize = 0;
const STATE: usize = 1;

const RESOURCES: [ResourceDescriptor; 2] = [
    ResourceDescriptor::new("buttons", Capability::READABLE),
    ResourceDescriptor::new("state", Capability::BROADCASTABLE),
];

const TICK_MS: u64 = 50;

pub struct Padiron {
    buttons: Rc<Cell<u32>>,
    broadcasting: Rc<Cell<bool>>,
}

impl Padiron {
    fn new() -> Self {
        Self {
            buttons: Rc::new(Cell::new(0)),
            broadcasting: Rc::new(Cell::new(false)),
        }
    }
}

pub fn create() -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(Padiron::new()))
}

impl Plugin for Padiron {
    fn name(&self) -> &str {
        "padiron"
    }

    fn description(&self) -> &str {
        "demonstration peripheral: a free-running gamepad button mask mirrored over state"
    }

    fn help(&self) -> &str {
        "padiron: GET buttons reads the current bitmask; CAT state streams it every \
         tick while subscribed."
    }

    fn resource_descriptors(&self) -> &[ResourceDescriptor] {
        &RESOURCES
    }

    fn call(&mut self, core: &mut Core, _session: SessionId, resource: usize, verb: Verb) -> CallOutcome {
        match (resource, verb) {
            (BUTTONS, Verb::Get) => CallOutcome::Reply(format!("{}\n", self.buttons.get()).into_bytes()),
            (STATE, Verb::Cat(key)) => {
                self.arm_broadcast(core, key);
                CallOutcome::Done
            }
            _ => CallOutcome::Invalid("unsupported operation for this resource".into()),
        }
    }
}

impl Padiron {
    fn arm_broadcast(&mut self, core: &mut Core, key: crate::ids::SubscribeKey) {
        if self.broadcasting.get() {
            return;
        }
        self.broadcasting.set(true);
        let (slot, resource) = key.decode();
        let buttons = self.buttons.clone();
        let active = self.broadcasting.clone();
        if core
            .schedule_plugin_timer(TimerKind::Periodic, TICK_MS, move |core, handle| {
                let next = buttons.get().wrapping_add(1);
                buttons.set(next);
                let body = format!("{next}\n");
                let any = core.broadcast(slot, resource, body.as_bytes());
                if !any {
                    active.set(false);
                    core.cancel_timer(handle);
                }
            })
            .is_err()
        {
            log::warn!("padiron: timer table full, state broadcast disabled");
            self.broadcasting.set(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buttons_start_at_zero() {
        let demo = Padiron::new();
        assert_eq!(demo.buttons.get(), 0);
    }

    #[test]
    fn resource_descriptors_match_read_only_and_broadcast_only() {
        let demo = Padiron::new();
        let descs = demo.resource_descriptors();
        assert_eq!(descs[BUTTONS].capability, Capability::READABLE);
        assert_eq!(descs[STATE].capability, Capability::BROADCASTABLE);
    }
}
