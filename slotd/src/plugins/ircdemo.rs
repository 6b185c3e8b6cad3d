//! A local chat-room peripheral: `say` accepts a line of text and fans it
//! out immediately to every session `CAT`ing `feed`. Unlike `hellodemo`'s
//! `message`, there is no periodic timer here — `feed` only ever emits in
//! direct response to a `SET say`, so "stop producing when nobody's
//! listening" (§4.6) is automatic: nothing is produced at all absent a
//! `SET`.

use std::cell::Cell;

use crate::core::Core;
use crate::error::PluginError;
use crate::ids::{SessionId, SlotIndex, SubscribeKey};
use crate::plugin::{CallOutcome, Plugin, Verb};
use crate::resource::{Capability, ResourceDescriptor};

const SAY: usize = 0;
const FEED: usize = 1;

const RESOURCES: [ResourceDescriptor; 2] = [
    ResourceDescriptor::new("say", Capability::WRITABLE),
    ResourceDescriptor::new("feed", Capability::BROADCASTABLE),
];

pub struct IrcDemo {
    /// Captured from `feed`'s own `CAT` key the first time someone
    /// subscribes, so a later `SET say` knows which slot to broadcast
    /// into without the core ever having told `call` its own slot index
    /// directly (only `Verb::Cat` carries one, per §6).
    slot: Cell<Option<SlotIndex>>,
}

impl IrcDemo {
    fn new() -> Self {
        Self {
            slot: Cell::new(None),
        }
    }
}

pub fn create() -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(IrcDemo::new()))
}

impl Plugin for IrcDemo {
    fn name(&self) -> &str {
        "ircdemo"
    }

    fn description(&self) -> &str {
        "demonstration peripheral: a local chat room broadcasting said lines to subscribers"
    }

    fn help(&self) -> &str {
        "ircdemo: SET say <line> posts a line; CAT feed streams every posted line."
    }

    fn resource_descriptors(&self) -> &[ResourceDescriptor] {
        &RESOURCES
    }

    fn call(&mut self, core: &mut Core, _session: SessionId, resource: usize, verb: Verb) -> CallOutcome {
        match (resource, verb) {
            (SAY, Verb::Set(line)) => {
                if let Some(slot) = self.slot.get() {
                    let body = format!("{line}\n");
                    core.broadcast(slot, FEED, body.as_bytes());
                }
                CallOutcome::Done
            }
            (FEED, Verb::Cat(key)) => {
                let (slot, _resource) = key.decode();
                self.slot.set(Some(slot));
                CallOutcome::Done
            }
            _ => CallOutcome::Invalid("unsupported operation for this resource".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_no_known_slot() {
        let demo = IrcDemo::new();
        assert_eq!(demo.slot.get(), None);
    }

    #[test]
    fn resource_descriptors_are_write_only_and_broadcast_only() {
        let demo = IrcDemo::new();
        let descs = demo.resource_descriptors();
        assert_eq!(descs[SAY].capability, Capability::WRITABLE);
        assert_eq!(descs[FEED].capability, Capability::BROADCASTABLE);
    }

    #[test]
    fn cat_key_decodes_back_to_its_own_slot_and_resource() {
        let key = SubscribeKey::for_resource(SlotIndex(3), FEED);
        assert_eq!(key.decode(), (SlotIndex(3), FEED));
    }
}
