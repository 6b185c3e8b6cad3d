//! §3/§4.5's slot table: a fixed number of peripheral bays, each either
//! empty or holding a loaded plug-in and the resources it published.

use crate::ids::SlotIndex;
use crate::plugin::Plugin;
use crate::resource::Resource;

pub const DEFAULT_MAX_SLOTS: usize = 16;

/// A loaded plug-in instance together with the live resource state derived
/// from its [`crate::plugin::Plugin::resource_descriptors`] at load time.
pub struct LoadedSlot {
    pub plugin_name: String,
    pub plugin: Box<dyn Plugin>,
    pub resources: Vec<Resource>,
}

enum Slot {
    Empty,
    Loaded(LoadedSlot),
}

impl Default for Slot {
    fn default() -> Self {
        Slot::Empty
    }
}

/// Fixed-capacity array of slots, indexed by [`SlotIndex`]. §4.5 note: a
/// slot that fails its plug-in's `initialize` never lingers as `Broken` —
/// `SlotTable` itself only ever reports `Empty` or `Loaded`; the
/// transient "Broken" state named in §4.5 lives entirely inside the
/// `LOADSO` handler's local variables, and a failed load simply never
/// calls [`SlotTable::occupy`].
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// First unoccupied slot, scanning low to high — `LOADSO` always fills
    /// the lowest-numbered empty bay, matching the original's linear probe.
    pub fn first_empty(&self) -> Option<SlotIndex> {
        self.slots
            .iter()
            .position(|s| matches!(s, Slot::Empty))
            .map(SlotIndex)
    }

    pub fn occupy(&mut self, index: SlotIndex, loaded: LoadedSlot) {
        self.slots[index.0] = Slot::Loaded(loaded);
    }

    pub fn vacate(&mut self, index: SlotIndex) -> Option<LoadedSlot> {
        match self.slots.get_mut(index.0) {
            Some(slot @ Slot::Loaded(_)) => {
                let taken = std::mem::replace(slot, Slot::Empty);
                match taken {
                    Slot::Loaded(loaded) => Some(loaded),
                    Slot::Empty => unreachable!(),
                }
            }
            _ => None,
        }
    }

    pub fn get(&self, index: SlotIndex) -> Option<&LoadedSlot> {
        match self.slots.get(index.0) {
            Some(Slot::Loaded(loaded)) => Some(loaded),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: SlotIndex) -> Option<&mut LoadedSlot> {
        match self.slots.get_mut(index.0) {
            Some(Slot::Loaded(loaded)) => Some(loaded),
            _ => None,
        }
    }

    /// Removes a loaded slot's plug-in so it can be called without holding
    /// `&mut SlotTable` simultaneously (the take/use/put-back pattern used
    /// throughout this crate and in `reactor`). The `LoadedSlot`'s
    /// `resources` vec is *not* removed with it — callers take only the
    /// plug-in and borrow resources separately, since a plug-in callback
    /// never needs to mutate its own resource table's capability flags,
    /// only `subscribe_key`/`pending_owner`, which `Core` manages directly.
    pub fn take_plugin(&mut self, index: SlotIndex) -> Option<(String, Box<dyn Plugin>)> {
        match self.slots.get_mut(index.0) {
            Some(Slot::Loaded(loaded)) => Some((loaded.plugin_name.clone(), std::mem::replace(
                &mut loaded.plugin,
                Box::new(NullPlugin),
            ))),
            _ => None,
        }
    }

    pub fn put_plugin_back(&mut self, index: SlotIndex, plugin: Box<dyn Plugin>) {
        if let Some(Slot::Loaded(loaded)) = self.slots.get_mut(index.0) {
            loaded.plugin = plugin;
        }
    }

    pub fn by_name(&self, name: &str) -> Option<SlotIndex> {
        self.slots.iter().position(|s| match s {
            Slot::Loaded(loaded) => loaded.plugin_name == name,
            Slot::Empty => false,
        }).map(SlotIndex)
    }

    /// Slots whose plug-in name starts with `prefix`, in index order —
    /// backs the command dispatcher's "first-match-by-prefix" resolution
    /// (§9 Open Question, resolved in DESIGN.md).
    pub fn matching_prefix(&self, prefix: &str) -> impl Iterator<Item = SlotIndex> + '_ {
        self.slots.iter().enumerate().filter_map(move |(i, s)| match s {
            Slot::Loaded(loaded) if loaded.plugin_name.starts_with(prefix) => Some(SlotIndex(i)),
            _ => None,
        })
    }

    pub fn occupied_indices(&self) -> impl Iterator<Item = SlotIndex> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Slot::Loaded(_)))
            .map(|(i, _)| SlotIndex(i))
    }
}

/// Placeholder swapped into a slot for the instant its real plug-in is
/// taken out for a callback; never observable from outside this module.
struct NullPlugin;

impl Plugin for NullPlugin {
    fn name(&self) -> &str {
        "<null>"
    }
    fn description(&self) -> &str {
        ""
    }
    fn help(&self) -> &str {
        ""
    }
    fn resource_descriptors(&self) -> &[crate::resource::ResourceDescriptor] {
        &[]
    }
    fn call(
        &mut self,
        _core: &mut crate::core::Core,
        _session: crate::ids::SessionId,
        _resource: usize,
        _verb: crate::plugin::Verb,
    ) -> crate::plugin::CallOutcome {
        crate::plugin::CallOutcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_empty_scans_low_to_high() {
        let mut table = SlotTable::with_capacity(3);
        assert_eq!(table.first_empty(), Some(SlotIndex(0)));
        table.occupy(
            SlotIndex(0),
            LoadedSlot {
                plugin_name: "x".into(),
                plugin: Box::new(NullPlugin),
                resources: vec![],
            },
        );
        assert_eq!(table.first_empty(), Some(SlotIndex(1)));
    }

    #[test]
    fn vacate_frees_the_slot() {
        let mut table = SlotTable::with_capacity(1);
        table.occupy(
            SlotIndex(0),
            LoadedSlot {
                plugin_name: "x".into(),
                plugin: Box::new(NullPlugin),
                resources: vec![],
            },
        );
        assert!(table.vacate(SlotIndex(0)).is_some());
        assert_eq!(table.first_empty(), Some(SlotIndex(0)));
    }

    #[test]
    fn matching_prefix_is_index_ordered() {
        let mut table = SlotTable::with_capacity(4);
        for (i, name) in ["hellodemo", "ircdemo", "helloworld"].iter().enumerate() {
            table.occupy(
                SlotIndex(i),
                LoadedSlot {
                    plugin_name: name.to_string(),
                    plugin: Box::new(NullPlugin),
                    resources: vec![],
                },
            );
        }
        let matches: Vec<_> = table.matching_prefix("hello").collect();
        assert_eq!(matches, vec![SlotIndex(0), SlotIndex(2)]);
    }
}
