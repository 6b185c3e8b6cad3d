use crate::ids::{SessionId, SubscribeKey};

bitflags::bitflags! {
    /// §9 redesign note: "model each resource as a value of the capability
    /// set {read, write, subscribe}... this makes capability-mismatch
    /// errors a... validated-at-register-time concern". The flags are set
    /// once, at plug-in initialization, from each [`ResourceDescriptor`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capability: u8 {
        const READABLE      = 0b001;
        const WRITABLE      = 0b010;
        const BROADCASTABLE = 0b100;
    }
}

impl Capability {
    /// Short tag string used by `LIST` (`RWB`, `R`, `B`, ...).
    pub fn tag(&self) -> String {
        let mut s = String::new();
        if self.contains(Capability::READABLE) {
            s.push('R');
        }
        if self.contains(Capability::WRITABLE) {
            s.push('W');
        }
        if self.contains(Capability::BROADCASTABLE) {
            s.push('B');
        }
        s
    }
}

/// Static description of a resource a plug-in exposes, returned once from
/// [`crate::plugin::Plugin::resource_descriptors`] at load time.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub name: &'static str,
    pub capability: Capability,
}

impl ResourceDescriptor {
    pub const fn new(name: &'static str, capability: Capability) -> Self {
        Self { name, capability }
    }
}

/// Live per-resource state (§3's Resource row): the name and capability
/// flags are fixed at load time; `subscribe_key` and `pending_owner` mutate
/// at runtime under the invariants described there.
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub capability: Capability,
    pub subscribe_key: SubscribeKey,
    pub pending_owner: Option<SessionId>,
}

impl Resource {
    pub fn from_descriptor(d: &ResourceDescriptor) -> Self {
        Self {
            name: d.name.to_string(),
            capability: d.capability,
            subscribe_key: SubscribeKey::NONE,
            pending_owner: None,
        }
    }
}
