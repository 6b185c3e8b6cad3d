//! §6's stable error codes and §7's four failure kinds.

/// Protocol-level failures, each carrying the stable three-digit code from
/// §6. Codes 001-008 are the spec's own; 009 and 010 fill two gaps the
/// spec's enumeration left implicit (see DESIGN.md) — CAT against a
/// non-broadcastable resource, and LOADSO with no free slot left. Codes
/// 100+ remain reserved for the (unimplemented here) FPGA bridge plug-ins.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("unrecognized verb '{0}'")]
    UnrecognizedVerb(String),

    #[error("Plug-in '{0}' is not in system")]
    UnknownPlugin(String),

    #[error("slot index {0} is out of range")]
    BadSlotIndex(String),

    #[error("Resource '{0}' does not exist")]
    NoSuchResource(String),

    #[error("Resource '{0}' is busy")]
    ResourceBusy(String),

    #[error("Resource '{0}' is not readable")]
    NotReadable(String),

    #[error("Resource '{0}' is not writable")]
    NotWritable(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("Resource '{0}' is not broadcastable")]
    NotBroadcastable(String),

    #[error("no free slot available")]
    NoFreeSlot,
}

impl ProtocolError {
    pub const fn code(&self) -> u16 {
        match self {
            ProtocolError::UnrecognizedVerb(_) => 1,
            ProtocolError::UnknownPlugin(_) => 2,
            ProtocolError::BadSlotIndex(_) => 3,
            ProtocolError::NoSuchResource(_) => 4,
            ProtocolError::ResourceBusy(_) => 5,
            ProtocolError::NotReadable(_) => 6,
            ProtocolError::NotWritable(_) => 7,
            ProtocolError::InvalidValue(_) => 8,
            ProtocolError::NotBroadcastable(_) => 9,
            ProtocolError::NoFreeSlot => 10,
        }
    }

    /// Renders the `ERROR <NNN> : <message>` wire line (§6), without the
    /// trailing newline or prompt.
    pub fn to_wire_line(&self) -> String {
        format!("ERROR {:03} : {}", self.code(), self)
    }
}

/// §7 kind 3: plug-in load errors. Distinct from `ProtocolError` because a
/// load failure's caller (the `LOADSO` handler) needs to know whether to
/// roll the slot back to `Empty`, which it always does, vs. emit a wire
/// error, which only some variants warrant (an unknown name is a protocol
/// error; an initializer returning failure is a load error that is then
/// *reported as* `ERROR 008`, per §7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    #[error("plug-in initializer reported failure")]
    InitFailed,
    #[error("plug-in is missing a required resource or symbol: {0}")]
    MissingSymbol(String),
}
