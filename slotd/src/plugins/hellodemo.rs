//! §8 scenario 1's "Hello round-trip": a writable/readable `text` resource,
//! a writable/readable `period` resource controlling the broadcast cadence,
//! a `message` resource that broadcasts the current text once per `period`
//! milliseconds to whoever is `CAT`ing it, and an `echo` resource whose
//! `GET` answers asynchronously (§8 scenario 5's pending-reply lock).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use reactor::TimerKind;

use crate::core::Core;
use crate::error::PluginError;
use crate::ids::SessionId;
use crate::plugin::{CallOutcome, Plugin};
use crate::resource::{Capability, ResourceDescriptor};

const TEXT: usize = 0;
const PERIOD: usize = 1;
const MESSAGE: usize = 2;
const ECHO: usize = 3;

const RESOURCES: [ResourceDescriptor; 4] = [
    ResourceDescriptor::new("text", Capability::from_bits_truncate(Capability::READABLE.bits() | Capability::WRITABLE.bits())),
    ResourceDescriptor::new("period", Capability::from_bits_truncate(Capability::READABLE.bits() | Capability::WRITABLE.bits())),
    ResourceDescriptor::new("message", Capability::BROADCASTABLE),
    ResourceDescriptor::new("echo", Capability::READABLE),
];

const DEFAULT_PERIOD_MS: u64 = 1_000;

/// How long `GET echo` holds the pending-reply lock before answering. Short
/// enough for a test to observe the busy window without an unreasonable
/// wait, long enough that a second `GET` issued right after the first is
/// reliably still outstanding.
const ECHO_REPLY_DELAY_MS: u64 = 20;

pub struct HelloDemo {
    text: Rc<RefCell<String>>,
    period_ms: Rc<Cell<u64>>,
    /// Whether a periodic broadcast timer is currently armed for
    /// `message`. Guards against a second `CAT` arming a second timer;
    /// cleared by the timer callback itself once §4.6's "any subscribers?"
    /// check comes back empty, so the underlying source genuinely stops.
    broadcasting: Rc<Cell<bool>>,
}

impl HelloDemo {
    fn new() -> Self {
        Self {
            text: Rc::new(RefCell::new("hello".to_string())),
            period_ms: Rc::new(Cell::new(DEFAULT_PERIOD_MS)),
            broadcasting: Rc::new(Cell::new(false)),
        }
    }
}

pub fn create() -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(HelloDemo::new()))
}

impl Plugin for HelloDemo {
    fn name(&self) -> &str {
        "hellodemo"
    }

    fn description(&self) -> &str {
        "demonstration peripheral: a readable/writable text resource broadcast on a timer"
    }

    fn help(&self) -> &str {
        "hellodemo: GET/SET text <string>; GET/SET period <ms>; CAT message streams \
         text once per period milliseconds; GET echo replies asynchronously after a \
         short delay, holding the resource's pending-reply lock meanwhile."
    }

    fn resource_descriptors(&self) -> &[ResourceDescriptor] {
        &RESOURCES
    }

    fn call(&mut self, core: &mut Core, session: SessionId, resource: usize, verb: crate::plugin::Verb) -> CallOutcome {
        use crate::plugin::Verb;
        match (resource, verb) {
            (TEXT, Verb::Get) => CallOutcome::Reply(format!("{}\n", self.text.borrow()).into_bytes()),
            (TEXT, Verb::Set(value)) => {
                *self.text.borrow_mut() = value;
                CallOutcome::Done
            }
            (PERIOD, Verb::Get) => CallOutcome::Reply(format!("{}\n", self.period_ms.get()).into_bytes()),
            (PERIOD, Verb::Set(value)) => match value.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => {
                    self.period_ms.set(ms);
                    CallOutcome::Done
                }
                _ => CallOutcome::Invalid(format!("'{value}' is not a positive integer millisecond count")),
            },
            (MESSAGE, Verb::Cat(key)) => {
                self.arm_broadcast(core, key);
                CallOutcome::Done
            }
            (ECHO, Verb::Get) => {
                self.arm_echo_reply(core, session);
                CallOutcome::Pending
            }
            _ => CallOutcome::Invalid("unsupported operation for this resource".into()),
        }
    }
}

impl HelloDemo {
    fn arm_broadcast(&mut self, core: &mut Core, key: crate::ids::SubscribeKey) {
        if self.broadcasting.get() {
            return;
        }
        self.broadcasting.set(true);
        let (slot, resource) = key.decode();
        let text = self.text.clone();
        let active = self.broadcasting.clone();
        let period = self.period_ms.get();
        if core
            .schedule_plugin_timer(TimerKind::Periodic, period, move |core, handle| {
                let body = format!("{}\n", text.borrow());
                let any = core.broadcast(slot, resource, body.as_bytes());
                if !any {
                    active.set(false);
                    core.cancel_timer(handle);
                }
            })
            .is_err()
        {
            log::warn!("hellodemo: timer table full, message broadcast disabled");
            self.broadcasting.set(false);
        }
    }

    /// Answers a `GET echo` after a short one-shot delay instead of
    /// synchronously, so the resource's pending-reply lock (set by the host
    /// when `call` returns [`CallOutcome::Pending`]) is genuinely held for a
    /// window another client's `GET` can observe as `ERROR 005` (§8
    /// scenario 5). If the timer table is full the reply is simply never
    /// sent — the same degrade-the-feature posture `arm_broadcast` takes,
    /// rather than leaving the session's pending-reply lock promised but
    /// never honored by a different error path.
    fn arm_echo_reply(&mut self, core: &mut Core, session: SessionId) {
        let text = self.text.clone();
        if core
            .schedule_plugin_timer(TimerKind::OneShot, ECHO_REPLY_DELAY_MS, move |core, _handle| {
                let body = format!("{}\n", text.borrow());
                core.send_ui(session, body.as_bytes());
                core.prompt(session);
            })
            .is_err()
        {
            log::warn!("hellodemo: timer table full, echo reply dropped for session {session}");
        }
    }
}
