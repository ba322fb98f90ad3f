//! Consumed card SDK boundary.
//!
//! The vendor SDK is opaque to this crate: open a card, attach the action,
//! execute blocking jobs. The traits mirror that surface so the real SDK
//! binding and the test doubles plug in the same way. Dropping a handle
//! releases the underlying resource.

use bitflags::bitflags;

use crate::fpga::{JobEnvelope, TransportCode, ACTION_TYPE};

bitflags! {
    /// Interrupt behaviour requested when attaching the action.
    pub struct ActionFlags: u32 {
        const DONE_IRQ = 0b01;
        const ATTACH_IRQ = 0b10;
    }
}

#[derive(Debug, Clone)]
pub struct CardConfig {
    pub device: String,
    pub action_type: u32,
    pub flags: ActionFlags,
    pub attach_timeout_secs: u64,
    pub job_timeout_secs: u64,
}

impl CardConfig {
    pub fn for_card(card: u32) -> Self {
        Self {
            device: format!("/dev/cxl/afu{}.0s", card),
            action_type: ACTION_TYPE,
            flags: ActionFlags::DONE_IRQ | ActionFlags::ATTACH_IRQ,
            attach_timeout_secs: 60,
            job_timeout_secs: 10,
        }
    }
}

impl Default for CardConfig {
    fn default() -> Self {
        Self::for_card(0)
    }
}

/// Entry point into the SDK. `None` mirrors the vendor call returning a
/// null handle.
pub trait CardSdk {
    fn open(&self, device: &str) -> Option<Box<dyn CardHandle>>;
}

/// An opened card device.
pub trait CardHandle: Send {
    fn attach(
        &self,
        action_type: u32,
        flags: ActionFlags,
        timeout_secs: u64,
    ) -> Option<Box<dyn CardAction>>;
}

/// An attached action: the only thing jobs can be submitted to.
pub trait CardAction: Send {
    /// Blocking submit-and-wait. Returns the transport code; on transport
    /// success the envelope's `retc` and response words have been written
    /// by the hardware (and, for readback jobs, its parameter blob).
    fn execute(&self, envelope: &mut JobEnvelope, timeout_secs: u64) -> TransportCode;
}
