//! Connection to the external messaging network.
//!
//! [`client`] defines the seam to the WhatsApp Web bridge, [`bridge`] the
//! production implementation, and [`session`] the lifecycle owner.

pub mod bridge;
pub mod client;
pub mod session;

pub use client::{ChatClient, ChatClientFactory, ClientEvent, GroupChat};
pub use session::{ReinitOutcome, SessionConfig, SessionManager, SessionSnapshot, SessionState};
