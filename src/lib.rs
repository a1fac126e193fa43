#[macro_use]
extern crate tracing;

pub mod cloudflared;
pub mod deploy;
pub mod dns;
pub mod error;
pub mod hosts;
pub mod ingress;
pub mod provision;
pub mod settings;
