//! Outreach workers and dispatcher.
//!
//! Turns gatekeeper-approved contacts into messages: the dispatcher walks a
//! team's `CAMPAIGN_READY` contacts on each tick and the worker owning each
//! contact's stage renders the message for the attempt's tone.

pub mod config;
pub mod dispatcher;
pub mod scenario;
pub mod worker;

pub use config::OutreachConfig;
pub use dispatcher::{keyword_intent, Dispatcher, TickReport};
pub use scenario::{Runtime, Scenario};
pub use worker::Worker;
