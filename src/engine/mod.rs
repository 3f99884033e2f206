// Pawz Presence Engine
// Decides when an agent should speak up on its own, and remembers what
// matters about the user between conversations.

pub mod affect;
pub mod analysis;
pub mod config;
pub mod emotional_history;
pub mod history;
pub mod local_services;
pub mod memory;
pub mod state_builder;
