//! Token secrets and the normalized token set held by the engine.

pub mod secret;
pub mod set;
