//! Token secrets and the token state record guarded by the lifecycle manager.

pub mod secret;
pub mod state;
