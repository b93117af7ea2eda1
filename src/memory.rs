//! In-process collaborators: a poll backend with anonymous auth, and scripted
//! identity provider and wallet. Used by the tests and the demo.

mod backend;
mod identity;

pub use backend::MemoryBackend;
pub use identity::{ConnectOutcome, ScriptedIdentityProvider, ScriptedWallet};
