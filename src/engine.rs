//! Dialog engine
//!
//! Turns events into state moves, actions and responses, one session at a
//! time, talking to the outside world only through the traits in
//! [`traits`].

mod executor;
pub mod recovery;
pub mod testing;
pub mod traits;

pub use executor::{DialogEngine, DialogEngineBuilder, TurnReport, TurnStatus};
pub use recovery::{RecoveryDecision, RecoveryReason};
pub use traits::{
    ChannelAdapter, LogSink, NoopScheduler, Profile, Scheduler, SessionRef, SessionStore,
};
