//! Client side of a practice run: the answer buffer, its local scratch slots
//! and the controller that decides when the buffer is committed.

pub mod buffer;
pub mod controller;
pub mod scratch;

pub use buffer::SessionBuffer;
pub use controller::{
    CommitOutcome, CommitTarget, PracticeError, SaveNotice, SessionController, SessionPhase,
};
pub use scratch::{FileScratch, InMemoryScratch, ScratchError, ScratchStore, SessionSlots};
