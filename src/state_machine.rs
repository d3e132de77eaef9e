//! Turn state machine
//!
//! Elm-style: a pure `transition` maps (state, event) to a new state plus
//! the effects the runtime must carry out.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::Event;
pub use state::{ConvContext, ConvState};
pub use transition::{transition, TransitionError};
