// Current-state view shared by the pull and push paths

mod store;
mod update;

pub use store::{PollState, PredictionPhase, Resolution, StateSnapshot, StateStore};
pub use update::SessionUpdate;
