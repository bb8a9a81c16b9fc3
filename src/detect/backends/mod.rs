pub mod model;
pub mod null;
pub mod scripted;
pub mod synthetic;

pub use model::{ModelDetector, ModelObservation};
pub use null::NullDetector;
pub use scripted::{ScriptStep, ScriptedDetector};
pub use synthetic::SyntheticDetector;
