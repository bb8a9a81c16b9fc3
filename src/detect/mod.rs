mod backend;
pub mod backends;
mod labels;
mod registry;
mod result;

pub use backend::Detector;
pub use backends::{
    ModelDetector, ModelObservation, NullDetector, ScriptStep, ScriptedDetector, SyntheticDetector,
};
pub use labels::{LabelError, LabelMap};
pub use registry::DetectorRegistry;
pub use result::{Detection, DetectionBatch, Label, RawDetection, TeamSide};
