pub mod ml_model;
pub mod preprocess;
pub mod training;
pub mod inference;

pub use ml_model::{CivicIssueClassifier, ModelConfig, feature_map_size};
pub use preprocess::{decode_and_normalize, load_and_normalize_image};
pub use training::{IssueDataset, IssueBatcher, TrainingSummary, train_model};
pub use inference::{Classification, ImageClassifier, InferenceEngine, load_classifier};
