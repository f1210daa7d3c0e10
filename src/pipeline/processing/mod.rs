// Pipeline processing: schema mapping, normalization, change detection, merging, quality and features

pub mod canonicalize;
pub mod change_detect;
pub mod merge;
pub mod normalize;
pub mod quality_gate;
pub mod vectorize;

pub use canonicalize::{FieldCanonicalizer, FieldMapping};
pub use change_detect::{ChangeDetector, ChangeSet, ChangeType};
pub use merge::{MergePolicy, MergePolicyTable, MergeResolver};
pub use normalize::DefaultNormalizer;
pub use quality_gate::{DefaultQualityGate, QualityGate};
pub use vectorize::{FeatureBundle, Vectorizer};
