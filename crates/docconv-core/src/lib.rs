mod runtime;

pub mod api;

pub use runtime::types::{
    ConversionError, ConversionRequest, ConversionRoute, JobState, SourceKind, TargetFormat,
    UploadedFile, WarmOutcome, WarmPhase, WarmStatus,
};
