pub mod pipeline;
pub mod selector;

pub use pipeline::{
    DecodedFrame, FrameProvider, FrameSelectionPipeline, PipelineStats, SelectedFrame,
    SelectionOutcome, SelectionRequest,
};
pub use selector::{
    CandidateFrame, FrameSimilarity, NoSimilarity, OptimalSelector, Selection, SelectionConfig,
    SelectionPreferences, SelectionWeights, SimilarityOracle, Substitution,
};
