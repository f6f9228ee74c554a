pub mod frame;
pub mod pool;
pub mod sampler;
pub mod similarity;

pub use frame::{PixelBuffer, YuvFrame};
pub use pool::{BufferPool, PoolConfig, PoolStats};
pub use sampler::{timestamps_to_frame_indices, FrameSampler, SamplerConfig, SamplingMode};
pub use similarity::{SimilarityConfig, SimilarityFilter, SimilarityReport};
