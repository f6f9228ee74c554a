use crate::core::analysis::{AnalysisOptions, CacheConfig};
use crate::core::dispatcher::DispatcherConfig;
use crate::core::error::AnalysisError;
use crate::core::selection::SelectionConfig;
use crate::core::video::{PoolConfig, SamplerConfig, SimilarityConfig};
use serde::{Deserialize, Serialize};

/// 引擎整体配置，JSON 中缺省的字段取默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub analysis: AnalysisOptions,
    pub dispatcher: DispatcherConfig,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    pub sampler: SamplerConfig,
    pub similarity: SimilarityConfig,
    pub selection: SelectionConfig,
    /// 取帧失败后的重试次数
    pub frame_retries: u32,
    /// 候选帧数 = 目标帧数 × 该系数
    pub candidate_multiplier: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisOptions::default(),
            dispatcher: DispatcherConfig::default(),
            cache: CacheConfig::default(),
            pool: PoolConfig::default(),
            sampler: SamplerConfig::default(),
            similarity: SimilarityConfig::default(),
            selection: SelectionConfig::default(),
            frame_retries: 1,
            candidate_multiplier: 3,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn fast() -> Self {
        Self {
            analysis: AnalysisOptions::fast(),
            candidate_multiplier: 2,
            ..Default::default()
        }
    }

    pub fn thorough() -> Self {
        Self {
            analysis: AnalysisOptions::thorough(),
            candidate_multiplier: 4,
            frame_retries: 2,
            ..Default::default()
        }
    }
}
