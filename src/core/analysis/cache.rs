//! 分析结果缓存
//!
//! 以稀疏像素指纹 + 尺寸 + 参数为键，TTL 过期，超过容量时淘汰最旧的一条。
//! 指纹只采样一条扫描线，不同图像可能碰撞；需要精确结果时绕过缓存。

use super::{AnalysisOptions, BatchAnalysis};
use crate::core::video::frame::PixelBuffer;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;
use std::time::{Duration, Instant};

/// 指纹采样点数
const FINGERPRINT_SAMPLES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_ms: u64,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl_ms: 5 * 60 * 1000,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    timestamp: Instant,
    /// 同一时刻插入时的先后顺序
    seq: u64,
    result: BatchAnalysis,
}

#[derive(Debug)]
pub struct ResultCache {
    entries: HashMap<String, CacheEntry>,
    capacity: usize,
    ttl: Duration,
    enabled: bool,
    next_seq: u64,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: config.capacity.max(1),
            ttl: Duration::from_millis(config.ttl_ms),
            enabled: config.enabled,
            next_seq: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// 中间扫描线上 10 个等距像素 + 宽高 + 参数 JSON
    pub fn fingerprint(buffer: &PixelBuffer, options: &AnalysisOptions) -> String {
        let mut key = String::with_capacity(128);
        if buffer.width > 0 && buffer.height > 0 {
            let y = buffer.height / 2;
            for i in 0..FINGERPRINT_SAMPLES {
                let x = (i as u64 * buffer.width as u64 / FINGERPRINT_SAMPLES as u64) as u32;
                match buffer.pixel(x, y) {
                    Some([r, g, b, a]) => {
                        let _ = write!(key, "{:02x}{:02x}{:02x}{:02x}", r, g, b, a);
                    }
                    None => key.push_str("--------"),
                }
            }
        }
        let _ = write!(key, "|{}x{}|", buffer.width, buffer.height);
        key.push_str(&serde_json::to_string(options).unwrap_or_default());
        key
    }

    pub fn get(&mut self, key: &str) -> Option<BatchAnalysis> {
        self.get_at(key, Instant::now())
    }

    pub fn put(&mut self, key: String, result: BatchAnalysis) {
        self.put_at(key, result, Instant::now())
    }

    fn get_at(&mut self, key: &str, now: Instant) -> Option<BatchAnalysis> {
        if !self.enabled {
            return None;
        }

        let fresh = match self.entries.get(key) {
            Some(entry) => now.saturating_duration_since(entry.timestamp) < self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };

        if !fresh {
            debug!("🗑️ cache entry expired");
            self.entries.remove(key);
            self.misses += 1;
            return None;
        }

        self.hits += 1;
        self.entries.get(key).map(|entry| entry.result.clone())
    }

    fn put_at(&mut self, key: String, result: BatchAnalysis, now: Instant) {
        if !self.enabled {
            return;
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key,
            CacheEntry {
                timestamp: now,
                seq,
                result,
            },
        );
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.timestamp, entry.seq))
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            debug!("🗑️ cache full ({}), evicting oldest entry", self.capacity);
            self.entries.remove(&key);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_count(&self) -> u64 {
        self.hits
    }

    pub fn miss_count(&self) -> u64 {
        self.misses
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
