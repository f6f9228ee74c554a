//! 画布池
//!
//! 重用相同尺寸的 RGBA 画布，减少格式转换/重采样时的分配。
//! 只在调用方线程使用，不会被后台分析线程访问。

use super::frame::{PixelBuffer, YuvFrame};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// 每个尺寸最多缓存的画布数
    pub max_per_size: usize,
    /// 超过此时间未使用的画布在下次 acquire 时丢弃
    pub expire_after_ms: u64,
    /// 分析前的最大边长，超过则缩放
    pub analysis_max_dimension: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_size: 4,
            expire_after_ms: 30_000,
            analysis_max_dimension: 320,
        }
    }
}

struct PoolEntry {
    canvas: RgbaImage,
    last_used: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
}

pub struct BufferPool {
    /// 按尺寸分组的画布
    pool: HashMap<(u32, u32), Vec<PoolEntry>>,
    max_per_size: usize,
    expire_after: Duration,
    analysis_max_dimension: u32,
    stats: PoolStats,
}

impl BufferPool {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            pool: HashMap::new(),
            max_per_size: config.max_per_size.max(1),
            expire_after: Duration::from_millis(config.expire_after_ms),
            analysis_max_dimension: config.analysis_max_dimension.max(1),
            stats: PoolStats::default(),
        }
    }

    /// 获取画布，优先复用最近释放的同尺寸画布
    pub fn acquire(&mut self, width: u32, height: u32) -> RgbaImage {
        let now = Instant::now();
        let expire_after = self.expire_after;

        if let Some(entries) = self.pool.get_mut(&(width, height)) {
            entries.retain(|e| now.duration_since(e.last_used) < expire_after);

            if let Some(entry) = entries.pop() {
                self.stats.reused += 1;
                return entry.canvas;
            }
        }

        self.stats.created += 1;
        RgbaImage::new(width, height)
    }

    /// 归还画布，超出每尺寸上限时直接丢弃
    pub fn release(&mut self, canvas: RgbaImage) {
        let key = canvas.dimensions();
        let entries = self.pool.entry(key).or_default();
        if entries.len() >= self.max_per_size {
            return;
        }
        entries.push(PoolEntry {
            canvas,
            last_used: Instant::now(),
        });
    }

    pub fn clear(&mut self) {
        let count = self.len();
        self.pool.clear();
        debug!("🧹 BufferPool: cleared {} canvases", count);
    }

    /// 池中空闲画布数量
    pub fn len(&self) -> usize {
        self.pool.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// 缩放到分析尺寸；已足够小则原样复制
    pub fn fit_for_analysis(&mut self, src: &PixelBuffer) -> PixelBuffer {
        let (tw, th) = fit_dimensions(src.width, src.height, self.analysis_max_dimension);
        if (tw, th) == (src.width, src.height) {
            return src.clone();
        }

        // 数据不足的部分补 0
        let mut canvas = self.acquire(src.width, src.height);
        let raw: &mut [u8] = &mut canvas;
        let len = src.data.len().min(raw.len());
        raw[..len].copy_from_slice(&src.data[..len]);
        raw[len..].fill(0);

        let fitted = resize_canvas(&canvas, tw, th);
        self.release(canvas);
        fitted
    }

    /// YUV → RGBA 在池化画布上完成，再缩放到分析尺寸
    pub fn convert_yuv_for_analysis(&mut self, frame: &YuvFrame) -> PixelBuffer {
        let (tw, th) = fit_dimensions(frame.width, frame.height, self.analysis_max_dimension);
        let mut canvas = self.acquire(frame.width, frame.height);
        frame.write_rgba(&mut canvas);

        let fitted = if (tw, th) == (frame.width, frame.height) {
            PixelBuffer::new(tw, th, canvas.as_raw().clone())
        } else {
            resize_canvas(&canvas, tw, th)
        };
        self.release(canvas);
        fitted
    }
}

fn resize_canvas(canvas: &RgbaImage, width: u32, height: u32) -> PixelBuffer {
    let resized = imageops::resize(canvas, width, height, FilterType::Triangle);
    PixelBuffer::new(width, height, resized.into_raw())
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}

/// 等比缩放到最大边长不超过 max_dim
pub fn fit_dimensions(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dim || longest == 0 {
        return (width, height);
    }
    let scale = max_dim as f64 / longest as f64;
    let tw = ((width as f64 * scale).round() as u32).max(1);
    let th = ((height as f64 * scale).round() as u32).max(1);
    (tw, th)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_reuses_canvas() {
        let mut pool = BufferPool::default();

        let canvas = pool.acquire(64, 32);
        assert_eq!(canvas.dimensions(), (64, 32));
        pool.release(canvas);
        assert_eq!(pool.len(), 1);

        let again = pool.acquire(64, 32);
        assert_eq!(again.dimensions(), (64, 32));
        assert!(pool.is_empty());
        assert_eq!(pool.stats(), PoolStats { created: 1, reused: 1 });
    }

    #[test]
    fn test_release_respects_per_size_bound() {
        let mut pool = BufferPool::new(&PoolConfig {
            max_per_size: 2,
            ..Default::default()
        });

        for _ in 0..5 {
            pool.release(RgbaImage::new(16, 16));
        }
        pool.release(RgbaImage::new(8, 8));

        assert_eq!(pool.len(), 3);
        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_expired_canvas_not_reused() {
        let mut pool = BufferPool::new(&PoolConfig {
            expire_after_ms: 0,
            ..Default::default()
        });

        pool.release(RgbaImage::new(16, 16));
        let _ = pool.acquire(16, 16);
        assert_eq!(pool.stats().reused, 0);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn test_fit_dimensions() {
        assert_eq!(fit_dimensions(100, 50, 320), (100, 50));
        assert_eq!(fit_dimensions(1920, 1080, 320), (320, 180));
        assert_eq!(fit_dimensions(1080, 1920, 320), (180, 320));
        assert_eq!(fit_dimensions(5000, 1, 100), (100, 1));
    }

    #[test]
    fn test_truncated_frame_pads_reused_canvas() {
        let mut pool = BufferPool::default();
        let _ = pool.fit_for_analysis(&PixelBuffer::filled(640, 360, [255, 255, 255, 255]));
        assert_eq!(pool.len(), 1);

        // 只有上半部分数据，复用的画布下半部分不能残留上一帧
        let top_half = PixelBuffer::new(640, 360, vec![255u8; 640 * 180 * 4]);
        let small = pool.fit_for_analysis(&top_half);

        assert_eq!((small.width, small.height), (320, 180));
        assert_eq!(small.pixel(10, 10), Some([255, 255, 255, 255]));
        assert_eq!(small.pixel(10, 170), Some([0, 0, 0, 0]));
        assert_eq!(pool.stats(), PoolStats { created: 1, reused: 1 });
    }

    #[test]
    fn test_fit_for_analysis_downscales() {
        let mut pool = BufferPool::default();
        let big = PixelBuffer::filled(640, 360, [50, 60, 70, 255]);
        let small = pool.fit_for_analysis(&big);

        assert_eq!((small.width, small.height), (320, 180));
        assert_eq!(small.pixel(100, 100), Some([50, 60, 70, 255]));
    }

    #[test]
    fn test_yuv_conversion_returns_canvas_to_pool() {
        let mut pool = BufferPool::default();
        let frame = YuvFrame {
            width: 640,
            height: 480,
            y_plane: vec![128u8; 640 * 480],
            u_plane: vec![128u8; 320 * 240],
            v_plane: vec![128u8; 320 * 240],
        };

        let buffer = pool.convert_yuv_for_analysis(&frame);
        assert_eq!((buffer.width, buffer.height), (320, 240));
        assert_eq!(pool.len(), 1);

        let _ = pool.convert_yuv_for_analysis(&frame);
        assert_eq!(pool.stats().reused, 1);
    }
}
