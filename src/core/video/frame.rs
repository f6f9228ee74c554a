use serde::{Deserialize, Serialize};

/// 像素缓冲（RGBA，按行存储）
///
/// 调用方持有；跨线程传递前必须 clone，不在线程间共享可变内存。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>, // RGBA 格式
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// 纯色缓冲
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self::new(width, height, data)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// 宽高为零或数据不足一个像素
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.len() < 4
    }

    /// 缓冲是否完整（数据长度与宽高一致）
    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.pixel_count() * 4
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.data
            .get(idx..idx + 4)
            .map(|p| [p[0], p[1], p[2], p[3]])
    }
}

/// 从原生解码层传递的 I420 帧
#[derive(Debug, Clone)]
pub struct YuvFrame {
    pub width: u32,
    pub height: u32,
    pub y_plane: Vec<u8>,
    pub u_plane: Vec<u8>,
    pub v_plane: Vec<u8>,
}

impl YuvFrame {
    /// BT.601 YUV → RGBA，平面数据不足时按中性色补齐
    pub fn to_pixel_buffer(&self) -> PixelBuffer {
        let mut rgba_data = vec![0u8; self.width as usize * self.height as usize * 4];
        self.write_rgba(&mut rgba_data);
        PixelBuffer::new(self.width, self.height, rgba_data)
    }

    /// 写入调用方提供的 RGBA 缓冲（通常来自画布池）
    pub fn write_rgba(&self, out: &mut [u8]) {
        let w = self.width as usize;
        let h = self.height as usize;
        let chroma_w = w.div_ceil(2);

        for y in 0..h {
            for x in 0..w {
                let y_idx = y * w + x;
                let uv_idx = (y / 2) * chroma_w + x / 2;

                let y_val = self.y_plane.get(y_idx).copied().unwrap_or(0) as f32;
                let u_val = self.u_plane.get(uv_idx).copied().unwrap_or(128) as f32 - 128.0;
                let v_val = self.v_plane.get(uv_idx).copied().unwrap_or(128) as f32 - 128.0;

                let r = (y_val + 1.402 * v_val).clamp(0.0, 255.0) as u8;
                let g = (y_val - 0.344136 * u_val - 0.714136 * v_val).clamp(0.0, 255.0) as u8;
                let b = (y_val + 1.772 * u_val).clamp(0.0, 255.0) as u8;

                let rgba_idx = y_idx * 4;
                if let Some(px) = out.get_mut(rgba_idx..rgba_idx + 4) {
                    px.copy_from_slice(&[r, g, b, 255]);
                }
            }
        }
    }
}
