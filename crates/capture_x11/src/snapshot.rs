//! One CPU-side copy of the source window's pixels

use crate::{CaptureError, CaptureResult};

/// Pixel data read back from the captured window for a single frame.
///
/// Fixed 4-bytes-per-pixel BGRA layout, row-major. Rows may be padded;
/// `stride` is the real distance between row starts in bytes.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
}

impl Snapshot {
    /// Wrap a raw `GetImage` reply, deriving the row stride from the
    /// reply length and rejecting replies too small for the claimed
    /// geometry.
    pub fn from_reply(data: Vec<u8>, width: u32, height: u32) -> CaptureResult<Self> {
        let stride = match row_stride(data.len(), width, height) {
            Some(s) => s,
            None => {
                return Err(CaptureError::SnapshotMismatch {
                    got: data.len(),
                    need: width as usize * height as usize * 4,
                })
            }
        };
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    /// The pixel bytes of row `y`, without any row padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * 4]
    }
}

/// Derive the byte stride of a packed-or-padded 32bpp image reply.
///
/// Returns `None` when the buffer cannot hold `height` rows of
/// `width` pixels, which callers treat as a skipped frame.
pub fn row_stride(len: usize, width: u32, height: u32) -> Option<usize> {
    if width == 0 || height == 0 {
        return None;
    }
    let stride = len / height as usize;
    if stride < width as usize * 4 || stride * height as usize > len {
        return None;
    }
    Some(stride)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_of_packed_reply() {
        assert_eq!(row_stride(640 * 480 * 4, 640, 480), Some(640 * 4));
    }

    #[test]
    fn stride_of_padded_reply() {
        // 10px wide rows padded to 64 bytes
        assert_eq!(row_stride(64 * 20, 10, 20), Some(64));
    }

    #[test]
    fn short_reply_is_rejected() {
        assert_eq!(row_stride(100, 640, 480), None);
        assert_eq!(row_stride(0, 1, 1), None);
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        assert_eq!(row_stride(4096, 0, 16), None);
        assert_eq!(row_stride(4096, 16, 0), None);
    }

    #[test]
    fn row_accessor_skips_padding() {
        let mut data = vec![0u8; 64 * 2];
        data[64] = 7;
        let snap = Snapshot::from_reply(data, 10, 2).unwrap();
        assert_eq!(snap.stride, 64);
        assert_eq!(snap.row(1)[0], 7);
        assert_eq!(snap.row(1).len(), 40);
    }
}
