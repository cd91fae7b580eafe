use image::RgbImage;

/// Order of the three interleaved samples in every pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// An uncompressed 8-bit, 3-channel image laid out `[rows][cols][3]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
    channel_order: ChannelOrder,
}

impl PixelBuffer {
    /// Wrap raw interleaved samples. Returns `None` if `data` is not exactly
    /// `width * height * 3` bytes long.
    pub fn from_raw(
        width: u32,
        height: u32,
        data: Vec<u8>,
        channel_order: ChannelOrder,
    ) -> Option<Self> {
        if sample_len(width, height) != Some(data.len()) {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
            channel_order,
        })
    }

    /// Number of columns.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channel_order(&self) -> ChannelOrder {
        self.channel_order
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// The three samples at `(row, col)`, in this buffer's channel order.
    pub fn pixel(&self, row: u32, col: u32) -> [u8; 3] {
        assert!(
            row < self.height && col < self.width,
            "pixel ({row}, {col}) outside {}x{} buffer",
            self.width,
            self.height
        );
        let offset = (row as usize * self.width as usize + col as usize) * 3;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ]
    }

    /// Convert to `order`, swapping the first and third sample of every pixel
    /// when the orders differ.
    pub fn into_order(mut self, order: ChannelOrder) -> Self {
        if self.channel_order != order {
            swap_red_blue(&mut self.data);
            self.channel_order = order;
        }
        self
    }

    /// Copy into an RGB image regardless of the stored order.
    pub fn to_rgb_image(&self) -> RgbImage {
        let mut data = self.data.clone();
        if self.channel_order == ChannelOrder::Bgr {
            swap_red_blue(&mut data);
        }
        RgbImage::from_raw(self.width, self.height, data)
            .expect("buffer length is checked on construction")
    }
}

impl From<RgbImage> for PixelBuffer {
    fn from(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
            channel_order: ChannelOrder::Rgb,
        }
    }
}

/// A single decoded video frame with its position in the source.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Absolute frame number from the start of the source (0-based).
    pub index: u64,
    /// Elapsed seconds from the start of the source.
    pub timestamp: f64,
    pub pixels: PixelBuffer,
}

impl Frame {
    pub fn channel_order(&self) -> ChannelOrder {
        self.pixels.channel_order()
    }
}

/// Byte length of `width * height` RGB samples, or `None` if it does not fit
/// in memory addresses.
pub(crate) fn sample_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(3)
}

pub(crate) fn swap_red_blue(data: &mut [u8]) {
    for pixel in data.chunks_exact_mut(3) {
        pixel.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_one() -> PixelBuffer {
        PixelBuffer::from_raw(2, 1, vec![1, 2, 3, 4, 5, 6], ChannelOrder::Rgb).unwrap()
    }

    #[test]
    fn from_raw_rejects_wrong_length() {
        assert!(PixelBuffer::from_raw(2, 2, vec![0; 11], ChannelOrder::Rgb).is_none());
    }

    #[test]
    fn sample_len_reports_overflow() {
        assert_eq!(sample_len(4, 2), Some(24));
        assert_eq!(sample_len(u32::MAX, u32::MAX), None);
        assert!(PixelBuffer::from_raw(u32::MAX, u32::MAX, Vec::new(), ChannelOrder::Rgb).is_none());
    }

    #[test]
    fn pixel_indexes_row_major() {
        let buf = PixelBuffer::from_raw(2, 2, (0..12).collect(), ChannelOrder::Rgb).unwrap();
        assert_eq!(buf.pixel(0, 1), [3, 4, 5]);
        assert_eq!(buf.pixel(1, 0), [6, 7, 8]);
    }

    #[test]
    fn into_order_swaps_only_when_needed() {
        let bgr = two_by_one().into_order(ChannelOrder::Bgr);
        assert_eq!(bgr.as_bytes(), &[3, 2, 1, 6, 5, 4]);
        assert_eq!(bgr.channel_order(), ChannelOrder::Bgr);

        let same = bgr.clone().into_order(ChannelOrder::Bgr);
        assert_eq!(same, bgr);
    }

    #[test]
    fn to_rgb_image_restores_rgb() {
        let bgr = two_by_one().into_order(ChannelOrder::Bgr);
        let image = bgr.to_rgb_image();
        assert_eq!(image.get_pixel(0, 0).0, [1, 2, 3]);
        assert_eq!(image.get_pixel(1, 0).0, [4, 5, 6]);
    }
}
