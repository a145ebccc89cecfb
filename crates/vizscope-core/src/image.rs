use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageDecodeError {
    #[error("payload is not a base64 data URI")]
    NotDataUri,
    #[error("base64 decode failed: {0}")]
    Base64(String),
    #[error("image decode failed: {0}")]
    Image(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DecodedImage {
    /// Average color, used by painters that cannot blit pixels.
    pub fn mean_rgba(&self) -> [u8; 4] {
        let pixels = self.rgba.len() / 4;
        if pixels == 0 {
            return [0, 0, 0, 0];
        }
        let mut sums = [0u64; 4];
        for px in self.rgba.chunks_exact(4) {
            for (sum, channel) in sums.iter_mut().zip(px) {
                *sum += u64::from(*channel);
            }
        }
        sums.map(|sum| (sum / pixels as u64) as u8)
    }
}

pub fn decode_data_uri(uri: &str) -> Result<DecodedImage, ImageDecodeError> {
    let rest = uri.strip_prefix("data:").ok_or(ImageDecodeError::NotDataUri)?;
    let (meta, payload) = rest.split_once(',').ok_or(ImageDecodeError::NotDataUri)?;
    if !meta.ends_with(";base64") {
        return Err(ImageDecodeError::NotDataUri);
    }
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|err| ImageDecodeError::Base64(err.to_string()))?;
    let decoded =
        image::load_from_memory(&bytes).map_err(|err| ImageDecodeError::Image(err.to_string()))?;
    let rgba = decoded.to_rgba8();
    Ok(DecodedImage {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    })
}

/// Buffer ids are only unique within the message that carried them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageKey {
    pub frame_number: u64,
    pub buff_id: i64,
}

impl ImageKey {
    pub fn new(frame_number: u64, buff_id: i64) -> Self {
        Self {
            frame_number,
            buff_id,
        }
    }
}

/// Decoded `buff_map` payloads, scoped to the frame that carried them.
/// Lookups of keys still being decoded return `None`.
#[derive(Debug, Default)]
pub struct ImageStore {
    ready: HashMap<ImageKey, Arc<DecodedImage>>,
    pending: HashSet<ImageKey>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` as pending. Returns false if it is already pending or
    /// resolved.
    pub fn begin(&mut self, key: ImageKey) -> bool {
        if self.ready.contains_key(&key) {
            return false;
        }
        self.pending.insert(key)
    }

    /// Stores a finished decode. Results for keys that are no longer
    /// pending (their frame was dropped meanwhile) are discarded.
    pub fn resolve(&mut self, key: ImageKey, image: DecodedImage) -> bool {
        if !self.pending.remove(&key) {
            return false;
        }
        self.ready.insert(key, Arc::new(image));
        true
    }

    pub fn fail(&mut self, key: ImageKey) {
        self.pending.remove(&key);
    }

    pub fn get(&self, key: ImageKey) -> Option<&Arc<DecodedImage>> {
        self.ready.get(&key)
    }

    pub fn is_pending(&self, key: ImageKey) -> bool {
        self.pending.contains(&key)
    }

    /// Forgets every image of `frame_number`, decoded or pending.
    pub fn drop_frame(&mut self, frame_number: u64) {
        self.ready.retain(|key, _| key.frame_number != frame_number);
        self.pending.retain(|key| key.frame_number != frame_number);
    }

    pub fn clear(&mut self) {
        self.ready.clear();
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn png_data_uri(width: u32, height: u32, rgba: [u8; 4]) -> String {
    use std::io::Cursor;
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encode png");
    format!(
        "data:image/png;base64,{}",
        STANDARD.encode(bytes.into_inner())
    )
}
