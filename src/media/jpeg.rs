//! JPEG stream splitting
//!
//! Encoders writing to a pipe emit back-to-back JPEG images with no framing.
//! [`JpegSplitter`] walks the marker segments of each image to find where it
//! ends:
//!
//! ```text
//! FFD8 | FFEx len ... | FFC0 len P HH WW ... | FFDA len ... <entropy data> | FFD9
//! SOI    APPn           SOF0 (dimensions)      SOS                          EOI
//! ```

use bytes::{Buf, Bytes, BytesMut};

const MARKER: u8 = 0xFF;
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;

/// Drop buffered data once it grows past this without yielding a frame
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Splits a byte stream of concatenated JPEG images into frames
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buf: BytesMut,
    discarded: usize,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append data read from the producer
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Buffer to read into directly
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Take the next complete image, if one is buffered
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            let start = find_soi(&self.buf);
            match start {
                Some(start) => {
                    self.discarded += start;
                    self.buf.advance(start);
                }
                None => {
                    // Keep a trailing 0xFF, it may be the first half of SOI
                    let keep = usize::from(self.buf.last() == Some(&MARKER));
                    let skip = self.buf.len() - keep;
                    self.discarded += skip;
                    self.buf.advance(skip);
                    return None;
                }
            }

            match frame_len(&self.buf) {
                FrameEnd::Complete(len) => return Some(self.buf.split_to(len).freeze()),
                FrameEnd::Incomplete => {
                    if self.buf.len() > MAX_FRAME_SIZE {
                        tracing::warn!(buffered = self.buf.len(), "Oversized JPEG frame dropped");
                        self.discarded += self.buf.len();
                        self.buf.clear();
                    }
                    return None;
                }
                FrameEnd::Corrupt => {
                    // Skip this SOI and resynchronize on the next one
                    self.discarded += 2;
                    self.buf.advance(2);
                }
            }
        }
    }

    /// Bytes skipped while searching for image boundaries
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

/// Width and height from the first SOF segment of a JPEG image
pub fn dimensions(jpeg: &[u8]) -> Option<(u32, u32)> {
    if jpeg.len() < 4 || jpeg[0] != MARKER || jpeg[1] != SOI {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != MARKER {
            return None;
        }
        let marker = jpeg[pos + 1];
        if marker == MARKER {
            pos += 1;
            continue;
        }
        if marker == SOS || marker == EOI {
            return None;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        if is_sof(marker) && pos + 9 <= jpeg.len() {
            let height = u16::from_be_bytes([jpeg[pos + 5], jpeg[pos + 6]]) as u32;
            let width = u16::from_be_bytes([jpeg[pos + 7], jpeg[pos + 8]]) as u32;
            return Some((width, height));
        }
        pos += 2 + len;
    }
    None
}

fn is_sof(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

fn find_soi(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == [MARKER, SOI])
}

#[derive(Debug, PartialEq, Eq)]
enum FrameEnd {
    Complete(usize),
    Incomplete,
    Corrupt,
}

/// Length of the image at the start of `data`, which begins with SOI
fn frame_len(data: &[u8]) -> FrameEnd {
    let mut pos = 2;
    loop {
        if pos + 2 > data.len() {
            return FrameEnd::Incomplete;
        }
        if data[pos] != MARKER {
            return FrameEnd::Corrupt;
        }
        match data[pos + 1] {
            MARKER => pos += 1,
            EOI => return FrameEnd::Complete(pos + 2),
            SOI => return FrameEnd::Corrupt,
            // Standalone markers without a length
            0x01 | 0xD0..=0xD7 => pos += 2,
            marker => {
                if pos + 4 > data.len() {
                    return FrameEnd::Incomplete;
                }
                let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                if len < 2 {
                    return FrameEnd::Corrupt;
                }
                pos += 2 + len;
                if marker == SOS {
                    return match find_eoi(data, pos) {
                        Some(end) => FrameEnd::Complete(end),
                        None => FrameEnd::Incomplete,
                    };
                }
            }
        }
    }
}

/// End of the image after the first scan header at `from`
///
/// Entropy-coded data stuffs 0xFF as `FF 00`, so the first `FF D9` past the
/// scan header is the end of the image, even with further progressive scans.
fn find_eoi(data: &[u8], from: usize) -> Option<usize> {
    let tail = data.get(from..)?;
    tail.windows(2)
        .position(|w| w == [MARKER, EOI])
        .map(|i| from + i + 2)
}
