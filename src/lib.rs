//! Baseline JPEG decoder.
//!
//! Decodes sequential, Huffman-coded, 8-bit JPEG files (the SOF0
//! profile) into RGB pixels plus the embedded comment, if any.
//! Progressive, hierarchical, arithmetic-coded, lossless and 12-bit
//! modes are out of scope, as are restart intervals and multi-scan
//! files; such inputs are rejected with a descriptive [`Error`], so an
//! application can fall back to a fully-featured decoder.
//!
//! The pipeline: the segment parser walks the marker segments and
//! collects quantization tables, Huffman tables, the frame header and
//! the raw entropy-coded scan data; the scan decoder turns the scan into
//! per-channel coefficient blocks; each block is then dequantized,
//! reordered out of zig-zag, run through the inverse DCT, level-shifted,
//! upsampled to the MCU grid and converted from YCbCr to RGB.
//!
//! ```no_run
//! let data = std::fs::read("image.jpg")?;
//! let image = basejpeg::decode(&data)?;
//! println!("{}x{}", image.width(), image.height());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod bits;
mod color;
mod dct;
mod error;
mod file;
mod huffman;
mod metadata;
mod scan;


pub use crate::color::Rgb;
pub use crate::error::{Error, ErrorKind, Result};

use crate::color::ycbcr_to_rgb;
use crate::dct::Idct;
use crate::file::{JpegParser, SegmentKind, Sof, SofMarker, Sos};
use crate::huffman::{HuffmanTable, TableClass, TableStore};
use crate::metadata::{Channel, FrameInfo, QTable, UNZIGZAG};
use crate::scan::{decode_scan, Block, ChannelTables, ScanChannel};

/// Receiver for the decoded image.
///
/// The caller constructs the sink with the image dimensions (see
/// [`read_dimensions`]) before the decode starts. The decoder never
/// writes outside the `width × height` rectangle of the frame header,
/// and it touches the sink only after the entire file has decoded
/// successfully; a failed decode produces no pixels.
pub trait ImageSink {
    fn set_pixel(&mut self, y: usize, x: usize, rgb: Rgb);
    fn set_comment(&mut self, comment: &[u8]);
}

/// A plain in-memory RGB raster implementing [`ImageSink`].
#[derive(Debug)]
pub struct RgbImage {
    width: u16,
    height: u16,
    /// Interleaved RGB rows.
    pixels: Vec<u8>,
    comment: Vec<u8>,
}

impl RgbImage {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; usize::from(width) * usize::from(height) * 3],
            comment: Vec::new(),
        }
    }

    #[inline]
    pub fn width(&self) -> u16 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn pixel(&self, y: usize, x: usize) -> Rgb {
        assert!(y < usize::from(self.height) && x < usize::from(self.width));
        let i = (y * usize::from(self.width) + x) * 3;
        Rgb {
            r: self.pixels[i],
            g: self.pixels[i + 1],
            b: self.pixels[i + 2],
        }
    }

    /// The raster as interleaved RGB rows, top to bottom.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// The raw bytes of the file's first COM segment (empty if none).
    #[inline]
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }
}

impl ImageSink for RgbImage {
    fn set_pixel(&mut self, y: usize, x: usize, rgb: Rgb) {
        debug_assert!(y < usize::from(self.height) && x < usize::from(self.width));
        let i = (y * usize::from(self.width) + x) * 3;
        self.pixels[i] = rgb.r;
        self.pixels[i + 1] = rgb.g;
        self.pixels[i + 2] = rgb.b;
    }

    fn set_comment(&mut self, comment: &[u8]) {
        self.comment = comment.to_vec();
    }
}

/// Decodes an in-memory JPEG file into an [`RgbImage`].
pub fn decode(jpeg: &[u8]) -> Result<RgbImage> {
    let (width, height) = read_dimensions(jpeg)?;
    let mut image = RgbImage::new(width, height);
    Decoder::new().decode(jpeg, &mut image)?;
    Ok(image)
}

/// Parses segments up to the frame header and returns `(width, height)`
/// without touching any entropy-coded data.
pub fn read_dimensions(jpeg: &[u8]) -> Result<(u16, u16)> {
    let mut parser = JpegParser::new(jpeg)?;
    while let Some(segment) = parser.next_segment()? {
        if let SegmentKind::Sof(sof) = segment.kind() {
            return Ok((sof.X(), sof.Y()));
        }
    }
    Err(Error::new(
        ErrorKind::MalformedStream,
        "file contains no frame header",
    ))
}

/// A reusable decode context.
///
/// Owns the IDCT constants and the per-channel MCU sample planes, so
/// repeated decodes do not reallocate them.
pub struct Decoder {
    idct: Idct,
    planes: Vec<Vec<u8>>,
}

/// The fully entropy-decoded scan: the scanned channels in SOS order and
/// their blocks in MCU order.
struct DecodedScan {
    channels: Vec<Channel>,
    blocks: Vec<Vec<Block>>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            idct: Idct::new(),
            planes: Vec::new(),
        }
    }

    /// Decodes `jpeg`, writing every pixel (and the comment, if present)
    /// to `sink`.
    ///
    /// The sink is only written to after the whole file has parsed and
    /// the scan has decoded; on error it stays untouched.
    pub fn decode<S: ImageSink>(&mut self, jpeg: &[u8], sink: &mut S) -> Result<()> {
        let mut parser = JpegParser::new(jpeg)?;
        let mut qtables: [Option<QTable>; 4] = Default::default();
        let mut huffman = TableStore::new();
        let mut frame: Option<FrameInfo> = None;
        let mut comment: Option<&[u8]> = None;
        let mut scan: Option<DecodedScan> = None;

        while let Some(segment) = parser.next_segment()? {
            match segment.into_kind() {
                SegmentKind::Dqt(dqt) => {
                    for table in dqt.tables() {
                        log::trace!("quantization table {}", table.id);
                        let slot = &mut qtables[usize::from(table.id)];
                        if slot.is_some() {
                            return Err(Error::new(
                                ErrorKind::MalformedTable,
                                format!("duplicate quantization table with id {}", table.id),
                            ));
                        }
                        *slot = Some(table.values.clone());
                    }
                }
                SegmentKind::Dht(dht) => {
                    for table in dht.tables() {
                        let class = match table.Tc() {
                            0 => TableClass::Dc,
                            1 => TableClass::Ac,
                            err => {
                                return Err(Error::new(
                                    ErrorKind::MalformedTable,
                                    format!("invalid table class Tc={err} (only 0 and 1 are valid)"),
                                ));
                            }
                        };
                        if table.Th() > 3 {
                            return Err(Error::new(
                                ErrorKind::MalformedTable,
                                format!("invalid huffman table destination Th={}", table.Th()),
                            ));
                        }
                        log::trace!("huffman table {:?} {}", class, table.Th());
                        let built = HuffmanTable::build(table.Li(), table.Vij())?;
                        log::debug!("{built:?}");
                        huffman.set(class, table.Th(), built)?;
                    }
                }
                SegmentKind::Sof(sof) => {
                    frame = Some(read_frame(&sof, frame.is_some())?);
                }
                SegmentKind::Com(com) => {
                    if comment.is_none() {
                        comment = Some(com.bytes());
                    }
                }
                SegmentKind::App(app) => {
                    log::trace!("skipping APP{} segment", app.n());
                }
                SegmentKind::Sos(sos) => {
                    if scan.is_some() {
                        return Err(Error::new(
                            ErrorKind::UnsupportedProfile,
                            "multi-scan files are not supported",
                        ));
                    }
                    let frame = frame.as_ref().ok_or_else(|| {
                        Error::new(
                            ErrorKind::MalformedSegment,
                            "scan header not preceded by a frame header",
                        )
                    })?;
                    scan = Some(read_scan(frame, &sos, &qtables, &huffman)?);
                }
            }
        }

        let (Some(frame), Some(scan)) = (frame, scan) else {
            return Err(Error::new(
                ErrorKind::MalformedStream,
                "file contains no image data",
            ));
        };

        if let Some(comment) = comment {
            sink.set_comment(comment);
        }
        self.render(&frame, &scan, &qtables, sink)
    }

    /// Reconstructs all pixels of the decoded scan and writes them to the
    /// sink, MCU by MCU.
    fn render<S: ImageSink>(
        &mut self,
        frame: &FrameInfo,
        scan: &DecodedScan,
        qtables: &[Option<QTable>; 4],
        sink: &mut S,
    ) -> Result<()> {
        let (width, height) = (usize::from(frame.width), usize::from(frame.height));
        let h_max = usize::from(frame.h_max());
        let v_max = usize::from(frame.v_max());
        let (mcu_w, mcu_h) = (8 * h_max, 8 * v_max);
        let mcus_x = (width + mcu_w - 1) / mcu_w;
        let mcus_y = (height + mcu_h - 1) / mcu_h;

        let mut channel_qtables = Vec::with_capacity(scan.channels.len());
        for ch in &scan.channels {
            channel_qtables.push(qtables[usize::from(ch.qtable)].as_ref().ok_or_else(|| {
                Error::new(
                    ErrorKind::MalformedTable,
                    format!("channel {} references undefined quantization table", ch.id),
                )
            })?);
        }

        self.planes.resize(scan.channels.len(), Vec::new());
        for plane in &mut self.planes {
            plane.clear();
            plane.resize(mcu_w * mcu_h, 0);
        }

        let idct = &self.idct;
        let planes = &mut self.planes;
        let mut next_block = vec![0usize; scan.channels.len()];

        for mcu_y in 0..mcus_y {
            for mcu_x in 0..mcus_x {
                for (c, ch) in scan.channels.iter().enumerate() {
                    let (h, v) = (usize::from(ch.h), usize::from(ch.v));
                    // Nearest-neighbour replication factors for this channel.
                    let (h_scale, v_scale) = (h_max / h, v_max / v);
                    let plane = &mut planes[c];

                    for block_v in 0..v {
                        for block_h in 0..h {
                            let coeffs = &scan.blocks[c][next_block[c]];
                            next_block[c] += 1;
                            let samples = reconstruct(idct, coeffs, channel_qtables[c]);

                            let block_y = block_v * 8 * v_scale;
                            let block_x = block_h * 8 * h_scale;
                            for ly in 0..8 {
                                for lx in 0..8 {
                                    let value = samples[ly * 8 + lx];
                                    let y = block_y + ly * v_scale;
                                    let x = block_x + lx * h_scale;
                                    for row in plane[y * mcu_w..].chunks_mut(mcu_w).take(v_scale) {
                                        row[x..x + h_scale].fill(value);
                                    }
                                }
                            }
                        }
                    }
                }

                // All channels of this MCU are materialized; emit its pixels.
                for dy in 0..mcu_h {
                    let y = mcu_y * mcu_h + dy;
                    if y >= height {
                        break;
                    }
                    for dx in 0..mcu_w {
                        let x = mcu_x * mcu_w + dx;
                        if x >= width {
                            break;
                        }
                        let i = dy * mcu_w + dx;
                        let (lum, cb, cr) = match planes.as_slice() {
                            [l] => (l[i], 128, 128),
                            [l, cb] => (l[i], cb[i], 128),
                            [l, cb, cr] => (l[i], cb[i], cr[i]),
                            _ => unreachable!(),
                        };
                        sink.set_pixel(y, x, ycbcr_to_rgb(lum, cb, cr));
                    }
                }
            }
        }

        Ok(())
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates an SOF segment against the baseline profile and converts it
/// into owned frame metadata.
fn read_frame(sof: &Sof<'_>, seen_frame: bool) -> Result<FrameInfo> {
    if seen_frame {
        return Err(Error::new(
            ErrorKind::UnsupportedProfile,
            "encountered multiple SOF markers",
        ));
    }
    if sof.sof() != SofMarker::SOF0 {
        return Err(Error::new(
            ErrorKind::UnsupportedProfile,
            format!("not a baseline JPEG (SOF={:?})", sof.sof()),
        ));
    }
    if sof.P() != 8 {
        return Err(Error::new(
            ErrorKind::UnsupportedProfile,
            format!("sample precision of {} bits is not supported", sof.P()),
        ));
    }
    if sof.X() == 0 || sof.Y() == 0 {
        return Err(Error::new(
            ErrorKind::MalformedSegment,
            "frame with zero width or height",
        ));
    }
    if sof.components().is_empty() || sof.components().len() > 4 {
        return Err(Error::new(
            ErrorKind::MalformedSegment,
            format!(
                "frame with {} components (1-4 are valid)",
                sof.components().len()
            ),
        ));
    }

    let mut channels = Vec::with_capacity(sof.components().len());
    for component in sof.components() {
        log::trace!("frame component: {:?}", component);
        if !(1..=4).contains(&component.Hi()) || !(1..=4).contains(&component.Vi()) {
            return Err(Error::new(
                ErrorKind::MalformedSegment,
                format!(
                    "invalid sampling factors {}x{} for component {}",
                    component.Hi(),
                    component.Vi(),
                    component.Ci(),
                ),
            ));
        }
        if component.Tqi() > 3 {
            return Err(Error::new(
                ErrorKind::MalformedSegment,
                format!(
                    "invalid quantization table selection {} (only tables 0-3 are valid)",
                    component.Tqi(),
                ),
            ));
        }
        if channels.iter().any(|c: &Channel| c.id == component.Ci()) {
            return Err(Error::new(
                ErrorKind::MalformedSegment,
                format!("duplicate component id {} in frame header", component.Ci()),
            ));
        }
        channels.push(Channel {
            id: component.Ci(),
            h: component.Hi(),
            v: component.Vi(),
            qtable: component.Tqi(),
        });
    }

    Ok(FrameInfo {
        width: sof.X(),
        height: sof.Y(),
        channels,
    })
}

/// Validates an SOS header against the frame and the defined tables, then
/// entropy-decodes the scan.
fn read_scan(
    frame: &FrameInfo,
    sos: &Sos<'_>,
    qtables: &[Option<QTable>; 4],
    huffman: &TableStore,
) -> Result<DecodedScan> {
    if sos.Ss() != 0 || sos.Se() != 63 || sos.Ah() != 0 || sos.Al() != 0 {
        return Err(Error::new(
            ErrorKind::MalformedSegment,
            format!(
                "non-baseline scan header (Ss={} Se={} Ah={} Al={})",
                sos.Ss(),
                sos.Se(),
                sos.Ah(),
                sos.Al(),
            ),
        ));
    }
    if sos.components().is_empty() || sos.components().len() > frame.channels.len() {
        return Err(Error::new(
            ErrorKind::MalformedSegment,
            format!(
                "scan with {} components in a frame with {}",
                sos.components().len(),
                frame.channels.len(),
            ),
        ));
    }
    if sos.components().len() > 3 {
        return Err(Error::new(
            ErrorKind::UnsupportedColorspace,
            format!(
                "no color interpretation for {} channels",
                sos.components().len()
            ),
        ));
    }

    for channel in &frame.channels {
        if qtables[usize::from(channel.qtable)].is_none() {
            return Err(Error::new(
                ErrorKind::MalformedTable,
                format!(
                    "channel {} references undefined quantization table {}",
                    channel.id, channel.qtable,
                ),
            ));
        }
    }

    let mut scan_channels = Vec::with_capacity(sos.components().len());
    for component in sos.components() {
        log::trace!("scan component: {:?}", component);
        let channel = *frame.by_id(component.Csj())?;
        let h_scale = frame.h_max() / channel.h;
        let v_scale = frame.v_max() / channel.v;
        if frame.h_max() % channel.h != 0
            || frame.v_max() % channel.v != 0
            || !matches!(h_scale, 1 | 2 | 4)
            || !matches!(v_scale, 1 | 2 | 4)
        {
            return Err(Error::new(
                ErrorKind::UnsupportedProfile,
                format!(
                    "unsupported subsampling {}x{} for channel {} (max {}x{})",
                    channel.h,
                    channel.v,
                    channel.id,
                    frame.h_max(),
                    frame.v_max(),
                ),
            ));
        }
        scan_channels.push(ScanChannel {
            channel,
            tables: ChannelTables {
                dc: huffman.get(TableClass::Dc, component.Tdj())?,
                ac: huffman.get(TableClass::Ac, component.Taj())?,
            },
        });
    }

    let blocks = decode_scan(sos.data(), frame, &scan_channels)?;
    Ok(DecodedScan {
        channels: scan_channels.into_iter().map(|s| s.channel).collect(),
        blocks,
    })
}

/// Turns one zig-zag coefficient block into level-shifted spatial samples.
fn reconstruct(idct: &Idct, coeffs: &Block, qtable: &QTable) -> [u8; 64] {
    // Dequantize while undoing the zig-zag serialization.
    let mut natural = [0i32; 64];
    for (zz, &coeff) in coeffs.iter().enumerate() {
        let nat = UNZIGZAG[zz];
        natural[nat] = i32::from(coeff) * i32::from(qtable.values[nat]);
    }

    let spatial = idct.inverse(&natural);

    let mut samples = [0; 64];
    for (out, &s) in samples.iter_mut().zip(&spatial) {
        *out = (i32::from(s) + 128).clamp(0, 255) as u8;
    }
    samples
}
