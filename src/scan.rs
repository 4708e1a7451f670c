//! Entropy-coded scan decoding.
//!
//! Reads the Huffman-coded DC/AC coefficient stream of a baseline scan
//! into per-channel block lists. Blocks are produced in MCU order: MCU
//! rows top to bottom, MCUs left to right, channels in SOS order, and
//! within a channel its `v × h` blocks row-major. Each block is 64
//! coefficients in zig-zag order.

use crate::bits::BitReader;
use crate::error::{Error, ErrorKind, Result};
use crate::huffman::HuffmanTable;
use crate::metadata::{Channel, FrameInfo};

/// One decoded 8×8 block, in zig-zag order.
pub type Block = [i16; 64];

/// The Huffman tables a scan channel decodes with.
pub struct ChannelTables<'t> {
    pub dc: &'t HuffmanTable,
    pub ac: &'t HuffmanTable,
}

/// One channel of a scan: its frame parameters plus its table selection.
pub struct ScanChannel<'t> {
    pub channel: Channel,
    pub tables: ChannelTables<'t>,
}

pub struct EntropyDecoder<'a> {
    bits: BitReader<'a>,
    /// Running DC predictor per scan channel.
    predictors: [i16; 4],
}

impl<'a> EntropyDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            bits: BitReader::new(data),
            predictors: [0; 4],
        }
    }

    fn read_symbol(&mut self, table: &HuffmanTable) -> Result<u8> {
        let mut walker = table.walker();
        loop {
            if let Some(symbol) = walker.step(self.bits.read_bit()?)? {
                return Ok(symbol);
            }
        }
    }

    /// Reads one 8×8 block for scan channel `channel`.
    ///
    /// The DC coefficient is coded as a difference against the channel's
    /// previous block; AC coefficients as (zero-run, size) pairs with the
    /// `(0,0)` end-of-block and `(15,0)` 16-zero-run escapes.
    pub fn read_block(&mut self, channel: usize, tables: &ChannelTables<'_>) -> Result<Block> {
        let mut coeffs = [0; 64];

        let dc_size = self.read_symbol(tables.dc)?;
        if dc_size > 15 {
            return Err(Error::new(
                ErrorKind::MalformedStream,
                format!("DC coefficient size {dc_size} out of range"),
            ));
        }
        let diff = self.bits.read_bits_signed(dc_size)?;
        self.predictors[channel] = self.predictors[channel].wrapping_add(diff);
        coeffs[0] = self.predictors[channel];

        let mut index = 1;
        while index < 64 {
            let symbol = self.read_symbol(tables.ac)?;
            if symbol == 0 {
                break; // end of block, the rest stays zero
            }

            let run = usize::from(symbol >> 4);
            let size = symbol & 0xF;
            if size == 0 && run != 15 {
                return Err(Error::new(
                    ErrorKind::MalformedStream,
                    format!("AC run of {run} zeros with no coefficient"),
                ));
            }
            if index + run + 1 > 64 {
                return Err(Error::new(
                    ErrorKind::MalformedStream,
                    "AC coefficients overrun the block",
                ));
            }

            index += run;
            coeffs[index] = self.bits.read_bits_signed(size)?;
            index += 1;
        }

        Ok(coeffs)
    }
}

/// Decodes the entire entropy-coded segment of a scan into per-channel
/// block lists.
pub fn decode_scan(
    data: &[u8],
    frame: &FrameInfo,
    channels: &[ScanChannel<'_>],
) -> Result<Vec<Vec<Block>>> {
    let mcu_w = usize::from(8 * frame.h_max());
    let mcu_h = usize::from(8 * frame.v_max());
    let mcus_x = (usize::from(frame.width) + mcu_w - 1) / mcu_w;
    let mcus_y = (usize::from(frame.height) + mcu_h - 1) / mcu_h;

    log::trace!(
        "decoding scan: {mcus_x}x{mcus_y} MCUs of {mcu_w}x{mcu_h} px, {} channels",
        channels.len(),
    );

    let mut decoder = EntropyDecoder::new(data);
    let mut blocks: Vec<Vec<Block>> = channels
        .iter()
        .map(|ch| {
            let per_mcu = usize::from(ch.channel.h) * usize::from(ch.channel.v);
            Vec::with_capacity(mcus_x * mcus_y * per_mcu)
        })
        .collect();

    for _mcu_y in 0..mcus_y {
        for _mcu_x in 0..mcus_x {
            for (c, ch) in channels.iter().enumerate() {
                let per_mcu = usize::from(ch.channel.h) * usize::from(ch.channel.v);
                for _ in 0..per_mcu {
                    blocks[c].push(decoder.read_block(c, &ch.tables)?);
                }
            }
        }
    }

    Ok(blocks)
}
