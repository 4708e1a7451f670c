//! JPEG/JFIF segment parser.
//!
//! Walks the marker segments of a baseline JPEG byte stream and produces
//! typed views of their contents. Only the baseline marker set is
//! recognized; any other marker aborts the parse. The entropy-coded data
//! following an SOS header is captured as a raw byte range (including any
//! `FF 00` stuffing sequences) for the scan decoder to consume.

#![allow(non_snake_case, dead_code)]


use std::{fmt, mem};

use bytemuck::AnyBitPattern;

use crate::error::{Error, ErrorKind, Result};
use crate::metadata::{QTable, UNZIGZAG};

pub struct JpegParser<'a> {
    reader: Reader<'a>,
}

impl<'a> JpegParser<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(buf, ErrorKind::UnexpectedEof);
        if [reader.read_u8()?, reader.read_u8()?] != [0xFF, 0xD8] {
            return Err(Error::new(
                ErrorKind::NoSoi,
                "JPEG image does not start with SOI marker",
            ));
        }
        Ok(Self { reader })
    }

    /// Reads the next [`Segment`] from the JPEG data.
    ///
    /// `SOI`/`EOI` markers are handled internally and never returned:
    /// `SOI` is consumed in [`JpegParser::new`], and `EOI` yields
    /// `Ok(None)`, signaling the end of the image. Data stored after the
    /// EOI marker can be retrieved via [`JpegParser::remaining`].
    pub fn next_segment(&mut self) -> Result<Option<Segment<'a>>> {
        let segment_offset = self.reader.position;
        let word = self.reader.read_u16()?;

        if word == 0xFFD9 {
            if !self.reader.remaining().is_empty() {
                log::warn!(
                    "ignoring {} trailing bytes after EOI",
                    self.reader.remaining().len()
                );
            }
            return Ok(None);
        }
        if word == 0xFFD8 {
            return Err(Error::new(
                ErrorKind::MalformedSegment,
                "second SOI marker in stream",
            ));
        }

        let marker = match word.to_be_bytes() {
            [0xFF, m @ (0xDB | 0xC4 | 0xDA | 0xFE)] => m,
            [0xFF, m @ (0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF)] => m,
            [0xFF, m @ 0xE0..=0xEF] => m,
            _ => {
                return Err(Error::new(
                    ErrorKind::UnsupportedMarker,
                    format!("unsupported marker {:02x} {:02x}", word >> 8, word & 0xFF),
                ));
            }
        };

        let length = self.reader.read_length()?;
        let expected_end = self.reader.position + length;
        let mut reader = Reader {
            buf: &self.reader.buf[..expected_end],
            position: self.reader.position,
            eof_kind: ErrorKind::MalformedSegment,
        };

        let kind = match marker {
            0xDB => SegmentKind::Dqt(Self::read_dqt(&mut reader)?),
            0xC4 => SegmentKind::Dht(Self::read_dht(&mut reader)?),
            0xC0..=0xCF => SegmentKind::Sof(Self::read_sof(marker, &mut reader)?),
            0xFE => SegmentKind::Com(Com {
                com: reader.read_slice(reader.remaining().len())?,
            }),
            0xE0..=0xEF => {
                // APPn payloads are skipped regardless of content.
                reader.position = expected_end;
                SegmentKind::App(App { n: marker - 0xE0 })
            }
            0xDA => {
                let sos = Self::read_sos_header(&mut reader)?;
                Self::check_consumed(&reader, marker, length, expected_end)?;
                self.reader.position = expected_end;
                let data = self.read_scan_data()?;
                return Ok(Some(Segment {
                    marker,
                    offset: segment_offset,
                    kind: SegmentKind::Sos(Sos {
                        components: sos.0,
                        Ss: sos.1,
                        Se: sos.2,
                        AhAl: sos.3,
                        data,
                    }),
                }));
            }
            _ => unreachable!(),
        };

        Self::check_consumed(&reader, marker, length, expected_end)?;
        self.reader.position = expected_end;

        Ok(Some(Segment {
            marker,
            offset: segment_offset,
            kind,
        }))
    }

    /// Returns the remaining (unparsed) bytes of the input data.
    pub fn remaining(&self) -> &'a [u8] {
        self.reader.remaining()
    }

    fn check_consumed(
        reader: &Reader<'a>,
        marker: u8,
        length: usize,
        expected_end: usize,
    ) -> Result<()> {
        if reader.position != expected_end {
            let consumed = length - (expected_end - reader.position);
            return Err(Error::new(
                ErrorKind::MalformedSegment,
                format!(
                    "ff {marker:02x} segment declares a length of {length} bytes, \
                     but decoding consumed {consumed}"
                ),
            ));
        }
        Ok(())
    }

    fn read_dqt(reader: &mut Reader<'a>) -> Result<Dqt> {
        let mut tables = Vec::new();
        while !reader.remaining().is_empty() {
            let PqTq = reader.read_u8()?;
            let (Pq, Tq) = (PqTq >> 4, PqTq & 0xF);
            if Tq > 3 {
                return Err(Error::new(
                    ErrorKind::MalformedTable,
                    format!("invalid quantization table destination Tq={Tq} (0-3 are valid)"),
                ));
            }

            // Elements arrive in zig-zag order; store them in natural order.
            let mut values = [0u16; 64];
            match Pq {
                0 => {
                    let Qk = reader.read_slice(64)?;
                    for (i, &q) in Qk.iter().enumerate() {
                        values[UNZIGZAG[i]] = u16::from(q);
                    }
                }
                1 => {
                    for i in 0..64 {
                        values[UNZIGZAG[i]] = reader.read_u16()?;
                    }
                }
                _ => {
                    return Err(Error::new(
                        ErrorKind::MalformedTable,
                        format!("invalid quantization table precision Pq={Pq} (0 or 1 are valid)"),
                    ));
                }
            }

            tables.push(DqtTable {
                id: Tq,
                values: QTable { values },
            });
        }
        Ok(Dqt { tables })
    }

    fn read_dht(reader: &mut Reader<'a>) -> Result<Dht<'a>> {
        let mut tables = Vec::new();
        while !reader.remaining().is_empty() {
            let header: &DhtHeader = reader.read_obj()?;
            let values = reader.read_slice(header.num_values())?;
            tables.push(DhtTable {
                header,
                Vij: values,
            });
        }
        Ok(Dht { tables })
    }

    fn read_sof(sof: u8, reader: &mut Reader<'a>) -> Result<Sof<'a>> {
        let P = reader.read_u8()?;
        let Y = reader.read_u16()?;
        let X = reader.read_u16()?;
        let num_components = reader.read_u8()?;
        let components = reader.read_objs::<FrameComponent>(num_components.into())?;
        Ok(Sof {
            sof: SofMarker(sof),
            P,
            Y,
            X,
            components,
        })
    }

    fn read_sos_header(reader: &mut Reader<'a>) -> Result<(&'a [ScanComponent], u8, u8, u8)> {
        let num_components = reader.read_u8()?;
        let components = reader.read_objs(num_components.into())?;
        let Ss = reader.read_u8()?;
        let Se = reader.read_u8()?;
        let AhAl = reader.read_u8()?;
        Ok((components, Ss, Se, AhAl))
    }

    /// Advances past the entropy-coded data following an SOS header.
    ///
    /// The data ends at the first marker other than a `FF 00` stuffing
    /// sequence or an `RSTn` marker; both of those stay part of the
    /// returned range (the scan decoder resolves stuffing and rejects
    /// embedded restart markers).
    fn read_scan_data(&mut self) -> Result<&'a [u8]> {
        let data_start = self.reader.position;
        loop {
            while self.reader.peek_u8(0)? != 0xFF {
                self.reader.position += 1;
            }

            let mut offset = 1;
            let mut byte = self.reader.peek_u8(offset)?;
            while byte == 0xFF {
                offset += 1;
                byte = self.reader.peek_u8(offset)?;
            }

            match byte {
                0x00 | 0xD0..=0xD7 => {
                    self.reader.position += offset + 1;
                }
                _ => {
                    self.reader.position += offset - 1;
                    break;
                }
            }
        }

        Ok(&self.reader.buf[data_start..self.reader.position])
    }
}

#[derive(Debug)]
struct Reader<'a> {
    buf: &'a [u8],
    position: usize,
    /// Kind reported on exhaustion: end-of-file at the top level, a
    /// framing inconsistency inside a length-bounded segment.
    eof_kind: ErrorKind,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], eof_kind: ErrorKind) -> Self {
        Self {
            buf,
            position: 0,
            eof_kind,
        }
    }

    fn eof_error(&self) -> Error {
        match self.eof_kind {
            ErrorKind::MalformedSegment => Error::new(
                self.eof_kind,
                "segment contents exceed the declared segment length",
            ),
            _ => Error::new(
                self.eof_kind,
                "reached end of data while decoding JPEG stream",
            ),
        }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.position..]
    }

    fn peek_u8(&self, offset: usize) -> Result<u8> {
        match self.buf.get(self.position + offset) {
            Some(&byte) => Ok(byte),
            None => Err(self.eof_error()),
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let res = self.peek_u8(0);
        if res.is_ok() {
            self.position += 1;
        }
        res
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = [self.read_u8()?, self.read_u8()?];
        Ok(u16::from_be_bytes(b))
    }

    fn read_slice(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining().len() < count {
            Err(self.eof_error())
        } else {
            let slice = &self.remaining()[..count];
            self.position += count;
            Ok(slice)
        }
    }

    fn read_obj<T: AnyBitPattern>(&mut self) -> Result<&'a T> {
        assert_eq!(mem::align_of::<T>(), 1);

        let object = bytemuck::from_bytes(self.read_slice(mem::size_of::<T>())?);
        Ok(object)
    }

    fn read_objs<T: AnyBitPattern>(&mut self, count: usize) -> Result<&'a [T]> {
        assert_eq!(mem::align_of::<T>(), 1);

        let slice = bytemuck::cast_slice(self.read_slice(count * mem::size_of::<T>())?);
        Ok(slice)
    }

    /// Reads a segment length parameter and returns the number of
    /// parameter bytes that follow it (the raw value includes the two
    /// length bytes themselves).
    fn read_length(&mut self) -> Result<usize> {
        let len = self.read_u16()?;
        if len < 2 {
            return Err(Error::new(
                ErrorKind::MalformedSegment,
                format!("invalid segment length {len}"),
            ));
        }
        let len = usize::from(len - 2);
        if self.remaining().len() < len {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "reached end of data while decoding JPEG stream",
            ));
        }
        Ok(len)
    }
}

/// A segment of a JPEG file, introduced by a `0xFF 0xXX` marker.
#[derive(Debug)]
pub struct Segment<'a> {
    marker: u8,
    offset: usize,
    kind: SegmentKind<'a>,
}

impl<'a> Segment<'a> {
    /// Returns the offset of the segment's `0xFF 0xXX` marker in the
    /// input buffer.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the value of the marker byte indicating the type of the
    /// segment.
    #[inline]
    pub fn marker(&self) -> u8 {
        self.marker
    }

    #[inline]
    pub fn kind(&self) -> &SegmentKind<'a> {
        &self.kind
    }

    #[inline]
    pub fn into_kind(self) -> SegmentKind<'a> {
        self.kind
    }
}

/// Enumeration of segment kinds understood by this parser.
pub enum SegmentKind<'a> {
    Dqt(Dqt),
    Dht(Dht<'a>),
    Sof(Sof<'a>),
    Sos(Sos<'a>),
    Com(Com<'a>),
    App(App),
}

impl<'a> fmt::Debug for SegmentKind<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentKind::Dqt(v) => v.fmt(f),
            SegmentKind::Dht(v) => v.fmt(f),
            SegmentKind::Sof(v) => v.fmt(f),
            SegmentKind::Sos(v) => v.fmt(f),
            SegmentKind::Com(v) => v.fmt(f),
            SegmentKind::App(v) => v.fmt(f),
        }
    }
}

/// One quantization table from a DQT segment, already widened to `u16`
/// and reordered to natural order.
pub struct DqtTable {
    pub id: u8,
    pub values: QTable,
}

/// **D**efine **Q**uantization **T**ables – sets one or more tables.
pub struct Dqt {
    tables: Vec<DqtTable>,
}

impl Dqt {
    #[inline]
    pub fn tables(&self) -> impl Iterator<Item = &DqtTable> {
        self.tables.iter()
    }
}

impl fmt::Debug for Dqt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<u8> = self.tables.iter().map(|t| t.id).collect();
        f.debug_struct("Dqt").field("ids", &ids).finish()
    }
}

#[derive(Clone, Copy, AnyBitPattern)]
#[repr(C)]
struct DhtHeader {
    TcTh: u8,
    Li: [u8; 16],
}

impl DhtHeader {
    fn num_values(&self) -> usize {
        self.Li.iter().map(|l| *l as usize).sum()
    }
}

pub struct DhtTable<'a> {
    header: &'a DhtHeader,
    Vij: &'a [u8],
}

impl<'a> DhtTable<'a> {
    /// Returns the table class (0 = DC, 1 = AC).
    #[inline]
    pub fn Tc(&self) -> u8 {
        self.header.TcTh >> 4
    }

    /// Returns the table destination identifier (0-3).
    #[inline]
    pub fn Th(&self) -> u8 {
        self.header.TcTh & 0xF
    }

    /// Returns an array containing the number of codes of each length.
    #[inline]
    pub fn Li(&self) -> &[u8; 16] {
        &self.header.Li
    }

    /// Returns the values associated with each huffman code.
    #[inline]
    pub fn Vij(&self) -> &[u8] {
        self.Vij
    }
}

/// **D**efine **H**uffman **T**ables – defines one or more tables.
pub struct Dht<'a> {
    tables: Vec<DhtTable<'a>>,
}

impl<'a> Dht<'a> {
    pub fn tables(&self) -> impl Iterator<Item = &DhtTable<'a>> {
        self.tables.iter()
    }
}

impl<'a> fmt::Debug for Dht<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables: Vec<(u8, u8)> = self.tables.iter().map(|t| (t.Tc(), t.Th())).collect();
        f.debug_struct("Dht").field("tables", &tables).finish()
    }
}

/// **S**tart **O**f **F**rame.
#[derive(Debug)]
pub struct Sof<'a> {
    /// The SOF marker.
    sof: SofMarker,
    /// Sample precision in bits.
    P: u8,
    Y: u16,
    X: u16,
    components: &'a [FrameComponent],
}

impl<'a> Sof<'a> {
    #[inline]
    pub fn sof(&self) -> SofMarker {
        self.sof
    }

    /// Returns the sample precision in bits.
    #[inline]
    pub fn P(&self) -> u8 {
        self.P
    }

    /// Returns the number of lines in the image (the height of the frame).
    #[inline]
    pub fn Y(&self) -> u16 {
        self.Y
    }

    /// Returns the number of samples per line (the width of the frame).
    #[inline]
    pub fn X(&self) -> u16 {
        self.X
    }

    #[inline]
    pub fn components(&self) -> &'a [FrameComponent] {
        self.components
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SofMarker(u8);

impl fmt::Debug for SofMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SOF0 => f.write_str("SOF0"),
            Self::SOF1 => f.write_str("SOF1"),
            Self::SOF2 => f.write_str("SOF2"),
            Self::SOF3 => f.write_str("SOF3"),
            Self::SOF5 => f.write_str("SOF5"),
            Self::SOF6 => f.write_str("SOF6"),
            Self::SOF7 => f.write_str("SOF7"),
            Self::SOF9 => f.write_str("SOF9"),
            Self::SOF10 => f.write_str("SOF10"),
            Self::SOF11 => f.write_str("SOF11"),
            Self::SOF13 => f.write_str("SOF13"),
            Self::SOF14 => f.write_str("SOF14"),
            Self::SOF15 => f.write_str("SOF15"),
            _ => f
                .debug_tuple("SofMarker")
                .field(&format_args!("{:02x}", self.0))
                .finish(),
        }
    }
}

impl SofMarker {
    /// Baseline DCT.
    pub const SOF0: Self = Self(0xC0);
    /// Extended Sequential DCT.
    pub const SOF1: Self = Self(0xC1);
    /// Progressive DCT.
    pub const SOF2: Self = Self(0xC2);
    /// Lossless sequential.
    pub const SOF3: Self = Self(0xC3);
    /// Differential sequential DCT.
    pub const SOF5: Self = Self(0xC5);
    /// Differential progressive DCT.
    pub const SOF6: Self = Self(0xC6);
    /// Differential lossless (sequential).
    pub const SOF7: Self = Self(0xC7);
    /// Extended sequential DCT.
    pub const SOF9: Self = Self(0xC9);
    /// Progressive DCT.
    pub const SOF10: Self = Self(0xCA);
    /// Lossless (sequential).
    pub const SOF11: Self = Self(0xCB);
    /// Differential sequential DCT.
    pub const SOF13: Self = Self(0xCD);
    /// Differential progressive DCT.
    pub const SOF14: Self = Self(0xCE);
    /// Differential lossless (sequential).
    pub const SOF15: Self = Self(0xCF);
}

#[derive(Clone, Copy, AnyBitPattern)]
#[repr(C)]
pub struct FrameComponent {
    Ci: u8,
    HiVi: u8,
    Tqi: u8,
}

impl FrameComponent {
    /// Returns this component's component identifier.
    ///
    /// The component identifier is an arbitrary 8-bit value that uniquely
    /// identifies each component. The scan header ([`Sos`]) refers to
    /// components using their identifier.
    #[inline]
    pub fn Ci(&self) -> u8 {
        self.Ci
    }

    /// Returns the horizontal sampling factor for this component.
    #[inline]
    pub fn Hi(&self) -> u8 {
        self.HiVi >> 4
    }

    /// Returns the vertical sampling factor for this component.
    #[inline]
    pub fn Vi(&self) -> u8 {
        self.HiVi & 0xF
    }

    /// Returns the index of the quantization table to use for this
    /// component (0-3).
    #[inline]
    pub fn Tqi(&self) -> u8 {
        self.Tqi
    }
}

impl fmt::Debug for FrameComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameComponent")
            .field("Ci", &self.Ci)
            .field("Hi", &self.Hi())
            .field("Vi", &self.Vi())
            .field("Tqi", &self.Tqi)
            .finish()
    }
}

/// **S**tart **O**f **S**can – a scan header, followed by entropy-coded
/// scan data.
pub struct Sos<'a> {
    components: &'a [ScanComponent],
    Ss: u8,
    Se: u8,
    AhAl: u8,
    data: &'a [u8],
}

impl<'a> Sos<'a> {
    #[inline]
    pub fn components(&self) -> &'a [ScanComponent] {
        self.components
    }

    #[inline]
    pub fn Ss(&self) -> u8 {
        self.Ss
    }

    #[inline]
    pub fn Se(&self) -> u8 {
        self.Se
    }

    #[inline]
    pub fn Ah(&self) -> u8 {
        self.AhAl >> 4
    }

    #[inline]
    pub fn Al(&self) -> u8 {
        self.AhAl & 0xF
    }

    /// Returns the entropy-coded data following the scan header, with
    /// byte-stuffing sequences still in place.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> fmt::Debug for Sos<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sos")
            .field("components", &self.components)
            .field("Ss", &self.Ss)
            .field("Se", &self.Se)
            .field("Ah", &self.Ah())
            .field("Al", &self.Al())
            .field("data_len", &self.data.len())
            .finish()
    }
}

#[derive(Clone, Copy, AnyBitPattern)]
#[repr(C)]
pub struct ScanComponent {
    Csj: u8,
    TdjTaj: u8,
}

impl ScanComponent {
    /// Returns the scan component selector.
    #[inline]
    pub fn Csj(&self) -> u8 {
        self.Csj
    }

    /// Returns the DC entropy coding table destination selector.
    #[inline]
    pub fn Tdj(&self) -> u8 {
        self.TdjTaj >> 4
    }

    /// Returns the AC entropy coding table destination selector.
    #[inline]
    pub fn Taj(&self) -> u8 {
        self.TdjTaj & 0xF
    }
}

impl fmt::Debug for ScanComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanComponent")
            .field("Csj", &self.Csj)
            .field("Tdj", &self.Tdj())
            .field("Taj", &self.Taj())
            .finish()
    }
}

/// **COM** – a comment segment carrying arbitrary bytes.
pub struct Com<'a> {
    com: &'a [u8],
}

impl<'a> Com<'a> {
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.com
    }
}

impl<'a> fmt::Debug for Com<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Com(\"{}\")", self.com.escape_ascii())
    }
}

/// An application-specific segment (`APPn`); the payload is skipped.
#[derive(Debug)]
pub struct App {
    n: u8,
}

impl App {
    /// Returns the type of APP marker (the `n` in `APPn`), in `0..=15`.
    #[inline]
    pub fn n(&self) -> u8 {
        self.n
    }
}
