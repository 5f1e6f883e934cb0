/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! ISO-BMFF box walking for the first video track, progressive and fragmented.

use crate::error::IngestError;
use std::collections::HashSet;

type Result<T> = std::result::Result<T, IngestError>;

/// `sample_is_non_sync_sample` bit of the ISO-BMFF sample flags.
const SAMPLE_FLAG_NON_SYNC: u32 = 0x0001_0000;

// tfhd flags
const TFHD_BASE_DATA_OFFSET: u32 = 0x00_0001;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x00_0002;
const TFHD_DEFAULT_DURATION: u32 = 0x00_0008;
const TFHD_DEFAULT_SIZE: u32 = 0x00_0010;
const TFHD_DEFAULT_FLAGS: u32 = 0x00_0020;

// trun flags
const TRUN_DATA_OFFSET: u32 = 0x00_0001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x00_0004;
const TRUN_SAMPLE_DURATION: u32 = 0x00_0100;
const TRUN_SAMPLE_SIZE: u32 = 0x00_0200;
const TRUN_SAMPLE_FLAGS: u32 = 0x00_0400;
const TRUN_SAMPLE_CTO: u32 = 0x00_0800;

/// Sample entry codecs we recognise as video configuration boxes.
const CONFIG_BOXES: [&[u8; 4]; 4] = [b"avcC", b"hvcC", b"vpcC", b"av1C"];

/// A box located inside the source buffer.
pub(super) struct Mp4Box<'a> {
    pub kind: [u8; 4],
    pub body: &'a [u8],
    /// Absolute offset of the box header.
    pub start: usize,
    body_start: usize,
}

impl<'a> Mp4Box<'a> {
    fn children(&self) -> BoxIter<'a> {
        BoxIter {
            data: self.body,
            pos: 0,
            base: self.body_start,
        }
    }
}

pub(super) struct BoxIter<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> BoxIter<'a> {
    pub(super) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            base: 0,
        }
    }
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = Result<Mp4Box<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let remaining = self.data.len() - self.pos;
        let header = &self.data[self.pos..];
        if remaining < 8 {
            self.pos = self.data.len();
            return Some(Err(IngestError::Truncated("box header".to_string())));
        }

        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = [header[4], header[5], header[6], header[7]];
        let (header_len, size) = match size32 {
            // 64-bit largesize follows the type.
            1 => {
                if remaining < 16 {
                    self.pos = self.data.len();
                    return Some(Err(IngestError::Truncated(fourcc(&kind))));
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&header[8..16]);
                (16, u64::from_be_bytes(raw) as usize)
            }
            // Extends to the end of the enclosing container.
            0 => (8, remaining),
            n => (8, n as usize),
        };

        if size < header_len || size > remaining {
            self.pos = self.data.len();
            return Some(Err(IngestError::Truncated(fourcc(&kind))));
        }

        let start = self.base + self.pos;
        let body = &self.data[self.pos + header_len..self.pos + size];
        self.pos += size;
        Some(Ok(Mp4Box {
            kind,
            body,
            start,
            body_start: start + header_len,
        }))
    }
}

pub(super) fn fourcc(kind: &[u8; 4]) -> String {
    String::from_utf8_lossy(kind).into_owned()
}

/// Big-endian field reader over a box body.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], context: &'static str) -> Self {
        Self {
            data,
            pos: 0,
            context,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(IngestError::Truncated(self.context.to_string())),
        }
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    /// Full-box header: (version, flags).
    fn version_flags(&mut self) -> Result<(u8, u32)> {
        let word = self.u32()?;
        Ok(((word >> 24) as u8, word & 0x00ff_ffff))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

fn overflow(what: &str) -> IngestError {
    IngestError::CorruptIndex(format!("{what} overflows"))
}

/// The first entry of `stsd` for the video track.
#[derive(Debug, Clone)]
pub(super) struct SampleEntry {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub config: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct SampleTable {
    time_to_sample: Vec<(u32, u32)>,
    composition_offsets: Vec<(u32, i64)>,
    sync_samples: Option<HashSet<u32>>,
    sample_sizes: Vec<u32>,
    /// `stsz` with a constant size: (size, count), expanded once the file length is known.
    uniform_size: Option<(u32, u32)>,
    sample_to_chunk: Vec<(u32, u32)>,
    chunk_offsets: Vec<u64>,
}

impl SampleTable {
    /// Every sample occupies at least one byte of the file, so the count is bounded by its length.
    fn expand_uniform_sizes(&mut self, file_len: usize) -> Result<()> {
        if let Some((size, count)) = self.uniform_size.take() {
            if u64::from(size) * u64::from(count) > file_len as u64 {
                return Err(IngestError::CorruptIndex(format!(
                    "stsz declares {count} samples of {size} bytes in a {file_len} byte file"
                )));
            }
            self.sample_sizes = vec![size; count as usize];
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TrackBox {
    track_id: u32,
    handler: [u8; 4],
    timescale: u32,
    display_width: u32,
    display_height: u32,
    entry: Option<SampleEntry>,
    table: SampleTable,
}

#[derive(Debug, Clone, Copy, Default)]
struct TrackExtends {
    track_id: u32,
    default_duration: u32,
    default_size: u32,
    default_flags: u32,
}

#[derive(Debug, Default)]
struct Movie {
    tracks: Vec<TrackBox>,
    extends: Vec<TrackExtends>,
    has_mvex: bool,
}

/// One sample in track timescale units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct RawSample {
    pub decode_time: i64,
    pub composition_offset: i64,
    pub duration: u32,
    pub size: u32,
    pub offset: u64,
    pub is_sync: bool,
}

/// The indexed video track.
#[derive(Debug)]
pub(super) struct VideoTrack {
    pub timescale: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub entry: SampleEntry,
    pub samples: Vec<RawSample>,
    pub fragmented: bool,
}

/// Walks the top-level boxes and indexes the first video track.
pub(super) fn parse(data: &[u8]) -> Result<VideoTrack> {
    let mut saw_ftyp = false;
    let mut movie = None;
    let mut fragments = Vec::new();

    for top in BoxIter::new(data) {
        let top = top?;
        match &top.kind {
            b"ftyp" => saw_ftyp = true,
            b"moov" => movie = Some(parse_moov(&top)?),
            b"moof" => fragments.push(top),
            _ => {}
        }
    }

    if !saw_ftyp {
        return Err(IngestError::UnsupportedContainer(
            "missing ftyp box".to_string(),
        ));
    }
    let movie =
        movie.ok_or_else(|| IngestError::UnsupportedContainer("missing moov box".to_string()))?;
    let has_mvex = movie.has_mvex;
    let extends = movie.extends;

    let mut track = movie
        .tracks
        .into_iter()
        .find(|t| &t.handler == b"vide")
        .ok_or_else(|| IngestError::CorruptIndex("no video track".to_string()))?;
    if track.timescale == 0 {
        return Err(IngestError::CorruptIndex("video track timescale is 0".to_string()));
    }
    let entry = track
        .entry
        .clone()
        .ok_or_else(|| IngestError::CorruptIndex("video track has no sample entry".to_string()))?;

    track.table.expand_uniform_sizes(data.len())?;
    let mut samples = table_samples(&track.table)?;
    let fragmented = has_mvex || !fragments.is_empty();
    if fragmented {
        let trex = extends
            .iter()
            .find(|e| e.track_id == track.track_id)
            .copied()
            .unwrap_or_default();
        let mut next_decode_time = match samples.last() {
            Some(last) => last
                .decode_time
                .checked_add(last.duration as i64)
                .ok_or_else(|| overflow("decode time"))?,
            None => 0,
        };
        for moof in &fragments {
            parse_moof(
                moof,
                track.track_id,
                &trex,
                data.len(),
                &mut next_decode_time,
                &mut samples,
            )?;
        }
    }

    Ok(VideoTrack {
        timescale: track.timescale,
        display_width: track.display_width,
        display_height: track.display_height,
        entry,
        samples,
        fragmented,
    })
}

fn parse_moov(moov: &Mp4Box<'_>) -> Result<Movie> {
    let mut movie = Movie::default();
    for child in moov.children() {
        let child = child?;
        match &child.kind {
            b"trak" => movie.tracks.push(parse_trak(&child)?),
            b"mvex" => {
                movie.has_mvex = true;
                for trex in child.children() {
                    let trex = trex?;
                    if &trex.kind == b"trex" {
                        movie.extends.push(parse_trex(trex.body)?);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(movie)
}

fn parse_trex(body: &[u8]) -> Result<TrackExtends> {
    let mut c = Cursor::new(body, "trex");
    c.version_flags()?;
    let track_id = c.u32()?;
    c.skip(4)?; // default_sample_description_index
    Ok(TrackExtends {
        track_id,
        default_duration: c.u32()?,
        default_size: c.u32()?,
        default_flags: c.u32()?,
    })
}

fn parse_trak(trak: &Mp4Box<'_>) -> Result<TrackBox> {
    let mut track = TrackBox::default();
    for child in trak.children() {
        let child = child?;
        match &child.kind {
            b"tkhd" => parse_tkhd(child.body, &mut track)?,
            b"mdia" => parse_mdia(&child, &mut track)?,
            _ => {}
        }
    }
    Ok(track)
}

fn parse_tkhd(body: &[u8], track: &mut TrackBox) -> Result<()> {
    let mut c = Cursor::new(body, "tkhd");
    let (version, _) = c.version_flags()?;
    if version == 1 {
        c.skip(16)?;
        track.track_id = c.u32()?;
        c.skip(12)?;
    } else {
        c.skip(8)?;
        track.track_id = c.u32()?;
        c.skip(8)?;
    }
    // reserved, layer, alternate_group, volume, reserved, matrix
    c.skip(8 + 2 + 2 + 2 + 2 + 36)?;
    // 16.16 fixed point
    track.display_width = c.u32()? >> 16;
    track.display_height = c.u32()? >> 16;
    Ok(())
}

fn parse_mdia(mdia: &Mp4Box<'_>, track: &mut TrackBox) -> Result<()> {
    for child in mdia.children() {
        let child = child?;
        match &child.kind {
            b"mdhd" => {
                let mut c = Cursor::new(child.body, "mdhd");
                let (version, _) = c.version_flags()?;
                c.skip(if version == 1 { 16 } else { 8 })?;
                track.timescale = c.u32()?;
            }
            b"hdlr" => {
                let mut c = Cursor::new(child.body, "hdlr");
                c.version_flags()?;
                c.skip(4)?; // pre_defined
                let handler = c.take(4)?;
                track.handler.copy_from_slice(handler);
            }
            b"minf" => {
                for stbl in child.children() {
                    let stbl = stbl?;
                    if &stbl.kind == b"stbl" {
                        parse_stbl(&stbl, track)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_stbl(stbl: &Mp4Box<'_>, track: &mut TrackBox) -> Result<()> {
    let table = &mut track.table;
    for child in stbl.children() {
        let child = child?;
        let mut c = Cursor::new(child.body, "sample table");
        match &child.kind {
            b"stsd" => track.entry = parse_stsd(child.body)?,
            b"stts" => {
                c.version_flags()?;
                for _ in 0..c.u32()? {
                    table.time_to_sample.push((c.u32()?, c.u32()?));
                }
            }
            b"ctts" => {
                let (version, _) = c.version_flags()?;
                for _ in 0..c.u32()? {
                    let count = c.u32()?;
                    let raw = c.u32()?;
                    let offset = if version == 1 {
                        raw as i32 as i64
                    } else {
                        raw as i64
                    };
                    table.composition_offsets.push((count, offset));
                }
            }
            b"stss" => {
                c.version_flags()?;
                let mut sync = HashSet::new();
                for _ in 0..c.u32()? {
                    sync.insert(c.u32()?);
                }
                table.sync_samples = Some(sync);
            }
            b"stsz" => {
                c.version_flags()?;
                let uniform = c.u32()?;
                let count = c.u32()?;
                if uniform == 0 {
                    if count as usize > c.remaining() / 4 {
                        return Err(IngestError::CorruptIndex(format!(
                            "stsz lists {count} sizes in {} bytes",
                            c.remaining()
                        )));
                    }
                    for _ in 0..count {
                        table.sample_sizes.push(c.u32()?);
                    }
                } else {
                    table.uniform_size = Some((uniform, count));
                }
            }
            b"stsc" => {
                c.version_flags()?;
                for _ in 0..c.u32()? {
                    let first_chunk = c.u32()?;
                    let per_chunk = c.u32()?;
                    c.skip(4)?; // sample_description_index
                    table.sample_to_chunk.push((first_chunk, per_chunk));
                }
            }
            b"stco" => {
                c.version_flags()?;
                for _ in 0..c.u32()? {
                    table.chunk_offsets.push(c.u32()? as u64);
                }
            }
            b"co64" => {
                c.version_flags()?;
                for _ in 0..c.u32()? {
                    table.chunk_offsets.push(c.u64()?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_stsd(body: &[u8]) -> Result<Option<SampleEntry>> {
    let mut c = Cursor::new(body, "stsd");
    c.version_flags()?;
    if c.u32()? == 0 {
        return Ok(None);
    }
    let entry = match BoxIter::new(&body[8..]).next() {
        Some(entry) => entry?,
        None => return Ok(None),
    };

    // VisualSampleEntry: 78 fixed bytes, then child boxes.
    let mut v = Cursor::new(entry.body, "visual sample entry");
    v.skip(24)?;
    let width = v.u16()?;
    let height = v.u16()?;
    v.skip(50)?;

    let mut config = None;
    for child in BoxIter::new(&entry.body[78..]) {
        let child = child?;
        if CONFIG_BOXES.contains(&&child.kind) {
            config = Some(child.body.to_vec());
            break;
        }
    }

    Ok(Some(SampleEntry {
        fourcc: entry.kind,
        width,
        height,
        config,
    }))
}

/// Expands the progressive sample tables into per-sample records.
fn table_samples(table: &SampleTable) -> Result<Vec<RawSample>> {
    let count = table.sample_sizes.len();
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut timing = Vec::with_capacity(count);
    let mut decode_time = 0i64;
    'stts: for &(run, delta) in &table.time_to_sample {
        for _ in 0..run {
            if timing.len() == count {
                break 'stts;
            }
            timing.push((decode_time, delta));
            decode_time = decode_time
                .checked_add(delta as i64)
                .ok_or_else(|| overflow("stts decode time"))?;
        }
    }
    if timing.len() < count {
        return Err(IngestError::CorruptIndex(format!(
            "stts covers {} of {} samples",
            timing.len(),
            count
        )));
    }

    let mut composition = vec![0i64; count];
    let mut index = 0usize;
    'ctts: for &(run, offset) in &table.composition_offsets {
        for _ in 0..run {
            match composition.get_mut(index) {
                Some(slot) => *slot = offset,
                None => break 'ctts,
            }
            index += 1;
        }
    }

    let offsets = sample_offsets(table, count)?;

    Ok((0..count)
        .map(|i| {
            let number = i as u32 + 1;
            RawSample {
                decode_time: timing[i].0,
                composition_offset: composition[i],
                duration: timing[i].1,
                size: table.sample_sizes[i],
                offset: offsets[i],
                // No stss means every sample is a sync sample.
                is_sync: table
                    .sync_samples
                    .as_ref()
                    .map_or(true, |sync| sync.contains(&number)),
            }
        })
        .collect())
}

fn sample_offsets(table: &SampleTable, count: usize) -> Result<Vec<u64>> {
    let chunks = &table.chunk_offsets;
    let mut offsets = Vec::with_capacity(count);

    for (entry, &(first_chunk, per_chunk)) in table.sample_to_chunk.iter().enumerate() {
        if first_chunk == 0 {
            return Err(IngestError::CorruptIndex("stsc chunk numbers start at 1".to_string()));
        }
        let first = (first_chunk - 1) as usize;
        let end = table
            .sample_to_chunk
            .get(entry + 1)
            .map_or(chunks.len(), |&(next, _)| (next as usize).saturating_sub(1))
            .min(chunks.len());

        for &chunk_offset in chunks.iter().take(end).skip(first) {
            let mut offset = chunk_offset;
            for _ in 0..per_chunk {
                if offsets.len() == count {
                    return Ok(offsets);
                }
                offsets.push(offset);
                offset = offset
                    .checked_add(table.sample_sizes[offsets.len() - 1] as u64)
                    .ok_or_else(|| overflow("chunk offset"))?;
            }
        }
    }

    if offsets.len() < count {
        return Err(IngestError::CorruptIndex(format!(
            "chunk offsets cover {} of {} samples",
            offsets.len(),
            count
        )));
    }
    Ok(offsets)
}

#[derive(Debug, Clone, Copy)]
struct FragmentHeader {
    track_id: u32,
    base_data_offset: Option<u64>,
    default_duration: u32,
    default_size: u32,
    default_flags: u32,
}

fn parse_moof(
    moof: &Mp4Box<'_>,
    track_id: u32,
    trex: &TrackExtends,
    file_len: usize,
    next_decode_time: &mut i64,
    samples: &mut Vec<RawSample>,
) -> Result<()> {
    for traf in moof.children() {
        let traf = traf?;
        if &traf.kind != b"traf" {
            continue;
        }

        let mut header = None;
        let mut base_decode_time = None;
        let mut runs = Vec::new();
        for child in traf.children() {
            let child = child?;
            match &child.kind {
                b"tfhd" => header = Some(parse_tfhd(child.body, trex)?),
                b"tfdt" => {
                    let mut c = Cursor::new(child.body, "tfdt");
                    let (version, _) = c.version_flags()?;
                    let base = if version == 1 {
                        c.u64()?
                    } else {
                        c.u32()? as u64
                    };
                    base_decode_time =
                        Some(i64::try_from(base).map_err(|_| overflow("tfdt base"))?);
                }
                b"trun" => runs.push(child),
                _ => {}
            }
        }

        let header = header
            .ok_or_else(|| IngestError::CorruptIndex("traf without tfhd".to_string()))?;
        if header.track_id != track_id {
            continue;
        }

        let mut decode_time = base_decode_time.unwrap_or(*next_decode_time);
        // Without an explicit base, offsets are relative to the enclosing moof.
        let base_offset = header.base_data_offset.unwrap_or(moof.start as u64);
        let mut data_cursor = base_offset;
        for run in &runs {
            parse_trun(
                run.body,
                &header,
                base_offset,
                file_len,
                &mut data_cursor,
                &mut decode_time,
                samples,
            )?;
        }
        *next_decode_time = decode_time;
    }
    Ok(())
}

fn parse_tfhd(body: &[u8], trex: &TrackExtends) -> Result<FragmentHeader> {
    let mut c = Cursor::new(body, "tfhd");
    let (_, flags) = c.version_flags()?;
    let track_id = c.u32()?;
    let base_data_offset = if flags & TFHD_BASE_DATA_OFFSET != 0 {
        Some(c.u64()?)
    } else {
        None
    };
    if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
        c.skip(4)?;
    }
    let default_duration = if flags & TFHD_DEFAULT_DURATION != 0 {
        c.u32()?
    } else {
        trex.default_duration
    };
    let default_size = if flags & TFHD_DEFAULT_SIZE != 0 {
        c.u32()?
    } else {
        trex.default_size
    };
    let default_flags = if flags & TFHD_DEFAULT_FLAGS != 0 {
        c.u32()?
    } else {
        trex.default_flags
    };
    Ok(FragmentHeader {
        track_id,
        base_data_offset,
        default_duration,
        default_size,
        default_flags,
    })
}

fn parse_trun(
    body: &[u8],
    header: &FragmentHeader,
    base_offset: u64,
    file_len: usize,
    data_cursor: &mut u64,
    decode_time: &mut i64,
    samples: &mut Vec<RawSample>,
) -> Result<()> {
    let mut c = Cursor::new(body, "trun");
    let (version, flags) = c.version_flags()?;
    let sample_count = c.u32()?;
    // Each sample needs at least one byte of the file.
    if samples.len().saturating_add(sample_count as usize) > file_len {
        return Err(IngestError::CorruptIndex(format!(
            "trun declares {sample_count} samples in a {file_len} byte file"
        )));
    }
    if flags & TRUN_DATA_OFFSET != 0 {
        let relative = c.u32()? as i32 as i64;
        let absolute = i64::try_from(base_offset)
            .ok()
            .and_then(|base| base.checked_add(relative))
            .ok_or_else(|| overflow("trun data offset"))?;
        if absolute < 0 {
            return Err(IngestError::CorruptIndex("trun data offset before file start".to_string()));
        }
        *data_cursor = absolute as u64;
    }
    let first_sample_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        Some(c.u32()?)
    } else {
        None
    };

    for i in 0..sample_count {
        let duration = if flags & TRUN_SAMPLE_DURATION != 0 {
            c.u32()?
        } else {
            header.default_duration
        };
        let size = if flags & TRUN_SAMPLE_SIZE != 0 {
            c.u32()?
        } else {
            header.default_size
        };
        let sample_flags = if flags & TRUN_SAMPLE_FLAGS != 0 {
            c.u32()?
        } else {
            header.default_flags
        };
        let sample_flags = match first_sample_flags {
            Some(first) if i == 0 => first,
            _ => sample_flags,
        };
        let composition_offset = if flags & TRUN_SAMPLE_CTO != 0 {
            let raw = c.u32()?;
            if version == 1 {
                raw as i32 as i64
            } else {
                raw as i64
            }
        } else {
            0
        };

        samples.push(RawSample {
            decode_time: *decode_time,
            composition_offset,
            duration,
            size,
            offset: *data_cursor,
            is_sync: sample_flags & SAMPLE_FLAG_NON_SYNC == 0,
        });
        *data_cursor = data_cursor
            .checked_add(size as u64)
            .ok_or_else(|| overflow("trun data offset"))?;
        *decode_time = decode_time
            .checked_add(duration as i64)
            .ok_or_else(|| overflow("trun decode time"))?;
    }
    Ok(())
}
