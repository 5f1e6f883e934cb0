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

//! Builds the chunk index for a loaded source.
//!
//! Only ISO-BMFF containers are understood. The first video track is indexed in decode order;
//! every chunk carries its presentation time in microseconds, its container sync flag and, for
//! NAL-based codecs, whether the payload actually begins an IDR picture.

mod bitstream;
mod mp4;

use crate::decoder::DecoderConfig;
use crate::error::IngestError;
use crate::frame::{Chunk, EncodedChunk};
use bitstream::NalFamily;
use log::{debug, info};

const ACCEPTED_MIME_TYPES: [&str; 3] = ["video/mp4", "video/quicktime", "application/mp4"];

/// Timestamps further than this from zero (about 285 years) are treated as a corrupt index.
const MAX_TIMESTAMP_US: i64 = 1 << 53;

/// Immutable description of an ingested source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    /// Track header display size.
    pub width: u32,
    pub height: u32,
    pub duration_us: i64,
    pub fps: f64,
    pub keyframe_count: usize,
    pub is_fragmented: bool,
    /// Codec configuration record (avcC, hvcC, vpcC or av1C body).
    pub description: Option<Vec<u8>>,
}

impl SourceInfo {
    pub fn description_length(&self) -> usize {
        self.description.as_ref().map_or(0, Vec::len)
    }

    /// Nominal frame duration, `None` when the frame rate is unknown.
    pub fn frame_duration_us(&self) -> Option<f64> {
        (self.fps > 0.0).then(|| 1_000_000.0 / self.fps)
    }
}

/// The chunk index together with the bytes it points into.
#[derive(Debug)]
pub struct IngestedSource {
    info: SourceInfo,
    chunks: Vec<Chunk>,
    keyframes: Vec<usize>,
    buffer: Vec<u8>,
}

impl IngestedSource {
    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    /// Chunks in decode order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Sample indices of the container sync samples, ascending.
    pub fn keyframes(&self) -> &[usize] {
        &self.keyframes
    }

    pub fn payload(&self, chunk: &Chunk) -> &[u8] {
        &self.buffer[chunk.offset..chunk.offset + chunk.size]
    }

    /// Copies a chunk and its payload out for the decode worker.
    pub fn encoded(&self, sample_index: usize) -> Option<EncodedChunk> {
        let chunk = *self.chunks.get(sample_index)?;
        Some(EncodedChunk::new(chunk, self.payload(&chunk).to_vec()))
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            codec: self.info.codec.clone(),
            coded_width: self.info.coded_width,
            coded_height: self.info.coded_height,
            description: self.info.description.clone(),
        }
    }
}

/// Parses `buffer` and builds the chunk index.
pub fn ingest(buffer: Vec<u8>, mime_type: &str) -> Result<IngestedSource, IngestError> {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !essence.is_empty() && !ACCEPTED_MIME_TYPES.contains(&essence.as_str()) {
        return Err(IngestError::UnsupportedContainer(format!(
            "mime type '{mime_type}' is not an ISO-BMFF container"
        )));
    }

    let track = mp4::parse(&buffer)?;
    if track.samples.is_empty() {
        return Err(IngestError::CorruptIndex("video track has no samples".to_string()));
    }

    let timescale = track.timescale;
    let family = NalFamily::from_fourcc(&track.entry.fourcc);
    let length_size = family
        .and_then(|family| bitstream::nal_length_size(family, track.entry.config.as_deref()));

    let mut chunks = Vec::with_capacity(track.samples.len());
    let mut previous_decode_time = i64::MIN;
    for (sample_index, sample) in track.samples.iter().enumerate() {
        if sample.decode_time < previous_decode_time {
            return Err(IngestError::CorruptIndex(format!(
                "decode timestamp regresses at sample {sample_index}"
            )));
        }
        previous_decode_time = sample.decode_time;

        let offset = usize::try_from(sample.offset).map_err(|_| {
            IngestError::CorruptIndex(format!("sample {sample_index} offset overflows"))
        })?;
        let size = sample.size as usize;
        if offset.checked_add(size).map_or(true, |end| end > buffer.len()) {
            return Err(IngestError::CorruptIndex(format!(
                "sample {sample_index} lies outside the buffer"
            )));
        }

        let is_idr = match (family, length_size) {
            (Some(family), Some(length_size)) => {
                bitstream::detect_idr(family, length_size, &buffer[offset..offset + size])
            }
            _ => None,
        };

        let presentation_time = sample
            .decode_time
            .checked_add(sample.composition_offset)
            .ok_or_else(|| {
                IngestError::CorruptIndex(format!(
                    "sample {sample_index} presentation time overflows"
                ))
            })?;

        chunks.push(Chunk {
            sample_index,
            timestamp_us: to_us(presentation_time, timescale)?,
            decode_timestamp_us: to_us(sample.decode_time, timescale)?,
            duration_us: to_us(sample.duration as i64, timescale)?,
            is_key: sample.is_sync,
            is_idr,
            offset,
            size,
        });
    }

    let keyframes: Vec<usize> = chunks
        .iter()
        .filter(|c| c.is_key)
        .map(|c| c.sample_index)
        .collect();
    if keyframes.is_empty() {
        return Err(IngestError::CorruptIndex("no sync sample in the index".to_string()));
    }

    let info = SourceInfo {
        codec: bitstream::codec_string(&track.entry.fourcc, track.entry.config.as_deref()),
        coded_width: track.entry.width as u32,
        coded_height: track.entry.height as u32,
        width: if track.display_width > 0 {
            track.display_width
        } else {
            track.entry.width as u32
        },
        height: if track.display_height > 0 {
            track.display_height
        } else {
            track.entry.height as u32
        },
        duration_us: chunks
            .iter()
            .map(|c| c.timestamp_us + c.duration_us)
            .max()
            .unwrap_or(0),
        fps: estimate_fps(&chunks),
        keyframe_count: keyframes.len(),
        is_fragmented: track.fragmented,
        description: track.entry.config.clone(),
    };

    info!(
        "Ingested {} source: {} chunks, {} keyframes, {:.3} fps, {}us{}",
        info.codec,
        chunks.len(),
        info.keyframe_count,
        info.fps,
        info.duration_us,
        if info.is_fragmented { " (fragmented)" } else { "" }
    );
    debug!(
        "Coded size {}x{}, description {} bytes",
        info.coded_width,
        info.coded_height,
        info.description_length()
    );

    Ok(IngestedSource {
        info,
        chunks,
        keyframes,
        buffer,
    })
}

/// Converts track timescale units to microseconds.
fn to_us(value: i64, timescale: u32) -> Result<i64, IngestError> {
    let us = value as i128 * 1_000_000 / timescale as i128;
    match i64::try_from(us) {
        Ok(us) if us.abs() <= MAX_TIMESTAMP_US => Ok(us),
        _ => Err(IngestError::CorruptIndex(format!(
            "timestamp {value} at timescale {timescale} is out of range"
        ))),
    }
}

fn estimate_fps(chunks: &[Chunk]) -> f64 {
    let first = chunks.iter().map(|c| c.timestamp_us).min().unwrap_or(0);
    let last = chunks.iter().map(|c| c.timestamp_us).max().unwrap_or(0);
    if chunks.len() >= 2 && last > first {
        return (chunks.len() - 1) as f64 * 1_000_000.0 / last.abs_diff(first) as f64;
    }
    match chunks.first() {
        Some(chunk) if chunk.duration_us > 0 => 1_000_000.0 / chunk.duration_us as f64,
        _ => 0.0,
    }
}
