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

//! Deterministic MP4 writer for tests, QA profiles and demos.
//!
//! Produces small but well-formed ISO-BMFF files whose sample payloads are shaped like the
//! real codec bitstreams closely enough for ingest to classify keyframes and IDR pictures.

use serde::{Deserialize, Serialize};

/// Media timescale used for every synthetic track.
pub const TIMESCALE: u32 = 90_000;

const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

const AVC_SPS: [u8; 5] = [0x67, 0x64, 0x00, 0x1f, 0xac];
const AVC_PPS: [u8; 4] = [0x68, 0xee, 0x3c, 0x80];

const IDENTITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyntheticCodec {
    Avc,
    Hevc,
    Vp9,
    /// MPEG-4 Part 2, which no decode primitive here accepts.
    Mpeg4,
}

impl SyntheticCodec {
    fn fourcc(self) -> &'static [u8; 4] {
        match self {
            SyntheticCodec::Avc => b"avc1",
            SyntheticCodec::Hevc => b"hvc1",
            SyntheticCodec::Vp9 => b"vp09",
            SyntheticCodec::Mpeg4 => b"mp4v",
        }
    }
}

/// Shape of a generated source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyntheticSpec {
    pub fps: f64,
    #[serde(alias = "frames")]
    pub frame_count: usize,
    /// Keyframe interval in samples; 0 means only the first sample is a keyframe.
    pub gop: usize,
    pub codec: SyntheticCodec,
    pub fragmented: bool,
    pub width: u16,
    pub height: u16,
    /// Sync samples whose payload is a plain slice instead of an IDR picture.
    pub non_idr_keyframes: Vec<usize>,
    /// Samples per `moof`; 0 uses the GOP length.
    pub fragment_frames: usize,
    /// Fragment whose `tfdt` restarts at the previous fragment's base time.
    pub rewind_fragment: Option<usize>,
    /// Sample written with a zero duration.
    pub zero_duration_at: Option<usize>,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            fps: 30.0,
            frame_count: 90,
            gop: 30,
            codec: SyntheticCodec::Avc,
            fragmented: false,
            width: 640,
            height: 360,
            non_idr_keyframes: Vec::new(),
            fragment_frames: 0,
            rewind_fragment: None,
            zero_duration_at: None,
        }
    }
}

impl SyntheticSpec {
    /// Sample delta in timescale units.
    pub fn sample_delta(&self) -> u32 {
        if self.fps > 0.0 {
            (TIMESCALE as f64 / self.fps).round() as u32
        } else {
            TIMESCALE
        }
    }

    pub fn is_keyframe(&self, index: usize) -> bool {
        if self.gop == 0 {
            index == 0
        } else {
            index % self.gop == 0
        }
    }

    /// Presentation time of sample `index` as ingest reports it.
    pub fn frame_timestamp_us(&self, index: usize) -> i64 {
        let ticks: i64 = self.durations()[..index.min(self.frame_count)]
            .iter()
            .map(|&d| d as i64)
            .sum();
        ticks * 1_000_000 / TIMESCALE as i64
    }

    /// Serialises the source to MP4 bytes.
    pub fn build(&self) -> Vec<u8> {
        let payloads: Vec<Vec<u8>> = (0..self.frame_count).map(|i| self.payload(i)).collect();
        let ftyp = self.ftyp();
        if self.fragmented {
            self.build_fragmented(ftyp, &payloads)
        } else {
            self.build_progressive(ftyp, &payloads)
        }
    }

    fn durations(&self) -> Vec<u32> {
        let delta = self.sample_delta();
        (0..self.frame_count)
            .map(|i| {
                if self.zero_duration_at == Some(i) {
                    0
                } else {
                    delta
                }
            })
            .collect()
    }

    fn payload(&self, index: usize) -> Vec<u8> {
        let idr = self.is_keyframe(index) && !self.non_idr_keyframes.contains(&index);
        let mut body = match self.codec {
            SyntheticCodec::Avc => vec![if idr { 0x65 } else { 0x41 }],
            // nal_unit_type << 1, then nuh_temporal_id_plus1
            SyntheticCodec::Hevc => vec![if idr { 19 << 1 } else { 1 << 1 }, 0x01],
            SyntheticCodec::Vp9 | SyntheticCodec::Mpeg4 => vec![if idr { 0x82 } else { 0x86 }],
        };
        body.extend_from_slice(&(index as u32).to_be_bytes());
        body.extend_from_slice(&[0xa5; 8]);

        match self.codec {
            SyntheticCodec::Avc | SyntheticCodec::Hevc => {
                let mut sample = (body.len() as u32).to_be_bytes().to_vec();
                sample.extend(body);
                sample
            }
            SyntheticCodec::Vp9 | SyntheticCodec::Mpeg4 => body,
        }
    }

    fn ftyp(&self) -> Vec<u8> {
        let mut body = b"isom".to_vec();
        put_u32(&mut body, 0x200);
        for brand in [b"isom", b"iso2", self.codec.fourcc(), b"mp41"] {
            body.extend_from_slice(brand);
        }
        mp4_box(b"ftyp", &body)
    }

    fn build_progressive(&self, ftyp: Vec<u8>, payloads: &[Vec<u8>]) -> Vec<u8> {
        // stco holds a fixed-width offset, so the moov size does not depend on its value.
        let draft = self.moov(Some(0), payloads);
        let mdat_offset = (ftyp.len() + draft.len() + 8) as u32;
        let moov = self.moov(Some(mdat_offset), payloads);

        let mut out = ftyp;
        out.extend(moov);
        out.extend(mp4_box(b"mdat", &payloads.concat()));
        out
    }

    fn build_fragmented(&self, ftyp: Vec<u8>, payloads: &[Vec<u8>]) -> Vec<u8> {
        let mut out = ftyp;
        out.extend(self.moov(None, payloads));

        let per_fragment = match (self.fragment_frames, self.gop) {
            (0, 0) => self.frame_count.max(1),
            (0, gop) => gop,
            (n, _) => n,
        };
        let durations = self.durations();
        let mut base_times = Vec::new();
        let mut decode_time = 0u64;
        for (fragment, start) in (0..self.frame_count).step_by(per_fragment).enumerate() {
            let end = (start + per_fragment).min(self.frame_count);
            let base = match self.rewind_fragment {
                Some(rewind) if rewind == fragment && fragment > 0 => base_times[fragment - 1],
                _ => decode_time,
            };
            base_times.push(base);

            let draft = self.moof(fragment as u32 + 1, base, 0, start..end, &durations, payloads);
            let moof = self.moof(
                fragment as u32 + 1,
                base,
                draft.len() as u32 + 8,
                start..end,
                &durations,
                payloads,
            );
            out.extend(moof);
            out.extend(mp4_box(b"mdat", &payloads[start..end].concat()));

            decode_time = base + durations[start..end].iter().map(|&d| d as u64).sum::<u64>();
        }
        out
    }

    fn moov(&self, mdat_offset: Option<u32>, payloads: &[Vec<u8>]) -> Vec<u8> {
        let durations = self.durations();
        let total: u64 = durations.iter().map(|&d| d as u64).sum();

        let mut mvhd = Vec::new();
        put_u32(&mut mvhd, 0); // creation
        put_u32(&mut mvhd, 0); // modification
        put_u32(&mut mvhd, 1000);
        put_u32(&mut mvhd, (total * 1000 / TIMESCALE as u64) as u32);
        put_u32(&mut mvhd, 0x0001_0000);
        mvhd.extend_from_slice(&[0x01, 0x00]);
        mvhd.extend_from_slice(&[0u8; 10]);
        put_matrix(&mut mvhd);
        mvhd.extend_from_slice(&[0u8; 24]);
        put_u32(&mut mvhd, 2);

        let mut moov = full_box(b"mvhd", 0, 0, &mvhd);
        moov.extend(self.trak(mdat_offset, &durations, payloads, total));
        if mdat_offset.is_none() {
            let mut trex = Vec::new();
            put_u32(&mut trex, 1); // track_ID
            put_u32(&mut trex, 1); // sample_description_index
            put_u32(&mut trex, self.sample_delta());
            put_u32(&mut trex, 0);
            put_u32(&mut trex, SAMPLE_FLAGS_NON_SYNC);
            moov.extend(mp4_box(b"mvex", &full_box(b"trex", 0, 0, &trex)));
        }
        mp4_box(b"moov", &moov)
    }

    fn trak(
        &self,
        mdat_offset: Option<u32>,
        durations: &[u32],
        payloads: &[Vec<u8>],
        total: u64,
    ) -> Vec<u8> {
        let mut tkhd = Vec::new();
        put_u32(&mut tkhd, 0);
        put_u32(&mut tkhd, 0);
        put_u32(&mut tkhd, 1); // track_ID
        put_u32(&mut tkhd, 0);
        put_u32(&mut tkhd, (total * 1000 / TIMESCALE as u64) as u32);
        tkhd.extend_from_slice(&[0u8; 8]);
        tkhd.extend_from_slice(&[0u8; 8]); // layer, alternate_group, volume, reserved
        put_matrix(&mut tkhd);
        put_u32(&mut tkhd, (self.width as u32) << 16);
        put_u32(&mut tkhd, (self.height as u32) << 16);

        let mut mdhd = Vec::new();
        put_u32(&mut mdhd, 0);
        put_u32(&mut mdhd, 0);
        put_u32(&mut mdhd, TIMESCALE);
        put_u32(&mut mdhd, total as u32);
        mdhd.extend_from_slice(&[0x55, 0xc4, 0x00, 0x00]);

        let mut hdlr = Vec::new();
        put_u32(&mut hdlr, 0);
        hdlr.extend_from_slice(b"vide");
        hdlr.extend_from_slice(&[0u8; 12]);
        hdlr.extend_from_slice(b"VideoHandler\0");

        let mut minf = full_box(b"vmhd", 0, 1, &[0u8; 8]);
        minf.extend(mp4_box(b"stbl", &self.stbl(mdat_offset, durations, payloads)));

        let mut mdia = full_box(b"mdhd", 0, 0, &mdhd);
        mdia.extend(full_box(b"hdlr", 0, 0, &hdlr));
        mdia.extend(mp4_box(b"minf", &minf));

        let mut trak = full_box(b"tkhd", 0, 3, &tkhd);
        trak.extend(mp4_box(b"mdia", &mdia));
        mp4_box(b"trak", &trak)
    }

    fn stbl(&self, mdat_offset: Option<u32>, durations: &[u32], payloads: &[Vec<u8>]) -> Vec<u8> {
        let mut stbl = self.stsd();

        // Fragmented files keep the sample tables empty.
        let Some(mdat_offset) = mdat_offset else {
            for kind in [b"stts", b"stsc", b"stco"] {
                stbl.extend(full_box(kind, 0, 0, &0u32.to_be_bytes()));
            }
            stbl.extend(full_box(b"stsz", 0, 0, &[0u8; 8]));
            return stbl;
        };

        let mut runs: Vec<(u32, u32)> = Vec::new();
        for &delta in durations {
            match runs.last_mut() {
                Some((count, last)) if *last == delta => *count += 1,
                _ => runs.push((1, delta)),
            }
        }
        let mut stts = Vec::new();
        put_u32(&mut stts, runs.len() as u32);
        for (count, delta) in runs {
            put_u32(&mut stts, count);
            put_u32(&mut stts, delta);
        }
        stbl.extend(full_box(b"stts", 0, 0, &stts));

        let sync: Vec<u32> = (0..self.frame_count)
            .filter(|&i| self.is_keyframe(i))
            .map(|i| i as u32 + 1)
            .collect();
        let mut stss = Vec::new();
        put_u32(&mut stss, sync.len() as u32);
        for number in sync {
            put_u32(&mut stss, number);
        }
        stbl.extend(full_box(b"stss", 0, 0, &stss));

        let mut stsz = Vec::new();
        put_u32(&mut stsz, 0);
        put_u32(&mut stsz, payloads.len() as u32);
        for payload in payloads {
            put_u32(&mut stsz, payload.len() as u32);
        }
        stbl.extend(full_box(b"stsz", 0, 0, &stsz));

        // Every sample lives in a single chunk at the start of mdat.
        let mut stsc = Vec::new();
        put_u32(&mut stsc, 1);
        put_u32(&mut stsc, 1);
        put_u32(&mut stsc, payloads.len() as u32);
        put_u32(&mut stsc, 1);
        stbl.extend(full_box(b"stsc", 0, 0, &stsc));

        let mut stco = Vec::new();
        put_u32(&mut stco, 1);
        put_u32(&mut stco, mdat_offset);
        stbl.extend(full_box(b"stco", 0, 0, &stco));
        stbl
    }

    fn stsd(&self) -> Vec<u8> {
        let mut entry = vec![0u8; 6];
        entry.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
        entry.extend_from_slice(&[0u8; 16]);
        entry.extend_from_slice(&self.width.to_be_bytes());
        entry.extend_from_slice(&self.height.to_be_bytes());
        put_u32(&mut entry, 0x0048_0000);
        put_u32(&mut entry, 0x0048_0000);
        put_u32(&mut entry, 0);
        entry.extend_from_slice(&1u16.to_be_bytes());
        entry.extend_from_slice(&[0u8; 32]);
        entry.extend_from_slice(&0x0018u16.to_be_bytes());
        entry.extend_from_slice(&(-1i16).to_be_bytes());
        if let Some(config) = self.config_box() {
            entry.extend(config);
        }

        let mut stsd = Vec::new();
        put_u32(&mut stsd, 1);
        stsd.extend(mp4_box(self.codec.fourcc(), &entry));
        full_box(b"stsd", 0, 0, &stsd)
    }

    fn config_box(&self) -> Option<Vec<u8>> {
        match self.codec {
            SyntheticCodec::Avc => {
                let mut avcc = vec![0x01, AVC_SPS[1], AVC_SPS[2], AVC_SPS[3], 0xff, 0xe1];
                avcc.extend_from_slice(&(AVC_SPS.len() as u16).to_be_bytes());
                avcc.extend_from_slice(&AVC_SPS);
                avcc.push(0x01);
                avcc.extend_from_slice(&(AVC_PPS.len() as u16).to_be_bytes());
                avcc.extend_from_slice(&AVC_PPS);
                Some(mp4_box(b"avcC", &avcc))
            }
            SyntheticCodec::Hevc => {
                let mut hvcc = vec![0u8; 23];
                hvcc[0] = 0x01;
                hvcc[1] = 0x01; // Main profile
                hvcc[12] = 93; // level 3.1
                hvcc[21] = 0x03; // lengthSizeMinusOne
                Some(mp4_box(b"hvcC", &hvcc))
            }
            SyntheticCodec::Vp9 => {
                // profile 0, level 3.1, 8-bit 4:2:0, BT.709
                let vpcc = [0x00, 0x1f, 0x80, 0x01, 0x01, 0x01, 0x00, 0x00];
                Some(full_box(b"vpcC", 1, 0, &vpcc))
            }
            SyntheticCodec::Mpeg4 => None,
        }
    }

    fn moof(
        &self,
        sequence: u32,
        base_decode_time: u64,
        data_offset: u32,
        range: std::ops::Range<usize>,
        durations: &[u32],
        payloads: &[Vec<u8>],
    ) -> Vec<u8> {
        // default-base-is-moof
        let tfhd = full_box(b"tfhd", 0, 0x02_0000, &1u32.to_be_bytes());

        let tfdt = full_box(b"tfdt", 1, 0, &base_decode_time.to_be_bytes());

        let mut trun = Vec::new();
        put_u32(&mut trun, range.len() as u32);
        put_u32(&mut trun, data_offset);
        for index in range {
            put_u32(&mut trun, durations[index]);
            put_u32(&mut trun, payloads[index].len() as u32);
            put_u32(
                &mut trun,
                if self.is_keyframe(index) {
                    SAMPLE_FLAGS_SYNC
                } else {
                    SAMPLE_FLAGS_NON_SYNC
                },
            );
        }
        // data-offset, sample-duration, sample-size, sample-flags
        let trun = full_box(b"trun", 0, 0x00_0701, &trun);

        let mut traf = tfhd;
        traf.extend(tfdt);
        traf.extend(trun);

        let mut moof = full_box(b"mfhd", 0, 0, &sequence.to_be_bytes());
        moof.extend(mp4_box(b"traf", &traf));
        mp4_box(b"moof", &moof)
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_matrix(out: &mut Vec<u8>) {
    for value in IDENTITY_MATRIX {
        put_u32(out, value);
    }
}

fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    put_u32(&mut out, body.len() as u32 + 8);
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn full_box(kind: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut inner = Vec::with_capacity(body.len() + 4);
    put_u32(&mut inner, (version as u32) << 24 | (flags & 0x00ff_ffff));
    inner.extend_from_slice(body);
    mp4_box(kind, &inner)
}
