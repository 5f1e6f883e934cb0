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

//! Codec strings and codec-level IDR detection from sample payloads.

const AVC_NAL_IDR: u8 = 5;
const AVC_NAL_SLICE: u8 = 1;

/// HEVC IRAP range (BLA, IDR, CRA): decodable without earlier pictures.
const HEVC_IRAP: std::ops::RangeInclusive<u8> = 16..=21;
/// HEVC VCL non-IRAP picture types.
const HEVC_NON_IRAP_VCL: std::ops::RangeInclusive<u8> = 0..=9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum NalFamily {
    Avc,
    Hevc,
}

impl NalFamily {
    pub(super) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"avc1" | b"avc3" => Some(NalFamily::Avc),
            b"hvc1" | b"hev1" => Some(NalFamily::Hevc),
            _ => None,
        }
    }
}

/// WebCodecs-style codec string for a sample entry.
pub(super) fn codec_string(fourcc: &[u8; 4], config: Option<&[u8]>) -> String {
    let name = String::from_utf8_lossy(fourcc).into_owned();
    match (fourcc, config) {
        (b"avc1" | b"avc3", Some(avcc)) if avcc.len() >= 4 => {
            format!("{}.{:02x}{:02x}{:02x}", name, avcc[1], avcc[2], avcc[3])
        }
        // vpcC is a full box: 4 bytes of version/flags precede profile and level.
        (b"vp09", Some(vpcc)) if vpcc.len() >= 7 => {
            format!("vp09.{:02}.{:02}.{:02}", vpcc[4], vpcc[5], vpcc[6] >> 4)
        }
        _ => name,
    }
}

/// Size of the NAL length prefix declared by avcC / hvcC.
pub(super) fn nal_length_size(family: NalFamily, config: Option<&[u8]>) -> Option<usize> {
    let config = config?;
    let byte = match family {
        NalFamily::Avc => *config.get(4)?,
        NalFamily::Hevc => *config.get(21)?,
    };
    Some((byte & 0x03) as usize + 1)
}

/// Scans a length-prefixed sample for an IDR picture.
///
/// `Some(true)` when an IDR/IRAP NAL unit is present, `Some(false)` when only other
/// picture NAL units were seen, `None` when the payload cannot be classified.
pub(super) fn detect_idr(family: NalFamily, length_size: usize, payload: &[u8]) -> Option<bool> {
    let mut pos = 0usize;
    let mut saw_picture = false;

    while pos < payload.len() {
        let prefix = payload.get(pos..pos + length_size)?;
        let nal_len = prefix
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        pos += length_size;
        if nal_len == 0 || pos + nal_len > payload.len() {
            return None;
        }
        let header = payload[pos];
        match family {
            NalFamily::Avc => match header & 0x1f {
                AVC_NAL_IDR => return Some(true),
                AVC_NAL_SLICE => saw_picture = true,
                _ => {}
            },
            NalFamily::Hevc => {
                let nal_type = (header >> 1) & 0x3f;
                if HEVC_IRAP.contains(&nal_type) {
                    return Some(true);
                }
                if HEVC_NON_IRAP_VCL.contains(&nal_type) {
                    saw_picture = true;
                }
            }
        }
        pos += nal_len;
    }

    if saw_picture {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avc_codec_string_uses_profile_and_level() {
        let avcc = [1u8, 0x64, 0x00, 0x1f, 0xff];
        assert_eq!(codec_string(b"avc1", Some(&avcc)), "avc1.64001f");
        assert_eq!(codec_string(b"avc1", None), "avc1");
        assert_eq!(codec_string(b"hvc1", Some(&[0u8; 23])), "hvc1");
    }

    #[test]
    fn vp9_codec_string_reads_vpcc() {
        let vpcc = [1u8, 0, 0, 0, 0, 10, 0x80];
        assert_eq!(codec_string(b"vp09", Some(&vpcc)), "vp09.00.10.08");
    }

    #[test]
    fn avc_idr_and_slice_detection() {
        let idr = [0u8, 0, 0, 2, 0x65, 0x88];
        let slice = [0u8, 0, 0, 2, 0x41, 0x9a];
        let sei_only = [0u8, 0, 0, 2, 0x06, 0x05];
        assert_eq!(detect_idr(NalFamily::Avc, 4, &idr), Some(true));
        assert_eq!(detect_idr(NalFamily::Avc, 4, &slice), Some(false));
        assert_eq!(detect_idr(NalFamily::Avc, 4, &sei_only), None);
    }

    #[test]
    fn hevc_irap_is_random_access() {
        let idr_w_radl = [0u8, 0, 0, 2, 19 << 1, 0x01];
        let trail = [0u8, 0, 0, 2, 1 << 1, 0x01];
        assert_eq!(detect_idr(NalFamily::Hevc, 4, &idr_w_radl), Some(true));
        assert_eq!(detect_idr(NalFamily::Hevc, 4, &trail), Some(false));
    }

    #[test]
    fn malformed_length_is_undeterminable() {
        let overrun = [0u8, 0, 0, 9, 0x65];
        assert_eq!(detect_idr(NalFamily::Avc, 4, &overrun), None);
        assert_eq!(detect_idr(NalFamily::Avc, 4, &[0u8, 0]), None);
    }

    #[test]
    fn length_size_comes_from_config() {
        assert_eq!(nal_length_size(NalFamily::Avc, Some(&[1, 0x64, 0, 0x1f, 0xfd])), Some(2));
        let mut hvcc = [0u8; 23];
        hvcc[21] = 0x0f;
        assert_eq!(nal_length_size(NalFamily::Hevc, Some(&hvcc)), Some(4));
        assert_eq!(nal_length_size(NalFamily::Avc, None), None);
    }
}
