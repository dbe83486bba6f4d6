// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Translation of codec descriptors into engine caps.

use gstreamer as gst;

use crate::error::OpenError;
use crate::format::CodecDescriptor;
use crate::format::CodecId;
use crate::format::Ratio;

/// Media type of decoded output.
pub const RAW_VIDEO: &str = "video/x-raw";

/// Caps a decoder must accept and produce to decode a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityQuery {
    /// Caps of the compressed input.
    pub sink: gst::Caps,
    /// Caps of the decoded output.
    pub src: gst::Caps,
    input: gst::Structure,
}

impl CapabilityQuery {
    /// The structure describing the compressed input.
    pub fn input(&self) -> &gst::StructureRef {
        &self.input
    }
}

/// Base structure of each supported codec, with its mandatory fields.
pub fn codec_structure(codec: CodecId) -> Option<gst::Structure> {
    use CodecId::*;
    let s = match codec {
        H264 => gst::Structure::builder("video/x-h264")
            .field("alignment", "au")
            .build(),
        Mp4v => gst::Structure::builder("video/mpeg")
            .field("mpegversion", 4i32)
            .field("systemstream", false)
            .build(),
        Vp8 => gst::Structure::new_empty("video/x-vp8"),
        Mpgv => gst::Structure::builder("video/mpeg")
            .field("mpegversion", 2i32)
            .field("systemstream", false)
            .build(),
        Flv1 => gst::Structure::builder("video/x-flash-video")
            .field("flvversion", 1i32)
            .build(),
        Wmv1 => wmv(1, "WMV1"),
        Wmv2 => wmv(2, "WMV2"),
        Wmv3 => wmv(3, "WMV3"),
        Vc1 => wmv(3, "WVC1"),
        Av1 | Hevc | Vp9 => return None,
    };
    Some(s)
}

fn wmv(version: i32, format: &str) -> gst::Structure {
    gst::Structure::builder("video/x-wmv")
        .field("wmvversion", version)
        .field("format", format)
        .build()
}

fn fraction(ratio: Ratio) -> Option<gst::Fraction> {
    Some(gst::Fraction::new(
        i32::try_from(ratio.num).ok()?,
        i32::try_from(ratio.den).ok()?,
    ))
}

/// Builds the caps describing the stream of `desc`. Optional fields are only set when `desc`
/// carries a meaningful value for them.
pub fn translate(desc: &CodecDescriptor) -> Result<CapabilityQuery, OpenError> {
    let mut s = codec_structure(desc.codec).ok_or(OpenError::Unsupported(desc.codec))?;

    if desc.width != 0 && desc.height != 0 {
        if let (Ok(width), Ok(height)) = (i32::try_from(desc.width), i32::try_from(desc.height)) {
            s.set("width", width);
            s.set("height", height);
        }
    }
    if let Some(fps) = desc.valid_frame_rate().and_then(fraction) {
        s.set("framerate", fps);
    }
    if let Some(par) = desc
        .aspect_ratio
        .filter(Ratio::is_valid)
        .and_then(fraction)
    {
        s.set("pixel-aspect-ratio", par);
    }
    if !desc.extra.is_empty() {
        let mut extra = Vec::new();
        extra
            .try_reserve_exact(desc.extra.len())
            .map_err(|_| OpenError::OutOfMemory)?;
        extra.extend_from_slice(&desc.extra);
        s.set("codec_data", gst::Buffer::from_mut_slice(extra));
    }

    Ok(CapabilityQuery {
        sink: gst::Caps::builder_full().structure(s.clone()).build(),
        src: gst::Caps::new_empty_simple(RAW_VIDEO),
        input: s,
    })
}
