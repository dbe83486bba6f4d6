// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Resolution of the output picture format from the caps negotiated by the engine.

use gstreamer as gst;
use gstreamer_video as gst_video;
use log::debug;

use crate::error::MappingError;
use crate::format::Chroma;
use crate::format::CodecDescriptor;
use crate::format::OutputFormat;
use crate::format::Ratio;
use crate::negotiate::RAW_VIDEO;

fn ratio(fraction: gst::Fraction) -> Option<Ratio> {
    if fraction.numer() <= 0 || fraction.denom() <= 0 {
        return None;
    }
    Some(Ratio::new(
        u32::try_from(fraction.numer()).ok()?,
        u32::try_from(fraction.denom()).ok()?,
    ))
}

/// Computes the output format described by raw video `caps`.
///
/// A missing or invalid pixel aspect ratio falls back to 1:1, a missing frame rate to
/// `input_frame_rate`.
pub fn resolve_format(
    caps: &gst::CapsRef,
    input_frame_rate: Option<Ratio>,
) -> Result<(OutputFormat, gst_video::VideoInfo), MappingError> {
    let s = caps.structure(0).ok_or(MappingError::Unresolved)?;
    if !s.has_name(RAW_VIDEO) {
        return Err(MappingError::NotRaw(s.name().to_string()));
    }
    let tag = s
        .get::<&str>("format")
        .map_err(|_| MappingError::MissingFormat)?;
    let chroma = Chroma::from_engine(gst_video::VideoFormat::from_string(tag))
        .ok_or_else(|| MappingError::UnknownFormat(tag.to_owned()))?;
    let info =
        gst_video::VideoInfo::from_caps(caps).map_err(|e| MappingError::Info(e.to_string()))?;

    let aspect_ratio = s
        .get::<gst::Fraction>("pixel-aspect-ratio")
        .ok()
        .and_then(ratio)
        .unwrap_or(Ratio::new(1, 1));
    let frame_rate = s
        .get::<gst::Fraction>("framerate")
        .ok()
        .and_then(ratio)
        .or(input_frame_rate);

    let format = OutputFormat {
        chroma,
        width: info.width(),
        height: info.height(),
        aspect_ratio,
        frame_rate,
    };
    Ok((format, info))
}

/// Resolves the output format once and keeps it for the lifetime of the pipeline.
pub struct OutputResolver {
    input_frame_rate: Option<Ratio>,
    resolved: Option<(OutputFormat, gst_video::VideoInfo)>,
}

impl OutputResolver {
    pub fn new(desc: &CodecDescriptor) -> Self {
        OutputResolver {
            input_frame_rate: desc.valid_frame_rate(),
            resolved: None,
        }
    }

    /// Resolves the output format from `caps`, unless it is already resolved in which case the
    /// cached format is returned and `caps` ignored.
    pub fn resolve(&mut self, caps: &gst::CapsRef) -> Result<&OutputFormat, MappingError> {
        if self.resolved.is_none() {
            let (format, info) = resolve_format(caps, self.input_frame_rate)?;
            debug!("output format resolved to {:?} from {}", format, caps);
            self.resolved = Some((format, info));
        }
        self.format().ok_or(MappingError::Unresolved)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn format(&self) -> Option<&OutputFormat> {
        self.resolved.as_ref().map(|(format, _)| format)
    }

    pub fn video_info(&self) -> Option<&gst_video::VideoInfo> {
        self.resolved.as_ref().map(|(_, info)| info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::CodecId;

    fn raw(format: &str) -> gst::Caps {
        gst::init().unwrap();
        gst::Caps::builder(RAW_VIDEO)
            .field("format", format)
            .field("width", 1920i32)
            .field("height", 1080i32)
            .build()
    }

    #[test]
    fn fallbacks() {
        let caps = raw("I420");
        let (format, info) = resolve_format(&caps, Some(Ratio::new(25, 1))).unwrap();
        assert_eq!(format.chroma, Chroma::I420);
        assert_eq!((format.width, format.height), (1920, 1080));
        assert_eq!(format.aspect_ratio, Ratio::new(1, 1));
        assert_eq!(format.frame_rate, Some(Ratio::new(25, 1)));
        assert_eq!(info.size(), 1920 * 1080 * 3 / 2);

        let mut caps = raw("NV12");
        caps.make_mut()
            .set("pixel-aspect-ratio", gst::Fraction::new(0, 1));
        caps.make_mut().set("framerate", gst::Fraction::new(0, 1));
        let (format, _) = resolve_format(&caps, None).unwrap();
        assert_eq!(format.aspect_ratio, Ratio::new(1, 1));
        assert_eq!(format.frame_rate, None);
    }

    #[test]
    fn negotiated_values_win() {
        let mut caps = raw("Y42B");
        caps.make_mut()
            .set("pixel-aspect-ratio", gst::Fraction::new(4, 3));
        caps.make_mut()
            .set("framerate", gst::Fraction::new(30000, 1001));
        let (format, _) = resolve_format(&caps, Some(Ratio::new(25, 1))).unwrap();
        assert_eq!(format.chroma, Chroma::I422);
        assert_eq!(format.aspect_ratio, Ratio::new(4, 3));
        assert_eq!(format.frame_rate, Some(Ratio::new(30000, 1001)));
    }

    #[test]
    fn mapping_failures() {
        assert_eq!(
            resolve_format(&raw("AYUV"), None).unwrap_err(),
            MappingError::UnknownFormat("AYUV".to_owned())
        );
        assert_eq!(
            resolve_format(&raw("P010"), None).unwrap_err(),
            MappingError::UnknownFormat("P010".to_owned())
        );
        assert_eq!(
            resolve_format(&gst::Caps::new_empty_simple(RAW_VIDEO), None).unwrap_err(),
            MappingError::MissingFormat
        );
        assert!(matches!(
            resolve_format(
                &gst::Caps::builder(RAW_VIDEO).field("format", "I420").build(),
                None
            ),
            Err(MappingError::Info(_))
        ));
        assert!(matches!(
            resolve_format(&gst::Caps::new_empty_simple("video/x-h264"), None),
            Err(MappingError::NotRaw(_))
        ));
        assert_eq!(
            resolve_format(&gst::Caps::new_empty(), None).unwrap_err(),
            MappingError::Unresolved
        );
    }

    #[test]
    fn resolved_once() {
        let mut resolver = OutputResolver::new(&CodecDescriptor::new(CodecId::H264));
        assert!(!resolver.is_resolved());
        resolver.resolve(&raw("I420")).unwrap();

        let other = gst::Caps::builder(RAW_VIDEO)
            .field("format", "NV12")
            .field("width", 640i32)
            .field("height", 480i32)
            .build();
        let format = resolver.resolve(&other).unwrap();
        assert_eq!(format.chroma, Chroma::I420);
        assert_eq!(format.width, 1920);
        assert_eq!(resolver.video_info().unwrap().width(), 1920);
    }
}
