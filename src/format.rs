// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Host-side description of compressed streams and decoded pictures.

use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use enumn::N;
use gstreamer_video::VideoFormat;

const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

/// Codec of a compressed elementary stream, tagged with its host fourcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, N)]
#[repr(u32)]
pub enum CodecId {
    Av1 = fourcc(b"av01"),
    Flv1 = fourcc(b"FLV1"),
    H264 = fourcc(b"h264"),
    Hevc = fourcc(b"hevc"),
    Mp4v = fourcc(b"mp4v"),
    Mpgv = fourcc(b"mpgv"),
    Vc1 = fourcc(b"VC-1"),
    Vp8 = fourcc(b"VP80"),
    Vp9 = fourcc(b"VP90"),
    Wmv1 = fourcc(b"WMV1"),
    Wmv2 = fourcc(b"WMV2"),
    Wmv3 = fourcc(b"WMV3"),
}

impl CodecId {
    pub fn fourcc(self) -> u32 {
        self as u32
    }

    pub fn from_fourcc(fourcc: u32) -> Option<CodecId> {
        CodecId::n(fourcc)
    }
}

impl Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bytes = self.fourcc().to_le_bytes();
        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

impl FromStr for CodecId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use CodecId::*;
        Ok(match s.to_ascii_lowercase().as_str() {
            "av1" => Av1,
            "flv1" => Flv1,
            "h264" => H264,
            "hevc" => Hevc,
            "mp4v" => Mp4v,
            "mpgv" => Mpgv,
            "vc1" => Vc1,
            "vp8" => Vp8,
            "vp9" => Vp9,
            "wmv1" => Wmv1,
            "wmv2" => Wmv2,
            "wmv3" => Wmv3,
            _ => return Err(format!("unknown codec {}", s)),
        })
    }
}

/// A `num/den` ratio. Either term being zero means the ratio is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    pub num: u32,
    pub den: u32,
}

impl Ratio {
    pub const fn new(num: u32, den: u32) -> Self {
        Ratio { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num != 0 && self.den != 0
    }
}

impl Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Description of a compressed stream handed to the decoder at open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub codec: CodecId,
    /// Coded width in pixels, 0 if unknown.
    pub width: u32,
    /// Coded height in pixels, 0 if unknown.
    pub height: u32,
    pub frame_rate: Option<Ratio>,
    pub aspect_ratio: Option<Ratio>,
    /// Out-of-band codec configuration, empty if none.
    pub extra: Vec<u8>,
}

impl CodecDescriptor {
    pub fn new(codec: CodecId) -> Self {
        CodecDescriptor {
            codec,
            width: 0,
            height: 0,
            frame_rate: None,
            aspect_ratio: None,
            extra: Vec::new(),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_frame_rate(mut self, num: u32, den: u32) -> Self {
        self.frame_rate = Some(Ratio::new(num, den));
        self
    }

    pub fn with_aspect_ratio(mut self, num: u32, den: u32) -> Self {
        self.aspect_ratio = Some(Ratio::new(num, den));
        self
    }

    pub fn with_extra(mut self, extra: Vec<u8>) -> Self {
        self.extra = extra;
        self
    }

    /// Frame rate, if known.
    pub fn valid_frame_rate(&self) -> Option<Ratio> {
        self.frame_rate.filter(Ratio::is_valid)
    }
}

/// Pixel formats of host pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chroma {
    Bgra,
    Grey,
    I420,
    I422,
    I444,
    Nv12,
    Nv21,
    Rgba,
    Rv24,
    Uyvy,
    Yuyv,
    Yv12,
}

impl Chroma {
    /// Host equivalent of an engine pixel format, if there is one.
    pub fn from_engine(format: VideoFormat) -> Option<Chroma> {
        Some(match format {
            VideoFormat::Bgra => Chroma::Bgra,
            VideoFormat::Gray8 => Chroma::Grey,
            VideoFormat::I420 => Chroma::I420,
            VideoFormat::Nv12 => Chroma::Nv12,
            VideoFormat::Nv21 => Chroma::Nv21,
            VideoFormat::Rgb => Chroma::Rv24,
            VideoFormat::Rgba => Chroma::Rgba,
            VideoFormat::Uyvy => Chroma::Uyvy,
            VideoFormat::Y42b => Chroma::I422,
            VideoFormat::Y444 => Chroma::I444,
            VideoFormat::Yuy2 => Chroma::Yuyv,
            VideoFormat::Yv12 => Chroma::Yv12,
            _ => return None,
        })
    }

    /// Subsampling shifts and bytes per pixel of each plane of a picture of this format.
    pub(crate) fn planes(&self) -> &'static [(u32, u32, usize)] {
        use Chroma::*;
        match self {
            I420 | Yv12 => &[(0, 0, 1), (1, 1, 1), (1, 1, 1)],
            I422 => &[(0, 0, 1), (1, 0, 1), (1, 0, 1)],
            I444 => &[(0, 0, 1), (0, 0, 1), (0, 0, 1)],
            Nv12 | Nv21 => &[(0, 0, 1), (1, 1, 2)],
            Grey => &[(0, 0, 1)],
            Uyvy | Yuyv => &[(0, 0, 2)],
            Rv24 => &[(0, 0, 3)],
            Bgra | Rgba => &[(0, 0, 4)],
        }
    }
}

/// Format of the pictures output by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub chroma: Chroma,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: Ratio,
    pub frame_rate: Option<Ratio>,
}
