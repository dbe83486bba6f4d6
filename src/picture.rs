// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Host pictures receiving decoded frames.

use gstreamer_video::VideoFrameExt;
use gstreamer_video::VideoFrameRef;

use crate::error::MappingError;
use crate::format::OutputFormat;

/// Row alignment of the planes of pictures allocated by [`DefaultAllocator`].
const PITCH_ALIGN: usize = 32;

/// One plane of a picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    /// Bytes between the starts of two consecutive rows.
    pub pitch: usize,
    /// Number of rows.
    pub lines: usize,
    /// Meaningful bytes of each row.
    pub visible_pitch: usize,
    pub data: Vec<u8>,
}

impl Plane {
    pub fn row(&self, line: usize) -> &[u8] {
        let start = line * self.pitch;
        &self.data[start..start + self.visible_pitch]
    }
}

/// A decoded picture, owned by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    pub format: OutputFormat,
    pub planes: Vec<Plane>,
    /// Presentation timestamp in microseconds, if the frame had one.
    pub date: Option<u64>,
}

impl Picture {
    /// Allocates a zeroed picture of `format`, with rows aligned to `pitch_align` bytes.
    pub fn new(format: &OutputFormat, pitch_align: usize) -> Option<Picture> {
        let align = pitch_align.max(1);
        let mut planes = Vec::new();
        for &(w_shift, h_shift, pstride) in format.chroma.planes() {
            let visible_pitch = subsample(format.width, w_shift).checked_mul(pstride)?;
            let pitch = visible_pitch.checked_add(align - 1)? / align * align;
            let lines = subsample(format.height, h_shift);
            let mut data = Vec::new();
            data.try_reserve_exact(pitch.checked_mul(lines)?).ok()?;
            data.resize(pitch * lines, 0);
            planes.push(Plane {
                pitch,
                lines,
                visible_pitch,
                data,
            });
        }
        Some(Picture {
            format: *format,
            planes,
            date: None,
        })
    }
}

fn subsample(len: u32, shift: u32) -> usize {
    ((u64::from(len) + (1 << shift) - 1) >> shift) as usize
}

/// Provides the pictures decoded frames are copied into.
pub trait PictureAllocator {
    /// Returns a picture of `format`, or `None` if none is available right now.
    fn allocate(&mut self, format: &OutputFormat) -> Option<Picture>;
}

/// Allocates pictures on the heap.
#[derive(Debug, Default)]
pub struct DefaultAllocator;

impl PictureAllocator for DefaultAllocator {
    fn allocate(&mut self, format: &OutputFormat) -> Option<Picture> {
        Picture::new(format, PITCH_ALIGN)
    }
}

/// Copies `frame` into `picture`, plane by plane and row by row. Each plane gets as many rows as
/// both sides have, each `comp_width * comp_pstride` bytes long, so that different strides on
/// both sides never lead to reading or writing out of bounds.
pub fn copy_frame<T>(frame: &VideoFrameRef<T>, picture: &mut Picture) -> Result<(), MappingError> {
    let n_planes = frame.n_planes() as usize;
    for (i, plane) in picture.planes.iter_mut().enumerate().take(n_planes) {
        let src = frame
            .plane_data(i as u32)
            .map_err(|e| MappingError::Frame(e.to_string()))?;
        let src_stride = usize::try_from(frame.plane_stride()[i]).unwrap_or(0);
        let component = i as u8;
        let pstride = usize::try_from(frame.comp_pstride(component.into())).unwrap_or(0);
        let rows = plane.lines.min(frame.comp_height(component.into()) as usize);
        let row_bytes = (frame.comp_width(component.into()) as usize * pstride)
            .min(plane.pitch)
            .min(src_stride);
        for row in 0..rows {
            let s = row * src_stride;
            let d = row * plane.pitch;
            if s + row_bytes > src.len() {
                break;
            }
            plane.data[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
        }
    }
    Ok(())
}
