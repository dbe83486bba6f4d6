// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A video decoder element that decodes nothing.
//!
//! `fakevideodec` accepts a handful of compressed video formats and outputs one raw frame per
//! input buffer, every byte of the n-th output frame being `n as u8`. Its behavior is driven by
//! properties so that tests can script slow decoding, slow draining, output latency, errors,
//! warnings or rejected caps. [`Settings`] sets all of them at once.

use std::time::Duration;

use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use remain::sorted;
use thiserror::Error as ThisError;

mod imp;

glib::wrapper! {
    pub struct FakeVideoDec(ObjectSubclass<imp::FakeVideoDec>)
        @extends gst_video::VideoDecoder, gst::Element, gst::Object;
}

/// Name under which [`register`] makes the element available.
pub const FACTORY_NAME: &str = "fakevideodec";

#[sorted]
#[derive(ThisError, Debug)]
pub enum RegisterError {
    #[error("failed to initialize gstreamer: {0}")]
    Init(glib::Error),
    #[error("failed to register {name}: {source}")]
    Register {
        name: String,
        #[source]
        source: glib::BoolError,
    },
}

/// Registers the element as [`FACTORY_NAME`], ranked above every stock decoder.
pub fn register() -> Result<(), RegisterError> {
    register_as(FACTORY_NAME, gst::Rank::PRIMARY + 100)
}

/// Registers the element under another factory `name` and `rank`. Registering the same name
/// again is harmless.
pub fn register_as(name: &str, rank: gst::Rank) -> Result<(), RegisterError> {
    gst::init().map_err(RegisterError::Init)?;
    gst::Element::register(None, name, rank, FakeVideoDec::static_type()).map_err(|source| {
        RegisterError::Register {
            name: name.to_owned(),
            source,
        }
    })
}

/// Whether `element` is an instance of the fake decoder.
pub fn is_fake(element: &gst::Element) -> bool {
    element.is::<FakeVideoDec>()
}

/// Scripted behavior of a fake decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Raw format of the output frames.
    pub output_format: gst_video::VideoFormat,
    /// Number of frames held before the oldest one is output.
    pub latency: u32,
    /// Time spent in every frame.
    pub decode_delay: Duration,
    /// Time spent before outputting the held frames at end of stream.
    pub drain_delay: Duration,
    /// Fail every frame after that many were received.
    pub error_after: Option<u64>,
    /// Post a warning every that many frames.
    pub warn_every: Option<u64>,
    /// Post an informational message on that frame.
    pub info_at: Option<u64>,
    /// Refuse the input caps.
    pub reject_caps: bool,
    /// Refuse to start.
    pub fail_start: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            output_format: gst_video::VideoFormat::I420,
            latency: 0,
            decode_delay: Duration::ZERO,
            drain_delay: Duration::ZERO,
            error_after: None,
            warn_every: None,
            info_at: None,
            reject_caps: false,
            fail_start: false,
        }
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

impl Settings {
    /// Sets the properties of `element` to these settings. Elements other than fake decoders
    /// are left alone.
    pub fn apply(&self, element: &gst::Element) {
        if !is_fake(element) {
            return;
        }
        element.set_property("output-format", self.output_format.to_string());
        element.set_property("latency", self.latency);
        element.set_property("decode-delay", millis(self.decode_delay));
        element.set_property("drain-delay", millis(self.drain_delay));
        element.set_property("error-after", self.error_after.unwrap_or(0));
        element.set_property("warn-every", self.warn_every.unwrap_or(0));
        element.set_property("info-at", self.info_at.unwrap_or(0));
        element.set_property("reject-caps", self.reject_caps);
        element.set_property("fail-start", self.fail_start);
    }
}

/// Counters of a fake decoder instance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub flushes: u64,
}

impl Stats {
    /// Reads the counters of `element`, which must be a fake decoder.
    pub fn of(element: &gst::Element) -> Option<Stats> {
        if !is_fake(element) {
            return None;
        }
        Some(Stats {
            frames_in: element.property("frames-in"),
            frames_out: element.property("frames-out"),
            flushes: element.property("flushes"),
        })
    }
}
