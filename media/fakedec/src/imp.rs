// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::thread;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer::subclass::prelude::*;
use gstreamer_video as gst_video;
use gstreamer_video::prelude::*;
use gstreamer_video::subclass::prelude::*;
use log::debug;
use once_cell::sync::Lazy;

use crate::Settings;

static CAT: Lazy<gst::DebugCategory> = Lazy::new(|| {
    gst::DebugCategory::new(
        "fakevideodec",
        gst::DebugColorFlags::empty(),
        Some("Fake video decoder"),
    )
});

/// Output size when the input caps carry none.
const DEFAULT_SIZE: (u32, u32) = (320, 240);

#[derive(Default)]
struct Counters {
    frames_in: u64,
    frames_out: u64,
    flushes: u64,
}

#[derive(Default)]
pub struct FakeVideoDec {
    settings: Mutex<Settings>,
    counters: Mutex<Counters>,
}

impl FakeVideoDec {
    fn settings(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn counters(&self) -> MutexGuard<Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn output(
        &self,
        mut frame: gst_video::VideoCodecFrame,
    ) -> Result<gst::FlowSuccess, gst::FlowError> {
        let instance = self.obj();
        instance.allocate_output_frame(&mut frame, None)?;
        let sequence = {
            let mut counters = self.counters();
            counters.frames_out += 1;
            counters.frames_out
        };
        if let Some(buffer) = frame.output_buffer_mut() {
            let mut map = buffer.map_writable().map_err(|_| gst::FlowError::Error)?;
            map.as_mut_slice().fill(sequence as u8);
        }
        instance.finish_frame(frame)
    }

    /// Outputs every frame still held.
    fn drain_held(&self) -> Result<gst::FlowSuccess, gst::FlowError> {
        let delay = self.settings().drain_delay;
        if !delay.is_zero() {
            debug!("draining in {:?}", delay);
            thread::sleep(delay);
        }
        while let Some(frame) = self.obj().oldest_frame() {
            self.output(frame)?;
        }
        Ok(gst::FlowSuccess::Ok)
    }
}

#[glib::object_subclass]
impl ObjectSubclass for FakeVideoDec {
    const NAME: &'static str = "DecodeBridgeFakeVideoDec";
    type Type = super::FakeVideoDec;
    type ParentType = gst_video::VideoDecoder;
}

impl ObjectImpl for FakeVideoDec {
    fn properties() -> &'static [glib::ParamSpec] {
        static PROPERTIES: Lazy<Vec<glib::ParamSpec>> = Lazy::new(|| {
            vec![
                glib::ParamSpecString::builder("output-format")
                    .blurb("Raw format of the output frames")
                    .default_value(Some("I420"))
                    .build(),
                glib::ParamSpecUInt::builder("latency")
                    .blurb("Number of frames held before the oldest one is output")
                    .build(),
                glib::ParamSpecUInt64::builder("decode-delay")
                    .blurb("Time spent in every frame, in milliseconds")
                    .build(),
                glib::ParamSpecUInt64::builder("drain-delay")
                    .blurb("Time spent before draining at end of stream, in milliseconds")
                    .build(),
                glib::ParamSpecUInt64::builder("error-after")
                    .blurb("Fail every frame after that many, 0 to never fail")
                    .build(),
                glib::ParamSpecUInt64::builder("warn-every")
                    .blurb("Post a warning every that many frames, 0 for none")
                    .build(),
                glib::ParamSpecUInt64::builder("info-at")
                    .blurb("Post an informational message on that frame, 0 for none")
                    .build(),
                glib::ParamSpecBoolean::builder("reject-caps")
                    .blurb("Refuse the input caps")
                    .build(),
                glib::ParamSpecBoolean::builder("fail-start")
                    .blurb("Refuse to start")
                    .build(),
                glib::ParamSpecUInt64::builder("frames-in")
                    .blurb("Number of frames received")
                    .read_only()
                    .build(),
                glib::ParamSpecUInt64::builder("frames-out")
                    .blurb("Number of frames output")
                    .read_only()
                    .build(),
                glib::ParamSpecUInt64::builder("flushes")
                    .blurb("Number of flushes")
                    .read_only()
                    .build(),
            ]
        });
        PROPERTIES.as_ref()
    }

    fn set_property(&self, _id: usize, value: &glib::Value, pspec: &glib::ParamSpec) {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        let nonzero = |v: u64| (v != 0).then_some(v);
        match pspec.name() {
            "output-format" => {
                let format = value.get::<Option<String>>().ok().flatten();
                settings.output_format = format
                    .map(|f| gst_video::VideoFormat::from_string(&f))
                    .unwrap_or(gst_video::VideoFormat::I420);
            }
            "latency" => settings.latency = value.get().unwrap_or_default(),
            "decode-delay" => {
                settings.decode_delay = Duration::from_millis(value.get().unwrap_or_default())
            }
            "drain-delay" => {
                settings.drain_delay = Duration::from_millis(value.get().unwrap_or_default())
            }
            "error-after" => settings.error_after = nonzero(value.get().unwrap_or_default()),
            "warn-every" => settings.warn_every = nonzero(value.get().unwrap_or_default()),
            "info-at" => settings.info_at = nonzero(value.get().unwrap_or_default()),
            "reject-caps" => settings.reject_caps = value.get().unwrap_or_default(),
            "fail-start" => settings.fail_start = value.get().unwrap_or_default(),
            name => debug!("ignoring write to {}", name),
        }
    }

    fn property(&self, _id: usize, pspec: &glib::ParamSpec) -> glib::Value {
        let settings = self.settings();
        let counters = self.counters();
        match pspec.name() {
            "output-format" => settings.output_format.to_string().to_value(),
            "latency" => settings.latency.to_value(),
            "decode-delay" => crate::millis(settings.decode_delay).to_value(),
            "drain-delay" => crate::millis(settings.drain_delay).to_value(),
            "error-after" => settings.error_after.unwrap_or(0).to_value(),
            "warn-every" => settings.warn_every.unwrap_or(0).to_value(),
            "info-at" => settings.info_at.unwrap_or(0).to_value(),
            "reject-caps" => settings.reject_caps.to_value(),
            "fail-start" => settings.fail_start.to_value(),
            "frames-in" => counters.frames_in.to_value(),
            "frames-out" => counters.frames_out.to_value(),
            "flushes" => counters.flushes.to_value(),
            _ => pspec.default_value().clone(),
        }
    }
}

impl GstObjectImpl for FakeVideoDec {}

impl ElementImpl for FakeVideoDec {
    fn metadata() -> Option<&'static gst::subclass::ElementMetadata> {
        static ELEMENT_METADATA: Lazy<gst::subclass::ElementMetadata> = Lazy::new(|| {
            gst::subclass::ElementMetadata::new(
                "Fake video decoder",
                "Codec/Decoder/Video",
                "Outputs a frame of constant bytes for every input buffer",
                "The ChromiumOS Authors",
            )
        });
        Some(&*ELEMENT_METADATA)
    }

    fn pad_templates() -> &'static [gst::PadTemplate] {
        static PAD_TEMPLATES: Lazy<Vec<gst::PadTemplate>> = Lazy::new(|| {
            let sink_caps = gst::Caps::builder_full()
                .structure(gst::Structure::new_empty("video/x-h264"))
                .structure(gst::Structure::new_empty("video/x-vp8"))
                .structure(
                    gst::Structure::builder("video/mpeg")
                        .field("mpegversion", 2i32)
                        .field("systemstream", false)
                        .build(),
                )
                .structure(gst::Structure::new_empty("video/x-wmv"))
                .build();
            let src_caps = gst_video::VideoCapsBuilder::new().build();
            [
                gst::PadTemplate::new(
                    "sink",
                    gst::PadDirection::Sink,
                    gst::PadPresence::Always,
                    &sink_caps,
                ),
                gst::PadTemplate::new(
                    "src",
                    gst::PadDirection::Src,
                    gst::PadPresence::Always,
                    &src_caps,
                ),
            ]
            .into_iter()
            .filter_map(Result::ok)
            .collect()
        });
        PAD_TEMPLATES.as_ref()
    }
}

impl VideoDecoderImpl for FakeVideoDec {
    fn start(&self) -> Result<(), gst::ErrorMessage> {
        if self.settings().fail_start {
            return Err(gst::error_msg!(
                gst::CoreError::StateChange,
                ["refusing to start"]
            ));
        }
        Ok(())
    }

    fn set_format(
        &self,
        state: &gst_video::VideoCodecState<'static, gst_video::video_codec_state::Readable>,
    ) -> Result<(), gst::LoggableError> {
        let settings = self.settings();
        if settings.reject_caps {
            return Err(gst::loggable_error!(CAT, "rejecting input caps"));
        }
        let info = state.info();
        let (width, height) = if info.width() > 0 && info.height() > 0 {
            (info.width(), info.height())
        } else {
            DEFAULT_SIZE
        };
        let instance = self.obj();
        let output_state = instance
            .set_output_state(settings.output_format, width, height, Some(state))
            .map_err(|_| gst::loggable_error!(CAT, "failed to set the output state"))?;
        instance
            .negotiate(output_state)
            .map_err(|_| gst::loggable_error!(CAT, "failed to negotiate the output"))?;
        Ok(())
    }

    fn handle_frame(
        &self,
        frame: gst_video::VideoCodecFrame,
    ) -> Result<gst::FlowSuccess, gst::FlowError> {
        let settings = self.settings();
        let n = {
            let mut counters = self.counters();
            counters.frames_in += 1;
            counters.frames_in
        };
        if !settings.decode_delay.is_zero() {
            thread::sleep(settings.decode_delay);
        }
        if settings.error_after.is_some_and(|limit| n > limit) {
            gst::element_imp_error!(self, gst::StreamError::Decode, ["failed to decode frame {}", n]);
            return Err(gst::FlowError::Error);
        }
        if settings.warn_every.is_some_and(|every| n % every == 0) {
            gst::element_imp_warning!(self, gst::StreamError::Decode, ["frame {} is damaged", n]);
        }
        if settings.info_at == Some(n) {
            gst::element_imp_info!(self, gst::StreamError::Decode, ["reached frame {}", n]);
        }

        // The base class keeps the frame until it is finished.
        drop(frame);
        let latency = usize::try_from(settings.latency).unwrap_or(usize::MAX);
        let instance = self.obj();
        while instance.frames().len() > latency {
            match instance.oldest_frame() {
                Some(oldest) => self.output(oldest)?,
                None => break,
            };
        }
        Ok(gst::FlowSuccess::Ok)
    }

    fn finish(&self) -> Result<gst::FlowSuccess, gst::FlowError> {
        self.drain_held()
    }

    fn flush(&self) -> bool {
        self.counters().flushes += 1;
        true
    }
}
