// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Synchronous block decoding on top of the asynchronous engine pipeline.

use std::sync::Arc;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use log::debug;
use log::error;
use log::info;
use log::warn;

use crate::block::Block;
use crate::block::BlockFlags;
use crate::config::DecoderConfig;
use crate::error::ConstructionError;
use crate::error::MappingError;
use crate::error::OpenError;
use crate::error::RuntimeError;
use crate::format::CodecDescriptor;
use crate::format::OutputFormat;
use crate::format::Ratio;
use crate::negotiate::translate;
use crate::picture::copy_frame;
use crate::picture::Picture;
use crate::picture::PictureAllocator;
use crate::pipeline::Notification;
use crate::pipeline::PipelineGraph;
use crate::queue::BridgeQueue;
use crate::queue::DecodedUnit;
use crate::resolver::OutputResolver;
use crate::selector::select;
use crate::selector::EngineRegistry;
use crate::selector::SelectionMode;

/// Bus messages handled by a single call, at most.
const MAX_MESSAGES_PER_CALL: usize = 64;

/// What the decoder is doing. Only observable between calls as `Idle` or `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    /// Handing the input block to the engine.
    Feeding,
    /// Processing engine messages and collecting output.
    Draining,
    /// Closed; every further call is a no-op.
    Closing,
}

fn us_to_clock(us: u64) -> Option<gst::ClockTime> {
    let ns = us.checked_mul(gst::ClockTime::USECOND.nseconds())?;
    // All ones is the engine's "no time".
    (ns != u64::MAX).then(|| gst::ClockTime::from_nseconds(ns))
}

/// Duration of one frame at `frame_rate`.
fn frame_duration(frame_rate: Ratio) -> Option<gst::ClockTime> {
    if !frame_rate.is_valid() {
        return None;
    }
    gst::ClockTime::SECOND.mul_div_floor(u64::from(frame_rate.den), u64::from(frame_rate.num))
}

/// A decoder instance: takes compressed blocks one at a time and returns decoded pictures as
/// they come out of the engine.
///
/// Once a [`RuntimeError`] occurs, it sticks: no more data is handed to the engine and no more
/// picture is returned until the decoder is closed.
pub struct BridgeDecoder {
    graph: PipelineGraph,
    resolver: OutputResolver,
    frame_rate: Option<Ratio>,
    mode: SelectionMode,
    state: DriverState,
    prerolled: bool,
    error: Option<RuntimeError>,
}

impl BridgeDecoder {
    /// Builds and starts a decoding pipeline for the stream described by `desc`.
    pub fn open(
        desc: &CodecDescriptor,
        config: &DecoderConfig,
        registry: &dyn EngineRegistry,
    ) -> Result<Self, OpenError> {
        gst::init().map_err(ConstructionError::Init)?;
        let query = translate(desc)?;
        let mode = config.selection_mode();
        let selection = select(registry, &query, mode)?;
        let mut graph = PipelineGraph::build(
            &query,
            selection,
            registry.configurator(),
            Arc::new(BridgeQueue::new()),
        )?;
        graph.activate()?;
        info!("opened {:?} decoder for {}", mode, query.sink);

        Ok(BridgeDecoder {
            graph,
            resolver: OutputResolver::new(desc),
            frame_rate: desc.valid_frame_rate(),
            mode,
            state: DriverState::Idle,
            prerolled: false,
            error: None,
        })
    }

    /// Hands `block` to the engine, if any, then returns the oldest decoded picture, if any.
    ///
    /// Blocks while the engine still holds the previous block. A block flagged as discontinuous
    /// flushes everything the engine and the decoder hold, and is itself dropped. Pictures are
    /// obtained from `allocator`; if it has none, the decoded frame is kept for a later call.
    pub fn decode(
        &mut self,
        block: Option<Block>,
        allocator: &mut dyn PictureAllocator,
    ) -> Option<Picture> {
        if self.state == DriverState::Closing || self.error.is_some() {
            return None;
        }

        if let Some(block) = block {
            self.state = DriverState::Feeding;
            self.feed(block);
        }

        self.state = DriverState::Draining;
        self.process_bus();
        let picture = if self.error.is_none() {
            self.harvest(allocator)
        } else {
            None
        };

        self.state = DriverState::Idle;
        picture
    }

    fn fail(&mut self, e: RuntimeError) {
        error!("decoder stopped: {}", e);
        if self.error.is_none() {
            self.error = Some(e);
        }
    }

    fn feed(&mut self, block: Block) {
        if block.flags.contains(BlockFlags::DISCONTINUITY) {
            self.flush();
            return;
        }
        if block.flags.contains(BlockFlags::CORRUPTED) {
            debug!("dropping corrupted block");
            return;
        }
        if block.is_empty() {
            return;
        }

        let dts = block.dts.and_then(us_to_clock);
        let pts = block.pts.and_then(us_to_clock).or(dts);
        let duration = block
            .duration
            .and_then(us_to_clock)
            .or_else(|| self.frame_rate.and_then(frame_duration));

        let mut buffer = gst::Buffer::from_slice(block.into_payload());
        {
            let buffer = buffer.make_mut();
            buffer.set_pts(pts);
            buffer.set_dts(dts);
            buffer.set_duration(duration);
        }

        if let Err(e) = self.graph.push(buffer) {
            self.fail(RuntimeError::Push(e));
        }
    }

    fn flush(&mut self) {
        debug!("discontinuity, flushing the pipeline");
        if let Err(e) = self.graph.seek_flush() {
            warn!("flushing seek failed: {}", e);
        }
        self.prerolled = false;
    }

    /// Acts on the pending messages of the engine, up to [`MAX_MESSAGES_PER_CALL`] of them.
    /// Stops at the first error.
    fn process_bus(&mut self) {
        for _ in 0..MAX_MESSAGES_PER_CALL {
            let Some(message) = self.graph.pop_message() else {
                return;
            };
            let source_name = message
                .src()
                .map(|src| src.name().to_string())
                .unwrap_or_default();
            match Notification::from_message(&message) {
                Some(notification) => self.process_notification(notification, source_name),
                None => self.process_status(&message, source_name),
            }
            if self.error.is_some() {
                return;
            }
        }
        debug!("more than {} engine messages pending", MAX_MESSAGES_PER_CALL);
    }

    fn process_notification(&mut self, notification: Notification, source_name: String) {
        match notification {
            Notification::OutputNegotiated(caps) => {
                debug!("{} negotiated its output: {}", source_name, caps);
                if let Err(e) = self.resolver.resolve(&caps) {
                    self.fail(e.into());
                }
            }
            Notification::LinkFailed(reason) => {
                if self.graph.is_decode_linked() {
                    warn!("{}: ignoring output: {}", source_name, reason);
                } else {
                    self.fail(RuntimeError::Link(reason));
                }
            }
            Notification::NoMoreOutputs => {
                if !self.graph.is_decode_linked() {
                    self.fail(RuntimeError::Engine {
                        source_name,
                        message: "failed to link decode out pad".to_owned(),
                    });
                }
            }
        }
    }

    fn process_status(&mut self, message: &gst::MessageRef, source_name: String) {
        use gst::MessageView;

        match message.view() {
            MessageView::AsyncDone(_) => {
                debug!("pipeline prerolled");
                self.prerolled = true;
            }
            MessageView::Error(e) => self.fail(RuntimeError::Engine {
                source_name,
                message: e.error().to_string(),
            }),
            MessageView::Warning(w) => warn!("{}: {}", source_name, w.error()),
            MessageView::Info(i) => info!("{}: {}", source_name, i.error()),
            MessageView::Eos(_) => warn!("unexpected end of stream from {}", source_name),
            _ => (),
        }
    }

    fn harvest(&mut self, allocator: &mut dyn PictureAllocator) -> Option<Picture> {
        let unit = self.graph.queue().pop()?;
        match self.convert(&unit, allocator) {
            Ok(Some(picture)) => Some(picture),
            Ok(None) => {
                self.graph.queue().unpop(unit);
                None
            }
            Err(e) => {
                self.fail(e.into());
                None
            }
        }
    }

    /// Copies `unit` into a new picture. Returns `None` if the unit must stay queued.
    fn convert(
        &mut self,
        unit: &DecodedUnit,
        allocator: &mut dyn PictureAllocator,
    ) -> Result<Option<Picture>, MappingError> {
        if !self.resolver.is_resolved() {
            let Some(caps) = &unit.caps else {
                debug!("decoded frame has no caps yet");
                return Ok(None);
            };
            self.resolver.resolve(caps)?;
        }
        let format = *self.resolver.format().ok_or(MappingError::Unresolved)?;
        let info = self.resolver.video_info().ok_or(MappingError::Unresolved)?;
        let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(&unit.buffer, info)
            .map_err(|e| MappingError::Frame(e.to_string()))?;

        let mut picture = match allocator.allocate(&format) {
            Some(picture) => picture,
            None => {
                debug!("no picture available, keeping the decoded frame");
                return Ok(None);
            }
        };
        picture.date = unit.pts().map(gst::ClockTime::useconds);
        if picture.date.is_none() {
            warn!("decoded frame has no timestamp");
        }
        copy_frame(&frame, &mut picture)?;
        Ok(Some(picture))
    }

    /// Stops the pipeline and releases everything it holds. Further calls to
    /// [`BridgeDecoder::decode`] return nothing.
    pub fn close(&mut self) {
        if self.state == DriverState::Closing {
            return;
        }
        self.state = DriverState::Closing;
        self.graph.shutdown();
        debug!("decoder closed");
    }

    /// The error that stopped the decoder, if any.
    pub fn error(&self) -> Option<&RuntimeError> {
        self.error.as_ref()
    }

    pub fn output_format(&self) -> Option<&OutputFormat> {
        self.resolver.format()
    }

    /// Whether the engine produced output since it started or was last flushed.
    pub fn is_prerolled(&self) -> bool {
        self.prerolled
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn selection_mode(&self) -> SelectionMode {
        self.mode
    }
}

impl Drop for BridgeDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;
    use std::time::Instant;

    use fakedec::Settings;

    use super::*;
    use crate::fake::FakeRegistry;
    use crate::format::CodecId;
    use crate::picture::DefaultAllocator;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Allocator that never has a picture, so decoded frames stay queued.
    struct NoPictures;

    impl PictureAllocator for NoPictures {
        fn allocate(&mut self, _format: &OutputFormat) -> Option<Picture> {
            None
        }
    }

    fn open(settings: Settings) -> (BridgeDecoder, FakeRegistry) {
        let registry = FakeRegistry::new(settings).unwrap();
        let desc = CodecDescriptor::new(CodecId::Vp8).with_size(16, 16);
        let decoder = BridgeDecoder::open(&desc, &DecoderConfig::default(), &registry).unwrap();
        (decoder, registry)
    }

    fn block(pts: u64) -> Block {
        Block::new(vec![0u8; 8]).with_pts(pts)
    }

    fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let start = Instant::now();
        while !condition() {
            assert!(start.elapsed() < TIMEOUT, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn timestamp_conversions() {
        assert_eq!(us_to_clock(40_000), Some(gst::ClockTime::from_mseconds(40)));
        assert_eq!(us_to_clock(u64::MAX), None);
        assert_eq!(
            frame_duration(Ratio::new(25, 1)),
            Some(gst::ClockTime::from_mseconds(40))
        );
        assert_eq!(
            frame_duration(Ratio::new(30000, 1001)),
            Some(gst::ClockTime::from_nseconds(33_366_666))
        );
        assert_eq!(frame_duration(Ratio::new(0, 1)), None);
    }

    #[test]
    fn discontinuity_empties_queue_right_away() {
        let (mut decoder, _registry) = open(Settings::default());
        for i in 0..3 {
            assert!(decoder.decode(Some(block(i * 40_000)), &mut NoPictures).is_none());
        }
        wait_until("three decoded frames", || decoder.graph.queue().len() == 3);

        let discontinuity = block(1_000_000).with_flags(BlockFlags::DISCONTINUITY);
        assert!(decoder.decode(Some(discontinuity), &mut NoPictures).is_none());
        assert_eq!(decoder.graph.queue().len(), 0);
        assert!(!decoder.is_prerolled());
        assert!(decoder.error().is_none());
    }

    #[test]
    fn pending_warnings_are_drained_together() {
        let (mut decoder, registry) = open(Settings {
            warn_every: Some(1),
            ..Default::default()
        });
        for i in 0..10 {
            decoder.decode(Some(block(i * 40_000)), &mut NoPictures);
        }
        // Every frame was decoded, so every warning is on the bus.
        wait_until("ten decoded frames", || decoder.graph.queue().len() == 10);
        assert_eq!(registry.stats().unwrap().frames_out, 10);

        assert!(decoder.decode(None, &mut DefaultAllocator).is_some());
        while let Some(message) = decoder.graph.pop_message() {
            assert_ne!(message.type_(), gst::MessageType::Warning);
        }
        assert!(decoder.error().is_none());
    }

    #[test]
    fn error_behind_warnings_is_reported() {
        let (mut decoder, _registry) = open(Settings {
            warn_every: Some(1),
            error_after: Some(5),
            ..Default::default()
        });
        for i in 0..6 {
            decoder.decode(Some(block(i * 40_000)), &mut DefaultAllocator);
        }
        wait_until("the engine error", || {
            decoder.decode(None, &mut DefaultAllocator);
            decoder.error().is_some()
        });
        match decoder.error() {
            Some(RuntimeError::Engine { source_name, .. }) => assert_eq!(source_name, "decode"),
            e => panic!("unexpected error {:?}", e),
        }
    }
}
