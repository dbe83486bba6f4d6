// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Assembly and teardown of the source → decode → sink pipeline.

use std::sync::Arc;

use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use log::debug;
use log::warn;

use crate::error::ConstructionError;
use crate::negotiate::CapabilityQuery;
use crate::queue::BridgeQueue;
use crate::selector::ElementConfigurator;
use crate::selector::Selection;

/// Bytes of input the source holds before pushes block: any pending buffer blocks the next one.
const SOURCE_BACKLOG_BYTES: u64 = 1;
/// How long closing waits for the pipeline to finish processing pending data.
const EOS_TIMEOUT_SECONDS: u64 = 2;

const PIPELINE_NAME: &str = "decode_bridge";
const SOURCE_NAME: &str = "source";
const DECODE_NAME: &str = "decode";
const SINK_NAME: &str = "sink";

const OUTPUT_NEGOTIATED: &str = "decode-bridge/output-negotiated";
const LINK_FAILED: &str = "decode-bridge/link-failed";
const NO_MORE_OUTPUTS: &str = "decode-bridge/no-more-outputs";

/// Structural events of the automatic decode container. They are posted on the bus from the
/// streaming thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The container exposed a decoded output with these caps, now linked to the sink.
    OutputNegotiated(gst::Caps),
    /// An exposed output could not be linked to the sink.
    LinkFailed(String),
    /// The container will not expose any other output.
    NoMoreOutputs,
}

impl Notification {
    fn into_message(self) -> gst::Message {
        let s = match self {
            Notification::OutputNegotiated(caps) => gst::Structure::builder(OUTPUT_NEGOTIATED)
                .field("caps", caps)
                .build(),
            Notification::LinkFailed(reason) => gst::Structure::builder(LINK_FAILED)
                .field("reason", reason)
                .build(),
            Notification::NoMoreOutputs => gst::Structure::new_empty(NO_MORE_OUTPUTS),
        };
        gst::message::Application::new(s)
    }

    /// The notification carried by `message`, if it is one.
    pub fn from_message(message: &gst::MessageRef) -> Option<Notification> {
        if message.type_() != gst::MessageType::Application {
            return None;
        }
        let s = message.structure()?;
        if s.has_name(OUTPUT_NEGOTIATED) {
            s.get::<gst::Caps>("caps")
                .ok()
                .map(Notification::OutputNegotiated)
        } else if s.has_name(LINK_FAILED) {
            s.get::<String>("reason").ok().map(Notification::LinkFailed)
        } else if s.has_name(NO_MORE_OUTPUTS) {
            Some(Notification::NoMoreOutputs)
        } else {
            None
        }
    }
}

fn create_error(name: &str, source: glib::BoolError) -> ConstructionError {
    ConstructionError::CreateElement {
        name: name.to_owned(),
        source,
    }
}

/// Links a newly exposed output of the decode container to the sink.
fn link_output(pad: &gst::Pad, sink_pad: &glib::WeakRef<gst::Pad>) -> Notification {
    let Some(caps) = pad.current_caps() else {
        return Notification::LinkFailed(format!("{} has no caps", pad.name()));
    };
    let Some(sink_pad) = sink_pad.upgrade() else {
        return Notification::LinkFailed("the sink is gone".to_owned());
    };
    if sink_pad.is_linked() {
        return Notification::LinkFailed(format!("{} exposed a second output", pad.name()));
    }
    match pad.link(&sink_pad) {
        Ok(_) => Notification::OutputNegotiated(caps),
        Err(e) => Notification::LinkFailed(format!("{:?}", e)),
    }
}

fn post(element: &gst::Element, notification: Notification) {
    let description = format!("{:?}", notification);
    if element.post_message(notification.into_message()).is_err() {
        warn!("failed to post {}", description);
    }
}

struct Stages {
    pipeline: gst::Pipeline,
    source: gst_app::AppSrc,
    sink: gst::Element,
    bus: gst::Bus,
}

/// The engine pipeline of a decoder instance. Decoded buffers are handed to a [`BridgeQueue`]
/// from the streaming thread.
pub struct PipelineGraph {
    stages: Option<Stages>,
    queue: Arc<BridgeQueue>,
    running: bool,
}

impl PipelineGraph {
    /// Builds the pipeline for `query`. In explicit mode every stage is linked, while the output
    /// of the automatic decode container is linked to the sink once it is exposed, which is
    /// reported by a [`Notification`] on the bus. `configurator` is applied to the decoder
    /// element in both modes.
    ///
    /// The pipeline is not started: see [`PipelineGraph::activate`].
    pub fn build(
        query: &CapabilityQuery,
        selection: Selection,
        configurator: Option<ElementConfigurator>,
        queue: Arc<BridgeQueue>,
    ) -> Result<Self, ConstructionError> {
        let pipeline = gst::Pipeline::with_name(PIPELINE_NAME);
        let bus = pipeline.bus().ok_or(ConstructionError::NoBus)?;

        let source = gst::ElementFactory::make("appsrc")
            .name(SOURCE_NAME)
            .property("caps", &query.sink)
            .property("format", gst::Format::Time)
            .property("block", true)
            .property("max-bytes", SOURCE_BACKLOG_BYTES)
            .property_from_str("stream-type", "seekable")
            .build()
            .map_err(|source| create_error("appsrc", source))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| create_error("appsrc", glib::bool_error!("not an application source")))?;
        source.set_callbacks(
            gst_app::AppSrcCallbacks::builder()
                .seek_data(|_, offset| {
                    debug!("source seeking to {}", offset);
                    true
                })
                .build(),
        );

        let explicit = matches!(selection, Selection::Explicit(_));
        let decode = match &selection {
            Selection::Explicit(factory) => {
                let decode = factory
                    .create()
                    .name(DECODE_NAME)
                    .build()
                    .map_err(|source| create_error(&factory.name(), source))?;
                if let Some(configure) = &configurator {
                    configure(&decode);
                }
                decode
            }
            Selection::Auto(candidates) => {
                debug!("{} candidates for the decode container", candidates.len());
                gst::ElementFactory::make("decodebin")
                    .name(DECODE_NAME)
                    .build()
                    .map_err(|source| create_error("decodebin", source))?
            }
        };

        let sink = gst::ElementFactory::make("fakesink")
            .name(SINK_NAME)
            .property("sync", false)
            .property("enable-last-sample", false)
            .property("signal-handoffs", true)
            .build()
            .map_err(|source| create_error("fakesink", source))?;
        let sink_queue = queue.clone();
        sink.connect("handoff", false, move |args| {
            let buffer = args.get(1).and_then(|v| v.get::<gst::Buffer>().ok());
            let caps = args
                .get(2)
                .and_then(|v| v.get::<gst::Pad>().ok())
                .and_then(|pad| pad.current_caps());
            if let Some(buffer) = buffer {
                sink_queue.push(buffer, caps);
            }
            None
        });

        pipeline
            .add_many([source.upcast_ref::<gst::Element>(), &decode, &sink])
            .map_err(ConstructionError::AddElements)?;
        source
            .link(&decode)
            .map_err(|_| ConstructionError::Link {
                from: SOURCE_NAME,
                to: DECODE_NAME,
            })?;
        if explicit {
            decode.link(&sink).map_err(|_| ConstructionError::Link {
                from: DECODE_NAME,
                to: SINK_NAME,
            })?;
        } else {
            let sink_pad = sink
                .static_pad("sink")
                .ok_or(ConstructionError::Link {
                    from: DECODE_NAME,
                    to: SINK_NAME,
                })?
                .downgrade();
            decode.connect_pad_added(move |decode, pad| {
                post(decode, link_output(pad, &sink_pad));
            });
            decode.connect_no_more_pads(|decode| post(decode, Notification::NoMoreOutputs));
            if let Some(configure) = configurator {
                pipeline.connect_deep_element_added(move |_, _, element| configure(element));
            }
        }

        Ok(PipelineGraph {
            stages: Some(Stages {
                pipeline,
                source,
                sink,
                bus,
            }),
            queue,
            running: false,
        })
    }

    /// Starts the streaming thread.
    pub fn activate(&mut self) -> Result<(), ConstructionError> {
        let Some(stages) = &self.stages else {
            return Ok(());
        };
        stages.pipeline.set_state(gst::State::Playing)?;
        self.running = true;
        Ok(())
    }

    /// Hands `buffer` to the source, blocking while it still holds a previous buffer.
    pub fn push(&self, buffer: gst::Buffer) -> Result<gst::FlowSuccess, gst::FlowError> {
        match &self.stages {
            Some(stages) => stages.source.push_buffer(buffer),
            None => Err(gst::FlowError::Flushing),
        }
    }

    /// Drops all the data held in the pipeline with a flushing seek, then every decoded buffer
    /// rendered before it. Returns once the pipeline is flushed, or with the error of the seek.
    pub fn seek_flush(&self) -> Result<(), glib::BoolError> {
        let result = match &self.stages {
            Some(stages) => stages
                .pipeline
                .seek_simple(gst::SeekFlags::FLUSH, gst::ClockTime::ZERO),
            None => Ok(()),
        };
        // The seek returns after the flush went through the sink: whatever was rendered so far
        // is stale.
        self.queue.next_generation();
        let dropped = self.queue.discard_stale();
        if dropped > 0 {
            debug!("dropped {} decoded buffers on flush", dropped);
        }
        result
    }

    /// Pops the oldest message of the bus, if any.
    pub fn pop_message(&self) -> Option<gst::Message> {
        self.stages.as_ref().and_then(|stages| stages.bus.pop())
    }

    pub fn queue(&self) -> &BridgeQueue {
        &self.queue
    }

    pub fn is_decode_linked(&self) -> bool {
        self.stages
            .as_ref()
            .and_then(|stages| stages.sink.static_pad("sink"))
            .is_some_and(|pad| pad.is_linked())
    }

    pub fn is_closed(&self) -> bool {
        self.stages.is_none()
    }

    /// Signals the end of the stream and lets the engine process what it still holds, for at
    /// most [`EOS_TIMEOUT_SECONDS`]. Then stops the pipeline and releases every stage and every
    /// decoded buffer. Once the bound is reached, the pipeline is stopped in the background and
    /// whatever it still renders is dropped.
    ///
    /// Does nothing if already called.
    pub fn shutdown(&mut self) {
        let Some(stages) = self.stages.take() else {
            return;
        };
        let mut dropped = self.queue.close();

        let mut stopped = !self.running;
        if self.running {
            match stages.source.end_of_stream() {
                Ok(_) => {
                    let timeout = gst::ClockTime::from_seconds(EOS_TIMEOUT_SECONDS);
                    let types = [gst::MessageType::Eos, gst::MessageType::Error];
                    match stages.bus.timed_pop_filtered(timeout, &types) {
                        Some(message) => {
                            if let gst::MessageView::Error(e) = message.view() {
                                debug!("pipeline failed while finishing: {}", e.error());
                            } else {
                                debug!("pipeline reached end of stream");
                            }
                            stopped = true;
                        }
                        None => warn!(
                            "pipeline did not finish within {}s, stopping it in the background",
                            EOS_TIMEOUT_SECONDS
                        ),
                    }
                }
                Err(e) => debug!("source refused end of stream: {:?}", e),
            }
        }
        self.running = false;

        if stopped {
            if let Err(e) = stages.pipeline.set_state(gst::State::Null) {
                warn!("failed to stop the pipeline: {}", e);
            }
        } else {
            stages.pipeline.call_async(|pipeline| {
                if let Err(e) = pipeline.set_state(gst::State::Null) {
                    warn!("failed to stop the pipeline: {}", e);
                }
            });
        }
        stages.bus.set_flushing(true);
        dropped += self.queue.drain_and_discard();
        if dropped > 0 {
            debug!("dropped {} decoded buffers on close", dropped);
        }
    }
}

impl Drop for PipelineGraph {
    fn drop(&mut self) {
        self.shutdown();
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
    use crate::format::CodecDescriptor;
    use crate::format::CodecId;
    use crate::negotiate::translate;
    use crate::selector::select;
    use crate::selector::EngineRegistry;
    use crate::selector::SelectionMode;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn graph(
        settings: Settings,
        mode: SelectionMode,
    ) -> (PipelineGraph, FakeRegistry, Arc<BridgeQueue>) {
        let registry = FakeRegistry::new(settings).unwrap();
        let query = translate(&CodecDescriptor::new(CodecId::Vp8).with_size(16, 16)).unwrap();
        let selection = select(&registry, &query, mode).unwrap();
        let queue = Arc::new(BridgeQueue::new());
        let mut graph =
            PipelineGraph::build(&query, selection, registry.configurator(), queue.clone())
                .unwrap();
        graph.activate().unwrap();
        (graph, registry, queue)
    }

    fn input() -> gst::Buffer {
        gst::Buffer::from_mut_slice(vec![0u8; 8])
    }

    fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        let start = Instant::now();
        while !condition() {
            assert!(start.elapsed() < TIMEOUT, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn explicit_graph_feeds_queue() {
        let (graph, registry, queue) = graph(Settings::default(), SelectionMode::Explicit);
        assert!(graph.is_decode_linked());
        graph.push(input()).unwrap();
        graph.push(input()).unwrap();
        wait_until("two decoded buffers", || queue.len() >= 2);

        let caps = queue.pop().unwrap().caps.unwrap();
        let s = caps.structure(0).unwrap();
        assert_eq!(s.get::<&str>("format"), Ok("I420"));
        assert_eq!(s.get::<i32>("width"), Ok(16));
        assert_eq!(registry.live(), 1);
    }

    #[test]
    fn shutdown_releases_everything() {
        let (mut graph, registry, queue) = graph(Settings::default(), SelectionMode::Explicit);
        graph.push(input()).unwrap();
        wait_until("a decoded buffer", || queue.len() >= 1);
        graph.shutdown();
        assert!(graph.is_closed());
        assert!(queue.is_empty());
        wait_until("the decoder to be released", || registry.live() == 0);
        assert!(graph.push(input()).is_err());
        assert!(graph.pop_message().is_none());
        // Idempotent.
        graph.shutdown();
    }

    #[test]
    fn auto_graph_links_once_output_is_exposed() {
        let (graph, registry, queue) = graph(Settings::default(), SelectionMode::Auto);
        assert!(!graph.is_decode_linked());
        graph.push(input()).unwrap();

        let mut negotiated = None;
        wait_until("the output to be negotiated", || {
            while let Some(message) = graph.pop_message() {
                if let Some(Notification::OutputNegotiated(caps)) =
                    Notification::from_message(&message)
                {
                    negotiated = Some(caps);
                }
            }
            negotiated.is_some()
        });
        assert!(graph.is_decode_linked());
        wait_until("a decoded buffer", || queue.len() >= 1);
        assert_eq!(registry.created(), 1);
    }

    #[test]
    fn seek_flush_empties_queue() {
        let (graph, _registry, queue) = graph(Settings::default(), SelectionMode::Explicit);
        graph.push(input()).unwrap();
        wait_until("a decoded buffer", || queue.len() >= 1);
        graph.seek_flush().unwrap();
        assert!(queue.is_empty());

        // Output rendered after the flush is kept.
        graph.push(input()).unwrap();
        wait_until("a decoded buffer after the flush", || queue.len() >= 1);
        assert!(queue.pop().is_some());
    }

    #[test]
    fn start_failure_is_reported() {
        let registry = FakeRegistry::new(Settings {
            fail_start: true,
            ..Default::default()
        })
        .unwrap();
        let query = translate(&CodecDescriptor::new(CodecId::Vp8)).unwrap();
        let selection = select(&registry, &query, SelectionMode::Explicit).unwrap();
        let mut graph = PipelineGraph::build(
            &query,
            selection,
            registry.configurator(),
            Arc::new(BridgeQueue::new()),
        )
        .unwrap();
        assert!(matches!(
            graph.activate(),
            Err(ConstructionError::StateChange(_))
        ));
        drop(graph);
        wait_until("the decoder to be released", || registry.live() == 0);
    }

    #[test]
    fn notifications_survive_the_bus() {
        gst::init().unwrap();
        let caps = gst::Caps::new_empty_simple("video/x-raw");
        for notification in [
            Notification::OutputNegotiated(caps),
            Notification::LinkFailed("no caps".to_owned()),
            Notification::NoMoreOutputs,
        ] {
            let message = notification.clone().into_message();
            assert_eq!(Notification::from_message(&message), Some(notification));
        }
        let other = gst::message::Application::new(gst::Structure::new_empty("other"));
        assert_eq!(Notification::from_message(&other), None);
    }
}
