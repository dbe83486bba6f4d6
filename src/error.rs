// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Errors reported by the decoder.

use gstreamer as gst;
use gstreamer::glib;
use remain::sorted;
use thiserror::Error as ThisError;

use crate::format::CodecId;

/// Kind of an error, for callers that only need to know how to react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The decoding pipeline could not be set up.
    Construction,
    /// The engine failed while decoding.
    Engine,
    /// A decoded frame could not be interpreted.
    Mapping,
    OutOfMemory,
    /// The codec is not handled by this decoder; another decoder may handle it.
    Unsupported,
}

/// Failure to build the decoding pipeline.
#[sorted]
#[derive(ThisError, Debug)]
pub enum ConstructionError {
    /// The elements could not be added to the pipeline.
    #[error("failed to add elements to the pipeline: {0}")]
    AddElements(glib::BoolError),
    /// An element could not be instantiated.
    #[error("failed to create element {name}: {source}")]
    CreateElement {
        name: String,
        #[source]
        source: glib::BoolError,
    },
    /// The engine could not be initialized.
    #[error("failed to initialize the engine: {0}")]
    Init(glib::Error),
    /// Two elements of the pipeline could not be linked.
    #[error("failed to link {from} to {to}")]
    Link { from: &'static str, to: &'static str },
    /// The pipeline has no bus.
    #[error("the pipeline has no bus")]
    NoBus,
    /// The registry holds no decoder at all.
    #[error("no decoder is registered")]
    NoDecoderList,
    /// No registered decoder can handle the stream.
    #[error("no decoder can handle {0}")]
    NoSuitableDecoder(String),
    /// The pipeline refused to start.
    #[error("failed to start the pipeline: {0}")]
    StateChange(#[from] gst::StateChangeError),
}

/// Error returned when opening a decoder.
#[sorted]
#[derive(ThisError, Debug)]
pub enum OpenError {
    #[error("failed to build the decoding pipeline: {0}")]
    Construction(#[from] ConstructionError),
    #[error("out of memory")]
    OutOfMemory,
    #[error("codec {0} is not supported")]
    Unsupported(CodecId),
}

impl OpenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OpenError::Construction(_) => ErrorKind::Construction,
            OpenError::OutOfMemory => ErrorKind::OutOfMemory,
            OpenError::Unsupported(_) => ErrorKind::Unsupported,
        }
    }
}

/// Failure to interpret decoded output.
#[sorted]
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// The buffer does not match the negotiated layout.
    #[error("failed to map decoded frame: {0}")]
    Frame(String),
    /// The negotiated caps do not describe a valid frame layout.
    #[error("invalid output caps: {0}")]
    Info(String),
    /// The negotiated caps carry no pixel format.
    #[error("output caps have no pixel format")]
    MissingFormat,
    /// The decoder output is not raw video.
    #[error("decoder outputs {0} instead of raw video")]
    NotRaw(String),
    /// The pixel format has no host equivalent.
    #[error("unsupported pixel format {0}")]
    UnknownFormat(String),
    /// No caps were negotiated for the decoder output.
    #[error("no output caps negotiated")]
    Unresolved,
}

/// Error that stopped a running decoder. Once one occurred, the decoder outputs nothing until it
/// is closed.
#[sorted]
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// An element of the pipeline reported an error.
    #[error("{source_name} reported an error: {message}")]
    Engine {
        source_name: String,
        message: String,
    },
    /// The negotiated output of the decode element could not be linked.
    #[error("failed to link the decoder output: {0}")]
    Link(String),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    /// The source refused an input buffer.
    #[error("failed to push buffer: {0:?}")]
    Push(gst::FlowError),
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Engine { .. } | RuntimeError::Link(_) | RuntimeError::Push(_) => {
                ErrorKind::Engine
            }
            RuntimeError::Mapping(_) => ErrorKind::Mapping,
        }
    }
}
