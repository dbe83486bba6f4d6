// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Synchronous block-oriented video decoding on top of an asynchronous decoding engine.
//!
//! The host opens a [`BridgeDecoder`] for a [`CodecDescriptor`], then hands it compressed
//! [`Block`]s one at a time. Each call returns at most one decoded [`Picture`], produced by the
//! engine's own streaming thread and passed back through a [`BridgeQueue`].
//!
//! Opening a decoder goes through the following steps:
//!
//! 1. [`negotiate::translate`] describes the stream in the engine's capability language.
//! 2. [`selector::select`] finds a decoder able to handle it among the registered ones.
//! 3. [`PipelineGraph::build`] assembles source, decoder and sink stages and starts them.
//!
//! The output format is resolved once, from the first negotiated output caps, by an
//! [`OutputResolver`].

pub mod block;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod fake;
pub mod format;
pub mod negotiate;
pub mod picture;
pub mod pipeline;
pub mod queue;
pub mod resolver;
pub mod selector;

pub use block::Block;
pub use block::BlockFlags;
pub use config::ConfigError;
pub use config::DecoderConfig;
pub use context::EngineContext;
pub use driver::BridgeDecoder;
pub use driver::DriverState;
pub use error::ErrorKind;
pub use fake::FakeRegistry;
pub use error::OpenError;
pub use error::RuntimeError;
pub use format::Chroma;
pub use format::CodecDescriptor;
pub use format::CodecId;
pub use format::OutputFormat;
pub use format::Ratio;
pub use picture::DefaultAllocator;
pub use picture::Picture;
pub use picture::PictureAllocator;
pub use pipeline::Notification;
pub use pipeline::PipelineGraph;
pub use queue::BridgeQueue;
pub use resolver::OutputResolver;
pub use selector::EngineRegistry;
pub use selector::SelectionMode;
