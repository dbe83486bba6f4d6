// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::mem;

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockFlags: u32 {
        /// The block is not contiguous with the previous one (e.g. after a seek).
        const DISCONTINUITY = 1 << 0;
        /// The block content is known to be damaged.
        const CORRUPTED = 1 << 1;
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// A block of compressed data handed to the decoder. Timestamps are in microseconds.
///
/// The release callback, if any, is invoked exactly once, when the data is no longer used:
/// either when the block is dropped or, once handed to the engine, when the engine drops it.
pub struct Block {
    data: Vec<u8>,
    pub flags: BlockFlags,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub duration: Option<u64>,
    release: Option<ReleaseFn>,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Self {
        Block {
            data,
            flags: BlockFlags::empty(),
            pts: None,
            dts: None,
            duration: None,
            release: None,
        }
    }

    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn with_flags(mut self, flags: BlockFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_pts(mut self, pts: u64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: u64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Moves the data and the release callback out of the block, leaving it empty.
    pub(crate) fn take(&mut self) -> (Vec<u8>, Option<ReleaseFn>) {
        (mem::take(&mut self.data), self.release.take())
    }
}

/// The data of a block once handed to the engine. Invokes the block's release callback when the
/// engine drops it.
pub(crate) struct BlockPayload {
    data: Vec<u8>,
    release: Option<ReleaseFn>,
}

impl AsRef<[u8]> for BlockPayload {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for BlockPayload {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Block {
    pub(crate) fn into_payload(mut self) -> BlockPayload {
        let (data, release) = self.take();
        BlockPayload { data, release }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.data.len())
            .field("flags", &self.flags)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("duration", &self.duration)
            .finish()
    }
}
