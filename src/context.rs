// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Process-wide access to the engine.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;

use gstreamer as gst;
use log::debug;

use crate::error::ConstructionError;
use crate::selector::EngineRegistry;

static CONTEXT: Mutex<Weak<EngineContext>> = Mutex::new(Weak::new());

/// Handle on the initialized engine and its registry of every installed element.
///
/// The engine is initialized by the first [`EngineContext::get`] and every later call shares
/// the same handle while one is alive. The engine itself cannot be deinitialized and stays
/// loaded for the rest of the process: dropping the last handle only forgets it.
#[derive(Debug)]
pub struct EngineContext {
    version: String,
}

impl EngineContext {
    pub fn get() -> Result<Arc<EngineContext>, ConstructionError> {
        let mut current = CONTEXT.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(context) = current.upgrade() {
            return Ok(context);
        }
        gst::init().map_err(ConstructionError::Init)?;
        let context = Arc::new(EngineContext {
            version: gst::version_string().to_string(),
        });
        debug!("engine initialized: {}", context.version);
        *current = Arc::downgrade(&context);
        Ok(context)
    }

    /// Version of the engine library.
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        debug!("last engine context handle released");
    }
}

impl EngineRegistry for EngineContext {
    fn enumerate(&self, min_rank: gst::Rank, decode_capable: bool) -> Vec<gst::ElementFactory> {
        let kind = if decode_capable {
            gst::ElementFactoryType::DECODER
        } else {
            gst::ElementFactoryType::ANY
        };
        gst::ElementFactory::factories_with_type(kind, min_rank)
            .into_iter()
            .collect()
    }
}
