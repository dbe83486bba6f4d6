// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A registry offering only the fake decoders of the `fakedec` crate, for tests and for trying
//! the decoder without real streams.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use fakedec::RegisterError;
use fakedec::Settings;
use fakedec::Stats;
use gstreamer as gst;
use gstreamer::glib;
use gstreamer::glib::translate::IntoGlib;
use gstreamer::prelude::*;

use crate::selector::ElementConfigurator;
use crate::selector::EngineRegistry;

type Decoders = Arc<Mutex<Vec<glib::WeakRef<gst::Element>>>>;

/// Enumerates a fixed list of fake decoder factories, and scripts every fake decoder it
/// configures with the same [`Settings`].
pub struct FakeRegistry {
    factories: Vec<gst::ElementFactory>,
    settings: Settings,
    decoders: Decoders,
}

impl FakeRegistry {
    /// Registry of the default fake decoder.
    pub fn new(settings: Settings) -> Result<Self, RegisterError> {
        fakedec::register()?;
        Ok(Self::from_names(&[fakedec::FACTORY_NAME], settings))
    }

    /// Registry of fake decoders registered under the given names and ranks.
    pub fn with_factories(
        factories: &[(&str, gst::Rank)],
        settings: Settings,
    ) -> Result<Self, RegisterError> {
        for &(name, rank) in factories {
            fakedec::register_as(name, rank)?;
        }
        let names: Vec<&str> = factories.iter().map(|&(name, _)| name).collect();
        Ok(Self::from_names(&names, settings))
    }

    fn from_names(names: &[&str], settings: Settings) -> Self {
        FakeRegistry {
            factories: names
                .iter()
                .filter_map(|name| gst::ElementFactory::find(name))
                .collect(),
            settings,
            decoders: Default::default(),
        }
    }

    fn decoder_refs(&self) -> MutexGuard<Vec<glib::WeakRef<gst::Element>>> {
        self.decoders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of fake decoders configured so far.
    pub fn created(&self) -> usize {
        self.decoder_refs().len()
    }

    /// The configured fake decoders still alive.
    pub fn decoders(&self) -> Vec<gst::Element> {
        self.decoder_refs()
            .iter()
            .filter_map(glib::WeakRef::upgrade)
            .collect()
    }

    /// Number of configured fake decoders still alive.
    pub fn live(&self) -> usize {
        self.decoders().len()
    }

    /// Counters of the most recently configured fake decoder, while it is alive.
    pub fn stats(&self) -> Option<Stats> {
        self.decoders().last().and_then(Stats::of)
    }
}

impl EngineRegistry for FakeRegistry {
    fn enumerate(&self, min_rank: gst::Rank, decode_capable: bool) -> Vec<gst::ElementFactory> {
        self.factories
            .iter()
            .filter(|f| f.rank().into_glib() >= min_rank.into_glib())
            .filter(|f| !decode_capable || f.has_type(gst::ElementFactoryType::DECODER))
            .cloned()
            .collect()
    }

    fn configurator(&self) -> Option<ElementConfigurator> {
        let settings = self.settings.clone();
        let decoders = self.decoders.clone();
        Some(Arc::new(move |element: &gst::Element| {
            if fakedec::is_fake(element) {
                settings.apply(element);
                decoders
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(element.downgrade());
            }
        }))
    }
}
