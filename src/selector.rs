// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Choice of the decoder element.

use std::sync::Arc;

use gstreamer as gst;
use gstreamer::glib::translate::IntoGlib;
use gstreamer::prelude::*;
use log::debug;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ConstructionError;
use crate::negotiate::CapabilityQuery;

/// How the decoder element is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMode {
    /// Pick the best decoder at open time.
    #[default]
    Explicit,
    /// Let a self-negotiating container pick the decoder once data flows.
    Auto,
}

/// Hook applied to every decoder element instantiated for a pipeline, including the ones a
/// container creates on its own.
pub type ElementConfigurator = Arc<dyn Fn(&gst::Element) + Send + Sync>;

/// Source of decoder element factories.
pub trait EngineRegistry {
    /// Factories of rank `min_rank` or above, in enumeration order. With `decode_capable` set,
    /// only decoder factories are returned.
    fn enumerate(&self, min_rank: gst::Rank, decode_capable: bool) -> Vec<gst::ElementFactory>;

    /// Whether `factory` can consume `sink` and produce `src`.
    fn capabilities_intersect(
        &self,
        factory: &gst::ElementFactory,
        sink: &gst::Caps,
        src: &gst::Caps,
    ) -> bool {
        factory.can_sink_any_caps(sink) && factory.can_src_any_caps(src)
    }

    fn configurator(&self) -> Option<ElementConfigurator> {
        None
    }
}

/// Outcome of the decoder selection.
#[derive(Debug, Clone)]
pub enum Selection {
    /// The decoder to instantiate.
    Explicit(gst::ElementFactory),
    /// Candidates for the container, by decreasing rank.
    Auto(Vec<gst::ElementFactory>),
}

/// Selects a decoder for `query` among the factories of `registry`.
///
/// Factories below [`gst::Rank::MARGINAL`] are never considered. Among the others, the highest
/// ranked one able to handle `query` wins, ties going to the first enumerated. In
/// [`SelectionMode::Auto`], the choice is left to the container but at least one factory must
/// be able to handle `query`.
pub fn select(
    registry: &dyn EngineRegistry,
    query: &CapabilityQuery,
    mode: SelectionMode,
) -> Result<Selection, ConstructionError> {
    let mut factories = registry.enumerate(gst::Rank::MARGINAL, true);
    if factories.is_empty() {
        return Err(ConstructionError::NoDecoderList);
    }
    // Stable sort: equal ranks keep their enumeration order.
    factories.sort_by_key(|f| std::cmp::Reverse(f.rank().into_glib()));

    let best = factories
        .iter()
        .position(|f| registry.capabilities_intersect(f, &query.sink, &query.src))
        .ok_or_else(|| ConstructionError::NoSuitableDecoder(query.sink.to_string()))?;

    match mode {
        SelectionMode::Explicit => {
            let factory = factories.swap_remove(best);
            debug!(
                "selected decoder {} (rank {}) for {}",
                factory.name(),
                factory.rank().into_glib(),
                query.sink
            );
            Ok(Selection::Explicit(factory))
        }
        SelectionMode::Auto => {
            debug!(
                "{} candidate decoders for {}, {} can handle it",
                factories.len(),
                query.sink,
                factories[best].name()
            );
            Ok(Selection::Auto(factories))
        }
    }
}

#[cfg(test)]
mod tests {
    use fakedec::Settings;

    use super::*;
    use crate::fake::FakeRegistry;
    use crate::format::CodecDescriptor;
    use crate::format::CodecId;
    use crate::negotiate::translate;

    /// Registry refusing the factories listed in `refused`, whatever their caps.
    struct Refusing {
        inner: FakeRegistry,
        refused: &'static [&'static str],
    }

    impl EngineRegistry for Refusing {
        fn enumerate(&self, min_rank: gst::Rank, decode_capable: bool) -> Vec<gst::ElementFactory> {
            self.inner.enumerate(min_rank, decode_capable)
        }

        fn capabilities_intersect(
            &self,
            factory: &gst::ElementFactory,
            sink: &gst::Caps,
            src: &gst::Caps,
        ) -> bool {
            !self.refused.contains(&factory.name().as_str())
                && self.inner.capabilities_intersect(factory, sink, src)
        }
    }

    fn registry(factories: &[(&str, gst::Rank)]) -> FakeRegistry {
        FakeRegistry::with_factories(factories, Settings::default()).unwrap()
    }

    fn vp8_query() -> CapabilityQuery {
        translate(&CodecDescriptor::new(CodecId::Vp8)).unwrap()
    }

    fn selected_name(selection: Selection) -> String {
        match selection {
            Selection::Explicit(f) => f.name().to_string(),
            Selection::Auto(_) => panic!("unexpected auto selection"),
        }
    }

    #[test]
    fn highest_rank_wins() {
        let registry = registry(&[
            ("select-rank-low", gst::Rank::MARGINAL),
            ("select-rank-high", gst::Rank::PRIMARY),
            ("select-rank-mid", gst::Rank::SECONDARY),
        ]);
        let selection = select(&registry, &vp8_query(), SelectionMode::Explicit).unwrap();
        assert_eq!(selected_name(selection), "select-rank-high");
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let forward = registry(&[
            ("select-tie-a", gst::Rank::PRIMARY),
            ("select-tie-b", gst::Rank::PRIMARY),
        ]);
        let selection = select(&forward, &vp8_query(), SelectionMode::Explicit).unwrap();
        assert_eq!(selected_name(selection), "select-tie-a");

        let backward = registry(&[
            ("select-tie-b", gst::Rank::PRIMARY),
            ("select-tie-a", gst::Rank::PRIMARY),
        ]);
        let selection = select(&backward, &vp8_query(), SelectionMode::Explicit).unwrap();
        assert_eq!(selected_name(selection), "select-tie-b");
    }

    #[test]
    fn low_ranks_ignored() {
        let registry = registry(&[("select-none", gst::Rank::NONE)]);
        assert!(matches!(
            select(&registry, &vp8_query(), SelectionMode::Explicit),
            Err(ConstructionError::NoDecoderList)
        ));
    }

    #[test]
    fn refused_factories_are_skipped() {
        let inner = registry(&[
            ("select-refused", gst::Rank::PRIMARY),
            ("select-fallback", gst::Rank::MARGINAL),
        ]);
        let registry = Refusing {
            inner,
            refused: &["select-refused"],
        };
        let selection = select(&registry, &vp8_query(), SelectionMode::Explicit).unwrap();
        assert_eq!(selected_name(selection), "select-fallback");

        let registry = Refusing {
            inner: registry.inner,
            refused: &["select-refused", "select-fallback"],
        };
        assert!(matches!(
            select(&registry, &vp8_query(), SelectionMode::Explicit),
            Err(ConstructionError::NoSuitableDecoder(_))
        ));
        assert!(matches!(
            select(&registry, &vp8_query(), SelectionMode::Auto),
            Err(ConstructionError::NoSuitableDecoder(_))
        ));
    }

    #[test]
    fn auto_returns_all_candidates_by_rank() {
        let registry = registry(&[
            ("select-auto-low", gst::Rank::MARGINAL),
            ("select-auto-high", gst::Rank::PRIMARY),
        ]);
        match select(&registry, &vp8_query(), SelectionMode::Auto).unwrap() {
            Selection::Auto(candidates) => {
                let names: Vec<_> = candidates.iter().map(|f| f.name().to_string()).collect();
                assert_eq!(names, vec!["select-auto-high", "select-auto-low"]);
            }
            Selection::Explicit(_) => panic!("unexpected explicit selection"),
        }
    }

    #[test]
    fn query_fields_must_intersect() {
        // The fake decoder only takes MPEG-2 among the video/mpeg streams.
        let registry = registry(&[("select-mpeg", gst::Rank::PRIMARY)]);
        let mp4v = translate(&CodecDescriptor::new(CodecId::Mp4v)).unwrap();
        assert!(matches!(
            select(&registry, &mp4v, SelectionMode::Explicit),
            Err(ConstructionError::NoSuitableDecoder(_))
        ));
        let mpgv = translate(&CodecDescriptor::new(CodecId::Mpgv)).unwrap();
        assert!(select(&registry, &mpgv, SelectionMode::Explicit).is_ok());
    }
}
