// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decodes a synthetic elementary stream through the fake engine decoder and reports the
//! pictures it gets back.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use argh::FromArgs;
use decode_bridge::config::parse_selection_mode;
use decode_bridge::Block;
use decode_bridge::BlockFlags;
use decode_bridge::BridgeDecoder;
use decode_bridge::CodecDescriptor;
use decode_bridge::CodecId;
use decode_bridge::DecoderConfig;
use decode_bridge::DefaultAllocator;
use decode_bridge::Picture;
use decode_bridge::SelectionMode;
use decode_bridge::EngineContext;
use decode_bridge::EngineRegistry;
use decode_bridge::FakeRegistry;
use fakedec::Settings;
use log::info;
use log::warn;

/// How long to wait for the remaining pictures once all blocks were sent.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn parse_codec(value: &str) -> Result<CodecId, String> {
    value.parse()
}

fn default_codec() -> CodecId {
    CodecId::H264
}

fn default_width() -> u32 {
    320
}

fn default_height() -> u32 {
    240
}

fn default_frames() -> u64 {
    30
}

fn default_fps() -> u32 {
    25
}

#[derive(Debug, FromArgs)]
/// decode_bridge
struct Args {
    /// codec of the stream, e.g. h264, vp8, mpgv. (default: h264)
    #[argh(option, default = "default_codec()", from_str_fn(parse_codec))]
    codec: CodecId,
    /// frame width. (default: 320)
    #[argh(option, default = "default_width()")]
    width: u32,
    /// frame height. (default: 240)
    #[argh(option, default = "default_height()")]
    height: u32,
    /// number of blocks to decode. (default: 30)
    #[argh(option, short = 'n', default = "default_frames()")]
    frames: u64,
    /// frame rate of the stream. (default: 25)
    #[argh(option, default = "default_fps()")]
    fps: u32,
    /// decoder selection, explicit or auto. Overrides --cfg.
    #[argh(option, from_str_fn(parse_selection_mode))]
    selection: Option<SelectionMode>,
    /// path to a JSON decoder configuration file.
    #[argh(option)]
    cfg: Option<PathBuf>,
    /// flag the block at this index as discontinuous.
    #[argh(option)]
    seek_at: Option<u64>,
    /// select among every installed decoder instead of the fake one only.
    #[argh(switch)]
    installed: bool,
    /// print the debug messages.
    #[argh(switch)]
    debug: bool,
}

fn report(picture: &Picture) {
    info!(
        "picture {:?} {}x{} ({} planes) at {:?}",
        picture.format.chroma,
        picture.format.width,
        picture.format.height,
        picture.planes.len(),
        picture.date
    );
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.cfg {
        Some(path) => DecoderConfig::from_json_file(path)
            .context("failed to load decoder configuration")?,
        None => DecoderConfig::default(),
    };
    if let Some(mode) = args.selection {
        config = DecoderConfig::from(mode);
    }

    let context = EngineContext::get().context("failed to initialize the engine")?;
    info!("engine {}", context.version());
    let fake =
        FakeRegistry::new(Settings::default()).context("failed to register the fake decoder")?;
    let registry: &dyn EngineRegistry = if args.installed { &*context } else { &fake };
    let desc = CodecDescriptor::new(args.codec)
        .with_size(args.width, args.height)
        .with_frame_rate(args.fps, 1);
    let mut decoder = BridgeDecoder::open(&desc, &config, registry)
        .with_context(|| format!("failed to open a decoder for {}", args.codec))?;

    let frame_duration = 1_000_000 / u64::from(args.fps.max(1));
    let mut allocator = DefaultAllocator;
    let mut decoded = 0u64;
    for i in 0..args.frames {
        let mut block = Block::new(vec![i as u8; 64]).with_dts(i * frame_duration);
        if args.seek_at == Some(i) {
            block = block.with_flags(BlockFlags::DISCONTINUITY);
        }
        if let Some(picture) = decoder.decode(Some(block), &mut allocator) {
            report(&picture);
            decoded += 1;
        }
    }

    let mut last_output = Instant::now();
    while decoder.error().is_none() && last_output.elapsed() < DRAIN_TIMEOUT {
        match decoder.decode(None, &mut allocator) {
            Some(picture) => {
                report(&picture);
                decoded += 1;
                last_output = Instant::now();
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    }

    if let Some(e) = decoder.error() {
        bail!("decoding stopped after {} pictures: {}", decoded, e);
    }
    if let Some(format) = decoder.output_format() {
        info!("output format: {:?}", format);
    } else {
        warn!("no output format was resolved");
    }
    decoder.close();
    info!("decoded {} pictures out of {} blocks", decoded, args.frames);
    Ok(())
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    let filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
    run(args)
}
