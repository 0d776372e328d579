//! `--simulate`: the full gateway on mock devices.
//!
//! Each configured channel gets a mock edge source and a mock relay. Lines
//! on stdin are turned into Wiegand pulse trains:
//!
//! ```text
//! 1 111111     scan card 111111 on channel 1
//! status       print the gateway status as JSON
//! ```

use anyhow::{Context, Result, bail};
use gatehouse_core::{CardId, ReaderChannel};
use gatehouse_engine::{AnyFrameGrabber, Gateway, GatewayConfig, GatewayParts, MockGrabber};
use gatehouse_hardware::mock::{MockEdgeHandle, MockEdgeSource, MockRelay};
use gatehouse_hardware::{AnyEdgeSource, AnyRelayOutput, ChannelPins};
use gatehouse_network::mock::{MockCloudStore, MockUploader};
use gatehouse_network::{AnyCloudStore, AnyEvidenceUploader, ConnectivityProbe};
use gatehouse_protocol::FrameLayout;
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// One line of simulator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Scan { channel: u8, card: u64 },
    Status,
}

fn parse_line(line: &str) -> Result<Option<Input>> {
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(None);
    };
    if first == "status" {
        return Ok(Some(Input::Status));
    }

    let channel = first.parse().with_context(|| format!("bad channel '{first}'"))?;
    let Some(card) = words.next() else {
        bail!("expected '<channel> <card>'");
    };
    let card = card.parse().with_context(|| format!("bad card number '{card}'"))?;
    if words.next().is_some() {
        bail!("expected '<channel> <card>'");
    }
    Ok(Some(Input::Scan { channel, card }))
}

struct SimulatedReader {
    edges: MockEdgeHandle,
    pins: ChannelPins,
}

pub(crate) async fn run(config: GatewayConfig) -> Result<()> {
    let layout: FrameLayout = config.frame;
    let (cloud, _cloud_handle) = MockCloudStore::new();
    let (uploader, _uploader_handle) = MockUploader::new();

    let mut parts = GatewayParts::from_config(&config)
        .with_cloud(AnyCloudStore::Mock(cloud))
        .with_uploader(AnyEvidenceUploader::Mock(uploader))
        .with_grabber(AnyFrameGrabber::Mock(MockGrabber::new()))
        .with_probe(ConnectivityProbe::fixed(true));

    let mut readers = HashMap::new();
    for reader in &config.readers {
        let channel = reader.reader_channel()?;
        let (source, edges) = MockEdgeSource::with_name(format!("simulated reader {channel}"));
        parts = parts.with_reader(channel, AnyEdgeSource::Mock(source));
        if let Some(pin) = reader.relay_pin {
            parts = parts.with_relay(
                channel,
                AnyRelayOutput::Mock(MockRelay::new(format!("simulated relay {channel}"), pin)),
            );
        }
        readers.insert(
            channel,
            SimulatedReader {
                edges,
                pins: ChannelPins::new(reader.d0_pin, reader.d1_pin),
            },
        );
    }

    let gateway = Gateway::start(config, parts)
        .await
        .context("Failed to start gateway")?;
    info!("Simulator ready, enter '<channel> <card>' lines");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            () = crate::shutdown_signal() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&gateway, &readers, &layout, &line).await,
                Ok(None) => {
                    info!("End of input");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            },
        }
    }

    gateway.shutdown().await;
    Ok(())
}

async fn handle_line(
    gateway: &Gateway,
    readers: &HashMap<ReaderChannel, SimulatedReader>,
    layout: &FrameLayout,
    line: &str,
) {
    let input = match parse_line(line) {
        Ok(Some(input)) => input,
        Ok(None) => return,
        Err(e) => {
            warn!(line, error = %e, "Ignored input");
            return;
        }
    };

    match input {
        Input::Status => match serde_json::to_string_pretty(&gateway.status().await) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!(error = %e, "Failed to render status"),
        },
        Input::Scan { channel, card } => {
            let reader = ReaderChannel::new(channel)
                .ok()
                .and_then(|channel| readers.get(&channel));
            let Some(reader) = reader else {
                warn!(channel, "No simulated reader on channel");
                return;
            };
            if let Err(e) = reader
                .edges
                .send_card(reader.pins, layout, CardId::new(card))
                .await
            {
                warn!(channel, card, error = %e, "Failed to send card");
            }
        }
    }
}
