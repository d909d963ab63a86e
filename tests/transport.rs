//! End-to-end transport tests: engines talking over one simulated bus.

use anyhow::{Context, Result, ensure};
use std::time::Duration;
use tokio::time::{Instant, timeout};

use j1939tp::transport::control::{ControlMessage, TP_CM, TP_DT, data_frame};
use j1939tp::transport::AbortReason;
use j1939tp::types::GLOBAL_ADDR;
use j1939tp::{Direction, EchoLink, Frame, FrameStream, Link, TransportConfig, TransportEngine, TransportError};

const TOOL: u8 = 0xF9;
const ECU: u8 = 0x00;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 11) as u8).collect()
}

fn engines(tool_config: TransportConfig) -> Result<(EchoLink, TransportEngine<EchoLink>, TransportEngine<EchoLink>)> {
    let bus = EchoLink::new(TOOL);
    let tool = TransportEngine::with_config(bus.clone(), TOOL, tool_config)?;
    let ecu = TransportEngine::new(bus.attach(ECU))?;
    Ok((bus, tool, ecu))
}

async fn next_payload(stream: &mut FrameStream) -> Result<(Frame, Vec<u8>)> {
    let frame = stream.next_frame().await.context("stream ended before a frame arrived")?;
    let bytes = frame.payload().await?.as_bytes().to_vec();
    Ok((frame, bytes))
}

/// Next TP.CM frame the engine at TOOL addressed to ECU.
async fn next_control(replies: &mut FrameStream) -> Result<ControlMessage> {
    loop {
        let frame = replies.next_frame().await.context("no reply from engine")?;
        if frame.source() == TOOL && frame.id() == TP_CM | ECU as u32 {
            return Ok(ControlMessage::decode(&frame.payload().await?)?);
        }
    }
}

/// Spacing a scripted sender keeps between data frames.
const PACE: Duration = Duration::from_millis(50);

/// Next `count` reassembled or relayed messages, skipping TP.CM frames.
async fn next_messages(inbound: &mut FrameStream, count: usize) -> Result<Vec<(Frame, Vec<u8>)>> {
    let mut messages = Vec::with_capacity(count);
    while messages.len() < count {
        let (frame, bytes) = next_payload(inbound).await?;
        if frame.id() & 0xFF00 != TP_CM {
            messages.push((frame, bytes));
        }
    }
    Ok(messages)
}

/// Transport frames seen on the wire, rendered as short labels.
async fn wire_log(wire: &mut FrameStream) -> Vec<String> {
    let mut log = Vec::new();
    while let Ok(Some(frame)) = timeout(Duration::from_millis(1), wire.next_frame()).await {
        let Ok(payload) = frame.payload().await else { continue };
        match frame.id() & 0xFF00 {
            TP_DT => log.push(format!("DT{}", payload.as_bytes()[0])),
            TP_CM => match ControlMessage::decode(&payload) {
                Ok(ControlMessage::RequestToSend { max_per_cts, .. }) => log.push(format!("RTS/{max_per_cts}")),
                Ok(ControlMessage::ClearToSend { count, next, .. }) => log.push(format!("CTS{count}@{next}")),
                Ok(ControlMessage::EndOfMessage { .. }) => log.push("EOM".to_string()),
                Ok(other) => log.push(format!("{other:?}")),
                Err(_) => log.push("?".to_string()),
            },
            _ => {}
        }
    }
    log
}

#[tokio::test(start_paused = true)]
async fn single_frames_are_delivered_unchanged() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let (_bus, tool, ecu) = engines(TransportConfig::default())?;
    let mut inbound = ecu.read(Duration::from_secs(5))?;

    for len in 0..=8 {
        let frame = Frame::new(3, 0xFECA, TOOL, Direction::Transmitted, pattern(len));
        tool.send(frame.clone()).await?;
        let (received, _) = next_payload(&mut inbound).await?;
        ensure!(received == frame, "frame of {len} bytes changed in transit: {received}");
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn broadcast_reassembles_every_length() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let (_bus, tool, ecu) = engines(TransportConfig::default())?;
    let mut inbound = ecu.read(Duration::from_secs(60))?;

    for len in [9, 13, 14, 15, 100, 1000, 1785] {
        let data = pattern(len);
        tool.send(Frame::create(0xFECA, TOOL, data.clone())).await?;

        let (received, bytes) = next_payload(&mut inbound).await?;
        ensure!(bytes == data, "BAM of {len} bytes reassembled wrongly");
        ensure!(received.pgn() == 0xFECA);
        ensure!(received.source() == TOOL);
        inbound.reset_timeout(Duration::from_secs(60));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn broadcast_is_paced() -> Result<()> {
    let (bus, tool, _ecu) = engines(TransportConfig::default())?;
    let mut wire = bus.read(Duration::MAX)?;

    let started = Instant::now();
    tool.send(Frame::create(0xFECA, TOOL, pattern(20))).await?;
    ensure!(started.elapsed() >= Duration::from_millis(150), "three segments need three intervals");

    let log = wire_log(&mut wire).await;
    ensure!(log == ["Broadcast { len: 20, segments: 3, pgn: 65226 }", "DT1", "DT2", "DT3"], "{log:?}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn peer_to_peer_for_every_burst_size() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    for max_per_cts in [1u8, 2, 3, 7, 16, 255] {
        let config = TransportConfig { max_packets_per_cts: max_per_cts, ..TransportConfig::default() };
        let (_bus, tool, ecu) = engines(config)?;
        let mut inbound = ecu.read(Duration::from_secs(60))?;

        for len in [9, 20, 300, 1785] {
            let data = pattern(len);
            let sent = tool.send(Frame::create(0xD300, TOOL, data.clone())).await?;
            ensure!(sent.pgn() == 0xD300);

            let (received, bytes) = next_payload(&mut inbound).await?;
            ensure!(bytes == data, "{len} bytes with {max_per_cts} per CTS reassembled wrongly");
            ensure!(received.id() == 0xD300 && received.destination() == ECU);
            ensure!(received.source() == TOOL);
            inbound.reset_timeout(Duration::from_secs(60));
        }
        tool.close();
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn two_segments_per_cts_runs_in_two_bursts() -> Result<()> {
    let config = TransportConfig { max_packets_per_cts: 2, ..TransportConfig::default() };
    let (bus, tool, ecu) = engines(config)?;
    let mut wire = bus.read(Duration::MAX)?;
    let mut inbound = ecu.read(Duration::from_secs(5))?;

    let data = pattern(20);
    tool.send(Frame::create(0xD300, TOOL, data.clone())).await?;
    let (_, bytes) = next_payload(&mut inbound).await?;
    ensure!(bytes == data);

    let log = wire_log(&mut wire).await;
    ensure!(log == ["RTS/2", "CTS2@1", "DT1", "DT2", "CTS1@3", "DT3", "EOM"], "{log:?}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn silent_destination_is_cts_not_received() -> Result<()> {
    let (_bus, tool, _ecu) = engines(TransportConfig::default())?;

    let started = Instant::now();
    let result = tool.send(Frame::create(0xD342, TOOL, pattern(20))).await;
    let waited = started.elapsed();

    ensure!(
        matches!(result, Err(TransportError::CtsNotReceived { destination: 0x42, .. })),
        "unexpected outcome {result:?}"
    );
    ensure!(waited >= Duration::from_millis(1250) && waited < Duration::from_millis(1350), "waited {waited:?}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_rts_supersedes_the_first() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let bus = EchoLink::new(TOOL);
    let engine = TransportEngine::new(bus.clone())?;
    let mut inbound = engine.read(Duration::from_secs(30))?;

    // Scripted peer at ECU
    let peer = bus.attach(ECU);
    let mut replies = peer.read(Duration::from_secs(30))?;

    let first = ControlMessage::RequestToSend { len: 20, segments: 3, max_per_cts: 0xFF, pgn: 0xEFF9 };
    peer.send(first.to_frame(ECU, TOOL)).await?;
    ensure!(matches!(next_control(&mut replies).await?, ControlMessage::ClearToSend { count: 3, next: 1, pgn: 0xEFF9, .. }));

    let data = pattern(14);
    let second = ControlMessage::RequestToSend { len: 14, segments: 2, max_per_cts: 0xFF, pgn: 0xD3F9 };
    peer.send(second.to_frame(ECU, TOOL)).await?;
    ensure!(matches!(next_control(&mut replies).await?, ControlMessage::ClearToSend { count: 2, next: 1, pgn: 0xD3F9, .. }));

    peer.send(data_frame(ECU, TOOL, 1, &data)).await?;
    peer.send(data_frame(ECU, TOOL, 2, &data)).await?;
    ensure!(matches!(next_control(&mut replies).await?, ControlMessage::EndOfMessage { len: 14, segments: 2, pgn: 0xD3F9 }));

    let (received, bytes) = next_payload(&mut inbound).await?;
    ensure!(received.id() == 0xD3F9 && bytes == data);

    // The superseded session never produces anything
    ensure!(timeout(Duration::from_secs(10), inbound.next_frame()).await.is_err());
    ensure!(engine.active_sessions() == 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn broadcasts_from_two_senders_interleave() -> Result<()> {
    let bus = EchoLink::new(TOOL);
    let engine = TransportEngine::new(bus.clone())?;
    let mut inbound = engine.read(Duration::from_secs(30))?;
    let first = bus.attach(0x00);
    let second = bus.attach(0x01);

    let (a, b) = (pattern(20), pattern(21).into_iter().rev().collect::<Vec<_>>());
    let bam = |len: usize, pgn: u32| ControlMessage::Broadcast { len: len as u16, segments: 3, pgn };
    first.send(bam(a.len(), 0xFECA).to_frame(0x00, GLOBAL_ADDR)).await?;
    second.send(bam(b.len(), 0xFECB).to_frame(0x01, GLOBAL_ADDR)).await?;
    for sequence in 1..=3 {
        tokio::time::sleep(PACE).await;
        first.send(data_frame(0x00, GLOBAL_ADDR, sequence, &a)).await?;
        second.send(data_frame(0x01, GLOBAL_ADDR, sequence, &b)).await?;
    }

    let mut messages = next_messages(&mut inbound, 2).await?;
    messages.sort_by_key(|(frame, _)| frame.source());
    ensure!(messages[0].0.source() == 0x00 && messages[0].0.pgn() == 0xFECA && messages[0].1 == a);
    ensure!(messages[1].0.source() == 0x01 && messages[1].0.pgn() == 0xFECB && messages[1].1 == b);
    ensure!(engine.active_sessions() == 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn broadcast_and_peer_session_of_one_sender_are_separate() -> Result<()> {
    let bus = EchoLink::new(TOOL);
    let engine = TransportEngine::new(bus.clone())?;
    let mut inbound = engine.read(Duration::from_secs(30))?;
    let peer = bus.attach(ECU);
    let mut replies = peer.read(Duration::from_secs(30))?;

    let broadcast = pattern(20);
    let direct: Vec<u8> = pattern(14).iter().map(|b| b ^ 0x5A).collect();
    let bam = ControlMessage::Broadcast { len: 20, segments: 3, pgn: 0xFECA };
    peer.send(bam.to_frame(ECU, GLOBAL_ADDR)).await?;
    let rts = ControlMessage::RequestToSend { len: 14, segments: 2, max_per_cts: 0xFF, pgn: 0xD3F9 };
    peer.send(rts.to_frame(ECU, TOOL)).await?;
    ensure!(matches!(next_control(&mut replies).await?, ControlMessage::ClearToSend { count: 2, next: 1, .. }));
    ensure!(engine.active_sessions() == 2);

    for sequence in 1..=2 {
        tokio::time::sleep(PACE).await;
        peer.send(data_frame(ECU, GLOBAL_ADDR, sequence, &broadcast)).await?;
        peer.send(data_frame(ECU, TOOL, sequence, &direct)).await?;
    }
    ensure!(matches!(next_control(&mut replies).await?, ControlMessage::EndOfMessage { len: 14, segments: 2, .. }));
    tokio::time::sleep(PACE).await;
    peer.send(data_frame(ECU, GLOBAL_ADDR, 3, &broadcast)).await?;

    let mut messages = next_messages(&mut inbound, 2).await?;
    messages.sort_by_key(|(frame, _)| frame.id());
    ensure!(messages[0].0.id() == 0xD3F9 && messages[0].1 == direct);
    ensure!(messages[1].0.id() == 0xFECA && messages[1].1 == broadcast);
    ensure!(messages.iter().all(|(frame, _)| frame.source() == ECU));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_bam_supersedes_the_first() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let bus = EchoLink::new(TOOL);
    let engine = TransportEngine::new(bus.clone())?;
    let mut inbound = engine.read(Duration::from_secs(30))?;
    let peer = bus.attach(ECU);

    let abandoned = pattern(20);
    let first = ControlMessage::Broadcast { len: 20, segments: 3, pgn: 0xFECA };
    peer.send(first.to_frame(ECU, GLOBAL_ADDR)).await?;
    tokio::time::sleep(PACE).await;
    peer.send(data_frame(ECU, GLOBAL_ADDR, 1, &abandoned)).await?;

    let data: Vec<u8> = pattern(14).iter().map(|b| !b).collect();
    let second = ControlMessage::Broadcast { len: 14, segments: 2, pgn: 0xFECB };
    tokio::time::sleep(PACE).await;
    peer.send(second.to_frame(ECU, GLOBAL_ADDR)).await?;
    for sequence in 1..=2 {
        tokio::time::sleep(PACE).await;
        peer.send(data_frame(ECU, GLOBAL_ADDR, sequence, &data)).await?;
    }

    let mut messages = next_messages(&mut inbound, 1).await?;
    let (received, bytes) = messages.remove(0);
    ensure!(received.pgn() == 0xFECB && bytes == data, "unexpected message {received}");

    // The superseded session times out silently
    ensure!(timeout(Duration::from_secs(10), inbound.next_frame()).await.is_err());
    ensure!(engine.active_sessions() == 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn abort_cancels_the_session_and_is_relayed() -> Result<()> {
    let bus = EchoLink::new(TOOL);
    let engine = TransportEngine::new(bus.clone())?;
    let mut inbound = engine.read(Duration::from_secs(30))?;
    let peer = bus.attach(ECU);

    let rts = ControlMessage::RequestToSend { len: 20, segments: 3, max_per_cts: 0xFF, pgn: 0xEFF9 };
    peer.send(rts.to_frame(ECU, TOOL)).await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    ensure!(engine.active_sessions() == 1);

    let abort = ControlMessage::Abort { reason: AbortReason::SystemResources, pgn: 0xEFF9 };
    peer.send(abort.to_frame(ECU, TOOL)).await?;

    let (relayed, _) = next_payload(&mut inbound).await?;
    ensure!(relayed.id() == TP_CM | TOOL as u32 && relayed.source() == ECU);
    ensure!(engine.active_sessions() == 0);

    // Late data is ignored and no message is ever assembled
    let data = pattern(20);
    for sequence in 1..=3 {
        peer.send(data_frame(ECU, TOOL, sequence, &data)).await?;
    }
    ensure!(timeout(Duration::from_secs(10), inbound.next_frame()).await.is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_pending_frame_fails_the_send() -> Result<()> {
    let (_bus, tool, _ecu) = engines(TransportConfig::default())?;
    let frame = Frame::pending(6, 0xD300, TOOL, Direction::Transmitted);

    let send = tokio::spawn({
        let tool = tool.clone();
        let frame = frame.clone();
        async move { tool.send(frame).await }
    });
    tokio::task::yield_now().await;
    ensure!(frame.fail());

    ensure!(matches!(send.await?, Err(TransportError::FrameFailed)));
    ensure!(matches!(frame.resolve(vec![1, 2, 3]), Err(TransportError::FrameFailed)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pending_frame_is_sent_once_resolved() -> Result<()> {
    let (_bus, tool, ecu) = engines(TransportConfig::default())?;
    let mut inbound = ecu.read(Duration::from_secs(30))?;
    let frame = Frame::pending(6, 0xFECA, TOOL, Direction::Transmitted);

    let send = tokio::spawn({
        let tool = tool.clone();
        let frame = frame.clone();
        async move { tool.send(frame).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    frame.resolve(pattern(40))?;
    send.await??;

    let (_, bytes) = next_payload(&mut inbound).await?;
    ensure!(bytes == pattern(40));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn yaml_config_drives_the_timing() -> Result<()> {
    let config = TransportConfig::from_yaml("t3_ms: 400\nbam_interval_ms: 5\n")?;
    let (_bus, tool, _ecu) = engines(config)?;

    let started = Instant::now();
    let result = tool.send(Frame::create(0xD342, TOOL, pattern(20))).await;
    ensure!(matches!(result, Err(TransportError::CtsNotReceived { .. })));
    ensure!(started.elapsed() < Duration::from_millis(500));
    Ok(())
}
