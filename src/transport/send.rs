//! Outbound transfers: BAM and RTS/CTS.

use tokio::time::sleep;
use tracing::{debug, trace, warn};

use super::control::{ControlMessage, TP_CM, data_frame};
use crate::config::TransportConfig;
use crate::link::Link;
use crate::types::pgn::segment_count;
use crate::types::{Frame, GLOBAL_ADDR, Payload};
use crate::{Result, TransportError};

/// Broadcast `frame` with a BAM announcement followed by paced data frames.
///
/// There is no acknowledgement; the transfer is done once the last segment
/// left `link`.
pub async fn send_broadcast<L: Link + ?Sized>(
    link: &L,
    frame: &Frame,
    payload: &Payload,
    own: u8,
    config: &TransportConfig,
) -> Result<()> {
    let data = payload.as_bytes();
    let segments = segment_count(data.len()) as u8;
    let bam = ControlMessage::Broadcast { len: data.len() as u16, segments, pgn: frame.id() };
    debug!(pgn = frame.id(), len = data.len(), segments, "TP.CM_BAM");
    link.send(bam.to_frame(own, GLOBAL_ADDR)).await?;

    for sequence in 1..=segments {
        sleep(config.bam_interval()).await;
        trace!(sequence, "TP.DT");
        link.send(data_frame(own, GLOBAL_ADDR, sequence, data)).await?;
    }
    Ok(())
}

/// Send `frame` to its destination with the RTS/CTS handshake.
///
/// Waits up to T3 for each CTS or the final EOM, and up to T4 after a
/// "hold the connection open" CTS. A timeout before any CTS arrived is
/// [`TransportError::CtsNotReceived`]; once data flowed it is
/// [`TransportError::EomNotReceived`].
pub async fn send_peer_to_peer<L: Link + ?Sized>(
    link: &L,
    frame: &Frame,
    payload: &Payload,
    own: u8,
    config: &TransportConfig,
) -> Result<()> {
    let data = payload.as_bytes();
    let destination = frame.destination();
    let pgn = frame.id();
    let segments = segment_count(data.len()) as u8;

    // Subscribe before the RTS goes out so an immediate CTS is not missed
    let mut control = link.read(config.t3())?;
    let rts = ControlMessage::RequestToSend {
        len: data.len() as u16,
        segments,
        max_per_cts: config.max_packets_per_cts,
        pgn,
    };
    debug!(destination, pgn, len = data.len(), segments, "TP.CM_RTS");
    link.send(rts.to_frame(own, destination)).await?;

    let mut cts_received = false;
    loop {
        let reply = loop {
            let Some(reply) = control.next_frame().await else {
                break None;
            };
            if reply.source() == destination && reply.id() == TP_CM | own as u32 {
                break Some(reply);
            }
        };
        let message = match reply {
            Some(reply) => match reply.payload().await.and_then(|p| ControlMessage::decode(&p)) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(destination, error = %e, "Undecodable TP.CM reply");
                    None
                }
            },
            None => None,
        };

        match message {
            Some(ControlMessage::ClearToSend { count: 0, reserved, .. }) => {
                cts_received = true;
                if reserved != 0xFFFF {
                    warn!(destination, reserved, "TP.CM_CTS hold-open bytes 4-5 should be FFFF");
                }
                trace!(destination, "TP.CM_CTS hold open");
                control.reset_timeout(config.t4());
            }
            Some(ControlMessage::ClearToSend { count, next, reserved, pgn: cts_pgn }) => {
                cts_received = true;
                if reserved != 0xFFFF {
                    warn!(destination, reserved, "TP.CM_CTS bytes 4-5 should be FFFF");
                }
                if cts_pgn != pgn {
                    warn!(destination, expected = pgn, received = cts_pgn, "TP.CM_CTS bytes 6-8 should be the PGN");
                }
                trace!(destination, count, next, "TP.CM_CTS");
                let first = next as u16;
                for sequence in first..first + count as u16 {
                    if sequence == 0 || sequence > segments as u16 {
                        warn!(destination, sequence, segments, "TP.CM_CTS requested a segment that does not exist");
                        continue;
                    }
                    link.send(data_frame(own, destination, sequence as u8, data)).await?;
                }
                control.reset_timeout(config.t3());
            }
            Some(ControlMessage::EndOfMessage { .. }) => {
                debug!(destination, pgn, "TP.CM_EOM received");
                return Ok(());
            }
            Some(ControlMessage::Abort { reason, .. }) => {
                warn!(destination, pgn, %reason, "TP.Conn_Abort received");
                return Err(TransportError::Aborted { peer: destination, reason });
            }
            _ if cts_received => {
                warn!(destination, pgn, "EOM not received");
                return Err(TransportError::EomNotReceived { destination, pgn });
            }
            _ => {
                warn!(destination, pgn, "CTS not received");
                return Err(TransportError::CtsNotReceived { destination, pgn });
            }
        }
    }
}
