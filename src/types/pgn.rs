//! Identifier helpers shared by frames and the transport engine.

/// Global (broadcast) destination address.
pub const GLOBAL_ADDR: u8 = 0xFF;

/// Priority used when a frame is built without an explicit one.
pub const DEFAULT_PRIORITY: u8 = 6;

/// Largest payload a single CAN frame carries.
pub const SINGLE_FRAME_MAX: usize = 8;

/// Largest payload the transport protocol can move (255 segments of 7 bytes).
pub const MAX_PAYLOAD: usize = 1785;

/// Data bytes carried by one TP.DT segment.
pub const SEGMENT_DATA_LEN: usize = 7;

/// Mask for the 18 identifier bits above the source address (EDP, DP, PF, PS).
pub const ID_MASK: u32 = 0x3FFFF;

/// True when the identifier's PDU format selects PDU1 (destination specific).
pub fn is_pdu1(id: u32) -> bool {
    (id & 0xFFFF) < 0xF000
}

/// Destination address carried by an identifier, or [`GLOBAL_ADDR`] for PDU2.
pub fn destination_of(id: u32) -> u8 {
    if is_pdu1(id) { (id & 0xFF) as u8 } else { GLOBAL_ADDR }
}

/// PGN of an identifier: the low 16 bits, with the destination byte cleared
/// for PDU1 identifiers.
pub fn pgn_of(id: u32) -> u32 {
    let id = id & 0xFFFF;
    if id < 0xF000 { id & 0xFF00 } else { id }
}

/// Number of TP.DT segments needed for `len` bytes.
pub fn segment_count(len: usize) -> usize {
    len.div_ceil(SEGMENT_DATA_LEN)
}
