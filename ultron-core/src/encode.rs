//! Encode outbound datagrams.
//!
//! The controller only ever sends Reply and Halt TX, but every message type
//! encodes so that captures and tests can be built from typed values.

use crate::frame::{kind, WireWriter};
use crate::types::*;

impl Message {
    /// Serialize to a complete datagram, header included.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Heartbeat(h) => {
                let mut w = WireWriter::new(kind::HEARTBEAT);
                w.string(&h.id)
                    .u32(h.max_schema)
                    .string(&h.version)
                    .string(&h.revision);
                w.finish()
            }
            Message::Status(s) => {
                let mut w = WireWriter::new(kind::STATUS);
                w.string(&s.id)
                    .u64(s.dial_frequency_hz)
                    .string(&s.mode)
                    .opt_string(s.dx_call.as_deref())
                    .string(&s.report)
                    .string(&s.tx_mode)
                    .bool(s.tx_enabled)
                    .bool(s.transmitting)
                    .bool(s.decoding)
                    .i32(s.rx_df)
                    .i32(s.tx_df)
                    .string(&s.de_call)
                    .string(&s.de_grid)
                    .opt_string(s.dx_grid.as_deref())
                    .bool(s.tx_watchdog);
                w.finish()
            }
            Message::Decode(d) => {
                let mut w = WireWriter::new(kind::DECODE);
                w.string(&d.id)
                    .bool(d.is_new)
                    .u32(d.time_ms)
                    .i32(d.snr_db)
                    .f64(d.delta_time_s)
                    .i32(d.delta_frequency_hz)
                    .string(&d.mode)
                    .string(&d.message)
                    .bool(d.low_confidence)
                    .bool(d.off_air);
                w.finish()
            }
            Message::Reply(r) => encode_reply(r),
            Message::HaltTx(h) => encode_halt(h),
            Message::LoggedAdif(l) => {
                let mut w = WireWriter::new(kind::LOGGED_ADIF);
                w.string(&l.id).string(&l.record.to_adif());
                w.finish()
            }
            Message::Unrecognized { kind } => WireWriter::new(*kind).finish(),
        }
    }
}

/// Reply datagram asking the radio software to answer a decode.
pub fn encode_reply(r: &Reply) -> Vec<u8> {
    let mut w = WireWriter::new(kind::REPLY);
    w.string(&r.id)
        .u32(r.time_ms)
        .i32(r.snr_db)
        .f64(r.delta_time_s)
        .i32(r.delta_frequency_hz)
        .string(&r.mode)
        .string(&r.message)
        .bool(r.low_confidence)
        .u8(r.modifiers);
    w.finish()
}

/// Halt TX datagram.
pub fn encode_halt(h: &HaltTx) -> Vec<u8> {
    let mut w = WireWriter::new(kind::HALT_TX);
    w.string(&h.id).bool(h.auto_tx_only);
    w.finish()
}
