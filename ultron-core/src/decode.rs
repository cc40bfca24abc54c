//! Decode telemetry datagrams into typed messages.
//!
//! One call per datagram; the type discriminant is read once and dispatched:
//! - 0:  Heartbeat
//! - 1:  Status (dial frequency, TX state, own call/grid)
//! - 2:  Decode (one over-the-air message)
//! - 4:  Reply
//! - 8:  Halt TX
//! - 12: Logged ADIF (field-tagged contact record)
//!
//! Anything else (including type 5, the structured QSO-logged message,
//! which duplicates type 12) decodes to `Message::Unrecognized`.

use crate::adif;
use crate::frame::{kind, WireReader};
use crate::types::*;

/// Decode a whole datagram.
///
/// Errors are always `UltronError::Malformed`; callers drop the packet and
/// keep reading.
pub fn decode(buf: &[u8]) -> Result<Message> {
    let mut r = WireReader::new(buf);
    let header = r.header()?;

    let msg = match header.kind {
        kind::HEARTBEAT => Message::Heartbeat(decode_heartbeat(&mut r)?),
        kind::STATUS => Message::Status(decode_status(&mut r)?),
        kind::DECODE => Message::Decode(decode_decode(&mut r)?),
        kind::REPLY => Message::Reply(decode_reply(&mut r)?),
        kind::HALT_TX => Message::HaltTx(decode_halt_tx(&mut r)?),
        kind::LOGGED_ADIF => Message::LoggedAdif(decode_logged_adif(&mut r)?),
        other => Message::Unrecognized { kind: other },
    };
    Ok(msg)
}

/// Heartbeat; schema and version fields are optional on old senders.
fn decode_heartbeat(r: &mut WireReader<'_>) -> Result<Heartbeat> {
    let id = r.string()?;
    let max_schema = if r.is_empty() { 0 } else { r.u32()? };
    let version = if r.is_empty() { String::new() } else { r.string()? };
    let revision = if r.is_empty() { String::new() } else { r.string()? };
    Ok(Heartbeat {
        id,
        max_schema,
        version,
        revision,
    })
}

/// Status. Newer senders append sub-mode, T/R period etc.; those are ignored.
fn decode_status(r: &mut WireReader<'_>) -> Result<Status> {
    Ok(Status {
        id: r.string()?,
        dial_frequency_hz: r.u64()?,
        mode: r.string()?,
        dx_call: r.opt_string()?,
        report: r.string()?,
        tx_mode: r.string()?,
        tx_enabled: r.bool()?,
        transmitting: r.bool()?,
        decoding: r.bool()?,
        rx_df: r.i32()?,
        tx_df: r.i32()?,
        de_call: r.string()?,
        de_grid: r.string()?,
        dx_grid: r.opt_string()?,
        tx_watchdog: r.bool()?,
    })
}

fn decode_decode(r: &mut WireReader<'_>) -> Result<Decode> {
    Ok(Decode {
        id: r.string()?,
        is_new: r.bool()?,
        time_ms: r.u32()?,
        snr_db: r.i32()?,
        delta_time_s: r.f64()?,
        delta_frequency_hz: r.i32()?,
        mode: r.string()?,
        message: r.string()?,
        low_confidence: r.bool()?,
        off_air: r.bool()?,
    })
}

fn decode_reply(r: &mut WireReader<'_>) -> Result<Reply> {
    Ok(Reply {
        id: r.string()?,
        time_ms: r.u32()?,
        snr_db: r.i32()?,
        delta_time_s: r.f64()?,
        delta_frequency_hz: r.i32()?,
        mode: r.string()?,
        message: r.string()?,
        low_confidence: r.bool()?,
        modifiers: r.u8()?,
    })
}

fn decode_halt_tx(r: &mut WireReader<'_>) -> Result<HaltTx> {
    Ok(HaltTx {
        id: r.string()?,
        auto_tx_only: r.bool()?,
    })
}

/// Logged ADIF. The text may carry a header; only the first record is kept.
fn decode_logged_adif(r: &mut WireReader<'_>) -> Result<LoggedAdif> {
    let id = r.string()?;
    let text = r.string()?;
    let record = adif::parse_records(&text)
        .into_iter()
        .next()
        .unwrap_or_default();
    Ok(LoggedAdif { id, record })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{WireWriter, MAGIC};

    fn sample_decode_bytes(message: &str) -> Vec<u8> {
        let mut w = WireWriter::new(kind::DECODE);
        w.string("WSJT-X")
            .bool(true)
            .u32(45_000_000)
            .i32(-12)
            .f64(0.2)
            .i32(1234)
            .string("~")
            .string(message)
            .bool(false)
            .bool(false);
        w.finish()
    }

    #[test]
    fn test_decode_decode_message() {
        let bytes = sample_decode_bytes("CQ K1ABC FN42");
        match decode(&bytes).unwrap() {
            Message::Decode(d) => {
                assert_eq!(d.id, "WSJT-X");
                assert!(d.is_new);
                assert_eq!(d.snr_db, -12);
                assert_eq!(d.delta_frequency_hz, 1234);
                assert_eq!(d.mode, "~");
                assert_eq!(d.message, "CQ K1ABC FN42");
            }
            other => panic!("expected decode, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_status_with_absent_fields() {
        let mut w = WireWriter::new(kind::STATUS);
        w.string("JTDX")
            .u64(7_074_000)
            .string("FT8")
            .opt_string(None)
            .string("-14")
            .string("FT8")
            .bool(false)
            .bool(false)
            .bool(true)
            .i32(1500)
            .i32(1500)
            .string("LU9DCE")
            .string("GF05")
            .opt_string(None)
            .bool(false)
            // trailing fields from newer senders
            .string("")
            .bool(false);
        let bytes = w.finish();

        match decode(&bytes).unwrap() {
            Message::Status(s) => {
                assert_eq!(s.id, "JTDX");
                assert_eq!(s.band(), Some(Band::M40));
                assert_eq!(s.dx_call, None);
                assert_eq!(s.dx_grid, None);
                assert_eq!(s.de_call, "LU9DCE");
                assert!(s.decoding);
                assert!(!s.tx_enabled);
            }
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat_minimal() {
        let mut w = WireWriter::new(kind::HEARTBEAT);
        w.string("WSJT-X");
        let bytes = w.finish();
        match decode(&bytes).unwrap() {
            Message::Heartbeat(h) => {
                assert_eq!(h.id, "WSJT-X");
                assert_eq!(h.max_schema, 0);
                assert!(h.version.is_empty());
            }
            other => panic!("expected heartbeat, got {other:?}"),
        }
    }

    #[test]
    fn test_logged_adif_with_header() {
        let mut w = WireWriter::new(kind::LOGGED_ADIF);
        w.string("WSJT-X").string(
            "\n<adif_ver:5>3.1.0\n<programid:6>WSJT-X\n<EOH>\n\
             <call:5>K1ABC <band:3>20m <mode:3>FT8 <EOR>",
        );
        let bytes = w.finish();
        match decode(&bytes).unwrap() {
            Message::LoggedAdif(l) => {
                assert_eq!(l.record.call(), Some("K1ABC"));
                assert_eq!(l.record.get("band"), Some("20m"));
                assert_eq!(l.record.get("programid"), None);
            }
            other => panic!("expected logged adif, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_is_unrecognized() {
        let bytes = WireWriter::new(kind::QSO_LOGGED).finish();
        assert_eq!(decode(&bytes).unwrap(), Message::Unrecognized { kind: 5 });

        let bytes = WireWriter::new(99).finish();
        assert_eq!(decode(&bytes).unwrap(), Message::Unrecognized { kind: 99 });
    }

    #[test]
    fn test_truncated_decode_is_malformed() {
        let bytes = sample_decode_bytes("CQ K1ABC FN42");
        let cut = &bytes[..bytes.len() - 5];
        assert!(matches!(
            decode(cut),
            Err(UltronError::Malformed { .. })
        ));
    }

    #[test]
    fn test_bad_magic_is_malformed() {
        let mut bytes = sample_decode_bytes("CQ K1ABC FN42");
        bytes[..4].copy_from_slice(&(MAGIC ^ 1).to_be_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(UltronError::Malformed { .. })
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(decode(b"TEST_PACKET_TO_ULTRON").is_err());
        assert!(decode(&[]).is_err());
    }
}
