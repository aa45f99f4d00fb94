//! Minimal RPC CALL/REPLY framing for the callback channel (§4.D):
//! record-mark header, AUTH_NULL credential/verifier, and reply envelope
//! parsing. The callback's procedure-specific argument/result XDR bodies
//! (CB_COMPOUND4args/res) are supplied and interpreted by the caller -- see
//! `super::Encoder` -- since this crate does not own XDR encoding (that is
//! a wire-layer collaborator, out of scope per SPEC_FULL.md §6).

use byteorder::{BigEndian, ByteOrder};

use crate::error::Kind;

const MSG_TYPE_CALL: u32 = 0;
const MSG_TYPE_REPLY: u32 = 1;
const REPLY_STAT_MSG_ACCEPTED: u32 = 0;
const ACCEPT_STAT_SUCCESS: u32 = 0;
const AUTH_NONE: u32 = 0;
const RPC_VERSION: u32 = 2;

/// Builds one RPC CALL message body (without the record-mark prefix):
/// xid, rpcvers, program, version, procedure, AUTH_NONE credential and
/// verifier, then `args`.
pub fn encode_call(xid: u32, program: u32, version: u32, procedure: u32, args: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + args.len());
    push_u32(&mut buf, xid);
    push_u32(&mut buf, MSG_TYPE_CALL);
    push_u32(&mut buf, RPC_VERSION);
    push_u32(&mut buf, program);
    push_u32(&mut buf, version);
    push_u32(&mut buf, procedure);
    // credential: flavor AUTH_NONE, zero-length body
    push_u32(&mut buf, AUTH_NONE);
    push_u32(&mut buf, 0);
    // verifier: flavor AUTH_NONE, zero-length body
    push_u32(&mut buf, AUTH_NONE);
    push_u32(&mut buf, 0);
    buf.extend_from_slice(args);
    buf
}

/// Wraps a message body in a single-fragment record mark (top bit set,
/// lower 31 bits the length), per the NFS-over-TCP framing convention.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + body.len());
    let marker = 0x8000_0000u32 | (body.len() as u32 & 0x7fff_ffff);
    push_u32(&mut framed, marker);
    framed.extend_from_slice(body);
    framed
}

/// Parses a record-mark header, returning (is_last_fragment, length).
pub fn parse_record_mark(header: &[u8; 4]) -> (bool, u32) {
    let marker = BigEndian::read_u32(header);
    (marker & 0x8000_0000 != 0, marker & 0x7fff_ffff)
}

/// Validates the RPC REPLY envelope in `body` (xid must match, message
/// accepted, procedure accepted) and returns whatever bytes follow --
/// the procedure-specific result.
pub fn parse_reply(expected_xid: u32, body: &[u8]) -> Result<&[u8], Kind> {
    if body.len() < 24 {
        return Err(Kind::CallbackRpcFailure);
    }
    let xid = BigEndian::read_u32(&body[0..4]);
    let msg_type = BigEndian::read_u32(&body[4..8]);
    let reply_stat = BigEndian::read_u32(&body[8..12]);
    if xid != expected_xid || msg_type != MSG_TYPE_REPLY || reply_stat != REPLY_STAT_MSG_ACCEPTED {
        return Err(Kind::CallbackRpcFailure);
    }
    // verifier: flavor(4) + length(4) + opaque(length, word-padded)
    let verf_len = BigEndian::read_u32(&body[16..20]) as usize;
    let padded = (verf_len + 3) & !3;
    let accept_stat_offset = 20 + padded;
    if body.len() < accept_stat_offset + 4 {
        return Err(Kind::CallbackRpcFailure);
    }
    let accept_stat = BigEndian::read_u32(&body[accept_stat_offset..accept_stat_offset + 4]);
    if accept_stat != ACCEPT_STAT_SUCCESS {
        return Err(Kind::CallbackRpcFailure);
    }
    Ok(&body[accept_stat_offset + 4..])
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    let mut tmp = [0u8; 4];
    BigEndian::write_u32(&mut tmp, value);
    buf.extend_from_slice(&tmp);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_accepted_reply(xid: u32, trailing: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        push_u32(&mut buf, xid);
        push_u32(&mut buf, MSG_TYPE_REPLY);
        push_u32(&mut buf, REPLY_STAT_MSG_ACCEPTED);
        push_u32(&mut buf, AUTH_NONE); // verf flavor
        push_u32(&mut buf, 0); // verf length
        push_u32(&mut buf, ACCEPT_STAT_SUCCESS);
        buf.extend_from_slice(trailing);
        buf
    }

    #[test]
    fn frame_round_trips_length() {
        let body = b"hello".to_vec();
        let framed = frame(&body);
        let mut header = [0u8; 4];
        header.copy_from_slice(&framed[0..4]);
        let (last, len) = parse_record_mark(&header);
        assert!(last);
        assert_eq!(len as usize, body.len());
    }

    #[test]
    fn parse_reply_extracts_trailing_bytes() {
        let reply = encode_accepted_reply(42, &[9, 9, 9]);
        let trailing = parse_reply(42, &reply).unwrap();
        assert_eq!(trailing, &[9, 9, 9]);
    }

    #[test]
    fn parse_reply_rejects_mismatched_xid() {
        let reply = encode_accepted_reply(42, &[]);
        assert!(parse_reply(7, &reply).is_err());
    }

    #[test]
    fn encode_call_is_well_formed_prefix() {
        let call = encode_call(1, 0x4000_0001, 1, 1, &[1, 2, 3]);
        assert_eq!(BigEndian::read_u32(&call[0..4]), 1);
        assert_eq!(BigEndian::read_u32(&call[4..8]), MSG_TYPE_CALL);
        assert_eq!(&call[call.len() - 3..], &[1, 2, 3]);
    }
}
