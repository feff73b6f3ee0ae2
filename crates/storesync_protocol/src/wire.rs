//! Length-delimited wire framing for records.
//!
//! The framing is fixed by the storage service. Each record is one frame:
//!
//! ```text
//! frame_len: u32 | type: u8 | id_len: u32 | id bytes | payload_len: u32 | payload
//! ```
//!
//! `frame_len` counts every byte of the frame including itself. Known
//! record kinds lay their fields out in a fixed order inside the payload,
//! with any bytes this client does not understand trailing at the end;
//! those trailing bytes are what [`ContactRecord::unknown_fields`] and
//! friends carry, and they survive a decode/encode round trip intact.
//! Unknown-kind payloads are never interpreted at all.
//!
//! [`ContactRecord::unknown_fields`]: crate::record::ContactRecord

use crate::error::{ProtocolError, ProtocolResult};
use crate::id::{RecordType, StorageId};
use crate::record::{
    AccountRecord, ContactRecord, GroupV1Record, GroupV2Record, ServiceAddress, StorageRecord,
    UnknownRecord,
};

/// Upper bound on any single length prefix.
const MAX_FIELD_LEN: usize = 1 << 24;

const FLAG_BLOCKED: u8 = 0x01;
const FLAG_PROFILE_SHARING: u8 = 0x02;
const FLAG_ARCHIVED: u8 = 0x04;
const FLAG_FORCED_UNREAD: u8 = 0x08;

const FLAG_READ_RECEIPTS: u8 = 0x01;
const FLAG_TYPING_INDICATORS: u8 = 0x02;
const FLAG_LINK_PREVIEWS: u8 = 0x04;
const FLAG_NOTE_TO_SELF_ARCHIVED: u8 = 0x08;

/// Encodes one record to a single wire frame.
#[must_use]
pub fn encode_record(record: &StorageRecord) -> Vec<u8> {
    let payload = encode_payload(record);
    let id = record.id();

    // frame_len (4) + type (1) + id_len (4) + id + payload_len (4) + payload
    let frame_len = 13 + id.raw().len() + payload.len();
    let mut buf = Vec::with_capacity(frame_len);
    buf.extend_from_slice(&(frame_len as u32).to_le_bytes());
    buf.push(id.record_type().to_code());
    write_bytes(&mut buf, id.raw());
    write_bytes(&mut buf, &payload);
    buf
}

/// Decodes exactly one wire frame.
pub fn decode_record(bytes: &[u8]) -> ProtocolResult<StorageRecord> {
    let mut offset = 0;
    let record = decode_frame(bytes, &mut offset)?;
    if offset != bytes.len() {
        return Err(ProtocolError::invalid_structure(
            "trailing bytes after frame",
        ));
    }
    Ok(record)
}

/// Encodes a batch of records as concatenated frames.
#[must_use]
pub fn encode_records(records: &[StorageRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    for record in records {
        buf.extend_from_slice(&encode_record(record));
    }
    buf
}

/// Decodes concatenated frames until the input is exhausted.
pub fn decode_records(bytes: &[u8]) -> ProtocolResult<Vec<StorageRecord>> {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        records.push(decode_frame(bytes, &mut offset)?);
    }
    Ok(records)
}

fn decode_frame(bytes: &[u8], offset: &mut usize) -> ProtocolResult<StorageRecord> {
    let frame_start = *offset;
    let frame_len = read_u32(bytes, offset)? as usize;

    if frame_len < 13 || frame_len > MAX_FIELD_LEN {
        return Err(ProtocolError::invalid_structure("bad frame length"));
    }
    if frame_start + frame_len > bytes.len() {
        return Err(ProtocolError::Truncated {
            needed: frame_len,
            available: bytes.len() - frame_start,
        });
    }

    let code = read_u8(bytes, offset)?;
    let record_type = RecordType::from_code(code);
    let raw_id = read_bytes(bytes, offset)?;
    let payload = read_bytes(bytes, offset)?;
    let id = StorageId::new(record_type, raw_id);

    if *offset != frame_start + frame_len {
        return Err(ProtocolError::invalid_structure(
            "frame length does not match contents",
        ));
    }

    decode_payload(record_type, id, &payload)
}

fn encode_payload(record: &StorageRecord) -> Vec<u8> {
    let mut buf = Vec::new();
    match record {
        StorageRecord::Contact(r) => {
            write_opt_string(&mut buf, r.address.service_id.as_deref());
            write_opt_string(&mut buf, r.address.e164.as_deref());
            write_string(&mut buf, &r.given_name);
            write_string(&mut buf, &r.family_name);
            write_opt_bytes(&mut buf, r.profile_key.as_deref());
            buf.push(shared_flags(
                r.blocked,
                r.profile_sharing_enabled,
                r.archived,
                r.forced_unread,
            ));
            buf.extend_from_slice(&r.mute_until.to_le_bytes());
            buf.extend_from_slice(&r.unknown_fields);
        }
        StorageRecord::GroupV1(r) => {
            write_bytes(&mut buf, &r.group_id);
            buf.push(shared_flags(
                r.blocked,
                r.profile_sharing_enabled,
                r.archived,
                r.forced_unread,
            ));
            buf.extend_from_slice(&r.mute_until.to_le_bytes());
            buf.extend_from_slice(&r.unknown_fields);
        }
        StorageRecord::GroupV2(r) => {
            write_bytes(&mut buf, &r.master_key);
            buf.push(shared_flags(
                r.blocked,
                r.profile_sharing_enabled,
                r.archived,
                r.forced_unread,
            ));
            buf.extend_from_slice(&r.mute_until.to_le_bytes());
            buf.extend_from_slice(&r.unknown_fields);
        }
        StorageRecord::Account(r) => {
            write_string(&mut buf, &r.self_id);
            write_string(&mut buf, &r.given_name);
            write_string(&mut buf, &r.family_name);
            write_opt_string(&mut buf, r.avatar_url.as_deref());
            let mut flags = 0u8;
            if r.read_receipts {
                flags |= FLAG_READ_RECEIPTS;
            }
            if r.typing_indicators {
                flags |= FLAG_TYPING_INDICATORS;
            }
            if r.link_previews {
                flags |= FLAG_LINK_PREVIEWS;
            }
            if r.note_to_self_archived {
                flags |= FLAG_NOTE_TO_SELF_ARCHIVED;
            }
            buf.push(flags);
            buf.extend_from_slice(&r.unknown_fields);
        }
        StorageRecord::Unknown(r) => {
            buf.extend_from_slice(&r.payload);
        }
    }
    buf
}

fn decode_payload(
    record_type: RecordType,
    id: StorageId,
    payload: &[u8],
) -> ProtocolResult<StorageRecord> {
    let mut offset = 0;
    match record_type {
        RecordType::Contact => {
            let service_id = read_opt_string(payload, &mut offset, "service_id")?;
            let e164 = read_opt_string(payload, &mut offset, "e164")?;
            let given_name = read_string(payload, &mut offset, "given_name")?;
            let family_name = read_string(payload, &mut offset, "family_name")?;
            let profile_key = read_opt_bytes(payload, &mut offset)?;
            let flags = read_u8(payload, &mut offset)?;
            let mute_until = read_u64(payload, &mut offset)?;
            Ok(StorageRecord::Contact(ContactRecord {
                id,
                address: ServiceAddress::new(service_id, e164),
                given_name,
                family_name,
                profile_key,
                blocked: flags & FLAG_BLOCKED != 0,
                profile_sharing_enabled: flags & FLAG_PROFILE_SHARING != 0,
                archived: flags & FLAG_ARCHIVED != 0,
                forced_unread: flags & FLAG_FORCED_UNREAD != 0,
                mute_until,
                unknown_fields: payload[offset..].to_vec(),
            }))
        }
        RecordType::GroupV1 => {
            let group_id = read_bytes(payload, &mut offset)?;
            let flags = read_u8(payload, &mut offset)?;
            let mute_until = read_u64(payload, &mut offset)?;
            Ok(StorageRecord::GroupV1(GroupV1Record {
                id,
                group_id,
                blocked: flags & FLAG_BLOCKED != 0,
                profile_sharing_enabled: flags & FLAG_PROFILE_SHARING != 0,
                archived: flags & FLAG_ARCHIVED != 0,
                forced_unread: flags & FLAG_FORCED_UNREAD != 0,
                mute_until,
                unknown_fields: payload[offset..].to_vec(),
            }))
        }
        RecordType::GroupV2 => {
            let master_key = read_bytes(payload, &mut offset)?;
            let flags = read_u8(payload, &mut offset)?;
            let mute_until = read_u64(payload, &mut offset)?;
            Ok(StorageRecord::GroupV2(GroupV2Record {
                id,
                master_key,
                blocked: flags & FLAG_BLOCKED != 0,
                profile_sharing_enabled: flags & FLAG_PROFILE_SHARING != 0,
                archived: flags & FLAG_ARCHIVED != 0,
                forced_unread: flags & FLAG_FORCED_UNREAD != 0,
                mute_until,
                unknown_fields: payload[offset..].to_vec(),
            }))
        }
        RecordType::Account => {
            let self_id = read_string(payload, &mut offset, "self_id")?;
            let given_name = read_string(payload, &mut offset, "given_name")?;
            let family_name = read_string(payload, &mut offset, "family_name")?;
            let avatar_url = read_opt_string(payload, &mut offset, "avatar_url")?;
            let flags = read_u8(payload, &mut offset)?;
            Ok(StorageRecord::Account(AccountRecord {
                id,
                self_id,
                given_name,
                family_name,
                avatar_url,
                read_receipts: flags & FLAG_READ_RECEIPTS != 0,
                typing_indicators: flags & FLAG_TYPING_INDICATORS != 0,
                link_previews: flags & FLAG_LINK_PREVIEWS != 0,
                note_to_self_archived: flags & FLAG_NOTE_TO_SELF_ARCHIVED != 0,
                unknown_fields: payload[offset..].to_vec(),
            }))
        }
        RecordType::Unknown(_) => Ok(StorageRecord::Unknown(UnknownRecord::new(
            id,
            payload.to_vec(),
        ))),
    }
}

fn shared_flags(blocked: bool, profile_sharing: bool, archived: bool, forced_unread: bool) -> u8 {
    let mut flags = 0u8;
    if blocked {
        flags |= FLAG_BLOCKED;
    }
    if profile_sharing {
        flags |= FLAG_PROFILE_SHARING;
    }
    if archived {
        flags |= FLAG_ARCHIVED;
    }
    if forced_unread {
        flags |= FLAG_FORCED_UNREAD;
    }
    flags
}

// Primitive readers and writers, shared with the manifest codec.

pub(crate) fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
}

fn write_opt_bytes(buf: &mut Vec<u8>, bytes: Option<&[u8]>) {
    match bytes {
        Some(bytes) => {
            buf.push(1);
            write_bytes(buf, bytes);
        }
        None => buf.push(0),
    }
}

fn write_opt_string(buf: &mut Vec<u8>, s: Option<&str>) {
    write_opt_bytes(buf, s.map(str::as_bytes));
}

pub(crate) fn read_u8(bytes: &[u8], offset: &mut usize) -> ProtocolResult<u8> {
    let b = *bytes.get(*offset).ok_or(ProtocolError::Truncated {
        needed: 1,
        available: 0,
    })?;
    *offset += 1;
    Ok(b)
}

pub(crate) fn read_u32(bytes: &[u8], offset: &mut usize) -> ProtocolResult<u32> {
    let end = *offset + 4;
    if end > bytes.len() {
        return Err(ProtocolError::Truncated {
            needed: 4,
            available: bytes.len() - *offset,
        });
    }
    let value = u32::from_le_bytes(bytes[*offset..end].try_into().unwrap_or([0; 4]));
    *offset = end;
    Ok(value)
}

pub(crate) fn read_u64(bytes: &[u8], offset: &mut usize) -> ProtocolResult<u64> {
    let end = *offset + 8;
    if end > bytes.len() {
        return Err(ProtocolError::Truncated {
            needed: 8,
            available: bytes.len() - *offset,
        });
    }
    let value = u64::from_le_bytes(bytes[*offset..end].try_into().unwrap_or([0; 8]));
    *offset = end;
    Ok(value)
}

pub(crate) fn read_bytes(bytes: &[u8], offset: &mut usize) -> ProtocolResult<Vec<u8>> {
    let len = read_u32(bytes, offset)? as usize;
    if len > MAX_FIELD_LEN {
        return Err(ProtocolError::LengthOverflow {
            length: len,
            max: MAX_FIELD_LEN,
        });
    }
    let end = *offset + len;
    if end > bytes.len() {
        return Err(ProtocolError::Truncated {
            needed: len,
            available: bytes.len() - *offset,
        });
    }
    let out = bytes[*offset..end].to_vec();
    *offset = end;
    Ok(out)
}

fn read_string(bytes: &[u8], offset: &mut usize, field: &'static str) -> ProtocolResult<String> {
    let raw = read_bytes(bytes, offset)?;
    String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8 { field })
}

fn read_opt_bytes(bytes: &[u8], offset: &mut usize) -> ProtocolResult<Option<Vec<u8>>> {
    match read_u8(bytes, offset)? {
        0 => Ok(None),
        _ => Ok(Some(read_bytes(bytes, offset)?)),
    }
}

fn read_opt_string(
    bytes: &[u8],
    offset: &mut usize,
    field: &'static str,
) -> ProtocolResult<Option<String>> {
    match read_opt_bytes(bytes, offset)? {
        Some(raw) => String::from_utf8(raw)
            .map(Some)
            .map_err(|_| ProtocolError::InvalidUtf8 { field }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_contact() -> StorageRecord {
        let mut record = ContactRecord::new(
            StorageId::for_contact(vec![7; 16]),
            ServiceAddress::new(Some("abc-123".into()), Some("+15550100".into())),
        );
        record.given_name = "Ada".into();
        record.blocked = true;
        record.mute_until = 9000;
        record.unknown_fields = vec![0xDE, 0xAD, 0xBE, 0xEF];
        StorageRecord::Contact(record)
    }

    #[test]
    fn contact_roundtrip_preserves_unknown_fields() {
        let record = sample_contact();
        let decoded = decode_record(&encode_record(&record)).unwrap();
        assert_eq!(decoded, record);

        match decoded {
            StorageRecord::Contact(c) => assert_eq!(c.unknown_fields, vec![0xDE, 0xAD, 0xBE, 0xEF]),
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn unknown_record_payload_is_opaque() {
        let record = StorageRecord::Unknown(UnknownRecord::new(
            StorageId::new(RecordType::Unknown(42), vec![9; 16]),
            vec![1, 2, 3, 4, 5],
        ));

        let bytes = encode_record(&record);
        let decoded = decode_record(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(encode_record(&decoded), bytes);
    }

    #[test]
    fn batch_decoding_walks_frames() {
        let records = vec![
            sample_contact(),
            StorageRecord::GroupV2(GroupV2Record::new(
                StorageId::for_group_v2(vec![3; 16]),
                vec![4; 32],
            )),
        ];

        let decoded = decode_records(&encode_records(&records)).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let bytes = encode_record(&sample_contact());
        assert!(matches!(
            decode_record(&bytes[..bytes.len() - 2]),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        let mut bytes = encode_record(&sample_contact());
        bytes.push(0xFF);
        assert!(decode_record(&bytes).is_err());
    }
}
