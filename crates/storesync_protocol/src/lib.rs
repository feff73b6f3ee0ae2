//! # Storesync Protocol
//!
//! Record types, manifests, and wire framing for the storage service.
//!
//! The storage service is a dumb versioned key-value store: it holds a set
//! of opaque records, each addressed by a type-tagged [`StorageId`], plus a
//! [`Manifest`] that enumerates every ID under a monotonically-increasing
//! version. An ID names an immutable snapshot of a record; updating a
//! record means deleting the old ID and inserting a new one.
//!
//! This crate provides:
//! - [`StorageId`] and [`RecordType`] identifiers
//! - [`Manifest`] with its wire encoding
//! - The record kinds ([`ContactRecord`], [`GroupV1Record`],
//!   [`GroupV2Record`], [`AccountRecord`], [`UnknownRecord`]) and the
//!   [`StorageRecord`] union over them
//! - [`SemanticKey`], the stable identity of the entity a record represents
//! - Length-delimited record framing ([`encode_record`] / [`decode_record`])
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod id;
mod manifest;
mod record;
mod wire;

pub use error::{ProtocolError, ProtocolResult};
pub use id::{RecordType, StorageId, STORAGE_ID_LEN};
pub use manifest::Manifest;
pub use record::{
    AccountRecord, ContactRecord, GroupV1Record, GroupV2Record, SemanticKey, ServiceAddress,
    StorageRecord, UnknownRecord, GROUP_V1_ID_LEN, GROUP_V2_MASTER_KEY_LEN,
};
pub use wire::{decode_record, decode_records, encode_record, encode_records};
