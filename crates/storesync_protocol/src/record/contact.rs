//! Contact records.

use crate::id::StorageId;
use crate::record::SemanticKey;

/// The address of a contact on the messaging service.
///
/// A contact is addressable by a service-assigned identifier, a legacy
/// phone number, or both. A record with neither is unmatchable and gets
/// dropped during processing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceAddress {
    /// Service-assigned identifier.
    pub service_id: Option<String>,
    /// Legacy E.164 phone number.
    pub e164: Option<String>,
}

impl ServiceAddress {
    /// Creates an address from optional parts.
    #[must_use]
    pub fn new(service_id: Option<String>, e164: Option<String>) -> Self {
        Self { service_id, e164 }
    }

    /// Creates an address from a service identifier.
    #[must_use]
    pub fn from_service_id(service_id: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id.into()),
            e164: None,
        }
    }

    /// Returns true if at least one identifier is present.
    #[must_use]
    pub fn is_matchable(&self) -> bool {
        self.service_id.is_some() || self.e164.is_some()
    }

    /// Returns the identity token used for semantic keying.
    ///
    /// The service identifier wins when present; the phone number is the
    /// fallback. Callers must check [`Self::is_matchable`] first.
    #[must_use]
    pub fn identity_token(&self) -> String {
        if let Some(ref service_id) = self.service_id {
            format!("sid:{service_id}")
        } else if let Some(ref e164) = self.e164 {
            format!("tel:{e164}")
        } else {
            String::from("unmatchable")
        }
    }
}

/// A contact record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    /// Storage ID of this snapshot.
    pub id: StorageId,
    /// The contact's address (semantic key).
    pub address: ServiceAddress,
    /// Profile given name.
    pub given_name: String,
    /// Profile family name.
    pub family_name: String,
    /// Profile key, when shared.
    pub profile_key: Option<Vec<u8>>,
    /// Whether the contact is blocked.
    pub blocked: bool,
    /// Whether profile sharing is enabled for the contact.
    pub profile_sharing_enabled: bool,
    /// Whether the conversation is archived.
    pub archived: bool,
    /// Whether the conversation is marked unread.
    pub forced_unread: bool,
    /// Mute expiry timestamp in epoch milliseconds (0 = unmuted).
    pub mute_until: u64,
    /// Fields this client does not understand, carried verbatim.
    pub unknown_fields: Vec<u8>,
}

impl ContactRecord {
    /// Creates a contact record with default attributes.
    #[must_use]
    pub fn new(id: StorageId, address: ServiceAddress) -> Self {
        Self {
            id,
            address,
            given_name: String::new(),
            family_name: String::new(),
            profile_key: None,
            blocked: false,
            profile_sharing_enabled: false,
            archived: false,
            forced_unread: false,
            mute_until: 0,
            unknown_fields: Vec::new(),
        }
    }

    /// Returns the record's semantic key.
    #[must_use]
    pub fn semantic_key(&self) -> SemanticKey {
        SemanticKey::Contact(self.address.identity_token())
    }

    /// Returns true if every attribute other than the storage ID matches.
    #[must_use]
    pub fn attributes_match(&self, other: &Self) -> bool {
        self.address == other.address
            && self.given_name == other.given_name
            && self.family_name == other.family_name
            && self.profile_key == other.profile_key
            && self.blocked == other.blocked
            && self.profile_sharing_enabled == other.profile_sharing_enabled
            && self.archived == other.archived
            && self.forced_unread == other.forced_unread
            && self.mute_until == other.mute_until
            && self.unknown_fields == other.unknown_fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_token_prefers_service_id() {
        let address = ServiceAddress::new(Some("abc".into()), Some("+15550100".into()));
        assert_eq!(address.identity_token(), "sid:abc");

        let address = ServiceAddress::new(None, Some("+15550100".into()));
        assert_eq!(address.identity_token(), "tel:+15550100");
    }

    #[test]
    fn attributes_match_ignores_id() {
        let a = ContactRecord::new(
            StorageId::for_contact(vec![1; 16]),
            ServiceAddress::from_service_id("abc"),
        );
        let mut b = a.clone();
        b.id = StorageId::for_contact(vec![2; 16]);
        assert!(a.attributes_match(&b));

        b.blocked = true;
        assert!(!a.attributes_match(&b));
    }
}
