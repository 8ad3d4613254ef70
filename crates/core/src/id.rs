//! Unique identifiers for rekeying entities.
//!
//! Strongly-typed UUID identifiers built with
//! [`domain-key`](https://crates.io/crates/domain-key) `define_uuid!`. Each
//! identifier type carries its own domain marker, so a [`ResourceId`] can never
//! be passed where a [`ManagedSecretId`] is expected.
//!
//! All ID types are `Copy` and support `v4()`, `nil()`, `parse(&str)`,
//! serde (as a UUID string), `Display`, `FromStr`, `Eq`, `Ord` and `Hash`.

use domain_key::define_uuid;

pub use domain_key::UuidParseError;

define_uuid!(pub ManagedSecretIdDomain => ManagedSecretId);
define_uuid!(pub ResourceIdDomain => ResourceId);
define_uuid!(pub RekeyingTaskIdDomain => RekeyingTaskId);
define_uuid!(pub AttemptIdDomain => AttemptId);
define_uuid!(pub SecureEntryIdDomain => SecureEntryId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_secret_id_v4_creates_non_nil_uuid() {
        let id = ManagedSecretId::v4();
        assert!(!id.is_nil());
    }

    #[test]
    fn task_ids_are_unique() {
        assert_ne!(RekeyingTaskId::v4(), RekeyingTaskId::v4());
    }

    #[test]
    fn resource_id_round_trips_through_display() {
        let id = ResourceId::v4();
        let parsed: ResourceId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ids_round_trip_through_serde() {
        let id = SecureEntryId::v4();
        let json = serde_json::to_string(&id).unwrap();
        let back: SecureEntryId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
