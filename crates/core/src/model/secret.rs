//! The logical credential being kept fresh.

use std::time::Duration;

use base64::Engine as _;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::clock::to_delta;
use crate::id::{ManagedSecretId, ResourceId};

bitflags! {
    /// Confirmation strategies a secret may be rotated under.
    ///
    /// Several may be eligible at once; a task snapshots exactly one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ConfirmationStrategies: u8 {
        /// An administrator approves and their live session backs the run.
        const ADMIN_SIGNS_OFF_JUST_IN_TIME = 0b0000_0001;
        /// An administrator approves ahead of time; their token is cached.
        const ADMIN_CACHES_SIGN_OFF = 0b0000_0010;
        /// The service rotates on its own whenever the secret nears expiry.
        const AUTOMATIC_REKEYING_AS_NEEDED = 0b0000_0100;
        /// The service rotates on its own on a schedule.
        const AUTOMATIC_REKEYING_SCHEDULED = 0b0000_1000;
        /// An outside caller holding the nonce may request rotation.
        const EXTERNAL_SIGNAL = 0b0001_0000;
    }
}

impl ConfirmationStrategies {
    /// Strategies that need no human in the loop.
    pub const AUTOMATIC: Self = Self::AUTOMATIC_REKEYING_AS_NEEDED
        .union(Self::AUTOMATIC_REKEYING_SCHEDULED);

    /// Strategies that need an administrator's approval.
    pub const ADMIN: Self = Self::ADMIN_SIGNS_OFF_JUST_IN_TIME.union(Self::ADMIN_CACHES_SIGN_OFF);
}

/// Risk flag for a validity period that will never rotate sensibly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityRisk {
    /// Period is usable.
    None,
    /// A zero period means the secret is always expired.
    ZeroPeriod,
    /// A max-value period means the secret never expires.
    UnboundedPeriod,
}

/// A managed secret: one validity window over a set of resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedSecret {
    /// Identifier.
    pub id: ManagedSecretId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// How long a rotated value stays valid.
    #[serde(with = "humantime_serde")]
    pub valid_period: Duration,
    /// When the value was last rotated; `None` if never.
    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,
    /// Strategies eligible for this secret.
    #[serde(default)]
    pub confirmations: ConfirmationStrategies,
    /// Opaque token an external caller must present to request rotation.
    #[serde(default)]
    pub nonce: String,
    /// Resources in the order they are configured.
    #[serde(default)]
    pub resources: Vec<ResourceId>,
}

impl ManagedSecret {
    /// Create a secret with a fresh id and nonce.
    pub fn new(name: impl Into<String>, valid_period: Duration) -> Self {
        Self {
            id: ManagedSecretId::v4(),
            name: name.into(),
            description: String::new(),
            valid_period,
            last_changed: None,
            confirmations: ConfirmationStrategies::empty(),
            nonce: generate_nonce(),
            resources: Vec::new(),
        }
    }

    /// Set the eligible strategies.
    pub fn with_confirmations(mut self, confirmations: ConfirmationStrategies) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Append a resource.
    pub fn with_resource(mut self, resource: ResourceId) -> Self {
        self.resources.push(resource);
        self
    }

    /// Set the last rotation time.
    pub fn with_last_changed(mut self, at: DateTime<Utc>) -> Self {
        self.last_changed = Some(at);
        self
    }

    /// `LastChanged + ValidPeriod`, saturating; `None` if never rotated.
    #[must_use]
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.last_changed.map(|changed| {
            changed
                .checked_add_signed(to_delta(self.valid_period))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// `now < Expiry`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expiry().is_some_and(|expiry| now < expiry)
    }

    /// `max(0, Expiry - now)`.
    #[must_use]
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expiry()
            .and_then(|expiry| (expiry - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// `true` when the secret is expired or within `lead_time` of expiring.
    #[must_use]
    pub fn needs_rotation(&self, now: DateTime<Utc>, lead_time: Duration) -> bool {
        !self.is_valid(now) || self.time_remaining(now) <= lead_time
    }

    /// Only a positive period can ever be rotated automatically.
    #[must_use]
    pub fn can_rotate_automatically(&self) -> bool {
        !self.valid_period.is_zero()
    }

    /// Flag periods that make the validity window meaningless.
    #[must_use]
    pub fn validity_risk(&self) -> ValidityRisk {
        if self.valid_period.is_zero() {
            ValidityRisk::ZeroPeriod
        } else if self.valid_period == Duration::MAX
            || chrono::TimeDelta::from_std(self.valid_period).is_err()
        {
            ValidityRisk::UnboundedPeriod
        } else {
            ValidityRisk::None
        }
    }

    /// Replace the nonce with a new random one.
    pub fn regenerate_nonce(&mut self) {
        self.nonce = generate_nonce();
    }

    /// Constant-time nonce comparison. An empty stored nonce never matches.
    #[must_use]
    pub fn nonce_matches(&self, candidate: &str) -> bool {
        !self.nonce.is_empty() && bool::from(self.nonce.as_bytes().ct_eq(candidate.as_bytes()))
    }

    /// Record a completed rotation.
    pub fn mark_rotated(&mut self, at: DateTime<Utc>) {
        self.last_changed = Some(at);
    }
}

/// 32 random bytes, URL-safe base64 without padding.
fn generate_nonce() -> String {
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rstest::rstest;

    const HOUR: Duration = Duration::from_secs(3600);

    fn secret_changed(ago: TimeDelta, now: DateTime<Utc>) -> ManagedSecret {
        ManagedSecret::new("db", 24 * HOUR).with_last_changed(now - ago)
    }

    #[test]
    fn never_rotated_secret_is_invalid() {
        let secret = ManagedSecret::new("db", 24 * HOUR);
        let now = Utc::now();
        assert!(secret.expiry().is_none());
        assert!(!secret.is_valid(now));
        assert_eq!(secret.time_remaining(now), Duration::ZERO);
    }

    #[test]
    fn expiry_is_last_changed_plus_period() {
        let now = Utc::now();
        let secret = secret_changed(TimeDelta::hours(23), now);
        assert_eq!(secret.expiry(), Some(now + TimeDelta::hours(1)));
        assert!(secret.is_valid(now));
        assert_eq!(secret.time_remaining(now), HOUR);
    }

    #[test]
    fn time_remaining_never_negative() {
        let now = Utc::now();
        let secret = secret_changed(TimeDelta::hours(30), now);
        assert!(!secret.is_valid(now));
        assert_eq!(secret.time_remaining(now), Duration::ZERO);
    }

    #[rstest]
    #[case(TimeDelta::hours(23), true)]
    #[case(TimeDelta::hours(22), true)]
    #[case(TimeDelta::hours(1), false)]
    #[case(TimeDelta::hours(48), true)]
    fn needs_rotation_within_lead_time(#[case] ago: TimeDelta, #[case] expected: bool) {
        let now = Utc::now();
        let secret = secret_changed(ago, now);
        assert_eq!(secret.needs_rotation(now, 2 * HOUR), expected);
    }

    #[test]
    fn validity_risks_are_flagged() {
        assert_eq!(
            ManagedSecret::new("a", Duration::ZERO).validity_risk(),
            ValidityRisk::ZeroPeriod
        );
        assert_eq!(
            ManagedSecret::new("a", Duration::MAX).validity_risk(),
            ValidityRisk::UnboundedPeriod
        );
        assert_eq!(ManagedSecret::new("a", HOUR).validity_risk(), ValidityRisk::None);
        assert!(!ManagedSecret::new("a", Duration::ZERO).can_rotate_automatically());
    }

    #[test]
    fn unbounded_period_expiry_saturates() {
        let now = Utc::now();
        let secret = ManagedSecret::new("a", Duration::MAX).with_last_changed(now);
        assert_eq!(secret.expiry(), Some(DateTime::<Utc>::MAX_UTC));
        assert!(secret.is_valid(now));
    }

    #[test]
    fn nonce_comparison() {
        let mut secret = ManagedSecret::new("a", HOUR);
        let nonce = secret.nonce.clone();
        assert_eq!(nonce.len(), 43);
        assert!(secret.nonce_matches(&nonce));
        assert!(!secret.nonce_matches("nope"));

        secret.regenerate_nonce();
        assert!(!secret.nonce_matches(&nonce));

        secret.nonce.clear();
        assert!(!secret.nonce_matches(""));
    }

    #[test]
    fn strategy_groups() {
        assert!(ConfirmationStrategies::AUTOMATIC.contains(ConfirmationStrategies::AUTOMATIC_REKEYING_SCHEDULED));
        assert!(!ConfirmationStrategies::ADMIN.intersects(ConfirmationStrategies::EXTERNAL_SIGNAL));
    }

    #[test]
    fn serde_round_trip_keeps_flags() {
        let secret = ManagedSecret::new("a", HOUR).with_confirmations(
            ConfirmationStrategies::EXTERNAL_SIGNAL | ConfirmationStrategies::ADMIN_CACHES_SIGN_OFF,
        );
        let json = serde_json::to_string(&secret).unwrap();
        let back: ManagedSecret = serde_json::from_str(&json).unwrap();
        assert_eq!(back, secret);
    }
}
