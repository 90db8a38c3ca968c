//! Ticket numbers, buyers, and persisted ticket rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of distinct tickets in the raffle.
pub const KEYSPACE_SIZE: u32 = 100_000;

/// Width of the zero-padded decimal rendering of a ticket number.
pub const NUMBER_WIDTH: usize = 5;

/// Required number of digits in a buyer phone number.
const PHONE_DIGITS: usize = 10;

/// Validation failures for domain values built from raw input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// No digits were supplied.
    #[error("ticket number is empty")]
    EmptyNumber,

    /// The input contains something other than decimal digits.
    #[error("ticket number {raw:?} is not numeric")]
    MalformedNumber {
        /// The rejected input.
        raw: String,
    },

    /// The input parses but lies outside the keyspace.
    #[error("ticket number {raw:?} is outside 00000-99999")]
    NumberOutOfRange {
        /// The rejected input.
        raw: String,
    },

    /// Phone numbers must contain exactly ten digits.
    #[error("phone {raw:?} must contain exactly 10 digits")]
    InvalidPhone {
        /// The rejected input.
        raw: String,
    },

    /// A required buyer field is blank.
    #[error("buyer {0} is required")]
    MissingField(&'static str),

    /// A selection holds more numbers than its target.
    #[error("selection holds {selected} tickets but targets {target}")]
    OverfullSelection {
        /// Numbers present.
        selected: usize,
        /// Target quantity.
        target: usize,
    },

    /// A selection lists the same number twice.
    #[error("ticket {0} is selected twice")]
    DuplicateSelection(TicketNumber),
}

// ============================================================================
// TicketNumber
// ============================================================================

/// A ticket number inside the keyspace `[0, 100000)`.
///
/// Always displayed as a five-digit zero-padded string (`"00007"`), which is also
/// the form persisted by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TicketNumber(u32);

impl TicketNumber {
    /// The first number of the keyspace.
    pub const MIN: Self = Self(0);

    /// The last number of the keyspace.
    pub const MAX: Self = Self(KEYSPACE_SIZE - 1);

    /// Creates a ticket number from its numeric value.
    ///
    /// Returns `None` when `value` is outside the keyspace.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        if value < KEYSPACE_SIZE {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Parses and normalizes raw buyer input.
    ///
    /// Surrounding whitespace and a single leading `#` are ignored, so `"7"`,
    /// `" 007 "` and `"#00007"` all yield `00007`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::EmptyNumber`] for blank input,
    /// [`DomainError::MalformedNumber`] for non-digit input and
    /// [`DomainError::NumberOutOfRange`] for values past `99999`.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);

        if digits.is_empty() {
            return Err(DomainError::EmptyNumber);
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::MalformedNumber {
                raw: raw.to_string(),
            });
        }

        let significant = digits.trim_start_matches('0');
        if significant.len() > NUMBER_WIDTH {
            return Err(DomainError::NumberOutOfRange {
                raw: raw.to_string(),
            });
        }

        let value = if significant.is_empty() {
            0
        } else {
            significant
                .parse::<u32>()
                .map_err(|_| DomainError::MalformedNumber {
                    raw: raw.to_string(),
                })?
        };

        Self::new(value).ok_or_else(|| DomainError::NumberOutOfRange {
            raw: raw.to_string(),
        })
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Iterates the whole keyspace in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..KEYSPACE_SIZE).map(Self)
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = NUMBER_WIDTH)
    }
}

impl FromStr for TicketNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TicketNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TicketNumber> for String {
    fn from(number: TicketNumber) -> Self {
        number.to_string()
    }
}

// ============================================================================
// Buyer
// ============================================================================

/// A buyer phone number, normalized to its ten digits.
///
/// The phone is the lookup key that ties reservations across visits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Phone(String);

impl Phone {
    /// Normalizes raw input by dropping every non-digit character.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidPhone`] unless exactly ten digits remain.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.len() == PHONE_DIGITS {
            Ok(Self(digits))
        } else {
            Err(DomainError::InvalidPhone {
                raw: raw.to_string(),
            })
        }
    }

    /// The normalized digits.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Phone {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Phone> for String {
    fn from(phone: Phone) -> Self {
        phone.0
    }
}

/// The owner of a reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BuyerFields")]
pub struct Buyer {
    /// Full name as entered.
    pub name: String,
    /// Normalized phone, used as the identity across sessions.
    pub phone: Phone,
    /// State or region of residence.
    pub region: String,
}

impl Buyer {
    /// Creates a buyer, trimming the free-text fields.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::MissingField`] if the name or region is blank.
    pub fn new(
        name: impl Into<String>,
        phone: Phone,
        region: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let name = name.into().trim().to_string();
        let region = region.into().trim().to_string();

        if name.is_empty() {
            return Err(DomainError::MissingField("name"));
        }
        if region.is_empty() {
            return Err(DomainError::MissingField("region"));
        }

        Ok(Self {
            name,
            phone,
            region,
        })
    }

    /// Whether `other` is the same person, judged by phone.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.phone == other.phone
    }
}

/// Unchecked wire form of [`Buyer`].
#[derive(Deserialize)]
struct BuyerFields {
    name: String,
    phone: Phone,
    region: String,
}

impl TryFrom<BuyerFields> for Buyer {
    type Error = DomainError;

    fn try_from(fields: BuyerFields) -> Result<Self, Self::Error> {
        Self::new(fields.name, fields.phone, fields.region)
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Lifecycle status of a persisted ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Held for a buyer, pending payment. Expires softly after the TTL.
    Reserved,
    /// Paid. Never expires.
    Paid,
}

impl TicketStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Paid => "paid",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(Self::Reserved),
            "paid" => Ok(Self::Paid),
            other => Err(format!("unknown ticket status {other:?}")),
        }
    }
}

/// A persisted ticket row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique ticket number.
    pub number: TicketNumber,
    /// Current status.
    pub status: TicketStatus,
    /// Buyer who reserved it.
    pub owner: Buyer,
    /// Reservation time, the basis for soft expiry.
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// A fresh `reserved` row.
    #[must_use]
    pub const fn reserved(number: TicketNumber, owner: Buyer, created_at: DateTime<Utc>) -> Self {
        Self {
            number,
            status: TicketStatus::Reserved,
            owner,
            created_at,
        }
    }

    /// Whether this row still makes its number unavailable.
    ///
    /// `cutoff` is `now - ttl`: paid rows are always live, reserved rows are
    /// live while `created_at >= cutoff`.
    #[must_use]
    pub fn is_live(&self, cutoff: DateTime<Utc>) -> bool {
        match self.status {
            TicketStatus::Paid => true,
            TicketStatus::Reserved => self.created_at >= cutoff,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    #[test]
    fn parse_pads_short_input() {
        assert_eq!(TicketNumber::parse("7").unwrap().to_string(), "00007");
        assert_eq!(TicketNumber::parse(" #42 ").unwrap().to_string(), "00042");
        assert_eq!(TicketNumber::parse("99999").unwrap().value(), 99_999);
        assert_eq!(TicketNumber::parse("0000000").unwrap(), TicketNumber::MIN);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(TicketNumber::parse("   "), Err(DomainError::EmptyNumber));
        assert!(matches!(
            TicketNumber::parse("12a"),
            Err(DomainError::MalformedNumber { .. })
        ));
        assert!(matches!(
            TicketNumber::parse("-1"),
            Err(DomainError::MalformedNumber { .. })
        ));
        assert!(matches!(
            TicketNumber::parse("100000"),
            Err(DomainError::NumberOutOfRange { .. })
        ));
        assert!(matches!(
            TicketNumber::parse("99999999999999999999999"),
            Err(DomainError::NumberOutOfRange { .. })
        ));
    }

    #[test]
    fn serde_uses_padded_strings() {
        let number = TicketNumber::new(5).unwrap();
        let json = serde_json::to_string(&number).unwrap();
        assert_eq!(json, "\"00005\"");
        let back: TicketNumber = serde_json::from_str(&json).unwrap();
        assert_eq!(back, number);
    }

    #[test]
    fn buyer_deserialization_validates_fields() {
        let buyer: Buyer = serde_json::from_str(
            r#"{"name":" Ana ","phone":"644-462-7178","region":"Sonora"}"#,
        )
        .unwrap();
        assert_eq!(buyer.name, "Ana");
        assert_eq!(buyer.phone.as_str(), "6444627178");

        let blank = serde_json::from_str::<Buyer>(
            r#"{"name":"  ","phone":"6444627178","region":"Sonora"}"#,
        );
        assert!(blank.is_err());
    }

    #[test]
    fn phone_keeps_digits_only() {
        let phone = Phone::parse("(644) 462-7178").unwrap();
        assert_eq!(phone.as_str(), "6444627178");
        assert!(Phone::parse("12345").is_err());
    }

    #[test]
    fn buyer_requires_name_and_region() {
        let phone = Phone::parse("6444627178").unwrap();
        assert_eq!(
            Buyer::new("  ", phone.clone(), "Sonora"),
            Err(DomainError::MissingField("name"))
        );
        assert_eq!(
            Buyer::new("Ana", phone.clone(), ""),
            Err(DomainError::MissingField("region"))
        );
        let buyer = Buyer::new(" Ana Ruiz ", phone, "Sonora").unwrap();
        assert_eq!(buyer.name, "Ana Ruiz");
    }

    #[test]
    fn reserved_rows_expire_at_cutoff() {
        let now = Utc::now();
        let ttl = Duration::hours(5);
        let buyer = Buyer::new("Ana", Phone::parse("6444627178").unwrap(), "Sonora").unwrap();
        let number = TicketNumber::new(1).unwrap();

        let stale = Ticket::reserved(number, buyer.clone(), now - ttl - Duration::seconds(1));
        let fresh = Ticket::reserved(number, buyer.clone(), now - ttl + Duration::seconds(1));
        let mut paid = stale.clone();
        paid.status = TicketStatus::Paid;

        assert!(!stale.is_live(now - ttl));
        assert!(fresh.is_live(now - ttl));
        assert!(paid.is_live(now - ttl));
    }

    proptest! {
        #[test]
        fn display_then_parse_is_identity(value in 0u32..KEYSPACE_SIZE) {
            let number = TicketNumber::new(value).unwrap();
            let rendered = number.to_string();
            prop_assert_eq!(rendered.len(), NUMBER_WIDTH);
            prop_assert_eq!(TicketNumber::parse(&rendered).unwrap(), number);
        }

        #[test]
        fn unpadded_input_normalizes(value in 0u32..KEYSPACE_SIZE) {
            let parsed = TicketNumber::parse(&value.to_string()).unwrap();
            prop_assert_eq!(parsed.value(), value);
        }
    }
}
