//! Donor profile types.
//!
//! `Profile` is the record the whole identity layer revolves around.
//! `ProfileInput` is what registration submits and `ProfileUpdate` is a typed
//! partial update where "leave alone" and "clear" are different values.

pub mod validation;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub use validation::{is_valid_phone, validate_input, validate_update, ValidationError};

/// Phone number reserved for the built-in demo account.
pub const DEMO_PHONE: &str = "07000001001";

/// Identifier of the built-in demo profile.
pub const DEMO_PROFILE_ID: &str = "default-account-id";

/// Display name of the built-in demo profile.
pub const DEMO_NAME: &str = "حساب تجريبي";

/// Prefix marking identifiers that were generated on the device.
pub const LOCAL_ID_PREFIX: &str = "local_";

static LOCAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// ABO/Rh blood type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BloodType {
    /// A positive.
    #[serde(rename = "A+")]
    APositive,
    /// A negative.
    #[serde(rename = "A-")]
    ANegative,
    /// B positive.
    #[serde(rename = "B+")]
    BPositive,
    /// B negative.
    #[serde(rename = "B-")]
    BNegative,
    /// AB positive.
    #[serde(rename = "AB+")]
    AbPositive,
    /// AB negative.
    #[serde(rename = "AB-")]
    AbNegative,
    /// O positive.
    #[serde(rename = "O+")]
    OPositive,
    /// O negative.
    #[serde(rename = "O-")]
    ONegative,
}

impl BloodType {
    /// Every blood type, in display order.
    pub const ALL: [Self; 8] = [
        Self::APositive,
        Self::ANegative,
        Self::BPositive,
        Self::BNegative,
        Self::AbPositive,
        Self::AbNegative,
        Self::OPositive,
        Self::ONegative,
    ];

    /// The canonical label, e.g. `"AB-"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::APositive => "A+",
            Self::ANegative => "A-",
            Self::BPositive => "B+",
            Self::BNegative => "B-",
            Self::AbPositive => "AB+",
            Self::AbNegative => "AB-",
            Self::OPositive => "O+",
            Self::ONegative => "O-",
        }
    }
}

impl std::fmt::Display for BloodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BloodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|bt| bt.as_str() == wanted)
            .ok_or_else(|| format!("unknown blood type: {s}"))
    }
}

/// When the donor prefers to be contacted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactPreference {
    /// Any time of day.
    #[default]
    Anytime,
    /// Morning window only.
    Morning,
    /// Evening window only.
    Evening,
}

impl std::fmt::Display for ContactPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anytime => write!(f, "anytime"),
            Self::Morning => write!(f, "morning"),
            Self::Evening => write!(f, "evening"),
        }
    }
}

impl std::str::FromStr for ContactPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anytime" => Ok(Self::Anytime),
            "morning" => Ok(Self::Morning),
            "evening" => Ok(Self::Evening),
            other => Err(format!("unknown contact preference: {other}")),
        }
    }
}

fn default_true() -> bool {
    true
}

/// A donor profile as stored remotely and as the current local identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique identifier. Remote ids are assigned by the directory.
    pub id: String,
    /// Donor name.
    pub name: String,
    /// Phone number, the sign-in key.
    pub phone: String,
    /// Blood type.
    pub blood_type: BloodType,
    /// Governorate.
    pub governorate: String,
    /// City within the governorate.
    pub city: String,
    /// Preferred contact window.
    #[serde(default)]
    pub contact_preference: ContactPreference,
    /// Start of the morning window (`HH:MM`).
    #[serde(default)]
    pub morning_from: Option<String>,
    /// End of the morning window (`HH:MM`).
    #[serde(default)]
    pub morning_to: Option<String>,
    /// Start of the evening window (`HH:MM`).
    #[serde(default)]
    pub evening_from: Option<String>,
    /// End of the evening window (`HH:MM`).
    #[serde(default)]
    pub evening_to: Option<String>,
    /// Whether the donor is currently available.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Free-text notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Date of the last donation.
    #[serde(default)]
    pub last_donation_date: Option<NaiveDate>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// The built-in demo profile.
    #[must_use]
    pub fn demo() -> Self {
        let now = Utc::now();
        Self {
            id: DEMO_PROFILE_ID.to_string(),
            name: DEMO_NAME.to_string(),
            phone: DEMO_PHONE.to_string(),
            blood_type: BloodType::OPositive,
            governorate: "بغداد".to_string(),
            city: "الكرخ".to_string(),
            contact_preference: ContactPreference::Anytime,
            morning_from: None,
            morning_to: None,
            evening_from: None,
            evening_to: None,
            is_active: true,
            notes: None,
            last_donation_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a profile that exists only on this device.
    #[must_use]
    pub fn local_from_input(input: ProfileInput) -> Self {
        let now = Utc::now();
        let input = input.normalized();
        Self {
            id: generate_local_id(&input.phone, now),
            name: input.name,
            phone: input.phone,
            blood_type: input.blood_type,
            governorate: input.governorate,
            city: input.city,
            contact_preference: input.contact_preference,
            morning_from: input.morning_from,
            morning_to: input.morning_to,
            evening_from: input.evening_from,
            evening_to: input.evening_to,
            is_active: input.is_active,
            notes: input.notes,
            last_donation_date: input.last_donation_date,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this is the built-in demo profile.
    #[must_use]
    pub fn is_demo(&self) -> bool {
        is_demo_id(&self.id)
    }

    /// Whether this profile has no remote counterpart.
    #[must_use]
    pub fn is_local_only(&self) -> bool {
        is_local_only_id(&self.id)
    }

    /// The registration payload that recreates this profile remotely.
    #[must_use]
    pub fn to_input(&self) -> ProfileInput {
        ProfileInput {
            name: self.name.clone(),
            phone: self.phone.clone(),
            blood_type: self.blood_type,
            governorate: self.governorate.clone(),
            city: self.city.clone(),
            contact_preference: self.contact_preference,
            morning_from: self.morning_from.clone(),
            morning_to: self.morning_to.clone(),
            evening_from: self.evening_from.clone(),
            evening_to: self.evening_to.clone(),
            is_active: self.is_active,
            notes: self.notes.clone(),
            last_donation_date: self.last_donation_date,
        }
    }

    /// An update that sets every editable column to this profile's values.
    #[must_use]
    pub fn to_update(&self) -> ProfileUpdate {
        ProfileUpdate {
            name: Some(self.name.clone()),
            phone: Some(self.phone.clone()),
            blood_type: Some(self.blood_type),
            governorate: Some(self.governorate.clone()),
            city: Some(self.city.clone()),
            contact_preference: Some(self.contact_preference),
            morning_from: Some(self.morning_from.clone()),
            morning_to: Some(self.morning_to.clone()),
            evening_from: Some(self.evening_from.clone()),
            evening_to: Some(self.evening_to.clone()),
            is_active: Some(self.is_active),
            notes: Some(self.notes.clone()),
            last_donation_date: Some(self.last_donation_date),
        }
    }
}

/// Registration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInput {
    /// Donor name.
    pub name: String,
    /// Phone number.
    pub phone: String,
    /// Blood type.
    pub blood_type: BloodType,
    /// Governorate.
    pub governorate: String,
    /// City.
    pub city: String,
    /// Preferred contact window.
    #[serde(default)]
    pub contact_preference: ContactPreference,
    /// Start of the morning window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morning_from: Option<String>,
    /// End of the morning window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morning_to: Option<String>,
    /// Start of the evening window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evening_from: Option<String>,
    /// End of the evening window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evening_to: Option<String>,
    /// Availability.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Free-text notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Date of the last donation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_donation_date: Option<NaiveDate>,
}

impl ProfileInput {
    /// Create an input with the required fields and default preferences.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        phone: impl Into<String>,
        blood_type: BloodType,
        governorate: impl Into<String>,
        city: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            blood_type,
            governorate: governorate.into(),
            city: city.into(),
            contact_preference: ContactPreference::Anytime,
            morning_from: None,
            morning_to: None,
            evening_from: None,
            evening_to: None,
            is_active: true,
            notes: None,
            last_donation_date: None,
        }
    }

    /// Trim the phone number and drop time ranges the preference does not use.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.phone = self.phone.trim().to_string();
        self.name = self.name.trim().to_string();
        match self.contact_preference {
            ContactPreference::Anytime => {
                self.morning_from = None;
                self.morning_to = None;
                self.evening_from = None;
                self.evening_to = None;
            }
            ContactPreference::Morning => {
                self.evening_from = None;
                self.evening_to = None;
            }
            ContactPreference::Evening => {
                self.morning_from = None;
                self.morning_to = None;
            }
        }
        self
    }
}

/// A partial profile update.
///
/// `None` leaves a field untouched. For nullable columns, `Some(None)` clears
/// the value and is sent to the directory as an explicit `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    /// New name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New phone number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// New blood type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_type: Option<BloodType>,
    /// New governorate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub governorate: Option<String>,
    /// New city.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// New contact preference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_preference: Option<ContactPreference>,
    /// New morning window start, or clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub morning_from: Option<Option<String>>,
    /// New morning window end, or clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub morning_to: Option<Option<String>>,
    /// New evening window start, or clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evening_from: Option<Option<String>>,
    /// New evening window end, or clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evening_to: Option<Option<String>>,
    /// New availability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    /// New notes, or clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    /// New last donation date, or clear.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_donation_date: Option<Option<NaiveDate>>,
}

impl ProfileUpdate {
    /// Whether the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrite `profile` with every field this update carries.
    ///
    /// Does not touch `updated_at`; callers stamp it.
    pub fn apply_to(&self, profile: &mut Profile) {
        fn set<T: Clone>(target: &mut T, value: Option<&T>) {
            if let Some(v) = value {
                target.clone_from(v);
            }
        }

        set(&mut profile.name, self.name.as_ref());
        if let Some(phone) = &self.phone {
            profile.phone = phone.trim().to_string();
        }
        set(&mut profile.blood_type, self.blood_type.as_ref());
        set(&mut profile.governorate, self.governorate.as_ref());
        set(&mut profile.city, self.city.as_ref());
        set(&mut profile.contact_preference, self.contact_preference.as_ref());
        set(&mut profile.morning_from, self.morning_from.as_ref());
        set(&mut profile.morning_to, self.morning_to.as_ref());
        set(&mut profile.evening_from, self.evening_from.as_ref());
        set(&mut profile.evening_to, self.evening_to.as_ref());
        set(&mut profile.is_active, self.is_active.as_ref());
        set(&mut profile.notes, self.notes.as_ref());
        set(&mut profile.last_donation_date, self.last_donation_date.as_ref());
    }
}

/// Whether `id` names the built-in demo profile.
#[must_use]
pub fn is_demo_id(id: &str) -> bool {
    id == DEMO_PROFILE_ID
}

/// Whether `id` was generated on the device or is the demo profile.
#[must_use]
pub fn is_local_only_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX) || is_demo_id(id)
}

/// Whether `phone` (after trimming) is the demo phone number.
#[must_use]
pub fn is_demo_phone(phone: &str) -> bool {
    phone.trim() == DEMO_PHONE
}

/// Generate a fresh device-local identifier.
#[must_use]
pub fn generate_local_id(phone: &str, now: DateTime<Utc>) -> String {
    let seq = LOCAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp());
    let seed = format!("{phone}:{nanos}:{seq}:{}", std::process::id());
    let hash = blake3::hash(seed.as_bytes()).to_hex();
    format!("{LOCAL_ID_PREFIX}{}", &hash.as_str()[..16])
}

/// Mask a phone number for logging, keeping the last three digits.
#[must_use]
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.trim().chars().collect();
    let keep = chars.len().min(3);
    let hidden = chars.len() - keep;
    let mut masked = "*".repeat(hidden);
    masked.extend(&chars[hidden..]);
    masked
}
