//! CLI command definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Subcommand, ValueEnum};

use crate::directory::DonorFilters;
use crate::profile::{BloodType, ContactPreference, ProfileInput, ProfileUpdate};

/// Sign-in arguments.
#[derive(Debug, Args)]
pub struct LoginCommand {
    /// Registered phone number (07XXXXXXXXX)
    #[arg(required_unless_present = "demo")]
    pub phone: Option<String>,

    /// Use the built-in demo account
    #[arg(long)]
    pub demo: bool,
}

/// Contact window options shared by `register` and `update`.
#[derive(Debug, Default, Args)]
pub struct ContactArgs {
    /// Preferred contact window
    #[arg(long, value_enum)]
    pub contact: Option<ContactArg>,

    /// Morning window start (HH:MM)
    #[arg(long, value_name = "HH:MM")]
    pub morning_from: Option<String>,

    /// Morning window end (HH:MM)
    #[arg(long, value_name = "HH:MM")]
    pub morning_to: Option<String>,

    /// Evening window start (HH:MM)
    #[arg(long, value_name = "HH:MM")]
    pub evening_from: Option<String>,

    /// Evening window end (HH:MM)
    #[arg(long, value_name = "HH:MM")]
    pub evening_to: Option<String>,
}

/// Registration arguments.
#[derive(Debug, Args)]
pub struct RegisterCommand {
    /// Full name
    #[arg(long)]
    pub name: String,

    /// Phone number (07XXXXXXXXX)
    #[arg(long)]
    pub phone: String,

    /// Blood type, e.g. O+ or AB-
    #[arg(long, short = 'b', allow_hyphen_values = true)]
    pub blood_type: BloodType,

    /// Governorate
    #[arg(long)]
    pub governorate: String,

    /// City
    #[arg(long)]
    pub city: String,

    #[command(flatten)]
    pub contact: ContactArgs,

    /// Free-text notes
    #[arg(long)]
    pub notes: Option<String>,

    /// Date of the last donation (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub last_donation: Option<NaiveDate>,

    /// Register as currently unavailable
    #[arg(long)]
    pub unavailable: bool,
}

impl RegisterCommand {
    /// Build the registration payload.
    #[must_use]
    pub fn to_input(&self) -> ProfileInput {
        let mut input = ProfileInput::new(
            self.name.clone(),
            self.phone.clone(),
            self.blood_type,
            self.governorate.clone(),
            self.city.clone(),
        );
        input.contact_preference = self.contact.contact.map(Into::into).unwrap_or_default();
        input.morning_from.clone_from(&self.contact.morning_from);
        input.morning_to.clone_from(&self.contact.morning_to);
        input.evening_from.clone_from(&self.contact.evening_from);
        input.evening_to.clone_from(&self.contact.evening_to);
        input.notes.clone_from(&self.notes);
        input.last_donation_date = self.last_donation;
        input.is_active = !self.unavailable;
        input
    }
}

/// Profile update arguments. Only the options given are changed.
#[derive(Debug, Args)]
pub struct UpdateCommand {
    /// New name
    #[arg(long)]
    pub name: Option<String>,

    /// New phone number
    #[arg(long)]
    pub phone: Option<String>,

    /// New blood type
    #[arg(long, short = 'b', allow_hyphen_values = true)]
    pub blood_type: Option<BloodType>,

    /// New governorate
    #[arg(long)]
    pub governorate: Option<String>,

    /// New city
    #[arg(long)]
    pub city: Option<String>,

    #[command(flatten)]
    pub contact: ContactArgs,

    /// Clear all contact time windows
    #[arg(long, conflicts_with_all = ["morning_from", "morning_to", "evening_from", "evening_to"])]
    pub clear_times: bool,

    /// New notes
    #[arg(long)]
    pub notes: Option<String>,

    /// Remove the notes
    #[arg(long, conflicts_with = "notes")]
    pub clear_notes: bool,
}

fn set_or_clear(value: Option<&String>, clear: bool) -> Option<Option<String>> {
    if clear {
        Some(None)
    } else {
        value.map(|v| Some(v.clone()))
    }
}

impl UpdateCommand {
    /// Build the partial update.
    #[must_use]
    pub fn to_update(&self) -> ProfileUpdate {
        let times = &self.contact;
        ProfileUpdate {
            name: self.name.clone(),
            phone: self.phone.clone(),
            blood_type: self.blood_type,
            governorate: self.governorate.clone(),
            city: self.city.clone(),
            contact_preference: times.contact.map(Into::into),
            morning_from: set_or_clear(times.morning_from.as_ref(), self.clear_times),
            morning_to: set_or_clear(times.morning_to.as_ref(), self.clear_times),
            evening_from: set_or_clear(times.evening_from.as_ref(), self.clear_times),
            evening_to: set_or_clear(times.evening_to.as_ref(), self.clear_times),
            notes: set_or_clear(self.notes.as_ref(), self.clear_notes),
            ..ProfileUpdate::default()
        }
    }
}

/// Availability arguments.
#[derive(Debug, Args)]
pub struct AvailabilityCommand {
    /// New availability
    #[arg(value_enum)]
    pub state: AvailabilityArg,

    /// Date of the last donation (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub last_donation: Option<NaiveDate>,

    /// Remove the recorded last donation date
    #[arg(long, conflicts_with = "last_donation")]
    pub clear_last_donation: bool,
}

impl AvailabilityCommand {
    /// The last donation date change, if any.
    #[must_use]
    pub fn last_donation_change(&self) -> Option<Option<NaiveDate>> {
        if self.clear_last_donation {
            Some(None)
        } else {
            self.last_donation.map(Some)
        }
    }
}

/// Donor search arguments.
#[derive(Debug, Args)]
pub struct FindCommand {
    /// Blood type, e.g. O-
    #[arg(long, short = 'b', allow_hyphen_values = true)]
    pub blood_type: Option<BloodType>,

    /// Governorate
    #[arg(long, short = 'g')]
    pub governorate: Option<String>,

    /// City
    #[arg(long)]
    pub city: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl FindCommand {
    /// Build the search filters.
    #[must_use]
    pub fn filters(&self) -> DonorFilters {
        DonorFilters {
            blood_type: self.blood_type,
            governorate: self.governorate.clone(),
            city: self.city.clone(),
            exclude_id: None,
        }
    }
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Contact preference argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContactArg {
    /// Any time of day
    Anytime,
    /// Mornings only
    Morning,
    /// Evenings only
    Evening,
}

impl From<ContactArg> for ContactPreference {
    fn from(arg: ContactArg) -> Self {
        match arg {
            ContactArg::Anytime => Self::Anytime,
            ContactArg::Morning => Self::Morning,
            ContactArg::Evening => Self::Evening,
        }
    }
}

/// Availability argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AvailabilityArg {
    /// Available to donate
    Available,
    /// Not available
    Unavailable,
}

impl AvailabilityArg {
    /// Whether this state means available.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Formatted table
    #[default]
    Table,
    /// JSON output
    Json,
}
