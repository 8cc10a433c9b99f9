use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::resolve::ResolveStrategy;

/// One record as stored by the record-storage application. Field names on
/// the wire are the application's own, so every field struct renames them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(bound(deserialize = "F: Deserialize<'de> + Default"))]
pub struct Record<F> {
    #[serde(default, deserialize_with = "lenient_id")]
    pub record_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub createdat: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub updatedat: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: F,
}

pub type Instructor = Record<InstructorFields>;
pub type Room = Record<RoomFields>;
pub type Participant = Record<ParticipantFields>;
pub type Course = Record<CourseFields>;
pub type Registration = Record<RegistrationFields>;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InstructorFields {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, rename = "telefon", deserialize_with = "lenient_string")]
    pub phone: Option<String>,
    #[serde(default, rename = "fachgebiet", deserialize_with = "lenient_string")]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoomFields {
    #[serde(default, rename = "raumname", deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, rename = "gebaeude", deserialize_with = "lenient_string")]
    pub building: Option<String>,
    #[serde(default, rename = "kapazitaet", deserialize_with = "lenient_count")]
    pub capacity: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ParticipantFields {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, rename = "telefon", deserialize_with = "lenient_string")]
    pub phone: Option<String>,
    #[serde(default, rename = "geburtsdatum", deserialize_with = "lenient_timestamp")]
    pub birth_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CourseFields {
    #[serde(default, rename = "titel", deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, rename = "beschreibung", deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, rename = "startdatum", deserialize_with = "lenient_timestamp")]
    pub start_date: Option<NaiveDateTime>,
    #[serde(default, rename = "enddatum", deserialize_with = "lenient_timestamp")]
    pub end_date: Option<NaiveDateTime>,
    #[serde(default, rename = "max_teilnehmer", deserialize_with = "lenient_count")]
    pub capacity: Option<u32>,
    #[serde(default, rename = "preis", deserialize_with = "lenient_number")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<CourseStatus>,
    #[serde(default, rename = "dozent", deserialize_with = "lenient_string")]
    pub instructor: Option<String>,
    #[serde(default, rename = "raum", deserialize_with = "lenient_string")]
    pub room: Option<String>,
}

impl CourseFields {
    /// Price usable for revenue; negative or non-finite values count as absent.
    pub fn billable_price(&self) -> Option<f64> {
        self.price.filter(|price| price.is_finite() && *price >= 0.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistrationFields {
    #[serde(default, rename = "teilnehmer", deserialize_with = "lenient_string")]
    pub participant: Option<String>,
    #[serde(default, rename = "kurs", deserialize_with = "lenient_string")]
    pub course: Option<String>,
    #[serde(default, rename = "anmeldedatum", deserialize_with = "lenient_timestamp")]
    pub registered_at: Option<NaiveDateTime>,
    #[serde(default, rename = "bezahlt", deserialize_with = "lenient_flag")]
    pub paid: Option<bool>,
}

impl RegistrationFields {
    pub fn is_paid(&self) -> bool {
        self.paid.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    #[default]
    Planned,
    Active,
    Completed,
    Cancelled,
}

impl CourseStatus {
    pub const ALL: [CourseStatus; 4] = [
        CourseStatus::Planned,
        CourseStatus::Active,
        CourseStatus::Completed,
        CourseStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Planned => "planned",
            CourseStatus::Active => "active",
            CourseStatus::Completed => "completed",
            CourseStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for CourseStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "planned" | "geplant" => Ok(CourseStatus::Planned),
            "active" | "aktiv" | "laufend" => Ok(CourseStatus::Active),
            "completed" | "abgeschlossen" => Ok(CourseStatus::Completed),
            "cancelled" | "canceled" | "abgesagt" => Ok(CourseStatus::Cancelled),
            other => Err(format!("unknown course status `{other}`")),
        }
    }
}

/// Parses `YYYY-MM-DD` (local midnight) or an ISO-8601 date-time. Offsets are
/// converted to local wall-clock time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }

    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return Some(value.with_timezone(&Local).naive_local());
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| v.as_str()).and_then(parse_timestamp))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(text)) => Some(text),
        Some(serde_json::Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}

/// Accepts `true`/`false`, their string forms and `0`/`1`; anything else is absent.
fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(flag)) => Some(flag),
        Some(serde_json::Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Some(serde_json::Value::Number(number)) => match number.as_f64() {
            Some(n) if n == 1.0 => Some(true),
            Some(n) if n == 0.0 => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(number)) => number.as_f64(),
        Some(serde_json::Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_number(deserializer)?;
    Ok(value
        .filter(|n| n.is_finite() && *n >= 0.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32))
}

fn lenient_status<'de, D>(deserializer: D) -> Result<Option<CourseStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(|text| text.parse().ok()))
}

/// The five collections fetched in one refresh cycle.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub instructors: Vec<Instructor>,
    pub rooms: Vec<Room>,
    pub participants: Vec<Participant>,
    pub courses: Vec<Course>,
    pub registrations: Vec<Registration>,
}

#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub upcoming_window_days: i64,
    pub upcoming_limit: usize,
    pub recent_limit: usize,
    pub trend_months: u32,
    pub strategy: ResolveStrategy,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            upcoming_window_days: 30,
            upcoming_limit: 5,
            recent_limit: 5,
            trend_months: 6,
            strategy: ResolveStrategy::HexToken,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub instructors: usize,
    pub rooms: usize,
    pub participants: usize,
    pub courses: usize,
    pub registrations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaymentSplit {
    pub paid: usize,
    pub unpaid: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpcomingCourse {
    pub course: Course,
    pub room_name: Option<String>,
    pub instructor_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentRegistration {
    pub registration: Registration,
    pub participant_name: Option<String>,
    pub course_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: CourseStatus,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyCount {
    pub month: NaiveDate,
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DerivedStatistics {
    pub computed_at: NaiveDateTime,
    pub counts: EntityCounts,
    pub active_courses: Vec<Course>,
    pub upcoming_courses: Vec<UpcomingCourse>,
    pub payments: PaymentSplit,
    pub paid_ratio: f64,
    pub revenue: f64,
    pub recent_registrations: Vec<RecentRegistration>,
    pub status_distribution: Vec<StatusCount>,
    pub monthly_trend: Vec<MonthlyCount>,
}

/// What the presentation layer shows: never partially aggregated numbers.
#[derive(Debug, Clone)]
pub enum DashboardState {
    Loading,
    Ready(Box<DerivedStatistics>),
    Unavailable,
}
