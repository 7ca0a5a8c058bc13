//! Patient roster: search, status filter and the status summary shown above
//! the roster grid. Everything here works on an in-memory slice.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatientStatus {
    Active,
    Inactive,
    Pending,
}

impl PatientStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PatientStatus::Active => "Ativo",
            PatientStatus::Inactive => "Inativo",
            PatientStatus::Pending => "Pendente",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub birth_date: NaiveDate,
    pub gender: Gender,
    /// metres
    pub height: f64,
    /// kilograms
    pub weight: f64,
    pub goal: String,
    #[serde(default)]
    pub dietary_restrictions: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_appointment: Option<DateTime<Utc>>,
    pub status: PatientStatus,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Inactive,
    Pending,
}

impl StatusFilter {
    pub fn admits(&self, status: PatientStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Active => status == PatientStatus::Active,
            StatusFilter::Inactive => status == PatientStatus::Inactive,
            StatusFilter::Pending => status == PatientStatus::Pending,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StatusFilter::All => "Todos",
            StatusFilter::Active => "Ativos",
            StatusFilter::Inactive => "Inativos",
            StatusFilter::Pending => "Pendentes",
        }
    }
}

impl FromStr for StatusFilter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(StatusFilter::All),
            "active" => Ok(StatusFilter::Active),
            "inactive" => Ok(StatusFilter::Inactive),
            "pending" => Ok(StatusFilter::Pending),
            other => Err(AppError::UserInput { code: "invalid_status_filter".into(), message: format!("unknown status filter '{}'", other) }),
        }
    }
}

/// Search box text plus the status dropdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterQuery {
    pub search: String,
    pub status: StatusFilter,
}

impl RosterQuery {
    pub fn new(search: &str, status: StatusFilter) -> Self {
        Self { search: search.to_string(), status }
    }

    pub fn matches(&self, p: &Patient) -> bool {
        let needle = self.search.to_lowercase();
        let hit = needle.is_empty() || p.name.to_lowercase().contains(&needle) || p.email.to_lowercase().contains(&needle);
        hit && self.status.admits(p.status)
    }
}

/// Patients matching `query`, in roster order.
pub fn filter_patients<'a>(patients: &'a [Patient], query: &RosterQuery) -> Vec<&'a Patient> {
    patients.iter().filter(|p| query.matches(p)).collect()
}

/// Counts over the whole roster, independent of any filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RosterSummary {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub pending: usize,
}

impl RosterSummary {
    pub fn of(patients: &[Patient]) -> Self {
        patients.iter().fold(Self { total: patients.len(), ..Default::default() }, |mut acc, p| {
            match p.status {
                PatientStatus::Active => acc.active += 1,
                PatientStatus::Inactive => acc.inactive += 1,
                PatientStatus::Pending => acc.pending += 1,
            }
            acc
        })
    }
}
