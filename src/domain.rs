use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Unknown category type '{0}'. Expected one of: fixed, variable, income, savings")]
    UnknownCategoryType(String),
    #[error("Unknown role '{0}'. Expected one of: viewer, editor, owner")]
    UnknownRole(String),
    #[error("Invalid {field}: {value}. Expected a day between 1 and 31")]
    InvalidDay { field: &'static str, value: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    Fixed,
    Variable,
    Income,
    Savings,
}

impl CategoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            CategoryType::Fixed => "fixed",
            CategoryType::Variable => "variable",
            CategoryType::Income => "income",
            CategoryType::Savings => "savings",
        }
    }

    /// Transactions are stored unsigned; only income categories count as inflow.
    pub fn is_income(self) -> bool {
        matches!(self, CategoryType::Income)
    }
}

impl fmt::Display for CategoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(CategoryType::Fixed),
            "variable" => Ok(CategoryType::Variable),
            "income" => Ok(CategoryType::Income),
            "savings" => Ok(CategoryType::Savings),
            other => Err(DomainError::UnknownCategoryType(other.to_string())),
        }
    }
}

/// Membership role. Ordering is meaningful: `Viewer < Editor < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Editor,
    Owner,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "editor" => Ok(Role::Editor),
            "owner" => Ok(Role::Owner),
            other => Err(DomainError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
}

impl InvitationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(InvitationStatus::Pending),
            "accepted" => Some(InvitationStatus::Accepted),
            "declined" => Some(InvitationStatus::Declined),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Budget {
    pub id: Uuid,
    pub name: String,
    pub cutoff_day: u32,
    pub currency: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub email: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Invitation {
    pub id: Uuid,
    pub budget_id: Uuid,
    pub email: String,
    pub role: Role,
    pub invited_by: String,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: Uuid,
    pub budget_id: Uuid,
    pub name: String,
    pub kind: CategoryType,
    /// Monthly limit; zero means "no limit".
    pub limit: Decimal,
    pub parent_id: Option<Uuid>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub budget_id: Uuid,
    pub category_id: Uuid,
    /// Always non-negative; direction comes from the category type.
    pub amount: Decimal,
    pub description: String,
    pub date: NaiveDate,
    pub is_recurring: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecurringExpense {
    pub id: Uuid,
    pub budget_id: Uuid,
    pub category_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub day_of_month: u32,
    pub is_active: bool,
    pub last_generated_date: Option<NaiveDate>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SavingsGoal {
    pub id: Uuid,
    pub budget_id: Uuid,
    pub name: String,
    pub target_amount: Decimal,
    pub current_amount: Decimal,
    pub deadline: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl SavingsGoal {
    /// Progress towards the target, capped at 100.
    pub fn percent(&self) -> Decimal {
        if self.target_amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let funded = self.current_amount.min(self.target_amount);
        (funded / self.target_amount) * Decimal::from(100u32)
    }

    pub fn remaining(&self) -> Decimal {
        (self.target_amount - self.current_amount).max(Decimal::ZERO)
    }
}

pub fn validate_day(field: &'static str, value: u32) -> Result<u32, DomainError> {
    if (1..=31).contains(&value) {
        Ok(value)
    } else {
        Err(DomainError::InvalidDay { field, value })
    }
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}
