use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// Stored as smallint: 0 Active, 1 Accepted, 2 Completed, 3 Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum EmergencyStatus {
    Active = 0,
    Accepted = 1,
    Completed = 2,
    Cancelled = 3,
}

impl EmergencyStatus {
    pub fn is_open(self) -> bool {
        matches!(self, EmergencyStatus::Active | EmergencyStatus::Accepted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum Severity {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl Severity {
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "Low" => Ok(Severity::Low),
            "Medium" => Ok(Severity::Medium),
            "High" => Ok(Severity::High),
            "Critical" => Ok(Severity::Critical),
            _ => Err(ApiError::validation(
                "severity must be one of Low, Medium, High, Critical",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyAction {
    Accept,
    Complete,
    Cancel,
}

impl EmergencyAction {
    pub fn allowed_from(self) -> &'static [EmergencyStatus] {
        use EmergencyStatus::*;
        match self {
            EmergencyAction::Accept => &[Active],
            EmergencyAction::Complete => &[Accepted],
            EmergencyAction::Cancel => &[Active, Accepted, Cancelled],
        }
    }

    pub fn target(self) -> EmergencyStatus {
        match self {
            EmergencyAction::Accept => EmergencyStatus::Accepted,
            EmergencyAction::Complete => EmergencyStatus::Completed,
            EmergencyAction::Cancel => EmergencyStatus::Cancelled,
        }
    }

    pub fn allowed_codes(self) -> Vec<i16> {
        self.allowed_from().iter().map(|s| *s as i16).collect()
    }

    pub fn check(self, current: EmergencyStatus) -> Result<(), ApiError> {
        if self.allowed_from().contains(&current) {
            return Ok(());
        }
        let msg = match self {
            EmergencyAction::Accept => "Emergency request is no longer active",
            EmergencyAction::Complete => "Emergency request must be accepted before completion",
            EmergencyAction::Cancel => "Cannot cancel completed emergency request",
        };
        Err(ApiError::Conflict("INVALID_TRANSITION", msg.into()))
    }
}

/// A hospital may accept only an Active request whose snapshot lists it.
pub fn check_accept(
    status: EmergencyStatus,
    snapshot: &[Uuid],
    hospital_id: Uuid,
) -> Result<(), ApiError> {
    EmergencyAction::Accept.check(status)?;
    if !snapshot.contains(&hospital_id) {
        return Err(ApiError::Conflict(
            "NOT_NEARBY",
            "Hospital is not in the nearby hospitals list".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use EmergencyStatus::*;

    #[test]
    fn accept_only_from_active_and_listed() {
        let near = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(check_accept(Active, &[near], near).is_ok());
        assert_matches!(
            check_accept(Active, &[near], other),
            Err(ApiError::Conflict("NOT_NEARBY", _))
        );
        assert_matches!(
            check_accept(Accepted, &[near, other], other),
            Err(ApiError::Conflict("INVALID_TRANSITION", _))
        );
    }

    #[test]
    fn complete_requires_accepted() {
        assert!(EmergencyAction::Complete.check(Accepted).is_ok());
        assert!(EmergencyAction::Complete.check(Active).is_err());
        assert!(EmergencyAction::Complete.check(Cancelled).is_err());
    }

    #[test]
    fn cancel_blocked_only_after_completion() {
        assert!(EmergencyAction::Cancel.check(Active).is_ok());
        assert!(EmergencyAction::Cancel.check(Accepted).is_ok());
        assert!(EmergencyAction::Cancel.check(Cancelled).is_ok());
        assert!(EmergencyAction::Cancel.check(Completed).is_err());
    }

    #[test]
    fn open_states_and_severity() {
        assert!(Active.is_open() && Accepted.is_open());
        assert!(!Completed.is_open() && !Cancelled.is_open());
        assert_eq!(Severity::default(), Severity::Medium);
        assert_eq!(Severity::parse("Critical").unwrap(), Severity::Critical);
        assert!(Severity::parse("urgent").is_err());
        assert_eq!(serde_json::to_value(Accepted).unwrap(), "Accepted");
        assert_eq!(EmergencyAction::Cancel.allowed_codes(), vec![0, 1, 3]);
    }
}
