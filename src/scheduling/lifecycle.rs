use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Stored as smallint: 0 pending, 1 confirmed, 2 completed, 3 cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum AppointmentStatus {
    Pending = 0,
    Confirmed = 1,
    Completed = 2,
    Cancelled = 3,
}

impl AppointmentStatus {
    /// Only pending and confirmed appointments hold their slot.
    pub fn blocks_slot(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirm,
    Cancel,
    Complete,
    Reschedule,
}

impl Transition {
    pub fn allowed_from(self) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;
        match self {
            Transition::Confirm => &[Pending, Confirmed],
            Transition::Cancel => &[Pending, Confirmed, Cancelled],
            Transition::Complete => &[Confirmed],
            Transition::Reschedule => &[Pending, Confirmed],
        }
    }

    pub fn target(self) -> AppointmentStatus {
        match self {
            Transition::Confirm => AppointmentStatus::Confirmed,
            Transition::Cancel => AppointmentStatus::Cancelled,
            Transition::Complete => AppointmentStatus::Completed,
            Transition::Reschedule => AppointmentStatus::Pending,
        }
    }

    /// Transition requested through a status update body.
    pub fn for_target(status: AppointmentStatus) -> Option<Self> {
        match status {
            AppointmentStatus::Confirmed => Some(Transition::Confirm),
            AppointmentStatus::Cancelled => Some(Transition::Cancel),
            AppointmentStatus::Completed => Some(Transition::Complete),
            // pending is only re-entered by rescheduling
            AppointmentStatus::Pending => None,
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            Transition::Confirm => "confirmed",
            Transition::Cancel => "cancelled",
            Transition::Complete => "completed",
            Transition::Reschedule => "rescheduled",
        }
    }

    pub fn allowed_codes(self) -> Vec<i16> {
        self.allowed_from().iter().map(|s| *s as i16).collect()
    }

    pub fn check(self, current: AppointmentStatus) -> Result<(), ApiError> {
        if self.allowed_from().contains(&current) {
            Ok(())
        } else {
            Err(ApiError::Conflict(
                "INVALID_TRANSITION",
                format!(
                    "Appointment is {} and cannot be {}",
                    current.as_str(),
                    self.verb()
                ),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use AppointmentStatus::*;

    #[test]
    fn forward_path() {
        assert!(Transition::Confirm.check(Pending).is_ok());
        assert!(Transition::Complete.check(Confirmed).is_ok());
        assert_matches!(
            Transition::Complete.check(Pending),
            Err(ApiError::Conflict("INVALID_TRANSITION", _))
        );
    }

    #[test]
    fn cancel_from_anything_but_completed() {
        assert!(Transition::Cancel.check(Pending).is_ok());
        assert!(Transition::Cancel.check(Confirmed).is_ok());
        assert!(Transition::Cancel.check(Cancelled).is_ok());
        assert!(Transition::Cancel.check(Completed).is_err());
    }

    #[test]
    fn terminal_states_cannot_be_confirmed_or_moved() {
        for t in [Transition::Confirm, Transition::Reschedule] {
            assert!(t.check(Completed).is_err());
            assert!(t.check(Cancelled).is_err());
        }
        assert_eq!(Transition::Reschedule.target(), Pending);
        assert!(Transition::Reschedule.check(Confirmed).is_ok());
    }

    #[test]
    fn status_update_bodies_map_to_transitions() {
        assert_eq!(Transition::for_target(Confirmed), Some(Transition::Confirm));
        assert_eq!(Transition::for_target(Pending), None);
        assert_eq!(AppointmentStatus::parse("completed"), Some(Completed));
        assert_eq!(AppointmentStatus::parse("done"), None);
    }

    #[test]
    fn only_open_appointments_hold_slots() {
        assert!(Pending.blocks_slot());
        assert!(Confirmed.blocks_slot());
        assert!(!Completed.blocks_slot());
        assert!(!Cancelled.blocks_slot());
        assert_eq!(Transition::Cancel.allowed_codes(), vec![0, 1, 3]);
    }
}
