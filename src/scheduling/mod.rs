//! Appointment booking shared by both provider types.
//!
//! One state machine, parameterized by [`ProviderKind`], backs both the
//! doctor-direct book (`appointment`) and the hospital-doctor book
//! (`hospital_appointment`).

pub mod conflict;
pub mod lifecycle;
pub mod provider;
pub mod store;

pub use lifecycle::{AppointmentStatus, Transition};
pub use provider::{DoctorProvider, HospitalDoctorProvider, ProviderKind};
pub use store::{Actor, AppointmentRow, NewAppointment};
