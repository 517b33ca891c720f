//! Enrollment: capture a still photo, extract its descriptor, and write a
//! new or edited identity into the roster.
//!
//! ```text
//! NoPhoto ─capture─▶ Captured ─▶ Extracting ─▶ Ready | NoFaceDetected
//!    ▲                                              │
//!    └──────────────────── retake ◀─────────────────┘
//! ```

use crate::events::FlowEvents;
use crate::extractor::DescriptorExtractor;
use crate::photo;
use crate::roster::{RosterChange, SharedRoster};
use crate::types::{Descriptor, Frame, Identity, IdentityId, WorkArea};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

pub const BONUS_NUMBER_DIGITS: usize = 3;
pub const PAYROLL_NUMBER_DIGITS: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("first and last name are required")]
    MissingName,
    #[error("capture a photo before saving")]
    MissingPhoto,
    #[error("bonus number must be 3 digits")]
    InvalidBonusNumber,
    #[error("payroll number must be 8 digits")]
    InvalidPayrollNumber,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no identity with id {0}")]
    UnknownIdentity(IdentityId),
    #[error("no save is waiting for confirmation")]
    NothingToConfirm,
    #[error("failed to store photo: {0}")]
    Photo(String),
}

/// Editable identity fields supplied by the caller's form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFields {
    pub first_name: String,
    pub last_name: String,
    pub bonus_number: String,
    pub payroll_number: String,
    pub work_areas: Vec<WorkArea>,
}

impl IdentityFields {
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
            bonus_number: identity.bonus_number.clone(),
            payroll_number: identity.payroll_number.clone(),
            work_areas: identity.work_areas.clone(),
        }
    }

    pub fn validate(&self, has_photo: bool) -> Result<(), ValidationError> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        if !has_photo {
            return Err(ValidationError::MissingPhoto);
        }
        if !is_digits(&self.bonus_number, BONUS_NUMBER_DIGITS) {
            return Err(ValidationError::InvalidBonusNumber);
        }
        if !is_digits(&self.payroll_number, PAYROLL_NUMBER_DIGITS) {
            return Err(ValidationError::InvalidPayrollNumber);
        }
        Ok(())
    }
}

fn is_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentPhase {
    NoPhoto,
    Captured,
    Extracting,
    Ready,
    NoFaceDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Saved { id: IdentityId, change: RosterChange },
    /// New identity without a face: call [`EnrollmentFlow::confirm_without_face`]
    /// or [`EnrollmentFlow::decline_confirmation`].
    NeedsConfirmation,
}

pub struct EnrollmentFlow {
    extractor: DescriptorExtractor,
    roster: SharedRoster,
    events: Arc<dyn FlowEvents>,
    /// Identity being edited; `None` until a new identity is first saved.
    existing: Option<IdentityId>,
    phase: EnrollmentPhase,
    photo: Option<Frame>,
    descriptor: Option<Descriptor>,
    pending: Option<IdentityFields>,
}

impl EnrollmentFlow {
    /// Enroll a new identity.
    pub fn new(
        extractor: DescriptorExtractor,
        roster: SharedRoster,
        events: Arc<dyn FlowEvents>,
    ) -> Self {
        Self {
            extractor,
            roster,
            events,
            existing: None,
            phase: EnrollmentPhase::NoPhoto,
            photo: None,
            descriptor: None,
            pending: None,
        }
    }

    /// Edit (and optionally re-enroll) an identity already in the roster.
    pub async fn edit(
        extractor: DescriptorExtractor,
        roster: SharedRoster,
        events: Arc<dyn FlowEvents>,
        id: IdentityId,
    ) -> Result<Self, EnrollmentError> {
        if roster.read().await.get(&id).is_none() {
            return Err(EnrollmentError::UnknownIdentity(id));
        }
        let mut flow = Self::new(extractor, roster, events);
        flow.existing = Some(id);
        Ok(flow)
    }

    pub fn phase(&self) -> EnrollmentPhase {
        self.phase
    }

    pub fn photo(&self) -> Option<&Frame> {
        self.photo.as_ref()
    }

    pub fn descriptor(&self) -> Option<&Descriptor> {
        self.descriptor.as_ref()
    }

    pub fn identity_id(&self) -> Option<IdentityId> {
        self.existing
    }

    pub fn awaiting_confirmation(&self) -> bool {
        self.pending.is_some()
    }

    /// Store the photo and extract its descriptor.
    ///
    /// No face is a warning, not an error: the photo stays and saving is
    /// still possible.
    pub async fn capture(&mut self, frame: Frame) -> EnrollmentPhase {
        self.pending = None;
        self.descriptor = None;
        self.photo = Some(frame.clone());
        self.phase = EnrollmentPhase::Captured;

        self.phase = EnrollmentPhase::Extracting;
        match self.extractor.extract(frame).await {
            Some(descriptor) => {
                tracing::info!(len = descriptor.len(), "face captured");
                self.descriptor = Some(descriptor);
                self.phase = EnrollmentPhase::Ready;
            }
            None => {
                tracing::warn!("could not detect a face in the photo");
                self.phase = EnrollmentPhase::NoFaceDetected;
                self.events.on_extraction_failure();
            }
        }
        self.phase
    }

    /// Discard the photo and descriptor.
    pub fn retake(&mut self) {
        self.pending = None;
        self.photo = None;
        self.descriptor = None;
        self.phase = EnrollmentPhase::NoPhoto;
    }

    /// Validate and write the identity.
    ///
    /// A new identity without a descriptor is not written until the caller
    /// confirms; an edited identity without a new descriptor keeps its old one.
    pub async fn submit(&mut self, fields: IdentityFields) -> Result<SubmitOutcome, EnrollmentError> {
        self.pending = None;
        let has_photo = self.photo.is_some() || self.stored_photo().await;
        fields.validate(has_photo)?;

        if self.descriptor.is_none() && self.existing.is_none() {
            self.pending = Some(fields);
            return Ok(SubmitOutcome::NeedsConfirmation);
        }
        self.write(fields).await
    }

    /// Save the pending identity without face login.
    pub async fn confirm_without_face(&mut self) -> Result<SubmitOutcome, EnrollmentError> {
        let fields = self.pending.take().ok_or(EnrollmentError::NothingToConfirm)?;
        self.write(fields).await
    }

    /// Drop the pending identity; the roster is left as it was.
    pub fn decline_confirmation(&mut self) {
        self.pending = None;
    }

    /// Whether the identity being edited already has a photo on record.
    async fn stored_photo(&self) -> bool {
        let Some(id) = self.existing else {
            return false;
        };
        self.roster
            .read()
            .await
            .get(&id)
            .is_some_and(Identity::has_photo)
    }

    async fn write(&mut self, fields: IdentityFields) -> Result<SubmitOutcome, EnrollmentError> {
        let captured = match &self.photo {
            Some(frame) => Some(
                photo::encode_data_url(frame).map_err(|e| EnrollmentError::Photo(e.to_string()))?,
            ),
            None => None,
        };

        let mut roster = self.roster.write().await;

        let (id, descriptor, enrolled_at, photo) = match self.existing {
            Some(id) => {
                let current = roster.get(&id).ok_or(EnrollmentError::UnknownIdentity(id))?;
                let photo = captured.or_else(|| current.photo.clone());
                match &self.descriptor {
                    Some(fresh) => (id, Some(fresh.clone()), Some(Utc::now()), photo),
                    None => (id, current.descriptor.clone(), current.enrolled_at, photo),
                }
            }
            None => (
                IdentityId::new(),
                self.descriptor.clone(),
                self.descriptor.as_ref().map(|_| Utc::now()),
                captured,
            ),
        };

        let mut work_areas = Vec::with_capacity(fields.work_areas.len());
        for area in fields.work_areas {
            if !work_areas.contains(&area) {
                work_areas.push(area);
            }
        }

        let identity = Identity {
            id,
            first_name: fields.first_name.trim().to_string(),
            last_name: fields.last_name.trim().to_string(),
            bonus_number: fields.bonus_number,
            payroll_number: fields.payroll_number,
            work_areas,
            photo,
            descriptor,
            enrolled_at,
        };
        let face_login = identity.is_matchable();
        let change = roster.upsert(identity);
        self.existing = Some(id);

        tracing::info!(%id, ?change, face_login, "identity saved");
        Ok(SubmitOutcome::Saved { id, change })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> IdentityFields {
        IdentityFields {
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            bonus_number: "042".into(),
            payroll_number: "19061992".into(),
            work_areas: vec![WorkArea::Packing],
        }
    }

    #[test]
    fn test_valid_fields() {
        assert_eq!(fields().validate(true), Ok(()));
    }

    #[test]
    fn test_name_required() {
        let f = IdentityFields {
            last_name: "  ".into(),
            ..fields()
        };
        assert_eq!(f.validate(true), Err(ValidationError::MissingName));
    }

    #[test]
    fn test_photo_required() {
        assert_eq!(fields().validate(false), Err(ValidationError::MissingPhoto));
    }

    #[test]
    fn test_bonus_number_format() {
        for bad in ["42", "0420", "4a2", ""] {
            let f = IdentityFields {
                bonus_number: bad.into(),
                ..fields()
            };
            assert_eq!(f.validate(true), Err(ValidationError::InvalidBonusNumber), "{bad:?}");
        }
    }

    #[test]
    fn test_payroll_number_format() {
        for bad in ["1234567", "123456789", "1234567x", "１２３４５６７８"] {
            let f = IdentityFields {
                payroll_number: bad.into(),
                ..fields()
            };
            assert_eq!(f.validate(true), Err(ValidationError::InvalidPayrollNumber), "{bad:?}");
        }
    }
}
