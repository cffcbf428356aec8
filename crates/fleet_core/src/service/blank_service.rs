//! Blank (strict-accountability form) pooling.
//!
//! # Responsibility
//! - Register numbered batches, hand blanks to drivers and take them back.
//! - Reserve, release and consume blanks on behalf of waybills.
//!
//! # Invariants
//! - Batch ranges of one series never overlap.
//! - Every status change follows `BlankStatus::can_transition_to`.
//! - A waybill may only take a blank issued to its own driver.

use crate::model::blank::{
    normalize_series, range_len, validate_number_range, Blank, BlankBatch, BlankId, BlankStatus,
};
use crate::model::fleet::Driver;
use crate::model::ModelValidationError;
use crate::repo::blank_repo::{BlankListQuery, BlankRepository};
use crate::repo::RepoError;
use log::info;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Debug)]
pub enum BlankServiceError {
    Validation(ModelValidationError),
    BatchTooLarge {
        size: u64,
        max: u32,
    },
    RangeOverlap {
        series: String,
        existing_from: i64,
        existing_to: i64,
    },
    BlankNotFound(BlankId),
    /// Some numbers of the requested range were never registered.
    RangeIncomplete {
        series: String,
        number_from: i64,
        number_to: i64,
        found: usize,
    },
    InvalidBlankTransition {
        blank: String,
        from: BlankStatus,
        to: BlankStatus,
    },
    NotIssuedToDriver {
        blank: String,
        driver_id: Uuid,
    },
    NoBlankAvailable {
        driver_id: Uuid,
    },
    DriverArchived(Uuid),
    OrganizationMismatch {
        blank: String,
    },
    Repo(RepoError),
}

impl Display for BlankServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::BatchTooLarge { size, max } => {
                write!(f, "blank batch of {size} forms exceeds the limit of {max}")
            }
            Self::RangeOverlap {
                series,
                existing_from,
                existing_to,
            } => write!(
                f,
                "range overlaps existing batch {series} {existing_from}..{existing_to}"
            ),
            Self::BlankNotFound(id) => write!(f, "blank not found: {id}"),
            Self::RangeIncomplete {
                series,
                number_from,
                number_to,
                found,
            } => write!(
                f,
                "range {series} {number_from}..{number_to} has only {found} registered blanks"
            ),
            Self::InvalidBlankTransition { blank, from, to } => write!(
                f,
                "blank {blank} cannot move from {} to {}",
                from.as_str(),
                to.as_str()
            ),
            Self::NotIssuedToDriver { blank, driver_id } => {
                write!(f, "blank {blank} is not issued to driver {driver_id}")
            }
            Self::NoBlankAvailable { driver_id } => {
                write!(f, "driver {driver_id} holds no issued blanks")
            }
            Self::DriverArchived(id) => write!(f, "driver is archived: {id}"),
            Self::OrganizationMismatch { blank } => {
                write!(f, "blank {blank} belongs to another organization")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for BlankServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for BlankServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound {
                entity: "blank",
                id,
            } => Self::BlankNotFound(id),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ModelValidationError> for BlankServiceError {
    fn from(value: ModelValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Number of blanks per status for one organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlankSummary {
    pub available: u64,
    pub issued: u64,
    pub reserved: u64,
    pub used: u64,
    pub spoiled: u64,
}

pub struct BlankService<R: BlankRepository> {
    repo: R,
    max_batch_size: u32,
}

impl<R: BlankRepository> BlankService<R> {
    pub fn new(repo: R, max_batch_size: u32) -> Self {
        Self {
            repo,
            max_batch_size,
        }
    }

    /// Registers a new batch of AVAILABLE blanks `number_from..=number_to`.
    pub fn create_batch(
        &self,
        organization_id: Uuid,
        series: &str,
        number_from: i64,
        number_to: i64,
    ) -> Result<BlankBatch, BlankServiceError> {
        let batch = BlankBatch::new(organization_id, series, number_from, number_to);
        batch.validate()?;

        if batch.len() > u64::from(self.max_batch_size) {
            return Err(BlankServiceError::BatchTooLarge {
                size: batch.len(),
                max: self.max_batch_size,
            });
        }

        if let Some(existing) = self.repo.find_overlapping_batch(
            organization_id,
            &batch.series,
            batch.number_from,
            batch.number_to,
        )? {
            return Err(BlankServiceError::RangeOverlap {
                series: existing.series,
                existing_from: existing.number_from,
                existing_to: existing.number_to,
            });
        }

        self.repo.create_batch(&batch)?;
        info!(
            "event=blank_batch_create module=blanks status=ok batch_id={} size={}",
            batch.id,
            batch.len()
        );
        Ok(batch)
    }

    /// Hands every blank of the range to `driver`.
    ///
    /// All blanks of the range must exist and be AVAILABLE; nothing is
    /// issued otherwise.
    pub fn issue_to_driver(
        &self,
        driver: &Driver,
        series: &str,
        number_from: i64,
        number_to: i64,
    ) -> Result<Vec<Blank>, BlankServiceError> {
        if driver.is_archived {
            return Err(BlankServiceError::DriverArchived(driver.id));
        }
        let series = normalize_series(series);
        validate_number_range(number_from, number_to)?;
        let expected = range_len(number_from, number_to);
        if expected > u64::from(self.max_batch_size) {
            return Err(BlankServiceError::BatchTooLarge {
                size: expected,
                max: self.max_batch_size,
            });
        }
        let blanks =
            self.repo
                .blanks_in_range(driver.organization_id, &series, number_from, number_to)?;
        if blanks.is_empty() || u64::try_from(blanks.len()).ok() != Some(expected) {
            return Err(BlankServiceError::RangeIncomplete {
                series,
                number_from,
                number_to,
                found: blanks.len(),
            });
        }

        for blank in &blanks {
            ensure_transition(blank, BlankStatus::Issued)?;
        }

        let mut issued = Vec::with_capacity(blanks.len());
        for mut blank in blanks {
            blank.status = BlankStatus::Issued;
            blank.issued_to_driver_id = Some(driver.id);
            self.repo.update_blank(&blank)?;
            issued.push(blank);
        }
        info!(
            "event=blank_issue module=blanks status=ok driver_id={} count={}",
            driver.id,
            issued.len()
        );
        Ok(issued)
    }

    /// Takes unused ISSUED blanks back into the organization safe.
    pub fn return_from_driver(
        &self,
        blank_ids: &[BlankId],
    ) -> Result<Vec<Blank>, BlankServiceError> {
        let mut blanks = Vec::with_capacity(blank_ids.len());
        for id in blank_ids {
            let blank = self.load(*id)?;
            ensure_transition(&blank, BlankStatus::Available)?;
            blanks.push(blank);
        }

        for blank in &mut blanks {
            blank.status = BlankStatus::Available;
            blank.issued_to_driver_id = None;
            self.repo.update_blank(blank)?;
        }
        Ok(blanks)
    }

    /// Marks a blank as spoiled.
    ///
    /// A reserved blank keeps its `waybill_id`; that waybill can be cancelled
    /// but no longer posted.
    pub fn spoil(&self, blank_id: BlankId) -> Result<Blank, BlankServiceError> {
        let mut blank = self.load(blank_id)?;
        ensure_transition(&blank, BlankStatus::Spoiled)?;
        blank.status = BlankStatus::Spoiled;
        self.repo.update_blank(&blank)?;
        info!(
            "event=blank_spoil module=blanks status=ok blank_id={}",
            blank.id
        );
        Ok(blank)
    }

    /// Binds a blank held by `driver_id` to a waybill.
    ///
    /// With `blank_id = None` the lowest-numbered issued blank is taken.
    pub fn reserve_for_waybill(
        &self,
        organization_id: Uuid,
        driver_id: Uuid,
        waybill_id: Uuid,
        blank_id: Option<BlankId>,
    ) -> Result<Blank, BlankServiceError> {
        let mut blank = self.pick_for_driver(driver_id, blank_id)?;
        if blank.organization_id != organization_id {
            return Err(BlankServiceError::OrganizationMismatch {
                blank: blank.display_number(),
            });
        }
        ensure_transition(&blank, BlankStatus::Reserved)?;
        blank.status = BlankStatus::Reserved;
        blank.waybill_id = Some(waybill_id);
        self.repo.update_blank(&blank)?;
        Ok(blank)
    }

    /// Picks the blank a new waybill would take, without changing it.
    pub fn pick_for_driver(
        &self,
        driver_id: Uuid,
        blank_id: Option<BlankId>,
    ) -> Result<Blank, BlankServiceError> {
        let blank = match blank_id {
            Some(id) => self.load(id)?,
            None => self
                .repo
                .first_issued_to_driver(driver_id)?
                .ok_or(BlankServiceError::NoBlankAvailable { driver_id })?,
        };
        if blank.issued_to_driver_id != Some(driver_id) {
            return Err(BlankServiceError::NotIssuedToDriver {
                blank: blank.display_number(),
                driver_id,
            });
        }
        Ok(blank)
    }

    pub fn get(&self, blank_id: BlankId) -> Result<Blank, BlankServiceError> {
        self.load(blank_id)
    }

    /// Returns a reserved blank to its driver.
    pub fn release(&self, blank_id: BlankId) -> Result<Blank, BlankServiceError> {
        let mut blank = self.load(blank_id)?;
        ensure_transition(&blank, BlankStatus::Issued)?;
        blank.status = BlankStatus::Issued;
        blank.waybill_id = None;
        self.repo.update_blank(&blank)?;
        Ok(blank)
    }

    /// Marks a reserved blank as used by its waybill.
    pub fn consume(&self, blank_id: BlankId) -> Result<Blank, BlankServiceError> {
        let mut blank = self.load(blank_id)?;
        ensure_transition(&blank, BlankStatus::Used)?;
        blank.status = BlankStatus::Used;
        self.repo.update_blank(&blank)?;
        Ok(blank)
    }

    /// Blanks currently held by a driver (ISSUED or RESERVED).
    pub fn driver_pool(&self, driver_id: Uuid) -> Result<Vec<Blank>, BlankServiceError> {
        let blanks = self.repo.list_blanks(&BlankListQuery {
            driver_id: Some(driver_id),
            ..BlankListQuery::default()
        })?;
        Ok(blanks
            .into_iter()
            .filter(|blank| matches!(blank.status, BlankStatus::Issued | BlankStatus::Reserved))
            .collect())
    }

    pub fn list(&self, query: &BlankListQuery) -> Result<Vec<Blank>, BlankServiceError> {
        Ok(self.repo.list_blanks(query)?)
    }

    pub fn list_batches(&self, organization_id: Uuid) -> Result<Vec<BlankBatch>, BlankServiceError> {
        Ok(self.repo.list_batches(organization_id)?)
    }

    pub fn summary(&self, organization_id: Uuid) -> Result<BlankSummary, BlankServiceError> {
        let mut summary = BlankSummary::default();
        for (status, count) in self.repo.count_by_status(organization_id)? {
            let slot = match status {
                BlankStatus::Available => &mut summary.available,
                BlankStatus::Issued => &mut summary.issued,
                BlankStatus::Reserved => &mut summary.reserved,
                BlankStatus::Used => &mut summary.used,
                BlankStatus::Spoiled => &mut summary.spoiled,
            };
            *slot = count;
        }
        Ok(summary)
    }

    fn load(&self, id: BlankId) -> Result<Blank, BlankServiceError> {
        self.repo
            .get_blank(id)?
            .ok_or(BlankServiceError::BlankNotFound(id))
    }
}

fn ensure_transition(blank: &Blank, next: BlankStatus) -> Result<(), BlankServiceError> {
    if blank.status.can_transition_to(next) {
        return Ok(());
    }
    Err(BlankServiceError::InvalidBlankTransition {
        blank: blank.display_number(),
        from: blank.status,
        to: next,
    })
}
