//! Recurring rules and their materialisation into concrete bookings.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::sync::watch;

use super::booking_service::{BookingService, NewBooking, require_admin};
use super::retry;
use crate::domain::{
    ClubId, FacilityId, Principal, RecurringRule, Role, RuleId, RuleType, UserId,
};
use crate::error::BookingError;
use crate::persistence::Storage;
use crate::ports::{FacilityCatalog, TenantDirectory};

/// Input of [`RecurringMaterializer::create_rule`].
#[derive(Debug, Clone)]
pub struct NewRule {
    /// Facility to reserve.
    pub facility_id: FacilityId,
    /// Purpose of the reservation.
    pub rule_type: RuleType,
    /// Day of week, 0 = Sunday.
    pub day_of_week: u8,
    /// Start time of day (UTC).
    pub start_time: NaiveTime,
    /// End time of day (UTC).
    pub end_time: NaiveTime,
    /// First date the rule applies.
    pub start_date: NaiveDate,
    /// Last date the rule applies.
    pub end_date: NaiveDate,
    /// Owner of the materialised bookings; defaults to the caller.
    pub owner_id: Option<UserId>,
    /// Group the rule was created for.
    pub group_id: Option<uuid::Uuid>,
}

/// Outcome of one materialisation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    /// Bookings created.
    pub created: u32,
    /// Occurrences skipped (conflict, failed precondition, already past).
    pub skipped: u32,
    /// Occurrences materialised by an earlier run.
    pub existing: u32,
}

impl std::ops::AddAssign for GenerationSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.skipped += rhs.skipped;
        self.existing += rhs.existing;
    }
}

/// Manages recurring rules and expands them through the booking path.
#[derive(Debug, Clone)]
pub struct RecurringMaterializer {
    bookings: BookingService,
    storage: Arc<dyn Storage>,
    catalog: Arc<dyn FacilityCatalog>,
    tenants: Arc<dyn TenantDirectory>,
}

impl RecurringMaterializer {
    /// Creates a materialiser that submits occurrences through `bookings`.
    #[must_use]
    pub fn new(
        bookings: BookingService,
        storage: Arc<dyn Storage>,
        catalog: Arc<dyn FacilityCatalog>,
        tenants: Arc<dyn TenantDirectory>,
    ) -> Self {
        Self {
            bookings,
            storage,
            catalog,
            tenants,
        }
    }

    /// Stores a new rule.
    ///
    /// MAINTENANCE rules have no owner; other rules belong to `owner_id` or,
    /// failing that, the caller.
    ///
    /// # Errors
    ///
    /// Returns `forbidden` for non-admins, `not_found` for an unknown
    /// facility and `invalid_input` for a malformed rule.
    pub async fn create_rule(
        &self,
        principal: &Principal,
        input: NewRule,
    ) -> Result<RecurringRule, BookingError> {
        require_admin(principal)?;
        let club_id = principal.club_id;
        if self
            .catalog
            .get_facility(club_id, input.facility_id)
            .await?
            .is_none()
        {
            return Err(BookingError::NotFound(format!(
                "facility {}",
                input.facility_id
            )));
        }

        let owner_id = match input.rule_type {
            RuleType::Maintenance => None,
            RuleType::Class | RuleType::Fixed => {
                Some(input.owner_id.unwrap_or(principal.user_id))
            }
        };
        let rule = RecurringRule {
            id: RuleId::new(),
            club_id,
            facility_id: input.facility_id,
            rule_type: input.rule_type,
            day_of_week: input.day_of_week,
            start_time: input.start_time,
            end_time: input.end_time,
            start_date: input.start_date,
            end_date: input.end_date,
            owner_id,
            group_id: input.group_id,
            created_at: Utc::now(),
            deleted_at: None,
        };
        rule.validate()?;

        let rule_ref = &rule;
        retry::run(
            self.storage.as_ref(),
            self.bookings.policy().storage_timeout,
            "create_rule",
            move |mut tx| async move {
                tx.insert_rule(rule_ref).await?;
                tx.commit().await?;
                Ok(())
            },
        )
        .await?;

        tracing::info!(
            %club_id,
            rule_id = %rule.id,
            rule_type = rule.rule_type.as_str(),
            day_of_week = rule.day_of_week,
            "recurring rule created"
        );
        Ok(rule)
    }

    /// Lists the club's active rules.
    ///
    /// # Errors
    ///
    /// Returns `forbidden` for non-admins.
    pub async fn list_rules(
        &self,
        principal: &Principal,
    ) -> Result<Vec<RecurringRule>, BookingError> {
        require_admin(principal)?;
        self.active_rules(principal.club_id, Utc::now().date_naive())
            .await
    }

    /// Retires a rule. Bookings already materialised are kept.
    ///
    /// # Errors
    ///
    /// Returns `forbidden` for non-admins and `not_found` for an unknown or
    /// already retired rule.
    pub async fn delete_rule(&self, principal: &Principal, id: RuleId) -> Result<(), BookingError> {
        require_admin(principal)?;
        let club_id = principal.club_id;
        let now = Utc::now();
        retry::run(
            self.storage.as_ref(),
            self.bookings.policy().storage_timeout,
            "delete_rule",
            move |mut tx| async move {
                match tx.get_rule(club_id, id).await? {
                    Some(rule) if rule.deleted_at.is_none() => {}
                    _ => return Err(BookingError::NotFound(format!("rule {id}")).into()),
                }
                tx.soft_delete_rule(club_id, id, now).await?;
                tx.commit().await?;
                Ok(())
            },
        )
        .await?;
        tracing::info!(%club_id, rule_id = %id, "recurring rule retired");
        Ok(())
    }

    /// Materialises every active rule of the caller's club over
    /// `[today, today + horizon_days]`.
    ///
    /// Re-running is harmless: occurrences already booked from the same rule
    /// are counted as existing.
    ///
    /// # Errors
    ///
    /// Returns `forbidden` for non-admins and `internal` if storage fails.
    pub async fn generate_from_rules(
        &self,
        principal: &Principal,
        horizon_days: u32,
    ) -> Result<GenerationSummary, BookingError> {
        require_admin(principal)?;
        self.generate_for_club(principal.club_id, horizon_days, Utc::now())
            .await
    }

    /// Materialises rules for every club, one club at a time.
    ///
    /// # Errors
    ///
    /// Returns `internal` if the tenant list cannot be read. Per-club
    /// failures are logged and do not stop the run.
    pub async fn generate_all(
        &self,
        horizon_days: u32,
        now: DateTime<Utc>,
    ) -> Result<GenerationSummary, BookingError> {
        let mut total = GenerationSummary::default();
        for club_id in self.tenants.list_clubs().await? {
            match self.generate_for_club(club_id, horizon_days, now).await {
                Ok(summary) => total += summary,
                Err(err) => {
                    tracing::warn!(%club_id, error = %err, "recurring materialisation failed");
                }
            }
        }
        Ok(total)
    }

    async fn generate_for_club(
        &self,
        club_id: ClubId,
        horizon_days: u32,
        now: DateTime<Utc>,
    ) -> Result<GenerationSummary, BookingError> {
        let today = now.date_naive();
        let mut summary = GenerationSummary::default();

        for rule in self.active_rules(club_id, today).await? {
            let principal = match (rule.rule_type, rule.owner_id) {
                (RuleType::Class | RuleType::Fixed, Some(owner)) => {
                    Principal::new(owner, club_id, Role::Member)
                }
                _ => Principal::system(club_id),
            };

            for occurrence in rule.occurrences(today, horizon_days) {
                if occurrence.start < now {
                    summary.skipped += 1;
                    continue;
                }
                if self.instance_exists(club_id, rule.id, occurrence.start).await? {
                    summary.existing += 1;
                    continue;
                }

                let request = NewBooking {
                    facility_id: rule.facility_id,
                    start_time: occurrence.start,
                    end_time: occurrence.end,
                    guests: Vec::new(),
                    owner_id: None,
                };
                match self
                    .bookings
                    .admit(&principal, request, Some(rule.id), now)
                    .await
                {
                    Ok(_) => summary.created += 1,
                    Err(err @ BookingError::Internal(_)) => return Err(err),
                    Err(err) => {
                        tracing::debug!(
                            %club_id,
                            rule_id = %rule.id,
                            date = %occurrence.date,
                            error = %err,
                            "recurring occurrence skipped"
                        );
                        summary.skipped += 1;
                    }
                }
            }
        }

        tracing::info!(
            %club_id,
            created = summary.created,
            skipped = summary.skipped,
            existing = summary.existing,
            "recurring rules materialised"
        );
        Ok(summary)
    }

    async fn active_rules(
        &self,
        club_id: ClubId,
        today: NaiveDate,
    ) -> Result<Vec<RecurringRule>, BookingError> {
        retry::run(
            self.storage.as_ref(),
            self.bookings.policy().storage_timeout,
            "list_rules",
            move |mut tx| async move { Ok(tx.list_active_rules(club_id, today).await?) },
        )
        .await
    }

    async fn instance_exists(
        &self,
        club_id: ClubId,
        rule_id: RuleId,
        start: DateTime<Utc>,
    ) -> Result<bool, BookingError> {
        retry::run(
            self.storage.as_ref(),
            self.bookings.policy().storage_timeout,
            "rule_instance_exists",
            move |mut tx| async move { Ok(tx.rule_instance_exists(club_id, rule_id, start).await?) },
        )
        .await
    }

    /// Runs [`RecurringMaterializer::generate_all`] every `interval` over the
    /// booking horizon until `shutdown` flips to `true`.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let horizon = u32::try_from(self.bookings.policy().horizon_days).unwrap_or(0);
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.generate_all(horizon, Utc::now()).await {
                        tracing::warn!(error = %err, "scheduled materialisation failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("recurring materialiser stopped");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::BookingStatus;
    use crate::service::BookingQuery;
    use crate::service::testkit::Harness;
    use chrono::{Datelike, Duration as ChronoDuration};

    fn materializer(h: &Harness) -> RecurringMaterializer {
        RecurringMaterializer::new(
            h.bookings.clone(),
            Arc::clone(&h.storage) as _,
            Arc::clone(&h.catalog) as _,
            Arc::clone(&h.catalog) as _,
        )
    }

    fn hour(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap_or_else(|| panic!("valid time"))
    }

    /// A rule firing once within a week: two days from today, 10:00-11:00.
    fn rule(h: &Harness, rule_type: RuleType, owner_id: Option<UserId>) -> NewRule {
        let today = Utc::now().date_naive();
        let target = today + ChronoDuration::days(2);
        let Ok(day_of_week) = u8::try_from(target.weekday().num_days_from_sunday()) else {
            panic!("weekday fits in u8");
        };
        NewRule {
            facility_id: h.facility.id,
            rule_type,
            day_of_week,
            start_time: hour(10),
            end_time: hour(11),
            start_date: today,
            end_date: today + ChronoDuration::days(60),
            owner_id,
            group_id: None,
        }
    }

    #[tokio::test]
    async fn rules_are_admin_only() {
        let h = Harness::new().await;
        let member = h.member().await;
        let m = materializer(&h);
        assert!(matches!(
            m.create_rule(&member, rule(&h, RuleType::Fixed, None)).await,
            Err(BookingError::Forbidden(_))
        ));
        assert!(matches!(
            m.generate_from_rules(&member, 7).await,
            Err(BookingError::Forbidden(_))
        ));
        assert!(matches!(m.list_rules(&member).await, Err(BookingError::Forbidden(_))));
    }

    #[tokio::test]
    async fn malformed_rules_are_rejected() {
        let h = Harness::new().await;
        let m = materializer(&h);
        let mut bad = rule(&h, RuleType::Maintenance, None);
        bad.day_of_week = 7;
        assert!(matches!(
            m.create_rule(&h.admin(), bad).await,
            Err(BookingError::InvalidInput(_))
        ));
        let mut unknown = rule(&h, RuleType::Maintenance, None);
        unknown.facility_id = FacilityId::new();
        assert!(matches!(
            m.create_rule(&h.admin(), unknown).await,
            Err(BookingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn maintenance_blocks_are_system_owned_and_idempotent() {
        let h = Harness::new().await;
        let admin = h.admin();
        let m = materializer(&h);
        let Ok(created) = m
            .create_rule(&admin, rule(&h, RuleType::Maintenance, Some(admin.user_id)))
            .await
        else {
            panic!("create rule failed");
        };
        assert_eq!(created.owner_id, None);

        let Ok(first) = m.generate_from_rules(&admin, 7).await else {
            panic!("generation failed");
        };
        assert_eq!(first, GenerationSummary { created: 1, skipped: 0, existing: 0 });

        let Ok(all) = h.bookings.list_all_bookings(&admin, BookingQuery::default()).await else {
            panic!("list failed");
        };
        let Some(block) = all.first() else {
            panic!("block missing");
        };
        assert_eq!(block.status, BookingStatus::Confirmed);
        assert!(block.user_id.as_uuid().is_nil());
        assert_eq!(block.rule_id, Some(created.id));
        assert!(h.payments(block.id).await.is_empty());
        assert!(h.outbox().await.is_empty());

        let Ok(second) = m.generate_from_rules(&admin, 7).await else {
            panic!("generation failed");
        };
        assert_eq!(second, GenerationSummary { created: 0, skipped: 0, existing: 1 });
    }

    #[tokio::test]
    async fn owned_rules_wait_for_payment_without_checkout() {
        let h = Harness::new().await;
        let (admin, coach) = (h.admin(), h.member().await);
        let m = materializer(&h);
        let Ok(_) = m
            .create_rule(&admin, rule(&h, RuleType::Class, Some(coach.user_id)))
            .await
        else {
            panic!("create rule failed");
        };
        let Ok(summary) = m.generate_from_rules(&admin, 7).await else {
            panic!("generation failed");
        };
        assert_eq!(summary.created, 1);

        let Ok(mine) = h.bookings.list_own_bookings(&coach, BookingQuery::default()).await else {
            panic!("list failed");
        };
        let Some(booking) = mine.first() else {
            panic!("class booking missing");
        };
        assert_eq!(booking.status, BookingStatus::PendingPayment);
        assert_eq!(h.payments(booking.id).await.len(), 1);
        assert!(h.gateway.preferences().await.is_empty());
    }

    #[tokio::test]
    async fn taken_occurrences_are_skipped() {
        let h = Harness::new().await;
        let (admin, member) = (h.admin(), h.member().await);
        let m = materializer(&h);
        let new_rule = rule(&h, RuleType::Fixed, Some(member.user_id));
        let date = Utc::now().date_naive() + ChronoDuration::days(2);
        let start = date.and_time(new_rule.start_time).and_utc();
        let end = date.and_time(new_rule.end_time).and_utc();
        let other = h.member().await;
        let Ok(_) = h.bookings.create_booking(&other, h.request(start, end)).await else {
            panic!("create failed");
        };

        let Ok(_) = m.create_rule(&admin, new_rule).await else {
            panic!("create rule failed");
        };
        let Ok(summary) = m.generate_from_rules(&admin, 7).await else {
            panic!("generation failed");
        };
        assert_eq!(summary, GenerationSummary { created: 0, skipped: 1, existing: 0 });
    }

    #[tokio::test]
    async fn retired_rules_stop_generating() {
        let h = Harness::new().await;
        let admin = h.admin();
        let m = materializer(&h);
        let Ok(created) = m.create_rule(&admin, rule(&h, RuleType::Maintenance, None)).await else {
            panic!("create rule failed");
        };
        let Ok(listed) = m.list_rules(&admin).await else {
            panic!("list failed");
        };
        assert_eq!(listed.len(), 1);

        let Ok(()) = m.delete_rule(&admin, created.id).await else {
            panic!("delete failed");
        };
        assert!(matches!(
            m.delete_rule(&admin, created.id).await,
            Err(BookingError::NotFound(_))
        ));
        let Ok(listed) = m.list_rules(&admin).await else {
            panic!("list failed");
        };
        assert!(listed.is_empty());
        let Ok(summary) = m.generate_from_rules(&admin, 7).await else {
            panic!("generation failed");
        };
        assert_eq!(summary, GenerationSummary::default());
    }

    #[tokio::test]
    async fn scheduled_run_covers_every_club() {
        let h = Harness::new().await;
        let m = materializer(&h);
        let Ok(_) = m.create_rule(&h.admin(), rule(&h, RuleType::Maintenance, None)).await else {
            panic!("create rule failed");
        };
        let Ok(summary) = m.generate_all(7, Utc::now()).await else {
            panic!("generation failed");
        };
        assert_eq!(summary.created, 1);
    }
}
