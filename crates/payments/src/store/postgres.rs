//! sqlx implementation of [`BookingRepository`]

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::{Date, OffsetDateTime};
use tourdesk_shared::{BookingStatus, PaymentStatus};
use uuid::Uuid;

use super::BookingRepository;
use crate::audit::{AuditEntry, NewPaymentEvent};
use crate::booking::{
    plan_for_booking, Booking, BookingWithTour, NewBooking, PaymentOutcome, PlannedTransition,
    Tour, TransitionResult,
};
use crate::error::{PaymentError, PaymentResult};

const BOOKING_COLUMNS: &str = "id, tour_package_id, customer_name, customer_email, phone, \
     country, participants, start_date, total_amount_cents, status, payment_status, \
     payment_intent_id, payment_initiated_at, paid_at, confirmed_at, created_at, updated_at";

#[derive(Debug, FromRow)]
struct BookingRow {
    id: Uuid,
    tour_package_id: Uuid,
    customer_name: String,
    customer_email: String,
    phone: Option<String>,
    country: Option<String>,
    participants: i32,
    start_date: Date,
    total_amount_cents: i64,
    status: String,
    payment_status: String,
    payment_intent_id: Option<String>,
    payment_initiated_at: Option<OffsetDateTime>,
    paid_at: Option<OffsetDateTime>,
    confirmed_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<BookingRow> for Booking {
    type Error = PaymentError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            tour_package_id: row.tour_package_id,
            customer_name: row.customer_name,
            customer_email: row.customer_email,
            phone: row.phone,
            country: row.country,
            participants: row.participants,
            start_date: row.start_date,
            total_amount_cents: row.total_amount_cents,
            status: row.status.parse::<BookingStatus>()?,
            payment_status: row.payment_status.parse::<PaymentStatus>()?,
            payment_intent_id: row.payment_intent_id,
            payment_initiated_at: row.payment_initiated_at,
            paid_at: row.paid_at,
            confirmed_at: row.confirmed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TourRow {
    id: Uuid,
    slug: String,
    title: String,
    price_cents: i64,
    duration_days: i32,
}

impl From<TourRow> for Tour {
    fn from(row: TourRow) -> Self {
        Tour {
            id: row.id,
            slug: row.slug,
            title: row.title,
            price_cents: row.price_cents,
            duration_days: row.duration_days,
        }
    }
}

/// Postgres-backed booking store
#[derive(Clone)]
pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn non_empty(reference: &str) -> Option<&str> {
    let trimmed = reference.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn find_tour(&self, tour_id: Uuid) -> PaymentResult<Option<Tour>> {
        let row: Option<TourRow> = sqlx::query_as(
            "SELECT id, slug, title, price_cents, duration_days FROM tour_packages WHERE id = $1",
        )
        .bind(tour_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Tour::from))
    }

    async fn insert_booking(&self, booking: NewBooking) -> PaymentResult<Booking> {
        let row: BookingRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO bookings (
                id, tour_package_id, customer_name, customer_email, phone, country,
                participants, start_date, total_amount_cents, status, payment_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'PENDING', 'PENDING')
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(booking.tour_package_id)
        .bind(&booking.customer_name)
        .bind(&booking.customer_email)
        .bind(&booking.phone)
        .bind(&booking.country)
        .bind(booking.participants)
        .bind(booking.start_date)
        .bind(booking.total_amount_cents)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_booking(&self, id: Uuid) -> PaymentResult<Option<BookingWithTour>> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let booking = Booking::try_from(row)?;

        // tour_package_id is a foreign key, a missing tour is an integrity fault
        let tour = self.find_tour(booking.tour_package_id).await?.ok_or_else(|| {
            PaymentError::NotFound(format!(
                "Tour package {} for booking {} not found",
                booking.tour_package_id, booking.id
            ))
        })?;

        Ok(Some(BookingWithTour {
            booking,
            tour_package: tour,
        }))
    }

    async fn mark_processing(
        &self,
        id: Uuid,
        invoice_number: &str,
    ) -> PaymentResult<Option<Booking>> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            r#"
            UPDATE bookings
            SET payment_intent_id = $2,
                payment_status = 'PROCESSING',
                payment_initiated_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
              AND payment_status IN ('PENDING', 'PROCESSING', 'FAILED')
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(invoice_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Booking::try_from).transpose()
    }

    async fn find_by_payment_reference(
        &self,
        invoice_number: &str,
        transaction_id: &str,
    ) -> PaymentResult<Option<Booking>> {
        let invoice = non_empty(invoice_number);
        let transaction = non_empty(transaction_id);
        if invoice.is_none() && transaction.is_none() {
            return Ok(None);
        }

        // NULL parameters never compare equal, so an absent reference cannot match
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM bookings
            WHERE payment_intent_id = $1
               OR payment_intent_id = $2
               OR id::TEXT = LOWER($1)
               OR id::TEXT = LOWER($2)
            ORDER BY CASE
                WHEN payment_intent_id = $1 THEN 0
                WHEN payment_intent_id = $2 THEN 1
                WHEN id::TEXT = LOWER($1) THEN 2
                ELSE 3
            END
            LIMIT 1
            "#,
            BOOKING_COLUMNS
        ))
        .bind(invoice)
        .bind(transaction)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Booking::try_from).transpose()
    }

    async fn apply_outcome(
        &self,
        id: Uuid,
        reference: Option<&str>,
        outcome: &PaymentOutcome,
    ) -> PaymentResult<TransitionResult> {
        let reference = reference.and_then(non_empty);
        let mut tx = self.pool.begin().await?;

        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let current = row
            .map(Booking::try_from)
            .transpose()?
            .ok_or_else(|| PaymentError::NotFound("Booking not found".into()))?;
        let previous_status = current.payment_status;
        let now = OffsetDateTime::now_utc();
        let planned = plan_for_booking(&current, reference, outcome, now);

        let updated: Option<BookingRow> = match &planned {
            PlannedTransition::MarkPaid { paid_at } => {
                sqlx::query_as(&format!(
                    r#"
                    UPDATE bookings
                    SET payment_status = 'PAID',
                        status = 'CONFIRMED',
                        paid_at = COALESCE(paid_at, $2),
                        confirmed_at = COALESCE(confirmed_at, $3),
                        payment_intent_id = COALESCE($4, payment_intent_id),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    BOOKING_COLUMNS
                ))
                .bind(id)
                .bind(*paid_at)
                .bind(now)
                .bind(reference)
                .fetch_optional(&mut *tx)
                .await?
            }
            PlannedTransition::MarkFailed => {
                sqlx::query_as(&format!(
                    r#"
                    UPDATE bookings
                    SET payment_status = 'FAILED',
                        payment_intent_id = COALESCE($2, payment_intent_id),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    BOOKING_COLUMNS
                ))
                .bind(id)
                .bind(reference)
                .fetch_optional(&mut *tx)
                .await?
            }
            PlannedTransition::ReferenceOnly
                if reference.is_some() && reference != current.payment_intent_id.as_deref() =>
            {
                sqlx::query_as(&format!(
                    r#"
                    UPDATE bookings
                    SET payment_intent_id = $2,
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    BOOKING_COLUMNS
                ))
                .bind(id)
                .bind(reference)
                .fetch_optional(&mut *tx)
                .await?
            }
            PlannedTransition::ReferenceOnly | PlannedTransition::Untouched => None,
        };

        tx.commit().await?;

        let booking = match updated {
            Some(row) => Booking::try_from(row)?,
            None => current,
        };

        Ok(TransitionResult {
            booking,
            previous_status,
            planned,
        })
    }

    async fn reset_processing(&self, id: Uuid) -> PaymentResult<Option<Booking>> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            r#"
            UPDATE bookings
            SET payment_status = 'PENDING',
                payment_intent_id = NULL,
                payment_initiated_at = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND payment_status = 'PROCESSING'
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Booking::try_from).transpose()
    }

    async fn list_stuck_processing(
        &self,
        initiated_before: OffsetDateTime,
        limit: i64,
    ) -> PaymentResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM bookings
            WHERE payment_status = 'PROCESSING'
              AND COALESCE(payment_initiated_at, updated_at) < $1
            ORDER BY COALESCE(payment_initiated_at, updated_at)
            LIMIT $2
            "#,
            BOOKING_COLUMNS
        ))
        .bind(initiated_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn record_payment_event(&self, event: NewPaymentEvent) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_events (id, booking_id, event, metadata)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.booking_id)
        .bind(event.kind.as_str())
        .bind(&event.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_audit(&self, entry: AuditEntry) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, action, booking_id, metadata)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.action.as_str())
        .bind(entry.booking_id)
        .bind(&entry.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_with_unknown_status_is_rejected() {
        let now = OffsetDateTime::now_utc();
        let row = BookingRow {
            id: Uuid::new_v4(),
            tour_package_id: Uuid::new_v4(),
            customer_name: "Jane".into(),
            customer_email: "jane@example.com".into(),
            phone: None,
            country: None,
            participants: 1,
            start_date: now.date(),
            total_amount_cents: 100,
            status: "PENDING".into(),
            payment_status: "SETTLING".into(),
            payment_intent_id: None,
            payment_initiated_at: None,
            paid_at: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(
            Booking::try_from(row),
            Err(PaymentError::Database(_))
        ));
    }

    #[test]
    fn test_non_empty_reference() {
        assert_eq!(non_empty("  "), None);
        assert_eq!(non_empty(" INV-1 "), Some("INV-1"));
    }
}
