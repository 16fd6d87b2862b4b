//! `PostgreSQL` booking store for Staybook.
//!
//! [`PostgresBookingStore`] implements the `BookingStore` trait from
//! `staybook-core` with sqlx. Double-booking is prevented at two levels:
//!
//! - a guarded commit takes `pg_advisory_xact_lock` on the apartment, so
//!   check-and-write sequences for one apartment serialise across processes,
//! - the `bookings_no_overlap` exclusion constraint rejects any pair of
//!   `pending`/`confirmed` rows of one apartment with overlapping dates.
//!   Violations surface as [`StoreError::Overlap`].
//!
//! Commit preconditions are re-read with `FOR UPDATE` inside the transaction;
//! a row that moved on since the caller's snapshot fails the commit with
//! [`StoreError::Stale`].
//!
//! # Example
//!
//! ```ignore
//! use staybook_postgres::PostgresBookingStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresBookingStore::connect("postgres://localhost/staybook").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use staybook_core::store::{BookingStore, Commit, Precondition, StoreFuture};
use staybook_core::{
    Activity, ActivityKind, Apartment, ApartmentId, Booking, BookingId, BookingStatus, Money,
    Payment, PaymentId, PaymentStatus, StayDates, StoreError, UserId,
};

/// SQLSTATE raised by an exclusion constraint violation.
const EXCLUSION_VIOLATION: &str = "23P01";

const BOOKING_COLUMNS: &str = "id, apartment_id, user_id, start_date, end_date, status, \
     expires_at, total_amount_cents, nights, guests, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, booking_id, status, amount_cents, transaction_id, \
     failure_reason, paid_at, refund_id, refund_time, created_at, updated_at";

/// sqlx-backed booking store.
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Create a store on an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[tracing::instrument(skip(self, commit), fields(guard = ?commit.guard))]
    async fn apply(&self, commit: Commit) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| database("begin transaction", &e))?;

        if let Some(apartment_id) = commit.guard {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
                .bind(apartment_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| database("lock apartment", &e))?;
        }

        for expected in &commit.expected {
            verify(&mut tx, expected).await?;
        }

        if let Some(apartment_id) = commit.guard {
            let expired = sqlx::query(
                "UPDATE bookings SET status = 'expired', updated_at = $2
                 WHERE apartment_id = $1 AND status = 'pending' AND expires_at <= $2",
            )
            .bind(apartment_id.as_uuid())
            .bind(commit.now)
            .execute(&mut *tx)
            .await
            .map_err(|e| database("expire apartment holds", &e))?
            .rows_affected();
            if expired > 0 {
                tracing::debug!(expired, "Expired lapsed holds before commit");
            }
        }

        for booking in &commit.inserts {
            insert_booking(&mut tx, booking).await?;
        }
        for booking in &commit.updates {
            update_booking(&mut tx, booking).await?;
        }
        for payment in &commit.payments {
            upsert_payment(&mut tx, payment).await?;
        }
        for activity in &commit.activities {
            insert_activity(&mut tx, activity).await?;
        }

        tx.commit()
            .await
            .map_err(|e| database("commit transaction", &e))
    }
}

impl BookingStore for PostgresBookingStore {
    fn apartment(&self, id: ApartmentId) -> StoreFuture<'_, Option<Apartment>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, available, nightly_price_cents, max_guests
                 FROM apartments WHERE id = $1",
            )
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database("load apartment", &e))?;

            row.as_ref().map(apartment_from_row).transpose()
        })
    }

    fn put_apartment(&self, apartment: Apartment) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO apartments (id, available, nightly_price_cents, max_guests)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (id) DO UPDATE
                 SET available = EXCLUDED.available,
                     nightly_price_cents = EXCLUDED.nightly_price_cents,
                     max_guests = EXCLUDED.max_guests,
                     updated_at = now()",
            )
            .bind(apartment.id.as_uuid())
            .bind(apartment.available)
            .bind(cents_to_db(apartment.nightly_price)?)
            .bind(count_to_db(apartment.max_guests)?)
            .execute(&self.pool)
            .await
            .map_err(|e| database("save apartment", &e))?;
            Ok(())
        })
    }

    fn booking(&self, id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| database("load booking", &e))?;

            row.as_ref().map(booking_from_row).transpose()
        })
    }

    fn bookings_overlapping(
        &self,
        apartment_id: ApartmentId,
        stay: StayDates,
    ) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings
                 WHERE apartment_id = $1
                   AND status IN ('pending', 'confirmed')
                   AND start_date < $3 AND end_date > $2
                 ORDER BY start_date"
            ))
            .bind(apartment_id.as_uuid())
            .bind(stay.start_date())
            .bind(stay.end_date())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| database("load overlapping bookings", &e))?;

            rows.iter().map(booking_from_row).collect()
        })
    }

    fn list_bookings(&self, user_id: Option<UserId>) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings
                 WHERE ($1::uuid IS NULL OR user_id = $1)
                 ORDER BY created_at DESC"
            ))
            .bind(user_id.map(|id| *id.as_uuid()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| database("list bookings", &e))?;

            rows.iter().map(booking_from_row).collect()
        })
    }

    fn payment_for_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Payment>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = $1"
            ))
            .bind(booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database("load payment", &e))?;

            row.as_ref().map(payment_from_row).transpose()
        })
    }

    fn activities(&self, booking_id: BookingId) -> StoreFuture<'_, Vec<Activity>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, user_id, booking_id, kind, message, created_at
                 FROM activities WHERE booking_id = $1
                 ORDER BY seq",
            )
            .bind(booking_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| database("load activities", &e))?;

            rows.iter().map(activity_from_row).collect()
        })
    }

    fn commit(&self, commit: Commit) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = self.apply(commit).await;
            if let Err(StoreError::Overlap { apartment_id }) = &result {
                metrics::counter!("staybook_store_overlap_rejections_total").increment(1);
                tracing::warn!(%apartment_id, "Commit rejected by bookings_no_overlap");
            }
            result
        })
    }

    fn expire_stale_holds(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE bookings SET status = 'expired', updated_at = $1
                 WHERE status = 'pending' AND expires_at <= $1",
            )
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| database("expire holds", &e))?;

            Ok(result.rows_affected())
        })
    }
}

// ============================================================================
// Writes
// ============================================================================

async fn verify(
    tx: &mut Transaction<'_, Postgres>,
    expected: &Precondition,
) -> Result<(), StoreError> {
    let current = match expected {
        Precondition::Booking { id, .. } => {
            let row = sqlx::query(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| database("lock booking", &e))?;
            let stored = row.as_ref().map(booking_from_row).transpose()?;
            expected.matches_booking(stored.as_ref())
        }
        Precondition::Payment { booking_id, .. } => {
            let row = sqlx::query(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = $1 FOR UPDATE"
            ))
            .bind(booking_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| database("lock payment", &e))?;
            let stored = row.as_ref().map(payment_from_row).transpose()?;
            expected.matches_payment(stored.as_ref())
        }
    };

    if current {
        Ok(())
    } else {
        Err(StoreError::Stale {
            booking_id: expected.booking_id(),
        })
    }
}

async fn insert_booking(
    tx: &mut Transaction<'_, Postgres>,
    booking: &Booking,
) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "INSERT INTO bookings ({BOOKING_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
    ))
    .bind(booking.id.as_uuid())
    .bind(booking.apartment_id.as_uuid())
    .bind(booking.user_id.as_uuid())
    .bind(booking.stay.start_date())
    .bind(booking.stay.end_date())
    .bind(booking.status.as_str())
    .bind(booking.expires_at)
    .bind(cents_to_db(booking.total_amount)?)
    .bind(count_to_db(booking.nights)?)
    .bind(count_to_db(booking.guests)?)
    .bind(booking.created_at)
    .bind(booking.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| write_error("insert booking", booking.apartment_id, &e))?;
    Ok(())
}

async fn update_booking(
    tx: &mut Transaction<'_, Postgres>,
    booking: &Booking,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE bookings SET status = $2, expires_at = $3, updated_at = $4 WHERE id = $1",
    )
    .bind(booking.id.as_uuid())
    .bind(booking.status.as_str())
    .bind(booking.expires_at)
    .bind(booking.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| write_error("update booking", booking.apartment_id, &e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Corrupt(format!(
            "booking {} vanished during update",
            booking.id
        )));
    }
    Ok(())
}

async fn upsert_payment(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "INSERT INTO payments ({PAYMENT_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (booking_id) DO UPDATE
         SET status = EXCLUDED.status,
             amount_cents = EXCLUDED.amount_cents,
             transaction_id = EXCLUDED.transaction_id,
             failure_reason = EXCLUDED.failure_reason,
             paid_at = EXCLUDED.paid_at,
             refund_id = EXCLUDED.refund_id,
             refund_time = EXCLUDED.refund_time,
             updated_at = EXCLUDED.updated_at"
    ))
    .bind(payment.id.as_uuid())
    .bind(payment.booking_id.as_uuid())
    .bind(payment.status.as_str())
    .bind(cents_to_db(payment.amount)?)
    .bind(payment.transaction_id.as_deref())
    .bind(payment.failure_reason.as_deref())
    .bind(payment.paid_at)
    .bind(payment.refund_id.as_deref())
    .bind(payment.refund_time)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| database("save payment", &e))?;
    Ok(())
}

async fn insert_activity(
    tx: &mut Transaction<'_, Postgres>,
    activity: &Activity,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO activities (id, user_id, booking_id, kind, message, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(activity.id.as_uuid())
    .bind(activity.user_id.as_uuid())
    .bind(activity.booking_id.as_uuid())
    .bind(activity.kind.as_str())
    .bind(&activity.message)
    .bind(activity.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| database("record activity", &e))?;
    Ok(())
}

// ============================================================================
// Row mapping
// ============================================================================

fn apartment_from_row(row: &PgRow) -> Result<Apartment, StoreError> {
    Ok(Apartment {
        id: ApartmentId::from_uuid(column(row, "id")?),
        available: column(row, "available")?,
        nightly_price: cents_from_db(column(row, "nightly_price_cents")?)?,
        max_guests: count_from_db(column(row, "max_guests")?)?,
    })
}

fn booking_from_row(row: &PgRow) -> Result<Booking, StoreError> {
    let start_date: NaiveDate = column(row, "start_date")?;
    let end_date: NaiveDate = column(row, "end_date")?;
    let status: String = column(row, "status")?;

    Ok(Booking {
        id: BookingId::from_uuid(column(row, "id")?),
        apartment_id: ApartmentId::from_uuid(column(row, "apartment_id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        stay: StayDates::new(start_date, end_date)
            .map_err(|e| StoreError::Corrupt(format!("stored booking dates: {e}")))?,
        status: BookingStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown booking status: {status}")))?,
        expires_at: column(row, "expires_at")?,
        total_amount: cents_from_db(column(row, "total_amount_cents")?)?,
        nights: count_from_db(column(row, "nights")?)?,
        guests: count_from_db(column(row, "guests")?)?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    let status: String = column(row, "status")?;

    Ok(Payment {
        id: PaymentId::from_uuid(column(row, "id")?),
        booking_id: BookingId::from_uuid(column(row, "booking_id")?),
        status: PaymentStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown payment status: {status}")))?,
        amount: cents_from_db(column(row, "amount_cents")?)?,
        transaction_id: column(row, "transaction_id")?,
        failure_reason: column(row, "failure_reason")?,
        paid_at: column(row, "paid_at")?,
        refund_id: column(row, "refund_id")?,
        refund_time: column(row, "refund_time")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn activity_from_row(row: &PgRow) -> Result<Activity, StoreError> {
    let kind: String = column(row, "kind")?;

    Ok(Activity {
        id: staybook_core::types::ActivityId::from_uuid(column(row, "id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        booking_id: BookingId::from_uuid(column(row, "booking_id")?),
        kind: ActivityKind::parse(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown activity kind: {kind}")))?,
        message: column(row, "message")?,
        created_at: column(row, "created_at")?,
    })
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("column {name}: {e}")))
}

fn cents_to_db(amount: Money) -> Result<i64, StoreError> {
    i64::try_from(amount.cents())
        .map_err(|_| StoreError::Corrupt(format!("amount {amount} exceeds storage range")))
}

fn cents_from_db(cents: i64) -> Result<Money, StoreError> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| StoreError::Corrupt(format!("negative amount: {cents}")))
}

fn count_to_db(count: u32) -> Result<i32, StoreError> {
    i32::try_from(count).map_err(|_| StoreError::Corrupt(format!("count {count} too large")))
}

fn count_from_db(count: i32) -> Result<u32, StoreError> {
    u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count: {count}")))
}

fn database(operation: &str, error: &sqlx::Error) -> StoreError {
    StoreError::Database(format!("Failed to {operation}: {error}"))
}

fn write_error(operation: &str, apartment_id: ApartmentId, error: &sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = error {
        if db_err.code().as_deref() == Some(EXCLUSION_VIOLATION) {
            return StoreError::Overlap { apartment_id };
        }
    }
    database(operation, error)
}

