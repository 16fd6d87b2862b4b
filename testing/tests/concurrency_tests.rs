//! Racing requests: at most one of several overlapping holds may win, and
//! a decision made on a snapshot another process has since changed is made
//! again instead of overwriting that change.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use futures::future::join_all;
use proptest::prelude::*;
use staybook_core::environment::Clock;
use chrono::Duration;
use staybook_core::manager::{BookingManager, HoldRequest, PaymentNotice};
use staybook_core::store::BookingStore;
use staybook_core::{
    ActivityKind, Booking, BookingError, BookingId, BookingStatus, PaymentStatus, StayDates,
};
use staybook_testing::fixtures::{admin, apartment, base_time, date, guest, stay};
use staybook_testing::properties::competing_stays;
use staybook_testing::{FixedClock, InMemoryBookingStore, ManualClock};
use std::sync::Arc;

fn assert_pairwise_disjoint(bookings: &[Booking], clock: &dyn Clock) {
    let live: Vec<&Booking> = bookings
        .iter()
        .filter(|booking| booking.blocks(clock.now()))
        .collect();
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            assert!(
                !a.stay.overlaps(&b.stay),
                "live bookings {} {} and {} {} overlap",
                a.id,
                a.stay,
                b.id,
                b.stay
            );
        }
    }
}

fn hold_request(apartment_id: staybook_core::ApartmentId, stay: StayDates) -> HoldRequest {
    HoldRequest {
        apartment_id,
        checkin: stay.start_date(),
        checkout: stay.end_date(),
        guests: 1,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_holds_one_winner() {
    let apartment = apartment();
    let store = InMemoryBookingStore::with_apartment(apartment.clone());
    let manager = Arc::new(BookingManager::new(
        Arc::new(store.clone()),
        Arc::new(FixedClock::new(base_time())),
    ));

    let tasks = (0..16).map(|_| {
        let manager = Arc::clone(&manager);
        let request = HoldRequest {
            apartment_id: apartment.id,
            checkin: date("2025-06-10"),
            checkout: date("2025-06-15"),
            guests: 1,
        };
        tokio::spawn(async move { manager.create_temp_booking(request, &guest()).await })
    });

    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let winners = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|result| result.is_err()) {
        match result {
            Err(BookingError::Conflict { conflicts }) => assert_eq!(conflicts.len(), 1),
            other => panic!("expected conflict, got {other:?}"),
        }
    }
    assert_eq!(store.booking_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_pair_from_scenario() {
    // A: [06-10, 06-15), B: [06-12, 06-18)
    let apartment = apartment();
    let store = InMemoryBookingStore::with_apartment(apartment.clone());
    let manager = Arc::new(BookingManager::new(
        Arc::new(store.clone()),
        Arc::new(FixedClock::new(base_time())),
    ));

    let a = {
        let manager = Arc::clone(&manager);
        let request = hold_request(
            apartment.id,
            StayDates::new(date("2025-06-10"), date("2025-06-15")).unwrap(),
        );
        tokio::spawn(async move { manager.create_temp_booking(request, &guest()).await })
    };
    let b = {
        let manager = Arc::clone(&manager);
        let request = hold_request(
            apartment.id,
            StayDates::new(date("2025-06-12"), date("2025-06-18")).unwrap(),
        );
        tokio::spawn(async move { manager.create_temp_booking(request, &guest()).await })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert!(a.is_ok() != b.is_ok(), "exactly one hold must succeed: {a:?} / {b:?}");

    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(BookingError::Conflict { .. })));
    assert_eq!(store.booking_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_managers_sharing_a_store() {
    // Separate managers have separate in-process locks, like two servers
    // on one database: only the store's commit guard stands between them.
    let apartment = apartment();
    let store = InMemoryBookingStore::with_apartment(apartment.clone());
    let clock = Arc::new(FixedClock::new(base_time()));
    let managers: Vec<Arc<BookingManager>> = (0..4)
        .map(|_| Arc::new(BookingManager::new(Arc::new(store.clone()), clock.clone())))
        .collect();

    let tasks = managers.iter().cycle().take(16).enumerate().map(|(i, manager)| {
        let manager = Arc::clone(manager);
        let offset = i64::try_from(i % 3).unwrap();
        let start = date("2025-06-10") + chrono::Duration::days(offset);
        let request = HoldRequest {
            apartment_id: apartment.id,
            checkin: start,
            checkout: start + chrono::Duration::days(3),
            guests: 1,
        };
        tokio::spawn(async move { manager.create_temp_booking(request, &guest()).await })
    });

    for joined in join_all(tasks).await {
        match joined.unwrap() {
            Ok(_) | Err(BookingError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let bookings = store.bookings_of(apartment.id);
    assert_eq!(bookings.len(), 1);
    assert_pairwise_disjoint(&bookings, clock.as_ref());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_holds_all_succeed() {
    let apartment = apartment();
    let store = InMemoryBookingStore::with_apartment(apartment.clone());
    let manager = Arc::new(BookingManager::new(
        Arc::new(store.clone()),
        Arc::new(FixedClock::new(base_time())),
    ));

    let tasks = (0..8i64).map(|week| {
        let manager = Arc::clone(&manager);
        let start = date("2025-07-01") + chrono::Duration::days(week * 7);
        let request = HoldRequest {
            apartment_id: apartment.id,
            checkin: start,
            checkout: start + chrono::Duration::days(7),
            guests: 1,
        };
        tokio::spawn(async move { manager.create_temp_booking(request, &guest()).await })
    });

    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }
    assert_eq!(store.booking_count(), 8);
    assert!(
        store
            .bookings_of(apartment.id)
            .iter()
            .all(|booking| booking.status == BookingStatus::Pending)
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn live_bookings_stay_pairwise_disjoint(stays in competing_stays(8)) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let apartment = apartment();
            let store = InMemoryBookingStore::with_apartment(apartment.clone());
            let clock = Arc::new(FixedClock::new(base_time()));
            let manager = Arc::new(BookingManager::new(Arc::new(store.clone()), clock.clone()));

            let tasks = stays.iter().map(|stay| {
                let manager = Arc::clone(&manager);
                let request = hold_request(apartment.id, *stay);
                tokio::spawn(async move { manager.create_temp_booking(request, &guest()).await })
            });
            let outcomes = join_all(tasks).await;

            let bookings = store.bookings_of(apartment.id);
            assert_pairwise_disjoint(&bookings, clock.as_ref());

            let successes = outcomes
                .into_iter()
                .filter(|outcome| matches!(outcome, Ok(Ok(_))))
                .count();
            assert_eq!(successes, bookings.len());
        });
    }
}

async fn paid(store: &InMemoryBookingStore, booking_id: BookingId) -> PaymentNotice {
    PaymentNotice {
        booking_id,
        transaction_id: format!("txn_{booking_id}"),
        amount: store.booking(booking_id).await.unwrap().unwrap().total_amount,
    }
}

#[tokio::test]
async fn test_cancel_decided_before_payment_still_requests_refund() {
    let apartment = apartment();
    let store = InMemoryBookingStore::with_apartment(apartment.clone());
    let clock = ManualClock::new(base_time());
    let (gated, gate) = store.gated();
    let canceller = Arc::new(BookingManager::new(Arc::new(gated), Arc::new(clock.clone())));
    let payer = BookingManager::new(Arc::new(store.clone()), Arc::new(clock));

    let owner = guest();
    let hold = payer
        .create_temp_booking(hold_request(apartment.id, stay("2025-06-10", "2025-06-15")), &owner)
        .await
        .unwrap();
    let booking_id = hold.booking_id;

    let cancel = {
        let canceller = Arc::clone(&canceller);
        tokio::spawn(async move { canceller.cancel_booking(booking_id, &owner).await })
    };
    gate.arrived().await;

    let receipt = payer
        .record_payment(paid(&store, booking_id).await, &admin())
        .await
        .unwrap();
    assert!(receipt.confirmed);

    gate.open();
    let cancelled = cancel.await.unwrap().unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let payment = store.payment_for_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::RefundPending);
    let kinds: Vec<ActivityKind> = store
        .activities(booking_id)
        .await
        .unwrap()
        .iter()
        .map(|activity| activity.kind)
        .collect();
    assert!(kinds.contains(&ActivityKind::RefundRequested));
}

#[tokio::test]
async fn test_late_payment_racing_a_new_hold_awaits_refund() {
    let apartment = apartment();
    let store = InMemoryBookingStore::with_apartment(apartment.clone());
    let clock = ManualClock::new(base_time());
    let (gated, gate) = store.gated();
    let payer = Arc::new(BookingManager::new(Arc::new(gated), Arc::new(clock.clone())));
    let booker = BookingManager::new(Arc::new(store.clone()), Arc::new(clock.clone()));

    let lapsing = booker
        .create_temp_booking(hold_request(apartment.id, stay("2025-06-10", "2025-06-15")), &guest())
        .await
        .unwrap();
    clock.advance(Duration::minutes(30));

    // The payer sees a lapsed hold on free dates and decides to resurrect it.
    let notice = paid(&store, lapsing.booking_id).await;
    let payment = {
        let payer = Arc::clone(&payer);
        tokio::spawn(async move { payer.record_payment(notice, &admin()).await })
    };
    gate.arrived().await;

    booker
        .create_temp_booking(hold_request(apartment.id, stay("2025-06-12", "2025-06-14")), &guest())
        .await
        .unwrap();

    gate.open();
    let receipt = payment.await.unwrap().unwrap();
    assert!(!receipt.confirmed);
    assert_eq!(receipt.payment.status, PaymentStatus::RefundPending);
    assert_eq!(receipt.booking.status, BookingStatus::Expired);
    assert_pairwise_disjoint(&store.bookings_of(apartment.id), &FixedClock::new(clock.now()));
}

#[tokio::test]
async fn test_refund_completed_once_across_managers() {
    let apartment = apartment();
    let store = InMemoryBookingStore::with_apartment(apartment.clone());
    let clock = ManualClock::new(base_time());
    let (gated, gate) = store.gated();
    let slow = Arc::new(BookingManager::new(Arc::new(gated), Arc::new(clock.clone())));
    let fast = BookingManager::new(Arc::new(store.clone()), Arc::new(clock));

    let owner = guest();
    let hold = fast
        .create_temp_booking(hold_request(apartment.id, stay("2025-06-10", "2025-06-15")), &owner)
        .await
        .unwrap();
    fast.record_payment(paid(&store, hold.booking_id).await, &admin())
        .await
        .unwrap();
    fast.cancel_booking(hold.booking_id, &owner).await.unwrap();

    let booking_id = hold.booking_id;
    let second = {
        let slow = Arc::clone(&slow);
        tokio::spawn(async move {
            slow.complete_refund(booking_id, "re_slow".to_string(), &admin())
                .await
        })
    };
    gate.arrived().await;

    let refunded = fast
        .complete_refund(booking_id, "re_fast".to_string(), &admin())
        .await
        .unwrap();
    assert_eq!(refunded.refund_id.as_deref(), Some("re_fast"));

    gate.open();
    let err = second.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        BookingError::InvalidPaymentState {
            status: PaymentStatus::Refunded,
            ..
        }
    ));
    let payment = store.payment_for_booking(booking_id).await.unwrap().unwrap();
    assert_eq!(payment.refund_id.as_deref(), Some("re_fast"));
}
