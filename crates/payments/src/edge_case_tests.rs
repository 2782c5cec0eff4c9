// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Payment Flow
//!
//! End-to-end behaviour across initializer, webhook and reset:
//! - Webhook idempotency and ordering (PAY-W01 to PAY-W08)
//! - Signature rejection (PAY-S01 to PAY-S04)
//! - Deposit amounts (PAY-D01 to PAY-D02)
//! - Reset guard and races (PAY-R01 to PAY-R03)
//! - Initialization failures (PAY-I01 to PAY-I02)

#[cfg(test)]
mod support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;
    use time::macros::date;
    use uuid::Uuid;

    use crate::booking::{BookingWithTour, NewBooking, Tour};
    use crate::catalog::StaticProductCatalog;
    use crate::client::MockInvoiceProvider;
    use crate::email::BookingNotifier;
    use crate::error::PaymentResult;
    use crate::signature::sign_payload;
    use crate::store::{BookingRepository, InMemoryBookingRepository};
    use crate::PaymentService;

    pub const SECRET: &str = "whsec_irembo_test";

    #[derive(Default)]
    pub struct CountingNotifier {
        pub sent: AtomicUsize,
    }

    impl CountingNotifier {
        pub fn count(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BookingNotifier for CountingNotifier {
        async fn payment_confirmed(&self, _booking: &BookingWithTour) -> PaymentResult<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub struct Harness {
        pub repo: Arc<InMemoryBookingRepository>,
        pub catalog: Arc<StaticProductCatalog>,
        pub notifier: Arc<CountingNotifier>,
        pub service: PaymentService,
        pub tour: Tour,
    }

    impl Harness {
        pub async fn new() -> Self {
            let repo = Arc::new(InMemoryBookingRepository::new());
            let tour = Tour {
                id: Uuid::new_v4(),
                slug: "gorilla-trek".into(),
                title: "Gorilla Trek".into(),
                price_cents: 20_000,
                duration_days: 3,
            };
            repo.insert_tour(tour.clone()).await;

            let catalog = Arc::new(StaticProductCatalog::from_entries([(
                tour.id,
                "PC-gorilla".to_string(),
            )]));
            let notifier = Arc::new(CountingNotifier::default());
            let service = PaymentService::new(
                repo.clone(),
                catalog.clone(),
                Arc::new(MockInvoiceProvider::new()),
                Some(SECRET.to_string()),
                notifier.clone(),
            );

            Self {
                repo,
                catalog,
                notifier,
                service,
                tour,
            }
        }

        /// Booking with totalAmount = 200.00
        pub async fn booking(&self) -> Uuid {
            self.repo
                .insert_booking(NewBooking {
                    tour_package_id: self.tour.id,
                    customer_name: "Jane Doe".into(),
                    customer_email: "jane@example.com".into(),
                    phone: Some("+250 788 123 456".into()),
                    country: Some("RW".into()),
                    participants: 1,
                    start_date: date!(2025 - 09 - 01),
                    total_amount_cents: 20_000,
                })
                .await
                .unwrap()
                .id
        }
    }

    pub fn webhook_body(invoice: &str, transaction: &str, status: &str) -> String {
        json!({
            "success": true,
            "data": {
                "invoiceNumber": invoice,
                "transactionId": transaction,
                "paymentStatus": status,
                "paidAt": "2025-06-01T11:58:00Z",
                "amount": 100,
                "currency": "USD"
            }
        })
        .to_string()
    }

    pub fn signed(body: &str, timestamp_ms: i64) -> String {
        sign_payload(SECRET, timestamp_ms, body).unwrap()
    }
}

#[cfg(test)]
mod webhook_tests {
    use super::support::*;
    use crate::error::PaymentError;
    use crate::signature::now_ms;
    use tourdesk_shared::{BookingStatus, PaymentStatus};

    // =========================================================================
    // PAY-W01: Full happy path - initialize then PAID webhook confirms booking
    // =========================================================================
    #[tokio::test]
    async fn test_end_to_end_paid() {
        let h = Harness::new().await;
        let id = h.booking().await;

        let init = h.service.initialize_payment(id).await.unwrap();
        let booking = h.repo.booking(id).await.unwrap();
        assert_eq!(booking.payment_status, PaymentStatus::Processing);
        assert_eq!(booking.payment_intent_id.as_deref(), Some(init.invoice_id.as_str()));

        let body = webhook_body(&init.invoice_id, "", "PAID");
        let receipt = h
            .service
            .handle_webhook(&body, Some(&signed(&body, now_ms())))
            .await
            .unwrap();
        assert!(receipt.changed);
        assert_eq!(receipt.booking_id, id);

        let booking = h.repo.booking(id).await.unwrap();
        assert_eq!(booking.payment_status, PaymentStatus::Paid);
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert!(booking.paid_at.is_some());
        assert!(booking.confirmed_at.is_some());
        assert_eq!(h.notifier.count(), 1);
    }

    // =========================================================================
    // PAY-W02: Duplicate PAID delivery is a no-op write, email sent once
    // =========================================================================
    #[tokio::test]
    async fn test_duplicate_paid_webhook_is_idempotent() {
        let h = Harness::new().await;
        let id = h.booking().await;
        let init = h.service.initialize_payment(id).await.unwrap();

        let body = webhook_body(&init.invoice_id, "", "PAID");
        let header = signed(&body, now_ms());

        let first = h.service.handle_webhook(&body, Some(&header)).await.unwrap();
        let after_first = h.repo.booking(id).await.unwrap();

        let second = h.service.handle_webhook(&body, Some(&header)).await.unwrap();
        let after_second = h.repo.booking(id).await.unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(after_first, after_second);
        assert_eq!(h.notifier.count(), 1);
        // Each delivery is recorded; duplicates are allowed in the audit trail
        assert_eq!(h.repo.payment_events().await.len(), 2);
    }

    // =========================================================================
    // PAY-W03: Concurrent duplicate deliveries converge to one transition
    // =========================================================================
    #[tokio::test]
    async fn test_concurrent_duplicate_deliveries_converge() {
        let h = Harness::new().await;
        let id = h.booking().await;
        let init = h.service.initialize_payment(id).await.unwrap();

        let body = webhook_body(&init.invoice_id, "", "PAID");
        let header = signed(&body, now_ms());

        let (a, b) = tokio::join!(
            h.service.handle_webhook(&body, Some(&header)),
            h.service.handle_webhook(&body, Some(&header)),
        );
        let changed = [a.unwrap().changed, b.unwrap().changed];
        assert_eq!(changed.iter().filter(|c| **c).count(), 1);
        assert_eq!(h.notifier.count(), 1);
    }

    // =========================================================================
    // PAY-W04: Failed payment leaves booking status untouched
    // =========================================================================
    #[tokio::test]
    async fn test_failed_payment_keeps_booking_pending() {
        let h = Harness::new().await;
        let id = h.booking().await;
        let init = h.service.initialize_payment(id).await.unwrap();

        let body = webhook_body(&init.invoice_id, "", "FAILED");
        h.service
            .handle_webhook(&body, Some(&signed(&body, now_ms())))
            .await
            .unwrap();

        let booking = h.repo.booking(id).await.unwrap();
        assert_eq!(booking.payment_status, PaymentStatus::Failed);
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(h.notifier.count(), 0);
    }

    // =========================================================================
    // PAY-W05: Late FAILED after PAID never downgrades
    // =========================================================================
    #[tokio::test]
    async fn test_late_failure_after_paid_is_ignored() {
        let h = Harness::new().await;
        let id = h.booking().await;
        let init = h.service.initialize_payment(id).await.unwrap();

        let paid = webhook_body(&init.invoice_id, "", "PAID");
        h.service
            .handle_webhook(&paid, Some(&signed(&paid, now_ms())))
            .await
            .unwrap();

        let failed = webhook_body(&init.invoice_id, "", "FAILED");
        let receipt = h
            .service
            .handle_webhook(&failed, Some(&signed(&failed, now_ms())))
            .await
            .unwrap();

        assert!(!receipt.changed);
        assert_eq!(receipt.payment_status, PaymentStatus::Paid);
    }

    // =========================================================================
    // PAY-W06: Unknown invoice number falls back to booking id as transactionId
    // =========================================================================
    #[tokio::test]
    async fn test_lookup_falls_back_to_booking_id() {
        let h = Harness::new().await;
        let id = h.booking().await;
        h.service.initialize_payment(id).await.unwrap();

        let body = webhook_body("unrelated-invoice", &id.to_string(), "PAID");
        let receipt = h
            .service
            .handle_webhook(&body, Some(&signed(&body, now_ms())))
            .await
            .unwrap();

        assert_eq!(receipt.booking_id, id);
        assert_eq!(receipt.payment_status, PaymentStatus::Paid);
    }

    // =========================================================================
    // PAY-W07: No matching booking is NotFound; observability failure is not
    // =========================================================================
    #[tokio::test]
    async fn test_unknown_reference_is_not_found() {
        let h = Harness::new().await;
        let body = webhook_body("nope", "nope", "PAID");
        let err = h
            .service
            .handle_webhook(&body, Some(&signed(&body, now_ms())))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_audit_failure_after_transition_still_succeeds() {
        let h = Harness::new().await;
        let id = h.booking().await;
        let init = h.service.initialize_payment(id).await.unwrap();
        h.repo.set_fail_observability_writes(true).await;

        let body = webhook_body(&init.invoice_id, "", "PAID");
        let receipt = h
            .service
            .handle_webhook(&body, Some(&signed(&body, now_ms())))
            .await
            .unwrap();

        assert!(receipt.changed);
        assert!(h.repo.payment_events().await.is_empty());
        assert_eq!(
            h.repo.booking(id).await.unwrap().payment_status,
            PaymentStatus::Paid
        );
    }

    // =========================================================================
    // PAY-W08: Late FAILED for a superseded invoice leaves the live attempt alone
    // =========================================================================
    #[tokio::test]
    async fn test_failure_for_superseded_invoice_is_ignored() {
        let h = Harness::new().await;
        let id = h.booking().await;
        let first = h.service.initialize_payment(id).await.unwrap();
        h.service.reset_payment(id).await.unwrap();
        let second = h.service.initialize_payment(id).await.unwrap();

        let body = webhook_body(&first.invoice_id, &id.to_string(), "FAILED");
        let receipt = h
            .service
            .handle_webhook(&body, Some(&signed(&body, now_ms())))
            .await
            .unwrap();

        assert!(!receipt.changed);
        assert_eq!(receipt.payment_status, PaymentStatus::Processing);
        let booking = h.repo.booking(id).await.unwrap();
        assert_eq!(booking.payment_status, PaymentStatus::Processing);
        assert_eq!(
            booking.payment_intent_id.as_deref(),
            Some(second.invoice_id.as_str())
        );

        // The delivery is still on record
        let events = h.repo.payment_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metadata["changed"], false);

        // The live invoice can still settle
        let paid = webhook_body(&second.invoice_id, "", "PAID");
        let receipt = h
            .service
            .handle_webhook(&paid, Some(&signed(&paid, now_ms())))
            .await
            .unwrap();
        assert!(receipt.changed);
        assert_eq!(receipt.payment_status, PaymentStatus::Paid);
    }
}

#[cfg(test)]
mod signature_tests {
    use super::support::*;
    use crate::error::PaymentError;
    use tourdesk_shared::PaymentStatus;

    const NOW: i64 = 1_750_000_000_000;

    // =========================================================================
    // PAY-S01: Recomputed-but-wrong signature is rejected before any write
    // =========================================================================
    #[tokio::test]
    async fn test_wrong_signature_rejected() {
        let h = Harness::new().await;
        let id = h.booking().await;
        let init = h.service.initialize_payment(id).await.unwrap();

        let body = webhook_body(&init.invoice_id, "", "PAID");
        let header = crate::signature::sign_payload("not-the-secret", NOW, &body).unwrap();
        let err = h
            .service
            .webhooks
            .handle_at(&body, Some(&header), NOW)
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::SignatureInvalid));
        assert_eq!(
            h.repo.booking(id).await.unwrap().payment_status,
            PaymentStatus::Processing
        );
    }

    // =========================================================================
    // PAY-S02: Stale timestamp rejected even with a correct signature
    // =========================================================================
    #[tokio::test]
    async fn test_stale_timestamp_rejected() {
        let h = Harness::new().await;
        let body = webhook_body("INV", "", "PAID");
        let header = signed(&body, NOW - 301_000);
        let err = h
            .service
            .webhooks
            .handle_at(&body, Some(&header), NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::SignatureInvalid));
    }

    // =========================================================================
    // PAY-S03: Signature is checked before JSON parsing
    // =========================================================================
    #[tokio::test]
    async fn test_unsigned_garbage_is_auth_error_not_validation() {
        let h = Harness::new().await;
        let err = h
            .service
            .webhooks
            .handle_at("not json", None, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::SignatureInvalid));
    }

    // =========================================================================
    // PAY-S04: Signed but malformed bodies are validation errors
    // =========================================================================
    #[tokio::test]
    async fn test_signed_malformed_body() {
        let h = Harness::new().await;

        let header = signed("not json", NOW);
        let err = h
            .service
            .webhooks
            .handle_at("not json", Some(&header), NOW)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid JSON payload");

        let body = r#"{"event":"invoice.paid"}"#;
        let err = h
            .service
            .webhooks
            .handle_at(body, Some(&signed(body, NOW)), NOW)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid webhook data structure");
    }
}

#[cfg(test)]
mod deposit_tests {
    use tourdesk_shared::{deposit_cents, format_amount};

    // =========================================================================
    // PAY-D01: Deposit is exactly half for the reference totals
    // =========================================================================
    #[test]
    fn test_reference_deposits() {
        for (total, deposit) in [(20_000, "100.00"), (907_000, "4535.00"), (290_000, "1450.00")] {
            assert_eq!(format_amount(deposit_cents(total).unwrap()), deposit);
        }
    }

    // =========================================================================
    // PAY-D02: Deposit plus balance always equals the total
    // =========================================================================
    #[test]
    fn test_deposit_never_exceeds_total() {
        for total in [1_i64, 2, 99, 101, 12_345, 1_000_001] {
            let deposit = deposit_cents(total).unwrap();
            assert!(deposit * 2 >= total && deposit * 2 <= total + 1);
        }
    }
}

#[cfg(test)]
mod reset_tests {
    use super::support::*;
    use crate::error::PaymentError;
    use crate::signature::now_ms;
    use tourdesk_shared::PaymentStatus;

    // =========================================================================
    // PAY-R01: Reset on PAID is rejected and leaves booking unchanged
    // =========================================================================
    #[tokio::test]
    async fn test_reset_after_paid_is_rejected() {
        let h = Harness::new().await;
        let id = h.booking().await;
        let init = h.service.initialize_payment(id).await.unwrap();
        let body = webhook_body(&init.invoice_id, "", "PAID");
        h.service
            .handle_webhook(&body, Some(&signed(&body, now_ms())))
            .await
            .unwrap();
        let before = h.repo.booking(id).await.unwrap();

        let err = h.service.reset_payment(id).await.unwrap_err();
        assert!(matches!(
            err,
            PaymentError::StateConflict {
                current_status: PaymentStatus::Paid,
                ..
            }
        ));
        assert_eq!(h.repo.booking(id).await.unwrap(), before);
    }

    // =========================================================================
    // PAY-R02: Reset then retry creates a fresh invoice
    // =========================================================================
    #[tokio::test]
    async fn test_reset_then_reinitialize() {
        let h = Harness::new().await;
        let id = h.booking().await;
        let first = h.service.initialize_payment(id).await.unwrap();

        let outcome = h.service.reset_payment(id).await.unwrap();
        assert!(outcome.success);
        let booking = h.repo.booking(id).await.unwrap();
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert!(booking.payment_intent_id.is_none());

        let second = h.service.initialize_payment(id).await.unwrap();
        assert_ne!(first.invoice_id, second.invoice_id);
    }

    // =========================================================================
    // PAY-R03: Payment completing after the widget was dismissed still lands
    // =========================================================================
    #[tokio::test]
    async fn test_paid_webhook_after_reset_still_confirms() {
        let h = Harness::new().await;
        let id = h.booking().await;
        let init = h.service.initialize_payment(id).await.unwrap();
        h.service.reset_payment(id).await.unwrap();

        // The invoice reference was cleared, so only the booking id matches
        let body = webhook_body(&init.invoice_id, &id.to_string(), "PAID");
        let receipt = h
            .service
            .handle_webhook(&body, Some(&signed(&body, now_ms())))
            .await
            .unwrap();

        assert_eq!(receipt.payment_status, PaymentStatus::Paid);
        assert_eq!(
            h.repo.booking(id).await.unwrap().payment_intent_id.as_deref(),
            Some(init.invoice_id.as_str())
        );
    }
}

#[cfg(test)]
mod initialize_tests {
    use super::support::*;
    use crate::error::PaymentError;
    use tourdesk_shared::PaymentStatus;

    // =========================================================================
    // PAY-I01: Missing product mapping fails without touching the booking
    // =========================================================================
    #[tokio::test]
    async fn test_missing_product_mapping() {
        let h = Harness::new().await;
        let id = h.booking().await;
        h.catalog.remove(h.tour.id).await;

        let err = h.service.initialize_payment(id).await.unwrap_err();
        match &err {
            PaymentError::MissingProductMapping { tour_title, .. } => {
                assert_eq!(tour_title, "Gorilla Trek")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("Gorilla Trek"));

        let booking = h.repo.booking(id).await.unwrap();
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert!(booking.payment_intent_id.is_none());
    }

    // =========================================================================
    // PAY-I02: Re-initializing a PROCESSING booking replaces the invoice
    // =========================================================================
    #[tokio::test]
    async fn test_reinitialize_processing_booking() {
        let h = Harness::new().await;
        let id = h.booking().await;
        let first = h.service.initialize_payment(id).await.unwrap();
        let second = h.service.initialize_payment(id).await.unwrap();

        assert_ne!(first.invoice_id, second.invoice_id);
        assert_eq!(
            h.repo.booking(id).await.unwrap().payment_intent_id,
            Some(second.invoice_id)
        );
    }
}
