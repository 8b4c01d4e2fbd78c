//! End-to-end lifecycle tests over in-memory stores and mock collaborators
//!
//! Covers the submit -> process -> monitor -> renew flow the service is
//! built around, including the redelivery and cancellation races.

use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use holdfast::clients::mock::{MockContentStore, MockLedger};
use holdfast::db::schemas::{DealStatus, PinStatus};
use holdfast::jobs::{Job, MemoryJobSink};
use holdfast::pricing::PricingService;
use holdfast::services::{
    DealBroker, DealMonitor, PinGateway, PinProcessor, PipelineOutcome, RenewalManager,
};
use holdfast::store::{DealStore, MemoryDealStore, MemoryPinStore};

const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
const EPOCHS_PER_DAY: i64 = 2880;
const RENEWAL_THRESHOLD: i64 = 20_160;

struct Harness {
    pins: Arc<MemoryPinStore>,
    deals: Arc<MemoryDealStore>,
    content: Arc<MockContentStore>,
    ledger: Arc<MockLedger>,
    sink: Arc<MemoryJobSink>,
    gateway: PinGateway,
    processor: PinProcessor,
    monitor: DealMonitor,
    renewal: RenewalManager,
}

fn harness() -> Harness {
    let pins = Arc::new(MemoryPinStore::new());
    let deals = Arc::new(MemoryDealStore::new());
    let content = Arc::new(MockContentStore::new().with_content(CID, 1 << 30));
    let ledger = Arc::new(MockLedger::new());
    let sink = Arc::new(MemoryJobSink::new());

    let pricing = PricingService::new(
        Decimal::from_str("0.001").unwrap(),
        Decimal::from(20),
        1_048_576,
    );

    let gateway = PinGateway::new(
        pins.clone(),
        deals.clone(),
        sink.clone(),
        ledger.clone(),
        pricing.clone(),
        "f3wallet".into(),
    );

    let processor = PinProcessor::new(
        pins.clone(),
        deals.clone(),
        content.clone(),
        DealBroker::new(ledger.clone(), "f3wallet".into(), EPOCHS_PER_DAY),
        pricing.clone(),
        false,
    );

    let monitor = DealMonitor::new(deals.clone(), ledger.clone(), 4);

    let renewal = RenewalManager::new(
        pins.clone(),
        deals.clone(),
        DealBroker::new(ledger.clone(), "f3wallet".into(), EPOCHS_PER_DAY),
        pricing,
        RENEWAL_THRESHOLD,
    );

    Harness {
        pins,
        deals,
        content,
        ledger,
        sink,
        gateway,
        processor,
        monitor,
        renewal,
    }
}

/// Deliver every queued ProcessPin job once, as the executor pool would
async fn drain_jobs(h: &Harness) {
    for job in h.sink.jobs() {
        if let Job::ProcessPin { request_id } = job {
            h.processor.process(request_id).await.unwrap();
        }
    }
}

#[tokio::test]
async fn submitted_request_reaches_pinned_with_one_deal() {
    let h = harness();
    let owner = Uuid::new_v4();

    let id = h.gateway.submit(owner, CID, 30).await.unwrap();
    drain_jobs(&h).await;

    let request = h.gateway.get(id, owner).await.unwrap();
    assert_eq!(request.status, PinStatus::Pinned);
    assert_eq!(request.size_bytes, 1 << 30);
    assert_eq!(request.price_fil, Decimal::from_str("0.0012").unwrap());

    let deals = h.gateway.deals_for_cid(CID, owner).await.unwrap();
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0].status, DealStatus::Pending);
    assert_eq!(deals[0].end_epoch - deals[0].start_epoch, 30 * EPOCHS_PER_DAY);
}

#[tokio::test]
async fn redelivered_job_never_duplicates_a_deal() {
    let h = harness();
    let owner = Uuid::new_v4();

    let id = h.gateway.submit(owner, CID, 30).await.unwrap();

    // At-least-once delivery: the same job arrives three times
    for _ in 0..3 {
        h.processor.process(id).await.unwrap();
    }

    assert_eq!(h.deals.for_request(id).await.unwrap().len(), 1);
    // One proposal ever reached the ledger
    assert_eq!(h.ledger.started_deals().len(), 1);
}

#[tokio::test]
async fn cancelled_request_is_never_negotiated() {
    let h = harness();
    let owner = Uuid::new_v4();

    let id = h.gateway.submit(owner, CID, 30).await.unwrap();
    h.gateway.cancel(id, owner).await.unwrap();

    // The queued job is delivered after the cancel wins
    drain_jobs(&h).await;

    let request = h.gateway.get(id, owner).await.unwrap();
    assert_eq!(request.status, PinStatus::Cancelled);
    assert!(h.ledger.started_deals().is_empty());
    assert!(h.content.pins().is_empty());
}

#[tokio::test]
async fn unavailable_content_fails_without_retry() {
    let h = harness();
    let owner = Uuid::new_v4();
    let missing = "QmZZAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    let id = h.gateway.submit(owner, missing, 30).await.unwrap();
    drain_jobs(&h).await;

    let request = h.gateway.get(id, owner).await.unwrap();
    assert_eq!(request.status, PinStatus::Failed);
    assert_eq!(request.failure_reason.as_deref(), Some("content unavailable"));

    // Cancelling a settled request is rejected
    assert!(h.gateway.cancel(id, owner).await.is_err());

    // The row survives as failed; nothing else was written
    assert_eq!(h.pins.all().len(), 1);
}

#[tokio::test]
async fn transient_outage_resolves_on_redelivery() {
    let h = harness();
    let owner = Uuid::new_v4();

    let id = h.gateway.submit(owner, CID, 30).await.unwrap();

    h.ledger.unreachable.store(true, Ordering::Relaxed);
    let err = h.processor.process(id).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(
        h.gateway.get(id, owner).await.unwrap().status,
        PinStatus::Pending
    );

    h.ledger.unreachable.store(false, Ordering::Relaxed);
    assert_eq!(
        h.processor.process(id).await.unwrap(),
        PipelineOutcome::Pinned
    );
}

#[tokio::test]
async fn monitor_then_renewal_covers_expiring_deal() {
    let h = harness();
    let owner = Uuid::new_v4();

    let id = h.gateway.submit(owner, CID, 30).await.unwrap();
    drain_jobs(&h).await;

    let deal = h.deals.for_request(id).await.unwrap().pop().unwrap();

    // The chain activates the deal; the monitor picks it up
    h.ledger.set_deal_state(&deal.deal_cid, "StorageDealActive");
    h.monitor.run_pass().await.unwrap();
    assert_eq!(
        h.deals.for_request(id).await.unwrap()[0].status,
        DealStatus::Active
    );

    // Time passes: the deal is now inside the renewal window
    h.ledger
        .epoch
        .store(deal.end_epoch - RENEWAL_THRESHOLD / 2, Ordering::Relaxed);

    let summary = h.renewal.run_pass().await.unwrap();
    assert_eq!(summary.renewed, 1);

    let deals = h.deals.for_request(id).await.unwrap();
    assert_eq!(deals.len(), 2);

    // Exactly one successor: a duplicated pass adds nothing
    let summary = h.renewal.run_pass().await.unwrap();
    assert_eq!(summary.renewed, 0);
    assert_eq!(h.deals.for_request(id).await.unwrap().len(), 2);

    // The request itself never left pinned
    assert_eq!(
        h.gateway.get(id, owner).await.unwrap().status,
        PinStatus::Pinned
    );

    // The chain expires the old deal; the monitor records it and the
    // successor keeps the request covered
    let deals = h.deals.for_request(id).await.unwrap();
    h.ledger.set_deal_state(&deals[0].deal_cid, "StorageDealExpired");
    h.monitor.run_pass().await.unwrap();

    let deals = h.deals.for_request(id).await.unwrap();
    assert_eq!(deals[0].status, DealStatus::Expired);
    assert!(deals[1].status.is_open());
}

#[tokio::test]
async fn list_pages_are_stable_and_totals_exact() {
    let h = harness();
    let owner = Uuid::new_v4();

    let mut submitted = Vec::new();
    for _ in 0..45 {
        submitted.push(h.gateway.submit(owner, CID, 30).await.unwrap());
    }

    let (page1, total) = h.gateway.list(owner, 1, 20, None).await.unwrap();
    let (page2, total2) = h.gateway.list(owner, 2, 20, None).await.unwrap();
    let (page3, total3) = h.gateway.list(owner, 3, 20, None).await.unwrap();

    assert_eq!((total, total2, total3), (45, 45, 45));
    assert_eq!(page1.len(), 20);
    assert_eq!(page2.len(), 20);
    assert_eq!(page3.len(), 5);

    // Newest first and no overlap between pages
    let mut seen: Vec<Uuid> = Vec::new();
    for page in [&page1, &page2, &page3] {
        for item in page.iter() {
            assert!(!seen.contains(&item.id), "pages must not overlap");
            seen.push(item.id);
        }
    }
    assert_eq!(seen.len(), 45);

    // Items 21-40 are the second page of the creation-time ordering
    let (all, _) = h.gateway.list(owner, 1, 100, None).await.unwrap();
    let expected: Vec<Uuid> = all[20..40].iter().map(|r| r.id).collect();
    let got: Vec<Uuid> = page2.iter().map(|r| r.id).collect();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn another_owners_requests_are_invisible() {
    let h = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let id = h.gateway.submit(alice, CID, 30).await.unwrap();
    drain_jobs(&h).await;

    assert!(h.gateway.get(id, bob).await.is_err());
    assert!(h.gateway.deals_for_cid(CID, bob).await.is_err());

    let (items, total) = h.gateway.list(bob, 1, 20, None).await.unwrap();
    assert!(items.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn stats_reflect_request_and_deal_counts() {
    let h = harness();
    let owner = Uuid::new_v4();

    h.gateway.submit(owner, CID, 30).await.unwrap();
    let id = h.gateway.submit(owner, CID, 60).await.unwrap();
    drain_jobs(&h).await;
    let _ = id;

    let stats = h.gateway.service_stats().await.unwrap();
    assert_eq!(stats.requests["pinned"], 2);
    assert_eq!(stats.requests["pending"], 0);
    assert_eq!(stats.deals["pending"], 2);
    assert_eq!(stats.wallet_balance_fil, Some(42.0));
}

#[tokio::test]
async fn manual_renewal_by_cid_creates_successors() {
    let h = harness();
    let owner = Uuid::new_v4();

    let id = h.gateway.submit(owner, CID, 30).await.unwrap();
    drain_jobs(&h).await;

    let requests = h.gateway.renewable_requests(CID, owner).await.unwrap();
    assert_eq!(requests.len(), 1);

    h.renewal.negotiate_successor(&requests[0]).await.unwrap();
    assert_eq!(h.deals.for_request(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn every_valid_submission_reaches_a_terminal_state() {
    let h = harness();
    let owner = Uuid::new_v4();

    // A mix of resolvable and unresolvable content
    h.content.insert_content("QmaaAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG", 4096);
    let ids = vec![
        h.gateway.submit(owner, CID, 1).await.unwrap(),
        h.gateway
            .submit(owner, "QmaaAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG", 1095)
            .await
            .unwrap(),
        h.gateway
            .submit(owner, "QmbbAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG", 365)
            .await
            .unwrap(),
    ];
    drain_jobs(&h).await;

    for id in ids {
        let request = h.gateway.get(id, owner).await.unwrap();
        assert!(
            matches!(request.status, PinStatus::Pinned | PinStatus::Failed),
            "request {} stuck in {}",
            id,
            request.status
        );
    }
}
