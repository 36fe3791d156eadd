//! Concurrency properties of the federation core: single-flight builds,
//! quota accounting under contention, cancellation and eviction.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use loom_kernel::adapter::AdapterKind;
use loom_kernel::composition::CompositionPlan;
use loom_kernel::error::FederationError;
use loom_kernel::tenant::{GuardError, QuotaResource, TenantQuota};
use loom_testing::{Federation, FederationBuilder, MockArtifactStore, adapter};

const TASKS: [&str; 6] = ["bidding", "pacing", "copy", "forecast", "audit", "reporting"];

/// Retailer, brand and one task adapter per entry of [`TASKS`].
fn catalog() -> FederationBuilder {
    let builder = Federation::builder()
        .adapter(adapter("R1", AdapterKind::Retailer).target("walmart"))
        .adapter(adapter("B1", AdapterKind::Brand).target("tide"));
    TASKS.iter().fold(builder, |builder, task| {
        builder.adapter(adapter(&format!("T-{task}"), AdapterKind::Task).capability(*task))
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_build() {
    let (store, gate) = MockArtifactStore::new().gated();
    let fed = catalog().store(store).build();
    let request = fed.request("acme", "walmart", "tide", "bidding");
    let fingerprint = fed.router.plan(&request).unwrap().fingerprint;

    let calls: Vec<_> = (0..16)
        .map(|_| {
            let router = Arc::clone(&fed.router);
            let request = request.clone();
            tokio::spawn(async move { router.infer(&request, "bid", &[]).await })
        })
        .collect();

    wait_until(|| fed.cache.refcount(&fingerprint) == Some(16)).await;
    gate.add_permits(3);

    for result in join_all(calls).await {
        let result = result.unwrap().unwrap();
        assert_eq!(result.fingerprint, fingerprint);
    }
    assert_eq!(fed.cache.stats().builds, 1);
    assert_eq!(fed.store.total_fetches(), 3);
    assert_eq!(fed.backend.call_count(), 16);
    assert_eq!(fed.cache.refcount(&fingerprint), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_composition_quota() {
    let (store, gate) = MockArtifactStore::new().gated();
    let fed = catalog()
        .store(store)
        .quota("acme", TenantQuota::new(2, u64::MAX))
        .build();
    let request = fed.request("acme", "walmart", "tide", "bidding");

    let running: Vec<_> = (0..2)
        .map(|_| {
            let router = Arc::clone(&fed.router);
            let request = request.clone();
            tokio::spawn(async move { router.infer(&request, "bid", &[]).await })
        })
        .collect();
    wait_until(|| fed.guard.usage("acme").unwrap().active_compositions == 2).await;

    let err = fed.router.infer(&request, "bid", &[]).await.unwrap_err();
    assert_eq!(
        err,
        FederationError::Guard(GuardError::QuotaExceeded {
            tenant_id: "acme".into(),
            resource: QuotaResource::ConcurrentCompositions,
            limit: 2,
            requested: 1,
            in_use: 2,
        })
    );
    assert!(!err.is_retryable());

    gate.add_permits(3);
    for result in join_all(running).await {
        result.unwrap().unwrap();
    }
    let usage = fed.guard.usage("acme").unwrap();
    assert_eq!(usage.active_compositions, 0);
    assert_eq!(usage.resident_bytes, 0);

    fed.router.infer(&request, "bid", &[]).await.unwrap();
    // Quotas are per tenant.
    fed.router
        .infer(&fed.request("globex", "walmart", "tide", "bidding"), "bid", &[])
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_call_releases_quota_and_keeps_build() {
    let (store, gate) = MockArtifactStore::new().gated();
    let fed = catalog().store(store).build();
    let request = fed.request("acme", "walmart", "tide", "bidding");
    let fingerprint = fed.router.plan(&request).unwrap().fingerprint;

    let timed_out =
        tokio::time::timeout(Duration::from_millis(20), fed.router.infer(&request, "bid", &[])).await;
    assert!(timed_out.is_err());

    let usage = fed.guard.usage("acme").unwrap();
    assert_eq!(usage.active_compositions, 0);
    assert_eq!(usage.resident_bytes, 0);
    assert_eq!(fed.cache.refcount(&fingerprint), Some(0));

    gate.add_permits(3);
    wait_until(|| fed.cache.contains(&fingerprint)).await;

    let result = fed.router.infer(&request, "bid", &[]).await.unwrap();
    assert!(result.cache_hit);
    assert_eq!(fed.store.total_fetches(), 3);
    assert!(fed.telemetry.events().iter().all(|e| e.cache_hit));
}

#[tokio::test]
async fn refcounts_follow_acquire_and_release() {
    let fed = catalog().build();
    let plans: Vec<CompositionPlan> = TASKS
        .iter()
        .map(|task| fed.router.plan(&fed.request("acme", "walmart", "tide", task)).unwrap())
        .collect();

    let mut rng = StdRng::seed_from_u64(0x100d);
    let mut held: Vec<Vec<_>> = plans.iter().map(|_| Vec::new()).collect();
    for _ in 0..500 {
        let index = rng.gen_range(0..plans.len());
        if held[index].is_empty() || rng.gen_bool(0.6) {
            let handle = fed.cache.get_or_build(&plans[index]).await.unwrap();
            held[index].push(handle);
        } else {
            let at = rng.gen_range(0..held[index].len());
            fed.cache.release(held[index].swap_remove(at));
        }

        for (plan, handles) in plans.iter().zip(&held) {
            let expected = fed.cache.contains(&plan.fingerprint).then_some(handles.len());
            assert_eq!(fed.cache.refcount(&plan.fingerprint), expected);
            if !handles.is_empty() {
                assert!(fed.cache.contains(&plan.fingerprint));
            }
        }
    }

    held.clear();
    let stats = fed.cache.stats();
    assert_eq!(stats.builds, plans.len() as u64);
    assert_eq!(stats.evictions, 0);
    assert!(fed.cache.entries().iter().all(|e| e.refcount == 0));
    let resident: u64 = fed.cache.entries().iter().map(|e| e.size_bytes).sum();
    assert_eq!(stats.resident_bytes, resident);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn eviction_under_contention_respects_budget() {
    // Room for three of the six compositions.
    let budget = 3 * 3 * 64;
    let fed = catalog().budget(budget).build();

    let workers: Vec<_> = (0..8u64)
        .map(|seed| {
            let router = Arc::clone(&fed.router);
            let requests: Vec<_> = TASKS
                .iter()
                .map(|task| fed.request("acme", "walmart", "tide", task))
                .collect();
            tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut succeeded = 0usize;
                for _ in 0..40 {
                    let request = &requests[rng.gen_range(0..requests.len())];
                    match router.infer(request, "go", &[]).await {
                        Ok(_) => succeeded += 1,
                        Err(err) => assert!(err.is_retryable(), "unexpected error: {err}"),
                    }
                    let stats = router.cache().stats();
                    assert!(stats.resident_bytes + stats.reserved_bytes <= budget);
                }
                succeeded
            })
        })
        .collect();

    let mut succeeded = 0;
    for worker in join_all(workers).await {
        succeeded += worker.unwrap();
    }
    assert!(succeeded > 0);

    let stats = fed.cache.stats();
    assert!(stats.entries <= 3);
    assert_eq!(stats.reserved_bytes, 0);
    assert!(stats.resident_bytes <= budget);
    let resident: u64 = fed.cache.entries().iter().map(|e| e.size_bytes).sum();
    assert_eq!(stats.resident_bytes, resident);
    assert!(fed.cache.entries().iter().all(|e| e.refcount == 0));

    let usage = fed.guard.usage("acme").unwrap();
    assert_eq!(usage.active_compositions, 0);
    assert_eq!(usage.resident_bytes, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn held_entries_survive_concurrent_eviction() {
    // Room for three of the six compositions.
    let budget = 3 * 3 * 64;
    let fed = catalog().budget(budget).build();
    let plans: Arc<Vec<CompositionPlan>> = Arc::new(
        TASKS
            .iter()
            .map(|task| fed.router.plan(&fed.request("acme", "walmart", "tide", task)).unwrap())
            .collect(),
    );

    // Holders keep a composition across several yields and check it stays put.
    let holders: Vec<_> = (0..2u64)
        .map(|seed| {
            let cache = fed.cache.clone();
            let plans = Arc::clone(&plans);
            tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(0xa110 + seed);
                let mut held = 0usize;
                for _ in 0..30 {
                    let plan = &plans[rng.gen_range(0..plans.len())];
                    let handle = match cache.get_or_build(plan).await {
                        Ok(handle) => handle,
                        Err(err) => {
                            assert!(err.is_retryable(), "unexpected error: {err}");
                            continue;
                        }
                    };
                    held += 1;
                    for _ in 0..rng.gen_range(1..5) {
                        tokio::time::sleep(Duration::from_millis(rng.gen_range(0..3))).await;
                        assert!(cache.contains(&plan.fingerprint), "held entry evicted");
                        assert!(cache.refcount(&plan.fingerprint).is_some_and(|n| n >= 1));
                    }
                    cache.release(handle);
                }
                held
            })
        })
        .collect();

    // Churners cycle through every plan, forcing eviction.
    let churners: Vec<_> = (0..4u64)
        .map(|seed| {
            let cache = fed.cache.clone();
            let plans = Arc::clone(&plans);
            tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(0xc4a0 + seed);
                for _ in 0..60 {
                    let plan = &plans[rng.gen_range(0..plans.len())];
                    match cache.get_or_build(plan).await {
                        Ok(handle) => cache.release(handle),
                        Err(err) => assert!(err.is_retryable(), "unexpected error: {err}"),
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let mut held = 0;
    for holder in join_all(holders).await {
        held += holder.unwrap();
    }
    for churner in join_all(churners).await {
        churner.unwrap();
    }
    assert!(held > 0);

    let stats = fed.cache.stats();
    assert!(stats.evictions > 0);
    assert_eq!(stats.reserved_bytes, 0);
    assert!(stats.resident_bytes <= budget);
    assert!(fed.cache.entries().iter().all(|e| e.refcount == 0));
}
