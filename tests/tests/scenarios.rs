//! End-to-end request scenarios through the inference router.

use loom_foundation::retry::RetryPolicy;
use loom_kernel::adapter::{AdapterKind, AdapterRef};
use loom_kernel::backend::ToolSpec;
use loom_kernel::composition::{CacheError, CompositionStrategy, ExhaustionReason};
use loom_kernel::error::FederationError;
use loom_kernel::tenant::{GuardError, QuotaResource, TenantQuota};
use loom_testing::{Federation, FederationBuilder, adapter, assert_forward_called};

fn retail_brand() -> FederationBuilder {
    Federation::builder()
        .adapter(adapter("R1", AdapterKind::Retailer).target("walmart"))
        .adapter(adapter("B1", AdapterKind::Brand).target("tide"))
}

fn ids(adapters: &[AdapterRef]) -> Vec<&str> {
    adapters.iter().map(|a| a.id.as_str()).collect()
}

#[tokio::test]
async fn single_adapter_per_role_composes_additively() {
    let fed = retail_brand()
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding"))
        .build();
    let request = fed.request("acme", "walmart", "tide", "bidding");
    let tools = [ToolSpec::new("place_bid", "Submit a keyword bid")];

    let result = fed.router.infer(&request, "bid on detergent", &tools).await.unwrap();
    assert_eq!(ids(&result.adapters_used), ["R1", "B1", "T1"]);
    assert_eq!(result.strategy, CompositionStrategy::Additive);
    assert_eq!(result.tool_calls.len(), 1);
    assert!(!result.cache_hit);

    assert_forward_called!(fed.backend, 1);
    let call = &fed.backend.calls()[0];
    assert_eq!(call.fingerprint, result.fingerprint);
    assert_eq!(call.tools, ["place_bid"]);

    let events = fed.telemetry.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tenant_id, "acme");
    assert_eq!(events[0].strategy, CompositionStrategy::Additive);
    assert_eq!(events[0].adapters_used, result.adapters_used);
}

#[tokio::test]
async fn competing_tasks_are_gated_in_priority_order() {
    let fed = retail_brand()
        .adapter(adapter("T2", AdapterKind::Task).capability("bidding").priority(3))
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding").priority(5))
        .build();
    let request = fed.request("acme", "walmart", "tide", "bidding");

    let result = fed.router.infer(&request, "bid", &[]).await.unwrap();
    assert_eq!(ids(&result.adapters_used), ["R1", "B1", "T1", "T2"]);
    assert_eq!(result.strategy, CompositionStrategy::Gated);
}

#[tokio::test]
async fn equal_priority_ties_break_on_id() {
    let fed = retail_brand()
        .adapter(adapter("T9", AdapterKind::Task).capability("bidding"))
        .adapter(adapter("T3", AdapterKind::Task).capability("bidding"))
        .build();
    let plan = fed.router.plan(&fed.request("acme", "walmart", "tide", "bidding")).unwrap();
    assert_eq!(plan.adapter_ids(), ["R1", "B1", "T3", "T9"]);
}

#[tokio::test]
async fn unknown_retailer_names_the_role() {
    let fed = retail_brand()
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding"))
        .build();
    let request = fed.request("acme", "kroger", "tide", "bidding");

    let err = fed.router.infer(&request, "bid", &[]).await.unwrap_err();
    assert_eq!(err.unresolved_role(), Some(AdapterKind::Retailer));
    assert!(!err.is_retryable());
    assert_forward_called!(fed.backend, 0);
    assert_eq!(fed.cache.stats().builds, 0);
    assert_eq!(fed.guard.usage("acme").unwrap().active_compositions, 0);
}

#[tokio::test]
async fn budget_below_one_composition_is_exhausted() {
    let fed = retail_brand()
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding"))
        .payload_size(64)
        .budget(100)
        .build();
    let request = fed.request("acme", "walmart", "tide", "bidding");

    let err = fed.router.infer(&request, "bid", &[]).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        FederationError::Cache(CacheError::ResourceExhausted {
            reason: ExhaustionReason::MemoryBudget { required_bytes: 192, budget_bytes: 100, .. }
        })
    ));

    let stats = fed.cache.stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.resident_bytes, 0);
    assert_eq!(stats.reserved_bytes, 0);
    assert_eq!(fed.store.total_fetches(), 0);
    assert_eq!(fed.guard.usage("acme").unwrap().resident_bytes, 0);
}

#[tokio::test]
async fn deactivated_adapter_stays_usable_for_its_holder() {
    let fed = retail_brand()
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding").priority(5))
        .adapter(adapter("T2", AdapterKind::Task).capability("bidding"))
        .build();
    let request = fed.request("acme", "walmart", "tide", "bidding");

    let plan = fed.router.plan(&request).unwrap();
    let held = fed.cache.get_or_build(&plan).await.unwrap();
    assert!(held.weights().references(&AdapterRef::new("T1", 1)));

    assert!(fed.registry.deactivate("T1", 1).unwrap());

    // New plans no longer pick T1, but the held composition is intact.
    let result = fed.router.infer(&request, "bid", &[]).await.unwrap();
    assert_eq!(ids(&result.adapters_used), ["R1", "B1", "T2"]);
    assert_ne!(result.fingerprint, plan.fingerprint);
    assert_eq!(held.weights().layers.len(), 4);

    // GC keeps the record while the composition is held.
    assert!(fed.router.collect_garbage().removed.is_empty());
    assert!(fed.registry.snapshot().entry("T1", 1).is_some());

    drop(held);
    let report = fed.router.collect_garbage();
    assert_eq!(report.removed, vec![AdapterRef::new("T1", 1)]);
    assert_eq!(report.invalidated, 1);
    assert!(!fed.cache.contains(&plan.fingerprint));
}

#[tokio::test]
async fn forbidden_adapter_rejected_before_build() {
    let fed = retail_brand()
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding"))
        .quota("acme", TenantQuota::new(4, u64::MAX).with_allowed_adapters(["R1", "T1"]))
        .build();
    let request = fed.request("acme", "walmart", "tide", "bidding");

    let err = fed.router.infer(&request, "bid", &[]).await.unwrap_err();
    assert_eq!(
        err,
        FederationError::Guard(GuardError::ForbiddenAdapter {
            tenant_id: "acme".into(),
            adapter: "B1".into(),
        })
    );
    assert_eq!(fed.store.total_fetches(), 0);
}

#[tokio::test]
async fn resident_quota_limits_a_tenant() {
    let fed = retail_brand()
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding"))
        .payload_size(64)
        .quota("acme", TenantQuota::new(4, 100))
        .build();
    let request = fed.request("acme", "walmart", "tide", "bidding");

    let err = fed.router.infer(&request, "bid", &[]).await.unwrap_err();
    assert!(matches!(
        err,
        FederationError::Guard(GuardError::QuotaExceeded {
            resource: QuotaResource::ResidentBytes,
            requested: 192,
            ..
        })
    ));
}

#[tokio::test]
async fn unlisted_tenant_without_default_is_rejected() {
    let fed = retail_brand()
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding"))
        .quota("acme", TenantQuota::new(4, u64::MAX))
        .default_quota(None)
        .build();
    let request = fed.request("globex", "walmart", "tide", "bidding");

    let err = fed.router.infer(&request, "bid", &[]).await.unwrap_err();
    assert!(matches!(err, FederationError::Guard(GuardError::UnknownTenant { .. })));
}

#[tokio::test]
async fn transient_artifact_errors_are_retried() {
    let fed = retail_brand()
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding"))
        .retry(RetryPolicy::immediate(3))
        .build();
    fed.store.fail_transiently("mem://T1/1", 2);
    let request = fed.request("acme", "walmart", "tide", "bidding");

    fed.router.infer(&request, "bid", &[]).await.unwrap();
    assert_eq!(fed.store.fetch_count("mem://T1/1"), 3);
    assert_eq!(fed.store.fetch_count("mem://R1/1"), 1);
}

#[tokio::test]
async fn exhausted_artifact_retries_surface_as_resource_exhaustion() {
    let fed = retail_brand()
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding"))
        .retry(RetryPolicy::immediate(3))
        .build();
    fed.store.fail_transiently("mem://T1/1", 5);
    let request = fed.request("acme", "walmart", "tide", "bidding");

    let err = fed.router.infer(&request, "bid", &[]).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        FederationError::Cache(CacheError::ResourceExhausted {
            reason: ExhaustionReason::ArtifactIo { attempts: 3, .. }
        })
    ));
    assert_eq!(fed.store.fetch_count("mem://T1/1"), 3);

    // The failed build is not cached; the next call builds again.
    fed.router.infer(&request, "bid", &[]).await.unwrap();
    assert_eq!(fed.cache.stats().build_failures, 1);
}

#[tokio::test]
async fn corrupted_artifact_fails_integrity_check() {
    let fed = retail_brand()
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding"))
        .build();
    fed.store.corrupt("mem://B1/1");
    let request = fed.request("acme", "walmart", "tide", "bidding");

    let err = fed.router.infer(&request, "bid", &[]).await.unwrap_err();
    assert!(!err.is_retryable());
    match err {
        FederationError::Cache(CacheError::Integrity { adapter, .. }) => {
            assert_eq!(adapter, AdapterRef::new("B1", 1));
        }
        other => panic!("unexpected error: {other}"),
    }

    let events = fed.telemetry.events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].succeeded());
    assert!(!events[0].cache_hit);
    assert_eq!(ids(&events[0].adapters_used), ["R1", "B1", "T1"]);
}

#[tokio::test]
async fn dependency_chain_is_applied_sequentially() {
    let fed = retail_brand()
        .adapter(
            adapter("T1", AdapterKind::Task)
                .capability("bidding")
                .dependency("B1"),
        )
        .build();
    let request = fed.request("acme", "walmart", "tide", "bidding");

    let result = fed.router.infer(&request, "bid", &[]).await.unwrap();
    assert_eq!(ids(&result.adapters_used), ["R1", "B1", "T1"]);
    assert_eq!(result.strategy, CompositionStrategy::Sequential);
}

#[tokio::test]
async fn task_dependencies_are_placed_before_their_dependents() {
    let fed = retail_brand()
        .adapter(adapter("TBASE", AdapterKind::Task).capability("forecast"))
        .adapter(
            adapter("T1", AdapterKind::Task)
                .capability("bidding")
                .dependency("TBASE"),
        )
        .build();
    let request = fed.request("acme", "walmart", "tide", "bidding");

    let result = fed.router.infer(&request, "bid", &[]).await.unwrap();
    assert_eq!(ids(&result.adapters_used), ["R1", "B1", "TBASE", "T1"]);
    // TBASE is a dependency, not a second bidding candidate.
    assert_eq!(result.strategy, CompositionStrategy::Sequential);
}

#[tokio::test]
async fn second_call_is_a_cache_hit() {
    let fed = retail_brand()
        .adapter(adapter("T1", AdapterKind::Task).capability("bidding"))
        .build();
    let request = fed.request("acme", "walmart", "tide", "bidding");

    let first = fed.router.infer(&request, "bid", &[]).await.unwrap();
    let second = fed.router.infer(&request, "bid", &[]).await.unwrap();
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(fed.telemetry.cache_hits(), 1);
    assert_eq!(fed.store.total_fetches(), 3);
}
