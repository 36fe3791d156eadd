//! Runtime bootstrap
//!
//! [`FederationRuntime`] wires the registry, planner, cache, guard and router
//! from a [`FederationConfig`], registers the configured catalog and runs a
//! periodic maintenance task until [`FederationRuntime::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use loom_kernel::backend::{ArtifactStore, ForwardPass};
use loom_kernel::error::{KernelError, KernelResult};
use loom_kernel::telemetry::TelemetrySink;

use crate::cache::{CompositionCache, Materializer};
use crate::config::FederationConfig;
use crate::guard::TenantIsolationGuard;
use crate::planner::CompositionPlanner;
use crate::registry::{AdapterCatalog, AdapterRegistry, CatalogReport};
use crate::router::InferenceRouter;
use crate::telemetry::TracingTelemetrySink;

/// Collects the collaborators a runtime needs.
pub struct FederationRuntimeBuilder {
    config: FederationConfig,
    backend: Arc<dyn ForwardPass>,
    store: Arc<dyn ArtifactStore>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    catalog: Option<AdapterCatalog>,
}

impl FederationRuntimeBuilder {
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Register `catalog` at startup, in addition to `registry.catalog_path`.
    pub fn catalog(mut self, catalog: AdapterCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Assemble the components and start maintenance.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(self) -> KernelResult<FederationRuntime> {
        let config = self.config;
        let trust = config.registry.trust_policy()?;
        let registry = Arc::new(AdapterRegistry::new(trust));

        let mut catalogs = Vec::new();
        if let Some(path) = &config.registry.catalog_path {
            catalogs.push(AdapterCatalog::load(path)?);
        }
        catalogs.extend(self.catalog);
        for catalog in &catalogs {
            registry
                .register_catalog(catalog)
                .into_result()
                .map(|_: CatalogReport| ())
                .attach("registering startup catalog")?;
        }

        let planner = CompositionPlanner::new(config.planner.table(), config.planner.limits);
        let materializer = Materializer::new(
            self.store,
            config.cache.artifact_retry.clone(),
            config.planner.gate_weighting,
        );
        let cache = CompositionCache::new(&config.cache, materializer);
        let guard = Arc::new(TenantIsolationGuard::from_config(
            &config.tenants,
            config.default_quota.clone(),
        ));
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(TracingTelemetrySink));
        let router = Arc::new(
            InferenceRouter::new(registry, planner, cache, guard, self.backend)
                .with_telemetry(telemetry),
        );

        let cancel = CancellationToken::new();
        let maintenance = config.maintenance_interval().map(|period| {
            tokio::spawn(maintain(
                Arc::clone(&router),
                period,
                config.idle_ttl(),
                cancel.clone(),
            ))
        });

        let stats = router.registry().stats();
        info!(
            adapters = stats.adapters,
            records = stats.records,
            tenants = config.tenants.len(),
            budget_bytes = config.cache.memory_budget_bytes,
            maintenance = maintenance.is_some(),
            "federation runtime started"
        );

        Ok(FederationRuntime {
            config,
            router,
            cancel,
            maintenance,
        })
    }
}

/// A running federation core.
pub struct FederationRuntime {
    config: FederationConfig,
    router: Arc<InferenceRouter>,
    cancel: CancellationToken,
    maintenance: Option<JoinHandle<()>>,
}

impl FederationRuntime {
    pub fn builder(
        config: FederationConfig,
        backend: Arc<dyn ForwardPass>,
        store: Arc<dyn ArtifactStore>,
    ) -> FederationRuntimeBuilder {
        FederationRuntimeBuilder {
            config,
            backend,
            store,
            telemetry: None,
            catalog: None,
        }
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<InferenceRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        self.router.registry()
    }

    pub fn cache(&self) -> &CompositionCache {
        self.router.cache()
    }

    pub fn guard(&self) -> &Arc<TenantIsolationGuard> {
        self.router.guard()
    }

    /// Run one maintenance pass now.
    pub fn run_maintenance(&self) {
        maintenance_pass(&self.router, self.config.idle_ttl());
    }

    /// Stop maintenance and drop every unheld cache entry.
    pub async fn shutdown(mut self) -> KernelResult<()> {
        self.cancel.cancel();
        if let Some(task) = self.maintenance.take() {
            task.await
                .map_err(|e| Report::new(KernelError::Internal(e.to_string())))
                .attach("joining maintenance task")?;
        }
        let trimmed = self.cache().trim_idle(Duration::ZERO);
        let stats = self.cache().stats();
        info!(
            trimmed,
            still_held = stats.entries,
            resident_bytes = stats.resident_bytes,
            "federation runtime stopped"
        );
        Ok(())
    }
}

impl Drop for FederationRuntime {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn maintain(
    router: Arc<InferenceRouter>,
    period: Duration,
    idle_ttl: Option<Duration>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("maintenance stopped");
                return;
            }
            _ = ticker.tick() => maintenance_pass(&router, idle_ttl),
        }
    }
}

fn maintenance_pass(router: &InferenceRouter, idle_ttl: Option<Duration>) {
    let report = router.collect_garbage();
    let trimmed = idle_ttl.map_or(0, |ttl| router.cache().trim_idle(ttl));
    if report.removed.is_empty() && trimmed == 0 {
        debug!("maintenance pass: nothing to do");
        return;
    }
    info!(
        removed = report.removed.len(),
        invalidated = report.invalidated,
        trimmed,
        "maintenance pass"
    );
}
