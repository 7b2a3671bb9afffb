//! ---
//! trex_section: "03-extension-host"
//! trex_subsection: "module"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Extension host boundary invoked around each run."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
use async_trait::async_trait;
use tracing::warn;

/// Boundary to the plugin layer that wraps each run.
///
/// The engine only ever calls these two methods; discovering and loading the
/// plugins behind them is an external concern. Hook failures are reported to
/// the caller as `Err` but the engine always logs and continues: a broken
/// extension must not abort a run.
#[async_trait]
pub trait ExtensionHost: Send + Sync {
    /// Invoked once before the first test of a run is enqueued.
    async fn before_run(&self) -> anyhow::Result<()>;

    /// Invoked exactly once after the run finished or was canceled and
    /// drained.
    async fn after_run(&self) -> anyhow::Result<()>;
}

/// Extension host with no registered plugins.
#[derive(Debug, Default, Clone)]
pub struct NoopExtensionHost;

#[async_trait]
impl ExtensionHost for NoopExtensionHost {
    async fn before_run(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_run(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Invoke the before-run hook, logging instead of propagating failures.
pub(crate) async fn fire_before_run(host: &dyn ExtensionHost) {
    if let Err(err) = host.before_run().await {
        warn!(error = %err, "before-run extension hook failed; continuing");
    }
}

/// Invoke the after-run hook, logging instead of propagating failures.
pub(crate) async fn fire_after_run(host: &dyn ExtensionHost) {
    if let Err(err) = host.after_run().await {
        warn!(error = %err, "after-run extension hook failed; continuing");
    }
}
