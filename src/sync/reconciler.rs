//! Create-or-update of extracted indicators

use std::collections::HashSet;

use validator::Validate;

use crate::error::{CallError, RetryError, SyncError};
use crate::models::{Indicator, IndicatorAction, UpsertAction, UpsertOutcome, UpsertPayload};
use crate::pacing::{RateLimiter, RetryPolicy};
use crate::storage::IndicatorStore;
use crate::sync::expiration::ExpirationPolicy;
use crate::sync::resolver::ExistenceResolver;

/// Pushes indicators into the store, one at a time
pub struct Reconciler<'a, S: IndicatorStore + ?Sized> {
    store: &'a S,
    limiter: &'a RateLimiter,
    retry: &'a RetryPolicy,
    expiration: ExpirationPolicy,
    action: IndicatorAction,
    seen: HashSet<String>,
}

impl<'a, S: IndicatorStore + ?Sized> Reconciler<'a, S> {
    pub fn new(
        store: &'a S,
        limiter: &'a RateLimiter,
        retry: &'a RetryPolicy,
        expiration: ExpirationPolicy,
        action: IndicatorAction,
    ) -> Self {
        Self {
            store,
            limiter,
            retry,
            expiration,
            action,
            seen: HashSet::new(),
        }
    }

    /// Reconcile one indicator.
    ///
    /// Returns `Ok(None)` when the value was already handled earlier in this
    /// run. An invalid payload fails before any lookup is sent. Lookup and
    /// upsert failures become a `Failed` outcome; only a rejected credential
    /// ends the run.
    pub async fn reconcile(
        &mut self,
        indicator: Indicator,
    ) -> Result<Option<UpsertOutcome>, SyncError> {
        if !self.seen.insert(indicator.value.clone()) {
            tracing::debug!(value = %indicator.value, "Indicator already handled in this run");
            return Ok(None);
        }

        tracing::info!(ioc_type = %indicator.ioc_type, value = %indicator.value, "Processing IOC");
        let valid_until = self.expiration.valid_until();

        let payload = UpsertPayload::new(&indicator, self.action, valid_until);
        if let Err(e) = payload.validate() {
            tracing::warn!(value = %indicator.value, error = %e, "Refusing to push invalid IOC");
            return Ok(Some(self.record(indicator, UpsertAction::Failed, None, 0)));
        }

        let resolver = ExistenceResolver::new(self.store, self.limiter, self.retry);
        let exists = match resolver.exists(&indicator.value).await {
            Ok(exists) => exists,
            Err(e) => return self.failed(indicator, "ioc lookup", e).map(Some),
        };

        let (operation, action) = if exists {
            tracing::info!(value = %indicator.value, "IOC already exists. Updating");
            ("ioc update", UpsertAction::Updated)
        } else {
            tracing::info!(value = %indicator.value, "IOC is new. Adding");
            ("ioc create", UpsertAction::Created)
        };

        let store = self.store;
        let limiter = self.limiter;
        let payload = &payload;
        let result = self
            .retry
            .run(operation, CallError::is_retryable, move || async move {
                limiter.wait().await;
                if exists {
                    store.update(payload).await
                } else {
                    store.create(payload).await
                }
            })
            .await;

        match result {
            Ok(done) => Ok(Some(self.record(
                indicator,
                action,
                Some(done.value.as_u16()),
                done.attempts,
            ))),
            Err(e) => self.failed(indicator, operation, e).map(Some),
        }
    }

    fn failed(
        &self,
        indicator: Indicator,
        operation: &str,
        error: RetryError<CallError>,
    ) -> Result<UpsertOutcome, SyncError> {
        if error.last().is_unauthorized() {
            tracing::error!(operation, error = %error, "Indicator store rejected credentials");
            return Err(SyncError::Unauthorized {
                service: "indicator store",
            });
        }

        let status = error.last().status().map(|s| s.as_u16());
        tracing::error!(
            operation,
            value = %indicator.value,
            attempts = error.attempts(),
            status,
            error = %error,
            "Failed to push/update IOC"
        );
        Ok(self.record(indicator, UpsertAction::Failed, status, error.attempts()))
    }

    fn record(
        &self,
        indicator: Indicator,
        action: UpsertAction,
        http_status: Option<u16>,
        attempts: u32,
    ) -> UpsertOutcome {
        metrics::counter!("taxiiforge_indicators_total", "action" => action.as_str()).increment(1);
        UpsertOutcome {
            indicator,
            action,
            http_status,
            attempts,
        }
    }
}
