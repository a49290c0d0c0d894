//! Thread-local enrichment context: request/correlation/trace identifiers
//! and free-form baggage that [`crate::Monitor::collect_now`] stamps onto
//! every observation recorded while a scope is active.
//!
//! Mirrors the span current-span machinery in `telemetry_trace::span`
//! (thread-local cell plus an RAII guard that restores the previous value),
//! applied to metric enrichment rather than span linkage.

use std::cell::RefCell;
use std::collections::HashMap;

/// Enrichment tags attached to observations recorded while a scope backed
/// by [`EnrichmentGuard`] is active.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentContext {
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub trace_id: Option<u128>,
    pub baggage: HashMap<String, String>,
}

impl EnrichmentContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: u128) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    #[must_use]
    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }

    /// Renders this context's identifiers as metric tags: `request_id`,
    /// `correlation_id`, `trace_id` (hex, falling back to the current span's
    /// trace id if this context didn't set one explicitly), plus every
    /// baggage entry verbatim.
    #[must_use]
    pub(crate) fn as_tags(&self) -> HashMap<String, String> {
        let mut tags = self.baggage.clone();
        if let Some(request_id) = &self.request_id {
            tags.insert("request_id".to_string(), request_id.clone());
        }
        if let Some(correlation_id) = &self.correlation_id {
            tags.insert("correlation_id".to_string(), correlation_id.clone());
        }
        let trace_id = self
            .trace_id
            .or_else(|| telemetry_trace::span::get_current_span().map(|s| s.trace_id));
        if let Some(trace_id) = trace_id {
            tags.insert("trace_id".to_string(), format!("{trace_id:032x}"));
        }
        tags
    }
}

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<EnrichmentContext>> = const { RefCell::new(None) };
}

/// RAII guard installed by [`enrich`]; restores the previous thread-local
/// context (if any) when dropped.
pub struct EnrichmentGuard {
    previous: Option<EnrichmentContext>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for EnrichmentGuard {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|cell| {
            *cell.borrow_mut() = self.previous.take();
        });
    }
}

/// Installs `context` as the current enrichment context for this thread,
/// returning a guard that restores the previous context when dropped.
#[must_use]
pub fn enrich(context: EnrichmentContext) -> EnrichmentGuard {
    let previous = CURRENT_CONTEXT.with(|cell| cell.replace(Some(context)));
    EnrichmentGuard {
        previous,
        _not_send: std::marker::PhantomData,
    }
}

/// Returns a clone of the context currently active on this thread, if any.
#[must_use]
pub fn current() -> Option<EnrichmentContext> {
    CURRENT_CONTEXT.with(|cell| cell.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_context_by_default() {
        assert!(current().is_none());
    }

    #[test]
    fn enrich_installs_and_restores_on_drop() {
        {
            let _guard = enrich(EnrichmentContext::new().with_request_id("req-1"));
            assert_eq!(current().unwrap().request_id, Some("req-1".to_string()));
        }
        assert!(current().is_none());
    }

    #[test]
    fn nested_scopes_restore_outer_context() {
        let _outer = enrich(EnrichmentContext::new().with_request_id("outer"));
        {
            let _inner = enrich(EnrichmentContext::new().with_request_id("inner"));
            assert_eq!(current().unwrap().request_id, Some("inner".to_string()));
        }
        assert_eq!(current().unwrap().request_id, Some("outer".to_string()));
    }

    #[test]
    fn as_tags_includes_every_set_field_and_baggage() {
        let ctx = EnrichmentContext::new()
            .with_request_id("req-1")
            .with_correlation_id("corr-1")
            .with_trace_id(0xABCD)
            .with_baggage("tenant", "acme");
        let tags = ctx.as_tags();
        assert_eq!(tags.get("request_id"), Some(&"req-1".to_string()));
        assert_eq!(tags.get("correlation_id"), Some(&"corr-1".to_string()));
        assert_eq!(tags.get("trace_id"), Some(&format!("{:032x}", 0xABCDu128)));
        assert_eq!(tags.get("tenant"), Some(&"acme".to_string()));
    }

    #[test]
    fn as_tags_is_empty_for_a_bare_context() {
        assert!(EnrichmentContext::new().as_tags().is_empty());
    }
}
