//! Distributed tracing support.
//!
//! # Responsibilities
//! - Extract trace context from incoming requests
//! - Open a span for the gateway hop, child of the caller's span when present
//! - Propagate trace context to upstream requests
//!
//! # Design Decisions
//! - Optional: handlers receive `Option<Arc<Tracer>>`, `None` disables it
//! - Supports Datadog and W3C Trace Context headers
//! - Best effort: malformed headers start a fresh trace, never fail a request

use std::fmt;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

pub const TRACEPARENT: HeaderName = HeaderName::from_static("traceparent");
pub const X_DATADOG_TRACE_ID: HeaderName = HeaderName::from_static("x-datadog-trace-id");
pub const X_DATADOG_PARENT_ID: HeaderName = HeaderName::from_static("x-datadog-parent-id");
pub const X_DATADOG_SAMPLING_PRIORITY: HeaderName = HeaderName::from_static("x-datadog-sampling-priority");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("malformed {header} header: {reason}")]
    Malformed { header: &'static str, reason: String },
}

impl TraceError {
    fn malformed(header: &'static str, reason: impl Into<String>) -> Self {
        TraceError::Malformed {
            header,
            reason: reason.into(),
        }
    }
}

/// Header format used on both sides of the hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PropagationStyle {
    Datadog,
    W3c,
    #[value(name = "none")]
    Disabled,
}

/// 128-bit trace identifier. Datadog headers carry the low 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub u128);

impl TraceId {
    pub fn random() -> Self {
        Self(fastrand::u128(1..))
    }

    pub fn low_u64(&self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// 64-bit span identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

impl SpanId {
    pub fn random() -> Self {
        Self(fastrand::u64(1..))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
}

impl SpanContext {
    pub fn root() -> Self {
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            sampled: true,
        }
    }

    /// A new span in the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            sampled: self.sampled,
        }
    }
}

/// Reads and writes span context on HTTP headers.
pub trait Propagator: Send + Sync + fmt::Debug {
    /// `Ok(None)` when the carrier holds no context at all.
    fn extract(&self, headers: &HeaderMap) -> Result<Option<SpanContext>, TraceError>;

    fn inject(&self, context: &SpanContext, headers: &mut HeaderMap);

    /// Header names this propagator owns.
    fn fields(&self) -> &'static [&'static str];
}

/// W3C Trace Context (`traceparent`).
#[derive(Debug, Default)]
pub struct W3CPropagator;

impl W3CPropagator {
    /// `{version}-{trace-id}-{parent-id}-{trace-flags}`
    pub fn parse_traceparent(value: &str) -> Result<SpanContext, TraceError> {
        const HEADER: &str = "traceparent";

        let parts: Vec<&str> = value.trim().split('-').collect();
        if parts.len() < 4 {
            return Err(TraceError::malformed(HEADER, "expected 4 fields"));
        }
        let version = hex_field(parts[0], 2).ok_or_else(|| TraceError::malformed(HEADER, "bad version"))?;
        if version == "ff" {
            return Err(TraceError::malformed(HEADER, "version ff is invalid"));
        }
        if version == "00" && parts.len() != 4 {
            return Err(TraceError::malformed(HEADER, "version 00 takes exactly 4 fields"));
        }

        let trace_id = hex_field(parts[1], 32)
            .and_then(|h| u128::from_str_radix(h, 16).ok())
            .filter(|id| *id != 0)
            .ok_or_else(|| TraceError::malformed(HEADER, "bad trace id"))?;
        let span_id = hex_field(parts[2], 16)
            .and_then(|h| u64::from_str_radix(h, 16).ok())
            .filter(|id| *id != 0)
            .ok_or_else(|| TraceError::malformed(HEADER, "bad parent id"))?;
        let flags = hex_field(parts[3], 2)
            .and_then(|h| u8::from_str_radix(h, 16).ok())
            .ok_or_else(|| TraceError::malformed(HEADER, "bad trace flags"))?;

        Ok(SpanContext {
            trace_id: TraceId(trace_id),
            span_id: SpanId(span_id),
            sampled: flags & 0x01 == 0x01,
        })
    }

    pub fn format_traceparent(context: &SpanContext) -> String {
        format!(
            "00-{}-{}-{:02x}",
            context.trace_id,
            context.span_id,
            u8::from(context.sampled)
        )
    }
}

impl Propagator for W3CPropagator {
    fn extract(&self, headers: &HeaderMap) -> Result<Option<SpanContext>, TraceError> {
        let Some(value) = headers.get(TRACEPARENT) else {
            return Ok(None);
        };
        let value = value
            .to_str()
            .map_err(|_| TraceError::malformed("traceparent", "not visible ASCII"))?;
        Self::parse_traceparent(value).map(Some)
    }

    fn inject(&self, context: &SpanContext, headers: &mut HeaderMap) {
        match HeaderValue::try_from(Self::format_traceparent(context)) {
            Ok(value) => {
                headers.insert(TRACEPARENT, value);
            }
            Err(e) => tracing::debug!(error = %e, "Failed to encode traceparent"),
        }
    }

    fn fields(&self) -> &'static [&'static str] {
        &["traceparent"]
    }
}

/// Datadog headers (`x-datadog-trace-id`, `x-datadog-parent-id`).
#[derive(Debug, Default)]
pub struct DatadogPropagator;

impl DatadogPropagator {
    fn decimal(headers: &HeaderMap, name: HeaderName, header: &'static str) -> Result<Option<u64>, TraceError> {
        let Some(value) = headers.get(name) else {
            return Ok(None);
        };
        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|id| *id != 0)
            .map(Some)
            .ok_or_else(|| TraceError::malformed(header, "expected a non-zero unsigned integer"))
    }
}

impl Propagator for DatadogPropagator {
    fn extract(&self, headers: &HeaderMap) -> Result<Option<SpanContext>, TraceError> {
        let trace_id = Self::decimal(headers, X_DATADOG_TRACE_ID, "x-datadog-trace-id")?;
        let parent_id = Self::decimal(headers, X_DATADOG_PARENT_ID, "x-datadog-parent-id")?;

        let (trace_id, parent_id) = match (trace_id, parent_id) {
            (None, None) => return Ok(None),
            (Some(t), Some(p)) => (t, p),
            (Some(_), None) => return Err(TraceError::malformed("x-datadog-parent-id", "missing")),
            (None, Some(_)) => return Err(TraceError::malformed("x-datadog-trace-id", "missing")),
        };

        // Priority <= 0 means the caller dropped the trace.
        let sampled = headers
            .get(X_DATADOG_SAMPLING_PRIORITY)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i32>().ok())
            .map_or(true, |priority| priority > 0);

        Ok(Some(SpanContext {
            trace_id: TraceId(u128::from(trace_id)),
            span_id: SpanId(parent_id),
            sampled,
        }))
    }

    fn inject(&self, context: &SpanContext, headers: &mut HeaderMap) {
        headers.insert(X_DATADOG_TRACE_ID, HeaderValue::from(context.trace_id.low_u64()));
        headers.insert(X_DATADOG_PARENT_ID, HeaderValue::from(context.span_id.0));
        headers.insert(
            X_DATADOG_SAMPLING_PRIORITY,
            HeaderValue::from_static(if context.sampled { "1" } else { "0" }),
        );
    }

    fn fields(&self) -> &'static [&'static str] {
        &["x-datadog-trace-id", "x-datadog-parent-id", "x-datadog-sampling-priority"]
    }
}

fn hex_field(s: &str, len: usize) -> Option<&str> {
    (s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))).then_some(s)
}

/// The gateway's span for one request.
#[derive(Debug, Clone)]
pub struct Hop {
    context: SpanContext,
    parent: Option<SpanId>,
    span: tracing::Span,
}

impl Hop {
    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    /// Span id of the caller, when the request arrived with trace context.
    pub fn parent(&self) -> Option<SpanId> {
        self.parent
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Starts hop spans and carries their context to the upstream.
#[derive(Debug)]
pub struct Tracer {
    service: String,
    propagator: Box<dyn Propagator>,
}

impl Tracer {
    pub fn new(service: impl Into<String>, propagator: Box<dyn Propagator>) -> Self {
        Self {
            service: service.into(),
            propagator,
        }
    }

    /// `None` for [`PropagationStyle::Disabled`].
    pub fn from_style(service: impl Into<String>, style: PropagationStyle) -> Option<Self> {
        let propagator: Box<dyn Propagator> = match style {
            PropagationStyle::Datadog => Box::new(DatadogPropagator),
            PropagationStyle::W3c => Box::new(W3CPropagator),
            PropagationStyle::Disabled => return None,
        };
        Some(Self::new(service, propagator))
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Service name for a sub-operation, e.g. `dogfood-gateway.ratelimit`.
    pub fn service_with_suffix(&self, suffix: &str) -> String {
        format!("{}{}", self.service, suffix)
    }

    /// Open the span for this hop.
    pub fn start_hop(&self, headers: &HeaderMap, resource: &str) -> Hop {
        let (context, parent) = match self.propagator.extract(headers) {
            Ok(Some(remote)) => (remote.child(), Some(remote.span_id)),
            Ok(None) => (SpanContext::root(), None),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring inbound trace context");
                (SpanContext::root(), None)
            }
        };

        let span = tracing::info_span!(
            "gateway.request",
            service = %self.service,
            resource = %resource,
            trace_id = %context.trace_id,
            dd.trace_id = context.trace_id.low_u64(),
            dd.span_id = context.span_id.0,
            dd.parent_id = parent.map(|p| p.0),
        );

        Hop { context, parent, span }
    }

    /// Write the hop's context onto outbound headers, replacing whatever the
    /// caller sent.
    pub fn inject(&self, hop: &Hop, headers: &mut HeaderMap) {
        self.propagator.inject(&hop.context, headers);
    }
}
