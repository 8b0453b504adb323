//! Translation of raw gateway status codes into charge and refund statuses.
//!
//! Each gateway builds one immutable [`StatusMapper`] at construction. Some
//! codes only make sense relative to what the charge is doing right now (a
//! gateway "cancelled" report means user-cancelled, system-cancelled or
//! expired depending on which cancellation was submitted); those map to a
//! [`DeferredResolver`] that is applied against the current status.

use crate::charges::{ChargeStatus, RefundStatus, StatusFlow};
use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Copy)]
pub struct DeferredResolver {
    pub name: &'static str,
    resolve: fn(ChargeStatus) -> Option<ChargeStatus>,
}

impl DeferredResolver {
    pub const fn new(name: &'static str, resolve: fn(ChargeStatus) -> Option<ChargeStatus>) -> Self {
        Self { name, resolve }
    }

    pub fn resolve(&self, current: ChargeStatus) -> Option<ChargeStatus> {
        (self.resolve)(current)
    }
}

impl fmt::Debug for DeferredResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeferredResolver({})", self.name)
    }
}

impl PartialEq for DeferredResolver {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Settles a submitted cancellation into the terminal status of whichever
/// cancellation flow submitted it.
pub const CANCELLATION_RESOLVER: DeferredResolver =
    DeferredResolver::new("cancellation", StatusFlow::settle_submitted);

pub const CANCELLATION_FAILURE_RESOLVER: DeferredResolver =
    DeferredResolver::new("cancellation_failure", StatusFlow::fail_submitted);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusMapping {
    Charge(ChargeStatus),
    Refund(RefundStatus),
    Ignored,
    Deferred(DeferredResolver),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterpretedStatus {
    MappedCharge(ChargeStatus),
    MappedRefund(RefundStatus),
    /// Known to the gateway integration but deliberately not acted on.
    Ignored,
    Unknown,
    Deferred(DeferredResolver),
}

#[derive(Debug, Clone, Default)]
pub struct StatusMapper {
    mappings: HashMap<String, StatusMapping>,
}

impl StatusMapper {
    pub fn builder() -> StatusMapperBuilder {
        StatusMapperBuilder::default()
    }

    pub fn lookup(&self, raw: &str) -> InterpretedStatus {
        match self.mappings.get(raw.trim()) {
            Some(StatusMapping::Charge(status)) => InterpretedStatus::MappedCharge(*status),
            Some(StatusMapping::Refund(status)) => InterpretedStatus::MappedRefund(*status),
            Some(StatusMapping::Ignored) => InterpretedStatus::Ignored,
            Some(StatusMapping::Deferred(resolver)) => InterpretedStatus::Deferred(*resolver),
            None => InterpretedStatus::Unknown,
        }
    }

    /// Looks up `raw` and resolves deferred mappings against `current`. Never
    /// returns `Deferred`; a resolver with no answer yields `Unknown`.
    pub fn interpret(&self, raw: &str, current: ChargeStatus) -> InterpretedStatus {
        match self.lookup(raw) {
            InterpretedStatus::Deferred(resolver) => match resolver.resolve(current) {
                Some(status) => InterpretedStatus::MappedCharge(status),
                None => InterpretedStatus::Unknown,
            },
            other => other,
        }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct StatusMapperBuilder {
    mappings: HashMap<String, StatusMapping>,
}

impl StatusMapperBuilder {
    pub fn map(mut self, raw: &str, status: ChargeStatus) -> Self {
        self.mappings
            .insert(raw.to_string(), StatusMapping::Charge(status));
        self
    }

    pub fn map_refund(mut self, raw: &str, status: RefundStatus) -> Self {
        self.mappings
            .insert(raw.to_string(), StatusMapping::Refund(status));
        self
    }

    pub fn ignore(mut self, raw: &str) -> Self {
        self.mappings.insert(raw.to_string(), StatusMapping::Ignored);
        self
    }

    pub fn defer(mut self, raw: &str, resolver: DeferredResolver) -> Self {
        self.mappings
            .insert(raw.to_string(), StatusMapping::Deferred(resolver));
        self
    }

    pub fn build(self) -> StatusMapper {
        StatusMapper {
            mappings: self.mappings,
        }
    }
}
