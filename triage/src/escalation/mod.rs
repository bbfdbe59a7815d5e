//! Escalation decisions.
//!
//! Evaluated after classification and again after the knowledge or account
//! stage. No handler calls happen here.

pub mod policy;

pub use policy::{
    EscalationDecision, EscalationPolicy, EscalationReason, PolicyConfig,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
