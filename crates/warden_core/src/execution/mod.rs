pub mod action_gate;

pub use action_gate::{
    ActionGateMetrics, ActionReject, ActionRejectReason, Admission, BackoffSignals,
    action_admitted_total, action_reject_total, admit_action,
};
