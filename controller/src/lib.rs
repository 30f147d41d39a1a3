pub mod backfill;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod index;
pub mod readiness;
pub mod reconciler;
pub mod remover;

#[cfg(test)]
mod test_util;

pub use crate::reconciler::StartupReconciler;
