//! # Quota Store
//!
//! Boundary-only per §1 ("persistence of tenants/quotas/audit... consumed").
//! No teacher analogue — the teacher has rate limiting, not a tenant quota
//! concept — so this interface is grounded directly on the spec text rather
//! than an existing module.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub remaining: Option<i64>,
}

/// Consulted by the `PRE_INFER`-phase quota plugin; persistence of tenant
/// budgets lives outside this crate.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn check_and_consume(&self, tenant_id: &str, cost: i64) -> QuotaCheck;
    async fn remaining(&self, tenant_id: &str) -> Option<i64>;
}

/// Unlimited quota — the default when no store is injected.
#[derive(Default)]
pub struct UnlimitedQuotaStore;

#[async_trait]
impl QuotaStore for UnlimitedQuotaStore {
    async fn check_and_consume(&self, _tenant_id: &str, _cost: i64) -> QuotaCheck {
        QuotaCheck {
            allowed: true,
            remaining: None,
        }
    }

    async fn remaining(&self, _tenant_id: &str) -> Option<i64> {
        None
    }
}

/// Fixed-budget-per-tenant store for tests and simple single-process
/// deployments.
#[derive(Default)]
pub struct InMemoryQuotaStore {
    budgets: Mutex<HashMap<String, i64>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_budget(&self, tenant_id: impl Into<String>, budget: i64) {
        self.budgets.lock().unwrap().insert(tenant_id.into(), budget);
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn check_and_consume(&self, tenant_id: &str, cost: i64) -> QuotaCheck {
        let mut budgets = self.budgets.lock().unwrap();
        match budgets.get_mut(tenant_id) {
            Some(remaining) if *remaining >= cost => {
                *remaining -= cost;
                QuotaCheck {
                    allowed: true,
                    remaining: Some(*remaining),
                }
            }
            Some(remaining) => QuotaCheck {
                allowed: false,
                remaining: Some(*remaining),
            },
            None => QuotaCheck {
                allowed: true,
                remaining: None,
            },
        }
    }

    async fn remaining(&self, tenant_id: &str) -> Option<i64> {
        self.budgets.lock().unwrap().get(tenant_id).copied()
    }
}
