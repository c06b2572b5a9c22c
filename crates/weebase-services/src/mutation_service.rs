//! Row mutation service
//!
//! Inserts, updates and deletes go through the safety-gated executor: the
//! policy is checked first, then keyed mutations must match exactly one row
//! inside the same transaction before they commit.

use weebase_core::executor::{MutationOutcome, execute_mutation};
use weebase_core::statement::{DeleteRequest, InsertRequest, MutationRequest, UpdateRequest};
use weebase_core::{Connection, SafetyPolicy};

use crate::error::ServiceResult;

/// Service for single-row mutations
#[derive(Debug, Clone, Default)]
pub struct MutationService;

impl MutationService {
    pub fn new() -> Self {
        Self
    }

    pub async fn insert_row(
        &self,
        conn: &dyn Connection,
        request: InsertRequest,
        policy: &SafetyPolicy,
        confirmed: bool,
    ) -> ServiceResult<MutationOutcome> {
        self.apply(conn, request.into(), policy, confirmed).await
    }

    pub async fn update_row(
        &self,
        conn: &dyn Connection,
        request: UpdateRequest,
        policy: &SafetyPolicy,
        confirmed: bool,
    ) -> ServiceResult<MutationOutcome> {
        self.apply(conn, request.into(), policy, confirmed).await
    }

    pub async fn delete_row(
        &self,
        conn: &dyn Connection,
        request: DeleteRequest,
        policy: &SafetyPolicy,
        confirmed: bool,
    ) -> ServiceResult<MutationOutcome> {
        self.apply(conn, request.into(), policy, confirmed).await
    }

    /// Run any mutation request
    pub async fn apply(
        &self,
        conn: &dyn Connection,
        request: MutationRequest,
        policy: &SafetyPolicy,
        confirmed: bool,
    ) -> ServiceResult<MutationOutcome> {
        let kind = request.kind();
        let outcome = execute_mutation(conn, &request, policy, confirmed)
            .await
            .inspect_err(|e| {
                if e.is_safety_violation() {
                    tracing::warn!(kind = kind.as_str(), error = %e, "mutation blocked");
                }
            })?;
        Ok(outcome)
    }
}
