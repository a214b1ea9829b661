//! In-memory invoice, bill and expense collaborator for tests and demos

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct DocumentState {
    open: Vec<(TenantId, OpenDocument)>,
    drafts: Vec<(Uuid, InvoiceDraft)>,
    by_key: HashMap<(TenantId, String), Uuid>,
    failing: bool,
}

/// Open documents plus the invoices created through [`InvoiceService`].
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocuments {
    state: Arc<RwLock<DocumentState>>,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open document and return its id
    pub fn add_open(
        &self,
        tenant_id: TenantId,
        kind: DocumentKind,
        party_name: &str,
        issue_date: NaiveDate,
        due_date: Option<NaiveDate>,
        amount_due: BigDecimal,
    ) -> Uuid {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let id = Uuid::new_v4();
        let number = format!("{}-{:04}", prefix(kind), state.open.len() + 1);
        state.open.push((
            tenant_id,
            OpenDocument {
                kind,
                id,
                number,
                party_name: party_name.to_string(),
                issue_date,
                due_date,
                total: amount_due.clone(),
                amount_due,
            },
        ));
        id
    }

    /// Mark a document fully paid so it no longer shows as open
    pub fn settle(&self, document_id: Uuid) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.open.retain(|(_, d)| d.id != document_id);
    }

    /// Invoices created so far, in creation order
    pub fn created_invoices(&self) -> Vec<(Uuid, InvoiceDraft)> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .drafts
            .clone()
    }

    /// Make every collaborator call fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).failing = failing;
    }
}

fn prefix(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Invoice => "INV",
        DocumentKind::Bill => "BILL",
        DocumentKind::Expense => "EXP",
    }
}

fn unavailable() -> LedgerError {
    LedgerError::Collaborator("document service unavailable".to_string())
}

#[async_trait]
impl DocumentDirectory for MemoryDocuments {
    async fn open_documents(
        &self,
        tenant_id: TenantId,
        kind: DocumentKind,
    ) -> LedgerResult<Vec<OpenDocument>> {
        let state = self
            .state
            .read()
            .map_err(|_| LedgerError::Storage("document lock poisoned".to_string()))?;
        if state.failing {
            return Err(unavailable());
        }
        Ok(state
            .open
            .iter()
            .filter(|(tenant, d)| *tenant == tenant_id && d.kind == kind)
            .map(|(_, d)| d.clone())
            .collect())
    }
}

#[async_trait]
impl InvoiceService for MemoryDocuments {
    async fn create_invoice(&self, draft: &InvoiceDraft) -> LedgerResult<Uuid> {
        let mut state = self
            .state
            .write()
            .map_err(|_| LedgerError::Storage("document lock poisoned".to_string()))?;
        if state.failing {
            return Err(unavailable());
        }
        let key = (draft.tenant_id, draft.idempotency_key.clone());
        if let Some(id) = state.by_key.get(&key) {
            return Ok(*id);
        }

        let id = Uuid::new_v4();
        let total: BigDecimal = draft
            .items
            .iter()
            .map(|item| &item.quantity * &item.unit_price)
            .sum();
        let number = format!("INV-{:04}", state.drafts.len() + 1);
        state.open.push((
            draft.tenant_id,
            OpenDocument {
                kind: DocumentKind::Invoice,
                id,
                number,
                party_name: draft.customer_name.clone(),
                issue_date: draft.issue_date,
                due_date: Some(draft.due_date),
                total: total.clone(),
                amount_due: total,
            },
        ));
        state.drafts.push((id, draft.clone()));
        state.by_key.insert(key, id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(tenant: TenantId, key: &str) -> InvoiceDraft {
        let date = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        InvoiceDraft {
            tenant_id: tenant,
            customer_id: Uuid::new_v4(),
            customer_name: "Acme".to_string(),
            issue_date: date,
            due_date: date,
            items: vec![InvoiceDraftItem {
                description: "Retainer".to_string(),
                quantity: BigDecimal::from(2),
                unit_price: BigDecimal::from(150),
                tax_code: None,
            }],
            notes: None,
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_invoice_is_idempotent() {
        let tenant = Uuid::new_v4();
        let documents = MemoryDocuments::new();
        let first = documents.create_invoice(&draft(tenant, "k1")).await.unwrap();
        let again = documents.create_invoice(&draft(tenant, "k1")).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(documents.created_invoices().len(), 1);

        let open = documents
            .open_documents(tenant, DocumentKind::Invoice)
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].amount_due, BigDecimal::from(300));
    }

    #[tokio::test]
    async fn test_failing_collaborator() {
        let documents = MemoryDocuments::new();
        documents.set_failing(true);
        let err = documents
            .open_documents(Uuid::new_v4(), DocumentKind::Bill)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "internal");
    }
}
