use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::auth::RequestOrigin;
use crate::db::{with_statement_timeout, DEFAULT_STATEMENT_TIMEOUT};
use crate::entities::audit_event;

/// Action tags written to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    OrderCreated,
    CodOrderCreated,
    PaymentVerified,
    PaymentVerificationFailed,
    OrderRollbackFailed,
    GatewayLinkFailed,
    SubscriptionRenewed,
    SubscriptionRenewalFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

/// One audit record before it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub actor_id: Option<Uuid>,
    pub action: AuditAction,
    pub severity: AuditSeverity,
    pub entity_type: &'static str,
    pub entity_id: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub origin: RequestOrigin,
    pub metadata: Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction, entity_type: &'static str) -> Self {
        Self {
            actor_id: None,
            action,
            severity: AuditSeverity::Info,
            entity_type,
            entity_id: None,
            old_values: None,
            new_values: None,
            origin: RequestOrigin::default(),
            metadata: json!({}),
        }
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn entity(mut self, entity_id: impl ToString) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn values(mut self, old_values: Option<Value>, new_values: Option<Value>) -> Self {
        self.old_values = old_values;
        self.new_values = new_values;
        self
    }

    pub fn origin(mut self, origin: &RequestOrigin) -> Self {
        self.origin = origin.clone();
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only audit trail. Recording is best-effort and never fails the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `audit_events` table.
#[derive(Debug, Clone)]
pub struct DatabaseAuditLogger {
    db: Arc<DatabaseConnection>,
    statement_timeout: Duration,
}

impl DatabaseAuditLogger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    pub fn with_statement_timeout(mut self, statement_timeout: Duration) -> Self {
        self.statement_timeout = statement_timeout;
        self
    }
}

#[async_trait]
impl AuditSink for DatabaseAuditLogger {
    #[instrument(skip(self, event), fields(action = %event.action, entity_id = ?event.entity_id))]
    async fn record(&self, event: AuditEvent) {
        let mut metadata = event.metadata;
        if let (Some(map), Some(request_id)) = (
            metadata.as_object_mut(),
            crate::tracing::current_request_id(),
        ) {
            map.entry("request_id")
                .or_insert_with(|| Value::String(request_id.to_string()));
        }

        if event.severity == AuditSeverity::Critical {
            warn!(action = %event.action, metadata = %metadata, "critical audit event");
        }

        let row = audit_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            actor_id: Set(event.actor_id),
            action: Set(event.action.to_string()),
            severity: Set(event.severity.to_string()),
            entity_type: Set(event.entity_type.to_string()),
            entity_id: Set(event.entity_id),
            old_values: Set(event.old_values),
            new_values: Set(event.new_values),
            ip_address: Set(event.origin.ip_address),
            user_agent: Set(event.origin.user_agent),
            metadata: Set(metadata),
            created_at: Set(Utc::now()),
        };

        let written =
            with_statement_timeout(self.statement_timeout, row.insert(self.db.as_ref())).await;
        if let Err(e) = written {
            error!(error = %e, action = %event.action, "failed to write audit event");
            counter!("checkout_audit_write_failures_total", 1);
        }
    }
}
