//! Execution context passed through every command stage
//!
//! Handlers receive the context by shared reference and never mutate it.
//! Collaborators (unit of work provider, domain services) are resolved from
//! the typed [`ServiceContainer`] it carries.

use crate::errors::{CommandError, ExError, Result};
use cmdbus_core_types::RequestContext;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Authenticated principal on whose behalf a command runs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthContext {
    /// Actor user id (`sub`)
    pub subject: String,
    pub tenant_id: Option<String>,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..Self::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// Organization visibility resolved for the actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrganizationScope {
    /// Every organization of the tenant
    All,
    /// An explicit subset of organizations
    Restricted { organization_ids: Vec<String> },
}

/// Typed service container
///
/// Keyed by the stored value's type. Trait objects are stored behind an
/// `Arc`, e.g. `container.insert::<Arc<dyn UnitOfWorkProvider>>(provider)`.
#[derive(Default)]
pub struct ServiceContainer {
    services: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous value of the same type
    pub fn insert<T: Any + Send + Sync>(&mut self, service: T) -> &mut Self {
        self.services.insert(TypeId::of::<T>(), Box::new(service));
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|s| s.downcast_ref::<T>())
    }

    /// Resolve a service or fail with a configuration error naming its type
    pub fn require<T: Any + Send + Sync>(&self) -> Result<&T> {
        self.get::<T>().ok_or_else(|| {
            CommandError::MissingService {
                service: type_name::<T>().to_string(),
            }
            .into()
        })
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.services.len())
            .finish()
    }
}

/// Context for one command execution
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub container: Arc<ServiceContainer>,
    pub auth: AuthContext,
    pub organization_scope: Option<OrganizationScope>,
    pub selected_organization_id: Option<String>,
    pub organization_ids: Option<Vec<String>>,
    pub request: Option<RequestContext>,
}

impl ExecutionContext {
    pub fn new(container: Arc<ServiceContainer>, auth: AuthContext) -> Self {
        Self {
            container,
            auth,
            organization_scope: None,
            selected_organization_id: None,
            organization_ids: None,
            request: None,
        }
    }

    pub fn with_selected_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.selected_organization_id = Some(organization_id.into());
        self
    }

    pub fn with_organization_scope(mut self, scope: OrganizationScope) -> Self {
        if let OrganizationScope::Restricted { organization_ids } = &scope {
            self.organization_ids = Some(organization_ids.clone());
        }
        self.organization_scope = Some(scope);
        self
    }

    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = Some(request);
        self
    }

    pub fn actor(&self) -> &str {
        &self.auth.subject
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.auth.tenant_id.as_deref()
    }

    /// Organization the command acts in: the selected one, else the actor's home
    pub fn effective_organization_id(&self) -> Option<&str> {
        self.selected_organization_id
            .as_deref()
            .or(self.auth.organization_id.as_deref())
    }

    /// Whether the context may see records of `organization_id`
    pub fn can_access_organization(&self, organization_id: Option<&str>) -> bool {
        match (&self.organization_scope, organization_id) {
            (_, None) | (None, _) | (Some(OrganizationScope::All), _) => true,
            (Some(OrganizationScope::Restricted { organization_ids }), Some(org)) => {
                organization_ids.iter().any(|o| o == org)
            }
        }
    }

    /// Stamp the request's correlation ids onto an error that lacks them
    pub fn correlate(&self, err: ExError) -> ExError {
        let Some(request) = &self.request else {
            return err;
        };
        let err = if err.request_id().is_none() {
            err.with_request_id(request.request_id.clone())
        } else {
            err
        };
        match &request.trace_id {
            Some(trace_id) if err.trace_id().is_none() => err.with_trace_id(trace_id.clone()),
            _ => err,
        }
    }

    /// Snapshot persisted as `context_json` on every action log entry
    pub fn audit_json(&self) -> Value {
        json!({
            "subject": self.auth.subject,
            "tenantId": self.auth.tenant_id,
            "organizationId": self.auth.organization_id,
            "selectedOrganizationId": self.selected_organization_id,
            "organizationIds": self.organization_ids,
            "roles": self.auth.roles,
            "requestId": self.request.as_ref().map(|r| r.request_id.to_string()),
            "source": self.request.as_ref().and_then(|r| r.source.clone()),
        })
    }
}
