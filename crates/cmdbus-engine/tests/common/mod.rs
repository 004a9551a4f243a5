//! Shared fixtures: a small `widgets` domain over the in-memory unit of work

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use cmdbus_core::action_log::{LogEntryMetadata, LogPayload};
use cmdbus_core::collaborators::{
    transactional, CacheInvalidation, CacheInvalidator, UnitOfWorkProvider,
};
use cmdbus_core::context::{AuthContext, ExecutionContext, ServiceContainer};
use cmdbus_core::errors::{ExError, ExErrorKind, Result};
use cmdbus_core::registry::{parse_input, CommandDescriptor, CommandRegistry};
use cmdbus_engine::{Engine, EngineConfig};
use cmdbus_store::MemoryUnitOfWork;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

pub const KIND: &str = "widgets";

/// Records every invalidation it receives
#[derive(Default)]
pub struct RecordingCache {
    pub seen: Mutex<Vec<CacheInvalidation>>,
}

impl RecordingCache {
    pub fn with_reason(&self, reason: &str) -> Vec<CacheInvalidation> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.reason == reason)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl CacheInvalidator for RecordingCache {
    fn invalidate(&self, invalidation: &CacheInvalidation) -> Result<()> {
        self.seen.lock().unwrap().push(invalidation.clone());
        Ok(())
    }
}

/// Always fails
pub struct BrokenCache;

impl CacheInvalidator for BrokenCache {
    fn invalidate(&self, _invalidation: &CacheInvalidation) -> Result<()> {
        Err(ExError::new(ExErrorKind::Io).with_message("cache cluster unreachable"))
    }
}

pub struct Harness {
    pub engine: Engine,
    pub entities: MemoryUnitOfWork,
    pub cache: Arc<RecordingCache>,
    container: Arc<ServiceContainer>,
}

impl Harness {
    pub fn ctx(&self, actor: &str) -> ExecutionContext {
        ExecutionContext::new(
            self.container.clone(),
            AuthContext::new(actor)
                .with_tenant("t1")
                .with_organization("org-1")
                .with_roles(["editor"]),
        )
    }

    pub fn widget(&self, id: &str) -> Option<Value> {
        self.entities.get(KIND, id).unwrap()
    }
}

pub fn setup() -> Harness {
    setup_with_cache(None)
}

/// Engine over an in-memory store with the widget commands registered
pub fn setup_with_cache(cache: Option<Arc<dyn CacheInvalidator>>) -> Harness {
    let entities = MemoryUnitOfWork::new();
    let mut container = ServiceContainer::new();
    container.insert::<Arc<dyn UnitOfWorkProvider>>(Arc::new(entities.clone()));

    let registry = Arc::new(CommandRegistry::new());
    register_widget_commands(&registry);

    let recording = Arc::new(RecordingCache::default());
    let engine = Engine::builder(EngineConfig::default())
        .registry(registry)
        .cache(cache.unwrap_or_else(|| recording.clone() as Arc<dyn CacheInvalidator>))
        .build()
        .expect("engine builds");

    Harness {
        engine,
        entities,
        cache: recording,
        container: Arc::new(container),
    }
}

fn provider(ctx: &ExecutionContext) -> Result<Arc<dyn UnitOfWorkProvider>> {
    Ok(ctx.container.require::<Arc<dyn UnitOfWorkProvider>>()?.clone())
}

fn load(ctx: &ExecutionContext, id: &str) -> Result<Option<Value>> {
    provider(ctx)?.fork().find(KIND, id)
}

fn stamp() -> Value {
    json!(chrono::Utc::now().to_rfc3339())
}

#[derive(Debug, Deserialize)]
struct CreateWidget {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateWidget {
    id: String,
    name: Option<String>,
    custom_fields: Option<Map<String, Value>>,
}

pub fn register_widget_commands(registry: &CommandRegistry) {
    // Create: explicit build_log with an undo envelope and redo input.
    registry.register(
        CommandDescriptor::new("widgets.create", |input, ctx| {
            let cmd: CreateWidget = parse_input(input)?;
            let provider = provider(ctx)?;
            transactional(provider.as_ref(), |uow| {
                uow.create(
                    KIND,
                    &cmd.id,
                    json!({"id": cmd.id, "name": cmd.name, "customFields": {}, "updatedAt": stamp()}),
                )
            })?;
            Ok(json!({"id": cmd.id}))
        })
        .with_capture_after(|_input, result, ctx| {
            let id = result["id"].as_str().unwrap_or_default();
            load(ctx, id)
        })
        .with_build_log(|args| {
            let id = args.result["id"].as_str().unwrap_or_default();
            Ok(LogEntryMetadata::new()
                .with_resource(KIND, id)
                .with_payload(
                    LogPayload::undo(json!({"after": args.snapshots.after}))?
                        .with_redo_input(args.input.clone()),
                ))
        })
        .with_undo(|args| {
            let id = args
                .payload
                .and_then(|p| p.after())
                .and_then(|after| after["id"].as_str())
                .ok_or_else(|| ExError::validation("undo payload has no widget id"))?
                .to_string();
            let provider = provider(args.ctx)?;
            transactional(provider.as_ref(), |uow| uow.remove(KIND, &id).map(|_| ()))
        }),
    );

    // Update: no build_log; relies on snapshot fallback and derived redo input.
    registry.register(
        CommandDescriptor::new("widgets.update", |input, ctx| {
            let cmd: UpdateWidget = parse_input(input)?;
            let provider = provider(ctx)?;
            transactional(provider.as_ref(), |uow| {
                let mut widget = uow
                    .find(KIND, &cmd.id)?
                    .ok_or_else(|| ExError::validation(format!("widget {} not found", cmd.id)))?;
                if let Some(name) = &cmd.name {
                    widget["name"] = json!(name);
                }
                if let Some(fields) = &cmd.custom_fields {
                    for (key, value) in fields {
                        widget["customFields"][key] = value.clone();
                    }
                }
                widget["updatedAt"] = stamp();
                uow.persist(KIND, &cmd.id, widget)
            })?;
            Ok(json!({"id": cmd.id}))
        })
        .with_prepare(|input, ctx| {
            let id = input["id"].as_str().unwrap_or_default();
            load(ctx, id)
        })
        .with_capture_after(|_input, result, ctx| {
            let id = result["id"].as_str().unwrap_or_default();
            load(ctx, id)
        })
        .with_undo(|args| {
            let before = args
                .payload
                .and_then(|p| p.before())
                .cloned()
                .ok_or_else(|| ExError::validation("undo payload has no before state"))?;
            let id = args.log_entry.resource_id.clone().unwrap_or_default();
            let provider = provider(args.ctx)?;
            transactional(provider.as_ref(), |uow| uow.persist(KIND, &id, before))
        })
        .with_cache_tags(["widget-list"]),
    );

    // Touch: undoable, but records no redo input and is not an update.
    registry.register(
        CommandDescriptor::new("widgets.touch", |input, ctx| {
            let id = input["id"].as_str().unwrap_or_default().to_string();
            let provider = provider(ctx)?;
            transactional(provider.as_ref(), |uow| {
                let mut widget = uow
                    .find(KIND, &id)?
                    .ok_or_else(|| ExError::validation("widget not found"))?;
                widget["touched"] = json!(true);
                uow.persist(KIND, &id, widget)
            })?;
            Ok(json!(id))
        })
        .with_undo(|_args| Ok(())),
    );

    // Archive: no undo handler at all.
    registry.register(CommandDescriptor::new("widgets.archive", |input, _ctx| {
        Ok(json!({"id": input["id"]}))
    }));
}
