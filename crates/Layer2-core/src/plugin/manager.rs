//! Plugin Manager - 플러그인 라이프사이클 관리
//!
//! - 매니페스트/팩토리 등록 (팩토리 조회 테이블)
//! - 의존성 검사 후 로드, 샌드박스 안에서 초기화
//! - 훅/capability 실행과 실행 통계
//! - 의존성 역순 언로드
//!
//! 초기화 중 실패하면 레지스트리와 의존성 그래프에서 완전히 제거됩니다.

use super::comm::{capability_handler_fn, CapabilityRegistration, CommunicationBus};
use super::discovery::{DiscoveredPlugin, PluginDiscovery};
use super::events::{EventBus, EventType};
use super::manifest::PluginManifest;
use super::registry::{PluginMetadata, PluginMetrics, PluginRegistry, PluginRegistryEntry};
use super::resolver::{DependencyResolver, GraphValidation};
use super::sandbox::Sandbox;
use super::traits::{exposes, hook_method_name, Plugin, PluginContext, PluginFactory, PluginState};
use crate::api::{
    ApiGuard, GraphApi, GraphStore, InMemoryGraphStore, InMemoryMemoryStore, MemoryApi,
    MemoryStore, PluginLogger, StorageApi,
};
use mnemos_foundation::{AuditLog, Error, PermissionSet, Result, RuntimeConfig};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

// ============================================================================
// RuntimeServices - 런타임이 소유하는 공유 서비스
// ============================================================================

/// 매니저가 플러그인 컨텍스트에 바인딩하는 서비스 묶음
#[derive(Clone)]
pub struct RuntimeServices {
    pub events: Arc<EventBus>,
    pub messages: Arc<CommunicationBus>,
    pub memory_store: Arc<dyn MemoryStore>,
    pub graph_store: Arc<dyn GraphStore>,
    pub audit: Arc<AuditLog>,
}

impl RuntimeServices {
    /// 메모리 기반 저장소로 구성
    pub fn in_memory(config: &RuntimeConfig) -> Self {
        Self {
            events: Arc::new(EventBus::with_settings(config.event_bus.clone())),
            messages: Arc::new(CommunicationBus::with_settings(config.messaging.clone())),
            memory_store: Arc::new(InMemoryMemoryStore::new()),
            graph_store: Arc::new(InMemoryGraphStore::new()),
            audit: Arc::new(AuditLog::new()),
        }
    }
}

// ============================================================================
// 옵션/결과 타입
// ============================================================================

/// `load_plugin` 옵션
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// false면 LOADED 상태로 등록만 함
    pub enabled: bool,

    /// 매니페스트 기본 설정 위에 덮어쓸 값
    pub config: Option<Map<String, Value>>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            config: None,
        }
    }
}

impl LoadOptions {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: None,
        }
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = Some(config);
        self
    }
}

/// 로드/언로드/활성화 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginOperationResult {
    pub plugin_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<PluginState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginOperationResult {
    fn ok(plugin_id: &str, state: Option<PluginState>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            success: true,
            state,
            error: None,
        }
    }

    fn failed(plugin_id: &str, error: &Error) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            success: false,
            state: None,
            error: Some(error.to_string()),
        }
    }
}

/// 플러그인 하나의 훅 실행 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResult {
    pub plugin_id: String,
    pub success: bool,
    pub proceed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifications: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// capability 직접 실행 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityExecution {
    pub plugin_id: String,
    pub capability: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// `initialize()` 결과
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReport {
    pub discovered: usize,
    pub loaded: Vec<String>,
    /// (플러그인 ID, 에러)
    pub failed: Vec<(String, String)>,
}

// ============================================================================
// PluginManager
// ============================================================================

/// 플러그인 매니저 - 전체 플러그인 시스템 관리
pub struct PluginManager {
    config: RuntimeConfig,
    services: RuntimeServices,

    /// 로드된 플러그인
    registry: PluginRegistry,

    /// 로드된 플러그인의 의존성 그래프
    resolver: Mutex<DependencyResolver>,

    /// 로드 가능한 매니페스트 (발견 또는 직접 등록)
    manifests: RwLock<HashMap<String, PluginManifest>>,

    /// 플러그인 ID → 팩토리
    factories: RwLock<HashMap<String, Arc<dyn PluginFactory>>>,
}

impl PluginManager {
    /// 메모리 기반 서비스로 생성
    pub fn new(config: RuntimeConfig) -> Self {
        let services = RuntimeServices::in_memory(&config);
        Self::with_services(config, services)
    }

    /// 외부 서비스(저장소/버스)와 함께 생성
    pub fn with_services(config: RuntimeConfig, services: RuntimeServices) -> Self {
        Self {
            config,
            services,
            registry: PluginRegistry::new(),
            resolver: Mutex::new(DependencyResolver::new()),
            manifests: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.services.events
    }

    pub fn communication_bus(&self) -> &Arc<CommunicationBus> {
        &self.services.messages
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.services.audit
    }

    // ========================================================================
    // 시스템 시작/종료
    // ========================================================================

    /// 시스템 시작: 디렉토리 검색 후 신뢰 플러그인 자동 로드
    pub async fn initialize(&self) -> InitReport {
        let mut report = InitReport::default();

        if self.config.plugins.auto_discover {
            report.discovered = self.discover_plugins().await.len();
        }

        self.services
            .events
            .emit(EventType::SystemStartup, json!({ "trusted": self.config.plugins.trusted }))
            .await;

        for id in self.trusted_load_order() {
            let result = self.load_plugin(&id, LoadOptions::default()).await;
            if result.success {
                report.loaded.push(id);
            } else {
                let message = result.error.unwrap_or_default();
                warn!(plugin_id = %id, error = %message, "Failed to auto-load trusted plugin");
                report.failed.push((id, message));
            }
        }

        info!(
            discovered = report.discovered,
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Plugin manager initialized"
        );
        report
    }

    /// 신뢰 플러그인을 의존성 순서로 정렬 (매니페스트 없는 ID는 그대로 실패 처리)
    fn trusted_load_order(&self) -> Vec<String> {
        let trusted = &self.config.plugins.trusted;
        let manifests = self.manifests.read();

        let mut planner = DependencyResolver::new();
        for id in trusted {
            if let Some(manifest) = manifests.get(id) {
                if let Err(e) = planner.add_plugin(id, Some(&manifest.version), &manifest.dependencies) {
                    warn!(plugin_id = %id, error = %e, "Trusted plugin rejected by dependency planner");
                }
            }
        }

        let known: Vec<String> = trusted.iter().filter(|id| planner.contains(id)).cloned().collect();
        let mut order = planner.get_load_order(Some(&known)).unwrap_or(known);
        order.extend(trusted.iter().filter(|id| !planner.contains(id)).cloned());
        order
    }

    /// 시스템 종료: 모든 플러그인을 의존성 역순으로 언로드
    pub async fn shutdown(&self) {
        self.services
            .events
            .emit(EventType::SystemShutdown, json!({}))
            .await;

        let planned = self.resolver.lock().get_unload_order(None);
        let order = match planned {
            Ok(order) => order,
            Err(e) => {
                error!(error = %e, "Dependency graph is inconsistent, unloading in reverse load order");
                Vec::new()
            }
        };
        let order = if order.is_empty() {
            let mut fallback = self.registry.load_order().await;
            fallback.reverse();
            fallback
        } else {
            order
        };

        for id in order {
            let result = self.unload_plugin(&id).await;
            if !result.success {
                warn!(plugin_id = %id, error = ?result.error, "Failed to unload plugin during shutdown");
            }
        }

        info!("Plugin manager shut down");
    }

    // ========================================================================
    // 매니페스트/팩토리 등록
    // ========================================================================

    /// 설정된 디렉토리에서 매니페스트 발견 후 등록
    pub async fn discover_plugins(&self) -> Vec<DiscoveredPlugin> {
        let discovered = PluginDiscovery::from_settings(&self.config.plugins)
            .discover_plugins()
            .await;

        for plugin in &discovered {
            if let Err(e) = self.register_manifest(plugin.manifest.clone()) {
                warn!(plugin_id = %plugin.manifest.id(), error = %e, "Ignoring discovered plugin");
            }
        }

        discovered
    }

    /// 매니페스트 등록 (검증 실패 시 거부)
    pub fn register_manifest(&self, manifest: PluginManifest) -> Result<()> {
        manifest.validate()?;
        debug!(plugin_id = %manifest.id(), version = %manifest.version, "register manifest");
        self.manifests
            .write()
            .insert(manifest.id().to_string(), manifest);
        Ok(())
    }

    /// 팩토리 등록
    pub fn register_factory(&self, id: impl Into<String>, factory: Arc<dyn PluginFactory>) {
        let id = id.into();
        debug!(plugin_id = %id, "register factory");
        self.factories.write().insert(id, factory);
    }

    /// 매니페스트와 팩토리 함께 등록
    pub fn register(&self, manifest: PluginManifest, factory: Arc<dyn PluginFactory>) -> Result<()> {
        let id = manifest.id().to_string();
        self.register_manifest(manifest)?;
        self.register_factory(id, factory);
        Ok(())
    }

    pub fn manifest(&self, id: &str) -> Option<PluginManifest> {
        self.manifests.read().get(id).cloned()
    }

    // ========================================================================
    // 로드
    // ========================================================================

    /// 플러그인 로드
    pub async fn load_plugin(&self, id: &str, options: LoadOptions) -> PluginOperationResult {
        info!(plugin_id = %id, enabled = options.enabled, "Loading plugin");

        match self.try_load(id, options).await {
            Ok(state) => {
                info!(plugin_id = %id, state = %state, "Plugin loaded");
                PluginOperationResult::ok(id, Some(state))
            }
            Err(e) => {
                warn!(plugin_id = %id, error = %e, "Failed to load plugin");
                PluginOperationResult::failed(id, &e)
            }
        }
    }

    async fn try_load(&self, id: &str, options: LoadOptions) -> Result<PluginState> {
        if self.registry.contains(id).await {
            return Err(Error::AlreadyExists(format!("Plugin '{}' is already loaded", id)));
        }

        let manifest = self
            .manifest(id)
            .ok_or_else(|| Error::NotFound(format!("No manifest registered for plugin '{}'", id)))?;
        manifest.validate()?;

        let factory = self
            .factories
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No factory registered for plugin '{}'", id)))?;

        // 의존성 검사 (실패 시 아무것도 등록하지 않음)
        let present = {
            let resolver = self.resolver.lock();
            let check = resolver.check_dependencies(id, &manifest.dependencies);
            for optional in &check.optional_missing {
                warn!(plugin_id = %id, dependency = %optional, "Optional dependency not loaded");
            }
            if let Some(e) = check.into_error(id) {
                return Err(e);
            }
            manifest
                .dependencies
                .iter()
                .filter(|d| resolver.contains(&d.name))
                .map(|d| d.name.clone())
                .collect::<Vec<_>>()
        };

        let limits = manifest
            .resource_limits
            .clone()
            .unwrap_or_else(|| self.config.plugins.default_limits.clone());
        let entry = PluginRegistryEntry::new(
            manifest.clone(),
            factory,
            Sandbox::new(id, limits),
            present,
        );

        self.registry.register(entry).await?;
        let added = self
            .resolver
            .lock()
            .add_plugin(id, Some(&manifest.version), &manifest.dependencies);
        if let Err(e) = added {
            self.registry.unregister(id).await;
            return Err(e);
        }

        if !options.enabled {
            return Ok(PluginState::Loaded);
        }

        if let Err(e) = self.activate(id, options.config).await {
            self.fail_initialize(id, &e).await;
            return Err(e);
        }

        Ok(PluginState::Active)
    }

    /// 인스턴스 생성 → 컨텍스트 구성 → 샌드박스 초기화 → ACTIVE
    async fn activate(&self, id: &str, overrides: Option<Map<String, Value>>) -> Result<()> {
        let (manifest, factory, sandbox, permissions) = self
            .registry
            .inspect(id, |e| {
                (
                    e.manifest.clone(),
                    Arc::clone(&e.factory),
                    e.sandbox.clone(),
                    e.permissions.clone(),
                )
            })
            .await
            .ok_or_else(|| Error::NotFound(format!("Plugin '{}' is not loaded", id)))?;

        self.registry.set_state(id, PluginState::Initializing).await;

        let instance = factory.create()?;

        for capability in &manifest.capabilities {
            if !exposes(instance.as_ref(), &capability.name) {
                return Err(Error::Plugin(format!(
                    "Plugin '{}' declares capability '{}' but does not expose it",
                    id, capability.name
                )));
            }
        }
        for hook in &manifest.hooks {
            let method = hook_method_name(hook);
            if !exposes(instance.as_ref(), &method) {
                warn!(plugin_id = %id, hook = %hook, method = %method, "Declared hook has no handler method");
            }
        }

        let mut config = manifest.config.clone();
        if let Some(overrides) = overrides {
            config.extend(overrides);
        }
        let context = Arc::new(self.build_context(id, &manifest, &sandbox, permissions, config).await?);

        let init_timeout = self.config.plugins.init_timeout();
        if let Err(e) = sandbox
            .run_with_timeout("initialize", init_timeout, instance.initialize(Arc::clone(&context)))
            .await
        {
            self.registry.set_state(id, PluginState::Error).await;
            return Err(e);
        }

        self.registry
            .update(id, |e| {
                e.instance = Some(Arc::clone(&instance));
                e.context = Some(context);
                e.state = PluginState::Active;
            })
            .await;

        self.register_capabilities(id, &manifest, &instance)?;

        self.services
            .events
            .emit(
                EventType::PluginLoaded,
                json!({ "pluginId": id, "version": manifest.version.to_string() }),
            )
            .await;
        Ok(())
    }

    async fn build_context(
        &self,
        id: &str,
        manifest: &PluginManifest,
        sandbox: &Sandbox,
        permissions: PermissionSet,
        config: Map<String, Value>,
    ) -> Result<PluginContext> {
        let guard = ApiGuard::new(id, permissions.clone(), Arc::clone(&self.services.audit));

        let quota = self.config.storage.quota_bytes;
        let storage = match &self.config.storage.persist_dir {
            Some(dir) => StorageApi::open(guard.clone(), quota, dir).await?,
            None => StorageApi::with_quota(guard.clone(), quota),
        };

        debug!(
            plugin_id = %id,
            version = %manifest.version,
            permissions = permissions.len(),
            "build plugin context"
        );

        Ok(PluginContext {
            plugin_id: id.to_string(),
            events: self.services.events.create_plugin_event_bus(id, &permissions),
            messages: self.services.messages.create_plugin_message_bus(id, &permissions),
            logger: PluginLogger::new(id),
            storage,
            graph: GraphApi::new(guard.clone(), Arc::clone(&self.services.graph_store))
                .with_events(Arc::clone(&self.services.events)),
            memory: MemoryApi::new(guard, Arc::clone(&self.services.memory_store))
                .with_events(Arc::clone(&self.services.events)),
            resource_limits: sandbox.limits().clone(),
            permissions,
            config,
        })
    }

    /// 선언된 capability를 통신 버스에 등록
    fn register_capabilities(
        &self,
        id: &str,
        manifest: &PluginManifest,
        instance: &Arc<dyn Plugin>,
    ) -> Result<()> {
        for declaration in &manifest.capabilities {
            let mut registration =
                CapabilityRegistration::new(id, &declaration.name, declaration.confidence);
            if let Some(description) = &declaration.description {
                registration = registration.with_description(description);
            }

            let instance = Arc::clone(instance);
            let name = declaration.name.clone();
            let handler = capability_handler_fn(move |args| {
                let instance = Arc::clone(&instance);
                let name = name.clone();
                async move { instance.execute_capability(&name, args).await }
            });

            self.services.messages.register_capability(registration, handler)?;
        }
        Ok(())
    }

    /// 초기화 실패: 흔적 제거 후 plugin:error 발행
    async fn fail_initialize(&self, id: &str, error: &Error) {
        self.rollback(id).await;
        self.services
            .events
            .emit(
                EventType::PluginError,
                json!({ "pluginId": id, "operation": "initialize", "error": error.to_string() }),
            )
            .await;
    }

    /// 초기화 실패 후 흔적 제거
    async fn rollback(&self, id: &str) {
        self.services.events.unsubscribe_all(id);
        self.services.messages.cleanup_plugin(id);
        self.registry.unregister(id).await;
        self.resolver.lock().remove_plugin(id);
        debug!(plugin_id = %id, "rolled back failed load");
    }

    // ========================================================================
    // 언로드
    // ========================================================================

    /// 플러그인 언로드 (의존하는 플러그인이 있으면 거부)
    pub async fn unload_plugin(&self, id: &str) -> PluginOperationResult {
        info!(plugin_id = %id, "Unloading plugin");

        match self.try_unload(id).await {
            Ok(()) => PluginOperationResult::ok(id, None),
            Err(e) => {
                warn!(plugin_id = %id, error = %e, "Failed to unload plugin");
                PluginOperationResult::failed(id, &e)
            }
        }
    }

    async fn try_unload(&self, id: &str) -> Result<()> {
        if !self.registry.contains(id).await {
            return Err(Error::NotFound(format!("Plugin '{}' is not loaded", id)));
        }

        let dependents = self.resolver.lock().get_dependents(id);
        if !dependents.is_empty() {
            return Err(Error::Lifecycle(format!(
                "Cannot unload '{}': required by {}",
                id,
                dependents.join(", ")
            )));
        }

        self.registry.set_state(id, PluginState::Unloading).await;

        let live = self
            .registry
            .inspect(id, |e| e.instance.clone().map(|i| (i, e.sandbox.clone())))
            .await
            .flatten();
        if let Some((instance, sandbox)) = live {
            let timeout = self.config.plugins.shutdown_timeout();
            if let Err(e) = sandbox.run_with_timeout("shutdown", timeout, instance.shutdown()).await {
                warn!(plugin_id = %id, error = %e, "Plugin shutdown failed, continuing unload");
            }
        }

        self.services.messages.cleanup_plugin(id);
        // plugin:unloaded 발행 시 해당 플러그인 구독이 먼저 제거됨
        self.services
            .events
            .emit(EventType::PluginUnloaded, json!({ "pluginId": id }))
            .await;

        self.registry.unregister(id).await;
        self.resolver.lock().remove_plugin(id);
        info!(plugin_id = %id, "Plugin unloaded");
        Ok(())
    }

    // ========================================================================
    // 활성화/비활성화
    // ========================================================================

    /// DISABLED → ACTIVE (LOADED면 초기화)
    pub async fn enable_plugin(&self, id: &str) -> PluginOperationResult {
        match self.try_enable(id).await {
            Ok(()) => PluginOperationResult::ok(id, Some(PluginState::Active)),
            Err(e) => {
                warn!(plugin_id = %id, error = %e, "Failed to enable plugin");
                PluginOperationResult::failed(id, &e)
            }
        }
    }

    async fn try_enable(&self, id: &str) -> Result<()> {
        let state = self
            .registry
            .get_state(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Plugin '{}' is not loaded", id)))?;

        match state {
            PluginState::Active => Ok(()),
            PluginState::Loaded => {
                if let Err(e) = self.activate(id, None).await {
                    self.fail_initialize(id, &e).await;
                    return Err(e);
                }
                Ok(())
            }
            PluginState::Disabled => {
                let active = self
                    .registry
                    .inspect(id, |e| e.instance.clone().map(|i| (e.manifest.clone(), i)))
                    .await
                    .flatten();
                let Some((manifest, instance)) = active else {
                    return Err(Error::Internal(format!("Plugin '{}' has no instance", id)));
                };
                self.register_capabilities(id, &manifest, &instance)?;
                self.registry.set_state(id, PluginState::Active).await;
                self.services
                    .events
                    .emit(EventType::PluginEnabled, json!({ "pluginId": id }))
                    .await;
                info!(plugin_id = %id, "Plugin enabled");
                Ok(())
            }
            other => Err(Error::Lifecycle(format!(
                "Cannot enable plugin '{}' in state {}",
                id, other
            ))),
        }
    }

    /// ACTIVE → DISABLED (capability 등록 해제, 훅 대상 제외)
    pub async fn disable_plugin(&self, id: &str) -> PluginOperationResult {
        match self.try_disable(id).await {
            Ok(()) => PluginOperationResult::ok(id, Some(PluginState::Disabled)),
            Err(e) => {
                warn!(plugin_id = %id, error = %e, "Failed to disable plugin");
                PluginOperationResult::failed(id, &e)
            }
        }
    }

    async fn try_disable(&self, id: &str) -> Result<()> {
        let state = self
            .registry
            .get_state(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Plugin '{}' is not loaded", id)))?;

        match state {
            PluginState::Disabled => Ok(()),
            PluginState::Active => {
                self.registry.set_state(id, PluginState::Disabled).await;
                self.services.messages.unregister_capabilities(id);
                self.services
                    .events
                    .emit(EventType::PluginDisabled, json!({ "pluginId": id }))
                    .await;
                info!(plugin_id = %id, "Plugin disabled");
                Ok(())
            }
            other => Err(Error::Lifecycle(format!(
                "Cannot disable plugin '{}' in state {}",
                id, other
            ))),
        }
    }

    // ========================================================================
    // 훅/capability 실행
    // ========================================================================

    /// 훅을 선언하고 메서드를 노출한 ACTIVE 플러그인에 순서대로 전달
    pub async fn execute_hook(&self, hook: &str, args: Value) -> Vec<HookResult> {
        let method = hook_method_name(hook);
        let timeout = self.config.plugins.hook_timeout();
        let mut results = Vec::new();

        for plugin in self.registry.active().await {
            if !plugin.manifest.declares_hook(hook) {
                continue;
            }
            if !exposes(plugin.instance.as_ref(), &method) {
                debug!(plugin_id = %plugin.id, hook = %hook, "plugin has no hook method");
                continue;
            }

            let started = Instant::now();
            let outcome = plugin
                .sandbox
                .run_with_timeout(hook, timeout, plugin.instance.on_hook(hook, args.clone()))
                .await;
            let elapsed = started.elapsed();
            let elapsed_ms = elapsed.as_millis() as u64;

            match outcome {
                Ok(response) => {
                    self.registry.record_execution(&plugin.id, elapsed, None).await;
                    results.push(HookResult {
                        plugin_id: plugin.id,
                        success: true,
                        proceed: response.proceed,
                        modifications: response.modifications,
                        error: None,
                        elapsed_ms,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    self.registry
                        .record_execution(&plugin.id, elapsed, Some(message.clone()))
                        .await;
                    self.services
                        .events
                        .emit(
                            EventType::PluginError,
                            json!({ "pluginId": plugin.id, "hook": hook, "error": message }),
                        )
                        .await;
                    results.push(HookResult {
                        plugin_id: plugin.id,
                        success: false,
                        proceed: true,
                        modifications: None,
                        error: Some(message),
                        elapsed_ms,
                    });
                }
            }
        }

        debug!(hook = %hook, invoked = results.len(), "hook executed");
        results
    }

    /// 특정 플러그인의 capability 직접 실행
    pub async fn execute_capability(&self, id: &str, capability: &str, args: Value) -> CapabilityExecution {
        let started = Instant::now();
        let outcome = self.try_execute_capability(id, capability, args).await;
        let elapsed = started.elapsed();

        let execution = CapabilityExecution {
            plugin_id: id.to_string(),
            capability: capability.to_string(),
            success: outcome.is_ok(),
            result: None,
            error: None,
            elapsed_ms: elapsed.as_millis() as u64,
        };

        match outcome {
            Ok(result) => {
                self.registry.record_execution(id, elapsed, None).await;
                CapabilityExecution {
                    result: Some(result),
                    ..execution
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(plugin_id = %id, capability = %capability, error = %message, "Capability execution failed");
                self.registry
                    .record_execution(id, elapsed, Some(message.clone()))
                    .await;
                CapabilityExecution {
                    error: Some(message),
                    ..execution
                }
            }
        }
    }

    async fn try_execute_capability(&self, id: &str, capability: &str, args: Value) -> Result<Value> {
        let plugin = self
            .registry
            .active_plugin(id)
            .await
            .ok_or_else(|| Error::Plugin(format!("Plugin '{}' is not active", id)))?;

        if plugin.manifest.capability(capability).is_none() {
            return Err(Error::NotFound(format!(
                "Plugin '{}' does not declare capability '{}'",
                id, capability
            )));
        }
        if !exposes(plugin.instance.as_ref(), capability) {
            return Err(Error::Plugin(format!(
                "Plugin '{}' does not expose capability '{}'",
                id, capability
            )));
        }

        plugin
            .sandbox
            .run_with_timeout(
                capability,
                self.config.plugins.capability_timeout(),
                plugin.instance.execute_capability(capability, args),
            )
            .await
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub async fn is_plugin_loaded(&self, id: &str) -> bool {
        self.registry.contains(id).await
    }

    pub async fn plugin_state(&self, id: &str) -> Option<PluginState> {
        self.registry.get_state(id).await
    }

    pub async fn get_plugin_metadata(&self, id: &str) -> Option<PluginMetadata> {
        let dependents = self.resolver.lock().get_dependents(id);
        self.registry.metadata(id, dependents).await
    }

    /// 로드 순서대로 메타데이터 목록
    pub async fn list_loaded_plugins(&self) -> Vec<PluginMetadata> {
        let mut list = Vec::new();
        for id in self.registry.load_order().await {
            if let Some(metadata) = self.get_plugin_metadata(&id).await {
                list.push(metadata);
            }
        }
        list
    }

    pub async fn get_plugin_metrics(&self, id: &str) -> Option<PluginMetrics> {
        self.registry.metrics(id).await
    }

    /// 모든 플러그인의 실행 통계
    pub async fn all_plugin_metrics(&self) -> HashMap<String, PluginMetrics> {
        let mut all = HashMap::new();
        for id in self.registry.load_order().await {
            if let Some(metrics) = self.registry.metrics(&id).await {
                all.insert(id, metrics);
            }
        }
        all
    }

    /// 로드된 플러그인의 의존성 순서
    pub fn load_order(&self) -> Result<Vec<String>> {
        self.resolver.lock().get_load_order(None)
    }

    pub fn validate_graph(&self) -> GraphValidation {
        self.resolver.lock().validate_graph()
    }
}

// ============================================================================
// 테스트
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::manifest::{CapabilityDeclaration, PluginDependency};
    use crate::plugin::traits::HookResponse;
    use async_trait::async_trait;
    use semver::Version;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Behavior {
        fail_init: bool,
        fail_hook: bool,
        initialized: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
        calls: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    struct TestPlugin {
        name: String,
        behavior: Behavior,
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        async fn initialize(&self, ctx: Arc<PluginContext>) -> Result<()> {
            if self.behavior.fail_init {
                return Err(Error::Plugin("init refused".into()));
            }
            assert_eq!(ctx.plugin_id(), self.name);
            self.behavior.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            self.behavior.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn methods(&self) -> Vec<String> {
            vec!["onBeforeSave".into(), "echo".into()]
        }

        async fn on_hook(&self, hook: &str, args: Value) -> Result<HookResponse> {
            self.behavior.calls.lock().push(format!("{}:{}", self.name, hook));
            if self.behavior.fail_hook {
                return Err(Error::Plugin("hook exploded".into()));
            }
            Ok(HookResponse::modify(json!({ "seen": args })))
        }

        async fn execute_capability(&self, capability: &str, args: Value) -> Result<Value> {
            Ok(json!({ "capability": capability, "from": self.name, "args": args }))
        }
    }

    fn manager() -> PluginManager {
        let mut config = RuntimeConfig::default();
        config.plugins.auto_discover = false;
        PluginManager::new(config)
    }

    fn add(manager: &PluginManager, manifest: PluginManifest, behavior: Behavior) {
        let name = manifest.id().to_string();
        let factory = move || {
            Arc::new(TestPlugin {
                name: name.clone(),
                behavior: behavior.clone(),
            }) as Arc<dyn Plugin>
        };
        manager.register(manifest, Arc::new(factory)).unwrap();
    }

    fn manifest(name: &str) -> PluginManifest {
        PluginManifest::new(name, Version::new(1, 0, 0))
    }

    #[tokio::test]
    async fn test_load_and_unload() {
        let manager = manager();
        let behavior = Behavior::default();
        add(&manager, manifest("alpha"), behavior.clone());

        let result = manager.load_plugin("alpha", LoadOptions::default()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.state, Some(PluginState::Active));
        assert_eq!(behavior.initialized.load(Ordering::SeqCst), 1);
        assert!(manager.is_plugin_loaded("alpha").await);

        let again = manager.load_plugin("alpha", LoadOptions::default()).await;
        assert!(!again.success);

        assert!(manager.unload_plugin("alpha").await.success);
        assert_eq!(behavior.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!manager.is_plugin_loaded("alpha").await);
        assert!(
            !manager
                .event_bus()
                .get_event_history(&EventType::PluginUnloaded, None)
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_missing_dependency_leaves_nothing_behind() {
        let manager = manager();
        add(&manager, manifest("a").depends_on("b"), Behavior::default());
        add(&manager, manifest("b"), Behavior::default());

        let result = manager.load_plugin("a", LoadOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Missing dependency"));
        assert!(!manager.is_plugin_loaded("a").await);
        assert!(manager.load_order().unwrap().is_empty());

        assert!(manager.load_plugin("b", LoadOptions::default()).await.success);
        assert!(manager.load_plugin("a", LoadOptions::default()).await.success);

        let meta = manager.get_plugin_metadata("b").await.unwrap();
        assert_eq!(meta.dependents, vec!["a".to_string()]);
        assert!(!manager.unload_plugin("b").await.success);
        assert!(manager.unload_plugin("a").await.success);
        assert!(manager.unload_plugin("b").await.success);
    }

    #[tokio::test]
    async fn test_version_conflict_blocks_load() {
        let manager = manager();
        add(&manager, manifest("base"), Behavior::default());
        add(
            &manager,
            manifest("needs-two").with_dependency(
                PluginDependency::new("base").with_version(semver::VersionReq::parse("^2").unwrap()),
            ),
            Behavior::default(),
        );

        assert!(manager.load_plugin("base", LoadOptions::default()).await.success);
        let result = manager.load_plugin("needs-two", LoadOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Version conflict"));
    }

    #[tokio::test]
    async fn test_init_failure_rolls_back() {
        let manager = manager();
        add(
            &manager,
            manifest("fragile"),
            Behavior {
                fail_init: true,
                ..Behavior::default()
            },
        );

        let result = manager.load_plugin("fragile", LoadOptions::default()).await;
        assert!(!result.success);
        assert!(!manager.is_plugin_loaded("fragile").await);
        assert!(manager.load_order().unwrap().is_empty());
        assert_eq!(
            manager
                .event_bus()
                .get_event_history(&EventType::PluginError, None)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_undeclared_capability_method_fails_load() {
        let manager = manager();
        add(
            &manager,
            manifest("liar").with_capability(CapabilityDeclaration::new("translate")),
            Behavior::default(),
        );

        let result = manager.load_plugin("liar", LoadOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("translate"));
        assert!(!manager.is_plugin_loaded("liar").await);
    }

    #[tokio::test]
    async fn test_hooks_isolated_per_plugin() {
        let manager = manager();
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        add(
            &manager,
            manifest("first").with_hook("before-save"),
            Behavior {
                fail_hook: true,
                calls: Arc::clone(&calls),
                ..Behavior::default()
            },
        );
        add(
            &manager,
            manifest("second").with_hook("before-save"),
            Behavior {
                calls: Arc::clone(&calls),
                ..Behavior::default()
            },
        );
        add(&manager, manifest("bystander"), Behavior::default());

        for id in ["first", "second", "bystander"] {
            assert!(manager.load_plugin(id, LoadOptions::default()).await.success);
        }

        let results = manager.execute_hook("before-save", json!({"id": 1})).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success);
        assert_eq!(results[1].modifications, Some(json!({"seen": {"id": 1}})));
        assert_eq!(
            *calls.lock(),
            vec!["first:before-save".to_string(), "second:before-save".to_string()]
        );

        let metrics = manager.get_plugin_metrics("first").await.unwrap();
        assert_eq!(metrics.execution_count, 1);
        assert_eq!(metrics.error_count, 1);
    }

    #[tokio::test]
    async fn test_disable_skips_hooks_and_capabilities() {
        let manager = manager();
        add(
            &manager,
            manifest("svc")
                .with_hook("before-save")
                .with_capability(CapabilityDeclaration::new("echo").with_confidence(0.8)),
            Behavior::default(),
        );
        assert!(manager.load_plugin("svc", LoadOptions::default()).await.success);
        assert_eq!(manager.communication_bus().find_plugins_by_capability("echo").len(), 1);

        assert!(manager.disable_plugin("svc").await.success);
        assert!(manager.execute_hook("before-save", Value::Null).await.is_empty());
        assert!(manager.communication_bus().find_plugins_by_capability("echo").is_empty());
        assert!(!manager.execute_capability("svc", "echo", Value::Null).await.success);

        assert!(manager.enable_plugin("svc").await.success);
        assert_eq!(manager.execute_hook("before-save", Value::Null).await.len(), 1);
        let exec = manager.execute_capability("svc", "echo", json!(5)).await;
        assert!(exec.success);
        assert_eq!(exec.result.unwrap()["args"], 5);
    }

    #[tokio::test]
    async fn test_load_disabled_then_enable() {
        let manager = manager();
        let behavior = Behavior::default();
        add(&manager, manifest("lazy"), behavior.clone());

        let result = manager.load_plugin("lazy", LoadOptions::disabled()).await;
        assert_eq!(result.state, Some(PluginState::Loaded));
        assert_eq!(behavior.initialized.load(Ordering::SeqCst), 0);

        assert!(manager.enable_plugin("lazy").await.success);
        assert_eq!(manager.plugin_state("lazy").await, Some(PluginState::Active));
        assert_eq!(behavior.initialized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enable_failure_reports_initialize_error() {
        let manager = manager();
        add(
            &manager,
            manifest("lazy"),
            Behavior {
                fail_init: true,
                ..Behavior::default()
            },
        );
        assert!(manager.load_plugin("lazy", LoadOptions::disabled()).await.success);

        let result = manager.enable_plugin("lazy").await;
        assert!(!result.success);
        assert!(!manager.is_plugin_loaded("lazy").await);
        assert!(manager.get_plugin_metadata("lazy").await.is_none());

        let errors = manager
            .event_bus()
            .get_event_history(&EventType::PluginError, None);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload["pluginId"], "lazy");
        assert_eq!(errors[0].payload["operation"], "initialize");
    }

    #[tokio::test]
    async fn test_capability_undeclared() {
        let manager = manager();
        add(&manager, manifest("svc"), Behavior::default());
        assert!(manager.load_plugin("svc", LoadOptions::default()).await.success);

        let exec = manager.execute_capability("svc", "echo", Value::Null).await;
        assert!(!exec.success);
        assert!(exec.error.unwrap().contains("does not declare"));
        assert_eq!(manager.get_plugin_metrics("svc").await.unwrap().error_count, 1);
    }

    #[tokio::test]
    async fn test_initialize_loads_trusted_in_dependency_order() {
        let mut config = RuntimeConfig::default();
        config.plugins.auto_discover = false;
        config.plugins.trusted = vec!["top".into(), "base".into(), "ghost".into()];
        let manager = PluginManager::new(config);
        add(&manager, manifest("top").depends_on("base"), Behavior::default());
        add(&manager, manifest("base"), Behavior::default());

        let report = manager.initialize().await;
        assert_eq!(report.loaded, vec!["base".to_string(), "top".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "ghost");

        manager.shutdown().await;
        assert!(manager.list_loaded_plugins().await.is_empty());
    }
}
