//! CLI 명령 처리

use anyhow::{bail, Context as _};
use mnemos_core::plugin::{
    DependencyResolver, InstallOptions, InstallationStore, LifecycleManager, LifecycleResult,
    PluginDiscovery, PluginScope, PluginSource, UninstallOptions, UpdateOptions,
};
use mnemos_foundation::RuntimeConfig;
use std::path::PathBuf;
use std::sync::Arc;

/// 명령 공통 컨텍스트
pub struct CliContext {
    pub config: RuntimeConfig,
    pub plugin_dir: PathBuf,
}

impl CliContext {
    /// 플러그인 디렉토리 결정: --plugin-dir > 설정 > 사용자 데이터 디렉토리
    pub fn new(config: RuntimeConfig, plugin_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let plugin_dir = match plugin_dir.or_else(|| config.plugins.directories.first().cloned()) {
            Some(dir) => dir,
            None => InstallationStore::user_store()
                .map(|store| store.base_dir().to_path_buf())
                .context("Cannot determine plugin directory; pass --plugin-dir")?,
        };
        Ok(Self { config, plugin_dir })
    }

    async fn lifecycle(&self) -> anyhow::Result<LifecycleManager> {
        let store = InstallationStore::open(&self.plugin_dir)
            .await
            .with_context(|| format!("Failed to open {}", self.plugin_dir.display()))?;
        Ok(LifecycleManager::new(Arc::new(store)))
    }
}

fn finish(result: LifecycleResult, verb: &str) -> anyhow::Result<()> {
    if !result.success {
        bail!(
            "{} '{}' failed: {}",
            verb,
            result.plugin_id,
            result.error.unwrap_or_default()
        );
    }
    match result.record {
        Some(record) => println!("✓ {} {}@{} ({})", verb, record.id, record.version, record.state),
        None => println!("✓ {} {}", verb, result.plugin_id),
    }
    Ok(())
}

/// `<id>=<source>` 목록 파싱
fn parse_dependency_sources(specs: &[String]) -> anyhow::Result<Vec<(String, PluginSource)>> {
    specs
        .iter()
        .map(|spec| {
            let (id, source) = spec
                .split_once('=')
                .with_context(|| format!("Invalid --dep '{}', expected <id>=<source>", spec))?;
            Ok((id.trim().to_string(), PluginSource::parse(source.trim())?))
        })
        .collect()
}

// ============================================================================
// 설치 관리
// ============================================================================

pub async fn install(
    ctx: &CliContext,
    source: &str,
    force: bool,
    install_dependencies: bool,
    enable: bool,
    dependencies: &[String],
) -> anyhow::Result<()> {
    let source = PluginSource::parse(source)?;
    let mut options = InstallOptions {
        force,
        install_dependencies,
        enable,
        ..Default::default()
    };
    for (id, dep_source) in parse_dependency_sources(dependencies)? {
        options = options.with_dependency_source(id, dep_source);
    }

    let lifecycle = ctx.lifecycle().await?;
    finish(lifecycle.install_plugin(&source, &options).await, "Installed")
}

pub async fn uninstall(ctx: &CliContext, id: &str, force: bool, remove_files: bool) -> anyhow::Result<()> {
    let lifecycle = ctx.lifecycle().await?;
    let options = UninstallOptions { force, remove_files };
    finish(lifecycle.uninstall_plugin(id, &options).await, "Uninstalled")
}

pub async fn set_enabled(ctx: &CliContext, id: &str, enabled: bool) -> anyhow::Result<()> {
    let lifecycle = ctx.lifecycle().await?;
    if enabled {
        finish(lifecycle.enable_plugin(id).await, "Enabled")
    } else {
        finish(lifecycle.disable_plugin(id).await, "Disabled")
    }
}

pub async fn update(ctx: &CliContext, id: &str, source: &str, backup: bool) -> anyhow::Result<()> {
    let source = PluginSource::parse(source)?;
    let lifecycle = ctx.lifecycle().await?;
    let options = UpdateOptions {
        backup,
        ..Default::default()
    };
    finish(lifecycle.update_plugin(id, &source, &options).await, "Updated")
}

// ============================================================================
// 조회
// ============================================================================

pub async fn list(ctx: &CliContext, json: bool) -> anyhow::Result<()> {
    let records = ctx.lifecycle().await?.list().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No plugins installed in {}", ctx.plugin_dir.display());
        return Ok(());
    }

    println!("\n📦 Installed Plugins\n");
    println!("{:<24} {:<12} {:<10} {}", "ID", "Version", "State", "Source");
    println!("{}", "-".repeat(80));
    for record in records {
        println!(
            "{:<24} {:<12} {:<10} {}",
            record.id, record.version, record.state, record.source
        );
    }
    println!();

    Ok(())
}

pub async fn outdated(ctx: &CliContext) -> anyhow::Result<()> {
    let lifecycle = ctx.lifecycle().await?;
    let mut found = 0;

    for record in lifecycle.list().await {
        let Some(source) = PluginSource::parse_github(&record.source) else {
            continue;
        };
        match lifecycle.installer().check_update(&source, &record.version).await {
            Ok(Some(latest)) => {
                found += 1;
                println!("{:<24} {} → {}", record.id, record.version, latest);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(plugin_id = %record.id, error = %e, "Update check failed"),
        }
    }

    if found == 0 {
        println!("All plugins are up to date.");
    }
    Ok(())
}

/// 발견된 플러그인으로 의존성 그래프 구성 후 검증
pub async fn check(ctx: &CliContext) -> anyhow::Result<()> {
    let mut discovery = PluginDiscovery::from_settings(&ctx.config.plugins);
    if !ctx.config.plugins.directories.contains(&ctx.plugin_dir) {
        discovery.add_search_path(&ctx.plugin_dir, PluginScope::Configured);
    }

    let discovered = discovery.discover_plugins().await;
    println!("Discovered {} plugins", discovered.len());

    let mut resolver = DependencyResolver::new();
    let mut rejected = 0;
    for plugin in &discovered {
        let manifest = &plugin.manifest;
        println!("  {}@{}  {}", manifest.id(), manifest.version, plugin.path.display());
        if let Err(e) = resolver.add_plugin(manifest.id(), Some(&manifest.version), &manifest.dependencies) {
            rejected += 1;
            println!("  ✗ {}: {}", manifest.id(), e);
        }
    }

    let validation = resolver.validate_graph();
    for warning in &validation.warnings {
        println!("  ⚠ {}", warning);
    }
    for error in &validation.errors {
        println!("  ✗ {}", error);
    }

    if !validation.valid || rejected > 0 {
        bail!("Dependency graph has problems");
    }

    let order = resolver.get_load_order(None)?;
    println!("\nLoad order: {}", order.join(" → "));
    Ok(())
}
