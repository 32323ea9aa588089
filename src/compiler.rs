//! # Compiler
//!
//! One compilation pass turns the policy view of one proxy into its complete
//! xDS resource set. A pass is a pure function of its inputs: it holds no
//! state between calls and a new pass fully replaces the previous output.

use tracing::{info, warn};

use crate::catalog::{MeshCatalog, MeshConfig, PolicySource};
use crate::certificate::{issue_service_secrets, CertificateManager};
use crate::config::CompilerConfig;
use crate::domain::Proxy;
use crate::xds::listener::{
    build_inbound_listener, build_outbound_listener, build_prometheus_listener, ListenerOptions,
};
use crate::xds::route::{
    build_egress_route_configs, build_inbound_route_configs, build_ingress_route_config,
    build_outbound_route_configs,
};
use crate::xds::{CompiledResources, Diagnostics};
use crate::Result;

/// Listener options for `proxy` under `mesh`.
pub fn listener_options(proxy: &Proxy, mesh: &MeshConfig, trust_domain: &str, config: &CompilerConfig) -> ListenerOptions {
    ListenerOptions {
        trust_domain: trust_domain.to_string(),
        permissive: mesh.permissive_traffic_policy_mode,
        global_egress: mesh.enable_egress,
        tracing_endpoint: mesh.tracing.as_ref().map(|t| t.endpoint.clone()),
        ext_authz: mesh.ext_authz.clone(),
        health_checks: mesh.enable_active_health_checks,
        stats_headers: if mesh.enable_stats_headers { proxy.stats_headers() } else { Default::default() },
        ..ListenerOptions::from_config(config)
    }
}

/// Compiles every resource of `proxy`.
///
/// Resource-scoped failures are reported in [`CompiledResources::skipped`]
/// and merge conflicts in [`CompiledResources::conflicts`]; only failures that
/// invalidate a whole listener or the proxy's secrets are returned as errors.
/// Secrets are only built when `certificates` is given.
pub fn compile(
    proxy: &Proxy,
    source: &dyn PolicySource,
    config: &CompilerConfig,
    certificates: Option<&dyn CertificateManager>,
) -> Result<CompiledResources> {
    let span = crate::compile_span!("compile", proxy);
    let _guard = span.enter();

    let identity = &proxy.identity;
    let catalog = MeshCatalog::new(source, &config.trust_domain);
    let options = listener_options(proxy, catalog.mesh_config(), catalog.trust_domain(), config);

    let inbound = catalog.inbound_mesh_policy(identity);
    let outbound = catalog.outbound_mesh_policy(identity);
    let egress = catalog.egress_policy(identity);
    let ingress = catalog.ingress_policy(identity);

    let mut resources = CompiledResources { proxy: proxy.id.clone(), ..Default::default() };
    resources.conflicts.extend(inbound.conflicts);
    resources.conflicts.extend(outbound.conflicts);
    if let Some(egress) = &egress {
        resources.conflicts.extend(egress.conflicts.iter().cloned());
    }
    if let Some(ingress) = &ingress {
        resources.conflicts.extend(ingress.conflicts.iter().cloned());
    }
    for conflict in &resources.conflicts {
        warn!(conflict = %conflict, "Conflicting weighted clusters, keeping the first contribution");
    }

    let mut diagnostics = Diagnostics::new();
    let egress_policy = egress.as_ref().map(|e| &e.policy);
    let ingress_policy = ingress.as_ref().map(|i| &i.policy);

    resources.route_configs.extend(build_inbound_route_configs(
        &inbound.policy.http_route_configs_per_port,
        &options.stats_headers,
        &mut diagnostics,
    ));
    resources
        .route_configs
        .extend(build_outbound_route_configs(&outbound.policy.http_route_configs_per_port, &mut diagnostics));
    if let Some(egress) = egress_policy {
        resources
            .route_configs
            .extend(build_egress_route_configs(&egress.http_route_configs_per_port, &mut diagnostics));
    }
    if let Some(ingress) = ingress_policy {
        resources
            .route_configs
            .extend(build_ingress_route_config(&ingress.http_route_policies, &mut diagnostics));
    }

    let listeners = [
        build_outbound_listener(identity, &outbound.policy, egress_policy, &options, &mut diagnostics)?,
        build_inbound_listener(identity, &inbound.policy, ingress_policy, &options, &mut diagnostics)?,
        build_prometheus_listener(&config.prometheus, &options)?,
    ];
    resources.listeners = listeners.into_iter().flatten().collect();

    if let Some(manager) = certificates {
        resources.secrets = issue_service_secrets(manager, identity, catalog.trust_domain(), ingress.is_some())?;
    }

    resources.skipped = diagnostics.skipped;
    info!(
        listeners = resources.listeners.len(),
        route_configs = resources.route_configs.len(),
        secrets = resources.secrets.len(),
        conflicts = resources.conflicts.len(),
        skipped = resources.skipped.len(),
        "Compiled proxy resources"
    );
    Ok(resources)
}
