//! End-to-end compilation of a policy snapshot file
//!
//! Loads a YAML snapshot from disk and checks the listeners, route tables and
//! secrets compiled for the proxies on both sides of a grant.

mod common;

use meshplane::xds::listener::{INBOUND_LISTENER_NAME, OUTBOUND_LISTENER_NAME};
use meshplane::xds::route::INGRESS_ROUTE_CONFIG_NAME;
use meshplane::{compile, CompilerConfig, PemBundle, Proxy, Result, ServiceIdentity, Snapshot};

fn load_mesh() -> Result<Snapshot> {
    let file = common::write_temp(common::BOOKSTORE_MESH, ".yaml");
    Snapshot::from_file(file.path())
}

fn chain_names(resources: &meshplane::CompiledResources, listener: &str) -> Vec<String> {
    resources
        .listener(listener)
        .map(|l| l.filter_chains.iter().map(|fc| fc.name.clone()).collect())
        .unwrap_or_default()
}

#[test]
fn test_bookbuyer_outbound() -> Result<()> {
    let snapshot = load_mesh()?;
    let proxy = Proxy::new("bookbuyer-0", ServiceIdentity::new("bookbuyer", "buyer"));
    let resources = compile(&proxy, &snapshot, &CompilerConfig::default(), None)?;

    let chains = chain_names(&resources, OUTBOUND_LISTENER_NAME);
    assert!(chains.contains(&"outbound-mesh-http-filter-chain:store/bookstore_8080_http".to_string()));
    assert!(chains.contains(&"outbound-mesh-tcp-filter-chain:store/bookstore_9000_tcp".to_string()));
    assert!(chains.contains(&"outbound-mesh-http-filter-chain:store/bookstore-apex_8080_http".to_string()));
    assert!(chains.iter().any(|c| c.starts_with("egress-")));

    let outbound = resources.route_config("rds-outbound.8080").expect("outbound route table");
    let vhosts: Vec<&str> = outbound.virtual_hosts.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(vhosts.len(), 3, "one virtual host per upstream service: {:?}", vhosts);

    // Egress is limited to the declared destinations
    assert!(resources.listener(OUTBOUND_LISTENER_NAME).unwrap().default_filter_chain.is_none());
    assert!(resources.conflicts.is_empty());
    assert!(resources.skipped.is_empty());
    Ok(())
}

#[test]
fn test_bookstore_inbound_and_ingress() -> Result<()> {
    let snapshot = load_mesh()?;
    let pem = common::write_pem_dir();
    let certificates = PemBundle::from_dir(pem.path())?;
    let proxy = Proxy::new("bookstore-0", ServiceIdentity::new("bookstore", "store"));

    let resources = compile(&proxy, &snapshot, &CompilerConfig::default(), Some(&certificates))?;

    let chains = chain_names(&resources, INBOUND_LISTENER_NAME);
    assert!(chains.contains(&"inbound-mesh-http-filter-chain:inbound_store/bookstore_8080_http".to_string()));
    assert!(chains.contains(&"inbound-mesh-tcp-filter-chain:inbound_store/bookstore_9000_tcp".to_string()));
    assert!(chains.contains(&"ingress_store/bookstore_8080_http".to_string()));

    let inbound = resources.route_config("rds-inbound.8080").expect("inbound route table");
    // bookstore, bookstore-v2 and the split apex all land on target port 8080
    assert_eq!(inbound.virtual_hosts.len(), 3);

    let ingress = resources.route_config(INGRESS_ROUTE_CONFIG_NAME).expect("ingress route table");
    assert_eq!(ingress.virtual_hosts[0].domains, vec!["*"]);

    for name in [
        "service-cert:bookstore.store",
        "root-cert-for-mtls-inbound:bookstore.store",
        "root-cert-for-mtls-outbound:bookstore.store",
        "root-cert-https",
    ] {
        assert!(resources.secret(name).is_some(), "missing secret {}", name);
    }
    Ok(())
}

#[test]
fn test_json_snapshot_matches_yaml() -> Result<()> {
    let yaml = load_mesh()?;
    let json = serde_json::to_string(&yaml).unwrap();
    let file = common::write_temp(&json, ".json");
    assert_eq!(Snapshot::from_file(file.path())?, yaml);
    Ok(())
}

#[test]
fn test_dump_is_json_serializable() -> Result<()> {
    let snapshot = load_mesh()?;
    let proxy = Proxy::new("bookbuyer-0", ServiceIdentity::new("bookbuyer", "buyer"));
    let resources = compile(&proxy, &snapshot, &CompilerConfig::default(), None)?;

    let dump = serde_json::to_value(resources.dump()).unwrap();
    let names: Vec<&str> = dump["resources"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    assert!(names.contains(&OUTBOUND_LISTENER_NAME));
    assert!(names.contains(&"rds-outbound.8080"));
    assert_eq!(dump["summary"]["proxy"], "bookbuyer-0");
    Ok(())
}

#[test]
fn test_malformed_snapshot_rejected() {
    let file = common::write_temp("services: [ { name: broken", ".yaml");
    let err = Snapshot::from_file(file.path()).unwrap_err();
    assert!(matches!(err, meshplane::Error::Serialization { .. }));
}
