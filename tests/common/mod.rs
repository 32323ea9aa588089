//! Shared fixtures for integration tests

use std::io::Write;
use tempfile::NamedTempFile;

/// bookbuyer (ns buyer) may call bookstore (ns store) over HTTP on `/buy`
/// and over TCP on 9000, and reach github.com over HTTPS. bookstore is
/// exposed to an ingress gateway on 8080.
pub const BOOKSTORE_MESH: &str = r#"
mesh_config:
  enable_stats_headers: true
services:
  - name: bookstore
    namespace: store
    identity: { name: bookstore, namespace: store }
    ports:
      - { port: 8080, protocol: http }
      - { port: 9000, protocol: tcp }
    ips: [10.0.0.5, 10.0.0.6]
  - name: bookstore-v2
    namespace: store
    identity: { name: bookstore, namespace: store }
    ports:
      - { port: 8080, protocol: http }
    ips: [10.0.0.7]
  - name: bookstore-apex
    namespace: store
    ports:
      - { port: 8080, protocol: http }
    ips: [10.0.0.100]
  - name: bookbuyer
    namespace: buyer
    identity: { name: bookbuyer, namespace: buyer }
    ports:
      - { port: 80, protocol: http }
    ips: [10.0.1.5]
traffic_targets:
  - name: bookstore-access
    namespace: store
    destination: { name: bookstore, namespace: store }
    sources:
      - { name: bookbuyer, namespace: buyer }
    rules:
      - kind: http_route_group
        name: books
        matches: [buy]
      - kind: tcp_route
        ports: [9000]
http_route_groups:
  - name: books
    namespace: store
    matches:
      - name: buy
        path_regex: /buy
        methods: [GET]
traffic_splits:
  - name: bookstore-split
    namespace: store
    service: bookstore-apex
    backends:
      - { service: bookstore, weight: 75 }
      - { service: bookstore-v2, weight: 25 }
egresses:
  - name: github
    namespace: buyer
    sources:
      - { name: bookbuyer, namespace: buyer }
    hosts: [github.com]
    ip_addresses: [140.82.112.0/20]
    ports:
      - { number: 443, protocol: https }
ingress_backends:
  - name: edge
    namespace: store
    backends:
      - name: bookstore
        port: { number: 8080, protocol: http }
    sources:
      - { kind: ip_range, cidr: 10.10.0.0/16 }
"#;

/// Writes `content` to a temporary file with `suffix`.
pub fn write_temp(content: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

/// Writes a PEM bundle directory the certificate loader accepts.
pub fn write_pem_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (file, body) in [("cert.pem", "CERT"), ("key.pem", "KEY"), ("ca.pem", "CA")] {
        std::fs::write(
            dir.path().join(file),
            format!("-----BEGIN {0}-----\nAAAA\n-----END {0}-----\n", body),
        )
        .unwrap();
    }
    dir
}
