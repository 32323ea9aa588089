//! Terminal filter proxying opaque TCP streams to one or more clusters.

use envoy_types::pb::envoy::config::accesslog::v3::AccessLog;
use envoy_types::pb::envoy::config::listener::v3::Filter;
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy::{self, weighted_cluster::ClusterWeight, ClusterSpecifier},
    TcpProxy,
};

use super::{typed_filter, TCP_PROXY_FILTER_NAME};
use crate::domain::WeightedCluster;
use crate::errors::Error;

pub const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";

/// Builds a TCP proxy to either `cluster` or `weighted_clusters`.
///
/// Exactly one of the two must be given. Clusters of weight 0 are dropped,
/// and the remaining total must be at least 1. A single remaining cluster is
/// routed to directly.
pub fn build_tcp_proxy(
    stat_prefix: &str,
    cluster: Option<&str>,
    weighted_clusters: &[WeightedCluster],
    access_log: Vec<AccessLog>,
) -> crate::Result<Filter> {
    let cluster_specifier = match (cluster, weighted_clusters) {
        (Some(_), [_, ..]) => {
            return Err(Error::validation(
                "TcpProxy: only one of cluster or weighted clusters can be specified",
            ))
        }
        (None, []) => {
            return Err(Error::validation(
                "TcpProxy: at least one of cluster or weighted clusters must be specified",
            ))
        }
        (Some(cluster), []) => ClusterSpecifier::Cluster(cluster.to_string()),
        (None, clusters) => weighted_specifier(stat_prefix, clusters)?,
    };

    let config = TcpProxy {
        stat_prefix: stat_prefix.to_string(),
        cluster_specifier: Some(cluster_specifier),
        access_log,
        ..Default::default()
    };

    Ok(typed_filter(TCP_PROXY_FILTER_NAME, TCP_PROXY_TYPE_URL, &config))
}

fn weighted_specifier(stat_prefix: &str, clusters: &[WeightedCluster]) -> crate::Result<ClusterSpecifier> {
    let weighted: Vec<&WeightedCluster> = clusters.iter().filter(|wc| wc.weight > 0).collect();
    match weighted.as_slice() {
        [] => Err(Error::validation_field(
            format!("TcpProxy '{}': total weight of weighted clusters must be >= 1, got 0", stat_prefix),
            "weighted_clusters",
        )),
        [single] => Ok(ClusterSpecifier::Cluster(single.cluster_name.clone())),
        clusters => Ok(ClusterSpecifier::WeightedClusters(tcp_proxy::WeightedCluster {
            clusters: clusters
                .iter()
                .map(|wc| ClusterWeight {
                    name: wc.cluster_name.clone(),
                    weight: wc.weight,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })),
    }
}
