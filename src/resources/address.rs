//! Peer and service address derivation
//!
//! Plain string formatting over replica counts, endpoint names and
//! namespaces. Callers recompute these on every pass and hand the results
//! to the builders that embed them.

/// Cluster-local DNS suffix
pub const CLUSTER_DOMAIN: &str = "svc.cluster.local";

/// DNS name of one replica behind a headless Service whose StatefulSet shares
/// its name
pub fn replica_host(endpoint: &str, ordinal: i32, namespace: &str) -> String {
    format!("{endpoint}-{ordinal}.{endpoint}.{namespace}.{CLUSTER_DOMAIN}")
}

/// Raft peer list for a replicated control plane.
///
/// Peer ids are 1-based while pod ordinals are 0-based:
/// `1:E-0.E.ns.svc.cluster.local:P,2:E-1.E.ns.svc.cluster.local:P,...`
pub fn peer_list(replicas: i32, endpoint: &str, namespace: &str, port: i32) -> String {
    (0..replicas.max(0))
        .map(|i| format!("{}:{}:{}", i + 1, replica_host(endpoint, i, namespace), port))
        .collect::<Vec<_>>()
        .join(",")
}

/// Client-facing addresses of every control-plane replica, in ordinal order
pub fn master_addresses(replicas: i32, endpoint: &str, namespace: &str, port: i32) -> Vec<String> {
    (0..replicas.max(0))
        .map(|i| format!("{}:{}", replica_host(endpoint, i, namespace), port))
        .collect()
}

/// DNS name of a Service
pub fn service_host(endpoint: &str, namespace: &str) -> String {
    format!("{endpoint}.{namespace}.{CLUSTER_DOMAIN}")
}

/// HTTP URL of a Service port
pub fn service_url(endpoint: &str, namespace: &str, port: i32) -> String {
    format!("http://{}:{}", service_host(endpoint, namespace), port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_list_three_replicas() {
        assert_eq!(
            peer_list(3, "E", "ns", 17010),
            "1:E-0.E.ns.svc.cluster.local:17010,\
             2:E-1.E.ns.svc.cluster.local:17010,\
             3:E-2.E.ns.svc.cluster.local:17010"
        );
    }

    #[test]
    fn test_peer_list_follows_replicas_and_namespace() {
        assert_eq!(peer_list(0, "E", "ns", 1), "");
        assert_eq!(peer_list(1, "demo-master", "prod", 17010), "1:demo-master-0.demo-master.prod.svc.cluster.local:17010");
        assert_ne!(peer_list(3, "E", "a", 1), peer_list(3, "E", "b", 1));
        assert_eq!(peer_list(5, "E", "ns", 1).split(',').count(), 5);
    }

    #[test]
    fn test_master_addresses() {
        assert_eq!(
            master_addresses(2, "demo-master", "ns", 17010),
            vec![
                "demo-master-0.demo-master.ns.svc.cluster.local:17010".to_string(),
                "demo-master-1.demo-master.ns.svc.cluster.local:17010".to_string(),
            ]
        );
    }

    #[test]
    fn test_service_url() {
        assert_eq!(service_host("demo-consul", "ns"), "demo-consul.ns.svc.cluster.local");
        assert_eq!(
            service_url("demo-prometheus", "ns", 9090),
            "http://demo-prometheus.ns.svc.cluster.local:9090"
        );
    }
}
