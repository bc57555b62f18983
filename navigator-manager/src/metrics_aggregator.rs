//! Metrics Aggregator: fans a service-graph metrics query out to every
//! active session concurrently, merges the returned histograms, and
//! derives P99 from the merged cumulative distribution.
//!
//! Queries are targeted: one correlated `ServiceGraphMetricsRequest` per
//! session, rather than a generic fan-out-then-filter query.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use navigator_common::ids::RequestId;
use navigator_common::model::{AggregatedServicePairMetrics, ClusterPairMetrics, LatencyHistogram, ServicePairMetrics};
use navigator_proto::navigator as pb;
use tokio_util::sync::CancellationToken;

use crate::state::ManagerState;

#[derive(Debug, Clone)]
pub struct ServiceGraphQuery {
    pub namespace: String,
    pub service_name: String,
    pub start_unix_ms: i64,
    pub end_unix_ms: i64,
    pub proxy_mode_filter: i32,
}

/// Per-cluster pairs as reported (`detailedInbound`/`detailedOutbound`),
/// plus the set of clusters that actually answered.
#[derive(Debug, Default)]
pub struct ServiceGraphResult {
    pub detailed: Vec<ServicePairMetrics>,
    pub clusters_queried: Vec<String>,
}

/// Issues one correlated `ServiceGraphMetricsRequest` per active session and
/// merges the results. Per-session failures are logged and excluded from
/// `clusters_queried`; the call only fails outright if every session fails.
pub async fn get_service_graph_metrics(
    state: &Arc<ManagerState>,
    query: ServiceGraphQuery,
    cancel: CancellationToken,
) -> Result<ServiceGraphResult, navigator_common::RequestError> {
    let cluster_ids = state.registry.active_cluster_ids().await;
    if cluster_ids.is_empty() {
        return Ok(ServiceGraphResult::default());
    }

    let fanout = cluster_ids.into_iter().map(|cluster_id| {
        let state = state.clone();
        let query = query.clone();
        let cancel = cancel.clone();
        async move {
            let request_id = RequestId::generate();
            let request = pb::ManagerMessage {
                payload: Some(pb::manager_message::Payload::MetricsRequest(
                    pb::ServiceGraphMetricsRequest {
                        request_id: request_id.0.clone(),
                        namespace: query.namespace.clone(),
                        service_name: query.service_name.clone(),
                        time_range: Some(pb::TimeRange {
                            start_unix_ms: query.start_unix_ms,
                            end_unix_ms: query.end_unix_ms,
                        }),
                        proxy_mode: query.proxy_mode_filter,
                    },
                )),
            };
            if state
                .registry
                .send_to_cluster(&cluster_id, request)
                .await
                .is_err()
            {
                tracing::warn!(%cluster_id, "metrics fan-out: session disconnected before send");
                return None;
            }
            match state
                .metrics_correlator
                .issue(
                    cluster_id.clone(),
                    request_id,
                    state.config.request_timeout,
                    state.config.max_pending_per_session,
                    cancel,
                )
                .await
            {
                Ok(response) => {
                    if let Some(err) = response.error {
                        tracing::warn!(%cluster_id, code = %err.code, "metrics fan-out: Edge returned error");
                        return None;
                    }
                    let pairs: Vec<ServicePairMetrics> = response
                        .pairs
                        .into_iter()
                        .filter_map(|p| p.try_into().ok())
                        .collect();
                    Some((cluster_id, pairs))
                }
                Err(e) => {
                    tracing::warn!(%cluster_id, error = %e, "metrics fan-out: correlated request failed");
                    None
                }
            }
        }
    });

    let results = futures_util::future::join_all(fanout).await;

    let mut clusters_queried = Vec::new();
    let mut all_pairs = Vec::new();
    for result in results.into_iter().flatten() {
        clusters_queried.push(result.0.0);
        all_pairs.extend(result.1);
    }

    Ok(ServiceGraphResult {
        detailed: all_pairs,
        clusters_queried,
    })
}

/// Merges per-cluster `ServicePairMetrics` across `ClusterID`s sharing the
/// same `(source, destination)` service pair: request/error rates sum,
/// histograms merge bucket-by-bucket, and each contributing cluster's own
/// figures are retained in `cluster_pairs`.
pub fn aggregate(pairs: &[ServicePairMetrics]) -> Vec<AggregatedServicePairMetrics> {
    let mut grouped: BTreeMap<(String, String, String, String), Vec<&ServicePairMetrics>> = BTreeMap::new();
    for pair in pairs {
        let key = (
            pair.source.namespace.clone(),
            pair.source.service.clone(),
            pair.destination.namespace.clone(),
            pair.destination.service.clone(),
        );
        grouped.entry(key).or_default().push(pair);
    }

    grouped
        .into_iter()
        .map(
            |((source_namespace, source_service, destination_namespace, destination_service), group)| {
                let request_rate: f64 = group.iter().map(|p| p.request_rate).sum();
                let error_rate: f64 = group.iter().map(|p| p.error_rate).sum();
                let histograms: Vec<LatencyHistogram> =
                    group.iter().filter_map(|p| p.latency_distribution.clone()).collect();
                let merged = merge_histograms(&histograms);
                let latency_p99_ms = merged.as_ref().map(p99_ms).unwrap_or(0.0);
                let cluster_pairs = group
                    .iter()
                    .map(|p| ClusterPairMetrics {
                        cluster_id: p.source.cluster_id.clone(),
                        request_rate: p.request_rate,
                        error_rate: p.error_rate,
                        latency_p99_ms: p.latency_distribution.as_ref().map(p99_ms).unwrap_or(0.0),
                        latency_distribution: p.latency_distribution.clone(),
                    })
                    .collect();
                AggregatedServicePairMetrics {
                    source_namespace,
                    source_service,
                    destination_namespace,
                    destination_service,
                    request_rate,
                    error_rate,
                    latency_p99_ms,
                    latency_distribution: merged,
                    cluster_pairs,
                }
            },
        )
        .collect()
}

/// Histogram merge:
/// 1. union all `le` boundaries, sorted ascending
/// 2. cumulative -> per-bucket for each source
/// 3. sum per-bucket counts across sources at each shared `le`
/// 4. re-cumulate
pub fn merge_histograms(histograms: &[LatencyHistogram]) -> Option<LatencyHistogram> {
    if histograms.is_empty() {
        return None;
    }

    let mut boundaries: Vec<f64> = histograms
        .iter()
        .flat_map(|h| h.buckets.iter().map(|(le, _)| *le))
        .collect();
    boundaries.sort_by(|a, b| a.partial_cmp(b).unwrap());
    boundaries.dedup();

    let mut per_bucket_sum = vec![0u64; boundaries.len()];
    for histogram in histograms {
        let mut sorted = histogram.buckets.clone();
        sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        let mut previous_cumulative = 0u64;
        let mut source_idx = 0usize;
        for (i, &le) in boundaries.iter().enumerate() {
            if source_idx < sorted.len() && sorted[source_idx].0 == le {
                let cumulative = sorted[source_idx].1;
                let per_bucket = cumulative.saturating_sub(previous_cumulative);
                per_bucket_sum[i] += per_bucket;
                previous_cumulative = cumulative;
                source_idx += 1;
            }
        }
    }

    let mut cumulative = 0u64;
    let mut merged_buckets = Vec::with_capacity(boundaries.len());
    for (le, count) in boundaries.into_iter().zip(per_bucket_sum) {
        cumulative += count;
        merged_buckets.push((le, cumulative));
    }
    let total_count = histograms.iter().map(|h| h.total_count).sum();

    Some(LatencyHistogram {
        buckets: merged_buckets,
        total_count,
    })
}

/// P99 derivation: the smallest `le` whose cumulative count is >= 0.99 *
/// total; falls back to the largest `le` if none qualify (e.g. a single
/// `le = +inf` bucket).
pub fn p99_ms(histogram: &LatencyHistogram) -> f64 {
    let threshold = 0.99 * histogram.total_count as f64;
    for (le, cumulative) in &histogram.buckets {
        if *cumulative as f64 >= threshold {
            return *le;
        }
    }
    histogram.buckets.last().map(|(le, _)| *le).unwrap_or(0.0)
}

#[allow(dead_code)]
pub const DEFAULT_METRICS_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;
    use navigator_common::ids::ClusterId;
    use navigator_common::model::ServiceEndpointRef;

    fn endpoint(cluster: &str) -> ServiceEndpointRef {
        ServiceEndpointRef {
            cluster_id: ClusterId::from(cluster),
            namespace: "default".into(),
            service: "frontend".into(),
        }
    }

    fn destination() -> ServiceEndpointRef {
        ServiceEndpointRef {
            cluster_id: ClusterId::from("any"),
            namespace: "default".into(),
            service: "backend".into(),
        }
    }

    /// Seed scenario S5: two clusters report the same service pair with
    /// request rates 100 and 50, histograms {10->90,100->100} and
    /// {10->30,100->50}. Aggregated rate 150, merged cumulative
    /// {10->120,100->150}, P99 target 148.5 -> smallest le >= 148.5 is 100.
    #[test]
    fn seed_scenario_s5_merges_and_derives_p99() {
        let a = ServicePairMetrics {
            source: endpoint("prod-eu"),
            destination: destination(),
            request_rate: 100.0,
            error_rate: 0.0,
            latency_p99_ms: 0.0,
            latency_distribution: Some(LatencyHistogram {
                buckets: vec![(10.0, 90), (100.0, 100)],
                total_count: 100,
            }),
        };
        let b = ServicePairMetrics {
            source: endpoint("prod-us"),
            destination: destination(),
            request_rate: 50.0,
            error_rate: 0.0,
            latency_p99_ms: 0.0,
            latency_distribution: Some(LatencyHistogram {
                buckets: vec![(10.0, 30), (100.0, 50)],
                total_count: 50,
            }),
        };

        let merged = aggregate(&[a, b]);
        assert_eq!(merged.len(), 1);
        let pair = &merged[0];
        assert_eq!(pair.request_rate, 150.0);
        assert_eq!(pair.cluster_pairs.len(), 2);
        let histogram = pair.latency_distribution.as_ref().unwrap();
        assert_eq!(histogram.buckets, vec![(10.0, 120), (100.0, 150)]);
        assert_eq!(pair.latency_p99_ms, 100.0);
    }

    #[test]
    fn merged_histogram_totals_and_cumulatives_sum_exactly() {
        let h1 = LatencyHistogram {
            buckets: vec![(5.0, 10), (50.0, 20)],
            total_count: 20,
        };
        let h2 = LatencyHistogram {
            buckets: vec![(5.0, 1), (50.0, 5)],
            total_count: 5,
        };
        let merged = merge_histograms(&[h1.clone(), h2.clone()]).unwrap();
        assert_eq!(merged.total_count, h1.total_count + h2.total_count);
        for (le, cumulative) in &merged.buckets {
            let expected: u64 = [&h1, &h2]
                .iter()
                .map(|h| h.buckets.iter().find(|(l, _)| l == le).map(|(_, c)| *c).unwrap_or(0))
                .sum();
            assert_eq!(*cumulative, expected);
        }
    }

    #[test]
    fn single_plus_infinity_bucket_is_its_own_p99() {
        let histogram = LatencyHistogram {
            buckets: vec![(f64::INFINITY, 42)],
            total_count: 42,
        };
        assert_eq!(p99_ms(&histogram), f64::INFINITY);
    }

    #[test]
    fn differing_bucket_boundaries_across_sources_union_correctly() {
        let h1 = LatencyHistogram {
            buckets: vec![(10.0, 5), (20.0, 8)],
            total_count: 8,
        };
        let h2 = LatencyHistogram {
            buckets: vec![(15.0, 2), (20.0, 4)],
            total_count: 4,
        };
        let merged = merge_histograms(&[h1, h2]).unwrap();
        assert_eq!(merged.buckets.iter().map(|(le, _)| *le).collect::<Vec<_>>(), vec![10.0, 15.0, 20.0]);
        assert_eq!(merged.total_count, 12);
        assert_eq!(merged.buckets.last().unwrap().1, 12);
    }
}
