use std::sync::Arc;

use relaygate_core::{ApiKeyRecord, ChainRoute, ChainRouter, GatewayError, Identity};
use relaygate_observability::{CacheState, MetricsSink};
use relaygate_store::{AuthCache, MetadataStore, QuotaCounter};
use reqwest::Client;

use crate::http::HostSemaphores;
use crate::path::Route;

/// Shared, process-wide state every accepted connection's task reads from.
/// Caches and the quota registry are internally synchronised; cloning this
/// struct is cheap (everything behind an `Arc`).
#[derive(Clone)]
pub struct GatewayState {
    pub auth_cache: Arc<AuthCache>,
    pub quota: Arc<QuotaCounter>,
    pub chain_router: Arc<ChainRouter>,
    pub store: Arc<dyn MetadataStore>,
    pub metrics: Arc<dyn MetricsSink>,
    pub http_client: Client,
    pub host_semaphores: Arc<HostSemaphores>,
}

impl GatewayState {
    pub fn new(
        chain_router: ChainRouter,
        store: Arc<dyn MetadataStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        GatewayState {
            auth_cache: Arc::new(AuthCache::new()),
            quota: Arc::new(QuotaCounter::new()),
            chain_router: Arc::new(chain_router),
            store,
            metrics,
            http_client: Client::new(),
            host_semaphores: Arc::new(HostSemaphores::new()),
        }
    }
}

/// Outcome of running a request through admission (C1, C3, C4, C5). The
/// caller hands `Admitted` off to whichever of C6/C7/C8 applies.
pub enum AdmissionOutcome {
    Health,
    Admitted {
        record: ApiKeyRecord,
        route: ChainRoute,
    },
    Rejected(GatewayError),
}

impl GatewayState {
    pub async fn admit(&self, route: Route, client_ip: &str) -> AdmissionOutcome {
        match route {
            Route::Health => AdmissionOutcome::Health,
            Route::Keyed { api_key, .. } => self.admit_keyed(&api_key).await,
            Route::Public { chain, .. } => self.admit_public(&chain, client_ip).await,
        }
    }

    async fn admit_keyed(&self, api_key: &str) -> AdmissionOutcome {
        let record = match self.auth_cache.get(api_key) {
            Some(record) => {
                self.metrics.record_cache_state(CacheState::Hit);
                record
            }
            None => match self.store.lookup_key(api_key).await {
                Ok(record) => {
                    self.metrics.record_cache_state(CacheState::Miss);
                    self.auth_cache.insert(record.clone());
                    record
                }
                Err(relaygate_core::StoreError::NotFound) => {
                    self.metrics.record_cache_state(CacheState::Invalid);
                    return AdmissionOutcome::Rejected(GatewayError::UnauthorizedKey);
                }
                Err(e) => {
                    return AdmissionOutcome::Rejected(GatewayError::from(e));
                }
            },
        };

        let identity = Identity::keyed(api_key);
        if !self.quota.increment(&identity, record.limit).await {
            self.auth_cache.evict(api_key);
            return AdmissionOutcome::Rejected(GatewayError::QuotaExceeded);
        }

        let Some(chain_route) = self.chain_router.get(&record.chain).cloned() else {
            return AdmissionOutcome::Rejected(GatewayError::UpstreamUnavailable(
                "chain not routable".to_string(),
            ));
        };

        AdmissionOutcome::Admitted {
            record,
            route: chain_route,
        }
    }

    async fn admit_public(&self, chain: &str, client_ip: &str) -> AdmissionOutcome {
        match self.store.chain_exists(chain).await {
            Ok(true) => {}
            Ok(false) => {
                return AdmissionOutcome::Rejected(GatewayError::UnknownChain(chain.to_string()))
            }
            Err(e) => {
                return AdmissionOutcome::Rejected(GatewayError::from(e));
            }
        }

        let identity = Identity::public(client_ip, chain);
        let record = ApiKeyRecord::public(chain);
        if !self.quota.increment(&identity, record.limit).await {
            return AdmissionOutcome::Rejected(GatewayError::QuotaExceeded);
        }

        let Some(chain_route) = self.chain_router.get(chain).cloned() else {
            return AdmissionOutcome::Rejected(GatewayError::UpstreamUnavailable(
                "chain not routable".to_string(),
            ));
        };

        AdmissionOutcome::Admitted {
            record,
            route: chain_route,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_observability::PrometheusMetricsSink;
    use relaygate_store::MockMetadataStore;

    fn state_with(store: MockMetadataStore, router: ChainRouter) -> GatewayState {
        GatewayState::new(
            router,
            Arc::new(store),
            Arc::new(PrometheusMetricsSink::new().unwrap()),
        )
    }

    fn ethereum_router() -> ChainRouter {
        let mut router = ChainRouter::new();
        router.insert(ChainRoute::new("ethereum", vec!["http://node1".into()], vec![]));
        router
    }

    #[tokio::test]
    async fn test_health_bypasses_everything() {
        let state = state_with(MockMetadataStore::new(), ChainRouter::new());
        let outcome = state.admit(Route::Health, "1.2.3.4").await;
        assert!(matches!(outcome, AdmissionOutcome::Health));
    }

    #[tokio::test]
    async fn test_keyed_admission_on_store_hit() {
        let rec = ApiKeyRecord {
            api_key: "k1".into(),
            chain: "ethereum".into(),
            org: "acme".into(),
            org_id: "1".into(),
            limit: 100,
        };
        let store = MockMetadataStore::new().with_key(rec.clone());
        let state = state_with(store, ethereum_router());

        let outcome = state
            .admit(
                Route::Keyed {
                    api_key: "k1".into(),
                    residual: "".into(),
                },
                "1.2.3.4",
            )
            .await;

        match outcome {
            AdmissionOutcome::Admitted { record, route } => {
                assert_eq!(record.api_key, "k1");
                assert_eq!(route.chain, "ethereum");
            }
            _ => panic!("expected admission"),
        }
        // second pass should now hit the auth cache
        assert_eq!(state.auth_cache.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_key_is_403() {
        let state = state_with(MockMetadataStore::new(), ethereum_router());
        let outcome = state
            .admit(
                Route::Keyed {
                    api_key: "nope".into(),
                    residual: "".into(),
                },
                "1.2.3.4",
            )
            .await;
        assert!(matches!(outcome, AdmissionOutcome::Rejected(GatewayError::UnauthorizedKey)));
    }

    #[tokio::test]
    async fn test_quota_denial_evicts_auth_cache_entry() {
        let rec = ApiKeyRecord {
            api_key: "k1".into(),
            chain: "ethereum".into(),
            org: "acme".into(),
            org_id: "1".into(),
            limit: 1,
        };
        let store = MockMetadataStore::new().with_key(rec);
        let state = state_with(store, ethereum_router());

        let route = Route::Keyed {
            api_key: "k1".into(),
            residual: "".into(),
        };

        let first = state.admit(route.clone(), "1.2.3.4").await;
        assert!(matches!(first, AdmissionOutcome::Admitted { .. }));
        assert_eq!(state.auth_cache.len(), 1);

        let second = state.admit(route, "1.2.3.4").await;
        assert!(matches!(second, AdmissionOutcome::Rejected(GatewayError::QuotaExceeded)));
        assert_eq!(state.auth_cache.len(), 0, "quota denial must evict the api key");
    }

    #[tokio::test]
    async fn test_public_route_unknown_chain_is_400() {
        let state = state_with(MockMetadataStore::new(), ChainRouter::new());
        let outcome = state
            .admit(
                Route::Public {
                    chain: "bitcoin".into(),
                    residual: "".into(),
                },
                "1.2.3.4",
            )
            .await;
        assert!(matches!(outcome, AdmissionOutcome::Rejected(GatewayError::UnknownChain(_))));
    }

    #[tokio::test]
    async fn test_public_route_admitted_uses_synthetic_record() {
        let store = MockMetadataStore::new().with_chain("ethereum");
        let state = state_with(store, ethereum_router());
        let outcome = state
            .admit(
                Route::Public {
                    chain: "ethereum".into(),
                    residual: "".into(),
                },
                "5.6.7.8",
            )
            .await;
        match outcome {
            AdmissionOutcome::Admitted { record, .. } => {
                assert_eq!(record.org, "public");
                assert_eq!(record.limit, 10_000);
            }
            _ => panic!("expected admission"),
        }
    }

    #[tokio::test]
    async fn test_distinct_public_identities_have_independent_quota() {
        let store = MockMetadataStore::new().with_chain("ethereum");
        let mut router = ethereum_router();
        router.insert(ChainRoute::new("ethereum", vec!["http://node1".into()], vec![]));
        let state = state_with(store, router);

        let route = Route::Public {
            chain: "ethereum".into(),
            residual: "".into(),
        };
        let a = state.admit(route.clone(), "1.1.1.1").await;
        let b = state.admit(route, "2.2.2.2").await;
        assert!(matches!(a, AdmissionOutcome::Admitted { .. }));
        assert!(matches!(b, AdmissionOutcome::Admitted { .. }));
    }
}
