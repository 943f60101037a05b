use std::collections::HashMap;

use serde::Deserialize;

/// One chain's ordered upstream pools, loaded once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRoute {
    pub chain: String,
    pub http_upstreams: Vec<String>,
    pub ws_upstreams: Vec<String>,
}

impl ChainRoute {
    pub fn new(chain: impl Into<String>, http_upstreams: Vec<String>, ws_upstreams: Vec<String>) -> Self {
        ChainRoute {
            chain: chain.into(),
            http_upstreams,
            ws_upstreams,
        }
    }

    /// `http_upstreams[i % N]`, per the round-robin retry scheme.
    pub fn http_upstream(&self, attempt: usize) -> Option<&str> {
        if self.http_upstreams.is_empty() {
            return None;
        }
        let idx = attempt % self.http_upstreams.len();
        self.http_upstreams.get(idx).map(String::as_str)
    }

    pub fn ws_upstream(&self) -> Option<&str> {
        self.ws_upstreams.first().map(String::as_str)
    }
}

/// O(1) lookup table of `chain -> ChainRoute`, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ChainRouter {
    routes: HashMap<String, ChainRoute>,
}

impl ChainRouter {
    pub fn new() -> Self {
        ChainRouter {
            routes: HashMap::new(),
        }
    }

    pub fn insert(&mut self, route: ChainRoute) {
        self.routes.insert(route.chain.clone(), route);
    }

    pub fn get(&self, chain: &str) -> Option<&ChainRoute> {
        self.routes.get(chain)
    }

    pub fn contains(&self, chain: &str) -> bool {
        self.routes.contains_key(chain)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Build a router from a parsed `ChainFile`, skipping empty URLs.
    pub fn from_chain_file(file: &ChainFile) -> Self {
        let mut router = ChainRouter::new();
        for (name, entry) in &file.chains {
            let http_upstreams: Vec<String> = entry
                .http
                .iter()
                .map(|u| u.url.clone())
                .filter(|url| !url.is_empty())
                .collect();
            let ws_upstreams: Vec<String> = entry
                .ws
                .iter()
                .map(|u| u.url.clone())
                .filter(|url| !url.is_empty())
                .collect();
            router.insert(ChainRoute::new(name.clone(), http_upstreams, ws_upstreams));
        }
        router
    }
}

/// Deserialized shape of the YAML chain-map configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainFile {
    pub chains: HashMap<String, ChainFileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainFileEntry {
    #[serde(rename = "type", default)]
    pub chain_type: String,
    #[serde(default)]
    pub http: Vec<UrlEntry>,
    #[serde(default)]
    pub ws: Vec<UrlEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlEntry {
    #[serde(default)]
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_route() -> ChainRoute {
        ChainRoute::new(
            "ethereum",
            vec!["http://a".into(), "http://b".into(), "http://c".into()],
            vec!["ws://a".into()],
        )
    }

    #[test]
    fn test_round_robin_upstream_selection() {
        let route = sample_route();
        assert_eq!(route.http_upstream(0), Some("http://a"));
        assert_eq!(route.http_upstream(1), Some("http://b"));
        assert_eq!(route.http_upstream(2), Some("http://c"));
        assert_eq!(route.http_upstream(3), Some("http://a"));
    }

    #[test]
    fn test_empty_http_upstreams_returns_none() {
        let route = ChainRoute::new("solo-ws", vec![], vec!["ws://a".into()]);
        assert_eq!(route.http_upstream(0), None);
    }

    #[test]
    fn test_router_lookup() {
        let mut router = ChainRouter::new();
        router.insert(sample_route());
        assert!(router.contains("ethereum"));
        assert!(!router.contains("bitcoin"));
        assert_eq!(router.get("ethereum").unwrap().chain, "ethereum");
    }

    #[test]
    fn test_from_chain_file_skips_empty_urls() {
        let yaml = r#"
chains:
  ethereum:
    type: evm
    http:
      - url: "http://node1"
      - url: ""
      - url: "http://node2"
    ws:
      - url: "ws://node1"
  solana:
    type: svm
    http:
      - url: "http://sol-node"
"#;
        let file: ChainFile = serde_yaml::from_str(yaml).unwrap();
        let router = ChainRouter::from_chain_file(&file);

        assert_eq!(router.len(), 2);
        let eth = router.get("ethereum").unwrap();
        assert_eq!(eth.http_upstreams, vec!["http://node1", "http://node2"]);
        assert_eq!(eth.ws_upstreams, vec!["ws://node1"]);

        let sol = router.get("solana").unwrap();
        assert!(sol.ws_upstreams.is_empty());
    }

    #[test]
    fn test_empty_chain_file_yields_empty_router() {
        let yaml = "chains: {}";
        let file: ChainFile = serde_yaml::from_str(yaml).unwrap();
        let router = ChainRouter::from_chain_file(&file);
        assert!(router.is_empty());
    }
}
