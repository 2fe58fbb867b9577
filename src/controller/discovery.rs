//! Contract address discovery with a TTL cache
//!
//! Every rollup component needs the set of L1/L2 contract addresses for its
//! network. The [`DiscoveryCache`] resolves that set through one of several
//! strategies and keeps the result per (namespace, network, chain-id) key until the
//! configured timeout elapses; expiry is lazy, checked on the next lookup.
//!
//! With `method: auto` the strategies are tried in a fixed priority order
//! and the first success wins:
//!
//! 1. `system-config`: read the getters of the SystemConfig contract named
//!    in the spec over L1 RPC
//! 2. `l2-predeploys`: confirm the L2 endpoint serves the expected chain
//!    id and use the fixed predeploy address space
//! 3. `registry`: query the external registry service named in the spec
//! 4. `well-known`: built-in table for recognized network names
//! 5. `manual`: addresses supplied verbatim in the spec
//!
//! The cache is an in-process mutex-guarded map handed to the controllers
//! through their shared context. Concurrent misses for the same key may
//! each recompute; recomputation is idempotent and cheap, so the miss path
//! is deliberately not serialized.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::controller::rpc;
use crate::crd::types::{AddressSet, DiscoveryMethod};
use crate::crd::OptimismNetwork;
use crate::error::{Error, Result};

/// Canonical names for entries in a resolved [`AddressSet`]
pub mod contracts {
    pub const SYSTEM_CONFIG: &str = "SystemConfigProxy";
    pub const OPTIMISM_PORTAL: &str = "OptimismPortalProxy";
    pub const L1_STANDARD_BRIDGE: &str = "L1StandardBridgeProxy";
    pub const L1_CROSS_DOMAIN_MESSENGER: &str = "L1CrossDomainMessengerProxy";
    pub const DISPUTE_GAME_FACTORY: &str = "DisputeGameFactoryProxy";
    pub const L2_OUTPUT_ORACLE: &str = "L2OutputOracleProxy";
    pub const BATCH_INBOX: &str = "BatchInbox";

    pub const L2_CROSS_DOMAIN_MESSENGER: &str = "L2CrossDomainMessenger";
    pub const L2_STANDARD_BRIDGE: &str = "L2StandardBridge";
    pub const L2_TO_L1_MESSAGE_PASSER: &str = "L2ToL1MessagePasser";
    pub const L1_BLOCK: &str = "L1Block";
    pub const GAS_PRICE_ORACLE: &str = "GasPriceOracle";
}

// Function selectors for the SystemConfig getters queried by the
// system-config strategy.
const SEL_OPTIMISM_PORTAL: &str = "0x0a49cb03"; // optimismPortal()
const SEL_L1_STANDARD_BRIDGE: &str = "0x078f29cf"; // l1StandardBridge()
const SEL_L1_CROSS_DOMAIN_MESSENGER: &str = "0xa7119869"; // l1CrossDomainMessenger()
const SEL_DISPUTE_GAME_FACTORY: &str = "0xf2b4e617"; // disputeGameFactory()
const SEL_BATCH_INBOX: &str = "0xdac6e63a"; // batchInbox()

/// Fixed predeploy addresses present on every OP-Stack L2
const L2_PREDEPLOYS: &[(&str, &str)] = &[
    (
        contracts::L2_CROSS_DOMAIN_MESSENGER,
        "0x4200000000000000000000000000000000000007",
    ),
    (
        contracts::L2_STANDARD_BRIDGE,
        "0x4200000000000000000000000000000000000010",
    ),
    (
        contracts::L2_TO_L1_MESSAGE_PASSER,
        "0x4200000000000000000000000000000000000016",
    ),
    (contracts::L1_BLOCK, "0x4200000000000000000000000000000000000015"),
    (
        contracts::GAS_PRICE_ORACLE,
        "0x420000000000000000000000000000000000000F",
    ),
];

/// The batch inbox is not a deployed contract; by convention it is derived
/// from the L2 chain id (`0xff` followed by the zero-padded decimal id).
pub fn batch_inbox_address(chain_id: u64) -> String {
    format!("0xff{chain_id:0>38}")
}

/// Built-in address table for recognized named networks
fn well_known_addresses(network_name: &str) -> Option<BTreeMap<String, String>> {
    let entries: &[(&str, &str)] = match network_name {
        "op-mainnet" => &[
            (contracts::SYSTEM_CONFIG, "0x229047fed2591dbec1eF1118d64F7aF3dB9EB290"),
            (contracts::OPTIMISM_PORTAL, "0xbEb5Fc579115071764c7423A4f12eDde41f106Ed"),
            (contracts::L1_STANDARD_BRIDGE, "0x99C9fc46f92E8a1c0deC1b1747d010903E884bE1"),
            (
                contracts::L1_CROSS_DOMAIN_MESSENGER,
                "0x25ace71c97B33Cc4729CF772ae268934F7ab5fA1",
            ),
            (contracts::L2_OUTPUT_ORACLE, "0xdfe97868233d1aa22e815A266982F2cf17685a27"),
        ],
        "op-sepolia" => &[
            (contracts::SYSTEM_CONFIG, "0x034edD2A225f7f429A63E0f1D2084B9E0A93b538"),
            (contracts::OPTIMISM_PORTAL, "0x16Fc5058F25648194471939df75CF27A2fdC48BC"),
            (contracts::L1_STANDARD_BRIDGE, "0xFBb0621E0B23b5478B630BD55a5f21f67730B0F1"),
            (
                contracts::L1_CROSS_DOMAIN_MESSENGER,
                "0x58Cc85b8D04EA49cC6DBd3CbFFd00B4B8D6cb3ef",
            ),
            (contracts::L2_OUTPUT_ORACLE, "0x90E9c4f8a994a250F6aEfd61CAFb4F2e895D458F"),
        ],
        "base-mainnet" => &[
            (contracts::SYSTEM_CONFIG, "0x73a79Fab69143498Ed3712e519A88a918e1f4072"),
            (contracts::OPTIMISM_PORTAL, "0x49048044D57e1C92A77f79988d21Fa8fAF74E97e"),
            (contracts::L1_STANDARD_BRIDGE, "0x3154Cf16ccdb4C6d922629664174b904d80F2C35"),
            (
                contracts::L1_CROSS_DOMAIN_MESSENGER,
                "0x866E82a600A1414e583f7F13623F1aC5d58b0Afa",
            ),
            (contracts::L2_OUTPUT_ORACLE, "0x56315b90c40730925ec5485cf004d835058518A0"),
        ],
        "base-sepolia" => &[
            (contracts::SYSTEM_CONFIG, "0xf272670eb55e895584501d564AfEB048bEd26194"),
            (contracts::OPTIMISM_PORTAL, "0x49f53e41452C74589E85cA1677426Ba426459e85"),
            (contracts::L1_STANDARD_BRIDGE, "0xfd0Bf71F60660E2f608ed56e1659C450eB113120"),
            (
                contracts::L1_CROSS_DOMAIN_MESSENGER,
                "0xC34855F4De64F1840e5686e64278da901e261f20",
            ),
            (contracts::L2_OUTPUT_ORACLE, "0x84457ca9D0163FbC4bbfe4Dfbb20ba46e48DF254"),
        ],
        _ => return None,
    };

    Some(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

// Keyed per namespace as well; same-named networks in different namespaces
// may carry different discovery settings.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct DiscoveryKey {
    namespace: String,
    network: String,
    chain_id: u64,
}

struct CacheEntry {
    resolved: AddressSet,
    resolved_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.resolved_at.elapsed() < self.ttl
    }
}

/// TTL-keyed cache of resolved address sets
pub struct DiscoveryCache {
    entries: Mutex<HashMap<DiscoveryKey, CacheEntry>>,
    http: reqwest::Client,
}

impl DiscoveryCache {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            http,
        }
    }

    /// Resolve the address set for a network, reusing a fresh cache entry
    /// when one exists.
    pub async fn resolve(&self, net: &OptimismNetwork) -> Result<AddressSet> {
        let key = DiscoveryKey {
            namespace: net.metadata.namespace.clone().unwrap_or_default(),
            network: self.network_identifier(net),
            chain_id: net.spec.chain_id,
        };

        {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = entries.get(&key) {
                if entry.is_fresh() {
                    debug!(network = %key.network, "using cached address set");
                    return Ok(entry.resolved.clone());
                }
            }
        }
        // Lock released before any network call; parallel misses for the
        // same key may recompute, the last write wins.

        let resolved = self.discover(net).await?;

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            CacheEntry {
                resolved: resolved.clone(),
                resolved_at: Instant::now(),
                ttl: net.spec.cache_timeout(),
            },
        );
        Ok(resolved)
    }

    fn network_identifier(&self, net: &OptimismNetwork) -> String {
        net.spec
            .network_name
            .clone()
            .or_else(|| net.metadata.name.clone())
            .unwrap_or_default()
    }

    async fn discover(&self, net: &OptimismNetwork) -> Result<AddressSet> {
        match net.spec.discovery.method {
            DiscoveryMethod::Auto => self.discover_auto(net).await,
            DiscoveryMethod::SystemConfig => self.from_system_config(net).await,
            DiscoveryMethod::L2Predeploys => self.from_l2_predeploys(net).await,
            DiscoveryMethod::Registry => self.from_registry(net).await,
            DiscoveryMethod::WellKnown => self.from_well_known(net),
            DiscoveryMethod::Manual => self.from_manual(net),
        }
    }

    /// Try every applicable strategy in priority order; first success wins.
    async fn discover_auto(&self, net: &OptimismNetwork) -> Result<AddressSet> {
        let mut failures: Vec<String> = Vec::new();

        if net.spec.system_config_address.is_some() {
            match self.from_system_config(net).await {
                Ok(set) => return Ok(set),
                Err(e) => {
                    warn!(error = %e, "system-config discovery failed, falling through");
                    failures.push(format!("system-config: {e}"));
                }
            }
        }

        if net.spec.l2_rpc_url.is_some() {
            match self.from_l2_predeploys(net).await {
                Ok(set) => return Ok(set),
                Err(e) => {
                    warn!(error = %e, "l2-predeploys discovery failed, falling through");
                    failures.push(format!("l2-predeploys: {e}"));
                }
            }
        }

        if net.spec.registry_url.is_some() {
            match self.from_registry(net).await {
                Ok(set) => return Ok(set),
                Err(e) => {
                    warn!(error = %e, "registry discovery failed, falling through");
                    failures.push(format!("registry: {e}"));
                }
            }
        }

        if net.spec.network_name.is_some() {
            match self.from_well_known(net) {
                Ok(set) => return Ok(set),
                Err(e) => failures.push(format!("well-known: {e}")),
            }
        }

        if net.spec.contract_addresses.is_some() {
            match self.from_manual(net) {
                Ok(set) => return Ok(set),
                Err(e) => failures.push(format!("manual: {e}")),
            }
        }

        if failures.is_empty() {
            Err(Error::DiscoveryError(
                "no discovery source configured: set systemConfigAddress, l2RpcUrl, \
                 registryUrl, a recognized networkName, or contractAddresses"
                    .to_string(),
            ))
        } else {
            Err(Error::DiscoveryError(format!(
                "all discovery strategies failed: {}",
                failures.join("; ")
            )))
        }
    }

    async fn from_system_config(&self, net: &OptimismNetwork) -> Result<AddressSet> {
        let system_config = net.spec.system_config_address.as_deref().ok_or_else(|| {
            Error::DiscoveryError("systemConfigAddress is not set".to_string())
        })?;
        let url = &net.spec.l1_rpc_url;
        let timeout = net.spec.rpc_timeout();

        let mut addresses = BTreeMap::new();
        addresses.insert(
            contracts::SYSTEM_CONFIG.to_string(),
            system_config.to_string(),
        );

        for (name, selector) in [
            (contracts::OPTIMISM_PORTAL, SEL_OPTIMISM_PORTAL),
            (contracts::L1_STANDARD_BRIDGE, SEL_L1_STANDARD_BRIDGE),
            (
                contracts::L1_CROSS_DOMAIN_MESSENGER,
                SEL_L1_CROSS_DOMAIN_MESSENGER,
            ),
            (contracts::DISPUTE_GAME_FACTORY, SEL_DISPUTE_GAME_FACTORY),
        ] {
            let word = rpc::eth_call(&self.http, url, system_config, selector, timeout).await?;
            addresses.insert(name.to_string(), rpc::address_from_word(&word)?);
        }

        let inbox_word =
            rpc::eth_call(&self.http, url, system_config, SEL_BATCH_INBOX, timeout).await?;
        addresses.insert(
            contracts::BATCH_INBOX.to_string(),
            rpc::address_from_word(&inbox_word)?,
        );

        info!(system_config, "resolved addresses from SystemConfig");
        Ok(finish(addresses, DiscoveryMethod::SystemConfig))
    }

    async fn from_l2_predeploys(&self, net: &OptimismNetwork) -> Result<AddressSet> {
        let url = net
            .spec
            .l2_rpc_url
            .as_deref()
            .ok_or_else(|| Error::DiscoveryError("l2RpcUrl is not set".to_string()))?;

        let reported = rpc::fetch_chain_id(&self.http, url, net.spec.rpc_timeout()).await?;
        if reported != net.spec.chain_id {
            return Err(Error::DiscoveryError(format!(
                "L2 endpoint {url} serves chain {reported}, expected {}",
                net.spec.chain_id
            )));
        }

        let mut addresses: BTreeMap<String, String> = L2_PREDEPLOYS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        addresses.insert(
            contracts::BATCH_INBOX.to_string(),
            batch_inbox_address(net.spec.chain_id),
        );

        info!(url, "resolved addresses from L2 predeploys");
        Ok(finish(addresses, DiscoveryMethod::L2Predeploys))
    }

    async fn from_registry(&self, net: &OptimismNetwork) -> Result<AddressSet> {
        let base = net
            .spec
            .registry_url
            .as_deref()
            .ok_or_else(|| Error::DiscoveryError("registryUrl is not set".to_string()))?;
        let url = format!(
            "{}/networks/{}/{}/addresses",
            base.trim_end_matches('/'),
            net.spec.l1_chain_id,
            net.spec.chain_id
        );

        let resp = self
            .http
            .get(&url)
            .timeout(net.spec.rpc_timeout())
            .send()
            .await
            .map_err(|e| Error::DiscoveryError(format!("registry request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::DiscoveryError(format!(
                "registry returned HTTP {} for {url}",
                resp.status()
            )));
        }

        let mut addresses: BTreeMap<String, String> = resp
            .json()
            .await
            .map_err(|e| Error::DiscoveryError(format!("invalid registry response: {e}")))?;
        if addresses.is_empty() {
            return Err(Error::DiscoveryError(format!(
                "registry returned an empty address set for {url}"
            )));
        }
        addresses
            .entry(contracts::BATCH_INBOX.to_string())
            .or_insert_with(|| batch_inbox_address(net.spec.chain_id));

        info!(url, "resolved addresses from registry");
        Ok(finish(addresses, DiscoveryMethod::Registry))
    }

    fn from_well_known(&self, net: &OptimismNetwork) -> Result<AddressSet> {
        let name = net
            .spec
            .network_name
            .as_deref()
            .ok_or_else(|| Error::DiscoveryError("networkName is not set".to_string()))?;

        let mut addresses = well_known_addresses(name).ok_or_else(|| {
            Error::DiscoveryError(format!("{name:?} is not a recognized network name"))
        })?;
        addresses.insert(
            contracts::BATCH_INBOX.to_string(),
            batch_inbox_address(net.spec.chain_id),
        );

        info!(name, "resolved addresses from the well-known table");
        Ok(finish(addresses, DiscoveryMethod::WellKnown))
    }

    fn from_manual(&self, net: &OptimismNetwork) -> Result<AddressSet> {
        let mut addresses = net
            .spec
            .contract_addresses
            .clone()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::DiscoveryError("contractAddresses is not set".to_string()))?;
        addresses
            .entry(contracts::BATCH_INBOX.to_string())
            .or_insert_with(|| batch_inbox_address(net.spec.chain_id));

        Ok(finish(addresses, DiscoveryMethod::Manual))
    }
}

fn finish(addresses: BTreeMap<String, String>, method: DiscoveryMethod) -> AddressSet {
    AddressSet {
        addresses,
        discovery_method: method.to_string(),
        last_discovery_time: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::DiscoveryConfig;
    use crate::crd::OptimismNetworkSpec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn network_in(spec: OptimismNetworkSpec, namespace: &str) -> OptimismNetwork {
        let mut net = OptimismNetwork::new("test-net", spec);
        net.metadata.name = Some("test-net".to_string());
        net.metadata.namespace = Some(namespace.to_string());
        net
    }

    fn network(spec: OptimismNetworkSpec) -> OptimismNetwork {
        network_in(spec, "rollup")
    }

    fn base_spec() -> OptimismNetworkSpec {
        OptimismNetworkSpec {
            network_name: None,
            chain_id: 11155420,
            l1_chain_id: 11155111,
            l1_rpc_url: "http://l1.invalid:8545".to_string(),
            l1_beacon_url: None,
            l2_rpc_url: None,
            system_config_address: None,
            registry_url: None,
            contract_addresses: None,
            discovery: DiscoveryConfig::default(),
            rpc_timeout_seconds: 2,
            rollup_config_ref: None,
            genesis_ref: None,
        }
    }

    #[test]
    fn test_batch_inbox_address_derivation() {
        assert_eq!(
            batch_inbox_address(10),
            "0xff00000000000000000000000000000000000010"
        );
        assert_eq!(batch_inbox_address(10).len(), 42);
        assert_eq!(batch_inbox_address(11155420).len(), 42);
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_well_known() {
        // Only the 4th-priority source is available.
        let mut spec = base_spec();
        spec.network_name = Some("op-sepolia".to_string());
        let cache = DiscoveryCache::new(reqwest::Client::new());

        let set = cache.resolve(&network(spec)).await.unwrap();
        assert_eq!(set.discovery_method, "well-known");
        assert!(set.get(contracts::SYSTEM_CONFIG).is_some());
        assert!(set.get(contracts::BATCH_INBOX).is_some());
    }

    #[tokio::test]
    async fn test_unknown_network_name_fails() {
        let mut spec = base_spec();
        spec.network_name = Some("op-unobtainium".to_string());
        let cache = DiscoveryCache::new(reqwest::Client::new());

        let err = cache.resolve(&network(spec)).await.unwrap_err();
        assert!(matches!(err, Error::DiscoveryError(_)));
    }

    #[tokio::test]
    async fn test_manual_addresses_win_when_method_is_manual() {
        let mut spec = base_spec();
        spec.discovery.method = DiscoveryMethod::Manual;
        spec.contract_addresses = Some(
            [(
                contracts::SYSTEM_CONFIG.to_string(),
                "0x034edD2A225f7f429A63E0f1D2084B9E0A93b538".to_string(),
            )]
            .into_iter()
            .collect(),
        );
        let cache = DiscoveryCache::new(reqwest::Client::new());

        let set = cache.resolve(&network(spec)).await.unwrap();
        assert_eq!(set.discovery_method, "manual");
        assert_eq!(
            set.get(contracts::SYSTEM_CONFIG),
            Some("0x034edD2A225f7f429A63E0f1D2084B9E0A93b538")
        );
    }

    #[tokio::test]
    async fn test_registry_resolution() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/networks/11155111/11155420/addresses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "SystemConfigProxy": "0x034edD2A225f7f429A63E0f1D2084B9E0A93b538",
                "OptimismPortalProxy": "0x16Fc5058F25648194471939df75CF27A2fdC48BC",
            })))
            .mount(&server)
            .await;

        let mut spec = base_spec();
        spec.registry_url = Some(server.uri());
        let cache = DiscoveryCache::new(reqwest::Client::new());

        let set = cache.resolve(&network(spec)).await.unwrap();
        assert_eq!(set.discovery_method, "registry");
        assert!(set.get(contracts::OPTIMISM_PORTAL).is_some());
        // Derived when the registry does not carry it.
        assert_eq!(
            set.get(contracts::BATCH_INBOX),
            Some(batch_inbox_address(11155420).as_str())
        );
    }

    #[tokio::test]
    async fn test_registry_failure_falls_through_to_well_known() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut spec = base_spec();
        spec.registry_url = Some(server.uri());
        spec.network_name = Some("op-sepolia".to_string());
        let cache = DiscoveryCache::new(reqwest::Client::new());

        let set = cache.resolve(&network(spec)).await.unwrap();
        assert_eq!(set.discovery_method, "well-known");
    }

    #[tokio::test]
    async fn test_cache_hit_within_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "SystemConfigProxy": "0x034edD2A225f7f429A63E0f1D2084B9E0A93b538",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut spec = base_spec();
        spec.registry_url = Some(server.uri());
        let net = network(spec);
        let cache = DiscoveryCache::new(reqwest::Client::new());

        let first = cache.resolve(&net).await.unwrap();
        let second = cache.resolve(&net).await.unwrap();
        assert_eq!(first.last_discovery_time, second.last_discovery_time);
    }

    #[tokio::test]
    async fn test_cache_expiry_triggers_rediscovery() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "SystemConfigProxy": "0x034edD2A225f7f429A63E0f1D2084B9E0A93b538",
            })))
            .expect(2)
            .mount(&server)
            .await;

        let mut spec = base_spec();
        spec.registry_url = Some(server.uri());
        spec.discovery.cache_timeout_seconds = 0; // everything is instantly stale
        let net = network(spec);
        let cache = DiscoveryCache::new(reqwest::Client::new());

        cache.resolve(&net).await.unwrap();
        cache.resolve(&net).await.unwrap();
        // wiremock verifies the expected call count on drop
    }

    #[tokio::test]
    async fn test_cache_entries_are_scoped_per_namespace() {
        // Same network name and chain id in two namespaces, different
        // discovery settings; neither may see the other's entry.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "SystemConfigProxy": "0x034edD2A225f7f429A63E0f1D2084B9E0A93b538",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut registry_spec = base_spec();
        registry_spec.registry_url = Some(server.uri());

        let mut manual_spec = base_spec();
        manual_spec.discovery.method = DiscoveryMethod::Manual;
        manual_spec.contract_addresses = Some(
            [(
                contracts::SYSTEM_CONFIG.to_string(),
                "0x229047fed2591dbec1eF1118d64F7aF3dB9EB290".to_string(),
            )]
            .into_iter()
            .collect(),
        );

        let cache = DiscoveryCache::new(reqwest::Client::new());
        let first = cache
            .resolve(&network_in(registry_spec, "team-a"))
            .await
            .unwrap();
        let second = cache
            .resolve(&network_in(manual_spec, "team-b"))
            .await
            .unwrap();

        assert_eq!(first.discovery_method, "registry");
        assert_eq!(second.discovery_method, "manual");
    }

    #[tokio::test]
    async fn test_l2_predeploys_rejects_wrong_chain_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": "0x1"
            })))
            .mount(&server)
            .await;

        let mut spec = base_spec();
        spec.discovery.method = DiscoveryMethod::L2Predeploys;
        spec.l2_rpc_url = Some(server.uri());
        let cache = DiscoveryCache::new(reqwest::Client::new());

        let err = cache.resolve(&network(spec)).await.unwrap_err();
        assert!(err.to_string().contains("expected 11155420"));
    }

    #[tokio::test]
    async fn test_l2_predeploys_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                // 0xaa37dc == 11155420
                "jsonrpc": "2.0", "id": 1, "result": "0xaa37dc"
            })))
            .mount(&server)
            .await;

        let mut spec = base_spec();
        spec.discovery.method = DiscoveryMethod::L2Predeploys;
        spec.l2_rpc_url = Some(server.uri());
        let cache = DiscoveryCache::new(reqwest::Client::new());

        let set = cache.resolve(&network(spec)).await.unwrap();
        assert_eq!(set.discovery_method, "l2-predeploys");
        assert_eq!(
            set.get(contracts::L2_CROSS_DOMAIN_MESSENGER),
            Some("0x4200000000000000000000000000000000000007")
        );
    }
}
