//! Knowledge lookup consulted by SUPERVISE.
//!
//! Returns a prior in [0,1] per fault layer for a query. The static
//! implementation scores layers by keyword overlap; configured layer keywords
//! extend the built-in vocabulary.

use crate::config::LayerConfig;
use async_trait::async_trait;
use netpilot_shared::{Layer, Query};
use std::collections::BTreeMap;

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Layer priors for a query; layers not returned have prior 0
    async fn layer_priors(&self, query: &Query) -> BTreeMap<Layer, f64>;

    fn name(&self) -> &'static str;
}

fn builtin_keywords(layer: Layer) -> &'static [&'static str] {
    match layer {
        Layer::Application => &["dns", "http", "https", "app", "application", "service", "latency", "slow", "timeout"],
        Layer::Overlay => &["vxlan", "evpn", "tunnel", "overlay", "vni", "gre", "ipsec", "vrf"],
        Layer::Routing => &["bgp", "ospf", "isis", "route", "routes", "routing", "prefix", "peer", "neighbor", "session"],
        Layer::Link => &["link", "interface", "port", "crc", "errors", "optic", "flapping", "down", "lacp", "mtu"],
    }
}

/// Keyword priors per layer
pub struct StaticKnowledge {
    vocabulary: BTreeMap<Layer, Vec<String>>,
}

impl StaticKnowledge {
    pub fn new(layers: &[LayerConfig]) -> Self {
        let mut vocabulary: BTreeMap<Layer, Vec<String>> = Layer::ALL
            .iter()
            .map(|l| (*l, builtin_keywords(*l).iter().map(|k| k.to_string()).collect()))
            .collect();
        for layer in layers {
            let words = vocabulary.entry(layer.layer).or_default();
            for keyword in &layer.keywords {
                let keyword = keyword.to_lowercase();
                if !words.contains(&keyword) {
                    words.push(keyword);
                }
            }
        }
        Self { vocabulary }
    }

    /// Prior = matched keywords / 2, capped at 1
    pub fn score(&self, text: &str) -> BTreeMap<Layer, f64> {
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        self.vocabulary
            .iter()
            .filter_map(|(layer, words)| {
                let matched = words.iter().filter(|w| tokens.contains(&w.as_str())).count();
                (matched > 0).then(|| (*layer, (matched as f64 / 2.0).min(1.0)))
            })
            .collect()
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledge {
    async fn layer_priors(&self, query: &Query) -> BTreeMap<Layer, f64> {
        self.score(&query.text)
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpilot_shared::{Comparator, ThresholdRule};
    use serde_json::json;

    #[tokio::test]
    async fn test_routing_words_rank_routing() {
        let kb = StaticKnowledge::new(&[]);
        let priors = kb.layer_priors(&Query::new("BGP neighbor session on R1 is down")).await;
        let routing = priors.get(&Layer::Routing).copied().unwrap_or(0.0);
        assert_eq!(routing, 1.0);
        assert!(priors.get(&Layer::Overlay).is_none());
    }

    #[test]
    fn test_configured_keywords_extend() {
        let layer = LayerConfig {
            layer: Layer::Overlay,
            cached_tool: "c".into(),
            live_tool: "l".into(),
            target_param: "hostname".into(),
            health: ThresholdRule::new("up", Comparator::Eq, json!(true)),
            keywords: vec!["Fabric".into()],
            remediation: None,
        };
        let kb = StaticKnowledge::new(&[layer]);
        assert_eq!(kb.score("fabric problem").get(&Layer::Overlay).copied(), Some(0.5));
    }
}
