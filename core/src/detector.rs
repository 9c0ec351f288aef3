/// Contract address detection: chain-specific patterns over arbitrary text
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Supported chains, in detection priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Tron,
    Bitcoin,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Tron => "tron",
            Chain::Bitcoin => "bitcoin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ethereum" => Some(Chain::Ethereum),
            "tron" => Some(Chain::Tron),
            "bitcoin" => Some(Chain::Bitcoin),
            _ => None,
        }
    }

    /// Block-explorer URL for an address on this chain
    pub fn explorer_url(&self, address: &str) -> String {
        match self {
            Chain::Ethereum => format!("https://etherscan.io/address/{}", address),
            Chain::Tron => format!("https://tronscan.org/#/address/{}", address),
            Chain::Bitcoin => {
                format!("https://www.blockchain.com/explorer/addresses/btc/{}", address)
            }
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected address paired with its chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAddress {
    pub address: String,
    pub chain: Chain,
}

static PATTERNS: Lazy<Vec<(Chain, Regex)>> = Lazy::new(|| {
    vec![
        (Chain::Ethereum, Regex::new(r"0x[a-fA-F0-9]{40}").unwrap()),
        (Chain::Tron, Regex::new(r"T[a-zA-Z0-9]{33}").unwrap()),
        (
            Chain::Bitcoin,
            Regex::new(r"[13][a-km-zA-HJ-NP-Z1-9]{25,34}").unwrap(),
        ),
    ]
});

/// Scan `text` for the first chain address, trying patterns in priority
/// order. The first pattern to match wins even if a later pattern would
/// also match a different substring.
pub fn detect_address(text: &str) -> Option<ChainAddress> {
    for (chain, pattern) in PATTERNS.iter() {
        if let Some(m) = pattern.find(text) {
            return Some(ChainAddress {
                address: m.as_str().to_string(),
                chain: *chain,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH: &str = "0x52908400098527886E0F7030069857D2E4169EE7";
    const TRON: &str = "TLa2f6VPqDgRE67v1736s7bJ8Ray5wYjU7";
    const BTC: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";

    #[test]
    fn test_detects_each_chain() {
        let hit = detect_address(&format!("ape into {} now", ETH)).unwrap();
        assert_eq!(hit.chain, Chain::Ethereum);
        assert_eq!(hit.address, ETH);

        let hit = detect_address(&format!("contract: {}", TRON)).unwrap();
        assert_eq!(hit.chain, Chain::Tron);
        assert_eq!(hit.address, TRON);

        let hit = detect_address(&format!("btc {} here", BTC)).unwrap();
        assert_eq!(hit.chain, Chain::Bitcoin);
        assert_eq!(hit.address, BTC);
    }

    #[test]
    fn test_no_match() {
        assert!(detect_address("nothing to see here").is_none());
        assert!(detect_address("").is_none());
        // Too short for any pattern
        assert!(detect_address("0x1234").is_none());
    }

    #[test]
    fn test_priority_order_wins() {
        // Bitcoin address first in the text, ethereum later: ethereum is
        // tried first and must win.
        let text = format!("{} and {}", BTC, ETH);
        let hit = detect_address(&text).unwrap();
        assert_eq!(hit.chain, Chain::Ethereum);
        assert_eq!(hit.address, ETH);

        // Tron beats bitcoin the same way.
        let text = format!("{} and {}", BTC, TRON);
        let hit = detect_address(&text).unwrap();
        assert_eq!(hit.chain, Chain::Tron);
    }

    #[test]
    fn test_deterministic() {
        let text = format!("x {} y", TRON);
        assert_eq!(detect_address(&text), detect_address(&text));
    }

    #[test]
    fn test_explorer_urls() {
        assert!(Chain::Ethereum.explorer_url(ETH).contains("etherscan.io"));
        assert!(Chain::Tron.explorer_url(TRON).contains("tronscan.org"));
        assert!(Chain::Bitcoin.explorer_url(BTC).contains("blockchain.com"));
    }
}
