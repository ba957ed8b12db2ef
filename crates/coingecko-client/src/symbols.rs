//! Static ticker → CoinGecko id table.

const SYMBOL_TO_ID: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("ADA", "cardano"),
    ("DOT", "polkadot"),
    ("SOL", "solana"),
    ("MATIC", "matic-network"),
    ("LINK", "chainlink"),
    ("UNI", "uniswap"),
    ("AVAX", "avalanche-2"),
    ("ATOM", "cosmos"),
    ("BNB", "binancecoin"),
    ("OP", "optimism"),
    ("ARB", "arbitrum"),
    ("SUI", "sui"),
    ("RNDR", "render-token"),
    ("FET", "fetch-ai"),
    ("C", "chainbase"),
    ("XRP", "ripple"),
    ("DOGE", "dogecoin"),
    ("LTC", "litecoin"),
    ("TRX", "tron"),
    ("NEAR", "near"),
    ("APT", "aptos"),
    ("INJ", "injective-protocol"),
    ("TIA", "celestia"),
    ("SEI", "sei-network"),
    ("TON", "the-open-network"),
    ("XLM", "stellar"),
    ("HBAR", "hedera-hashgraph"),
    ("AAVE", "aave"),
    ("TAO", "bittensor"),
    ("SHIB", "shiba-inu"),
    ("PEPE", "pepe"),
];

/// Map a ticker or id to a CoinGecko id.
///
/// Known tickers map through the table, known ids pass through unchanged, and
/// anything else is lower-cased as a best guess (which may not be a valid id).
pub fn resolve_asset_id(symbol_or_id: &str) -> String {
    let trimmed = symbol_or_id.trim();
    let upper = trimmed.to_uppercase();

    if let Some((_, id)) = SYMBOL_TO_ID.iter().find(|(sym, _)| *sym == upper) {
        return (*id).to_string();
    }
    if is_known_id(trimmed) {
        return trimmed.to_string();
    }
    trimmed.to_lowercase()
}

pub fn is_known_id(id: &str) -> bool {
    SYMBOL_TO_ID.iter().any(|(_, known)| *known == id)
}

/// Reverse lookup, used to label snapshots with a ticker.
pub fn symbol_for_id(id: &str) -> Option<&'static str> {
    SYMBOL_TO_ID
        .iter()
        .find(|(_, known)| *known == id)
        .map(|(sym, _)| *sym)
}
