//! Common constants for networks, currencies, schemes and events

/// Supported network identifiers
pub mod networks {
    /// Ethereum mainnet
    pub const ETHEREUM: &str = "ethereum";
    /// Polygon PoS mainnet
    pub const POLYGON: &str = "polygon";
    /// Arbitrum One
    pub const ARBITRUM: &str = "arbitrum";
    /// Solana mainnet-beta
    pub const SOLANA: &str = "solana";

    /// Check if a network is part of the reference deployment
    pub fn is_supported(network: &str) -> bool {
        matches!(network, ETHEREUM | POLYGON | ARBITRUM | SOLANA)
    }

    /// Get all reference networks
    pub fn all_supported() -> Vec<&'static str> {
        vec![ETHEREUM, POLYGON, ARBITRUM, SOLANA]
    }
}

/// Currency codes
pub mod currencies {
    pub const ETH: &str = "ETH";
    pub const MATIC: &str = "MATIC";
    pub const SOL: &str = "SOL";
    pub const USDC: &str = "USDC";
    pub const USDT: &str = "USDT";
    pub const USD: &str = "USD";

    /// Stablecoins valued 1:1 against USD for fee conversion
    pub fn is_usd_pegged(currency: &str) -> bool {
        matches!(currency, USDC | USDT | USD)
    }

    /// Get the token contract address for a currency on a network
    pub fn get_token_address(network: &str, currency: &str) -> Option<&'static str> {
        use super::networks::*;
        match (network, currency) {
            (ETHEREUM, USDC) => Some("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            (ETHEREUM, USDT) => Some("0xdAC17F958D2ee523a2206206994597C13D831ec7"),
            (POLYGON, USDC) => Some("0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174"),
            (POLYGON, USDT) => Some("0xc2132D05D31c914a87C6611C10748AEb04B58e8F"),
            (ARBITRUM, USDC) => Some("0xFF970A61A04b1cA14834A43f5dE4533eBDDB5CC8"),
            (ARBITRUM, USDT) => Some("0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9"),
            _ => None,
        }
    }
}

/// Payment schemes
pub mod schemes {
    /// Pay exactly the requested amount
    pub const EXACT: &str = "exact";
    /// Pay up to the requested amount
    pub const UPTO: &str = "upto";
    /// Metered payment stream
    pub const STREAMING: &str = "streaming";
}

/// Webhook event types emitted on facilitator state transitions
pub mod events {
    pub const PAYMENT_CREATED: &str = "payment.created";
    pub const PAYMENT_VERIFIED: &str = "payment.verified";
    pub const PAYMENT_SETTLED: &str = "payment.settled";
    pub const PAYMENT_CANCELLED: &str = "payment.cancelled";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const PAYMENT_EXPIRED: &str = "payment.expired";
}

/// Rate-limited operation names
pub mod operations {
    pub const PAYMENT_CREATE: &str = "payment_create";
    pub const PAYMENT_VERIFY: &str = "payment_verify";
    pub const PAYMENT_SETTLE: &str = "payment_settle";
    pub const PAYMENT_CANCEL: &str = "payment_cancel";
    pub const PAYMENT_GET: &str = "payment_get";
    pub const WEBHOOK_SEND: &str = "webhook_send";
    pub const EXCHANGE_RATE: &str = "exchange_rate";
}

/// Circuit breaker dependency name for the exchange-rate provider chain
pub const EXCHANGE_RATES_DEPENDENCY: &str = "exchange_rates";
