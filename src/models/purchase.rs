use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Message token bundles offered on the paywall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenPack {
    Small,
    Popular,
    Large,
}

impl TokenPack {
    pub const ALL: [TokenPack; 3] = [TokenPack::Small, TokenPack::Popular, TokenPack::Large];

    pub fn tokens(&self) -> u32 {
        match self {
            TokenPack::Small => 10,
            TokenPack::Popular => 50,
            TokenPack::Large => 100,
        }
    }

    pub fn price(&self) -> &'static str {
        match self {
            TokenPack::Small => "$0.99",
            TokenPack::Popular => "$3.99",
            TokenPack::Large => "$6.99",
        }
    }

    /// Look up a pack by its token count
    pub fn from_tokens(tokens: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|pack| pack.tokens() == tokens)
            .ok_or_else(|| anyhow!("No token pack with {} tokens. Use 10, 50 or 100", tokens))
    }
}

/// A completed paywall purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Purchase {
    Monthly,
    Yearly,
    Tokens(TokenPack),
}

impl Purchase {
    pub fn grants_premium(&self) -> bool {
        matches!(self, Purchase::Monthly | Purchase::Yearly)
    }

    /// Parse a plan name as typed on the command line
    pub fn parse(plan: &str, pack_tokens: Option<u32>) -> Result<Self> {
        match plan.to_lowercase().as_str() {
            "monthly" => Ok(Purchase::Monthly),
            "yearly" => Ok(Purchase::Yearly),
            "tokens" => {
                // The paywall preselects the popular bundle
                let pack = match pack_tokens {
                    Some(tokens) => TokenPack::from_tokens(tokens)?,
                    None => TokenPack::Popular,
                };
                Ok(Purchase::Tokens(pack))
            }
            _ => Err(anyhow!(
                "Invalid plan: {}. Use 'monthly', 'yearly' or 'tokens'",
                plan
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plans() {
        assert_eq!(Purchase::parse("Monthly", None).unwrap(), Purchase::Monthly);
        assert_eq!(Purchase::parse("yearly", None).unwrap(), Purchase::Yearly);
        assert_eq!(
            Purchase::parse("tokens", None).unwrap(),
            Purchase::Tokens(TokenPack::Popular)
        );
        assert_eq!(
            Purchase::parse("tokens", Some(100)).unwrap(),
            Purchase::Tokens(TokenPack::Large)
        );
        assert!(Purchase::parse("tokens", Some(7)).is_err());
        assert!(Purchase::parse("lifetime", None).is_err());
    }

    #[test]
    fn test_only_subscriptions_grant_premium() {
        assert!(Purchase::Monthly.grants_premium());
        assert!(Purchase::Yearly.grants_premium());
        assert!(!Purchase::Tokens(TokenPack::Small).grants_premium());
    }

    #[test]
    fn test_pack_prices_grow_with_size() {
        let prices: Vec<_> = TokenPack::ALL.iter().map(|pack| pack.price()).collect();
        assert_eq!(prices, ["$0.99", "$3.99", "$6.99"]);
    }
}
