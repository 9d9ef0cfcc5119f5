//! Redis key builders.

use flashsale_core::{ProductId, UserId};

/// Stock counter for a product.
#[must_use]
pub fn stock(product_id: ProductId) -> String {
    format!("seckill:stock:{{{product_id}}}")
}

/// Participation marker for a buyer and product.
#[must_use]
pub fn dedup(product_id: ProductId, user_id: UserId) -> String {
    format!("seckill:dedup:{{{product_id}}}:{user_id}")
}

/// Materialization marker for a buyer and product.
#[must_use]
pub fn processed(product_id: ProductId, user_id: UserId) -> String {
    format!("seckill:processed:{{{product_id}}}:{user_id}")
}

/// Sliding-window set for an admission key such as `seckill:10.0.0.1`.
#[must_use]
pub fn rate_limit(key: &str) -> String {
    format!("ratelimit:{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_keys_share_hash_tag() {
        let product = ProductId::new(42);
        let user = UserId::new(7);

        assert_eq!(stock(product), "seckill:stock:{42}");
        assert_eq!(dedup(product, user), "seckill:dedup:{42}:7");
        assert_eq!(processed(product, user), "seckill:processed:{42}:7");
    }

    #[test]
    fn rate_limit_key_is_prefixed() {
        assert_eq!(rate_limit("seckill:10.0.0.1"), "ratelimit:seckill:10.0.0.1");
    }
}
