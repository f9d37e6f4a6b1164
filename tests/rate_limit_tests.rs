use std::time::Duration;

use anyhow::Result;
use order_relay::pipeline::rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};

use crate::common::memory_store;

/// Test: Ten requests pass with a shrinking allowance, the eleventh is refused
#[tokio::test]
async fn test_window_allows_up_to_max_requests() -> Result<()> {
    let limiter = RateLimiter::new(memory_store(), RateLimitConfig::default());

    for expected_remaining in (0..10).rev() {
        let decision = limiter.check("203.0.113.7").await?;
        assert_eq!(
            decision,
            RateLimitDecision {
                allowed: true,
                remaining: expected_remaining,
            }
        );
    }

    let denied = limiter.check("203.0.113.7").await?;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);

    Ok(())
}

/// Test: Each client key has its own window
#[tokio::test]
async fn test_client_keys_are_independent() -> Result<()> {
    let limiter = RateLimiter::new(
        memory_store(),
        RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(10),
        },
    );

    assert!(limiter.check("10.0.0.1").await?.allowed);
    assert!(!limiter.check("10.0.0.1").await?.allowed);
    assert!(limiter.check("10.0.0.2").await?.allowed);

    Ok(())
}

/// Test: The counter resets once the window has passed
#[tokio::test(start_paused = true)]
async fn test_window_resets_after_expiry() -> Result<()> {
    let limiter = RateLimiter::new(
        memory_store(),
        RateLimitConfig {
            max_requests: 2,
            window: Duration::from_secs(10),
        },
    );

    assert!(limiter.check("10.0.0.9").await?.allowed);
    assert!(limiter.check("10.0.0.9").await?.allowed);
    assert!(!limiter.check("10.0.0.9").await?.allowed);

    tokio::time::advance(Duration::from_secs(11)).await;

    let decision = limiter.check("10.0.0.9").await?;
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 1);

    Ok(())
}
