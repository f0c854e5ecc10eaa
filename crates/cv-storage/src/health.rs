//! Reachability check for OpenDAL-backed stores

use anyhow::{Context, Result};
use opendal::Operator;

/// List the operator root once. Fails fast on bad credentials, a missing
/// bucket, or an unreachable endpoint, before any chunk traffic starts.
pub async fn check_health(op: &Operator) -> Result<()> {
    let entries = op
        .list("/")
        .await
        .context("chunk store health check failed")?;
    tracing::debug!(entries = entries.len(), "chunk store reachable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_with_objects_is_healthy() {
        let op = crate::operator::build_memory_operator().unwrap();
        op.write("vault/chunks/abc", vec![1u8, 2, 3]).await.unwrap();
        assert!(check_health(&op).await.is_ok());
    }
}
