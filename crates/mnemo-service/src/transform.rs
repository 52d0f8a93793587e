//! Text transforms applied before content is embedded and stored.

use async_trait::async_trait;

use crate::error::Result;

/// Rewrites text before it is stored, e.g. to strip personal data.
#[async_trait]
pub trait TextTransform: Send + Sync {
    async fn transform(&self, text: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Returns text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

#[async_trait]
impl TextTransform for IdentityTransform {
    async fn transform(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        "identity"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identity_transform() {
        let out = IdentityTransform.transform("call me at 555-0100").await.unwrap();
        assert_eq!(out, "call me at 555-0100");
    }
}
