use async_trait::async_trait;
use bytes::Bytes;

use super::VirtualDataProvider;
use crate::error::Result;
use crate::range;

/// A provider over bytes that are already fully resident.
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    data: Bytes,
}

impl InMemoryProvider {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl VirtualDataProvider for InMemoryProvider {
    async fn byte_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Bytes> {
        let range = range::clamp(start, end, self.data.len() as u64);
        Ok(self.data.slice(range.start as usize..range.end as usize))
    }

    async fn file_size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn is_virtual(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn applies_the_same_clamping() {
        let provider = InMemoryProvider::new((0..50u8).collect::<Vec<u8>>());
        assert_eq!(provider.file_size().await.unwrap(), 50);
        assert!(!provider.is_virtual());

        assert_eq!(&provider.byte_range(10, 13).await.unwrap()[..], &[10, 11, 12]);
        assert_eq!(provider.byte_range(45, 100).await.unwrap().len(), 5);
        assert!(provider.byte_range(50, 60).await.unwrap().is_empty());
        assert!(provider.byte_range(30, 20).await.unwrap().is_empty());
    }
}
