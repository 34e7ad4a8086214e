// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for context.rs

#[cfg(test)]
mod tests {
    use crate::config::OperatorConfig;
    use crate::context::Context;
    use crate::metadata::{ClusterRef, MetadataCleanup};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct NoCleanup;

    #[async_trait]
    impl MetadataCleanup for NoCleanup {
        async fn delete_all_metadata(&self, _cluster: &ClusterRef) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_context_carries_config() {
        let config = OperatorConfig {
            test_mode: true,
            ..OperatorConfig::default()
        };
        let ctx = Context::new(MemoryStore::new(), NoCleanup, config.clone());

        assert_eq!(ctx.config, config);
        assert_eq!(ctx.store.mutation_count(), 0);
    }
}
