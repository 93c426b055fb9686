//! Identity resolution: mentions to canonical entities.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{InputError, RegistryResult};
use crate::mention::{Mention, MentionContext};
use crate::normalize::{is_usable_key, normalize};
use crate::storage::{EntityStore, Upsert};

/// Maps raw mentions onto entities in a store.
///
/// The only side effect of resolving is the store mutation. Identity is the
/// normalized name, so resolution needs no lookup before it writes.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn EntityStore>,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver").finish_non_exhaustive()
    }
}

impl IdentityResolver {
    /// Creates a resolver over a store.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Checks a mention without touching the store and returns its
    /// normalized name.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] if the name normalizes to nothing usable or
    /// the document id is blank.
    pub fn validate(raw_name: &str, document_id: &str) -> Result<String, InputError> {
        if document_id.trim().is_empty() {
            return Err(InputError::EmptyDocumentId {
                raw: raw_name.to_string(),
            });
        }
        let normalized = normalize(raw_name);
        if normalized.is_empty() {
            return Err(InputError::EmptyName {
                raw: raw_name.to_string(),
            });
        }
        if !is_usable_key(&normalized) {
            return Err(InputError::NoAlphanumeric {
                raw: raw_name.to_string(),
            });
        }
        Ok(normalized)
    }

    /// Resolves one mention, creating or updating its entity.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RegistryError::Input`] for malformed mentions (the
    /// store is untouched) and [`crate::RegistryError::Storage`] if the store
    /// fails.
    pub fn resolve(
        &self,
        raw_name: &str,
        document_id: &str,
        context: MentionContext<'_>,
    ) -> RegistryResult<Upsert> {
        let normalized = match Self::validate(raw_name, document_id) {
            Ok(normalized) => normalized,
            Err(e) => {
                warn!(raw_name, document_id, error = %e, "skipping malformed mention");
                return Err(e.into());
            }
        };

        let upsert = self.store.upsert_mention(
            &normalized,
            raw_name,
            document_id.trim(),
            context.document_type,
            context.snippet,
        )?;
        debug!(
            entity_id = %upsert.entity.entity_id,
            normalized = %normalized,
            created = upsert.created,
            "resolved mention"
        );
        Ok(upsert)
    }

    /// Resolves a batch in order, one outcome per mention.
    ///
    /// A failed mention never stops the rest of the batch.
    pub fn merge_batch(&self, mentions: &[Mention]) -> Vec<RegistryResult<Upsert>> {
        mentions
            .iter()
            .map(|m| self.resolve(&m.raw_name, &m.document_id, MentionContext::from(m)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use crate::storage::InMemoryEntityStore;

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(Arc::new(InMemoryEntityStore::new()))
    }

    fn ctx(document_type: &str) -> MentionContext<'_> {
        MentionContext {
            document_type,
            snippet: None,
        }
    }

    #[test]
    fn variants_resolve_to_one_entity() {
        let resolver = resolver();
        let a = resolver.resolve("Doug Band", "d1", ctx("email")).unwrap();
        let b = resolver.resolve("  MR. DOUG BAND ", "d2", ctx("flight_log")).unwrap();

        assert!(a.created);
        assert!(!b.created);
        assert_eq!(a.entity.entity_id, b.entity.entity_id);
        assert_eq!(b.entity.mention_count, 2);
        assert!(b.entity.aliases.contains("doug band"));
        assert!(b.entity.aliases.contains("MR. DOUG BAND"));
        assert_eq!(b.entity.canonical_name, "Doug Band");
        assert_eq!(b.entity.document_types.get("d2").map(String::as_str), Some("flight_log"));
    }

    #[test]
    fn mention_snippets_are_kept_on_the_entity() {
        let resolver = resolver();
        resolver
            .resolve("Doug Band", "d1", MentionContext {
                document_type: "email",
                snippet: Some("Band, counselor to the former president, wrote"),
            })
            .unwrap();
        let upsert = resolver.merge_batch(&[
            Mention::new("DOUG BAND", "d2", "flight_log").with_context("passenger Doug Band"),
        ]);

        let entity = &upsert[0].as_ref().unwrap().entity;
        assert_eq!(
            entity.context_snippets,
            vec!["Band, counselor to the former president, wrote", "passenger Doug Band"]
        );
    }

    #[test]
    fn malformed_mentions_are_rejected_without_side_effects() {
        let resolver = resolver();
        for raw in ["", "   ", "Mr.", "---", "''"] {
            let err = resolver.resolve(raw, "d1", ctx("email")).unwrap_err();
            assert!(err.is_input(), "{raw:?}");
        }
        let err = resolver.resolve("Doug Band", " ", ctx("email")).unwrap_err();
        assert!(err.is_input());
        assert!(resolver.store().is_empty().unwrap());
    }

    #[test]
    fn batch_continues_past_bad_mentions() {
        let resolver = resolver();
        let outcomes = resolver.merge_batch(&[
            Mention::new("Doug Band", "d1", "email"),
            Mention::new("!!!", "d2", "email"),
            Mention::new("Band, Doug", "d3", "email"),
        ]);
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].is_err());
        assert!(outcomes[2].is_ok());

        // "Band, Doug" normalizes to "band doug", a different key.
        assert_eq!(resolver.store().len().unwrap(), 2);
        let id = EntityId::from_normalized("doug band");
        assert_eq!(resolver.store().get(id).unwrap().unwrap().mention_count, 1);
    }
}
