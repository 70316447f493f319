//! Object resolver: phid and id lookups against the recipient's Conduit endpoint.
//!
//! Every lookup is scoped to the recipient channel, since each channel may point at its own
//! host and token. Generic handles and transactions go through the TTL caches; the
//! kind-specific searches always hit the server. "Not found" is `None` or a missing map key,
//! never an error.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use super::cache::{TtlCache, DEFAULT_TTL};
use super::conduit::{call_as, Conduit, ConduitError};
use super::endpoint::EndpointRegistry;
use super::model::{
    parse_phid_query, Buildable, Commit, CommitQuery, ObjectRecord, ObjectTag, RemoteObject, Repository,
    SearchResults, Transaction,
};
use crate::config::Config;

/// Placeholder when a revision or commit has no resolvable repository.
pub const UNKNOWN_REPOSITORY: &str = "<unknown repository>";

type ObjectKey = (String, String);
type TransactionKey = (String, String, String);

pub struct ObjectResolver {
    config: Arc<Config>,
    registry: Arc<EndpointRegistry>,
    objects: TtlCache<ObjectKey, RemoteObject>,
    transactions: TtlCache<TransactionKey, Transaction>,
}

impl ObjectResolver {
    pub fn new(config: Arc<Config>, registry: Arc<EndpointRegistry>) -> Self {
        Self {
            config,
            registry,
            objects: TtlCache::new(DEFAULT_TTL),
            transactions: TtlCache::new(DEFAULT_TTL),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Client for `recipient`'s configured host and token; None when either is unset.
    pub async fn conduit_for(&self, recipient: &str) -> Result<Option<Arc<dyn Conduit>>, ConduitError> {
        let settings = self.config.channel_settings(recipient);
        let Some((host, token)) = settings.endpoint() else {
            return Ok(None);
        };
        self.registry.client_for(host, token).await.map(Some)
    }

    /// Resolve `phids` to handles via `phid.query`. One remote call at most.
    pub async fn resolve_objects(
        &self,
        recipient: &str,
        phids: &[String],
        skip_cache: bool,
    ) -> Result<HashMap<String, RemoteObject>, ConduitError> {
        if phids.is_empty() {
            return Ok(HashMap::new());
        }
        let Some(conduit) = self.conduit_for(recipient).await? else {
            return Ok(HashMap::new());
        };
        let keys: Vec<ObjectKey> = phids.iter().map(|p| (recipient.to_string(), p.clone())).collect();
        let fetch = move |keys: Vec<ObjectKey>| async move {
            let phids: Vec<String> = keys.into_iter().map(|(_, p)| p).collect();
            debug!(recipient, count = phids.len(), "phid.query");
            let value = conduit.call("phid.query", json!({ "phids": phids })).await?;
            let found = parse_phid_query(value).map_err(|e| ConduitError::decode("phid.query", e))?;
            let keyed: HashMap<ObjectKey, RemoteObject> = found
                .into_iter()
                .map(|(phid, obj)| ((recipient.to_string(), phid), obj))
                .collect();
            Ok::<_, ConduitError>(keyed)
        };
        let found = if skip_cache {
            self.objects.fetch_batch(&keys, fetch).await?
        } else {
            self.objects.get_or_fetch_batch(&keys, fetch).await?
        };
        Ok(found.into_iter().map(|((_, phid), obj)| (phid, obj)).collect())
    }

    /// Single-phid convenience over `resolve_objects`.
    pub async fn object(
        &self,
        recipient: &str,
        phid: &str,
        skip_cache: bool,
    ) -> Result<Option<RemoteObject>, ConduitError> {
        let mut found = self.resolve_objects(recipient, &[phid.to_string()], skip_cache).await?;
        Ok(found.remove(phid))
    }

    /// Resolve transactions of `object_phid` via `transaction.search`. One remote call at most.
    pub async fn resolve_transactions(
        &self,
        recipient: &str,
        object_phid: &str,
        transaction_phids: &[String],
        skip_cache: bool,
    ) -> Result<HashMap<String, Transaction>, ConduitError> {
        if transaction_phids.is_empty() {
            return Ok(HashMap::new());
        }
        let Some(conduit) = self.conduit_for(recipient).await? else {
            return Ok(HashMap::new());
        };
        let keys: Vec<TransactionKey> = transaction_phids
            .iter()
            .map(|x| (recipient.to_string(), object_phid.to_string(), x.clone()))
            .collect();
        let fetch = move |keys: Vec<TransactionKey>| async move {
            let phids: Vec<String> = keys.into_iter().map(|(_, _, x)| x).collect();
            let found: SearchResults<Transaction> = call_as(
                conduit.as_ref(),
                "transaction.search",
                json!({ "objectIdentifier": object_phid, "constraints": { "phids": phids } }),
            )
            .await?;
            let keyed: HashMap<TransactionKey, Transaction> = found
                .data
                .into_iter()
                .map(|x| ((recipient.to_string(), object_phid.to_string(), x.phid.clone()), x))
                .collect();
            Ok::<_, ConduitError>(keyed)
        };
        let found = if skip_cache {
            self.transactions.fetch_batch(&keys, fetch).await?
        } else {
            self.transactions.get_or_fetch_batch(&keys, fetch).await?
        };
        Ok(found.into_iter().map(|((_, _, phid), x)| (phid, x)).collect())
    }

    /// First object of kind `tag` with numeric id `id`.
    pub async fn search_by_id(
        &self,
        recipient: &str,
        tag: ObjectTag,
        id: u64,
    ) -> Result<Option<ObjectRecord>, ConduitError> {
        let Some(conduit) = self.conduit_for(recipient).await? else {
            return Ok(None);
        };
        let method = tag.search_method();
        let value = conduit.call(method, json!({ "constraints": { "ids": [id] } })).await?;
        ObjectRecord::from_search(tag, value).map_err(|e| ConduitError::decode(method, e))
    }

    /// User name for `phid`; the phid itself when the user cannot be resolved.
    pub async fn user_name(&self, recipient: &str, phid: &str) -> Result<String, ConduitError> {
        Ok(match self.object(recipient, phid, false).await? {
            Some(user) if !user.display_id.is_empty() => user.display_id,
            _ => phid.to_string(),
        })
    }

    pub async fn repository(&self, recipient: &str, phid: Option<&str>) -> Result<Option<Repository>, ConduitError> {
        match phid {
            Some(phid) if !phid.is_empty() => {
                self.search_repository(recipient, json!({ "phids": [phid] })).await
            }
            _ => Ok(None),
        }
    }

    pub async fn repository_by_callsign(
        &self,
        recipient: &str,
        callsign: &str,
    ) -> Result<Option<Repository>, ConduitError> {
        self.search_repository(recipient, json!({ "callsigns": [callsign] })).await
    }

    async fn search_repository(
        &self,
        recipient: &str,
        constraints: serde_json::Value,
    ) -> Result<Option<Repository>, ConduitError> {
        let Some(conduit) = self.conduit_for(recipient).await? else {
            return Ok(None);
        };
        let found: SearchResults<Repository> = call_as(
            conduit.as_ref(),
            "diffusion.repository.search",
            json!({ "constraints": constraints }),
        )
        .await?;
        Ok(found.data.into_iter().next())
    }

    /// Display name of the repository behind `phid`, or `<unknown repository>`.
    pub async fn repo_name(&self, recipient: &str, phid: Option<&str>) -> Result<String, ConduitError> {
        Ok(self
            .repository(recipient, phid)
            .await?
            .map(|r| r.display_name().to_string())
            .unwrap_or_else(|| UNKNOWN_REPOSITORY.to_string()))
    }

    /// The object a build ran against. A diff buildable is replaced by its containing revision.
    pub async fn buildable(&self, recipient: &str, phid: &str) -> Result<Option<RemoteObject>, ConduitError> {
        let Some(conduit) = self.conduit_for(recipient).await? else {
            return Ok(None);
        };
        let found: SearchResults<Buildable> = call_as(
            conduit.as_ref(),
            "harbormaster.querybuildables",
            json!({ "phids": [phid] }),
        )
        .await?;
        let Some(buildable) = found.data.into_iter().next() else {
            return Ok(None);
        };
        let Some(object) = self.object(recipient, &buildable.buildable_phid, false).await? else {
            return Ok(None);
        };
        if object.kind != "DIFF" {
            return Ok(Some(object));
        }
        match buildable.container_phid.as_deref() {
            Some(container) => self.object(recipient, container, false).await,
            None => Ok(Some(object)),
        }
    }

    /// Commit `name` (a hash prefix), optionally restricted to one repository.
    pub async fn query_commit(
        &self,
        recipient: &str,
        name: &str,
        repository_phid: Option<&str>,
    ) -> Result<Option<Commit>, ConduitError> {
        let Some(conduit) = self.conduit_for(recipient).await? else {
            return Ok(None);
        };
        let mut params = json!({ "names": [name] });
        if let Some(repo) = repository_phid {
            params["repositoryPHID"] = json!(repo);
        }
        let found: CommitQuery = call_as(conduit.as_ref(), "diffusion.querycommits", params).await?;
        Ok(found.take_commit(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phab::testing::{forge_config, MockConduit, MockConnector, ARDUMONT, D453, T611};

    fn resolver_with(conduit: Arc<MockConduit>) -> ObjectResolver {
        let registry = Arc::new(EndpointRegistry::new(Arc::new(MockConnector::with(conduit))));
        ObjectResolver::new(Arc::new(forge_config()), registry)
    }

    #[tokio::test(start_paused = true)]
    async fn second_resolution_within_ttl_is_served_from_cache() {
        let conduit = MockConduit::forge();
        let resolver = resolver_with(conduit.clone());
        let phids = vec![T611.to_string(), ARDUMONT.to_string()];

        let first = resolver.resolve_objects("telegram:1", &phids, false).await.unwrap();
        let second = resolver.resolve_objects("telegram:1", &phids, false).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[T611].display_id, "T611");
        assert_eq!(conduit.calls("phid.query"), 1);

        // Scoped per recipient.
        resolver.resolve_objects("telegram:2", &phids, false).await.unwrap();
        assert_eq!(conduit.calls("phid.query"), 2);

        tokio::time::advance(DEFAULT_TTL).await;
        resolver.resolve_objects("telegram:1", &phids, false).await.unwrap();
        assert_eq!(conduit.calls("phid.query"), 3);
    }

    #[tokio::test]
    async fn skip_cache_refetches_and_unknown_phids_are_absent() {
        let conduit = MockConduit::forge();
        let resolver = resolver_with(conduit.clone());

        assert!(resolver.object("telegram:1", T611, false).await.unwrap().is_some());
        assert!(resolver.object("telegram:1", T611, true).await.unwrap().is_some());
        assert_eq!(conduit.calls("phid.query"), 2);

        let found = resolver
            .resolve_objects("telegram:1", &[T611.to_string(), "PHID-TASK-nope".to_string()], false)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(resolver.user_name("telegram:1", "PHID-USER-nope").await.unwrap(), "PHID-USER-nope");
    }

    #[tokio::test]
    async fn transactions_are_filtered_by_object_and_cached() {
        let conduit = MockConduit::forge();
        let resolver = resolver_with(conduit.clone());
        let xacts = vec![
            "PHID-XACT-DREV-5wapkzlcy3bhup4".to_string(),
            "PHID-XACT-DREV-b7dsk7hobiqoxn6".to_string(),
        ];

        let found = resolver.resolve_transactions("telegram:1", D453, &xacts, false).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["PHID-XACT-DREV-b7dsk7hobiqoxn6"].kind.as_deref(), Some("update"));

        resolver.resolve_transactions("telegram:1", D453, &xacts, false).await.unwrap();
        assert_eq!(conduit.calls("transaction.search"), 1);
        let params = &conduit.params("transaction.search")[0];
        assert_eq!(params["objectIdentifier"], D453);
    }

    #[tokio::test]
    async fn missing_endpoint_resolves_nothing() {
        let conduit = MockConduit::forge();
        let registry = Arc::new(EndpointRegistry::new(Arc::new(MockConnector::with(conduit.clone()))));
        let resolver = ObjectResolver::new(Arc::new(Config::default()), registry);

        assert!(resolver.conduit_for("telegram:1").await.unwrap().is_none());
        assert!(resolver.object("telegram:1", T611, false).await.unwrap().is_none());
        assert_eq!(conduit.calls("phid.query"), 0);
    }

    #[tokio::test]
    async fn diff_buildable_follows_container() {
        let conduit = MockConduit::forge();
        conduit.add_object("PHID-DIFF-1", "DIFF", "Diff 1", "Diff 1", "https://forge.softwareheritage.org/differential/diff/1/");
        conduit.respond(
            "harbormaster.querybuildables",
            json!({ "data": [{ "buildablePHID": "PHID-DIFF-1", "containerPHID": D453 }] }),
        );
        let resolver = resolver_with(conduit);

        let buildable = resolver.buildable("telegram:1", "PHID-HMBB-1").await.unwrap().unwrap();
        assert_eq!(buildable.display_id, "D453");
    }

    #[tokio::test]
    async fn repo_name_falls_back_to_placeholder() {
        let resolver = resolver_with(MockConduit::forge());
        assert_eq!(resolver.repo_name("telegram:1", None).await.unwrap(), UNKNOWN_REPOSITORY);
        assert_eq!(
            resolver.repo_name("telegram:1", Some("PHID-REPO-x")).await.unwrap(),
            UNKNOWN_REPOSITORY
        );
    }
}
