//! Reference scanner: spot `T611`, `D453#2`, `rDCORE0123abc`, `0123abcd` in chat text and answer
//! each with a one-line summary of the referenced object.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use super::conduit::ConduitError;
use super::format::{format_build, format_commit, format_paste, format_revision, format_task, with_fragment};
use super::model::{ObjectRecord, ObjectTag};
use super::resolver::ObjectResolver;
use crate::im::transport::wrap_line;
use crate::im::ChatSink;

/// Replies are wrapped to lines of at most this many bytes.
pub const REPLY_LINE_LEN: usize = 300;

static OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z])(\d+)(?:#(\d+))?\b").expect("object reference pattern"));

static COMMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(r[A-Z]+)?([0-9a-f]{7,})\b").expect("commit reference pattern"));

/// A reference found in chat text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Object {
        tag: ObjectTag,
        id: u64,
        fragment: Option<u64>,
    },
    Commit {
        /// Repository callsign without the leading `r`.
        callsign: Option<String>,
        hash: String,
    },
}

fn preceded_by_colon(text: &str, start: usize) -> bool {
    text[..start].ends_with(':')
}

/// Every reference in `text`: object references first, then commits, each in text order.
pub fn scan(text: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    for caps in OBJECT_RE.captures_iter(text) {
        let (Some(whole), Some(letter), Some(id)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if preceded_by_colon(text, whole.start()) {
            continue;
        }
        let Some(tag) = letter.as_str().chars().next().and_then(ObjectTag::from_letter) else {
            continue;
        };
        // Ids too large for u64 cannot exist remotely.
        let Ok(id) = id.as_str().parse() else {
            continue;
        };
        let fragment = caps.get(3).and_then(|f| f.as_str().parse().ok());
        refs.push(Reference::Object { tag, id, fragment });
    }
    for caps in COMMIT_RE.captures_iter(text) {
        let (Some(whole), Some(hash)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        if preceded_by_colon(text, whole.start()) {
            continue;
        }
        refs.push(Reference::Commit {
            callsign: caps.get(1).map(|c| c.as_str()[1..].to_string()),
            hash: hash.as_str().to_string(),
        });
    }
    refs
}

pub struct ReferenceScanner {
    resolver: Arc<ObjectResolver>,
    sink: Arc<dyn ChatSink>,
}

impl ReferenceScanner {
    pub fn new(resolver: Arc<ObjectResolver>, sink: Arc<dyn ChatSink>) -> Self {
        Self { resolver, sink }
    }

    /// Resolve every reference in `text` and reply to `recipient`. Remote failures are reported
    /// in the channel; references that resolve to nothing are skipped.
    pub async fn handle_line(&self, recipient: &str, text: &str) {
        let refs = scan(text);
        if refs.is_empty() || self.resolver.config().channel_settings(recipient).endpoint().is_none() {
            return;
        }
        for reference in &refs {
            match self.reply_for(recipient, reference).await {
                Ok(Some(reply)) => {
                    for line in wrap_line(&reply, REPLY_LINE_LEN) {
                        self.sink.send_line(recipient, &line).await;
                    }
                }
                Ok(None) => debug!(channel_id = recipient, ?reference, "reference not found"),
                Err(e) => {
                    warn!(channel_id = recipient, ?reference, error = %e, "reference lookup failed");
                    self.sink.send_line(recipient, &format!("Error: {e}")).await;
                }
            }
        }
    }

    /// The reply for one reference, or None when it does not resolve.
    pub async fn reply_for(&self, recipient: &str, reference: &Reference) -> Result<Option<String>, ConduitError> {
        match reference {
            Reference::Object { tag, id, fragment } => {
                let Some(record) = self.resolver.search_by_id(recipient, *tag, *id).await? else {
                    return Ok(None);
                };
                self.describe(recipient, record, *fragment).await.map(Some)
            }
            Reference::Commit { callsign, hash } => {
                let repository_phid = match callsign {
                    Some(callsign) => match self.resolver.repository_by_callsign(recipient, callsign).await? {
                        Some(repo) => Some(repo.phid),
                        None => return Ok(None),
                    },
                    None => None,
                };
                let Some(commit) = self
                    .resolver
                    .query_commit(recipient, hash, repository_phid.as_deref())
                    .await?
                else {
                    return Ok(None);
                };
                self.describe(recipient, ObjectRecord::Commit(commit), None).await.map(Some)
            }
        }
    }

    /// Fresh uri of `phid`; the handle cache is bypassed so renamed objects show current data.
    async fn uri_of(&self, recipient: &str, phid: &str, fragment: Option<u64>) -> Result<String, ConduitError> {
        let uri = self
            .resolver
            .object(recipient, phid, true)
            .await?
            .map(|o| o.uri)
            .unwrap_or_default();
        Ok(with_fragment(&uri, fragment))
    }

    async fn describe(
        &self,
        recipient: &str,
        record: ObjectRecord,
        fragment: Option<u64>,
    ) -> Result<String, ConduitError> {
        let r = &self.resolver;
        Ok(match record {
            ObjectRecord::Task(task) => {
                let uri = self.uri_of(recipient, &task.phid, fragment).await?;
                let submitter = r.user_name(recipient, &task.fields.author_phid).await?;
                let owner = match task.fields.owner_phid.as_deref().filter(|p| !p.is_empty()) {
                    Some(phid) => Some(r.user_name(recipient, phid).await?),
                    None => None,
                };
                format_task(&task, &submitter, owner.as_deref(), &uri)
            }
            ObjectRecord::Revision(rev) => {
                let uri = self.uri_of(recipient, &rev.phid, fragment).await?;
                let repo = r.repo_name(recipient, rev.fields.repository_phid.as_deref()).await?;
                let author = r.user_name(recipient, &rev.fields.author_phid).await?;
                format_revision(&rev, &author, &repo, &uri)
            }
            ObjectRecord::Paste(paste) => {
                let uri = self.uri_of(recipient, &paste.phid, fragment).await?;
                let author = r.user_name(recipient, &paste.fields.author_phid).await?;
                format_paste(&paste, &author, &uri)
            }
            ObjectRecord::Build(build) => {
                let uri = self.uri_of(recipient, &build.phid, fragment).await?;
                let buildable = r
                    .buildable(recipient, &build.fields.buildable_phid)
                    .await?
                    .map(|b| b.full_name)
                    .unwrap_or_default();
                format_build(&build, &buildable, &uri)
            }
            ObjectRecord::Commit(commit) => {
                let repo = r.repo_name(recipient, commit.repository_phid.as_deref()).await?;
                let author = self
                    .person(recipient, commit.author_phid.as_deref(), commit.author_name.as_deref())
                    .await?;
                let committer = self
                    .person(recipient, commit.committer_phid.as_deref(), commit.committer_name.as_deref())
                    .await?;
                format_commit(&commit, Some(&repo), author.as_deref(), committer.as_deref())
            }
        })
    }

    /// Commit author or committer: the forge user when linked, the raw name otherwise.
    async fn person(
        &self,
        recipient: &str,
        phid: Option<&str>,
        name: Option<&str>,
    ) -> Result<Option<String>, ConduitError> {
        match phid.filter(|p| !p.is_empty()) {
            Some(phid) => self.resolver.user_name(recipient, phid).await.map(Some),
            None => Ok(name.filter(|n| !n.is_empty()).map(str::to_string)),
        }
    }
}
