//! Feed poller: announce new feed stories in every joined channel that asked for them.
//!
//! Each channel has a watermark (last fetch time, highest epoch seen). The first poll of a
//! channel only seeds the watermark; later polls announce stories newer than it. A channel's
//! poll runs under its own lock, taken with `try_lock`, so a slow poll makes the next tick skip
//! that channel instead of queueing behind it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::conduit::ConduitError;
use super::format::{format_story, AuthorActivity};
use super::model::{parse_feed, Story, Transaction};
use super::resolver::ObjectResolver;
use crate::im::log::network_of;
use crate::im::ChatSink;

#[derive(Debug, Default)]
struct Watermark {
    last_fetch: Option<Instant>,
    max_seen_epoch: u64,
}

/// What a single `poll_channel` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Announcements are off for the channel, or it has no endpoint configured.
    Disabled,
    /// A previous poll of this channel is still running.
    Busy,
    /// The channel's interval has not elapsed since its last fetch.
    NotDue,
    Polled { announced: usize },
}

/// (network, channel) the watermark is kept for.
fn watermark_key(channel_id: &str) -> (String, String) {
    let network = network_of(channel_id);
    let channel = channel_id
        .split_once(':')
        .map(|(_, c)| c)
        .unwrap_or(channel_id);
    (network.to_string(), channel.to_string())
}

pub struct FeedPoller {
    resolver: Arc<ObjectResolver>,
    sink: Arc<dyn ChatSink>,
    watermarks: DashMap<(String, String), Arc<Mutex<Watermark>>>,
}

impl FeedPoller {
    pub fn new(resolver: Arc<ObjectResolver>, sink: Arc<dyn ChatSink>) -> Self {
        Self {
            resolver,
            sink,
            watermarks: DashMap::new(),
        }
    }

    /// Highest epoch seen in `channel_id`, None before its first successful poll.
    pub async fn max_seen_epoch(&self, channel_id: &str) -> Option<u64> {
        let slot = self.watermarks.get(&watermark_key(channel_id)).map(|w| Arc::clone(w.value()))?;
        let mark = slot.lock().await;
        mark.last_fetch.map(|_| mark.max_seen_epoch)
    }

    fn enabled(&self, channel_id: &str) -> bool {
        let settings = self.resolver.config().channel_settings(channel_id);
        settings.announce && settings.endpoint().is_some()
    }

    /// Poll one channel if it is enabled, idle and due.
    ///
    /// On error the last fetch time is left as it was, so the channel is retried on the next
    /// tick. The watermark only moves past stories whose announcement already went out.
    pub async fn poll_channel(&self, channel_id: &str) -> Result<PollOutcome, ConduitError> {
        if !self.enabled(channel_id) {
            return Ok(PollOutcome::Disabled);
        }
        let settings = self.resolver.config().channel_settings(channel_id);
        let slot = Arc::clone(self.watermarks.entry(watermark_key(channel_id)).or_default().value());
        let Ok(mut mark) = slot.try_lock_owned() else {
            return Ok(PollOutcome::Busy);
        };

        let now = Instant::now();
        if mark.last_fetch.is_some_and(|last| now < last + settings.announce_interval) {
            return Ok(PollOutcome::NotDue);
        }
        let Some(conduit) = self.resolver.conduit_for(channel_id).await? else {
            return Ok(PollOutcome::Disabled);
        };

        let value = conduit.call("feed.query", json!({ "view": "data" })).await?;
        let mut stories = parse_feed(value).map_err(|e| ConduitError::decode("feed.query", e))?;
        stories.sort_by_key(|s| (s.epoch, s.chronological_key));

        let object_phids: Vec<String> = stories
            .iter()
            .filter_map(|s| s.object_phid.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let objects = self.resolver.resolve_objects(channel_id, &object_phids, false).await?;

        let mut announced = 0;
        let seen = mark.max_seen_epoch;
        if seen != 0 {
            for story in stories.iter().filter(|s| s.epoch > seen) {
                let Some(object) = story.object_phid.as_ref().and_then(|p| objects.get(p)) else {
                    debug!(channel_id, epoch = story.epoch, "story object not found");
                    continue;
                };
                let activity = match self.story_activity(channel_id, story, &settings.username_blacklist).await {
                    Ok(activity) => activity,
                    Err(e) => {
                        // Stories strictly older than this one are done; never announce them twice.
                        let done = stories.iter().map(|s| s.epoch).filter(|&epoch| epoch < story.epoch).max();
                        mark.max_seen_epoch = mark.max_seen_epoch.max(done.unwrap_or(0));
                        return Err(e);
                    }
                };
                if activity.is_empty() {
                    continue;
                }
                self.sink.send_line(channel_id, &format_story(&activity, object)).await;
                announced += 1;
            }
        }

        let fetched_max = stories.iter().map(|s| s.epoch).max().unwrap_or(0);
        mark.max_seen_epoch = mark.max_seen_epoch.max(fetched_max);
        mark.last_fetch = Some(now);
        debug!(channel_id, stories = stories.len(), announced, watermark = mark.max_seen_epoch, "feed polled");
        Ok(PollOutcome::Polled { announced })
    }

    /// Transaction kinds grouped by author, blacklisted authors removed.
    async fn story_activity(
        &self,
        channel_id: &str,
        story: &Story,
        blacklist: &HashSet<String>,
    ) -> Result<Vec<AuthorActivity>, ConduitError> {
        let Some(object_phid) = story.object_phid.as_deref() else {
            return Ok(Vec::new());
        };
        let xact_phids: Vec<String> = story.transaction_phids.iter().cloned().collect();
        let xacts = self
            .resolver
            .resolve_transactions(channel_id, object_phid, &xact_phids, false)
            .await?;

        // Ordered by transaction phid; the feed carries no better order.
        let mut by_author: Vec<(String, Vec<String>)> = Vec::new();
        for Transaction { author_phid, kind, .. } in xact_phids.iter().filter_map(|p| xacts.get(p)) {
            let Some(kind) = kind.as_deref().filter(|k| !k.is_empty()) else {
                continue;
            };
            match by_author.iter_mut().find(|(a, _)| a == author_phid) {
                Some((_, kinds)) => {
                    if !kinds.iter().any(|k| k == kind) {
                        kinds.push(kind.to_string());
                    }
                }
                None => by_author.push((author_phid.clone(), vec![kind.to_string()])),
            }
        }

        let author_phids: Vec<String> = by_author.iter().map(|(a, _)| a.clone()).collect();
        let names = self.resolver.resolve_objects(channel_id, &author_phids, false).await?;
        Ok(by_author
            .into_iter()
            .map(|(phid, kinds)| {
                let author = names
                    .get(&phid)
                    .map(|u| u.display_id.clone())
                    .filter(|n| !n.is_empty())
                    .unwrap_or(phid);
                AuthorActivity { author, kinds }
            })
            .filter(|a| !blacklist.contains(&a.author))
            .collect())
    }

    /// Start a poll for every joined channel with announcements on. Returns the spawned tasks.
    pub fn tick(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.sink
            .joined_channels()
            .into_iter()
            .filter(|channel_id| self.enabled(channel_id))
            .map(|channel_id| {
                let poller = Arc::clone(self);
                tokio::spawn(async move {
                    match poller.poll_channel(&channel_id).await {
                        Ok(PollOutcome::Polled { announced }) if announced > 0 => {
                            info!(channel_id = %channel_id, announced, "feed stories announced");
                        }
                        Ok(outcome) => debug!(channel_id = %channel_id, ?outcome, "feed poll"),
                        Err(e) => warn!(channel_id = %channel_id, error = %e, "feed poll failed"),
                    }
                })
            })
            .collect()
    }

    /// Tick forever.
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_secs = period.as_secs_f64(), "feed poller started");
        loop {
            interval.tick().await;
            self.tick();
        }
    }
}
