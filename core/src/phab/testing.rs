//! In-crate fakes for bridge tests: a scripted Conduit, a connector handing it out, and a sink
//! that records every line.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use super::conduit::{Conduit, ConduitConnector, ConduitError};
use crate::config::{Config, PhabricatorDefaults};
use crate::im::ChatSink;

pub const HOST: &str = "https://forge.softwareheritage.org/api/";
pub const TOKEN: &str = "api-test";

pub const ARDUMONT: &str = "PHID-USER-fozivtfr457sc7smrhtv";
pub const VLORENTZ: &str = "PHID-USER-jyszzzys2aaakr2q2ijx";
pub const T611: &str = "PHID-TASK-lwuvnwjjnenqsyan73om";
pub const D453: &str = "PHID-DREV-ypvg646gtojpnfcszoiv";
pub const D454: &str = "PHID-DREV-jaamseb4cyq2glp3ekmr";

/// Story on D454 by vlorentz (oldest).
pub fn story_d454() -> (&'static str, Value) {
    (
        "phid-stry-zuicf6fhi4esag22cmw2",
        json!({
            "authorPHID": VLORENTZ,
            "chronologicalKey": "6607410428317095759",
            "class": "PhabricatorApplicationTransactionFeedStory",
            "data": {
                "objectPHID": D454,
                "transactionPHIDs": {
                    "PHID-XACT-DREV-lo5bwt2qii6dbud": "PHID-XACT-DREV-lo5bwt2qii6dbud",
                    "PHID-XACT-DREV-q4kayyycsd4izyj": "PHID-XACT-DREV-q4kayyycsd4izyj"
                }
            },
            "epoch": 1538407622
        }),
    )
}

/// Comment on T611 by ardumont.
pub fn story_t611() -> (&'static str, Value) {
    (
        "phid-stry-zuafozdksyhxqixmqej3",
        json!({
            "authorPHID": ARDUMONT,
            "chronologicalKey": "6607424649221995233",
            "class": "PhabricatorApplicationTransactionFeedStory",
            "data": {
                "objectPHID": T611,
                "transactionPHIDs": { "PHID-XACT-TASK-cgdt45mjjymbxpk": "PHID-XACT-TASK-cgdt45mjjymbxpk" }
            },
            "epoch": 1538410933
        }),
    )
}

/// Comment plus diff update on D453 by vlorentz (newest).
pub fn story_d453() -> (&'static str, Value) {
    (
        "phid-stry-zzphs53tpt6j7equbkp7",
        json!({
            "authorPHID": VLORENTZ,
            "chronologicalKey": "6607737853965443787",
            "class": "PhabricatorApplicationTransactionFeedStory",
            "data": {
                "objectPHID": D453,
                "transactionPHIDs": {
                    "PHID-XACT-DREV-5wapkzlcy3bhup4": "PHID-XACT-DREV-5wapkzlcy3bhup4",
                    "PHID-XACT-DREV-b7dsk7hobiqoxn6": "PHID-XACT-DREV-b7dsk7hobiqoxn6"
                }
            },
            "epoch": 1538483857
        }),
    )
}

/// `feed.query` result made of the given stories.
pub fn feed(stories: &[(&str, Value)]) -> Value {
    Value::Object(stories.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
}

fn handle(phid: &str, kind: &str, name: &str, full_name: &str, uri: &str) -> (String, Value) {
    (
        phid.to_string(),
        json!({
            "phid": phid,
            "type": kind,
            "name": name,
            "fullName": full_name,
            "uri": uri,
            "status": "open"
        }),
    )
}

fn forge_objects() -> HashMap<String, Value> {
    HashMap::from([
        handle(
            D454,
            "DREV",
            "D454",
            "D454: Provide Sphinx targets in docs/images/ (see D453).",
            "https://forge.softwareheritage.org/D454",
        ),
        handle(
            T611,
            "TASK",
            "T611",
            "T611: support for external definitions in the svn/subversion loader",
            "https://forge.softwareheritage.org/T611",
        ),
        handle(
            ARDUMONT,
            "USER",
            "ardumont",
            "ardumont (Antoine R. Dumont)",
            "https://forge.softwareheritage.org/p/ardumont/",
        ),
        handle(
            D453,
            "DREV",
            "D453",
            "D453: Make 'make' in swh-*/docs/ should run 'make' in swh-*/docs/images/",
            "https://forge.softwareheritage.org/D453",
        ),
        handle(
            VLORENTZ,
            "USER",
            "vlorentz",
            "vlorentz (vlorentz)",
            "https://forge.softwareheritage.org/p/vlorentz/",
        ),
    ])
}

fn forge_transactions() -> Vec<Value> {
    vec![
        json!({
            "id": 22700,
            "phid": "PHID-XACT-TASK-cgdt45mjjymbxpk",
            "type": "comment",
            "authorPHID": ARDUMONT,
            "objectPHID": T611,
            "dateCreated": 1538410933,
            "dateModified": 1538410933,
            "comments": [],
            "fields": {}
        }),
        json!({
            "id": 8824,
            "phid": "PHID-XACT-DREV-5wapkzlcy3bhup4",
            "type": "comment",
            "authorPHID": VLORENTZ,
            "objectPHID": D453,
            "dateCreated": 1538483857,
            "dateModified": 1538483876,
            "comments": [],
            "fields": {}
        }),
        json!({
            "id": 8823,
            "phid": "PHID-XACT-DREV-b7dsk7hobiqoxn6",
            "type": "update",
            "authorPHID": VLORENTZ,
            "objectPHID": D453,
            "dateCreated": 1538483857,
            "dateModified": 1538483857,
            "comments": [],
            "fields": {
                "old": "PHID-DIFF-ymevkypj7damk72gisvq",
                "new": "PHID-DIFF-qdape3nidx5nk3tq6vw5"
            }
        }),
    ]
}

#[derive(Default)]
struct MockState {
    objects: HashMap<String, Value>,
    transactions: Vec<Value>,
    feed: Value,
    responses: HashMap<String, Value>,
    failing: HashSet<String>,
    failing_objects: HashSet<String>,
    calls: Vec<(String, Value)>,
    feed_gate: Option<Arc<Semaphore>>,
}

/// Scripted Conduit. `phid.query` and `transaction.search` answer from fixtures and honour
/// their filters; `feed.query` returns the current feed; anything else returns the response
/// set with `respond`, or an empty search result.
pub struct MockConduit {
    state: Mutex<MockState>,
}

impl MockConduit {
    /// Fixtures from the Software Heritage forge: T611, D453, D454 and their authors.
    pub fn forge() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                objects: forge_objects(),
                transactions: forge_transactions(),
                feed: json!([]),
                ..MockState::default()
            }),
        })
    }

    pub fn set_feed(&self, feed: Value) {
        self.state.lock().unwrap().feed = feed;
    }

    pub fn add_object(&self, phid: &str, kind: &str, name: &str, full_name: &str, uri: &str) {
        let (k, v) = handle(phid, kind, name, full_name, uri);
        self.state.lock().unwrap().objects.insert(k, v);
    }

    pub fn add_transaction(&self, xact: Value) {
        self.state.lock().unwrap().transactions.push(xact);
    }

    pub fn respond(&self, method: &str, result: Value) {
        self.state.lock().unwrap().responses.insert(method.to_string(), result);
    }

    pub fn fail(&self, method: &str) {
        self.state.lock().unwrap().failing.insert(method.to_string());
    }

    pub fn recover(&self, method: &str) {
        self.state.lock().unwrap().failing.remove(method);
    }

    /// Make `transaction.search` fail for `object_phid` only.
    pub fn fail_transactions_of(&self, object_phid: &str) {
        self.state.lock().unwrap().failing_objects.insert(object_phid.to_string());
    }

    pub fn recover_transactions_of(&self, object_phid: &str) {
        self.state.lock().unwrap().failing_objects.remove(object_phid);
    }

    /// Make `feed.query` wait for a permit on the returned semaphore.
    pub fn hold_feed(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state.lock().unwrap().feed_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|(m, _)| m == method).count()
    }

    /// Params of every call to `method`, oldest first.
    pub fn params(&self, method: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn answer(&self, method: &str, params: &Value) -> Result<Value, ConduitError> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(method) {
            return Err(ConduitError::Api {
                code: "ERR-CONDUIT-CORE".into(),
                info: format!("{method} is down"),
            });
        }
        if method == "transaction.search" {
            if let Some(object) = params["objectIdentifier"]
                .as_str()
                .filter(|o| state.failing_objects.contains(*o))
            {
                return Err(ConduitError::Api {
                    code: "ERR-CONDUIT-CORE".into(),
                    info: format!("transactions of {object} unavailable"),
                });
            }
        }
        if let Some(res) = state.responses.get(method) {
            return Ok(res.clone());
        }
        Ok(match method {
            "phid.query" => {
                let wanted = strings(&params["phids"]);
                Value::Object(
                    state
                        .objects
                        .iter()
                        .filter(|(phid, _)| wanted.contains(*phid))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                )
            }
            "transaction.search" => {
                let object = params["objectIdentifier"].as_str().unwrap_or_default();
                let wanted = strings(&params["constraints"]["phids"]);
                let data: Vec<Value> = state
                    .transactions
                    .iter()
                    .filter(|x| x["objectPHID"] == object)
                    .filter(|x| x["phid"].as_str().is_some_and(|p| wanted.contains(p)))
                    .cloned()
                    .collect();
                json!({ "data": data, "cursor": { "after": null, "before": null, "limit": 100 } })
            }
            "feed.query" => state.feed.clone(),
            "diffusion.querycommits" => json!({ "identifierMap": [], "data": [] }),
            _ => json!({ "data": [], "cursor": {} }),
        })
    }
}

fn strings(v: &Value) -> HashSet<String> {
    v.as_array()
        .map(|a| a.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Conduit for MockConduit {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ConduitError> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((method.to_string(), params.clone()));
            if method == "feed.query" {
                state.feed_gate.clone()
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        self.answer(method, &params)
    }
}

/// Hands out `MockConduit`s per host and counts connects.
pub struct MockConnector {
    default: Arc<MockConduit>,
    by_host: Mutex<HashMap<String, Arc<MockConduit>>>,
    connects: AtomicUsize,
    fail_next: AtomicBool,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::with(MockConduit::forge())
    }
}

impl MockConnector {
    pub fn with(conduit: Arc<MockConduit>) -> Self {
        Self {
            default: conduit,
            by_host: Mutex::new(HashMap::new()),
            connects: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn add_host(&self, host: &str, conduit: Arc<MockConduit>) {
        self.by_host.lock().unwrap().insert(host.to_string(), conduit);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_next_connect(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConduitConnector for MockConnector {
    async fn connect(&self, host: &str, _token: &str) -> Result<Arc<dyn Conduit>, ConduitError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which concurrent callers could race.
        tokio::time::sleep(Duration::from_millis(10)).await;
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ConduitError::InvalidHost(host.to_string()));
        }
        let conduit = self
            .by_host
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default));
        Ok(conduit)
    }
}

/// ChatSink that records lines instead of sending them.
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<(String, String)>>,
    joined: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn join(&self, channel_id: &str) {
        self.joined.lock().unwrap().push(channel_id.to_string());
    }

    /// Drain the recorded lines.
    pub fn take(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.lines.lock().unwrap())
    }

    /// Drain the recorded lines, text only.
    pub fn take_texts(&self) -> Vec<String> {
        self.take().into_iter().map(|(_, text)| text).collect()
    }
}

#[async_trait]
impl ChatSink for RecordingSink {
    async fn send_line(&self, channel_id: &str, text: &str) {
        self.lines.lock().unwrap().push((channel_id.to_string(), text.to_string()));
    }

    fn is_joined(&self, channel_id: &str) -> bool {
        self.joined.lock().unwrap().iter().any(|c| c == channel_id)
    }

    fn joined_channels(&self) -> Vec<String> {
        self.joined.lock().unwrap().clone()
    }

    fn networks(&self) -> Vec<String> {
        vec!["telegram".to_string()]
    }
}

/// Config pointing every channel at the mock forge, announcements on, 1 s interval.
pub fn forge_config() -> Config {
    Config {
        phabricator: PhabricatorDefaults {
            uri: Some(HOST.to_string()),
            token: Some(TOKEN.to_string()),
            announce: true,
            announce_interval: Duration::from_secs(1),
            username_blacklist: HashSet::new(),
        },
        ..Config::default()
    }
}
