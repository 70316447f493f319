//! Records returned by the Conduit API, validated at the resolver boundary.
//!
//! Phabricator serializes empty PHP arrays as `[]` even where a map is expected and sends
//! `null` for unset fields, so everything optional here tolerates both.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// `null` or missing -> `T::default()`.
fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MapOrList<T> {
    Map(HashMap<String, T>),
    List(Vec<T>),
}

/// A JSON object keyed by phid, or `[]`/`null` when empty.
fn php_map<'de, D, T>(d: D) -> Result<HashMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<MapOrList<T>>::deserialize(d)? {
        Some(MapOrList::Map(m)) => Ok(m),
        Some(MapOrList::List(l)) if l.is_empty() => Ok(HashMap::new()),
        Some(MapOrList::List(_)) => Err(serde::de::Error::custom("expected an object keyed by id")),
        None => Ok(HashMap::new()),
    }
}

/// Generic handle from `phid.query`; what the object cache stores.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteObject {
    pub phid: String,
    /// Four-letter type constant ("TASK", "DREV", "USER", "DIFF", ...).
    #[serde(rename = "type", default, deserialize_with = "null_default")]
    pub kind: String,
    /// Short display id ("T611") or user name ("ardumont").
    #[serde(rename = "name", default, deserialize_with = "null_default")]
    pub display_id: String,
    /// Display id plus title ("T611: support for external definitions ...").
    #[serde(rename = "fullName", default, deserialize_with = "null_default")]
    pub full_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub uri: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// `phid.query` result: phid -> handle. Unknown phids are simply absent.
pub fn parse_phid_query(value: Value) -> Result<HashMap<String, RemoteObject>, serde_json::Error> {
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "php_map")] HashMap<String, RemoteObject>);
    Ok(serde_json::from_value::<Wrapper>(value)?.0)
}

/// One recorded action against an object (`transaction.search`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transaction {
    pub phid: String,
    #[serde(rename = "objectPHID", default, deserialize_with = "null_default")]
    pub object_phid: String,
    #[serde(rename = "authorPHID", default, deserialize_with = "null_default")]
    pub author_phid: String,
    /// "comment", "update", "status", ...; some internal transactions carry none.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(rename = "dateCreated", default)]
    pub timestamp: i64,
}

/// `*.search` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResults<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// One unit of feed activity.
#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub epoch: u64,
    /// Tie-breaker for stories published within the same second.
    pub chronological_key: u128,
    pub object_phid: Option<String>,
    pub author_phid: Option<String>,
    pub transaction_phids: BTreeSet<String>,
}

#[derive(Deserialize)]
struct RawStory {
    #[serde(default)]
    epoch: u64,
    #[serde(rename = "chronologicalKey", default)]
    chronological_key: Option<Value>,
    #[serde(rename = "authorPHID", default)]
    author_phid: Option<String>,
    #[serde(default)]
    data: Option<RawStoryData>,
}

#[derive(Deserialize)]
struct RawStoryData {
    #[serde(rename = "objectPHID", default)]
    object_phid: Option<String>,
    #[serde(rename = "transactionPHIDs", default)]
    transaction_phids: Option<MapOrList<Value>>,
}

fn phid_set(raw: Option<MapOrList<Value>>) -> BTreeSet<String> {
    match raw {
        Some(MapOrList::Map(m)) => m.into_keys().collect(),
        Some(MapOrList::List(l)) => l.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        None => BTreeSet::new(),
    }
}

fn chrono_key(raw: Option<Value>) -> u128 {
    match raw {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().map(u128::from).unwrap_or(0),
        _ => 0,
    }
}

/// `feed.query` (view=data) result, in no particular order.
pub fn parse_feed(value: Value) -> Result<Vec<Story>, serde_json::Error> {
    let raw: Vec<RawStory> = match serde_json::from_value::<Option<MapOrList<RawStory>>>(value)? {
        Some(MapOrList::Map(m)) => m.into_values().collect(),
        Some(MapOrList::List(l)) => l,
        None => Vec::new(),
    };
    Ok(raw
        .into_iter()
        .map(|s| {
            let (object_phid, transaction_phids) = match s.data {
                Some(d) => (d.object_phid, phid_set(d.transaction_phids)),
                None => (None, BTreeSet::new()),
            };
            Story {
                epoch: s.epoch,
                chronological_key: chrono_key(s.chronological_key),
                object_phid,
                author_phid: s.author_phid,
                transaction_phids,
            }
        })
        .collect())
}

/// `{"value": ..., "name": ...}` status/priority pairs; only the display name is used.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Named {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Task {
    pub id: u64,
    pub phid: String,
    pub fields: TaskFields,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskFields {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(rename = "authorPHID", default, deserialize_with = "null_default")]
    pub author_phid: String,
    #[serde(rename = "ownerPHID", default)]
    pub owner_phid: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub priority: Named,
    #[serde(default, deserialize_with = "null_default")]
    pub status: Named,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Revision {
    pub id: u64,
    pub phid: String,
    pub fields: RevisionFields,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RevisionFields {
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(rename = "authorPHID", default, deserialize_with = "null_default")]
    pub author_phid: String,
    #[serde(rename = "repositoryPHID", default)]
    pub repository_phid: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub status: Named,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Paste {
    pub id: u64,
    pub phid: String,
    pub fields: PasteFields,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PasteFields {
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(rename = "authorPHID", default, deserialize_with = "null_default")]
    pub author_phid: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Build {
    pub id: u64,
    pub phid: String,
    pub fields: BuildFields,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BuildFields {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(rename = "buildablePHID", default, deserialize_with = "null_default")]
    pub buildable_phid: String,
    #[serde(rename = "buildStatus", default, deserialize_with = "null_default")]
    pub build_status: Named,
}

/// `harbormaster.querybuildables` row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Buildable {
    #[serde(rename = "buildablePHID", default, deserialize_with = "null_default")]
    pub buildable_phid: String,
    #[serde(rename = "containerPHID", default)]
    pub container_phid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Repository {
    pub phid: String,
    #[serde(default, deserialize_with = "null_default")]
    pub fields: RepositoryFields,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RepositoryFields {
    #[serde(rename = "shortName", default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub callsign: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Repository {
    /// First non-empty of short name, callsign, name; the phid otherwise.
    pub fn display_name(&self) -> &str {
        [&self.fields.short_name, &self.fields.callsign, &self.fields.name]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.is_empty())
            .unwrap_or(&self.phid)
    }
}

/// `diffusion.querycommits` commit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Commit {
    #[serde(default, deserialize_with = "null_default")]
    pub identifier: String,
    #[serde(default, deserialize_with = "null_default")]
    pub summary: String,
    #[serde(default, deserialize_with = "null_default")]
    pub uri: String,
    #[serde(rename = "repositoryPHID", default)]
    pub repository_phid: Option<String>,
    #[serde(rename = "authorPHID", default)]
    pub author_phid: Option<String>,
    #[serde(rename = "authorName", default)]
    pub author_name: Option<String>,
    #[serde(rename = "committerPHID", default)]
    pub committer_phid: Option<String>,
    #[serde(rename = "committerName", default)]
    pub committer_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitQuery {
    #[serde(rename = "identifierMap", default, deserialize_with = "php_map")]
    pub identifier_map: HashMap<String, String>,
    #[serde(default, deserialize_with = "php_map")]
    pub data: HashMap<String, Commit>,
}

impl CommitQuery {
    /// The commit `name` resolved to, if any.
    pub fn take_commit(mut self, name: &str) -> Option<Commit> {
        let phid = self.identifier_map.get(name)?;
        self.data.remove(phid)
    }
}

/// Object kinds addressable as `<letter><id>` in chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectTag {
    Build,
    Revision,
    Paste,
    Task,
}

impl ObjectTag {
    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'B' => Some(ObjectTag::Build),
            'D' => Some(ObjectTag::Revision),
            'P' => Some(ObjectTag::Paste),
            'T' => Some(ObjectTag::Task),
            _ => None,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            ObjectTag::Build => 'B',
            ObjectTag::Revision => 'D',
            ObjectTag::Paste => 'P',
            ObjectTag::Task => 'T',
        }
    }

    /// Conduit search method that accepts `constraints.ids`.
    pub fn search_method(&self) -> &'static str {
        match self {
            ObjectTag::Build => "harbormaster.build.search",
            ObjectTag::Revision => "differential.revision.search",
            ObjectTag::Paste => "paste.search",
            ObjectTag::Task => "maniphest.search",
        }
    }
}

/// Kind-specific record, one variant per object type the bridge can render.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRecord {
    Build(Build),
    Revision(Revision),
    Paste(Paste),
    Task(Task),
    Commit(Commit),
}

impl ObjectRecord {
    /// Decode the first row of a `*.search` result for `tag`. None when the search came back empty.
    pub fn from_search(tag: ObjectTag, value: Value) -> Result<Option<Self>, serde_json::Error> {
        fn first<T: for<'de> Deserialize<'de>>(value: Value) -> Result<Option<T>, serde_json::Error> {
            Ok(serde_json::from_value::<SearchResults<T>>(value)?.data.into_iter().next())
        }
        Ok(match tag {
            ObjectTag::Build => first(value)?.map(ObjectRecord::Build),
            ObjectTag::Revision => first(value)?.map(ObjectRecord::Revision),
            ObjectTag::Paste => first(value)?.map(ObjectRecord::Paste),
            ObjectTag::Task => first(value)?.map(ObjectRecord::Task),
        })
    }
}
