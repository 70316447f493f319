//! Display strings for resolved objects and feed stories. Pure functions; everything remote has
//! already been looked up by the caller. Empty fields are left out of the output.

use super::model::{Build, Commit, Paste, RemoteObject, Revision, Task};

/// Length of the abbreviated commit hash shown in chat.
pub const SHORT_HASH_LEN: usize = 10;

/// Activity of one author within a story: their name and the distinct transaction kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorActivity {
    pub author: String,
    pub kinds: Vec<String>,
}

/// `<head>: <title> <<uri>>`, dropping whatever is empty.
fn with_title_and_uri(mut head: String, title: &str, uri: &str) -> String {
    head.push(':');
    if !title.is_empty() {
        head.push(' ');
        head.push_str(title);
    }
    push_uri(&mut head, uri);
    head
}

fn push_uri(out: &mut String, uri: &str) {
    if !uri.is_empty() {
        out.push_str(" <");
        out.push_str(uri);
        out.push('>');
    }
}

fn details(parts: &[String]) -> String {
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

/// `uri#fragment` when a fragment was given.
pub fn with_fragment(uri: &str, fragment: Option<u64>) -> String {
    match fragment {
        Some(n) if !uri.is_empty() => format!("{uri}#{n}"),
        _ => uri.to_string(),
    }
}

pub fn format_task(task: &Task, submitter: &str, owner: Option<&str>, uri: &str) -> String {
    let f = &task.fields;
    let mut parts = vec![format!("submitter: {submitter}")];
    if let Some(owner) = owner {
        parts.push(format!("owner: {owner}"));
    }
    if !f.priority.name.is_empty() && f.priority.name != "Normal" {
        parts.push(format!("priority {}", f.priority.name));
    }
    if !f.status.name.is_empty() {
        parts.push(format!("status: {}", f.status.name));
    }
    with_title_and_uri(format!("T{}{}", task.id, details(&parts)), &f.name, uri)
}

pub fn format_revision(rev: &Revision, author: &str, repo: &str, uri: &str) -> String {
    let f = &rev.fields;
    let mut parts = vec![format!("author: {author}")];
    if !f.status.name.is_empty() {
        parts.push(f.status.name.clone());
    }
    with_title_and_uri(format!("D{}{} on {}", rev.id, details(&parts), repo), &f.title, uri)
}

pub fn format_paste(paste: &Paste, author: &str, uri: &str) -> String {
    let parts = [format!("author: {author}")];
    with_title_and_uri(format!("P{}{}", paste.id, details(&parts)), &paste.fields.title, uri)
}

pub fn format_build(build: &Build, buildable: &str, uri: &str) -> String {
    let f = &build.fields;
    let mut parts = Vec::new();
    if !f.build_status.name.is_empty() {
        parts.push(format!("status: {}", f.build_status.name));
    }
    with_title_and_uri(format!("B{} for {}{}", build.id, buildable, details(&parts)), &f.name, uri)
}

/// `[<repo>/]<short hash>[ (author: a[, committer: c])] <summary> <<uri>>`.
/// The committer is only shown when it differs from the author.
pub fn format_commit(commit: &Commit, repo: Option<&str>, author: Option<&str>, committer: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(repo) = repo {
        out.push_str(repo);
        out.push('/');
    }
    out.push_str(short_hash(&commit.identifier));

    let mut parts = Vec::new();
    if let Some(author) = author {
        parts.push(format!("author: {author}"));
    }
    if let Some(committer) = committer.filter(|c| Some(*c) != author) {
        parts.push(format!("committer: {committer}"));
    }
    out.push_str(&details(&parts));

    if !commit.summary.is_empty() {
        out.push(' ');
        out.push_str(&commit.summary);
    }
    push_uri(&mut out, &shorten_commit_uri(&commit.uri, &commit.identifier));
    out
}

fn short_hash(identifier: &str) -> &str {
    identifier.get(..SHORT_HASH_LEN).unwrap_or(identifier)
}

/// Replace a trailing full commit identifier in `uri` with its abbreviation.
/// URIs that do not end with the identifier are returned unchanged.
pub fn shorten_commit_uri(uri: &str, identifier: &str) -> String {
    if identifier.len() > SHORT_HASH_LEN {
        if let Some(base) = uri.strip_suffix(identifier) {
            return format!("{base}{}", short_hash(identifier));
        }
    }
    uri.to_string()
}

/// `"comment+update from a, close from b; on <full name> <<uri>>"`.
pub fn format_story(activity: &[AuthorActivity], object: &RemoteObject) -> String {
    let who = activity
        .iter()
        .map(|a| format!("{} from {}", a.kinds.join("+"), a.author))
        .collect::<Vec<_>>()
        .join(", ");
    let mut out = format!("{who}; on {}", object.full_name);
    push_uri(&mut out, &object.uri);
    out
}
