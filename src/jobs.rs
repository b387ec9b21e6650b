use crate::error::{Error, Result};
use crate::session::Session;
use crate::transport::{Request, Transport};
use log::*;
use serde::Deserialize;

/// One entry of the server's job directory
#[derive(Default, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Job {
    #[serde(rename = "_class")]
    pub class: String,
    pub name: String,
    pub url: String,
    /// Jenkins' ball color for the last build, e.g. `blue` or `red_anime`
    pub color: String,
}

impl Job {
    pub fn status(&self) -> String {
        status_label(&self.color)
    }
}

#[derive(Deserialize)]
struct JobCollection {
    #[serde(default)]
    jobs: Vec<Job>,
}

/// Fetch the flat list of jobs. A server that answers with anything but 200 has no jobs to show.
pub async fn list_jobs<T: Transport>(session: &Session<T>) -> Result<Vec<Job>> {
    let url = session.endpoint(&["api", "json"]);
    let response = session
        .transport()
        .send(Request::get(&url).query("pretty", "true"))
        .await?;
    if response.status != 200 {
        warn!("{} answered {}; no jobs listed", url, response.status);
        return Ok(Vec::new());
    }
    let collection: JobCollection =
        serde_json::from_str(&response.body).map_err(|e| Error::decode(&url, e))?;
    debug!("{} jobs on {}", collection.jobs.len(), session.host());
    Ok(collection.jobs)
}

/// Human-readable label for a job color
pub fn status_label(color: &str) -> String {
    match color {
        "red" => "Failed".to_string(),
        "blue" | "blue_anime" => "Success".to_string(),
        "notbuilt" => "Not built".to_string(),
        other => title_case(other),
    }
}

/// Uppercase the first letter of every word, leaving the rest alone. Underscores do not split
/// words.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !(c.is_alphanumeric() || c == '_');
    }
    out
}
