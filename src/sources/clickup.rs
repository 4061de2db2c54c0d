//! ClickUp task snapshot.
//!
//! Collects the tasks other people share with the token's user and groups
//! them under their parent task, which ClickUp workspaces here use as the
//! project. The snapshot replaces `clickup_data/clickup_projects.json`
//! wholesale on every run.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{SourceError, SyncStats, check_response, http_client};
use crate::services::Services;
use crate::trackers::{ClickupProjects, ClickupTask, save_clickup_projects};

const SERVICE: &str = "clickup";
const TIMEOUT_SECS: u64 = 30;
const FAILED_PARENT: &str = "[Failed to fetch parent]";
const UNNAMED_PARENT: &str = "[Unnamed Parent Task]";

// ── Wire types ──────────────────────────────────────────────────────────────

/// ClickUp mixes numeric and string ids; compare them as strings.
#[derive(Debug, Clone, Deserialize)]
struct IdRef {
    id: Value,
}

impl IdRef {
    fn key(&self) -> String {
        id_key(&self.id)
    }
}

fn id_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct Teams {
    #[serde(default)]
    teams: Vec<IdRef>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: IdRef,
}

#[derive(Debug, Deserialize)]
struct Spaces {
    #[serde(default)]
    spaces: Vec<IdRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Status {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WireTask {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: Status,
    parent: Option<String>,
    creator: Option<IdRef>,
    #[serde(default)]
    assignees: Vec<IdRef>,
    space: Option<IdRef>,
}

#[derive(Debug, Deserialize)]
struct TaskPage {
    #[serde(default)]
    tasks: Vec<WireTask>,
    #[serde(default)]
    last_page: bool,
}

#[derive(Debug, Deserialize)]
struct TaskName {
    name: Option<String>,
}

// ── Filtering and grouping ──────────────────────────────────────────────────

/// Tasks neither created by nor assigned to `me`, outside my own spaces. A
/// task without a space counts as outside.
fn shared_with_me(tasks: Vec<WireTask>, me: &str, my_spaces: &HashSet<String>) -> Vec<WireTask> {
    tasks
        .into_iter()
        .filter(|t| {
            let creator = t.creator.as_ref().map(IdRef::key);
            let assigned = t.assignees.iter().any(|a| a.key() == me);
            let in_my_space = t
                .space
                .as_ref()
                .is_some_and(|s| my_spaces.contains(&s.key()));
            creator.as_deref() != Some(me) && !assigned && !in_my_space
        })
        .collect()
}

/// Group tasks under their parent's name. A top-level task names its own
/// project and is only listed when that project has not been seen yet.
fn group_by_parent(tasks: &[WireTask], parent_names: &HashMap<String, String>) -> ClickupProjects {
    let mut projects = ClickupProjects::new();
    for task in tasks {
        let project = match &task.parent {
            Some(parent) => parent_names
                .get(parent)
                .cloned()
                .unwrap_or_else(|| FAILED_PARENT.to_string()),
            None => task.name.clone(),
        };
        if project == task.name && projects.contains_key(&project) {
            continue;
        }
        projects.entry(project).or_default().push(ClickupTask {
            name: task.name.clone(),
            status: task.status.status.clone(),
            id: task.id.clone(),
        });
    }
    projects
}

// ── Client ──────────────────────────────────────────────────────────────────

pub struct ClickupClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ClickupClient {
    pub fn new(base_url: &str, token: String) -> Result<Self, SourceError> {
        Ok(Self {
            http: http_client(TIMEOUT_SECS)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, SourceError> {
        let resp = self
            .http
            .get(format!("{}{path}", self.base_url))
            .header("Authorization", &self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::http(SERVICE, e))?;
        check_response(SERVICE, resp)
            .await?
            .json::<T>()
            .await
            .map_err(|e| SourceError::http(SERVICE, format!("bad response for {path}: {e}")))
    }

    async fn first_team(&self) -> Result<String, SourceError> {
        let teams: Teams = self.get("/team", &[]).await?;
        teams
            .teams
            .first()
            .map(IdRef::key)
            .ok_or_else(|| SourceError::api(SERVICE, "token has no teams"))
    }

    async fn my_id(&self) -> Result<String, SourceError> {
        let user: UserResponse = self.get("/user", &[]).await?;
        Ok(user.user.key())
    }

    async fn my_spaces(&self, team_id: &str) -> Result<HashSet<String>, SourceError> {
        let spaces: Spaces = self.get(&format!("/team/{team_id}/space"), &[]).await?;
        Ok(spaces.spaces.iter().map(IdRef::key).collect())
    }

    /// Every task in the team, subtasks and closed tasks included.
    async fn all_tasks(&self, team_id: &str) -> Result<Vec<WireTask>, SourceError> {
        let mut tasks = Vec::new();
        let mut page = 0u32;
        loop {
            let query = [
                ("page", page.to_string()),
                ("subtasks", "true".to_string()),
                ("include_closed", "true".to_string()),
            ];
            let batch: TaskPage = self.get(&format!("/team/{team_id}/task"), &query).await?;
            debug!(page, count = batch.tasks.len(), "clickup task page");
            if batch.tasks.is_empty() {
                break;
            }
            tasks.extend(batch.tasks);
            if batch.last_page {
                break;
            }
            page += 1;
        }
        Ok(tasks)
    }

    async fn task_name(&self, task_id: &str) -> Result<String, SourceError> {
        let task: TaskName = self.get(&format!("/task/{task_id}"), &[]).await?;
        Ok(task.name.unwrap_or_else(|| UNNAMED_PARENT.to_string()))
    }

    /// Resolve each distinct parent id once.
    async fn parent_names(&self, tasks: &[WireTask]) -> HashMap<String, String> {
        let mut names = HashMap::new();
        for parent in tasks.iter().filter_map(|t| t.parent.as_deref()) {
            if names.contains_key(parent) {
                continue;
            }
            let name = match self.task_name(parent).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(parent, error = %e, "could not fetch parent task");
                    FAILED_PARENT.to_string()
                }
            };
            names.insert(parent.to_string(), name);
        }
        names
    }
}

pub async fn sync(services: &Services) -> Result<SyncStats, SourceError> {
    let token = services
        .config
        .secrets
        .clickup_api_token
        .clone()
        .ok_or_else(|| SourceError::MissingCredential("CLICKUP_API_TOKEN".into()))?;
    let client = ClickupClient::new(&services.config.ingest.clickup.api_base_url, token)?;

    let team_id = client.first_team().await?;
    let me = client.my_id().await?;
    let my_spaces = client.my_spaces(&team_id).await?;
    let all = client.all_tasks(&team_id).await?;
    let seen = all.len();

    let shared = shared_with_me(all, &me, &my_spaces);
    info!(team = %team_id, total = seen, shared = shared.len(), "clickup tasks fetched");

    let parents = client.parent_names(&shared).await;
    let projects = group_by_parent(&shared, &parents);
    save_clickup_projects(&services.storage, &projects).await?;

    let stats = SyncStats {
        seen,
        skipped: seen - shared.len(),
        failed: 0,
        written: projects.values().map(Vec::len).sum(),
    };
    info!(%stats, projects = projects.len(), "clickup sync finished");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(v: Value) -> WireTask {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn shared_filter_excludes_mine() {
        let tasks = vec![
            task(json!({"id": "1", "name": "made by me", "creator": {"id": 7}})),
            task(json!({"id": "2", "name": "assigned", "creator": {"id": 8}, "assignees": [{"id": 7}]})),
            task(json!({"id": "3", "name": "my space", "creator": {"id": 8}, "space": {"id": "s1"}})),
            task(json!({"id": "4", "name": "shared", "creator": {"id": 8}, "space": {"id": "s2"}})),
            task(json!({"id": "5", "name": "no space", "creator": {"id": 8}})),
        ];
        let spaces: HashSet<String> = ["s1".to_string()].into();
        let kept: Vec<_> = shared_with_me(tasks, "7", &spaces)
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(kept, vec!["4", "5"]);
    }

    #[test]
    fn grouping_uses_parent_names() {
        let tasks = vec![
            task(json!({"id": "p", "name": "Apollo", "status": {"status": "open"}})),
            task(json!({"id": "a", "name": "Design", "parent": "p", "status": {"status": "done"}})),
            task(json!({"id": "b", "name": "Build", "parent": "p", "status": {"status": "open"}})),
            task(json!({"id": "c", "name": "Orphan", "parent": "gone", "status": {"status": "open"}})),
        ];
        let parents: HashMap<String, String> = [
            ("p".to_string(), "Apollo".to_string()),
            ("gone".to_string(), FAILED_PARENT.to_string()),
        ]
        .into();
        let projects = group_by_parent(&tasks, &parents);
        let apollo: Vec<_> = projects["Apollo"].iter().map(|t| t.name.as_str()).collect();
        assert_eq!(apollo, vec!["Apollo", "Design", "Build"]);
        assert_eq!(projects["Apollo"][1].status, "done");
        assert_eq!(projects[FAILED_PARENT][0].name, "Orphan");
    }

    #[test]
    fn top_level_task_is_not_listed_twice() {
        let tasks = vec![
            task(json!({"id": "a", "name": "Design", "parent": "p"})),
            task(json!({"id": "p", "name": "Apollo"})),
        ];
        let parents: HashMap<String, String> = [("p".to_string(), "Apollo".to_string())].into();
        let projects = group_by_parent(&tasks, &parents);
        assert_eq!(projects["Apollo"].len(), 1);
        assert_eq!(projects["Apollo"][0].name, "Design");
    }

    #[test]
    fn numeric_and_string_ids_compare_equal() {
        assert_eq!(id_key(&json!(42)), "42");
        assert_eq!(id_key(&json!("42")), "42");
    }
}
