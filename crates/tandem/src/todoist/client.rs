//! Todoist client implementing [`TaskManager`].

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::convert::{
    batch_outcomes, completed_item_to_task, parse_json, rest_task_to_task, sync_item_to_task,
    to_project, to_section,
};
use super::error::error_from_response;
use super::types::{
    Command, CompletedResponse, CreateTaskBody, ItemGetResponse, RestProject, RestSection,
    RestTask, SyncResponse, UpdateTaskBody,
};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use crate::platform::{
    self, ApiError, ApiRateLimiter, BatchOutcome, CompletedTask, NewSection, NewTask, Project,
    Section, SyncDelta, Task, TaskManager, TaskUpdate,
};
use crate::retry::RetryPolicy;

/// Public Todoist API base URL.
pub const TODOIST_API_URL: &str = "https://api.todoist.com";

const SYNC_PATH: &str = "/sync/v9";
const REST_PATH: &str = "/rest/v2";

/// Page size for the completed-task feed (the API maximum).
const COMPLETED_PAGE_SIZE: usize = 200;

/// Timestamp format the completed feed expects for `since`.
const COMPLETED_SINCE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Request payload encodings.
enum Body {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(&'static str, String)>),
}

/// Todoist client for the task side of the sync.
#[derive(Clone)]
pub struct TodoistClient {
    transport: Arc<dyn HttpTransport>,
    api_url: String,
    token: String,
    rate_limiter: Option<ApiRateLimiter>,
    retry: RetryPolicy,
}

impl TodoistClient {
    /// Create a new client against the public Todoist API.
    pub fn new(
        token: &str,
        rate_limiter: Option<ApiRateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::with_timeout(StdDuration::from_secs(30))
            .map_err(|e| ApiError::internal(e.to_string()))?;

        Ok(Self::new_with_transport(
            TODOIST_API_URL,
            token,
            rate_limiter,
            retry,
            Arc::new(transport),
        ))
    }

    pub fn new_with_transport(
        api_url: &str,
        token: &str,
        rate_limiter: Option<ApiRateLimiter>,
        retry: RetryPolicy,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            rate_limiter,
            retry,
        }
    }

    /// Get the API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Wait for rate limiter if one is configured.
    async fn wait_for_rate_limit(&self) {
        if let Some(ref limiter) = self.rate_limiter {
            limiter.acquire().await;
        }
    }

    /// Send one request through the rate limiter and retry policy.
    ///
    /// The body is encoded once, so retried command batches reuse the same
    /// command uuids and the server applies each command at most once.
    async fn send(&self, method: HttpMethod, path: &str, body: Body) -> platform::Result<HttpResponse> {
        let request = HttpRequest::new(method, format!("{}{}", self.api_url, path)).bearer(&self.token);
        let request = match body {
            Body::Empty => request,
            Body::Json(value) => request.json(&value),
            Body::Form(pairs) => request.form(pairs.iter().map(|(k, v)| (*k, v.as_str()))),
        };
        let operation = format!("{} {}", method.as_str(), path);

        self.retry
            .run(&operation, || {
                let request = request.clone();
                async move {
                    self.wait_for_rate_limit().await;
                    let response = self.transport.send(request).await?;
                    if response.is_success() {
                        Ok(response)
                    } else {
                        Err(error_from_response(&response))
                    }
                }
            })
            .await
    }

    /// Post a batch of Sync API commands and pair each with its outcome.
    async fn run_commands(&self, commands: &[Command]) -> platform::Result<Vec<BatchOutcome>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let encoded =
            serde_json::to_string(commands).map_err(|e| ApiError::internal(e.to_string()))?;
        let response = self
            .send(
                HttpMethod::Post,
                &format!("{SYNC_PATH}/sync"),
                Body::Form(vec![("commands", encoded)]),
            )
            .await?;
        let parsed: SyncResponse = parse_json("sync response", &response.body)?;

        Ok(batch_outcomes(commands, &parsed))
    }

    async fn list_rest_tasks(&self, project_id: Option<&str>) -> platform::Result<Vec<Task>> {
        let path = match project_id {
            Some(project_id) => format!(
                "{REST_PATH}/tasks?project_id={}",
                url::form_urlencoded::byte_serialize(project_id.as_bytes()).collect::<String>()
            ),
            None => format!("{REST_PATH}/tasks"),
        };
        let response = self.send(HttpMethod::Get, &path, Body::Empty).await?;
        let tasks: Vec<RestTask> = parse_json("task", &response.body)?;
        tasks.into_iter().map(rest_task_to_task).collect()
    }

    async fn post_task_action(&self, task_id: &str, action: &str) -> platform::Result<()> {
        self.send(
            HttpMethod::Post,
            &format!("{REST_PATH}/tasks/{task_id}/{action}"),
            Body::Empty,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskManager for TodoistClient {
    async fn sync_delta(&self, token: &str) -> platform::Result<SyncDelta> {
        let response = self
            .send(
                HttpMethod::Post,
                &format!("{SYNC_PATH}/sync"),
                Body::Form(vec![
                    ("sync_token", token.to_string()),
                    ("resource_types", r#"["items"]"#.to_string()),
                ]),
            )
            .await?;
        let parsed: SyncResponse = parse_json("sync response", &response.body)?;
        if parsed.sync_token.is_empty() {
            return Err(ApiError::validation("sync response", "missing sync_token"));
        }

        let items = parsed
            .items
            .into_iter()
            .map(sync_item_to_task)
            .collect::<platform::Result<Vec<_>>>()?;

        Ok(SyncDelta {
            items,
            sync_token: parsed.sync_token,
            full_sync: parsed.full_sync,
        })
    }

    async fn completed_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> platform::Result<Vec<CompletedTask>> {
        let mut all = Vec::new();
        let mut offset = 0usize;

        loop {
            let mut path = format!(
                "{SYNC_PATH}/completed/get_all?annotate_items=true&limit={COMPLETED_PAGE_SIZE}&offset={offset}"
            );
            if let Some(since) = since {
                path.push_str("&since=");
                path.push_str(&since.format(COMPLETED_SINCE_FORMAT).to_string());
            }

            let response = self.send(HttpMethod::Get, &path, Body::Empty).await?;
            let parsed: CompletedResponse = parse_json("completed task", &response.body)?;
            let count = parsed.items.len();
            for item in parsed.items {
                all.push(completed_item_to_task(item)?);
            }

            if count < COMPLETED_PAGE_SIZE {
                break;
            }
            offset += count;
        }

        Ok(all)
    }

    async fn get_task(&self, task_id: &str) -> platform::Result<Option<Task>> {
        let result = self
            .send(
                HttpMethod::Post,
                &format!("{SYNC_PATH}/items/get"),
                Body::Form(vec![
                    ("item_id", task_id.to_string()),
                    ("all_data", "false".to_string()),
                ]),
            )
            .await;

        match result {
            Ok(response) => {
                let parsed: ItemGetResponse = parse_json("task", &response.body)?;
                sync_item_to_task(parsed.item).map(Some)
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn find_task_by_description(
        &self,
        project_id: &str,
        needle: &str,
    ) -> platform::Result<Option<Task>> {
        Ok(self
            .list_rest_tasks(Some(project_id))
            .await?
            .into_iter()
            .find(|task| platform::mentions(&task.description, needle)))
    }

    async fn list_active_tasks(&self) -> platform::Result<Vec<Task>> {
        self.list_rest_tasks(None).await
    }

    async fn create_task(&self, task: &NewTask) -> platform::Result<Task> {
        let body = CreateTaskBody {
            content: &task.content,
            description: &task.description,
            project_id: &task.project_id,
            section_id: task.section_id.as_deref(),
        };
        let body = serde_json::to_value(&body).map_err(|e| ApiError::internal(e.to_string()))?;
        let response = self
            .send(HttpMethod::Post, &format!("{REST_PATH}/tasks"), Body::Json(body))
            .await?;
        rest_task_to_task(parse_json("task", &response.body)?)
    }

    async fn update_task(&self, task_id: &str, update: &TaskUpdate) -> platform::Result<()> {
        if update.content.is_none() && update.description.is_none() {
            return Ok(());
        }
        let body = UpdateTaskBody {
            content: update.content.as_deref(),
            description: update.description.as_deref(),
        };
        let body = serde_json::to_value(&body).map_err(|e| ApiError::internal(e.to_string()))?;
        self.send(
            HttpMethod::Post,
            &format!("{REST_PATH}/tasks/{task_id}"),
            Body::Json(body),
        )
        .await?;
        Ok(())
    }

    async fn move_task(
        &self,
        task_id: &str,
        project_id: &str,
        section_id: Option<&str>,
    ) -> platform::Result<()> {
        let args = match section_id {
            Some(section_id) => serde_json::json!({ "id": task_id, "section_id": section_id }),
            // Moving to the project itself drops the section.
            None => serde_json::json!({ "id": task_id, "project_id": project_id }),
        };
        let outcomes = self
            .run_commands(&[Command::new("item_move", args, false)])
            .await?;

        match outcomes.into_iter().next().map(|o| o.result) {
            Some(Ok(_)) => Ok(()),
            Some(Err(message)) => Err(ApiError::status(400, message)),
            None => Err(ApiError::internal("item_move returned no outcome")),
        }
    }

    async fn close_task(&self, task_id: &str) -> platform::Result<()> {
        self.post_task_action(task_id, "close").await
    }

    async fn reopen_task(&self, task_id: &str) -> platform::Result<()> {
        self.post_task_action(task_id, "reopen").await
    }

    async fn list_projects(&self) -> platform::Result<Vec<Project>> {
        let response = self
            .send(HttpMethod::Get, &format!("{REST_PATH}/projects"), Body::Empty)
            .await?;
        let projects: Vec<RestProject> = parse_json("project", &response.body)?;
        projects.into_iter().map(to_project).collect()
    }

    async fn list_sections(&self, project_id: &str) -> platform::Result<Vec<Section>> {
        let response = self
            .send(
                HttpMethod::Get,
                &format!("{REST_PATH}/sections?project_id={project_id}"),
                Body::Empty,
            )
            .await?;
        let sections: Vec<RestSection> = parse_json("section", &response.body)?;
        sections.into_iter().map(to_section).collect()
    }

    async fn create_section(&self, project_id: &str, name: &str) -> platform::Result<Section> {
        let response = self
            .send(
                HttpMethod::Post,
                &format!("{REST_PATH}/sections"),
                Body::Json(serde_json::json!({ "project_id": project_id, "name": name })),
            )
            .await?;
        to_section(parse_json("section", &response.body)?)
    }

    async fn batch_create_sections(
        &self,
        sections: &[NewSection],
    ) -> platform::Result<Vec<BatchOutcome>> {
        let commands: Vec<Command> = sections
            .iter()
            .map(|s| {
                Command::new(
                    "section_add",
                    serde_json::json!({ "project_id": s.project_id, "name": s.name }),
                    true,
                )
            })
            .collect();
        self.run_commands(&commands).await
    }

    async fn batch_create_tasks(&self, tasks: &[NewTask]) -> platform::Result<Vec<BatchOutcome>> {
        let commands: Vec<Command> = tasks
            .iter()
            .map(|t| {
                let mut args = serde_json::json!({
                    "content": t.content,
                    "description": t.description,
                    "project_id": t.project_id,
                });
                if let Some(section_id) = &t.section_id {
                    args["section_id"] = serde_json::Value::String(section_id.clone());
                }
                Command::new("item_add", args, true)
            })
            .collect();
        self.run_commands(&commands).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockTransport;
    use crate::retry::RetryConfig;

    const API: &str = "https://api.todoist.test";

    fn client(transport: &MockTransport) -> TodoistClient {
        TodoistClient::new_with_transport(
            API,
            "secret",
            None,
            RetryPolicy::new(RetryConfig::default().with_jitter(false)),
            Arc::new(transport.clone()),
        )
    }

    fn sync_url() -> String {
        format!("{API}/sync/v9/sync")
    }

    #[tokio::test]
    async fn sync_delta_posts_token_and_converts_items() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            sync_url(),
            200,
            serde_json::json!({
                "sync_token": "next-token",
                "full_sync": false,
                "items": [
                    {"id": "t1", "content": "A", "description": "", "project_id": "p1", "checked": false},
                    {"id": "t2", "content": "B", "project_id": "p1", "checked": true, "section_id": "s1"}
                ]
            }),
        );

        let delta = client(&transport)
            .sync_delta("prev-token")
            .await
            .expect("sync succeeds");

        assert_eq!(delta.sync_token, "next-token");
        assert_eq!(delta.items.len(), 2);
        assert!(delta.items[1].completed);
        assert_eq!(delta.items[1].section_id.as_deref(), Some("s1"));

        let requests = transport.requests();
        let request = &requests[0];
        let body = request.body_text();
        assert!(body.contains("sync_token=prev-token"));
        assert!(body.contains("resource_types="));
        assert!(
            request
                .headers
                .iter()
                .any(|(k, v)| k == "Authorization" && v == "Bearer secret")
        );
    }

    #[tokio::test]
    async fn sync_delta_without_token_is_invalid() {
        let transport = MockTransport::new();
        transport.push_json(HttpMethod::Post, sync_url(), 200, serde_json::json!({"items": []}));

        let err = client(&transport)
            .sync_delta("*")
            .await
            .expect_err("token required");
        assert!(matches!(err, ApiError::Validation { .. }));
    }

    #[tokio::test]
    async fn completed_since_formats_cursor() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            format!(
                "{API}/sync/v9/completed/get_all?annotate_items=true&limit=200&offset=0&since=2024-05-01T10:30:00"
            ),
            200,
            serde_json::json!({"items": [
                {"task_id": "t1", "content": "[#1] Bug", "project_id": "p1",
                 "completed_at": "2024-05-01T11:00:00.000000Z",
                 "item_object": {"id": "t1", "description": "https://github.com/a/b/issues/1", "project_id": "p1"}}
            ]}),
        );

        let since = DateTime::parse_from_rfc3339("2024-05-01T10:30:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let completed = client(&transport)
            .completed_since(Some(since))
            .await
            .expect("feed succeeds");

        assert_eq!(completed.len(), 1);
        assert_eq!(
            completed[0].description.as_deref(),
            Some("https://github.com/a/b/issues/1")
        );
    }

    #[tokio::test]
    async fn get_task_maps_404_to_none() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            format!("{API}/sync/v9/items/get"),
            404,
            serde_json::json!({"error": "Item not found"}),
        );

        assert!(
            client(&transport)
                .get_task("gone")
                .await
                .expect("404 is not an error")
                .is_none()
        );
    }

    #[tokio::test]
    async fn find_task_by_description_filters_project_tasks() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            format!("{API}/rest/v2/tasks?project_id=p1"),
            200,
            serde_json::json!([
                {"id": "t1", "content": "Other", "description": "notes", "project_id": "p1"},
                {"id": "t2", "content": "[#4] Bug", "description": "https://github.com/a/b/issues/4", "project_id": "p1"}
            ]),
        );

        let found = client(&transport)
            .find_task_by_description("p1", "https://github.com/a/b/issues/4")
            .await
            .expect("listing succeeds")
            .expect("task found");
        assert_eq!(found.id, "t2");
    }

    #[tokio::test]
    async fn update_task_with_no_changes_sends_nothing() {
        let transport = MockTransport::new();
        client(&transport)
            .update_task("t1", &TaskUpdate::default())
            .await
            .expect("no-op update");
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn close_and_reopen_hit_rest_actions() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            format!("{API}/rest/v2/tasks/t1/close"),
            204,
            serde_json::Value::Null,
        );
        transport.push_json(
            HttpMethod::Post,
            format!("{API}/rest/v2/tasks/t1/reopen"),
            204,
            serde_json::Value::Null,
        );

        let client = client(&transport);
        client.close_task("t1").await.expect("close");
        client.reopen_task("t1").await.expect("reopen");
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn batch_create_tasks_sends_item_add_commands() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Post,
            sync_url(),
            200,
            serde_json::json!({"sync_status": {}, "temp_id_mapping": {}}),
        );

        let tasks = vec![
            NewTask {
                content: "[#1] A".to_string(),
                description: "https://github.com/a/b/issues/1".to_string(),
                project_id: "p1".to_string(),
                section_id: Some("s1".to_string()),
            },
            NewTask {
                content: "[#2] B".to_string(),
                description: "https://github.com/a/b/issues/2".to_string(),
                project_id: "p1".to_string(),
                section_id: None,
            },
        ];
        let outcomes = client(&transport)
            .batch_create_tasks(&tasks)
            .await
            .expect("batch call succeeds");

        // Commands the server did not acknowledge count as failed.
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_err()));

        let body = transport.requests()[0].body_text();
        let commands = url::form_urlencoded::parse(body.as_bytes())
            .find(|(k, _)| k == "commands")
            .map(|(_, v)| v.into_owned())
            .expect("commands field");
        let commands: serde_json::Value = serde_json::from_str(&commands).expect("json commands");
        assert_eq!(commands[0]["type"], "item_add");
        assert_eq!(commands[0]["args"]["section_id"], "s1");
        assert!(commands[1]["args"].get("section_id").is_none());
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let transport = MockTransport::new();
        let outcomes = client(&transport)
            .batch_create_sections(&[])
            .await
            .expect("empty batch");
        assert!(outcomes.is_empty());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_calls_are_retried() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            format!("{API}/rest/v2/projects"),
            HttpResponse {
                status: 429,
                headers: vec![("Retry-After".to_string(), "1".to_string())],
                body: br#"{"error": "Too many requests"}"#.to_vec(),
            },
        );
        transport.push_json(
            HttpMethod::Get,
            format!("{API}/rest/v2/projects"),
            200,
            serde_json::json!([
                {"id": "org", "name": "acme"},
                {"id": "repo", "name": "api", "parent_id": "org"}
            ]),
        );

        let projects = client(&transport)
            .list_projects()
            .await
            .expect("second attempt succeeds");
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[1].parent_id.as_deref(), Some("org"));
        assert_eq!(transport.requests().len(), 2);
    }
}
