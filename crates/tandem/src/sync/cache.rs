//! Per-cycle section and milestone lookups.
//!
//! Sections are keyed by project and name, with a reverse id → name map for
//! the task side. Milestones are keyed by repository and title and loaded
//! lazily the first time a repository is asked about. A cache lives for one
//! cycle and is threaded through the engine explicitly.

use std::collections::HashMap;

use crate::platform::{self, GroupId, IssueTracker, Section, TaskManager};

#[derive(Debug, Default)]
pub struct SectionMilestoneCache {
    /// project id → section name → section id
    sections: HashMap<GroupId, HashMap<String, String>>,
    /// section id → section name
    section_names: HashMap<String, String>,
    /// `org/repo` → milestone title → number
    milestones: HashMap<String, HashMap<String, u64>>,
}

impl SectionMilestoneCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a section in both directions.
    pub fn insert_section(&mut self, section: &Section) {
        self.sections
            .entry(section.project_id.clone())
            .or_default()
            .insert(section.name.clone(), section.id.clone());
        self.section_names
            .insert(section.id.clone(), section.name.clone());
    }

    pub fn section_id(&self, project_id: &str, name: &str) -> Option<&str> {
        self.sections
            .get(project_id)
            .and_then(|by_name| by_name.get(name))
            .map(String::as_str)
    }

    pub fn section_name(&self, section_id: &str) -> Option<&str> {
        self.section_names.get(section_id).map(String::as_str)
    }

    pub fn has_project(&self, project_id: &str) -> bool {
        self.sections.contains_key(project_id)
    }

    /// Reload one project's sections from the task manager.
    pub async fn refresh_sections(
        &mut self,
        tasks: &dyn TaskManager,
        project_id: &str,
    ) -> platform::Result<()> {
        let sections = tasks.list_sections(project_id).await?;
        self.sections.insert(project_id.to_string(), HashMap::new());
        for section in &sections {
            self.insert_section(section);
        }
        Ok(())
    }

    /// Load sections for every given project. Failures are logged and
    /// leave that project to be loaded lazily later.
    pub async fn prime_sections<'a>(
        &mut self,
        tasks: &dyn TaskManager,
        project_ids: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        let mut failed = 0;
        for project_id in project_ids {
            if let Err(e) = self.refresh_sections(tasks, project_id).await {
                failed += 1;
                tracing::warn!(project_id, error = %e, "Failed to load sections");
            }
        }
        failed
    }

    /// Find a section by name, refreshing the project once on a miss.
    pub async fn find_section(
        &mut self,
        tasks: &dyn TaskManager,
        project_id: &str,
        name: &str,
    ) -> platform::Result<Option<String>> {
        if let Some(id) = self.section_id(project_id, name) {
            return Ok(Some(id.to_string()));
        }
        self.refresh_sections(tasks, project_id).await?;
        Ok(self.section_id(project_id, name).map(str::to_string))
    }

    /// Return the id of the named section, creating it if needed.
    ///
    /// If creation fails (for example because another writer created the
    /// same section first) the project is refreshed once more and an
    /// existing match wins over the error.
    pub async fn get_or_create_section(
        &mut self,
        tasks: &dyn TaskManager,
        project_id: &str,
        name: &str,
    ) -> platform::Result<String> {
        if let Some(id) = self.find_section(tasks, project_id, name).await? {
            return Ok(id);
        }

        match tasks.create_section(project_id, name).await {
            Ok(section) => {
                tracing::debug!(project_id, section = name, "Created section");
                self.insert_section(&section);
                Ok(section.id)
            }
            Err(create_err) => {
                self.refresh_sections(tasks, project_id).await?;
                self.section_id(project_id, name)
                    .map(str::to_string)
                    .ok_or(create_err)
            }
        }
    }

    /// Resolve a section id to its name, refreshing `project_id` on a miss.
    pub async fn resolve_section_name(
        &mut self,
        tasks: &dyn TaskManager,
        project_id: &str,
        section_id: &str,
    ) -> platform::Result<Option<String>> {
        if let Some(name) = self.section_name(section_id) {
            return Ok(Some(name.to_string()));
        }
        self.refresh_sections(tasks, project_id).await?;
        Ok(self.section_name(section_id).map(str::to_string))
    }

    async fn load_milestones(
        &mut self,
        issues: &dyn IssueTracker,
        org: &str,
        repo: &str,
    ) -> platform::Result<()> {
        let full_name = format!("{org}/{repo}");
        let milestones = issues.list_milestones(org, repo).await?;
        self.milestones.insert(
            full_name,
            milestones.into_iter().map(|m| (m.title, m.number)).collect(),
        );
        Ok(())
    }

    /// Look up a milestone number by title. Never creates milestones.
    ///
    /// Each repository's milestones are fetched at most once per cycle.
    pub async fn milestone_number(
        &mut self,
        issues: &dyn IssueTracker,
        org: &str,
        repo: &str,
        title: &str,
    ) -> platform::Result<Option<u64>> {
        let full_name = format!("{org}/{repo}");
        if !self.milestones.contains_key(&full_name) {
            self.load_milestones(issues, org, repo).await?;
        }

        Ok(self
            .milestones
            .get(&full_name)
            .and_then(|by_title| by_title.get(title))
            .copied())
    }
}
