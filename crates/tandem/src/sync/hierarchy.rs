//! Two-level group hierarchy: organization groups and their repository
//! sub-groups, built fresh each cycle from the live project listing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::platform::{GroupId, IssueRouting, Project, TaskRouting};

use super::types::OrgMapping;

/// A project standing for an organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentGroup {
    pub id: GroupId,
    pub name: String,
    pub org_name: String,
}

/// A project standing for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubGroup {
    pub id: GroupId,
    pub name: String,
    pub parent_id: GroupId,
    pub org_name: String,
    /// Project name, used verbatim as the repository name.
    pub repo_name: String,
    /// `org/repo`.
    pub full_name: String,
}

impl SubGroup {
    pub fn issue_routing(&self) -> IssueRouting {
        IssueRouting {
            group_id: Some(self.id.clone()),
            org_name: self.org_name.clone(),
            repo_name: self.repo_name.clone(),
            full_repo_name: self.full_name.clone(),
        }
    }

    pub fn task_routing(&self) -> TaskRouting {
        TaskRouting {
            org_name: self.org_name.clone(),
            repo_name: self.repo_name.clone(),
            full_repo_name: self.full_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupHierarchy {
    pub parent_groups: BTreeMap<GroupId, ParentGroup>,
    pub sub_groups: BTreeMap<GroupId, SubGroup>,
    pub repo_to_group: HashMap<String, GroupId>,
}

impl GroupHierarchy {
    /// Build the hierarchy from a flat project list.
    ///
    /// Projects listed in `mapping` become parents. Their direct children
    /// become repository sub-groups keyed by `org/name`. Everything else is
    /// ignored.
    pub fn build(projects: &[Project], mapping: &OrgMapping) -> Self {
        let mut hierarchy = Self::default();

        for project in projects {
            if let Some(org_name) = mapping.get(&project.id) {
                hierarchy.parent_groups.insert(
                    project.id.clone(),
                    ParentGroup {
                        id: project.id.clone(),
                        name: project.name.clone(),
                        org_name: org_name.clone(),
                    },
                );
            }
        }

        for project in projects {
            let Some(parent) = project
                .parent_id
                .as_ref()
                .and_then(|parent_id| hierarchy.parent_groups.get(parent_id))
            else {
                continue;
            };

            let full_name = format!("{}/{}", parent.org_name, project.name);
            let sub_group = SubGroup {
                id: project.id.clone(),
                name: project.name.clone(),
                parent_id: parent.id.clone(),
                org_name: parent.org_name.clone(),
                repo_name: project.name.clone(),
                full_name: full_name.clone(),
            };

            hierarchy
                .repo_to_group
                .insert(full_name, project.id.clone());
            hierarchy.sub_groups.insert(project.id.clone(), sub_group);
        }

        hierarchy
    }

    /// No organization groups were found.
    pub fn is_empty(&self) -> bool {
        self.parent_groups.is_empty()
    }

    pub fn sub_group(&self, group_id: &str) -> Option<&SubGroup> {
        self.sub_groups.get(group_id)
    }

    pub fn group_for_repo(&self, full_name: &str) -> Option<&SubGroup> {
        self.repo_to_group
            .get(full_name)
            .and_then(|id| self.sub_groups.get(id))
    }

    pub fn sub_group_ids(&self) -> BTreeSet<GroupId> {
        self.sub_groups.keys().cloned().collect()
    }

    /// Routing for a task in `project_id`, if that project is tracked.
    pub fn task_routing(&self, project_id: &str) -> Option<TaskRouting> {
        self.sub_group(project_id).map(SubGroup::task_routing)
    }
}
