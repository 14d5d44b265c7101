//! Agent registry.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use agentdock_core::{Agent, AgentKind, AgentStatus};
use agentdock_workspace::{Provisioner, ProvisionError, UpdateReport, cleanup::remove_dir_best_effort};
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{Catalog, RegistryError};

const AGENTS_DIR: &str = "agents";
const REPO_DIR: &str = "repo";
const SNAPSHOT_FILE: &str = "config.json";

/// Parameters for [`AgentRegistry::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateAgent {
    pub owner: String,
    pub repo_url: String,
    pub name: Option<String>,
    pub kind: Option<AgentKind>,
    pub branch: Option<String>,
    pub channel: Option<String>,
}

/// Persisted catalog of agents and owner of their workspace directories.
///
/// Every mutation runs with the catalog lock held from the in-memory change
/// through the file rewrite, so concurrent mutations cannot lose each other's
/// writes. Long-running git work happens outside that lock, under a lock
/// scoped to the one agent being provisioned.
pub struct AgentRegistry {
    root: PathBuf,
    catalog: Catalog,
    agents: Mutex<HashMap<String, Agent>>,
    operations: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    provisioner: Provisioner,
}

impl AgentRegistry {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, provisioner: Provisioner) -> Self {
        let root = root.into();
        Self {
            catalog: Catalog::in_root(&root),
            root,
            agents: Mutex::new(HashMap::new()),
            operations: Mutex::new(HashMap::new()),
            provisioner,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// Directory owned by one agent: `<root>/agents/<id>`.
    #[must_use]
    pub fn agent_dir(&self, id: &str) -> PathBuf {
        self.root.join(AGENTS_DIR).join(id)
    }

    /// Create the workspace root and catalog if needed, then load every
    /// persisted record. Returns the number of agents loaded.
    ///
    /// # Errors
    /// Returns error if the directories cannot be created or the catalog is
    /// unreadable.
    pub async fn initialize(&self) -> Result<usize, RegistryError> {
        tokio::fs::create_dir_all(self.root.join(AGENTS_DIR)).await?;
        self.catalog.ensure_exists().await?;

        let loaded = self.catalog.load().await?;
        let mut agents = self.agents.lock().await;
        agents.clear();
        agents.extend(loaded.into_iter().map(|a| (a.id.clone(), a)));

        tracing::info!(root = %self.root.display(), count = agents.len(), "Agent registry loaded");
        Ok(agents.len())
    }

    /// Register a new agent and provision its workspace.
    ///
    /// The record is persisted as `initializing` before cloning starts and
    /// ends up `active`, or `error` with the failure text. On failure the
    /// agent directory is removed and the provisioning error is returned; the
    /// `error` record stays in the catalog.
    ///
    /// # Errors
    /// Returns [`RegistryError::DuplicateName`] if the owner already has an
    /// agent with that name, [`RegistryError::Provision`] if the clone fails.
    pub async fn create(&self, params: CreateAgent) -> Result<Agent, RegistryError> {
        let id = Uuid::new_v4().to_string();
        let agent_dir = self.agent_dir(&id);
        let now = Utc::now();
        let agent = Agent {
            name: params.name.unwrap_or_else(|| Agent::default_name(&id)),
            kind: params.kind.unwrap_or_default(),
            repo_url: params.repo_url,
            branch: params.branch,
            workspace_dir: agent_dir.join(REPO_DIR),
            owner: params.owner,
            channel: params.channel,
            created_at: now,
            last_used: now,
            status: AgentStatus::Initializing,
            error: None,
            id,
        };

        let _op = self.lock_agent(&agent.id).await;

        {
            let record = agent.clone();
            self.mutate(move |agents| {
                if agents
                    .values()
                    .any(|a| a.owner == record.owner && a.name == record.name)
                {
                    return Err(RegistryError::DuplicateName {
                        owner: record.owner,
                        name: record.name,
                    });
                }
                agents.insert(record.id.clone(), record);
                Ok(())
            })
            .await?;
        }

        tracing::info!(
            agent_id = %agent.id,
            owner = %agent.owner,
            repo = %agent.repo_url,
            "Provisioning agent workspace"
        );

        match self.provision(&agent, &agent_dir).await {
            Ok(()) => {
                let active = self
                    .set_status(&agent.id, AgentStatus::Active, None)
                    .await?
                    .unwrap_or(agent);
                tracing::info!(agent_id = %active.id, name = %active.name, "Agent created");
                Ok(active)
            }
            Err(e) => {
                tracing::error!(agent_id = %agent.id, "Agent provisioning failed: {e}");
                if let Err(persist) = self
                    .set_status(&agent.id, AgentStatus::Error, Some(e.to_string()))
                    .await
                {
                    tracing::error!(agent_id = %agent.id, "Failed to record agent error: {persist}");
                }
                remove_dir_best_effort(&agent_dir).await;
                Err(e.into())
            }
        }
    }

    async fn provision(&self, agent: &Agent, agent_dir: &Path) -> Result<(), ProvisionError> {
        tokio::fs::create_dir_all(agent_dir).await?;
        self.provisioner
            .clone_repo(&agent.repo_url, &agent.workspace_dir, agent.branch.as_deref())
            .await?;

        let snapshot = Agent {
            status: AgentStatus::Active,
            ..agent.clone()
        };
        let data = serde_json::to_vec_pretty(&snapshot).map_err(std::io::Error::other)?;
        tokio::fs::write(agent_dir.join(SNAPSHOT_FILE), data).await?;
        Ok(())
    }

    /// Look an agent up by id, then by name.
    ///
    /// With a caller, name matching only considers that caller's agents, and
    /// a record owned by someone else is an authorization fault rather than a
    /// miss.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] or [`RegistryError::Unauthorized`].
    pub async fn get(&self, id_or_name: &str, caller: Option<&str>) -> Result<Agent, RegistryError> {
        let agents = self.agents.lock().await;
        let found = agents.get(id_or_name).or_else(|| {
            agents
                .values()
                .find(|a| a.name == id_or_name && caller.is_none_or(|c| a.is_owned_by(c)))
        });

        let agent = found.ok_or_else(|| RegistryError::NotFound(id_or_name.to_string()))?;
        if let Some(caller) = caller {
            if !agent.is_owned_by(caller) {
                return Err(RegistryError::Unauthorized {
                    agent: agent.id.clone(),
                    caller: caller.to_string(),
                });
            }
        }
        Ok(agent.clone())
    }

    /// Agents matching the optional owner and channel filters, most recently
    /// used first.
    pub async fn list(&self, owner: Option<&str>, channel: Option<&str>) -> Vec<Agent> {
        let agents = self.agents.lock().await;
        let mut result: Vec<Agent> = agents
            .values()
            .filter(|a| owner.is_none_or(|o| a.owner == o))
            .filter(|a| channel.is_none_or(|c| a.channel.as_deref() == Some(c)))
            .cloned()
            .collect();

        result.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        result
    }

    /// Stamp the agent as used now. Unknown ids are ignored.
    ///
    /// # Errors
    /// Returns error if the catalog cannot be written.
    pub async fn update_last_used(&self, id: &str) -> Result<(), RegistryError> {
        let id = id.to_string();
        self.mutate(move |agents| {
            if let Some(agent) = agents.get_mut(&id) {
                agent.last_used = Utc::now();
            }
            Ok(())
        })
        .await
    }

    /// Move an agent to `status`. The error text is replaced by `error`, so
    /// passing `None` clears it. Returns the updated record, or `None` for an
    /// unknown id.
    ///
    /// # Errors
    /// Returns error if the catalog cannot be written.
    pub async fn set_status(
        &self,
        id: &str,
        status: AgentStatus,
        error: Option<String>,
    ) -> Result<Option<Agent>, RegistryError> {
        let id = id.to_string();
        self.mutate(move |agents| {
            Ok(agents.get_mut(&id).map(|agent| {
                agent.status = status;
                agent.error = error;
                agent.clone()
            }))
        })
        .await
    }

    /// Remove an agent owned by `caller` along with its directory.
    ///
    /// Directory removal is best-effort; a failure is logged and the record
    /// is removed regardless.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`], [`RegistryError::Unauthorized`],
    /// or a catalog write error.
    pub async fn delete(&self, id_or_name: &str, caller: &str) -> Result<Agent, RegistryError> {
        let agent = self.get(id_or_name, Some(caller)).await?;
        let _op = self.lock_agent(&agent.id).await;

        if let Some(e) = remove_dir_best_effort(&self.agent_dir(&agent.id)).await {
            tracing::warn!(agent_id = %agent.id, "Agent directory not fully removed: {e}");
        }

        let id = agent.id.clone();
        self.mutate(move |agents| {
            agents.remove(&id);
            Ok(())
        })
        .await?;
        self.operations.lock().await.remove(&agent.id);

        tracing::info!(agent_id = %agent.id, name = %agent.name, "Agent deleted");
        Ok(agent)
    }

    /// Pull the latest upstream changes into an agent's workspace, switching
    /// to `branch` first when given.
    ///
    /// Success leaves the agent `active` and bumps last-used. Failure leaves
    /// it `error` with the failure text and returns the provisioning error.
    /// Uncommitted changes in the workspace are stashed and not restored.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`], [`RegistryError::Unauthorized`],
    /// or [`RegistryError::Provision`].
    pub async fn update(
        &self,
        id_or_name: &str,
        caller: &str,
        branch: Option<&str>,
    ) -> Result<Agent, RegistryError> {
        let agent = self.get(id_or_name, Some(caller)).await?;
        let _op = self.lock_agent(&agent.id).await;

        let outcome = self.refresh(&agent.workspace_dir, branch).await;

        let id = agent.id.clone();
        match outcome {
            Ok(report) => {
                tracing::info!(
                    agent_id = %agent.id,
                    branch = %report.branch,
                    stashed = report.stashed,
                    "Agent workspace updated"
                );
                let updated = self
                    .mutate(move |agents| {
                        let agent = agents
                            .get_mut(&id)
                            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
                        agent.status = AgentStatus::Active;
                        agent.error = None;
                        agent.branch = Some(report.branch);
                        agent.last_used = Utc::now();
                        Ok(agent.clone())
                    })
                    .await?;
                Ok(updated)
            }
            Err(e) => {
                tracing::error!(agent_id = %agent.id, "Agent update failed: {e}");
                let message = e.to_string();
                if let Err(persist) = self
                    .mutate(move |agents| {
                        if let Some(agent) = agents.get_mut(&id) {
                            agent.status = AgentStatus::Error;
                            agent.error = Some(message);
                        }
                        Ok(())
                    })
                    .await
                {
                    tracing::error!(agent_id = %agent.id, "Failed to record agent error: {persist}");
                }
                Err(e.into())
            }
        }
    }

    async fn refresh(
        &self,
        workspace_dir: &Path,
        branch: Option<&str>,
    ) -> Result<UpdateReport, ProvisionError> {
        if let Some(branch) = branch {
            self.provisioner.switch_branch(workspace_dir, branch).await?;
        }
        self.provisioner.update(workspace_dir).await
    }

    /// Serialize provisioning work for one agent.
    async fn lock_agent(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut operations = self.operations.lock().await;
            Arc::clone(operations.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Apply `f` to a copy of the catalog and persist it; the in-memory state
    /// only changes once the file write succeeded.
    async fn mutate<F, R>(&self, f: F) -> Result<R, RegistryError>
    where
        F: FnOnce(&mut HashMap<String, Agent>) -> Result<R, RegistryError>,
    {
        let mut agents = self.agents.lock().await;
        let mut next = agents.clone();
        let result = f(&mut next)?;

        let mut records: Vec<&Agent> = next.values().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        self.catalog.save(&records).await?;

        *agents = next;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(root: &Path) -> AgentRegistry {
        // A git program that cannot be spawned makes every clone fail fast.
        AgentRegistry::new(root, Provisioner::default().with_git_program("agentdock-no-such-git"))
    }

    fn params(owner: &str, name: Option<&str>) -> CreateAgent {
        CreateAgent {
            owner: owner.to_string(),
            repo_url: "https://example.com/r.git".to_string(),
            name: name.map(str::to_string),
            ..CreateAgent::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("ws");
        let reg = registry(&root);

        assert_eq!(reg.initialize().await.unwrap(), 0);
        assert!(root.join("agents").is_dir());
        assert_eq!(std::fs::read_to_string(root.join("agents.json")).unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_failed_clone_records_error_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        reg.initialize().await.unwrap();

        let err = reg.create(params("U1", None)).await.unwrap_err();
        assert!(matches!(err, RegistryError::Provision(ProvisionError::Clone(_))));

        let agents = reg.list(Some("U1"), None).await;
        assert_eq!(agents.len(), 1);
        let agent = &agents[0];
        assert_eq!(agent.status, AgentStatus::Error);
        assert!(!agent.error.as_deref().unwrap_or_default().is_empty());
        assert!(agent.name.starts_with("agent-"));
        assert_eq!(agent.kind, AgentKind::Claude);
        assert!(!reg.agent_dir(&agent.id).exists());

        // The persisted record agrees with memory.
        let reloaded = registry(tmp.path());
        reloaded.initialize().await.unwrap();
        let persisted = reloaded.get(&agent.id, None).await.unwrap();
        assert_eq!(persisted.status, AgentStatus::Error);
    }

    #[tokio::test]
    async fn test_duplicate_name_per_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        reg.initialize().await.unwrap();

        let _ = reg.create(params("U1", Some("web"))).await;
        assert!(matches!(
            reg.create(params("U1", Some("web"))).await,
            Err(RegistryError::DuplicateName { .. })
        ));
        // Another owner may reuse the name.
        assert!(matches!(
            reg.create(params("U2", Some("web"))).await,
            Err(RegistryError::Provision(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_by_name_respects_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        reg.initialize().await.unwrap();
        let _ = reg.create(params("U1", Some("web"))).await;
        let id = reg.list(None, None).await[0].id.clone();

        assert_eq!(reg.get("web", Some("U1")).await.unwrap().id, id);
        assert_eq!(reg.get("web", None).await.unwrap().id, id);
        assert!(matches!(
            reg.get("web", Some("U2")).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            reg.get(&id, Some("U2")).await,
            Err(RegistryError::Unauthorized { .. })
        ));
        assert!(matches!(
            reg.get("nope", None).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_by_last_used() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        reg.initialize().await.unwrap();

        for (owner, name, channel) in [("U1", "a", "C1"), ("U1", "b", "C2"), ("U2", "c", "C1")] {
            let _ = reg
                .create(CreateAgent {
                    channel: Some(channel.to_string()),
                    ..params(owner, Some(name))
                })
                .await;
        }
        let a = reg.get("a", Some("U1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        reg.update_last_used(&a.id).await.unwrap();

        let names = |v: Vec<Agent>| v.into_iter().map(|a| a.name).collect::<Vec<_>>();
        assert_eq!(names(reg.list(Some("U1"), None).await), vec!["a", "b"]);
        assert_eq!(names(reg.list(None, Some("C1")).await).len(), 2);
        assert_eq!(names(reg.list(Some("U1"), Some("C2")).await), vec!["b"]);
        assert_eq!(reg.list(None, None).await.len(), 3);

        // Unknown ids are silently ignored.
        reg.update_last_used("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_set_status_clears_error() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        reg.initialize().await.unwrap();
        let _ = reg.create(params("U1", None)).await;
        let id = reg.list(None, None).await[0].id.clone();

        let agent = reg
            .set_status(&id, AgentStatus::Inactive, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Inactive);
        assert!(agent.error.is_none());
        assert!(reg.set_status("missing", AgentStatus::Active, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_requires_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        reg.initialize().await.unwrap();
        let _ = reg.create(params("U1", Some("web"))).await;
        let agent = reg.get("web", Some("U1")).await.unwrap();

        // Pretend the workspace exists.
        let repo = reg.agent_dir(&agent.id).join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("file.txt"), "x").unwrap();

        assert!(matches!(
            reg.delete(&agent.id, "U2").await,
            Err(RegistryError::Unauthorized { .. })
        ));
        assert_eq!(reg.get(&agent.id, None).await.unwrap(), agent);
        assert!(repo.exists());

        reg.delete(&agent.id, "U1").await.unwrap();
        assert!(matches!(
            reg.get(&agent.id, None).await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(!reg.agent_dir(&agent.id).exists());

        let reloaded = registry(tmp.path());
        assert_eq!(reloaded.initialize().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_of_missing_workspace_marks_error() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path());
        reg.initialize().await.unwrap();
        let _ = reg.create(params("U1", None)).await;
        let id = reg.list(None, None).await[0].id.clone();
        reg.set_status(&id, AgentStatus::Active, None).await.unwrap();

        let err = reg.update(&id, "U1", None).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Provision(ProvisionError::WorkspaceNotFound(_))
        ));
        let agent = reg.get(&id, None).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Error);
        assert!(agent.error.is_some());

        assert!(matches!(
            reg.update(&id, "U2", None).await,
            Err(RegistryError::Unauthorized { .. })
        ));
    }
}
