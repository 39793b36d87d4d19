//! Crew registry: `(agent, name) → crew member` and `agent → default crew`
//! lookups, merging file-defined and database-defined crews (spec.md §4.1).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use crewline_core::error::{CrewlineError, Result};
use crewline_core::types::{CrewMemberConfig, CrewSource};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::member::{ConfiguredCrewMember, CrewMember};

/// Database-backed crew configuration source (spec.md §1: persistence is
/// an external collaborator — only the abstract load operation is
/// specified here).
#[async_trait]
pub trait CrewDbSource: Send + Sync {
    async fn load_for_agent(&self, agent: &str) -> Result<Vec<CrewMemberConfig>>;
}

/// File-backed crew configuration source. The registry resolves the
/// directory name itself (see `candidate_dirs`); this trait only needs to
/// answer "does this candidate exist" and "what crews live in it".
#[async_trait]
pub trait CrewFileSource: Send + Sync {
    async fn dir_exists(&self, candidate: &str) -> bool;
    async fn load_dir(&self, candidate: &str) -> Result<Vec<CrewMemberConfig>>;
}

/// A source that never finds anything — used where a registry has only a
/// file source, or only a database source.
pub struct NoSource;

#[async_trait]
impl CrewDbSource for NoSource {
    async fn load_for_agent(&self, _agent: &str) -> Result<Vec<CrewMemberConfig>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl CrewFileSource for NoSource {
    async fn dir_exists(&self, _candidate: &str) -> bool {
        false
    }
    async fn load_dir(&self, _candidate: &str) -> Result<Vec<CrewMemberConfig>> {
        Ok(Vec::new())
    }
}

/// Candidate per-agent directory names, tried in order, first existing one
/// wins (spec.md §4.1 "Path resolution"):
/// exact, lowercased, lowercase-with-dashes (trailing dash trimmed),
/// alpha-only, first whitespace-delimited token.
pub fn candidate_dirs(agent_name: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let push_unique = |candidates: &mut Vec<String>, s: String| {
        if !s.is_empty() && !candidates.contains(&s) {
            candidates.push(s);
        }
    };

    push_unique(&mut candidates, agent_name.to_string());

    let lowered = agent_name.to_lowercase();
    push_unique(&mut candidates, lowered.clone());

    let dashed: String = lowered
        .chars()
        .map(|c| if c == ' ' || c == '.' { '-' } else { c })
        .collect();
    let dashed = dashed.trim_end_matches('-').to_string();
    push_unique(&mut candidates, dashed);

    let alpha_only: String = lowered.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    push_unique(&mut candidates, alpha_only);

    let first_token = agent_name
        .split_whitespace()
        .next()
        .unwrap_or(agent_name)
        .to_string();
    push_unique(&mut candidates, first_token);

    candidates
}

type CrewMap = HashMap<String, Arc<dyn CrewMember>>;

/// Owns crew-member instances for the process lifetime, keyed by
/// `(agent, name)` (spec.md §3.2). Reload replaces an agent's map
/// atomically.
pub struct CrewRegistry {
    db: Arc<dyn CrewDbSource>,
    files: Arc<dyn CrewFileSource>,
    cache: DashMap<String, Arc<CrewMap>>,
}

impl CrewRegistry {
    pub fn new(db: Arc<dyn CrewDbSource>, files: Arc<dyn CrewFileSource>) -> Self {
        Self {
            db,
            files,
            cache: DashMap::new(),
        }
    }

    /// Load once, cache. Two passes: DB-sourced configs first, then
    /// file-sourced ones overlaid — overwriting on name collision and
    /// logging the override. A failure in a single entry must not abort
    /// the whole load (spec.md §4.1); a crew with duplicate tool names is
    /// skipped the same way.
    pub async fn load_crew_for_agent(&self, agent: &str) -> Arc<CrewMap> {
        if let Some(existing) = self.cache.get(agent) {
            return existing.clone();
        }

        let mut map: CrewMap = HashMap::new();

        match self.db.load_for_agent(agent).await {
            Ok(configs) => {
                for mut cfg in configs {
                    cfg.source = CrewSource::Database;
                    if cfg.has_duplicate_tool_names() {
                        warn!(agent, crew = %cfg.name, "db crew declares duplicate tool names, skipping");
                        continue;
                    }
                    map.insert(cfg.name.clone(), Arc::new(ConfiguredCrewMember::new(cfg)));
                }
            }
            Err(e) => warn!(agent, err = %e, "db crew source failed, continuing with none"),
        }

        if let Some(dir) = self.resolve_file_dir(agent).await {
            match self.files.load_dir(&dir).await {
                Ok(configs) => {
                    for mut cfg in configs {
                        cfg.source = CrewSource::File;
                        if cfg.has_duplicate_tool_names() {
                            warn!(agent, crew = %cfg.name, "file crew declares duplicate tool names, skipping");
                            continue;
                        }
                        if map.contains_key(&cfg.name) {
                            info!(agent, crew = %cfg.name, "file crew overrides database crew");
                        }
                        map.insert(cfg.name.clone(), Arc::new(ConfiguredCrewMember::new(cfg)));
                    }
                }
                Err(e) => warn!(agent, dir, err = %e, "file crew source failed, continuing with db crews only"),
            }
        }

        let map = Arc::new(map);
        self.cache.insert(agent.to_string(), map.clone());
        map
    }

    /// Try each candidate directory name in order; the first that exists
    /// wins. Absence of any directory is not an error (spec.md §4.1).
    async fn resolve_file_dir(&self, agent: &str) -> Option<String> {
        for candidate in candidate_dirs(agent) {
            if self.files.dir_exists(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    pub async fn get_crew_member(&self, agent: &str, name: &str) -> Result<Arc<dyn CrewMember>> {
        let map = self.load_crew_for_agent(agent).await;
        map.get(name).cloned().ok_or_else(|| CrewlineError::CrewNotFound {
            name: name.to_string(),
        })
    }

    /// The first `isDefault` crew by iteration order when more than one
    /// declares it (spec.md §3.1 invariant).
    pub async fn get_default_crew(&self, agent: &str) -> Result<Arc<dyn CrewMember>> {
        let map = self.load_crew_for_agent(agent).await;
        let mut names: Vec<&String> = map.keys().collect();
        names.sort();
        names
            .into_iter()
            .find_map(|name| {
                let crew = map.get(name)?;
                crew.config().is_default.then(|| crew.clone())
            })
            .ok_or_else(|| CrewlineError::CrewNotFound {
                name: "<default>".to_string(),
            })
    }

    pub async fn list_crew(&self, agent: &str) -> Vec<Arc<dyn CrewMember>> {
        self.load_crew_for_agent(agent).await.values().cloned().collect()
    }

    pub async fn has_crew(&self, agent: &str) -> bool {
        !self.load_crew_for_agent(agent).await.is_empty()
    }

    /// Invalidate cache and re-execute the load.
    pub async fn reload_crew(&self, agent: &str) -> Arc<CrewMap> {
        self.cache.remove(agent);
        self.load_crew_for_agent(agent).await
    }
}
