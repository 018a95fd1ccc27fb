//! Project hierarchy and the Propagation Resolver.
//!
//! Edges form a forest `(parent_project, child_project)`. Cycles are
//! rejected when an edge is inserted, never discovered during propagation.
//! Propagation itself is one level deep: activating a parent clears the
//! `is_propagated` flag on its fresh rows and hands the direct children to
//! the external scheduler; a child acknowledges upward when its own
//! ingestion completes.

use std::collections::{HashSet, VecDeque};

use sqlx::{Row, SqlitePool};

use crate::error::{LedgerError, Result};
use crate::models::HierarchyEdge;

#[derive(Clone)]
pub struct ProjectHierarchy {
    pool: SqlitePool,
}

impl ProjectHierarchy {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an edge, rejecting self-edges and anything that would close a
    /// cycle. Duplicate edges are ignored.
    pub async fn add_edge(&self, parent: &str, child: &str) -> Result<()> {
        if parent == child {
            return Err(LedgerError::CycleDetected {
                parent: parent.to_string(),
                child: child.to_string(),
            });
        }

        // A cycle appears iff the parent is already reachable from the
        // child through existing descendant edges.
        if self.is_reachable(child, parent).await? {
            return Err(LedgerError::CycleDetected {
                parent: parent.to_string(),
                child: child.to_string(),
            });
        }

        sqlx::query(
            "INSERT INTO project_hierarchy (parent_project, child_project) VALUES (?, ?)
             ON CONFLICT(parent_project, child_project) DO NOTHING",
        )
        .bind(parent)
        .bind(child)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn children(&self, project: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT child_project FROM project_hierarchy WHERE parent_project = ? ORDER BY child_project",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("child_project")).collect())
    }

    pub async fn parents(&self, project: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT parent_project FROM project_hierarchy WHERE child_project = ? ORDER BY parent_project",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("parent_project")).collect())
    }

    pub async fn edges(&self) -> Result<Vec<HierarchyEdge>> {
        let rows = sqlx::query(
            "SELECT parent_project, child_project FROM project_hierarchy
             ORDER BY parent_project, child_project",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| HierarchyEdge {
                parent_project: r.get("parent_project"),
                child_project: r.get("child_project"),
            })
            .collect())
    }

    /// BFS over descendant edges.
    async fn is_reachable(&self, from: &str, to: &str) -> Result<bool> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(from.to_string());

        while let Some(current) = queue.pop_front() {
            if current == to {
                return Ok(true);
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            for child in self.children(&current).await? {
                queue.push_back(child);
            }
        }
        Ok(false)
    }
}

/// Fan-out after activation.
#[derive(Clone)]
pub struct PropagationResolver {
    pool: SqlitePool,
    hierarchy: ProjectHierarchy,
}

impl PropagationResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            hierarchy: ProjectHierarchy::new(pool.clone()),
            pool,
        }
    }

    pub fn hierarchy(&self) -> &ProjectHierarchy {
        &self.hierarchy
    }

    /// Called after a project activates a new version. Flags the project's
    /// active rows as awaiting propagation (when it has children) and
    /// returns the direct children to be re-ingested. The re-ingestion
    /// trigger itself belongs to the external scheduler.
    pub async fn schedule(&self, project: &str) -> Result<Vec<String>> {
        let children = self.hierarchy.children(project).await?;
        if children.is_empty() {
            return Ok(children);
        }

        sqlx::query(
            "UPDATE policy_chunks SET is_propagated = 0 WHERE project = ? AND is_active = 1",
        )
        .bind(project)
        .execute(&self.pool)
        .await?;

        tracing::info!(project, children = children.len(), "scheduled propagation");
        Ok(children)
    }

    /// Called when a child project's ingestion completes: acknowledges the
    /// triggering rows of each direct parent. Returns the parents touched.
    pub async fn acknowledge(&self, child: &str) -> Result<Vec<String>> {
        let parents = self.hierarchy.parents(child).await?;
        for parent in &parents {
            sqlx::query(
                "UPDATE policy_chunks SET is_propagated = 1 WHERE project = ? AND is_active = 1",
            )
            .bind(parent)
            .execute(&self.pool)
            .await?;
        }
        Ok(parents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn fixture() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&dir.path().join("pol.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn edges_and_lookups() {
        let (_dir, pool) = fixture().await;
        let h = ProjectHierarchy::new(pool);
        h.add_edge("AMBOSELI", "SERENGETI").await.unwrap();
        h.add_edge("AMBOSELI", "KILIMANJARO").await.unwrap();
        // Duplicate insert is a no-op.
        h.add_edge("AMBOSELI", "SERENGETI").await.unwrap();

        assert_eq!(
            h.children("AMBOSELI").await.unwrap(),
            vec!["KILIMANJARO".to_string(), "SERENGETI".to_string()]
        );
        assert_eq!(
            h.parents("SERENGETI").await.unwrap(),
            vec!["AMBOSELI".to_string()]
        );
        assert_eq!(h.edges().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn self_edge_rejected() {
        let (_dir, pool) = fixture().await;
        let h = ProjectHierarchy::new(pool);
        assert!(matches!(
            h.add_edge("A", "A").await,
            Err(LedgerError::CycleDetected { .. })
        ));
    }

    #[tokio::test]
    async fn cycle_rejected_at_insert_time() {
        let (_dir, pool) = fixture().await;
        let h = ProjectHierarchy::new(pool);
        h.add_edge("A", "B").await.unwrap();
        h.add_edge("B", "C").await.unwrap();
        // C -> A would close a three-node cycle.
        assert!(matches!(
            h.add_edge("C", "A").await,
            Err(LedgerError::CycleDetected { .. })
        ));
        // The forest is unchanged.
        assert_eq!(h.edges().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn schedule_without_children_flags_nothing() {
        let (_dir, pool) = fixture().await;
        let resolver = PropagationResolver::new(pool);
        assert!(resolver.schedule("LONER").await.unwrap().is_empty());
    }
}
