//! Batched eager loading.
//!
//! Each top-level relation runs one query for the whole parent batch. Nested paths
//! (`posts.comments`) are handed to the relation query, so they load after their
//! parent's results exist.

use super::model::Model;
use super::query::QueryConstraint;
use super::schema::EntitySchema;
use super::Orm;
use crate::error::OrmResult;
use crate::relations::{self, Constraints};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// One requested relation path with an optional query constraint.
#[derive(Clone)]
pub struct EagerLoad {
    pub path: String,
    pub constraint: Option<QueryConstraint>,
    /// Nested loads per morph target entity, for morph-to paths.
    pub morph_with: Vec<(String, Vec<String>)>,
}

impl fmt::Debug for EagerLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerLoad")
            .field("path", &self.path)
            .field("constrained", &self.constraint.is_some())
            .field("morph_with", &self.morph_with)
            .finish()
    }
}

impl EagerLoad {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            constraint: None,
            morph_with: Vec::new(),
        }
    }

    pub fn constrained(mut self, constraint: QueryConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn morph_with(mut self, entries: Vec<(String, Vec<String>)>) -> Self {
        self.morph_with = entries;
        self
    }
}

/// Top-level relation with its own constraint and the paths nested below it.
struct EagerGroup {
    name: String,
    constraint: Option<QueryConstraint>,
    morph_with: Vec<(String, Vec<String>)>,
    nested: Vec<EagerLoad>,
}

/// Group dotted paths by their first segment, keeping first-seen order.
fn group_loads(loads: &[EagerLoad]) -> Vec<EagerGroup> {
    let mut groups: Vec<EagerGroup> = Vec::new();
    for load in loads {
        let (head, rest) = match load.path.split_once('.') {
            Some((head, rest)) => (head.trim(), Some(rest.trim())),
            None => (load.path.trim(), None),
        };
        if head.is_empty() {
            continue;
        }
        let index = match groups.iter().position(|g| g.name == head) {
            Some(i) => i,
            None => {
                groups.push(EagerGroup {
                    name: head.to_string(),
                    constraint: None,
                    morph_with: Vec::new(),
                    nested: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];
        match rest {
            Some(rest) => group.nested.push(EagerLoad {
                path: rest.to_string(),
                constraint: load.constraint.clone(),
                morph_with: load.morph_with.clone(),
            }),
            None => {
                if load.constraint.is_some() {
                    group.constraint = load.constraint.clone();
                }
                group.morph_with.extend(load.morph_with.iter().cloned());
            }
        }
    }
    groups
}

/// Load every requested relation onto `models`.
pub(crate) async fn eager_load_relations(
    orm: &Orm,
    schema: &Arc<EntitySchema>,
    models: &mut [Model],
    loads: &[EagerLoad],
) -> OrmResult<()> {
    for group in group_loads(loads) {
        let started = Instant::now();
        let blank = Model::new(orm.clone(), schema.clone());
        let mut relation = relations::resolve_with(&blank, &group.name, Constraints::Bare)?;
        if let Some(constraint) = &group.constraint {
            relation.constrain(constraint);
        }
        if !group.morph_with.is_empty() {
            relation.morph_with(&group.morph_with)?;
        }
        if !group.nested.is_empty() {
            relation.with_nested(group.nested);
        }
        let matched = relation.eager_load(models, &group.name).await?;
        tracing::debug!(
            target: "fedaco.eager",
            entity = %schema.name(),
            relation = %group.name,
            parents = models.len(),
            results = matched,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "eager loaded relation"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_nested_paths_under_their_parent() {
        let loads = vec![
            EagerLoad::new("posts.comments"),
            EagerLoad::new("author"),
            EagerLoad::new("posts"),
            EagerLoad::new("posts.tags.labels"),
        ];
        let groups = group_loads(&loads);
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["posts", "author"]);
        let nested: Vec<_> = groups[0].nested.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(nested, vec!["comments", "tags.labels"]);
        assert!(groups[1].nested.is_empty());
    }

    #[test]
    fn constraint_stays_with_its_segment() {
        let c: QueryConstraint = Arc::new(|q: crate::orm::EntityQuery| q);
        let loads = vec![
            EagerLoad::new("posts"),
            EagerLoad::new("posts.comments").constrained(c),
        ];
        let groups = group_loads(&loads);
        assert!(groups[0].constraint.is_none());
        assert!(groups[0].nested[0].constraint.is_some());
    }
}
